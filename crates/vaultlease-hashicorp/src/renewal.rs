//  Copyright (c) 2026 Metaform Systems, Inc
//
//  This program and the accompanying materials are made available under the
//  terms of the Apache License, Version 2.0 which is available at
//  https://www.apache.org/licenses/LICENSE-2.0
//
//  SPDX-License-Identifier: Apache-2.0
//
//  Contributors:
//       Metaform Systems, Inc. - initial API and implementation
//

use crate::auth::{CredentialProvider, VaultEndpoint, client_token, handle_error_response, parse_auth_response};
use crate::state::VaultClientState;
use async_trait::async_trait;
use bon::Builder;
use log::{debug, info, warn};
use reqwest::Method;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use vaultlease_core::renewal::{LeaseRenewer, RenewalError};
use vaultlease_core::util::clock::{Clock, default_clock};
use vaultlease_core::vault::{Credential, VaultError};

pub(crate) const RENEW_SELF_PATH: &str = "auth/token/renew-self";

/// Keeps the client token alive.
///
/// Each attempt first extends the current token via `renew-self`. When Vault rejects the token or it can no
/// longer be extended, the renewer logs in again with the configured provider and installs the new token.
#[derive(Builder)]
pub struct AuthTokenRenewer {
    endpoint: VaultEndpoint,
    provider: Arc<dyn CredentialProvider>,
    state: Arc<RwLock<VaultClientState>>,
    #[builder(default = default_clock())]
    clock: Arc<dyn Clock>,
}

impl AuthTokenRenewer {
    async fn reauthenticate(&self) -> Result<Credential, RenewalError> {
        let credential = self.provider.authenticate(&self.endpoint).await?;
        let token = client_token(&credential)?.to_string();

        let mut state = self.state.write().await;
        state.replaced(token, credential.lease_duration(), self.clock.now());
        info!("Obtained new Vault token by login");

        Ok(credential)
    }
}

#[async_trait]
impl LeaseRenewer for AuthTokenRenewer {
    async fn renew(&self) -> Result<Credential, RenewalError> {
        let (token, lease_duration) = {
            let state = self.state.read().await;
            (state.token(), state.lease_duration())
        };

        match renew_token(&self.endpoint, &token, lease_duration).await {
            Ok(credential) if credential.is_renewable() => {
                self.state
                    .write()
                    .await
                    .renewed(credential.lease_duration(), self.clock.now());
                debug!("Vault token renewed for {:?}", credential.lease_duration());
                Ok(credential)
            }
            Ok(_) => {
                info!("Vault token reached its maximum TTL, logging in again");
                self.reauthenticate().await
            }
            Err(VaultError::AuthenticationError(message)) => {
                warn!("Vault token rejected, logging in again: {}", message);
                self.reauthenticate().await
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Serialize)]
struct TokenRenewRequest {
    increment: String,
}

/// Extends `token` by `lease_duration` through `auth/token/renew-self`.
///
/// A rejected or expired token is reported as [`VaultError::AuthenticationError`].
pub async fn renew_token(
    endpoint: &VaultEndpoint,
    token: &str,
    lease_duration: Duration,
) -> Result<Credential, VaultError> {
    let request = TokenRenewRequest {
        increment: format!("{}s", lease_duration.as_secs()),
    };

    let response = endpoint
        .authorized(Method::POST, RENEW_SELF_PATH, token)
        .json(&request)
        .send()
        .await
        .map_err(|e| VaultError::NetworkError(format!("Failed to renew token: {}", e)))?;

    let status = response.status();
    if status.as_u16() == 403 {
        let body = response.text().await.unwrap_or_default();
        let message = format!("Token renewal failed with status {}: {}", status, body);
        if body.contains("invalid token") || body.contains("permission denied") {
            return Err(VaultError::AuthenticationError(message));
        }
        return Err(VaultError::PermissionDenied(message));
    }

    if !status.is_success() {
        return Err(handle_error_response(response, "Token renewal failed").await);
    }

    let auth = parse_auth_response(response, "Token renewal").await?;
    let renewable = auth.renewable;
    Ok(auth.into_credential(renewable))
}
