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

use super::auth::{CredentialProvider, VaultEndpoint, client_token, handle_error_response};
use super::config::HashicorpVaultConfig;
use super::renewal::AuthTokenRenewer;
use super::state::VaultClientState;
use async_trait::async_trait;
use log::{debug, info};
use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use vaultlease_core::renewal::{LeaseRenewalScheduler, RenewalError, RenewalHandle, RenewalStatus};
use vaultlease_core::util::clock::Clock;
use vaultlease_core::vault::{
    CIPHERTEXT_KEY, Credential, PLAINTEXT_KEY, SecretFetcher, SecretPath, TransitCipher, VaultError,
    decode_plaintext, encode_plaintext, join_segments,
};

const AUTH_TOKEN_LABEL: &str = "vault-token";

/// Hashicorp Vault client with pluggable login and automatic token renewal.
pub struct HashicorpVaultClient {
    config: HashicorpVaultConfig,
    endpoint: VaultEndpoint,
    provider: Arc<dyn CredentialProvider>,
    clock: Arc<dyn Clock>,
    state: Option<Arc<RwLock<VaultClientState>>>,
    renewal_handle: Option<RenewalHandle>,
}

impl HashicorpVaultClient {
    /// Creates a new uninitialized Hashicorp Vault client using the login method of `config`.
    ///
    /// Invalid login inputs (e.g. an empty role) are rejected here. The client must be initialized by calling
    /// [`initialize()`](Self::initialize) before use.
    pub fn new(config: HashicorpVaultConfig) -> Result<Self, VaultError> {
        let provider = config.auth_config.provider()?;
        Self::with_provider(config, provider)
    }

    /// Creates a new uninitialized client that logs in with `provider` instead of the configured login method.
    pub fn with_provider(
        config: HashicorpVaultConfig,
        provider: Arc<dyn CredentialProvider>,
    ) -> Result<Self, VaultError> {
        if config.vault_url.trim().is_empty() {
            return Err(VaultError::ConfigurationError("vault_url must not be empty".to_string()));
        }

        let http_client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| VaultError::ConfigurationError(format!("Failed to create HTTP client: {}", e)))?;

        let endpoint = VaultEndpoint::new(http_client, &config.vault_url, config.namespace.clone());
        let clock = config.renewal.clock.clone();

        Ok(Self {
            config,
            endpoint,
            provider,
            clock,
            state: None,
            renewal_handle: None,
        })
    }

    /// Logs in and, if the token has a renewable lease, starts renewing it in the background.
    ///
    /// Any login failure is reported as [`VaultError::AuthenticationError`].
    pub async fn initialize(&mut self) -> Result<(), VaultError> {
        if self.state.is_some() {
            return Err(VaultError::ConfigurationError("Client is already initialized".to_string()));
        }

        let credential = self.provider.authenticate(&self.endpoint).await.map_err(|e| match e {
            VaultError::AuthenticationError(_) => e,
            other => VaultError::AuthenticationError(format!("Vault login failed: {}", other)),
        })?;
        let token = client_token(&credential)?;

        let state = Arc::new(RwLock::new(
            VaultClientState::builder()
                .token(token)
                .last_created(self.clock.now())
                .lease_duration(credential.lease_duration())
                .build(),
        ));

        if credential.is_renewable() {
            let renewer = AuthTokenRenewer::builder()
                .endpoint(self.endpoint.clone())
                .provider(Arc::clone(&self.provider))
                .state(Arc::clone(&state))
                .clock(self.clock.clone())
                .build();

            let scheduler = LeaseRenewalScheduler::new(self.config.renewal.clone());
            self.renewal_handle = Some(scheduler.start(AUTH_TOKEN_LABEL, credential, Arc::new(renewer)));
        } else {
            info!("Vault token is not renewable, token renewal disabled");
        }

        self.state = Some(state);
        Ok(())
    }

    /// Returns the current client token.
    pub async fn token(&self) -> Result<String, VaultError> {
        let state = self.ensure_initialized()?;
        Ok(state.read().await.token())
    }

    /// Returns the progress of the token renewal task, if one is running.
    pub fn renewal_status(&self) -> Option<RenewalStatus> {
        self.renewal_handle.as_ref().map(RenewalHandle::status)
    }

    /// Returns true if the client is initialized and token renewal has fewer consecutive failures than the
    /// configured health threshold.
    pub fn is_healthy(&self) -> bool {
        if self.state.is_none() {
            return false;
        }
        match self.renewal_status() {
            Some(status) => {
                status.is_healthy(self.config.health_threshold) && (status.running || status.last_error.is_none())
            }
            None => true,
        }
    }

    /// Stops token renewal and returns how the renewal task ended.
    ///
    /// Returns [`RenewalError::Exhausted`] if renewal had already given up.
    pub async fn shutdown(&mut self) -> Result<(), RenewalError> {
        match self.renewal_handle.take() {
            Some(mut handle) => {
                handle.shutdown();
                handle.wait().await.map(|_| ())
            }
            None => Ok(()),
        }
    }

    /// Resolves the API path of a versioned key/value read.
    pub(crate) fn kv2_path(&self, path: &SecretPath) -> String {
        join_segments([
            Some(path.mount().unwrap_or(&self.config.kv2_mount)),
            Some("data"),
            path.prefix(),
            Some(path.name()),
        ])
    }

    /// Resolves the API path of a transit operation (`encrypt` or `decrypt`).
    pub(crate) fn transit_path(&self, operation: &str, key: &SecretPath) -> String {
        join_segments([
            Some(key.mount().unwrap_or(&self.config.transit_mount)),
            Some(operation),
            Some(key.name()),
        ])
    }

    /// Ensures the client is initialized, returning an error if not.
    fn ensure_initialized(&self) -> Result<&Arc<RwLock<VaultClientState>>, VaultError> {
        self.state
            .as_ref()
            .ok_or_else(|| VaultError::NotInitializedError("Call initialize() first.".to_string()))
    }

    async fn transit_request<T: Serialize + Sync>(
        &self,
        operation: &str,
        key: &SecretPath,
        request: &T,
    ) -> Result<Map<String, Value>, VaultError> {
        let token = self.token().await?;
        let api_path = self.transit_path(operation, key);
        debug!("Transit {} with key {}", operation, key.name());

        let response = self
            .endpoint
            .authorized(Method::POST, &api_path, &token)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                VaultError::NetworkError(format!("Failed to {} with key {}: {}", operation, key.name(), e))
            })?;

        if !response.status().is_success() {
            let context = format!("Transit {} with key {}", operation, key.name());
            return Err(handle_error_response(response, &context).await);
        }

        let transit_response: DataResponse = response
            .json()
            .await
            .map_err(|e| VaultError::InvalidData(format!("Failed to parse transit {} response: {}", operation, e)))?;

        transit_response
            .data
            .ok_or_else(|| VaultError::InvalidData(format!("Transit {} response contained no data", operation)))
    }
}

#[async_trait]
impl SecretFetcher for HashicorpVaultClient {
    async fn fetch(&self, path: &SecretPath) -> Result<Credential, VaultError> {
        let token = self.token().await?;
        let api_path = path.logical_path();
        debug!("Reading secret {}", api_path);

        let response = self
            .endpoint
            .authorized(Method::GET, &api_path, &token)
            .send()
            .await
            .map_err(|e| VaultError::NetworkError(format!("Failed to read secret {}: {}", path, e)))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(VaultError::SecretNotFound(path.to_string()));
        }

        if !response.status().is_success() {
            return Err(handle_error_response(response, &format!("Failed to read secret {}", path)).await);
        }

        let secret: SecretResponse = response
            .json()
            .await
            .map_err(|e| VaultError::InvalidData(format!("Failed to parse secret response for {}: {}", path, e)))?;

        let data = secret.data.ok_or_else(|| VaultError::SecretNotFound(path.to_string()))?;

        Ok(Credential::builder()
            .data(data)
            .lease_id(secret.lease_id)
            .lease_duration(Duration::from_secs(secret.lease_duration))
            .renewable(secret.renewable)
            .build())
    }

    async fn fetch_kv2(&self, path: &SecretPath) -> Result<Credential, VaultError> {
        let token = self.token().await?;
        let api_path = self.kv2_path(path);
        debug!("Reading versioned secret {}", path);

        let mut request = self.endpoint.authorized(Method::GET, &api_path, &token);
        if let Some(version) = path.version() {
            request = request.query(&[("version", version)]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| VaultError::NetworkError(format!("Failed to read secret {}: {}", path, e)))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(VaultError::SecretNotFound(path.to_string()));
        }

        if !response.status().is_success() {
            return Err(handle_error_response(response, &format!("Failed to read secret {}", path)).await);
        }

        let read_response: KvV2ReadResponse = response
            .json()
            .await
            .map_err(|e| VaultError::InvalidData(format!("Failed to parse secret response for {}: {}", path, e)))?;

        // Deleted or destroyed versions come back without data
        read_response
            .data
            .and_then(|d| d.data)
            .map(Credential::static_secret)
            .ok_or_else(|| VaultError::SecretNotFound(path.to_string()))
    }
}

#[async_trait]
impl TransitCipher for HashicorpVaultClient {
    async fn encrypt(&self, key: &SecretPath, plaintext: &[u8]) -> Result<Credential, VaultError> {
        let request = TransitEncryptRequest {
            plaintext: encode_plaintext(plaintext),
        };
        let data = self.transit_request("encrypt", key, &request).await?;
        let credential = Credential::static_secret(data);

        // Fail early on a response a caller could not decrypt later
        credential.get_str(CIPHERTEXT_KEY)?;
        Ok(credential)
    }

    async fn decrypt(&self, key: &SecretPath, ciphertext: &str) -> Result<Vec<u8>, VaultError> {
        let request = TransitDecryptRequest {
            ciphertext: ciphertext.to_string(),
        };
        let data = self.transit_request("decrypt", key, &request).await?;
        let credential = Credential::static_secret(data);

        decode_plaintext(credential.get_str(PLAINTEXT_KEY)?)
    }
}

/// Generic secret read response
#[derive(Debug, Deserialize)]
struct SecretResponse {
    #[serde(default)]
    lease_id: String,
    #[serde(default)]
    lease_duration: u64,
    #[serde(default)]
    renewable: bool,
    data: Option<Map<String, Value>>,
}

/// Vault KV v2 read response
#[derive(Debug, Deserialize)]
struct KvV2ReadResponse {
    data: Option<KvV2Data>,
}

#[derive(Debug, Deserialize)]
struct KvV2Data {
    data: Option<Map<String, Value>>,
}

/// Response with an arbitrary `data` object
#[derive(Debug, Deserialize)]
struct DataResponse {
    data: Option<Map<String, Value>>,
}

/// Vault Transit encrypt request
#[derive(Debug, Serialize)]
struct TransitEncryptRequest {
    plaintext: String,
}

/// Vault Transit decrypt request
#[derive(Debug, Serialize)]
struct TransitDecryptRequest {
    ciphertext: String,
}
