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

use crate::config::{DEFAULT_APPROLE_MOUNT, DEFAULT_KUBERNETES_MOUNT, DEFAULT_USERPASS_MOUNT, KubernetesJwtSource};
use async_trait::async_trait;
use log::debug;
use reqwest::{Client, Method, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use vaultlease_core::vault::{Credential, VaultError, join_segments};

/// Credential field holding the Vault client token.
pub const CLIENT_TOKEN_KEY: &str = "client_token";
/// Credential field holding the token accessor.
pub const ACCESSOR_KEY: &str = "accessor";

pub(crate) const VAULT_TOKEN_HEADER: &str = "X-Vault-Token";
pub(crate) const VAULT_NAMESPACE_HEADER: &str = "X-Vault-Namespace";

/// HTTP access to one Vault server.
#[derive(Clone, Debug)]
pub struct VaultEndpoint {
    http_client: Client,
    vault_url: String,
    namespace: Option<String>,
}

impl VaultEndpoint {
    pub fn new(http_client: Client, vault_url: impl Into<String>, namespace: Option<String>) -> Self {
        Self {
            http_client,
            vault_url: vault_url.into().trim_end_matches('/').to_string(),
            namespace,
        }
    }

    /// Full URL of an API path relative to `/v1`.
    pub fn url(&self, api_path: &str) -> String {
        format!("{}/v1/{}", self.vault_url, api_path.trim_start_matches('/'))
    }

    /// Starts an unauthenticated request, e.g. a login.
    pub fn request(&self, method: Method, api_path: &str) -> RequestBuilder {
        let builder = self.http_client.request(method, self.url(api_path));
        match &self.namespace {
            Some(namespace) => builder.header(VAULT_NAMESPACE_HEADER, namespace),
            None => builder,
        }
    }

    /// Starts a request carrying the client token.
    pub fn authorized(&self, method: Method, api_path: &str, token: &str) -> RequestBuilder {
        self.request(method, api_path).header(VAULT_TOKEN_HEADER, token)
    }
}

/// Strategy that logs in to Vault and produces the client token credential.
///
/// The token is stored under [`CLIENT_TOKEN_KEY`] in the credential's data.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn authenticate(&self, endpoint: &VaultEndpoint) -> Result<Credential, VaultError>;
}

/// Returns the client token held by a login credential.
pub fn client_token(credential: &Credential) -> Result<&str, VaultError> {
    credential.get_str(CLIENT_TOKEN_KEY)
}

/// Uses a pre-issued token. The resulting credential is never renewed.
pub struct TokenAuth {
    token: String,
}

impl TokenAuth {
    pub fn new(token: impl Into<String>) -> Result<Self, VaultError> {
        let token = token.into();
        require("token", &token)?;
        Ok(Self { token })
    }
}

#[async_trait]
impl CredentialProvider for TokenAuth {
    async fn authenticate(&self, _endpoint: &VaultEndpoint) -> Result<Credential, VaultError> {
        let mut data = Map::new();
        data.insert(CLIENT_TOKEN_KEY.to_string(), Value::String(self.token.clone()));
        Ok(Credential::static_secret(data))
    }
}

/// Username/password login against the `userpass` auth method.
pub struct UserPassAuth {
    username: String,
    password: String,
    mount: String,
}

impl UserPassAuth {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Result<Self, VaultError> {
        let username = username.into();
        let password = password.into();
        require("username", &username)?;
        require("password", &password)?;
        Ok(Self {
            username,
            password,
            mount: DEFAULT_USERPASS_MOUNT.to_string(),
        })
    }

    pub fn with_mount(mut self, mount: Option<String>) -> Self {
        if let Some(mount) = mount {
            self.mount = mount;
        }
        self
    }
}

#[derive(Serialize)]
struct PasswordLoginRequest<'a> {
    password: &'a str,
}

#[async_trait]
impl CredentialProvider for UserPassAuth {
    async fn authenticate(&self, endpoint: &VaultEndpoint) -> Result<Credential, VaultError> {
        let api_path = join_segments([
            Some("auth"),
            Some(self.mount.as_str()),
            Some("login"),
            Some(self.username.as_str()),
        ]);
        let request = PasswordLoginRequest {
            password: &self.password,
        };
        login(endpoint, &api_path, &request, "Userpass login").await
    }
}

/// Role ID/secret ID login against the `approle` auth method.
pub struct AppRoleAuth {
    role_id: String,
    secret_id: String,
    mount: String,
}

impl AppRoleAuth {
    pub fn new(role_id: impl Into<String>, secret_id: impl Into<String>) -> Result<Self, VaultError> {
        let role_id = role_id.into();
        let secret_id = secret_id.into();
        require("role_id", &role_id)?;
        require("secret_id", &secret_id)?;
        Ok(Self {
            role_id,
            secret_id,
            mount: DEFAULT_APPROLE_MOUNT.to_string(),
        })
    }

    pub fn with_mount(mut self, mount: Option<String>) -> Self {
        if let Some(mount) = mount {
            self.mount = mount;
        }
        self
    }
}

#[derive(Serialize)]
struct AppRoleLoginRequest<'a> {
    role_id: &'a str,
    secret_id: &'a str,
}

#[async_trait]
impl CredentialProvider for AppRoleAuth {
    async fn authenticate(&self, endpoint: &VaultEndpoint) -> Result<Credential, VaultError> {
        let api_path = join_segments([Some("auth"), Some(self.mount.as_str()), Some("login")]);
        let request = AppRoleLoginRequest {
            role_id: &self.role_id,
            secret_id: &self.secret_id,
        };
        login(endpoint, &api_path, &request, "AppRole login").await
    }
}

/// Service account login against the `kubernetes` auth method.
pub struct KubernetesAuth {
    role: String,
    jwt_source: KubernetesJwtSource,
    mount: String,
}

impl KubernetesAuth {
    pub fn new(role: impl Into<String>, jwt_source: KubernetesJwtSource) -> Result<Self, VaultError> {
        let role = role.into();
        require("role", &role)?;
        match &jwt_source {
            KubernetesJwtSource::Token(token) => require("service account token", token)?,
            KubernetesJwtSource::File(path) if path.as_os_str().is_empty() => {
                return Err(VaultError::ConfigurationError(
                    "Service account token path must not be empty".to_string(),
                ));
            }
            KubernetesJwtSource::File(_) => {}
        }
        Ok(Self {
            role,
            jwt_source,
            mount: DEFAULT_KUBERNETES_MOUNT.to_string(),
        })
    }

    pub fn with_mount(mut self, mount: Option<String>) -> Self {
        if let Some(mount) = mount {
            self.mount = mount;
        }
        self
    }

    async fn jwt(&self) -> Result<String, VaultError> {
        match &self.jwt_source {
            KubernetesJwtSource::Token(token) => Ok(token.clone()),
            KubernetesJwtSource::File(path) => read_token_file(path).await,
        }
    }
}

#[derive(Serialize)]
struct KubernetesLoginRequest<'a> {
    role: &'a str,
    jwt: &'a str,
}

#[async_trait]
impl CredentialProvider for KubernetesAuth {
    async fn authenticate(&self, endpoint: &VaultEndpoint) -> Result<Credential, VaultError> {
        let jwt = self.jwt().await?;
        let api_path = join_segments([Some("auth"), Some(self.mount.as_str()), Some("login")]);
        let request = KubernetesLoginRequest {
            role: &self.role,
            jwt: &jwt,
        };
        login(endpoint, &api_path, &request, "Kubernetes login").await
    }
}

/// Reads a token written to a file, e.g. a projected service account token.
pub(crate) async fn read_token_file(path: &Path) -> Result<String, VaultError> {
    if !path.exists() {
        return Err(VaultError::TokenFileNotFound(format!(
            "Token file not found at path: {}",
            path.display()
        )));
    }

    let token = fs::read_to_string(path)
        .await
        .map_err(|e| VaultError::TokenFileReadError(format!("Failed to read token file {}: {}", path.display(), e)))?;

    let token = token.trim();
    if token.is_empty() {
        return Err(VaultError::InvalidTokenFormat("Token file is empty".to_string()));
    }

    Ok(token.to_string())
}

fn require(field: &str, value: &str) -> Result<(), VaultError> {
    if value.trim().is_empty() {
        return Err(VaultError::ConfigurationError(format!("{} must not be empty", field)));
    }
    Ok(())
}

/// Posts a login request and converts the returned auth block into a credential.
pub(crate) async fn login<T: Serialize + Sync>(
    endpoint: &VaultEndpoint,
    api_path: &str,
    request: &T,
    context: &str,
) -> Result<Credential, VaultError> {
    debug!("{} at {}", context, api_path);

    let response = endpoint
        .request(Method::POST, api_path)
        .json(request)
        .send()
        .await
        .map_err(|e| VaultError::NetworkError(format!("{} request failed: {}", context, e)))?;

    if !response.status().is_success() {
        return Err(handle_error_response(response, &format!("{} failed", context)).await);
    }

    // Login tokens are always renewable; the lease duration decides whether renewal is possible
    let auth = parse_auth_response(response, context).await?;
    Ok(auth.into_credential(true))
}

/// Parses a response carrying an `auth` block (login or token renewal).
pub(crate) async fn parse_auth_response(response: reqwest::Response, context: &str) -> Result<AuthInfo, VaultError> {
    let auth_response: AuthResponse = response
        .json()
        .await
        .map_err(|e| VaultError::InvalidData(format!("Failed to parse {} response: {}", context, e)))?;

    let auth = auth_response
        .auth
        .ok_or_else(|| VaultError::AuthenticationError(format!("{} returned no auth information", context)))?;

    if auth.client_token.is_empty() {
        return Err(VaultError::AuthenticationError(format!(
            "{} returned an empty client token",
            context
        )));
    }

    Ok(auth)
}

/// Helper to extract error details from an HTTP response.
pub(crate) async fn handle_error_response(response: reqwest::Response, context: &str) -> VaultError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = format!("{} with status {}: {}", context, status, body);

    match status.as_u16() {
        400 => VaultError::InvalidData(message),
        401 => VaultError::AuthenticationError(message),
        403 => VaultError::PermissionDenied(message),
        404 => VaultError::SecretNotFound(message),
        429 => VaultError::NetworkError(message),
        500..=599 => VaultError::NetworkError(message),
        _ => VaultError::NetworkError(message),
    }
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    auth: Option<AuthInfo>,
}

#[derive(Deserialize)]
pub(crate) struct AuthInfo {
    client_token: String,
    #[serde(default)]
    accessor: String,
    #[serde(default)]
    lease_duration: u64,
    #[serde(default)]
    pub(crate) renewable: bool,
}

impl AuthInfo {
    pub(crate) fn into_credential(self, renewable: bool) -> Credential {
        let mut data = Map::new();
        data.insert(CLIENT_TOKEN_KEY.to_string(), Value::String(self.client_token));
        data.insert(ACCESSOR_KEY.to_string(), Value::String(self.accessor.clone()));

        Credential::builder()
            .data(data)
            .lease_id(self.accessor)
            .lease_duration(Duration::from_secs(self.lease_duration))
            .renewable(renewable)
            .build()
    }
}

impl std::fmt::Debug for AuthInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthInfo")
            .field("client_token", &"***")
            .field("accessor", &self.accessor)
            .field("lease_duration", &self.lease_duration)
            .field("renewable", &self.renewable)
            .finish()
    }
}
