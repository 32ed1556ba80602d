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

use crate::auth::{AppRoleAuth, CredentialProvider, KubernetesAuth, TokenAuth, UserPassAuth};
use bon::Builder;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use vaultlease_core::renewal::RenewalConfig;
use vaultlease_core::vault::VaultError;

pub const DEFAULT_KV2_MOUNT: &str = "secret";
pub const DEFAULT_TRANSIT_MOUNT: &str = "transit";
pub const DEFAULT_USERPASS_MOUNT: &str = "userpass";
pub const DEFAULT_APPROLE_MOUNT: &str = "approle";
pub const DEFAULT_KUBERNETES_MOUNT: &str = "kubernetes";
pub const DEFAULT_KUBERNETES_TOKEN_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";

pub const KUBERNETES_ROLE_ENV: &str = "KUBERNETES_ROLE";
pub const KUBERNETES_TOKEN_ENV: &str = "KUBERNETES_TOKEN";

pub(crate) const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub(crate) const DEFAULT_HEALTH_THRESHOLD: u32 = 3;

/// Where the Kubernetes service account JWT comes from.
#[derive(Clone, PartialEq, Eq)]
pub enum KubernetesJwtSource {
    /// The JWT itself
    Token(String),
    /// A file holding the JWT, re-read on every login
    File(PathBuf),
}

impl Default for KubernetesJwtSource {
    fn default() -> Self {
        KubernetesJwtSource::File(PathBuf::from(DEFAULT_KUBERNETES_TOKEN_PATH))
    }
}

impl std::fmt::Debug for KubernetesJwtSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KubernetesJwtSource::Token(_) => f.debug_tuple("Token").field(&"***").finish(),
            KubernetesJwtSource::File(path) => f.debug_tuple("File").field(path).finish(),
        }
    }
}

/// Login method used to obtain the client token.
///
/// `mount` overrides the auth method's default mount path.
#[derive(Clone)]
pub enum VaultAuthConfig {
    /// A pre-issued token. It is used as is and never renewed.
    Token { token: String },
    UserPass {
        username: String,
        password: String,
        mount: Option<String>,
    },
    AppRole {
        role_id: String,
        secret_id: String,
        mount: Option<String>,
    },
    Kubernetes {
        role: String,
        jwt_source: KubernetesJwtSource,
        mount: Option<String>,
    },
}

impl VaultAuthConfig {
    pub fn token(token: impl Into<String>) -> Self {
        VaultAuthConfig::Token { token: token.into() }
    }

    /// Kubernetes login configured from `KUBERNETES_ROLE` and, if set, `KUBERNETES_TOKEN`.
    ///
    /// Without `KUBERNETES_TOKEN` the JWT is read from the default service account token path.
    pub fn kubernetes_from_env() -> Result<Self, VaultError> {
        Self::kubernetes_from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn kubernetes_from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, VaultError> {
        let role = lookup(KUBERNETES_ROLE_ENV)
            .filter(|role| !role.trim().is_empty())
            .ok_or_else(|| {
                VaultError::ConfigurationError(format!("Environment variable {} is not set", KUBERNETES_ROLE_ENV))
            })?;

        let jwt_source = match lookup(KUBERNETES_TOKEN_ENV).filter(|token| !token.trim().is_empty()) {
            Some(token) => KubernetesJwtSource::Token(token),
            None => KubernetesJwtSource::default(),
        };

        Ok(VaultAuthConfig::Kubernetes {
            role,
            jwt_source,
            mount: None,
        })
    }

    /// Creates the provider for this login method, validating its inputs.
    pub fn provider(&self) -> Result<Arc<dyn CredentialProvider>, VaultError> {
        let provider: Arc<dyn CredentialProvider> = match self {
            VaultAuthConfig::Token { token } => Arc::new(TokenAuth::new(token.clone())?),
            VaultAuthConfig::UserPass {
                username,
                password,
                mount,
            } => Arc::new(UserPassAuth::new(username.clone(), password.clone())?.with_mount(mount.clone())),
            VaultAuthConfig::AppRole {
                role_id,
                secret_id,
                mount,
            } => Arc::new(AppRoleAuth::new(role_id.clone(), secret_id.clone())?.with_mount(mount.clone())),
            VaultAuthConfig::Kubernetes {
                role,
                jwt_source,
                mount,
            } => Arc::new(KubernetesAuth::new(role.clone(), jwt_source.clone())?.with_mount(mount.clone())),
        };
        Ok(provider)
    }
}

impl std::fmt::Debug for VaultAuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VaultAuthConfig::Token { .. } => f.debug_struct("Token").field("token", &"***").finish(),
            VaultAuthConfig::UserPass { username, mount, .. } => f
                .debug_struct("UserPass")
                .field("username", username)
                .field("password", &"***")
                .field("mount", mount)
                .finish(),
            VaultAuthConfig::AppRole { role_id, mount, .. } => f
                .debug_struct("AppRole")
                .field("role_id", role_id)
                .field("secret_id", &"***")
                .field("mount", mount)
                .finish(),
            VaultAuthConfig::Kubernetes {
                role,
                jwt_source,
                mount,
            } => f
                .debug_struct("Kubernetes")
                .field("role", role)
                .field("jwt_source", jwt_source)
                .field("mount", mount)
                .finish(),
        }
    }
}

/// Configuration for the Hashicorp Vault client.
#[derive(Builder, Clone, Debug)]
pub struct HashicorpVaultConfig {
    /// The Vault server URL (e.g., "https://vault.example.com:8200")
    #[builder(into)]
    pub vault_url: String,
    /// Login method for the client token
    pub auth_config: VaultAuthConfig,
    /// Default mount path of the KV v2 secrets engine (defaults to "secret")
    #[builder(into, default = DEFAULT_KV2_MOUNT.to_string())]
    pub kv2_mount: String,
    /// Default mount path of the Transit secrets engine (defaults to "transit")
    #[builder(into, default = DEFAULT_TRANSIT_MOUNT.to_string())]
    pub transit_mount: String,
    /// Optional Vault Enterprise namespace sent with every request
    #[builder(into)]
    pub namespace: Option<String>,
    /// HTTP request timeout for Vault operations (defaults to 10 seconds)
    #[builder(default = DEFAULT_REQUEST_TIMEOUT)]
    pub request_timeout: Duration,
    /// Number of consecutive renewal failures before the client is considered unhealthy (defaults to 3)
    #[builder(default = DEFAULT_HEALTH_THRESHOLD)]
    pub health_threshold: u32,
    /// Renewal policy for the client token
    #[builder(default)]
    pub renewal: RenewalConfig,
}
