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

#[cfg(test)]
mod tests;

mod memory;

pub use memory::MemoryVault;

use async_trait::async_trait;
use base64::Engine;
use bon::Builder;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Response field holding the transit ciphertext token.
pub const CIPHERTEXT_KEY: &str = "ciphertext";
/// Response field holding the base64-encoded transit plaintext.
pub const PLAINTEXT_KEY: &str = "plaintext";

/// A secret payload together with its lease metadata.
///
/// Credentials are immutable. A renewal produces a new value that supersedes the previous one.
#[derive(Clone, PartialEq, Builder)]
pub struct Credential {
    /// Opaque key/value payload, e.g. `username` and `password` for database credentials
    #[builder(default)]
    data: Map<String, Value>,
    /// Lease identifier, empty when the credential cannot be renewed
    #[builder(into, default)]
    lease_id: String,
    /// Lease duration; zero marks a static credential
    #[builder(default = Duration::ZERO)]
    lease_duration: Duration,
    #[builder(default)]
    renewable: bool,
}

impl Credential {
    /// Creates a credential without a lease.
    pub fn static_secret(data: Map<String, Value>) -> Self {
        Self {
            data,
            lease_id: String::new(),
            lease_duration: Duration::ZERO,
            renewable: false,
        }
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Returns the string stored under `key`.
    ///
    /// Fails with [`VaultError::DecodeError`] when the field is absent or holds a non-string value.
    pub fn get_str(&self, key: &str) -> Result<&str, VaultError> {
        match self.data.get(key) {
            Some(Value::String(value)) => Ok(value),
            Some(other) => Err(VaultError::DecodeError(format!(
                "Field '{}' is not a string: found {}",
                key,
                json_kind(other)
            ))),
            None => Err(VaultError::DecodeError(format!("Field '{}' not present", key))),
        }
    }

    pub fn lease_id(&self) -> &str {
        &self.lease_id
    }

    pub fn lease_duration(&self) -> Duration {
        self.lease_duration
    }

    /// Returns true if the backend marked the lease as renewable and it has a positive duration.
    pub fn is_renewable(&self) -> bool {
        self.renewable && !self.lease_duration.is_zero()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("data", &self.data.keys().map(|k| (k.as_str(), "***")).collect::<Vec<_>>())
            .field("lease_id", &self.lease_id)
            .field("lease_duration", &self.lease_duration)
            .field("renewable", &self.renewable)
            .finish()
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Logical location of a secret in the backend.
///
/// `mount`, `prefix` and `version` override the defaults of the client that resolves the path.
#[derive(Debug, Clone, PartialEq, Eq, Builder, Serialize, Deserialize)]
pub struct SecretPath {
    #[builder(into)]
    name: String,
    #[builder(into)]
    mount: Option<String>,
    #[builder(into)]
    prefix: Option<String>,
    /// Version for versioned key/value reads; `0` or absent selects the latest version
    version: Option<u32>,
}

impl SecretPath {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mount: None,
            prefix: None,
            version: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mount(&self) -> Option<&str> {
        self.mount.as_deref()
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    /// Returns the requested version, mapping `0` to "latest".
    pub fn version(&self) -> Option<u32> {
        self.version.filter(|v| *v > 0)
    }

    /// Path used for generic reads: `{mount}/{prefix}/{name}` with absent segments skipped.
    pub fn logical_path(&self) -> String {
        join_segments([self.mount(), self.prefix(), Some(self.name())])
    }
}

impl fmt::Display for SecretPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.logical_path())?;
        if let Some(version) = self.version() {
            write!(f, "@v{}", version)?;
        }
        Ok(())
    }
}

/// Joins path segments with `/`, dropping empty ones and stray separators.
pub fn join_segments<'a>(segments: impl IntoIterator<Item = Option<&'a str>>) -> String {
    segments
        .into_iter()
        .flatten()
        .map(|s| s.trim_matches('/'))
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Retrieves credentials from the secret backend.
///
/// Each call issues exactly one backend request. Failures are returned to the caller without retrying.
#[async_trait]
pub trait SecretFetcher: Send + Sync {
    /// Reads the secret at the path's logical location, e.g. dynamic database credentials.
    async fn fetch(&self, path: &SecretPath) -> Result<Credential, VaultError>;

    /// Reads a versioned key/value secret.
    async fn fetch_kv2(&self, path: &SecretPath) -> Result<Credential, VaultError>;
}

/// Transit-style payload encryption. The path's name selects the key, its mount the engine.
#[async_trait]
pub trait TransitCipher: Send + Sync {
    /// Encrypts `plaintext` and returns the raw backend response.
    ///
    /// Use [`ciphertext_from`] to extract the ciphertext token.
    async fn encrypt(&self, key: &SecretPath, plaintext: &[u8]) -> Result<Credential, VaultError>;

    /// Decrypts a ciphertext token produced by [`encrypt`](Self::encrypt).
    async fn decrypt(&self, key: &SecretPath, ciphertext: &str) -> Result<Vec<u8>, VaultError>;
}

/// Extracts the ciphertext token from an encrypt response.
pub fn ciphertext_from(credential: &Credential) -> Result<String, VaultError> {
    credential.get_str(CIPHERTEXT_KEY).map(str::to_string)
}

/// Encodes plaintext the way the transit engine expects it.
pub fn encode_plaintext(plaintext: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(plaintext)
}

/// Decodes a transit plaintext field into the original bytes.
pub fn decode_plaintext(encoded: &str) -> Result<Vec<u8>, VaultError> {
    base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| VaultError::DecodeError(format!("Plaintext is not valid base64: {}", e)))
}

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("Secret not found: {0}")]
    SecretNotFound(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Authentication error: {0}")]
    AuthenticationError(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Client not initialized: {0}")]
    NotInitializedError(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Token file not found: {0}")]
    TokenFileNotFound(String),

    #[error("Token file read error: {0}")]
    TokenFileReadError(String),

    #[error("Invalid token format: {0}")]
    InvalidTokenFormat(String),

    #[error("Decode error: {0}")]
    DecodeError(String),
}

impl VaultError {
    pub fn is_retriable(&self) -> bool {
        matches!(self, VaultError::NetworkError(_) | VaultError::AuthenticationError(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, VaultError::SecretNotFound(_))
    }
}
