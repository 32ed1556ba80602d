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

use super::{
    CIPHERTEXT_KEY, Credential, SecretFetcher, SecretPath, TransitCipher, VaultError, decode_plaintext,
    encode_plaintext,
};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::RwLock;

const MEMORY_CIPHERTEXT_PREFIX: &str = "memory:v1:";

/// In-memory secret backend for tests and local development.
///
/// Transit operations only wrap the payload; they provide no confidentiality.
#[derive(Default)]
pub struct MemoryVault {
    secrets: RwLock<HashMap<String, Credential>>,
    kv2: RwLock<HashMap<String, Vec<Map<String, Value>>>>,
}

impl MemoryVault {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a credential for generic reads at the path's logical location.
    pub fn insert(&self, path: &SecretPath, credential: Credential) -> Result<(), VaultError> {
        self.secrets
            .write()
            .map_err(|_| poisoned())?
            .insert(path.logical_path(), credential);
        Ok(())
    }

    /// Appends a new version of a key/value secret and returns its version number.
    pub fn put_kv2(&self, path: &SecretPath, data: Map<String, Value>) -> Result<u32, VaultError> {
        let mut kv2 = self.kv2.write().map_err(|_| poisoned())?;
        let versions = kv2.entry(path.logical_path()).or_default();
        versions.push(data);
        Ok(versions.len() as u32)
    }

    pub fn remove(&self, path: &SecretPath) -> Result<(), VaultError> {
        self.secrets.write().map_err(|_| poisoned())?.remove(&path.logical_path());
        self.kv2.write().map_err(|_| poisoned())?.remove(&path.logical_path());
        Ok(())
    }
}

#[async_trait]
impl SecretFetcher for MemoryVault {
    async fn fetch(&self, path: &SecretPath) -> Result<Credential, VaultError> {
        self.secrets
            .read()
            .map_err(|_| poisoned())?
            .get(&path.logical_path())
            .cloned()
            .ok_or_else(|| VaultError::SecretNotFound(path.to_string()))
    }

    async fn fetch_kv2(&self, path: &SecretPath) -> Result<Credential, VaultError> {
        let kv2 = self.kv2.read().map_err(|_| poisoned())?;
        let versions = kv2
            .get(&path.logical_path())
            .ok_or_else(|| VaultError::SecretNotFound(path.to_string()))?;

        let data = match path.version() {
            Some(version) => versions.get(version as usize - 1),
            None => versions.last(),
        };

        data.cloned()
            .map(Credential::static_secret)
            .ok_or_else(|| VaultError::SecretNotFound(path.to_string()))
    }
}

#[async_trait]
impl TransitCipher for MemoryVault {
    async fn encrypt(&self, _key: &SecretPath, plaintext: &[u8]) -> Result<Credential, VaultError> {
        let mut data = Map::new();
        data.insert(
            CIPHERTEXT_KEY.to_string(),
            Value::String(format!("{}{}", MEMORY_CIPHERTEXT_PREFIX, encode_plaintext(plaintext))),
        );
        Ok(Credential::static_secret(data))
    }

    async fn decrypt(&self, _key: &SecretPath, ciphertext: &str) -> Result<Vec<u8>, VaultError> {
        let encoded = ciphertext
            .strip_prefix(MEMORY_CIPHERTEXT_PREFIX)
            .ok_or_else(|| VaultError::InvalidData("Ciphertext was not produced by this vault".to_string()))?;
        decode_plaintext(encoded)
    }
}

fn poisoned() -> VaultError {
    VaultError::InvalidData("Memory vault lock poisoned".to_string())
}
