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

//! Connection settings of a database whose credentials are leased from Vault.

use crate::DatabaseError;
use bon::Builder;
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::time::Duration;
use vaultlease_core::vault::SecretPath;

pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// URL schemes accepted by the connection factory.
pub const SUPPORTED_SCHEMES: &[&str] = &["postgres", "postgresql", "mysql"];

/// Where the database lives and where its credentials come from.
///
/// Only the address is configured here. Username and password are read from the leased credential at
/// `credentials` on every connect.
#[derive(Debug, Clone, PartialEq, Builder, Deserialize)]
pub struct DatabaseConfig {
    /// URL scheme selecting the driver, e.g. `postgres` or `mysql`
    #[builder(into)]
    pub scheme: String,
    #[builder(into)]
    pub host: String,
    pub port: u16,
    /// Database name
    #[builder(into)]
    pub name: String,
    /// Vault path issuing the database credentials, e.g. `database/creds/app`
    pub credentials: SecretPath,
    /// Extra connection-string query parameters such as `sslmode`
    #[serde(default)]
    #[builder(default)]
    pub options: BTreeMap<String, String>,
    /// Pool size of each generation of connections (defaults to 10)
    #[serde(default = "default_max_connections")]
    #[builder(default = DEFAULT_MAX_CONNECTIONS)]
    pub max_connections: u32,
    /// Time allowed for acquiring a connection (defaults to 5 seconds)
    #[serde(
        rename = "connect_timeout_seconds",
        default = "default_connect_timeout",
        deserialize_with = "seconds"
    )]
    #[builder(default = DEFAULT_CONNECT_TIMEOUT)]
    pub connect_timeout: Duration,
}

impl DatabaseConfig {
    pub fn validate(&self) -> Result<(), DatabaseError> {
        if !SUPPORTED_SCHEMES.contains(&self.scheme.as_str()) {
            return Err(DatabaseError::Configuration(format!(
                "Unsupported database scheme '{}', expected one of {:?}",
                self.scheme, SUPPORTED_SCHEMES
            )));
        }
        if self.host.trim().is_empty() {
            return Err(DatabaseError::Configuration("host must not be empty".to_string()));
        }
        if self.name.trim().is_empty() {
            return Err(DatabaseError::Configuration("name must not be empty".to_string()));
        }
        if self.credentials.name().trim().is_empty() {
            return Err(DatabaseError::Configuration("credentials path must not be empty".to_string()));
        }
        if self.max_connections == 0 {
            return Err(DatabaseError::Configuration("max_connections must be greater than 0".to_string()));
        }
        Ok(())
    }

    /// `host:port/name`, safe to log.
    pub fn address(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.name)
    }
}

fn default_max_connections() -> u32 {
    DEFAULT_MAX_CONNECTIONS
}

fn default_connect_timeout() -> Duration {
    DEFAULT_CONNECT_TIMEOUT
}

fn seconds<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_secs)
}
