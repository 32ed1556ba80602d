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

//! Database pools whose credentials are leased from Vault and rotated without downtime.

pub mod config;
pub mod connection;
pub mod connector;


pub use config::DatabaseConfig;
pub use connection::{ConnectionFactory, SqlPool, SqlxConnectionFactory, connection_string};
pub use connector::{DatabaseConnector, ManagedDatabase};

use thiserror::Error;
use vaultlease_core::renewal::RenewalError;
use vaultlease_core::swap::SwapError;
use vaultlease_core::vault::VaultError;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Database configuration error: {0}")]
    Configuration(String),

    #[error("Failed to open database: {0}")]
    Open(String),

    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error(transparent)]
    Swap(#[from] SwapError),

    #[error(transparent)]
    Renewal(#[from] RenewalError),
}

impl From<DatabaseError> for RenewalError {
    fn from(error: DatabaseError) -> Self {
        match error {
            DatabaseError::Vault(e) => RenewalError::Vault(e),
            DatabaseError::Swap(e) => RenewalError::Swap(e),
            DatabaseError::Renewal(e) => e,
            other => RenewalError::Resource(other.to_string()),
        }
    }
}
