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

//! Turning a leased credential into an open connection pool.

use crate::DatabaseError;
use crate::config::DatabaseConfig;
use async_trait::async_trait;
use log::debug;
use sqlx::any::{AnyPoolOptions, install_default_drivers};
use sqlx::{AnyPool, Connection};
use url::Url;
use vaultlease_core::swap::ManagedResource;
use vaultlease_core::vault::Credential;

/// Credential field holding the database user.
pub const USERNAME_KEY: &str = "username";
/// Credential field holding the database password.
pub const PASSWORD_KEY: &str = "password";

/// Builds `{scheme}://{username}:{password}@{host}:{port}/{name}?{options}` from `config` and the
/// `username`/`password` fields of `credential`.
///
/// User and password are percent-encoded, so generated passwords may contain any character.
pub fn connection_string(config: &DatabaseConfig, credential: &Credential) -> Result<String, DatabaseError> {
    let username = credential.get_str(USERNAME_KEY)?;
    let password = credential.get_str(PASSWORD_KEY)?;

    let mut url = Url::parse(&format!("{}://{}:{}", config.scheme, config.host, config.port))
        .map_err(|e| DatabaseError::Configuration(format!("Invalid database address {}: {}", config.address(), e)))?;
    url.set_username(username)
        .map_err(|_| DatabaseError::Configuration(format!("Cannot set username for {}", config.address())))?;
    url.set_password(Some(password))
        .map_err(|_| DatabaseError::Configuration(format!("Cannot set password for {}", config.address())))?;
    url.set_path(&config.name);

    if !config.options.is_empty() {
        url.query_pairs_mut().extend_pairs(config.options.iter());
    }

    Ok(url.into())
}

/// Opens a new resource for a credential. The resource is not probed here.
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    type Resource: ManagedResource;

    async fn open(&self, config: &DatabaseConfig, credential: &Credential) -> Result<Self::Resource, DatabaseError>;
}

/// A sqlx pool bound to one credential.
#[derive(Debug, Clone)]
pub struct SqlPool {
    pool: AnyPool,
}

impl SqlPool {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }

    /// The underlying pool. Only valid while the guard it was reached through is held.
    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }
}

#[async_trait]
impl ManagedResource for SqlPool {
    type Error = sqlx::Error;

    async fn probe(&self) -> Result<(), sqlx::Error> {
        let mut connection = self.pool.acquire().await?;
        connection.ping().await
    }

    async fn close(&self) -> Result<(), sqlx::Error> {
        self.pool.close().await;
        Ok(())
    }

    fn is_usable(&self) -> bool {
        !self.pool.is_closed()
    }
}

/// Opens lazily connecting [`AnyPool`]s. Connections are established by the first probe.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlxConnectionFactory;

#[async_trait]
impl ConnectionFactory for SqlxConnectionFactory {
    type Resource = SqlPool;

    async fn open(&self, config: &DatabaseConfig, credential: &Credential) -> Result<SqlPool, DatabaseError> {
        install_default_drivers();
        let url = connection_string(config, credential)?;

        debug!(
            "Opening pool for {} (max_connections={}, connect_timeout={:?})",
            config.address(),
            config.max_connections,
            config.connect_timeout
        );

        let pool = AnyPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connect_timeout)
            .test_before_acquire(true)
            .connect_lazy(&url)
            .map_err(|e| DatabaseError::Open(format!("Failed to open pool for {}: {}", config.address(), e)))?;

        Ok(SqlPool::new(pool))
    }
}
