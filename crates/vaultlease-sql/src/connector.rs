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

//! Keeps a database pool valid across credential leases.

use crate::DatabaseError;
use crate::config::DatabaseConfig;
use crate::connection::{ConnectionFactory, SqlxConnectionFactory};
use async_trait::async_trait;
use log::{error, info, warn};
use std::sync::Arc;
use tokio::sync::RwLockReadGuard;
use vaultlease_core::renewal::{
    LeaseRenewalScheduler, LeaseRenewer, RenewalConfig, RenewalError, RenewalExit, RenewalHandle, RenewalStatus,
};
use vaultlease_core::swap::{HotSwappableResource, ManagedResource, SwapConfig, SwapError, probe_until_ready};
use vaultlease_core::vault::{Credential, SecretFetcher};

const DATABASE_LABEL: &str = "database_connection";

/// Connects to a database with leased credentials and renews them in the background.
///
/// Each renewal fetches a new credential, opens a pool for it and swaps that pool in once it
/// answers a ping. Readers of [`ManagedDatabase`] never see a half-open pool.
pub struct DatabaseConnector<F: ConnectionFactory = SqlxConnectionFactory> {
    config: DatabaseConfig,
    fetcher: Arc<dyn SecretFetcher>,
    factory: Arc<F>,
    swap_config: SwapConfig,
    renewal_config: RenewalConfig,
}

impl DatabaseConnector<SqlxConnectionFactory> {
    pub fn new(config: DatabaseConfig, fetcher: Arc<dyn SecretFetcher>) -> Self {
        Self::with_factory(config, fetcher, SqlxConnectionFactory)
    }
}

impl<F: ConnectionFactory> DatabaseConnector<F> {
    pub fn with_factory(config: DatabaseConfig, fetcher: Arc<dyn SecretFetcher>, factory: F) -> Self {
        Self {
            config,
            fetcher,
            factory: Arc::new(factory),
            swap_config: SwapConfig::default(),
            renewal_config: RenewalConfig::default(),
        }
    }

    pub fn swap_config(mut self, swap_config: SwapConfig) -> Self {
        self.swap_config = swap_config;
        self
    }

    pub fn renewal_config(mut self, renewal_config: RenewalConfig) -> Self {
        self.renewal_config = renewal_config;
        self
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Fetches the initial credential from Vault, then behaves like [`connect_with`](Self::connect_with).
    pub async fn connect(&self) -> Result<ManagedDatabase<F::Resource>, DatabaseError> {
        self.config.validate()?;
        let credential = self.fetcher.fetch(&self.config.credentials).await?;
        self.connect_with(credential).await
    }

    /// Opens the first pool from `initial` and starts renewing its lease.
    ///
    /// Fails if the pool does not become ready within the probe timeout. In that case no renewal
    /// is started and the pool is closed.
    pub async fn connect_with(&self, initial: Credential) -> Result<ManagedDatabase<F::Resource>, DatabaseError> {
        self.config.validate()?;

        let resource = self.factory.open(&self.config, &initial).await?;
        if let Err(e) = probe_until_ready(&resource, &self.swap_config).await {
            if let Err(close_err) = resource.close().await {
                warn!("Failed to close unready pool for {}: {}", self.config.address(), close_err);
            }
            return Err(e.into());
        }
        info!("Connected to database {}", self.config.address());

        let holder = Arc::new(HotSwappableResource::with_config(resource, self.swap_config.clone()));
        let renewer = DatabaseRenewer {
            config: self.config.clone(),
            fetcher: Arc::clone(&self.fetcher),
            factory: Arc::clone(&self.factory),
            holder: Arc::clone(&holder),
        };

        let scheduler = LeaseRenewalScheduler::new(self.renewal_config.clone());
        let renewal = scheduler.start(DATABASE_LABEL, initial, Arc::new(renewer));

        Ok(ManagedDatabase { holder, renewal })
    }
}

/// Renew step for one database: fetch, open, swap.
struct DatabaseRenewer<F: ConnectionFactory> {
    config: DatabaseConfig,
    fetcher: Arc<dyn SecretFetcher>,
    factory: Arc<F>,
    holder: Arc<HotSwappableResource<F::Resource>>,
}

#[async_trait]
impl<F: ConnectionFactory> LeaseRenewer for DatabaseRenewer<F> {
    async fn renew(&self) -> Result<Credential, RenewalError> {
        info!(
            "Database lease for {} is expiring, requesting new credentials from {}",
            self.config.address(),
            self.config.credentials
        );

        let credential = self.fetcher.fetch(&self.config.credentials).await?;
        let candidate = self.factory.open(&self.config, &credential).await?;
        self.holder.replace(candidate).await?;

        info!("Database connection to {} renewed", self.config.address());
        Ok(credential)
    }
}

/// A database resource that stays valid while its credentials rotate.
pub struct ManagedDatabase<R: ManagedResource> {
    holder: Arc<HotSwappableResource<R>>,
    renewal: RenewalHandle,
}

impl<R: ManagedResource> ManagedDatabase<R> {
    /// Returns a shared guard over the current pool.
    ///
    /// Renewal waits for outstanding guards before swapping, so release the guard after each operation.
    pub async fn read(&self) -> Result<RwLockReadGuard<'_, R>, SwapError> {
        self.holder.read().await
    }

    pub fn resource(&self) -> &Arc<HotSwappableResource<R>> {
        &self.holder
    }

    pub fn renewal_status(&self) -> RenewalStatus {
        self.renewal.status()
    }

    /// Waits until renewal ends.
    ///
    /// [`RenewalError::Exhausted`] means the credentials can no longer be renewed. The pool then keeps
    /// working until its lease runs out, and the caller decides whether to reconnect or exit.
    pub async fn wait(&mut self) -> Result<RenewalExit, RenewalError> {
        self.renewal.wait().await
    }

    /// Stops renewal and closes the current pool.
    ///
    /// A renewal failure that was never taken through [`wait`](Self::wait) is returned as
    /// [`DatabaseError::Renewal`] after the pool is closed.
    pub async fn close(mut self) -> Result<(), DatabaseError> {
        self.renewal.shutdown();
        let outcome = if self.renewal.is_consumed() {
            None
        } else {
            Some(self.renewal.wait().await)
        };

        self.holder.close().await?;

        match outcome {
            Some(Err(e)) => {
                error!("Database renewal failed before close: {}", e);
                Err(DatabaseError::Renewal(e))
            }
            Some(Ok(exit)) => {
                info!("Database renewal stopped: {:?}", exit);
                Ok(())
            }
            None => Ok(()),
        }
    }
}
