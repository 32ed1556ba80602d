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

//! Holder for a live resource that can be replaced while readers keep using it.

#[cfg(test)]
mod tests;

use async_trait::async_trait;
use bon::Builder;
use log::{debug, info, warn};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{RwLock, RwLockReadGuard};

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(7);
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_millis(500);

/// A live object whose validity depends on a credential, e.g. a database connection pool.
#[async_trait]
pub trait ManagedResource: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Readiness check performed before the resource is adopted.
    async fn probe(&self) -> Result<(), Self::Error>;

    /// Releases the resource. It is never used again afterwards.
    async fn close(&self) -> Result<(), Self::Error>;

    /// Returns false if the resource can never become ready, e.g. it was already closed.
    fn is_usable(&self) -> bool {
        true
    }
}

/// Timing of the readiness probe run by [`HotSwappableResource::replace`].
#[derive(Debug, Clone, Builder)]
pub struct SwapConfig {
    /// Upper bound for probing a candidate, independent of any caller deadline (defaults to 7 seconds)
    #[builder(default = DEFAULT_PROBE_TIMEOUT)]
    pub probe_timeout: Duration,
    /// Pause between failed probe attempts (defaults to 500 milliseconds)
    #[builder(default = DEFAULT_PROBE_INTERVAL)]
    pub probe_interval: Duration,
}

impl Default for SwapConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[derive(Debug, Error)]
pub enum SwapError {
    #[error("Invalid candidate: {0}")]
    InvalidCandidate(String),

    #[error("Candidate not ready after {timeout:?}: {last_error}")]
    ProbeTimeout { timeout: Duration, last_error: String },

    #[error("Resource holder is closed")]
    Closed,

    #[error("Failed to close resource: {0}")]
    CloseFailed(String),
}

/// Owns exactly one current resource behind a read/write lock.
///
/// Readers take a shared guard via [`read`](Self::read). [`replace`](Self::replace) probes the candidate
/// before taking the exclusive lock, so readers only wait for the swap itself.
pub struct HotSwappableResource<R: ManagedResource> {
    current: RwLock<Option<R>>,
    config: SwapConfig,
}

impl<R: ManagedResource> HotSwappableResource<R> {
    pub fn new(resource: R) -> Self {
        Self::with_config(resource, SwapConfig::default())
    }

    pub fn with_config(resource: R, config: SwapConfig) -> Self {
        Self {
            current: RwLock::new(Some(resource)),
            config,
        }
    }

    pub fn config(&self) -> &SwapConfig {
        &self.config
    }

    /// Returns a shared guard over the current resource.
    ///
    /// The resource cannot be swapped out while the guard is held, so do not keep it beyond the
    /// scope of a single operation.
    pub async fn read(&self) -> Result<RwLockReadGuard<'_, R>, SwapError> {
        let guard = self.current.read().await;
        RwLockReadGuard::try_map(guard, |slot| slot.as_ref()).map_err(|_| SwapError::Closed)
    }

    /// Adopts `candidate` as the current resource once it passes the readiness probe.
    ///
    /// On failure the candidate is closed and the previous resource stays current.
    pub async fn replace(&self, candidate: R) -> Result<(), SwapError> {
        if !candidate.is_usable() {
            return Err(SwapError::InvalidCandidate(
                "Candidate resource is not usable".to_string(),
            ));
        }

        if let Err(e) = probe_until_ready(&candidate, &self.config).await {
            discard(candidate, "unready candidate").await;
            return Err(e);
        }

        let mut slot = self.current.write().await;
        let Some(previous) = slot.take() else {
            drop(slot);
            discard(candidate, "candidate for closed holder").await;
            return Err(SwapError::Closed);
        };
        discard(previous, "replaced resource").await;
        *slot = Some(candidate);
        drop(slot);

        info!("Resource replaced");
        Ok(())
    }

    /// Closes the current resource permanently. Subsequent reads fail with [`SwapError::Closed`].
    pub async fn close(&self) -> Result<(), SwapError> {
        let mut slot = self.current.write().await;
        match slot.take() {
            Some(resource) => resource
                .close()
                .await
                .map_err(|e| SwapError::CloseFailed(e.to_string())),
            None => Ok(()),
        }
    }

    pub async fn is_closed(&self) -> bool {
        self.current.read().await.is_none()
    }
}

/// Probes `candidate` every `probe_interval` until it succeeds or `probe_timeout` elapses.
pub async fn probe_until_ready<R: ManagedResource>(candidate: &R, config: &SwapConfig) -> Result<(), SwapError> {
    let mut last_error = None;
    let probing = async {
        loop {
            match candidate.probe().await {
                Ok(()) => return,
                Err(e) => {
                    debug!("Resource probe failed, retrying: {}", e);
                    last_error = Some(e.to_string());
                }
            }
            tokio::time::sleep(config.probe_interval).await;
        }
    };

    let outcome = tokio::time::timeout(config.probe_timeout, probing).await;
    match outcome {
        Ok(()) => Ok(()),
        Err(_) => Err(SwapError::ProbeTimeout {
            timeout: config.probe_timeout,
            last_error: last_error.unwrap_or_else(|| "probe did not complete".to_string()),
        }),
    }
}

async fn discard<R: ManagedResource>(resource: R, what: &str) {
    if let Err(e) = resource.close().await {
        warn!("Failed to close {}: {}", what, e);
    }
}
