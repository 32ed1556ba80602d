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

//! Background renewal of leased credentials.


use crate::swap::SwapError;
use crate::util::backoff::BackoffConfig;
use crate::util::clock::{Clock, default_clock};
use crate::vault::{Credential, VaultError};
use async_trait::async_trait;
use bon::Builder;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub const DEFAULT_WAKE_FRACTION: f64 = 2.0 / 3.0;
pub const DEFAULT_MIN_WAKE_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 5;
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(5);
/// Shortest retry delay when retries are squeezed into the remainder of a lease.
pub const MIN_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Callback invoked for every failed renewal attempt.
pub type ErrorCallback = Arc<dyn Fn(&RenewalError) + Send + Sync>;

#[derive(Debug, Error)]
pub enum RenewalError {
    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error(transparent)]
    Swap(#[from] SwapError),

    #[error("Renewal attempt failed: {0}")]
    Resource(String),

    #[error("Renewal of '{label}' failed {attempts} consecutive times, giving up: {last_error}")]
    Exhausted {
        label: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Renewal task failed: {0}")]
    TaskFailed(String),
}

impl RenewalError {
    /// Returns true for the terminal outcome of a renewal loop that ran out of retries.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, RenewalError::Exhausted { .. })
    }
}

/// Normal ways a renewal loop ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewalExit {
    /// The current credential has no renewable lease.
    NotRenewable,
    /// Shutdown was requested.
    Shutdown,
}

/// Produces the next credential and installs whatever depends on it.
///
/// Implementations own the atomicity of their side effects, typically through
/// [`HotSwappableResource::replace`](crate::swap::HotSwappableResource::replace).
#[async_trait]
pub trait LeaseRenewer: Send + Sync {
    async fn renew(&self) -> Result<Credential, RenewalError>;
}

#[async_trait]
impl<F, Fut> LeaseRenewer for F
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Credential, RenewalError>> + Send + 'static,
{
    async fn renew(&self) -> Result<Credential, RenewalError> {
        (self)().await
    }
}

/// Timing and retry policy of the renewal loop.
#[derive(Builder, Clone)]
pub struct RenewalConfig {
    /// Fraction of the lease duration to wait before renewing (defaults to 2/3)
    #[builder(default = DEFAULT_WAKE_FRACTION)]
    pub wake_fraction: f64,
    /// Lower bound for the wait before a renewal, capped at the lease duration (defaults to 1 second)
    #[builder(default = DEFAULT_MIN_WAKE_INTERVAL)]
    pub min_wake_interval: Duration,
    /// Consecutive failed attempts after which the loop gives up (defaults to 5)
    #[builder(default = DEFAULT_MAX_CONSECUTIVE_FAILURES)]
    pub max_consecutive_failures: u32,
    /// Delay before retrying a failed attempt (defaults to 5 seconds)
    #[builder(default = DEFAULT_RETRY_INTERVAL)]
    pub retry_interval: Duration,
    /// Growth of the retry delay across consecutive failures (defaults to a fixed delay)
    #[builder(default)]
    pub retry_backoff: BackoffConfig,
    /// Jitter applied to the wake interval (0.0-1.0, defaults to 0.0)
    #[builder(default)]
    pub renewal_jitter: f64,
    /// Optional callback invoked when a renewal attempt fails
    pub on_renewal_error: Option<ErrorCallback>,
    #[builder(default = default_clock())]
    pub clock: Arc<dyn Clock>,
}

impl Default for RenewalConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl std::fmt::Debug for RenewalConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenewalConfig")
            .field("wake_fraction", &self.wake_fraction)
            .field("min_wake_interval", &self.min_wake_interval)
            .field("max_consecutive_failures", &self.max_consecutive_failures)
            .field("retry_interval", &self.retry_interval)
            .field("retry_backoff", &self.retry_backoff)
            .field("renewal_jitter", &self.renewal_jitter)
            .field(
                "on_renewal_error",
                &self.on_renewal_error.as_ref().map(|_| "<callback>"),
            )
            .finish()
    }
}

/// Snapshot of a renewal loop's progress, published after every attempt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenewalStatus {
    pub lease_duration: Duration,
    pub consecutive_failures: u32,
    pub last_renewed: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub running: bool,
}

impl RenewalStatus {
    /// Returns true while the number of consecutive failures is below `threshold`.
    pub fn is_healthy(&self, threshold: u32) -> bool {
        self.consecutive_failures < threshold
    }
}

/// State owned by a single running loop.
struct RenewalState {
    credential: Credential,
    consecutive_failures: u32,
    lease_expires_at: Instant,
}

/// Renews a credential shortly before its lease expires, forever, until shut down or out of retries.
#[derive(Debug, Clone, Default)]
pub struct LeaseRenewalScheduler {
    config: RenewalConfig,
}

impl LeaseRenewalScheduler {
    pub fn new(config: RenewalConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RenewalConfig {
        &self.config
    }

    /// Runs the loop in a background task.
    pub fn start(
        &self,
        label: impl Into<String>,
        initial: Credential,
        renewer: Arc<dyn LeaseRenewer>,
    ) -> RenewalHandle {
        let label = label.into();
        let scheduler = self.clone();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (status_tx, status_rx) = watch::channel(RenewalStatus::default());

        let task = tokio::spawn(async move {
            scheduler
                .drive(&label, initial, renewer.as_ref(), shutdown_rx, &status_tx)
                .await
        });

        RenewalHandle {
            shutdown_tx,
            status_rx,
            task: Some(task),
        }
    }

    /// Runs the loop on the current task.
    ///
    /// Returns once the credential is no longer renewable or `shutdown` flips to true (or its sender is dropped).
    /// Shutdown is only observed while waiting, so an in-flight renewal always completes.
    /// Fails with [`RenewalError::Exhausted`] after `max_consecutive_failures` consecutive failed attempts.
    pub async fn run<R: LeaseRenewer + ?Sized>(
        &self,
        label: &str,
        initial: Credential,
        renewer: &R,
        shutdown: watch::Receiver<bool>,
    ) -> Result<RenewalExit, RenewalError> {
        let (status_tx, _status_rx) = watch::channel(RenewalStatus::default());
        self.drive(label, initial, renewer, shutdown, &status_tx).await
    }

    async fn drive<R: LeaseRenewer + ?Sized>(
        &self,
        label: &str,
        initial: Credential,
        renewer: &R,
        mut shutdown: watch::Receiver<bool>,
        status: &watch::Sender<RenewalStatus>,
    ) -> Result<RenewalExit, RenewalError> {
        let mut state = RenewalState {
            lease_expires_at: lease_deadline(initial.lease_duration()),
            credential: initial,
            consecutive_failures: 0,
        };
        status.send_modify(|s| {
            s.lease_duration = state.credential.lease_duration();
            s.running = true;
        });

        let exit = self.renewal_loop(label, &mut state, renewer, &mut shutdown, status).await;

        status.send_modify(|s| s.running = false);
        exit
    }

    async fn renewal_loop<R: LeaseRenewer + ?Sized>(
        &self,
        label: &str,
        state: &mut RenewalState,
        renewer: &R,
        shutdown: &mut watch::Receiver<bool>,
        status: &watch::Sender<RenewalStatus>,
    ) -> Result<RenewalExit, RenewalError> {
        loop {
            if !state.credential.is_renewable() {
                debug!("Lease for '{}' is not renewable, stopping renewal", label);
                return Ok(RenewalExit::NotRenewable);
            }

            let delay = if state.consecutive_failures == 0 {
                self.wake_interval(state.credential.lease_duration())
            } else {
                let remaining = state.lease_expires_at.saturating_duration_since(Instant::now());
                self.retry_delay(state.consecutive_failures, remaining)
            };

            debug!("Next renewal of '{}' in {:?}", label, delay);
            if wait_or_shutdown(delay, shutdown).await {
                info!("Renewal of '{}' stopped", label);
                return Ok(RenewalExit::Shutdown);
            }

            match renewer.renew().await {
                Ok(credential) => {
                    debug!(
                        "Renewed lease for '{}' (duration {:?})",
                        label,
                        credential.lease_duration()
                    );
                    state.consecutive_failures = 0;
                    state.lease_expires_at = lease_deadline(credential.lease_duration());
                    state.credential = credential;
                    let now = self.config.clock.now();
                    status.send_modify(|s| {
                        s.lease_duration = state.credential.lease_duration();
                        s.consecutive_failures = 0;
                        s.last_renewed = Some(now);
                        s.last_error = None;
                    });
                }
                Err(e) => {
                    state.consecutive_failures += 1;
                    warn!(
                        "Renewal of '{}' failed ({}/{}): {}",
                        label, state.consecutive_failures, self.config.max_consecutive_failures, e
                    );
                    if let Some(callback) = &self.config.on_renewal_error {
                        callback(&e);
                    }
                    status.send_modify(|s| {
                        s.consecutive_failures = state.consecutive_failures;
                        s.last_error = Some(e.to_string());
                    });

                    if state.consecutive_failures >= self.config.max_consecutive_failures {
                        error!(
                            "Renewal of '{}' failed {} times consecutively. Stopping renewal task.",
                            label, state.consecutive_failures
                        );
                        return Err(RenewalError::Exhausted {
                            label: label.to_string(),
                            attempts: state.consecutive_failures,
                            last_error: e.to_string(),
                        });
                    }
                }
            }
        }
    }

    /// Wait before renewing a lease of the given duration under this scheduler's policy.
    pub fn wake_interval(&self, lease_duration: Duration) -> Duration {
        Self::calculate_wake_interval(
            lease_duration,
            self.config.wake_fraction,
            self.config.min_wake_interval,
            self.config.renewal_jitter,
        )
    }

    /// Delay before the next attempt after `failures` consecutive failures.
    ///
    /// The configured retry interval is shortened so the attempts left before exhaustion all fit into
    /// `remaining_lease`, but never below [`MIN_RETRY_INTERVAL`].
    pub fn retry_delay(&self, failures: u32, remaining_lease: Duration) -> Duration {
        let delay = self.config.retry_backoff.delay(self.config.retry_interval, failures);
        let attempts_left = self.config.max_consecutive_failures.saturating_sub(failures).max(1);
        let budget = (remaining_lease / attempts_left).max(MIN_RETRY_INTERVAL);
        delay.min(budget)
    }

    /// Calculates the wait as `fraction` of the lease with optional jitter, never below `floor`
    /// and never beyond the lease itself.
    ///
    /// A non-finite `fraction` falls back to [`DEFAULT_WAKE_FRACTION`]. A non-finite `jitter` disables jitter,
    /// and larger values are capped at 1.0.
    pub fn calculate_wake_interval(lease_duration: Duration, fraction: f64, floor: Duration, jitter: f64) -> Duration {
        let fraction = if fraction.is_finite() {
            fraction.clamp(0.0, 1.0)
        } else {
            DEFAULT_WAKE_FRACTION
        };
        let base = lease_duration.mul_f64(fraction);

        let jittered = if jitter.is_finite() && jitter > 0.0 {
            let jitter = jitter.min(1.0);
            let factor = 1.0 + rand::rng().random_range(-jitter..jitter);
            base.mul_f64(factor.max(0.0))
        } else {
            base
        };

        jittered.max(floor.min(lease_duration)).min(lease_duration)
    }
}

/// Instant at which a lease granted now runs out.
fn lease_deadline(lease_duration: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(lease_duration)
        .unwrap_or_else(|| now + Duration::from_secs(60 * 60 * 24 * 365))
}

/// Sleeps for `duration`. Returns true if shutdown was requested first.
async fn wait_or_shutdown(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return true;
    }

    let sleep = tokio::time::sleep(duration);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => return false,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return true;
                }
            }
        }
    }
}

/// Handle for a renewal loop running in a background task.
///
/// Dropping the handle requests shutdown. A renewal that is already in flight still completes.
pub struct RenewalHandle {
    shutdown_tx: watch::Sender<bool>,
    status_rx: watch::Receiver<RenewalStatus>,
    task: Option<JoinHandle<Result<RenewalExit, RenewalError>>>,
}

impl RenewalHandle {
    /// Requests the loop to stop at its next wait.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub fn status(&self) -> RenewalStatus {
        self.status_rx.borrow().clone()
    }

    /// Returns true once [`wait`](Self::wait) has taken the outcome of the loop.
    pub fn is_consumed(&self) -> bool {
        self.task.is_none()
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(|task| task.is_finished())
    }

    /// Waits for the loop to end and returns how it ended.
    ///
    /// A fatal [`RenewalError::Exhausted`] is reported here exactly once; later calls fail with
    /// [`RenewalError::TaskFailed`].
    pub async fn wait(&mut self) -> Result<RenewalExit, RenewalError> {
        let task = self
            .task
            .take()
            .ok_or_else(|| RenewalError::TaskFailed("Renewal outcome already consumed".to_string()))?;

        task.await
            .map_err(|e| RenewalError::TaskFailed(e.to_string()))?
    }
}

impl Drop for RenewalHandle {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}
