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

use log::debug;
use std::time::Duration;

/// Backoff policy applied between renewal retries.
///
/// The delay for the n-th consecutive failure is `base * multiplier ^ min(n - 1, max_exponent)`,
/// so the first retry always waits exactly `base`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Growth factor per additional failure. `1` yields a fixed delay.
    pub multiplier: u32,
    /// Upper bound on the exponent so the delay cannot grow without limit.
    pub max_exponent: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::fixed()
    }
}

impl BackoffConfig {
    /// A constant delay between retries.
    pub const fn fixed() -> Self {
        Self {
            multiplier: 1,
            max_exponent: 0,
        }
    }

    /// Exponential growth, capped at `multiplier ^ max_exponent`.
    pub const fn exponential(multiplier: u32, max_exponent: u32) -> Self {
        Self {
            multiplier,
            max_exponent,
        }
    }

    /// Returns the delay to wait after `failure_count` consecutive failures.
    pub fn delay(&self, base: Duration, failure_count: u32) -> Duration {
        calculate_backoff_interval(base, failure_count, self)
    }
}

/// Calculates the retry delay for the given number of consecutive failures.
pub fn calculate_backoff_interval(base: Duration, failure_count: u32, config: &BackoffConfig) -> Duration {
    let exponent = failure_count.saturating_sub(1).min(config.max_exponent);
    let factor = config.multiplier.max(1).saturating_pow(exponent);

    if factor > 1 {
        debug!("Applying backoff factor {}x after {} failures", factor, failure_count);
    }

    base.saturating_mul(factor)
}
