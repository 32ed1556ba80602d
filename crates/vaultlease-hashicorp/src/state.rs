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

use bon::Builder;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Client token shared between the Vault client and its renewal task.
#[doc(hidden)]
#[derive(Builder)]
#[builder(on(String, into))]
pub struct VaultClientState {
    /// The current Vault token
    pub(crate) token: String,
    /// When the token was obtained by a login
    pub(crate) last_created: DateTime<Utc>,
    /// When the token was last renewed
    pub(crate) last_renewed: Option<DateTime<Utc>>,
    pub(crate) lease_duration: Duration,
}

impl VaultClientState {
    /// Returns a clone of the current Vault token
    pub fn token(&self) -> String {
        self.token.clone()
    }

    pub fn last_created(&self) -> DateTime<Utc> {
        self.last_created
    }

    pub fn last_renewed(&self) -> Option<DateTime<Utc>> {
        self.last_renewed
    }

    pub fn lease_duration(&self) -> Duration {
        self.lease_duration
    }

    /// Records a renewal of the current token.
    pub(crate) fn renewed(&mut self, lease_duration: Duration, now: DateTime<Utc>) {
        self.lease_duration = lease_duration;
        self.last_renewed = Some(now);
    }

    /// Installs a token obtained by a fresh login.
    pub(crate) fn replaced(&mut self, token: String, lease_duration: Duration, now: DateTime<Utc>) {
        self.token = token;
        self.lease_duration = lease_duration;
        self.last_created = now;
        self.last_renewed = None;
    }
}

impl std::fmt::Debug for VaultClientState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultClientState")
            .field("token", &"***")
            .field("last_created", &self.last_created)
            .field("last_renewed", &self.last_renewed)
            .field("lease_duration", &self.lease_duration)
            .finish()
    }
}
