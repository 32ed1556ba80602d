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

pub mod auth;
mod client;
pub mod config;
#[doc(hidden)]
pub mod renewal;
#[doc(hidden)]
pub mod state;

#[cfg(test)]
mod tests;

pub use auth::{AppRoleAuth, CredentialProvider, KubernetesAuth, TokenAuth, UserPassAuth, VaultEndpoint};
pub use client::HashicorpVaultClient;
pub use config::{HashicorpVaultConfig, HashicorpVaultConfigBuilder, KubernetesJwtSource, VaultAuthConfig};
