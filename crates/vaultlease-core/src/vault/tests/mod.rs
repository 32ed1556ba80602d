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

use crate::vault::{
    Credential, MemoryVault, SecretFetcher, SecretPath, TransitCipher, VaultError, ciphertext_from, decode_plaintext,
    join_segments,
};
use rstest::rstest;
use serde_json::{Map, Value, json};
use std::time::Duration;

fn data(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("Expected JSON object, got {:?}", other),
    }
}

#[test]
fn test_get_str_returns_string_field() {
    let credential = Credential::static_secret(data(json!({"username": "app", "password": "s3cret"})));

    assert_eq!(credential.get_str("username").unwrap(), "app");
    assert_eq!(credential.get_str("password").unwrap(), "s3cret");
}

#[test]
fn test_get_str_missing_field_is_decode_error() {
    let credential = Credential::static_secret(Map::new());

    match credential.get_str("username") {
        Err(VaultError::DecodeError(msg)) => assert!(msg.contains("username")),
        other => panic!("Expected DecodeError, got {:?}", other),
    }
}

#[test]
fn test_get_str_non_string_field_is_decode_error() {
    let credential = Credential::static_secret(data(json!({"ciphertext": 1})));

    match ciphertext_from(&credential) {
        Err(VaultError::DecodeError(msg)) => assert!(msg.contains("number")),
        other => panic!("Expected DecodeError, got {:?}", other),
    }
}

#[test]
fn test_debug_redacts_secret_values() {
    let credential = Credential::builder()
        .data(data(json!({"password": "hunter2"})))
        .lease_id("database/creds/app/abc")
        .lease_duration(Duration::from_secs(60))
        .renewable(true)
        .build();

    let rendered = format!("{:?}", credential);
    assert!(!rendered.contains("hunter2"));
    assert!(rendered.contains("password"));
    assert!(rendered.contains("database/creds/app/abc"));
}

#[rstest]
#[case(true, 60, true)]
#[case(true, 0, false)]
#[case(false, 60, false)]
#[case(false, 0, false)]
fn test_is_renewable(#[case] renewable: bool, #[case] lease_secs: u64, #[case] expected: bool) {
    let credential = Credential::builder()
        .lease_duration(Duration::from_secs(lease_secs))
        .renewable(renewable)
        .build();

    assert_eq!(credential.is_renewable(), expected);
}

#[rstest]
#[case(SecretPath::new("role"), "role")]
#[case(SecretPath::builder().name("role").prefix("database/creds").build(), "database/creds/role")]
#[case(SecretPath::builder().name("app").mount("/secret/").prefix("team").build(), "secret/team/app")]
#[case(SecretPath::builder().name("app").prefix("").build(), "app")]
fn test_logical_path(#[case] path: SecretPath, #[case] expected: &str) {
    assert_eq!(path.logical_path(), expected);
}

#[test]
fn test_version_zero_means_latest() {
    let path = SecretPath::builder().name("app").version(0).build();
    assert_eq!(path.version(), None);

    let path = SecretPath::builder().name("app").version(3).build();
    assert_eq!(path.version(), Some(3));
    assert_eq!(path.to_string(), "app@v3");
}

#[test]
fn test_join_segments_skips_empty() {
    assert_eq!(join_segments([Some("a/"), None, Some(""), Some("/b")]), "a/b");
}

#[test]
fn test_decode_plaintext_rejects_invalid_base64() {
    match decode_plaintext("not base64!") {
        Err(VaultError::DecodeError(_)) => {}
        other => panic!("Expected DecodeError, got {:?}", other),
    }
}

#[tokio::test]
async fn test_memory_vault_fetch_not_found() {
    let vault = MemoryVault::new();
    let path = SecretPath::builder().name("role").prefix("database/creds").build();

    let result = vault.fetch(&path).await;
    assert!(matches!(result, Err(VaultError::SecretNotFound(_))));

    let result = vault.fetch_kv2(&path).await;
    assert!(matches!(result, Err(VaultError::SecretNotFound(_))));
}

#[tokio::test]
async fn test_memory_vault_fetch_returns_stored_credential() {
    let vault = MemoryVault::new();
    let path = SecretPath::builder().name("role").prefix("database/creds").build();
    let credential = Credential::builder()
        .data(data(json!({"username": "u1", "password": "p1"})))
        .lease_id("lease-1")
        .lease_duration(Duration::from_secs(30))
        .renewable(true)
        .build();

    vault.insert(&path, credential.clone()).unwrap();

    assert_eq!(vault.fetch(&path).await.unwrap(), credential);
}

#[tokio::test]
async fn test_memory_vault_kv2_versions() {
    let vault = MemoryVault::new();
    let path = SecretPath::new("app");

    assert_eq!(vault.put_kv2(&path, data(json!({"key": "one"}))).unwrap(), 1);
    assert_eq!(vault.put_kv2(&path, data(json!({"key": "two"}))).unwrap(), 2);

    let latest = vault.fetch_kv2(&path).await.unwrap();
    assert_eq!(latest.get_str("key").unwrap(), "two");

    let first = vault
        .fetch_kv2(&SecretPath::builder().name("app").version(1).build())
        .await
        .unwrap();
    assert_eq!(first.get_str("key").unwrap(), "one");

    let missing = vault.fetch_kv2(&SecretPath::builder().name("app").version(9).build()).await;
    assert!(matches!(missing, Err(VaultError::SecretNotFound(_))));
}

#[rstest]
#[case(b"")]
#[case(b"hello world")]
#[case(&[0u8, 159, 146, 150, 255])]
#[tokio::test]
async fn test_memory_vault_transit_round_trip(#[case] plaintext: &[u8]) {
    let vault = MemoryVault::new();
    let key = SecretPath::new("orders");

    let response = vault.encrypt(&key, plaintext).await.unwrap();
    let ciphertext = ciphertext_from(&response).unwrap();
    let decrypted = vault.decrypt(&key, &ciphertext).await.unwrap();

    assert_eq!(decrypted, plaintext);
}
