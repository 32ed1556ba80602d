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

use crate::swap::{HotSwappableResource, ManagedResource, SwapConfig, SwapError};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;

#[derive(Debug, Error)]
#[error("{0}")]
struct TestError(String);

/// Resource double that becomes ready after a fixed number of probe attempts.
struct TestResource {
    id: u32,
    ready_after: u32,
    usable: bool,
    fail_close: bool,
    probes: AtomicU32,
    closes: Arc<AtomicU32>,
    probe_started: Option<Arc<Notify>>,
    gate: Option<Arc<Notify>>,
}

impl TestResource {
    fn ready(id: u32) -> Self {
        Self::ready_after(id, 1)
    }

    fn ready_after(id: u32, attempts: u32) -> Self {
        Self {
            id,
            ready_after: attempts,
            usable: true,
            fail_close: false,
            probes: AtomicU32::new(0),
            closes: Arc::new(AtomicU32::new(0)),
            probe_started: None,
            gate: None,
        }
    }

    fn never_ready(id: u32) -> Self {
        Self::ready_after(id, u32::MAX)
    }

    fn close_counter(&self) -> Arc<AtomicU32> {
        Arc::clone(&self.closes)
    }
}

#[async_trait]
impl ManagedResource for TestResource {
    type Error = TestError;

    async fn probe(&self) -> Result<(), TestError> {
        if let Some(started) = &self.probe_started {
            started.notify_one();
        }
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        let attempt = self.probes.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt >= self.ready_after {
            Ok(())
        } else {
            Err(TestError(format!("resource {} not ready (attempt {})", self.id, attempt)))
        }
    }

    async fn close(&self) -> Result<(), TestError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if self.fail_close {
            Err(TestError("close failed".to_string()))
        } else {
            Ok(())
        }
    }

    fn is_usable(&self) -> bool {
        self.usable
    }
}

fn short_probe_config() -> SwapConfig {
    SwapConfig::builder()
        .probe_timeout(Duration::from_secs(2))
        .probe_interval(Duration::from_millis(500))
        .build()
}

async fn current_id(holder: &HotSwappableResource<TestResource>) -> u32 {
    holder.read().await.expect("holder should be open").id
}

#[test]
fn test_default_config() {
    let config = SwapConfig::default();
    assert_eq!(config.probe_timeout, Duration::from_secs(7));
    assert_eq!(config.probe_interval, Duration::from_millis(500));
}

#[tokio::test]
async fn test_read_returns_initial_resource() {
    let holder = HotSwappableResource::new(TestResource::ready(1));

    assert_eq!(current_id(&holder).await, 1);
    assert!(!holder.is_closed().await);
}

#[tokio::test]
async fn test_replace_rejects_unusable_candidate() {
    let initial = TestResource::ready(1);
    let initial_closes = initial.close_counter();
    let holder = HotSwappableResource::with_config(initial, short_probe_config());

    let mut candidate = TestResource::ready(2);
    candidate.usable = false;

    let result = holder.replace(candidate).await;

    match result {
        Err(SwapError::InvalidCandidate(_)) => {}
        other => panic!("Expected InvalidCandidate, got {:?}", other),
    }
    assert_eq!(current_id(&holder).await, 1);
    assert_eq!(initial_closes.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_replace_probe_timeout_keeps_previous_resource() {
    let initial = TestResource::ready(1);
    let initial_closes = initial.close_counter();
    let holder = HotSwappableResource::with_config(initial, short_probe_config());

    let candidate = TestResource::never_ready(2);
    let candidate_closes = candidate.close_counter();

    let result = holder.replace(candidate).await;

    match result {
        Err(SwapError::ProbeTimeout { timeout, last_error }) => {
            assert_eq!(timeout, Duration::from_secs(2));
            assert!(last_error.contains("resource 2 not ready"), "unexpected error: {}", last_error);
        }
        other => panic!("Expected ProbeTimeout, got {:?}", other),
    }

    // Previous resource stays current and open; the candidate is discarded
    assert_eq!(current_id(&holder).await, 1);
    assert_eq!(initial_closes.load(Ordering::SeqCst), 0);
    assert_eq!(candidate_closes.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_replace_succeeds_after_retried_probes() {
    let initial = TestResource::ready(1);
    let initial_closes = initial.close_counter();
    let holder = HotSwappableResource::with_config(initial, short_probe_config());

    let candidate = TestResource::ready_after(2, 3);
    let candidate_closes = candidate.close_counter();

    holder.replace(candidate).await.expect("replace should succeed");

    assert_eq!(initial_closes.load(Ordering::SeqCst), 1);
    assert_eq!(candidate_closes.load(Ordering::SeqCst), 0);
    for _ in 0..5 {
        assert_eq!(current_id(&holder).await, 2);
    }
    assert_eq!(holder.read().await.unwrap().probes.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_replace_adopts_candidate_when_previous_close_fails() {
    let mut initial = TestResource::ready(1);
    initial.fail_close = true;
    let initial_closes = initial.close_counter();
    let holder = HotSwappableResource::with_config(initial, short_probe_config());

    holder
        .replace(TestResource::ready(2))
        .await
        .expect("close failure must not block adoption");

    assert_eq!(initial_closes.load(Ordering::SeqCst), 1);
    assert_eq!(current_id(&holder).await, 2);
}

#[tokio::test]
async fn test_readers_observe_previous_resource_while_candidate_is_probed() {
    let holder = Arc::new(HotSwappableResource::with_config(
        TestResource::ready(1),
        SwapConfig::builder().probe_timeout(Duration::from_secs(30)).build(),
    ));

    let probe_started = Arc::new(Notify::new());
    let gate = Arc::new(Notify::new());
    let mut candidate = TestResource::ready(2);
    candidate.probe_started = Some(Arc::clone(&probe_started));
    candidate.gate = Some(Arc::clone(&gate));

    let replacing = {
        let holder = Arc::clone(&holder);
        tokio::spawn(async move { holder.replace(candidate).await })
    };

    probe_started.notified().await;

    let mut readers = Vec::new();
    for _ in 0..16 {
        let holder = Arc::clone(&holder);
        readers.push(tokio::spawn(async move { current_id(&holder).await }));
    }
    for reader in readers {
        assert_eq!(reader.await.unwrap(), 1);
    }

    gate.notify_one();
    replacing.await.unwrap().expect("replace should succeed");

    assert_eq!(current_id(&holder).await, 2);
}

#[tokio::test]
async fn test_concurrent_replacements_are_serialized() {
    let initial = TestResource::ready(1);
    let initial_closes = initial.close_counter();
    let holder = Arc::new(HotSwappableResource::with_config(initial, short_probe_config()));

    let first = TestResource::ready(2);
    let first_closes = first.close_counter();
    let second = TestResource::ready(3);
    let second_closes = second.close_counter();

    let (a, b) = tokio::join!(holder.replace(first), holder.replace(second));
    a.unwrap();
    b.unwrap();

    let current = current_id(&holder).await;
    assert!(current == 2 || current == 3);
    assert_eq!(initial_closes.load(Ordering::SeqCst), 1);

    // Whichever candidate lost was closed exactly once; the winner stays open
    let (winner, loser) = if current == 2 {
        (first_closes, second_closes)
    } else {
        (second_closes, first_closes)
    };
    assert_eq!(winner.load(Ordering::SeqCst), 0);
    assert_eq!(loser.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_close_terminates_holder() {
    let initial = TestResource::ready(1);
    let initial_closes = initial.close_counter();
    let holder = HotSwappableResource::with_config(initial, short_probe_config());

    holder.close().await.expect("close should succeed");
    holder.close().await.expect("second close is a no-op");

    assert_eq!(initial_closes.load(Ordering::SeqCst), 1);
    assert!(holder.is_closed().await);
    assert!(matches!(holder.read().await, Err(SwapError::Closed)));
}

#[tokio::test]
async fn test_replace_after_close_discards_candidate() {
    let holder = HotSwappableResource::with_config(TestResource::ready(1), short_probe_config());
    holder.close().await.unwrap();

    let candidate = TestResource::ready(2);
    let candidate_closes = candidate.close_counter();

    assert!(matches!(holder.replace(candidate).await, Err(SwapError::Closed)));
    assert_eq!(candidate_closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_close_reports_failure() {
    let mut initial = TestResource::ready(1);
    initial.fail_close = true;
    let holder = HotSwappableResource::new(initial);

    match holder.close().await {
        Err(SwapError::CloseFailed(msg)) => assert!(msg.contains("close failed")),
        other => panic!("Expected CloseFailed, got {:?}", other),
    }
}
