// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Quantified invariants and idempotence properties from spec.md §8 that
//! don't need a live stream to exercise: registry convergence, the
//! concurrency cap, and `cleanup`/`close` idempotence.

mod common;

use common::Harness;
use ufsio::registry::block_info::{BlockId, SessionId};

/// ∀ sequences of acquire/release on disjoint keys, registry state
/// converges to the empty state after matching releases.
#[tokio::test]
async fn acquire_release_on_disjoint_keys_converges_to_empty() {
    let harness = Harness::new(&[0u8; 16], 0).await;
    let mut keys = Vec::new();
    for s in 0..20u64 {
        for b in 0..3u64 {
            let session = SessionId(s);
            let block = BlockId(s * 10 + b);
            harness.acquire(session, block, 0, 16, true, 4);
            keys.push((session, block));
        }
    }
    assert_eq!(harness.registry.len(), keys.len());

    for (session, block) in keys {
        harness.registry.release_access(session, block);
    }
    assert!(harness.registry.is_empty(), "registry did not converge to empty after matching releases");
}

/// ∀ blocks b, `|sessionsByBlock[b]| <= MaxConcurrency(b)` at all times:
/// the `(max+1)`th concurrent acquire for the same block is rejected.
#[tokio::test]
async fn concurrency_cap_is_enforced_exactly() {
    let harness = Harness::new(&[0u8; 16], 0).await;
    let block = BlockId(1);
    let cap = 4u32;

    for s in 0..cap as u64 {
        harness.acquire(SessionId(s), block, 0, 16, true, cap);
    }
    assert_eq!(harness.registry.concurrency(block), cap as usize);

    let meta = ufsio::registry::block_info::UfsBlockMeta::new(SessionId(999), block, harness.path(), 0, 16, 1, true);
    let err = harness
        .registry
        .acquire_access(
            SessionId(999),
            block,
            meta,
            ufsio::registry::access::AcquireAccessOptions {
                max_ufs_read_concurrency: cap,
            },
        )
        .unwrap_err();
    assert!(matches!(err, ufsio::error::UfsError::AccessTokenUnavailable { .. }));

    // Releasing one makes room for exactly one more.
    harness.registry.release_access(SessionId(0), block);
    harness.acquire(SessionId(999), block, 0, 16, true, cap);
    assert_eq!(harness.registry.concurrency(block), cap as usize);
}

/// `cleanup(s, b)` applied twice returns `false` the second time; a session
/// cleanup releases everything the session held.
#[tokio::test]
async fn cleanup_session_releases_every_block_the_session_held() {
    let harness = Harness::new(&[1, 2, 3, 4], 0).await;
    let session = SessionId(42);
    for b in 0..5u64 {
        harness.acquire(session, BlockId(b), 0, 4, true, 1);
    }
    assert_eq!(harness.registry.len(), 5);

    harness.registry.cleanup_session(session).await;
    assert!(harness.registry.is_empty(), "cleanup_session must release every block the session held");

    assert!(!harness.registry.cleanup(session, BlockId(0)).await.unwrap());
}
