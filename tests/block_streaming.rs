// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Concrete scenarios 1-4 from spec.md §8, driven end to end through a
//! worker task, a registry, and a [`PositionalInputStream`].

mod common;

use std::sync::Arc;

use common::{CHUNK, HIGH_WATER, LOW_WATER, Harness, generator};
use ufsio::{
    positional_stream::{ChannelPoolReaderFactory, PositionalInputStream},
    registry::block_info::{BlockId, SessionId},
};

fn stream_for(harness: &Harness, session: SessionId, block: BlockId, length: u64) -> PositionalInputStream {
    let factory = Arc::new(ChannelPoolReaderFactory::new(
        harness.pool.clone(),
        block.0,
        length,
        None,
        Some(session.0 as i64),
        HIGH_WATER,
        LOW_WATER,
    ));
    PositionalInputStream::new(length, factory)
}

async fn read_all(stream: &PositionalInputStream) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = [0u8; CHUNK];
    loop {
        let n = stream.read(&mut buf).await.unwrap();
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
    out
}

/// Scenario 1: a zero-length block with `NO_CACHE` is EOF on the first
/// read; its in-memory percentage is vacuously 100 (nothing to promote).
#[tokio::test]
async fn empty_block_is_eof_immediately() {
    let harness = Harness::new(&[], 1).await;
    let session = SessionId(1);
    let block = BlockId(1);
    harness.acquire(session, block, 0, 0, true, 2);

    let stream = stream_for(&harness, session, block, 0);
    assert_eq!(stream.read_byte().await.unwrap(), None);
    assert!(!stream.is_touched(), "a zero-length read never delivers a byte");
}

/// Scenario 2: for each `k`, read a fixture of `k` generator bytes first
/// with `NO_CACHE`, then twice with `CACHE_PROMOTE`; every read matches the
/// generator and the in-memory percentage reaches 100 after the first
/// cached read.
#[tokio::test]
async fn byte_sequence_round_trip_across_read_types() {
    for k in [0usize, 33, 66, 99, 132, 165, 198, 231] {
        let data = generator(k);
        let harness = Harness::new(&data, 3).await;
        let block = BlockId(42);

        // NO_CACHE
        let session = SessionId(1);
        harness.acquire(session, block, 0, k as u64, true, 3);
        let got = read_all(&stream_for(&harness, session, block, k as u64)).await;
        assert_eq!(got, data, "k={k} NO_CACHE mismatch");
        assert!(!harness.store.is_committed(block), "NO_CACHE must never promote");
        harness.registry.cleanup(session, block).await.unwrap();
        harness.registry.release_access(session, block);

        // CACHE_PROMOTE, twice
        for pass in 0..2 {
            let session = SessionId(2 + pass);
            harness.acquire(session, block, 0, k as u64, false, 3);
            let got = read_all(&stream_for(&harness, session, block, k as u64)).await;
            assert_eq!(got, data, "k={k} CACHE_PROMOTE pass {pass} mismatch");
            let commit_pending = harness.registry.cleanup(session, block).await.unwrap();
            harness.registry.release_access(session, block);
            if k > 0 {
                assert!(commit_pending, "a full-length cached read must set commit_pending");
                assert!(harness.store.is_committed(block), "k={k} pass {pass} never reached 100% in-memory");
            }
        }
    }
}

/// Scenario 3: with k=99, a sequence of seeks each land on the expected
/// byte.
#[tokio::test]
async fn seek_then_read_matches_target_offsets() {
    let data = generator(99);
    let harness = Harness::new(&data, 1).await;
    let session = SessionId(1);
    let block = BlockId(1);
    harness.acquire(session, block, 0, data.len() as u64, true, 1);
    let stream = stream_for(&harness, session, block, data.len() as u64);

    assert_eq!(stream.read_byte().await.unwrap(), Some(data[0]));
    stream.seek(33).await.unwrap();
    assert_eq!(stream.read_byte().await.unwrap(), Some(data[33]));
    stream.seek(49).await.unwrap();
    assert_eq!(stream.read_byte().await.unwrap(), Some(data[49]));
    stream.seek(24).await.unwrap();
    assert_eq!(stream.read_byte().await.unwrap(), Some(data[24]));
}

/// Scenario 4: with k=66, `skip` advances without delivering bytes.
#[tokio::test]
async fn skip_advances_without_delivering_bytes() {
    let data = generator(66);
    let harness = Harness::new(&data, 1).await;
    let session = SessionId(1);
    let block = BlockId(1);
    harness.acquire(session, block, 0, data.len() as u64, true, 1);
    let stream = stream_for(&harness, session, block, data.len() as u64);

    assert_eq!(stream.skip(33).await.unwrap(), 33);
    assert_eq!(stream.read_byte().await.unwrap(), Some(data[33]));
    assert_eq!(stream.skip(22).await.unwrap(), 22);
    assert_eq!(stream.read_byte().await.unwrap(), Some(data[55]));
}
