// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Shared end-to-end harness for the scenarios in spec.md §8: a real
//! tempfile-backed UFS fixture, an [`UfsBlockAccessRegistry`] over an
//! [`InMemoryBlockStore`], and a pool of [`LoopbackChannel`]s each served by
//! a worker task that answers `ReadRequest`s against the registry — the
//! same split `tests/integration_tests` used for the teacher crate, just
//! fed by an in-memory channel instead of a socket to `lio`.

#![allow(dead_code)]

use std::sync::Arc;

use dashmap::DashMap;
use ufsio::{
    local_store::InMemoryBlockStore,
    registry::{
        access::{AcquireAccessOptions, UfsBlockAccessRegistry},
        block_info::{BlockId, SessionId, UfsBlockMeta},
    },
    transport::{Channel, ChannelPool, LoopbackChannel},
    wire::Frame,
};

pub const HIGH_WATER: usize = 8;
pub const LOW_WATER: usize = 2;
pub const CHUNK: usize = 32;

/// The byte-sequence generator every scenario in spec.md §8 reads back:
/// byte `i` of the fixture equals `i mod 256`.
pub fn generator(n: usize) -> Vec<u8> {
    (0..n).map(|i| (i % 256) as u8).collect()
}

/// One worker-side test rig: a tempfile UFS fixture, a registry, and a pool
/// of loopback channels each backed by its own worker task.
pub struct Harness {
    pub registry: Arc<UfsBlockAccessRegistry>,
    pub store: Arc<InMemoryBlockStore>,
    pub pool: Arc<ChannelPool>,
    fixture: tempfile::NamedTempFile,
    no_cache_by_session: Arc<DashMap<u64, bool>>,
}

impl Harness {
    /// Writes `data` to a fresh tempfile and starts `channels` worker tasks
    /// against it, all sharing one registry/store.
    pub async fn new(data: &[u8], channels: usize) -> Self {
        let fixture = tempfile::NamedTempFile::new().expect("create UFS fixture");
        tokio::fs::write(fixture.path(), data).await.expect("write UFS fixture");

        let store = Arc::new(InMemoryBlockStore::default());
        let registry = Arc::new(UfsBlockAccessRegistry::new(store.clone()));
        let pool = Arc::new(ChannelPool::new());
        let no_cache_by_session = Arc::new(DashMap::new());

        for _ in 0..channels {
            let (worker, client) = LoopbackChannel::pair();
            let worker = Arc::new(worker);
            let client: Arc<dyn Channel> = Arc::new(client);
            pool.insert(client);
            spawn_worker(worker, registry.clone(), no_cache_by_session.clone());
        }

        Self {
            registry,
            store,
            pool,
            fixture,
            no_cache_by_session,
        }
    }

    pub fn path(&self) -> &str {
        self.fixture.path().to_str().expect("fixture path must be utf8")
    }

    /// Registers `(session, block)` against the fixture at `offset` for
    /// `length` bytes and records whether reads under this session should
    /// cache-promote (the worker task looks this up per `ReadRequest`).
    pub fn acquire(
        &self,
        session: SessionId,
        block: BlockId,
        offset: u64,
        length: u64,
        no_cache: bool,
        max_concurrency: u32,
    ) {
        let meta = UfsBlockMeta::new(session, block, self.path(), offset, length, 1, no_cache);
        self.registry
            .acquire_access(
                session,
                block,
                meta,
                AcquireAccessOptions {
                    max_ufs_read_concurrency: max_concurrency,
                },
            )
            .expect("acquire_access");
        self.no_cache_by_session.insert(session.0, no_cache);
    }
}

/// Serves `ReadRequest`s on `channel` against `registry` until the channel
/// closes. Each request's session/block come straight off the wire frame;
/// `no_cache` is looked up per session since the wire protocol itself
/// carries no such field (spec.md §6).
fn spawn_worker(
    channel: Arc<LoopbackChannel>,
    registry: Arc<UfsBlockAccessRegistry>,
    no_cache_by_session: Arc<DashMap<u64, bool>>,
) {
    tokio::spawn(async move {
        loop {
            let frame = match channel.recv_frame().await {
                Ok(Some(f)) => f,
                _ => return,
            };
            let Frame::ReadRequest(req) = frame else {
                continue;
            };
            let session = SessionId(req.session_id.unwrap_or_default() as u64);
            let block = BlockId(req.block_id);
            let no_cache = no_cache_by_session.get(&session.0).map(|v| *v).unwrap_or(false);

            let reader = match registry.get_block_reader(session, block, req.offset as u64, no_cache).await {
                Ok(r) => r,
                Err(_) => continue,
            };
            let _ = reader
                .transfer_to(channel.as_ref(), req.block_id, req.length as u64, CHUNK)
                .await;
        }
    });
}
