// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;

use crate::{
    error::UfsError,
    ufs::{reader::UfsBlockReader, writer::UfsBlockWriter},
};

/// Cluster-wide unique identifier of a logical block.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u64);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A client's lease identifier on the worker; opaque to the registry beyond
/// being a key.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Registry key: `(sessionId, blockId)`, equality/hash over both, per
/// spec.md §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccessKey {
    pub session: SessionId,
    pub block: BlockId,
}

impl AccessKey {
    pub fn new(session: SessionId, block: BlockId) -> Self {
        Self { session, block }
    }
}

/// Metadata describing one session's view of one block's UFS-backed bytes.
///
/// `commit_pending` starts `false` and is flipped to `true` by
/// [`UfsBlockReader`] once the block has been fully materialised into the
/// local temp area; the registry commits it to the in-memory tier on
/// cleanup if it observes the flag set.
#[derive(Debug, Clone)]
pub struct UfsBlockMeta {
    pub session_id: SessionId,
    pub block_id: BlockId,
    pub ufs_path: Arc<str>,
    pub offset_in_ufs: u64,
    pub length: u64,
    pub mount_id: u64,
    pub commit_pending: bool,
    pub no_cache: bool,
}

impl UfsBlockMeta {
    pub fn new(
        session_id: SessionId,
        block_id: BlockId,
        ufs_path: impl Into<Arc<str>>,
        offset_in_ufs: u64,
        length: u64,
        mount_id: u64,
        no_cache: bool,
    ) -> Self {
        Self {
            session_id,
            block_id,
            ufs_path: ufs_path.into(),
            offset_in_ufs,
            length,
            mount_id,
            commit_pending: false,
            no_cache,
        }
    }
}

/// Registry-owned entry wrapping one [`UfsBlockMeta`] plus at most one
/// active reader and at most one active writer.
///
/// The reader and writer slots are guarded independently (spec.md §4.4:
/// "`cleanup` on one key never blocks acquires on another") so `cleanup`
/// can close the reader without contending with a concurrent
/// `getBlockWriter` on the same entry. The registry assumes a well-behaved
/// client never opens two readers on the same `(session, block)`; if two
/// arrive anyway the last `set` wins (see
/// [`crate::registry::access::UfsBlockAccessRegistry::get_block_reader`]).
#[derive(Debug)]
pub struct BlockInfo {
    pub meta: AsyncMutex<UfsBlockMeta>,
    reader: AsyncMutex<Option<Arc<UfsBlockReader>>>,
    writer: AsyncMutex<Option<Arc<UfsBlockWriter>>>,
}

impl BlockInfo {
    pub fn new(meta: UfsBlockMeta) -> Self {
        Self {
            meta: AsyncMutex::new(meta),
            reader: AsyncMutex::new(None),
            writer: AsyncMutex::new(None),
        }
    }

    /// Returns the currently attached reader, if any (does not construct
    /// one).
    pub async fn current_reader(&self) -> Option<Arc<UfsBlockReader>> {
        self.reader.lock().await.clone()
    }

    /// Attaches a freshly constructed reader, replacing (and leaking,
    /// per spec.md §4.4) any reader a racing caller set concurrently.
    pub async fn set_reader(&self, reader: Arc<UfsBlockReader>) {
        *self.reader.lock().await = Some(reader);
    }

    pub async fn current_writer(&self) -> Option<Arc<UfsBlockWriter>> {
        self.writer.lock().await.clone()
    }

    pub async fn set_writer(&self, writer: Arc<UfsBlockWriter>) {
        *self.writer.lock().await = Some(writer);
    }

    /// Closes the reader and writer slots (if attached) and returns whether
    /// the meta's `commit_pending` flag is set afterwards. Idempotent:
    /// calling this after the slots are already empty is a no-op that
    /// still reports the (unchanged) `commit_pending` value.
    pub async fn cleanup(&self) -> Result<bool, UfsError> {
        let mut commit_pending = false;
        if let Some(reader) = self.reader.lock().await.take() {
            reader.close().await.map_err(UfsError::fatal_io)?;
            commit_pending = reader.is_commit_pending();
        }
        if let Some(writer) = self.writer.lock().await.take() {
            writer.close().await.map_err(UfsError::fatal_io)?;
        }
        if commit_pending {
            self.meta.lock().await.commit_pending = true;
        }
        Ok(commit_pending)
    }
}
