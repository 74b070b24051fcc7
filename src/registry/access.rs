// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use tracing::warn;

use crate::{
    error::UfsError,
    local_store::LocalBlockStore,
    registry::block_info::{AccessKey, BlockId, BlockInfo, SessionId, UfsBlockMeta},
    ufs::reader::UfsBlockReader,
};

/// Per-call overrides accepted by [`UfsBlockAccessRegistry::acquire_access`].
#[derive(Debug, Clone, Copy)]
pub struct AcquireAccessOptions {
    /// `MaxConcurrency(block)` for this acquire. The registry does not
    /// memoise past values — a later acquire for the same block with a
    /// different cap is evaluated against the new value only.
    pub max_ufs_read_concurrency: u32,
}

/// Per-worker table of `(session, block)` tokens with a concurrency cap
/// per block, plus session-lifecycle cleanup.
///
/// Backed by three [`DashMap`]/[`DashSet`]s rather than the single mutex
/// spec.md §4.4 describes: sharded concurrent maps are this codebase's
/// idiom for exactly this kind of inverted index (see
/// `client::pool_sessions::Pool`), and the invariants spec.md lists —
/// the three maps stay a consistent inverted index, no I/O under a lock —
/// hold identically under per-shard locking. See `SPEC_FULL.md` §7a.
pub struct UfsBlockAccessRegistry {
    blocks: DashMap<AccessKey, Arc<BlockInfo>>,
    blocks_by_session: DashMap<SessionId, DashSet<BlockId>>,
    sessions_by_block: DashMap<BlockId, DashSet<SessionId>>,
    store: Arc<dyn LocalBlockStore>,
}

impl UfsBlockAccessRegistry {
    pub fn new(store: Arc<dyn LocalBlockStore>) -> Self {
        Self {
            blocks: DashMap::new(),
            blocks_by_session: DashMap::new(),
            sessions_by_block: DashMap::new(),
            store,
        }
    }

    /// Inserts a fresh entry for `(session, block)`, failing if one
    /// already exists or the per-block concurrency cap is reached.
    pub fn acquire_access(
        &self,
        session: SessionId,
        block: BlockId,
        meta: UfsBlockMeta,
        options: AcquireAccessOptions,
    ) -> Result<(), UfsError> {
        let key = AccessKey::new(session, block);
        if self.blocks.contains_key(&key) {
            return Err(UfsError::BlockAlreadyExists { session, block });
        }

        let sessions = self.sessions_by_block.entry(block).or_default();
        if sessions.len() as u32 >= options.max_ufs_read_concurrency {
            return Err(UfsError::AccessTokenUnavailable { block });
        }

        self.blocks.insert(key, Arc::new(BlockInfo::new(meta)));
        sessions.insert(session);
        drop(sessions);
        self.blocks_by_session.entry(session).or_default().insert(block);
        Ok(())
    }

    /// Returns the attached reader for `(session, block)`, constructing
    /// one (outside any lock) on first use.
    ///
    /// A `UfsBlockReader` reads its backing UFS file sequentially and has
    /// no way to jump to a new offset, so a cached reader is only reused
    /// when it is both unclosed *and* already positioned at `offset` —
    /// e.g. the next sequential packet request for an in-progress
    /// transfer. A `seek`/`skip` at the stream layer asks for a different
    /// offset on the next request, which must close the stale reader and
    /// open a fresh one there instead of silently running it dry.
    ///
    /// Concurrent callers for the same key may both construct a reader;
    /// per spec.md §4.4 this is the client's contract to avoid, not the
    /// registry's to prevent — the last `set_reader` wins and the
    /// loser's reader leaks until session cleanup.
    pub async fn get_block_reader(
        &self,
        session: SessionId,
        block: BlockId,
        offset: u64,
        no_cache: bool,
    ) -> Result<Arc<UfsBlockReader>, UfsError> {
        let key = AccessKey::new(session, block);
        let info = self
            .blocks
            .get(&key)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(UfsError::BlockDoesNotExist { session, block })?;

        if let Some(reader) = info.current_reader().await {
            if !reader.is_closed() && reader.pos() == offset {
                return Ok(reader);
            }
            reader.close().await.map_err(UfsError::fatal_io)?;
        }

        let meta = info.meta.lock().await.clone();
        let reader = Arc::new(
            UfsBlockReader::open(meta, offset, no_cache, Arc::clone(&self.store))
                .await
                .map_err(UfsError::fatal_io)?,
        );
        info.set_reader(Arc::clone(&reader)).await;
        Ok(reader)
    }

    /// Closes the reader/writer attached to `(session, block)` (outside
    /// any lock) and reports whether the block's bytes are fully
    /// materialised locally. Returns `false` on an absent key, and again
    /// on a second call for the same key (idempotent).
    pub async fn cleanup(&self, session: SessionId, block: BlockId) -> Result<bool, UfsError> {
        let key = AccessKey::new(session, block);
        let Some(info) = self.blocks.get(&key).map(|e| Arc::clone(e.value())) else {
            return Ok(false);
        };
        let commit_pending = info.cleanup().await?;

        if commit_pending {
            let meta = info.meta.lock().await.clone();
            if let Err(err) = self.store.commit_block(session, block).await {
                warn!(
                    %session, %block, error = %err,
                    "commit_block failed after a fully materialised read"
                );
            }
            drop(meta);
        }
        Ok(commit_pending)
    }

    /// Removes `(session, block)` from all three maps. Silent on absent
    /// keys.
    pub fn release_access(&self, session: SessionId, block: BlockId) {
        let key = AccessKey::new(session, block);
        self.blocks.remove(&key);
        if let Some(sessions) = self.blocks_by_session.get(&session) {
            sessions.remove(&block);
        }
        if let Some(set) = self.sessions_by_block.get(&block) {
            set.remove(&session);
        }
    }

    /// For each block the session held (snapshotted before iterating),
    /// calls `cleanup` then `release_access`, logging (not propagating)
    /// per-block errors so one bad block cannot strand the rest of the
    /// session's cleanup.
    pub async fn cleanup_session(&self, session: SessionId) {
        let blocks: Vec<BlockId> = self
            .blocks_by_session
            .get(&session)
            .map(|set| set.iter().map(|b| *b).collect())
            .unwrap_or_default();

        for block in blocks {
            if let Err(err) = self.cleanup(session, block).await {
                warn!(%session, %block, error = %err, "cleanup failed during session teardown");
            }
            self.release_access(session, block);
        }
    }

    /// Number of sessions currently holding `block` open. Exposed for
    /// tests asserting the concurrency cap invariant.
    pub fn concurrency(&self, block: BlockId) -> usize {
        self.sessions_by_block
            .get(&block)
            .map(|set| set.len())
            .unwrap_or(0)
    }

    /// Number of live `(session, block)` entries. Exposed for tests
    /// asserting registry state converges to empty after matching
    /// acquire/release pairs (spec.md §8).
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local_store::InMemoryBlockStore;

    fn meta(session: SessionId, block: BlockId) -> UfsBlockMeta {
        UfsBlockMeta::new(session, block, "/tmp/does-not-matter", 0, 0, 1, true)
    }

    fn registry() -> UfsBlockAccessRegistry {
        UfsBlockAccessRegistry::new(Arc::new(InMemoryBlockStore::default()))
    }

    #[test]
    fn acquire_twice_fails_with_block_already_exists() {
        let reg = registry();
        let s = SessionId(1);
        let b = BlockId(1);
        let opts = AcquireAccessOptions {
            max_ufs_read_concurrency: 2,
        };
        reg.acquire_access(s, b, meta(s, b), opts).unwrap();
        let err = reg.acquire_access(s, b, meta(s, b), opts).unwrap_err();
        assert!(matches!(err, UfsError::BlockAlreadyExists { .. }));
    }

    #[test]
    fn acquire_rejects_past_concurrency_cap() {
        let reg = registry();
        let b = BlockId(7);
        let opts = AcquireAccessOptions {
            max_ufs_read_concurrency: 1,
        };
        reg.acquire_access(SessionId(1), b, meta(SessionId(1), b), opts)
            .unwrap();
        let err = reg
            .acquire_access(SessionId(2), b, meta(SessionId(2), b), opts)
            .unwrap_err();
        assert!(matches!(err, UfsError::AccessTokenUnavailable { .. }));
    }

    #[test]
    fn release_then_acquire_is_clean() {
        let reg = registry();
        let s = SessionId(1);
        let b = BlockId(1);
        let opts = AcquireAccessOptions {
            max_ufs_read_concurrency: 1,
        };
        reg.acquire_access(s, b, meta(s, b), opts).unwrap();
        reg.release_access(s, b);
        assert_eq!(reg.concurrency(b), 0);
        reg.acquire_access(s, b, meta(s, b), opts).unwrap();
    }

    #[tokio::test]
    async fn cleanup_is_idempotent_on_absent_key() {
        let reg = registry();
        assert!(!reg.cleanup(SessionId(9), BlockId(9)).await.unwrap());
        assert!(!reg.cleanup(SessionId(9), BlockId(9)).await.unwrap());
    }
}
