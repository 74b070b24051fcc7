// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The in-memory block store lives outside the UFS subsystem (spec.md §1
//! names it an external collaborator); this module pins down only the
//! three operations the registry and UFS reader invoke on it, plus an
//! in-memory double good enough to drive tests without a real cache
//! worker behind it.

use std::{
    collections::HashMap,
    fmt::Debug,
    future::Future,
    pin::Pin,
    sync::Mutex,
};

use anyhow::{Result, anyhow};
use bytes::{Bytes, BytesMut};

use crate::registry::block_info::{BlockId, SessionId};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A handle returned by `allocate_temp_block`, written to as bytes arrive
/// from the UFS and discarded (not committed) on error.
pub trait LocalBlockWriter: Debug + Send + Sync {
    fn write<'a>(&'a self, buf: &'a [u8]) -> BoxFuture<'a, Result<()>>;

    /// Finalises the writer (e.g. flush to the store's own staging area)
    /// without committing it to the in-memory tier — that's a separate
    /// `LocalBlockStore::commit_block` call once the registry observes
    /// `commit_pending`. Must be called before `commit_block` can see a
    /// complete set of bytes.
    fn close<'a>(&'a self) -> BoxFuture<'a, Result<()>>;
}

/// External in-memory tier contract (spec.md §6): allocate a temp block
/// ahead of a promoting read, commit it once the read fully materialised
/// the block, or abort it if the owning session disappears first.
pub trait LocalBlockStore: Debug + Send + Sync {
    fn allocate_temp_block<'a>(
        &'a self,
        session: SessionId,
        block: BlockId,
        length: u64,
    ) -> BoxFuture<'a, Result<Box<dyn LocalBlockWriter>>>;

    fn commit_block<'a>(&'a self, session: SessionId, block: BlockId) -> BoxFuture<'a, Result<()>>;

    fn abort_block<'a>(&'a self, session: SessionId, block: BlockId) -> BoxFuture<'a, Result<()>>;
}

#[derive(Debug, Default)]
struct PendingBlock {
    bytes: BytesMut,
}

#[derive(Debug)]
struct InMemoryWriter {
    key: (SessionId, BlockId),
    pending: std::sync::Arc<Mutex<HashMap<(SessionId, BlockId), PendingBlock>>>,
}

impl LocalBlockWriter for InMemoryWriter {
    fn write<'a>(&'a self, buf: &'a [u8]) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut map = self.pending.lock().expect("pending lock poisoned");
            map.entry(self.key).or_default().bytes.extend_from_slice(buf);
            Ok(())
        })
    }

    /// Every `write` already lands directly in the pending map, so there
    /// is nothing left to flush.
    fn close<'a>(&'a self) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move { Ok(()) })
    }
}

/// Test double for [`LocalBlockStore`]: promotions land in a `HashMap`
/// keyed by `(session, block)` rather than a real cache tier.
#[derive(Debug, Default)]
pub struct InMemoryBlockStore {
    pending: std::sync::Arc<Mutex<HashMap<(SessionId, BlockId), PendingBlock>>>,
    committed: Mutex<HashMap<BlockId, Bytes>>,
}

impl InMemoryBlockStore {
    /// Bytes committed for `block`, if a read ever fully materialised and
    /// committed it.
    pub fn committed_bytes(&self, block: BlockId) -> Option<Bytes> {
        self.committed.lock().expect("committed lock poisoned").get(&block).cloned()
    }

    pub fn is_committed(&self, block: BlockId) -> bool {
        self.committed.lock().expect("committed lock poisoned").contains_key(&block)
    }
}

impl LocalBlockStore for InMemoryBlockStore {
    fn allocate_temp_block<'a>(
        &'a self,
        session: SessionId,
        block: BlockId,
        _length: u64,
    ) -> BoxFuture<'a, Result<Box<dyn LocalBlockWriter>>> {
        Box::pin(async move {
            self.pending
                .lock()
                .expect("pending lock poisoned")
                .insert((session, block), PendingBlock::default());
            Ok(Box::new(InMemoryWriter {
                key: (session, block),
                pending: self.pending.clone(),
            }) as Box<dyn LocalBlockWriter>)
        })
    }

    fn commit_block<'a>(&'a self, session: SessionId, block: BlockId) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let pending = self
                .pending
                .lock()
                .expect("pending lock poisoned")
                .remove(&(session, block))
                .ok_or_else(|| anyhow!("commit_block: no pending allocation for {session}/{block}"))?;
            self.committed
                .lock()
                .expect("committed lock poisoned")
                .insert(block, pending.bytes.freeze());
            Ok(())
        })
    }

    fn abort_block<'a>(&'a self, session: SessionId, block: BlockId) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.pending.lock().expect("pending lock poisoned").remove(&(session, block));
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn commit_exposes_the_bytes_written_through_the_writer() {
        let store = InMemoryBlockStore::default();
        let session = SessionId(1);
        let block = BlockId(1);
        let writer = store.allocate_temp_block(session, block, 5).await.unwrap();
        writer.write(b"hello").await.unwrap();
        store.commit_block(session, block).await.unwrap();
        assert_eq!(store.committed_bytes(block).unwrap(), Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn abort_discards_without_committing() {
        let store = InMemoryBlockStore::default();
        let session = SessionId(2);
        let block = BlockId(2);
        let writer = store.allocate_temp_block(session, block, 5).await.unwrap();
        writer.write(b"partial").await.unwrap();
        store.abort_block(session, block).await.unwrap();
        assert!(!store.is_committed(block));
        assert!(store.commit_block(session, block).await.is_err());
    }
}
