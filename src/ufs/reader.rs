// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    io::SeekFrom,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use anyhow::Result;
use bytes::Bytes;
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt},
    sync::Mutex,
};
use tracing::warn;

use crate::{
    local_store::{LocalBlockStore, LocalBlockWriter},
    registry::block_info::UfsBlockMeta,
    transport::Channel,
    wire::ReadResponse,
};

/// Streams one block's bytes out of the backing UFS file, optionally
/// teeing them into a freshly allocated local-store temp block so the
/// block gets promoted once fully read (spec.md §4.5).
#[derive(Debug)]
pub struct UfsBlockReader {
    file: Mutex<File>,
    local_writer: Mutex<Option<Box<dyn LocalBlockWriter>>>,
    start_offset: u64,
    target_length: u64,
    delivered: AtomicU64,
    commit_pending: AtomicBool,
    closed: AtomicBool,
}

impl UfsBlockReader {
    /// Opens the UFS file and seeks to `meta.offset_in_ufs + offset`. When
    /// `!no_cache && offset == 0`, allocates a temp block sized
    /// `meta.length` in `store`; allocation failure degrades to
    /// pass-through rather than failing the read.
    pub async fn open(
        meta: UfsBlockMeta,
        offset: u64,
        no_cache: bool,
        store: Arc<dyn LocalBlockStore>,
    ) -> std::io::Result<Self> {
        let mut file = File::open(meta.ufs_path.as_ref()).await?;
        file.seek(SeekFrom::Start(meta.offset_in_ufs + offset)).await?;

        let local_writer = if !no_cache && offset == 0 {
            match store
                .allocate_temp_block(meta.session_id, meta.block_id, meta.length)
                .await
            {
                Ok(writer) => Some(writer),
                Err(err) => {
                    warn!(
                        session = %meta.session_id, block = %meta.block_id, error = %err,
                        "allocate_temp_block failed, degrading to pass-through"
                    );
                    None
                }
            }
        } else {
            None
        };

        Ok(Self {
            file: Mutex::new(file),
            local_writer: Mutex::new(local_writer),
            start_offset: offset,
            target_length: meta.length,
            delivered: AtomicU64::new(0),
            commit_pending: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    /// Absolute offset (from the start of the block) this reader will
    /// deliver next. `get_block_reader` uses this to tell whether a cached
    /// reader is actually positioned where a new request needs it, since
    /// the reader itself reads UFS sequentially and has no way to jump.
    pub fn pos(&self) -> u64 {
        self.start_offset + self.delivered.load(Ordering::SeqCst)
    }

    /// Reads up to `buf.len()` bytes from UFS, teeing them into the local
    /// writer (if still attached) before returning.
    pub async fn read(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = {
            let mut file = self.file.lock().await;
            file.read(buf).await?
        };
        if n > 0 {
            self.tee(&buf[..n]).await;
            let total = self.delivered.fetch_add(n as u64, Ordering::SeqCst) + n as u64;
            if total == self.target_length && self.local_writer.lock().await.is_some() {
                self.commit_pending.store(true, Ordering::SeqCst);
            }
        }
        Ok(n)
    }

    /// Streams `len` bytes to `channel` as `ReadResponse` frames of at
    /// most `chunk_size` bytes, followed by the zero-byte end-of-stream
    /// frame. Returns the number of bytes actually delivered, which may
    /// be short of `len` if UFS hit EOF first.
    pub async fn transfer_to(
        &self,
        channel: &dyn Channel,
        block_id: u64,
        len: u64,
        chunk_size: usize,
    ) -> Result<u64> {
        let mut remaining = len;
        let mut scratch = vec![0u8; chunk_size.max(1)];
        let mut total = 0u64;
        while remaining > 0 {
            let want = remaining.min(scratch.len() as u64) as usize;
            let n = self.read(&mut scratch[..want]).await?;
            if n == 0 {
                break;
            }
            channel
                .send_response(ReadResponse::success(block_id, Bytes::copy_from_slice(&scratch[..n])))
                .await?;
            remaining -= n as u64;
            total += n as u64;
        }
        channel.send_response(ReadResponse::end_of_stream(block_id)).await?;
        Ok(total)
    }

    async fn tee(&self, bytes: &[u8]) {
        let mut guard = self.local_writer.lock().await;
        if let Some(writer) = guard.as_ref() {
            if let Err(err) = writer.write(bytes).await {
                warn!(error = %err, "local writer failed, abandoning promotion for this block");
                *guard = None;
            }
        }
    }

    /// `true` once this reader delivered all `meta.length` bytes with an
    /// unbroken local writer attached; the registry commits the block on
    /// `cleanup` if set.
    pub fn is_commit_pending(&self) -> bool {
        self.commit_pending.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Closes the UFS handle and the local writer, if still attached,
    /// without committing it (the registry inspects `is_commit_pending`
    /// separately and, if set, calls `commit_block` itself).
    pub async fn close(&self) -> std::io::Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(writer) = self.local_writer.lock().await.as_ref() {
            if let Err(err) = writer.close().await {
                warn!(error = %err, "local writer close failed, abandoning promotion for this block");
                self.commit_pending.store(false, Ordering::SeqCst);
            }
        }
        Ok(())
    }
}
