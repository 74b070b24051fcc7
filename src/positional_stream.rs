// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! C3: a block-scoped, seekable byte stream over a [`crate::packet_reader::PacketReader`].
//!
//! Mirrors a Java-style `InputStream` at the semantic level (`read()`
//! returns a byte-or-EOF sentinel in the original; here that's
//! `Option<u8>`) while staying idiomatic: `read` takes a single `&mut [u8]`
//! rather than a `(buf, off, len)` triple, since a slice already carries
//! its own bounds.

use std::{fmt::Debug, sync::atomic::{AtomicBool, Ordering}};

use bytes::Bytes;
use tokio::sync::Mutex as AsyncMutex;

use crate::{
    error::UfsError,
    packet_reader::PacketReader,
    transport::{BoxFuture, ChannelPool},
};

/// Builds a fresh [`PacketReader`] covering `[offset, length)` of the
/// stream's block. Injected so a stream can lazily (re)open its reader
/// after construction, a seek, or a skip, without knowing how channels are
/// sourced.
pub trait PacketReaderFactory: Debug + Send + Sync {
    fn open<'a>(&'a self, offset: u64) -> BoxFuture<'a, Result<PacketReader, UfsError>>;
}

/// [`PacketReaderFactory`] backed by a [`ChannelPool`]: each `open` call
/// checks out an arbitrary idle channel and starts a new `ReadRequest` on
/// it for the remaining bytes.
#[derive(Debug)]
pub struct ChannelPoolReaderFactory {
    pool: std::sync::Arc<ChannelPool>,
    block_id: u64,
    length: u64,
    lock_id: Option<i64>,
    session_id: Option<i64>,
    high_water: usize,
    low_water: usize,
}

impl ChannelPoolReaderFactory {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: std::sync::Arc<ChannelPool>,
        block_id: u64,
        length: u64,
        lock_id: Option<i64>,
        session_id: Option<i64>,
        high_water: usize,
        low_water: usize,
    ) -> Self {
        Self {
            pool,
            block_id,
            length,
            lock_id,
            session_id,
            high_water,
            low_water,
        }
    }
}

impl PacketReaderFactory for ChannelPoolReaderFactory {
    fn open<'a>(&'a self, offset: u64) -> BoxFuture<'a, Result<PacketReader, UfsError>> {
        Box::pin(async move {
            let (id, channel) = self
                .pool
                .checkout_any()
                .ok_or_else(|| UfsError::fatal_io(std::io::Error::other("no idle channel available in pool")))?;
            let remaining = self.length.saturating_sub(offset);
            Ok(PacketReader::new(
                channel,
                self.block_id,
                offset,
                remaining,
                self.lock_id,
                self.session_id,
                self.high_water,
                self.low_water,
                Some((self.pool.clone(), id)),
            ))
        })
    }
}

struct CurrentPacket {
    reader: PacketReader,
    buf: Bytes,
}

struct State {
    pos: u64,
    current: Option<CurrentPacket>,
    eof: bool,
}

/// Seekable byte stream over one block, constructing packet readers on
/// demand (spec.md §4.3).
pub struct PositionalInputStream {
    length: u64,
    factory: std::sync::Arc<dyn PacketReaderFactory>,
    state: AsyncMutex<State>,
    touched: AtomicBool,
    closed: AtomicBool,
}

impl PositionalInputStream {
    pub fn new(length: u64, factory: std::sync::Arc<dyn PacketReaderFactory>) -> Self {
        Self {
            length,
            factory,
            state: AsyncMutex::new(State {
                pos: 0,
                current: None,
                eof: length == 0,
            }),
            touched: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// Reads the next byte, or `None` at end-of-stream.
    pub async fn read_byte(&self) -> Result<Option<u8>, UfsError> {
        self.ensure_open()?;
        let mut state = self.state.lock().await;
        if !self.fill(&mut state).await? {
            return Ok(None);
        }
        let cur = state.current.as_mut().expect("fill() guarantees a current packet with bytes");
        let byte = cur.buf[0];
        cur.buf = cur.buf.slice(1..);
        state.pos += 1;
        drop(state);
        self.touched.store(true, Ordering::SeqCst);
        Ok(Some(byte))
    }

    /// Fills `buf` from the current packet, returning the number of bytes
    /// copied. `buf.is_empty()` is a no-op returning `0`. Never blocks for
    /// a second packet within one call: short reads are expected and
    /// normal.
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize, UfsError> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.ensure_open()?;
        let mut state = self.state.lock().await;
        if !self.fill(&mut state).await? {
            return Ok(0);
        }
        let cur = state.current.as_mut().expect("fill() guarantees a current packet with bytes");
        let n = buf.len().min(cur.buf.len());
        buf[..n].copy_from_slice(&cur.buf[..n]);
        cur.buf = cur.buf.slice(n..);
        state.pos += n as u64;
        drop(state);
        if n > 0 {
            self.touched.store(true, Ordering::SeqCst);
        }
        Ok(n)
    }

    /// Moves to absolute offset `p`. A no-op if `p == pos`. Tears down any
    /// current packet reader (signalling cancel if the stream wasn't
    /// naturally exhausted). `eof` clears only on a backward seek; a
    /// forward seek past the end is accepted and surfaces as EOF on the
    /// next read.
    pub async fn seek(&self, p: u64) -> Result<(), UfsError> {
        assert!(p <= self.length, "seek target {p} past block length {}", self.length);
        self.ensure_open()?;
        let mut state = self.state.lock().await;
        if state.pos == p {
            return Ok(());
        }
        if let Some(cur) = state.current.take() {
            cur.reader.close().await.map_err(close_err)?;
        }
        if p < state.pos {
            state.eof = false;
        }
        state.pos = p;
        Ok(())
    }

    /// Advances by `min(remaining(), max(n, 0))` bytes without fetching
    /// their contents, tearing down any current packet reader the same
    /// way a forward `seek` would.
    pub async fn skip(&self, n: i64) -> Result<u64, UfsError> {
        self.ensure_open()?;
        let mut state = self.state.lock().await;
        let remaining = if state.eof { 0 } else { self.length - state.pos };
        let amount = (n.max(0) as u64).min(remaining);
        if amount > 0 {
            if let Some(cur) = state.current.take() {
                cur.reader.close().await.map_err(close_err)?;
            }
            state.pos += amount;
        }
        Ok(amount)
    }

    pub async fn remaining(&self) -> u64 {
        let state = self.state.lock().await;
        if state.eof { 0 } else { self.length - state.pos }
    }

    pub async fn pos(&self) -> u64 {
        self.state.lock().await.pos
    }

    /// Set on the first successful byte delivery; lets the enclosing
    /// file-level stream decide whether this block counts as "accessed"
    /// for cache accounting (spec.md §9's `BlockIsRead` bit).
    pub fn is_touched(&self) -> bool {
        self.touched.load(Ordering::SeqCst)
    }

    /// Idempotent. Closes the current packet reader, if any.
    pub async fn close(&self) -> anyhow::Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut state = self.state.lock().await;
        if let Some(cur) = state.current.take() {
            cur.reader.close().await?;
        }
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), UfsError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(UfsError::Closed);
        }
        Ok(())
    }

    /// Ensures `state.current` holds a packet with at least one unread
    /// byte, opening a reader and/or pulling the next packet as needed.
    /// Returns `false` at end-of-stream.
    async fn fill(&self, state: &mut State) -> Result<bool, UfsError> {
        if state.eof {
            return Ok(false);
        }
        if state.current.is_none() {
            if state.pos >= self.length {
                state.eof = true;
                return Ok(false);
            }
            let reader = self.factory.open(state.pos).await?;
            state.current = Some(CurrentPacket { reader, buf: Bytes::new() });
        }
        loop {
            let has_bytes = state.current.as_ref().is_some_and(|c| !c.buf.is_empty());
            if has_bytes {
                return Ok(true);
            }
            let reader = &state.current.as_ref().expect("current set above").reader;
            match reader.read_packet().await? {
                Some(bytes) => {
                    state.current.as_mut().expect("current set above").buf = bytes;
                }
                None => {
                    let cur = state.current.take().expect("current set above");
                    let _ = cur.reader.close().await;
                    state.eof = true;
                    return Ok(false);
                }
            }
        }
    }
}

fn close_err(err: anyhow::Error) -> UfsError {
    UfsError::fatal_io(std::io::Error::other(err.to_string()))
}
