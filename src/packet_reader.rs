// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! C2: turns one channel's `ReadResponse` stream into a FIFO of packets a
//! single consumer drains with [`PacketReader::read_packet`], with
//! `HighWater`/`LowWater` flow control over the channel's `pause`/`resume`.
//!
//! The ingestion side (draining the channel and filling the queue) runs on
//! its own task, driven by [`crate::state_machine::pump_states`] — the same
//! split the teacher uses between a connection's read loop and whatever
//! consumes its PDUs.

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use tokio::{sync::Notify, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    error::UfsError,
    state_machine::{common::StateMachineCtx, pump_states::PumpCtx},
    transport::{Channel, ChannelPool},
    wire::CancelRequest,
};

/// Shared state between the ingestion pump and the consumer(s) of
/// [`PacketReader::read_packet`]. Kept on its own `Arc` so the pump task
/// can outlive a `close()` call just long enough to notice cancellation.
#[derive(Debug)]
pub struct PacketQueue {
    queue: Mutex<VecDeque<Bytes>>,
    len: AtomicUsize,
    notify: Notify,
    error: Mutex<Option<UfsError>>,
    finished: AtomicBool,
    eof: AtomicBool,
    high_water: usize,
    low_water: usize,
    channel: Arc<dyn Channel>,
}

impl PacketQueue {
    fn new(channel: Arc<dyn Channel>, high_water: usize, low_water: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            len: AtomicUsize::new(0),
            notify: Notify::new(),
            error: Mutex::new(None),
            finished: AtomicBool::new(false),
            eof: AtomicBool::new(false),
            high_water,
            low_water,
            channel,
        }
    }

    /// Enqueues one packet. An empty `bytes` is the end-of-stream marker.
    pub(crate) fn push(&self, bytes: Bytes) {
        if bytes.is_empty() {
            self.eof.store(true, Ordering::SeqCst);
        }
        self.queue.lock().unwrap().push_back(bytes);
        let new_len = self.len.fetch_add(1, Ordering::SeqCst) + 1;
        if new_len >= self.high_water {
            self.channel.pause();
        }
        self.notify.notify_waiters();
    }

    /// Records the pump's terminal error, if one hasn't already been
    /// recorded, and wakes every waiter.
    pub(crate) fn record_error(&self, err: UfsError) {
        let mut slot = self.error.lock().unwrap();
        if slot.is_none() {
            *slot = Some(err);
        }
        drop(slot);
        self.finished.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub(crate) fn mark_finished(&self) {
        self.finished.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub(crate) fn recorded_error(&self) -> Option<UfsError> {
        self.error.lock().unwrap().clone()
    }

    /// Waits until the pump has marked itself finished (naturally, via
    /// cancellation, or via a recorded error). Race-free the same way
    /// [`PacketReader::read_packet`] is: re-checks before and after
    /// registering for the next notification.
    pub(crate) async fn wait_finished(&self) {
        loop {
            if self.finished.load(Ordering::SeqCst) {
                return;
            }
            let notified = self.notify.notified();
            if self.finished.load(Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }

    /// Non-blocking: `None` means "nothing to report yet, keep waiting".
    fn try_take(&self) -> Option<Result<Option<Bytes>, UfsError>> {
        let mut q = self.queue.lock().unwrap();
        if let Some(packet) = q.pop_front() {
            drop(q);
            let new_len = self.len.fetch_sub(1, Ordering::SeqCst) - 1;
            if new_len <= self.low_water {
                self.channel.resume();
            }
            return Some(Ok((!packet.is_empty()).then_some(packet)));
        }
        drop(q);
        if let Some(err) = self.error.lock().unwrap().clone() {
            return Some(Err(err));
        }
        if self.finished.load(Ordering::SeqCst) {
            // Pump finished with no recorded error and nothing left in the
            // queue; treat as end-of-stream even if the explicit empty
            // marker never arrived (spontaneous-close already turns into
            // an error above, so this only fires on a clean pump exit).
            return Some(Ok(None));
        }
        None
    }
}

/// Bound on how long `close()` waits for the pump to drain the channel's
/// remaining in-flight frames after a cancel, so an unresponsive peer
/// can't hang a caller's `close()` forever.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Consumer-facing handle over one block's packet stream (spec.md §4.2).
#[derive(Debug)]
pub struct PacketReader {
    queue: Arc<PacketQueue>,
    channel: Arc<dyn Channel>,
    block_id: u64,
    delivered: AtomicU64,
    cancel: CancellationToken,
    pump: JoinHandle<()>,
    pool_release: Option<(Arc<ChannelPool>, u64)>,
    closed: AtomicBool,
}

impl PacketReader {
    /// Checks out `channel` (already done by the caller) and starts
    /// streaming `length` bytes of `block_id` from `offset`. `pool_release`
    /// is `Some((pool, id))` when the channel came from a
    /// [`ChannelPool`] and should be checked back in on `close`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        channel: Arc<dyn Channel>,
        block_id: u64,
        offset: u64,
        length: u64,
        lock_id: Option<i64>,
        session_id: Option<i64>,
        high_water: usize,
        low_water: usize,
        pool_release: Option<(Arc<ChannelPool>, u64)>,
    ) -> Self {
        let queue = Arc::new(PacketQueue::new(channel.clone(), high_water, low_water));
        let cancel = CancellationToken::new();

        let pump_queue = queue.clone();
        let pump_channel = channel.clone();
        let pump_cancel = cancel.clone();
        let pump = tokio::spawn(async move {
            let mut ctx = PumpCtx::new(pump_channel, block_id, offset, length, lock_id, session_id, pump_queue);
            if let Err(err) = ctx.execute(&pump_cancel).await {
                debug!(block_id, error = %err, "ingestion pump exited with error");
            }
        });

        Self {
            queue,
            channel,
            block_id,
            delivered: AtomicU64::new(offset),
            cancel,
            pump,
            pool_release,
            closed: AtomicBool::new(false),
        }
    }

    /// Returns the next packet, `Ok(None)` at end-of-stream, or the pump's
    /// recorded error. Race-free under concurrent wakeups: re-checks the
    /// queue both before and after registering for the next notification.
    pub async fn read_packet(&self) -> Result<Option<Bytes>, UfsError> {
        loop {
            if let Some(result) = self.queue.try_take() {
                return self.account(result);
            }
            let notified = self.queue.notify.notified();
            if let Some(result) = self.queue.try_take() {
                return self.account(result);
            }
            notified.await;
        }
    }

    fn account(&self, result: Result<Option<Bytes>, UfsError>) -> Result<Option<Bytes>, UfsError> {
        if let Ok(Some(ref bytes)) = result {
            self.delivered.fetch_add(bytes.len() as u64, Ordering::SeqCst);
        }
        result
    }

    /// Byte offset of the next packet this reader will deliver.
    pub fn pos(&self) -> u64 {
        self.delivered.load(Ordering::SeqCst)
    }

    /// Idempotent. If the stream was not naturally exhausted, emits a
    /// `CancelRequest`, then waits (bounded by [`DRAIN_TIMEOUT`]) for the
    /// ingestion pump to drain the channel's remaining in-flight frames —
    /// the server may have already enqueued the rest of the response
    /// before the cancel arrived — before releasing the channel back to
    /// the pool. A timed-out or failed drain leaves the channel in an
    /// unknown state, so it is torn down instead of being checked back in.
    pub async fn close(&self) -> anyhow::Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.cancel.cancel();

        let naturally_exhausted = self.queue.eof.load(Ordering::SeqCst) && self.queue.recorded_error().is_none();
        let mut channel_healthy = true;
        if !naturally_exhausted {
            if let Err(err) = self.channel.send_cancel(CancelRequest { block_id: self.block_id }).await {
                debug!(block_id = self.block_id, error = %err, "send_cancel failed on close, channel likely already dead");
                channel_healthy = false;
            } else if tokio::time::timeout(DRAIN_TIMEOUT, self.queue.wait_finished()).await.is_err() {
                debug!(block_id = self.block_id, "drain timed out waiting for the pump to reach EOF/cancelled/error");
                channel_healthy = false;
            }
            self.queue.queue.lock().unwrap().clear();
            self.queue.len.store(0, Ordering::SeqCst);
        }

        self.pump.abort();

        match (&self.pool_release, channel_healthy) {
            (Some((pool, id)), true) => pool.checkin(*id, self.channel.clone()),
            (Some((pool, id)), false) => {
                self.channel.close().await;
                pool.discard(*id);
            }
            (None, _) => self.channel.close().await,
        }
        Ok(())
    }
}

impl Drop for PacketReader {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.pump.abort();
    }
}
