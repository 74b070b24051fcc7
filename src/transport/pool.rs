// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use dashmap::DashMap;

use crate::transport::channel::Channel;

/// Process-wide pool of channels, each checked out by at most one packet
/// reader at a time (spec.md §5: "each channel carries at most one active
/// packet reader at a time").
///
/// Grounded in `client::pool_sessions::Pool`'s shape, but — per the design
/// notes' call to avoid a global singleton — this is a plain struct
/// callers construct and share via `Arc`, not a lazily-initialized
/// process-global; tests build their own pool and seed it with
/// [`crate::transport::LoopbackChannel`] pairs instead of `TcpChannel`s.
#[derive(Debug, Default)]
pub struct ChannelPool {
    idle: DashMap<u64, Arc<dyn Channel>>,
    next_id: AtomicU64,
}

impl ChannelPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a freshly constructed channel and returns its pool id.
    pub fn insert(&self, channel: Arc<dyn Channel>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.idle.insert(id, channel);
        id
    }

    /// Removes and returns the channel for `id`, if idle.
    pub fn checkout(&self, id: u64) -> Option<Arc<dyn Channel>> {
        self.idle.remove(&id).map(|(_, c)| c)
    }

    /// Removes and returns an arbitrary idle channel and its pool id.
    /// Used when a caller just needs *a* channel (e.g. opening a fresh
    /// packet reader after a seek) rather than a specific one.
    pub fn checkout_any(&self) -> Option<(u64, Arc<dyn Channel>)> {
        let id = *self.idle.iter().next()?.key();
        self.idle.remove(&id)
    }

    /// Returns a channel to the idle set after a packet reader releases
    /// it (spec.md §4.2 `close`: "releases the channel back to the
    /// pool").
    pub fn checkin(&self, id: u64, channel: Arc<dyn Channel>) {
        self.idle.insert(id, channel);
    }

    /// Drops `id` from the pool without returning the channel (used when
    /// a channel closed itself after an I/O error rather than being
    /// cleanly released).
    pub fn discard(&self, id: u64) {
        self.idle.remove(&id);
    }

    pub fn len(&self) -> usize {
        self.idle.len()
    }

    pub fn is_empty(&self) -> bool {
        self.idle.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LoopbackChannel;

    #[test]
    fn checkout_removes_from_idle_set() {
        let pool = ChannelPool::new();
        let (a, _b) = LoopbackChannel::pair();
        let id = pool.insert(Arc::new(a));
        assert_eq!(pool.len(), 1);
        let channel = pool.checkout(id).expect("channel present");
        assert_eq!(pool.len(), 0);
        pool.checkin(id, channel);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn checkout_any_returns_none_on_an_empty_pool() {
        let pool = ChannelPool::new();
        assert!(pool.checkout_any().is_none());
    }

    #[test]
    fn checkout_any_drains_one_idle_channel() {
        let pool = ChannelPool::new();
        let (a, _) = LoopbackChannel::pair();
        let id = pool.insert(Arc::new(a));
        let (got_id, _channel) = pool.checkout_any().expect("one idle channel");
        assert_eq!(got_id, id);
        assert!(pool.is_empty());
    }
}
