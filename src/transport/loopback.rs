// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! An in-memory [`Channel`] pair, so tests exercise `PacketReader` and
//! `PositionalInputStream` without a socket. Grounded in the dependency
//! injection the teacher uses for `Pool`/`ClientConnection` (construct,
//! don't reach for a process-wide singleton) and in the design notes'
//! explicit call for "a dependency-injected handle... so tests can supply
//! an in-memory loopback channel".

use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Result, anyhow};
use tokio::sync::{Mutex, mpsc};

use crate::{
    transport::channel::{BoxFuture, Channel},
    wire::{CancelRequest, Frame, ReadRequest, ReadResponse},
};

/// One end of an in-memory, full-duplex loopback pair.
#[derive(Debug)]
pub struct LoopbackChannel {
    outbound: mpsc::UnboundedSender<Frame>,
    inbound: Mutex<mpsc::UnboundedReceiver<Frame>>,
    paused: AtomicBool,
    closed: AtomicBool,
}

impl LoopbackChannel {
    /// Builds two channels wired together: frames sent on one arrive as
    /// `recv_frame` on the other.
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();
        (
            Self {
                outbound: tx_a,
                inbound: Mutex::new(rx_b),
                paused: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            },
            Self {
                outbound: tx_b,
                inbound: Mutex::new(rx_a),
                paused: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            },
        )
    }

    /// Whether `pause()` was called more recently than `resume()`. Tests
    /// assert on this to check `HighWater`/`LowWater` behavior without
    /// depending on real socket backpressure.
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    fn send(&self, frame: Frame) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(anyhow!("loopback channel closed"));
        }
        self.outbound
            .send(frame)
            .map_err(|_| anyhow!("loopback peer dropped"))
    }
}

impl Channel for LoopbackChannel {
    fn send_read_request<'a>(&'a self, req: ReadRequest) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move { self.send(Frame::ReadRequest(req)) })
    }

    fn send_cancel<'a>(&'a self, req: CancelRequest) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move { self.send(Frame::CancelRequest(req)) })
    }

    fn send_response<'a>(&'a self, resp: ReadResponse) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move { self.send(Frame::ReadResponse(resp)) })
    }

    fn recv_frame<'a>(&'a self) -> BoxFuture<'a, Result<Option<Frame>>> {
        Box::pin(async move {
            if self.closed.load(Ordering::SeqCst) {
                return Err(anyhow!("loopback channel closed"));
            }
            Ok(self.inbound.lock().await.recv().await)
        })
    }

    fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    fn close<'a>(&'a self) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.closed.store(true, Ordering::SeqCst);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_sent_on_one_side_arrive_on_the_other() {
        let (a, b) = LoopbackChannel::pair();
        a.send_read_request(ReadRequest {
            block_id: 1,
            offset: 0,
            length: 10,
            lock_id: None,
            session_id: None,
        })
        .await
        .unwrap();

        let got = b.recv_frame().await.unwrap().expect("frame");
        assert!(matches!(got, Frame::ReadRequest(_)));
    }

    #[tokio::test]
    async fn closed_channel_rejects_sends() {
        let (a, _b) = LoopbackChannel::pair();
        a.close().await;
        let err = a.send_cancel(CancelRequest { block_id: 1 }).await;
        assert!(err.is_err());
    }
}
