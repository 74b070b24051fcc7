// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use bytes::Bytes;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::{Mutex, Notify},
};
use tracing::debug;

use crate::{
    transport::channel::{BoxFuture, Channel},
    wire::{CancelRequest, Frame, ReadRequest, ReadResponse},
};

/// A [`Channel`] backed by one TCP connection, framing reads/writes per
/// [`crate::wire::frame`]. Modeled on `client::client::ClientConnection`:
/// the read and write halves are held under their own `Mutex` so a writer
/// never blocks a concurrent reader, and `pause`/`resume` gate the read
/// side with a `Notify` rather than touching the socket itself.
#[derive(Debug)]
pub struct TcpChannel {
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
    paused: AtomicBool,
    resume: Notify,
    closed: AtomicBool,
}

impl TcpChannel {
    pub async fn connect(addr: impl tokio::net::ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self::from_stream(stream))
    }

    pub fn from_stream(stream: TcpStream) -> Self {
        stream.set_nodelay(true).ok();
        let (r, w) = stream.into_split();
        Self {
            reader: Mutex::new(r),
            writer: Mutex::new(w),
            paused: AtomicBool::new(false),
            resume: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    async fn write_frame(&self, frame: Frame) -> Result<()> {
        let bytes = frame.encode();
        let mut w = self.writer.lock().await;
        if let Err(e) = w.write_all(&bytes).await {
            self.closed.store(true, Ordering::SeqCst);
            return Err(e.into());
        }
        Ok(())
    }

    async fn read_frame(&self) -> Result<Option<Frame>> {
        loop {
            if !self.paused.load(Ordering::SeqCst) {
                break;
            }
            self.resume.notified().await;
        }

        let mut r = self.reader.lock().await;
        let mut len_buf = [0u8; 4];
        match r.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => {
                drop(r);
                self.closed.store(true, Ordering::SeqCst);
                return Err(e.into());
            }
        }
        let total_len = u32::from_be_bytes(len_buf) as usize;
        let mut body = vec![0u8; total_len];
        if let Err(e) = r.read_exact(&mut body).await {
            drop(r);
            self.closed.store(true, Ordering::SeqCst);
            return Err(e.into());
        }
        drop(r);
        Frame::decode_body(Bytes::from(body)).map(Some)
    }
}

impl Channel for TcpChannel {
    fn send_read_request<'a>(&'a self, req: ReadRequest) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.write_frame(Frame::ReadRequest(req)))
    }

    fn send_cancel<'a>(&'a self, req: CancelRequest) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.write_frame(Frame::CancelRequest(req)))
    }

    fn send_response<'a>(&'a self, resp: ReadResponse) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.write_frame(Frame::ReadResponse(resp)))
    }

    fn recv_frame<'a>(&'a self) -> BoxFuture<'a, Result<Option<Frame>>> {
        Box::pin(self.read_frame())
    }

    fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.resume.notify_waiters();
    }

    fn close<'a>(&'a self) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            if !self.closed.swap(true, Ordering::SeqCst) {
                let mut w = self.writer.lock().await;
                if let Err(e) = w.shutdown().await {
                    debug!(error = %e, "TcpChannel shutdown during close");
                }
                self.resume.notify_waiters();
            }
        })
    }
}
