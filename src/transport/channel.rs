// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fmt::Debug, future::Future, pin::Pin};

use anyhow::Result;

use crate::wire::{CancelRequest, Frame, ReadRequest};

/// A future boxed the same way [`crate::state_machine::common::StateMachine`]
/// boxes its step futures, so `Channel` stays object-safe and a
/// [`crate::transport::ChannelPool`] can hand out `Arc<dyn Channel>`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Full-duplex, frame-oriented transport to one peer (worker-side: a
/// client; client-side: the handler end of a data server connection).
///
/// Any error on the channel closes it (spec.md §4.1): after a method
/// returns `Err`, the channel must be assumed dead and released back to
/// the pool via [`Channel::close`] rather than reused.
pub trait Channel: Debug + Send + Sync {
    /// Sends a `ReadRequest` frame.
    fn send_read_request<'a>(&'a self, req: ReadRequest) -> BoxFuture<'a, Result<()>>;

    /// Sends a `CancelRequest` frame. The peer may ignore it if the full
    /// response was already enqueued.
    fn send_cancel<'a>(&'a self, req: CancelRequest) -> BoxFuture<'a, Result<()>>;

    /// Sends a `ReadResponse` frame (worker → client direction).
    fn send_response<'a>(&'a self, resp: crate::wire::ReadResponse) -> BoxFuture<'a, Result<()>>;

    /// Receives the next frame. `Ok(None)` signals a clean peer close;
    /// distinct from an error, which signals the channel is now unusable.
    fn recv_frame<'a>(&'a self) -> BoxFuture<'a, Result<Option<Frame>>>;

    /// Stops draining inbound frames (autoread off). The packet reader
    /// calls this once its queue hits `HighWater`; the peer's own send
    /// window eventually fills and it backs off.
    fn pause(&self);

    /// Resumes draining inbound frames after a `pause`.
    fn resume(&self);

    /// Tears the channel down. Idempotent.
    fn close<'a>(&'a self) -> BoxFuture<'a, ()>;
}
