//! Full-duplex channel abstraction over the wire framing in [`crate::wire`].

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

/// The `Channel` trait and the boxed-future alias its methods return.
pub mod channel;
/// Process-wide, dependency-injected pool of channels.
pub mod pool;
/// In-memory loopback channel used by tests.
pub mod loopback;
/// TCP-backed channel, framing reads/writes per [`crate::wire::frame`].
pub mod tcp;

pub use channel::{BoxFuture, Channel};
pub use loopback::LoopbackChannel;
pub use pool::ChannelPool;
pub use tcp::TcpChannel;
