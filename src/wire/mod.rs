//! Packet framing for the UFS block streaming protocol.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

/// Frame header layout, message kinds, and encode/decode helpers.
pub mod frame;

pub use frame::{CancelRequest, Frame, MessageType, ReadRequest, ReadResponse, Status};
