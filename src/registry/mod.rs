//! The UFS block access registry: tracks which sessions hold which blocks
//! open, and enforces per-block concurrency caps.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

/// Keys, metadata, and the reader/writer slots stored per registry entry.
pub mod block_info;
/// `UfsBlockAccessRegistry` and its acquire/release/cleanup operations.
pub mod access;

pub use access::{AcquireAccessOptions, UfsBlockAccessRegistry};
pub use block_info::{AccessKey, BlockId, BlockInfo, SessionId, UfsBlockMeta};
