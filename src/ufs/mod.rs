//! Streams block bytes to/from the backing UFS store.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

/// C5: streams a block's bytes from UFS, optionally promoting into the
/// local store as it goes.
pub mod reader;
/// C6: minimal append-only UFS writer sketch with cancel-and-delete.
pub mod writer;

pub use reader::UfsBlockReader;
pub use writer::UfsBlockWriter;
