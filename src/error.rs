// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Error taxonomy for the UFS block streaming subsystem.
//!
//! Leaf operations return [`UfsError`] so callers can match on a specific
//! kind (the registry's retry/backoff policy depends on telling
//! `AccessTokenUnavailable` apart from a fatal I/O error); everything above
//! that boundary propagates through `anyhow::Result`, the same layering the
//! teacher crate uses for its own `thiserror` leaves (see
//! `models::opcode::UnknownOpcode`).

use std::sync::Arc;

use thiserror::Error;

use crate::registry::block_info::{BlockId, SessionId};

/// Errors raised by the registry, packet reader, and positional stream.
///
/// `Io`'s source is `Arc`-wrapped so the whole enum stays `Clone` — the
/// packet reader's ingestion pump records one `UfsError` in a shared slot
/// that every waiting `read_packet` caller needs its own copy of.
#[derive(Debug, Error, Clone)]
pub enum UfsError {
    /// `acquireAccess` called for a `(session, block)` key that already has
    /// an entry.
    #[error("block already exists: session={session}, block={block}")]
    BlockAlreadyExists { session: SessionId, block: BlockId },

    /// `acquireAccess` rejected because `MaxConcurrency(block)` is already
    /// reached.
    #[error("access token unavailable for block={block} (max concurrency reached)")]
    AccessTokenUnavailable { block: BlockId },

    /// Operation referenced a `(session, block)` pair with no registry
    /// entry.
    #[error("block does not exist: session={session}, block={block}")]
    BlockDoesNotExist { session: SessionId, block: BlockId },

    /// I/O failure at the transport or UFS boundary. `transient` mirrors
    /// spec.md §7's distinction between errors a caller should retry at the
    /// stream level and ones that must surface to the client.
    #[error("{}io error: {source}", if *transient { "transient " } else { "" })]
    Io {
        transient: bool,
        #[source]
        source: Arc<std::io::Error>,
    },

    /// A read was cancelled; converted to EOF at the stream boundary, never
    /// surfaced past [`crate::positional_stream::PositionalInputStream`].
    #[error("cancelled")]
    Cancelled,

    /// Operation attempted on a stream/reader/writer after `close()`.
    #[error("operation on a closed resource")]
    Closed,
}

impl UfsError {
    /// Wraps a transient I/O error (caller may retry at the stream level).
    pub fn transient_io(source: std::io::Error) -> Self {
        UfsError::Io {
            transient: true,
            source: Arc::new(source),
        }
    }

    /// Wraps a fatal I/O error (stream must close, error surfaces to the
    /// client).
    pub fn fatal_io(source: std::io::Error) -> Self {
        UfsError::Io {
            transient: false,
            source: Arc::new(source),
        }
    }

    /// Whether a caller can reasonably retry this error at the stream
    /// level.
    pub fn is_retryable(&self) -> bool {
        matches!(self, UfsError::Io { transient: true, .. })
    }
}
