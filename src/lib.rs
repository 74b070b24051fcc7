// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Block streaming subsystem for a distributed cache worker: clients pull
//! block bytes over a framed [`transport::Channel`] (C1), a [`packet_reader`]
//! turns that stream into a flow-controlled FIFO (C2) which
//! [`positional_stream::PositionalInputStream`] exposes as a seekable byte
//! stream (C3); [`registry::UfsBlockAccessRegistry`] (C4) tracks which
//! sessions hold which blocks open and hands out [`ufs::UfsBlockReader`] (C5)
//! and [`ufs::UfsBlockWriter`] (C6) instances backed by the UFS mount.

pub mod cfg;
pub mod error;
pub mod local_store;
pub mod packet_reader;
pub mod positional_stream;
pub mod registry;
pub mod state_machine;
pub mod transport;
pub mod ufs;
pub mod wire;
