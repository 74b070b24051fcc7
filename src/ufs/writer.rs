// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    io::ErrorKind,
    path::PathBuf,
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
};

use bytes::Bytes;
use tokio::{
    fs::{File, OpenOptions},
    io::AsyncWriteExt,
    sync::Mutex,
};
use tracing::warn;

/// Minimal append-only writer to UFS (spec.md §4.6, sketch only). Not
/// thread-safe beyond serializing its own writes: single-writer-per-
/// instance is the caller's contract, same as `client::pdu_connection`'s
/// owned-half split assumes one writer at a time.
#[derive(Debug)]
pub struct UfsBlockWriter {
    path: PathBuf,
    file: Mutex<File>,
    position: AtomicU64,
    closed: AtomicBool,
}

impl UfsBlockWriter {
    pub async fn create(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .await?;
        Ok(Self {
            path,
            file: Mutex::new(file),
            position: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    /// Appends `buffer` at the current position.
    pub async fn append(&self, buffer: &[u8]) -> std::io::Result<()> {
        self.ensure_open()?;
        self.file.lock().await.write_all(buffer).await?;
        self.position.fetch_add(buffer.len() as u64, Ordering::SeqCst);
        Ok(())
    }

    /// Drains a network buffer directly into the UFS output.
    pub async fn transfer_from(&self, data: Bytes) -> std::io::Result<usize> {
        self.ensure_open()?;
        self.file.lock().await.write_all(&data).await?;
        let n = data.len();
        self.position.fetch_add(n as u64, Ordering::SeqCst);
        Ok(n)
    }

    pub fn position(&self) -> u64 {
        self.position.load(Ordering::SeqCst)
    }

    /// Closes the writer and best-effort deletes the backing file.
    ///
    /// Open question (spec.md §9, carried forward unresolved): a retry
    /// that races this delete can resurrect the file UFS-side; fixing it
    /// properly needs an atomic cancel from the backing UFS, which this
    /// writer does not have.
    pub async fn cancel(&self) -> std::io::Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "cancel: best-effort delete failed");
                Err(err)
            }
        }
    }

    /// Idempotent. Flushes and marks the writer closed without deleting
    /// the backing file.
    pub async fn close(&self) -> std::io::Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.file.lock().await.flush().await?;
        }
        Ok(())
    }

    fn ensure_open(&self) -> std::io::Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(std::io::Error::new(ErrorKind::Other, "write on a closed UfsBlockWriter"));
        }
        Ok(())
    }
}
