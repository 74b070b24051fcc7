// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Demo wiring: loads the worker config, opens a UFS fixture, drives one
//! `CACHE_PROMOTE` block read end to end through the registry, a loopback
//! channel standing in for the data-server transport, and a
//! `PositionalInputStream`, then reports whether the block was promoted.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use ufsio::{
    cfg::{cli::resolve_config_path, config::Config, enums::ReadType, logger::init_logger},
    local_store::InMemoryBlockStore,
    positional_stream::{ChannelPoolReaderFactory, PositionalInputStream},
    registry::{AcquireAccessOptions, UfsBlockAccessRegistry, BlockId, SessionId, UfsBlockMeta},
    transport::{Channel, ChannelPool, LoopbackChannel},
    wire::Frame,
};

const SESSION: SessionId = SessionId(1);
const BLOCK: BlockId = BlockId(1);

#[tokio::main]
async fn main() -> Result<()> {
    let _guard = init_logger(
        resolve_config_path("config/logger.yaml")
            .context("resolve logger config path")?
            .to_str()
            .context("logger config path must be utf8")?,
    )?;

    let cfg = resolve_config_path("config/worker.yaml")
        .and_then(Config::load_from_file)
        .context("failed to resolve or load worker config")?;

    let fixture_path = std::env::temp_dir().join(format!("ufsio-demo-{}.bin", std::process::id()));
    let data: Vec<u8> = (0..4096u32).map(|i| (i % 256) as u8).collect();
    tokio::fs::write(&fixture_path, &data).await.context("write demo UFS fixture")?;

    let store = Arc::new(InMemoryBlockStore::default());
    let registry = Arc::new(UfsBlockAccessRegistry::new(store.clone()));

    let read_type = ReadType::CachePromote;
    let meta = UfsBlockMeta::new(
        SESSION,
        BLOCK,
        fixture_path.to_str().context("fixture path must be utf8")?,
        0,
        data.len() as u64,
        1,
        read_type.is_no_cache(),
    );
    registry.acquire_access(
        SESSION,
        BLOCK,
        meta,
        AcquireAccessOptions {
            max_ufs_read_concurrency: cfg.ufs_read.max_ufs_read_concurrency,
        },
    )?;

    let (worker_side, client_side) = LoopbackChannel::pair();
    let worker_side = Arc::new(worker_side);
    let pool = Arc::new(ChannelPool::new());
    let client_channel: Arc<dyn Channel> = Arc::new(client_side);
    pool.insert(client_channel);

    let chunk_size = cfg.ufs_read.remote_read_buffer_size;
    let worker_registry = registry.clone();
    let worker_channel = worker_side.clone();
    let worker_task = tokio::spawn(async move {
        let Ok(Some(Frame::ReadRequest(req))) = worker_channel.recv_frame().await else {
            return;
        };
        let reader = worker_registry
            .get_block_reader(SESSION, BLOCK, req.offset as u64, read_type.is_no_cache())
            .await
            .expect("get_block_reader");
        reader
            .transfer_to(worker_channel.as_ref(), req.block_id, req.length as u64, chunk_size)
            .await
            .expect("transfer_to");
    });

    let factory = Arc::new(ChannelPoolReaderFactory::new(
        pool,
        BLOCK.0,
        data.len() as u64,
        None,
        Some(SESSION.0 as i64),
        cfg.packet_reader.high_water,
        cfg.packet_reader.low_water,
    ));
    let stream = PositionalInputStream::new(data.len() as u64, factory);

    let mut got = Vec::with_capacity(data.len());
    let mut buf = vec![0u8; chunk_size];
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        got.extend_from_slice(&buf[..n]);
    }
    stream.close().await?;
    worker_task.await.context("worker task panicked")?;

    let commit_pending = registry.cleanup(SESSION, BLOCK).await?;
    registry.release_access(SESSION, BLOCK);
    tokio::fs::remove_file(&fixture_path).await.ok();

    info!(
        bytes_read = got.len(),
        round_trip_ok = (got == data),
        commit_pending,
        promoted = store.is_committed(BLOCK),
        "demo read complete"
    );

    Ok(())
}
