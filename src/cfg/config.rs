// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fs, path::Path, time::Duration};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

/// Top-level configuration for the UFS block streaming subsystem.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Config {
    /// Packet reader / transport flow-control knobs.
    pub packet_reader: PacketReaderConfig,
    /// UFS read path (buffer sizing, default concurrency).
    pub ufs_read: UfsReadConfig,
    /// Timeouts and other runtime-only parameters.
    pub runtime: RuntimeConfig,
}

/// Flow-control limits for [`crate::packet_reader::PacketReader`].
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct PacketReaderConfig {
    #[serde(rename = "HighWater")]
    /// Queue depth at or above which the transport is told to `pause()`.
    pub high_water: usize,
    #[serde(rename = "LowWater")]
    /// Queue depth at or below which the transport is told to `resume()`.
    pub low_water: usize,
}

/// Buffer sizing and default concurrency for UFS reads.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct UfsReadConfig {
    #[serde(rename = "RemoteReadBufferSize")]
    /// Size in bytes of the scratch buffer used to pull bytes from the UFS
    /// file into packets (`userBlockRemoteReadBufferSize` in spec terms).
    pub remote_read_buffer_size: usize,
    #[serde(rename = "MaxUfsReadConcurrency")]
    /// Default per-block concurrency cap (`userUfsBlockMaxReadConcurrency`),
    /// overridable per-request via `AcquireAccessOptions`.
    pub max_ufs_read_concurrency: u32,
}

/// Runtime-only settings that do not describe the wire protocol.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct RuntimeConfig {
    #[serde(rename = "ConnectionTimeout", with = "serde_secs")]
    /// Timeout for establishing a transport connection.
    pub connection_timeout: Duration,
    #[serde(rename = "IoTimeout", with = "serde_secs")]
    /// Timeout applied to an individual packet read/write.
    pub io_timeout: Duration,
}

impl Config {
    /// Loads the configuration from YAML, validates it, and returns the
    /// ready-to-use value.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let mut cfg: Config =
            serde_yaml::from_str(&s).context("failed to parse config YAML")?;
        cfg.validate_and_normalize()?;
        Ok(cfg)
    }

    /// Validates invariants between fields. Unlike the wire-protocol
    /// negotiation the teacher crate normalizes, nothing here is derived
    /// from a remote peer, so this only rejects contradictory values.
    pub fn validate_and_normalize(&mut self) -> Result<()> {
        ensure!(
            self.packet_reader.low_water <= self.packet_reader.high_water,
            "LowWater must be <= HighWater"
        );
        ensure!(
            self.ufs_read.remote_read_buffer_size > 0,
            "RemoteReadBufferSize must be > 0"
        );
        ensure!(
            self.ufs_read.max_ufs_read_concurrency >= 1,
            "MaxUfsReadConcurrency must be >= 1"
        );
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            packet_reader: PacketReaderConfig {
                high_water: 8,
                low_water: 2,
            },
            ufs_read: UfsReadConfig {
                remote_read_buffer_size: 8 * 1024,
                max_ufs_read_concurrency: 2,
            },
            runtime: RuntimeConfig {
                connection_timeout: Duration::from_secs(10),
                io_timeout: Duration::from_secs(30),
            },
        }
    }
}

/// Serde helpers for representing `Duration` as a number of seconds.
mod serde_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}
