// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use core::fmt;

use serde::{Deserialize, Serialize};

/// Caching behavior requested for a single UFS block read.
///
/// `NoCache` always pass-through reads the backing store. `CachePromote`
/// tees the bytes into a freshly allocated temp block in the local store so
/// the block is promoted to the in-memory tier once fully materialised.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadType {
    #[serde(rename = "NoCache", alias = "no_cache", alias = "NO_CACHE")]
    NoCache,
    #[serde(
        rename = "CachePromote",
        alias = "cache_promote",
        alias = "CACHE_PROMOTE"
    )]
    CachePromote,
}

impl fmt::Display for ReadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReadType::NoCache => "NoCache",
            ReadType::CachePromote => "CachePromote",
        })
    }
}

impl ReadType {
    /// Whether this read type forbids teeing bytes into the local store.
    #[inline]
    pub fn is_no_cache(self) -> bool {
        matches!(self, ReadType::NoCache)
    }
}
