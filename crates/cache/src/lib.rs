// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! conveyor-cache: the two-tier freshness cache.
//!
//! Serves dashboard reads from a bounded in-process tier over the
//! shared persisted tier, with fresh/stale/miss classification and
//! hit-adaptive TTLs. See [`FreshnessCache`].

pub mod cache;
pub mod stats;

pub use cache::{BatchLookup, CacheWrite, FreshnessCache, SCHEMA_VERSION};
pub use conveyor_core::{CacheEntry, CacheKey, Device, Freshness};
pub use stats::{CacheStats, CacheStatsSnapshot};
