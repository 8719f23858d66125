// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cache counters for the status surface.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counters, cheap enough to bump on every lookup.
#[derive(Debug, Default)]
pub struct CacheStats {
    memory_hits: AtomicU64,
    persisted_hits: AtomicU64,
    stale_served: AtomicU64,
    misses: AtomicU64,
    stores: AtomicU64,
    evictions: AtomicU64,
    hits_recorded: AtomicU64,
}

impl CacheStats {
    pub fn count_memory_hit(&self) {
        self.memory_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count_persisted_hit(&self) {
        self.persisted_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count_stale_served(&self) {
        self.stale_served.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count_stores(&self, n: u64) {
        self.stores.fetch_add(n, Ordering::Relaxed);
    }

    pub fn count_evictions(&self, n: u64) {
        self.evictions.fetch_add(n, Ordering::Relaxed);
    }

    pub fn count_hit_recorded(&self) {
        self.hits_recorded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            memory_hits: self.memory_hits.load(Ordering::Relaxed),
            persisted_hits: self.persisted_hits.load(Ordering::Relaxed),
            stale_served: self.stale_served.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stores: self.stores.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            hits_recorded: self.hits_recorded.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStatsSnapshot {
    pub memory_hits: u64,
    pub persisted_hits: u64,
    pub stale_served: u64,
    pub misses: u64,
    pub stores: u64,
    pub evictions: u64,
    pub hits_recorded: u64,
}

impl CacheStatsSnapshot {
    /// Hit ratio over all lookups, counting stale serves as hits.
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.memory_hits + self.persisted_hits;
        let total = hits + self.misses;
        if total == 0 {
            return 0.0;
        }
        hits as f64 / total as f64
    }
}
