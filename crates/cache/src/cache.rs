// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Two-tier freshness cache.
//!
//! Lookups try a bounded in-process tier first and fall through to the
//! persisted tier, promoting what they find there. Results come back
//! split three ways: fresh, stale (past expiry but inside the grace
//! window, served so the caller can render immediately while a refresh
//! runs), and miss.
//!
//! TTLs are dynamic. Recorded hits accumulate on a per-key counter
//! that survives rewrites, and every (re)store recomputes the entry's
//! TTL from that counter: popular keys drift toward the ceiling TTL,
//! cold keys stay at the base. Expiry timestamps are only ever set at
//! write time.

use crate::stats::{CacheStats, CacheStatsSnapshot};
use conveyor_core::{effective_ttl_ms, CacheConfig, CacheEntry, CacheKey, Clock, Freshness};
use conveyor_store::{CacheStore, StoreError};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Bumped when the persisted entry layout changes; entries written by
/// other versions read as misses.
pub const SCHEMA_VERSION: u32 = 1;

/// One value to cache, paired with the upstream that produced it.
#[derive(Debug, Clone)]
pub struct CacheWrite {
    pub key: CacheKey,
    pub value: serde_json::Value,
    pub source: String,
}

impl CacheWrite {
    pub fn new(key: CacheKey, value: serde_json::Value, source: impl Into<String>) -> Self {
        Self {
            key,
            value,
            source: source.into(),
        }
    }
}

/// Result of a batch lookup, partitioned by freshness. Keys keep their
/// input order within each partition.
#[derive(Debug, Default, Clone)]
pub struct BatchLookup {
    pub hits: Vec<CacheEntry>,
    /// Served past expiry; the caller should surface a staleness flag
    /// and schedule a refresh for these keys.
    pub stale: Vec<CacheEntry>,
    pub misses: Vec<CacheKey>,
}

impl BatchLookup {
    /// Keys that need a refresh: every stale serve and every miss.
    pub fn refresh_keys(&self) -> Vec<CacheKey> {
        self.stale
            .iter()
            .map(|e| e.key.clone())
            .chain(self.misses.iter().cloned())
            .collect()
    }
}

struct MemoryTier {
    entries: HashMap<String, CacheEntry>,
    capacity: usize,
}

impl MemoryTier {
    fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            capacity,
        }
    }

    /// Insert, evicting the slot closest to expiry when a new key
    /// would exceed capacity. Returns how many entries were evicted.
    fn insert(&mut self, entry: CacheEntry) -> u64 {
        let canonical = entry.key.canonical();
        let mut evicted = 0;
        if !self.entries.contains_key(&canonical) && self.entries.len() >= self.capacity {
            let soonest = self
                .entries
                .iter()
                .min_by_key(|(_, e)| e.expires_at_ms)
                .map(|(k, _)| k.clone());
            if let Some(k) = soonest {
                self.entries.remove(&k);
                evicted = 1;
            }
        }
        self.entries.insert(canonical, entry);
        evicted
    }
}

pub struct FreshnessCache<C: Clock> {
    config: CacheConfig,
    clock: C,
    memory: Mutex<MemoryTier>,
    stats: CacheStats,
}

impl<C: Clock> FreshnessCache<C> {
    pub fn new(config: CacheConfig, clock: C) -> Self {
        let capacity = config.memory_capacity;
        Self {
            config,
            clock,
            memory: Mutex::new(MemoryTier::new(capacity)),
            stats: CacheStats::default(),
        }
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn memory_len(&self) -> usize {
        self.memory.lock().entries.len()
    }

    /// Look up `keys` across both tiers.
    pub async fn lookup(
        &self,
        store: &impl CacheStore,
        keys: &[CacheKey],
    ) -> Result<BatchLookup, StoreError> {
        let now_ms = self.clock.epoch_ms();
        let grace_ms = self.config.grace_ms;
        let mut result = BatchLookup::default();
        let mut unresolved: Vec<CacheKey> = Vec::new();

        {
            let mut tier = self.memory.lock();
            for key in keys {
                let canonical = key.canonical();
                let found = tier
                    .entries
                    .get(&canonical)
                    .map(|e| (e.freshness(now_ms, grace_ms), e.clone()));
                match found {
                    Some((Freshness::Fresh, entry)) => {
                        self.stats.count_memory_hit();
                        result.hits.push(entry);
                    }
                    Some((Freshness::Stale, entry)) => {
                        self.stats.count_memory_hit();
                        self.stats.count_stale_served();
                        result.stale.push(entry);
                    }
                    Some((Freshness::Expired, _)) => {
                        tier.entries.remove(&canonical);
                        unresolved.push(key.clone());
                    }
                    None => unresolved.push(key.clone()),
                }
            }
        }

        if unresolved.is_empty() {
            return Ok(result);
        }

        let canonicals: Vec<String> = unresolved.iter().map(CacheKey::canonical).collect();
        let fetched = store.cache_get(&canonicals, now_ms).await?;
        let mut promote: Vec<CacheEntry> = Vec::new();
        for (key, slot) in unresolved.into_iter().zip(fetched) {
            match slot {
                Some(entry) if entry.schema_version == SCHEMA_VERSION => {
                    match entry.freshness(now_ms, grace_ms) {
                        Freshness::Fresh => {
                            self.stats.count_persisted_hit();
                            result.hits.push(entry.clone());
                            promote.push(entry);
                        }
                        Freshness::Stale => {
                            self.stats.count_persisted_hit();
                            self.stats.count_stale_served();
                            result.stale.push(entry.clone());
                            promote.push(entry);
                        }
                        Freshness::Expired => {
                            self.stats.count_miss();
                            result.misses.push(key);
                        }
                    }
                }
                Some(entry) => {
                    tracing::debug!(
                        key = %key,
                        found = entry.schema_version,
                        expected = SCHEMA_VERSION,
                        "cache entry from another schema version, treating as miss"
                    );
                    self.stats.count_miss();
                    result.misses.push(key);
                }
                None => {
                    self.stats.count_miss();
                    result.misses.push(key);
                }
            }
        }

        if !promote.is_empty() {
            let mut tier = self.memory.lock();
            let mut evicted = 0;
            for entry in promote {
                evicted += tier.insert(entry);
            }
            self.stats.count_evictions(evicted);
        }
        Ok(result)
    }

    /// Persist freshly fetched values into both tiers.
    ///
    /// Each entry's TTL is computed here from the key's accumulated
    /// hit counter, and its expiry from that TTL, so a rewrite is the
    /// only thing that moves `expires_at_ms`.
    pub async fn store(
        &self,
        store: &impl CacheStore,
        writes: Vec<CacheWrite>,
    ) -> Result<Vec<CacheEntry>, StoreError> {
        if writes.is_empty() {
            return Ok(Vec::new());
        }
        let now_ms = self.clock.epoch_ms();
        let canonicals: Vec<String> = writes.iter().map(|w| w.key.canonical()).collect();
        // The hit counter survives the rewrite. Read both tiers and
        // keep the larger count in case one lags the other.
        let persisted = store.cache_get(&canonicals, now_ms).await?;

        let mut entries = Vec::with_capacity(writes.len());
        {
            let tier = self.memory.lock();
            for ((write, canonical), prior) in
                writes.into_iter().zip(canonicals).zip(persisted)
            {
                let memory_hits = tier
                    .entries
                    .get(&canonical)
                    .map(|e| e.hit_count)
                    .unwrap_or(0);
                let persisted_hits = prior.map(|e| e.hit_count).unwrap_or(0);
                let hits = memory_hits.max(persisted_hits);
                let ttl_ms = effective_ttl_ms(&self.config, hits);
                entries.push(CacheEntry {
                    key: write.key,
                    value: write.value,
                    hit_count: hits,
                    ttl_ms,
                    expires_at_ms: now_ms.saturating_add(ttl_ms),
                    stored_at_ms: now_ms,
                    source: write.source,
                    schema_version: SCHEMA_VERSION,
                });
            }
        }

        store
            .cache_put(&entries, self.config.grace_ms, now_ms)
            .await?;

        let mut evicted = 0;
        {
            let mut tier = self.memory.lock();
            for entry in &entries {
                evicted += tier.insert(entry.clone());
            }
        }
        self.stats.count_evictions(evicted);
        self.stats.count_stores(entries.len() as u64);
        Ok(entries)
    }

    /// Count one hit against `key` in both tiers. The backend counter
    /// is authoritative; the in-process copy trails it.
    pub async fn record_hit(
        &self,
        store: &impl CacheStore,
        key: &CacheKey,
    ) -> Result<u64, StoreError> {
        let now_ms = self.clock.epoch_ms();
        let canonical = key.canonical();
        let count = store.cache_record_hit(&canonical, now_ms).await?;
        {
            let mut tier = self.memory.lock();
            if let Some(entry) = tier.entries.get_mut(&canonical) {
                entry.hit_count = if count > 0 {
                    count.min(u64::from(u32::MAX)) as u32
                } else {
                    entry.hit_count.saturating_add(1)
                };
            }
        }
        self.stats.count_hit_recorded();
        Ok(count)
    }
}

#[cfg(test)]
#[path = "cache_tests.rs"]
mod tests;
