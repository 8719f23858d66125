// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cache key and entry records.
//!
//! A cache key carries every dimension that changes the real-world
//! value it names. Omitting a dimension is the classic bug in this
//! kind of cache: two different segments collapse onto one key and
//! silently serve each other's numbers. The key type makes every
//! dimension explicit, with `Device::All` standing for "deliberately
//! not segmented" rather than an absent field.
//!
//! Entries expire on a dynamic TTL that grows with recorded hits up to
//! a ceiling, so hot entries are refreshed less often relative to
//! their traffic while cold ones fall back to the base TTL.

use crate::config::CacheConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Device segment of a cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Device {
    /// Explicitly unsegmented.
    All,
    Desktop,
    Mobile,
    Tablet,
}

impl Default for Device {
    fn default() -> Self {
        Device::All
    }
}

crate::simple_display! {
    Device {
        All => "all",
        Desktop => "desktop",
        Mobile => "mobile",
        Tablet => "tablet",
    }
}

/// Normalized cache key: entity identifier plus every segment
/// dimension the cached value depends on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    /// Normalized entity identifier (trimmed, lowercased).
    pub entity: String,
    /// ISO country code, normalized to lowercase. `"all"` when
    /// unsegmented.
    pub country: String,
    pub device: Device,
    /// Further shape-affecting dimensions, sorted by name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl CacheKey {
    /// Build a key, normalizing the entity and country on the way in.
    pub fn new(entity: &str, country: &str, device: Device) -> Self {
        Self {
            entity: normalize(entity),
            country: normalize(country),
            device,
            extra: BTreeMap::new(),
        }
    }

    /// Add one extra dimension. The dimension name is normalized; the
    /// value is kept as given.
    pub fn with_dimension(mut self, name: &str, value: impl Into<String>) -> Self {
        self.extra.insert(normalize(name), value.into());
        self
    }

    /// Canonical string form, used as the backend key and the
    /// in-process map key. Stable across construction order because
    /// the extra dimensions are BTreeMap-sorted.
    pub fn canonical(&self) -> String {
        let mut s = format!("{}:{}:{}", self.entity, self.country, self.device);
        for (name, value) in &self.extra {
            s.push(':');
            s.push_str(name);
            s.push('=');
            s.push_str(value);
        }
        s
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.canonical())
    }
}

fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

/// Effective TTL after `hits` recorded hits: `base + step × hits`,
/// clamped to the ceiling. Monotone in `hits`.
pub fn effective_ttl_ms(config: &CacheConfig, hits: u32) -> u64 {
    config
        .base_ttl_ms
        .saturating_add(config.ttl_step_ms.saturating_mul(u64::from(hits)))
        .min(config.max_ttl_ms)
}

/// Read-time classification of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    /// Before `expires_at_ms`.
    Fresh,
    /// Past expiry but within the grace window; served with a flag
    /// while a refresh is triggered.
    Stale,
    /// Past the grace window; treated as a miss.
    Expired,
}

crate::simple_display! {
    Freshness {
        Fresh => "fresh",
        Stale => "stale",
        Expired => "expired",
    }
}

/// One cached value with its freshness metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub value: serde_json::Value,
    /// Hits recorded against this entry since it was stored.
    pub hit_count: u32,
    /// TTL this entry was written with (derived, not fixed).
    pub ttl_ms: u64,
    /// Always recomputed from `ttl_ms` at write time, never patched
    /// in place.
    pub expires_at_ms: u64,
    pub stored_at_ms: u64,
    /// Upstream that produced the value.
    pub source: String,
    pub schema_version: u32,
}

impl CacheEntry {
    /// Classify this entry at `now_ms` under the given grace window.
    pub fn freshness(&self, now_ms: u64, grace_ms: u64) -> Freshness {
        if now_ms < self.expires_at_ms {
            Freshness::Fresh
        } else if now_ms < self.expires_at_ms.saturating_add(grace_ms) {
            Freshness::Stale
        } else {
            Freshness::Expired
        }
    }
}

#[cfg(test)]
#[path = "cache_entry_tests.rs"]
mod tests;
