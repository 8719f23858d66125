// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn entry_expiring_at(expires_at_ms: u64) -> CacheEntry {
    CacheEntry {
        key: CacheKey::new("campaign-9", "us", Device::Mobile),
        value: serde_json::json!({"spend": 41.5}),
        hit_count: 0,
        ttl_ms: 900_000,
        expires_at_ms,
        stored_at_ms: 0,
        source: "ads".into(),
        schema_version: 1,
    }
}

#[test]
fn canonical_includes_every_dimension() {
    let key = CacheKey::new("Campaign-9", " US ", Device::Tablet)
        .with_dimension("Audience", "returning")
        .with_dimension("network", "search");
    assert_eq!(
        key.canonical(),
        "campaign-9:us:tablet:audience=returning:network=search"
    );
}

#[test]
fn canonical_is_stable_across_dimension_insert_order() {
    let a = CacheKey::new("e", "us", Device::All)
        .with_dimension("b", "2")
        .with_dimension("a", "1");
    let b = CacheKey::new("e", "us", Device::All)
        .with_dimension("a", "1")
        .with_dimension("b", "2");
    assert_eq!(a.canonical(), b.canonical());
    assert_eq!(a, b);
}

#[test]
fn unsegmented_device_is_an_explicit_value() {
    let all = CacheKey::new("e", "us", Device::All);
    let mobile = CacheKey::new("e", "us", Device::Mobile);
    assert_ne!(all.canonical(), mobile.canonical());
    assert!(all.canonical().ends_with(":all"));
}

#[yare::parameterized(
    no_hits = { 0, 900_000 },
    one_hit = { 1, 960_000 },
    five_hits = { 5, 1_200_000 },
    at_ceiling = { 45, 3_600_000 },
    far_past_ceiling = { 10_000, 3_600_000 },
)]
fn effective_ttl_grows_per_hit_up_to_ceiling(hits: u32, want_ms: u64) {
    let config = CacheConfig::default();
    assert_eq!(effective_ttl_ms(&config, hits), want_ms);
}

#[test]
fn effective_ttl_saturates_instead_of_overflowing() {
    let config = CacheConfig {
        base_ttl_ms: u64::MAX - 10,
        ttl_step_ms: u64::MAX,
        max_ttl_ms: u64::MAX,
        ..CacheConfig::default()
    };
    assert_eq!(effective_ttl_ms(&config, u32::MAX), u64::MAX);
}

#[yare::parameterized(
    well_before_expiry = { 5_000, Freshness::Fresh },
    just_before_expiry = { 9_999, Freshness::Fresh },
    at_expiry = { 10_000, Freshness::Stale },
    inside_grace = { 11_999, Freshness::Stale },
    at_grace_end = { 12_000, Freshness::Expired },
    long_after = { 50_000, Freshness::Expired },
)]
fn freshness_boundaries(now_ms: u64, want: Freshness) {
    let entry = entry_expiring_at(10_000);
    assert_eq!(entry.freshness(now_ms, 2_000), want);
}

#[test]
fn zero_grace_means_no_stale_band() {
    let entry = entry_expiring_at(10_000);
    assert_eq!(entry.freshness(10_000, 0), Freshness::Expired);
}

#[test]
fn entry_round_trips_through_json() {
    let entry = entry_expiring_at(10_000);
    let json = serde_json::to_string(&entry).unwrap();
    let back: CacheEntry = serde_json::from_str(&json).unwrap();
    assert_eq!(back, entry);
}
