// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Integration coverage for the Redis scripts. Ignored by default;
//! run with a local Redis via `cargo test -p conveyor-store --features
//! redis-backend -- --ignored`. Each test flushes its own database
//! index so parallel tests never share keys.

use super::*;
use conveyor_core::test_support::payload_for;
use conveyor_core::{CacheKey, Clock, Device, JobPriority, SystemClock};
use std::time::Duration;

async fn backend(db: u8) -> RedisBackend {
    let connect = RedisConnect::new(&format!("redis://127.0.0.1:6379/{db}")).unwrap();
    let backend = connect.connect().await.expect("local Redis not reachable");
    let mut conn = backend.conn.clone();
    let _: () = redis::cmd("FLUSHDB").query_async(&mut conn).await.unwrap();
    backend
}

fn worker() -> WorkerId {
    WorkerId::from_string("wkr-redis-1")
}

fn job_at(owner: &str, entity: &str, priority: JobPriority, epoch_ms: u64) -> Job {
    Job::new_with_epoch_ms(payload_for(owner, entity), priority, epoch_ms)
}

fn cache_entry_at(key: &CacheKey, stored_at_ms: u64, ttl_ms: u64) -> CacheEntry {
    CacheEntry {
        key: key.clone(),
        value: serde_json::json!({"clicks": 10}),
        hit_count: 0,
        ttl_ms,
        expires_at_ms: stored_at_ms + ttl_ms,
        stored_at_ms,
        source: "ads".into(),
        schema_version: 1,
    }
}

#[tokio::test]
#[ignore = "needs a local Redis on 127.0.0.1:6379"]
async fn put_claim_complete_roundtrip() {
    let store = backend(8).await;
    store.ping().await.unwrap();

    let first = job_at("acct-1", "campaign-1", JobPriority::Normal, 1_000);
    let twin = job_at("acct-1", "campaign-1", JobPriority::Normal, 2_000);
    assert_eq!(
        store.put_job(&first, false).await.unwrap(),
        PutOutcome::Inserted
    );
    assert_eq!(
        store.put_job(&twin, false).await.unwrap(),
        PutOutcome::DuplicateOf(first.id.clone())
    );

    let mut claimed = store
        .claim_next(&worker(), 4, 3_000)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(claimed.id, first.id);
    assert_eq!(claimed.state, JobState::Active);
    assert_eq!(claimed.attempts, 1);
    assert_eq!(claimed.claimed_by.as_ref(), Some(&worker()));

    claimed.complete(4_000).unwrap();
    store.update_job(&claimed, JobState::Active, 4_000).await.unwrap();

    assert!(store.find_in_flight(&first.identity).await.unwrap().is_none());
    let depths = store.queue_depths().await.unwrap();
    assert_eq!(depths.completed, 1);
    assert_eq!(depths.active, 0);
}

#[tokio::test]
#[ignore = "needs a local Redis on 127.0.0.1:6379"]
async fn high_priority_claims_first_under_the_ceiling() {
    let store = backend(9).await;

    let normal = job_at("acct-1", "campaign-1", JobPriority::Normal, 1_000);
    let high = job_at("acct-2", "campaign-2", JobPriority::High, 2_000);
    store.put_job(&normal, false).await.unwrap();
    store.put_job(&high, false).await.unwrap();

    let mut claimed = store
        .claim_next(&worker(), 1, 3_000)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(claimed.id, high.id);

    // Ceiling of one: nothing more until the claim resolves.
    assert!(store.claim_next(&worker(), 1, 3_000).await.unwrap().is_none());

    claimed.complete(4_000).unwrap();
    store.update_job(&claimed, JobState::Active, 4_000).await.unwrap();
    let next = store.claim_next(&worker(), 1, 5_000).await.unwrap().unwrap();
    assert_eq!(next.id, normal.id);
}

#[tokio::test]
#[ignore = "needs a local Redis on 127.0.0.1:6379"]
async fn delayed_jobs_promote_when_due() {
    let store = backend(10).await;

    let job = job_at("acct-1", "campaign-1", JobPriority::Normal, 1_000);
    store.put_job(&job, false).await.unwrap();
    let mut claimed = store
        .claim_next(&worker(), 4, 1_000)
        .await
        .unwrap()
        .unwrap();
    claimed.delay("upstream 503", 5_000).unwrap();
    store.update_job(&claimed, JobState::Active, 1_500).await.unwrap();

    // Not due yet.
    assert!(store.claim_next(&worker(), 4, 2_000).await.unwrap().is_none());

    // Due: promoted, patched back to waiting, and claimable again with
    // the attempt carried.
    let again = store.claim_next(&worker(), 4, 6_000).await.unwrap().unwrap();
    assert_eq!(again.id, job.id);
    assert_eq!(again.state, JobState::Active);
    assert_eq!(again.attempts, 2);
    assert_eq!(again.not_before_ms, None);
}

#[tokio::test]
#[ignore = "needs a local Redis on 127.0.0.1:6379"]
async fn stalled_claims_return_to_waiting() {
    let store = backend(11).await;

    let job = job_at("acct-1", "campaign-1", JobPriority::Normal, 1_000);
    store.put_job(&job, false).await.unwrap();
    store.claim_next(&worker(), 4, 1_000).await.unwrap().unwrap();

    // Inside the stall window nothing moves.
    assert!(store.requeue_stalled(5_000, 2_000).await.unwrap().is_empty());

    let released = store.requeue_stalled(5_000, 7_000).await.unwrap();
    assert_eq!(released, vec![job.id.clone()]);

    let stored = store.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(stored.state, JobState::Waiting);
    assert_eq!(stored.claimed_by, None);
    assert_eq!(stored.last_error.as_deref(), Some("claim stalled past timeout"));

    let reclaimed = store.claim_next(&worker(), 4, 8_000).await.unwrap().unwrap();
    assert_eq!(reclaimed.attempts, 2);
}

#[tokio::test]
#[ignore = "needs a local Redis on 127.0.0.1:6379"]
async fn drain_discards_pending_and_frees_identities() {
    let store = backend(12).await;

    let first = job_at("acct-1", "campaign-1", JobPriority::Normal, 1_000);
    let second = job_at("acct-2", "campaign-2", JobPriority::Normal, 1_000);
    store.put_job(&first, false).await.unwrap();
    store.put_job(&second, false).await.unwrap();

    // Park whichever claims first so the delayed queue is drained too.
    let mut claimed = store
        .claim_next(&worker(), 4, 1_000)
        .await
        .unwrap()
        .unwrap();
    let parked_id = claimed.id.clone();
    claimed.delay("upstream 503", 9_000).unwrap();
    store.update_job(&claimed, JobState::Active, 1_500).await.unwrap();

    assert_eq!(store.drain_pending().await.unwrap(), 2);
    assert!(store.find_in_flight(&first.identity).await.unwrap().is_none());
    assert!(store.find_in_flight(&second.identity).await.unwrap().is_none());
    assert!(store.get_job(&parked_id).await.unwrap().is_none());

    let depths = store.queue_depths().await.unwrap();
    assert_eq!(depths.waiting + depths.delayed, 0);
}

#[tokio::test]
#[ignore = "needs a local Redis on 127.0.0.1:6379"]
async fn conditional_writes_expire_with_their_window() {
    let store = backend(13).await;

    let ledger = keys::rate_ledger("acct-1");
    assert!(store.kv_put_if_absent(&ledger, "1", 300, 0).await.unwrap());
    assert!(!store.kv_put_if_absent(&ledger, "1", 300, 0).await.unwrap());
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(store.kv_put_if_absent(&ledger, "1", 300, 0).await.unwrap());

    // The counter window opens on the first increment only.
    let failures = keys::breaker_failures("ads");
    assert_eq!(store.kv_incr_window(&failures, 300, 0).await.unwrap(), 1);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(store.kv_incr_window(&failures, 300, 0).await.unwrap(), 2);
    tokio::time::sleep(Duration::from_millis(200)).await;
    // 400ms after the window opened: expired despite the later increment.
    assert_eq!(store.kv_incr_window(&failures, 300, 0).await.unwrap(), 1);
}

#[tokio::test]
#[ignore = "needs a local Redis on 127.0.0.1:6379"]
async fn heartbeats_expire_out_of_the_listing() {
    let store = backend(14).await;

    let beat = Heartbeat::new(worker(), 1_000);
    store.put_heartbeat(&beat, 200, 1_000).await.unwrap();
    let listed = store.list_heartbeats(1_000).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].worker_id, worker());

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(store.list_heartbeats(2_000).await.unwrap().is_empty());
}

#[tokio::test]
#[ignore = "needs a local Redis on 127.0.0.1:6379"]
async fn cache_hit_counter_is_authoritative_over_the_snapshot() {
    let store = backend(15).await;
    let now_ms = SystemClock.epoch_ms();

    let key = CacheKey::new("campaign-1", "us", Device::All);
    let canonical = key.canonical();
    let entry = cache_entry_at(&key, now_ms, 60_000);
    store.cache_put(std::slice::from_ref(&entry), 30_000, now_ms).await.unwrap();

    assert_eq!(store.cache_record_hit(&canonical, now_ms).await.unwrap(), 1);
    assert_eq!(store.cache_record_hit(&canonical, now_ms).await.unwrap(), 2);
    let got = store.cache_get(&[canonical.clone()], now_ms).await.unwrap();
    assert_eq!(got[0].as_ref().unwrap().hit_count, 2);

    // A rewrite resets the counter to the snapshot it carries.
    let mut rewritten = cache_entry_at(&key, now_ms, 60_000);
    rewritten.hit_count = 2;
    store
        .cache_put(std::slice::from_ref(&rewritten), 30_000, now_ms)
        .await
        .unwrap();
    assert_eq!(store.cache_record_hit(&canonical, now_ms).await.unwrap(), 3);

    // Hits never resurrect a missing slot.
    let absent = CacheKey::new("campaign-9", "us", Device::All).canonical();
    assert_eq!(store.cache_record_hit(&absent, now_ms).await.unwrap(), 0);
}
