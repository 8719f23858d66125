// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::registry::{FetchBatch, FetchError, Fetcher, FetchedRecord};
use crate::scheduler::JobHandle;
use async_trait::async_trait;
use conveyor_core::{Device, FakeClock, JobState, WorkerConfig};
use conveyor_store::MemoryBackend;
use std::future::Future;

struct Emit;

#[async_trait]
impl Fetcher for Emit {
    fn provider(&self) -> &str {
        "ads"
    }

    async fn fetch(&self, payload: &JobPayload) -> Result<FetchBatch, FetchError> {
        let key = CacheKey::new(&payload.entity, "us", Device::All);
        Ok(FetchBatch::new(vec![FetchedRecord::new(
            key,
            serde_json::json!({ "clicks": 7 }),
        )]))
    }
}

fn test_config() -> SyncConfig {
    SyncConfig {
        scheduler: conveyor_core::SchedulerConfig {
            min_interval_ms: 0,
            ..Default::default()
        },
        worker: WorkerConfig {
            count: 2,
            idle_backoff_ms: 5,
            heartbeat_interval_ms: 10,
            heartbeat_ttl_ms: 25,
            sweep_interval_ms: 50,
            prune_interval_ms: 50,
        },
        ..Default::default()
    }
}

fn supervisor(store: &Arc<MemoryBackend>, clock: &FakeClock) -> SyncSupervisor<MemoryBackend, FakeClock> {
    let mut registry = FetcherRegistry::new();
    registry.register(Arc::new(Emit));
    SyncSupervisor::start(test_config(), Arc::clone(store), registry, clock.clone())
}

/// Poll `check` under auto-advanced time until it holds.
async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..500 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

fn enqueued(outcome: EnqueueOutcome) -> JobHandle {
    match outcome {
        EnqueueOutcome::Enqueued(handle) => handle,
        other => panic!("expected Enqueued, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn enqueued_jobs_run_to_completion() {
    let store = Arc::new(MemoryBackend::new());
    let clock = FakeClock::new();
    let sup = supervisor(&store, &clock);

    let handle = enqueued(
        sup.enqueue(JobPayload::builder().build(), JobPriority::Normal)
            .await,
    );

    eventually(|| async {
        matches!(
            store.get_job(&handle.id).await.unwrap(),
            Some(job) if job.state == JobState::Completed
        )
    })
    .await;

    // The fetched record is servable and the workers are visible.
    let status = sup.status().await.unwrap();
    assert_eq!(status.queue.completed, 1);
    assert_eq!(status.workers.len(), 2);
    assert!(!status.paused);

    let key = CacheKey::new("campaign-1", "us", Device::All);
    let lookup = sup.cache().lookup(store.as_ref(), &[key]).await.unwrap();
    assert_eq!(lookup.hits.len(), 1);

    sup.close().await;
}

#[tokio::test(start_paused = true)]
async fn read_through_serves_after_the_refresh_lands() {
    let store = Arc::new(MemoryBackend::new());
    let clock = FakeClock::new();
    let sup = supervisor(&store, &clock);

    let request = ReadRequest::new(
        CacheKey::new("campaign-1", "us", Device::All),
        JobPayload::builder().build(),
    );

    // Cold read: a miss, with a refresh scheduled behind it.
    let first = sup.read_through(std::slice::from_ref(&request)).await.unwrap();
    assert_eq!(first.hits.len(), 0);
    assert_eq!(first.misses.len(), 1);

    eventually(|| async {
        sup.read_through(std::slice::from_ref(&request))
            .await
            .unwrap()
            .hits
            .len()
            == 1
    })
    .await;

    sup.close().await;
}

#[tokio::test(start_paused = true)]
async fn pause_refuses_work_until_resume() {
    let store = Arc::new(MemoryBackend::new());
    let clock = FakeClock::new();
    let sup = supervisor(&store, &clock);

    sup.pause().await.unwrap();
    assert!(sup.status().await.unwrap().paused);
    assert_eq!(
        sup.enqueue(JobPayload::builder().build(), JobPriority::Normal)
            .await,
        EnqueueOutcome::Unavailable
    );

    sup.resume().await.unwrap();
    let handle = enqueued(
        sup.enqueue(JobPayload::builder().build(), JobPriority::Normal)
            .await,
    );
    eventually(|| async {
        matches!(
            store.get_job(&handle.id).await.unwrap(),
            Some(job) if job.state == JobState::Completed
        )
    })
    .await;

    sup.close().await;
}

#[tokio::test(start_paused = true)]
async fn drain_discards_pending_jobs() {
    let store = Arc::new(MemoryBackend::new());
    let clock = FakeClock::new();
    let sup = supervisor(&store, &clock);

    // Paused first so the workers cannot race the drain.
    sup.pause().await.unwrap();
    store
        .put_job(
            &conveyor_core::Job::new_with_epoch_ms(
                JobPayload::builder().build(),
                JobPriority::Normal,
                clock.epoch_ms(),
            ),
            false,
        )
        .await
        .unwrap();

    assert_eq!(sup.drain().await.unwrap(), 1);
    assert_eq!(sup.status().await.unwrap().queue.waiting, 0);

    sup.close().await;
}

#[tokio::test(start_paused = true)]
async fn close_is_idempotent_and_refuses_later_work() {
    let store = Arc::new(MemoryBackend::new());
    let clock = FakeClock::new();
    let sup = supervisor(&store, &clock);

    sup.close().await;
    sup.close().await;

    assert_eq!(
        sup.enqueue(JobPayload::builder().build(), JobPriority::Normal)
            .await,
        EnqueueOutcome::Unavailable
    );
}
