//! Shared rig for the workspace specs.

pub use conveyor_core::{
    CacheKey, Clock, Device, FakeClock, Job, JobPayload, JobPriority, JobState, RetryPolicy,
    SchedulerConfig, SyncConfig, WorkerConfig, WorkerId,
};
pub use conveyor_engine::{
    BreakerState, EnqueueOutcome, FetchBatch, FetchError, Fetcher, FetchedRecord, FetcherRegistry,
    JobHandle, ReadRequest, SyncSupervisor,
};
pub use conveyor_store::{JobStore, MemoryBackend};
pub use std::sync::Arc;
pub use std::time::Duration;

use async_trait::async_trait;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};

/// Virtual-time polling attempts before a spec gives up.
pub const SPEC_WAIT_MAX_POLLS: u32 = 1_000;

/// Poll `check` under auto-advanced time until it holds.
pub async fn wait_for<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..SPEC_WAIT_MAX_POLLS {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

/// Fetcher that fails its first `fail_first` calls with a retryable
/// error, then emits one record per call keyed by the payload entity.
pub struct FlakyFetcher {
    provider: &'static str,
    fail_first: u32,
    calls: AtomicU32,
}

impl FlakyFetcher {
    pub fn new(provider: &'static str, fail_first: u32) -> Self {
        Self {
            provider,
            fail_first,
            calls: AtomicU32::new(0),
        }
    }

    pub fn reliable(provider: &'static str) -> Self {
        Self::new(provider, 0)
    }

    /// Fetches attempted so far.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for FlakyFetcher {
    fn provider(&self) -> &str {
        self.provider
    }

    async fn fetch(&self, payload: &JobPayload) -> Result<FetchBatch, FetchError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_first {
            return Err(FetchError::unavailable("scripted outage"));
        }
        Ok(FetchBatch::new(vec![FetchedRecord::new(
            entity_key(&payload.entity),
            serde_json::json!({ "call": call }),
        )]))
    }
}

/// Cache key the spec fetchers emit for an entity.
pub fn entity_key(entity: &str) -> CacheKey {
    CacheKey::new(entity, "all", Device::All)
}

/// Payload for `owner`/`entity` against the `ads` provider.
pub fn payload(owner: &str, entity: &str) -> JobPayload {
    JobPayload::builder()
        .provider("ads")
        .owner(owner)
        .entity(entity)
        .build()
}

/// Config tuned for virtual time: tiny loop intervals, deterministic
/// backoff, production-shaped windows everywhere else.
pub fn spec_config() -> SyncConfig {
    SyncConfig {
        scheduler: SchedulerConfig {
            retry: RetryPolicy {
                base_delay_ms: 1_000,
                max_delay_ms: 60_000,
                jitter_frac: 0.0,
                max_attempts: 3,
            },
            ..SchedulerConfig::default()
        },
        worker: WorkerConfig {
            count: 2,
            idle_backoff_ms: 5,
            heartbeat_interval_ms: 10,
            heartbeat_ttl_ms: 25,
            sweep_interval_ms: 50,
            prune_interval_ms: 50,
        },
        ..SyncConfig::default()
    }
}

pub struct SpecRig {
    pub store: Arc<MemoryBackend>,
    pub clock: FakeClock,
    pub sup: SyncSupervisor<MemoryBackend, FakeClock>,
}

/// Start a supervisor over a fresh in-process backend.
pub fn start_rig(config: SyncConfig, fetchers: Vec<Arc<dyn Fetcher>>) -> SpecRig {
    let store = Arc::new(MemoryBackend::new());
    let clock = FakeClock::new();
    let mut registry = FetcherRegistry::new();
    for fetcher in fetchers {
        registry.register(fetcher);
    }
    let sup = SyncSupervisor::start(config, Arc::clone(&store), registry, clock.clone());
    SpecRig { store, clock, sup }
}

/// Unwrap an accepted admission.
pub fn enqueued(outcome: EnqueueOutcome) -> JobHandle {
    match outcome {
        EnqueueOutcome::Enqueued(handle) => handle,
        other => panic!("expected Enqueued, got {other:?}"),
    }
}
