// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Backend ports.
//!
//! Three traits split the backing store by concern: the job queue,
//! coordination records (rate ledger, breaker state, heartbeats,
//! pause flag), and the persisted cache tier. A production backend
//! implements all three against one shared store; tests swap in the
//! in-process [`MemoryBackend`](crate::MemoryBackend).
//!
//! Every time-dependent method takes an explicit `now_ms` so backends
//! never read a clock of their own. That keeps expiry and windowing
//! deterministic under a fake clock and pins authority for "now" in
//! exactly one place, the caller.

use crate::error::StoreError;
use async_trait::async_trait;
use conveyor_core::{
    CacheEntry, Heartbeat, Identity, Job, JobId, JobState, SchedulerConfig, WorkerId,
};
use serde::Serialize;

/// Outcome of a conditional insert keyed by job identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutOutcome {
    Inserted,
    /// The identity is already held by an in-flight job.
    DuplicateOf(JobId),
}

/// Queue population by state, for the status surface.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueDepths {
    pub waiting: usize,
    pub active: usize,
    pub delayed: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Retention rules for terminal jobs. A job is pruned when it is
/// older than the retention window, or when its state bucket exceeds
/// the keep count (oldest first).
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    pub completed_retention_ms: u64,
    pub completed_keep_count: usize,
    pub failed_retention_ms: u64,
    pub failed_keep_count: usize,
}

impl From<&SchedulerConfig> for RetentionPolicy {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            completed_retention_ms: config.completed_retention_ms,
            completed_keep_count: config.completed_keep_count,
            failed_retention_ms: config.failed_retention_ms,
            failed_keep_count: config.failed_keep_count,
        }
    }
}

/// Durable job queue. The store, not process memory, is the source of
/// truth for job state and identity marks, so a restarted process
/// resumes exactly where the records say it left off.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new job iff its identity is not already held by an
    /// in-flight job. With `overwrite_identity` the mark is taken
    /// unconditionally (forced refresh path).
    ///
    /// The identity check and the insert are one atomic step.
    async fn put_job(&self, job: &Job, overwrite_identity: bool) -> Result<PutOutcome, StoreError>;

    /// Claim the next runnable job for `worker`, or `None` when the
    /// queue is empty or `max_active` jobs are already claimed.
    ///
    /// Atomically: promotes delayed jobs whose retry time has come,
    /// enforces the global concurrency ceiling, picks high priority
    /// before normal and oldest first within a priority, and records
    /// the claim (state, worker, claim time, attempt count) before
    /// returning.
    async fn claim_next(
        &self,
        worker: &WorkerId,
        max_active: usize,
        now_ms: u64,
    ) -> Result<Option<Job>, StoreError>;

    /// Write back a mutated job. `prev` names the state the job held
    /// in the store before the mutation, so indexed backends can move
    /// it between queues without a read. Entering a terminal state
    /// releases the job's identity mark iff the mark still points at
    /// this job.
    async fn update_job(&self, job: &Job, prev: JobState, now_ms: u64) -> Result<(), StoreError>;

    async fn get_job(&self, id: &JobId) -> Result<Option<Job>, StoreError>;

    /// The in-flight job holding `identity`, if any.
    async fn find_in_flight(&self, identity: &Identity) -> Result<Option<Job>, StoreError>;

    async fn queue_depths(&self) -> Result<QueueDepths, StoreError>;

    /// Return claimed jobs whose claim is older than `stall_timeout_ms`
    /// to the waiting queue and report their ids. The spent attempt
    /// stays counted.
    async fn requeue_stalled(
        &self,
        stall_timeout_ms: u64,
        now_ms: u64,
    ) -> Result<Vec<JobId>, StoreError>;

    /// Drop terminal jobs past retention. Returns how many went.
    async fn prune_terminal(&self, policy: &RetentionPolicy, now_ms: u64)
        -> Result<u64, StoreError>;

    /// Discard every waiting and delayed job and release their
    /// identity marks. Active jobs are left to finish. Returns how
    /// many jobs were discarded.
    async fn drain_pending(&self) -> Result<u64, StoreError>;
}

/// Coordination records: a small expiring key-value schema (see
/// [`crate::keys`]) plus worker heartbeats. The rate limiter and the
/// circuit breaker are built entirely from these conditional
/// operations, so any number of processes sharing the store converge
/// on one decision.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Bind `value` to `key` only if the key is absent or expired,
    /// with a `ttl_ms` expiry. Returns true when the write landed.
    /// This is a single conditional operation on the backend.
    async fn kv_put_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl_ms: u64,
        now_ms: u64,
    ) -> Result<bool, StoreError>;

    /// Unconditional write, with optional expiry.
    async fn kv_put(
        &self,
        key: &str,
        value: &str,
        ttl_ms: Option<u64>,
        now_ms: u64,
    ) -> Result<(), StoreError>;

    /// Read a live value. Expired keys read as absent.
    async fn kv_get(&self, key: &str, now_ms: u64) -> Result<Option<String>, StoreError>;

    async fn kv_delete(&self, key: &str) -> Result<(), StoreError>;

    /// Increment the windowed counter at `key` and return the count
    /// after the increment. An absent or expired key starts a fresh
    /// window that expires `window_ms` later; increments within the
    /// window do not extend it.
    async fn kv_incr_window(
        &self,
        key: &str,
        window_ms: u64,
        now_ms: u64,
    ) -> Result<u64, StoreError>;

    /// Publish a worker heartbeat with an expiry.
    async fn put_heartbeat(
        &self,
        heartbeat: &Heartbeat,
        ttl_ms: u64,
        now_ms: u64,
    ) -> Result<(), StoreError>;

    /// Live heartbeats, ordered by worker id. Expired ones are gone.
    async fn list_heartbeats(&self, now_ms: u64) -> Result<Vec<Heartbeat>, StoreError>;
}

/// Persisted cache tier. Keys are canonical cache-key strings; the
/// freshness logic lives above this trait, so the store only holds
/// and expires records.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch entries for `keys`, position for position. Unknown keys
    /// yield `None`.
    async fn cache_get(
        &self,
        keys: &[String],
        now_ms: u64,
    ) -> Result<Vec<Option<CacheEntry>>, StoreError>;

    /// Store entries. The backend keeps each entry until
    /// `expires_at_ms + keep_extra_ms`, covering the stale-serving
    /// grace window, and may drop it afterwards.
    async fn cache_put(
        &self,
        entries: &[CacheEntry],
        keep_extra_ms: u64,
        now_ms: u64,
    ) -> Result<(), StoreError>;

    /// Count one hit against `key` if present. Returns the hit count
    /// after the increment, or 0 when the entry is gone.
    async fn cache_record_hit(&self, key: &str, now_ms: u64) -> Result<u64, StoreError>;
}
