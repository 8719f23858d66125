// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process backend.
//!
//! One mutex over plain maps, with lazy expiry driven by the caller's
//! `now_ms`. This is the test backend and the single-process fallback;
//! it implements the same contracts as the shared-store backend, so
//! scheduler and breaker behavior can be exercised deterministically
//! without a server.

use crate::error::StoreError;
use crate::traits::{
    CacheStore, CoordinationStore, JobStore, PutOutcome, QueueDepths, RetentionPolicy,
};
use async_trait::async_trait;
use conveyor_core::{
    CacheEntry, Heartbeat, Identity, Job, JobError, JobId, JobState, WorkerId,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<JobId, Job>,
    /// In-flight identity marks: identity → owning job.
    identities: HashMap<Identity, JobId>,
    kv: HashMap<String, KvEntry>,
    heartbeats: HashMap<WorkerId, TimedHeartbeat>,
    cache: HashMap<String, CacheSlot>,
}

struct KvEntry {
    value: String,
    expires_at_ms: Option<u64>,
}

impl KvEntry {
    fn live(&self, now_ms: u64) -> bool {
        self.expires_at_ms.is_none_or(|at| now_ms < at)
    }
}

struct TimedHeartbeat {
    heartbeat: Heartbeat,
    expires_at_ms: u64,
}

struct CacheSlot {
    entry: CacheEntry,
    drop_at_ms: u64,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of jobs currently held, terminal ones included.
    pub fn job_count(&self) -> usize {
        self.inner.lock().jobs.len()
    }
}

fn transition(result: Result<(), JobError>) -> Result<(), StoreError> {
    result.map_err(|err| StoreError::backend(err.to_string()))
}

impl Inner {
    fn active_count(&self) -> usize {
        self.jobs
            .values()
            .filter(|j| j.state == JobState::Active)
            .count()
    }

    fn release_identity_of(&mut self, job: &Job) {
        if self.identities.get(&job.identity) == Some(&job.id) {
            self.identities.remove(&job.identity);
        }
    }

    /// Promote delayed jobs whose retry time has come.
    fn promote_due(&mut self, now_ms: u64) -> Result<(), StoreError> {
        let due: Vec<JobId> = self
            .jobs
            .values()
            .filter(|j| {
                j.state == JobState::Delayed && j.not_before_ms.is_some_and(|at| at <= now_ms)
            })
            .map(|j| j.id.clone())
            .collect();
        for id in due {
            if let Some(job) = self.jobs.get_mut(&id) {
                transition(job.promote())?;
            }
        }
        Ok(())
    }

    /// Prune one terminal bucket; returns removed ids.
    fn prune_bucket(
        &mut self,
        state: JobState,
        retention_ms: u64,
        keep_count: usize,
        now_ms: u64,
    ) -> u64 {
        let mut aged: Vec<JobId> = self
            .jobs
            .values()
            .filter(|j| {
                j.state == state
                    && j.finished_at_ms
                        .is_some_and(|at| at.saturating_add(retention_ms) <= now_ms)
            })
            .map(|j| j.id.clone())
            .collect();
        for id in &aged {
            self.jobs.remove(id);
        }

        // Enforce the keep count on what survived, oldest out first.
        let mut rest: Vec<(u64, JobId)> = self
            .jobs
            .values()
            .filter(|j| j.state == state)
            .map(|j| (j.finished_at_ms.unwrap_or(0), j.id.clone()))
            .collect();
        if rest.len() > keep_count {
            rest.sort();
            let excess = rest.len() - keep_count;
            for (_, id) in rest.into_iter().take(excess) {
                self.jobs.remove(&id);
                aged.push(id);
            }
        }
        aged.len() as u64
    }
}

#[async_trait]
impl JobStore for MemoryBackend {
    async fn put_job(&self, job: &Job, overwrite_identity: bool) -> Result<PutOutcome, StoreError> {
        let mut inner = self.inner.lock();
        if !overwrite_identity {
            if let Some(owner) = inner.identities.get(&job.identity) {
                return Ok(PutOutcome::DuplicateOf(owner.clone()));
            }
        }
        inner
            .identities
            .insert(job.identity.clone(), job.id.clone());
        inner.jobs.insert(job.id.clone(), job.clone());
        Ok(PutOutcome::Inserted)
    }

    async fn claim_next(
        &self,
        worker: &WorkerId,
        max_active: usize,
        now_ms: u64,
    ) -> Result<Option<Job>, StoreError> {
        let mut inner = self.inner.lock();
        inner.promote_due(now_ms)?;
        if inner.active_count() >= max_active {
            return Ok(None);
        }
        let next = inner
            .jobs
            .values()
            .filter(|j| j.state == JobState::Waiting)
            .map(|j| (j.priority.rank(), j.enqueued_at_ms, j.id.clone()))
            .min_by(|a, b| {
                (a.0, a.1, a.2.as_str()).cmp(&(b.0, b.1, b.2.as_str()))
            });
        let Some((_, _, id)) = next else {
            return Ok(None);
        };
        let Some(job) = inner.jobs.get_mut(&id) else {
            return Ok(None);
        };
        transition(job.claim(worker.clone(), now_ms))?;
        Ok(Some(job.clone()))
    }

    async fn update_job(&self, job: &Job, _prev: JobState, _now_ms: u64) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if job.state.is_terminal() {
            inner.release_identity_of(job);
        }
        inner.jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn get_job(&self, id: &JobId) -> Result<Option<Job>, StoreError> {
        Ok(self.inner.lock().jobs.get(id).cloned())
    }

    async fn find_in_flight(&self, identity: &Identity) -> Result<Option<Job>, StoreError> {
        let inner = self.inner.lock();
        let Some(id) = inner.identities.get(identity) else {
            return Ok(None);
        };
        Ok(inner.jobs.get(id).filter(|j| j.is_in_flight()).cloned())
    }

    async fn queue_depths(&self) -> Result<QueueDepths, StoreError> {
        let inner = self.inner.lock();
        let mut depths = QueueDepths::default();
        for job in inner.jobs.values() {
            match job.state {
                JobState::Waiting => depths.waiting += 1,
                JobState::Active => depths.active += 1,
                JobState::Delayed => depths.delayed += 1,
                JobState::Completed => depths.completed += 1,
                JobState::Failed => depths.failed += 1,
            }
        }
        Ok(depths)
    }

    async fn requeue_stalled(
        &self,
        stall_timeout_ms: u64,
        now_ms: u64,
    ) -> Result<Vec<JobId>, StoreError> {
        let mut inner = self.inner.lock();
        let stalled: Vec<JobId> = inner
            .jobs
            .values()
            .filter(|j| {
                j.state == JobState::Active
                    && j.claimed_at_ms
                        .is_some_and(|at| at.saturating_add(stall_timeout_ms) <= now_ms)
            })
            .map(|j| j.id.clone())
            .collect();
        for id in &stalled {
            if let Some(job) = inner.jobs.get_mut(id) {
                transition(job.release("claim stalled past timeout"))?;
            }
        }
        Ok(stalled)
    }

    async fn prune_terminal(
        &self,
        policy: &RetentionPolicy,
        now_ms: u64,
    ) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock();
        let completed = inner.prune_bucket(
            JobState::Completed,
            policy.completed_retention_ms,
            policy.completed_keep_count,
            now_ms,
        );
        let failed = inner.prune_bucket(
            JobState::Failed,
            policy.failed_retention_ms,
            policy.failed_keep_count,
            now_ms,
        );
        Ok(completed + failed)
    }

    async fn drain_pending(&self) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock();
        let pending: Vec<Job> = inner
            .jobs
            .values()
            .filter(|j| matches!(j.state, JobState::Waiting | JobState::Delayed))
            .cloned()
            .collect();
        for job in &pending {
            inner.release_identity_of(job);
            inner.jobs.remove(&job.id);
        }
        Ok(pending.len() as u64)
    }
}

#[async_trait]
impl CoordinationStore for MemoryBackend {
    async fn kv_put_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl_ms: u64,
        now_ms: u64,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        if inner.kv.get(key).is_some_and(|e| e.live(now_ms)) {
            return Ok(false);
        }
        inner.kv.insert(
            key.to_owned(),
            KvEntry {
                value: value.to_owned(),
                expires_at_ms: Some(now_ms.saturating_add(ttl_ms)),
            },
        );
        Ok(true)
    }

    async fn kv_put(
        &self,
        key: &str,
        value: &str,
        ttl_ms: Option<u64>,
        now_ms: u64,
    ) -> Result<(), StoreError> {
        self.inner.lock().kv.insert(
            key.to_owned(),
            KvEntry {
                value: value.to_owned(),
                expires_at_ms: ttl_ms.map(|ttl| now_ms.saturating_add(ttl)),
            },
        );
        Ok(())
    }

    async fn kv_get(&self, key: &str, now_ms: u64) -> Result<Option<String>, StoreError> {
        Ok(self
            .inner
            .lock()
            .kv
            .get(key)
            .filter(|e| e.live(now_ms))
            .map(|e| e.value.clone()))
    }

    async fn kv_delete(&self, key: &str) -> Result<(), StoreError> {
        self.inner.lock().kv.remove(key);
        Ok(())
    }

    async fn kv_incr_window(
        &self,
        key: &str,
        window_ms: u64,
        now_ms: u64,
    ) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock();
        match inner.kv.get_mut(key) {
            Some(entry) if entry.live(now_ms) => {
                let count = entry.value.parse::<u64>().unwrap_or(0).saturating_add(1);
                entry.value = count.to_string();
                Ok(count)
            }
            _ => {
                inner.kv.insert(
                    key.to_owned(),
                    KvEntry {
                        value: "1".to_owned(),
                        expires_at_ms: Some(now_ms.saturating_add(window_ms)),
                    },
                );
                Ok(1)
            }
        }
    }

    async fn put_heartbeat(
        &self,
        heartbeat: &Heartbeat,
        ttl_ms: u64,
        now_ms: u64,
    ) -> Result<(), StoreError> {
        self.inner.lock().heartbeats.insert(
            heartbeat.worker_id.clone(),
            TimedHeartbeat {
                heartbeat: heartbeat.clone(),
                expires_at_ms: now_ms.saturating_add(ttl_ms),
            },
        );
        Ok(())
    }

    async fn list_heartbeats(&self, now_ms: u64) -> Result<Vec<Heartbeat>, StoreError> {
        let mut inner = self.inner.lock();
        inner.heartbeats.retain(|_, t| now_ms < t.expires_at_ms);
        let mut beats: Vec<Heartbeat> = inner
            .heartbeats
            .values()
            .map(|t| t.heartbeat.clone())
            .collect();
        beats.sort_by(|a, b| a.worker_id.as_str().cmp(b.worker_id.as_str()));
        Ok(beats)
    }
}

#[async_trait]
impl CacheStore for MemoryBackend {
    async fn cache_get(
        &self,
        keys: &[String],
        now_ms: u64,
    ) -> Result<Vec<Option<CacheEntry>>, StoreError> {
        let inner = self.inner.lock();
        Ok(keys
            .iter()
            .map(|key| {
                inner
                    .cache
                    .get(key)
                    .filter(|slot| now_ms < slot.drop_at_ms)
                    .map(|slot| slot.entry.clone())
            })
            .collect())
    }

    async fn cache_put(
        &self,
        entries: &[CacheEntry],
        keep_extra_ms: u64,
        _now_ms: u64,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        for entry in entries {
            inner.cache.insert(
                entry.key.canonical(),
                CacheSlot {
                    entry: entry.clone(),
                    drop_at_ms: entry.expires_at_ms.saturating_add(keep_extra_ms),
                },
            );
        }
        Ok(())
    }

    async fn cache_record_hit(&self, key: &str, now_ms: u64) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock();
        match inner.cache.get_mut(key) {
            Some(slot) if now_ms < slot.drop_at_ms => {
                slot.entry.hit_count = slot.entry.hit_count.saturating_add(1);
                Ok(u64::from(slot.entry.hit_count))
            }
            _ => Ok(0),
        }
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
