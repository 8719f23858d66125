// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Admission and lifecycle control over the job queue.
//!
//! The scheduler is the only writer of job state. Admission runs the
//! gauntlet in a fixed order: pause flag, identity dedup, owner rate
//! ledger, then the atomic insert. Dedup is checked before the ledger
//! so a refused duplicate never burns the owner's admission window.
//! High-priority work (manual refresh) skips dedup and the ledger and
//! takes the identity mark by force.
//!
//! After a claim the worker reports back through exactly one of
//! [`Scheduler::complete`], [`Scheduler::retry_or_fail`],
//! [`Scheduler::fail_permanently`], or [`Scheduler::park`]; each
//! writes the job back in a single update.

use crate::error::EngineError;
use crate::rate_limit::RateLimiter;
use conveyor_core::{
    Clock, Identity, Job, JobId, JobPayload, JobPriority, JobState, SchedulerConfig, WorkerId,
};
use conveyor_store::{
    keys, CoordinationStore, JobStore, PutOutcome, QueueDepths, RetentionPolicy, StoreError,
};
use std::sync::Arc;

/// Handle to a job accepted at admission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub id: JobId,
    pub identity: Identity,
}

/// What became of an enqueue request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued(JobHandle),
    /// An in-flight job already holds this identity.
    Duplicate { existing: JobId },
    /// The owner is still inside its minimum admission interval.
    RateLimited,
    /// The queue is paused or the store refused; nothing was written.
    Unavailable,
}

/// Disposition picked for a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Delayed { not_before_ms: u64 },
    Failed,
}

pub struct Scheduler<S, C: Clock> {
    store: Arc<S>,
    limiter: RateLimiter<S>,
    config: SchedulerConfig,
    clock: C,
}

impl<S, C> Scheduler<S, C>
where
    S: JobStore + CoordinationStore,
    C: Clock,
{
    pub fn new(config: SchedulerConfig, store: Arc<S>, clock: C) -> Self {
        let limiter = RateLimiter::new(Arc::clone(&store), config.min_interval_ms);
        Self {
            store,
            limiter,
            config,
            clock,
        }
    }

    /// Admit a job, or say why not. Store trouble folds into
    /// [`EnqueueOutcome::Unavailable`] so callers on the read path are
    /// never failed by background admission.
    pub async fn enqueue(&self, payload: JobPayload, priority: JobPriority) -> EnqueueOutcome {
        match self.try_enqueue(payload, priority).await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::warn!(error = %err, "enqueue refused, store unavailable");
                EnqueueOutcome::Unavailable
            }
        }
    }

    async fn try_enqueue(
        &self,
        payload: JobPayload,
        priority: JobPriority,
    ) -> Result<EnqueueOutcome, StoreError> {
        let now_ms = self.clock.epoch_ms();
        if self.is_paused(now_ms).await? {
            tracing::debug!(owner = %payload.owner, "enqueue refused, queue paused");
            return Ok(EnqueueOutcome::Unavailable);
        }
        let job = Job::new(payload, priority, &self.clock);
        if priority == JobPriority::Normal {
            // Precheck only; the atomic insert below still rules if a
            // twin lands in the gap.
            if let Some(existing) = self.store.find_in_flight(&job.identity).await? {
                tracing::debug!(
                    identity = %job.identity,
                    existing = %existing.id,
                    "enqueue deduplicated"
                );
                return Ok(EnqueueOutcome::Duplicate {
                    existing: existing.id,
                });
            }
            if !self
                .limiter
                .admit(&job.payload.owner, priority, now_ms)
                .await?
            {
                return Ok(EnqueueOutcome::RateLimited);
            }
        }
        let overwrite = priority == JobPriority::High;
        match self.store.put_job(&job, overwrite).await? {
            PutOutcome::Inserted => {
                tracing::info!(
                    job = %job.id,
                    identity = %job.identity,
                    priority = %job.priority,
                    owner = %job.payload.owner,
                    "job enqueued"
                );
                Ok(EnqueueOutcome::Enqueued(JobHandle {
                    id: job.id,
                    identity: job.identity,
                }))
            }
            PutOutcome::DuplicateOf(existing) => {
                tracing::debug!(identity = %job.identity, existing = %existing, "enqueue deduplicated");
                Ok(EnqueueOutcome::Duplicate { existing })
            }
        }
    }

    /// Hand the next runnable job to `worker`. Claims nothing while
    /// the queue is paused; the global concurrency ceiling is enforced
    /// by the store.
    pub async fn claim(&self, worker: &WorkerId) -> Result<Option<Job>, StoreError> {
        let now_ms = self.clock.epoch_ms();
        if self.is_paused(now_ms).await? {
            return Ok(None);
        }
        self.store
            .claim_next(worker, self.config.max_concurrency, now_ms)
            .await
    }

    /// Active → Completed, written back.
    pub async fn complete(&self, job: &mut Job) -> Result<(), EngineError> {
        let now_ms = self.clock.epoch_ms();
        job.complete(now_ms)?;
        self.store.update_job(job, JobState::Active, now_ms).await?;
        tracing::info!(job = %job.id, attempts = job.attempts, "job completed");
        Ok(())
    }

    /// Back the job off for another attempt if the retry budget
    /// allows, otherwise fail it for good.
    pub async fn retry_or_fail(
        &self,
        job: &mut Job,
        error: impl Into<String>,
    ) -> Result<RetryDecision, EngineError> {
        let error = error.into();
        let now_ms = self.clock.epoch_ms();
        match self.config.retry.next_attempt_at_ms(job.attempts, now_ms) {
            Some(not_before_ms) => {
                job.delay(error.clone(), not_before_ms)?;
                self.store.update_job(job, JobState::Active, now_ms).await?;
                tracing::info!(
                    job = %job.id,
                    attempt = job.attempts,
                    not_before_ms,
                    error = %error,
                    "job delayed for retry"
                );
                Ok(RetryDecision::Delayed { not_before_ms })
            }
            None => {
                job.fail(error.clone(), now_ms)?;
                self.store.update_job(job, JobState::Active, now_ms).await?;
                tracing::warn!(
                    job = %job.id,
                    attempts = job.attempts,
                    error = %error,
                    "job failed, retry budget exhausted"
                );
                Ok(RetryDecision::Failed)
            }
        }
    }

    /// Fail without consulting the retry policy. For errors a retry
    /// cannot cure (no fetcher, upstream rejected the request).
    pub async fn fail_permanently(
        &self,
        job: &mut Job,
        error: impl Into<String>,
    ) -> Result<(), EngineError> {
        let error = error.into();
        let now_ms = self.clock.epoch_ms();
        job.fail(error.clone(), now_ms)?;
        self.store.update_job(job, JobState::Active, now_ms).await?;
        tracing::warn!(job = %job.id, error = %error, "job failed permanently");
        Ok(())
    }

    /// Park an active job until `not_before_ms` with its attempt
    /// handed back. For work turned away before the upstream was
    /// called, so the retry budget meters real attempts only.
    pub async fn park(
        &self,
        job: &mut Job,
        reason: impl Into<String>,
        not_before_ms: u64,
    ) -> Result<(), EngineError> {
        let reason = reason.into();
        let now_ms = self.clock.epoch_ms();
        job.defer(reason.clone(), not_before_ms)?;
        self.store.update_job(job, JobState::Active, now_ms).await?;
        tracing::debug!(job = %job.id, not_before_ms, reason = %reason, "job parked");
        Ok(())
    }

    /// Stop admissions and claims. The flag lives in the store, so it
    /// holds across every process sharing it and across restarts.
    pub async fn pause(&self) -> Result<(), StoreError> {
        self.store
            .kv_put(keys::PAUSED, "1", None, self.clock.epoch_ms())
            .await?;
        tracing::info!("queue paused");
        Ok(())
    }

    pub async fn resume(&self) -> Result<(), StoreError> {
        self.store.kv_delete(keys::PAUSED).await?;
        tracing::info!("queue resumed");
        Ok(())
    }

    pub async fn is_paused(&self, now_ms: u64) -> Result<bool, StoreError> {
        Ok(self.store.kv_get(keys::PAUSED, now_ms).await?.is_some())
    }

    /// Discard all waiting and delayed work. Active jobs are left to
    /// finish on their own.
    pub async fn drain(&self) -> Result<u64, StoreError> {
        let discarded = self.store.drain_pending().await?;
        tracing::info!(discarded, "queue drained");
        Ok(discarded)
    }

    pub async fn depths(&self) -> Result<QueueDepths, StoreError> {
        self.store.queue_depths().await
    }

    /// Return jobs whose claim went quiet to the waiting queue.
    pub async fn requeue_stalled(&self) -> Result<Vec<JobId>, StoreError> {
        let requeued = self
            .store
            .requeue_stalled(self.config.stall_timeout_ms, self.clock.epoch_ms())
            .await?;
        if !requeued.is_empty() {
            tracing::warn!(count = requeued.len(), "requeued stalled jobs");
        }
        Ok(requeued)
    }

    /// Drop terminal jobs past retention.
    pub async fn prune(&self) -> Result<u64, StoreError> {
        let pruned = self
            .store
            .prune_terminal(&RetentionPolicy::from(&self.config), self.clock.epoch_ms())
            .await?;
        if pruned > 0 {
            tracing::debug!(pruned, "pruned terminal jobs");
        }
        Ok(pruned)
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
