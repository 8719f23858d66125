// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Claim-and-fetch worker loop.
//!
//! A worker claims one job at a time, resolves its fetcher by
//! provider, runs the fetch through that provider's circuit breaker,
//! and reports the disposition back through the scheduler. The fetched
//! batch must land in the cache before the job may complete; a cache
//! write refusal reads as a retryable failure so the data is never
//! silently dropped.
//!
//! Liveness runs on a separate loop: the worker rewrites its heartbeat
//! record on an interval, and stops being listed once the record's
//! expiry lapses.

use crate::breaker::{BreakerError, CircuitBreaker};
use crate::error::EngineError;
use crate::registry::{FetchBatch, FetcherRegistry};
use crate::scheduler::Scheduler;
use conveyor_cache::{CacheWrite, FreshnessCache};
use conveyor_core::{BreakerConfig, Clock, Heartbeat, Job, WorkerConfig, WorkerId};
use conveyor_store::{CacheStore, CoordinationStore, JobStore};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct Worker<S, C: Clock> {
    id: WorkerId,
    scheduler: Arc<Scheduler<S, C>>,
    registry: Arc<FetcherRegistry>,
    cache: Arc<FreshnessCache<C>>,
    store: Arc<S>,
    breaker_config: BreakerConfig,
    config: WorkerConfig,
    clock: C,
    heartbeat: Mutex<Heartbeat>,
}

impl<S, C> Worker<S, C>
where
    S: JobStore + CoordinationStore + CacheStore + Send + Sync + 'static,
    C: Clock + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        scheduler: Arc<Scheduler<S, C>>,
        registry: Arc<FetcherRegistry>,
        cache: Arc<FreshnessCache<C>>,
        store: Arc<S>,
        breaker_config: BreakerConfig,
        config: WorkerConfig,
        clock: C,
    ) -> Self {
        let id = WorkerId::new();
        let heartbeat = Mutex::new(Heartbeat::new(id.clone(), clock.epoch_ms()));
        Self {
            id,
            scheduler,
            registry,
            cache,
            store,
            breaker_config,
            config,
            clock,
            heartbeat,
        }
    }

    pub fn id(&self) -> &WorkerId {
        &self.id
    }

    /// Claim and process jobs until cancelled. Idles briefly when the
    /// queue has nothing runnable or the store refuses the claim.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        tracing::info!(worker = %self.id, "worker started");
        loop {
            if cancel.is_cancelled() {
                break;
            }
            match self.scheduler.claim(&self.id).await {
                Ok(Some(job)) => self.process(job).await,
                Ok(None) => {
                    if !self.wait_idle(&cancel).await {
                        break;
                    }
                }
                Err(err) => {
                    tracing::warn!(worker = %self.id, error = %err, "claim failed");
                    if !self.wait_idle(&cancel).await {
                        break;
                    }
                }
            }
        }
        tracing::info!(worker = %self.id, "worker stopped");
    }

    /// Sleep out the idle backoff. False when cancelled mid-sleep.
    async fn wait_idle(&self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(Duration::from_millis(self.config.idle_backoff_ms)) => true,
        }
    }

    /// Run one claimed job to a disposition.
    async fn process(&self, mut job: Job) {
        let provider = job.payload.provider.clone();
        tracing::debug!(
            worker = %self.id,
            job = %job.id,
            provider = %provider,
            attempt = job.attempts,
            "processing job"
        );

        let Some(fetcher) = self.registry.get(&provider) else {
            let error = format!("no fetcher registered for provider {provider}");
            let disposition = self.scheduler.fail_permanently(&mut job, error).await;
            self.record(&job, disposition);
            return;
        };

        let breaker = CircuitBreaker::new(
            provider,
            self.breaker_config.clone(),
            Arc::clone(&self.store),
            self.clock.clone(),
        );
        let payload = job.payload.clone();
        let outcome = breaker.execute(|| fetcher.fetch(&payload)).await;

        let disposition = match outcome {
            Ok(batch) => self.land(&mut job, batch).await,
            Err(BreakerError::Open { open_until_ms, .. }) => {
                // Never park for less than one idle backoff, or a
                // nearly-elapsed cooldown turns into a busy loop.
                let wake_ms =
                    open_until_ms.max(self.clock.epoch_ms() + self.config.idle_backoff_ms);
                self.scheduler.park(&mut job, "circuit open", wake_ms).await
            }
            Err(BreakerError::Timeout { timeout_ms, .. }) => self
                .scheduler
                .retry_or_fail(&mut job, format!("fetch timed out after {timeout_ms}ms"))
                .await
                .map(|_| ()),
            Err(BreakerError::Upstream(err)) if err.is_retryable() => self
                .scheduler
                .retry_or_fail(&mut job, err.to_string())
                .await
                .map(|_| ()),
            Err(BreakerError::Upstream(err)) => {
                self.scheduler.fail_permanently(&mut job, err.to_string()).await
            }
            Err(BreakerError::Store(err)) => self
                .scheduler
                .retry_or_fail(&mut job, format!("breaker state unavailable: {err}"))
                .await
                .map(|_| ()),
        };
        self.record(&job, disposition);
    }

    fn record(&self, job: &Job, disposition: Result<(), EngineError>) {
        if let Err(err) = disposition {
            tracing::error!(
                worker = %self.id,
                job = %job.id,
                error = %err,
                "failed to record job disposition"
            );
        }
    }

    /// Persist a fetched batch, then complete the job.
    async fn land(&self, job: &mut Job, batch: FetchBatch) -> Result<(), EngineError> {
        if !batch.skipped.is_empty() {
            tracing::warn!(
                worker = %self.id,
                job = %job.id,
                skipped = batch.skipped.len(),
                "fetch skipped rows"
            );
        }
        let source = job.payload.provider.clone();
        let writes: Vec<CacheWrite> = batch
            .records
            .into_iter()
            .map(|record| CacheWrite::new(record.key, record.value, source.clone()))
            .collect();
        let landed = writes.len();
        if let Err(err) = self.cache.store(self.store.as_ref(), writes).await {
            self.scheduler
                .retry_or_fail(job, format!("failed to persist fetched batch: {err}"))
                .await?;
            return Ok(());
        }
        self.scheduler.complete(job).await?;
        self.heartbeat.lock().record_processed();
        tracing::debug!(worker = %self.id, job = %job.id, records = landed, "batch landed");
        Ok(())
    }

    /// Publish heartbeats until cancelled. Beats once up front so the
    /// worker is visible the moment it starts.
    pub async fn run_heartbeat(self: Arc<Self>, cancel: CancellationToken) {
        self.beat().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(Duration::from_millis(self.config.heartbeat_interval_ms)) => {
                    self.beat().await;
                }
            }
        }
    }

    async fn beat(&self) {
        let now_ms = self.clock.epoch_ms();
        let beat = {
            let mut heartbeat = self.heartbeat.lock();
            heartbeat.touch(now_ms);
            heartbeat.clone()
        };
        if let Err(err) = self
            .store
            .put_heartbeat(&beat, self.config.heartbeat_ttl_ms, now_ms)
            .await
        {
            tracing::warn!(worker = %self.id, error = %err, "heartbeat publish failed");
        }
    }
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
