// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Composition root for the synchronization subsystem.
//!
//! [`SyncSupervisor::start`] builds the scheduler and cache over one
//! shared store, spawns the worker pool with its heartbeat loops plus
//! the stall-sweep and retention-prune maintenance loops, and exposes
//! the public surface: enqueue, read-through, status, and the pause /
//! resume / drain / close lifecycle controls.
//!
//! Shutdown is cooperative: [`SyncSupervisor::close`] cancels every
//! loop through one token tree, joins the tasks, then releases the
//! backend connection. Active jobs interrupted mid-fetch are not
//! awaited; the stall sweep of the next process returns them to the
//! queue.

use crate::breaker::CircuitBreaker;
use crate::registry::FetcherRegistry;
use crate::scheduler::{EnqueueOutcome, Scheduler};
use crate::status::{SyncStatus, WorkerStatus};
use crate::worker::Worker;
use conveyor_cache::{BatchLookup, FreshnessCache};
use conveyor_core::{CacheKey, Clock, JobPayload, JobPriority, SyncConfig};
use conveyor_store::{
    CacheStore, ConnectionHandle, CoordinationStore, JobStore, NoConnection, StoreError,
};
use futures_util::future::join_all;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// One read-through request: the key wanted from the cache and the
/// payload that refreshes it when it is stale or missing.
#[derive(Debug, Clone)]
pub struct ReadRequest {
    pub key: CacheKey,
    pub refresh: JobPayload,
}

impl ReadRequest {
    pub fn new(key: CacheKey, refresh: JobPayload) -> Self {
        Self { key, refresh }
    }
}

pub struct SyncSupervisor<S, C: Clock> {
    config: SyncConfig,
    store: Arc<S>,
    scheduler: Arc<Scheduler<S, C>>,
    registry: Arc<FetcherRegistry>,
    cache: Arc<FreshnessCache<C>>,
    connection: Arc<dyn ConnectionHandle>,
    clock: C,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl<S, C> SyncSupervisor<S, C>
where
    S: JobStore + CoordinationStore + CacheStore + Send + Sync + 'static,
    C: Clock + 'static,
{
    /// Start over an in-process backend, with no connection to manage.
    pub fn start(config: SyncConfig, store: Arc<S>, registry: FetcherRegistry, clock: C) -> Self {
        Self::start_with_connection(config, store, registry, Arc::new(NoConnection), clock)
    }

    /// Start the worker pool, heartbeats, and maintenance loops.
    pub fn start_with_connection(
        config: SyncConfig,
        store: Arc<S>,
        registry: FetcherRegistry,
        connection: Arc<dyn ConnectionHandle>,
        clock: C,
    ) -> Self {
        let scheduler = Arc::new(Scheduler::new(
            config.scheduler.clone(),
            Arc::clone(&store),
            clock.clone(),
        ));
        let registry = Arc::new(registry);
        let cache = Arc::new(FreshnessCache::new(config.cache.clone(), clock.clone()));
        let cancel = CancellationToken::new();
        let mut tasks = Vec::new();

        for _ in 0..config.worker.count {
            let worker = Arc::new(Worker::new(
                Arc::clone(&scheduler),
                Arc::clone(&registry),
                Arc::clone(&cache),
                Arc::clone(&store),
                config.breaker.clone(),
                config.worker.clone(),
                clock.clone(),
            ));
            tasks.push(tokio::spawn(Arc::clone(&worker).run(cancel.child_token())));
            tasks.push(tokio::spawn(worker.run_heartbeat(cancel.child_token())));
        }
        tasks.push(tokio::spawn(Self::sweep_loop(
            Arc::clone(&scheduler),
            config.worker.sweep_interval_ms,
            cancel.child_token(),
        )));
        tasks.push(tokio::spawn(Self::prune_loop(
            Arc::clone(&scheduler),
            config.worker.prune_interval_ms,
            cancel.child_token(),
        )));

        tracing::info!(
            workers = config.worker.count,
            providers = registry.len(),
            "sync supervisor started"
        );

        Self {
            config,
            store,
            scheduler,
            registry,
            cache,
            connection,
            clock,
            cancel,
            tasks: Mutex::new(tasks),
            closed: AtomicBool::new(false),
        }
    }

    async fn sweep_loop(
        scheduler: Arc<Scheduler<S, C>>,
        interval_ms: u64,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(Duration::from_millis(interval_ms)) => {
                    if let Err(err) = scheduler.requeue_stalled().await {
                        tracing::warn!(error = %err, "stall sweep failed");
                    }
                }
            }
        }
    }

    async fn prune_loop(
        scheduler: Arc<Scheduler<S, C>>,
        interval_ms: u64,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(Duration::from_millis(interval_ms)) => {
                    if let Err(err) = scheduler.prune().await {
                        tracing::warn!(error = %err, "retention prune failed");
                    }
                }
            }
        }
    }

    /// Submit a job for background execution.
    pub async fn enqueue(&self, payload: JobPayload, priority: JobPriority) -> EnqueueOutcome {
        if self.closed.load(Ordering::SeqCst) {
            return EnqueueOutcome::Unavailable;
        }
        self.scheduler.enqueue(payload, priority).await
    }

    /// Serve what the cache has, record the hits, and schedule a
    /// normal-priority refresh for every stale serve and miss.
    ///
    /// The admission gauntlet applies to the refreshes, so a burst of
    /// reads against one cold owner schedules one fetch, not a storm.
    pub async fn read_through(&self, requests: &[ReadRequest]) -> Result<BatchLookup, StoreError> {
        let keys: Vec<CacheKey> = requests.iter().map(|r| r.key.clone()).collect();
        let lookup = self.cache.lookup(self.store.as_ref(), &keys).await?;

        for entry in lookup.hits.iter().chain(lookup.stale.iter()) {
            if let Err(err) = self.cache.record_hit(self.store.as_ref(), &entry.key).await {
                tracing::debug!(key = %entry.key, error = %err, "hit record failed");
            }
        }

        let refresh: HashSet<String> = lookup
            .refresh_keys()
            .iter()
            .map(CacheKey::canonical)
            .collect();
        if refresh.is_empty() || self.closed.load(Ordering::SeqCst) {
            return Ok(lookup);
        }
        let mut scheduled = 0usize;
        for request in requests {
            if refresh.contains(&request.key.canonical()) {
                let outcome = self
                    .scheduler
                    .enqueue(request.refresh.clone(), JobPriority::Normal)
                    .await;
                if matches!(outcome, EnqueueOutcome::Enqueued(_)) {
                    scheduled += 1;
                }
            }
        }
        if scheduled > 0 {
            tracing::debug!(scheduled, "refresh jobs scheduled");
        }
        Ok(lookup)
    }

    /// Status snapshot across every concern.
    pub async fn status(&self) -> Result<SyncStatus, StoreError> {
        let now_ms = self.clock.epoch_ms();
        let queue = self.scheduler.depths().await?;
        let paused = self.scheduler.is_paused(now_ms).await?;

        let mut breakers = Vec::with_capacity(self.registry.len());
        for provider in self.registry.providers() {
            let breaker = CircuitBreaker::new(
                provider,
                self.config.breaker.clone(),
                Arc::clone(&self.store),
                self.clock.clone(),
            );
            breakers.push(breaker.stats().await?);
        }

        let workers = self
            .store
            .list_heartbeats(now_ms)
            .await?
            .iter()
            .map(|hb| {
                WorkerStatus::from_heartbeat(
                    hb,
                    now_ms,
                    self.config.worker.heartbeat_interval_ms,
                    self.config.worker.heartbeat_ttl_ms,
                )
            })
            .collect();

        Ok(SyncStatus {
            connection: self.connection.status(),
            paused,
            queue,
            breakers,
            workers,
            cache: self.cache.stats(),
        })
    }

    pub async fn pause(&self) -> Result<(), StoreError> {
        self.scheduler.pause().await
    }

    pub async fn resume(&self) -> Result<(), StoreError> {
        self.scheduler.resume().await
    }

    /// Discard all pending work. Active jobs finish on their own.
    pub async fn drain(&self) -> Result<u64, StoreError> {
        self.scheduler.drain().await
    }

    pub fn cache(&self) -> &FreshnessCache<C> {
        &self.cache
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Stop every loop, join them, and release the backend
    /// connection. Idempotent; later calls return immediately.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for result in join_all(tasks).await {
            if let Err(err) = result {
                tracing::warn!(error = %err, "background task ended abnormally");
            }
        }
        self.connection.close().await;
        tracing::info!("sync supervisor closed");
    }
}

impl<S, C: Clock> Drop for SyncSupervisor<S, C> {
    fn drop(&mut self) {
        // Close may never have been called; at least stop the loops.
        self.cancel.cancel();
    }
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod tests;
