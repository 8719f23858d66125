// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Aggregated status surface.
//!
//! Every field is an honest read taken at snapshot time: queue depths
//! from the store, breaker state derived from coordination records,
//! workers from their live heartbeats. Nothing here is cached, so the
//! snapshot can disagree with itself only as much as the store does.

use crate::breaker::BreakerStats;
use conveyor_cache::CacheStatsSnapshot;
use conveyor_core::{Heartbeat, WorkerId, WorkerLiveness};
use conveyor_store::{ConnectionStatus, QueueDepths};
use serde::Serialize;

/// One worker as seen through its last heartbeat.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub worker_id: WorkerId,
    pub liveness: WorkerLiveness,
    pub age_ms: u64,
    pub jobs_processed: u64,
}

impl WorkerStatus {
    pub fn from_heartbeat(
        heartbeat: &Heartbeat,
        now_ms: u64,
        interval_ms: u64,
        ttl_ms: u64,
    ) -> Self {
        Self {
            worker_id: heartbeat.worker_id.clone(),
            liveness: heartbeat.liveness(now_ms, interval_ms, ttl_ms),
            age_ms: heartbeat.age_ms(now_ms),
            jobs_processed: heartbeat.jobs_processed,
        }
    }
}

/// Snapshot of the whole subsystem.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub connection: ConnectionStatus,
    pub paused: bool,
    pub queue: QueueDepths,
    /// One entry per registered provider, sorted by dependency name.
    pub breakers: Vec<BreakerStats>,
    /// One entry per live heartbeat, sorted by worker id.
    pub workers: Vec<WorkerStatus>,
    pub cache: CacheStatsSnapshot,
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
