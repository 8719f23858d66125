// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Key schema for the shared backing store.
//!
//! Every record the sync layer persists lives under the `cv:` prefix
//! so one store can be shared with other tenants. Both backends use
//! the same names; the memory backend keeps typed maps for jobs and
//! heartbeats but routes every coordination record through these keys
//! so the two stay interchangeable in tests.

use conveyor_core::{Identity, JobId, JobPriority, WorkerId};

/// Queue of claimable high-priority jobs.
pub const WAITING_HIGH: &str = "cv:jobs:waiting:high";
/// Queue of claimable normal-priority jobs.
pub const WAITING_NORMAL: &str = "cv:jobs:waiting:normal";
/// Jobs parked until a retry timestamp, scored by `not_before_ms`.
pub const DELAYED: &str = "cv:jobs:delayed";
/// Claimed jobs, scored by claim time for the stall sweep.
pub const ACTIVE: &str = "cv:jobs:active";
/// Terminal successes, scored by finish time for retention pruning.
pub const COMPLETED: &str = "cv:jobs:completed";
/// Terminal failures, scored by finish time for retention pruning.
pub const FAILED: &str = "cv:jobs:failed";

/// Worker-id index backing heartbeat listing.
pub const HEARTBEAT_INDEX: &str = "cv:hb:index";
/// Intake pause flag. Present means paused.
pub const PAUSED: &str = "cv:paused";

/// Prefix of per-job record keys. Scripts that walk queue sets build
/// record keys from this at runtime.
pub const JOB_PREFIX: &str = "cv:job:";
/// Prefix of identity mark keys.
pub const IDENT_PREFIX: &str = "cv:ident:";

pub fn job(id: &JobId) -> String {
    format!("{JOB_PREFIX}{id}")
}

/// In-flight identity mark. Holds the id of the job that owns the
/// identity; absence means the identity may be enqueued.
pub fn identity(identity: &Identity) -> String {
    format!("{IDENT_PREFIX}{identity}")
}

pub fn waiting_for(priority: JobPriority) -> &'static str {
    match priority {
        JobPriority::High => WAITING_HIGH,
        JobPriority::Normal => WAITING_NORMAL,
    }
}

/// Per-owner admission ledger entry for the rate limiter.
pub fn rate_ledger(owner: &str) -> String {
    format!("cv:rl:{owner}")
}

/// Failure counter for one dependency's breaker window.
pub fn breaker_failures(dependency: &str) -> String {
    format!("cv:cb:{dependency}:failures")
}

/// Timestamp until which the dependency's breaker stays open.
pub fn breaker_open(dependency: &str) -> String {
    format!("cv:cb:{dependency}:open")
}

/// Single-holder trial token for the half-open probe.
pub fn breaker_trial(dependency: &str) -> String {
    format!("cv:cb:{dependency}:trial")
}

pub fn heartbeat(worker: &WorkerId) -> String {
    format!("cv:hb:{worker}")
}

/// Persisted cache slot for one canonical cache key.
pub fn cache(canonical: &str) -> String {
    format!("cv:cache:{canonical}")
}

#[cfg(test)]
#[path = "keys_tests.rs"]
mod tests;
