// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker identity and heartbeat records.
//!
//! A worker announces liveness by rewriting its heartbeat key with a
//! short expiry. Nothing deregisters a worker: a key that stops being
//! refreshed ages into `stale`, then `dead` (or disappears outright
//! once the backend expires it).

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use uuid::Uuid;

/// Identifier of one worker task or process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub SmolStr);

impl WorkerId {
    pub const PREFIX: &'static str = "wkr-";

    /// Generate a fresh random worker ID.
    pub fn new() -> Self {
        Self(SmolStr::new(format!(
            "{}{}",
            Self::PREFIX,
            Uuid::new_v4().simple()
        )))
    }

    pub fn from_string(id: impl Into<SmolStr>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for WorkerId {
    fn from(s: &str) -> Self {
        Self::from_string(s)
    }
}

impl From<String> for WorkerId {
    fn from(s: String) -> Self {
        Self::from_string(s)
    }
}

impl AsRef<str> for WorkerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for WorkerId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for WorkerId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Liveness classification of a worker, judged from heartbeat age.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerLiveness {
    /// Beating on schedule.
    Active,
    /// Missed at least one beat but the key has not expired yet.
    Stale,
    /// Past the heartbeat TTL.
    Dead,
}

impl WorkerLiveness {
    /// Classify a heartbeat by age. A worker gets one full missed beat
    /// of slack before it stops counting as active.
    pub fn classify(age_ms: u64, interval_ms: u64, ttl_ms: u64) -> Self {
        if age_ms <= interval_ms.saturating_mul(2) {
            WorkerLiveness::Active
        } else if age_ms <= ttl_ms {
            WorkerLiveness::Stale
        } else {
            WorkerLiveness::Dead
        }
    }
}

crate::simple_display! {
    WorkerLiveness {
        Active => "active",
        Stale => "stale",
        Dead => "dead",
    }
}

/// Ephemeral liveness record for one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub worker_id: WorkerId,
    pub last_seen_ms: u64,
    pub jobs_processed: u64,
}

impl Heartbeat {
    pub fn new(worker_id: WorkerId, now_ms: u64) -> Self {
        Self {
            worker_id,
            last_seen_ms: now_ms,
            jobs_processed: 0,
        }
    }

    /// Refresh the beat.
    pub fn touch(&mut self, now_ms: u64) {
        self.last_seen_ms = now_ms;
    }

    pub fn record_processed(&mut self) {
        self.jobs_processed += 1;
    }

    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.last_seen_ms)
    }

    pub fn liveness(&self, now_ms: u64, interval_ms: u64, ttl_ms: u64) -> WorkerLiveness {
        WorkerLiveness::classify(self.age_ms(now_ms), interval_ms, ttl_ms)
    }
}

#[cfg(test)]
#[path = "heartbeat_tests.rs"]
mod tests;
