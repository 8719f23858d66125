// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! conveyor-core: domain model for the background sync layer.
//!
//! Pure, deterministic building blocks: the job record and its state
//! machine, identity computation, backoff policy, configuration, and
//! heartbeat records. No I/O lives here; everything is unit-testable
//! with a [`FakeClock`].

pub mod macros;

pub mod backoff;
pub mod cache_entry;
pub mod clock;
pub mod config;
pub mod heartbeat;
pub mod identity;
pub mod job;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use backoff::RetryPolicy;
pub use cache_entry::{effective_ttl_ms, CacheEntry, CacheKey, Device, Freshness};
pub use clock::{Clock, FakeClock, SystemClock};
pub use config::{
    BreakerConfig, CacheConfig, ConfigError, ConnectionConfig, SchedulerConfig, SyncConfig,
    WorkerConfig,
};
pub use heartbeat::{Heartbeat, WorkerId, WorkerLiveness};
pub use identity::{compute_identity, Identity};
#[cfg(any(test, feature = "test-support"))]
pub use job::JobPayloadBuilder;
pub use job::{
    ConversionMode, DateWindow, FilterOp, FilterPredicate, Job, JobError, JobId, JobPayload,
    JobPriority, JobState,
};
