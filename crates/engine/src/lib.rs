// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! conveyor-engine: scheduling and resilience on top of the store.
//!
//! The pieces compose bottom-up: the [`RateLimiter`] and
//! [`CircuitBreaker`] coordinate through backend records, the
//! [`Scheduler`] handles admission and retry, [`Worker`]s claim jobs
//! and run fetches from the [`FetcherRegistry`] through the breaker,
//! and the [`SyncSupervisor`] wires all of it together behind the
//! public API.

pub mod breaker;
pub mod error;
pub mod rate_limit;
pub mod registry;
pub mod scheduler;
pub mod status;
pub mod supervisor;
pub mod worker;

pub use breaker::{BreakerError, BreakerState, BreakerStats, CircuitBreaker};
pub use error::EngineError;
pub use rate_limit::RateLimiter;
pub use registry::{FetchBatch, FetchError, Fetcher, FetcherRegistry, FetchedRecord};
pub use scheduler::{EnqueueOutcome, JobHandle, RetryDecision, Scheduler};
pub use status::{SyncStatus, WorkerStatus};
pub use supervisor::{ReadRequest, SyncSupervisor};
pub use worker::Worker;
