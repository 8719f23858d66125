// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! conveyor-store: backends for the shared backing store.
//!
//! The scheduler, breaker, rate limiter, and cache all persist through
//! the three ports in [`traits`]. [`MemoryBackend`] implements them
//! in-process for tests and single-process use; the `redis-backend`
//! feature adds the shared-store implementation. [`ConnectionManager`]
//! owns the one logical connection and the reconnect policy around it.

pub mod connection;
pub mod error;
pub mod keys;
pub mod memory;
#[cfg(feature = "redis-backend")]
pub mod redis_backend;
pub mod traits;

pub use connection::{
    Connect, ConnectionHandle, ConnectionManager, ConnectionStatus, NoConnection,
};
pub use error::StoreError;
pub use memory::MemoryBackend;
#[cfg(feature = "redis-backend")]
pub use redis_backend::{RedisBackend, RedisConnect};
pub use traits::{
    CacheStore, CoordinationStore, JobStore, PutOutcome, QueueDepths, RetentionPolicy,
};
