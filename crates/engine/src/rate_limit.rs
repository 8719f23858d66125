// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-owner admission rate limiting.
//!
//! One conditional write per decision: admitting an owner binds its
//! ledger key for the minimum interval, and any enqueue that finds the
//! key live is refused. A refusal writes nothing, so it can never push
//! back the next legitimate admission. High-priority work skips the
//! ledger in both directions: always admitted, never recorded, so a
//! manual refresh neither drops nor delays scheduled work.

use conveyor_core::JobPriority;
use conveyor_store::{keys, CoordinationStore, StoreError};
use std::sync::Arc;

pub struct RateLimiter<S> {
    store: Arc<S>,
    min_interval_ms: u64,
}

impl<S: CoordinationStore> RateLimiter<S> {
    pub fn new(store: Arc<S>, min_interval_ms: u64) -> Self {
        Self {
            store,
            min_interval_ms,
        }
    }

    /// Decide admission for `owner`. `true` admits. Refusal is an
    /// expected outcome, reported at debug level only.
    pub async fn admit(
        &self,
        owner: &str,
        priority: JobPriority,
        now_ms: u64,
    ) -> Result<bool, StoreError> {
        if priority == JobPriority::High || self.min_interval_ms == 0 {
            return Ok(true);
        }
        let admitted = self
            .store
            .kv_put_if_absent(
                &keys::rate_ledger(owner),
                &now_ms.to_string(),
                self.min_interval_ms,
                now_ms,
            )
            .await?;
        if !admitted {
            tracing::debug!(owner, "admission rate-limited");
        }
        Ok(admitted)
    }
}

#[cfg(test)]
#[path = "rate_limit_tests.rs"]
mod tests;
