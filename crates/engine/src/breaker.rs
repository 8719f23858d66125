// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-dependency circuit breaker.
//!
//! One breaker guards one upstream dependency, and its entire state
//! lives in backend records (failure counter, open mark, trial token),
//! so every worker sharing the store shares one view: the process that
//! sees the threshold trips the circuit for all of them, and exactly
//! one process runs the recovery trial.
//!
//! States, derived from the records at call time:
//! - *closed*: no open mark. Calls pass, each bounded by the call
//!   timeout. A failure increments the windowed counter; reaching the
//!   threshold writes the open mark.
//! - *open*: mark present, cooldown running. Calls fail fast with
//!   [`BreakerError::Open`] and never touch the failure window.
//! - *half-open*: mark present, cooldown elapsed. One caller wins the
//!   trial token and probes the upstream; everyone else is still
//!   rejected. Trial success deletes mark and counter; trial failure
//!   rewrites the mark with a fresh cooldown.

use conveyor_core::{BreakerConfig, Clock};
use conveyor_store::{keys, CoordinationStore, StoreError};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Breaker state as derived from the backend records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

conveyor_core::simple_display! {
    BreakerState {
        Closed => "closed",
        Open => "open",
        HalfOpen => "half_open",
    }
}

/// Error from a breaker-wrapped call.
#[derive(Debug, thiserror::Error)]
pub enum BreakerError<E> {
    /// The circuit is open; the upstream was never called.
    #[error("circuit open for {dependency} until {open_until_ms}")]
    Open {
        dependency: String,
        open_until_ms: u64,
    },
    /// The call outlived the call timeout. Counts as a failure.
    #[error("call to {dependency} timed out after {timeout_ms}ms")]
    Timeout { dependency: String, timeout_ms: u64 },
    /// The upstream itself failed. Counts as a failure.
    #[error("upstream failure: {0}")]
    Upstream(E),
    /// The backend holding breaker state is unreachable.
    #[error("breaker state unavailable: {0}")]
    Store(#[from] StoreError),
}

/// Open-circuit mark persisted per dependency. Present means the
/// circuit tripped and no trial has succeeded since.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct OpenMark {
    open_until_ms: u64,
    tripped_at_ms: u64,
}

/// Point-in-time view of one breaker, for the status surface.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStats {
    pub dependency: String,
    pub state: BreakerState,
    /// Failures recorded in the current window.
    pub failures: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_until_ms: Option<u64>,
    /// When the state last changed; `None` while the breaker has never
    /// tripped (or has fully recovered).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_transition_ms: Option<u64>,
}

/// What the breaker decided for one call.
enum Gate {
    /// Closed, call passes.
    Pass,
    /// Half-open and this caller holds the trial token.
    Trial,
    /// Open, or half-open with the trial already claimed elsewhere.
    Reject { open_until_ms: u64 },
}

/// Circuit breaker for one upstream dependency.
///
/// Cheap to construct: the value is only the dependency name, the
/// config, and handles. All shared state is in the store.
pub struct CircuitBreaker<S, C: Clock> {
    dependency: String,
    config: BreakerConfig,
    store: Arc<S>,
    clock: C,
}

impl<S, C> CircuitBreaker<S, C>
where
    S: CoordinationStore,
    C: Clock,
{
    pub fn new(dependency: impl Into<String>, config: BreakerConfig, store: Arc<S>, clock: C) -> Self {
        Self {
            dependency: dependency.into(),
            config,
            store,
            clock,
        }
    }

    pub fn dependency(&self) -> &str {
        &self.dependency
    }

    /// Run `op` through the breaker.
    ///
    /// The closure is only invoked when the circuit admits the call,
    /// and is always bounded by the configured call timeout.
    pub async fn execute<T, E, F, Fut>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let now_ms = self.clock.epoch_ms();
        let trial = match self.gate(now_ms).await? {
            Gate::Reject { open_until_ms } => {
                return Err(BreakerError::Open {
                    dependency: self.dependency.clone(),
                    open_until_ms,
                });
            }
            Gate::Trial => true,
            Gate::Pass => false,
        };

        let timeout_ms = self.config.call_timeout_ms;
        let outcome = tokio::time::timeout(Duration::from_millis(timeout_ms), op()).await;
        match outcome {
            Ok(Ok(value)) => {
                self.on_success(trial).await?;
                Ok(value)
            }
            Ok(Err(err)) => {
                self.on_failure(trial).await?;
                Err(BreakerError::Upstream(err))
            }
            Err(_) => {
                self.on_failure(trial).await?;
                Err(BreakerError::Timeout {
                    dependency: self.dependency.clone(),
                    timeout_ms,
                })
            }
        }
    }

    /// Read-only snapshot of this breaker. Never mutates records.
    pub async fn stats(&self) -> Result<BreakerStats, StoreError> {
        let now_ms = self.clock.epoch_ms();
        let failures = self
            .store
            .kv_get(&keys::breaker_failures(&self.dependency), now_ms)
            .await?
            .and_then(|raw| raw.parse::<u64>().ok())
            .unwrap_or(0);
        let (state, open_until_ms, last_transition_ms) = match self.open_mark(now_ms).await? {
            None => (BreakerState::Closed, None, None),
            Some(mark) if now_ms < mark.open_until_ms => (
                BreakerState::Open,
                Some(mark.open_until_ms),
                Some(mark.tripped_at_ms),
            ),
            // Cooldown elapsed: the state flipped to half-open at the
            // moment the mark's deadline passed.
            Some(mark) => (
                BreakerState::HalfOpen,
                Some(mark.open_until_ms),
                Some(mark.open_until_ms),
            ),
        };
        Ok(BreakerStats {
            dependency: self.dependency.clone(),
            state,
            failures,
            open_until_ms,
            last_transition_ms,
        })
    }

    async fn open_mark(&self, now_ms: u64) -> Result<Option<OpenMark>, StoreError> {
        let key = keys::breaker_open(&self.dependency);
        let Some(raw) = self.store.kv_get(&key, now_ms).await? else {
            return Ok(None);
        };
        Ok(serde_json::from_str(&raw)?)
    }

    async fn gate(&self, now_ms: u64) -> Result<Gate, StoreError> {
        let Some(mark) = self.open_mark(now_ms).await? else {
            return Ok(Gate::Pass);
        };
        if now_ms < mark.open_until_ms {
            return Ok(Gate::Reject {
                open_until_ms: mark.open_until_ms,
            });
        }
        // Cooldown elapsed. The token expires on its own so a caller
        // that dies mid-trial cannot wedge the circuit half-open.
        let token_ttl_ms = self.config.call_timeout_ms.saturating_mul(2);
        let won = self
            .store
            .kv_put_if_absent(
                &keys::breaker_trial(&self.dependency),
                "1",
                token_ttl_ms,
                now_ms,
            )
            .await?;
        if won {
            tracing::debug!(dependency = %self.dependency, "circuit half-open, running trial");
            Ok(Gate::Trial)
        } else {
            Ok(Gate::Reject {
                open_until_ms: mark.open_until_ms,
            })
        }
    }

    async fn on_success(&self, trial: bool) -> Result<(), StoreError> {
        if !trial {
            return Ok(());
        }
        self.store
            .kv_delete(&keys::breaker_open(&self.dependency))
            .await?;
        self.store
            .kv_delete(&keys::breaker_failures(&self.dependency))
            .await?;
        self.store
            .kv_delete(&keys::breaker_trial(&self.dependency))
            .await?;
        tracing::info!(dependency = %self.dependency, "circuit closed after successful trial");
        Ok(())
    }

    async fn on_failure(&self, trial: bool) -> Result<(), StoreError> {
        let now_ms = self.clock.epoch_ms();
        if trial {
            self.trip(now_ms).await?;
            self.store
                .kv_delete(&keys::breaker_trial(&self.dependency))
                .await?;
            tracing::warn!(dependency = %self.dependency, "trial failed, circuit reopened");
            return Ok(());
        }
        let failures = self
            .store
            .kv_incr_window(
                &keys::breaker_failures(&self.dependency),
                self.config.failure_window_ms,
                now_ms,
            )
            .await?;
        if failures >= u64::from(self.config.trip_threshold) {
            self.trip(now_ms).await?;
            tracing::warn!(
                dependency = %self.dependency,
                failures,
                cooldown_ms = self.config.cooldown_ms,
                "failure threshold reached, circuit opened"
            );
        }
        Ok(())
    }

    async fn trip(&self, now_ms: u64) -> Result<(), StoreError> {
        let mark = OpenMark {
            open_until_ms: now_ms.saturating_add(self.config.cooldown_ms),
            tripped_at_ms: now_ms,
        };
        let raw = serde_json::to_string(&mark)?;
        self.store
            .kv_put(&keys::breaker_open(&self.dependency), &raw, None, now_ms)
            .await
    }
}

#[cfg(test)]
#[path = "breaker_tests.rs"]
mod tests;
