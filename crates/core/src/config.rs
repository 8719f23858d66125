// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Validated configuration for the sync layer.
//!
//! Every tunable has a named field and a default; nothing reads an
//! options bag at call time. Construction paths all funnel through
//! [`SyncConfig::validate`], so a component holding a config can rely
//! on its invariants (non-zero ceilings, ordered TTL bounds, jitter in
//! range) without re-checking them.

use crate::backoff::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Errors from loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid config: {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// Top-level configuration, one section per component.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub connection: ConnectionConfig,
    pub scheduler: SchedulerConfig,
    pub breaker: BreakerConfig,
    pub cache: CacheConfig,
    pub worker: WorkerConfig,
}

impl SyncConfig {
    /// Parse from TOML and validate.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: SyncConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML config file and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.connection.validate()?;
        self.scheduler.validate()?;
        self.breaker.validate()?;
        self.cache.validate()?;
        self.worker.validate()?;
        Ok(())
    }
}

/// Backend connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Backend URL, e.g. `redis://127.0.0.1:6379`.
    pub url: String,
    pub connect_timeout_ms: u64,
    /// Health probe budget; a ping slower than this counts as down.
    pub ping_timeout_ms: u64,
    /// Reconnection backoff. After `max_attempts` the manager parks in
    /// the error state instead of looping.
    pub retry: RetryPolicy,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            connect_timeout_ms: 5_000,
            ping_timeout_ms: 1_000,
            retry: RetryPolicy {
                base_delay_ms: 500,
                max_delay_ms: 30_000,
                jitter_frac: 0.25,
                max_attempts: 8,
            },
        }
    }
}

impl ConnectionConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.url.trim().is_empty() {
            return Err(invalid("connection.url", "must not be empty"));
        }
        if self.connect_timeout_ms == 0 {
            return Err(invalid("connection.connect_timeout_ms", "must be positive"));
        }
        if self.ping_timeout_ms == 0 {
            return Err(invalid("connection.ping_timeout_ms", "must be positive"));
        }
        validate_retry(&self.retry, "connection.retry")
    }
}

/// Admission and queue settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Global ceiling on simultaneously active jobs, across all workers.
    pub max_concurrency: usize,
    /// Minimum interval between normal-priority admissions per owner.
    pub min_interval_ms: u64,
    /// Job retry backoff.
    pub retry: RetryPolicy,
    /// An active job claimed longer ago than this is presumed stuck
    /// and released back to waiting.
    pub stall_timeout_ms: u64,
    pub completed_retention_ms: u64,
    pub completed_keep_count: usize,
    pub failed_retention_ms: u64,
    pub failed_keep_count: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            min_interval_ms: 60_000,
            retry: RetryPolicy::default(),
            stall_timeout_ms: 120_000,
            completed_retention_ms: 3_600_000,
            completed_keep_count: 1_000,
            failed_retention_ms: 86_400_000,
            failed_keep_count: 5_000,
        }
    }
}

impl SchedulerConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrency == 0 {
            return Err(invalid("scheduler.max_concurrency", "must be at least 1"));
        }
        if self.stall_timeout_ms == 0 {
            return Err(invalid("scheduler.stall_timeout_ms", "must be positive"));
        }
        if self.failed_retention_ms < self.completed_retention_ms {
            return Err(invalid(
                "scheduler.failed_retention_ms",
                "failed jobs must be retained at least as long as completed ones",
            ));
        }
        validate_retry(&self.retry, "scheduler.retry")
    }
}

/// Circuit breaker settings, applied per upstream dependency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Failures within the window that trip the circuit.
    pub trip_threshold: u32,
    /// Rolling window the failure count lives in.
    pub failure_window_ms: u64,
    /// Open duration before a trial call is allowed.
    pub cooldown_ms: u64,
    /// Budget for one wrapped upstream call. Independent of the
    /// failure window; a timeout counts as a failure.
    pub call_timeout_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            trip_threshold: 5,
            failure_window_ms: 60_000,
            cooldown_ms: 30_000,
            call_timeout_ms: 10_000,
        }
    }
}

impl BreakerConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.trip_threshold == 0 {
            return Err(invalid("breaker.trip_threshold", "must be at least 1"));
        }
        if self.failure_window_ms == 0 {
            return Err(invalid("breaker.failure_window_ms", "must be positive"));
        }
        if self.cooldown_ms == 0 {
            return Err(invalid("breaker.cooldown_ms", "must be positive"));
        }
        if self.call_timeout_ms == 0 {
            return Err(invalid("breaker.call_timeout_ms", "must be positive"));
        }
        Ok(())
    }
}

/// Freshness cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL of an entry that has never been hit.
    pub base_ttl_ms: u64,
    /// TTL added per recorded hit, up to `max_ttl_ms`.
    pub ttl_step_ms: u64,
    pub max_ttl_ms: u64,
    /// Window past expiry in which an entry is still served, flagged
    /// stale. Past this it is a miss.
    pub grace_ms: u64,
    /// Entry capacity of the in-process tier.
    pub memory_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            base_ttl_ms: 900_000,
            ttl_step_ms: 60_000,
            max_ttl_ms: 3_600_000,
            grace_ms: 1_800_000,
            memory_capacity: 2_048,
        }
    }
}

impl CacheConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.base_ttl_ms == 0 {
            return Err(invalid("cache.base_ttl_ms", "must be positive"));
        }
        if self.max_ttl_ms < self.base_ttl_ms {
            return Err(invalid(
                "cache.max_ttl_ms",
                "must be at least cache.base_ttl_ms",
            ));
        }
        if self.memory_capacity == 0 {
            return Err(invalid("cache.memory_capacity", "must be at least 1"));
        }
        Ok(())
    }
}

/// Worker pool and maintenance loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub count: usize,
    /// Sleep between claim polls when the queue is empty.
    pub idle_backoff_ms: u64,
    pub heartbeat_interval_ms: u64,
    /// Expiry of the heartbeat key. Must outlast the refresh interval
    /// or a healthy worker flickers dead between beats.
    pub heartbeat_ttl_ms: u64,
    /// Interval of the stalled-job sweep.
    pub sweep_interval_ms: u64,
    /// Interval of the terminal-job retention prune.
    pub prune_interval_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: 2,
            idle_backoff_ms: 500,
            heartbeat_interval_ms: 5_000,
            heartbeat_ttl_ms: 15_000,
            sweep_interval_ms: 30_000,
            prune_interval_ms: 60_000,
        }
    }
}

impl WorkerConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.count == 0 {
            return Err(invalid("worker.count", "must be at least 1"));
        }
        if self.idle_backoff_ms == 0 {
            return Err(invalid("worker.idle_backoff_ms", "must be positive"));
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(invalid("worker.heartbeat_interval_ms", "must be positive"));
        }
        if self.heartbeat_ttl_ms <= self.heartbeat_interval_ms {
            return Err(invalid(
                "worker.heartbeat_ttl_ms",
                "must exceed worker.heartbeat_interval_ms",
            ));
        }
        if self.sweep_interval_ms == 0 {
            return Err(invalid("worker.sweep_interval_ms", "must be positive"));
        }
        if self.prune_interval_ms == 0 {
            return Err(invalid("worker.prune_interval_ms", "must be positive"));
        }
        Ok(())
    }
}

fn validate_retry(retry: &RetryPolicy, field: &'static str) -> Result<(), ConfigError> {
    if retry.max_attempts == 0 {
        return Err(invalid(field, "max_attempts must be at least 1"));
    }
    if retry.base_delay_ms == 0 {
        return Err(invalid(field, "base_delay_ms must be positive"));
    }
    if retry.max_delay_ms < retry.base_delay_ms {
        return Err(invalid(field, "max_delay_ms must be at least base_delay_ms"));
    }
    if !(0.0..1.0).contains(&retry.jitter_frac) {
        return Err(invalid(field, "jitter_frac must be in [0, 1)"));
    }
    Ok(())
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
