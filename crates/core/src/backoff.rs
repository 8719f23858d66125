// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Retry backoff policy.
//!
//! Delays grow exponentially per attempt, are capped, and then get a
//! deterministic ± jitter so a shared outage does not resubmit every
//! affected job on the same tick. The jitter is seeded from the failure
//! time and attempt number rather than a thread RNG, which keeps every
//! delay computation reproducible in tests.

use serde::{Deserialize, Serialize};

/// Exponential backoff with jitter and an attempt cap.
///
/// Shared by job retries and backend reconnection, which differ only
/// in their numbers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Ceiling the exponential growth is clamped to.
    pub max_delay_ms: u64,
    /// Jitter fraction in `[0, 1)`: the final delay is the clamped
    /// delay scaled by a factor in `[1 - jitter, 1 + jitter)`.
    pub jitter_frac: f64,
    /// Total attempts allowed, including the first.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            jitter_frac: 0.25,
            max_attempts: 3,
        }
    }
}

impl RetryPolicy {
    /// True once `attempts` executions have started and none may follow.
    pub fn exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }

    /// Delay before the retry that follows failed attempt `attempt`
    /// (1-based): `base × 2^(attempt−1)`, clamped to `max_delay_ms`,
    /// then jittered. `seed_ms` is normally the failure timestamp.
    pub fn delay_ms(&self, attempt: u32, seed_ms: u64) -> u64 {
        let attempt = attempt.max(1);
        let shift = u32::min(attempt - 1, 63);
        let exp = self.base_delay_ms.saturating_mul(1u64 << shift);
        let clamped = exp.min(self.max_delay_ms);

        if self.jitter_frac <= 0.0 {
            return clamped;
        }

        // Deterministic pseudo-random fraction in [0, 1) from an LCG
        // step over (seed, attempt).
        let mut seed = seed_ms ^ (u64::from(attempt) << 32);
        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
        let frac = ((seed >> 32) as f64) / (u32::MAX as f64);

        let multiplier = 1.0 + self.jitter_frac * (2.0 * frac - 1.0);
        (clamped as f64 * multiplier).round() as u64
    }

    /// Epoch-ms timestamp of the next retry after failed attempt
    /// `attempt`, or `None` once the cap is exhausted.
    pub fn next_attempt_at_ms(&self, attempt: u32, now_ms: u64) -> Option<u64> {
        if self.exhausted(attempt) {
            return None;
        }
        Some(now_ms.saturating_add(self.delay_ms(attempt, now_ms)))
    }
}

#[cfg(test)]
#[path = "backoff_tests.rs"]
mod tests;
