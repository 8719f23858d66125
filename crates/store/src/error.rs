// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Store error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend cannot be reached. Callers degrade rather than
    /// crash on this variant.
    #[error("backend unavailable: {reason}")]
    Unavailable { reason: String },

    /// A backend call exceeded its deadline.
    #[error("backend operation timed out after {waited_ms}ms")]
    Timeout { waited_ms: u64 },

    #[error("record serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A backend-side failure that is not a connectivity problem, for
    /// example a malformed stored record or a rejected script.
    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        StoreError::Unavailable {
            reason: reason.into(),
        }
    }

    pub fn backend(reason: impl Into<String>) -> Self {
        StoreError::Backend(reason.into())
    }

    /// True when retrying against a healthy connection could succeed.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            StoreError::Unavailable { .. } | StoreError::Timeout { .. }
        )
    }
}

#[cfg(feature = "redis-backend")]
impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_refusal() || err.is_connection_dropped() || err.is_timeout() {
            StoreError::Unavailable {
                reason: err.to_string(),
            }
        } else {
            StoreError::Backend(err.to_string())
        }
    }
}
