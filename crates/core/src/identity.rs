// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Deterministic job identity.
//!
//! The identity is the dedup key for background work: two enqueues that
//! would produce the same result collapse onto one identity, and two
//! that would not must never share one. It is derived from every
//! payload field that affects the shape of the result, with the
//! unordered parts (columns, filters) sorted before hashing so argument
//! order never leaks into the key.
//!
//! The modifiers are folded through SHA-256 over a canonical JSON
//! rendering, not the std hasher: identities are shared through the
//! backend between processes, and `DefaultHasher` makes no stability
//! promise across builds. JSON escaping keeps the rendering
//! unambiguous, so no choice of column or filter text can make two
//! different shapes collide.

use crate::job::{FilterPredicate, JobPayload};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use smol_str::SmolStr;

/// Length of the hex digest suffix kept in the identity string.
const DIGEST_LEN: usize = 16;

/// Deterministic dedup key for a job.
///
/// Shaped `fetch:{provider}:{owner}:{entity}:{window}:{digest}` so the
/// scoping fields stay legible in logs and backend keys while the
/// result-shape modifiers are folded into the trailing digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(pub SmolStr);

impl Identity {
    pub fn from_string(s: impl Into<SmolStr>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Identity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for Identity {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for Identity {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for Identity {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Compute the identity of a payload. Pure and deterministic: equal
/// semantic intent gives equal output regardless of the order columns
/// or filters were supplied in.
pub fn compute_identity(payload: &JobPayload) -> Identity {
    let shape = canonical_shape(payload);
    let digest = Sha256::digest(shape.as_bytes());
    let hex = format!("{:x}", digest);

    Identity(SmolStr::new(format!(
        "fetch:{}:{}:{}:{}:{}",
        payload.provider.trim(),
        payload.owner.trim(),
        payload.entity.trim(),
        payload.window,
        &hex[..DIGEST_LEN],
    )))
}

/// Render the result-shape modifiers into canonical JSON.
///
/// Columns are trimmed, sorted, and deduplicated; filters are sorted by
/// (field, op, value) and deduplicated. A repeated column or filter
/// does not change what the upstream returns, so it must not change
/// the identity either. `serde_json::Value` keeps object keys in
/// sorted order, so the rendering itself is stable.
fn canonical_shape(payload: &JobPayload) -> String {
    let mut columns: Vec<&str> = payload.columns.iter().map(|c| c.trim()).collect();
    columns.sort_unstable();
    columns.dedup();

    let mut filters: Vec<&FilterPredicate> = payload.filters.iter().collect();
    filters.sort();
    filters.dedup();

    serde_json::json!({
        "columns": columns,
        "filters": filters,
        "conversion_mode": payload.conversion_mode,
        "include_partial": payload.include_partial,
        "timezone": payload.timezone.trim(),
    })
    .to_string()
}

#[cfg(test)]
#[path = "identity_tests.rs"]
mod tests;
