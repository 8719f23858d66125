// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Upstream fetchers and their registry.
//!
//! A [`Fetcher`] is the seam to one upstream provider: it turns a
//! [`JobPayload`] into cacheable records. Workers look fetchers up by
//! the payload's provider key; the registry is assembled once at
//! startup and shared read-only afterwards.

use async_trait::async_trait;
use conveyor_core::{CacheKey, JobPayload};
use std::collections::HashMap;
use std::sync::Arc;

/// Errors an upstream fetch can surface.
///
/// The split decides the job's fate: [`Unavailable`](FetchError::Unavailable)
/// re-enters the retry path, [`Rejected`](FetchError::Rejected) fails
/// the job without spending further attempts.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Transient upstream trouble. Worth retrying on backoff.
    #[error("upstream unavailable: {reason}")]
    Unavailable { reason: String },
    /// The upstream refused the request as malformed, unauthorized,
    /// or out of quota terms. Retrying the same payload cannot succeed.
    #[error("upstream rejected the request: {reason}")]
    Rejected { reason: String },
}

impl FetchError {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        FetchError::Unavailable {
            reason: reason.into(),
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        FetchError::Rejected {
            reason: reason.into(),
        }
    }

    /// True when a retry against a recovered upstream could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Unavailable { .. })
    }
}

/// One fetched row, keyed for the cache.
#[derive(Debug, Clone)]
pub struct FetchedRecord {
    pub key: CacheKey,
    pub value: serde_json::Value,
}

impl FetchedRecord {
    pub fn new(key: CacheKey, value: serde_json::Value) -> Self {
        Self { key, value }
    }
}

/// Result of one upstream fetch.
///
/// A batch may land partially: rows that decoded cleanly ride in
/// `records` while row-level problems are reported in `skipped` and
/// the job still completes. Wholesale failure is an `Err` from the
/// fetcher instead.
#[derive(Debug, Clone, Default)]
pub struct FetchBatch {
    pub records: Vec<FetchedRecord>,
    /// Row-level problems that did not fail the batch.
    pub skipped: Vec<String>,
}

impl FetchBatch {
    pub fn new(records: Vec<FetchedRecord>) -> Self {
        Self {
            records,
            skipped: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// One upstream provider's fetch implementation.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Provider key this fetcher serves, matched against
    /// [`JobPayload::provider`].
    fn provider(&self) -> &str;

    /// Fetch the rows the payload describes.
    async fn fetch(&self, payload: &JobPayload) -> Result<FetchBatch, FetchError>;
}

/// Fetchers keyed by provider.
#[derive(Default)]
pub struct FetcherRegistry {
    fetchers: HashMap<String, Arc<dyn Fetcher>>,
}

impl FetcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fetcher under its provider key. Re-registering a
    /// provider replaces the previous fetcher.
    pub fn register(&mut self, fetcher: Arc<dyn Fetcher>) {
        let provider = fetcher.provider().to_string();
        if self.fetchers.insert(provider.clone(), fetcher).is_some() {
            tracing::warn!(provider, "fetcher replaced");
        }
    }

    pub fn get(&self, provider: &str) -> Option<Arc<dyn Fetcher>> {
        self.fetchers.get(provider).cloned()
    }

    /// Registered provider keys, sorted for stable status output.
    pub fn providers(&self) -> Vec<String> {
        let mut providers: Vec<String> = self.fetchers.keys().cloned().collect();
        providers.sort();
        providers
    }

    pub fn len(&self) -> usize {
        self.fetchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fetchers.is_empty()
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
