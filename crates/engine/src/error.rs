// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine error type

use conveyor_core::JobError;
use conveyor_store::StoreError;
use thiserror::Error;

/// Errors crossing the engine's public seams.
///
/// Admission outcomes (`Duplicate`, `RateLimited`) are not errors and
/// live in [`EnqueueOutcome`](crate::EnqueueOutcome); this enum covers
/// genuine failures while recording job dispositions.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("job state error: {0}")]
    Job(#[from] JobError),
}
