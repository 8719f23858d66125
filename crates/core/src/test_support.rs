// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test helpers for use across crates.
//!
//! Gated behind `#[cfg(any(test, feature = "test-support"))]`.

use crate::job::{DateWindow, Job, JobPayload, JobPriority};

// ── Proptest strategies ─────────────────────────────────────────────────

/// Proptest strategies over payload parts.
pub mod strategies {
    use crate::job::{DateWindow, FilterOp, FilterPredicate, JobPayload};
    use proptest::prelude::*;

    pub fn arb_column() -> impl Strategy<Value = String> {
        "[a-z_]{1,10}"
    }

    pub fn arb_columns() -> impl Strategy<Value = Vec<String>> {
        proptest::collection::vec(arb_column(), 0..6)
    }

    pub fn arb_op() -> impl Strategy<Value = FilterOp> {
        prop_oneof![
            Just(FilterOp::Eq),
            Just(FilterOp::Neq),
            Just(FilterOp::Gt),
            Just(FilterOp::Gte),
            Just(FilterOp::Lt),
            Just(FilterOp::Lte),
            Just(FilterOp::Contains),
        ]
    }

    pub fn arb_filter() -> impl Strategy<Value = FilterPredicate> {
        (arb_column(), arb_op(), "[a-z0-9]{0,8}")
            .prop_map(|(field, op, value)| FilterPredicate::new(field, op, value))
    }

    pub fn arb_filters() -> impl Strategy<Value = Vec<FilterPredicate>> {
        proptest::collection::vec(arb_filter(), 0..5)
    }

    /// Payload with a fixed scope and arbitrary result-shape modifiers.
    pub fn arb_payload() -> impl Strategy<Value = JobPayload> {
        (arb_columns(), arb_filters(), any::<bool>()).prop_map(|(columns, filters, partial)| {
            JobPayload::new(
                "ads",
                "acct-1",
                "campaign-1",
                DateWindow::new("2025-01-01", "2025-01-31"),
            )
            .columns(columns)
            .filters(filters)
            .include_partial(partial)
        })
    }
}

// ── Fixture factories ───────────────────────────────────────────────────

/// Payload scoped to the given owner and entity, default window.
pub fn payload_for(owner: &str, entity: &str) -> JobPayload {
    JobPayload::new(
        "ads",
        owner,
        entity,
        DateWindow::new("2025-01-01", "2025-01-31"),
    )
}

/// Waiting normal-priority job for the given owner/entity at t=1s.
pub fn waiting_job(owner: &str, entity: &str) -> Job {
    Job::new_with_epoch_ms(payload_for(owner, entity), JobPriority::Normal, 1_000)
}
