// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::job::{ConversionMode, DateWindow, FilterOp, FilterPredicate};
use crate::test_support::strategies::*;
use proptest::prelude::*;

fn base_payload() -> JobPayload {
    JobPayload::new(
        "ads",
        "acct-1",
        "campaign-1",
        DateWindow::new("2025-01-01", "2025-01-31"),
    )
    .columns(vec!["clicks".into(), "cost".into(), "impressions".into()])
    .filters(vec![
        FilterPredicate::new("device", FilterOp::Eq, "mobile"),
        FilterPredicate::new("cost", FilterOp::Gt, "100"),
    ])
}

#[test]
fn identity_is_deterministic() {
    assert_eq!(
        compute_identity(&base_payload()),
        compute_identity(&base_payload())
    );
}

#[test]
fn identity_embeds_scope_and_digest() {
    let id = compute_identity(&base_payload());
    let s = id.as_str();

    assert!(s.starts_with("fetch:ads:acct-1:campaign-1:2025-01-01..2025-01-31:"));
    let digest = s.rsplit(':').next().unwrap();
    assert_eq!(digest.len(), 16);
    assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn column_order_does_not_matter() {
    let a = base_payload();
    let b = base_payload().columns(vec![
        "impressions".into(),
        "clicks".into(),
        "cost".into(),
    ]);
    assert_eq!(compute_identity(&a), compute_identity(&b));
}

#[test]
fn filter_order_does_not_matter() {
    let a = base_payload();
    let b = base_payload().filters(vec![
        FilterPredicate::new("cost", FilterOp::Gt, "100"),
        FilterPredicate::new("device", FilterOp::Eq, "mobile"),
    ]);
    assert_eq!(compute_identity(&a), compute_identity(&b));
}

#[test]
fn repeated_columns_and_filters_collapse() {
    let a = base_payload();
    let b = base_payload()
        .columns(vec![
            "cost".into(),
            "clicks".into(),
            "clicks".into(),
            "impressions".into(),
            "cost".into(),
        ])
        .filters(vec![
            FilterPredicate::new("device", FilterOp::Eq, "mobile"),
            FilterPredicate::new("device", FilterOp::Eq, "mobile"),
            FilterPredicate::new("cost", FilterOp::Gt, "100"),
        ]);
    assert_eq!(compute_identity(&a), compute_identity(&b));
}

#[test]
fn surrounding_whitespace_is_ignored() {
    let a = base_payload();
    let mut b = base_payload();
    b.owner = " acct-1 ".to_string();
    b.columns = vec![" clicks ".into(), "cost".into(), "impressions".into()];
    b.timezone = "UTC ".to_string();
    assert_eq!(compute_identity(&a), compute_identity(&b));
}

// Flip one result-shape-affecting field at a time; every flip must
// move the identity.
#[test]
fn each_shape_field_feeds_the_identity() {
    let base = compute_identity(&base_payload());

    let variants: Vec<JobPayload> = vec![
        {
            let mut p = base_payload();
            p.provider = "seo".into();
            p
        },
        {
            let mut p = base_payload();
            p.owner = "acct-2".into();
            p
        },
        {
            let mut p = base_payload();
            p.entity = "campaign-2".into();
            p
        },
        {
            let mut p = base_payload();
            p.window = DateWindow::new("2025-01-01", "2025-02-01");
            p
        },
        base_payload().columns(vec!["clicks".into(), "cost".into()]),
        base_payload().filters(vec![FilterPredicate::new("device", FilterOp::Eq, "desktop")]),
        base_payload().filters(vec![FilterPredicate::new("device", FilterOp::Neq, "mobile")]),
        base_payload().conversion_mode(ConversionMode::ConversionDate),
        base_payload().include_partial(true),
        base_payload().timezone("America/New_York"),
    ];

    for (i, variant) in variants.iter().enumerate() {
        assert_ne!(
            compute_identity(variant),
            base,
            "variant {i} should have changed the identity"
        );
    }
}

#[test]
fn filter_text_cannot_smuggle_a_second_filter() {
    // A value crafted to look like a rendered filter list must not
    // collide with the honestly-built two-filter payload.
    let two = base_payload().filters(vec![
        FilterPredicate::new("a", FilterOp::Eq, "1"),
        FilterPredicate::new("b", FilterOp::Eq, "2"),
    ]);
    let smuggled = base_payload().filters(vec![FilterPredicate::new(
        "a",
        FilterOp::Eq,
        "1\";\"b\" \"eq\" \"2",
    )]);
    assert_ne!(compute_identity(&two), compute_identity(&smuggled));
}

proptest! {
    #[test]
    fn shuffling_columns_preserves_identity(
        (original, shuffled) in arb_columns().prop_flat_map(|v| {
            let original = v.clone();
            (Just(original), Just(v).prop_shuffle())
        })
    ) {
        let a = JobPayload::builder().columns(original).build();
        let b = JobPayload::builder().columns(shuffled).build();
        prop_assert_eq!(compute_identity(&a), compute_identity(&b));
    }

    #[test]
    fn shuffling_filters_preserves_identity(
        (original, shuffled) in arb_filters().prop_flat_map(|v| {
            let original = v.clone();
            (Just(original), Just(v).prop_shuffle())
        })
    ) {
        let a = JobPayload::builder().filters(original).build();
        let b = JobPayload::builder().filters(shuffled).build();
        prop_assert_eq!(compute_identity(&a), compute_identity(&b));
    }

    #[test]
    fn appending_a_new_column_changes_identity(
        payload in arb_payload(),
        extra in "[A-Z]{3,6}",
    ) {
        // Uppercase extra cannot collide with the lowercase generator
        // output, so it is genuinely new.
        let mut grown = payload.clone();
        grown.columns.push(extra);
        prop_assert_ne!(compute_identity(&payload), compute_identity(&grown));
    }
}
