//! Admission specs.
//!
//! Verify the enqueue gauntlet: identity dedup ahead of the per-owner
//! rate ledger, per-owner windows, and the high-priority bypass.

use crate::prelude::*;

/// Rig without workers, so every admission outcome can be observed
/// before anything is claimed.
fn idle_rig() -> SpecRig {
    let mut config = spec_config();
    config.worker.count = 0;
    start_rig(config, vec![Arc::new(FlakyFetcher::reliable("ads"))])
}

#[tokio::test(start_paused = true)]
async fn duplicates_resolve_before_the_rate_ledger() {
    let rig = idle_rig();

    // First admission binds the owner's window.
    let first = enqueued(
        rig.sup
            .enqueue(payload("acct-1", "campaign-1"), JobPriority::Normal)
            .await,
    );

    // The same payload is a duplicate, not a rate refusal, and must
    // not consume the window.
    match rig
        .sup
        .enqueue(payload("acct-1", "campaign-1"), JobPriority::Normal)
        .await
    {
        EnqueueOutcome::Duplicate { existing } => assert_eq!(existing, first.id),
        other => panic!("expected Duplicate, got {other:?}"),
    }

    // Different work for the same owner is inside the window.
    assert_eq!(
        rig.sup
            .enqueue(payload("acct-1", "campaign-2"), JobPriority::Normal)
            .await,
        EnqueueOutcome::RateLimited
    );

    // Another owner has a window of its own.
    enqueued(
        rig.sup
            .enqueue(payload("acct-2", "campaign-1"), JobPriority::Normal)
            .await,
    );

    // Manual work bypasses the ledger outright.
    enqueued(
        rig.sup
            .enqueue(payload("acct-1", "campaign-3"), JobPriority::High)
            .await,
    );

    // Once the window from the first admission lapses, the refused
    // entity is admitted. The duplicate refusals never extended it.
    rig.clock.advance_ms(spec_config().scheduler.min_interval_ms);
    enqueued(
        rig.sup
            .enqueue(payload("acct-1", "campaign-2"), JobPriority::Normal)
            .await,
    );

    rig.sup.close().await;
}

#[tokio::test(start_paused = true)]
async fn forced_refresh_takes_over_the_identity() {
    let rig = idle_rig();

    let scheduled = enqueued(
        rig.sup
            .enqueue(payload("acct-1", "campaign-1"), JobPriority::Normal)
            .await,
    );
    let forced = enqueued(
        rig.sup
            .enqueue(payload("acct-1", "campaign-1"), JobPriority::High)
            .await,
    );
    assert_eq!(forced.identity, scheduled.identity);
    assert_ne!(forced.id, scheduled.id);

    // The identity mark follows the forced job.
    let holder = rig
        .store
        .find_in_flight(&forced.identity)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(holder.id, forced.id);

    rig.sup.close().await;
}
