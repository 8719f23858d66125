//! Lifecycle specs.
//!
//! Verify pause/resume/drain control, shutdown, restart recovery from
//! the shared store, and the stalled-claim sweep.

use crate::prelude::*;

#[tokio::test(start_paused = true)]
async fn pause_resume_and_drain_control_the_queue() {
    let rig = start_rig(spec_config(), vec![Arc::new(FlakyFetcher::reliable("ads"))]);

    // Normal service first.
    let handle = enqueued(
        rig.sup
            .enqueue(payload("acct-1", "campaign-1"), JobPriority::Normal)
            .await,
    );
    assert!(
        wait_for(|| async {
            matches!(
                rig.store.get_job(&handle.id).await.unwrap(),
                Some(job) if job.state == JobState::Completed
            )
        })
        .await,
        "job should complete while running"
    );

    // Paused: no admissions, no claims.
    rig.sup.pause().await.unwrap();
    assert!(rig.sup.status().await.unwrap().paused);
    assert_eq!(
        rig.sup
            .enqueue(payload("acct-2", "campaign-2"), JobPriority::Normal)
            .await,
        EnqueueOutcome::Unavailable
    );

    // Work seeded behind the pause sits untouched and drains away.
    let seeded = Job::new_with_epoch_ms(
        payload("acct-3", "campaign-3"),
        JobPriority::Normal,
        rig.clock.epoch_ms(),
    );
    rig.store.put_job(&seeded, false).await.unwrap();
    assert_eq!(rig.sup.status().await.unwrap().queue.waiting, 1);
    assert_eq!(rig.sup.drain().await.unwrap(), 1);
    assert_eq!(rig.sup.status().await.unwrap().queue.waiting, 0);

    // Resume restores service.
    rig.sup.resume().await.unwrap();
    let handle = enqueued(
        rig.sup
            .enqueue(payload("acct-2", "campaign-2"), JobPriority::Normal)
            .await,
    );
    assert!(
        wait_for(|| async {
            matches!(
                rig.store.get_job(&handle.id).await.unwrap(),
                Some(job) if job.state == JobState::Completed
            )
        })
        .await,
        "job should complete after resume"
    );

    // Closed is final: later submissions are refused.
    rig.sup.close().await;
    assert_eq!(
        rig.sup
            .enqueue(payload("acct-4", "campaign-4"), JobPriority::Normal)
            .await,
        EnqueueOutcome::Unavailable
    );
}

#[tokio::test(start_paused = true)]
async fn a_restarted_process_resumes_from_the_store() {
    let store = Arc::new(MemoryBackend::new());
    let clock = FakeClock::new();

    // First process accepts work but has no workers to run it.
    let mut idle = spec_config();
    idle.worker.count = 0;
    let first = SyncSupervisor::start(
        idle,
        Arc::clone(&store),
        FetcherRegistry::new(),
        clock.clone(),
    );
    let handle = enqueued(
        first
            .enqueue(payload("acct-1", "campaign-1"), JobPriority::Normal)
            .await,
    );
    first.close().await;

    // A second process over the same records picks the job up.
    let mut registry = FetcherRegistry::new();
    registry.register(Arc::new(FlakyFetcher::reliable("ads")));
    let second = SyncSupervisor::start(spec_config(), Arc::clone(&store), registry, clock.clone());
    assert!(
        wait_for(|| async {
            matches!(
                store.get_job(&handle.id).await.unwrap(),
                Some(job) if job.state == JobState::Completed
            )
        })
        .await,
        "restart should resume pending work"
    );
    second.close().await;
}

#[tokio::test(start_paused = true)]
async fn stalled_claims_are_swept_back_and_finished() {
    let store = Arc::new(MemoryBackend::new());
    let clock = FakeClock::new();

    // A worker from a previous process claimed the job and died with
    // it in hand.
    let job = Job::new_with_epoch_ms(
        payload("acct-1", "campaign-1"),
        JobPriority::Normal,
        clock.epoch_ms(),
    );
    store.put_job(&job, false).await.unwrap();
    let claimed = store
        .claim_next(&WorkerId::new(), 4, clock.epoch_ms())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(claimed.id, job.id);

    let mut registry = FetcherRegistry::new();
    registry.register(Arc::new(FlakyFetcher::reliable("ads")));
    let sup = SyncSupervisor::start(spec_config(), Arc::clone(&store), registry, clock.clone());

    // While the claim looks live it occupies its active slot.
    assert_eq!(sup.status().await.unwrap().queue.active, 1);

    // Past the stall timeout the sweep returns it to the queue and a
    // live worker finishes it, with the dead attempt still counted.
    clock.advance_ms(spec_config().scheduler.stall_timeout_ms + 1);
    assert!(
        wait_for(|| async {
            matches!(
                store.get_job(&job.id).await.unwrap(),
                Some(j) if j.state == JobState::Completed
            )
        })
        .await,
        "stalled claim should be requeued and completed"
    );
    let done = store.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(done.attempts, 2);

    sup.close().await;
}
