//! Circuit breaker specs.
//!
//! Verify the full trip cycle against a scripted outage: failures
//! accumulate in the window, the fifth trips the circuit, open-circuit
//! work is turned away without an upstream call or a spent attempt,
//! the cooldown admits exactly one trial, and a successful trial
//! closes the circuit with the failure window reset.

use crate::prelude::*;

#[tokio::test(start_paused = true)]
async fn circuit_trips_fast_fails_and_recovers_through_one_trial() {
    // Five scripted failures, then a recovered upstream.
    let fetcher = Arc::new(FlakyFetcher::new("ads", 5));
    let rig = start_rig(
        spec_config(),
        vec![Arc::clone(&fetcher) as Arc<dyn Fetcher>],
    );
    let t0 = rig.clock.epoch_ms();

    let mut handles = Vec::new();
    for i in 0..5 {
        let owner = format!("acct-{i}");
        let entity = format!("campaign-{i}");
        handles.push(enqueued(
            rig.sup
                .enqueue(payload(&owner, &entity), JobPriority::Normal)
                .await,
        ));
    }

    // Each job fails once; the fifth failure trips the circuit.
    assert!(
        wait_for(|| async {
            rig.sup.status().await.unwrap().breakers[0].state == BreakerState::Open
        })
        .await,
        "circuit should trip after the fifth failure"
    );
    assert_eq!(fetcher.calls(), 5);
    let open_until = t0 + spec_config().breaker.cooldown_ms;
    let stats = rig.sup.status().await.unwrap().breakers.remove(0);
    assert_eq!(stats.failures, 5);
    assert_eq!(stats.open_until_ms, Some(open_until));

    // Retries coming due against the open circuit are parked until
    // the cooldown without an upstream call, attempt handed back.
    rig.clock.advance_ms(1_000);
    assert!(
        wait_for(|| async {
            let mut parked = 0;
            for handle in &handles {
                let job = rig.store.get_job(&handle.id).await.unwrap().unwrap();
                if job.state == JobState::Delayed
                    && job.not_before_ms == Some(open_until)
                    && job.attempts == 1
                {
                    parked += 1;
                }
            }
            parked == handles.len()
        })
        .await,
        "open circuit should park all retries at the cooldown"
    );
    assert_eq!(fetcher.calls(), 5);

    // Cooldown elapsed: one trial wins the token, succeeds, and
    // closes the circuit. The rest of the queue drains through it.
    rig.clock
        .advance_ms(spec_config().breaker.cooldown_ms - 1_000);
    assert!(
        wait_for(|| async {
            rig.sup.status().await.unwrap().breakers[0].state == BreakerState::Closed
        })
        .await,
        "successful trial should close the circuit"
    );

    // Wake anything parked while the trial was outstanding.
    rig.clock.advance_ms(1_000);
    assert!(
        wait_for(|| async { rig.sup.status().await.unwrap().queue.completed == 5 })
        .await,
        "all jobs should complete once the circuit closes"
    );
    // One real failure and one real success per job.
    assert_eq!(fetcher.calls(), 10);
    let stats = rig.sup.status().await.unwrap().breakers.remove(0);
    assert_eq!(stats.failures, 0);
    for handle in &handles {
        let job = rig.store.get_job(&handle.id).await.unwrap().unwrap();
        assert_eq!(job.attempts, 2);
    }

    rig.sup.close().await;
}
