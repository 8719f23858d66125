//! Freshness cache specs.
//!
//! Verify the read-through cycle: a cold miss schedules the first
//! fetch, recorded hits stretch the TTL of the next rewrite, an
//! expired entry is served stale inside the grace window while its
//! refresh runs, and past the grace window the entry is an honest
//! miss.

use crate::prelude::*;

#[tokio::test(start_paused = true)]
async fn read_through_cycles_through_fresh_stale_and_expired() {
    let rig = start_rig(spec_config(), vec![Arc::new(FlakyFetcher::reliable("ads"))]);
    let request = ReadRequest::new(entity_key("campaign-1"), payload("acct-1", "campaign-1"));
    let base_ttl = spec_config().cache.base_ttl_ms;
    let ttl_step = spec_config().cache.ttl_step_ms;
    let grace = spec_config().cache.grace_ms;

    // Cold read: a miss that schedules the first fetch.
    let cold = rig
        .sup
        .read_through(std::slice::from_ref(&request))
        .await
        .unwrap();
    assert!(cold.hits.is_empty());
    assert_eq!(cold.misses.len(), 1);

    // The fetch lands with the base TTL. Polling through the cache
    // handle records no hits.
    assert!(
        wait_for(|| async {
            !rig.sup
                .cache()
                .lookup(rig.store.as_ref(), std::slice::from_ref(&request.key))
                .await
                .unwrap()
                .hits
                .is_empty()
        })
        .await,
        "first fetch should land"
    );
    let entry = rig
        .sup
        .cache()
        .lookup(rig.store.as_ref(), std::slice::from_ref(&request.key))
        .await
        .unwrap()
        .hits
        .remove(0);
    assert_eq!(entry.ttl_ms, base_ttl);
    assert_eq!(entry.value["call"], 0);
    assert_eq!(entry.hit_count, 0);

    // Three served reads record three hits against the entry.
    for _ in 0..3 {
        let served = rig
            .sup
            .read_through(std::slice::from_ref(&request))
            .await
            .unwrap();
        assert_eq!(served.hits.len(), 1);
    }

    // Past expiry but inside grace: served stale, refresh scheduled
    // behind the serve. The stale serve records the fourth hit.
    rig.clock.advance_ms(base_ttl + 1);
    let stale = rig
        .sup
        .read_through(std::slice::from_ref(&request))
        .await
        .unwrap();
    assert_eq!(stale.stale.len(), 1);
    assert_eq!(stale.stale[0].value["call"], 0);

    // The rewrite carries the accumulated hits, so the new TTL grows
    // by one step per recorded hit.
    assert!(
        wait_for(|| async {
            rig.sup
                .cache()
                .lookup(rig.store.as_ref(), std::slice::from_ref(&request.key))
                .await
                .unwrap()
                .hits
                .first()
                .map(|e| e.value["call"] == 1)
                .unwrap_or(false)
        })
        .await,
        "refresh should rewrite the stale entry"
    );
    let rewritten = rig
        .sup
        .cache()
        .lookup(rig.store.as_ref(), std::slice::from_ref(&request.key))
        .await
        .unwrap()
        .hits
        .remove(0);
    assert_eq!(rewritten.hit_count, 4);
    assert_eq!(rewritten.ttl_ms, base_ttl + 4 * ttl_step);

    // Past expiry and grace: an honest miss.
    rig.clock.advance_ms(rewritten.ttl_ms + grace + 1);
    let gone = rig
        .sup
        .read_through(std::slice::from_ref(&request))
        .await
        .unwrap();
    assert!(gone.hits.is_empty());
    assert!(gone.stale.is_empty());
    assert_eq!(gone.misses.len(), 1);

    rig.sup.close().await;
}
