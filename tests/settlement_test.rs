mod helpers;

use chrono::Duration;
use helpers::*;
use parimutuel_engine::models::*;
use parimutuel_engine::repositories::PoolStore;
use parimutuel_engine::services::{ResolutionReport, TransitionReport};
use parimutuel_engine::ReasonCode;

#[tokio::test]
async fn test_create_pool_schedule() {
    let h = TestHarness::new();
    let now = h.now();

    let pool = h
        .engine
        .create_pool_manual("ETH", 900, 300, "15m", 30)
        .await
        .expect("Failed to create pool");

    assert_eq!(pool.status, PoolStatus::Upcoming);
    assert_eq!(pool.lock_time, now + Duration::seconds(300));
    assert_eq!(pool.start_time, pool.lock_time + Duration::seconds(30));
    assert_eq!(pool.end_time, pool.start_time + Duration::seconds(900));
    assert_eq!(pool.total_up, 0);
    assert_eq!(pool.total_down, 0);
    assert!(pool.strike_price.is_none());
    assert!(pool.winner.is_none());
    assert!(pool.pool_pubkey.is_some());
    assert_eq!(pool.pool_seed.len(), 64);

    assert_eq!(h.pool(pool.id).await, pool);
    assert_eq!(h.gateway.initialized(), 1);
    assert_eq!(h.sink.created(), vec![pool.id]);

    let events = h.store.events_for_entity(pool.id).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, EventKind::PoolCreated);
}

#[tokio::test]
async fn test_create_pool_from_template() {
    let h = TestHarness::new();
    let template = h.config.scheduler.templates[0].clone();

    let pool = h.engine.create_pool(&template).await.unwrap();

    assert_eq!(pool.asset, template.asset);
    assert_eq!(pool.interval_key, template.interval_key);
    assert_eq!(
        (pool.end_time - pool.start_time).num_seconds() as u64,
        template.duration_secs
    );
}

#[tokio::test]
async fn test_create_pool_rejects_bad_input() {
    let h = TestHarness::new();

    let unsupported = h.engine.create_pool_manual("DOGE", 60, 30, "1m", 5).await;
    assert_eq!(reason(unsupported), ReasonCode::ValidationError);

    // Zero lock buffer would make lock_time == start_time
    let no_buffer = h.engine.create_pool_manual("BTC", 60, 30, "1m", 0).await;
    assert_eq!(reason(no_buffer), ReasonCode::ValidationError);

    assert!(h.store.list_pools(None, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_create_pool_survives_chain_failure() {
    let h = TestHarness::new();
    h.gateway.set_failing(true);

    let pool = h.create_pool().await;

    assert_eq!(h.pool(pool.id).await.status, PoolStatus::Upcoming);
    let events = h.store.events_for_entity(pool.id).await.unwrap();
    assert_eq!(events[0].payload["onchain"]["status"], "failed");
}

#[tokio::test]
async fn test_activation_captures_strike_once() {
    let h = TestHarness::new();
    h.oracle.set_price("BTC", 64_000_000_000);

    // Lock 3000s ahead, start 60s after that
    let pool = h.create_pool().await;

    let report = h.engine.process_status_transitions().await.unwrap();
    assert_eq!(
        report,
        TransitionReport {
            joined: 1,
            activated: 0,
            failed: 0
        }
    );
    assert_eq!(h.pool(pool.id).await.status, PoolStatus::Joining);
    assert_eq!(h.oracle.calls(), 0);

    h.clock.set(pool.lock_time + Duration::seconds(1));
    let report = h.engine.process_status_transitions().await.unwrap();
    assert_eq!(report.activated, 1);

    let active = h.pool(pool.id).await;
    assert_eq!(active.status, PoolStatus::Active);
    assert_eq!(active.strike_price, Some(64_000_000_000));

    let snapshots = h.store.snapshots_for_pool(pool.id).await.unwrap();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].kind, SnapshotKind::Strike);
    assert_eq!(snapshots[0].price, 64_000_000_000);

    // A second sweep is a no-op
    let report = h.engine.process_status_transitions().await.unwrap();
    assert_eq!(report, TransitionReport::default());
    assert_eq!(h.store.snapshots_for_pool(pool.id).await.unwrap().len(), 1);
    assert_eq!(h.oracle.calls(), 1);
}

#[tokio::test]
async fn test_overlapping_status_sweeps_activate_once() {
    let h = TestHarness::new();
    let pool = h.joining_pool().await;
    h.oracle.set_price("BTC", 64_000_000_000);
    h.clock.set(pool.lock_time + Duration::seconds(1));

    let (a, b) = tokio::join!(
        h.engine.process_status_transitions(),
        h.engine.process_status_transitions()
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.activated + b.activated, 1);
    assert_eq!(a.failed + b.failed, 0);
    // Both sweeps fetched a price before either wrote
    assert_eq!(h.oracle.calls(), 2);

    let snapshots = h.store.snapshots_for_pool(pool.id).await.unwrap();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].kind, SnapshotKind::Strike);

    let events = h.store.events_of_kind(EventKind::PoolActivated).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].entity_id, Some(pool.id));
    assert_eq!(h.pool(pool.id).await.status, PoolStatus::Active);
}

#[tokio::test]
async fn test_stale_upcoming_pool_passes_through_joining() {
    let h = TestHarness::new();
    h.oracle.set_price("BTC", 100);

    let pool = h.create_pool().await;
    // Scheduler was down until after the lock time
    h.clock.set(pool.lock_time + Duration::seconds(10));

    let report = h.engine.process_status_transitions().await.unwrap();
    assert_eq!(report.joined, 1);
    assert_eq!(report.activated, 1);
    assert_eq!(h.pool(pool.id).await.status, PoolStatus::Active);

    let statuses: Vec<_> = h.sink.updates_for(pool.id).iter().map(|u| u.status).collect();
    assert_eq!(statuses, vec![PoolStatus::Joining, PoolStatus::Active]);

    let kinds: Vec<_> = h
        .store
        .events_for_entity(pool.id)
        .await
        .unwrap()
        .iter()
        .map(|e| e.kind)
        .collect();
    assert!(kinds.contains(&EventKind::PoolJoining));
    assert!(kinds.contains(&EventKind::PoolActivated));
}

#[tokio::test]
async fn test_oracle_outage_skips_transition() {
    let h = TestHarness::new();
    let pool = h.joining_pool().await;
    h.clock.set(pool.lock_time + Duration::seconds(1));

    h.oracle.set_failing(true);
    let report = h.engine.process_status_transitions().await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.activated, 0);

    let unchanged = h.pool(pool.id).await;
    assert_eq!(unchanged.status, PoolStatus::Joining);
    assert!(unchanged.strike_price.is_none());
    assert!(h.store.snapshots_for_pool(pool.id).await.unwrap().is_empty());

    // Next tick retries
    h.oracle.set_failing(false);
    h.oracle.set_price("BTC", 500);
    let report = h.engine.process_status_transitions().await.unwrap();
    assert_eq!(report.activated, 1);
    assert_eq!(h.pool(pool.id).await.strike_price, Some(500));
}

#[tokio::test]
async fn test_one_failing_pool_does_not_block_others() {
    let h = TestHarness::new();
    h.oracle.set_price("BTC", 1_000);
    // No ETH price: that pool's activation fails

    let btc = h.engine.create_pool_manual("BTC", 60, 30, "1m", 5).await.unwrap();
    let eth = h.engine.create_pool_manual("ETH", 60, 30, "1m", 5).await.unwrap();
    h.clock.set(btc.lock_time + Duration::seconds(1));

    let report = h.engine.process_status_transitions().await.unwrap();
    assert_eq!(report.joined, 2);
    assert_eq!(report.activated, 1);
    assert_eq!(report.failed, 1);

    assert_eq!(h.pool(btc.id).await.status, PoolStatus::Active);
    assert_eq!(h.pool(eth.id).await.status, PoolStatus::Joining);
}

#[tokio::test]
async fn test_resolution_picks_winner() {
    let h = TestHarness::new();

    let up = h.joining_pool().await;
    let resolved = h.resolve(&up, 1_000, 1_001).await;
    assert_eq!(resolved.winner, Some(Side::Up));
    assert_eq!(resolved.strike_price, Some(1_000));
    assert_eq!(resolved.final_price, Some(1_001));
    assert!(resolved.resolved_at.is_some());

    let down = h.joining_pool().await;
    assert_eq!(h.resolve(&down, 1_000, 999).await.winner, Some(Side::Down));
}

#[tokio::test]
async fn test_tie_goes_to_down() {
    let h = TestHarness::new();
    let pool = h.joining_pool().await;

    let resolved = h.resolve(&pool, 42_000_000, 42_000_000).await;

    assert_eq!(resolved.winner, Some(Side::Down));
}

#[tokio::test]
async fn test_resolution_is_idempotent() {
    let h = TestHarness::new();
    let pool = h.joining_pool().await;
    h.resolve(&pool, 10, 20).await;

    let report = h.engine.process_resolutions().await.unwrap();
    assert_eq!(report, ResolutionReport::default());

    let snapshots = h.store.snapshots_for_pool(pool.id).await.unwrap();
    assert_eq!(snapshots.len(), 2);
    assert_eq!(
        snapshots.iter().filter(|s| s.kind == SnapshotKind::Final).count(),
        1
    );
}

#[tokio::test]
async fn test_overlapping_resolution_sweeps_resolve_once() {
    let h = TestHarness::new();
    let pool = h.joining_pool().await;
    h.oracle.set_price("BTC", 100);
    h.clock.set(pool.lock_time + Duration::seconds(1));
    h.engine.process_status_transitions().await.unwrap();

    h.oracle.set_price("BTC", 90);
    h.clock.set(pool.end_time + Duration::seconds(1));
    let (a, b) = tokio::join!(h.engine.process_resolutions(), h.engine.process_resolutions());
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.resolved + b.resolved, 1);
    assert_eq!(a.failed + b.failed, 0);

    let finals = h
        .store
        .snapshots_for_pool(pool.id)
        .await
        .unwrap()
        .into_iter()
        .filter(|s| s.kind == SnapshotKind::Final)
        .count();
    assert_eq!(finals, 1);
    assert_eq!(
        h.store.events_of_kind(EventKind::PoolResolved).await.unwrap().len(),
        1
    );

    // The losing sweep sees the pool resolved before touching the chain
    assert_eq!(h.gateway.resolved(), 1);

    let resolved = h.pool(pool.id).await;
    assert_eq!(resolved.status, PoolStatus::Resolved);
    assert_eq!(resolved.winner, Some(Side::Down));
}

#[tokio::test]
async fn test_resolution_survives_chain_failure() {
    let h = TestHarness::new();
    let pool = h.joining_pool().await;
    h.gateway.set_failing(true);

    let resolved = h.resolve(&pool, 10, 5).await;

    assert_eq!(resolved.winner, Some(Side::Down));
    assert_eq!(h.gateway.resolved(), 1);
}

#[tokio::test]
async fn test_oracle_outage_keeps_pool_active() {
    let h = TestHarness::new();
    let pool = h.joining_pool().await;
    h.oracle.set_price("BTC", 10);
    h.clock.set(pool.lock_time + Duration::seconds(1));
    h.engine.process_status_transitions().await.unwrap();

    h.clock.set(pool.end_time + Duration::seconds(1));
    h.oracle.set_failing(true);
    let report = h.engine.process_resolutions().await.unwrap();

    assert_eq!(report.failed, 1);
    let still_active = h.pool(pool.id).await;
    assert_eq!(still_active.status, PoolStatus::Active);
    assert!(still_active.final_price.is_none());
    assert!(still_active.winner.is_none());
}

#[tokio::test]
async fn test_claimable_after_delay() {
    let h = TestHarness::new();
    let pool = h.joining_pool().await;
    h.resolve(&pool, 10, 20).await;

    // Still inside the delay
    let report = h.engine.process_resolutions().await.unwrap();
    assert_eq!(report.claimable, 0);
    assert_eq!(h.pool(pool.id).await.status, PoolStatus::Resolved);

    h.clock
        .advance(h.config.scheduler.claimable_delay() + Duration::seconds(1));
    let report = h.engine.process_resolutions().await.unwrap();
    assert_eq!(report.claimable, 1);
    assert_eq!(h.pool(pool.id).await.status, PoolStatus::Claimable);
}

#[tokio::test]
async fn test_lifecycle_is_monotonic() {
    let h = TestHarness::new();
    let pool = h.create_pool().await;
    let settled = h.settle(&pool, 100, 200).await;

    let statuses: Vec<_> = h.sink.updates_for(pool.id).iter().map(|u| u.status).collect();
    assert_eq!(
        statuses,
        vec![
            PoolStatus::Joining,
            PoolStatus::Active,
            PoolStatus::Resolved,
            PoolStatus::Claimable
        ]
    );
    assert!(statuses.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(settled.strike_price, Some(100));
    assert_eq!(settled.final_price, Some(200));

    // Nothing moves a claimable pool
    h.clock.advance(Duration::days(2));
    h.engine.process_status_transitions().await.unwrap();
    h.engine.process_resolutions().await.unwrap();
    assert_eq!(h.pool(pool.id).await.status, PoolStatus::Claimable);
}

#[tokio::test]
async fn test_cleanup_removes_only_empty_old_pools() {
    let h = TestHarness::new();

    // Same schedule, so one settle drives both
    let empty = h.joining_pool().await;
    let funded = h.joining_pool().await;
    h.deposit(&funded, &wallet(), Side::Up, 5_000_000).await;

    h.settle(&empty, 100, 100).await;
    assert_eq!(h.pool(funded.id).await.status, PoolStatus::Claimable);

    // Not old enough yet
    assert_eq!(h.engine.cleanup_empty_pools(Duration::hours(1)).await, 0);

    h.clock.advance(Duration::hours(2));
    let deleted = h.engine.cleanup_empty_pools(Duration::hours(1)).await;
    assert_eq!(deleted, 1);

    assert!(h.store.find_pool(empty.id).await.unwrap().is_none());
    assert!(h.store.snapshots_for_pool(empty.id).await.unwrap().is_empty());
    assert_eq!(h.pool(funded.id).await.status, PoolStatus::Claimable);
    assert_eq!(h.store.snapshots_for_pool(funded.id).await.unwrap().len(), 2);

    let cleanups = h.store.events_of_kind(EventKind::PoolsCleanup).await.unwrap();
    assert_eq!(cleanups.len(), 1);
    assert_eq!(cleanups[0].payload["deleted"], 1);
}

#[tokio::test]
async fn test_cleanup_ignores_unsettled_pools() {
    let h = TestHarness::new();
    let pool = h.joining_pool().await;

    h.clock.set(pool.end_time + Duration::days(30));
    assert_eq!(h.engine.cleanup_empty_pools(Duration::hours(1)).await, 0);
    assert!(h.store.find_pool(pool.id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_cleanup_event_names_only_deleted_pools() {
    let h = TestHarness::new();
    let empty = h.joining_pool().await;
    let funded = h.joining_pool().await;
    h.deposit(&funded, &wallet(), Side::Down, 2_000_000).await;
    h.settle(&empty, 100, 100).await;
    h.clock.advance(Duration::hours(2));

    // Listed while still empty, funded before the delete
    h.scripted.add_stale_cleanup_candidate(h.pool(funded.id).await);

    assert_eq!(h.engine.cleanup_empty_pools(Duration::hours(1)).await, 1);
    assert!(h.store.find_pool(funded.id).await.unwrap().is_some());

    let cleanups = h.store.events_of_kind(EventKind::PoolsCleanup).await.unwrap();
    assert_eq!(cleanups.len(), 1);
    assert_eq!(cleanups[0].payload["deleted"], 1);
    assert_eq!(
        cleanups[0].payload["pool_ids"],
        serde_json::json!([empty.id.to_string()])
    );
}
