use crate::clock::Clock;
use crate::config::{PoolTemplate, SchedulerConfig};
use crate::error::{AppError, AppResult, ReasonCode};
use crate::models::{
    EventKind, NewEvent, NewPool, Pool, PoolStatus, PriceSnapshot, Side, SnapshotKind,
};
use crate::oracle::PriceOracle;
use crate::repositories::{Deadline, PoolStore};
use crate::solana_client::{pool_seed, GatewayError, ProgramAccounts, SettlementGateway};
use crate::websocket::{NotificationSink, PoolUpdate};
use crate::EngineDeps;
use chrono::Duration;
use futures::future::join_all;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Upper bound on UPCOMING pools moved to JOINING per sweep
const JOIN_BATCH_LIMIT: usize = 1000;

/// Longest accepted duration, join window or lock buffer (one year)
const MAX_WINDOW_SECS: u64 = 365 * 86_400;

/// Result of a best-effort on-chain call, captured instead of propagated
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum SettlementOutcome {
    Submitted(String),
    Failed(String),
}

impl SettlementOutcome {
    fn capture(result: Result<String, GatewayError>) -> Self {
        match result {
            Ok(signature) => SettlementOutcome::Submitted(signature),
            Err(e) => SettlementOutcome::Failed(e.to_string()),
        }
    }

    pub fn is_submitted(&self) -> bool {
        matches!(self, SettlementOutcome::Submitted(_))
    }
}

/// Counts from one status-transition sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransitionReport {
    pub joined: usize,
    pub activated: usize,
    pub failed: usize,
}

/// Counts from one resolution sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResolutionReport {
    pub resolved: usize,
    pub claimable: usize,
    pub failed: usize,
}

/// Drives pools through UPCOMING → JOINING → ACTIVE → RESOLVED → CLAIMABLE.
///
/// Every transition is a conditional store update, so sweeps may overlap or
/// repeat without double-capturing prices.
pub struct SettlementEngine {
    store: Arc<dyn PoolStore>,
    oracle: Arc<dyn PriceOracle>,
    gateway: Arc<dyn SettlementGateway>,
    notifier: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    accounts: ProgramAccounts,
    config: SchedulerConfig,
}

impl SettlementEngine {
    pub fn new(deps: EngineDeps, config: SchedulerConfig) -> Self {
        Self {
            store: deps.store,
            oracle: deps.oracle,
            gateway: deps.gateway,
            notifier: deps.notifier,
            clock: deps.clock,
            accounts: deps.accounts,
            config,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Authority the gateway signs with, if configured
    pub fn authority(&self) -> Option<String> {
        self.gateway.authority()
    }

    // ========================================================================
    // Creation
    // ========================================================================

    /// Create the next pool for a template
    pub async fn create_pool(&self, template: &PoolTemplate) -> AppResult<Pool> {
        self.create_pool_manual(
            &template.asset,
            template.duration_secs,
            template.join_window_secs,
            &template.interval_key,
            template.lock_buffer_secs,
        )
        .await
    }

    /// Create a pool with explicit timing.
    ///
    /// `lock_time = now + join_window`, `start_time = lock_time + lock_buffer`,
    /// `end_time = start_time + duration`.
    pub async fn create_pool_manual(
        &self,
        asset: &str,
        duration_secs: u64,
        join_window_secs: u64,
        interval_key: &str,
        lock_buffer_secs: u64,
    ) -> AppResult<Pool> {
        if !self.config.is_asset_supported(asset) {
            return Err(AppError::rejected(
                ReasonCode::ValidationError,
                format!("Unsupported asset: {}", asset),
            ));
        }

        let secs = |value: u64, name: &str| -> AppResult<Duration> {
            if value > MAX_WINDOW_SECS {
                return Err(AppError::rejected(
                    ReasonCode::ValidationError,
                    format!("{} of {}s exceeds {}s", name, value, MAX_WINDOW_SECS),
                ));
            }
            Ok(Duration::seconds(value as i64))
        };

        let now = self.clock.now();
        let lock_time = now + secs(join_window_secs, "join window")?;
        let start_time = lock_time + secs(lock_buffer_secs, "lock buffer")?;
        let end_time = start_time + secs(duration_secs, "duration")?;

        let id = Uuid::new_v4();
        let seed = pool_seed(id);
        let (pool_address, _) = self.accounts.pool_address(&seed);

        let pool = NewPool {
            id,
            pool_seed: hex::encode(seed),
            pool_pubkey: Some(pool_address.to_string()),
            asset: asset.to_string(),
            interval_key: interval_key.to_string(),
            lock_time,
            start_time,
            end_time,
        }
        .into_pool(now);

        pool.validate_schedule()
            .map_err(|e| AppError::rejected(ReasonCode::ValidationError, e))?;

        // Phase 1: on-chain initialisation, best effort
        let onchain = SettlementOutcome::capture(self.gateway.initialize_pool(&pool).await);
        if let SettlementOutcome::Failed(reason) = &onchain {
            warn!(pool_id = %pool.id, "On-chain pool initialization failed: {}", reason);
        }

        // Phase 2: book of record
        self.store.insert_pool(&pool).await?;

        info!(
            pool_id = %pool.id,
            asset = %pool.asset,
            interval = %pool.interval_key,
            "Pool created, locks at {}",
            pool.lock_time
        );

        self.record_event(
            EventKind::PoolCreated,
            pool.id,
            json!({
                "asset": pool.asset,
                "interval_key": pool.interval_key,
                "pool_pubkey": pool.pool_pubkey,
                "lock_time": pool.lock_time,
                "start_time": pool.start_time,
                "end_time": pool.end_time,
                "onchain": onchain,
            }),
        )
        .await;
        self.notifier.emit_pool_created(&pool);

        Ok(pool)
    }

    // ========================================================================
    // Status transitions
    // ========================================================================

    /// UPCOMING → JOINING for every upcoming pool, then JOINING → ACTIVE for
    /// pools past their lock time.
    ///
    /// A pool first observed after its lock time goes through JOINING and is
    /// activated in the same sweep.
    pub async fn process_status_transitions(&self) -> AppResult<TransitionReport> {
        let mut report = TransitionReport::default();

        let upcoming = self
            .store
            .list_pools(Some(PoolStatus::Upcoming), JOIN_BATCH_LIMIT)
            .await?;
        let joined = join_all(upcoming.iter().map(|pool| self.open_pool(pool))).await;
        for (pool, result) in upcoming.iter().zip(joined) {
            match result {
                Ok(true) => report.joined += 1,
                Ok(false) => {}
                Err(e) => {
                    report.failed += 1;
                    error!(pool_id = %pool.id, "Failed to open pool: {}", e);
                }
            }
        }

        let now = self.clock.now();
        let due = self
            .store
            .find_due_pools(PoolStatus::Joining, Deadline::LockTime, now)
            .await?;
        let activated = join_all(due.iter().map(|pool| self.activate_pool(pool))).await;
        for (pool, result) in due.iter().zip(activated) {
            match result {
                Ok(true) => report.activated += 1,
                Ok(false) => debug!(pool_id = %pool.id, "Pool already activated"),
                Err(e) => {
                    report.failed += 1;
                    warn!(pool_id = %pool.id, asset = %pool.asset, "Activation skipped: {}", e);
                }
            }
        }

        if report != TransitionReport::default() {
            info!(
                "Status sweep: {} joined, {} activated, {} failed",
                report.joined, report.activated, report.failed
            );
        }
        Ok(report)
    }

    async fn open_pool(&self, pool: &Pool) -> AppResult<bool> {
        if !self
            .store
            .advance_status(pool.id, PoolStatus::Upcoming, PoolStatus::Joining)
            .await?
        {
            return Ok(false);
        }

        debug!(pool_id = %pool.id, "Pool open for joining");
        self.record_event(EventKind::PoolJoining, pool.id, json!({ "lock_time": pool.lock_time }))
            .await;
        self.notifier
            .emit_pool_status_changed(PoolUpdate::status(pool.id, PoolStatus::Joining));
        Ok(true)
    }

    async fn activate_pool(&self, pool: &Pool) -> AppResult<bool> {
        let tick = self.oracle.get_spot_price(&pool.asset).await?;
        let snapshot = PriceSnapshot::capture(pool.id, SnapshotKind::Strike, &tick);

        if !self.store.activate_pool(pool.id, &snapshot).await? {
            return Ok(false);
        }

        info!(pool_id = %pool.id, asset = %pool.asset, strike = tick.price, "Pool activated");

        self.record_event(
            EventKind::PoolActivated,
            pool.id,
            json!({
                "strike_price": tick.price.to_string(),
                "source": tick.source,
                "content_hash": tick.content_hash,
            }),
        )
        .await;
        self.notifier.emit_pool_status_changed(PoolUpdate {
            strike_price: Some(tick.price),
            ..PoolUpdate::status(pool.id, PoolStatus::Active)
        });
        Ok(true)
    }

    // ========================================================================
    // Resolution
    // ========================================================================

    /// ACTIVE → RESOLVED for pools past their end time, then RESOLVED →
    /// CLAIMABLE for pools resolved longer ago than the claimable delay.
    pub async fn process_resolutions(&self) -> AppResult<ResolutionReport> {
        let mut report = ResolutionReport::default();
        let now = self.clock.now();

        let due = self
            .store
            .find_due_pools(PoolStatus::Active, Deadline::EndTime, now)
            .await?;
        let resolved = join_all(due.iter().map(|pool| self.resolve_pool(pool))).await;
        for (pool, result) in due.iter().zip(resolved) {
            match result {
                Ok(true) => report.resolved += 1,
                Ok(false) => debug!(pool_id = %pool.id, "Pool already resolved"),
                Err(e) => {
                    report.failed += 1;
                    warn!(pool_id = %pool.id, asset = %pool.asset, "Resolution skipped: {}", e);
                }
            }
        }

        let cutoff = now - self.config.claimable_delay();
        let ready = self
            .store
            .find_due_pools(PoolStatus::Resolved, Deadline::ResolvedAt, cutoff)
            .await?;
        let flipped = join_all(ready.iter().map(|pool| self.make_claimable(pool))).await;
        for (pool, result) in ready.iter().zip(flipped) {
            match result {
                Ok(true) => report.claimable += 1,
                Ok(false) => {}
                Err(e) => {
                    report.failed += 1;
                    error!(pool_id = %pool.id, "Failed to mark pool claimable: {}", e);
                }
            }
        }

        if report != ResolutionReport::default() {
            info!(
                "Resolution sweep: {} resolved, {} claimable, {} failed",
                report.resolved, report.claimable, report.failed
            );
        }
        Ok(report)
    }

    async fn resolve_pool(&self, pool: &Pool) -> AppResult<bool> {
        let strike = pool.strike_price.ok_or_else(|| {
            AppError::Message(format!("Active pool {} has no strike price", pool.id))
        })?;

        let tick = self.oracle.get_spot_price(&pool.asset).await?;
        let winner = Side::from_prices(strike, tick.price);

        // An overlapping sweep may have resolved it during the price fetch
        let still_active = self
            .store
            .find_pool(pool.id)
            .await?
            .map_or(false, |current| current.status == PoolStatus::Active);
        if !still_active {
            return Ok(false);
        }

        // Phase 1: on-chain resolution, best effort
        let onchain = SettlementOutcome::capture(
            self.gateway.resolve_pool(pool, strike, tick.price).await,
        );
        if let SettlementOutcome::Failed(reason) = &onchain {
            warn!(pool_id = %pool.id, "On-chain resolution failed: {}", reason);
        }

        // Phase 2: book of record
        let snapshot = PriceSnapshot::capture(pool.id, SnapshotKind::Final, &tick);
        let resolved_at = self.clock.now();
        if !self
            .store
            .resolve_pool(pool.id, &snapshot, winner, resolved_at)
            .await?
        {
            return Ok(false);
        }

        info!(
            pool_id = %pool.id,
            asset = %pool.asset,
            strike = strike,
            final_price = tick.price,
            winner = %winner,
            "Pool resolved"
        );

        self.record_event(
            EventKind::PoolResolved,
            pool.id,
            json!({
                "strike_price": strike.to_string(),
                "final_price": tick.price.to_string(),
                "winner": winner,
                "total_up": pool.total_up.to_string(),
                "total_down": pool.total_down.to_string(),
                "content_hash": tick.content_hash,
                "onchain": onchain,
            }),
        )
        .await;
        self.notifier.emit_pool_status_changed(PoolUpdate {
            strike_price: Some(strike),
            final_price: Some(tick.price),
            winner: Some(winner),
            ..PoolUpdate::status(pool.id, PoolStatus::Resolved)
        });
        Ok(true)
    }

    async fn make_claimable(&self, pool: &Pool) -> AppResult<bool> {
        if !self
            .store
            .advance_status(pool.id, PoolStatus::Resolved, PoolStatus::Claimable)
            .await?
        {
            return Ok(false);
        }

        debug!(pool_id = %pool.id, "Pool claimable");
        self.record_event(EventKind::PoolClaimable, pool.id, json!({})).await;
        self.notifier
            .emit_pool_status_changed(PoolUpdate::status(pool.id, PoolStatus::Claimable));
        Ok(true)
    }

    // ========================================================================
    // Cleanup
    // ========================================================================

    /// Delete settled pools with no stake that ended more than `retention` ago.
    /// Returns the number deleted; store failures are logged and count as zero.
    pub async fn cleanup_empty_pools(&self, retention: Duration) -> u64 {
        let cutoff = self.clock.now() - retention;

        let candidates = match self.store.find_cleanup_candidates(cutoff).await {
            Ok(pools) => pools,
            Err(e) => {
                error!("Cleanup query failed: {}", e);
                return 0;
            }
        };
        if candidates.is_empty() {
            return 0;
        }

        let ids: Vec<Uuid> = candidates.iter().map(|p| p.id).collect();
        let deleted = match self.store.delete_empty_pools(&ids).await {
            Ok(deleted) => deleted,
            Err(e) => {
                error!("Cleanup delete failed: {}", e);
                return 0;
            }
        };
        if deleted.len() < ids.len() {
            debug!(skipped = ids.len() - deleted.len(), "Cleanup candidates gained stake");
        }
        if deleted.is_empty() {
            return 0;
        }

        info!("Cleaned up {} empty pools", deleted.len());
        self.append_event(NewEvent::new(
            EventKind::PoolsCleanup,
            None,
            json!({ "deleted": deleted.len(), "pool_ids": deleted, "cutoff": cutoff }),
        ))
        .await;
        deleted.len() as u64
    }

    async fn record_event(&self, kind: EventKind, pool_id: Uuid, payload: Value) {
        self.append_event(NewEvent::new(kind, Some(pool_id), payload)).await;
    }

    /// Audit log writes never fail the transition they describe
    async fn append_event(&self, event: NewEvent) {
        let entry = event.into_entry(self.clock.now());
        if let Err(e) = self.store.append_event(&entry).await {
            warn!("Failed to append {} event: {}", entry.kind.as_str(), e);
        }
    }
}
