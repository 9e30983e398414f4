//! Pool store: the engine's book of record.
//!
//! Every status change is a conditional update keyed on the expected prior
//! status, so overlapping sweeps and concurrent reconcilers cannot apply the
//! same transition twice.

pub mod memory_store;
pub mod pg_store;

pub use memory_store::MemoryPoolStore;
pub use pg_store::PgPoolStore;

use crate::error::StoreError;
use crate::models::{Bet, EventKind, EventLogEntry, NewBet, Pool, PoolStatus, PriceSnapshot, Side};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Pool timestamp a sweep compares against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deadline {
    LockTime,
    EndTime,
    ResolvedAt,
}

impl Deadline {
    /// Value of this deadline on a pool; `None` when not yet set
    pub fn of(&self, pool: &Pool) -> Option<DateTime<Utc>> {
        match self {
            Deadline::LockTime => Some(pool.lock_time),
            Deadline::EndTime => Some(pool.end_time),
            Deadline::ResolvedAt => pool.resolved_at,
        }
    }

    pub fn column(&self) -> &'static str {
        match self {
            Deadline::LockTime => "lock_time",
            Deadline::EndTime => "end_time",
            Deadline::ResolvedAt => "resolved_at",
        }
    }
}

#[async_trait]
pub trait PoolStore: Send + Sync {
    // ---- pools ----------------------------------------------------------

    async fn insert_pool(&self, pool: &Pool) -> Result<(), StoreError>;

    async fn find_pool(&self, id: Uuid) -> Result<Option<Pool>, StoreError>;

    /// Newest first, optionally filtered by status
    async fn list_pools(&self, status: Option<PoolStatus>, limit: usize) -> Result<Vec<Pool>, StoreError>;

    /// Pools in `status` whose `deadline` is at or before `at`
    async fn find_due_pools(
        &self,
        status: PoolStatus,
        deadline: Deadline,
        at: DateTime<Utc>,
    ) -> Result<Vec<Pool>, StoreError>;

    /// Move `from` to `to` only if the pool is still in `from`
    async fn advance_status(&self, id: Uuid, from: PoolStatus, to: PoolStatus) -> Result<bool, StoreError>;

    /// JOINING to ACTIVE with the strike price and its snapshot, atomically
    async fn activate_pool(&self, id: Uuid, strike: &PriceSnapshot) -> Result<bool, StoreError>;

    /// ACTIVE to RESOLVED with final price, winner and snapshot, atomically
    async fn resolve_pool(
        &self,
        id: Uuid,
        final_snapshot: &PriceSnapshot,
        winner: Side,
        resolved_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Settled pools with zero totals whose end time is before `ended_before`
    async fn find_cleanup_candidates(&self, ended_before: DateTime<Utc>) -> Result<Vec<Pool>, StoreError>;

    /// Delete the given pools and their snapshots, skipping any that gained stake.
    /// Returns the ids actually deleted.
    async fn delete_empty_pools(&self, ids: &[Uuid]) -> Result<Vec<Uuid>, StoreError>;

    // ---- bets -----------------------------------------------------------

    /// Insert a verified bet and add its amount to the pool total in one unit.
    /// Fails with `Duplicate` on a second bet for (pool, bettor) or a reused deposit tx.
    async fn insert_bet_and_credit(&self, bet: NewBet, at: DateTime<Utc>) -> Result<Bet, StoreError>;

    async fn find_bet(&self, pool_id: Uuid, bettor: &str) -> Result<Option<Bet>, StoreError>;

    async fn find_bet_by_id(&self, id: Uuid) -> Result<Option<Bet>, StoreError>;

    async fn find_bet_by_deposit_tx(&self, deposit_tx: &str) -> Result<Option<Bet>, StoreError>;

    async fn bets_for_pool(&self, pool_id: Uuid) -> Result<Vec<Bet>, StoreError>;

    async fn bets_for_bettor(&self, bettor: &str) -> Result<Vec<Bet>, StoreError>;

    /// Reserve an unclaimed bet for a server-executed payout. False when the
    /// bet is already claimed or another reservation holds it.
    async fn reserve_claim(&self, bet_id: Uuid, at: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Drop a reservation on a still unclaimed bet
    async fn release_claim(&self, bet_id: Uuid) -> Result<bool, StoreError>;

    /// Set claimed, payout and claim tx only if the bet is still unclaimed.
    /// Clears any reservation.
    async fn mark_bet_claimed(
        &self,
        bet_id: Uuid,
        payout: u64,
        claim_tx: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    // ---- snapshots and audit log ---------------------------------------

    async fn snapshots_for_pool(&self, pool_id: Uuid) -> Result<Vec<PriceSnapshot>, StoreError>;

    async fn append_event(&self, entry: &EventLogEntry) -> Result<(), StoreError>;

    async fn events_for_entity(&self, entity_id: Uuid) -> Result<Vec<EventLogEntry>, StoreError>;

    async fn events_of_kind(&self, kind: EventKind) -> Result<Vec<EventLogEntry>, StoreError>;
}
