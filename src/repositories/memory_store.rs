//! In-process pool store with the same conditional-update rules as Postgres

use super::{Deadline, PoolStore};
use crate::error::StoreError;
use crate::models::{
    Bet, EventKind, EventLogEntry, NewBet, Pool, PoolStatus, PriceSnapshot, Side,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct MemoryState {
    pools: HashMap<Uuid, Pool>,
    bets: HashMap<Uuid, Bet>,
    snapshots: Vec<PriceSnapshot>,
    events: Vec<EventLogEntry>,
}

impl MemoryState {
    fn has_snapshot(&self, pool_id: Uuid, snapshot: &PriceSnapshot) -> bool {
        self.snapshots
            .iter()
            .any(|s| s.pool_id == pool_id && s.kind == snapshot.kind)
    }
}

/// Pool store held entirely in memory
#[derive(Default)]
pub struct MemoryPoolStore {
    state: RwLock<MemoryState>,
}

impl MemoryPoolStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PoolStore for MemoryPoolStore {
    async fn insert_pool(&self, pool: &Pool) -> Result<(), StoreError> {
        pool.validate_schedule().map_err(StoreError::ConstraintViolation)?;

        let mut state = self.state.write().await;
        if state.pools.contains_key(&pool.id)
            || state.pools.values().any(|p| p.pool_seed == pool.pool_seed)
        {
            return Err(StoreError::Duplicate(format!("pool {}", pool.id)));
        }
        state.pools.insert(pool.id, pool.clone());
        Ok(())
    }

    async fn find_pool(&self, id: Uuid) -> Result<Option<Pool>, StoreError> {
        Ok(self.state.read().await.pools.get(&id).cloned())
    }

    async fn list_pools(&self, status: Option<PoolStatus>, limit: usize) -> Result<Vec<Pool>, StoreError> {
        let state = self.state.read().await;
        let mut pools: Vec<Pool> = state
            .pools
            .values()
            .filter(|p| status.map_or(true, |s| p.status == s))
            .cloned()
            .collect();
        pools.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        pools.truncate(limit);
        Ok(pools)
    }

    async fn find_due_pools(
        &self,
        status: PoolStatus,
        deadline: Deadline,
        at: DateTime<Utc>,
    ) -> Result<Vec<Pool>, StoreError> {
        let state = self.state.read().await;
        let mut pools: Vec<Pool> = state
            .pools
            .values()
            .filter(|p| p.status == status)
            .filter(|p| deadline.of(p).map_or(false, |t| t <= at))
            .cloned()
            .collect();
        pools.sort_by_key(|p| deadline.of(p));
        Ok(pools)
    }

    async fn advance_status(&self, id: Uuid, from: PoolStatus, to: PoolStatus) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        match state.pools.get_mut(&id) {
            Some(pool) if pool.status == from => {
                pool.status = to;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn activate_pool(&self, id: Uuid, strike: &PriceSnapshot) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        if state.has_snapshot(id, strike) {
            return Ok(false);
        }
        let Some(pool) = state.pools.get_mut(&id) else {
            return Ok(false);
        };
        if pool.status != PoolStatus::Joining {
            return Ok(false);
        }
        pool.status = PoolStatus::Active;
        pool.strike_price = Some(strike.price);
        state.snapshots.push(strike.clone());
        Ok(true)
    }

    async fn resolve_pool(
        &self,
        id: Uuid,
        final_snapshot: &PriceSnapshot,
        winner: Side,
        resolved_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        if state.has_snapshot(id, final_snapshot) {
            return Ok(false);
        }
        let Some(pool) = state.pools.get_mut(&id) else {
            return Ok(false);
        };
        if pool.status != PoolStatus::Active {
            return Ok(false);
        }
        pool.status = PoolStatus::Resolved;
        pool.final_price = Some(final_snapshot.price);
        pool.winner = Some(winner);
        pool.resolved_at = Some(resolved_at);
        state.snapshots.push(final_snapshot.clone());
        Ok(true)
    }

    async fn find_cleanup_candidates(&self, ended_before: DateTime<Utc>) -> Result<Vec<Pool>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .pools
            .values()
            .filter(|p| p.status.is_settled() && p.is_empty() && p.end_time < ended_before)
            .cloned()
            .collect())
    }

    async fn delete_empty_pools(&self, ids: &[Uuid]) -> Result<Vec<Uuid>, StoreError> {
        let mut state = self.state.write().await;
        let deletable: Vec<Uuid> = ids
            .iter()
            .copied()
            .filter(|id| {
                state
                    .pools
                    .get(id)
                    .map_or(false, |p| p.status.is_settled() && p.is_empty())
                    && !state.bets.values().any(|b| b.pool_id == *id)
            })
            .collect();

        state.snapshots.retain(|s| !deletable.contains(&s.pool_id));
        for id in &deletable {
            state.pools.remove(id);
        }
        Ok(deletable)
    }

    async fn insert_bet_and_credit(&self, bet: NewBet, at: DateTime<Utc>) -> Result<Bet, StoreError> {
        if bet.amount == 0 {
            return Err(StoreError::ConstraintViolation("bet amount must be positive".to_string()));
        }

        let mut state = self.state.write().await;
        if state
            .bets
            .values()
            .any(|b| b.pool_id == bet.pool_id && b.bettor == bet.bettor)
        {
            return Err(StoreError::Duplicate(format!(
                "bet for pool {} and bettor {}",
                bet.pool_id, bet.bettor
            )));
        }
        if state
            .bets
            .values()
            .any(|b| b.deposit_tx.as_deref() == Some(bet.deposit_tx.as_str()))
        {
            return Err(StoreError::Duplicate(format!("deposit tx {}", bet.deposit_tx)));
        }

        let pool = state
            .pools
            .get_mut(&bet.pool_id)
            .ok_or_else(|| StoreError::ConstraintViolation(format!("pool {} does not exist", bet.pool_id)))?;
        if pool.status.is_settled() {
            return Err(StoreError::ConstraintViolation(format!(
                "pool {} no longer accepts deposits",
                pool.id
            )));
        }
        match bet.side {
            Side::Up => {
                pool.total_up = pool
                    .total_up
                    .checked_add(bet.amount)
                    .ok_or_else(|| StoreError::ConstraintViolation("total_up overflow".to_string()))?
            }
            Side::Down => {
                pool.total_down = pool
                    .total_down
                    .checked_add(bet.amount)
                    .ok_or_else(|| StoreError::ConstraintViolation("total_down overflow".to_string()))?
            }
        }

        let bet = bet.into_bet(at);
        state.bets.insert(bet.id, bet.clone());
        Ok(bet)
    }

    async fn find_bet(&self, pool_id: Uuid, bettor: &str) -> Result<Option<Bet>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .bets
            .values()
            .find(|b| b.pool_id == pool_id && b.bettor == bettor)
            .cloned())
    }

    async fn find_bet_by_id(&self, id: Uuid) -> Result<Option<Bet>, StoreError> {
        Ok(self.state.read().await.bets.get(&id).cloned())
    }

    async fn find_bet_by_deposit_tx(&self, deposit_tx: &str) -> Result<Option<Bet>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .bets
            .values()
            .find(|b| b.deposit_tx.as_deref() == Some(deposit_tx))
            .cloned())
    }

    async fn bets_for_pool(&self, pool_id: Uuid) -> Result<Vec<Bet>, StoreError> {
        let state = self.state.read().await;
        let mut bets: Vec<Bet> = state
            .bets
            .values()
            .filter(|b| b.pool_id == pool_id)
            .cloned()
            .collect();
        bets.sort_by_key(|b| b.created_at);
        Ok(bets)
    }

    async fn bets_for_bettor(&self, bettor: &str) -> Result<Vec<Bet>, StoreError> {
        let state = self.state.read().await;
        let mut bets: Vec<Bet> = state
            .bets
            .values()
            .filter(|b| b.bettor == bettor)
            .cloned()
            .collect();
        bets.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(bets)
    }

    async fn mark_bet_claimed(
        &self,
        bet_id: Uuid,
        payout: u64,
        claim_tx: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        match state.bets.get_mut(&bet_id) {
            Some(bet) if !bet.claimed => {
                bet.claimed = true;
                bet.payout_amount = Some(payout);
                bet.claim_tx = Some(claim_tx.to_string());
                bet.claimed_at = Some(at);
                bet.claim_pending_at = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn reserve_claim(&self, bet_id: Uuid, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        match state.bets.get_mut(&bet_id) {
            Some(bet) if !bet.claimed && bet.claim_pending_at.is_none() => {
                bet.claim_pending_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_claim(&self, bet_id: Uuid) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        match state.bets.get_mut(&bet_id) {
            Some(bet) if !bet.claimed && bet.claim_pending_at.is_some() => {
                bet.claim_pending_at = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn snapshots_for_pool(&self, pool_id: Uuid) -> Result<Vec<PriceSnapshot>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .snapshots
            .iter()
            .filter(|s| s.pool_id == pool_id)
            .cloned()
            .collect())
    }

    async fn append_event(&self, entry: &EventLogEntry) -> Result<(), StoreError> {
        self.state.write().await.events.push(entry.clone());
        Ok(())
    }

    async fn events_for_entity(&self, entity_id: Uuid) -> Result<Vec<EventLogEntry>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .events
            .iter()
            .filter(|e| e.entity_id == Some(entity_id))
            .cloned()
            .collect())
    }

    async fn events_of_kind(&self, kind: EventKind) -> Result<Vec<EventLogEntry>, StoreError> {
        let state = self.state.read().await;
        Ok(state.events.iter().filter(|e| e.kind == kind).cloned().collect())
    }
}
