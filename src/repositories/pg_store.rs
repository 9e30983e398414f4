//! Postgres pool store

use super::{Deadline, PoolStore};
use crate::error::StoreError;
use crate::models::{
    Bet, EventKind, EventLogEntry, NewBet, Pool, PoolStatus, PriceSnapshot, Side, SnapshotKind,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

const POOL_COLUMNS: &str = "id, pool_seed, pool_pubkey, asset, interval_key, status, lock_time, \
     start_time, end_time, strike_price, final_price, total_up, total_down, winner, resolved_at, created_at";

const BET_COLUMNS: &str = "id, pool_id, bettor, side, amount, deposit_tx, claimed, claim_tx, \
     payout_amount, created_at, claimed_at, claim_pending_at";

const SNAPSHOT_COLUMNS: &str = "id, pool_id, snapshot_type, price, timestamp, source, content_hash";

const EVENT_COLUMNS: &str = "id, event_type, entity_id, payload, created_at";

fn to_numeric(value: u64) -> Decimal {
    Decimal::from(value)
}

fn from_numeric(value: Decimal, field: &str) -> Result<u64, StoreError> {
    value
        .to_u64()
        .ok_or_else(|| StoreError::Corrupt(format!("{} out of range: {}", field, value)))
}

fn from_optional_numeric(value: Option<Decimal>, field: &str) -> Result<Option<u64>, StoreError> {
    value.map(|v| from_numeric(v, field)).transpose()
}

#[derive(Debug, FromRow)]
struct PoolRow {
    id: Uuid,
    pool_seed: String,
    pool_pubkey: Option<String>,
    asset: String,
    interval_key: String,
    status: String,
    lock_time: DateTime<Utc>,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    strike_price: Option<Decimal>,
    final_price: Option<Decimal>,
    total_up: Decimal,
    total_down: Decimal,
    winner: Option<String>,
    resolved_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<PoolRow> for Pool {
    type Error = StoreError;

    fn try_from(row: PoolRow) -> Result<Self, Self::Error> {
        Ok(Pool {
            id: row.id,
            pool_seed: row.pool_seed,
            pool_pubkey: row.pool_pubkey,
            asset: row.asset,
            interval_key: row.interval_key,
            status: PoolStatus::from_str(&row.status).map_err(StoreError::Corrupt)?,
            lock_time: row.lock_time,
            start_time: row.start_time,
            end_time: row.end_time,
            strike_price: from_optional_numeric(row.strike_price, "strike_price")?,
            final_price: from_optional_numeric(row.final_price, "final_price")?,
            total_up: from_numeric(row.total_up, "total_up")?,
            total_down: from_numeric(row.total_down, "total_down")?,
            winner: row
                .winner
                .as_deref()
                .map(Side::from_str)
                .transpose()
                .map_err(StoreError::Corrupt)?,
            resolved_at: row.resolved_at,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct BetRow {
    id: Uuid,
    pool_id: Uuid,
    bettor: String,
    side: String,
    amount: Decimal,
    deposit_tx: Option<String>,
    claimed: bool,
    claim_tx: Option<String>,
    payout_amount: Option<Decimal>,
    created_at: DateTime<Utc>,
    claimed_at: Option<DateTime<Utc>>,
    claim_pending_at: Option<DateTime<Utc>>,
}

impl TryFrom<BetRow> for Bet {
    type Error = StoreError;

    fn try_from(row: BetRow) -> Result<Self, Self::Error> {
        Ok(Bet {
            id: row.id,
            pool_id: row.pool_id,
            bettor: row.bettor,
            side: Side::from_str(&row.side).map_err(StoreError::Corrupt)?,
            amount: from_numeric(row.amount, "amount")?,
            deposit_tx: row.deposit_tx,
            claimed: row.claimed,
            claim_tx: row.claim_tx,
            payout_amount: from_optional_numeric(row.payout_amount, "payout_amount")?,
            created_at: row.created_at,
            claimed_at: row.claimed_at,
            claim_pending_at: row.claim_pending_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct SnapshotRow {
    id: Uuid,
    pool_id: Uuid,
    snapshot_type: String,
    price: Decimal,
    timestamp: DateTime<Utc>,
    source: String,
    content_hash: String,
}

impl TryFrom<SnapshotRow> for PriceSnapshot {
    type Error = StoreError;

    fn try_from(row: SnapshotRow) -> Result<Self, Self::Error> {
        Ok(PriceSnapshot {
            id: row.id,
            pool_id: row.pool_id,
            kind: SnapshotKind::from_str(&row.snapshot_type).map_err(StoreError::Corrupt)?,
            price: from_numeric(row.price, "price")?,
            timestamp: row.timestamp,
            source: row.source,
            content_hash: row.content_hash,
        })
    }
}

#[derive(Debug, FromRow)]
struct EventRow {
    id: Uuid,
    event_type: String,
    entity_id: Option<Uuid>,
    payload: Value,
    created_at: DateTime<Utc>,
}

impl TryFrom<EventRow> for EventLogEntry {
    type Error = StoreError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        Ok(EventLogEntry {
            id: row.id,
            kind: EventKind::from_str(&row.event_type).map_err(StoreError::Corrupt)?,
            entity_id: row.entity_id,
            payload: row.payload,
            created_at: row.created_at,
        })
    }
}

fn into_models<R, T>(rows: Vec<R>) -> Result<Vec<T>, StoreError>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

pub struct PgPoolStore {
    pool: PgPool,
}

impl PgPoolStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl PoolStore for PgPoolStore {
    async fn insert_pool(&self, pool: &Pool) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO pools (id, pool_seed, pool_pubkey, asset, interval_key, status,
                               lock_time, start_time, end_time, total_up, total_down, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(pool.id)
        .bind(&pool.pool_seed)
        .bind(&pool.pool_pubkey)
        .bind(&pool.asset)
        .bind(&pool.interval_key)
        .bind(pool.status.as_str())
        .bind(pool.lock_time)
        .bind(pool.start_time)
        .bind(pool.end_time)
        .bind(to_numeric(pool.total_up))
        .bind(to_numeric(pool.total_down))
        .bind(pool.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_pool(&self, id: Uuid) -> Result<Option<Pool>, StoreError> {
        let row = sqlx::query_as::<_, PoolRow>(&format!(
            "SELECT {} FROM pools WHERE id = $1",
            POOL_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Pool::try_from).transpose()
    }

    async fn list_pools(&self, status: Option<PoolStatus>, limit: usize) -> Result<Vec<Pool>, StoreError> {
        let rows = sqlx::query_as::<_, PoolRow>(&format!(
            "SELECT {} FROM pools WHERE ($1::TEXT IS NULL OR status = $1) ORDER BY created_at DESC LIMIT $2",
            POOL_COLUMNS
        ))
        .bind(status.map(|s| s.as_str()))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        into_models(rows)
    }

    async fn find_due_pools(
        &self,
        status: PoolStatus,
        deadline: Deadline,
        at: DateTime<Utc>,
    ) -> Result<Vec<Pool>, StoreError> {
        let column = deadline.column();
        let rows = sqlx::query_as::<_, PoolRow>(&format!(
            "SELECT {} FROM pools WHERE status = $1 AND {} IS NOT NULL AND {} <= $2 ORDER BY {} ASC",
            POOL_COLUMNS, column, column, column
        ))
        .bind(status.as_str())
        .bind(at)
        .fetch_all(&self.pool)
        .await?;

        into_models(rows)
    }

    async fn advance_status(&self, id: Uuid, from: PoolStatus, to: PoolStatus) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE pools SET status = $3 WHERE id = $1 AND status = $2")
            .bind(id)
            .bind(from.as_str())
            .bind(to.as_str())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn activate_pool(&self, id: Uuid, strike: &PriceSnapshot) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE pools SET status = 'ACTIVE', strike_price = $2 WHERE id = $1 AND status = 'JOINING'",
        )
        .bind(id)
        .bind(to_numeric(strike.price))
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        insert_snapshot(&mut tx, strike).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn resolve_pool(
        &self,
        id: Uuid,
        final_snapshot: &PriceSnapshot,
        winner: Side,
        resolved_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE pools
            SET status = 'RESOLVED', final_price = $2, winner = $3, resolved_at = $4
            WHERE id = $1 AND status = 'ACTIVE'
            "#,
        )
        .bind(id)
        .bind(to_numeric(final_snapshot.price))
        .bind(winner.as_str())
        .bind(resolved_at)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        insert_snapshot(&mut tx, final_snapshot).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn find_cleanup_candidates(&self, ended_before: DateTime<Utc>) -> Result<Vec<Pool>, StoreError> {
        let rows = sqlx::query_as::<_, PoolRow>(&format!(
            r#"
            SELECT {} FROM pools
            WHERE status IN ('RESOLVED', 'CLAIMABLE')
              AND total_up = 0 AND total_down = 0
              AND end_time < $1
            "#,
            POOL_COLUMNS
        ))
        .bind(ended_before)
        .fetch_all(&self.pool)
        .await?;

        into_models(rows)
    }

    async fn delete_empty_pools(&self, ids: &[Uuid]) -> Result<Vec<Uuid>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = self.pool.begin().await?;

        // Lock the still-empty pools so a concurrent deposit cannot slip in
        let deletable: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT p.id FROM pools p
            WHERE p.id = ANY($1)
              AND p.status IN ('RESOLVED', 'CLAIMABLE')
              AND p.total_up = 0 AND p.total_down = 0
              AND NOT EXISTS (SELECT 1 FROM bets b WHERE b.pool_id = p.id)
            FOR UPDATE
            "#,
        )
        .bind(ids.to_vec())
        .fetch_all(&mut *tx)
        .await?;

        if deletable.is_empty() {
            tx.rollback().await?;
            return Ok(deletable);
        }

        sqlx::query("DELETE FROM price_snapshots WHERE pool_id = ANY($1)")
            .bind(&deletable)
            .execute(&mut *tx)
            .await?;

        let deleted: Vec<Uuid> = sqlx::query_scalar("DELETE FROM pools WHERE id = ANY($1) RETURNING id")
            .bind(&deletable)
            .fetch_all(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(deleted)
    }

    async fn insert_bet_and_credit(&self, bet: NewBet, at: DateTime<Utc>) -> Result<Bet, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, BetRow>(&format!(
            r#"
            INSERT INTO bets (id, pool_id, bettor, side, amount, deposit_tx, claimed, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, FALSE, $7)
            RETURNING {}
            "#,
            BET_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(bet.pool_id)
        .bind(&bet.bettor)
        .bind(bet.side.as_str())
        .bind(to_numeric(bet.amount))
        .bind(&bet.deposit_tx)
        .bind(at)
        .fetch_one(&mut *tx)
        .await?;

        let credit_sql = match bet.side {
            Side::Up => {
                "UPDATE pools SET total_up = total_up + $2 \
                 WHERE id = $1 AND status IN ('UPCOMING', 'JOINING', 'ACTIVE')"
            }
            Side::Down => {
                "UPDATE pools SET total_down = total_down + $2 \
                 WHERE id = $1 AND status IN ('UPCOMING', 'JOINING', 'ACTIVE')"
            }
        };

        let credited = sqlx::query(credit_sql)
            .bind(bet.pool_id)
            .bind(to_numeric(bet.amount))
            .execute(&mut *tx)
            .await?;

        if credited.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(StoreError::ConstraintViolation(format!(
                "pool {} no longer accepts deposits",
                bet.pool_id
            )));
        }

        tx.commit().await?;
        Bet::try_from(row)
    }

    async fn find_bet(&self, pool_id: Uuid, bettor: &str) -> Result<Option<Bet>, StoreError> {
        let row = sqlx::query_as::<_, BetRow>(&format!(
            "SELECT {} FROM bets WHERE pool_id = $1 AND bettor = $2",
            BET_COLUMNS
        ))
        .bind(pool_id)
        .bind(bettor)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Bet::try_from).transpose()
    }

    async fn find_bet_by_id(&self, id: Uuid) -> Result<Option<Bet>, StoreError> {
        let row = sqlx::query_as::<_, BetRow>(&format!("SELECT {} FROM bets WHERE id = $1", BET_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Bet::try_from).transpose()
    }

    async fn find_bet_by_deposit_tx(&self, deposit_tx: &str) -> Result<Option<Bet>, StoreError> {
        let row = sqlx::query_as::<_, BetRow>(&format!(
            "SELECT {} FROM bets WHERE deposit_tx = $1",
            BET_COLUMNS
        ))
        .bind(deposit_tx)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Bet::try_from).transpose()
    }

    async fn bets_for_pool(&self, pool_id: Uuid) -> Result<Vec<Bet>, StoreError> {
        let rows = sqlx::query_as::<_, BetRow>(&format!(
            "SELECT {} FROM bets WHERE pool_id = $1 ORDER BY created_at ASC",
            BET_COLUMNS
        ))
        .bind(pool_id)
        .fetch_all(&self.pool)
        .await?;

        into_models(rows)
    }

    async fn bets_for_bettor(&self, bettor: &str) -> Result<Vec<Bet>, StoreError> {
        let rows = sqlx::query_as::<_, BetRow>(&format!(
            "SELECT {} FROM bets WHERE bettor = $1 ORDER BY created_at DESC",
            BET_COLUMNS
        ))
        .bind(bettor)
        .fetch_all(&self.pool)
        .await?;

        into_models(rows)
    }

    async fn mark_bet_claimed(
        &self,
        bet_id: Uuid,
        payout: u64,
        claim_tx: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE bets
            SET claimed = TRUE, payout_amount = $2, claim_tx = $3, claimed_at = $4,
                claim_pending_at = NULL
            WHERE id = $1 AND claimed = FALSE
            "#,
        )
        .bind(bet_id)
        .bind(to_numeric(payout))
        .bind(claim_tx)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn reserve_claim(&self, bet_id: Uuid, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE bets
            SET claim_pending_at = $2
            WHERE id = $1 AND claimed = FALSE AND claim_pending_at IS NULL
            "#,
        )
        .bind(bet_id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn release_claim(&self, bet_id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE bets
            SET claim_pending_at = NULL
            WHERE id = $1 AND claimed = FALSE AND claim_pending_at IS NOT NULL
            "#,
        )
        .bind(bet_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn snapshots_for_pool(&self, pool_id: Uuid) -> Result<Vec<PriceSnapshot>, StoreError> {
        let rows = sqlx::query_as::<_, SnapshotRow>(&format!(
            "SELECT {} FROM price_snapshots WHERE pool_id = $1 ORDER BY timestamp ASC",
            SNAPSHOT_COLUMNS
        ))
        .bind(pool_id)
        .fetch_all(&self.pool)
        .await?;

        into_models(rows)
    }

    async fn append_event(&self, entry: &EventLogEntry) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO event_log (id, event_type, entity_id, payload, created_at) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(entry.id)
        .bind(entry.kind.as_str())
        .bind(entry.entity_id)
        .bind(&entry.payload)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn events_for_entity(&self, entity_id: Uuid) -> Result<Vec<EventLogEntry>, StoreError> {
        let rows = sqlx::query_as::<_, EventRow>(&format!(
            "SELECT {} FROM event_log WHERE entity_id = $1 ORDER BY created_at ASC",
            EVENT_COLUMNS
        ))
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;

        into_models(rows)
    }

    async fn events_of_kind(&self, kind: EventKind) -> Result<Vec<EventLogEntry>, StoreError> {
        let rows = sqlx::query_as::<_, EventRow>(&format!(
            "SELECT {} FROM event_log WHERE event_type = $1 ORDER BY created_at ASC",
            EVENT_COLUMNS
        ))
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await?;

        into_models(rows)
    }
}

async fn insert_snapshot(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    snapshot: &PriceSnapshot,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO price_snapshots (id, pool_id, snapshot_type, price, timestamp, source, content_hash)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(snapshot.id)
    .bind(snapshot.pool_id)
    .bind(snapshot.kind.as_str())
    .bind(to_numeric(snapshot.price))
    .bind(snapshot.timestamp)
    .bind(&snapshot.source)
    .bind(&snapshot.content_hash)
    .execute(&mut **tx)
    .await?;

    Ok(())
}
