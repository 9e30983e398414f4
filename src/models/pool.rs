use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Pool lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PoolStatus {
    Upcoming,
    Joining,
    Active,
    Resolved,
    Claimable,
}

impl PoolStatus {
    /// Convert from database string
    pub fn from_str(s: &str) -> Result<Self, String> {
        match s.to_uppercase().as_str() {
            "UPCOMING" => Ok(PoolStatus::Upcoming),
            "JOINING" => Ok(PoolStatus::Joining),
            "ACTIVE" => Ok(PoolStatus::Active),
            "RESOLVED" => Ok(PoolStatus::Resolved),
            "CLAIMABLE" => Ok(PoolStatus::Claimable),
            _ => Err(format!("Invalid pool status: {}", s)),
        }
    }

    /// Convert to database string
    pub fn as_str(&self) -> &'static str {
        match self {
            PoolStatus::Upcoming => "UPCOMING",
            PoolStatus::Joining => "JOINING",
            PoolStatus::Active => "ACTIVE",
            PoolStatus::Resolved => "RESOLVED",
            PoolStatus::Claimable => "CLAIMABLE",
        }
    }

    /// The single status this one may advance to
    pub fn next(&self) -> Option<PoolStatus> {
        match self {
            PoolStatus::Upcoming => Some(PoolStatus::Joining),
            PoolStatus::Joining => Some(PoolStatus::Active),
            PoolStatus::Active => Some(PoolStatus::Resolved),
            PoolStatus::Resolved => Some(PoolStatus::Claimable),
            PoolStatus::Claimable => None,
        }
    }

    /// Winner and final price are known
    pub fn is_settled(&self) -> bool {
        matches!(self, PoolStatus::Resolved | PoolStatus::Claimable)
    }

    /// Strike price has been captured
    pub fn has_strike(&self) -> bool {
        matches!(
            self,
            PoolStatus::Active | PoolStatus::Resolved | PoolStatus::Claimable
        )
    }
}

impl std::fmt::Display for PoolStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<PoolStatus> for String {
    fn from(status: PoolStatus) -> Self {
        status.as_str().to_string()
    }
}

/// Betting side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Side {
    Up,
    Down,
}

impl Side {
    pub fn from_str(s: &str) -> Result<Self, String> {
        match s.to_uppercase().as_str() {
            "UP" => Ok(Side::Up),
            "DOWN" => Ok(Side::Down),
            _ => Err(format!("Invalid side: {}", s)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Up => "UP",
            Side::Down => "DOWN",
        }
    }

    /// Borsh enum index used by the pool program
    pub fn program_index(&self) -> u8 {
        match self {
            Side::Up => 0,
            Side::Down => 1,
        }
    }

    /// UP only when the final price is strictly above the strike; ties settle DOWN
    pub fn from_prices(strike: u64, final_price: u64) -> Self {
        if final_price > strike {
            Side::Up
        } else {
            Side::Down
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One betting round on one asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool {
    pub id: Uuid,
    /// Hex of the 32-byte seed the on-chain accounts are derived from
    pub pool_seed: String,
    /// Derived pool account address (base58)
    pub pool_pubkey: Option<String>,
    pub asset: String,
    pub interval_key: String,
    pub status: PoolStatus,
    pub lock_time: DateTime<Utc>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub strike_price: Option<u64>,
    pub final_price: Option<u64>,
    pub total_up: u64,
    pub total_down: u64,
    pub winner: Option<Side>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Pool {
    /// Combined stake of both sides
    pub fn total_pool(&self) -> u128 {
        self.total_up as u128 + self.total_down as u128
    }

    pub fn side_total(&self, side: Side) -> u64 {
        match side {
            Side::Up => self.total_up,
            Side::Down => self.total_down,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.total_up == 0 && self.total_down == 0
    }

    /// Check the schedule ordering lockTime < startTime < endTime
    pub fn validate_schedule(&self) -> Result<(), String> {
        if self.lock_time >= self.start_time {
            return Err("lock_time must be before start_time".to_string());
        }
        if self.start_time >= self.end_time {
            return Err("start_time must be before end_time".to_string());
        }
        Ok(())
    }

    /// Seed bytes used for account derivation
    pub fn seed_bytes(&self) -> Result<[u8; 32], String> {
        let bytes = hex::decode(&self.pool_seed).map_err(|e| format!("Invalid pool seed: {}", e))?;
        bytes
            .try_into()
            .map_err(|_| "Pool seed must be 32 bytes".to_string())
    }
}

/// Fields required to persist a freshly scheduled pool
#[derive(Debug, Clone)]
pub struct NewPool {
    pub id: Uuid,
    pub pool_seed: String,
    pub pool_pubkey: Option<String>,
    pub asset: String,
    pub interval_key: String,
    pub lock_time: DateTime<Utc>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl NewPool {
    /// Build the UPCOMING record with zero totals
    pub fn into_pool(self, created_at: DateTime<Utc>) -> Pool {
        Pool {
            id: self.id,
            pool_seed: self.pool_seed,
            pool_pubkey: self.pool_pubkey,
            asset: self.asset,
            interval_key: self.interval_key,
            status: PoolStatus::Upcoming,
            lock_time: self.lock_time,
            start_time: self.start_time,
            end_time: self.end_time,
            strike_price: None,
            final_price: None,
            total_up: 0,
            total_down: 0,
            winner: None,
            resolved_at: None,
            created_at,
        }
    }
}
