use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Audit event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    PoolCreated,
    PoolJoining,
    PoolActivated,
    PoolResolved,
    PoolClaimable,
    PoolsCleanup,
    DepositConfirmed,
    ClaimConfirmed,
}

impl EventKind {
    pub fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "POOL_CREATED" => Ok(EventKind::PoolCreated),
            "POOL_JOINING" => Ok(EventKind::PoolJoining),
            "POOL_ACTIVATED" => Ok(EventKind::PoolActivated),
            "POOL_RESOLVED" => Ok(EventKind::PoolResolved),
            "POOL_CLAIMABLE" => Ok(EventKind::PoolClaimable),
            "POOLS_CLEANUP" => Ok(EventKind::PoolsCleanup),
            "DEPOSIT_CONFIRMED" => Ok(EventKind::DepositConfirmed),
            "CLAIM_CONFIRMED" => Ok(EventKind::ClaimConfirmed),
            _ => Err(format!("Invalid event type: {}", s)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::PoolCreated => "POOL_CREATED",
            EventKind::PoolJoining => "POOL_JOINING",
            EventKind::PoolActivated => "POOL_ACTIVATED",
            EventKind::PoolResolved => "POOL_RESOLVED",
            EventKind::PoolClaimable => "POOL_CLAIMABLE",
            EventKind::PoolsCleanup => "POOLS_CLEANUP",
            EventKind::DepositConfirmed => "DEPOSIT_CONFIRMED",
            EventKind::ClaimConfirmed => "CLAIM_CONFIRMED",
        }
    }
}

/// Append-only audit trail entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id: Uuid,
    pub kind: EventKind,
    pub entity_id: Option<Uuid>,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

/// Entry to append
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub kind: EventKind,
    pub entity_id: Option<Uuid>,
    pub payload: Value,
}

impl NewEvent {
    pub fn new(kind: EventKind, entity_id: Option<Uuid>, payload: Value) -> Self {
        Self {
            kind,
            entity_id,
            payload,
        }
    }

    pub fn into_entry(self, created_at: DateTime<Utc>) -> EventLogEntry {
        EventLogEntry {
            id: Uuid::new_v4(),
            kind: self.kind,
            entity_id: self.entity_id,
            payload: self.payload,
            created_at,
        }
    }
}
