use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which instant a snapshot captured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SnapshotKind {
    Strike,
    Final,
}

impl SnapshotKind {
    pub fn from_str(s: &str) -> Result<Self, String> {
        match s.to_uppercase().as_str() {
            "STRIKE" => Ok(SnapshotKind::Strike),
            "FINAL" => Ok(SnapshotKind::Final),
            _ => Err(format!("Invalid snapshot type: {}", s)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotKind::Strike => "STRIKE",
            SnapshotKind::Final => "FINAL",
        }
    }
}

/// A spot price as returned by a price provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceTick {
    /// Fixed point, 6 implied decimals
    pub price: u64,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    /// sha256 hex of the raw provider payload
    pub content_hash: String,
}

/// Audit record of a captured strike or final price
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub id: Uuid,
    pub pool_id: Uuid,
    pub kind: SnapshotKind,
    pub price: u64,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub content_hash: String,
}

impl PriceSnapshot {
    pub fn capture(pool_id: Uuid, kind: SnapshotKind, tick: &PriceTick) -> Self {
        Self {
            id: Uuid::new_v4(),
            pool_id,
            kind,
            price: tick.price,
            timestamp: tick.timestamp,
            source: tick.source.clone(),
            content_hash: tick.content_hash.clone(),
        }
    }
}
