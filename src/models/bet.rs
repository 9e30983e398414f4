use super::Side;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One bettor's stake in one pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bet {
    pub id: Uuid,
    pub pool_id: Uuid,
    pub bettor: String,
    pub side: Side,
    /// Minor units, taken from the verified ledger delta
    pub amount: u64,
    pub deposit_tx: Option<String>,
    pub claimed: bool,
    pub claim_tx: Option<String>,
    pub payout_amount: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    /// Set while a server-executed payout is reserved and not yet recorded
    pub claim_pending_at: Option<DateTime<Utc>>,
}

impl Bet {
    pub fn is_claim_pending(&self) -> bool {
        !self.claimed && self.claim_pending_at.is_some()
    }
}

/// A verified deposit ready to become a bet
#[derive(Debug, Clone)]
pub struct NewBet {
    pub pool_id: Uuid,
    pub bettor: String,
    pub side: Side,
    pub amount: u64,
    pub deposit_tx: String,
}

impl NewBet {
    pub fn into_bet(self, created_at: DateTime<Utc>) -> Bet {
        Bet {
            id: Uuid::new_v4(),
            pool_id: self.pool_id,
            bettor: self.bettor,
            side: self.side,
            amount: self.amount,
            deposit_tx: Some(self.deposit_tx),
            claimed: false,
            claim_tx: None,
            payout_amount: None,
            created_at,
            claimed_at: None,
            claim_pending_at: None,
        }
    }
}
