//! Parimutuel payout arithmetic
//!
//! All math is exact integer arithmetic in minor units. Every division floors,
//! so rounding always stays in the pool.

use crate::models::{Pool, Side};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const BPS_DENOMINATOR: u128 = 10_000;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PayoutError {
    /// Pool totals too large for a single u64 payout
    #[error("Gross payout exceeds the u64 range")]
    Overflow,
}

/// Payout split for one bet
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutBreakdown {
    pub gross: u64,
    pub fee: u64,
    pub net: u64,
}

impl PayoutBreakdown {
    pub fn is_zero(&self) -> bool {
        self.net == 0
    }
}

/// Payout for `amount` staked on `side`, given the pool totals and winner.
///
/// Losing bets and pools with nothing on the winning side pay zero.
pub fn compute_payout(
    amount: u64,
    side: Side,
    total_up: u64,
    total_down: u64,
    winner: Side,
    fee_bps: u16,
) -> Result<PayoutBreakdown, PayoutError> {
    if side != winner {
        return Ok(PayoutBreakdown::default());
    }

    let winner_total = match winner {
        Side::Up => total_up,
        Side::Down => total_down,
    } as u128;
    if winner_total == 0 {
        return Ok(PayoutBreakdown::default());
    }

    let total = total_up as u128 + total_down as u128;
    let gross = (amount as u128)
        .checked_mul(total)
        .ok_or(PayoutError::Overflow)?
        / winner_total;
    let gross = u64::try_from(gross).map_err(|_| PayoutError::Overflow)?;
    // Capped at gross, so it fits in u64
    let fee = (gross as u128 * fee_bps as u128 / BPS_DENOMINATOR).min(gross as u128) as u64;

    Ok(PayoutBreakdown {
        gross,
        fee,
        net: gross - fee,
    })
}

/// Payout of a bet against a resolved pool; zero while the pool has no winner
pub fn payout_for(
    pool: &Pool,
    side: Side,
    amount: u64,
    fee_bps: u16,
) -> Result<PayoutBreakdown, PayoutError> {
    match pool.winner {
        Some(winner) => compute_payout(amount, side, pool.total_up, pool.total_down, winner, fee_bps),
        None => Ok(PayoutBreakdown::default()),
    }
}
