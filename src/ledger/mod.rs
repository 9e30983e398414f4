//! Independent reads of the external ledger

pub mod solana_rpc;

pub use solana_rpc::SolanaLedgerVerifier;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Ledger unavailable: {0}")]
    Unavailable(String),

    #[error("Ledger request timed out")]
    Timeout,

    #[error("Invalid ledger response: {0}")]
    InvalidResponse(String),
}

/// Net token balance change of one account within a transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceDelta {
    /// Token account address
    pub account: String,
    pub mint: Option<String>,
    /// Wallet owning the token account
    pub owner: Option<String>,
    /// Minor units; negative for outflows
    pub delta: i128,
}

/// What the ledger reports for one transaction reference
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LedgerTransaction {
    /// False while the transaction is not (yet) visible
    pub found: bool,
    pub succeeded: bool,
    pub balance_deltas: Vec<BalanceDelta>,
    /// Unix seconds, when the ledger reports it
    pub block_time: Option<i64>,
    pub signers: Vec<String>,
}

impl LedgerTransaction {
    pub fn not_found() -> Self {
        Self::default()
    }

    /// Delta recorded on `account`, summed if it appears more than once
    pub fn delta_for(&self, account: &str) -> Option<i128> {
        let mut matched = self
            .balance_deltas
            .iter()
            .filter(|d| d.account == account)
            .peekable();
        matched.peek()?;
        Some(matched.map(|d| d.delta).sum())
    }

    pub fn is_signed_by(&self, wallet: &str) -> bool {
        self.signers.iter().any(|s| s == wallet)
    }
}

#[async_trait]
pub trait LedgerVerifier: Send + Sync {
    async fn get_transaction(&self, tx_ref: &str) -> Result<LedgerTransaction, LedgerError>;
}

/// Transaction signatures are base58 strings decoding to 64 bytes
pub fn is_valid_tx_ref(tx_ref: &str) -> bool {
    (64..=128).contains(&tx_ref.len())
        && bs58::decode(tx_ref)
            .into_vec()
            .map(|bytes| bytes.len() == 64)
            .unwrap_or(false)
}
