//! On-chain side of the pools: account derivation and best-effort settlement calls

pub mod anchor_client;

pub use anchor_client::{
    pool_seed, ClaimAccounts, DepositAccounts, ProgramAccounts, SolanaConfig, SolanaSettlementClient,
};

use crate::models::Pool;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("No authority keypair configured")]
    MissingAuthority,

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Failed to build instruction: {0}")]
    Instruction(String),

    #[error("RPC error: {0}")]
    Rpc(String),
}

impl GatewayError {
    /// Failed before anything reached the chain; an RPC error may still have landed
    pub fn never_submitted(&self) -> bool {
        !matches!(self, GatewayError::Rpc(_))
    }
}

/// Calls the engine makes against the pool program and token accounts
#[async_trait]
pub trait SettlementGateway: Send + Sync {
    /// Base58 address of the held authority key, if any
    fn authority(&self) -> Option<String>;

    fn has_authority(&self) -> bool {
        self.authority().is_some()
    }

    /// Create the pool and vault accounts; returns the transaction signature
    async fn initialize_pool(&self, pool: &Pool) -> Result<String, GatewayError>;

    /// Record strike and final price on chain
    async fn resolve_pool(&self, pool: &Pool, strike: u64, final_price: u64) -> Result<String, GatewayError>;

    /// Transfer `amount` minor units from the authority to `recipient`'s token account
    /// and wait for confirmation. Fails with `MissingAuthority` when no key is held.
    async fn transfer_payout(&self, recipient: &str, amount: u64) -> Result<String, GatewayError>;
}
