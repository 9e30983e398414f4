//! Parimutuel pool engine library
//!
//! Exposes the lifecycle and settlement components for the binary, tests and
//! any surrounding read API.

pub mod clock;
pub mod config;
pub mod database;
pub mod error;
pub mod ledger;
pub mod models;
pub mod oracle;
pub mod repositories;
pub mod services;
pub mod solana_client;
pub mod websocket;

// Re-export commonly used types
pub use config::AppConfig;
pub use error::{AppError, AppResult, ReasonCode};

use clock::Clock;
use ledger::LedgerVerifier;
use oracle::PriceOracle;
use repositories::PoolStore;
use services::{ClaimService, DepositService, PoolScheduler, SettlementEngine};
use solana_client::{ProgramAccounts, SettlementGateway};
use std::sync::Arc;
use websocket::NotificationSink;

/// Shared collaborators every service is built from
#[derive(Clone)]
pub struct EngineDeps {
    pub store: Arc<dyn PoolStore>,
    pub oracle: Arc<dyn PriceOracle>,
    pub ledger: Arc<dyn LedgerVerifier>,
    pub gateway: Arc<dyn SettlementGateway>,
    pub notifier: Arc<dyn NotificationSink>,
    pub clock: Arc<dyn Clock>,
    pub accounts: ProgramAccounts,
}

/// Application state containing the engine, reconciler and scheduler
pub struct AppState {
    pub store: Arc<dyn PoolStore>,
    pub engine: Arc<SettlementEngine>,
    pub deposits: Arc<DepositService>,
    pub claims: Arc<ClaimService>,
    pub scheduler: PoolScheduler,
}

impl AppState {
    /// Wire every service from one set of collaborators
    pub fn new(config: &AppConfig, deps: EngineDeps) -> Self {
        let engine = Arc::new(SettlementEngine::new(deps.clone(), config.scheduler.clone()));
        let deposits = Arc::new(DepositService::new(deps.clone(), config.settlement.clone()));
        let claims = Arc::new(ClaimService::new(deps.clone(), config.settlement.clone()));
        let scheduler = PoolScheduler::new(engine.clone(), config.scheduler.clone());

        Self {
            store: deps.store,
            engine,
            deposits,
            claims,
            scheduler,
        }
    }
}
