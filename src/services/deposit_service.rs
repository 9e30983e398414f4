use crate::clock::Clock;
use crate::config::SettlementConfig;
use crate::error::{AppError, AppResult, ReasonCode, StoreError};
use crate::ledger::{is_valid_tx_ref, LedgerVerifier};
use crate::models::{Bet, EventKind, NewBet, NewEvent, Pool, PoolStatus, Side};
use crate::repositories::PoolStore;
use crate::solana_client::{DepositAccounts, GatewayError, ProgramAccounts};
use crate::websocket::{NotificationSink, PoolUpdate};
use crate::EngineDeps;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// What a bettor needs to build their deposit transaction
#[derive(Debug, Clone, Serialize)]
pub struct DepositInstructions {
    pub pool_id: Uuid,
    pub side: Side,
    /// Side as the program encodes it (0 = UP, 1 = DOWN)
    pub side_index: u8,
    pub amount: u64,
    pub lock_time: DateTime<Utc>,
    pub accounts: DepositAccounts,
}

#[derive(Debug, Clone, Serialize)]
pub struct DepositConfirmation {
    pub bet: Bet,
    /// True when this tx was already recorded and nothing changed
    pub already_confirmed: bool,
}

/// Records bets only after the ledger shows the matching transfer.
///
/// The caller supplies the side; the amount always comes from the ledger's
/// balance delta on the pool's deposit account.
pub struct DepositService {
    store: Arc<dyn PoolStore>,
    ledger: Arc<dyn LedgerVerifier>,
    notifier: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    accounts: ProgramAccounts,
    config: SettlementConfig,
}

impl DepositService {
    pub fn new(deps: EngineDeps, config: SettlementConfig) -> Self {
        Self {
            store: deps.store,
            ledger: deps.ledger,
            notifier: deps.notifier,
            clock: deps.clock,
            accounts: deps.accounts,
            config,
        }
    }

    /// Validate a deposit and return the accounts to transfer into. Read-only.
    pub async fn prepare_deposit(
        &self,
        pool_id: Uuid,
        bettor: &str,
        side: Side,
        amount: u64,
    ) -> AppResult<DepositInstructions> {
        if amount < self.config.min_deposit || amount > self.config.max_deposit {
            return Err(AppError::rejected(
                ReasonCode::ValidationError,
                format!(
                    "Amount must be between {} and {}",
                    self.config.min_deposit, self.config.max_deposit
                ),
            ));
        }

        let pool = self.load_pool(pool_id).await?;

        if pool.status != PoolStatus::Joining {
            return Err(AppError::rejected(
                ReasonCode::PoolNotJoining,
                format!("Pool is {}", pool.status),
            ));
        }
        if self.clock.now() > pool.lock_time {
            return Err(AppError::rejected(
                ReasonCode::DepositClosed,
                "Pool is locked",
            ));
        }

        let accounts = self.deposit_accounts(&pool, bettor)?;

        if self.store.find_bet(pool_id, bettor).await?.is_some() {
            return Err(AppError::rejected(
                ReasonCode::BetExists,
                "Bettor already has a bet in this pool",
            ));
        }

        Ok(DepositInstructions {
            pool_id,
            side,
            side_index: side.program_index(),
            amount,
            lock_time: pool.lock_time,
            accounts,
        })
    }

    /// Verify a deposit on the ledger and record it exactly once.
    ///
    /// Repeating a confirmed `(pool, bettor, tx_ref)` returns the existing bet
    /// with `already_confirmed` set.
    pub async fn confirm_deposit(
        &self,
        pool_id: Uuid,
        bettor: &str,
        tx_ref: &str,
        side: Side,
    ) -> AppResult<DepositConfirmation> {
        if !is_valid_tx_ref(tx_ref) {
            return Err(AppError::rejected(
                ReasonCode::ValidationError,
                "Invalid transaction signature",
            ));
        }

        let pool = self.load_pool(pool_id).await?;
        let accounts = self.deposit_accounts(&pool, bettor)?;

        if let Some(existing) = self.store.find_bet(pool_id, bettor).await? {
            return Self::resolve_existing(existing, tx_ref);
        }

        if self.store.find_bet_by_deposit_tx(tx_ref).await?.is_some() {
            return Err(AppError::rejected(
                ReasonCode::TxAlreadyUsed,
                "Transaction already recorded for another bet",
            ));
        }

        match pool.status {
            PoolStatus::Joining | PoolStatus::Active => {}
            PoolStatus::Upcoming => {
                return Err(AppError::rejected(
                    ReasonCode::PoolNotJoining,
                    "Pool is not open yet",
                ))
            }
            PoolStatus::Resolved | PoolStatus::Claimable => {
                return Err(AppError::rejected(
                    ReasonCode::DepositClosed,
                    format!("Pool is {}", pool.status),
                ))
            }
        }

        let tx = self.ledger.get_transaction(tx_ref).await?;
        if !tx.found {
            return Err(AppError::rejected(
                ReasonCode::TxNotFound,
                "Transaction not visible on the ledger yet",
            ));
        }
        if !tx.succeeded {
            return Err(AppError::rejected(ReasonCode::TxFailed, "Transaction failed on the ledger"));
        }
        if !tx.is_signed_by(bettor) {
            return Err(AppError::rejected(
                ReasonCode::TxSignerMismatch,
                "Transaction was not signed by the bettor",
            ));
        }

        let lock = pool.lock_time.timestamp();
        match tx.block_time {
            Some(block_time) if block_time > lock => {
                return Err(AppError::rejected(
                    ReasonCode::DepositClosed,
                    "Transfer landed after the pool locked",
                ))
            }
            None if pool.status != PoolStatus::Joining => {
                return Err(AppError::rejected(
                    ReasonCode::DepositClosed,
                    "Transfer time unknown and the pool has locked",
                ))
            }
            _ => {}
        }

        let amount = match tx.delta_for(&accounts.vault_token_account) {
            Some(delta) if delta > 0 => u64::try_from(delta).map_err(|_| {
                AppError::rejected(ReasonCode::ValidationError, "Transfer amount out of range")
            })?,
            _ => {
                return Err(AppError::rejected(
                    ReasonCode::NoTransferFound,
                    "No transfer into the pool vault",
                ))
            }
        };

        let new_bet = NewBet {
            pool_id,
            bettor: bettor.to_string(),
            side,
            amount,
            deposit_tx: tx_ref.to_string(),
        };

        let bet = match self.store.insert_bet_and_credit(new_bet, self.clock.now()).await {
            Ok(bet) => bet,
            Err(StoreError::Duplicate(_)) => return self.resolve_race(pool_id, bettor, tx_ref).await,
            Err(StoreError::ConstraintViolation(reason)) => {
                return Err(AppError::rejected(ReasonCode::DepositClosed, reason))
            }
            Err(e) => return Err(e.into()),
        };

        info!(
            pool_id = %pool_id,
            bettor = %bettor,
            side = %side,
            amount = amount,
            "Deposit confirmed"
        );

        let entry = NewEvent::new(
            EventKind::DepositConfirmed,
            Some(bet.id),
            json!({
                "pool_id": pool_id,
                "bettor": bettor,
                "side": side,
                "amount": amount.to_string(),
                "deposit_tx": tx_ref,
            }),
        )
        .into_entry(self.clock.now());
        if let Err(e) = self.store.append_event(&entry).await {
            warn!(pool_id = %pool_id, "Failed to log deposit event: {}", e);
        }

        match self.store.find_pool(pool_id).await {
            Ok(Some(updated)) => self
                .notifier
                .emit_pool_status_changed(PoolUpdate::from_pool(&updated)),
            Ok(None) => {}
            Err(e) => warn!(pool_id = %pool_id, "Failed to reload pool totals: {}", e),
        }

        Ok(DepositConfirmation {
            bet,
            already_confirmed: false,
        })
    }

    fn resolve_existing(existing: Bet, tx_ref: &str) -> AppResult<DepositConfirmation> {
        if existing.deposit_tx.as_deref() == Some(tx_ref) {
            Ok(DepositConfirmation {
                bet: existing,
                already_confirmed: true,
            })
        } else {
            Err(AppError::rejected(
                ReasonCode::BetExists,
                "Bettor already has a different deposit in this pool",
            ))
        }
    }

    /// A concurrent confirmation won the insert; report what it recorded
    async fn resolve_race(&self, pool_id: Uuid, bettor: &str, tx_ref: &str) -> AppResult<DepositConfirmation> {
        match self.store.find_bet(pool_id, bettor).await? {
            Some(existing) => Self::resolve_existing(existing, tx_ref),
            None => Err(AppError::rejected(
                ReasonCode::TxAlreadyUsed,
                "Transaction already recorded for another bet",
            )),
        }
    }

    async fn load_pool(&self, pool_id: Uuid) -> AppResult<Pool> {
        self.store.find_pool(pool_id).await?.ok_or_else(|| {
            AppError::rejected(ReasonCode::PoolNotFound, format!("Pool {} not found", pool_id))
        })
    }

    fn deposit_accounts(&self, pool: &Pool, bettor: &str) -> AppResult<DepositAccounts> {
        self.accounts
            .deposit_accounts(pool, bettor)
            .map_err(|e| match e {
                GatewayError::InvalidAddress(reason) => {
                    AppError::rejected(ReasonCode::ValidationError, reason)
                }
                other => other.into(),
            })
    }
}
