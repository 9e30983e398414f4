use crate::clock::Clock;
use crate::config::SettlementConfig;
use crate::error::{AppError, AppResult, ReasonCode};
use crate::ledger::{is_valid_tx_ref, LedgerVerifier};
use crate::models::{Bet, EventKind, NewEvent, Pool, PoolStatus};
use crate::repositories::PoolStore;
use crate::services::payout::{payout_for, PayoutBreakdown};
use crate::solana_client::{ClaimAccounts, GatewayError, ProgramAccounts, SettlementGateway};
use crate::EngineDeps;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Expected payout and accounts for a client-signed claim
#[derive(Debug, Clone, Serialize)]
pub struct ClaimInstructions {
    pub bet_id: Uuid,
    pub pool_id: Uuid,
    pub payout: PayoutBreakdown,
    pub accounts: ClaimAccounts,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClaimConfirmation {
    pub bet: Bet,
    pub payout: u64,
    pub claim_tx: String,
    /// True when this tx was already recorded and nothing changed
    pub already_claimed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClaimFlow {
    /// Bettor signed and submitted the claim
    Client,
    /// Engine transferred from the authority
    Server,
}

impl ClaimFlow {
    fn as_str(&self) -> &'static str {
        match self {
            ClaimFlow::Client => "client",
            ClaimFlow::Server => "server",
        }
    }
}

/// Marks winning bets claimed, at most once per bet.
///
/// The conditional `claimed` update in the store guards the record. Server
/// payouts also hold a persisted reservation from before the transfer until
/// the claim is recorded, so no transfer is ever sent twice for one bet.
pub struct ClaimService {
    store: Arc<dyn PoolStore>,
    ledger: Arc<dyn LedgerVerifier>,
    gateway: Arc<dyn SettlementGateway>,
    clock: Arc<dyn Clock>,
    accounts: ProgramAccounts,
    config: SettlementConfig,
}

impl ClaimService {
    pub fn new(deps: EngineDeps, config: SettlementConfig) -> Self {
        Self {
            store: deps.store,
            ledger: deps.ledger,
            gateway: deps.gateway,
            clock: deps.clock,
            accounts: deps.accounts,
            config,
        }
    }

    /// Eligibility check plus expected payout. Read-only.
    pub async fn prepare_claim(&self, bet_id: Uuid) -> AppResult<ClaimInstructions> {
        let bet = self.load_bet(bet_id).await?;
        if bet.claimed {
            return Err(already_claimed());
        }
        if bet.is_claim_pending() {
            return Err(claim_in_progress());
        }
        let pool = self.eligible_pool(&bet).await?;

        let accounts = self
            .accounts
            .claim_accounts(&pool, &bet.bettor)
            .map_err(|e| match e {
                GatewayError::InvalidAddress(reason) => {
                    AppError::rejected(ReasonCode::ValidationError, reason)
                }
                other => other.into(),
            })?;

        Ok(ClaimInstructions {
            bet_id,
            pool_id: pool.id,
            payout: self.payout(&pool, &bet)?,
            accounts,
        })
    }

    /// Record a claim the bettor signed and submitted themselves
    pub async fn confirm_claim(&self, bet_id: Uuid, tx_ref: &str) -> AppResult<ClaimConfirmation> {
        if !is_valid_tx_ref(tx_ref) {
            return Err(AppError::rejected(
                ReasonCode::ValidationError,
                "Invalid transaction signature",
            ));
        }

        let bet = self.load_bet(bet_id).await?;
        if bet.claimed {
            return Self::resolve_claimed(bet, tx_ref);
        }
        if bet.is_claim_pending() {
            return Err(claim_in_progress());
        }
        let pool = self.eligible_pool(&bet).await?;

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
        if !tx.is_signed_by(&bet.bettor) {
            return Err(AppError::rejected(
                ReasonCode::TxSignerMismatch,
                "Transaction was not signed by the bettor",
            ));
        }

        // Totals are frozen once resolved, so this matches what prepare_claim quoted
        let payout = self.payout(&pool, &bet)?;
        self.mark_claimed(bet, payout.net, tx_ref, ClaimFlow::Client).await
    }

    /// Transfer the payout from the authority and record the claim
    pub async fn execute_claim(&self, bet_id: Uuid) -> AppResult<ClaimConfirmation> {
        if !self.gateway.has_authority() {
            return Err(AppError::rejected(
                ReasonCode::ConfigError,
                "Server-side claims need an authority key",
            ));
        }

        let bet = self.load_bet(bet_id).await?;
        if bet.claimed {
            return Err(already_claimed());
        }
        if bet.is_claim_pending() {
            return Err(claim_in_progress());
        }
        let pool = self.eligible_pool(&bet).await?;

        let payout = self.payout(&pool, &bet)?;
        if payout.is_zero() {
            return Err(AppError::rejected(ReasonCode::ZeroPayout, "Computed payout is zero"));
        }

        if !self.store.reserve_claim(bet_id, self.clock.now()).await? {
            let current = self.load_bet(bet_id).await?;
            return Err(if current.claimed {
                already_claimed()
            } else {
                claim_in_progress()
            });
        }

        let signature = match self.gateway.transfer_payout(&bet.bettor, payout.net).await {
            Ok(signature) => signature,
            Err(e) => return Err(self.abandon_transfer(bet_id, payout.net, e).await),
        };

        match self.mark_claimed(bet, payout.net, &signature, ClaimFlow::Server).await {
            Ok(confirmation) => Ok(confirmation),
            // Recorded by a concurrent confirmation; mark_claimed already logged it
            Err(e @ AppError::Rejected { .. }) => Err(e),
            Err(e) => {
                // Reservation stays so a retry cannot pay again
                error!(
                    bet_id = %bet_id,
                    claim_tx = %signature,
                    payout = payout.net,
                    "Payout sent but claim not recorded: {}",
                    e
                );
                Err(e)
            }
        }
    }

    /// Release the reservation only when the transfer provably never reached the chain
    async fn abandon_transfer(&self, bet_id: Uuid, payout: u64, err: GatewayError) -> AppError {
        if err.never_submitted() {
            if let Err(release) = self.store.release_claim(bet_id).await {
                warn!(bet_id = %bet_id, "Failed to release claim reservation: {}", release);
            }
        } else {
            error!(
                bet_id = %bet_id,
                payout = payout,
                "Payout transfer outcome unknown, bet stays reserved: {}",
                err
            );
        }

        match err {
            GatewayError::MissingAuthority => {
                AppError::rejected(ReasonCode::ConfigError, err.to_string())
            }
            other => AppError::Gateway(other),
        }
    }

    async fn mark_claimed(
        &self,
        bet: Bet,
        payout: u64,
        claim_tx: &str,
        flow: ClaimFlow,
    ) -> AppResult<ClaimConfirmation> {
        let now = self.clock.now();
        if !self.store.mark_bet_claimed(bet.id, payout, claim_tx, now).await? {
            // Lost the race to another confirmation
            let current = self.load_bet(bet.id).await?;
            if flow == ClaimFlow::Server {
                error!(
                    bet_id = %bet.id,
                    claim_tx = %claim_tx,
                    "Payout sent but bet was already claimed"
                );
            }
            return Self::resolve_claimed(current, claim_tx);
        }

        info!(
            bet_id = %bet.id,
            pool_id = %bet.pool_id,
            bettor = %bet.bettor,
            payout = payout,
            flow = flow.as_str(),
            "Claim confirmed"
        );

        let entry = NewEvent::new(
            EventKind::ClaimConfirmed,
            Some(bet.id),
            json!({
                "pool_id": bet.pool_id,
                "bettor": bet.bettor,
                "payout": payout.to_string(),
                "claim_tx": claim_tx,
                "flow": flow.as_str(),
            }),
        )
        .into_entry(now);
        if let Err(e) = self.store.append_event(&entry).await {
            warn!(bet_id = %bet.id, "Failed to log claim event: {}", e);
        }

        let bet = Bet {
            claimed: true,
            claim_tx: Some(claim_tx.to_string()),
            payout_amount: Some(payout),
            claimed_at: Some(now),
            claim_pending_at: None,
            ..bet
        };
        Ok(ClaimConfirmation {
            bet,
            payout,
            claim_tx: claim_tx.to_string(),
            already_claimed: false,
        })
    }

    fn resolve_claimed(bet: Bet, tx_ref: &str) -> AppResult<ClaimConfirmation> {
        match (&bet.claim_tx, bet.payout_amount) {
            (Some(claim_tx), Some(payout)) if claim_tx == tx_ref => Ok(ClaimConfirmation {
                claim_tx: claim_tx.clone(),
                payout,
                bet,
                already_claimed: true,
            }),
            _ => Err(already_claimed()),
        }
    }

    fn payout(&self, pool: &Pool, bet: &Bet) -> AppResult<PayoutBreakdown> {
        Ok(payout_for(pool, bet.side, bet.amount, self.config.fee_bps)?)
    }

    async fn load_bet(&self, bet_id: Uuid) -> AppResult<Bet> {
        self.store.find_bet_by_id(bet_id).await?.ok_or_else(|| {
            AppError::rejected(ReasonCode::BetNotFound, format!("Bet {} not found", bet_id))
        })
    }

    /// Pool must be settled and the bet on the winning side
    async fn eligible_pool(&self, bet: &Bet) -> AppResult<Pool> {
        let pool = self.store.find_pool(bet.pool_id).await?.ok_or_else(|| {
            AppError::rejected(
                ReasonCode::PoolNotFound,
                format!("Pool {} not found", bet.pool_id),
            )
        })?;

        if !matches!(pool.status, PoolStatus::Resolved | PoolStatus::Claimable) {
            return Err(AppError::rejected(
                ReasonCode::PoolNotClaimable,
                format!("Pool is {}", pool.status),
            ));
        }
        if pool.winner != Some(bet.side) {
            return Err(AppError::rejected(ReasonCode::NotWinner, "Bet is on the losing side"));
        }
        Ok(pool)
    }
}

fn already_claimed() -> AppError {
    AppError::rejected(ReasonCode::AlreadyClaimed, "Bet already claimed")
}

fn claim_in_progress() -> AppError {
    AppError::rejected(ReasonCode::ClaimInProgress, "Claim already being processed")
}
