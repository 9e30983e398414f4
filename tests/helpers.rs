#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use parimutuel_engine::clock::Clock;
use parimutuel_engine::config::{PoolTemplate, SettlementConfig};
use parimutuel_engine::error::StoreError;
use parimutuel_engine::ledger::{BalanceDelta, LedgerError, LedgerTransaction, LedgerVerifier};
use parimutuel_engine::models::*;
use parimutuel_engine::oracle::{OracleError, PriceOracle, PriceTick};
use parimutuel_engine::repositories::{Deadline, MemoryPoolStore, PoolStore};
use parimutuel_engine::services::{ClaimService, DepositService, PoolScheduler, SettlementEngine};
use parimutuel_engine::solana_client::{
    GatewayError, ProgramAccounts, SettlementGateway, SolanaConfig,
};
use parimutuel_engine::websocket::{NotificationSink, PoolUpdate};
use parimutuel_engine::{AppConfig, AppError, AppState, EngineDeps, ReasonCode};
use solana_sdk::signature::{Keypair, Signer};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

/// Fresh base58 wallet address
pub fn wallet() -> String {
    Keypair::new().pubkey().to_string()
}

/// Fresh base58 transaction signature (64 bytes)
pub fn tx_sig() -> String {
    let mut bytes = Vec::with_capacity(64);
    for _ in 0..4 {
        bytes.extend_from_slice(Uuid::new_v4().as_bytes());
    }
    bs58::encode(bytes).into_string()
}

/// Reason code of a rejected call; panics on success
pub fn reason<T: std::fmt::Debug>(result: Result<T, AppError>) -> ReasonCode {
    result.expect_err("expected a rejection").reason_code()
}

// ============================================================================
// Fakes
// ============================================================================

/// Clock that only moves when told to
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap() = at;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now = *now + by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

#[derive(Default)]
pub struct FakeOracle {
    prices: Mutex<HashMap<String, u64>>,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl FakeOracle {
    pub fn set_price(&self, asset: &str, price: u64) {
        self.prices.lock().unwrap().insert(asset.to_string(), price);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PriceOracle for FakeOracle {
    async fn get_spot_price(&self, asset: &str) -> Result<PriceTick, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        // Lets overlapping sweeps interleave at the price fetch
        tokio::task::yield_now().await;
        if self.failing.load(Ordering::SeqCst) {
            return Err(OracleError::ProviderUnavailable("fake outage".to_string()));
        }
        let price = self
            .prices
            .lock()
            .unwrap()
            .get(asset)
            .copied()
            .ok_or_else(|| OracleError::AssetNotSupported(asset.to_string()))?;

        Ok(PriceTick {
            price,
            timestamp: Utc::now(),
            source: "fake".to_string(),
            content_hash: format!("{:064x}", price),
        })
    }

    async fn is_healthy(&self) -> bool {
        !self.failing.load(Ordering::SeqCst)
    }

    fn name(&self) -> &str {
        "fake"
    }
}

#[derive(Default)]
pub struct FakeLedger {
    txs: Mutex<HashMap<String, LedgerTransaction>>,
    unavailable: AtomicBool,
}

impl FakeLedger {
    pub fn insert(&self, tx_ref: &str, tx: LedgerTransaction) {
        self.txs.lock().unwrap().insert(tx_ref.to_string(), tx);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl LedgerVerifier for FakeLedger {
    async fn get_transaction(&self, tx_ref: &str) -> Result<LedgerTransaction, LedgerError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("fake outage".to_string()));
        }
        Ok(self
            .txs
            .lock()
            .unwrap()
            .get(tx_ref)
            .cloned()
            .unwrap_or_else(LedgerTransaction::not_found))
    }
}

pub struct FakeGateway {
    authority: Option<String>,
    failing: AtomicBool,
    initialized: AtomicUsize,
    resolved: AtomicUsize,
    transfers: Mutex<Vec<(String, u64)>>,
}

impl FakeGateway {
    pub fn with_authority() -> Self {
        Self::new(Some(wallet()))
    }

    pub fn without_authority() -> Self {
        Self::new(None)
    }

    fn new(authority: Option<String>) -> Self {
        Self {
            authority,
            failing: AtomicBool::new(false),
            initialized: AtomicUsize::new(0),
            resolved: AtomicUsize::new(0),
            transfers: Mutex::new(Vec::new()),
        }
    }

    /// Make every chain call fail with an RPC error
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn initialized(&self) -> usize {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn resolved(&self) -> usize {
        self.resolved.load(Ordering::SeqCst)
    }

    pub fn transfers(&self) -> Vec<(String, u64)> {
        self.transfers.lock().unwrap().clone()
    }

    fn check(&self) -> Result<(), GatewayError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(GatewayError::Rpc("fake chain outage".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl SettlementGateway for FakeGateway {
    fn authority(&self) -> Option<String> {
        self.authority.clone()
    }

    async fn initialize_pool(&self, _pool: &Pool) -> Result<String, GatewayError> {
        self.initialized.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(tx_sig())
    }

    async fn resolve_pool(&self, _pool: &Pool, _strike: u64, _final_price: u64) -> Result<String, GatewayError> {
        self.resolved.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(tx_sig())
    }

    async fn transfer_payout(&self, recipient: &str, amount: u64) -> Result<String, GatewayError> {
        if self.authority.is_none() {
            return Err(GatewayError::MissingAuthority);
        }
        self.check()?;
        // Give concurrent callers a chance to interleave
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        self.transfers
            .lock()
            .unwrap()
            .push((recipient.to_string(), amount));
        Ok(tx_sig())
    }
}

/// Memory store with scripted faults, passing everything else through
pub struct ScriptedStore {
    inner: Arc<MemoryPoolStore>,
    failing_claim_writes: AtomicUsize,
    stale_cleanup: Mutex<Vec<Pool>>,
}

impl ScriptedStore {
    pub fn new(inner: Arc<MemoryPoolStore>) -> Self {
        Self {
            inner,
            failing_claim_writes: AtomicUsize::new(0),
            stale_cleanup: Mutex::new(Vec::new()),
        }
    }

    /// Fail the next `count` claim writes with a transient error
    pub fn fail_claim_writes(&self, count: usize) {
        self.failing_claim_writes.store(count, Ordering::SeqCst);
    }

    /// Also report `pool` as a cleanup candidate, as if listed before it gained stake
    pub fn add_stale_cleanup_candidate(&self, pool: Pool) {
        self.stale_cleanup.lock().unwrap().push(pool);
    }
}

#[async_trait]
impl PoolStore for ScriptedStore {
    async fn insert_pool(&self, pool: &Pool) -> Result<(), StoreError> {
        self.inner.insert_pool(pool).await
    }

    async fn find_pool(&self, id: Uuid) -> Result<Option<Pool>, StoreError> {
        self.inner.find_pool(id).await
    }

    async fn list_pools(&self, status: Option<PoolStatus>, limit: usize) -> Result<Vec<Pool>, StoreError> {
        self.inner.list_pools(status, limit).await
    }

    async fn find_due_pools(
        &self,
        status: PoolStatus,
        deadline: Deadline,
        at: DateTime<Utc>,
    ) -> Result<Vec<Pool>, StoreError> {
        self.inner.find_due_pools(status, deadline, at).await
    }

    async fn advance_status(&self, id: Uuid, from: PoolStatus, to: PoolStatus) -> Result<bool, StoreError> {
        self.inner.advance_status(id, from, to).await
    }

    async fn activate_pool(&self, id: Uuid, strike: &PriceSnapshot) -> Result<bool, StoreError> {
        self.inner.activate_pool(id, strike).await
    }

    async fn resolve_pool(
        &self,
        id: Uuid,
        final_snapshot: &PriceSnapshot,
        winner: Side,
        resolved_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.inner.resolve_pool(id, final_snapshot, winner, resolved_at).await
    }

    async fn find_cleanup_candidates(&self, ended_before: DateTime<Utc>) -> Result<Vec<Pool>, StoreError> {
        let mut candidates = self.inner.find_cleanup_candidates(ended_before).await?;
        candidates.extend(self.stale_cleanup.lock().unwrap().drain(..));
        Ok(candidates)
    }

    async fn delete_empty_pools(&self, ids: &[Uuid]) -> Result<Vec<Uuid>, StoreError> {
        self.inner.delete_empty_pools(ids).await
    }

    async fn insert_bet_and_credit(&self, bet: NewBet, at: DateTime<Utc>) -> Result<Bet, StoreError> {
        self.inner.insert_bet_and_credit(bet, at).await
    }

    async fn find_bet(&self, pool_id: Uuid, bettor: &str) -> Result<Option<Bet>, StoreError> {
        self.inner.find_bet(pool_id, bettor).await
    }

    async fn find_bet_by_id(&self, id: Uuid) -> Result<Option<Bet>, StoreError> {
        self.inner.find_bet_by_id(id).await
    }

    async fn find_bet_by_deposit_tx(&self, deposit_tx: &str) -> Result<Option<Bet>, StoreError> {
        self.inner.find_bet_by_deposit_tx(deposit_tx).await
    }

    async fn bets_for_pool(&self, pool_id: Uuid) -> Result<Vec<Bet>, StoreError> {
        self.inner.bets_for_pool(pool_id).await
    }

    async fn bets_for_bettor(&self, bettor: &str) -> Result<Vec<Bet>, StoreError> {
        self.inner.bets_for_bettor(bettor).await
    }

    async fn reserve_claim(&self, bet_id: Uuid, at: DateTime<Utc>) -> Result<bool, StoreError> {
        self.inner.reserve_claim(bet_id, at).await
    }

    async fn release_claim(&self, bet_id: Uuid) -> Result<bool, StoreError> {
        self.inner.release_claim(bet_id).await
    }

    async fn mark_bet_claimed(
        &self,
        bet_id: Uuid,
        payout: u64,
        claim_tx: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let failing = self
            .failing_claim_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::ConstraintViolation("transient db error".to_string()));
        }
        self.inner.mark_bet_claimed(bet_id, payout, claim_tx, at).await
    }

    async fn snapshots_for_pool(&self, pool_id: Uuid) -> Result<Vec<PriceSnapshot>, StoreError> {
        self.inner.snapshots_for_pool(pool_id).await
    }

    async fn append_event(&self, entry: &EventLogEntry) -> Result<(), StoreError> {
        self.inner.append_event(entry).await
    }

    async fn events_for_entity(&self, entity_id: Uuid) -> Result<Vec<EventLogEntry>, StoreError> {
        self.inner.events_for_entity(entity_id).await
    }

    async fn events_of_kind(&self, kind: EventKind) -> Result<Vec<EventLogEntry>, StoreError> {
        self.inner.events_of_kind(kind).await
    }
}

#[derive(Default)]
pub struct RecordingSink {
    created: Mutex<Vec<Uuid>>,
    updates: Mutex<Vec<PoolUpdate>>,
}

impl RecordingSink {
    pub fn created(&self) -> Vec<Uuid> {
        self.created.lock().unwrap().clone()
    }

    pub fn updates_for(&self, pool_id: Uuid) -> Vec<PoolUpdate> {
        self.updates
            .lock()
            .unwrap()
            .iter()
            .filter(|u| u.id == pool_id)
            .cloned()
            .collect()
    }
}

impl NotificationSink for RecordingSink {
    fn emit_pool_created(&self, pool: &Pool) {
        self.created.lock().unwrap().push(pool.id);
    }

    fn emit_pool_status_changed(&self, update: PoolUpdate) {
        self.updates.lock().unwrap().push(update);
    }
}

// ============================================================================
// Harness
// ============================================================================

/// Engine, reconcilers and scheduler wired to the in-memory store and fakes
pub struct TestHarness {
    pub config: AppConfig,
    pub store: Arc<MemoryPoolStore>,
    /// What the engine sees: `store` behind scripted faults
    pub scripted: Arc<ScriptedStore>,
    pub oracle: Arc<FakeOracle>,
    pub ledger: Arc<FakeLedger>,
    pub gateway: Arc<FakeGateway>,
    pub sink: Arc<RecordingSink>,
    pub clock: Arc<ManualClock>,
    pub accounts: ProgramAccounts,
    pub engine: Arc<SettlementEngine>,
    pub deposits: Arc<DepositService>,
    pub claims: Arc<ClaimService>,
    pub scheduler: PoolScheduler,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::build(AppConfig::default(), FakeGateway::with_authority())
    }

    pub fn with_gateway(gateway: FakeGateway) -> Self {
        Self::build(AppConfig::default(), gateway)
    }

    pub fn with_settlement(settlement: SettlementConfig) -> Self {
        let config = AppConfig {
            settlement,
            ..AppConfig::default()
        };
        Self::build(config, FakeGateway::with_authority())
    }

    pub fn with_templates(templates: Vec<PoolTemplate>) -> Self {
        let mut config = AppConfig::default();
        config.scheduler.templates = templates;
        Self::build(config, FakeGateway::with_authority())
    }

    fn build(config: AppConfig, gateway: FakeGateway) -> Self {
        let store = Arc::new(MemoryPoolStore::new());
        let scripted = Arc::new(ScriptedStore::new(store.clone()));
        let oracle = Arc::new(FakeOracle::default());
        let ledger = Arc::new(FakeLedger::default());
        let gateway = Arc::new(gateway);
        let sink = Arc::new(RecordingSink::default());
        let clock = Arc::new(ManualClock::new());
        let accounts = ProgramAccounts::from_config(&SolanaConfig::default()).unwrap();

        let deps = EngineDeps {
            store: scripted.clone(),
            oracle: oracle.clone(),
            ledger: ledger.clone(),
            gateway: gateway.clone(),
            notifier: sink.clone(),
            clock: clock.clone(),
            accounts: accounts.clone(),
        };
        let state = AppState::new(&config, deps);

        Self {
            config,
            store,
            scripted,
            oracle,
            ledger,
            gateway,
            sink,
            clock,
            accounts,
            engine: state.engine,
            deposits: state.deposits,
            claims: state.claims,
            scheduler: state.scheduler,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn pool(&self, id: Uuid) -> Pool {
        self.store.find_pool(id).await.unwrap().expect("pool exists")
    }

    pub async fn bet(&self, id: Uuid) -> Bet {
        self.store.find_bet_by_id(id).await.unwrap().expect("bet exists")
    }

    /// 1h BTC pool locking 3000s from now, start 60s after lock
    pub async fn create_pool(&self) -> Pool {
        self.engine
            .create_pool_manual("BTC", 3600, 3000, "1h", 60)
            .await
            .expect("pool created")
    }

    /// Pool already moved to JOINING
    pub async fn joining_pool(&self) -> Pool {
        let pool = self.create_pool().await;
        self.engine.process_status_transitions().await.unwrap();
        let pool = self.pool(pool.id).await;
        assert_eq!(pool.status, PoolStatus::Joining);
        pool
    }

    /// Ledger transaction moving `amount` from the bettor into the pool vault
    pub fn deposit_tx(&self, pool: &Pool, bettor: &str, amount: u64) -> String {
        let accounts = self.accounts.deposit_accounts(pool, bettor).unwrap();
        let tx_ref = tx_sig();
        self.ledger.insert(
            &tx_ref,
            LedgerTransaction {
                found: true,
                succeeded: true,
                balance_deltas: vec![
                    BalanceDelta {
                        account: accounts.user_token_account,
                        mint: Some(accounts.usdc_mint.clone()),
                        owner: Some(bettor.to_string()),
                        delta: -(amount as i128),
                    },
                    BalanceDelta {
                        account: accounts.vault_token_account,
                        mint: Some(accounts.usdc_mint),
                        owner: Some(accounts.vault),
                        delta: amount as i128,
                    },
                ],
                block_time: Some(self.clock.now().timestamp()),
                signers: vec![bettor.to_string()],
            },
        );
        tx_ref
    }

    /// Successful ledger transaction signed by `signer`, with no token movement
    pub fn signed_tx(&self, signer: &str) -> String {
        let tx_ref = tx_sig();
        self.ledger.insert(
            &tx_ref,
            LedgerTransaction {
                found: true,
                succeeded: true,
                balance_deltas: vec![],
                block_time: Some(self.clock.now().timestamp()),
                signers: vec![signer.to_string()],
            },
        );
        tx_ref
    }

    /// Verified deposit recorded as a bet
    pub async fn deposit(&self, pool: &Pool, bettor: &str, side: Side, amount: u64) -> Bet {
        let tx_ref = self.deposit_tx(pool, bettor, amount);
        self.deposits
            .confirm_deposit(pool.id, bettor, &tx_ref, side)
            .await
            .expect("deposit confirmed")
            .bet
    }

    /// Drive a JOINING pool to RESOLVED with the given prices
    pub async fn resolve(&self, pool: &Pool, strike: u64, final_price: u64) -> Pool {
        self.oracle.set_price(&pool.asset, strike);
        self.clock.set(pool.lock_time + Duration::seconds(1));
        self.engine.process_status_transitions().await.unwrap();

        self.oracle.set_price(&pool.asset, final_price);
        self.clock.set(pool.end_time + Duration::seconds(1));
        self.engine.process_resolutions().await.unwrap();

        let pool = self.pool(pool.id).await;
        assert_eq!(pool.status, PoolStatus::Resolved);
        pool
    }

    /// Drive a JOINING pool all the way to CLAIMABLE
    pub async fn settle(&self, pool: &Pool, strike: u64, final_price: u64) -> Pool {
        self.resolve(pool, strike, final_price).await;
        self.clock
            .advance(self.config.scheduler.claimable_delay() + Duration::seconds(1));
        self.engine.process_resolutions().await.unwrap();

        let pool = self.pool(pool.id).await;
        assert_eq!(pool.status, PoolStatus::Claimable);
        pool
    }
}
