//! Solana client for the parimutuel pool program
//!
//! Derives pool, vault and bet accounts, and builds Anchor-encoded
//! `initialize_pool` / `resolve` calls plus SPL payout transfers.

use super::{GatewayError, SettlementGateway};
use crate::models::Pool;
use anchor_client::solana_sdk::{
    commitment_config::CommitmentConfig,
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
    signature::{Keypair, Signature, Signer},
    system_program, sysvar,
    transaction::Transaction,
};
use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};
use solana_client::nonblocking::rpc_client::RpcClient;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

const POOL_SEED: &[u8] = b"pool";
const VAULT_SEED: &[u8] = b"vault";
const BET_SEED: &[u8] = b"bet";

/// Configuration for Solana client
#[derive(Clone, Debug)]
pub struct SolanaConfig {
    pub rpc_url: String,
    pub program_id: String,
    pub usdc_mint: String,
    pub token_decimals: u8,
    /// JSON byte array or base58 secret key
    pub authority_secret: Option<String>,
    pub rpc_timeout_ms: u64,
    pub ledger_timeout_ms: u64,
    pub commitment: CommitmentConfig,
}

impl Default for SolanaConfig {
    fn default() -> Self {
        Self {
            rpc_url: "https://api.devnet.solana.com".to_string(),
            program_id: "HnqB6ahdTEGwJ624D6kaeoSxUS2YwNoq1Cn5Kt9KQBTD".to_string(),
            usdc_mint: "By87mHK9Meinfv4AEqTx9qyYmGDLUcwiywpkkCWwGUVz".to_string(),
            token_decimals: 6,
            authority_secret: None,
            rpc_timeout_ms: 30_000,
            ledger_timeout_ms: 10_000,
            commitment: CommitmentConfig::confirmed(),
        }
    }
}

impl SolanaConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let rpc_url = std::env::var("SOLANA_RPC_URL").unwrap_or(defaults.rpc_url);
        let program_id = std::env::var("PROGRAM_ID").unwrap_or(defaults.program_id);
        let usdc_mint = std::env::var("USDC_MINT").unwrap_or(defaults.usdc_mint);

        let token_decimals = std::env::var("TOKEN_DECIMALS")
            .ok()
            .and_then(|s| s.parse::<u8>().ok())
            .unwrap_or(defaults.token_decimals);

        let authority_secret = std::env::var("AUTHORITY_SECRET_KEY")
            .ok()
            .filter(|s| !s.trim().is_empty());

        let rpc_timeout_ms = std::env::var("SOLANA_RPC_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(defaults.rpc_timeout_ms);

        let ledger_timeout_ms = std::env::var("LEDGER_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(defaults.ledger_timeout_ms);

        Self {
            rpc_url,
            program_id,
            usdc_mint,
            token_decimals,
            authority_secret,
            rpc_timeout_ms,
            ledger_timeout_ms,
            commitment: CommitmentConfig::confirmed(),
        }
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn ledger_timeout(&self) -> Duration {
        Duration::from_millis(self.ledger_timeout_ms)
    }
}

/// 32-byte seed the pool accounts are derived from
pub fn pool_seed(pool_id: Uuid) -> [u8; 32] {
    Sha256::digest(pool_id.as_bytes()).into()
}

pub(crate) fn parse_pubkey(value: &str) -> Result<Pubkey, GatewayError> {
    Pubkey::from_str(value).map_err(|e| GatewayError::InvalidAddress(format!("{}: {}", value, e)))
}

/// Accounts a bettor's deposit transaction must touch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DepositAccounts {
    pub program_id: String,
    pub pool: String,
    pub vault: String,
    /// Token account that must receive the transfer
    pub vault_token_account: String,
    pub user_bet: String,
    pub user: String,
    pub user_token_account: String,
    pub usdc_mint: String,
    pub token_program: String,
    pub system_program: String,
}

/// Accounts a client-signed claim touches
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClaimAccounts {
    pub program_id: String,
    pub pool: String,
    pub user_bet: String,
    pub vault: String,
    pub vault_token_account: String,
    pub user: String,
    pub user_token_account: String,
    pub token_program: String,
}

/// Deterministic account derivation for the pool program
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramAccounts {
    program_id: Pubkey,
    usdc_mint: Pubkey,
}

impl ProgramAccounts {
    pub fn new(program_id: Pubkey, usdc_mint: Pubkey) -> Self {
        Self {
            program_id,
            usdc_mint,
        }
    }

    pub fn from_config(config: &SolanaConfig) -> Result<Self, GatewayError> {
        Ok(Self::new(
            parse_pubkey(&config.program_id)?,
            parse_pubkey(&config.usdc_mint)?,
        ))
    }

    pub fn program_id(&self) -> Pubkey {
        self.program_id
    }

    pub fn usdc_mint(&self) -> Pubkey {
        self.usdc_mint
    }

    pub fn pool_address(&self, seed: &[u8; 32]) -> (Pubkey, u8) {
        Pubkey::find_program_address(&[POOL_SEED, seed.as_ref()], &self.program_id)
    }

    pub fn vault_address(&self, seed: &[u8; 32]) -> (Pubkey, u8) {
        Pubkey::find_program_address(&[VAULT_SEED, seed.as_ref()], &self.program_id)
    }

    pub fn bet_address(&self, pool: &Pubkey, user: &Pubkey) -> (Pubkey, u8) {
        Pubkey::find_program_address(&[BET_SEED, pool.as_ref(), user.as_ref()], &self.program_id)
    }

    /// Associated token account of `owner` for the stake mint
    pub fn token_account(&self, owner: &Pubkey) -> Pubkey {
        spl_associated_token_account::get_associated_token_address(owner, &self.usdc_mint)
    }

    /// Token account deposits land in: the vault's associated token account
    pub fn vault_token_account(&self, seed: &[u8; 32]) -> Pubkey {
        let (vault, _) = self.vault_address(seed);
        self.token_account(&vault)
    }

    fn seed_of(pool: &Pool) -> Result<[u8; 32], GatewayError> {
        pool.seed_bytes().map_err(GatewayError::InvalidAddress)
    }

    pub fn deposit_accounts(&self, pool: &Pool, bettor: &str) -> Result<DepositAccounts, GatewayError> {
        let seed = Self::seed_of(pool)?;
        let user = parse_pubkey(bettor)?;
        let (pool_pda, _) = self.pool_address(&seed);
        let (vault, _) = self.vault_address(&seed);
        let (user_bet, _) = self.bet_address(&pool_pda, &user);

        Ok(DepositAccounts {
            program_id: self.program_id.to_string(),
            pool: pool_pda.to_string(),
            vault: vault.to_string(),
            vault_token_account: self.token_account(&vault).to_string(),
            user_bet: user_bet.to_string(),
            user: user.to_string(),
            user_token_account: self.token_account(&user).to_string(),
            usdc_mint: self.usdc_mint.to_string(),
            token_program: spl_token::ID.to_string(),
            system_program: system_program::ID.to_string(),
        })
    }

    pub fn claim_accounts(&self, pool: &Pool, bettor: &str) -> Result<ClaimAccounts, GatewayError> {
        let deposit = self.deposit_accounts(pool, bettor)?;
        Ok(ClaimAccounts {
            program_id: deposit.program_id,
            pool: deposit.pool,
            user_bet: deposit.user_bet,
            vault: deposit.vault,
            vault_token_account: deposit.vault_token_account,
            user: deposit.user,
            user_token_account: deposit.user_token_account,
            token_program: deposit.token_program,
        })
    }

    /// Anchor uses first 8 bytes of SHA256("global:<instruction_name>")
    pub fn instruction_discriminator(name: &str) -> [u8; 8] {
        let mut hasher = Sha256::new();
        hasher.update(format!("global:{}", name).as_bytes());
        let hash = hasher.finalize();
        let mut discriminator = [0u8; 8];
        discriminator.copy_from_slice(&hash[..8]);
        discriminator
    }

    /// `initialize_pool(pool_id, asset, start_time, end_time, lock_time)`
    pub fn initialize_pool_instruction(&self, pool: &Pool, authority: &Pubkey) -> Result<Instruction, GatewayError> {
        let seed = Self::seed_of(pool)?;
        let (pool_pda, _) = self.pool_address(&seed);
        let (vault, _) = self.vault_address(&seed);

        let asset = pool.asset.as_bytes();
        let mut data = Vec::with_capacity(8 + 32 + 4 + asset.len() + 24);
        data.extend_from_slice(&Self::instruction_discriminator("initialize_pool"));
        data.extend_from_slice(&seed);
        // Borsh string: 4-byte little-endian length prefix
        data.extend_from_slice(&(asset.len() as u32).to_le_bytes());
        data.extend_from_slice(asset);
        data.extend_from_slice(&pool.start_time.timestamp().to_le_bytes());
        data.extend_from_slice(&pool.end_time.timestamp().to_le_bytes());
        data.extend_from_slice(&pool.lock_time.timestamp().to_le_bytes());

        Ok(Instruction {
            program_id: self.program_id,
            accounts: vec![
                AccountMeta::new(pool_pda, false),
                AccountMeta::new(vault, false),
                AccountMeta::new_readonly(self.usdc_mint, false),
                AccountMeta::new(*authority, true),
                AccountMeta::new_readonly(system_program::ID, false),
                AccountMeta::new_readonly(spl_token::ID, false),
                AccountMeta::new_readonly(sysvar::rent::ID, false),
            ],
            data,
        })
    }

    /// `resolve(strike_price, final_price)`
    pub fn resolve_instruction(
        &self,
        pool: &Pool,
        authority: &Pubkey,
        strike: u64,
        final_price: u64,
    ) -> Result<Instruction, GatewayError> {
        let seed = Self::seed_of(pool)?;
        let (pool_pda, _) = self.pool_address(&seed);

        let mut data = Vec::with_capacity(8 + 16);
        data.extend_from_slice(&Self::instruction_discriminator("resolve"));
        data.extend_from_slice(&strike.to_le_bytes());
        data.extend_from_slice(&final_price.to_le_bytes());

        Ok(Instruction {
            program_id: self.program_id,
            accounts: vec![
                AccountMeta::new(pool_pda, false),
                AccountMeta::new_readonly(*authority, true),
            ],
            data,
        })
    }
}

/// Load an authority keypair from a JSON byte array or base58 string
pub fn parse_keypair(secret: &str) -> Result<Keypair, GatewayError> {
    let secret = secret.trim();
    let bytes: Vec<u8> = if secret.starts_with('[') {
        serde_json::from_str(secret)
            .map_err(|e| GatewayError::InvalidAddress(format!("Failed to parse keypair JSON: {}", e)))?
    } else {
        bs58::decode(secret)
            .into_vec()
            .map_err(|e| GatewayError::InvalidAddress(format!("Failed to decode base58 keypair: {}", e)))?
    };

    Keypair::from_bytes(&bytes).map_err(|e| GatewayError::InvalidAddress(format!("Invalid keypair: {}", e)))
}

/// Solana-backed settlement gateway
pub struct SolanaSettlementClient {
    accounts: ProgramAccounts,
    token_decimals: u8,
    keypair: Option<Arc<Keypair>>,
    rpc_client: RpcClient,
}

impl SolanaSettlementClient {
    pub fn with_config(config: &SolanaConfig) -> Result<Self, GatewayError> {
        let rpc_client = RpcClient::new_with_timeout_and_commitment(
            config.rpc_url.clone(),
            config.rpc_timeout(),
            config.commitment,
        );

        let keypair = match &config.authority_secret {
            Some(secret) => {
                let keypair = parse_keypair(secret)?;
                info!("Loaded authority keypair: {}", keypair.pubkey());
                Some(Arc::new(keypair))
            }
            None => None,
        };

        Ok(Self {
            accounts: ProgramAccounts::from_config(config)?,
            token_decimals: config.token_decimals,
            keypair,
            rpc_client,
        })
    }

    pub fn accounts(&self) -> &ProgramAccounts {
        &self.accounts
    }

    /// Send and confirm a transaction signed by the authority
    async fn send_transaction(&self, keypair: &Keypair, instructions: &[Instruction]) -> Result<Signature, GatewayError> {
        let recent_blockhash = self
            .rpc_client
            .get_latest_blockhash()
            .await
            .map_err(|e| GatewayError::Rpc(format!("Failed to get blockhash: {}", e)))?;

        let transaction = Transaction::new_signed_with_payer(
            instructions,
            Some(&keypair.pubkey()),
            &[keypair],
            recent_blockhash,
        );

        self.rpc_client
            .send_and_confirm_transaction(&transaction)
            .await
            .map_err(|e| GatewayError::Rpc(format!("Transaction failed: {}", e)))
    }

    fn simulated(kind: &str, pool: &Pool) -> String {
        let short: String = pool.pool_seed.chars().take(8).collect();
        format!("sim_{}_{}_{}", kind, short, chrono::Utc::now().timestamp())
    }
}

#[async_trait]
impl SettlementGateway for SolanaSettlementClient {
    fn authority(&self) -> Option<String> {
        self.keypair.as_ref().map(|k| k.pubkey().to_string())
    }

    async fn initialize_pool(&self, pool: &Pool) -> Result<String, GatewayError> {
        let Some(keypair) = self.keypair.clone() else {
            warn!("No keypair configured - simulating pool initialization");
            return Ok(Self::simulated("init", pool));
        };

        let instruction = self.accounts.initialize_pool_instruction(pool, &keypair.pubkey())?;
        let signature = self.send_transaction(&keypair, &[instruction]).await?;

        info!(pool_id = %pool.id, "Pool initialized on-chain: {}", signature);
        Ok(signature.to_string())
    }

    async fn resolve_pool(&self, pool: &Pool, strike: u64, final_price: u64) -> Result<String, GatewayError> {
        let Some(keypair) = self.keypair.clone() else {
            warn!("No keypair configured - simulating pool resolution");
            return Ok(Self::simulated("resolve", pool));
        };

        let instruction = self
            .accounts
            .resolve_instruction(pool, &keypair.pubkey(), strike, final_price)?;
        let signature = self.send_transaction(&keypair, &[instruction]).await?;

        info!(pool_id = %pool.id, "Pool resolved on-chain: {}", signature);
        Ok(signature.to_string())
    }

    async fn transfer_payout(&self, recipient: &str, amount: u64) -> Result<String, GatewayError> {
        let keypair = self.keypair.clone().ok_or(GatewayError::MissingAuthority)?;
        let recipient = parse_pubkey(recipient)?;
        let mint = self.accounts.usdc_mint();

        let source = self.accounts.token_account(&keypair.pubkey());
        let destination = self.accounts.token_account(&recipient);

        let instructions = vec![
            spl_associated_token_account::instruction::create_associated_token_account_idempotent(
                &keypair.pubkey(),
                &recipient,
                &mint,
                &spl_token::ID,
            ),
            spl_token::instruction::transfer_checked(
                &spl_token::ID,
                &source,
                &mint,
                &destination,
                &keypair.pubkey(),
                &[],
                amount,
                self.token_decimals,
            )
            .map_err(|e| GatewayError::Instruction(e.to_string()))?,
        ];

        let signature = self.send_transaction(&keypair, &instructions).await?;
        info!("Payout of {} to {} confirmed: {}", amount, recipient, signature);
        Ok(signature.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewPool;
    use chrono::{Duration, Utc};

    fn accounts() -> ProgramAccounts {
        ProgramAccounts::from_config(&SolanaConfig::default()).unwrap()
    }

    fn pool() -> Pool {
        let id = Uuid::new_v4();
        let now = Utc::now();
        NewPool {
            id,
            pool_seed: hex::encode(pool_seed(id)),
            pool_pubkey: None,
            asset: "BTC".to_string(),
            interval_key: "1h".to_string(),
            lock_time: now,
            start_time: now + Duration::seconds(60),
            end_time: now + Duration::seconds(3660),
        }
        .into_pool(now)
    }

    #[test]
    fn test_instruction_discriminator() {
        let disc = ProgramAccounts::instruction_discriminator("resolve");
        assert_eq!(disc, ProgramAccounts::instruction_discriminator("resolve"));
        assert_ne!(disc, ProgramAccounts::instruction_discriminator("initialize_pool"));
    }

    #[test]
    fn test_pool_seed_is_deterministic() {
        let id = Uuid::new_v4();
        assert_eq!(pool_seed(id), pool_seed(id));
        assert_ne!(pool_seed(id), pool_seed(Uuid::new_v4()));
    }

    #[test]
    fn test_derivations_are_deterministic() {
        let accounts = accounts();
        let seed = pool_seed(Uuid::new_v4());

        let (pool_a, _) = accounts.pool_address(&seed);
        let (pool_b, _) = accounts.pool_address(&seed);
        assert_eq!(pool_a, pool_b);

        let (vault, _) = accounts.vault_address(&seed);
        assert_ne!(pool_a, vault);
        assert_eq!(accounts.vault_token_account(&seed), accounts.token_account(&vault));
    }

    #[test]
    fn test_deposit_accounts() {
        let accounts = accounts();
        let pool = pool();
        let user = Keypair::new().pubkey().to_string();

        let deposit = accounts.deposit_accounts(&pool, &user).unwrap();
        assert_eq!(deposit.user, user);
        assert_eq!(deposit.token_program, spl_token::ID.to_string());

        let claim = accounts.claim_accounts(&pool, &user).unwrap();
        assert_eq!(claim.user_bet, deposit.user_bet);
        assert_eq!(claim.vault_token_account, deposit.vault_token_account);

        assert!(matches!(
            accounts.deposit_accounts(&pool, "not-a-key"),
            Err(GatewayError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_resolve_instruction_layout() {
        let accounts = accounts();
        let pool = pool();
        let authority = Keypair::new().pubkey();

        let ix = accounts.resolve_instruction(&pool, &authority, 100, 200).unwrap();
        assert_eq!(ix.data.len(), 24);
        assert_eq!(&ix.data[8..16], &100u64.to_le_bytes());
        assert_eq!(&ix.data[16..24], &200u64.to_le_bytes());
        assert!(ix.accounts[1].is_signer);
    }

    #[test]
    fn test_parse_keypair_formats() {
        let keypair = Keypair::new();
        let json = serde_json::to_string(&keypair.to_bytes().to_vec()).unwrap();
        assert_eq!(parse_keypair(&json).unwrap().pubkey(), keypair.pubkey());

        let b58 = bs58::encode(keypair.to_bytes()).into_string();
        assert_eq!(parse_keypair(&b58).unwrap().pubkey(), keypair.pubkey());

        assert!(parse_keypair("garbage!").is_err());
    }

    #[tokio::test]
    async fn test_payout_requires_authority() {
        let client = SolanaSettlementClient::with_config(&SolanaConfig::default()).unwrap();
        assert!(!client.has_authority());
        let recipient = Keypair::new().pubkey().to_string();
        assert_eq!(
            client.transfer_payout(&recipient, 1).await,
            Err(GatewayError::MissingAuthority)
        );
    }
}
