//! `getTransaction` through the Solana RPC client
//!
//! Token deltas come from the pre/post token balances in the transaction meta,
//! keyed by the account at `accountIndex` (static keys, then loaded writable,
//! then loaded readonly addresses).

use super::{BalanceDelta, LedgerError, LedgerTransaction, LedgerVerifier};
use crate::solana_client::SolanaConfig;
use async_trait::async_trait;
use serde_json::json;
use solana_client::client_error::{ClientError, ClientErrorKind};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::RpcTransactionConfig;
use solana_client::rpc_request::RpcRequest;
use solana_transaction_status::option_serializer::OptionSerializer;
use solana_transaction_status::{
    EncodedConfirmedTransactionWithStatusMeta, EncodedTransaction, UiMessage,
    UiTransactionEncoding, UiTransactionTokenBalance,
};
use std::collections::BTreeMap;
use tracing::debug;

pub struct SolanaLedgerVerifier {
    rpc_client: RpcClient,
}

impl SolanaLedgerVerifier {
    pub fn new(config: &SolanaConfig) -> Self {
        let rpc_client = RpcClient::new_with_timeout_and_commitment(
            config.rpc_url.clone(),
            config.ledger_timeout(),
            config.commitment,
        );
        Self { rpc_client }
    }

    fn transaction_config(&self) -> RpcTransactionConfig {
        RpcTransactionConfig {
            encoding: Some(UiTransactionEncoding::Json),
            commitment: Some(self.rpc_client.commitment()),
            max_supported_transaction_version: Some(0),
        }
    }
}

fn map_client_error(err: ClientError) -> LedgerError {
    match err.kind {
        ClientErrorKind::Reqwest(ref e) if e.is_timeout() => LedgerError::Timeout,
        ClientErrorKind::SerdeJson(e) => LedgerError::InvalidResponse(e.to_string()),
        other => LedgerError::Unavailable(other.to_string()),
    }
}

#[async_trait]
impl LedgerVerifier for SolanaLedgerVerifier {
    async fn get_transaction(&self, tx_ref: &str) -> Result<LedgerTransaction, LedgerError> {
        // `get_transaction_with_config` fails on a null result; not-found must stay distinguishable
        let result: Option<EncodedConfirmedTransactionWithStatusMeta> = self
            .rpc_client
            .send(
                RpcRequest::GetTransaction,
                json!([tx_ref, self.transaction_config()]),
            )
            .await
            .map_err(map_client_error)?;

        let tx = match result {
            Some(confirmed) => fold_transaction(confirmed)?,
            None => LedgerTransaction::not_found(),
        };
        debug!(tx = %tx_ref, found = tx.found, succeeded = tx.succeeded, "Fetched ledger transaction");
        Ok(tx)
    }
}

/// Static account keys plus how many of them signed
fn static_keys(transaction: &EncodedTransaction) -> Result<(Vec<String>, usize), LedgerError> {
    match transaction {
        EncodedTransaction::Json(ui) => match &ui.message {
            UiMessage::Raw(raw) => Ok((
                raw.account_keys.clone(),
                raw.header.num_required_signatures as usize,
            )),
            UiMessage::Parsed(parsed) => {
                let keys: Vec<String> =
                    parsed.account_keys.iter().map(|a| a.pubkey.clone()).collect();
                let signers = parsed.account_keys.iter().take_while(|a| a.signer).count();
                Ok((keys, signers))
            }
        },
        other => {
            let decoded = other.decode().ok_or_else(|| {
                LedgerError::InvalidResponse("undecodable transaction".to_string())
            })?;
            let keys = decoded
                .message
                .static_account_keys()
                .iter()
                .map(ToString::to_string)
                .collect();
            Ok((keys, decoded.message.header().num_required_signatures as usize))
        }
    }
}

struct TokenBalance {
    amount: i128,
    mint: String,
    owner: Option<String>,
}

fn token_balances(
    entries: &OptionSerializer<Vec<UiTransactionTokenBalance>>,
) -> Result<BTreeMap<usize, TokenBalance>, LedgerError> {
    let mut balances = BTreeMap::new();
    let OptionSerializer::Some(entries) = entries else {
        return Ok(balances);
    };

    for entry in entries {
        let amount = entry
            .ui_token_amount
            .amount
            .parse::<i128>()
            .map_err(|e| LedgerError::InvalidResponse(format!("bad token amount: {}", e)))?;
        let owner: Option<String> = entry.owner.clone().into();

        balances.insert(
            entry.account_index as usize,
            TokenBalance {
                amount,
                mint: entry.mint.clone(),
                owner,
            },
        );
    }

    Ok(balances)
}

/// Fold a confirmed transaction into per-account token deltas
pub fn fold_transaction(
    confirmed: EncodedConfirmedTransactionWithStatusMeta,
) -> Result<LedgerTransaction, LedgerError> {
    let meta = confirmed
        .transaction
        .meta
        .ok_or_else(|| LedgerError::InvalidResponse("transaction without meta".to_string()))?;

    let (mut account_keys, required_signatures) = static_keys(&confirmed.transaction.transaction)?;
    let signers = account_keys
        .iter()
        .take(required_signatures)
        .cloned()
        .collect();

    if let OptionSerializer::Some(loaded) = &meta.loaded_addresses {
        account_keys.extend(loaded.writable.iter().cloned());
        account_keys.extend(loaded.readonly.iter().cloned());
    }

    let pre = token_balances(&meta.pre_token_balances)?;
    let post = token_balances(&meta.post_token_balances)?;

    let mut indices: Vec<usize> = pre.keys().chain(post.keys()).copied().collect();
    indices.sort_unstable();
    indices.dedup();

    let mut balance_deltas = Vec::with_capacity(indices.len());
    for index in indices {
        let account = account_keys.get(index).cloned().ok_or_else(|| {
            LedgerError::InvalidResponse(format!("accountIndex {} out of range", index))
        })?;
        let before = pre.get(&index);
        let after = post.get(&index);
        let delta = after.map_or(0, |b| b.amount) - before.map_or(0, |b| b.amount);
        let source = after.or(before);

        balance_deltas.push(BalanceDelta {
            account,
            mint: source.map(|b| b.mint.clone()),
            owner: source.and_then(|b| b.owner.clone()),
            delta,
        });
    }

    Ok(LedgerTransaction {
        found: true,
        succeeded: meta.err.is_none(),
        balance_deltas,
        block_time: confirmed.block_time,
        signers,
    })
}
