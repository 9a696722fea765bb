//! BioForest wallet backend adapter
//!
//! Every call is a POST to `{url}/wallet/{path}/...` answered with an
//! envelope `{success, result, error: {message}}`. Timestamps on the wire
//! are seconds since the chain's genesis epoch.

use async_trait::async_trait;
use log::{debug, info};
use serde_json::{json, Map, Value};
use std::sync::Arc;

use super::{
    opt_str, seconds_to_ms, u64_field, AdapterContext, ApiProvider, BlockHeightSource, Broadcaster, HistorySource,
    NativeBalanceSource, TokenBalanceSource, TransactionBuilder, TransactionSigner,
};
use crate::amount::{parse_decimal_uint, Amount};
use crate::chain::BioForestChain;
use crate::chain::bioforest::DEFAULT_PREFIX;
use crate::classify::{bioforest_action, direction, is_unquantified_action};
use crate::error::{looks_like_rate_limit, GatewayError, Result};
use crate::model::{
    now_ms, Asset, Balance, HistoryQuery, SignedTransaction, TokenBalance, Transaction, TransferIntent, TxStatus,
    UnsignedPayload, UnsignedTransaction,
};
use crate::transport::HttpRequest;

const ORIGIN: &str = "bioforest";
/// Fee attached to a transfer when the intent names none, in raw units
pub const DEFAULT_TRANSFER_FEE: u64 = 500;
/// Blocks a built transaction stays valid for
pub const EFFECTIVE_BLOCKS: u64 = 100;

/// Custom wallet-backend adapter
pub struct BioForestAdapter {
    ctx: AdapterContext,
    chain: BioForestChain,
}

/// Unwrap `{success, result, error}`; a missing result maps to `Null`
pub fn unwrap_envelope(response: Value, what: &str) -> Result<Value> {
    if response.get("success").and_then(Value::as_bool) == Some(true) {
        return Ok(response.get("result").cloned().unwrap_or(Value::Null));
    }
    let message = response
        .pointer("/error/message")
        .and_then(Value::as_str)
        .unwrap_or("request failed without a message")
        .to_string();
    if looks_like_rate_limit(&message) {
        return Err(GatewayError::RateLimited(message));
    }
    Err(GatewayError::invalid_data(ORIGIN, format!("{}: {}", what, message)))
}

/// First `{amount, assetType}` found among the payload's asset entries
fn quantified_asset(transaction: &Value) -> Option<(String, Option<String>)> {
    let assets = transaction.get("asset")?.as_object()?;
    assets.values().find_map(|entry| {
        let amount = opt_str(entry, "amount")?;
        parse_decimal_uint(amount).ok()?;
        Some((amount.to_string(), opt_str(entry, "assetType").map(str::to_string)))
    })
}

impl BioForestAdapter {
    pub fn new(ctx: AdapterContext) -> Self {
        let prefix = ctx.chain.address_prefix.as_deref().unwrap_or(DEFAULT_PREFIX).to_string();
        Self { ctx, chain: BioForestChain::new(&prefix) }
    }

    pub fn into_provider(self) -> ApiProvider {
        let mut provider = ApiProvider::new(self.ctx.provider_name(), self.ctx.endpoint.kind);
        let shared = Arc::new(self);
        provider.native_balance = Some(shared.clone());
        provider.token_balances = Some(shared.clone());
        provider.transaction_history = Some(shared.clone());
        provider.block_height = Some(shared.clone());
        provider.build_transaction = Some(shared.clone());
        provider.sign_transaction = Some(shared.clone());
        provider.broadcast_transaction = Some(shared);
        provider
    }

    fn url(&self, method: &str) -> String {
        let path = self.ctx.endpoint.path.as_deref().unwrap_or(&self.ctx.chain.id);
        format!("{}/wallet/{}/{}", self.ctx.base_url(), path, method)
    }

    fn wire_time_to_ms(&self, seconds: u64) -> Result<u64> {
        seconds_to_ms(seconds, ORIGIN)?
            .checked_add(self.ctx.chain.genesis_epoch_ms)
            .ok_or_else(|| GatewayError::invalid_data(ORIGIN, format!("timestamp {} is out of range", seconds)))
    }

    fn asset_for(&self, amount: String, asset_type: Option<&str>) -> Asset {
        match asset_type {
            Some(symbol) if symbol != self.ctx.chain.symbol => Asset::Token {
                value: amount,
                symbol: symbol.to_string(),
                decimals: self.ctx.chain.decimals,
                contract_address: symbol.to_string(),
                name: None,
            },
            _ => Asset::native(amount, &self.ctx.chain.symbol, self.ctx.chain.decimals),
        }
    }

    /// `{magic: {symbol: {assetType, assetNumber}}}` flattened to (symbol, raw)
    async fn held_assets(&self, address: &str) -> Result<Vec<(String, String)>> {
        let request = HttpRequest::post_json(self.url("address/asset"), &json!({"address": address}));
        let result = unwrap_envelope(self.ctx.fetch_balance(request, address).await?, "address/asset")?;
        let mut held = Vec::new();
        let Some(by_magic) = result.get("assets").and_then(Value::as_object) else {
            return Ok(held);
        };
        for by_symbol in by_magic.values().filter_map(Value::as_object) {
            for (symbol, entry) in by_symbol {
                let asset_type = opt_str(entry, "assetType").unwrap_or(symbol);
                let number = match entry.get("assetNumber") {
                    Some(Value::String(s)) => s.clone(),
                    Some(Value::Number(n)) => n.to_string(),
                    _ => return Err(GatewayError::invalid_data(ORIGIN, format!("{} has no assetNumber", symbol))),
                };
                held.push((asset_type.to_string(), number));
            }
        }
        Ok(held)
    }

    fn normalize(&self, record: &Value, address: &str) -> Result<Transaction> {
        let tx = record
            .get("transaction")
            .ok_or_else(|| GatewayError::invalid_data(ORIGIN, "history entry has no transaction"))?;
        let hash = opt_str(tx, "signature")
            .ok_or_else(|| GatewayError::invalid_data(ORIGIN, "transaction has no signature"))?
            .to_string();
        let action = bioforest_action(opt_str(tx, "type").unwrap_or_default());
        let from = opt_str(tx, "senderId").unwrap_or_default().to_string();
        let to = opt_str(tx, "recipientId").unwrap_or_default().to_string();

        let asset = match quantified_asset(tx) {
            Some((amount, asset_type)) if !is_unquantified_action(action) => {
                self.asset_for(amount, asset_type.as_deref())
            }
            _ => Asset::native("0", &self.ctx.chain.symbol, self.ctx.chain.decimals),
        };

        Ok(Transaction {
            hash,
            direction: direction(&from, &to, address),
            from,
            to,
            timestamp: self.wire_time_to_ms(u64_field(tx, "timestamp").unwrap_or_default())?,
            status: TxStatus::Confirmed,
            block_number: u64_field(record, "height"),
            action,
            assets: vec![asset],
            contract: None,
            fee: opt_str(tx, "fee").map(str::to_string),
        })
    }

    async fn last_block(&self) -> Result<Value> {
        let request = HttpRequest::post_json(self.url("lastblock"), &json!({}));
        unwrap_envelope(self.ctx.fetch_tip(request).await?, "lastblock")
    }
}

#[async_trait]
impl NativeBalanceSource for BioForestAdapter {
    async fn native_balance(&self, address: &str) -> Result<Balance> {
        debug!("Getting balance for address: {}", address);
        let held = self.held_assets(address).await?;
        let raw = held
            .iter()
            .find(|(symbol, _)| *symbol == self.ctx.chain.symbol)
            .map(|(_, raw)| raw.as_str())
            .unwrap_or("0");
        let amount = Amount::parse_raw(raw, self.ctx.chain.decimals)?;
        debug!("Got balance {} for {}", amount, address);
        Ok(Balance { amount, symbol: self.ctx.chain.symbol.clone() })
    }
}

#[async_trait]
impl TokenBalanceSource for BioForestAdapter {
    async fn token_balances(&self, address: &str) -> Result<Vec<TokenBalance>> {
        debug!("Getting token balances for address: {}", address);
        let held = self.held_assets(address).await?;
        let mut balances = vec![TokenBalance {
            amount: Amount::zero(self.ctx.chain.decimals),
            symbol: self.ctx.chain.symbol.clone(),
            name: self.ctx.chain.symbol.clone(),
            is_native: true,
            contract_address: None,
        }];
        for (symbol, raw) in held {
            let amount = Amount::parse_raw(&raw, self.ctx.chain.decimals)?;
            if symbol == self.ctx.chain.symbol {
                balances[0].amount = amount;
                continue;
            }
            balances.push(TokenBalance {
                amount,
                name: symbol.clone(),
                contract_address: Some(symbol.clone()),
                symbol,
                is_native: false,
            });
        }
        Ok(balances)
    }
}

#[async_trait]
impl HistorySource for BioForestAdapter {
    async fn transaction_history(&self, query: &HistoryQuery) -> Result<Vec<Transaction>> {
        debug!("Getting transaction history for address: {}", query.address);
        let body = json!({
            "address": query.address,
            "page": 1,
            "pageSize": query.limit,
            "sort": -1,
        });
        let request = HttpRequest::post_json(self.url("transactions/query"), &body);
        let result = unwrap_envelope(self.ctx.fetch_history(request, &query.address).await?, "transactions/query")?;
        let records = match result.get("trs") {
            Some(Value::Array(records)) => records.as_slice(),
            None | Some(Value::Null) => &[],
            Some(other) => return Err(GatewayError::invalid_data(ORIGIN, format!("trs is not a list: {}", other))),
        };
        let mut history = records
            .iter()
            .map(|record| self.normalize(record, &query.address))
            .collect::<Result<Vec<_>>>()?;
        history.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        history.truncate(query.limit);
        debug!("Got {} transactions for {}", history.len(), query.address);
        Ok(history)
    }
}

#[async_trait]
impl BlockHeightSource for BioForestAdapter {
    async fn block_height(&self) -> Result<u64> {
        debug!("Getting block height from {}", self.ctx.provider_name());
        let block = self.last_block().await?;
        u64_field(&block, "height").ok_or_else(|| GatewayError::invalid_data(ORIGIN, "lastblock has no height"))
    }
}

#[async_trait]
impl TransactionBuilder for BioForestAdapter {
    async fn build_transaction(&self, intent: &TransferIntent) -> Result<UnsignedTransaction> {
        let block = self.last_block().await?;
        let height = u64_field(&block, "height").ok_or_else(|| GatewayError::invalid_data(ORIGIN, "lastblock has no height"))?;
        let magic = opt_str(&block, "magic").unwrap_or_default().to_string();
        let chain_name = self.ctx.endpoint.path.as_deref().unwrap_or(&self.ctx.chain.id).to_uppercase();
        let asset_type = intent.token_contract.clone().unwrap_or_else(|| self.ctx.chain.symbol.clone());
        let fee = match &intent.fee_rate {
            Some(rate) => parse_decimal_uint(rate)?.to_string(),
            None => DEFAULT_TRANSFER_FEE.to_string(),
        };
        let timestamp = now_ms().saturating_sub(self.ctx.chain.genesis_epoch_ms) / 1_000;

        let body = json!({
            "type": format!("{}-{}-AST-02", chain_name, magic),
            "senderId": intent.from,
            "recipientId": intent.to,
            "fee": fee,
            "timestamp": timestamp,
            "applyBlockHeight": height,
            "effectiveBlockHeight": height + EFFECTIVE_BLOCKS,
            "remark": intent.memo.as_ref().map(|memo| json!({"memo": memo})).unwrap_or_else(|| json!({})),
            "asset": {"transferAsset": {
                "sourceChainName": chain_name.to_lowercase(),
                "sourceChainMagic": magic,
                "assetType": asset_type,
                "amount": intent.amount.raw_string(),
            }},
        });
        info!("Built BioForest transfer of {} {} from {}", intent.amount, asset_type, intent.from);
        Ok(UnsignedTransaction {
            chain_id: self.ctx.chain.id.clone(),
            payload: UnsignedPayload::BioForest(body),
        })
    }
}

#[async_trait]
impl TransactionSigner for BioForestAdapter {
    async fn sign_transaction(&self, unsigned: &UnsignedTransaction, private_key: &[u8]) -> Result<SignedTransaction> {
        let UnsignedPayload::BioForest(body) = &unsigned.payload else {
            return Err(GatewayError::invalid_data(ORIGIN, "payload is not a BioForest transaction"));
        };
        let mut body: Map<String, Value> = body
            .as_object()
            .cloned()
            .ok_or_else(|| GatewayError::invalid_data(ORIGIN, "transaction body is not an object"))?;
        body.insert("senderPublicKey".to_string(), json!(self.chain.public_key_hex(private_key)?));

        let bytes = serde_json::to_vec(&body)?;
        let signature = self.chain.sign_bytes(&bytes, private_key)?;
        body.insert("signature".to_string(), json!(signature));
        Ok(SignedTransaction {
            chain_id: unsigned.chain_id.clone(),
            raw: Value::Object(body).to_string(),
            hash: Some(signature),
        })
    }
}

#[async_trait]
impl Broadcaster for BioForestAdapter {
    async fn broadcast_transaction(&self, signed: &SignedTransaction) -> Result<String> {
        info!("Broadcasting transaction to {}", self.ctx.provider_name());
        let body: Value = serde_json::from_str(&signed.raw)?;
        let response = self
            .ctx
            .cache
            .transport()
            .send(&HttpRequest::post_json(self.url("transactions/broadcast"), &body))
            .await?
            .into_json(ORIGIN)?;
        if response.get("success").and_then(Value::as_bool) != Some(true) {
            let reason = response
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or("broadcast failed");
            let code = response.pointer("/error/code").map(|c| c.to_string().trim_matches('"').to_string());
            return Err(GatewayError::broadcast_rejected(reason, code));
        }
        Ok(opt_str(&body, "signature").unwrap_or_default().to_string())
    }
}
