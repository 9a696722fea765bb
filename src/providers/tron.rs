//! Tron full node and TronGrid adapter
//!
//! This module handles:
//! - TRX and TRC-20 balances
//! - History merged from native transactions and TRC-20 events
//! - Bandwidth-based fee estimate
//! - Node-built transfers, `txID` signing and broadcast
//!
//! History filtering: a `TriggerSmartContract` call is dropped only when it
//! succeeded, moved no TRX, produced no TRC-20 event and is not an
//! `approve`. Token events without a matching transaction become their own
//! record.

use async_trait::async_trait;
use log::{debug, info, warn};
use num_bigint::BigUint;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

use super::{
    biguint_field, opt_str, pick_primary, str_field, u64_field, AdapterContext, ApiProvider, BlockHeightSource,
    Broadcaster, FeeEstimator, HistorySource, NativeBalanceSource, TokenBalanceSource, TransactionBuilder,
    TransactionSigner, TransactionSource,
};
use crate::amount::Amount;
use crate::chain::tron::{decode_address, from_hex_address};
use crate::chain::TronChain;
use crate::classify::{action_for_method, direction, selector_from_input, SELECTOR_APPROVE};
use crate::error::{GatewayError, Result};
use crate::model::{
    Action, Asset, Balance, ContractInfo, FeeEstimate, FeeOption, HistoryQuery, SignedTransaction, TokenBalance,
    Transaction, TransactionQuery, TransferIntent, TxStatus, UnsignedPayload, UnsignedTransaction,
};
use crate::transport::HttpRequest;

const ORIGIN: &str = "tron";
/// Bandwidth bytes consumed by a simple transfer
pub const TRANSFER_BANDWIDTH: u64 = 268;
/// Sun burned per bandwidth byte when free bandwidth is exhausted
pub const SUN_PER_BANDWIDTH: u64 = 1_000;
/// Energy used by a typical TRC-20 transfer
pub const TRC20_TRANSFER_ENERGY: u64 = 65_000;
/// Sun burned per energy unit
pub const SUN_PER_ENERGY: u64 = 420;
/// Fee limit attached to TRC-20 calls, in sun
pub const TRC20_FEE_LIMIT: u64 = 100_000_000;

/// Contract kinds kept regardless of value, and their action
const KNOWN_CONTRACTS: &[(&str, Action)] = &[
    ("TransferContract", Action::Transfer),
    ("TransferAssetContract", Action::Transfer),
    ("FreezeBalanceContract", Action::Freeze),
    ("FreezeBalanceV2Contract", Action::Freeze),
    ("UnfreezeBalanceContract", Action::Unfreeze),
    ("UnfreezeBalanceV2Contract", Action::Unfreeze),
    ("VoteWitnessContract", Action::Vote),
    ("AccountCreateContract", Action::CreateAccount),
    ("WithdrawBalanceContract", Action::Withdraw),
    ("WithdrawExpireUnfreezeContract", Action::Withdraw),
];

/// Tron node + TronGrid adapter
pub struct TronAdapter {
    ctx: AdapterContext,
    chain: TronChain,
}

/// Fields of a node transaction's first contract
struct ContractCall<'a> {
    kind: &'a str,
    owner: String,
    to: String,
    amount: BigUint,
    contract_address: Option<String>,
    data: &'a str,
}

/// Accepts base58 or `41…` hex addresses
fn base58_address(raw: &str) -> String {
    if decode_address(raw).is_ok() {
        return raw.to_string();
    }
    from_hex_address(raw).unwrap_or_else(|_| raw.to_string())
}

fn first_contract(tx: &Value) -> Result<ContractCall<'_>> {
    let contract = tx
        .pointer("/raw_data/contract/0")
        .ok_or_else(|| GatewayError::invalid_data(ORIGIN, "transaction has no contract"))?;
    let kind = str_field(contract, "type", ORIGIN)?;
    let value = contract
        .pointer("/parameter/value")
        .ok_or_else(|| GatewayError::invalid_data(ORIGIN, "contract has no parameter value"))?;
    let amount = ["amount", "call_value", "frozen_balance", "unfreeze_balance"]
        .iter()
        .find_map(|field| biguint_field(value, field, ORIGIN).ok())
        .unwrap_or_default();
    let contract_address = opt_str(value, "contract_address").map(base58_address);
    Ok(ContractCall {
        kind,
        owner: opt_str(value, "owner_address").map(base58_address).unwrap_or_default(),
        to: opt_str(value, "to_address")
            .map(base58_address)
            .or_else(|| contract_address.clone())
            .unwrap_or_default(),
        amount,
        contract_address,
        data: opt_str(value, "data").unwrap_or_default(),
    })
}

fn succeeded(tx: &Value) -> bool {
    match tx.pointer("/ret/0/contractRet").and_then(Value::as_str) {
        Some(result) => result == "SUCCESS",
        None => true,
    }
}

/// Whether a native record is kept in history
pub fn keep_native_record(kind: &str, success: bool, call_value: &BigUint, has_event: bool, data: &str) -> bool {
    if kind != "TriggerSmartContract" {
        return true;
    }
    let is_approve = data.trim_start_matches("0x").to_lowercase().starts_with(&SELECTOR_APPROVE[2..]);
    !(success && *call_value == BigUint::default() && !has_event && !is_approve)
}

fn event_parts(event: &Value) -> (&str, &str, BigUint) {
    (
        opt_str(event, "from").unwrap_or_default(),
        opt_str(event, "to").unwrap_or_default(),
        biguint_field(event, "value", ORIGIN).unwrap_or_default(),
    )
}

fn event_action(event: &Value) -> Action {
    match opt_str(event, "type") {
        Some("Approval") => Action::Approve,
        _ => Action::Transfer,
    }
}

fn event_asset(event: &Value) -> Result<Asset> {
    let info = event
        .get("token_info")
        .ok_or_else(|| GatewayError::invalid_data(ORIGIN, "TRC-20 event has no token_info"))?;
    let decimals = u64_field(info, "decimals")
        .and_then(|d| u8::try_from(d).ok())
        .ok_or_else(|| GatewayError::invalid_data(ORIGIN, "token_info has no decimals"))?;
    Ok(Asset::Token {
        value: biguint_field(event, "value", ORIGIN)?.to_string(),
        symbol: str_field(info, "symbol", ORIGIN)?.to_string(),
        decimals,
        contract_address: str_field(info, "address", ORIGIN)?.to_string(),
        name: opt_str(info, "name").map(str::to_string),
    })
}

impl TronAdapter {
    pub fn new(ctx: AdapterContext) -> Self {
        Self { ctx, chain: TronChain::new() }
    }

    pub fn into_provider(self) -> ApiProvider {
        let mut provider = ApiProvider::new(self.ctx.provider_name(), self.ctx.endpoint.kind);
        let shared = Arc::new(self);
        provider.native_balance = Some(shared.clone());
        provider.token_balances = Some(shared.clone());
        provider.transaction_history = Some(shared.clone());
        provider.transaction = Some(shared.clone());
        provider.block_height = Some(shared.clone());
        provider.estimate_fee = Some(shared.clone());
        provider.build_transaction = Some(shared.clone());
        provider.sign_transaction = Some(shared.clone());
        provider.broadcast_transaction = Some(shared);
        provider
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.ctx.base_url(), path)
    }

    fn with_key(&self, request: HttpRequest) -> HttpRequest {
        match &self.ctx.endpoint.api_key {
            Some(key) => request.with_header("TRON-PRO-API-KEY", key),
            None => request,
        }
    }

    fn get(&self, path: &str) -> HttpRequest {
        self.with_key(HttpRequest::get(self.url(path)))
    }

    fn post(&self, path: &str, body: &Value) -> HttpRequest {
        self.with_key(HttpRequest::post_json(self.url(path), body))
    }

    fn native_asset(&self, value: &BigUint) -> Asset {
        Asset::native(value.to_string(), &self.ctx.chain.symbol, self.ctx.chain.decimals)
    }

    /// Normalize a node/TronGrid transaction, with its TRC-20 event if any
    fn normalize_native(&self, tx: &Value, event: Option<&Value>, address: &str) -> Result<Transaction> {
        let hash = str_field(tx, "txID", ORIGIN)?.to_string();
        let call = first_contract(tx)?;
        let success = succeeded(tx);
        let selector = selector_from_input(call.data);

        let known = KNOWN_CONTRACTS.iter().find(|(kind, _)| *kind == call.kind).map(|(_, a)| *a);
        let mut action = known
            .or_else(|| action_for_method(selector.as_deref(), None))
            .unwrap_or(Action::Contract);

        let (from, to, assets) = match event {
            Some(event) => {
                action = event_action(event);
                let mut assets = vec![event_asset(event)?];
                if call.amount != BigUint::default() {
                    assets.push(self.native_asset(&call.amount));
                }
                (
                    str_field(event, "from", ORIGIN)?.to_string(),
                    str_field(event, "to", ORIGIN)?.to_string(),
                    assets,
                )
            }
            None => (call.owner.clone(), call.to.clone(), vec![self.native_asset(&call.amount)]),
        };

        let fee = tx
            .pointer("/ret/0/fee")
            .and_then(Value::as_u64)
            .or_else(|| u64_field(tx, "fee"))
            .map(|f| f.to_string());

        Ok(Transaction {
            hash,
            direction: direction(&from, &to, address),
            from,
            to,
            timestamp: u64_field(tx, "block_timestamp")
                .or_else(|| tx.pointer("/raw_data/timestamp").and_then(Value::as_u64))
                .unwrap_or_default(),
            status: if success { TxStatus::Confirmed } else { TxStatus::Failed },
            block_number: u64_field(tx, "blockNumber"),
            action,
            assets,
            contract: call.contract_address.map(|address| ContractInfo {
                address,
                method: None,
                method_id: selector,
            }),
            fee,
        })
    }

    fn normalize_event(&self, event: &Value, address: &str) -> Result<Transaction> {
        let from = str_field(event, "from", ORIGIN)?.to_string();
        let to = str_field(event, "to", ORIGIN)?.to_string();
        Ok(Transaction {
            hash: str_field(event, "transaction_id", ORIGIN)?.to_string(),
            direction: direction(&from, &to, address),
            from,
            to,
            timestamp: u64_field(event, "block_timestamp").unwrap_or_default(),
            status: TxStatus::Confirmed,
            block_number: None,
            action: event_action(event),
            assets: vec![event_asset(event)?],
            contract: None,
            fee: None,
        })
    }

    /// Merge native transactions and TRC-20 events by transaction id
    pub fn aggregate_history(&self, native: &[Value], events: &[Value], address: &str) -> Result<Vec<Transaction>> {
        let mut events_by_id: HashMap<&str, Vec<Value>> = HashMap::new();
        let mut event_order: Vec<&str> = Vec::new();
        for event in events {
            let id = str_field(event, "transaction_id", ORIGIN)?;
            let group = events_by_id.entry(id).or_default();
            if group.is_empty() {
                event_order.push(id);
            }
            group.push(event.clone());
        }

        let mut history = Vec::new();
        let mut seen: Vec<String> = Vec::new();
        for tx in native {
            // internal transactions share the listing but carry no txID or raw_data
            let (Some(id), Some(_)) = (opt_str(tx, "txID"), tx.pointer("/raw_data/contract/0")) else {
                warn!("Skipping Tron record without txID or contract: {}", tx);
                continue;
            };
            if seen.iter().any(|s| s == id) {
                continue;
            }
            let call = first_contract(tx)?;
            let event = events_by_id
                .get(id)
                .and_then(|group| pick_primary(group, address, event_parts));
            if !keep_native_record(call.kind, succeeded(tx), &call.amount, event.is_some(), call.data) {
                debug!("Dropping zero-value contract call {}", id);
                continue;
            }
            seen.push(id.to_string());
            history.push(self.normalize_native(tx, event, address)?);
        }

        for id in event_order {
            if seen.iter().any(|s| s == id) {
                continue;
            }
            if let Some(event) = pick_primary(&events_by_id[id], address, event_parts) {
                history.push(self.normalize_event(event, address)?);
            }
        }

        history.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(history)
    }

    fn grid_list(response: &Value, what: &str) -> Result<Vec<Value>> {
        if response.get("success").and_then(Value::as_bool) == Some(false) {
            let reason = opt_str(response, "error").unwrap_or("unknown error");
            return Err(GatewayError::invalid_data(ORIGIN, format!("{} failed: {}", what, reason)));
        }
        match response.get("data") {
            Some(Value::Array(items)) => Ok(items.clone()),
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(other) => Err(GatewayError::invalid_data(ORIGIN, format!("{} data is not a list: {}", what, other))),
        }
    }

    /// Reason from a node error reply, hex-decoded
    fn node_error(response: &Value) -> Option<GatewayError> {
        if let Some(error) = opt_str(response, "Error") {
            return Some(GatewayError::broadcast_rejected(error, None));
        }
        let result = response.get("result").unwrap_or(response);
        if result.get("result").and_then(Value::as_bool) == Some(false)
            || (result.get("code").is_some() && result.get("result").is_none())
        {
            let message = opt_str(result, "message").unwrap_or("rejected");
            let code = opt_str(result, "code").map(str::to_string);
            return Some(GatewayError::broadcast_rejected(message, code));
        }
        None
    }
}

#[async_trait]
impl NativeBalanceSource for TronAdapter {
    async fn native_balance(&self, address: &str) -> Result<Balance> {
        debug!("Getting balance for address: {}", address);
        let request = self.post("/wallet/getaccount", &json!({"address": address, "visible": true}));
        let account = self.ctx.fetch_balance(request, address).await?;
        if !account.is_object() {
            return Err(GatewayError::invalid_data(ORIGIN, "getaccount did not return an object"));
        }
        // unactivated accounts come back as {}
        let sun = match account.get("balance") {
            None => 0,
            Some(_) => u64_field(&account, "balance")
                .ok_or_else(|| GatewayError::invalid_data(ORIGIN, format!("malformed balance for {}", address)))?,
        };
        let amount = Amount::from_u64(sun, self.ctx.chain.decimals);
        debug!("Got balance {} for {}", amount, address);
        Ok(Balance { amount, symbol: self.ctx.chain.symbol.clone() })
    }
}

#[async_trait]
impl TokenBalanceSource for TronAdapter {
    async fn token_balances(&self, address: &str) -> Result<Vec<TokenBalance>> {
        debug!("Getting token balances for address: {}", address);
        let response = self
            .ctx
            .fetch_balance(self.get(&format!("/v1/accounts/{}", address)), address)
            .await?;
        let accounts = Self::grid_list(&response, "account")?;
        let account = accounts.first().cloned().unwrap_or(Value::Null);

        let sun = u64_field(&account, "balance").unwrap_or_default();
        let mut balances = vec![TokenBalance {
            amount: Amount::from_u64(sun, self.ctx.chain.decimals),
            symbol: self.ctx.chain.symbol.clone(),
            name: self.ctx.chain.symbol.clone(),
            is_native: true,
            contract_address: None,
        }];

        // trc20 is a list of single-entry {contract: balance} maps
        let mut held: HashMap<String, String> = HashMap::new();
        if let Some(entries) = account.get("trc20").and_then(Value::as_array) {
            for entry in entries.iter().filter_map(Value::as_object) {
                for (contract, value) in entry {
                    if let Some(value) = value.as_str() {
                        held.insert(contract.clone(), value.to_string());
                    }
                }
            }
        }
        for token in &self.ctx.chain.tokens {
            let raw = held.get(&token.contract_address).map(String::as_str).unwrap_or("0");
            balances.push(TokenBalance {
                amount: Amount::parse_raw(raw, token.decimals)?,
                symbol: token.symbol.clone(),
                name: token.name.clone(),
                is_native: false,
                contract_address: Some(token.contract_address.clone()),
            });
        }
        Ok(balances)
    }
}

#[async_trait]
impl HistorySource for TronAdapter {
    async fn transaction_history(&self, query: &HistoryQuery) -> Result<Vec<Transaction>> {
        debug!("Getting transaction history for address: {}", query.address);
        let native = self
            .ctx
            .fetch_history(
                self.get(&format!("/v1/accounts/{}/transactions?limit={}", query.address, query.limit)),
                &query.address,
            )
            .await?;
        let events = self
            .ctx
            .fetch_history(
                self.get(&format!("/v1/accounts/{}/transactions/trc20?limit={}", query.address, query.limit)),
                &query.address,
            )
            .await?;
        let native = Self::grid_list(&native, "transactions")?;
        let events = Self::grid_list(&events, "trc20 transactions")?;
        let mut history = self.aggregate_history(&native, &events, &query.address)?;
        history.truncate(query.limit);
        debug!("Got {} transactions for {}", history.len(), query.address);
        Ok(history)
    }
}

#[async_trait]
impl TransactionSource for TronAdapter {
    async fn transaction(&self, query: &TransactionQuery) -> Result<Option<Transaction>> {
        debug!("Getting transaction: {}", query.hash);
        let body = json!({"value": query.hash, "visible": true});
        let tx = self.ctx.fetch_uncached(self.post("/wallet/gettransactionbyid", &body)).await?;
        if tx.get("txID").is_none() {
            return Ok(None);
        }
        let info = self.ctx.fetch_uncached(self.post("/wallet/gettransactioninfobyid", &body)).await?;

        let owner = first_contract(&tx)?.owner;
        let perspective = query.address.clone().unwrap_or(owner);
        let mut normalized = self.normalize_native(&tx, None, &perspective)?;
        normalized.block_number = u64_field(&info, "blockNumber");
        if let Some(ts) = u64_field(&info, "blockTimeStamp") {
            normalized.timestamp = ts;
        }
        if let Some(fee) = u64_field(&info, "fee") {
            normalized.fee = Some(fee.to_string());
        }
        if info.get("blockNumber").is_none() {
            normalized.status = TxStatus::Pending;
        }
        if info.pointer("/receipt/result").and_then(Value::as_str).map_or(false, |r| r != "SUCCESS") {
            normalized.status = TxStatus::Failed;
        }
        Ok(Some(normalized))
    }
}

#[async_trait]
impl BlockHeightSource for TronAdapter {
    async fn block_height(&self) -> Result<u64> {
        debug!("Getting block height from {}", self.ctx.provider_name());
        let block = self.ctx.fetch_tip(self.post("/wallet/getnowblock", &json!({}))).await?;
        block
            .pointer("/block_header/raw_data/number")
            .and_then(Value::as_u64)
            .ok_or_else(|| GatewayError::invalid_data(ORIGIN, "getnowblock has no block number"))
    }
}

#[async_trait]
impl FeeEstimator for TronAdapter {
    async fn estimate_fee(&self, intent: &TransferIntent) -> Result<FeeEstimate> {
        let body = json!({"address": intent.from, "visible": true});
        let net = self.ctx.fetch_uncached(self.post("/wallet/getaccountnet", &body)).await?;
        let free = u64_field(&net, "freeNetLimit")
            .unwrap_or_default()
            .saturating_sub(u64_field(&net, "freeNetUsed").unwrap_or_default());
        let staked = u64_field(&net, "NetLimit")
            .unwrap_or_default()
            .saturating_sub(u64_field(&net, "NetUsed").unwrap_or_default());

        let mut sun = if free.max(staked) >= TRANSFER_BANDWIDTH {
            0
        } else {
            TRANSFER_BANDWIDTH * SUN_PER_BANDWIDTH
        };
        if intent.token_contract.is_some() {
            sun += TRC20_TRANSFER_ENERGY * SUN_PER_ENERGY;
        }
        debug!("Estimated fee {} sun for {} (free bandwidth {})", sun, intent.from, free);
        // fees are deterministic on Tron, so all tiers match
        let option = FeeOption {
            amount: Amount::from_u64(sun, self.ctx.chain.decimals),
            rate: format!("{} bandwidth", TRANSFER_BANDWIDTH),
        };
        Ok(FeeEstimate { slow: option.clone(), standard: option.clone(), fast: option })
    }
}

#[async_trait]
impl TransactionBuilder for TronAdapter {
    async fn build_transaction(&self, intent: &TransferIntent) -> Result<UnsignedTransaction> {
        let response = match &intent.token_contract {
            None => {
                let amount = u64::try_from(intent.amount.raw())
                    .map_err(|_| GatewayError::invalid_data(ORIGIN, "amount does not fit in sun"))?;
                let body = json!({
                    "owner_address": intent.from,
                    "to_address": intent.to,
                    "amount": amount,
                    "visible": true,
                });
                self.ctx.fetch_uncached(self.post("/wallet/createtransaction", &body)).await?
            }
            Some(contract) => {
                let recipient = decode_address(&intent.to)?;
                let parameter = format!(
                    "{:0>64}{:0>64}",
                    hex::encode(&recipient[1..]),
                    intent.amount.raw().to_str_radix(16)
                );
                let body = json!({
                    "owner_address": intent.from,
                    "contract_address": contract,
                    "function_selector": "transfer(address,uint256)",
                    "parameter": parameter,
                    "fee_limit": TRC20_FEE_LIMIT,
                    "call_value": 0,
                    "visible": true,
                });
                self.ctx.fetch_uncached(self.post("/wallet/triggersmartcontract", &body)).await?
            }
        };

        if let Some(error) = Self::node_error(&response) {
            return Err(GatewayError::invalid_data(ORIGIN, format!("node refused to build: {}", error)));
        }
        let tx = response.get("transaction").cloned().unwrap_or(response);
        if opt_str(&tx, "txID").is_none() {
            return Err(GatewayError::invalid_data(ORIGIN, "built transaction has no txID"));
        }
        info!("Built Tron transaction {}", opt_str(&tx, "txID").unwrap_or_default());
        Ok(UnsignedTransaction {
            chain_id: self.ctx.chain.id.clone(),
            payload: UnsignedPayload::Tron(tx),
        })
    }
}

#[async_trait]
impl TransactionSigner for TronAdapter {
    async fn sign_transaction(&self, unsigned: &UnsignedTransaction, private_key: &[u8]) -> Result<SignedTransaction> {
        let UnsignedPayload::Tron(tx) = &unsigned.payload else {
            return Err(GatewayError::invalid_data(ORIGIN, "payload is not a Tron transaction"));
        };
        let txid = str_field(tx, "txID", ORIGIN)?.to_string();
        let signature = self.chain.sign_txid(&txid, private_key)?;

        let mut signed = tx.clone();
        let object = signed
            .as_object_mut()
            .ok_or_else(|| GatewayError::invalid_data(ORIGIN, "transaction is not an object"))?;
        object.insert("signature".to_string(), json!([signature]));
        Ok(SignedTransaction {
            chain_id: unsigned.chain_id.clone(),
            raw: signed.to_string(),
            hash: Some(txid),
        })
    }
}

#[async_trait]
impl Broadcaster for TronAdapter {
    async fn broadcast_transaction(&self, signed: &SignedTransaction) -> Result<String> {
        info!("Broadcasting transaction to {}", self.ctx.provider_name());
        let body: Value = serde_json::from_str(&signed.raw)
            .map_err(|e| GatewayError::invalid_data(ORIGIN, format!("signed transaction is not JSON: {}", e)))?;
        let response = self
            .ctx
            .cache
            .transport()
            .send(&self.post("/wallet/broadcasttransaction", &body))
            .await?
            .into_json(ORIGIN)?;
        if response.get("result").and_then(Value::as_bool) == Some(true) {
            return Ok(opt_str(&response, "txid")
                .or_else(|| opt_str(&body, "txID"))
                .unwrap_or_default()
                .to_string());
        }
        let message = opt_str(&response, "message").unwrap_or("broadcast failed");
        Err(GatewayError::broadcast_rejected(message, opt_str(&response, "code").map(str::to_string)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::RequestCache;
    use crate::config::{ChainDescriptor, ChainFamily, ProviderKind};
    use crate::model::Direction;
    use crate::testing::MockTransport;

    const URL: &str = "https://api.trongrid.io";
    const ME: &str = "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t";

    fn adapter(transport: Arc<MockTransport>) -> TronAdapter {
        let chain = Arc::new(ChainDescriptor::new("tron", "TRX", 6, ChainFamily::Tron).with_endpoint(ProviderKind::Tron, URL));
        let endpoint = chain.endpoints[0].clone();
        TronAdapter::new(AdapterContext::new(chain, endpoint, Arc::new(RequestCache::new(transport))))
    }

    fn trigger(id: &str, call_value: u64, data: &str, ret: &str) -> Value {
        json!({
            "txID": id,
            "block_timestamp": 1_000,
            "ret": [{"contractRet": ret}],
            "raw_data": {"contract": [{"type": "TriggerSmartContract", "parameter": {"value": {
                "owner_address": ME, "contract_address": "TXLAQ63Xg1NAzckPwKHvzw7CSEmLMEqcdj",
                "call_value": call_value, "data": data
            }}}]}
        })
    }

    #[test]
    fn test_drop_rule() {
        let zero = BigUint::default();
        assert!(!keep_native_record("TriggerSmartContract", true, &zero, false, "a9059cbb00"));
        assert!(keep_native_record("TriggerSmartContract", false, &zero, false, "a9059cbb00"));
        assert!(keep_native_record("TriggerSmartContract", true, &BigUint::from(1u8), false, "a9059cbb00"));
        assert!(keep_native_record("TriggerSmartContract", true, &zero, true, "a9059cbb00"));
        assert!(keep_native_record("TriggerSmartContract", true, &zero, false, "095ea7b300"));
        assert!(keep_native_record("FreezeBalanceV2Contract", true, &zero, false, ""));
    }

    #[test]
    fn test_orphan_event_becomes_transfer() {
        let adapter = adapter(Arc::new(MockTransport::new()));
        let events = vec![json!({
            "transaction_id": "orphan",
            "block_timestamp": 5_000,
            "from": "TXYZopYRdj2D9XRtbG411XZZ3kM5VkAeBf",
            "to": ME,
            "type": "Transfer",
            "value": "1000000",
            "token_info": {"symbol": "USDT", "address": "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t", "decimals": 6, "name": "Tether USD"}
        })];
        let native = vec![trigger("silent", 0, "a9059cbb00", "SUCCESS")];
        let history = adapter.aggregate_history(&native, &events, ME).unwrap();
        assert_eq!(history.len(), 1);
        let tx = &history[0];
        assert_eq!(tx.hash, "orphan");
        assert_eq!(tx.timestamp, 5_000);
        assert_eq!(tx.from, "TXYZopYRdj2D9XRtbG411XZZ3kM5VkAeBf");
        assert_eq!(tx.to, ME);
        assert_eq!(tx.action, Action::Transfer);
        assert_eq!(tx.direction, Direction::In);
    }

    #[test]
    fn test_failed_trigger_is_kept() {
        let adapter = adapter(Arc::new(MockTransport::new()));
        let native = vec![trigger("failed", 0, "a9059cbb00", "REVERT")];
        let history = adapter.aggregate_history(&native, &[], ME).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, TxStatus::Failed);
        assert_eq!(history[0].action, Action::Transfer);
    }

    #[tokio::test]
    async fn test_broadcast_decodes_hex_message() {
        let transport = Arc::new(MockTransport::new());
        transport.route_json(
            &format!("{}/wallet/broadcasttransaction", URL),
            json!({"code": "SIGERROR", "message": hex::encode("Validate signature error")}),
        );
        let signed = SignedTransaction { chain_id: "tron".into(), raw: json!({"txID": "ab"}).to_string(), hash: None };
        match adapter(transport).broadcast_transaction(&signed).await {
            Err(GatewayError::BroadcastRejected { reason, code }) => {
                assert_eq!(reason, "Validate signature error");
                assert_eq!(code.as_deref(), Some("SIGERROR"));
            }
            other => panic!("expected BroadcastRejected, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unactivated_account_has_zero_balance() {
        let transport = Arc::new(MockTransport::new());
        transport.route_json(&format!("{}/wallet/getaccount", URL), json!({}));
        let balance = adapter(transport).native_balance(ME).await.unwrap();
        assert!(balance.amount.is_zero());
    }

    #[test]
    fn test_internal_entries_are_skipped() {
        let adapter = adapter(Arc::new(MockTransport::new()));
        let native = vec![
            json!({"internal_tx_id": "internal-1", "tx_id": "parent", "block_timestamp": 900,
                   "from_address": ME, "to_address": "TXYZopYRdj2D9XRtbG411XZZ3kM5VkAeBf"}),
            trigger("paid", 5, "", "SUCCESS"),
            json!({"txID": "no-raw-data", "block_timestamp": 800}),
        ];
        let history = adapter.aggregate_history(&native, &[], ME).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].hash, "paid");
    }

    #[tokio::test]
    async fn test_malformed_balance_is_invalid_data() {
        let transport = Arc::new(MockTransport::new());
        transport.route_json(&format!("{}/wallet/getaccount", URL), json!({"balance": "lots"}));
        let err = adapter(transport).native_balance(ME).await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidUpstreamData { .. }));
    }
}
