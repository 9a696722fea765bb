//! Etherscan-compatible explorer adapter
//!
//! This module handles:
//! - Native balance via `module=account&action=balance`
//! - History by merging `txlist` and `tokentx` records by hash
//!
//! When a hash appears in both lists the token event becomes the primary
//! asset and the native record contributes its contract call metadata.

use async_trait::async_trait;
use log::debug;
use num_bigint::BigUint;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use super::{
    biguint_field, opt_str, pick_primary, seconds_to_ms, str_field, u64_field, AdapterContext, ApiProvider,
    HistorySource, NativeBalanceSource,
};
use crate::amount::Amount;
use crate::classify::{action_for_method, direction, normalize_selector, selector_from_input, status_from_confirmations};
use crate::error::{looks_like_rate_limit, GatewayError, Result};
use crate::model::{Action, Asset, Balance, ContractInfo, HistoryQuery, Transaction, TxStatus};
use crate::transport::HttpRequest;

const ORIGIN: &str = "etherscan";

/// Explorer/scan API adapter
pub struct ScanAdapter {
    ctx: AdapterContext,
}

impl ScanAdapter {
    pub fn new(ctx: AdapterContext) -> Self {
        Self { ctx }
    }

    pub fn into_provider(self) -> ApiProvider {
        let mut provider = ApiProvider::new(self.ctx.provider_name(), self.ctx.endpoint.kind);
        let shared = Arc::new(self);
        provider.native_balance = Some(shared.clone());
        provider.transaction_history = Some(shared);
        provider
    }

    fn account_url(&self, action: &str, address: &str, extra: &str) -> String {
        let mut url = format!(
            "{}?module=account&action={}&address={}{}",
            self.ctx.base_url(),
            action,
            address,
            extra
        );
        if let Some(key) = &self.ctx.endpoint.api_key {
            url.push_str("&apikey=");
            url.push_str(key);
        }
        url
    }

    async fn list(&self, action: &str, query: &HistoryQuery) -> Result<Vec<Value>> {
        let url = self.account_url(
            action,
            &query.address,
            &format!("&startblock=0&endblock=99999999&page=1&offset={}&sort=desc", query.limit),
        );
        let response = self.ctx.fetch_history(HttpRequest::get(url), &query.address).await?;
        match unwrap_scan_result(&response, action)? {
            Value::Array(items) => Ok(items),
            other => Err(GatewayError::invalid_data(
                ORIGIN,
                format!("{} result is not a list: {}", action, other),
            )),
        }
    }
}

/// Unwrap the `{status, message, result}` envelope.
///
/// "No transactions found" yields an empty list; rate-limit wording yields
/// `RateLimited`; any other `status:"0"` is invalid data.
pub fn unwrap_scan_result(response: &Value, action: &str) -> Result<Value> {
    let status = response.get("status").and_then(Value::as_str).unwrap_or_default();
    let message = response.get("message").and_then(Value::as_str).unwrap_or_default();
    let result = response.get("result").cloned().unwrap_or(Value::Null);

    if status == "1" {
        return Ok(result);
    }
    if message.starts_with("No transactions found") {
        return Ok(Value::Array(Vec::new()));
    }
    let detail = result.as_str().unwrap_or(message);
    if looks_like_rate_limit(detail) || looks_like_rate_limit(message) {
        return Err(GatewayError::RateLimited(format!("{}: {}", action, detail)));
    }
    Err(GatewayError::invalid_data(
        ORIGIN,
        format!("{} returned status {:?}: {} {}", action, status, message, detail),
    ))
}

fn record_status(record: &Value, required: u32) -> TxStatus {
    if opt_str(record, "isError") == Some("1") || opt_str(record, "txreceipt_status") == Some("0") {
        return TxStatus::Failed;
    }
    match u64_field(record, "confirmations") {
        Some(confirmations) => status_from_confirmations(confirmations, required),
        None => TxStatus::Confirmed,
    }
}

fn native_record(record: &Value, address: &str, ctx: &AdapterContext) -> Result<Transaction> {
    let hash = str_field(record, "hash", ORIGIN)?.to_string();
    let from = str_field(record, "from", ORIGIN)?.to_string();
    let to = opt_str(record, "to")
        .or_else(|| opt_str(record, "contractAddress"))
        .unwrap_or_default()
        .to_string();
    let value = biguint_field(record, "value", ORIGIN)?;
    let input = opt_str(record, "input").unwrap_or("0x");
    let method_id = opt_str(record, "methodId")
        .and_then(normalize_selector)
        .or_else(|| selector_from_input(input));
    let has_call = method_id.is_some() || input.trim_start_matches("0x").len() >= 8;
    let function_name = opt_str(record, "functionName");

    let action = match action_for_method(method_id.as_deref(), function_name) {
        Some(action) => action,
        None if has_call || value == BigUint::default() => Action::Contract,
        None => Action::Transfer,
    };

    let contract = has_call.then(|| ContractInfo {
        address: to.clone(),
        method: function_name.map(str::to_string),
        method_id: method_id.clone(),
    });

    let fee = match (u64_field(record, "gasUsed"), biguint_field(record, "gasPrice", ORIGIN)) {
        (Some(gas_used), Ok(gas_price)) => Some((gas_price * BigUint::from(gas_used)).to_string()),
        _ => None,
    };

    Ok(Transaction {
        direction: direction(&from, &to, address),
        hash,
        from,
        to,
        timestamp: seconds_to_ms(u64_field(record, "timeStamp").unwrap_or_default(), ORIGIN)?,
        status: record_status(record, ctx.chain.confirmations_required),
        block_number: u64_field(record, "blockNumber"),
        action,
        assets: vec![Asset::native(value.to_string(), &ctx.chain.symbol, ctx.chain.decimals)],
        contract,
        fee,
    })
}

fn token_asset(event: &Value) -> Result<Asset> {
    let decimals = u64_field(event, "tokenDecimal")
        .and_then(|d| u8::try_from(d).ok())
        .ok_or_else(|| GatewayError::invalid_data(ORIGIN, "token event has no tokenDecimal"))?;
    Ok(Asset::Token {
        value: biguint_field(event, "value", ORIGIN)?.to_string(),
        symbol: str_field(event, "tokenSymbol", ORIGIN)?.to_string(),
        decimals,
        contract_address: str_field(event, "contractAddress", ORIGIN)?.to_string(),
        name: opt_str(event, "tokenName").map(str::to_string),
    })
}

fn event_parts(event: &Value) -> (&str, &str, BigUint) {
    (
        opt_str(event, "from").unwrap_or_default(),
        opt_str(event, "to").unwrap_or_default(),
        biguint_field(event, "value", ORIGIN).unwrap_or_default(),
    )
}

/// Merge native and token records into one transaction per hash
pub fn aggregate_history(
    native: &[Value],
    tokens: &[Value],
    address: &str,
    ctx: &AdapterContext,
) -> Result<Vec<Transaction>> {
    let mut order: Vec<String> = Vec::new();
    let mut merged: HashMap<String, Transaction> = HashMap::new();

    for record in native {
        let tx = native_record(record, address, ctx)?;
        if !merged.contains_key(&tx.hash) {
            order.push(tx.hash.clone());
            merged.insert(tx.hash.clone(), tx);
        }
    }

    let mut events_by_hash: HashMap<String, Vec<Value>> = HashMap::new();
    let mut event_order: Vec<String> = Vec::new();
    for event in tokens {
        let hash = str_field(event, "hash", ORIGIN)?.to_string();
        let group = events_by_hash.entry(hash.clone()).or_default();
        if group.is_empty() {
            event_order.push(hash);
        }
        group.push(event.clone());
    }

    for hash in event_order {
        let group = &events_by_hash[&hash];
        let Some(event) = pick_primary(group, address, event_parts) else {
            continue;
        };
        let asset = token_asset(event)?;
        let from = str_field(event, "from", ORIGIN)?.to_string();
        let to = str_field(event, "to", ORIGIN)?.to_string();

        match merged.get_mut(&hash) {
            Some(tx) => {
                let native_asset = tx.assets.drain(..).find(|a| a.value() != "0");
                tx.assets.push(asset);
                tx.assets.extend(native_asset);
                tx.direction = direction(&from, &to, address);
                tx.from = from;
                tx.to = to;
                if tx.action == Action::Contract {
                    tx.action = Action::Transfer;
                }
            }
            None => {
                order.push(hash.clone());
                merged.insert(
                    hash.clone(),
                    Transaction {
                        hash: hash.clone(),
                        direction: direction(&from, &to, address),
                        from,
                        to,
                        timestamp: seconds_to_ms(u64_field(event, "timeStamp").unwrap_or_default(), ORIGIN)?,
                        status: record_status(event, ctx.chain.confirmations_required),
                        block_number: u64_field(event, "blockNumber"),
                        action: Action::Transfer,
                        assets: vec![asset],
                        contract: None,
                        fee: None,
                    },
                );
            }
        }
    }

    let mut out: Vec<Transaction> = order.into_iter().filter_map(|h| merged.remove(&h)).collect();
    out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    Ok(out)
}

#[async_trait]
impl NativeBalanceSource for ScanAdapter {
    async fn native_balance(&self, address: &str) -> Result<Balance> {
        debug!("Getting balance for address: {}", address);
        let url = self.account_url("balance", address, "&tag=latest");
        let response = self.ctx.fetch_balance(HttpRequest::get(url), address).await?;
        let result = unwrap_scan_result(&response, "balance")?;
        let raw = result
            .as_str()
            .ok_or_else(|| GatewayError::invalid_data(ORIGIN, "balance result is not a string"))?;
        let amount = Amount::parse_raw(raw, self.ctx.chain.decimals)?;
        debug!("Got balance {} for {}", amount, address);
        Ok(Balance { amount, symbol: self.ctx.chain.symbol.clone() })
    }
}

#[async_trait]
impl HistorySource for ScanAdapter {
    async fn transaction_history(&self, query: &HistoryQuery) -> Result<Vec<Transaction>> {
        debug!("Getting transaction history for address: {}", query.address);
        let native = self.list("txlist", query).await?;
        let tokens = self.list("tokentx", query).await?;
        let mut history = aggregate_history(&native, &tokens, &query.address, &self.ctx)?;
        history.truncate(query.limit);
        debug!("Got {} transactions for {}", history.len(), query.address);
        Ok(history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::RequestCache;
    use crate::config::{ChainDescriptor, ChainFamily, ProviderKind};
    use crate::testing::MockTransport;
    use serde_json::json;

    const URL: &str = "https://api.etherscan.io/api";
    const ME: &str = "0x1111111111111111111111111111111111111111";

    fn adapter(transport: Arc<MockTransport>) -> ScanAdapter {
        let chain = Arc::new(
            ChainDescriptor::new("ethereum", "ETH", 18, ChainFamily::Evm).with_endpoint(ProviderKind::Etherscan, URL),
        );
        let endpoint = chain.endpoints[0].clone();
        ScanAdapter::new(AdapterContext::new(chain, endpoint, Arc::new(RequestCache::new(transport))))
    }

    #[test]
    fn test_unwrap_scan_result() {
        let empty = json!({"status": "0", "message": "No transactions found", "result": []});
        assert_eq!(unwrap_scan_result(&empty, "txlist").unwrap(), json!([]));

        let limited = json!({"status": "0", "message": "NOTOK", "result": "Max rate limit reached"});
        assert!(unwrap_scan_result(&limited, "txlist").unwrap_err().is_rate_limit());

        let invalid = json!({"status": "0", "message": "NOTOK", "result": "Invalid address format"});
        assert!(matches!(
            unwrap_scan_result(&invalid, "txlist"),
            Err(GatewayError::InvalidUpstreamData { .. })
        ));
    }

    #[tokio::test]
    async fn test_native_balance() {
        let transport = Arc::new(MockTransport::new());
        transport.route_json(&format!("{}?module=account&action=balance*", URL), json!({
            "status": "1", "message": "OK", "result": "1500000000000000000"
        }));
        let balance = adapter(transport).native_balance(ME).await.unwrap();
        assert_eq!(balance.amount.raw_string(), "1500000000000000000");
        assert_eq!(balance.symbol, "ETH");
    }

    #[tokio::test]
    async fn test_multiple_token_events_reduce_to_one() {
        let transport = Arc::new(MockTransport::new());
        transport.route_json(&format!("{}?module=account&action=txlist*", URL), json!({
            "status": "0", "message": "No transactions found", "result": []
        }));
        transport.route_json(&format!("{}?module=account&action=tokentx*", URL), json!({
            "status": "1", "message": "OK", "result": [
                {"hash": "0xaa", "from": "0x2222222222222222222222222222222222222222", "to": "0x3333333333333333333333333333333333333333",
                 "value": "999999", "tokenSymbol": "DAI", "tokenDecimal": "18", "contractAddress": "0xdai", "timeStamp": "100"},
                {"hash": "0xaa", "from": "0x2222222222222222222222222222222222222222", "to": ME,
                 "value": "5", "tokenSymbol": "USDC", "tokenDecimal": "6", "contractAddress": "0xusdc", "timeStamp": "100"}
            ]
        }));
        let history = adapter(transport)
            .transaction_history(&HistoryQuery::new(ME))
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].to, ME);
        assert_eq!(history[0].direction, crate::model::Direction::In);
        assert_eq!(history[0].assets[0].value(), "5");
        assert_eq!(history[0].timestamp, 100_000);
    }

    #[tokio::test]
    async fn test_zero_value_unknown_call_is_contract() {
        let transport = Arc::new(MockTransport::new());
        transport.route_json(&format!("{}?module=account&action=txlist*", URL), json!({
            "status": "1", "message": "OK", "result": [
                {"hash": "0xbb", "from": ME, "to": "0x4444444444444444444444444444444444444444", "value": "0",
                 "input": "0xdeadbeef00", "methodId": "0xdeadbeef", "timeStamp": "5", "blockNumber": "10",
                 "isError": "0", "txreceipt_status": "1", "confirmations": "3", "gasUsed": "21000", "gasPrice": "2"}
            ]
        }));
        transport.route_json(&format!("{}?module=account&action=tokentx*", URL), json!({
            "status": "0", "message": "No transactions found", "result": []
        }));
        let history = adapter(transport)
            .transaction_history(&HistoryQuery::new(ME))
            .await
            .unwrap();
        assert_eq!(history[0].action, Action::Contract);
        assert_eq!(history[0].status, TxStatus::Confirmed);
        assert_eq!(history[0].fee.as_deref(), Some("42000"));
        assert_eq!(history[0].contract.as_ref().unwrap().method_id.as_deref(), Some("0xdeadbeef"));
    }

    #[tokio::test]
    async fn test_method_id_without_input_keeps_contract_info() {
        let transport = Arc::new(MockTransport::new());
        transport.route_json(&format!("{}?module=account&action=txlist*", URL), json!({
            "status": "1", "message": "OK", "result": [
                {"hash": "0xcc", "from": ME, "to": "0xdac17f958d2ee523a2206206994597c13d831ec7", "value": "0",
                 "methodId": "0xa9059cbb", "timeStamp": "7", "blockNumber": "10", "isError": "0"}
            ]
        }));
        transport.route_json(&format!("{}?module=account&action=tokentx*", URL), json!({
            "status": "0", "message": "No transactions found", "result": []
        }));
        let history = adapter(transport)
            .transaction_history(&HistoryQuery::new(ME))
            .await
            .unwrap();
        let contract = history[0].contract.as_ref().unwrap();
        assert_eq!(contract.method_id.as_deref(), Some("0xa9059cbb"));
        assert_eq!(contract.address, "0xdac17f958d2ee523a2206206994597c13d831ec7");
        assert_eq!(history[0].action, Action::Transfer);
    }

    #[tokio::test]
    async fn test_out_of_range_timestamp_is_invalid_data() {
        let transport = Arc::new(MockTransport::new());
        transport.route_json(&format!("{}?module=account&action=txlist*", URL), json!({
            "status": "1", "message": "OK", "result": [
                {"hash": "0xdd", "from": ME, "to": ME, "value": "1", "timeStamp": "18446744073709551615"}
            ]
        }));
        transport.route_json(&format!("{}?module=account&action=tokentx*", URL), json!({
            "status": "0", "message": "No transactions found", "result": []
        }));
        let err = adapter(transport)
            .transaction_history(&HistoryQuery::new(ME))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidUpstreamData { .. }));
    }
}
