//! Blockbook UTXO indexer adapter

use async_trait::async_trait;
use log::{debug, info};
use num_bigint::BigInt;
use serde_json::Value;
use std::sync::Arc;

use super::{
    seconds_to_ms, u64_field, AdapterContext, ApiProvider, BlockHeightSource, Broadcaster, HistorySource,
    NativeBalanceSource, TransactionSource,
};
use crate::amount::{parse_decimal_int, Amount};
use crate::classify::status_from_confirmations;
use crate::error::{GatewayError, Result};
use crate::model::{Action, Asset, Balance, Direction, HistoryQuery, SignedTransaction, Transaction, TransactionQuery};
use crate::transport::HttpRequest;
use crate::utxo::net_flow;

const ORIGIN: &str = "blockbook";

/// Blockbook v2 API adapter
pub struct BlockbookAdapter {
    ctx: AdapterContext,
}

impl BlockbookAdapter {
    pub fn new(ctx: AdapterContext) -> Self {
        Self { ctx }
    }

    pub fn into_provider(self) -> ApiProvider {
        let mut provider = ApiProvider::new(self.ctx.provider_name(), self.ctx.endpoint.kind);
        let shared = Arc::new(self);
        provider.native_balance = Some(shared.clone());
        provider.transaction_history = Some(shared.clone());
        provider.transaction = Some(shared.clone());
        provider.block_height = Some(shared.clone());
        provider.broadcast_transaction = Some(shared);
        provider
    }

    fn url(&self, path: &str) -> String {
        let mut url = format!("{}{}", self.ctx.base_url(), path);
        if let Some(key) = &self.ctx.endpoint.api_key {
            url.push(if url.contains('?') { '&' } else { '?' });
            url.push_str("apikey=");
            url.push_str(key);
        }
        url
    }

    /// Normalize one Blockbook transaction from `address`'s perspective
    fn normalize_tx(&self, tx: &Value, address: &str) -> Result<Transaction> {
        let hash = tx
            .get("txid")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::invalid_data(ORIGIN, "transaction has no txid"))?;
        let vin = side(tx, "vin")?;
        let vout = side(tx, "vout")?;

        let spent = sum_for(&vin, address)?;
        let received = sum_for(&vout, address)?;
        let (direction, value) = net_flow(spent, received);

        let first_input = vin.first().and_then(|(addrs, _)| addrs.first().cloned()).unwrap_or_default();
        let counterparty = vout
            .iter()
            .flat_map(|(addrs, _)| addrs.iter())
            .find(|a| !a.eq_ignore_ascii_case(address))
            .cloned()
            .unwrap_or_else(|| address.to_string());
        let (from, to) = match direction {
            Direction::Out => (address.to_string(), counterparty),
            Direction::In => (first_input, address.to_string()),
            Direction::SelfTransfer => (address.to_string(), address.to_string()),
        };

        let confirmations = u64_field(tx, "confirmations").unwrap_or_default();
        let block_number = u64_field(tx, "blockHeight").filter(|h| *h > 0);
        let timestamp = match u64_field(tx, "blockTime") {
            Some(seconds) => seconds_to_ms(seconds, ORIGIN)?,
            None => crate::model::now_ms(),
        };

        Ok(Transaction {
            hash: hash.to_string(),
            from,
            to,
            timestamp,
            status: status_from_confirmations(confirmations, self.ctx.chain.confirmations_required),
            block_number,
            action: Action::Transfer,
            direction,
            assets: vec![Asset::native(value.to_string(), &self.ctx.chain.symbol, self.ctx.chain.decimals)],
            contract: None,
            fee: tx.get("fees").and_then(Value::as_str).map(str::to_string),
        })
    }
}

/// `(addresses, value)` for each input or output
fn side(tx: &Value, field: &str) -> Result<Vec<(Vec<String>, u64)>> {
    let items = tx
        .get(field)
        .and_then(Value::as_array)
        .ok_or_else(|| GatewayError::invalid_data(ORIGIN, format!("transaction has no {}", field)))?;
    items
        .iter()
        .map(|item| {
            let addresses = item
                .get("addresses")
                .and_then(Value::as_array)
                .map(|a| a.iter().filter_map(Value::as_str).map(str::to_string).collect())
                .unwrap_or_default();
            let value = u64_field(item, "value")
                .ok_or_else(|| GatewayError::invalid_data(ORIGIN, format!("{} entry has no value", field)))?;
            Ok((addresses, value))
        })
        .collect()
}

fn sum_for(entries: &[(Vec<String>, u64)], address: &str) -> Result<u64> {
    entries
        .iter()
        .filter(|(addrs, _)| addrs.iter().any(|a| a.eq_ignore_ascii_case(address)))
        .try_fold(0u64, |acc, (_, value)| {
            acc.checked_add(*value)
                .ok_or_else(|| GatewayError::invalid_data(ORIGIN, "value sum overflows"))
        })
}

/// `balance + unconfirmedBalance`, clamped at zero
pub fn blockbook_balance(account: &Value, decimals: u8) -> Result<Amount> {
    let confirmed = account
        .get("balance")
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::invalid_data(ORIGIN, "address has no balance"))?;
    let confirmed = parse_decimal_int(confirmed)?;
    let unconfirmed = match account.get("unconfirmedBalance").and_then(Value::as_str) {
        Some(text) => parse_decimal_int(text)?,
        None => BigInt::default(),
    };
    Ok(Amount::from_signed_clamped(&(confirmed + unconfirmed), decimals))
}

#[async_trait]
impl NativeBalanceSource for BlockbookAdapter {
    async fn native_balance(&self, address: &str) -> Result<Balance> {
        debug!("Getting balance for address: {}", address);
        let url = self.url(&format!("/api/v2/address/{}?details=basic", address));
        let account = self.ctx.fetch_balance(HttpRequest::get(url), address).await?;
        let amount = blockbook_balance(&account, self.ctx.chain.decimals)?;
        debug!("Got balance {} for {}", amount, address);
        Ok(Balance { amount, symbol: self.ctx.chain.symbol.clone() })
    }
}

#[async_trait]
impl HistorySource for BlockbookAdapter {
    async fn transaction_history(&self, query: &HistoryQuery) -> Result<Vec<Transaction>> {
        debug!("Getting transaction history for address: {}", query.address);
        let url = self.url(&format!("/api/v2/address/{}?details=txs&pageSize={}", query.address, query.limit));
        let account = self.ctx.fetch_history(HttpRequest::get(url), &query.address).await?;
        let history = match account.get("transactions") {
            Some(Value::Array(txs)) => txs
                .iter()
                .map(|tx| self.normalize_tx(tx, &query.address))
                .collect::<Result<Vec<_>>>()?,
            // Blockbook omits the list for addresses with no activity
            None | Some(Value::Null) => Vec::new(),
            Some(other) => {
                return Err(GatewayError::invalid_data(ORIGIN, format!("transactions is not a list: {}", other)))
            }
        };
        debug!("Got {} transactions for {}", history.len(), query.address);
        Ok(history)
    }
}

#[async_trait]
impl TransactionSource for BlockbookAdapter {
    async fn transaction(&self, query: &TransactionQuery) -> Result<Option<Transaction>> {
        debug!("Getting transaction: {}", query.hash);
        let url = self.url(&format!("/api/v2/tx/{}", query.hash));
        let tx = match self.ctx.fetch_uncached(HttpRequest::get(url)).await {
            Ok(tx) => tx,
            Err(GatewayError::Network { status: Some(400), .. }) | Err(GatewayError::Network { status: Some(404), .. }) => {
                return Ok(None)
            }
            Err(e) => return Err(e),
        };
        let perspective = match &query.address {
            Some(address) => address.clone(),
            None => side(&tx, "vin")?
                .first()
                .and_then(|(addrs, _)| addrs.first().cloned())
                .unwrap_or_default(),
        };
        self.normalize_tx(&tx, &perspective).map(Some)
    }
}

#[async_trait]
impl BlockHeightSource for BlockbookAdapter {
    async fn block_height(&self) -> Result<u64> {
        debug!("Getting block height from {}", self.ctx.provider_name());
        let status = self.ctx.fetch_tip(HttpRequest::get(self.url("/api"))).await?;
        status
            .get("blockbook")
            .and_then(|b| u64_field(b, "bestHeight"))
            .or_else(|| status.get("backend").and_then(|b| u64_field(b, "blocks")))
            .ok_or_else(|| GatewayError::invalid_data(ORIGIN, "status has no bestHeight"))
    }
}

#[async_trait]
impl Broadcaster for BlockbookAdapter {
    async fn broadcast_transaction(&self, signed: &SignedTransaction) -> Result<String> {
        info!("Broadcasting transaction to {}", self.ctx.provider_name());
        let url = self.url(&format!("/api/v2/sendtx/{}", signed.raw.trim_start_matches("0x")));
        let response = self.ctx.cache.transport().send(&HttpRequest::get(url)).await?;
        let body: Value = serde_json::from_str(&response.body).unwrap_or(Value::String(response.body.clone()));

        if let Some(txid) = body.get("result").and_then(Value::as_str) {
            if response.is_success() {
                return Ok(txid.to_string());
            }
        }
        let reason = match body.get("error") {
            Some(Value::String(message)) => message.clone(),
            Some(error) => error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            None => body.as_str().map(str::to_string).unwrap_or_else(|| body.to_string()),
        };
        Err(GatewayError::broadcast_rejected(&reason, Some(response.status.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::RequestCache;
    use crate::config::{ChainDescriptor, ChainFamily, ProviderKind};
    use crate::testing::MockTransport;
    use serde_json::json;

    const URL: &str = "https://btc1.trezor.io";
    const ME: &str = "bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq";

    fn adapter(transport: Arc<MockTransport>) -> BlockbookAdapter {
        let chain = Arc::new(
            ChainDescriptor::new("bitcoin", "BTC", 8, ChainFamily::Bitcoin).with_endpoint(ProviderKind::Blockbook, URL),
        );
        let endpoint = chain.endpoints[0].clone();
        BlockbookAdapter::new(AdapterContext::new(chain, endpoint, Arc::new(RequestCache::new(transport))))
    }

    #[test]
    fn test_balance_adds_signed_unconfirmed_and_clamps() {
        let account = json!({"balance": "1000", "unconfirmedBalance": "-400"});
        assert_eq!(blockbook_balance(&account, 8).unwrap().raw_string(), "600");
        let account = json!({"balance": "100", "unconfirmedBalance": "-400"});
        assert_eq!(blockbook_balance(&account, 8).unwrap().raw_string(), "0");
    }

    #[tokio::test]
    async fn test_history_net_flow() {
        let transport = Arc::new(MockTransport::new());
        transport.route_json(&format!("{}/api/v2/address/{}?details=txs*", URL, ME), json!({
            "address": ME,
            "transactions": [
                {"txid": "aa", "confirmations": 2, "blockHeight": 800000, "blockTime": 1700000000, "fees": "500",
                 "vin": [{"addresses": [ME], "value": "10000"}],
                 "vout": [{"addresses": ["bc1qother"], "value": "6000"}, {"addresses": [ME], "value": "3500"}]},
                {"txid": "bb", "confirmations": 0, "blockHeight": -1,
                 "vin": [{"addresses": ["bc1qother"], "value": "9000"}],
                 "vout": [{"addresses": [ME], "value": "8000"}]}
            ]
        }));
        let history = adapter(transport).transaction_history(&HistoryQuery::new(ME)).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].direction, Direction::Out);
        assert_eq!(history[0].assets[0].value(), "6500");
        assert_eq!(history[0].to, "bc1qother");
        assert_eq!(history[0].timestamp, 1_700_000_000_000);
        assert_eq!(history[1].direction, Direction::In);
        assert_eq!(history[1].assets[0].value(), "8000");
        assert_eq!(history[1].from, "bc1qother");
        assert_eq!(history[1].status, crate::model::TxStatus::Pending);
    }

    #[tokio::test]
    async fn test_out_of_range_block_time_is_invalid_data() {
        let transport = Arc::new(MockTransport::new());
        transport.route_json(&format!("{}/api/v2/address/{}?details=txs*", URL, ME), json!({
            "address": ME,
            "transactions": [
                {"txid": "cc", "confirmations": 1, "blockHeight": 1, "blockTime": 18446744073709551615u64,
                 "vin": [{"addresses": [ME], "value": "10"}], "vout": []}
            ]
        }));
        let err = adapter(transport).transaction_history(&HistoryQuery::new(ME)).await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidUpstreamData { .. }));
    }

    #[tokio::test]
    async fn test_broadcast_error_surfaces_reason() {
        let transport = Arc::new(MockTransport::new());
        transport.route_status(
            &format!("{}/api/v2/sendtx/*", URL),
            400,
            r#"{"error":{"message":"-26: dust"}}"#,
        );
        let signed = SignedTransaction { chain_id: "bitcoin".into(), raw: "0200".into(), hash: None };
        match adapter(transport).broadcast_transaction(&signed).await {
            Err(GatewayError::BroadcastRejected { reason, .. }) => assert_eq!(reason, "-26: dust"),
            other => panic!("expected BroadcastRejected, got {:?}", other),
        }
    }
}
