//! API provider adapters
//!
//! This module handles:
//! - The capability traits an adapter may implement
//! - `ApiProvider`, the sparse set of capability handles bound to one endpoint
//! - Building adapters from a chain's endpoint descriptors
//!
//! One submodule per upstream wire format. Adapters normalize into the
//! canonical model; the aggregator validates what they return.

pub mod bioforest;
pub mod blockbook;
pub mod evm_rpc;
pub mod jsonrpc;
pub mod mempool;
pub mod scan;
pub mod tron;

use async_trait::async_trait;
use log::warn;
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::cache::{FetchOptions, RequestCache};
use crate::config::{ChainDescriptor, EndpointDescriptor, ProviderKind};
use crate::error::{GatewayError, Result};
use crate::model::{
    Balance, FeeEstimate, HistoryQuery, SignedTransaction, TokenBalance, Transaction, TransactionQuery,
    TransactionStatusInfo, TransferIntent, UnsignedTransaction,
};
use crate::transport::HttpRequest;

/// Capabilities a chain provider can serve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Capability {
    NativeBalance,
    TokenBalances,
    TransactionHistory,
    Transaction,
    TransactionStatus,
    BlockHeight,
    EstimateFee,
    BuildTransaction,
    SignTransaction,
    BroadcastTransaction,
    DeriveAddress,
    ValidateAddress,
    NormalizeAddress,
    SignMessage,
}

impl Capability {
    /// Capabilities served by adapters, in declaration order
    pub const ADAPTER: [Capability; 10] = [
        Capability::NativeBalance,
        Capability::TokenBalances,
        Capability::TransactionHistory,
        Capability::Transaction,
        Capability::TransactionStatus,
        Capability::BlockHeight,
        Capability::EstimateFee,
        Capability::BuildTransaction,
        Capability::SignTransaction,
        Capability::BroadcastTransaction,
    ];

    /// Served by the chain toolkit rather than an adapter
    pub fn is_identity(&self) -> bool {
        matches!(
            self,
            Capability::DeriveAddress
                | Capability::ValidateAddress
                | Capability::NormalizeAddress
                | Capability::SignMessage
        )
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::NativeBalance => "native_balance",
            Capability::TokenBalances => "token_balances",
            Capability::TransactionHistory => "transaction_history",
            Capability::Transaction => "transaction",
            Capability::TransactionStatus => "transaction_status",
            Capability::BlockHeight => "block_height",
            Capability::EstimateFee => "estimate_fee",
            Capability::BuildTransaction => "build_transaction",
            Capability::SignTransaction => "sign_transaction",
            Capability::BroadcastTransaction => "broadcast_transaction",
            Capability::DeriveAddress => "derive_address",
            Capability::ValidateAddress => "is_valid_address",
            Capability::NormalizeAddress => "normalize_address",
            Capability::SignMessage => "sign_message",
        };
        f.write_str(name)
    }
}

#[async_trait]
pub trait NativeBalanceSource: Send + Sync {
    async fn native_balance(&self, address: &str) -> Result<Balance>;
}

#[async_trait]
pub trait TokenBalanceSource: Send + Sync {
    /// Native entry first, then tokens
    async fn token_balances(&self, address: &str) -> Result<Vec<TokenBalance>>;
}

#[async_trait]
pub trait HistorySource: Send + Sync {
    async fn transaction_history(&self, query: &HistoryQuery) -> Result<Vec<Transaction>>;
}

#[async_trait]
pub trait TransactionSource: Send + Sync {
    /// `Ok(None)` when the upstream does not know the hash
    async fn transaction(&self, query: &TransactionQuery) -> Result<Option<Transaction>>;
}

#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn transaction_status(&self, hash: &str) -> Result<Option<TransactionStatusInfo>>;
}

#[async_trait]
pub trait BlockHeightSource: Send + Sync {
    async fn block_height(&self) -> Result<u64>;
}

#[async_trait]
pub trait FeeEstimator: Send + Sync {
    async fn estimate_fee(&self, intent: &TransferIntent) -> Result<FeeEstimate>;
}

#[async_trait]
pub trait TransactionBuilder: Send + Sync {
    async fn build_transaction(&self, intent: &TransferIntent) -> Result<UnsignedTransaction>;
}

#[async_trait]
pub trait TransactionSigner: Send + Sync {
    async fn sign_transaction(&self, unsigned: &UnsignedTransaction, private_key: &[u8]) -> Result<SignedTransaction>;
}

#[async_trait]
pub trait Broadcaster: Send + Sync {
    /// Returns the transaction hash accepted by the node
    async fn broadcast_transaction(&self, signed: &SignedTransaction) -> Result<String>;
}

/// One adapter bound to one (chain, endpoint); unset handles mean the
/// upstream cannot serve that capability.
#[derive(Clone)]
pub struct ApiProvider {
    /// Display name, `{kind}@{host}`
    pub name: String,
    /// Wire protocol
    pub kind: ProviderKind,
    pub native_balance: Option<Arc<dyn NativeBalanceSource>>,
    pub token_balances: Option<Arc<dyn TokenBalanceSource>>,
    pub transaction_history: Option<Arc<dyn HistorySource>>,
    pub transaction: Option<Arc<dyn TransactionSource>>,
    pub transaction_status: Option<Arc<dyn StatusSource>>,
    pub block_height: Option<Arc<dyn BlockHeightSource>>,
    pub estimate_fee: Option<Arc<dyn FeeEstimator>>,
    pub build_transaction: Option<Arc<dyn TransactionBuilder>>,
    pub sign_transaction: Option<Arc<dyn TransactionSigner>>,
    pub broadcast_transaction: Option<Arc<dyn Broadcaster>>,
}

impl ApiProvider {
    /// Provider with no capabilities
    pub fn new(name: impl Into<String>, kind: ProviderKind) -> Self {
        Self {
            name: name.into(),
            kind,
            native_balance: None,
            token_balances: None,
            transaction_history: None,
            transaction: None,
            transaction_status: None,
            block_height: None,
            estimate_fee: None,
            build_transaction: None,
            sign_transaction: None,
            broadcast_transaction: None,
        }
    }

    pub fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::NativeBalance => self.native_balance.is_some(),
            Capability::TokenBalances => self.token_balances.is_some(),
            Capability::TransactionHistory => self.transaction_history.is_some(),
            Capability::Transaction => self.transaction.is_some(),
            Capability::TransactionStatus => self.transaction_status.is_some(),
            Capability::BlockHeight => self.block_height.is_some(),
            Capability::EstimateFee => self.estimate_fee.is_some(),
            Capability::BuildTransaction => self.build_transaction.is_some(),
            Capability::SignTransaction => self.sign_transaction.is_some(),
            Capability::BroadcastTransaction => self.broadcast_transaction.is_some(),
            _ => false,
        }
    }

    /// Declared adapter capabilities
    pub fn capabilities(&self) -> Vec<Capability> {
        Capability::ADAPTER
            .iter()
            .copied()
            .filter(|c| self.supports(*c))
            .collect()
    }
}

impl fmt::Debug for ApiProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiProvider")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("capabilities", &self.capabilities())
            .finish()
    }
}

/// What every adapter is bound to
#[derive(Clone)]
pub struct AdapterContext {
    /// Owning chain
    pub chain: Arc<ChainDescriptor>,
    /// Endpoint served
    pub endpoint: EndpointDescriptor,
    /// Shared request cache
    pub cache: Arc<RequestCache>,
}

impl AdapterContext {
    pub fn new(chain: Arc<ChainDescriptor>, endpoint: EndpointDescriptor, cache: Arc<RequestCache>) -> Self {
        Self { chain, endpoint, cache }
    }

    /// Endpoint URL without a trailing slash
    pub fn base_url(&self) -> &str {
        self.endpoint.url.trim_end_matches('/')
    }

    /// `{kind}@{host}` used in logs and errors
    pub fn provider_name(&self) -> String {
        let host = self
            .endpoint
            .url
            .split("://")
            .nth(1)
            .unwrap_or(&self.endpoint.url)
            .split('/')
            .next()
            .unwrap_or_default();
        format!("{}@{}", kind_name(self.endpoint.kind), host)
    }

    /// Cached fetch for per-address balance data
    pub async fn fetch_balance(&self, request: HttpRequest, address: &str) -> Result<Value> {
        let options = FetchOptions::ttl(self.chain.cache.balance_ttl_ms)
            .with_tag(balance_tag(&self.chain.id, address));
        self.cache.fetch_json(request, options).await
    }

    /// Cached fetch for per-address history data
    pub async fn fetch_history(&self, request: HttpRequest, address: &str) -> Result<Value> {
        let options = FetchOptions::ttl(self.chain.cache.history_ttl_ms)
            .with_tag(history_tag(&self.chain.id, address));
        self.cache.fetch_json(request, options).await
    }

    /// Cached fetch for chain tip data
    pub async fn fetch_tip(&self, request: HttpRequest) -> Result<Value> {
        let options = FetchOptions::ttl(self.chain.cache.block_height_ttl_ms);
        self.cache.fetch_json(request, options).await
    }

    /// Deduplicated, never stored
    pub async fn fetch_uncached(&self, request: HttpRequest) -> Result<Value> {
        self.cache.fetch_json(request, FetchOptions::uncached()).await
    }
}

/// Upstream seconds to milliseconds, rejecting values that overflow
pub fn seconds_to_ms(seconds: u64, origin: &str) -> Result<u64> {
    seconds
        .checked_mul(1000)
        .ok_or_else(|| GatewayError::invalid_data(origin, format!("timestamp {} is out of range", seconds)))
}

/// Cache tag for an address's balance entries
pub fn balance_tag(chain_id: &str, address: &str) -> String {
    format!("balance:{}:{}", chain_id, address)
}

/// Cache tag for an address's history entries
pub fn history_tag(chain_id: &str, address: &str) -> String {
    format!("history:{}:{}", chain_id, address)
}

fn kind_name(kind: ProviderKind) -> &'static str {
    match kind {
        ProviderKind::Etherscan => "etherscan",
        ProviderKind::EvmRpc => "evm-rpc",
        ProviderKind::Blockbook => "blockbook",
        ProviderKind::Mempool => "mempool",
        ProviderKind::Tron => "tron",
        ProviderKind::BioForest => "bioforest",
        ProviderKind::Unknown => "unknown",
    }
}

/// Build the adapter for one endpoint; `None` for kinds this build cannot
/// talk to.
pub fn create_provider(
    chain: Arc<ChainDescriptor>,
    endpoint: &EndpointDescriptor,
    cache: Arc<RequestCache>,
) -> Option<ApiProvider> {
    let ctx = AdapterContext::new(chain, endpoint.clone(), cache);
    let provider = match endpoint.kind {
        ProviderKind::Etherscan => scan::ScanAdapter::new(ctx).into_provider(),
        ProviderKind::EvmRpc => evm_rpc::EvmRpcAdapter::new(ctx).into_provider(),
        ProviderKind::Blockbook => blockbook::BlockbookAdapter::new(ctx).into_provider(),
        ProviderKind::Mempool => mempool::MempoolAdapter::new(ctx).into_provider(),
        ProviderKind::Tron => tron::TronAdapter::new(ctx).into_provider(),
        ProviderKind::BioForest => bioforest::BioForestAdapter::new(ctx).into_provider(),
        ProviderKind::Unknown => {
            warn!("Skipping endpoint {} of unknown kind", endpoint.url);
            return None;
        }
    };
    Some(provider)
}

// JSON field helpers shared by the adapters

/// Required string field
pub(crate) fn str_field<'a>(value: &'a Value, field: &str, origin: &str) -> Result<&'a str> {
    value
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::invalid_data(origin, format!("missing string field {}", field)))
}

/// Optional string field; empty strings count as absent
pub(crate) fn opt_str<'a>(value: &'a Value, field: &str) -> Option<&'a str> {
    value
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

/// Integer field encoded as a JSON number or a decimal string
pub(crate) fn u64_field(value: &Value, field: &str) -> Option<u64> {
    match value.get(field)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Big-integer field encoded as a JSON number or a decimal string
pub(crate) fn biguint_field(value: &Value, field: &str, origin: &str) -> Result<BigUint> {
    let raw = match value.get(field) {
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) => s.trim().to_string(),
        _ => return Err(GatewayError::invalid_data(origin, format!("missing numeric field {}", field))),
    };
    raw.parse::<BigUint>()
        .map_err(|_| GatewayError::invalid_data(origin, format!("{} is not an unsigned integer: {}", field, raw)))
}

/// Pick one record out of several sharing a hash: prefer those involving
/// `address`, then the largest value.
pub(crate) fn pick_primary<'a, T>(
    records: &'a [T],
    address: &str,
    parts: impl Fn(&T) -> (&str, &str, BigUint),
) -> Option<&'a T> {
    records.iter().max_by(|a, b| {
        let (a_from, a_to, a_value) = parts(a);
        let (b_from, b_to, b_value) = parts(b);
        let a_involved = a_from.eq_ignore_ascii_case(address) || a_to.eq_ignore_ascii_case(address);
        let b_involved = b_from.eq_ignore_ascii_case(address) || b_to.eq_ignore_ascii_case(address);
        a_involved.cmp(&b_involved).then(a_value.cmp(&b_value))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChainFamily;
    use crate::testing::MockTransport;
    use serde_json::json;

    #[test]
    fn test_pick_primary_prefers_involved_then_largest() {
        let records = vec![("0xa", "0xb", 500u64), ("0xme", "0xc", 10), ("0xd", "0xME", 20)];
        let pick = pick_primary(&records, "0xme", |r| (r.0, r.1, BigUint::from(r.2))).unwrap();
        assert_eq!(pick.2, 20);

        let pick = pick_primary(&records, "0xnobody", |r| (r.0, r.1, BigUint::from(r.2))).unwrap();
        assert_eq!(pick.2, 500);
    }

    #[test]
    fn test_field_helpers() {
        let value = json!({"a": "12", "b": 7, "c": "", "d": "x"});
        assert_eq!(u64_field(&value, "a"), Some(12));
        assert_eq!(u64_field(&value, "b"), Some(7));
        assert_eq!(opt_str(&value, "c"), None);
        assert!(biguint_field(&value, "d", "test").is_err());
        assert!(str_field(&value, "missing", "test").is_err());
    }

    #[test]
    fn test_seconds_to_ms_rejects_overflow() {
        assert_eq!(seconds_to_ms(1_700_000_000, "test").unwrap(), 1_700_000_000_000);
        assert!(matches!(
            seconds_to_ms(u64::MAX, "test"),
            Err(GatewayError::InvalidUpstreamData { .. })
        ));
    }

    #[test]
    fn test_create_provider_declares_capabilities() {
        let cache = Arc::new(RequestCache::new(Arc::new(MockTransport::new())));
        let chain = Arc::new(
            ChainDescriptor::new("ethereum", "ETH", 18, ChainFamily::Evm)
                .with_endpoint(ProviderKind::Etherscan, "https://api.etherscan.io/api"),
        );
        let provider = create_provider(chain.clone(), &chain.endpoints[0], cache.clone()).unwrap();
        assert_eq!(provider.name, "etherscan@api.etherscan.io");
        assert_eq!(
            provider.capabilities(),
            vec![Capability::NativeBalance, Capability::TransactionHistory]
        );

        let unknown = EndpointDescriptor {
            kind: ProviderKind::Unknown,
            url: "https://example.org".into(),
            api_key: None,
            path: None,
        };
        assert!(create_provider(chain, &unknown, cache).is_none());
    }
}
