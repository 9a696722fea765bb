//! Gateway configuration
//!
//! Chain descriptors are supplied by an external configuration source; the
//! gateway only reads them. A JSON file source is provided for the CLI.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{GatewayError, Result};
use crate::network::NetworkParams;

/// Chain family, which selects the identity/signing primitives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainFamily {
    Evm,
    Bitcoin,
    Tron,
    BioForest,
}

/// Upstream wire protocol of an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    /// Etherscan-compatible explorer API
    Etherscan,
    /// EVM JSON-RPC node
    EvmRpc,
    /// Blockbook UTXO indexer
    Blockbook,
    /// Mempool.space / esplora explorer
    Mempool,
    /// Tron full node plus TronGrid
    Tron,
    /// BioForest custom wallet backend
    #[serde(rename = "bioforest")]
    BioForest,
    /// Anything this build does not know how to talk to
    #[serde(other)]
    Unknown,
}

/// One upstream endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointDescriptor {
    /// Wire protocol
    pub kind: ProviderKind,
    /// Base URL
    pub url: String,
    /// API key, appended the way the protocol expects
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Extra path segment (BioForest chain path, e.g. "bfm")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Token the gateway should report balances for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenDescriptor {
    pub contract_address: String,
    pub symbol: String,
    pub name: String,
    pub decimals: u8,
}

/// Per-chain cache TTLs in milliseconds; zero disables caching
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachePolicy {
    #[serde(default = "default_balance_ttl")]
    pub balance_ttl_ms: u64,
    #[serde(default = "default_history_ttl")]
    pub history_ttl_ms: u64,
    #[serde(default = "default_block_height_ttl")]
    pub block_height_ttl_ms: u64,
}

fn default_balance_ttl() -> u64 {
    10_000
}

fn default_history_ttl() -> u64 {
    30_000
}

fn default_block_height_ttl() -> u64 {
    5_000
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            balance_ttl_ms: default_balance_ttl(),
            history_ttl_ms: default_history_ttl(),
            block_height_ttl_ms: default_block_height_ttl(),
        }
    }
}

/// Immutable description of one chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainDescriptor {
    /// Gateway chain id ("ethereum", "bitcoin", "tron", "bfmeta", ...)
    pub id: String,
    /// Native symbol
    pub symbol: String,
    /// Native decimals
    pub decimals: u8,
    /// Address kind
    pub family: ChainFamily,
    /// Upstream endpoints in fallback order
    #[serde(default)]
    pub endpoints: Vec<EndpointDescriptor>,
    /// Tokens to report balances for
    #[serde(default)]
    pub tokens: Vec<TokenDescriptor>,
    /// EIP-155 chain id for EVM chains
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evm_chain_id: Option<u64>,
    /// Network preset or magic for Bitcoin-style chains
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bitcoin_network: Option<String>,
    /// Address prefix for BioForest chains
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_prefix: Option<String>,
    /// Genesis time for chains that report relative timestamps
    #[serde(default)]
    pub genesis_epoch_ms: u64,
    /// Confirmations before a transaction counts as final
    #[serde(default = "default_confirmations")]
    pub confirmations_required: u32,
    /// Cache TTLs
    #[serde(default)]
    pub cache: CachePolicy,
}

fn default_confirmations() -> u32 {
    1
}

impl ChainDescriptor {
    /// Minimal descriptor; callers fill in endpoints and extras
    pub fn new(id: &str, symbol: &str, decimals: u8, family: ChainFamily) -> Self {
        Self {
            id: id.to_string(),
            symbol: symbol.to_string(),
            decimals,
            family,
            endpoints: Vec::new(),
            tokens: Vec::new(),
            evm_chain_id: None,
            bitcoin_network: None,
            address_prefix: None,
            genesis_epoch_ms: 0,
            confirmations_required: default_confirmations(),
            cache: CachePolicy::default(),
        }
    }

    /// Builder-style endpoint append
    pub fn with_endpoint(mut self, kind: ProviderKind, url: &str) -> Self {
        self.endpoints.push(EndpointDescriptor {
            kind,
            url: url.to_string(),
            api_key: None,
            path: None,
        });
        self
    }

    /// Bitcoin network parameters, defaulting to mainnet
    pub fn network_params(&self) -> Result<NetworkParams> {
        match &self.bitcoin_network {
            Some(name) => NetworkParams::from_magic(name).map_err(GatewayError::Configuration),
            None => Ok(NetworkParams::mainnet()),
        }
    }

    /// Token descriptor by contract, case-insensitive
    pub fn token(&self, contract: &str) -> Option<&TokenDescriptor> {
        self.tokens
            .iter()
            .find(|t| t.contract_address.eq_ignore_ascii_case(contract))
    }

    /// Reject descriptors the gateway cannot serve
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(GatewayError::Configuration("chain id is empty".to_string()));
        }
        if self.symbol.trim().is_empty() {
            return Err(GatewayError::Configuration(format!("chain {} has no symbol", self.id)));
        }
        if self.family == ChainFamily::Evm && self.evm_chain_id.is_none() {
            return Err(GatewayError::Configuration(format!("EVM chain {} has no evmChainId", self.id)));
        }
        if self.family == ChainFamily::Bitcoin {
            self.network_params()?;
        }
        Ok(())
    }
}

/// HTTP transport settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportConfig {
    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Retries for transient failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay between retries in milliseconds
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
    /// Maximum concurrent outbound requests
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,
}

fn default_timeout() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    1000
}

fn default_max_concurrent() -> usize {
    10
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay(),
            max_concurrent_requests: default_max_concurrent(),
        }
    }
}

/// Top-level configuration document
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    #[serde(default)]
    pub chains: Vec<ChainDescriptor>,
    #[serde(default)]
    pub transport: TransportConfig,
}

impl GatewayConfig {
    /// Parse and validate a JSON document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: GatewayConfig = serde_json::from_str(json)
            .map_err(|e| GatewayError::Configuration(format!("Failed to parse config: {}", e)))?;
        for chain in &config.chains {
            chain.validate()?;
        }
        Ok(config)
    }

    /// Load from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::Configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&text)
    }

    /// `$CONFIG_DIR/multichain-gateway/chains.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("multichain-gateway").join("chains.json"))
    }
}

/// External configuration collaborator
pub trait ChainConfigSource: Send + Sync {
    /// Current chain list
    fn load_chains(&self) -> Result<Vec<ChainDescriptor>>;
}

/// Reads chains from a JSON config file on every call
pub struct JsonFileConfigSource {
    path: PathBuf,
}

impl JsonFileConfigSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ChainConfigSource for JsonFileConfigSource {
    fn load_chains(&self) -> Result<Vec<ChainDescriptor>> {
        Ok(GatewayConfig::load(&self.path)?.chains)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"{
        "chains": [
            {
                "id": "ethereum",
                "symbol": "ETH",
                "decimals": 18,
                "family": "evm",
                "evmChainId": 1,
                "endpoints": [
                    {"kind": "etherscan", "url": "https://api.etherscan.io/api", "apiKey": "KEY"},
                    {"kind": "evm-rpc", "url": "https://rpc.example"},
                    {"kind": "carrier-pigeon", "url": "https://coo.example"}
                ]
            },
            {
                "id": "bitcoin",
                "symbol": "BTC",
                "decimals": 8,
                "family": "bitcoin",
                "bitcoinNetwork": "mainnet",
                "cache": {"historyTtlMs": 0}
            }
        ]
    }"#;

    #[test]
    fn test_parse_config() {
        let config = GatewayConfig::from_json_str(SAMPLE).unwrap();
        assert_eq!(config.chains.len(), 2);
        let eth = &config.chains[0];
        assert_eq!(eth.endpoints[0].api_key.as_deref(), Some("KEY"));
        assert_eq!(eth.endpoints[1].kind, ProviderKind::EvmRpc);
        assert_eq!(eth.endpoints[2].kind, ProviderKind::Unknown);
        let btc = &config.chains[1];
        assert_eq!(btc.cache.history_ttl_ms, 0);
        assert_eq!(btc.cache.balance_ttl_ms, 10_000);
        assert_eq!(config.transport, TransportConfig::default());
    }

    #[test]
    fn test_evm_requires_chain_id() {
        let json = r#"{"chains": [{"id": "x", "symbol": "X", "decimals": 18, "family": "evm"}]}"#;
        assert!(matches!(GatewayConfig::from_json_str(json), Err(GatewayError::Configuration(_))));
    }

    #[test]
    fn test_file_source() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let source = JsonFileConfigSource::new(file.path());
        let chains = source.load_chains().unwrap();
        assert_eq!(chains[1].id, "bitcoin");
    }
}
