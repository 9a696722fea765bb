use anyhow::Result;
use serde_json::json;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use multichain_gateway::config::{ChainConfigSource, JsonFileConfigSource};
use multichain_gateway::testing::MockTransport;
use multichain_gateway::{Capability, GatewayConfig, ProviderRegistry, RequestCache};

const CONFIG: &str = r#"{
    "chains": [
        {
            "id": "bitcoin",
            "symbol": "BTC",
            "decimals": 8,
            "family": "bitcoin",
            "bitcoinNetwork": "mainnet",
            "endpoints": [{"kind": "mempool", "url": "https://mempool.space/api/"}],
            "cache": {"balanceTtlMs": 60000}
        },
        {
            "id": "bfmeta",
            "symbol": "BFM",
            "decimals": 8,
            "family": "bioforest",
            "addressPrefix": "b",
            "genesisEpochMs": 1600000000000,
            "endpoints": [{"kind": "bioforest", "url": "https://wallet.bfmeta.example", "path": "bfm"}]
        }
    ]
}"#;

const ADDRESS: &str = "bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq";

fn config_file() -> Result<tempfile::NamedTempFile> {
    let mut file = tempfile::NamedTempFile::new()?;
    file.write_all(CONFIG.as_bytes())?;
    Ok(file)
}

#[test]
fn test_registry_from_config_file() -> Result<()> {
    let file = config_file()?;
    let chains = JsonFileConfigSource::new(file.path()).load_chains()?;
    let registry = ProviderRegistry::new(chains, Arc::new(RequestCache::new(Arc::new(MockTransport::new()))));

    assert_eq!(registry.chain_ids(), vec!["bfmeta".to_string(), "bitcoin".to_string()]);
    let bitcoin = registry.get("bitcoin")?;
    assert!(bitcoin.supports(Capability::BuildTransaction));
    assert!(bitcoin.supports(Capability::TransactionStatus));

    let bfmeta = registry.get("bfmeta")?;
    assert!(bfmeta.supports(Capability::TokenBalances));
    assert!(!bfmeta.supports(Capability::EstimateFee));
    Ok(())
}

#[tokio::test]
async fn test_concurrent_balance_reads_share_one_call() -> Result<()> {
    let config = GatewayConfig::from_json_str(CONFIG)?;
    let transport = Arc::new(MockTransport::new().with_latency(Duration::from_millis(50)));
    transport.route_json(&format!("https://mempool.space/api/address/{}", ADDRESS), json!({
        "address": ADDRESS,
        "chain_stats": {"funded_txo_sum": 7000, "spent_txo_sum": 2000},
        "mempool_stats": {"funded_txo_sum": 0, "spent_txo_sum": 1000}
    }));
    let registry = ProviderRegistry::new(config.chains, Arc::new(RequestCache::new(transport.clone())));
    let bitcoin = registry.get("bitcoin")?;

    let (a, b, c) = tokio::join!(
        bitcoin.native_balance(ADDRESS),
        bitcoin.native_balance(ADDRESS),
        bitcoin.native_balance(ADDRESS)
    );
    assert_eq!(a?.amount.raw_string(), "4000");
    assert_eq!(b?.amount, c?.amount);
    assert_eq!(transport.total_calls(), 1);

    // inside the TTL window the cached value is served
    bitcoin.native_balance(ADDRESS).await?;
    assert_eq!(transport.total_calls(), 1);
    Ok(())
}

#[tokio::test]
async fn test_broadcast_invalidates_sender_balance() -> Result<()> {
    let config = GatewayConfig::from_json_str(CONFIG)?;
    let transport = Arc::new(MockTransport::new());
    transport.route_json(&format!("https://mempool.space/api/address/{}", ADDRESS), json!({
        "address": ADDRESS,
        "chain_stats": {"funded_txo_sum": 7000, "spent_txo_sum": 0},
        "mempool_stats": {"funded_txo_sum": 0, "spent_txo_sum": 0}
    }));
    transport.route_status("https://mempool.space/api/tx", 200, &"ab".repeat(32));
    let registry = ProviderRegistry::new(config.chains, Arc::new(RequestCache::new(transport.clone())));
    let bitcoin = registry.get("bitcoin")?;

    bitcoin.native_balance(ADDRESS).await?;
    let signed = multichain_gateway::SignedTransaction { chain_id: "bitcoin".into(), raw: "0200".into(), hash: None };
    let txid = bitcoin.broadcast_transaction(&signed, Some(ADDRESS)).await?;
    assert_eq!(txid, "ab".repeat(32));

    bitcoin.native_balance(ADDRESS).await?;
    assert_eq!(transport.calls(&format!("https://mempool.space/api/address/{}", ADDRESS)), 2);
    Ok(())
}
