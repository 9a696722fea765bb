use anyhow::Result;
use serde_json::json;
use std::sync::Arc;

use multichain_gateway::testing::MockTransport;
use multichain_gateway::{
    Action, Asset, ChainDescriptor, ChainFamily, Direction, GatewayError, HistoryQuery, ProviderKind,
    ProviderRegistry, RequestCache,
};

const SCAN: &str = "https://api.etherscan.io/api";
const RPC: &str = "https://eth.rpc.example";
const ME: &str = "0x1111111111111111111111111111111111111111";
const USDT: &str = "0xdac17f958d2ee523a2206206994597c13d831ec7";

fn ethereum() -> ChainDescriptor {
    let mut chain = ChainDescriptor::new("ethereum", "ETH", 18, ChainFamily::Evm)
        .with_endpoint(ProviderKind::Etherscan, SCAN)
        .with_endpoint(ProviderKind::EvmRpc, RPC);
    chain.evm_chain_id = Some(1);
    chain
}

fn registry(transport: &Arc<MockTransport>, chains: Vec<ChainDescriptor>) -> ProviderRegistry {
    ProviderRegistry::new(chains, Arc::new(RequestCache::new(transport.clone())))
}

#[tokio::test]
async fn test_token_transfer_collapses_into_one_transaction() -> Result<()> {
    let transport = Arc::new(MockTransport::new());
    transport.route_json(&format!("{}?module=account&action=txlist*", SCAN), json!({
        "status": "1", "message": "OK", "result": [{
            "hash": "0xabc", "from": ME, "to": USDT, "value": "0",
            "methodId": "0xa9059cbb", "functionName": "transfer(address _to, uint256 _value)",
            "timeStamp": "1700000000", "blockNumber": "18000000", "isError": "0", "txreceipt_status": "1",
            "confirmations": "12", "gasUsed": "46000", "gasPrice": "20000000000"
        }]
    }));
    transport.route_json(&format!("{}?module=account&action=tokentx*", SCAN), json!({
        "status": "1", "message": "OK", "result": [{
            "hash": "0xabc", "from": ME, "to": "0xRecipient", "value": "30000000000",
            "tokenSymbol": "USDT", "tokenName": "Tether USD", "tokenDecimal": "6", "contractAddress": USDT,
            "timeStamp": "1700000000", "blockNumber": "18000000"
        }]
    }));

    let provider = registry(&transport, vec![ethereum()]).get("ethereum")?;
    let history = provider.transaction_history(&HistoryQuery::new(ME)).await?;

    assert_eq!(history.len(), 1);
    let tx = &history[0];
    assert_eq!(tx.to, "0xRecipient");
    assert_eq!(tx.direction, Direction::Out);
    assert_eq!(tx.action, Action::Transfer);
    match &tx.assets[0] {
        Asset::Token { value, symbol, decimals, .. } => {
            assert_eq!(value, "30000000000");
            assert_eq!(symbol, "USDT");
            assert_eq!(*decimals, 6);
        }
        other => panic!("expected token asset, got {:?}", other),
    }
    assert_eq!(serde_json::to_value(&tx.assets[0])?["assetType"], "token");
    assert_eq!(tx.contract.as_ref().and_then(|c| c.method_id.as_deref()), Some("0xa9059cbb"));
    Ok(())
}

#[tokio::test]
async fn test_balance_falls_back_to_rpc_node() -> Result<()> {
    let transport = Arc::new(MockTransport::new());
    transport.route_status(&format!("{}?module=account&action=balance*", SCAN), 502, "bad gateway");
    transport.route_rpc(RPC, "eth_getBalance", json!("0x2a"));

    let provider = registry(&transport, vec![ethereum()]).get("ethereum")?;
    let balance = provider.native_balance(ME).await?;
    assert_eq!(balance.amount.raw_string(), "42");
    assert_eq!(transport.calls_with_prefix(SCAN), 1);
    Ok(())
}

#[tokio::test]
async fn test_node_error_is_retried_once_the_node_recovers() -> Result<()> {
    let transport = Arc::new(MockTransport::new());
    transport.route_status(&format!("{}?module=account&action=balance*", SCAN), 500, "oops");
    transport.route_rpc_error(RPC, "eth_getBalance", -32000, "header not found");

    let provider = registry(&transport, vec![ethereum()]).get("ethereum")?;
    assert!(provider.native_balance(ME).await?.amount.is_zero());

    transport.route_rpc(RPC, "eth_getBalance", json!("0x2a"));
    assert_eq!(provider.native_balance(ME).await?.amount.raw_string(), "42");
    assert_eq!(transport.calls(RPC), 2);
    Ok(())
}

#[tokio::test]
async fn test_rate_limit_surfaces_when_every_provider_fails() -> Result<()> {
    let transport = Arc::new(MockTransport::new());
    transport.route_status(&format!("{}?module=account&action=balance*", SCAN), 429, "slow down");
    transport.route_status(&format!("{}*", RPC), 503, "unavailable");

    let provider = registry(&transport, vec![ethereum()]).get("ethereum")?;
    let err = provider.native_balance(ME).await.unwrap_err();
    assert!(err.is_rate_limit());
    Ok(())
}

#[tokio::test]
async fn test_zero_balance_when_every_provider_fails() -> Result<()> {
    let transport = Arc::new(MockTransport::new());
    transport.route_status(&format!("{}*", SCAN), 500, "oops");
    transport.route_status(&format!("{}*", RPC), 500, "oops");

    let provider = registry(&transport, vec![ethereum()]).get("ethereum")?;
    assert!(provider.native_balance(ME).await?.amount.is_zero());
    assert!(provider.transaction_history(&HistoryQuery::new(ME)).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_utxo_balance_from_mempool_stats() -> Result<()> {
    const API: &str = "https://mempool.space/api";
    const ADDRESS: &str = "bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq";
    let transport = Arc::new(MockTransport::new());
    transport.route_json(&format!("{}/address/{}", API, ADDRESS), json!({
        "address": ADDRESS,
        "chain_stats": {"funded_txo_sum": 100000000, "spent_txo_sum": 50000000},
        "mempool_stats": {"funded_txo_sum": 0, "spent_txo_sum": 0}
    }));

    let mut bitcoin = ChainDescriptor::new("bitcoin", "BTC", 8, ChainFamily::Bitcoin)
        .with_endpoint(ProviderKind::Mempool, API);
    bitcoin.bitcoin_network = Some("mainnet".into());
    let provider = registry(&transport, vec![bitcoin]).get("bitcoin")?;
    assert_eq!(provider.native_balance(ADDRESS).await?.amount.raw_string(), "50000000");
    Ok(())
}

#[tokio::test]
async fn test_tron_orphan_event_and_silent_call() -> Result<()> {
    const GRID: &str = "https://api.trongrid.io";
    const ADDRESS: &str = "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t";
    const SENDER: &str = "TXYZopYRdj2D9XRtbG411XZZ3kM5VkAeBf";
    let transport = Arc::new(MockTransport::new());
    transport.route_json(&format!("{}/v1/accounts/{}/transactions?limit=50", GRID, ADDRESS), json!({
        "success": true,
        "data": [{
            "txID": "silent",
            "block_timestamp": 1_000,
            "ret": [{"contractRet": "SUCCESS"}],
            "raw_data": {"contract": [{"type": "TriggerSmartContract", "parameter": {"value": {
                "owner_address": ADDRESS, "contract_address": SENDER, "call_value": 0, "data": "a9059cbb0000"
            }}}]}
        }]
    }));
    transport.route_json(&format!("{}/v1/accounts/{}/transactions/trc20?limit=50", GRID, ADDRESS), json!({
        "success": true,
        "data": [{
            "transaction_id": "orphan", "block_timestamp": 2_000, "from": SENDER, "to": ADDRESS,
            "type": "Transfer", "value": "1000000",
            "token_info": {"symbol": "USDT", "address": "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t", "decimals": 6, "name": "Tether USD"}
        }]
    }));

    let tron = ChainDescriptor::new("tron", "TRX", 6, ChainFamily::Tron).with_endpoint(ProviderKind::Tron, GRID);
    let provider = registry(&transport, vec![tron]).get("tron")?;
    let history = provider.transaction_history(&HistoryQuery::new(ADDRESS)).await?;

    assert_eq!(history.len(), 1);
    let tx = &history[0];
    assert_eq!(tx.hash, "orphan");
    assert_eq!(tx.timestamp, 2_000);
    assert_eq!(tx.from, SENDER);
    assert_eq!(tx.to, ADDRESS);
    assert_eq!(tx.action, Action::Transfer);
    assert_eq!(tx.direction, Direction::In);
    Ok(())
}

#[tokio::test]
async fn test_broadcast_rejection_is_not_retried() -> Result<()> {
    const FIRST: &str = "https://blockbook-one.example";
    const SECOND: &str = "https://blockbook-two.example";
    let transport = Arc::new(MockTransport::new());
    transport.route_status(
        &format!("{}/api/v2/sendtx/*", FIRST),
        400,
        r#"{"error": "-26: mandatory-script-verify-flag-failed"}"#,
    );
    transport.route_json(&format!("{}/api/v2/sendtx/*", SECOND), json!({"result": "ffff"}));

    let mut bitcoin = ChainDescriptor::new("bitcoin", "BTC", 8, ChainFamily::Bitcoin)
        .with_endpoint(ProviderKind::Blockbook, FIRST)
        .with_endpoint(ProviderKind::Blockbook, SECOND);
    bitcoin.bitcoin_network = Some("mainnet".into());
    let provider = registry(&transport, vec![bitcoin]).get("bitcoin")?;

    let signed = multichain_gateway::SignedTransaction { chain_id: "bitcoin".into(), raw: "0200".into(), hash: None };
    let err = provider.broadcast_transaction(&signed, None).await.unwrap_err();
    assert!(matches!(err, GatewayError::BroadcastRejected { .. }));
    assert_eq!(transport.calls_with_prefix(SECOND), 0);
    Ok(())
}
