//! Mempool.space / Esplora explorer adapter
//!
//! This module provides the UTXO-chain adapter with the widest coverage:
//! balances and history from address stats and transaction lists, fee tiers
//! from the recommended-fees endpoint, coin selection over the address's
//! UTXOs, P2WPKH signing and raw-hex broadcast.

use async_trait::async_trait;
use log::{debug, info};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use super::{
    seconds_to_ms, AdapterContext, ApiProvider, BlockHeightSource, Broadcaster, FeeEstimator, HistorySource, NativeBalanceSource,
    StatusSource, TransactionBuilder, TransactionSigner, TransactionSource,
};
use crate::amount::Amount;
use crate::chain::BitcoinChain;
use crate::classify::status_from_confirmations;
use crate::error::{GatewayError, Result};
use crate::model::{
    Action, Asset, Balance, Direction, FeeEstimate, FeeOption, HistoryQuery, SignedTransaction, Transaction,
    TransactionQuery, TransactionStatusInfo, TransferIntent, TxStatus, UnsignedPayload, UnsignedTransaction,
};
use crate::transport::HttpRequest;
use crate::utxo::{calculate_fee, net_flow, plan_spend, FeeCalculationParams, SpendableUtxo};

const ORIGIN: &str = "mempool";

/// Funded/spent totals
#[derive(Debug, Deserialize, Default)]
pub struct AddressStats {
    #[serde(default)]
    pub funded_txo_sum: u64,
    #[serde(default)]
    pub spent_txo_sum: u64,
}

/// `GET /address/{addr}`
#[derive(Debug, Deserialize)]
pub struct AddressInfo {
    pub chain_stats: AddressStats,
    #[serde(default)]
    pub mempool_stats: AddressStats,
}

impl AddressInfo {
    /// confirmed(funded - spent) + unconfirmed(funded - spent), clamped at zero
    pub fn balance(&self) -> u64 {
        let funded = self.chain_stats.funded_txo_sum as i128 + self.mempool_stats.funded_txo_sum as i128;
        let spent = self.chain_stats.spent_txo_sum as i128 + self.mempool_stats.spent_txo_sum as i128;
        (funded - spent).clamp(0, u64::MAX as i128) as u64
    }
}

/// Previous output
#[derive(Debug, Deserialize)]
pub struct EsploraPrevout {
    /// Output value in satoshis
    pub value: u64,
    /// Output script pubkey address
    #[serde(default)]
    pub scriptpubkey_address: Option<String>,
}

/// Transaction input
#[derive(Debug, Deserialize)]
pub struct EsploraTxInput {
    /// Previous output, absent for coinbase
    #[serde(default)]
    pub prevout: Option<EsploraPrevout>,
}

/// Transaction output
#[derive(Debug, Deserialize)]
pub struct EsploraTxOutput {
    /// Output value in satoshis
    pub value: u64,
    /// Output script pubkey address
    #[serde(default)]
    pub scriptpubkey_address: Option<String>,
}

/// Transaction status
#[derive(Debug, Deserialize)]
pub struct EsploraTxStatus {
    /// Transaction confirmation status
    pub confirmed: bool,
    /// Block height (if confirmed)
    #[serde(default)]
    pub block_height: Option<u64>,
    /// Block time (if confirmed)
    #[serde(default)]
    pub block_time: Option<u64>,
}

/// Transaction
#[derive(Debug, Deserialize)]
pub struct EsploraTx {
    /// Transaction ID
    pub txid: String,
    /// Inputs
    pub vin: Vec<EsploraTxInput>,
    /// Outputs
    pub vout: Vec<EsploraTxOutput>,
    /// Fee in satoshis
    #[serde(default)]
    pub fee: Option<u64>,
    /// Status
    pub status: EsploraTxStatus,
}

/// UTXO
#[derive(Debug, Deserialize)]
pub struct EsploraUtxo {
    pub txid: String,
    pub vout: u32,
    pub value: u64,
    pub status: EsploraTxStatus,
}

/// `GET /v1/fees/recommended`, sat/vB
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendedFees {
    pub fastest_fee: f64,
    pub half_hour_fee: f64,
    pub hour_fee: f64,
}

fn parse<T: serde::de::DeserializeOwned>(value: Value, what: &str) -> Result<T> {
    serde_json::from_value(value).map_err(|e| GatewayError::invalid_data(ORIGIN, format!("malformed {}: {}", what, e)))
}

/// Mempool-style explorer adapter
pub struct MempoolAdapter {
    ctx: AdapterContext,
}

impl MempoolAdapter {
    pub fn new(ctx: AdapterContext) -> Self {
        Self { ctx }
    }

    pub fn into_provider(self) -> ApiProvider {
        let mut provider = ApiProvider::new(self.ctx.provider_name(), self.ctx.endpoint.kind);
        let shared = Arc::new(self);
        provider.native_balance = Some(shared.clone());
        provider.transaction_history = Some(shared.clone());
        provider.transaction = Some(shared.clone());
        provider.transaction_status = Some(shared.clone());
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

    fn bitcoin(&self) -> Result<BitcoinChain> {
        Ok(BitcoinChain::new(self.ctx.chain.network_params()?))
    }

    async fn tip_height(&self) -> Result<u64> {
        let tip = self.ctx.fetch_tip(HttpRequest::get(self.url("/blocks/tip/height"))).await?;
        tip.as_u64()
            .ok_or_else(|| GatewayError::invalid_data(ORIGIN, format!("tip height is not a number: {}", tip)))
    }

    async fn recommended_fees(&self) -> Result<RecommendedFees> {
        let fees = self.ctx.fetch_tip(HttpRequest::get(self.url("/v1/fees/recommended"))).await?;
        parse(fees, "recommended fees")
    }

    async fn fee_rate(&self, intent: &TransferIntent) -> Result<f64> {
        match &intent.fee_rate {
            Some(rate) => rate
                .parse::<f64>()
                .ok()
                .filter(|r| r.is_finite() && *r > 0.0)
                .ok_or_else(|| GatewayError::invalid_data(ORIGIN, format!("bad fee rate {:?}", rate))),
            None => Ok(self.recommended_fees().await?.half_hour_fee),
        }
    }

    fn status(&self, status: &EsploraTxStatus, tip: Option<u64>) -> (TxStatus, u64) {
        match (status.confirmed, status.block_height, tip) {
            (false, _, _) => (TxStatus::Pending, 0),
            (true, Some(block), Some(tip)) => {
                let confirmations = tip.saturating_sub(block) + 1;
                (status_from_confirmations(confirmations, self.ctx.chain.confirmations_required), confirmations)
            }
            (true, _, _) => (TxStatus::Confirmed, u64::from(self.ctx.chain.confirmations_required)),
        }
    }

    fn normalize_tx(&self, tx: &EsploraTx, address: &str, tip: Option<u64>) -> Result<Transaction> {
        let owned = |a: &Option<String>| a.as_deref().map_or(false, |a| a.eq_ignore_ascii_case(address));
        let spent: u64 = tx
            .vin
            .iter()
            .filter_map(|i| i.prevout.as_ref())
            .filter(|p| owned(&p.scriptpubkey_address))
            .fold(0u64, |total, p| total.saturating_add(p.value));
        let received = tx
            .vout
            .iter()
            .filter(|o| owned(&o.scriptpubkey_address))
            .fold(0u64, |total, o| total.saturating_add(o.value));
        let (direction, value) = net_flow(spent, received);

        let first_input = tx
            .vin
            .iter()
            .find_map(|i| i.prevout.as_ref().and_then(|p| p.scriptpubkey_address.clone()))
            .unwrap_or_default();
        let counterparty = tx
            .vout
            .iter()
            .filter_map(|o| o.scriptpubkey_address.as_deref())
            .find(|a| !a.eq_ignore_ascii_case(address))
            .unwrap_or(address)
            .to_string();
        let (from, to) = match direction {
            Direction::Out => (address.to_string(), counterparty),
            Direction::In => (first_input, address.to_string()),
            Direction::SelfTransfer => (address.to_string(), address.to_string()),
        };

        let (status, _) = self.status(&tx.status, tip);
        Ok(Transaction {
            hash: tx.txid.clone(),
            from,
            to,
            timestamp: match tx.status.block_time {
                Some(seconds) => seconds_to_ms(seconds, ORIGIN)?,
                None => crate::model::now_ms(),
            },
            status,
            block_number: tx.status.block_height,
            action: Action::Transfer,
            direction,
            assets: vec![Asset::native(value.to_string(), &self.ctx.chain.symbol, self.ctx.chain.decimals)],
            contract: None,
            fee: tx.fee.map(|f| f.to_string()),
        })
    }
}

#[async_trait]
impl NativeBalanceSource for MempoolAdapter {
    async fn native_balance(&self, address: &str) -> Result<Balance> {
        debug!("Getting balance for address: {}", address);
        let info = self
            .ctx
            .fetch_balance(HttpRequest::get(self.url(&format!("/address/{}", address))), address)
            .await?;
        let info: AddressInfo = parse(info, "address info")?;
        let amount = Amount::from_u64(info.balance(), self.ctx.chain.decimals);
        debug!("Got balance {} for {}", amount, address);
        Ok(Balance { amount, symbol: self.ctx.chain.symbol.clone() })
    }
}

#[async_trait]
impl HistorySource for MempoolAdapter {
    async fn transaction_history(&self, query: &HistoryQuery) -> Result<Vec<Transaction>> {
        debug!("Getting transaction history for address: {}", query.address);
        let url = self.url(&format!("/address/{}/txs", query.address));
        let txs: Vec<EsploraTx> = parse(self.ctx.fetch_history(HttpRequest::get(url), &query.address).await?, "txs")?;
        let tip = self.tip_height().await.ok();
        let mut history = txs
            .iter()
            .map(|tx| self.normalize_tx(tx, &query.address, tip))
            .collect::<Result<Vec<Transaction>>>()?;
        history.truncate(query.limit);
        debug!("Got {} transactions for {}", history.len(), query.address);
        Ok(history)
    }
}

#[async_trait]
impl TransactionSource for MempoolAdapter {
    async fn transaction(&self, query: &TransactionQuery) -> Result<Option<Transaction>> {
        debug!("Getting transaction: {}", query.hash);
        let tx = match self.ctx.fetch_uncached(HttpRequest::get(self.url(&format!("/tx/{}", query.hash)))).await {
            Ok(tx) => tx,
            Err(GatewayError::Network { status: Some(400), .. }) | Err(GatewayError::Network { status: Some(404), .. }) => {
                return Ok(None)
            }
            Err(e) => return Err(e),
        };
        let tx: EsploraTx = parse(tx, "transaction")?;
        let perspective = match &query.address {
            Some(address) => address.clone(),
            None => tx
                .vin
                .iter()
                .find_map(|i| i.prevout.as_ref().and_then(|p| p.scriptpubkey_address.clone()))
                .unwrap_or_default(),
        };
        let tip = self.tip_height().await.ok();
        self.normalize_tx(&tx, &perspective, tip).map(Some)
    }
}

#[async_trait]
impl StatusSource for MempoolAdapter {
    async fn transaction_status(&self, hash: &str) -> Result<Option<TransactionStatusInfo>> {
        debug!("Getting transaction status: {}", hash);
        let url = self.url(&format!("/tx/{}/status", hash));
        let status = match self.ctx.fetch_uncached(HttpRequest::get(url)).await {
            Ok(status) => status,
            Err(GatewayError::Network { status: Some(404), .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        let status: EsploraTxStatus = parse(status, "transaction status")?;
        let tip = if status.confirmed { Some(self.tip_height().await?) } else { None };
        let (state, confirmations) = self.status(&status, tip);
        Ok(Some(TransactionStatusInfo { status: state, confirmations, block_number: status.block_height }))
    }
}

#[async_trait]
impl BlockHeightSource for MempoolAdapter {
    async fn block_height(&self) -> Result<u64> {
        debug!("Getting block height from {}", self.ctx.provider_name());
        self.tip_height().await
    }
}

#[async_trait]
impl FeeEstimator for MempoolAdapter {
    async fn estimate_fee(&self, intent: &TransferIntent) -> Result<FeeEstimate> {
        let fees = self.recommended_fees().await?;
        let params = FeeCalculationParams { input_count: 1, output_count: 2 };
        let decimals = self.ctx.chain.decimals;
        let option = |rate: f64| FeeOption {
            amount: Amount::from_u64(calculate_fee(params, rate), decimals),
            rate: rate.to_string(),
        };
        debug!(
            "Got fee rates {}/{}/{} sat/vB for transfer from {}",
            fees.hour_fee, fees.half_hour_fee, fees.fastest_fee, intent.from
        );
        Ok(FeeEstimate {
            slow: option(fees.hour_fee),
            standard: option(fees.half_hour_fee.max(fees.hour_fee)),
            fast: option(fees.fastest_fee.max(fees.half_hour_fee).max(fees.hour_fee)),
        })
    }
}

#[async_trait]
impl TransactionBuilder for MempoolAdapter {
    async fn build_transaction(&self, intent: &TransferIntent) -> Result<UnsignedTransaction> {
        if intent.token_contract.is_some() {
            return Err(GatewayError::UnsupportedCapability(format!(
                "token transfers on {}",
                self.ctx.chain.id
            )));
        }
        let amount = u64::try_from(intent.amount.raw())
            .map_err(|_| GatewayError::invalid_data(ORIGIN, "amount does not fit in satoshis"))?;
        let fee_rate = self.fee_rate(intent).await?;

        let url = self.url(&format!("/address/{}/utxo", intent.from));
        let utxos: Vec<EsploraUtxo> = parse(self.ctx.fetch_uncached(HttpRequest::get(url)).await?, "utxos")?;
        let spendable: Vec<SpendableUtxo> = utxos
            .into_iter()
            .map(|u| SpendableUtxo { txid: u.txid, vout: u.vout, value: u.value, confirmed: u.status.confirmed })
            .collect();

        let plan = plan_spend(&spendable, &intent.from, &intent.to, amount, fee_rate)?;
        info!("Built spend of {} sat from {} at {} sat/vB", amount, intent.from, fee_rate);
        Ok(UnsignedTransaction {
            chain_id: self.ctx.chain.id.clone(),
            payload: UnsignedPayload::Bitcoin(plan),
        })
    }
}

#[async_trait]
impl TransactionSigner for MempoolAdapter {
    async fn sign_transaction(&self, unsigned: &UnsignedTransaction, private_key: &[u8]) -> Result<SignedTransaction> {
        let UnsignedPayload::Bitcoin(plan) = &unsigned.payload else {
            return Err(GatewayError::invalid_data(ORIGIN, "payload is not a UTXO spend plan"));
        };
        let signed = self.bitcoin()?.sign_transaction(plan, private_key)?;
        Ok(SignedTransaction {
            chain_id: unsigned.chain_id.clone(),
            raw: signed.raw,
            hash: Some(signed.txid),
        })
    }
}

#[async_trait]
impl Broadcaster for MempoolAdapter {
    async fn broadcast_transaction(&self, signed: &SignedTransaction) -> Result<String> {
        info!("Broadcasting transaction to {}", self.ctx.provider_name());
        let request = HttpRequest::post_text(self.url("/tx"), signed.raw.trim_start_matches("0x"));
        let response = self.ctx.cache.transport().send(&request).await?;
        if response.is_success() {
            return Ok(response.body.trim().to_string());
        }
        Err(GatewayError::broadcast_rejected(
            response.body.trim(),
            Some(response.status.to_string()),
        ))
    }
}
