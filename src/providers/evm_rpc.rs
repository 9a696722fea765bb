//! EVM JSON-RPC node adapter
//!
//! This module handles:
//! - Native and ERC-20 balances (`eth_getBalance`, `eth_call balanceOf`)
//! - Single transaction lookup and status from receipts
//! - Block height, gas-price based fee tiers
//! - Building, signing and broadcasting legacy transactions

use async_trait::async_trait;
use log::{debug, info};
use num_bigint::BigUint;
use serde_json::{json, Value};
use std::sync::Arc;

use super::jsonrpc::JsonRpcClient;
use super::{
    balance_tag, seconds_to_ms, AdapterContext, ApiProvider, BlockHeightSource, Broadcaster, FeeEstimator, NativeBalanceSource,
    StatusSource, TokenBalanceSource, TransactionBuilder, TransactionSigner, TransactionSource,
};
use crate::amount::{parse_decimal_uint, parse_hex_u64, parse_hex_uint, Amount};
use crate::cache::FetchOptions;
use crate::chain::evm::{erc20_balance_of_data, erc20_transfer_data, EvmChain};
use crate::classify::{action_for_method, direction, selector_from_input, status_from_confirmations, SELECTOR_TRANSFER};
use crate::error::{GatewayError, Result};
use crate::model::{
    Action, Asset, Balance, ContractInfo, EvmTxRequest, FeeEstimate, FeeOption, SignedTransaction, TokenBalance,
    Transaction, TransactionQuery, TransactionStatusInfo, TransferIntent, TxStatus, UnsignedPayload,
    UnsignedTransaction,
};

const ORIGIN: &str = "evm-rpc";
/// Gas for a plain value transfer
pub const NATIVE_TRANSFER_GAS: u64 = 21_000;
/// Gas assumed for an ERC-20 transfer when estimating fees
pub const TOKEN_TRANSFER_GAS: u64 = 65_000;

/// EVM JSON-RPC adapter
pub struct EvmRpcAdapter {
    ctx: AdapterContext,
    rpc: JsonRpcClient,
    chain: EvmChain,
}

impl EvmRpcAdapter {
    pub fn new(ctx: AdapterContext) -> Self {
        let rpc = JsonRpcClient::new(ctx.base_url(), ctx.cache.clone());
        Self { ctx, rpc, chain: EvmChain::new() }
    }

    pub fn into_provider(self) -> ApiProvider {
        let mut provider = ApiProvider::new(self.ctx.provider_name(), self.ctx.endpoint.kind);
        let shared = Arc::new(self);
        provider.native_balance = Some(shared.clone());
        provider.token_balances = Some(shared.clone());
        provider.transaction = Some(shared.clone());
        provider.transaction_status = Some(shared.clone());
        provider.block_height = Some(shared.clone());
        provider.estimate_fee = Some(shared.clone());
        provider.build_transaction = Some(shared.clone());
        provider.sign_transaction = Some(shared.clone());
        provider.broadcast_transaction = Some(shared);
        provider
    }

    fn balance_options(&self, address: &str) -> FetchOptions {
        FetchOptions::ttl(self.ctx.chain.cache.balance_ttl_ms).with_tag(balance_tag(&self.ctx.chain.id, address))
    }

    fn evm_chain_id(&self) -> Result<u64> {
        self.ctx
            .chain
            .evm_chain_id
            .ok_or_else(|| GatewayError::Configuration(format!("EVM chain {} has no evmChainId", self.ctx.chain.id)))
    }

    async fn hex_u64(&self, method: &str, params: Value, options: FetchOptions) -> Result<u64> {
        let result = self.rpc.call(method, params, options).await?;
        let text = result
            .as_str()
            .ok_or_else(|| GatewayError::invalid_data(method, format!("expected hex quantity, got {}", result)))?;
        parse_hex_u64(text)
    }

    async fn current_height(&self) -> Result<u64> {
        self.hex_u64(
            "eth_blockNumber",
            json!([]),
            FetchOptions::ttl(self.ctx.chain.cache.block_height_ttl_ms),
        )
        .await
    }

    async fn gas_price(&self) -> Result<BigUint> {
        let result = self.rpc.call("eth_gasPrice", json!([]), FetchOptions::ttl(5_000)).await?;
        let text = result
            .as_str()
            .ok_or_else(|| GatewayError::invalid_data("eth_gasPrice", "gas price is not a hex string"))?;
        parse_hex_uint(text)
    }

    async fn receipt(&self, hash: &str) -> Result<Option<Value>> {
        let receipt = self
            .rpc
            .call("eth_getTransactionReceipt", json!([hash]), FetchOptions::uncached())
            .await?;
        Ok((!receipt.is_null()).then_some(receipt))
    }

    async fn block_timestamp(&self, block_hex: &str) -> Result<u64> {
        let block = self
            .rpc
            .call("eth_getBlockByNumber", json!([block_hex, false]), FetchOptions::ttl(3_600_000))
            .await?;
        match block.get("timestamp").and_then(Value::as_str) {
            Some(ts) => seconds_to_ms(parse_hex_u64(ts)?, "eth_getBlockByNumber"),
            None => Ok(0),
        }
    }

    fn normalize_tx(
        &self,
        tx: &Value,
        receipt: Option<&Value>,
        timestamp: u64,
        height: u64,
        address: Option<&str>,
    ) -> Result<Transaction> {
        let field = |name: &str| tx.get(name).and_then(Value::as_str);
        let hash = field("hash").ok_or_else(|| GatewayError::invalid_data(ORIGIN, "transaction has no hash"))?;
        let from = field("from").unwrap_or_default().to_string();
        let contract_to = field("to").unwrap_or_default().to_string();
        let value = parse_hex_uint(field("value").unwrap_or("0x0"))?;
        let input = field("input").unwrap_or("0x");
        let block_number = field("blockNumber").map(parse_hex_u64).transpose()?;
        let selector = selector_from_input(input);

        let status = match (receipt, block_number) {
            (Some(r), _) if r.get("status").and_then(Value::as_str) == Some("0x0") => TxStatus::Failed,
            (_, Some(block)) => {
                status_from_confirmations(height.saturating_sub(block) + 1, self.ctx.chain.confirmations_required)
            }
            (_, None) => TxStatus::Pending,
        };

        let fee = match (receipt.and_then(|r| r.get("gasUsed")).and_then(Value::as_str), field("gasPrice")) {
            (Some(gas_used), Some(gas_price)) => Some((parse_hex_uint(gas_used)? * parse_hex_uint(gas_price)?).to_string()),
            _ => None,
        };

        let mut to = contract_to.clone();
        let mut assets = vec![Asset::native(value.to_string(), &self.ctx.chain.symbol, self.ctx.chain.decimals)];
        // transfer(address,uint256) on a configured token
        if selector.as_deref() == Some(SELECTOR_TRANSFER) {
            if let (Some(token), Some((recipient, amount))) =
                (self.ctx.chain.token(&contract_to), decode_transfer_args(input))
            {
                to = recipient;
                assets.insert(
                    0,
                    Asset::Token {
                        value: amount.to_string(),
                        symbol: token.symbol.clone(),
                        decimals: token.decimals,
                        contract_address: token.contract_address.clone(),
                        name: Some(token.name.clone()),
                    },
                );
                assets.retain(|a| a.is_token() || a.value() != "0");
            }
        }

        let has_call = selector.is_some();
        let action = match action_for_method(selector.as_deref(), None) {
            Some(action) => action,
            None if has_call || value == BigUint::default() => Action::Contract,
            None => Action::Transfer,
        };
        let perspective = address.unwrap_or(&from);

        Ok(Transaction {
            hash: hash.to_string(),
            direction: direction(&from, &to, perspective),
            from,
            to,
            timestamp,
            status,
            block_number,
            action,
            assets,
            contract: has_call.then(|| ContractInfo {
                address: contract_to,
                method: None,
                method_id: selector,
            }),
            fee,
        })
    }
}

/// Recipient and amount from `transfer(address,uint256)` call data
fn decode_transfer_args(input: &str) -> Option<(String, BigUint)> {
    let digits = input.trim_start_matches("0x").get(..8 + 128)?;
    if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let recipient = format!("0x{}", &digits[8 + 24..8 + 64]);
    let amount = BigUint::parse_bytes(digits[8 + 64..].as_bytes(), 16)?;
    Some((recipient, amount))
}

fn scale(value: &BigUint, numerator: u32, denominator: u32) -> BigUint {
    value * BigUint::from(numerator) / BigUint::from(denominator)
}

#[async_trait]
impl NativeBalanceSource for EvmRpcAdapter {
    async fn native_balance(&self, address: &str) -> Result<Balance> {
        debug!("Getting balance for address: {}", address);
        let result = self
            .rpc
            .call("eth_getBalance", json!([address, "latest"]), self.balance_options(address))
            .await?;
        let text = result
            .as_str()
            .ok_or_else(|| GatewayError::invalid_data("eth_getBalance", "balance is not a hex string"))?;
        let amount = Amount::from_hex_quantity(text, self.ctx.chain.decimals)?;
        debug!("Got balance {} for {}", amount, address);
        Ok(Balance { amount, symbol: self.ctx.chain.symbol.clone() })
    }
}

#[async_trait]
impl TokenBalanceSource for EvmRpcAdapter {
    async fn token_balances(&self, address: &str) -> Result<Vec<TokenBalance>> {
        debug!("Getting token balances for address: {}", address);
        let native = self.native_balance(address).await?;
        let mut balances = vec![TokenBalance {
            amount: native.amount,
            symbol: native.symbol,
            name: self.ctx.chain.symbol.clone(),
            is_native: true,
            contract_address: None,
        }];

        for token in &self.ctx.chain.tokens {
            let call = json!({"to": token.contract_address, "data": erc20_balance_of_data(address)?});
            let result = self
                .rpc
                .call("eth_call", json!([call, "latest"]), self.balance_options(address))
                .await?;
            let text = result
                .as_str()
                .ok_or_else(|| GatewayError::invalid_data("eth_call", "balanceOf result is not hex"))?;
            balances.push(TokenBalance {
                amount: Amount::from_hex_quantity(text, token.decimals)?,
                symbol: token.symbol.clone(),
                name: token.name.clone(),
                is_native: false,
                contract_address: Some(token.contract_address.clone()),
            });
        }
        debug!("Got {} balances for {}", balances.len(), address);
        Ok(balances)
    }
}

#[async_trait]
impl TransactionSource for EvmRpcAdapter {
    async fn transaction(&self, query: &TransactionQuery) -> Result<Option<Transaction>> {
        debug!("Getting transaction: {}", query.hash);
        let tx = self
            .rpc
            .call("eth_getTransactionByHash", json!([query.hash]), FetchOptions::uncached())
            .await?;
        if tx.is_null() {
            return Ok(None);
        }
        let receipt = self.receipt(&query.hash).await?;
        let height = self.current_height().await?;
        let timestamp = match tx.get("blockNumber").and_then(Value::as_str) {
            Some(block) => self.block_timestamp(block).await?,
            None => crate::model::now_ms(),
        };
        self.normalize_tx(&tx, receipt.as_ref(), timestamp, height, query.address.as_deref())
            .map(Some)
    }
}

#[async_trait]
impl StatusSource for EvmRpcAdapter {
    async fn transaction_status(&self, hash: &str) -> Result<Option<TransactionStatusInfo>> {
        debug!("Getting transaction status: {}", hash);
        let Some(receipt) = self.receipt(hash).await? else {
            let tx = self
                .rpc
                .call("eth_getTransactionByHash", json!([hash]), FetchOptions::uncached())
                .await?;
            return Ok((!tx.is_null()).then_some(TransactionStatusInfo {
                status: TxStatus::Pending,
                confirmations: 0,
                block_number: None,
            }));
        };

        let block = receipt
            .get("blockNumber")
            .and_then(Value::as_str)
            .map(parse_hex_u64)
            .transpose()?;
        let confirmations = match block {
            Some(block) => self.current_height().await?.saturating_sub(block) + 1,
            None => 0,
        };
        let status = if receipt.get("status").and_then(Value::as_str) == Some("0x0") {
            TxStatus::Failed
        } else {
            status_from_confirmations(confirmations, self.ctx.chain.confirmations_required)
        };
        Ok(Some(TransactionStatusInfo { status, confirmations, block_number: block }))
    }
}

#[async_trait]
impl BlockHeightSource for EvmRpcAdapter {
    async fn block_height(&self) -> Result<u64> {
        debug!("Getting block height from {}", self.ctx.provider_name());
        self.current_height().await
    }
}

#[async_trait]
impl FeeEstimator for EvmRpcAdapter {
    async fn estimate_fee(&self, intent: &TransferIntent) -> Result<FeeEstimate> {
        let gas_price = match &intent.fee_rate {
            Some(rate) => parse_decimal_uint(rate)?,
            None => self.gas_price().await?,
        };
        let gas = if intent.token_contract.is_some() { TOKEN_TRANSFER_GAS } else { NATIVE_TRANSFER_GAS };
        let decimals = self.ctx.chain.decimals;
        let option = |price: BigUint| FeeOption {
            amount: Amount::from_raw(&price * BigUint::from(gas), decimals),
            rate: price.to_string(),
        };
        debug!("Estimated fee with gas price {} wei", gas_price);
        Ok(FeeEstimate {
            slow: option(scale(&gas_price, 8, 10)),
            standard: option(gas_price.clone()),
            fast: option(scale(&gas_price, 12, 10)),
        })
    }
}

#[async_trait]
impl TransactionBuilder for EvmRpcAdapter {
    async fn build_transaction(&self, intent: &TransferIntent) -> Result<UnsignedTransaction> {
        let chain_id = self.evm_chain_id()?;
        let nonce = self
            .hex_u64("eth_getTransactionCount", json!([intent.from, "pending"]), FetchOptions::uncached())
            .await?;
        let gas_price = match &intent.fee_rate {
            Some(rate) => parse_decimal_uint(rate)?,
            None => self.gas_price().await?,
        };

        let (to, value, data) = match &intent.token_contract {
            Some(contract) => (
                contract.clone(),
                "0".to_string(),
                erc20_transfer_data(&intent.to, intent.amount.raw())?,
            ),
            None => (intent.to.clone(), intent.amount.raw_string(), "0x".to_string()),
        };

        let call = json!({
            "from": intent.from,
            "to": to,
            "value": format!("0x{}", parse_decimal_uint(&value)?.to_str_radix(16)),
            "data": data,
        });
        let gas_limit = self.hex_u64("eth_estimateGas", json!([call]), FetchOptions::uncached()).await?;

        info!("Built EVM transaction from {} nonce {} gas {}", intent.from, nonce, gas_limit);
        Ok(UnsignedTransaction {
            chain_id: self.ctx.chain.id.clone(),
            payload: UnsignedPayload::Evm(EvmTxRequest {
                nonce,
                gas_price: gas_price.to_string(),
                gas_limit,
                to,
                value,
                data,
                chain_id,
            }),
        })
    }
}

#[async_trait]
impl TransactionSigner for EvmRpcAdapter {
    async fn sign_transaction(&self, unsigned: &UnsignedTransaction, private_key: &[u8]) -> Result<SignedTransaction> {
        let UnsignedPayload::Evm(request) = &unsigned.payload else {
            return Err(GatewayError::invalid_data(ORIGIN, "payload is not an EVM transaction"));
        };
        let signed = self.chain.sign_transaction(request, private_key)?;
        debug!("Signed EVM transaction {}", signed.hash);
        Ok(SignedTransaction {
            chain_id: unsigned.chain_id.clone(),
            raw: signed.raw,
            hash: Some(signed.hash),
        })
    }
}

#[async_trait]
impl Broadcaster for EvmRpcAdapter {
    async fn broadcast_transaction(&self, signed: &SignedTransaction) -> Result<String> {
        info!("Broadcasting transaction to {}", self.ctx.provider_name());
        let outcome = self
            .rpc
            .request("eth_sendRawTransaction", json!([signed.raw]), FetchOptions::uncached())
            .await?;
        match outcome {
            Ok(Value::String(hash)) => Ok(hash),
            Ok(other) => Err(GatewayError::invalid_data("eth_sendRawTransaction", format!("unexpected result {}", other))),
            Err(error) => Err(GatewayError::broadcast_rejected(&error.message, Some(error.code.to_string()))),
        }
    }
}
