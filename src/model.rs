//! Canonical, chain-agnostic data model
//!
//! Every adapter normalizes its upstream payloads into these types. Field
//! names serialize in camelCase so the same records can be handed to the
//! presentation layer untouched.

use serde::{Deserialize, Serialize};

use crate::amount::Amount;

/// Native balance for one address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Balance {
    /// Scaled amount
    pub amount: Amount,
    /// Asset symbol
    pub symbol: String,
}

impl Balance {
    /// Zero balance for a chain's native asset
    pub fn zero(symbol: &str, decimals: u8) -> Self {
        Self { amount: Amount::zero(decimals), symbol: symbol.to_string() }
    }
}

/// Balance entry in a token listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenBalance {
    /// Scaled amount
    pub amount: Amount,
    /// Asset symbol
    pub symbol: String,
    /// Display name
    pub name: String,
    /// True for the chain's native asset
    pub is_native: bool,
    /// Token contract, `None` for the native asset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_address: Option<String>,
}

/// One asset movement inside a transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "assetType", rename_all = "camelCase")]
pub enum Asset {
    /// The chain's own coin
    #[serde(rename_all = "camelCase")]
    Native {
        /// Raw decimal-string value
        value: String,
        /// Symbol
        symbol: String,
        /// Decimals
        decimals: u8,
    },
    /// Fungible token
    #[serde(rename_all = "camelCase")]
    Token {
        /// Raw decimal-string value
        value: String,
        /// Symbol
        symbol: String,
        /// Decimals
        decimals: u8,
        /// Token contract
        contract_address: String,
        /// Token name, when the upstream knows it
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    /// Non-fungible token
    #[serde(rename_all = "camelCase")]
    Nft {
        /// Quantity moved (1 for ERC-721)
        value: String,
        /// Collection contract
        contract_address: String,
        /// Token id
        token_id: String,
        /// Collection symbol
        #[serde(default, skip_serializing_if = "Option::is_none")]
        symbol: Option<String>,
    },
}

impl Asset {
    /// Native asset with the given raw value
    pub fn native(value: impl Into<String>, symbol: &str, decimals: u8) -> Self {
        Asset::Native { value: value.into(), symbol: symbol.to_string(), decimals }
    }

    /// Raw decimal-string value
    pub fn value(&self) -> &str {
        match self {
            Asset::Native { value, .. } | Asset::Token { value, .. } | Asset::Nft { value, .. } => value,
        }
    }

    /// True for fungible token assets
    pub fn is_token(&self) -> bool {
        matches!(self, Asset::Token { .. })
    }
}

/// Lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TxStatus {
    /// Seen, not in a block
    Pending,
    /// In a block, below the confirmation threshold
    Confirming,
    /// Final
    Confirmed,
    /// Executed and reverted, or rejected
    Failed,
}

/// Closed action taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Action {
    Transfer,
    Approve,
    Swap,
    Contract,
    Stake,
    Unstake,
    Claim,
    Mint,
    Burn,
    Freeze,
    Unfreeze,
    Vote,
    CreateAccount,
    Withdraw,
    DestroyAsset,
    IssueAsset,
    IssueEntity,
    DestroyEntity,
    Signature,
    Certificate,
    Unknown,
}

/// Direction relative to the queried address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Direction {
    In,
    Out,
    #[serde(rename = "self")]
    SelfTransfer,
}

/// Contract call metadata preserved from the native record
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractInfo {
    /// Called contract
    pub address: String,
    /// Decoded method name, e.g. `transfer(address _to, uint256 _value)`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// 4-byte selector, `0x`-prefixed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method_id: Option<String>,
}

/// Canonical transaction record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    /// Transaction hash / id
    pub hash: String,
    /// Sender
    pub from: String,
    /// Receiver (empty for contract creation)
    pub to: String,
    /// Milliseconds since the unix epoch
    pub timestamp: u64,
    /// Lifecycle status
    pub status: TxStatus,
    /// Containing block
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    /// Classified action
    pub action: Action,
    /// Direction relative to the queried address
    pub direction: Direction,
    /// Moved assets; the first one is the display-primary asset
    pub assets: Vec<Asset>,
    /// Contract call metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract: Option<ContractInfo>,
    /// Fee paid in raw native units
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee: Option<String>,
}

impl Transaction {
    /// The display-primary asset
    pub fn primary_asset(&self) -> Option<&Asset> {
        self.assets.first()
    }
}

/// Status lookup result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionStatusInfo {
    /// Current status
    pub status: TxStatus,
    /// Confirmation count, when known
    pub confirmations: u64,
    /// Containing block
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
}

/// Single transaction query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionQuery {
    /// Hash to look up
    pub hash: String,
    /// Address whose perspective sets the direction
    #[serde(default)]
    pub address: Option<String>,
}

/// History query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    /// Queried address
    pub address: String,
    /// Maximum number of records
    #[serde(default = "default_history_limit")]
    pub limit: usize,
}

fn default_history_limit() -> usize {
    50
}

impl HistoryQuery {
    /// Query with the default page size
    pub fn new(address: impl Into<String>) -> Self {
        Self { address: address.into(), limit: default_history_limit() }
    }
}

/// One fee option
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeOption {
    /// Total fee in native units
    pub amount: Amount,
    /// Rate that produced it (gas price in wei, sat/vB, ...)
    pub rate: String,
}

/// Three-tier fee estimate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeEstimate {
    pub slow: FeeOption,
    pub standard: FeeOption,
    pub fast: FeeOption,
}

/// What the caller wants to send
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferIntent {
    /// Sender
    pub from: String,
    /// Recipient
    pub to: String,
    /// Amount in the asset's raw units
    pub amount: Amount,
    /// Token contract; `None` sends the native asset
    #[serde(default)]
    pub token_contract: Option<String>,
    /// Explicit fee rate override (wei gas price, sat/vB, ...)
    #[serde(default)]
    pub fee_rate: Option<String>,
    /// Free-form memo, where the chain supports one
    #[serde(default)]
    pub memo: Option<String>,
}

/// Legacy EVM transaction request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvmTxRequest {
    pub nonce: u64,
    /// Decimal-string wei
    pub gas_price: String,
    pub gas_limit: u64,
    /// `0x`-prefixed recipient or contract
    pub to: String,
    /// Decimal-string wei
    pub value: String,
    /// `0x`-prefixed call data
    pub data: String,
    pub chain_id: u64,
}

/// Outpoint being spent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UtxoInput {
    pub txid: String,
    pub vout: u32,
    /// Satoshis
    pub value: u64,
}

/// Output being created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UtxoOutput {
    pub address: String,
    /// Satoshis
    pub value: u64,
}

/// Spend plan for a UTXO chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BitcoinUnsignedTx {
    pub inputs: Vec<UtxoInput>,
    pub outputs: Vec<UtxoOutput>,
    /// Satoshis
    pub fee: u64,
    /// sat/vB used to size the fee
    pub fee_rate: f64,
}

/// Family-specific unsigned payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", content = "body", rename_all = "camelCase")]
pub enum UnsignedPayload {
    Evm(EvmTxRequest),
    Bitcoin(BitcoinUnsignedTx),
    /// Node-built transaction JSON (`txID`, `raw_data`, `raw_data_hex`)
    Tron(serde_json::Value),
    /// Transaction body to be signed
    BioForest(serde_json::Value),
}

/// Output of build_transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsignedTransaction {
    pub chain_id: String,
    pub payload: UnsignedPayload,
}

/// Output of sign_transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedTransaction {
    pub chain_id: String,
    /// Hex for EVM/Bitcoin, JSON text for Tron/BioForest
    pub raw: String,
    /// Hash, when computable before broadcast
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

/// Address produced by derivation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedAddress {
    pub index: u32,
    pub address: String,
    /// Hex public key
    pub public_key: String,
}

/// Reply envelope expected by the host IPC bridge: `{ "data": T | null }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope<T> {
    pub data: Option<T>,
}

impl<T> ResponseEnvelope<T> {
    /// Envelope carrying a value
    pub fn some(data: T) -> Self {
        Self { data: Some(data) }
    }

    /// Envelope carrying `null`
    pub fn none() -> Self {
        Self { data: None }
    }
}

/// Current wall-clock time in milliseconds
pub fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_asset_serialization_shape() {
        let asset = Asset::Token {
            value: "30000000000".into(),
            symbol: "USDT".into(),
            decimals: 6,
            contract_address: "0xdac17f958d2ee523a2206206994597c13d831ec7".into(),
            name: None,
        };
        let json = serde_json::to_value(&asset).unwrap();
        assert_eq!(json["assetType"], "token");
        assert_eq!(json["value"], "30000000000");
        assert_eq!(json["decimals"], 6);
        assert_eq!(json["contractAddress"], "0xdac17f958d2ee523a2206206994597c13d831ec7");
    }

    #[test]
    fn test_direction_self_serializes() {
        assert_eq!(serde_json::to_value(Direction::SelfTransfer).unwrap(), json!("self"));
        assert_eq!(serde_json::to_value(Action::CreateAccount).unwrap(), json!("createAccount"));
    }

    #[test]
    fn test_envelope() {
        let some = serde_json::to_value(ResponseEnvelope::some("0xabc")).unwrap();
        assert_eq!(some, json!({"data": "0xabc"}));
        let none = serde_json::to_value(ResponseEnvelope::<String>::none()).unwrap();
        assert_eq!(none, json!({"data": null}));
    }

    #[test]
    fn test_unsigned_payload_tagging() {
        let unsigned = UnsignedTransaction {
            chain_id: "ethereum".into(),
            payload: UnsignedPayload::Evm(EvmTxRequest {
                nonce: 1,
                gas_price: "1".into(),
                gas_limit: 21000,
                to: "0x0000000000000000000000000000000000000001".into(),
                value: "0".into(),
                data: "0x".into(),
                chain_id: 1,
            }),
        };
        let json = serde_json::to_value(&unsigned).unwrap();
        assert_eq!(json["payload"]["family"], "evm");
        assert_eq!(json["payload"]["body"]["gasLimit"], 21000);
    }
}
