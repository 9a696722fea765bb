//! Canonical schema validation
//!
//! The aggregator runs every object an adapter returns through [`Validate`]
//! before it reaches the caller.

use crate::model::{
    Asset, Balance, DerivedAddress, FeeEstimate, SignedTransaction, TokenBalance, Transaction,
    TransactionStatusInfo, UnsignedPayload, UnsignedTransaction,
};

/// Largest decimals value accepted for any asset
pub const MAX_DECIMALS: u8 = 36;

/// Schema check for canonical objects
pub trait Validate {
    /// `Err` carries a description of the first violation found
    fn validate(&self) -> Result<(), String>;
}

fn is_decimal_string(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit())
}

fn check_decimals(decimals: u8) -> Result<(), String> {
    if decimals > MAX_DECIMALS {
        return Err(format!("decimals {} out of range", decimals));
    }
    Ok(())
}

impl Validate for Balance {
    fn validate(&self) -> Result<(), String> {
        if self.symbol.trim().is_empty() {
            return Err("balance symbol is empty".to_string());
        }
        check_decimals(self.amount.decimals())
    }
}

impl Validate for TokenBalance {
    fn validate(&self) -> Result<(), String> {
        if self.symbol.trim().is_empty() {
            return Err("token symbol is empty".to_string());
        }
        if !self.is_native && self.contract_address.as_deref().map_or(true, |c| c.trim().is_empty()) {
            return Err(format!("token {} has no contract address", self.symbol));
        }
        check_decimals(self.amount.decimals())
    }
}

impl Validate for Asset {
    fn validate(&self) -> Result<(), String> {
        if !is_decimal_string(self.value()) {
            return Err(format!("asset value {:?} is not a decimal integer", self.value()));
        }
        match self {
            Asset::Native { symbol, decimals, .. } => {
                if symbol.trim().is_empty() {
                    return Err("native asset symbol is empty".to_string());
                }
                check_decimals(*decimals)
            }
            Asset::Token { symbol, decimals, contract_address, .. } => {
                if symbol.trim().is_empty() {
                    return Err("token asset symbol is empty".to_string());
                }
                if contract_address.trim().is_empty() {
                    return Err("token asset contract is empty".to_string());
                }
                check_decimals(*decimals)
            }
            Asset::Nft { contract_address, token_id, .. } => {
                if contract_address.trim().is_empty() || token_id.trim().is_empty() {
                    return Err("nft asset is missing contract or token id".to_string());
                }
                Ok(())
            }
        }
    }
}

impl Validate for Transaction {
    fn validate(&self) -> Result<(), String> {
        if self.hash.trim().is_empty() {
            return Err("transaction hash is empty".to_string());
        }
        if self.from.trim().is_empty() && self.to.trim().is_empty() {
            return Err(format!("transaction {} has neither sender nor receiver", self.hash));
        }
        if self.assets.is_empty() {
            return Err(format!("transaction {} has no assets", self.hash));
        }
        for asset in &self.assets {
            asset.validate().map_err(|e| format!("transaction {}: {}", self.hash, e))?;
        }
        if let Some(fee) = &self.fee {
            if !is_decimal_string(fee) {
                return Err(format!("transaction {} fee {:?} is not a decimal integer", self.hash, fee));
            }
        }
        Ok(())
    }
}

impl Validate for TransactionStatusInfo {
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

impl Validate for FeeEstimate {
    fn validate(&self) -> Result<(), String> {
        let tiers = [&self.slow, &self.standard, &self.fast];
        for tier in tiers {
            check_decimals(tier.amount.decimals())?;
        }
        if self.slow.amount.raw() > self.standard.amount.raw()
            || self.standard.amount.raw() > self.fast.amount.raw()
        {
            return Err("fee tiers are not ordered slow <= standard <= fast".to_string());
        }
        Ok(())
    }
}

impl Validate for UnsignedTransaction {
    fn validate(&self) -> Result<(), String> {
        match &self.payload {
            UnsignedPayload::Evm(req) => {
                if !is_decimal_string(&req.value) || !is_decimal_string(&req.gas_price) {
                    return Err("evm request has non-decimal value or gas price".to_string());
                }
                if req.gas_limit == 0 {
                    return Err("evm request has zero gas limit".to_string());
                }
                Ok(())
            }
            UnsignedPayload::Bitcoin(plan) => {
                if plan.inputs.is_empty() || plan.outputs.is_empty() {
                    return Err("utxo plan has no inputs or outputs".to_string());
                }
                let total_in: u64 = plan.inputs.iter().map(|i| i.value).sum();
                let total_out: u64 = plan.outputs.iter().map(|o| o.value).sum();
                if total_in < total_out.saturating_add(plan.fee) {
                    return Err("utxo plan spends more than its inputs".to_string());
                }
                Ok(())
            }
            UnsignedPayload::Tron(tx) => {
                if tx.get("txID").and_then(|v| v.as_str()).map_or(true, str::is_empty) {
                    return Err("tron transaction has no txID".to_string());
                }
                Ok(())
            }
            UnsignedPayload::BioForest(body) => {
                if !body.is_object() {
                    return Err("bioforest body is not an object".to_string());
                }
                Ok(())
            }
        }
    }
}

impl Validate for SignedTransaction {
    fn validate(&self) -> Result<(), String> {
        if self.raw.trim().is_empty() {
            return Err("signed transaction is empty".to_string());
        }
        Ok(())
    }
}

impl Validate for DerivedAddress {
    fn validate(&self) -> Result<(), String> {
        if self.address.is_empty() {
            return Err("derived address is empty".to_string());
        }
        Ok(())
    }
}

impl Validate for u64 {
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

impl Validate for String {
    fn validate(&self) -> Result<(), String> {
        if self.trim().is_empty() {
            return Err("empty string result".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::Amount;
    use crate::model::{Action, Direction, FeeOption, TxStatus};

    fn sample_tx() -> Transaction {
        Transaction {
            hash: "0xabc".into(),
            from: "0x1".into(),
            to: "0x2".into(),
            timestamp: 1,
            status: TxStatus::Confirmed,
            block_number: Some(1),
            action: Action::Transfer,
            direction: Direction::Out,
            assets: vec![Asset::native("100", "ETH", 18)],
            contract: None,
            fee: None,
        }
    }

    #[test]
    fn test_valid_transaction() {
        assert!(sample_tx().validate().is_ok());
    }

    #[test]
    fn test_rejects_float_values() {
        let mut tx = sample_tx();
        tx.assets = vec![Asset::native("1.5", "ETH", 18)];
        assert!(tx.validate().is_err());
    }

    #[test]
    fn test_rejects_missing_assets_and_hash() {
        let mut tx = sample_tx();
        tx.assets.clear();
        assert!(tx.validate().is_err());
        let mut tx = sample_tx();
        tx.hash = " ".into();
        assert!(tx.validate().is_err());
    }

    #[test]
    fn test_fee_ordering() {
        let option = |raw| FeeOption { amount: Amount::from_u64(raw, 18), rate: "1".into() };
        let ok = FeeEstimate { slow: option(1), standard: option(2), fast: option(3) };
        assert!(ok.validate().is_ok());
        let bad = FeeEstimate { slow: option(3), standard: option(2), fast: option(1) };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_token_balance_requires_contract() {
        let balance = TokenBalance {
            amount: Amount::zero(6),
            symbol: "USDT".into(),
            name: "Tether".into(),
            is_native: false,
            contract_address: None,
        };
        assert!(balance.validate().is_err());
    }
}
