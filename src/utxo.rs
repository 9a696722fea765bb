//! UTXO accounting
//!
//! This module provides the UTXO-chain helpers used by the adapters:
//! - Transaction size and fee estimation
//! - Coin selection and spend planning
//! - Net-flow value/direction for an address

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};
use crate::model::{BitcoinUnsignedTx, Direction, UtxoInput, UtxoOutput};

/// Minimum dust output value in satoshis
pub const DUST_OUTPUT_VALUE: u64 = 546;

/// Fee calculation parameters
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FeeCalculationParams {
    /// Number of P2WPKH inputs
    pub input_count: usize,
    /// Number of outputs
    pub output_count: usize,
}

/// Spendable output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpendableUtxo {
    /// Transaction ID
    pub txid: String,
    /// Output index
    pub vout: u32,
    /// Amount in satoshis
    pub value: u64,
    /// Confirmation status
    pub confirmed: bool,
}

/// Gathered UTXOs for transaction construction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatheredUtxos {
    /// List of UTXOs
    pub utxos: Vec<SpendableUtxo>,
    /// Total amount in satoshis
    pub total_amount: u64,
}

/// Estimate transaction virtual size in vbytes
pub fn estimate_tx_vsize(params: FeeCalculationParams) -> usize {
    // version + locktime + counts + segwit marker, rounded up
    let overhead = 11;
    // P2WPKH input: 41 bytes + 107 witness bytes / 4
    let input_size = 68 * params.input_count;
    // P2WPKH output
    let output_size = 31 * params.output_count;
    overhead + input_size + output_size
}

/// Fee for a transaction at `fee_rate` sat/vB, never below 1 sat/vB
pub fn calculate_fee(params: FeeCalculationParams, fee_rate: f64) -> u64 {
    let vsize = estimate_tx_vsize(params) as u64;
    let fee = (vsize as f64 * fee_rate).ceil() as u64;
    fee.max(vsize)
}

/// Find UTXOs with the specified amount
pub fn find_utxos_with_amount(utxos: &[SpendableUtxo], amount: u64, greatest_to_least: bool) -> GatheredUtxos {
    let mut sorted_utxos = utxos.to_vec();
    if greatest_to_least {
        sorted_utxos.sort_by(|a, b| b.value.cmp(&a.value));
    } else {
        sorted_utxos.sort_by(|a, b| a.value.cmp(&b.value));
    }

    let mut selected_utxos = Vec::new();
    let mut total_amount = 0u64;

    for utxo in sorted_utxos {
        total_amount = total_amount.saturating_add(utxo.value);
        selected_utxos.push(utxo);

        if total_amount >= amount {
            break;
        }
    }

    GatheredUtxos { utxos: selected_utxos, total_amount }
}

/// Select inputs and build a spend plan paying `amount` to `to`, change back
/// to `from`. Change at or below dust is folded into the fee.
pub fn plan_spend(
    utxos: &[SpendableUtxo],
    from: &str,
    to: &str,
    amount: u64,
    fee_rate: f64,
) -> Result<BitcoinUnsignedTx> {
    if amount == 0 {
        return Err(GatewayError::invalid_data("utxo", "amount must be positive"));
    }
    let available = utxos
        .iter()
        .try_fold(0u64, |total, u| total.checked_add(u.value))
        .ok_or_else(|| GatewayError::invalid_data("utxo", "UTXO values overflow u64"))?;

    // Grow the target until the selected set covers amount + its own fee
    let mut fee = calculate_fee(FeeCalculationParams { input_count: 1, output_count: 2 }, fee_rate);
    loop {
        let required = amount.saturating_add(fee);
        let gathered = find_utxos_with_amount(utxos, required, true);
        if gathered.total_amount < required {
            return Err(GatewayError::InsufficientBalance {
                required: required.to_string(),
                available: available.to_string(),
            });
        }

        let needed_fee = calculate_fee(
            FeeCalculationParams { input_count: gathered.utxos.len(), output_count: 2 },
            fee_rate,
        );
        if needed_fee > fee {
            fee = needed_fee;
            continue;
        }

        let mut outputs = vec![UtxoOutput { address: to.to_string(), value: amount }];
        let change = gathered.total_amount - amount - fee;
        let fee = if change > DUST_OUTPUT_VALUE {
            outputs.push(UtxoOutput { address: from.to_string(), value: change });
            fee
        } else {
            fee + change
        };

        debug!(
            "Planned spend of {} sat with {} inputs, fee {} sat",
            amount,
            gathered.utxos.len(),
            fee
        );
        return Ok(BitcoinUnsignedTx {
            inputs: gathered
                .utxos
                .into_iter()
                .map(|u| UtxoInput { txid: u.txid, vout: u.vout, value: u.value })
                .collect(),
            outputs,
            fee,
            fee_rate,
        });
    }
}

/// Value and direction from the address's perspective:
/// `net = received - spent`; positive is in, negative is out, zero is self.
pub fn net_flow(spent: u64, received: u64) -> (Direction, u64) {
    if received > spent {
        (Direction::In, received - spent)
    } else if received < spent {
        (Direction::Out, spent - received)
    } else {
        (Direction::SelfTransfer, 0)
    }
}
