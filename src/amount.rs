//! Scaled big-integer amounts
//!
//! Amounts are carried as raw integer units (wei, satoshi, sun...) plus the
//! number of decimal places used to display them. Nothing in the gateway ever
//! goes through floating point.

use num_bigint::{BigInt, BigUint, Sign};
use num_traits::{Num, Zero};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::error::{GatewayError, Result};

/// Non-negative amount in raw units with fixed decimals
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Amount {
    raw: BigUint,
    decimals: u8,
}

impl Amount {
    /// Zero with the given decimals
    pub fn zero(decimals: u8) -> Self {
        Self { raw: BigUint::zero(), decimals }
    }

    /// Wrap a raw integer
    pub fn from_raw(raw: BigUint, decimals: u8) -> Self {
        Self { raw, decimals }
    }

    /// Convenience for small raw values
    pub fn from_u64(raw: u64, decimals: u8) -> Self {
        Self { raw: BigUint::from(raw), decimals }
    }

    /// Parse a decimal-string raw value ("30000000000")
    pub fn parse_raw(value: &str, decimals: u8) -> Result<Self> {
        Ok(Self { raw: parse_decimal_uint(value)?, decimals })
    }

    /// Parse a `0x`-prefixed hex quantity as returned by JSON-RPC nodes
    pub fn from_hex_quantity(value: &str, decimals: u8) -> Result<Self> {
        Ok(Self { raw: parse_hex_uint(value)?, decimals })
    }

    /// Parse a human formatted value ("1.5") into raw units
    pub fn parse_formatted(value: &str, decimals: u8) -> Result<Self> {
        let value = value.trim();
        let (whole, frac) = match value.split_once('.') {
            Some((w, f)) => (w, f),
            None => (value, ""),
        };
        if frac.len() > decimals as usize {
            return Err(GatewayError::invalid_data(
                "amount",
                format!("{} has more than {} decimal places", value, decimals),
            ));
        }
        let whole = if whole.is_empty() { "0" } else { whole };
        let mut digits = String::with_capacity(whole.len() + decimals as usize);
        digits.push_str(whole);
        digits.push_str(frac);
        digits.extend(std::iter::repeat('0').take(decimals as usize - frac.len()));
        Self::parse_raw(&digits, decimals)
    }

    /// Raw integer value
    pub fn raw(&self) -> &BigUint {
        &self.raw
    }

    /// Raw integer value as a decimal string
    pub fn raw_string(&self) -> String {
        self.raw.to_str_radix(10)
    }

    /// Display decimals
    pub fn decimals(&self) -> u8 {
        self.decimals
    }

    /// True when the raw value is zero
    pub fn is_zero(&self) -> bool {
        self.raw.is_zero()
    }

    /// Human formatted value, trailing zeros trimmed ("1.5")
    pub fn to_formatted(&self) -> String {
        let digits = self.raw_string();
        let decimals = self.decimals as usize;
        if decimals == 0 {
            return digits;
        }
        let padded = if digits.len() <= decimals {
            format!("{}{}", "0".repeat(decimals - digits.len() + 1), digits)
        } else {
            digits
        };
        let (whole, frac) = padded.split_at(padded.len() - decimals);
        let frac = frac.trim_end_matches('0');
        if frac.is_empty() {
            whole.to_string()
        } else {
            format!("{}.{}", whole, frac)
        }
    }

    /// Sum of two amounts with the same decimals
    pub fn checked_add(&self, other: &Amount) -> Option<Amount> {
        if self.decimals != other.decimals {
            return None;
        }
        Some(Amount::from_raw(&self.raw + &other.raw, self.decimals))
    }

    /// Difference, `None` when it would go negative
    pub fn checked_sub(&self, other: &Amount) -> Option<Amount> {
        if self.decimals != other.decimals || other.raw > self.raw {
            return None;
        }
        Some(Amount::from_raw(&self.raw - &other.raw, self.decimals))
    }

    /// Build from a signed intermediate, clamping negatives to zero
    pub fn from_signed_clamped(value: &BigInt, decimals: u8) -> Self {
        match value.sign() {
            Sign::Minus | Sign::NoSign => Self::zero(decimals),
            Sign::Plus => Self::from_raw(value.magnitude().clone(), decimals),
        }
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_formatted())
    }
}

#[derive(Serialize, Deserialize)]
struct AmountRepr {
    raw: String,
    decimals: u8,
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        AmountRepr { raw: self.raw_string(), decimals: self.decimals }.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let repr = AmountRepr::deserialize(deserializer)?;
        Amount::parse_raw(&repr.raw, repr.decimals).map_err(serde::de::Error::custom)
    }
}

/// Parse a non-negative decimal integer string
pub fn parse_decimal_uint(value: &str) -> Result<BigUint> {
    let value = value.trim();
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(GatewayError::invalid_data("amount", format!("not a decimal integer: {:?}", value)));
    }
    BigUint::from_str_radix(value, 10)
        .map_err(|e| GatewayError::invalid_data("amount", e.to_string()))
}

/// Parse a signed decimal integer string ("-1500")
pub fn parse_decimal_int(value: &str) -> Result<BigInt> {
    let value = value.trim();
    let (negative, digits) = match value.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, value),
    };
    let magnitude = parse_decimal_uint(digits)?;
    let sign = if negative { Sign::Minus } else { Sign::Plus };
    Ok(BigInt::from_biguint(sign, magnitude))
}

/// Parse a `0x` hex quantity; `0x` alone is zero
pub fn parse_hex_uint(value: &str) -> Result<BigUint> {
    let digits = value
        .trim()
        .strip_prefix("0x")
        .ok_or_else(|| GatewayError::invalid_data("amount", format!("missing 0x prefix: {:?}", value)))?;
    if digits.is_empty() {
        return Ok(BigUint::zero());
    }
    BigUint::from_str_radix(digits, 16)
        .map_err(|e| GatewayError::invalid_data("amount", format!("{}: {:?}", e, value)))
}

/// Parse a `0x` hex quantity that must fit in a u64
pub fn parse_hex_u64(value: &str) -> Result<u64> {
    let digits = value
        .trim()
        .strip_prefix("0x")
        .ok_or_else(|| GatewayError::invalid_data("quantity", format!("missing 0x prefix: {:?}", value)))?;
    if digits.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(digits, 16)
        .map_err(|e| GatewayError::invalid_data("quantity", format!("{}: {:?}", e, value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_formatting() {
        assert_eq!(Amount::from_u64(150_000_000, 8).to_formatted(), "1.5");
        assert_eq!(Amount::from_u64(1, 8).to_formatted(), "0.00000001");
        assert_eq!(Amount::from_u64(0, 6).to_formatted(), "0");
        assert_eq!(Amount::from_u64(42, 0).to_formatted(), "42");
    }

    #[test]
    fn test_parse_formatted() {
        let amount = Amount::parse_formatted("1.5", 18).unwrap();
        assert_eq!(amount.raw_string(), "1500000000000000000");
        assert_eq!(Amount::parse_formatted(".25", 2).unwrap().raw_string(), "25");
        assert!(Amount::parse_formatted("1.123", 2).is_err());
    }

    #[test]
    fn test_rejects_negative_and_garbage() {
        assert!(Amount::parse_raw("-5", 8).is_err());
        assert!(Amount::parse_raw("1e18", 18).is_err());
        assert!(Amount::parse_raw("", 18).is_err());
    }

    #[test]
    fn test_hex_quantities() {
        let wei = Amount::from_hex_quantity("0xde0b6b3a7640000", 18).unwrap();
        assert_eq!(wei.to_formatted(), "1");
        assert!(Amount::from_hex_quantity("0x", 18).unwrap().is_zero());
        assert_eq!(parse_hex_u64("0x10").unwrap(), 16);
    }

    #[test]
    fn test_checked_arithmetic() {
        let a = Amount::from_u64(10, 8);
        let b = Amount::from_u64(4, 8);
        assert_eq!(a.checked_sub(&b).unwrap().raw_string(), "6");
        assert!(b.checked_sub(&a).is_none());
        assert!(a.checked_add(&Amount::from_u64(1, 6)).is_none());
    }

    #[test]
    fn test_signed_clamp() {
        let negative = parse_decimal_int("-1500").unwrap();
        assert!(Amount::from_signed_clamped(&negative, 8).is_zero());
        let positive = parse_decimal_int("1500").unwrap();
        assert_eq!(Amount::from_signed_clamped(&positive, 8).raw_string(), "1500");
    }

    #[test]
    fn test_serde_shape() {
        let json = serde_json::to_value(Amount::from_u64(5, 6)).unwrap();
        assert_eq!(json, serde_json::json!({"raw": "5", "decimals": 6}));
        let back: Amount = serde_json::from_value(json).unwrap();
        assert_eq!(back, Amount::from_u64(5, 6));
    }
}
