//! Error types for the gateway
//!
//! Every fallible operation in the library returns [`GatewayError`]. The enum
//! is `Clone` because a single deduplicated fetch hands the same outcome to
//! every awaiting caller.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias used across the library
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Why a signing operation could not complete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SignatureFailureKind {
    /// No key material was supplied or the key store has none
    MissingKey,
    /// The key store rejected the password
    WrongPassword,
    /// Key parsing or the signature primitive itself failed
    Crypto,
}

/// Error taxonomy for the gateway
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// Transport failure or non-2xx response
    #[error("Network error: {message}")]
    Network {
        /// Human readable detail
        message: String,
        /// HTTP status, when the server answered
        status: Option<u16>,
    },

    /// Upstream signalled a rate limit or exhausted quota
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// A parsed payload failed schema validation
    #[error("Invalid upstream data from {origin}: {detail}")]
    InvalidUpstreamData {
        /// Adapter and method that produced the payload
        origin: String,
        /// What was wrong with it
        detail: String,
    },

    /// No bound adapter implements the requested capability
    #[error("Unsupported capability: {0}")]
    UnsupportedCapability(String),

    /// Missing key material or crypto failure
    #[error("Signature failure ({kind:?}): {message}")]
    SignatureFailure {
        /// Failure category
        kind: SignatureFailureKind,
        /// Detail
        message: String,
    },

    /// The node refused a signed transaction
    #[error("Broadcast rejected: {reason}")]
    BroadcastRejected {
        /// Decoded rejection reason
        reason: String,
        /// Upstream error code, if any
        code: Option<String>,
    },

    /// Fee/amount selection cannot be satisfied
    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance {
        /// Amount needed (raw units)
        required: String,
        /// Amount on hand (raw units)
        available: String,
    },

    /// Address failed validation for the chain family
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Chain or gateway configuration problem
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl GatewayError {
    /// Build a network error without a status code
    pub fn network(message: impl Into<String>) -> Self {
        GatewayError::Network { message: message.into(), status: None }
    }

    /// Build an invalid-upstream-data error
    pub fn invalid_data(origin: impl Into<String>, detail: impl Into<String>) -> Self {
        GatewayError::InvalidUpstreamData { origin: origin.into(), detail: detail.into() }
    }

    /// Build a signature failure of the given kind
    pub fn signature(kind: SignatureFailureKind, message: impl Into<String>) -> Self {
        GatewayError::SignatureFailure { kind, message: message.into() }
    }

    /// Build a crypto-category signature failure
    pub fn crypto(message: impl Into<String>) -> Self {
        Self::signature(SignatureFailureKind::Crypto, message)
    }

    /// Build a broadcast rejection, decoding hex-encoded reasons
    pub fn broadcast_rejected(reason: &str, code: Option<String>) -> Self {
        GatewayError::BroadcastRejected { reason: decode_upstream_reason(reason), code }
    }

    /// True when this error carries a rate-limit or quota signal
    pub fn is_rate_limit(&self) -> bool {
        match self {
            GatewayError::RateLimited(_) => true,
            GatewayError::Network { status: Some(429), .. } => true,
            GatewayError::Network { message, .. } => looks_like_rate_limit(message),
            _ => false,
        }
    }

    /// True for a wrong-password signing failure
    pub fn is_wrong_password(&self) -> bool {
        matches!(
            self,
            GatewayError::SignatureFailure { kind: SignatureFailureKind::WrongPassword, .. }
        )
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::invalid_data("json", err.to_string())
    }
}

impl From<bitcoin::secp256k1::Error> for GatewayError {
    fn from(err: bitcoin::secp256k1::Error) -> Self {
        GatewayError::crypto(err.to_string())
    }
}

/// Heuristic match on upstream rate-limit wording
pub fn looks_like_rate_limit(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("rate limit")
        || lower.contains("too many requests")
        || lower.contains("quota")
        || lower.contains("max calls per sec")
}

/// Decode an upstream rejection reason.
///
/// Nodes (Tron in particular) return reasons as hex-encoded UTF-8. This is
/// best effort: anything that is not clean hex of printable text comes back
/// unchanged.
pub fn decode_upstream_reason(raw: &str) -> String {
    let trimmed = raw.trim();
    let hex_part = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    if hex_part.is_empty() || hex_part.len() % 2 != 0 {
        return trimmed.to_string();
    }
    let bytes = match hex::decode(hex_part) {
        Ok(bytes) => bytes,
        Err(_) => return trimmed.to_string(),
    };
    match String::from_utf8(bytes) {
        Ok(text) if !text.is_empty() && text.chars().all(|c| !c.is_control() || c == '\n') => text,
        _ => trimmed.to_string(),
    }
}
