//! Tron identity and signing
//!
//! Addresses are base58check over `0x41` followed by the Ethereum-style
//! 20-byte key hash. Signatures are recoverable secp256k1 with v = recovery + 27.

use alloy_primitives::keccak256;
use bitcoin::base58;
use bitcoin::secp256k1::PublicKey;

use super::evm::{address_bytes, recover_public_key, sign_digest};
use super::hd::{account_path, derive_secret_key, public_key, secret_key_from_bytes};
use super::{ChainIdentity, MessageSigner};
use crate::config::ChainFamily;
use crate::error::{GatewayError, Result};
use crate::keys::SecretBytes;
use crate::model::DerivedAddress;

/// BIP44 coin type for Tron
pub const COIN_TYPE: u32 = 195;
/// Mainnet address version byte
pub const ADDRESS_PREFIX: u8 = 0x41;

/// Base58 address for a public key
pub fn address_from_public_key(public_key: &PublicKey) -> String {
    let mut payload = Vec::with_capacity(21);
    payload.push(ADDRESS_PREFIX);
    payload.extend_from_slice(address_bytes(public_key).as_slice());
    base58::encode_check(&payload)
}

/// Decode a base58 address to its 21-byte payload
pub fn decode_address(address: &str) -> Result<[u8; 21]> {
    let invalid = |reason: &str| GatewayError::InvalidAddress(format!("{}: {}", address, reason));
    if address.len() != 34 {
        return Err(invalid("must be 34 characters"));
    }
    let payload = base58::decode_check(address).map_err(|e| invalid(&e.to_string()))?;
    if payload.len() != 21 || payload[0] != ADDRESS_PREFIX {
        return Err(invalid("payload is not 0x41 + 20 bytes"));
    }
    let mut out = [0u8; 21];
    out.copy_from_slice(&payload);
    Ok(out)
}

/// `41…` hex form used by the node API
pub fn to_hex_address(address: &str) -> Result<String> {
    Ok(hex::encode(decode_address(address)?))
}

/// Base58 form of a `41…` hex (or `0x…` 20-byte) address
pub fn from_hex_address(hex_address: &str) -> Result<String> {
    let digits = hex_address.trim().trim_start_matches("0x");
    let bytes = hex::decode(digits)
        .map_err(|e| GatewayError::InvalidAddress(format!("{}: {}", hex_address, e)))?;
    let payload = match bytes.len() {
        21 if bytes[0] == ADDRESS_PREFIX => bytes,
        20 => {
            let mut payload = vec![ADDRESS_PREFIX];
            payload.extend_from_slice(&bytes);
            payload
        }
        _ => return Err(GatewayError::InvalidAddress(format!("{} is not a Tron hex address", hex_address))),
    };
    Ok(base58::encode_check(&payload))
}

/// Keccak of the TRON signed-message envelope
pub fn message_hash(message: &[u8]) -> [u8; 32] {
    let mut data = format!("\x19TRON Signed Message:\n{}", message.len()).into_bytes();
    data.extend_from_slice(message);
    keccak256(&data).0
}

fn signature_hex(digest: [u8; 32], private_key: &[u8]) -> Result<String> {
    let secret = secret_key_from_bytes(private_key)?;
    let (compact, recovery) = sign_digest(digest, &secret);
    let mut out = compact.to_vec();
    out.push(recovery + 27);
    Ok(hex::encode(out))
}

fn decode_signature(signature: &str) -> Result<Vec<u8>> {
    hex::decode(signature.trim().trim_start_matches("0x"))
        .map_err(|e| GatewayError::crypto(format!("Invalid signature hex: {}", e)))
}

/// Tron family primitives
#[derive(Debug, Clone, Default)]
pub struct TronChain;

impl TronChain {
    pub fn new() -> Self {
        Self
    }

    /// Sign a node-built transaction's 32-byte `txID`
    pub fn sign_txid(&self, txid: &str, private_key: &[u8]) -> Result<String> {
        let bytes = hex::decode(txid.trim_start_matches("0x"))
            .map_err(|e| GatewayError::invalid_data("tron", format!("bad txID: {}", e)))?;
        let digest: [u8; 32] = bytes
            .try_into()
            .map_err(|_| GatewayError::invalid_data("tron", "txID is not 32 bytes"))?;
        signature_hex(digest, private_key)
    }

    /// Recover the signer and compare its address
    pub fn verify_message_address(&self, message: &[u8], signature: &str, address: &str) -> Result<bool> {
        let signature = decode_signature(signature)?;
        let recovered = recover_public_key(message_hash(message), &signature)?;
        Ok(address_from_public_key(&recovered) == self.normalize_address(address)?)
    }
}

impl ChainIdentity for TronChain {
    fn family(&self) -> ChainFamily {
        ChainFamily::Tron
    }

    fn derive_private_key(&self, seed: &[u8], index: u32) -> Result<SecretBytes> {
        let secret = derive_secret_key(seed, &account_path(44, COIN_TYPE, index))?;
        Ok(SecretBytes::new(secret.secret_bytes().to_vec()))
    }

    fn derive_address(&self, seed: &[u8], index: u32) -> Result<DerivedAddress> {
        let secret = derive_secret_key(seed, &account_path(44, COIN_TYPE, index))?;
        let public = public_key(&secret);
        Ok(DerivedAddress {
            index,
            address: address_from_public_key(&public),
            public_key: hex::encode(public.serialize()),
        })
    }

    fn is_valid_address(&self, address: &str) -> bool {
        decode_address(address).is_ok()
    }

    fn normalize_address(&self, address: &str) -> Result<String> {
        let address = address.trim();
        if address.len() == 42 && address.to_lowercase().starts_with("41") {
            return from_hex_address(address);
        }
        decode_address(address)?;
        Ok(address.to_string())
    }
}

impl MessageSigner for TronChain {
    /// `0x` + r || s || v
    fn sign_message(&self, message: &[u8], private_key: &[u8]) -> Result<String> {
        Ok(format!("0x{}", signature_hex(message_hash(message), private_key)?))
    }

    fn verify_message(&self, message: &[u8], signature: &str, public_key: &str) -> Result<bool> {
        let expected = hex::decode(public_key)
            .map_err(|e| GatewayError::crypto(format!("Invalid public key hex: {}", e)))?;
        let expected = PublicKey::from_slice(&expected)?;
        let signature = decode_signature(signature)?;
        Ok(recover_public_key(message_hash(message), &signature)? == expected)
    }
}
