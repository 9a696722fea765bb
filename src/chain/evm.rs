//! EVM identity and signing
//!
//! This module handles:
//! - BIP44 `m/44'/60'/0'/0/{index}` derivation
//! - EIP-55 checksum validation and normalization
//! - EIP-191 personal message signing
//! - Legacy EIP-155 transaction signing over RLP
//! - ERC-20 call data

use alloy_primitives::{keccak256, Address, Bytes, U256};
use alloy_rlp::{Decodable, Encodable, Header, PayloadView};
use bitcoin::secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use bitcoin::secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use num_bigint::BigUint;

use super::hd::{account_path, derive_secret_key, public_key, secret_key_from_bytes};
use super::{ChainIdentity, MessageSigner};
use crate::amount::parse_decimal_uint;
use crate::config::ChainFamily;
use crate::error::{GatewayError, Result};
use crate::keys::SecretBytes;
use crate::model::{DerivedAddress, EvmTxRequest};

/// BIP44 coin type for Ethereum
pub const COIN_TYPE: u32 = 60;

/// Address of an uncompressed key without its 0x04 tag
pub fn address_bytes(public_key: &PublicKey) -> Address {
    Address::from_raw_public_key(&public_key.serialize_uncompressed()[1..])
}

/// EIP-55 mixed-case encoding
pub fn to_checksum_address(address: &Address) -> String {
    address.to_checksum(None)
}

/// Parse `0x` + 40 hex, enforcing the checksum on mixed-case input
pub fn parse_address(address: &str) -> Result<Address> {
    let digits = address
        .strip_prefix("0x")
        .ok_or_else(|| GatewayError::InvalidAddress(format!("{} is missing the 0x prefix", address)))?;
    if digits.len() != 40 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(GatewayError::InvalidAddress(format!("{} is not 20 hex bytes", address)));
    }

    let has_lower = digits.bytes().any(|b| b.is_ascii_lowercase());
    let has_upper = digits.bytes().any(|b| b.is_ascii_uppercase());
    if has_lower && has_upper {
        return Address::parse_checksummed(address, None)
            .map_err(|_| GatewayError::InvalidAddress(format!("{} fails the EIP-55 checksum", address)));
    }
    address
        .parse::<Address>()
        .map_err(|e| GatewayError::InvalidAddress(format!("{}: {}", address, e)))
}

fn to_u256(value: &BigUint, field: &str) -> Result<U256> {
    U256::try_from_be_slice(&value.to_bytes_be())
        .ok_or_else(|| GatewayError::invalid_data("evm", format!("{} exceeds uint256", field)))
}

fn rlp_error(e: alloy_rlp::Error) -> GatewayError {
    GatewayError::invalid_data("rlp", e.to_string())
}

/// Legacy transaction fields before the signature triple
struct LegacyFields {
    nonce: u64,
    gas_price: U256,
    gas_limit: u64,
    /// Empty for contract creation
    to: Bytes,
    value: U256,
    data: Bytes,
}

impl LegacyFields {
    fn encode_with(&self, tail: &[&dyn Encodable]) -> Vec<u8> {
        let fields: [&dyn Encodable; 6] =
            [&self.nonce, &self.gas_price, &self.gas_limit, &self.to, &self.value, &self.data];
        let payload_length: usize = fields.iter().chain(tail.iter()).map(|f| f.length()).sum();

        let mut out = Vec::with_capacity(payload_length + 4);
        Header { list: true, payload_length }.encode(&mut out);
        for field in fields.iter().chain(tail.iter()) {
            field.encode(&mut out);
        }
        out
    }
}

/// Decoded view of a signed legacy transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTransactionView {
    pub nonce: u64,
    pub gas_limit: u64,
    pub to: Option<Address>,
    pub value: U256,
    pub v: u64,
    /// EIP-155 chain id recovered from `v`
    pub chain_id: Option<u64>,
}

/// Decode a signed legacy transaction
pub fn decode_legacy_transaction(raw: &[u8]) -> Result<LegacyTransactionView> {
    let mut buf = raw;
    let items = match Header::decode_raw(&mut buf).map_err(rlp_error)? {
        PayloadView::List(items) => items,
        PayloadView::String(_) => return Err(GatewayError::invalid_data("rlp", "expected a list")),
    };
    if items.len() != 9 {
        return Err(GatewayError::invalid_data("rlp", format!("legacy tx expected 9 items, got {}", items.len())));
    }

    let u64_at = |i: usize| u64::decode(&mut &items[i][..]).map_err(rlp_error);
    let to = Header::decode_bytes(&mut &items[3][..], false).map_err(rlp_error)?;
    let to = match to.len() {
        0 => None,
        20 => Some(Address::from_slice(to)),
        n => return Err(GatewayError::invalid_data("rlp", format!("recipient is {} bytes", n))),
    };
    let v = u64_at(6)?;
    Ok(LegacyTransactionView {
        nonce: u64_at(0)?,
        gas_limit: u64_at(2)?,
        to,
        value: U256::decode(&mut &items[4][..]).map_err(rlp_error)?,
        v,
        chain_id: (v >= 35).then(|| (v - 35) / 2),
    })
}

/// EIP-191 hash of a personal message
pub fn personal_message_hash(message: &[u8]) -> [u8; 32] {
    let mut data = format!("\x19Ethereum Signed Message:\n{}", message.len()).into_bytes();
    data.extend_from_slice(message);
    keccak256(&data).0
}

/// Recoverable signature over a 32-byte digest: (r||s, recovery id)
pub fn sign_digest(digest: [u8; 32], secret: &SecretKey) -> ([u8; 64], u8) {
    let secp = Secp256k1::new();
    let message = Message::from_digest(digest);
    let (recovery_id, compact) = secp
        .sign_ecdsa_recoverable(&message, secret)
        .serialize_compact();
    (compact, recovery_id.to_i32() as u8)
}

/// Recover the signer's public key from r||s||v (v in {0,1,27,28})
pub fn recover_public_key(digest: [u8; 32], signature: &[u8]) -> Result<PublicKey> {
    if signature.len() != 65 {
        return Err(GatewayError::crypto(format!("signature must be 65 bytes, got {}", signature.len())));
    }
    let v = signature[64];
    let recovery = if v >= 27 { v - 27 } else { v };
    let recovery_id = RecoveryId::from_i32(i32::from(recovery))?;
    let recoverable = RecoverableSignature::from_compact(&signature[..64], recovery_id)?;
    let secp = Secp256k1::new();
    Ok(secp.recover_ecdsa(&Message::from_digest(digest), &recoverable)?)
}

fn parse_public_key(public_key: &str) -> Result<PublicKey> {
    let bytes = hex::decode(public_key.trim_start_matches("0x"))
        .map_err(|e| GatewayError::crypto(format!("Invalid public key hex: {}", e)))?;
    Ok(PublicKey::from_slice(&bytes)?)
}

fn decode_hex_data(data: &str) -> Result<Vec<u8>> {
    hex::decode(data.trim_start_matches("0x"))
        .map_err(|e| GatewayError::invalid_data("evm", format!("invalid hex data: {}", e)))
}

/// Output of transaction signing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedEvmTransaction {
    /// `0x`-prefixed RLP
    pub raw: String,
    /// `0x`-prefixed Keccak of the signed encoding
    pub hash: String,
}

/// ERC-20 `transfer(address,uint256)` call data
pub fn erc20_transfer_data(to: &str, amount: &BigUint) -> Result<String> {
    let to = parse_address(to)?;
    let amount_bytes = amount.to_bytes_be();
    if amount_bytes.len() > 32 {
        return Err(GatewayError::invalid_data("erc20", "amount exceeds uint256"));
    }
    let mut data = vec![0xa9, 0x05, 0x9c, 0xbb];
    data.extend_from_slice(&[0u8; 12]);
    data.extend_from_slice(to.as_slice());
    data.extend(std::iter::repeat(0u8).take(32 - amount_bytes.len()));
    data.extend_from_slice(&amount_bytes);
    Ok(format!("0x{}", hex::encode(data)))
}

/// ERC-20 `balanceOf(address)` call data
pub fn erc20_balance_of_data(owner: &str) -> Result<String> {
    let owner = parse_address(owner)?;
    Ok(format!("0x70a08231{}{}", "0".repeat(24), hex::encode(owner.as_slice())))
}

/// EVM family primitives
#[derive(Debug, Clone, Default)]
pub struct EvmChain;

impl EvmChain {
    pub fn new() -> Self {
        Self
    }

    /// Checksummed address for a secret key
    pub fn address_for_key(&self, secret: &SecretKey) -> String {
        to_checksum_address(&address_bytes(&public_key(secret)))
    }

    /// Sign a legacy transaction with EIP-155 replay protection
    pub fn sign_transaction(&self, request: &EvmTxRequest, private_key: &[u8]) -> Result<SignedEvmTransaction> {
        let secret = secret_key_from_bytes(private_key)?;
        let to = if request.to.is_empty() {
            Bytes::new()
        } else {
            Bytes::copy_from_slice(parse_address(&request.to)?.as_slice())
        };
        let fields = LegacyFields {
            nonce: request.nonce,
            gas_price: to_u256(&parse_decimal_uint(&request.gas_price)?, "gas price")?,
            gas_limit: request.gas_limit,
            to,
            value: to_u256(&parse_decimal_uint(&request.value)?, "value")?,
            data: Bytes::from(decode_hex_data(&request.data)?),
        };

        let empty = Bytes::new();
        let digest = keccak256(fields.encode_with(&[&request.chain_id, &empty, &empty])).0;

        let (compact, recovery) = sign_digest(digest, &secret);
        let v = request
            .chain_id
            .checked_mul(2)
            .and_then(|x| x.checked_add(35 + u64::from(recovery)))
            .ok_or_else(|| GatewayError::crypto("chain id too large for EIP-155"))?;

        let r = U256::from_be_slice(&compact[..32]);
        let s = U256::from_be_slice(&compact[32..]);
        let encoded = fields.encode_with(&[&v, &r, &s]);

        Ok(SignedEvmTransaction {
            hash: format!("0x{}", hex::encode(keccak256(&encoded))),
            raw: format!("0x{}", hex::encode(encoded)),
        })
    }

    /// Verify a personal-message signature against an address
    pub fn verify_message_address(&self, message: &[u8], signature: &str, address: &str) -> Result<bool> {
        let expected = parse_address(address)?;
        let signature = decode_hex_data(signature)?;
        let recovered = recover_public_key(personal_message_hash(message), &signature)?;
        Ok(address_bytes(&recovered) == expected)
    }
}

impl ChainIdentity for EvmChain {
    fn family(&self) -> ChainFamily {
        ChainFamily::Evm
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
            address: to_checksum_address(&address_bytes(&public)),
            public_key: hex::encode(public.serialize()),
        })
    }

    fn is_valid_address(&self, address: &str) -> bool {
        parse_address(address).is_ok()
    }

    fn normalize_address(&self, address: &str) -> Result<String> {
        Ok(to_checksum_address(&parse_address(address.trim())?))
    }
}

impl MessageSigner for EvmChain {
    /// `0x` + r || s || v with v = recovery + 27
    fn sign_message(&self, message: &[u8], private_key: &[u8]) -> Result<String> {
        let secret = secret_key_from_bytes(private_key)?;
        let (compact, recovery) = sign_digest(personal_message_hash(message), &secret);
        let mut out = compact.to_vec();
        out.push(recovery + 27);
        Ok(format!("0x{}", hex::encode(out)))
    }

    fn verify_message(&self, message: &[u8], signature: &str, public_key: &str) -> Result<bool> {
        let expected = parse_public_key(public_key)?;
        let signature = decode_hex_data(signature)?;
        let recovered = recover_public_key(personal_message_hash(message), &signature)?;
        Ok(recovered == expected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::seed_from_mnemonic;

    const MNEMONIC: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    #[test]
    fn test_derive_known_address() {
        let seed = seed_from_mnemonic(MNEMONIC, "").unwrap();
        let derived = EvmChain::new().derive_address(seed.as_bytes(), 0).unwrap();
        assert_eq!(derived.address, "0x9858EfFD232B4033E47d90003D41EC34EcaEda94");
    }

    #[test]
    fn test_checksum_rules() {
        let chain = EvmChain::new();
        let good = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";
        assert!(chain.is_valid_address(good));
        assert!(chain.is_valid_address(&good.to_lowercase()));
        assert!(chain.is_valid_address(&format!("0x{}", good[2..].to_uppercase())));
        assert!(!chain.is_valid_address("0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAeD"));
        assert!(!chain.is_valid_address("0x1234"));
        assert_eq!(chain.normalize_address(&good.to_lowercase()).unwrap(), good);
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let chain = EvmChain::new();
        let once = chain.normalize_address("0xfb6916095ca1df60bb79ce92ce3ea74c37c5d359").unwrap();
        assert_eq!(chain.normalize_address(&once).unwrap(), once);
    }

    #[test]
    fn test_message_signature_roundtrip() {
        let chain = EvmChain::new();
        let seed = seed_from_mnemonic(MNEMONIC, "").unwrap();
        let key = chain.derive_private_key(seed.as_bytes(), 0).unwrap();
        let derived = chain.derive_address(seed.as_bytes(), 0).unwrap();

        let signature = chain.sign_message(b"hello", key.as_bytes()).unwrap();
        assert_eq!(signature.len(), 2 + 130);
        let v = u8::from_str_radix(&signature[130..], 16).unwrap();
        assert!(v == 27 || v == 28);
        assert!(chain.verify_message(b"hello", &signature, &derived.public_key).unwrap());
        assert!(chain.verify_message_address(b"hello", &signature, &derived.address).unwrap());
        assert!(!chain.verify_message_address(b"other", &signature, &derived.address).unwrap());
    }

    #[test]
    fn test_signed_transaction_decodes() {
        let seed = seed_from_mnemonic(MNEMONIC, "").unwrap();
        let chain = EvmChain::new();
        let key = chain.derive_private_key(seed.as_bytes(), 0).unwrap();
        let request = EvmTxRequest {
            nonce: 0,
            gas_price: "1".into(),
            gas_limit: 21000,
            to: String::new(),
            value: "0".into(),
            data: "0x6000".into(),
            chain_id: 56,
        };
        let signed = chain.sign_transaction(&request, key.as_bytes()).unwrap();
        let view = decode_legacy_transaction(&hex::decode(&signed.raw[2..]).unwrap()).unwrap();
        assert_eq!(view.to, None);
        assert_eq!(view.gas_limit, 21000);
        assert_eq!(view.chain_id, Some(56));
        assert!(decode_legacy_transaction(&[0xc0]).is_err());
    }

    #[test]
    fn test_erc20_transfer_data() {
        let data = erc20_transfer_data(
            "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed",
            &BigUint::from(1_000_000u32),
        )
        .unwrap();
        assert!(data.starts_with("0xa9059cbb"));
        assert_eq!(data.len(), 2 + 8 + 64 + 64);
        assert!(data.ends_with("00000000000f4240"));
    }
}
