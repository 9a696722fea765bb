//! BioForest identity and signing
//!
//! One Ed25519 keypair serves every index: the signing key seed is the
//! SHA-256 of the wallet secret. Addresses are the chain prefix followed by
//! base58check(RIPEMD160(SHA256(public key))).

use bitcoin::base58;
use bitcoin::hashes::{hash160, Hash};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};

use super::{ChainIdentity, MessageSigner};
use crate::config::ChainFamily;
use crate::error::{GatewayError, Result, SignatureFailureKind};
use crate::keys::SecretBytes;
use crate::model::DerivedAddress;

/// Address prefix when the chain descriptor does not set one
pub const DEFAULT_PREFIX: &str = "b";

/// Ed25519 signing key for a wallet secret
pub fn signing_key_from_secret(secret: &[u8]) -> Result<SigningKey> {
    if secret.is_empty() {
        return Err(GatewayError::signature(SignatureFailureKind::MissingKey, "Empty secret"));
    }
    let seed: [u8; 32] = Sha256::digest(secret).into();
    Ok(SigningKey::from_bytes(&seed))
}

fn signing_key_from_private(private_key: &[u8]) -> Result<SigningKey> {
    if private_key.is_empty() {
        return Err(GatewayError::signature(SignatureFailureKind::MissingKey, "No private key supplied"));
    }
    let bytes: [u8; 32] = private_key
        .try_into()
        .map_err(|_| GatewayError::crypto("Ed25519 private key must be 32 bytes"))?;
    Ok(SigningKey::from_bytes(&bytes))
}

fn verifying_key_from_hex(public_key: &str) -> Result<VerifyingKey> {
    let bytes = hex::decode(public_key)
        .map_err(|e| GatewayError::crypto(format!("Invalid public key hex: {}", e)))?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| GatewayError::crypto("Ed25519 public key must be 32 bytes"))?;
    VerifyingKey::from_bytes(&bytes).map_err(|e| GatewayError::crypto(e.to_string()))
}

/// BioForest family primitives for one address prefix
#[derive(Debug, Clone)]
pub struct BioForestChain {
    prefix: String,
}

impl BioForestChain {
    pub fn new(prefix: &str) -> Self {
        Self { prefix: prefix.to_string() }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Address for an Ed25519 public key
    pub fn address_for_public_key(&self, public_key: &VerifyingKey) -> String {
        let hash = hash160::Hash::hash(public_key.as_bytes()).to_byte_array();
        format!("{}{}", self.prefix, base58::encode_check(&hash))
    }

    /// Hex signature over raw bytes
    pub fn sign_bytes(&self, data: &[u8], private_key: &[u8]) -> Result<String> {
        let key = signing_key_from_private(private_key)?;
        Ok(hex::encode(key.sign(data).to_bytes()))
    }

    /// Hex public key for a private key
    pub fn public_key_hex(&self, private_key: &[u8]) -> Result<String> {
        Ok(hex::encode(signing_key_from_private(private_key)?.verifying_key().as_bytes()))
    }
}

impl Default for BioForestChain {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX)
    }
}

impl ChainIdentity for BioForestChain {
    fn family(&self) -> ChainFamily {
        ChainFamily::BioForest
    }

    /// Index is ignored; every index maps to the same key
    fn derive_private_key(&self, seed: &[u8], _index: u32) -> Result<SecretBytes> {
        Ok(SecretBytes::new(signing_key_from_secret(seed)?.to_bytes().to_vec()))
    }

    fn derive_address(&self, seed: &[u8], index: u32) -> Result<DerivedAddress> {
        let verifying = signing_key_from_secret(seed)?.verifying_key();
        Ok(DerivedAddress {
            index,
            address: self.address_for_public_key(&verifying),
            public_key: hex::encode(verifying.as_bytes()),
        })
    }

    fn is_valid_address(&self, address: &str) -> bool {
        match address.strip_prefix(self.prefix.as_str()) {
            Some(rest) if !rest.is_empty() => {
                matches!(base58::decode_check(rest), Ok(payload) if payload.len() == 20)
            }
            _ => false,
        }
    }

    fn normalize_address(&self, address: &str) -> Result<String> {
        let address = address.trim();
        if !self.is_valid_address(address) {
            return Err(GatewayError::InvalidAddress(format!(
                "{} is not a {}-prefixed address",
                address, self.prefix
            )));
        }
        Ok(address.to_string())
    }
}

impl MessageSigner for BioForestChain {
    fn sign_message(&self, message: &[u8], private_key: &[u8]) -> Result<String> {
        self.sign_bytes(message, private_key)
    }

    fn verify_message(&self, message: &[u8], signature: &str, public_key: &str) -> Result<bool> {
        let key = verifying_key_from_hex(public_key)?;
        let bytes = hex::decode(signature)
            .map_err(|e| GatewayError::crypto(format!("Invalid signature hex: {}", e)))?;
        let signature = Signature::from_slice(&bytes).map_err(|e| GatewayError::crypto(e.to_string()))?;
        Ok(key.verify(message, &signature).is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_is_index_independent() {
        let chain = BioForestChain::default();
        let secret = b"correct horse battery staple";
        let a = chain.derive_address(secret, 0).unwrap();
        let b = chain.derive_address(secret, 7).unwrap();
        assert_eq!(a.address, b.address);
        assert_eq!(a.index, 0);
        assert_eq!(b.index, 7);
        assert!(a.address.starts_with('b'));
        assert!(chain.is_valid_address(&a.address));
    }

    #[test]
    fn test_prefix_is_enforced() {
        let bfm = BioForestChain::new("b");
        let other = BioForestChain::new("c");
        let address = bfm.derive_address(b"secret", 0).unwrap().address;
        assert!(!other.is_valid_address(&address));
        assert!(!bfm.is_valid_address("b"));
        assert!(bfm.normalize_address("bNotBase58!").is_err());
        assert_eq!(bfm.normalize_address(&address).unwrap(), address);
    }

    #[test]
    fn test_sign_and_verify() {
        let chain = BioForestChain::default();
        let key = chain.derive_private_key(b"secret", 0).unwrap();
        let derived = chain.derive_address(b"secret", 0).unwrap();
        let signature = chain.sign_message(b"payload", key.as_bytes()).unwrap();
        assert_eq!(signature.len(), 128);
        assert!(chain.verify_message(b"payload", &signature, &derived.public_key).unwrap());
        assert!(!chain.verify_message(b"tampered", &signature, &derived.public_key).unwrap());
        assert_eq!(chain.public_key_hex(key.as_bytes()).unwrap(), derived.public_key);
    }
}
