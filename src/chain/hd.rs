//! BIP32 key derivation shared by the secp256k1 families

use bitcoin::bip32::{DerivationPath, Xpriv};
use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey};
use bitcoin::Network;
use std::str::FromStr;

use crate::error::{GatewayError, Result, SignatureFailureKind};

/// BIP44-style path `m/{purpose}'/{coin}'/0'/0/{index}`
pub fn account_path(purpose: u32, coin_type: u32, index: u32) -> String {
    format!("m/{}'/{}'/0'/0/{}", purpose, coin_type, index)
}

/// Derive the secret key at `path` from a BIP39 seed
pub fn derive_secret_key(seed: &[u8], path: &str) -> Result<SecretKey> {
    if seed.is_empty() {
        return Err(GatewayError::signature(SignatureFailureKind::MissingKey, "Empty seed"));
    }
    let secp = Secp256k1::new();
    let master = Xpriv::new_master(Network::Bitcoin, seed)
        .map_err(|e| GatewayError::crypto(format!("Failed to create master key: {}", e)))?;
    let path = DerivationPath::from_str(path)
        .map_err(|e| GatewayError::crypto(format!("Invalid derivation path {}: {}", path, e)))?;
    let derived = master
        .derive_priv(&secp, &path)
        .map_err(|e| GatewayError::crypto(format!("Failed to derive private key: {}", e)))?;
    Ok(derived.private_key)
}

/// Parse a raw 32-byte secp256k1 private key
pub fn secret_key_from_bytes(bytes: &[u8]) -> Result<SecretKey> {
    if bytes.is_empty() {
        return Err(GatewayError::signature(SignatureFailureKind::MissingKey, "No private key supplied"));
    }
    SecretKey::from_slice(bytes).map_err(|e| GatewayError::crypto(format!("Invalid private key: {}", e)))
}

/// Public key for a secret key
pub fn public_key(secret: &SecretKey) -> PublicKey {
    PublicKey::from_secret_key(&Secp256k1::new(), secret)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::seed_from_mnemonic;

    #[test]
    fn test_derivation_is_deterministic() {
        let seed = seed_from_mnemonic(
            "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about",
            "",
        )
        .unwrap();
        let a = derive_secret_key(seed.as_bytes(), &account_path(44, 60, 0)).unwrap();
        let b = derive_secret_key(seed.as_bytes(), &account_path(44, 60, 0)).unwrap();
        let c = derive_secret_key(seed.as_bytes(), &account_path(44, 60, 1)).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(account_path(84, 0, 3), "m/84'/0'/0'/0/3");
    }

    #[test]
    fn test_empty_inputs_are_missing_key() {
        assert!(matches!(
            derive_secret_key(&[], "m/0"),
            Err(GatewayError::SignatureFailure { kind: SignatureFailureKind::MissingKey, .. })
        ));
        assert!(secret_key_from_bytes(&[]).is_err());
        assert!(secret_key_from_bytes(&[0u8; 32]).is_err());
    }
}
