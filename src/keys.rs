//! Key material boundary
//!
//! The gateway never stores secrets. Seeds come from an external key store
//! for the duration of one signing or derivation call.

use bip39::Mnemonic;
use rand::RngCore;
use std::fmt;

use crate::error::{GatewayError, Result, SignatureFailureKind};

/// Owned secret bytes; zeroed on drop and redacted in `Debug`
#[derive(Clone, PartialEq, Eq)]
pub struct SecretBytes(Vec<u8>);

impl SecretBytes {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&[u8]> for SecretBytes {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretBytes([REDACTED; {}])", self.0.len())
    }
}

impl Drop for SecretBytes {
    fn drop(&mut self) {
        self.0.fill(0);
    }
}

/// Encrypted key/seed store collaborator
pub trait KeyStore: Send + Sync {
    /// Seed bytes for a wallet. A bad password must surface as
    /// `SignatureFailure { kind: WrongPassword }`.
    fn seed(&self, wallet_id: &str, password: &str) -> Result<SecretBytes>;
}

/// BIP39 mnemonic + passphrase to 64-byte seed
pub fn seed_from_mnemonic(phrase: &str, passphrase: &str) -> Result<SecretBytes> {
    let mnemonic = Mnemonic::parse_normalized(phrase).map_err(|e| {
        GatewayError::signature(SignatureFailureKind::MissingKey, format!("Invalid mnemonic phrase: {}", e))
    })?;
    Ok(SecretBytes::new(mnemonic.to_seed(passphrase).to_vec()))
}

/// Fresh 12- or 24-word English mnemonic
pub fn generate_mnemonic(words: usize) -> Result<String> {
    let entropy_len = match words {
        12 => 16,
        24 => 32,
        other => {
            return Err(GatewayError::Configuration(format!(
                "Unsupported mnemonic length: {} (use 12 or 24)",
                other
            )))
        }
    };
    let mut entropy = vec![0u8; entropy_len];
    rand::rngs::OsRng.fill_bytes(&mut entropy);
    let mnemonic = Mnemonic::from_entropy(&entropy)
        .map_err(|e| GatewayError::crypto(format!("Failed to generate mnemonic: {}", e)))?;
    Ok(mnemonic.to_string())
}

/// Key store holding plaintext seeds in memory, keyed by wallet id
pub struct MemoryKeyStore {
    wallets: std::collections::HashMap<String, (String, SecretBytes)>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self { wallets: std::collections::HashMap::new() }
    }

    /// Register a wallet seed behind a password
    pub fn insert(&mut self, wallet_id: &str, password: &str, seed: SecretBytes) {
        self.wallets.insert(wallet_id.to_string(), (password.to_string(), seed));
    }
}

impl Default for MemoryKeyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyStore for MemoryKeyStore {
    fn seed(&self, wallet_id: &str, password: &str) -> Result<SecretBytes> {
        let (expected, seed) = self.wallets.get(wallet_id).ok_or_else(|| {
            GatewayError::signature(SignatureFailureKind::MissingKey, format!("No wallet {}", wallet_id))
        })?;
        if expected != password {
            return Err(GatewayError::signature(SignatureFailureKind::WrongPassword, "Wrong password"));
        }
        Ok(seed.clone())
    }
}
