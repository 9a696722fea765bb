//! Chain-family identity and signing primitives
//!
//! This module handles:
//! - Address derivation from a seed and an index
//! - Address validation and normalization
//! - Message signing and verification
//!
//! Each family implements [`ChainIdentity`] and [`MessageSigner`]; a
//! [`ChainToolkit`] bundles the two for one chain.

pub mod bioforest;
pub mod bitcoin;
pub mod evm;
pub mod hd;
pub mod tron;

use std::sync::Arc;

use crate::config::{ChainDescriptor, ChainFamily};
use crate::error::Result;
use crate::keys::SecretBytes;
use crate::model::DerivedAddress;

pub use self::bioforest::BioForestChain;
pub use self::bitcoin::BitcoinChain;
pub use self::evm::EvmChain;
pub use self::tron::TronChain;

/// Address derivation and validation for one chain family
pub trait ChainIdentity: Send + Sync {
    /// Family served
    fn family(&self) -> ChainFamily;

    /// Private key for `index`
    fn derive_private_key(&self, seed: &[u8], index: u32) -> Result<SecretBytes>;

    /// Address for `index`
    fn derive_address(&self, seed: &[u8], index: u32) -> Result<DerivedAddress>;

    /// `count` consecutive addresses starting at `start`
    fn derive_addresses(&self, seed: &[u8], start: u32, count: u32) -> Result<Vec<DerivedAddress>> {
        (start..start.saturating_add(count))
            .map(|index| self.derive_address(seed, index))
            .collect()
    }

    fn is_valid_address(&self, address: &str) -> bool;

    /// Canonical form; `InvalidAddress` when the input does not validate.
    /// Idempotent.
    fn normalize_address(&self, address: &str) -> Result<String>;
}

/// Message signing for one chain family
pub trait MessageSigner: Send + Sync {
    /// Sign `message` with a raw private key; the encoding is family specific
    fn sign_message(&self, message: &[u8], private_key: &[u8]) -> Result<String>;

    /// Check a signature produced by [`MessageSigner::sign_message`] against
    /// the signer's hex public key
    fn verify_message(&self, message: &[u8], signature: &str, public_key: &str) -> Result<bool>;
}

/// Identity + signer for one chain
#[derive(Clone)]
pub struct ChainToolkit {
    pub identity: Arc<dyn ChainIdentity>,
    pub signer: Arc<dyn MessageSigner>,
}

impl ChainToolkit {
    fn from_family<T: ChainIdentity + MessageSigner + 'static>(family: T) -> Self {
        let shared = Arc::new(family);
        Self {
            identity: shared.clone(),
            signer: shared,
        }
    }
}

/// Toolkit for a chain descriptor
pub fn toolkit_for(descriptor: &ChainDescriptor) -> Result<ChainToolkit> {
    let toolkit = match descriptor.family {
        ChainFamily::Evm => ChainToolkit::from_family(EvmChain::new()),
        ChainFamily::Bitcoin => ChainToolkit::from_family(BitcoinChain::new(descriptor.network_params()?)),
        ChainFamily::Tron => ChainToolkit::from_family(TronChain::new()),
        ChainFamily::BioForest => ChainToolkit::from_family(BioForestChain::new(
            descriptor.address_prefix.as_deref().unwrap_or(bioforest::DEFAULT_PREFIX),
        )),
    };
    Ok(toolkit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toolkit_family_matches_descriptor() {
        let mut descriptor = ChainDescriptor::new("bitcoin", "BTC", 8, ChainFamily::Bitcoin);
        descriptor.bitcoin_network = Some("testnet".into());
        let toolkit = toolkit_for(&descriptor).unwrap();
        assert_eq!(toolkit.identity.family(), ChainFamily::Bitcoin);
        assert!(toolkit.identity.is_valid_address("tb1qw508d6qejxtdg4y5r3zarvary0c5xw7kxpjzsx"));

        let descriptor = ChainDescriptor::new("bfmeta", "BFM", 8, ChainFamily::BioForest);
        assert_eq!(toolkit_for(&descriptor).unwrap().identity.family(), ChainFamily::BioForest);
    }
}
