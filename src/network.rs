//! Network parameters for Bitcoin-style chains
//!
//! This module provides the address encoding parameters used to validate and
//! derive addresses for Bitcoin and its forks, including custom networks.

use bitcoin::Network;

/// Network parameters for address encoding
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkParams {
    /// Bech32 prefix (e.g., "bc" for mainnet, "tb" for testnet)
    pub bech32_prefix: String,
    /// P2PKH address prefix (e.g., 0x00 for mainnet, 0x6f for testnet)
    pub p2pkh_prefix: u8,
    /// P2SH address prefix (e.g., 0x05 for mainnet, 0xc4 for testnet)
    pub p2sh_prefix: u8,
    /// Bitcoin network (mainnet, testnet, regtest)
    pub network: Network,
    /// BIP44 coin type used in derivation paths
    pub coin_type: u32,
}

impl NetworkParams {
    /// Create network parameters for mainnet
    pub fn mainnet() -> Self {
        Self {
            bech32_prefix: String::from("bc"),
            p2pkh_prefix: 0x00,
            p2sh_prefix: 0x05,
            network: Network::Bitcoin,
            coin_type: 0,
        }
    }

    /// Create network parameters for testnet
    pub fn testnet() -> Self {
        Self {
            bech32_prefix: String::from("tb"),
            p2pkh_prefix: 0x6f,
            p2sh_prefix: 0xc4,
            network: Network::Testnet,
            coin_type: 1,
        }
    }

    /// Create network parameters for regtest
    pub fn regtest() -> Self {
        Self {
            bech32_prefix: String::from("bcrt"),
            p2pkh_prefix: 0x6f,
            p2sh_prefix: 0xc4,
            network: Network::Regtest,
            coin_type: 1,
        }
    }

    /// Create network parameters for signet (uses testnet address encoding)
    pub fn signet() -> Self {
        Self {
            bech32_prefix: String::from("tb"),
            p2pkh_prefix: 0x6f,
            p2sh_prefix: 0xc4,
            network: Network::Signet,
            coin_type: 1,
        }
    }

    /// Create network parameters for litecoin
    pub fn litecoin() -> Self {
        Self {
            bech32_prefix: String::from("ltc"),
            p2pkh_prefix: 0x30,
            p2sh_prefix: 0x32,
            network: Network::Bitcoin, // Closest rust-bitcoin network for sighash rules
            coin_type: 2,
        }
    }

    /// Create network parameters for dogecoin
    pub fn dogecoin() -> Self {
        Self {
            bech32_prefix: String::from("dc"),
            p2pkh_prefix: 0x1e,
            p2sh_prefix: 0x16,
            network: Network::Bitcoin,
            coin_type: 3,
        }
    }

    /// True for the real Bitcoin mainnet encoding
    pub fn is_bitcoin_mainnet(&self) -> bool {
        *self == Self::mainnet()
    }

    /// Get the network parameters for a given provider preset
    pub fn from_provider(provider: &str) -> Result<Self, String> {
        match provider.to_lowercase().as_str() {
            "mainnet" | "bitcoin" => Ok(Self::mainnet()),
            "testnet" => Ok(Self::testnet()),
            "signet" => Ok(Self::signet()),
            "regtest" | "localhost" => Ok(Self::regtest()),
            "litecoin" | "ltc" => Ok(Self::litecoin()),
            "dogecoin" | "doge" => Ok(Self::dogecoin()),
            _ => Err(format!(
                "Unknown provider: {}. Supported networks: mainnet, testnet, signet, regtest, litecoin, dogecoin",
                provider
            )),
        }
    }

    /// Create network parameters from a magic string or network name.
    ///
    /// Accepts a preset name or `p2sh_prefix:p2pkh_prefix:bech32_prefix`,
    /// e.g. "05:00:bc" for mainnet.
    pub fn from_magic(magic: &str) -> Result<Self, String> {
        if let Ok(params) = Self::from_provider(magic) {
            return Ok(params);
        }
        let parts: Vec<&str> = magic.split(':').collect();
        if parts.len() != 3 {
            return Err(format!(
                "Invalid magic format. Expected network name or 'p2sh_prefix:p2pkh_prefix:bech32_prefix', got '{}'",
                magic
            ));
        }

        let p2sh_prefix = u8::from_str_radix(parts[0], 16)
            .map_err(|_| format!("Invalid p2sh_prefix: {}", parts[0]))?;
        let p2pkh_prefix = u8::from_str_radix(parts[1], 16)
            .map_err(|_| format!("Invalid p2pkh_prefix: {}", parts[1]))?;

        // Default to Bitcoin network for custom magic values
        Ok(Self {
            bech32_prefix: parts[2].to_lowercase(),
            p2pkh_prefix,
            p2sh_prefix,
            network: Network::Bitcoin,
            coin_type: 0,
        })
    }
}
