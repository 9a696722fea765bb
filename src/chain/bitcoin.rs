//! Bitcoin-style identity and signing
//!
//! This module handles:
//! - BIP84 P2WPKH derivation
//! - Legacy, bech32 and bech32m address validation against network params
//! - Signed-message format (base64 compact recoverable signature)
//! - P2WPKH transaction signing

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bitcoin::absolute::LockTime;
use bitcoin::bech32::{segwit, Fe32, Hrp};
use bitcoin::hashes::{hash160, Hash};
use bitcoin::secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use bitcoin::secp256k1::{Message, PublicKey, Secp256k1};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::transaction::Version;
use bitcoin::opcodes::all::OP_PUSHNUM_1;
use bitcoin::script::Builder;
use bitcoin::sign_message::signed_msg_hash;
use bitcoin::{
    base58, OutPoint, PubkeyHash, ScriptBuf, ScriptHash, Sequence, Transaction, TxIn, TxOut, Txid, WPubkeyHash, Witness,
};
use log::debug;
use std::str::FromStr;

use super::hd::{account_path, derive_secret_key, public_key, secret_key_from_bytes};
use super::{ChainIdentity, MessageSigner};
use crate::config::ChainFamily;
use crate::error::{GatewayError, Result};
use crate::keys::SecretBytes;
use crate::model::{BitcoinUnsignedTx, DerivedAddress};
use crate::network::NetworkParams;

/// Decoded address
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressKind {
    /// Base58 pay-to-pubkey-hash
    P2pkh([u8; 20]),
    /// Base58 pay-to-script-hash
    P2sh([u8; 20]),
    /// Segwit v0 key hash
    P2wpkh([u8; 20]),
    /// Segwit v1 (Taproot) output key
    P2tr([u8; 32]),
}

impl AddressKind {
    /// Output script paying to this address
    pub fn script_pubkey(&self) -> ScriptBuf {
        match self {
            AddressKind::P2pkh(hash) => ScriptBuf::new_p2pkh(&PubkeyHash::from_byte_array(*hash)),
            AddressKind::P2sh(hash) => ScriptBuf::new_p2sh(&ScriptHash::from_byte_array(*hash)),
            AddressKind::P2wpkh(hash) => ScriptBuf::new_p2wpkh(&WPubkeyHash::from_byte_array(*hash)),
            // the output key is not required to be a valid curve point here
            AddressKind::P2tr(key) => Builder::new().push_opcode(OP_PUSHNUM_1).push_slice(key).into_script(),
        }
    }
}

fn looks_like_bech32(address: &str, params: &NetworkParams) -> bool {
    address
        .to_lowercase()
        .starts_with(&format!("{}1", params.bech32_prefix))
}

/// Decode and validate an address for the given network
pub fn decode_address(address: &str, params: &NetworkParams) -> Result<AddressKind> {
    let invalid = |reason: &str| GatewayError::InvalidAddress(format!("{}: {}", address, reason));

    if looks_like_bech32(address, params) {
        let (hrp, version, program) = segwit::decode(address).map_err(|e| invalid(&e.to_string()))?;
        if hrp.to_lowercase() != params.bech32_prefix {
            return Err(invalid("wrong network prefix"));
        }
        return match (version.to_u8(), program.len()) {
            (0, 20) => {
                let mut hash = [0u8; 20];
                hash.copy_from_slice(&program);
                Ok(AddressKind::P2wpkh(hash))
            }
            (1, 32) => {
                let mut key = [0u8; 32];
                key.copy_from_slice(&program);
                Ok(AddressKind::P2tr(key))
            }
            (version, len) => Err(invalid(&format!("unsupported witness v{} program of {} bytes", version, len))),
        };
    }

    let payload = base58::decode_check(address).map_err(|e| invalid(&e.to_string()))?;
    if payload.len() != 21 {
        return Err(invalid("payload is not 21 bytes"));
    }
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&payload[1..]);
    if payload[0] == params.p2pkh_prefix {
        Ok(AddressKind::P2pkh(hash))
    } else if payload[0] == params.p2sh_prefix {
        Ok(AddressKind::P2sh(hash))
    } else {
        Err(invalid("unknown version byte"))
    }
}

/// P2WPKH address for a public key
pub fn p2wpkh_address(public_key: &PublicKey, params: &NetworkParams) -> Result<String> {
    let hash = hash160::Hash::hash(&public_key.serialize()).to_byte_array();
    let hrp = Hrp::parse(&params.bech32_prefix)
        .map_err(|e| GatewayError::Configuration(format!("Invalid bech32 prefix: {}", e)))?;
    segwit::encode(hrp, Fe32::Q, &hash).map_err(|e| GatewayError::crypto(e.to_string()))
}

/// P2PKH address for a public key
pub fn p2pkh_address(public_key: &PublicKey, params: &NetworkParams) -> String {
    let mut payload = vec![params.p2pkh_prefix];
    payload.extend_from_slice(&hash160::Hash::hash(&public_key.serialize()).to_byte_array());
    base58::encode_check(&payload)
}

/// Double-SHA256 of the signed-message envelope
pub fn signed_message_hash(message: &[u8]) -> Result<[u8; 32]> {
    let text = std::str::from_utf8(message)
        .map_err(|_| GatewayError::crypto("Bitcoin signed messages must be UTF-8"))?;
    Ok(signed_msg_hash(text).to_byte_array())
}

fn recover_from_base64(message: &[u8], signature: &str) -> Result<PublicKey> {
    let bytes = BASE64
        .decode(signature.trim())
        .map_err(|e| GatewayError::crypto(format!("Invalid base64 signature: {}", e)))?;
    if bytes.len() != 65 {
        return Err(GatewayError::crypto(format!("signature must be 65 bytes, got {}", bytes.len())));
    }
    let header = bytes[0];
    if !(27..=42).contains(&header) {
        return Err(GatewayError::crypto(format!("invalid signature header {}", header)));
    }
    let recovery_id = RecoveryId::from_i32(i32::from((header - 27) & 3))?;
    let recoverable = RecoverableSignature::from_compact(&bytes[1..], recovery_id)?;
    let digest = Message::from_digest(signed_message_hash(message)?);
    Ok(Secp256k1::new().recover_ecdsa(&digest, &recoverable)?)
}

/// Output of transaction signing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedBitcoinTransaction {
    /// Consensus-serialized hex
    pub raw: String,
    pub txid: String,
}

/// Bitcoin family primitives for one network
#[derive(Debug, Clone)]
pub struct BitcoinChain {
    params: NetworkParams,
}

impl BitcoinChain {
    pub fn new(params: NetworkParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &NetworkParams {
        &self.params
    }

    fn path(&self, index: u32) -> String {
        account_path(84, self.params.coin_type, index)
    }

    /// Verify a signed message against an address (P2PKH or P2WPKH)
    pub fn verify_message_address(&self, message: &[u8], signature: &str, address: &str) -> Result<bool> {
        let recovered = recover_from_base64(message, signature)?;
        let expected = decode_address(address, &self.params)?;
        let candidates = [
            decode_address(&p2pkh_address(&recovered, &self.params), &self.params)?,
            decode_address(&p2wpkh_address(&recovered, &self.params)?, &self.params)?,
        ];
        Ok(candidates.contains(&expected))
    }

    /// Sign a P2WPKH spend plan; every input must belong to `private_key`
    pub fn sign_transaction(&self, plan: &BitcoinUnsignedTx, private_key: &[u8]) -> Result<SignedBitcoinTransaction> {
        let secret = secret_key_from_bytes(private_key)?;
        let secp = Secp256k1::new();
        let public = public_key(&secret);
        let own_script = AddressKind::P2wpkh(hash160::Hash::hash(&public.serialize()).to_byte_array())
            .script_pubkey();

        let mut inputs = Vec::with_capacity(plan.inputs.len());
        for input in &plan.inputs {
            let txid = Txid::from_str(&input.txid)
                .map_err(|e| GatewayError::invalid_data("bitcoin", format!("bad txid {}: {}", input.txid, e)))?;
            inputs.push(TxIn {
                previous_output: OutPoint { txid, vout: input.vout },
                script_sig: ScriptBuf::new(),
                sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                witness: Witness::new(),
            });
        }

        let mut outputs = Vec::with_capacity(plan.outputs.len());
        for output in &plan.outputs {
            outputs.push(TxOut {
                value: bitcoin::Amount::from_sat(output.value),
                script_pubkey: decode_address(&output.address, &self.params)?.script_pubkey(),
            });
        }

        let mut tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: inputs,
            output: outputs,
        };

        let mut witnesses = Vec::with_capacity(plan.inputs.len());
        {
            let mut sighash_cache = SighashCache::new(&tx);
            for (i, input) in plan.inputs.iter().enumerate() {
                let sighash = sighash_cache
                    .p2wpkh_signature_hash(
                        i,
                        &own_script,
                        bitcoin::Amount::from_sat(input.value),
                        EcdsaSighashType::All,
                    )
                    .map_err(|e| GatewayError::crypto(format!("Failed to compute p2wpkh sighash: {}", e)))?;

                let message = Message::from_digest(sighash.to_byte_array());
                let signature = secp.sign_ecdsa(&message, &secret);

                let mut sig_bytes = signature.serialize_der().to_vec();
                sig_bytes.push(EcdsaSighashType::All as u8);

                let mut witness = Witness::new();
                witness.push(&sig_bytes);
                witness.push(public.serialize());
                witnesses.push(witness);
            }
        }
        for (input, witness) in tx.input.iter_mut().zip(witnesses) {
            input.witness = witness;
        }

        let txid = tx.compute_txid().to_string();
        debug!("Signed transaction {} with {} inputs", txid, tx.input.len());
        Ok(SignedBitcoinTransaction {
            raw: bitcoin::consensus::encode::serialize_hex(&tx),
            txid,
        })
    }
}

impl ChainIdentity for BitcoinChain {
    fn family(&self) -> ChainFamily {
        ChainFamily::Bitcoin
    }

    fn derive_private_key(&self, seed: &[u8], index: u32) -> Result<SecretBytes> {
        let secret = derive_secret_key(seed, &self.path(index))?;
        Ok(SecretBytes::new(secret.secret_bytes().to_vec()))
    }

    fn derive_address(&self, seed: &[u8], index: u32) -> Result<DerivedAddress> {
        let secret = derive_secret_key(seed, &self.path(index))?;
        let public = public_key(&secret);
        Ok(DerivedAddress {
            index,
            address: p2wpkh_address(&public, &self.params)?,
            public_key: hex::encode(public.serialize()),
        })
    }

    fn is_valid_address(&self, address: &str) -> bool {
        decode_address(address, &self.params).is_ok()
    }

    fn normalize_address(&self, address: &str) -> Result<String> {
        let address = address.trim();
        decode_address(address, &self.params)?;
        if looks_like_bech32(address, &self.params) {
            Ok(address.to_lowercase())
        } else {
            Ok(address.to_string())
        }
    }
}

impl MessageSigner for BitcoinChain {
    /// Base64 of header || r || s, header = 27 + 4 (compressed) + recovery
    fn sign_message(&self, message: &[u8], private_key: &[u8]) -> Result<String> {
        let secret = secret_key_from_bytes(private_key)?;
        let digest = Message::from_digest(signed_message_hash(message)?);
        let (recovery_id, compact) = Secp256k1::new()
            .sign_ecdsa_recoverable(&digest, &secret)
            .serialize_compact();
        let mut out = Vec::with_capacity(65);
        out.push(27 + 4 + recovery_id.to_i32() as u8);
        out.extend_from_slice(&compact);
        Ok(BASE64.encode(out))
    }

    fn verify_message(&self, message: &[u8], signature: &str, public_key: &str) -> Result<bool> {
        let expected = hex::decode(public_key)
            .map_err(|e| GatewayError::crypto(format!("Invalid public key hex: {}", e)))?;
        let expected = PublicKey::from_slice(&expected)?;
        Ok(recover_from_base64(message, signature)? == expected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::seed_from_mnemonic;
    use crate::model::{UtxoInput, UtxoOutput};

    const MNEMONIC: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    fn mainnet() -> BitcoinChain {
        BitcoinChain::new(NetworkParams::mainnet())
    }

    #[test]
    fn test_validation_vectors() {
        let chain = mainnet();
        assert!(chain.is_valid_address("bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq"));
        assert!(!chain.is_valid_address("bc1q123"));
        assert!(chain.is_valid_address("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa"));
        assert!(chain.is_valid_address("3J98t1WpEZ73CNmQviecrnyiWrnqRhWNLy"));
        // taproot (BIP350 vector)
        assert!(chain.is_valid_address("bc1p0xlxvlhemja6c4dqv22uapctqupfhlxm9h8z3k2e72q4k9hcz7vqzk5jj0"));
        // testnet address on mainnet
        assert!(!chain.is_valid_address("tb1qw508d6qejxtdg4y5r3zarvary0c5xw7kxpjzsx"));
        // v0 with a 32-byte program
        assert!(!chain.is_valid_address("bc1qrp33g0q5c5txsp9arysrx4k6zdkfs4nce4xj0gdcccefvpysxf3qccfmv3"));
    }

    #[test]
    fn test_script_pubkey_matches_address_parser() {
        let params = NetworkParams::mainnet();
        for address in [
            "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa",
            "3J98t1WpEZ73CNmQviecrnyiWrnqRhWNLy",
            "bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq",
            "bc1p0xlxvlhemja6c4dqv22uapctqupfhlxm9h8z3k2e72q4k9hcz7vqzk5jj0",
        ] {
            let expected = bitcoin::Address::from_str(address).unwrap().assume_checked().script_pubkey();
            assert_eq!(decode_address(address, &params).unwrap().script_pubkey(), expected, "{}", address);
        }
    }

    #[test]
    fn test_signed_message_hash_requires_utf8() {
        assert!(signed_message_hash(b"hello").is_ok());
        assert!(signed_message_hash(&[0xff, 0xfe]).is_err());
    }

    #[test]
    fn test_derive_bip84_vector() {
        let seed = seed_from_mnemonic(MNEMONIC, "").unwrap();
        let derived = mainnet().derive_address(seed.as_bytes(), 0).unwrap();
        assert_eq!(derived.address, "bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu");
    }

    #[test]
    fn test_normalize() {
        let chain = mainnet();
        let upper = "BC1QAR0SRRR7XFKVY5L643LYDNW9RE59GTZZWF5MDQ";
        let once = chain.normalize_address(upper).unwrap();
        assert_eq!(once, upper.to_lowercase());
        assert_eq!(chain.normalize_address(&once).unwrap(), once);
        let legacy = "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa";
        assert_eq!(chain.normalize_address(legacy).unwrap(), legacy);
        assert!(chain.normalize_address("bc1q123").is_err());
    }

    #[test]
    fn test_message_signature() {
        let chain = mainnet();
        let seed = seed_from_mnemonic(MNEMONIC, "").unwrap();
        let key = chain.derive_private_key(seed.as_bytes(), 0).unwrap();
        let derived = chain.derive_address(seed.as_bytes(), 0).unwrap();

        let signature = chain.sign_message(b"hello world", key.as_bytes()).unwrap();
        let raw = BASE64.decode(&signature).unwrap();
        assert_eq!(raw.len(), 65);
        assert!((31..=34).contains(&raw[0]));
        assert!(chain.verify_message(b"hello world", &signature, &derived.public_key).unwrap());
        assert!(chain.verify_message_address(b"hello world", &signature, &derived.address).unwrap());
        assert!(!chain.verify_message(b"goodbye", &signature, &derived.public_key).unwrap());
    }

    #[test]
    fn test_sign_p2wpkh_spend() {
        let chain = mainnet();
        let seed = seed_from_mnemonic(MNEMONIC, "").unwrap();
        let key = chain.derive_private_key(seed.as_bytes(), 0).unwrap();
        let plan = BitcoinUnsignedTx {
            inputs: vec![UtxoInput {
                txid: "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b".into(),
                vout: 0,
                value: 100_000,
            }],
            outputs: vec![
                UtxoOutput { address: "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa".into(), value: 50_000 },
                UtxoOutput { address: "bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu".into(), value: 49_000 },
            ],
            fee: 1_000,
            fee_rate: 7.0,
        };
        let signed = chain.sign_transaction(&plan, key.as_bytes()).unwrap();
        let tx: Transaction = bitcoin::consensus::deserialize(&hex::decode(&signed.raw).unwrap()).unwrap();
        assert_eq!(tx.input.len(), 1);
        assert_eq!(tx.input[0].witness.len(), 2);
        assert_eq!(tx.output[0].value.to_sat(), 50_000);
        assert_eq!(tx.compute_txid().to_string(), signed.txid);
    }
}
