//! ECDSA key management
//!
//! Provides key pair generation, recoverable signing, and signer recovery
//! using the secp256k1 elliptic curve. Addresses are Ethereum-style: the
//! last 20 bytes of the Keccak-256 hash of the uncompressed public key.

use rand::rngs::OsRng;
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use std::fmt;
use thiserror::Error;

use super::hash::keccak256;
use super::primitives::{decode_prefixed, Address, H256};

/// Length of an `r || s || v` signature
pub const SIGNATURE_LENGTH: usize = 65;

/// Errors that can occur during key operations
#[derive(Error, Debug)]
pub enum KeyError {
    #[error("Invalid private key")]
    InvalidPrivateKey,
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
    #[error("Invalid hash: {0}")]
    InvalidHash(String),
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),
    #[error("Secp256k1 error: {0}")]
    Secp256k1Error(#[from] secp256k1::Error),
}

/// A key pair consisting of a private key and its corresponding public key
#[derive(Clone)]
pub struct KeyPair {
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let (secret_key, public_key) = secp.generate_keypair(&mut OsRng);
        Self {
            secret_key,
            public_key,
        }
    }

    /// Create a key pair from an existing secret key
    pub fn from_secret_key(secret_key: SecretKey) -> Self {
        let secp = Secp256k1::new();
        let public_key = PublicKey::from_secret_key(&secp, &secret_key);
        Self {
            secret_key,
            public_key,
        }
    }

    /// Create a key pair from a hex-encoded private key (with or without `0x`)
    pub fn from_private_key_hex(hex_key: &str) -> Result<Self, KeyError> {
        let bytes = decode_prefixed(hex_key.trim()).map_err(|_| KeyError::InvalidPrivateKey)?;
        let secret_key =
            SecretKey::from_slice(&bytes).map_err(|_| KeyError::InvalidPrivateKey)?;
        Ok(Self::from_secret_key(secret_key))
    }

    /// Get the private key as a `0x`-prefixed hex string
    pub fn private_key_hex(&self) -> String {
        format!("0x{}", hex::encode(self.secret_key.secret_bytes()))
    }

    /// Get the public key as a hex string (uncompressed, 65 bytes)
    pub fn public_key_hex(&self) -> String {
        format!("0x{}", hex::encode(self.public_key.serialize_uncompressed()))
    }

    /// The account address owned by this key
    pub fn address(&self) -> Address {
        public_key_to_address(&self.public_key)
    }

    /// Sign a 32-byte hash, producing `r || s || v`
    pub fn sign_hash(&self, hash: &H256) -> Result<[u8; SIGNATURE_LENGTH], KeyError> {
        sign_hash(&self.secret_key, hash)
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

/// Convert a public key to its account address
pub fn public_key_to_address(public_key: &PublicKey) -> Address {
    let uncompressed = public_key.serialize_uncompressed();
    // Drop the 0x04 tag byte
    let hash = keccak256(&uncompressed[1..]);

    let mut address = [0u8; 20];
    address.copy_from_slice(&hash.0[12..]);
    Address(address)
}

/// Sign a hash with a secret key; `v` is 27 or 28
pub fn sign_hash(secret_key: &SecretKey, hash: &H256) -> Result<[u8; SIGNATURE_LENGTH], KeyError> {
    let secp = Secp256k1::new();
    let message = Message::from_digest_slice(hash.as_bytes())?;
    let signature = secp.sign_ecdsa_recoverable(&message, secret_key);
    let (recovery_id, compact) = signature.serialize_compact();

    let mut out = [0u8; SIGNATURE_LENGTH];
    out[..64].copy_from_slice(&compact);
    out[64] = recovery_id.to_i32() as u8 + 27;
    Ok(out)
}

/// Recover the address that produced `signature` over `hash`
///
/// Accepts `v` as 0/1 or 27/28.
pub fn recover_address(hash: &H256, signature: &[u8]) -> Result<Address, KeyError> {
    if signature.len() != SIGNATURE_LENGTH {
        return Err(KeyError::InvalidSignature(format!(
            "expected {} bytes, got {}",
            SIGNATURE_LENGTH,
            signature.len()
        )));
    }

    let v = signature[64];
    let recovery = match v {
        0 | 1 => v,
        27 | 28 => v - 27,
        other => {
            return Err(KeyError::InvalidSignature(format!(
                "unsupported recovery byte {}",
                other
            )))
        }
    };

    let secp = Secp256k1::new();
    let recovery_id = RecoveryId::from_i32(recovery as i32)?;
    let signature = RecoverableSignature::from_compact(&signature[..64], recovery_id)?;
    let message = Message::from_digest_slice(hash.as_bytes())?;
    let public_key = secp.recover_ecdsa(&message, &signature)?;

    Ok(public_key_to_address(&public_key))
}
