//! Cryptographic utilities
//!
//! This module provides:
//! - Keccak-256 hashing
//! - ECDSA key management (secp256k1) with signer recovery
//! - 32-byte digest and 20-byte address primitives

pub mod hash;
pub mod keys;
pub mod primitives;

pub use hash::{keccak256, keccak256_concat, keccak256_hex};
pub use keys::{
    public_key_to_address, recover_address, sign_hash, KeyError, KeyPair, SIGNATURE_LENGTH,
};
pub use primitives::{decode_prefixed, encode_prefixed, hex_bytes, Address, H256};
