//! Keccak-256 hashing utilities
//!
//! Every digest in the crate (addresses, envelope hashes, message hashes,
//! receipt ids) is Keccak-256, the hash Ethereum uses everywhere.

use super::primitives::H256;
use sha3::{Digest, Keccak256};

/// Computes the Keccak-256 hash of the input data
pub fn keccak256(data: &[u8]) -> H256 {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    H256(hasher.finalize().into())
}

/// Computes Keccak-256 over the concatenation of several slices
/// without allocating the joined buffer
pub fn keccak256_concat(parts: &[&[u8]]) -> H256 {
    let mut hasher = Keccak256::new();
    for part in parts {
        hasher.update(part);
    }
    H256(hasher.finalize().into())
}

/// Computes Keccak-256 and returns it as a `0x`-prefixed hex string
pub fn keccak256_hex(data: &[u8]) -> String {
    keccak256(data).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keccak256_empty() {
        assert_eq!(
            keccak256_hex(b""),
            "0xc5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn test_keccak256_hello_world() {
        assert_eq!(
            keccak256_hex(b"hello world"),
            "0x47173285a8d7341e5e972fc677286384f802f8ef42a5ec5f03bbfa254cb01fad"
        );
    }

    #[test]
    fn test_concat_matches_joined() {
        let joined = keccak256(b"hello world");
        let parts = keccak256_concat(&[b"hello", b" ", b"world"]);
        assert_eq!(joined, parts);
    }
}
