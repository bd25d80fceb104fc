//! EIP-712 typed-data helpers for Safe domains

use crate::crypto::{keccak256_concat, Address, H256};

/// keccak256("EIP712Domain(uint256 chainId,address verifyingContract)")
pub const DOMAIN_SEPARATOR_TYPEHASH: [u8; 32] = [
    0x47, 0xe7, 0x95, 0x34, 0xa2, 0x45, 0x95, 0x2e, 0x8b, 0x16, 0x89, 0x3a, 0x33, 0x6b, 0x85, 0xa3,
    0xd9, 0xea, 0x9f, 0xa8, 0xc5, 0x73, 0xf3, 0xd8, 0x03, 0xaf, 0xb9, 0x2a, 0x79, 0x46, 0x92, 0x18,
];

/// Big-endian, left-padded 32-byte ABI word
pub fn word_u64(value: u64) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[24..].copy_from_slice(&value.to_be_bytes());
    word
}

/// Big-endian, left-padded 32-byte ABI word
pub fn word_u128(value: u128) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[16..].copy_from_slice(&value.to_be_bytes());
    word
}

/// Domain separator binding a hash to one Safe on one chain
pub fn domain_separator(chain_id: u64, verifying_contract: &Address) -> H256 {
    keccak256_concat(&[
        &DOMAIN_SEPARATOR_TYPEHASH,
        &word_u64(chain_id),
        &verifying_contract.to_word(),
    ])
}

/// `keccak(0x19 0x01 || domainSeparator || structHash)`
pub fn typed_data_hash(domain: &H256, struct_hash: &H256) -> H256 {
    keccak256_concat(&[&[0x19, 0x01], domain.as_bytes(), struct_hash.as_bytes()])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keccak256;

    #[test]
    fn test_domain_separator_typehash() {
        let computed = keccak256(b"EIP712Domain(uint256 chainId,address verifyingContract)");
        assert_eq!(computed.as_bytes(), &DOMAIN_SEPARATOR_TYPEHASH);
    }

    #[test]
    fn test_domain_is_chain_and_contract_specific() {
        let safe = Address([0x11; 20]);
        let other = Address([0x22; 20]);
        assert_ne!(domain_separator(1, &safe), domain_separator(11155111, &safe));
        assert_ne!(domain_separator(1, &safe), domain_separator(1, &other));
    }

    #[test]
    fn test_words() {
        assert_eq!(word_u64(1)[31], 1);
        assert_eq!(word_u128(u128::MAX)[..16], [0u8; 16]);
        assert_eq!(word_u128(u128::MAX)[16..], [0xff; 16]);
    }
}
