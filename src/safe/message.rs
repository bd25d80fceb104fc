//! Off-chain message hashing
//!
//! A message is first reduced to its EIP-191 personal-message hash, then
//! wrapped in a `SafeMessage` typed-data hash under the Safe's domain.
//! Owners sign the wrapped hash.

use crate::crypto::{keccak256, keccak256_concat, Address, H256};
use crate::safe::eip712::{domain_separator, typed_data_hash};
use serde::{Deserialize, Serialize};

/// keccak256("SafeMessage(bytes message)")
pub const SAFE_MSG_TYPEHASH: [u8; 32] = [
    0x60, 0xb3, 0xcb, 0xf8, 0xb4, 0xa2, 0x23, 0xd6, 0x8d, 0x64, 0x1b, 0x3b, 0x6d, 0xdf, 0x9a, 0x29,
    0x8e, 0x7f, 0x33, 0x71, 0x0c, 0xf3, 0xd3, 0xa9, 0xd1, 0x14, 0x6b, 0x5a, 0x61, 0x50, 0xfb, 0xca,
];

/// Whether a message has gathered enough owner signatures
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Confirmed,
}

/// EIP-191 hash of a text message
pub fn hash_safe_message(message: &str) -> H256 {
    let prefix = format!("\x19Ethereum Signed Message:\n{}", message.len());
    keccak256_concat(&[prefix.as_bytes(), message.as_bytes()])
}

/// `SafeMessage` typed-data hash of `message` for `safe`
pub fn safe_message_hash(chain_id: u64, safe: &Address, message: &[u8]) -> H256 {
    let struct_hash = keccak256_concat(&[&SAFE_MSG_TYPEHASH, keccak256(message).as_bytes()]);
    typed_data_hash(&domain_separator(chain_id, safe), &struct_hash)
}

/// The hash owners of `safe` sign for a text message
pub fn safe_text_message_hash(chain_id: u64, safe: &Address, message: &str) -> H256 {
    safe_message_hash(chain_id, safe, hash_safe_message(message).as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_msg_typehash() {
        let computed = keccak256(b"SafeMessage(bytes message)");
        assert_eq!(computed.as_bytes(), &SAFE_MSG_TYPEHASH);
    }

    #[test]
    fn test_personal_message_prefix() {
        let text = "I'm the owner of this Safe account";
        let manual = keccak256(
            format!("\x19Ethereum Signed Message:\n{}{}", text.len(), text).as_bytes(),
        );
        assert_eq!(hash_safe_message(text), manual);
    }

    #[test]
    fn test_message_hash_is_safe_specific() {
        let text = "I'm the owner of this Safe account";
        let a = safe_text_message_hash(11155111, &Address([1; 20]), text);
        let b = safe_text_message_hash(11155111, &Address([2; 20]), text);
        assert_ne!(a, b);
        assert_eq!(a, safe_text_message_hash(11155111, &Address([1; 20]), text));
    }
}
