//! Transaction envelope
//!
//! The canonical, hashable description of an action a Safe should take.
//! Its hash is the object owners sign and the relay keys pending state by.

use crate::crypto::{hex_bytes, keccak256, keccak256_concat, Address, H256};
use crate::ledger::wei_string;
use crate::safe::eip712::{domain_separator, typed_data_hash, word_u128, word_u64};
use serde::{Deserialize, Serialize};

/// keccak256("SafeTx(address to,uint256 value,bytes data,uint8 operation,uint256 safeTxGas,uint256 baseGas,uint256 gasPrice,address gasToken,address refundReceiver,uint256 nonce)")
pub const SAFE_TX_TYPEHASH: [u8; 32] = [
    0xbb, 0x83, 0x10, 0xd4, 0x86, 0x36, 0x8d, 0xb6, 0xbd, 0x6f, 0x84, 0x94, 0x02, 0xfd, 0xd7, 0x3a,
    0xd5, 0x3d, 0x31, 0x6b, 0x5a, 0x4b, 0x26, 0x44, 0xad, 0x6e, 0xfe, 0x0f, 0x94, 0x12, 0x86, 0xd8,
];

/// How the Safe invokes the destination
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    #[default]
    Call,
    DelegateCall,
}

impl Operation {
    pub fn as_u8(&self) -> u8 {
        match self {
            Operation::Call => 0,
            Operation::DelegateCall => 1,
        }
    }
}

/// Fields of a Safe transaction (`SafeTx`)
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SafeTransactionData {
    /// Destination address
    pub to: Address,
    /// Value in wei
    #[serde(with = "wei_string")]
    pub value: u128,
    /// Call payload
    #[serde(with = "hex_bytes", default)]
    pub data: Vec<u8>,
    #[serde(default)]
    pub operation: Operation,
    #[serde(default)]
    pub safe_tx_gas: u64,
    #[serde(default)]
    pub base_gas: u64,
    #[serde(with = "wei_string", default)]
    pub gas_price: u128,
    #[serde(default)]
    pub gas_token: Address,
    #[serde(default)]
    pub refund_receiver: Address,
    /// Safe nonce this envelope is valid for
    pub nonce: u64,
}

impl SafeTransactionData {
    /// A plain call with no gas refund settings
    pub fn call(to: Address, value: u128, data: Vec<u8>, nonce: u64) -> Self {
        Self {
            to,
            value,
            data,
            operation: Operation::Call,
            safe_tx_gas: 0,
            base_gas: 0,
            gas_price: 0,
            gas_token: Address::ZERO,
            refund_receiver: Address::ZERO,
            nonce,
        }
    }

    /// EIP-712 struct hash of the `SafeTx` fields
    pub fn struct_hash(&self) -> H256 {
        keccak256_concat(&[
            &SAFE_TX_TYPEHASH,
            &self.to.to_word(),
            &word_u128(self.value),
            keccak256(&self.data).as_bytes(),
            &word_u64(self.operation.as_u8() as u64),
            &word_u64(self.safe_tx_gas),
            &word_u64(self.base_gas),
            &word_u128(self.gas_price),
            &self.gas_token.to_word(),
            &self.refund_receiver.to_word(),
            &word_u64(self.nonce),
        ])
    }

    /// The envelope hash for this transaction on `safe`
    pub fn hash(&self, chain_id: u64, safe: &Address) -> H256 {
        safe_tx_hash(chain_id, safe, self)
    }
}

/// Envelope hash: domain-separated by chain id and Safe address
pub fn safe_tx_hash(chain_id: u64, safe: &Address, data: &SafeTransactionData) -> H256 {
    typed_data_hash(&domain_separator(chain_id, safe), &data.struct_hash())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHAIN: u64 = 11155111;

    fn safe() -> Address {
        Address([0x51; 20])
    }

    fn sample() -> SafeTransactionData {
        SafeTransactionData::call(Address([0xd7; 20]), 5_000_000_000_000_000, vec![], 0)
    }

    #[test]
    fn test_safe_tx_typehash() {
        let computed = keccak256(
            b"SafeTx(address to,uint256 value,bytes data,uint8 operation,uint256 safeTxGas,uint256 baseGas,uint256 gasPrice,address gasToken,address refundReceiver,uint256 nonce)",
        );
        assert_eq!(computed.as_bytes(), &SAFE_TX_TYPEHASH);
    }

    #[test]
    fn test_hash_is_deterministic() {
        assert_eq!(sample().hash(CHAIN, &safe()), sample().hash(CHAIN, &safe()));
    }

    #[test]
    fn test_each_field_changes_hash() {
        let base = sample().hash(CHAIN, &safe());

        let mut other = sample();
        other.to = Address([0xd8; 20]);
        assert_ne!(other.hash(CHAIN, &safe()), base);

        let mut other = sample();
        other.value += 1;
        assert_ne!(other.hash(CHAIN, &safe()), base);

        let mut other = sample();
        other.data = vec![0x00];
        assert_ne!(other.hash(CHAIN, &safe()), base);

        let mut other = sample();
        other.nonce = 1;
        assert_ne!(other.hash(CHAIN, &safe()), base);
    }

    #[test]
    fn test_hash_is_domain_separated() {
        let base = sample().hash(CHAIN, &safe());
        assert_ne!(sample().hash(1, &safe()), base);
        assert_ne!(sample().hash(CHAIN, &Address([0x52; 20])), base);
    }

    #[test]
    fn test_json_shape() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["data"], "0x");
        assert_eq!(json["operation"], "call");
        assert_eq!(json["value"], "5000000000000000");

        // Optional fields fall back to defaults
        let minimal = serde_json::json!({
            "to": Address([0xd7; 20]).to_string(),
            "value": 5_000_000_000_000_000u64,
            "nonce": 0
        });
        let parsed: SafeTransactionData = serde_json::from_value(minimal).unwrap();
        assert_eq!(parsed, sample());
    }
}
