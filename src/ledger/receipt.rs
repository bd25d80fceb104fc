//! Ledger transaction receipts and signed value transfers

use crate::crypto::{hex_bytes, keccak256_concat, Address, KeyError, KeyPair, H256};
use crate::ledger::units::wei_string;
use crate::safe::eip712::{word_u128, word_u64};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a ledger transaction did
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReceiptKind {
    /// A Safe was deployed
    Deployment { safe: Address },
    /// Test funds were minted
    Faucet,
    /// An owner key moved value
    Transfer,
    /// A Safe executed an envelope
    SafeExecution { safe: Address, safe_tx_hash: H256 },
}

/// Record of an applied ledger transaction
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Receipt {
    /// Ledger transaction id
    pub tx_hash: H256,
    pub block_number: u64,
    pub from: Address,
    pub to: Address,
    /// Value moved, in wei
    #[serde(with = "wei_string")]
    pub value: u128,
    pub kind: ReceiptKind,
    pub timestamp: DateTime<Utc>,
}

/// Value transfer from an owner key, authorized by that key's signature
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignedTransfer {
    pub from: Address,
    pub to: Address,
    #[serde(with = "wei_string")]
    pub value: u128,
    /// Sender's account nonce
    pub nonce: u64,
    #[serde(with = "hex_bytes")]
    pub signature: Vec<u8>,
}

impl SignedTransfer {
    /// Hash the sender signs
    pub fn signing_hash(chain_id: u64, from: &Address, to: &Address, value: u128, nonce: u64) -> H256 {
        keccak256_concat(&[
            b"transfer",
            &word_u64(chain_id),
            &from.to_word(),
            &to.to_word(),
            &word_u128(value),
            &word_u64(nonce),
        ])
    }

    /// Build and sign a transfer from `key_pair`
    pub fn sign(
        key_pair: &KeyPair,
        chain_id: u64,
        to: Address,
        value: u128,
        nonce: u64,
    ) -> Result<Self, KeyError> {
        let from = key_pair.address();
        let hash = Self::signing_hash(chain_id, &from, &to, value, nonce);
        let signature = key_pair.sign_hash(&hash)?;
        Ok(Self {
            from,
            to,
            value,
            nonce,
            signature: signature.to_vec(),
        })
    }

    pub fn hash(&self, chain_id: u64) -> H256 {
        Self::signing_hash(chain_id, &self.from, &self.to, self.value, self.nonce)
    }
}
