//! Pending envelopes and messages awaiting owner signatures
//!
//! Signatures are keyed by owner, so a second signature from the same
//! owner never counts toward the threshold twice.

use crate::crypto::{Address, H256};
use crate::ledger::Receipt;
use crate::safe::{
    encode_signatures, safe_text_message_hash, verify_owner_signature, MessageStatus,
    OwnerSignature, SafeAccount, SafeDirectory, SafeError, SafeTransactionData,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Result of offering a signature to a pending item
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureOutcome {
    /// Counted toward the threshold
    Added,
    /// This owner had already signed; nothing changed
    Duplicate,
}

/// Owner-keyed set of validated signatures over one hash
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Confirmations {
    signatures: BTreeMap<Address, OwnerSignature>,
}

impl Confirmations {
    /// Validate `signature` against `hash` and insert it once per owner
    pub fn add<D: SafeDirectory + ?Sized>(
        &mut self,
        signature: OwnerSignature,
        hash: &H256,
        safe: &SafeAccount,
        directory: &D,
        chain_id: u64,
    ) -> Result<SignatureOutcome, SafeError> {
        verify_owner_signature(&signature, hash, safe, directory, chain_id)?;

        if self.signatures.contains_key(&signature.signer) {
            return Ok(SignatureOutcome::Duplicate);
        }

        self.signatures.insert(signature.signer, signature);
        Ok(SignatureOutcome::Added)
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }

    pub fn contains(&self, owner: &Address) -> bool {
        self.signatures.contains_key(owner)
    }

    /// Owners that have signed, ascending
    pub fn signers(&self) -> Vec<Address> {
        self.signatures.keys().copied().collect()
    }

    pub fn signatures(&self) -> Vec<OwnerSignature> {
        self.signatures.values().cloned().collect()
    }

    /// Packed signature bytes, ready for the ledger or an off-chain verifier
    pub fn encoded(&self) -> Vec<u8> {
        encode_signatures(&self.signatures())
    }
}

/// Lifecycle of a proposed envelope
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Waiting for more confirmations
    AwaitingConfirmations,
    /// Threshold reached, eligible for execution
    Ready,
    /// Applied on the ledger
    Executed,
    /// Another envelope with the same nonce executed first
    Superseded,
}

/// A proposed envelope and the confirmations collected for it
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PendingTransaction {
    pub safe: Address,
    pub safe_tx_hash: H256,
    pub data: SafeTransactionData,
    pub proposer: Address,
    pub confirmations: Confirmations,
    /// Threshold of the Safe when proposed
    pub threshold: u32,
    pub status: TransactionStatus,
    pub submitted_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    /// Ledger receipt once executed
    pub execution: Option<Receipt>,
}

impl PendingTransaction {
    pub fn new(
        safe: &SafeAccount,
        chain_id: u64,
        data: SafeTransactionData,
        proposer: Address,
    ) -> Self {
        let now = Utc::now();
        Self {
            safe: safe.address,
            safe_tx_hash: data.hash(chain_id, &safe.address),
            data,
            proposer,
            confirmations: Confirmations::default(),
            threshold: safe.threshold(),
            status: TransactionStatus::AwaitingConfirmations,
            submitted_at: now,
            modified_at: now,
            execution: None,
        }
    }

    /// Add a confirmation from an owner
    pub fn add_signature<D: SafeDirectory + ?Sized>(
        &mut self,
        signature: OwnerSignature,
        safe: &SafeAccount,
        directory: &D,
        chain_id: u64,
    ) -> Result<SignatureOutcome, SafeError> {
        let outcome =
            self.confirmations
                .add(signature, &self.safe_tx_hash, safe, directory, chain_id)?;

        if outcome == SignatureOutcome::Added {
            self.modified_at = Utc::now();
            if self.status == TransactionStatus::AwaitingConfirmations && self.is_ready() {
                self.status = TransactionStatus::Ready;
            }
        }

        Ok(outcome)
    }

    pub fn confirmation_count(&self) -> usize {
        self.confirmations.len()
    }

    /// Check if the envelope has enough confirmations
    pub fn is_ready(&self) -> bool {
        self.confirmations.len() >= self.threshold as usize
    }

    /// Executed or superseded
    pub fn is_closed(&self) -> bool {
        matches!(
            self.status,
            TransactionStatus::Executed | TransactionStatus::Superseded
        )
    }

    pub fn signed_by(&self) -> Vec<Address> {
        self.confirmations.signers()
    }

    pub fn signatures(&self) -> Vec<OwnerSignature> {
        self.confirmations.signatures()
    }

    pub fn mark_executed(&mut self, receipt: Receipt) {
        self.status = TransactionStatus::Executed;
        self.execution = Some(receipt);
        self.modified_at = Utc::now();
    }

    pub fn mark_superseded(&mut self) {
        self.status = TransactionStatus::Superseded;
        self.modified_at = Utc::now();
    }
}

/// An off-chain message collecting owner signatures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PendingMessage {
    pub safe: Address,
    /// Original text
    pub message: String,
    /// `SafeMessage` hash owners sign
    pub message_hash: H256,
    pub proposer: Address,
    pub confirmations: Confirmations,
    pub threshold: u32,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl PendingMessage {
    pub fn new(safe: &SafeAccount, chain_id: u64, message: String, proposer: Address) -> Self {
        let now = Utc::now();
        Self {
            safe: safe.address,
            message_hash: safe_text_message_hash(chain_id, &safe.address, &message),
            message,
            proposer,
            confirmations: Confirmations::default(),
            threshold: safe.threshold(),
            created_at: now,
            modified_at: now,
        }
    }

    pub fn add_signature<D: SafeDirectory + ?Sized>(
        &mut self,
        signature: OwnerSignature,
        safe: &SafeAccount,
        directory: &D,
        chain_id: u64,
    ) -> Result<SignatureOutcome, SafeError> {
        let outcome =
            self.confirmations
                .add(signature, &self.message_hash, safe, directory, chain_id)?;
        if outcome == SignatureOutcome::Added {
            self.modified_at = Utc::now();
        }
        Ok(outcome)
    }

    pub fn status(&self) -> MessageStatus {
        if self.confirmations.len() >= self.threshold as usize {
            MessageStatus::Confirmed
        } else {
            MessageStatus::Pending
        }
    }

    /// Packed signatures once the message is confirmed
    pub fn prepared_signature(&self) -> Option<Vec<u8>> {
        match self.status() {
            MessageStatus::Confirmed => Some(self.confirmations.encoded()),
            MessageStatus::Pending => None,
        }
    }
}
