//! Off-chain relay for proposed envelopes and Safe messages
//!
//! Each envelope and message lives behind its own lock, so signatures
//! for different items never wait on each other. Whenever both are held,
//! the item lock is taken before the ledger lock.

use crate::crypto::{Address, H256};
use crate::ledger::{Ledger, DEFAULT_CHAIN_ID};
use crate::safe::{OwnerSignature, SafeAccount, SafeError, SafeTransactionData};
use crate::service::error::ServiceError;
use crate::service::pending::{
    PendingMessage, PendingTransaction, SignatureOutcome, TransactionStatus,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Relay settings
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Chain id used in every typed-data domain
    pub chain_id: u64,
    /// Execute an envelope as soon as a confirmation makes it ready
    pub auto_execute: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            chain_id: DEFAULT_CHAIN_ID,
            auto_execute: false,
        }
    }
}

/// A proposal as submitted by an owner
#[derive(Clone, Debug)]
pub struct Proposal {
    pub safe: Address,
    pub data: SafeTransactionData,
    /// Hash the sender computed; must match the relay's own computation
    pub safe_tx_hash: H256,
    pub sender: Address,
    pub signature: OwnerSignature,
}

/// Serializable view of everything the relay holds
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceSnapshot {
    pub transactions: Vec<PendingTransaction>,
    pub messages: Vec<PendingMessage>,
}

type Entry<T> = Arc<Mutex<T>>;

/// Relay that collects owner signatures for envelopes and messages
pub struct TransactionService {
    config: ServiceConfig,
    ledger: Arc<RwLock<Ledger>>,
    transactions: RwLock<HashMap<H256, Entry<PendingTransaction>>>,
    messages: RwLock<HashMap<H256, Entry<PendingMessage>>>,
}

impl TransactionService {
    pub fn new(config: ServiceConfig, ledger: Arc<RwLock<Ledger>>) -> Self {
        Self {
            config,
            ledger,
            transactions: RwLock::new(HashMap::new()),
            messages: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn chain_id(&self) -> u64 {
        self.config.chain_id
    }

    pub fn ledger(&self) -> &Arc<RwLock<Ledger>> {
        &self.ledger
    }

    /// Current state of a Safe
    pub async fn safe_account(&self, safe: &Address) -> Result<SafeAccount, ServiceError> {
        self.ledger
            .read()
            .await
            .safe(safe)
            .cloned()
            .ok_or(ServiceError::SafeNotFound(*safe))
    }

    /// Submit an envelope with the proposer's signature
    ///
    /// Proposing an envelope that is already known merges the signature
    /// into the existing entry.
    pub async fn propose_transaction(
        &self,
        proposal: Proposal,
    ) -> Result<PendingTransaction, ServiceError> {
        let chain_id = self.chain_id();
        let safe = self.safe_account(&proposal.safe).await?;

        let expected = proposal.data.hash(chain_id, &proposal.safe);
        if expected != proposal.safe_tx_hash {
            return Err(SafeError::HashMismatch {
                expected,
                actual: proposal.safe_tx_hash,
            }
            .into());
        }
        if !safe.is_owner(&proposal.sender) {
            return Err(SafeError::NotAnOwner(proposal.sender).into());
        }
        if proposal.signature.signer != proposal.sender {
            return Err(ServiceError::SenderMismatch {
                sender: proposal.sender,
                signer: proposal.signature.signer,
            });
        }
        if proposal.data.nonce < safe.nonce {
            return Err(ServiceError::NonceTooLow {
                current: safe.nonce,
                got: proposal.data.nonce,
            });
        }

        let mut fresh =
            PendingTransaction::new(&safe, chain_id, proposal.data, proposal.sender);
        {
            let ledger = self.ledger.read().await;
            fresh.add_signature(proposal.signature.clone(), &safe, &*ledger, chain_id)?;
        }

        let existing = {
            let mut transactions = self.transactions.write().await;
            match transactions.get(&expected) {
                Some(entry) => Some(entry.clone()),
                None => {
                    transactions.insert(expected, Arc::new(Mutex::new(fresh.clone())));
                    None
                }
            }
        };

        match existing {
            None => {
                log::info!(
                    "Proposed {} for Safe {} (nonce {}, by {})",
                    expected,
                    fresh.safe,
                    fresh.data.nonce,
                    fresh.proposer
                );
                Ok(fresh)
            }
            Some(_) => {
                let (pending, _) = self
                    .confirm_transaction(&expected, proposal.signature)
                    .await?;
                Ok(pending)
            }
        }
    }

    /// Add an owner's confirmation to a known envelope
    pub async fn confirm_transaction(
        &self,
        safe_tx_hash: &H256,
        signature: OwnerSignature,
    ) -> Result<(PendingTransaction, SignatureOutcome), ServiceError> {
        let entry = self.transaction_entry(safe_tx_hash).await?;
        let mut pending = entry.lock().await;

        match pending.status {
            TransactionStatus::Executed => {
                return Err(ServiceError::AlreadyExecuted(*safe_tx_hash))
            }
            TransactionStatus::Superseded => {
                return Err(ServiceError::Superseded(*safe_tx_hash))
            }
            _ => {}
        }

        let signer = signature.signer;
        let outcome = {
            let ledger = self.ledger.read().await;
            let safe = ledger
                .safe(&pending.safe)
                .ok_or(ServiceError::SafeNotFound(pending.safe))?;
            pending.add_signature(signature, safe, &*ledger, self.chain_id())?
        };

        log::debug!(
            "Confirmation from {} on {}: {:?} ({}/{})",
            signer,
            safe_tx_hash,
            outcome,
            pending.confirmation_count(),
            pending.threshold
        );

        Ok((pending.clone(), outcome))
    }

    /// Look up an envelope by hash
    pub async fn transaction(&self, safe_tx_hash: &H256) -> Result<PendingTransaction, ServiceError> {
        let entry = self.transaction_entry(safe_tx_hash).await?;
        let pending = entry.lock().await;
        Ok(pending.clone())
    }

    /// Open envelopes for a Safe, ordered by nonce and then submission time
    pub async fn pending_transactions(
        &self,
        safe: &Address,
    ) -> Result<Vec<PendingTransaction>, ServiceError> {
        let current_nonce = self.safe_account(safe).await?.nonce;

        let mut pending: Vec<PendingTransaction> = self
            .transactions_for(safe)
            .await
            .into_iter()
            .filter(|tx| !tx.is_closed() && tx.data.nonce >= current_nonce)
            .collect();

        pending.sort_by(|a, b| {
            a.data
                .nonce
                .cmp(&b.data.nonce)
                .then(a.submitted_at.cmp(&b.submitted_at))
        });
        Ok(pending)
    }

    /// Every envelope ever proposed for a Safe, in no particular order
    pub async fn transactions_for(&self, safe: &Address) -> Vec<PendingTransaction> {
        let entries: Vec<Entry<PendingTransaction>> =
            self.transactions.read().await.values().cloned().collect();

        let mut result = Vec::new();
        for entry in entries {
            let pending = entry.lock().await;
            if pending.safe == *safe {
                result.push(pending.clone());
            }
        }
        result
    }

    pub(crate) async fn transaction_entry(
        &self,
        safe_tx_hash: &H256,
    ) -> Result<Entry<PendingTransaction>, ServiceError> {
        self.transactions
            .read()
            .await
            .get(safe_tx_hash)
            .cloned()
            .ok_or(ServiceError::TransactionNotFound(*safe_tx_hash))
    }

    /// Close every other open envelope of `safe` at or below `nonce`
    pub(crate) async fn supersede(&self, safe: &Address, nonce: u64, executed: &H256) -> usize {
        let entries: Vec<(H256, Entry<PendingTransaction>)> = self
            .transactions
            .read()
            .await
            .iter()
            .filter(|(hash, _)| *hash != executed)
            .map(|(hash, entry)| (*hash, entry.clone()))
            .collect();

        let mut count = 0;
        for (hash, entry) in entries {
            let mut pending = entry.lock().await;
            if pending.safe == *safe && !pending.is_closed() && pending.data.nonce <= nonce {
                pending.mark_superseded();
                log::info!("Envelope {} superseded by {}", hash, executed);
                count += 1;
            }
        }
        count
    }

    /// Start collecting signatures for an off-chain message
    ///
    /// A message already known for the Safe just gains the signature.
    pub async fn add_message(
        &self,
        safe: &Address,
        message: String,
        signature: OwnerSignature,
    ) -> Result<PendingMessage, ServiceError> {
        let chain_id = self.chain_id();
        let account = self.safe_account(safe).await?;

        let mut fresh = PendingMessage::new(&account, chain_id, message, signature.signer);
        {
            let ledger = self.ledger.read().await;
            fresh.add_signature(signature.clone(), &account, &*ledger, chain_id)?;
        }

        let hash = fresh.message_hash;
        let existing = {
            let mut messages = self.messages.write().await;
            match messages.get(&hash) {
                Some(entry) => Some(entry.clone()),
                None => {
                    messages.insert(hash, Arc::new(Mutex::new(fresh.clone())));
                    None
                }
            }
        };

        match existing {
            None => {
                log::info!("Message {} created for Safe {}", hash, safe);
                Ok(fresh)
            }
            Some(_) => Ok(self.add_message_signature(&hash, signature).await?.0),
        }
    }

    /// Add an owner's signature to a known message
    pub async fn add_message_signature(
        &self,
        message_hash: &H256,
        signature: OwnerSignature,
    ) -> Result<(PendingMessage, SignatureOutcome), ServiceError> {
        let entry = self.message_entry(message_hash).await?;
        let mut message = entry.lock().await;

        let outcome = {
            let ledger = self.ledger.read().await;
            let safe = ledger
                .safe(&message.safe)
                .ok_or(ServiceError::SafeNotFound(message.safe))?;
            message.add_signature(signature, safe, &*ledger, self.chain_id())?
        };

        log::debug!(
            "Message {} has {}/{} signatures",
            message_hash,
            message.confirmations.len(),
            message.threshold
        );

        Ok((message.clone(), outcome))
    }

    pub async fn message(&self, message_hash: &H256) -> Result<PendingMessage, ServiceError> {
        let entry = self.message_entry(message_hash).await?;
        let message = entry.lock().await;
        Ok(message.clone())
    }

    /// Messages for a Safe, oldest first
    pub async fn messages_for(&self, safe: &Address) -> Vec<PendingMessage> {
        let entries: Vec<Entry<PendingMessage>> =
            self.messages.read().await.values().cloned().collect();

        let mut result = Vec::new();
        for entry in entries {
            let message = entry.lock().await;
            if message.safe == *safe {
                result.push(message.clone());
            }
        }
        result.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        result
    }

    async fn message_entry(&self, message_hash: &H256) -> Result<Entry<PendingMessage>, ServiceError> {
        self.messages
            .read()
            .await
            .get(message_hash)
            .cloned()
            .ok_or(ServiceError::MessageNotFound(*message_hash))
    }

    /// Copy of all envelopes and messages
    pub async fn snapshot(&self) -> ServiceSnapshot {
        let tx_entries: Vec<Entry<PendingTransaction>> =
            self.transactions.read().await.values().cloned().collect();
        let msg_entries: Vec<Entry<PendingMessage>> =
            self.messages.read().await.values().cloned().collect();

        let mut snapshot = ServiceSnapshot::default();
        for entry in tx_entries {
            snapshot.transactions.push(entry.lock().await.clone());
        }
        for entry in msg_entries {
            snapshot.messages.push(entry.lock().await.clone());
        }
        snapshot
            .transactions
            .sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at));
        snapshot.messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        snapshot
    }

    /// Replace all envelopes and messages with a saved snapshot
    ///
    /// The snapshot may trail the ledger it was saved with. Open envelopes
    /// the ledger already executed are marked executed, and open envelopes
    /// below their Safe's nonce are marked superseded.
    pub async fn restore(&self, mut snapshot: ServiceSnapshot) {
        {
            let ledger = self.ledger.read().await;
            for tx in snapshot.transactions.iter_mut().filter(|tx| !tx.is_closed()) {
                if let Some(receipt) = ledger.execution_receipt(&tx.safe_tx_hash) {
                    tx.mark_executed(receipt.clone());
                } else if ledger
                    .safe(&tx.safe)
                    .is_some_and(|safe| tx.data.nonce < safe.nonce)
                {
                    tx.mark_superseded();
                }
            }
        }

        let transactions: HashMap<H256, Entry<PendingTransaction>> = snapshot
            .transactions
            .into_iter()
            .map(|tx| (tx.safe_tx_hash, Arc::new(Mutex::new(tx))))
            .collect();
        let messages: HashMap<H256, Entry<PendingMessage>> = snapshot
            .messages
            .into_iter()
            .map(|msg| (msg.message_hash, Arc::new(Mutex::new(msg))))
            .collect();

        log::info!(
            "Restored {} envelopes and {} messages",
            transactions.len(),
            messages.len()
        );
        *self.transactions.write().await = transactions;
        *self.messages.write().await = messages;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use crate::safe::{MessageStatus, SafeConfig};

    const CHAIN: u64 = 11155111;

    struct Fixture {
        service: TransactionService,
        safe: Address,
        keys: Vec<KeyPair>,
    }

    async fn setup() -> Fixture {
        let keys: Vec<KeyPair> = (0..3).map(|_| KeyPair::generate()).collect();
        let owners = keys.iter().map(|k| k.address()).collect();
        let config = SafeConfig::new(owners, 2, 0).unwrap();

        let mut ledger = Ledger::new(CHAIN);
        let receipt = ledger.deploy_safe(config, keys[0].address()).unwrap();
        let safe = match receipt.kind {
            crate::ledger::ReceiptKind::Deployment { safe } => safe,
            _ => panic!("expected deployment receipt"),
        };

        let service = TransactionService::new(
            ServiceConfig {
                chain_id: CHAIN,
                auto_execute: false,
            },
            Arc::new(RwLock::new(ledger)),
        );
        Fixture { service, safe, keys }
    }

    fn proposal(f: &Fixture, signer: usize, value: u128, nonce: u64) -> Proposal {
        let data = SafeTransactionData::call(Address([0xd7; 20]), value, vec![], nonce);
        let safe_tx_hash = data.hash(CHAIN, &f.safe);
        Proposal {
            safe: f.safe,
            data,
            safe_tx_hash,
            sender: f.keys[signer].address(),
            signature: OwnerSignature::sign(&f.keys[signer], &safe_tx_hash).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_propose_and_confirm() {
        let f = setup().await;
        let p = proposal(&f, 0, 5, 0);
        let hash = p.safe_tx_hash;

        let pending = f.service.propose_transaction(p).await.unwrap();
        assert_eq!(pending.confirmation_count(), 1);
        assert_eq!(pending.status, TransactionStatus::AwaitingConfirmations);

        let listed = f.service.pending_transactions(&f.safe).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].safe_tx_hash, hash);

        let sig = OwnerSignature::sign(&f.keys[1], &hash).unwrap();
        let (pending, outcome) = f.service.confirm_transaction(&hash, sig).await.unwrap();
        assert_eq!(outcome, SignatureOutcome::Added);
        assert_eq!(pending.status, TransactionStatus::Ready);
        assert_eq!(pending.signed_by().len(), 2);
    }

    #[tokio::test]
    async fn test_repropose_merges() {
        let f = setup().await;
        f.service.propose_transaction(proposal(&f, 0, 5, 0)).await.unwrap();
        let merged = f
            .service
            .propose_transaction(proposal(&f, 1, 5, 0))
            .await
            .unwrap();

        assert_eq!(merged.confirmation_count(), 2);
        assert_eq!(f.service.pending_transactions(&f.safe).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_proposal_rejections() {
        let f = setup().await;

        let mut bad_hash = proposal(&f, 0, 5, 0);
        bad_hash.safe_tx_hash = H256([1; 32]);
        assert!(matches!(
            f.service.propose_transaction(bad_hash).await,
            Err(ServiceError::Rejected(SafeError::HashMismatch { .. }))
        ));

        let mut stranger = proposal(&f, 0, 5, 0);
        let outsider = KeyPair::generate();
        stranger.sender = outsider.address();
        stranger.signature = OwnerSignature::sign(&outsider, &stranger.safe_tx_hash).unwrap();
        assert!(matches!(
            f.service.propose_transaction(stranger).await,
            Err(ServiceError::Rejected(SafeError::NotAnOwner(_)))
        ));

        let mut mismatch = proposal(&f, 0, 5, 0);
        mismatch.signature = OwnerSignature::sign(&f.keys[1], &mismatch.safe_tx_hash).unwrap();
        assert!(matches!(
            f.service.propose_transaction(mismatch).await,
            Err(ServiceError::SenderMismatch { .. })
        ));

        let mut missing = proposal(&f, 0, 5, 0);
        missing.safe = Address([0x99; 20]);
        assert!(matches!(
            f.service.propose_transaction(missing).await,
            Err(ServiceError::SafeNotFound(_))
        ));

        assert!(f.service.pending_transactions(&f.safe).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pending_ordered_by_nonce() {
        let f = setup().await;
        let later = proposal(&f, 0, 1, 1);
        let first = proposal(&f, 0, 2, 0);
        let second = proposal(&f, 1, 3, 0);

        f.service.propose_transaction(later.clone()).await.unwrap();
        f.service.propose_transaction(first.clone()).await.unwrap();
        f.service.propose_transaction(second.clone()).await.unwrap();

        let listed = f.service.pending_transactions(&f.safe).await.unwrap();
        let hashes: Vec<H256> = listed.iter().map(|tx| tx.safe_tx_hash).collect();
        assert_eq!(
            hashes,
            vec![first.safe_tx_hash, second.safe_tx_hash, later.safe_tx_hash]
        );
    }

    #[tokio::test]
    async fn test_unknown_transaction() {
        let f = setup().await;
        let sig = OwnerSignature::sign(&f.keys[0], &H256([7; 32])).unwrap();
        assert!(matches!(
            f.service.confirm_transaction(&H256([7; 32]), sig).await,
            Err(ServiceError::TransactionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_message_flow() {
        let f = setup().await;
        let text = "I'm the owner of this Safe account".to_string();
        let account = f.service.safe_account(&f.safe).await.unwrap();
        let draft = PendingMessage::new(&account, CHAIN, text.clone(), f.keys[0].address());

        let sig_a = OwnerSignature::sign(&f.keys[0], &draft.message_hash).unwrap();
        let created = f.service.add_message(&f.safe, text, sig_a).await.unwrap();
        assert_eq!(created.status(), MessageStatus::Pending);

        let sig_b = OwnerSignature::sign(&f.keys[1], &draft.message_hash).unwrap();
        let (message, outcome) = f
            .service
            .add_message_signature(&draft.message_hash, sig_b)
            .await
            .unwrap();
        assert_eq!(outcome, SignatureOutcome::Added);
        assert_eq!(message.status(), MessageStatus::Confirmed);
        assert!(message.prepared_signature().is_some());

        assert_eq!(f.service.messages_for(&f.safe).await.len(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_restore() {
        let f = setup().await;
        let p = proposal(&f, 0, 5, 0);
        let hash = p.safe_tx_hash;
        f.service.propose_transaction(p).await.unwrap();

        let snapshot = f.service.snapshot().await;
        let json = serde_json::to_string(&snapshot).unwrap();
        let decoded: ServiceSnapshot = serde_json::from_str(&json).unwrap();

        let other = TransactionService::new(f.service.config().clone(), f.service.ledger().clone());
        other.restore(decoded).await;

        let restored = other.transaction(&hash).await.unwrap();
        assert_eq!(restored.confirmation_count(), 1);
        assert_eq!(restored.data.value, 5);
    }

    #[tokio::test]
    async fn test_restore_catches_up_with_ledger() {
        let f = setup().await;
        let winner = proposal(&f, 0, 0, 0);
        let loser = proposal(&f, 1, 1, 0);
        let (winner_hash, loser_hash) = (winner.safe_tx_hash, loser.safe_tx_hash);
        let data = winner.data.clone();
        f.service.propose_transaction(winner).await.unwrap();
        f.service.propose_transaction(loser).await.unwrap();

        // Saved before the execution reached the envelopes
        let snapshot = f.service.snapshot().await;
        let signatures = vec![
            OwnerSignature::sign(&f.keys[0], &winner_hash).unwrap(),
            OwnerSignature::sign(&f.keys[1], &winner_hash).unwrap(),
        ];
        let receipt = f
            .service
            .ledger()
            .write()
            .await
            .execute_transaction(&f.safe, &data, &signatures, f.keys[0].address())
            .unwrap();

        let other = TransactionService::new(f.service.config().clone(), f.service.ledger().clone());
        other.restore(snapshot).await;

        let executed = other.transaction(&winner_hash).await.unwrap();
        assert_eq!(executed.status, TransactionStatus::Executed);
        assert_eq!(executed.execution.map(|r| r.tx_hash), Some(receipt.tx_hash));
        assert_eq!(
            other.transaction(&loser_hash).await.unwrap().status,
            TransactionStatus::Superseded
        );
        assert!(other.pending_transactions(&f.safe).await.unwrap().is_empty());
    }
}
