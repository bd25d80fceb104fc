//! Execution dispatcher
//!
//! Submits ready envelopes to the ledger. The envelope's lock is held
//! from the status check until it is marked executed, so an envelope is
//! applied at most once no matter how many callers race on it.

use crate::crypto::{Address, H256};
use crate::ledger::Receipt;
use crate::safe::OwnerSignature;
use crate::service::error::ServiceError;
use crate::service::manager::TransactionService;
use crate::service::pending::{PendingTransaction, SignatureOutcome, TransactionStatus};
use std::sync::Arc;

/// Outcome of a confirmation passed through the dispatcher
#[derive(Clone, Debug)]
pub struct Confirmation {
    pub transaction: PendingTransaction,
    pub outcome: SignatureOutcome,
    /// Receipt when this confirmation triggered the execution
    pub execution: Option<Receipt>,
    /// Why an automatic execution attempt failed; the envelope stays open
    pub execution_error: Option<String>,
}

/// Drives envelopes from ready to executed
#[derive(Clone)]
pub struct Dispatcher {
    service: Arc<TransactionService>,
}

impl Dispatcher {
    pub fn new(service: Arc<TransactionService>) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &Arc<TransactionService> {
        &self.service
    }

    /// Execute a ready envelope on the ledger
    ///
    /// On success every other open envelope of the same Safe at or below
    /// the executed nonce is marked superseded.
    pub async fn execute(&self, safe_tx_hash: &H256, executor: Address) -> Result<Receipt, ServiceError> {
        let entry = self.service.transaction_entry(safe_tx_hash).await?;

        let (receipt, safe, nonce) = {
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

            if !pending.is_ready() {
                return Err(ServiceError::ThresholdNotMet {
                    have: pending.confirmation_count(),
                    need: pending.threshold,
                });
            }

            let signatures = pending.signatures();
            let receipt = {
                let mut ledger = self.service.ledger().write().await;
                ledger.execute_transaction(&pending.safe, &pending.data, &signatures, executor)?
            };

            pending.mark_executed(receipt.clone());
            (receipt, pending.safe, pending.data.nonce)
        };

        let superseded = self.service.supersede(&safe, nonce, safe_tx_hash).await;
        log::info!(
            "Executed {} in block {} ({} sibling(s) superseded)",
            safe_tx_hash,
            receipt.block_number,
            superseded
        );

        Ok(receipt)
    }

    /// Record a confirmation, executing the envelope when auto-execute is on
    /// and this confirmation made it ready
    pub async fn confirm(
        &self,
        safe_tx_hash: &H256,
        signature: OwnerSignature,
    ) -> Result<Confirmation, ServiceError> {
        let executor = signature.signer;
        let (transaction, outcome) = self
            .service
            .confirm_transaction(safe_tx_hash, signature)
            .await?;

        let mut confirmation = Confirmation {
            transaction,
            outcome,
            execution: None,
            execution_error: None,
        };

        if !self.service.config().auto_execute || !confirmation.transaction.is_ready() {
            return Ok(confirmation);
        }

        match self.execute(safe_tx_hash, executor).await {
            Ok(receipt) => {
                confirmation.execution = Some(receipt);
                confirmation.transaction = self.service.transaction(safe_tx_hash).await?;
            }
            // Lost the race to another confirmation
            Err(ServiceError::AlreadyExecuted(_)) => {
                confirmation.transaction = self.service.transaction(safe_tx_hash).await?;
            }
            Err(e) => {
                log::warn!("Automatic execution of {} failed: {}", safe_tx_hash, e);
                confirmation.execution_error = Some(e.to_string());
            }
        }

        Ok(confirmation)
    }
}
