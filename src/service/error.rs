//! Relay service errors

use crate::crypto::{Address, H256};
use crate::ledger::LedgerError;
use crate::safe::SafeError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors returned by the relay service
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Safe not found: {0}")]
    SafeNotFound(Address),
    #[error("Transaction not found: {0}")]
    TransactionNotFound(H256),
    #[error("Message not found: {0}")]
    MessageNotFound(H256),
    #[error("Transaction {0} was already executed")]
    AlreadyExecuted(H256),
    #[error("Transaction {0} was superseded by another execution at its nonce")]
    Superseded(H256),
    #[error("Threshold not met: have {have}, need {need}")]
    ThresholdNotMet { have: usize, need: u32 },
    #[error("Nonce {got} is below the Safe nonce {current}")]
    NonceTooLow { current: u64, got: u64 },
    #[error("Signature is from {signer}, but the sender is {sender}")]
    SenderMismatch { sender: Address, signer: Address },
    #[error("Rejected: {0}")]
    Rejected(#[from] SafeError),
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

/// Coarse classification of a failure, shared with clients
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad signer, bad signature, bad parameters; fix the input
    MalformedInput,
    NotFound,
    /// Not enough signatures yet; the pending state is kept
    ThresholdUnmet,
    /// The ledger refused the transaction; the reason says why
    ExecutionReverted,
    /// The state already moved past this request
    Conflict,
    /// The service could not be reached or failed internally
    Unavailable,
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::SafeNotFound(_)
            | ServiceError::TransactionNotFound(_)
            | ServiceError::MessageNotFound(_) => ErrorKind::NotFound,
            ServiceError::AlreadyExecuted(_) | ServiceError::Superseded(_) => ErrorKind::Conflict,
            ServiceError::ThresholdNotMet { .. } => ErrorKind::ThresholdUnmet,
            ServiceError::NonceTooLow { .. }
            | ServiceError::SenderMismatch { .. }
            | ServiceError::Rejected(_) => ErrorKind::MalformedInput,
            ServiceError::Ledger(e) => match e {
                LedgerError::Reverted(_)
                | LedgerError::StaleNonce { .. }
                | LedgerError::InsufficientFunds { .. } => ErrorKind::ExecutionReverted,
                LedgerError::SafeNotFound(_) => ErrorKind::NotFound,
                LedgerError::AlreadyDeployed(_) => ErrorKind::Conflict,
                LedgerError::InvalidConfig(_)
                | LedgerError::InvalidTransferSignature(_)
                | LedgerError::BalanceOverflow(_) => ErrorKind::MalformedInput,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::RevertReason;

    #[test]
    fn test_kinds() {
        assert_eq!(
            ServiceError::ThresholdNotMet { have: 1, need: 2 }.kind(),
            ErrorKind::ThresholdUnmet
        );
        assert_eq!(
            ServiceError::Ledger(LedgerError::Reverted(RevertReason::StaleNonce {
                expected: 1,
                got: 0
            }))
            .kind(),
            ErrorKind::ExecutionReverted
        );
        assert_eq!(
            ServiceError::Rejected(SafeError::NotAnOwner(Address::ZERO)).kind(),
            ErrorKind::MalformedInput
        );
        assert_eq!(
            ServiceError::Ledger(LedgerError::BalanceOverflow(Address::ZERO)).kind(),
            ErrorKind::MalformedInput
        );
        assert_eq!(
            serde_json::to_string(&ErrorKind::ThresholdUnmet).unwrap(),
            "\"threshold_unmet\""
        );
    }
}
