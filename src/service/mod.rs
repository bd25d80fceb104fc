//! Relay service: signature collection and execution
//!
//! [`TransactionService`] stores proposed envelopes and messages and
//! gathers owner signatures for them. [`Dispatcher`] applies ready
//! envelopes to the ledger exactly once.

pub mod dispatcher;
pub mod error;
pub mod manager;
pub mod pending;

pub use dispatcher::{Confirmation, Dispatcher};
pub use error::{ErrorKind, ServiceError};
pub use manager::{Proposal, ServiceConfig, ServiceSnapshot, TransactionService};
pub use pending::{
    Confirmations, PendingMessage, PendingTransaction, SignatureOutcome, TransactionStatus,
};
