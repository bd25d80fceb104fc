//! Local ledger standing in for the network
//!
//! Deployments, balances, account nonces and Safe executions, with
//! receipts for every applied transaction.

pub mod ledger;
pub mod receipt;
pub mod units;

pub use ledger::{Ledger, LedgerError, RevertReason, DEFAULT_CHAIN_ID};
pub use receipt::{Receipt, ReceiptKind, SignedTransfer};
pub use units::{format_ether, parse_ether, wei_string, UnitsError, WEI_PER_ETHER};
