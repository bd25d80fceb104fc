//! Safe-Multisig: M-of-N multi-signature accounts in Rust
//!
//! This crate provides:
//! - secp256k1 identities with Ethereum-style addresses and signer recovery
//! - Safe accounts with owner sets, thresholds and deterministic addresses
//! - EIP-712 transaction hashes and EIP-191 message hashes
//! - Signature aggregation, including contract signatures from nested Safes
//! - An in-memory ledger that executes threshold-approved transactions once
//! - An off-chain relay (REST + WebSocket) collecting confirmations
//! - A retrying HTTP client for the relay
//!
//! # Example
//!
//! ```rust
//! use safe_multisig::crypto::KeyPair;
//! use safe_multisig::ledger::Ledger;
//! use safe_multisig::safe::{OwnerSignature, SafeConfig, SafeTransactionData};
//!
//! let keys: Vec<KeyPair> = (0..3).map(|_| KeyPair::generate()).collect();
//! let owners = keys.iter().map(|k| k.address()).collect();
//! let config = SafeConfig::new(owners, 2, 0).unwrap();
//!
//! let mut ledger = Ledger::new(11155111);
//! let safe = ledger.deploy_safe(config, keys[0].address()).unwrap().to;
//! ledger.credit(safe, 1_000).unwrap();
//!
//! let recipient = KeyPair::generate().address();
//! let tx = SafeTransactionData::call(recipient, 400, vec![], 0);
//! let hash = tx.hash(ledger.chain_id(), &safe);
//! let signatures = vec![
//!     OwnerSignature::sign(&keys[0], &hash).unwrap(),
//!     OwnerSignature::sign(&keys[1], &hash).unwrap(),
//! ];
//!
//! ledger
//!     .execute_transaction(&safe, &tx, &signatures, keys[0].address())
//!     .unwrap();
//! assert_eq!(ledger.balance_of(&recipient), 400);
//! ```

pub mod api;
pub mod cli;
pub mod client;
pub mod crypto;
pub mod ledger;
pub mod safe;
pub mod service;
pub mod storage;

// Re-export commonly used types
pub use api::{create_router, ApiState};
pub use client::{ClientError, RetryPolicy, ServiceClient};
pub use crypto::{Address, KeyPair, H256};
pub use ledger::{Ledger, LedgerError, Receipt};
pub use safe::{
    OwnerSignature, SafeAccount, SafeConfig, SafeDirectory, SafeError, SafeTransactionData,
};
pub use service::{Dispatcher, ErrorKind, ServiceConfig, ServiceError, TransactionService};
pub use storage::{Storage, StorageConfig};
