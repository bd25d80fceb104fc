//! Safe multi-signature accounts
//!
//! M-of-N accounts whose transactions and messages are authorized by
//! owner signatures over a canonical, domain-separated hash.
//!
//! # Example
//!
//! ```
//! use safe_multisig::crypto::KeyPair;
//! use safe_multisig::safe::{OwnerSignature, SafeAccount, SafeConfig, SafeTransactionData};
//!
//! let keys: Vec<KeyPair> = (0..3).map(|_| KeyPair::generate()).collect();
//! let owners = keys.iter().map(|k| k.address()).collect();
//! let config = SafeConfig::new(owners, 2, 0).unwrap();
//! let safe = SafeAccount::new(config, keys[0].address());
//!
//! let tx = SafeTransactionData::call(keys[2].address(), 1_000, vec![], safe.nonce);
//! let hash = tx.hash(11155111, &safe.address);
//! let signature = OwnerSignature::sign(&keys[0], &hash).unwrap();
//! assert_eq!(signature.signer, keys[0].address());
//! ```

pub mod account;
pub mod eip712;
pub mod message;
pub mod signature;
pub mod transaction;

pub use account::{predict_safe_address, SafeAccount, SafeConfig, SafeError};
pub use message::{hash_safe_message, safe_message_hash, safe_text_message_hash, MessageStatus};
pub use signature::{
    build_contract_signature, decode_signatures, encode_signatures, verify_owner_signature,
    OwnerSignature, SafeDirectory, SignatureKind,
};
pub use transaction::{safe_tx_hash, Operation, SafeTransactionData};
