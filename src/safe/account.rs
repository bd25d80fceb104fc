//! Multi-signature account model
//!
//! A Safe is governed by N owner addresses and a threshold M: any action
//! needs signatures from at least M distinct owners.

use crate::crypto::{keccak256, keccak256_concat, Address, KeyError, H256};
use crate::safe::eip712::word_u64;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Proxy factory the deterministic deployment address is derived from
/// (Safe v1.4.1 `SafeProxyFactory`)
pub const PROXY_FACTORY: Address = Address([
    0x4e, 0x1d, 0xcf, 0x7a, 0xd4, 0xe4, 0x60, 0xcf, 0xd3, 0x07, 0x91, 0xcc, 0xc4, 0xf9, 0xc8,
    0xa4, 0xf8, 0x20, 0xec, 0x67,
]);

/// Singleton every proxy delegates to (Safe v1.4.1 `SafeL2`)
pub const SAFE_SINGLETON: Address = Address([
    0x29, 0xfc, 0xb4, 0x3b, 0x46, 0x53, 0x1b, 0xca, 0x00, 0x3d, 0xdc, 0x8f, 0xcb, 0x67, 0xff,
    0xe9, 0x19, 0x00, 0xc7, 0x62,
]);

/// Errors related to Safe accounts and their signatures
#[derive(Error, Debug)]
pub enum SafeError {
    #[error("Invalid threshold: {0}")]
    InvalidThreshold(String),
    #[error("A Safe needs at least one owner")]
    NoOwners,
    #[error("Duplicate owner: {0}")]
    DuplicateOwner(Address),
    #[error("Owner cannot be the zero address")]
    ZeroOwner,
    #[error("Signer is not an owner: {0}")]
    NotAnOwner(Address),
    #[error("Invalid signature from {signer}: {reason}")]
    InvalidSignature { signer: Address, reason: String },
    #[error("Hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: H256, actual: H256 },
    #[error("Malformed signature bytes: {0}")]
    MalformedSignature(String),
    #[error("Crypto error: {0}")]
    CryptoError(#[from] KeyError),
}

/// Owner set and threshold of a Safe, plus the salt used to deploy it
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SafeConfig {
    /// Owner addresses, in the order they were supplied
    pub owners: Vec<Address>,
    /// Minimum signatures required (M in M-of-N)
    pub threshold: u32,
    /// Salt making otherwise identical deployments land on distinct addresses
    #[serde(default)]
    pub salt_nonce: u64,
}

impl SafeConfig {
    /// Create a new Safe configuration
    ///
    /// # Errors
    /// Returns an error unless `1 <= threshold <= owners.len()` and the
    /// owners are distinct, non-zero addresses.
    pub fn new(owners: Vec<Address>, threshold: u32, salt_nonce: u64) -> Result<Self, SafeError> {
        if owners.is_empty() {
            return Err(SafeError::NoOwners);
        }

        if threshold == 0 {
            return Err(SafeError::InvalidThreshold(
                "threshold must be at least 1".to_string(),
            ));
        }

        if threshold as usize > owners.len() {
            return Err(SafeError::InvalidThreshold(format!(
                "threshold {} exceeds owner count {}",
                threshold,
                owners.len()
            )));
        }

        if owners.iter().any(Address::is_zero) {
            return Err(SafeError::ZeroOwner);
        }

        let mut sorted = owners.clone();
        sorted.sort();
        if let Some(pair) = sorted.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(SafeError::DuplicateOwner(pair[0]));
        }

        Ok(Self {
            owners,
            threshold,
            salt_nonce,
        })
    }

    /// Get the threshold (M)
    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Get the total owner count (N)
    pub fn owner_count(&self) -> usize {
        self.owners.len()
    }

    /// Check if an address is one of the owners
    pub fn is_owner(&self, address: &Address) -> bool {
        self.owners.contains(address)
    }

    /// Owners in ascending address order
    pub fn sorted_owners(&self) -> Vec<Address> {
        let mut sorted = self.owners.clone();
        sorted.sort();
        sorted
    }

    /// Get description like "2-of-3"
    pub fn description(&self) -> String {
        format!("{}-of-{}", self.threshold, self.owners.len())
    }
}

/// Compute the address a Safe with this configuration deploys to
///
/// CREATE2-style: `keccak(0xff || factory || salt || keccak(init_code))[12..]`
/// where the salt commits to the sorted owner set, the threshold and the
/// salt nonce. Owner order does not change the address.
pub fn predict_safe_address(config: &SafeConfig) -> Address {
    let mut initializer = Vec::with_capacity(64 + 32 * config.owners.len());
    initializer.extend_from_slice(&word_u64(config.threshold as u64));
    initializer.extend_from_slice(&word_u64(config.owners.len() as u64));
    for owner in config.sorted_owners() {
        initializer.extend_from_slice(&owner.to_word());
    }

    let salt = keccak256_concat(&[
        keccak256(&initializer).as_bytes(),
        &word_u64(config.salt_nonce),
    ]);
    let init_code_hash = keccak256_concat(&[b"SafeProxy", &SAFE_SINGLETON.to_word()]);

    let hash = keccak256_concat(&[
        &[0xff],
        PROXY_FACTORY.as_bytes(),
        salt.as_bytes(),
        init_code_hash.as_bytes(),
    ]);

    let mut address = [0u8; 20];
    address.copy_from_slice(&hash.0[12..]);
    Address(address)
}

/// A deployed Safe account
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SafeAccount {
    /// Deterministic account address
    pub address: Address,
    /// Owners and threshold
    pub config: SafeConfig,
    /// Number of executed transactions; the next envelope must carry this nonce
    pub nonce: u64,
    /// Who paid for the deployment
    pub deployer: Address,
    /// Deployment timestamp
    pub deployed_at: DateTime<Utc>,
}

impl SafeAccount {
    /// Materialize a fresh account for a validated configuration
    pub fn new(config: SafeConfig, deployer: Address) -> Self {
        Self {
            address: predict_safe_address(&config),
            config,
            nonce: 0,
            deployer,
            deployed_at: Utc::now(),
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn is_owner(&self, address: &Address) -> bool {
        self.config.is_owner(address)
    }

    pub fn threshold(&self) -> u32 {
        self.config.threshold
    }

    pub fn owners(&self) -> &[Address] {
        &self.config.owners
    }

    pub fn description(&self) -> String {
        self.config.description()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;

    fn sample_owners() -> Vec<Address> {
        (0..3).map(|_| KeyPair::generate().address()).collect()
    }

    #[test]
    fn test_config_creation() {
        let config = SafeConfig::new(sample_owners(), 2, 0).unwrap();

        assert_eq!(config.threshold(), 2);
        assert_eq!(config.owner_count(), 3);
        assert_eq!(config.description(), "2-of-3");
    }

    #[test]
    fn test_config_validation() {
        // Zero threshold
        assert!(matches!(
            SafeConfig::new(sample_owners(), 0, 0),
            Err(SafeError::InvalidThreshold(_))
        ));

        // Threshold > owners
        assert!(matches!(
            SafeConfig::new(sample_owners(), 4, 0),
            Err(SafeError::InvalidThreshold(_))
        ));

        assert!(matches!(SafeConfig::new(vec![], 1, 0), Err(SafeError::NoOwners)));

        let owner = KeyPair::generate().address();
        assert!(matches!(
            SafeConfig::new(vec![owner, owner], 1, 0),
            Err(SafeError::DuplicateOwner(_))
        ));

        assert!(matches!(
            SafeConfig::new(vec![owner, Address::ZERO], 1, 0),
            Err(SafeError::ZeroOwner)
        ));
    }

    #[test]
    fn test_every_threshold_in_range_is_valid() {
        let owners = sample_owners();
        for threshold in 1..=owners.len() as u32 {
            assert!(SafeConfig::new(owners.clone(), threshold, 0).is_ok());
        }
    }

    #[test]
    fn test_address_determinism() {
        let owners = sample_owners();
        let mut reversed = owners.clone();
        reversed.reverse();

        let a = predict_safe_address(&SafeConfig::new(owners.clone(), 2, 7).unwrap());
        let b = predict_safe_address(&SafeConfig::new(reversed, 2, 7).unwrap());
        assert_eq!(a, b);

        // Threshold and salt are part of the address
        let c = predict_safe_address(&SafeConfig::new(owners.clone(), 3, 7).unwrap());
        let d = predict_safe_address(&SafeConfig::new(owners, 2, 8).unwrap());
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn test_account_creation() {
        let owners = sample_owners();
        let deployer = owners[0];
        let account = SafeAccount::new(SafeConfig::new(owners.clone(), 2, 0).unwrap(), deployer);

        assert_eq!(account.nonce, 0);
        assert_eq!(account.threshold(), 2);
        assert!(account.is_owner(&owners[1]));
        assert!(!account.is_owner(&KeyPair::generate().address()));
        assert_eq!(account.address, predict_safe_address(&account.config));
    }
}
