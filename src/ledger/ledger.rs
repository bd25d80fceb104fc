//! In-process ledger
//!
//! Holds balances, account nonces and deployed Safes, and applies
//! deployments, transfers and Safe executions with the same checks the
//! Safe contract makes. A failed execution changes nothing.

use crate::crypto::{keccak256_concat, recover_address, Address, H256};
use crate::ledger::receipt::{Receipt, ReceiptKind, SignedTransfer};
use crate::safe::eip712::{word_u128, word_u64};
use crate::safe::{
    verify_owner_signature, Operation, OwnerSignature, SafeAccount, SafeConfig, SafeDirectory,
    SafeError, SafeTransactionData,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

/// Sepolia, the network the demo flows target
pub const DEFAULT_CHAIN_ID: u64 = 11155111;

/// Why a Safe execution was refused
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RevertReason {
    #[error("envelope nonce {got} does not match Safe nonce {expected}")]
    StaleNonce { expected: u64, got: u64 },
    #[error("{have} of {need} required signatures")]
    ThresholdNotMet { have: usize, need: u32 },
    #[error("duplicate signature from owner {0}")]
    DuplicateOwner(Address),
    #[error("invalid signature: {0}")]
    InvalidSignature(String),
    #[error("insufficient Safe balance: have {have}, need {need}")]
    InsufficientBalance { have: u128, need: u128 },
    #[error("delegate calls are not supported")]
    UnsupportedOperation,
    #[error("balance of {0} would overflow")]
    BalanceOverflow(Address),
}

/// Ledger errors
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Safe not found: {0}")]
    SafeNotFound(Address),
    #[error("Safe already deployed at {0}")]
    AlreadyDeployed(Address),
    #[error("Insufficient funds: have {have}, need {need}")]
    InsufficientFunds { have: u128, need: u128 },
    #[error("Stale account nonce: expected {expected}, got {got}")]
    StaleNonce { expected: u64, got: u64 },
    #[error("Invalid transfer signature: {0}")]
    InvalidTransferSignature(String),
    #[error("Execution reverted: {0}")]
    Reverted(RevertReason),
    #[error("Invalid Safe configuration: {0}")]
    InvalidConfig(#[from] SafeError),
    #[error("Balance of {0} would overflow")]
    BalanceOverflow(Address),
}

/// The ledger state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ledger {
    chain_id: u64,
    block_number: u64,
    balances: HashMap<Address, u128>,
    nonces: HashMap<Address, u64>,
    safes: HashMap<Address, SafeAccount>,
    receipts: HashMap<H256, Receipt>,
    executions: u64,
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new(DEFAULT_CHAIN_ID)
    }
}

impl Ledger {
    /// Create an empty ledger
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            block_number: 0,
            balances: HashMap::new(),
            nonces: HashMap::new(),
            safes: HashMap::new(),
            receipts: HashMap::new(),
            executions: 0,
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn block_number(&self) -> u64 {
        self.block_number
    }

    /// Number of Safe executions applied so far
    pub fn executions(&self) -> u64 {
        self.executions
    }

    pub fn balance_of(&self, address: &Address) -> u128 {
        self.balances.get(address).copied().unwrap_or(0)
    }

    /// Next nonce a transfer from `address` must carry
    pub fn nonce_of(&self, address: &Address) -> u64 {
        self.nonces.get(address).copied().unwrap_or(0)
    }

    pub fn safe(&self, address: &Address) -> Option<&SafeAccount> {
        self.safes.get(address)
    }

    pub fn safes(&self) -> Vec<&SafeAccount> {
        self.safes.values().collect()
    }

    /// Receipt of the execution of `safe_tx_hash`, if it ever ran
    pub fn execution_receipt(&self, safe_tx_hash: &H256) -> Option<&Receipt> {
        self.receipts.values().find(|receipt| {
            matches!(
                &receipt.kind,
                ReceiptKind::SafeExecution { safe_tx_hash: executed, .. } if executed == safe_tx_hash
            )
        })
    }

    /// Deploy a Safe at its deterministic address
    pub fn deploy_safe(
        &mut self,
        config: SafeConfig,
        deployer: Address,
    ) -> Result<Receipt, LedgerError> {
        // Re-validate: configs may arrive deserialized
        let config = SafeConfig::new(config.owners, config.threshold, config.salt_nonce)?;
        let account = SafeAccount::new(config, deployer);
        let address = account.address;

        if self.safes.contains_key(&address) {
            return Err(LedgerError::AlreadyDeployed(address));
        }

        log::info!(
            "Deployed {} Safe {} (deployer {})",
            account.description(),
            address,
            deployer
        );
        self.safes.insert(address, account);

        Ok(self.record(deployer, address, 0, ReceiptKind::Deployment { safe: address }))
    }

    /// Mint test funds
    pub fn credit(&mut self, address: Address, value: u128) -> Result<Receipt, LedgerError> {
        let balance = self
            .balance_of(&address)
            .checked_add(value)
            .ok_or(LedgerError::BalanceOverflow(address))?;
        self.balances.insert(address, balance);
        log::debug!("Credited {} wei to {}", value, address);
        Ok(self.record(Address::ZERO, address, value, ReceiptKind::Faucet))
    }

    /// Apply a signed value transfer
    pub fn transfer(&mut self, transfer: &SignedTransfer) -> Result<Receipt, LedgerError> {
        let hash = transfer.hash(self.chain_id);
        let signer = recover_address(&hash, &transfer.signature)
            .map_err(|e| LedgerError::InvalidTransferSignature(e.to_string()))?;
        if signer != transfer.from {
            return Err(LedgerError::InvalidTransferSignature(format!(
                "signed by {}, not {}",
                signer, transfer.from
            )));
        }

        let expected = self.nonce_of(&transfer.from);
        if transfer.nonce != expected {
            return Err(LedgerError::StaleNonce {
                expected,
                got: transfer.nonce,
            });
        }

        let have = self.balance_of(&transfer.from);
        if have < transfer.value {
            return Err(LedgerError::InsufficientFunds {
                have,
                need: transfer.value,
            });
        }

        self.move_funds(&transfer.from, transfer.to, transfer.value)?;
        *self.nonces.entry(transfer.from).or_insert(0) += 1;

        Ok(self.record(transfer.from, transfer.to, transfer.value, ReceiptKind::Transfer))
    }

    /// Execute an envelope from `safe` with the collected signatures
    ///
    /// Mirrors the Safe contract: the envelope nonce must equal the Safe
    /// nonce, every signature must come from a distinct owner and be valid
    /// for the envelope hash, and at least `threshold` must be present.
    /// On success the nonce is incremented, so the same envelope can never
    /// execute twice.
    pub fn execute_transaction(
        &mut self,
        safe: &Address,
        data: &SafeTransactionData,
        signatures: &[OwnerSignature],
        executor: Address,
    ) -> Result<Receipt, LedgerError> {
        let account = self
            .safes
            .get(safe)
            .ok_or(LedgerError::SafeNotFound(*safe))?;

        if data.operation != Operation::Call {
            return Err(LedgerError::Reverted(RevertReason::UnsupportedOperation));
        }

        if data.nonce != account.nonce {
            return Err(LedgerError::Reverted(RevertReason::StaleNonce {
                expected: account.nonce,
                got: data.nonce,
            }));
        }

        let safe_tx_hash = data.hash(self.chain_id, safe);
        self.check_signatures(account, &safe_tx_hash, signatures)?;

        let have = self.balance_of(safe);
        if have < data.value {
            return Err(LedgerError::Reverted(RevertReason::InsufficientBalance {
                have,
                need: data.value,
            }));
        }

        self.move_funds(safe, data.to, data.value)
            .map_err(|_| LedgerError::Reverted(RevertReason::BalanceOverflow(data.to)))?;
        if let Some(account) = self.safes.get_mut(safe) {
            account.nonce += 1;
        }
        self.executions += 1;

        log::info!(
            "Safe {} executed {} (nonce {}, executor {})",
            safe,
            safe_tx_hash,
            data.nonce,
            executor
        );

        Ok(self.record(
            *safe,
            data.to,
            data.value,
            ReceiptKind::SafeExecution {
                safe: *safe,
                safe_tx_hash,
            },
        ))
    }

    fn check_signatures(
        &self,
        account: &SafeAccount,
        hash: &H256,
        signatures: &[OwnerSignature],
    ) -> Result<(), LedgerError> {
        let mut seen = BTreeSet::new();
        for signature in signatures {
            if !seen.insert(signature.signer) {
                return Err(LedgerError::Reverted(RevertReason::DuplicateOwner(
                    signature.signer,
                )));
            }
            verify_owner_signature(signature, hash, account, self, self.chain_id)
                .map_err(|e| LedgerError::Reverted(RevertReason::InvalidSignature(e.to_string())))?;
        }

        if seen.len() < account.threshold() as usize {
            return Err(LedgerError::Reverted(RevertReason::ThresholdNotMet {
                have: seen.len(),
                need: account.threshold(),
            }));
        }

        Ok(())
    }

    /// Callers check that `from` holds at least `value`
    fn move_funds(&mut self, from: &Address, to: Address, value: u128) -> Result<(), LedgerError> {
        if *from == to {
            return Ok(());
        }
        let credited = self
            .balance_of(&to)
            .checked_add(value)
            .ok_or(LedgerError::BalanceOverflow(to))?;
        if let Some(balance) = self.balances.get_mut(from) {
            *balance -= value;
        }
        self.balances.insert(to, credited);
        Ok(())
    }

    fn record(&mut self, from: Address, to: Address, value: u128, kind: ReceiptKind) -> Receipt {
        self.block_number += 1;
        let tx_hash = keccak256_concat(&[
            &word_u64(self.chain_id),
            &word_u64(self.block_number),
            &from.to_word(),
            &to.to_word(),
            &word_u128(value),
        ]);

        let receipt = Receipt {
            tx_hash,
            block_number: self.block_number,
            from,
            to,
            value,
            kind,
            timestamp: Utc::now(),
        };
        self.receipts.insert(tx_hash, receipt.clone());
        receipt
    }
}

impl SafeDirectory for Ledger {
    fn safe(&self, address: &Address) -> Option<&SafeAccount> {
        self.safes.get(address)
    }
}
