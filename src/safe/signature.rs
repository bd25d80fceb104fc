//! Owner signatures and their packed encoding
//!
//! An owner is either an externally owned key, which signs the hash with
//! ECDSA, or another Safe, which "signs" by carrying enough signatures from
//! its own owners (a contract signature).

use crate::crypto::{hex_bytes, recover_address, Address, KeyPair, H256, SIGNATURE_LENGTH};
use crate::safe::account::{SafeAccount, SafeError};
use crate::safe::eip712::word_u64;
use crate::safe::message::safe_message_hash;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Deepest chain of Safes owning Safes that verification will follow
pub const MAX_NESTING_DEPTH: usize = 4;

/// Resolves deployed Safes by address
pub trait SafeDirectory {
    fn safe(&self, address: &Address) -> Option<&SafeAccount>;
}

/// Raw signature material
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignatureKind {
    /// 65-byte `r || s || v` over the hash
    Ecdsa {
        #[serde(with = "hex_bytes")]
        data: Vec<u8>,
    },
    /// Packed signatures of the owning Safe's own owners
    Contract {
        #[serde(with = "hex_bytes")]
        data: Vec<u8>,
    },
}

/// A single signature from a Safe owner
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OwnerSignature {
    /// Owner the signature is attributed to
    pub signer: Address,
    pub kind: SignatureKind,
    /// When the signature was added
    pub signed_at: DateTime<Utc>,
}

impl OwnerSignature {
    /// Sign `hash` with an owner key
    pub fn sign(key_pair: &KeyPair, hash: &H256) -> Result<Self, SafeError> {
        let signature = key_pair.sign_hash(hash)?;
        Ok(Self::ecdsa(key_pair.address(), signature.to_vec()))
    }

    /// Sign on behalf of `nested_safe`, an owner of the Safe whose hash is
    /// `parent_hash`. The result is an inner signature for
    /// [`build_contract_signature`].
    pub fn sign_nested(
        key_pair: &KeyPair,
        chain_id: u64,
        nested_safe: &Address,
        parent_hash: &H256,
    ) -> Result<Self, SafeError> {
        let nested_hash = safe_message_hash(chain_id, nested_safe, parent_hash.as_bytes());
        Self::sign(key_pair, &nested_hash)
    }

    pub fn ecdsa(signer: Address, data: Vec<u8>) -> Self {
        Self {
            signer,
            kind: SignatureKind::Ecdsa { data },
            signed_at: Utc::now(),
        }
    }

    pub fn contract(signer: Address, data: Vec<u8>) -> Self {
        Self {
            signer,
            kind: SignatureKind::Contract { data },
            signed_at: Utc::now(),
        }
    }

    pub fn is_contract(&self) -> bool {
        matches!(self.kind, SignatureKind::Contract { .. })
    }

    /// Packed bytes of this signature alone
    pub fn to_bytes(&self) -> Vec<u8> {
        encode_signatures(std::slice::from_ref(self))
    }
}

/// Wrap signatures of `nested_safe`'s owners into one owner signature
pub fn build_contract_signature(nested_safe: Address, inner: &[OwnerSignature]) -> OwnerSignature {
    OwnerSignature::contract(nested_safe, encode_signatures(inner))
}

/// Pack signatures in the Safe format, sorted by signer address
///
/// ECDSA entries occupy 65 static bytes. Contract entries occupy 65 static
/// bytes (`r` = owner, `s` = offset of the dynamic part, `v` = 0) followed,
/// after all static entries, by `len || data`.
pub fn encode_signatures(signatures: &[OwnerSignature]) -> Vec<u8> {
    let mut sorted: Vec<&OwnerSignature> = signatures.iter().collect();
    sorted.sort_by_key(|s| s.signer);

    let static_len = sorted.len() * SIGNATURE_LENGTH;
    let mut static_part = Vec::with_capacity(static_len);
    let mut dynamic_part = Vec::new();

    for signature in sorted {
        match &signature.kind {
            SignatureKind::Ecdsa { data } => static_part.extend_from_slice(data),
            SignatureKind::Contract { data } => {
                let offset = static_len + dynamic_part.len();
                static_part.extend_from_slice(&signature.signer.to_word());
                static_part.extend_from_slice(&word_u64(offset as u64));
                static_part.push(0);

                dynamic_part.extend_from_slice(&word_u64(data.len() as u64));
                dynamic_part.extend_from_slice(data);
            }
        }
    }

    static_part.extend_from_slice(&dynamic_part);
    static_part
}

/// Unpack signatures produced by [`encode_signatures`]
///
/// ECDSA signers are recovered from `hash`, so the result is only
/// meaningful for the hash the bytes were produced over.
pub fn decode_signatures(hash: &H256, bytes: &[u8]) -> Result<Vec<OwnerSignature>, SafeError> {
    let mut signatures = Vec::new();
    let mut static_end = bytes.len();
    let mut pos = 0;

    while pos < static_end {
        let chunk = bytes
            .get(pos..pos + SIGNATURE_LENGTH)
            .ok_or_else(|| SafeError::MalformedSignature(format!("truncated at byte {}", pos)))?;

        match chunk[64] {
            0 => {
                if chunk[..12] != [0u8; 12] {
                    return Err(SafeError::MalformedSignature(
                        "contract owner word is not an address".to_string(),
                    ));
                }
                let signer = Address::from_slice(&chunk[12..32])?;
                let offset = read_word(&chunk[32..64])?;
                if offset < pos + SIGNATURE_LENGTH {
                    return Err(SafeError::MalformedSignature(format!(
                        "dynamic offset {} points into static part",
                        offset
                    )));
                }

                let out_of_range =
                    || SafeError::MalformedSignature(format!("offset {} out of range", offset));
                let data_start = offset.checked_add(32).ok_or_else(out_of_range)?;
                let len_word = bytes.get(offset..data_start).ok_or_else(out_of_range)?;
                let len = read_word(len_word)?;
                let truncated = || {
                    SafeError::MalformedSignature(format!("contract data of {} bytes truncated", len))
                };
                let data_end = data_start.checked_add(len).ok_or_else(truncated)?;
                let data = bytes.get(data_start..data_end).ok_or_else(truncated)?;

                static_end = static_end.min(offset);
                signatures.push(OwnerSignature::contract(signer, data.to_vec()));
            }
            27 | 28 => {
                let signer = recover_address(hash, chunk)?;
                signatures.push(OwnerSignature::ecdsa(signer, chunk.to_vec()));
            }
            v => {
                return Err(SafeError::MalformedSignature(format!(
                    "unsupported signature type v={}",
                    v
                )))
            }
        }

        pos += SIGNATURE_LENGTH;
    }

    Ok(signatures)
}

fn read_word(word: &[u8]) -> Result<usize, SafeError> {
    if word.len() != 32 || word[..24] != [0u8; 24] {
        return Err(SafeError::MalformedSignature(
            "length word out of range".to_string(),
        ));
    }
    let mut be = [0u8; 8];
    be.copy_from_slice(&word[24..]);
    usize::try_from(u64::from_be_bytes(be))
        .map_err(|_| SafeError::MalformedSignature("length word out of range".to_string()))
}

/// Check that `signature` is a valid owner signature over `hash` for `safe`
pub fn verify_owner_signature<D: SafeDirectory + ?Sized>(
    signature: &OwnerSignature,
    hash: &H256,
    safe: &SafeAccount,
    directory: &D,
    chain_id: u64,
) -> Result<(), SafeError> {
    verify_at_depth(signature, hash, safe, directory, chain_id, 0)
}

fn verify_at_depth<D: SafeDirectory + ?Sized>(
    signature: &OwnerSignature,
    hash: &H256,
    safe: &SafeAccount,
    directory: &D,
    chain_id: u64,
    depth: usize,
) -> Result<(), SafeError> {
    let signer = signature.signer;
    if !safe.is_owner(&signer) {
        return Err(SafeError::NotAnOwner(signer));
    }

    match &signature.kind {
        SignatureKind::Ecdsa { data } => {
            let recovered =
                recover_address(hash, data).map_err(|e| SafeError::InvalidSignature {
                    signer,
                    reason: e.to_string(),
                })?;
            if recovered != signer {
                return Err(SafeError::InvalidSignature {
                    signer,
                    reason: format!("recovers to {}", recovered),
                });
            }
        }
        SignatureKind::Contract { data } => {
            if depth >= MAX_NESTING_DEPTH {
                return Err(SafeError::InvalidSignature {
                    signer,
                    reason: "Safe ownership nested too deeply".to_string(),
                });
            }

            let nested = directory.safe(&signer).ok_or_else(|| SafeError::InvalidSignature {
                signer,
                reason: "owner is not a deployed Safe".to_string(),
            })?;

            let nested_hash = safe_message_hash(chain_id, &nested.address, hash.as_bytes());
            let inner = decode_signatures(&nested_hash, data).map_err(|e| {
                SafeError::InvalidSignature {
                    signer,
                    reason: e.to_string(),
                }
            })?;

            let mut approved = BTreeSet::new();
            for inner_signature in &inner {
                verify_at_depth(
                    inner_signature,
                    &nested_hash,
                    nested,
                    directory,
                    chain_id,
                    depth + 1,
                )
                .map_err(|e| SafeError::InvalidSignature {
                    signer,
                    reason: e.to_string(),
                })?;
                approved.insert(inner_signature.signer);
            }

            if approved.len() < nested.threshold() as usize {
                return Err(SafeError::InvalidSignature {
                    signer,
                    reason: format!(
                        "nested Safe has {} of {} required signatures",
                        approved.len(),
                        nested.threshold()
                    ),
                });
            }
        }
    }

    Ok(())
}
