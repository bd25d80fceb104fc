//! Fixed-size primitives shared by every module: 32-byte digests and
//! 20-byte account addresses, plus hex (de)serialization helpers.

use super::hash::keccak256;
use super::keys::KeyError;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A 32-byte digest (envelope hashes, message hashes, receipt ids)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct H256(pub [u8; 32]);

impl H256 {
    pub const ZERO: H256 = H256([0u8; 32]);

    /// Build from a slice that must be exactly 32 bytes long
    pub fn from_slice(bytes: &[u8]) -> Result<Self, KeyError> {
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| KeyError::InvalidHash(format!("expected 32 bytes, got {}", bytes.len())))?;
        Ok(Self(array))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for H256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for H256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for H256 {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = decode_prefixed(s).map_err(|_| KeyError::InvalidHash(s.to_string()))?;
        H256::from_slice(&bytes).map_err(|_| KeyError::InvalidHash(s.to_string()))
    }
}

/// A 20-byte account address
///
/// Displays in EIP-55 mixed-case checksum form. Parsing accepts all-lower
/// or all-upper hex as-is, but mixed-case input must carry a valid checksum.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub const ZERO: Address = Address([0u8; 20]);

    pub fn from_slice(bytes: &[u8]) -> Result<Self, KeyError> {
        let array: [u8; 20] = bytes.try_into().map_err(|_| {
            KeyError::InvalidAddress(format!("expected 20 bytes, got {}", bytes.len()))
        })?;
        Ok(Self(array))
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    /// Left-pad to a 32-byte ABI word
    pub fn to_word(&self) -> [u8; 32] {
        let mut word = [0u8; 32];
        word[12..].copy_from_slice(&self.0);
        word
    }

    /// EIP-55 checksummed representation
    pub fn to_checksum(&self) -> String {
        let lower = hex::encode(self.0);
        let hash = keccak256(lower.as_bytes());

        let mut out = String::with_capacity(42);
        out.push_str("0x");
        for (i, c) in lower.chars().enumerate() {
            let byte = hash.0[i / 2];
            let nibble = if i % 2 == 0 { byte >> 4 } else { byte & 0x0f };
            if c.is_ascii_alphabetic() && nibble >= 8 {
                out.push(c.to_ascii_uppercase());
            } else {
                out.push(c);
            }
        }
        out
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_checksum())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for Address {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let body = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        if body.len() != 40 {
            return Err(KeyError::InvalidAddress(s.to_string()));
        }

        let bytes = hex::decode(body).map_err(|_| KeyError::InvalidAddress(s.to_string()))?;
        let address = Address::from_slice(&bytes)?;

        let has_lower = body.chars().any(|c| c.is_ascii_lowercase());
        let has_upper = body.chars().any(|c| c.is_ascii_uppercase());
        if has_lower && has_upper && address.to_checksum()[2..] != *body {
            return Err(KeyError::InvalidAddress(format!("bad checksum: {}", s)));
        }

        Ok(address)
    }
}

macro_rules! string_serde {
    ($ty:ty, $expecting:literal) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse()
                    .map_err(|e| de::Error::custom(format!("{} ({})", $expecting, e)))
            }
        }
    };
}

string_serde!(H256, "expected a 0x-prefixed 32-byte hex string");
string_serde!(Address, "expected a 0x-prefixed 20-byte hex address");

/// Decode hex with or without a `0x` prefix
pub fn decode_prefixed(s: &str) -> Result<Vec<u8>, hex::FromHexError> {
    let body = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    hex::decode(body)
}

/// Encode bytes as `0x`-prefixed lowercase hex
pub fn encode_prefixed(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Serde adapter for `Vec<u8>` fields carried as `0x` hex strings
pub mod hex_bytes {
    use super::{decode_prefixed, encode_prefixed};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&encode_prefixed(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        decode_prefixed(&s).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_vector() {
        // Reference vector from EIP-55
        let text = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";
        let address: Address = text.parse().unwrap();
        assert_eq!(address.to_string(), text);

        let lower: Address = text.to_lowercase().parse().unwrap();
        assert_eq!(lower, address);
    }

    #[test]
    fn test_bad_checksum_rejected() {
        let tampered = "0x5aaeb6053F3E94C9b9A09f33669435E7Ef1BeAed";
        assert!(matches!(
            tampered.parse::<Address>(),
            Err(KeyError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_malformed_addresses() {
        // Too short, the kind of value a placeholder leaves behind
        assert!("0xD720205354C0b922666aAf6113C45eF8026a40".parse::<Address>().is_err());
        assert!("0xzz20205354c0b922666aaf6113c45ef8026a409e".parse::<Address>().is_err());
    }

    #[test]
    fn test_h256_serde() {
        let hash = keccak256(b"envelope");
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{}\"", hash));
        let back: H256 = serde_json::from_str(&json).unwrap();
        assert_eq!(back, hash);
    }

    #[test]
    fn test_address_word_padding() {
        let address = Address([0xab; 20]);
        let word = address.to_word();
        assert_eq!(&word[..12], &[0u8; 12]);
        assert_eq!(&word[12..], &[0xab; 20]);
    }
}
