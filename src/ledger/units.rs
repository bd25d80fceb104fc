//! Ether denomination helpers

use thiserror::Error;

/// 1 ether in wei
pub const WEI_PER_ETHER: u128 = 1_000_000_000_000_000_000;

/// Decimal places of the ether unit
pub const ETHER_DECIMALS: usize = 18;

/// Errors parsing a decimal ether amount
#[derive(Error, Debug, PartialEq, Eq)]
pub enum UnitsError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
    #[error("Too many decimals in {0}: at most 18")]
    TooPrecise(String),
    #[error("Amount overflows: {0}")]
    Overflow(String),
}

/// Parse a decimal ether amount ("0.06") into wei
pub fn parse_ether(amount: &str) -> Result<u128, UnitsError> {
    let s = amount.trim();
    let (whole, frac) = s.split_once('.').unwrap_or((s, ""));

    let is_digits = |part: &str| part.chars().all(|c| c.is_ascii_digit());
    if (whole.is_empty() && frac.is_empty()) || !is_digits(whole) || !is_digits(frac) {
        return Err(UnitsError::InvalidAmount(amount.to_string()));
    }

    if frac.len() > ETHER_DECIMALS {
        return Err(UnitsError::TooPrecise(amount.to_string()));
    }

    let overflow = || UnitsError::Overflow(amount.to_string());

    let whole_wei = if whole.is_empty() {
        0
    } else {
        whole
            .parse::<u128>()
            .map_err(|_| overflow())?
            .checked_mul(WEI_PER_ETHER)
            .ok_or_else(overflow)?
    };

    let frac_wei = if frac.is_empty() {
        0
    } else {
        format!("{:0<width$}", frac, width = ETHER_DECIMALS)
            .parse::<u128>()
            .map_err(|_| overflow())?
    };

    whole_wei.checked_add(frac_wei).ok_or_else(overflow)
}

/// Format wei as a decimal ether amount ("0.005")
pub fn format_ether(wei: u128) -> String {
    let whole = wei / WEI_PER_ETHER;
    let frac = wei % WEI_PER_ETHER;
    if frac == 0 {
        return format!("{}.0", whole);
    }
    let digits = format!("{:0width$}", frac, width = ETHER_DECIMALS);
    format!("{}.{}", whole, digits.trim_end_matches('0'))
}

/// Serde adapter carrying wei amounts as decimal strings
///
/// JSON numbers above 2^53 lose precision in most clients. Plain integers
/// are still accepted on input.
pub mod wei_string {
    use serde::{de, Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        deserializer.deserialize_any(WeiVisitor)
    }

    struct WeiVisitor;

    impl<'de> de::Visitor<'de> for WeiVisitor {
        type Value = u128;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a wei amount as a decimal string")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<u128, E> {
            if v.is_empty() || !v.bytes().all(|b| b.is_ascii_digit()) {
                return Err(E::invalid_value(de::Unexpected::Str(v), &self));
            }
            v.parse().map_err(|_| E::custom(format!("wei amount out of range: {}", v)))
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<u128, E> {
            Ok(v.into())
        }

        fn visit_u128<E: de::Error>(self, v: u128) -> Result<u128, E> {
            Ok(v)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Amount {
        #[serde(with = "wei_string")]
        value: u128,
    }

    #[test]
    fn test_wei_string_json() {
        let big = Amount { value: u128::MAX };
        let json = serde_json::to_string(&big).unwrap();
        assert_eq!(json, format!("{{\"value\":\"{}\"}}", u128::MAX));
        assert_eq!(serde_json::from_str::<Amount>(&json).unwrap(), big);

        let number: Amount = serde_json::from_str(r#"{"value":42}"#).unwrap();
        assert_eq!(number.value, 42);

        assert!(serde_json::from_str::<Amount>(r#"{"value":"-1"}"#).is_err());
        assert!(serde_json::from_str::<Amount>(r#"{"value":"0x10"}"#).is_err());
        assert!(serde_json::from_str::<Amount>(r#"{"value":"1e3"}"#).is_err());
    }

    #[test]
    fn test_parse_ether() {
        assert_eq!(parse_ether("0.06").unwrap(), 60_000_000_000_000_000);
        assert_eq!(parse_ether("0.005").unwrap(), 5_000_000_000_000_000);
        assert_eq!(parse_ether("1").unwrap(), WEI_PER_ETHER);
        assert_eq!(parse_ether(".5").unwrap(), WEI_PER_ETHER / 2);
        assert_eq!(parse_ether("0.000000000000000001").unwrap(), 1);
    }

    #[test]
    fn test_parse_ether_rejects() {
        assert!(matches!(parse_ether(""), Err(UnitsError::InvalidAmount(_))));
        assert!(matches!(parse_ether("1.2.3"), Err(UnitsError::InvalidAmount(_))));
        assert!(matches!(parse_ether("-1"), Err(UnitsError::InvalidAmount(_))));
        assert!(matches!(
            parse_ether("0.0000000000000000001"),
            Err(UnitsError::TooPrecise(_))
        ));
    }

    #[test]
    fn test_format_ether() {
        assert_eq!(format_ether(5_000_000_000_000_000), "0.005");
        assert_eq!(format_ether(2 * WEI_PER_ETHER), "2.0");
        assert_eq!(format_ether(parse_ether("0.055").unwrap()), "0.055");
    }
}
