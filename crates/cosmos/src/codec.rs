//! Decoding helpers shared by the RPC and gateway types.
//!
//! Both endpoints encode 64-bit integers as JSON strings, but not
//! consistently, so every numeric field goes through [`number`].

use std::fmt::Display;
use std::str::FromStr;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::de::{self, DeserializeOwned, Deserializer};
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use chronicle_core::error::{ChainError, ChainResult};

/// A node response decoded alongside the JSON it came from.
///
/// The JSON is what the raw store keeps.
#[derive(Debug)]
pub(crate) struct Captured<T> {
    pub(crate) value: T,
    pub(crate) source: Value,
}

impl<T: DeserializeOwned> Captured<T> {
    pub(crate) fn from_source(source: Value) -> Result<Self, serde_json::Error> {
        let value = T::deserialize(&source)?;
        Ok(Self { value, source })
    }
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for Captured<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let source = Value::deserialize(deserializer)?;
        Self::from_source(source).map_err(de::Error::custom)
    }
}

/// Deserialize an integer sent either as a JSON number or a string.
pub(crate) fn number<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: Display,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => s.parse().map_err(de::Error::custom),
        Value::Number(n) => n.to_string().parse().map_err(de::Error::custom),
        other => Err(de::Error::custom(format!("expected integer, got {other}"))),
    }
}

/// Integer value of a loosely typed JSON field.
pub(crate) fn int_of<T: FromStr>(value: &Value) -> Option<T> {
    match value {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.to_string().parse().ok(),
        _ => None,
    }
}

/// Drop the zero timestamps both endpoints use for "not set".
pub(crate) fn set_time(time: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    time.filter(|t| *t > DateTime::<Utc>::UNIX_EPOCH)
}

/// Transaction hash as the node reports it: upper-case hex SHA-256 of the raw bytes.
pub(crate) fn tx_hash(encoded: &str) -> ChainResult<String> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| ChainError::DecodeError(format!("tx bytes: {e}")))?;
    Ok(hex::encode_upper(Sha256::digest(&bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Deserialize)]
    struct Height {
        #[serde(deserialize_with = "number")]
        height: u64,
    }

    #[test]
    fn number_accepts_strings_and_numbers() {
        let a: Height = serde_json::from_value(json!({"height": "42"})).unwrap();
        let b: Height = serde_json::from_value(json!({"height": 42})).unwrap();
        assert_eq!(a.height, 42);
        assert_eq!(b.height, 42);
        assert!(serde_json::from_value::<Height>(json!({"height": null})).is_err());
    }

    // Test critique: le hash doit correspondre à celui indexé par le noeud
    #[test]
    fn tx_hash_is_upper_hex_sha256() {
        assert_eq!(
            tx_hash("").unwrap(),
            "E3B0C44298FC1C149AFBF4C8996FB92427AE41E4649B934CA495991B7852B855"
        );
        assert!(matches!(tx_hash("%%%"), Err(ChainError::DecodeError(_))));
    }

    #[test]
    fn zero_time_is_unset() {
        let zero = "0001-01-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        assert_eq!(set_time(Some(zero)), None);
        let real = "2024-03-01T10:00:00Z".parse::<DateTime<Utc>>().unwrap();
        assert_eq!(set_time(Some(real)), Some(real));
    }
}
