//! Shared utilities for message decoding and derivation.
//!
//! This module provides common parsing and extraction functions used across
//! the derivation modules to avoid code duplication.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

// =============================================================================
// Field extraction
// =============================================================================

/// Extract a field from message data, trying several JSON pointers in order.
///
/// Message layouts differ between module versions (e.g. a v1beta1 proposal
/// keeps its title under `/content/title`, a v1 proposal under `/title`).
///
/// # Example
///
/// ```ignore
/// let title = extract_field(msg, &["/title", "/content/title"], parse_string);
/// ```
pub fn extract_field<T>(
    data: &Value,
    pointers: &[&str],
    parser: fn(&Value) -> Option<T>,
) -> Option<T> {
    pointers
        .iter()
        .filter_map(|p| data.pointer(p))
        .find_map(parser)
}

/// Parse a non-empty string.
pub fn parse_string(value: &Value) -> Option<String> {
    value
        .as_str()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

// =============================================================================
// Numeric parsing
// =============================================================================

/// Parse an amount (u128) from JSON.
///
/// Handles both numeric and string representations, which is important
/// because JSON numbers are limited to u64 but coin amounts are arbitrary
/// precision integers serialized as strings.
pub fn parse_amount(value: &Value) -> Option<u128> {
    match value {
        Value::Number(n) => n.as_u64().map(u128::from),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Parse a u64 from JSON.
pub fn parse_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Serde adapter for `uint64` fields, which the query gateway renders as strings.
pub fn deserialize_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    let value = Value::deserialize(deserializer)?;
    parse_u64(&value).ok_or_else(|| serde::de::Error::custom(format!("invalid uint64: {value}")))
}

// =============================================================================
// Governance enums
// =============================================================================

const VOTE_OPTIONS: [&str; 5] = [
    "VOTE_OPTION_UNSPECIFIED",
    "VOTE_OPTION_YES",
    "VOTE_OPTION_ABSTAIN",
    "VOTE_OPTION_NO",
    "VOTE_OPTION_NO_WITH_VETO",
];

/// Canonical vote option name from its enum name or number.
pub fn vote_option_name(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if VOTE_OPTIONS.contains(&s.as_str()) => Some(s.clone()),
        _ => parse_u64(value)
            .and_then(|n| VOTE_OPTIONS.get(n as usize))
            .map(|s| s.to_string()),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_field_first_pointer_wins() {
        let data = json!({"title": "v1 title", "content": {"title": "legacy"}});
        let title = extract_field(&data, &["/title", "/content/title"], parse_string);
        assert_eq!(title.as_deref(), Some("v1 title"));
    }

    #[test]
    fn test_extract_field_fallback_pointer() {
        let data = json!({"content": {"title": "legacy"}});
        let title = extract_field(&data, &["/title", "/content/title"], parse_string);
        assert_eq!(title.as_deref(), Some("legacy"));
    }

    #[test]
    fn test_extract_field_skips_empty_strings() {
        let data = json!({"title": "", "metadata": "ipfs://x"});
        let title = extract_field(&data, &["/title", "/metadata"], parse_string);
        assert_eq!(title.as_deref(), Some("ipfs://x"));
    }

    #[test]
    fn test_parse_amount_string() {
        assert_eq!(parse_amount(&json!("67890")), Some(67890));
        let large = "340282366920938463463374607431768211455"; // u128::MAX
        assert_eq!(parse_amount(&json!(large)), Some(u128::MAX));
        assert_eq!(parse_amount(&json!("12.5")), None);
    }

    #[test]
    fn test_parse_u64() {
        assert_eq!(parse_u64(&json!(12345)), Some(12345));
        assert_eq!(parse_u64(&json!("67890")), Some(67890));
        assert_eq!(parse_u64(&json!(null)), None);
    }

    #[test]
    fn test_vote_option_name() {
        assert_eq!(
            vote_option_name(&json!("VOTE_OPTION_NO")).as_deref(),
            Some("VOTE_OPTION_NO")
        );
        assert_eq!(
            vote_option_name(&json!(1)).as_deref(),
            Some("VOTE_OPTION_YES")
        );
        assert_eq!(vote_option_name(&json!("YES")), None);
    }

    #[test]
    fn test_deserialize_u64_accepts_strings() {
        #[derive(Deserialize)]
        struct Msg {
            #[serde(deserialize_with = "deserialize_u64")]
            proposal_id: u64,
        }
        let msg: Msg = serde_json::from_value(json!({"proposal_id": "42"})).unwrap();
        assert_eq!(msg.proposal_id, 42);
        assert!(serde_json::from_value::<Msg>(json!({"proposal_id": "x"})).is_err());
    }
}
