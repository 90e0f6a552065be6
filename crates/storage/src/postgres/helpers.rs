//! Shared helper functions for PostgreSQL row conversion.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use chronicle_core::error::{StorageError, StorageResult};

pub fn query_error(e: sqlx::Error) -> StorageError {
    StorageError::QueryError(e.to_string())
}

pub fn transaction_error(e: sqlx::Error) -> StorageError {
    StorageError::TransactionError(e.to_string())
}

/// Convert a `BIGINT` height or id back to `u64`.
///
/// Negative values never come out of the writer, so one indicates corruption.
pub fn to_u64(value: i64, field_name: &str) -> StorageResult<u64> {
    u64::try_from(value).map_err(|_| {
        StorageError::SerializationError(format!("{field_name} is negative: {value}"))
    })
}

/// Encode a value for a `JSONB` column.
pub fn to_json<T: Serialize>(value: &T, field_name: &str) -> StorageResult<Value> {
    serde_json::to_value(value)
        .map_err(|e| StorageError::SerializationError(format!("{field_name}: {e}")))
}

/// Decode a `JSONB` column.
pub fn from_json<T: DeserializeOwned>(value: Value, field_name: &str) -> StorageResult<T> {
    serde_json::from_value(value)
        .map_err(|e| StorageError::SerializationError(format!("{field_name}: {e}")))
}
