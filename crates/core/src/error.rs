//! Error types for the exporter domain layer.
//!
//! This module defines a hierarchy of error types:
//!
//! - [`DomainError`] - Payload decoding and derivation errors
//! - [`StorageError`] - Database/repository errors
//! - [`ChainError`] - Node RPC and query gateway errors
//! - [`IndexerError`] - Top-level orchestration errors
//!
//! Error conversion is automatic via `From` implementations,
//! allowing `?` to work across error boundaries.

use thiserror::Error;

// =============================================================================
// Domain Errors
// =============================================================================

/// Decoding and derivation errors.
///
/// A `DomainError` raised for a single message is logged and the message is
/// skipped; raised for a whole payload it fails the height.
#[derive(Debug, Error)]
pub enum DomainError {
    /// Captured payload could not be decoded.
    #[error("Decoding error: {0}")]
    DecodingError(String),

    /// Message of a known type carried malformed fields.
    #[error("Invalid message {type_url}: {message}")]
    InvalidMessage {
        /// Type URL of the offending message.
        type_url: String,
        /// Error details.
        message: String,
    },

    /// Address failed bech32/hex validation.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Generic validation error.
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Storage operation failed.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

// =============================================================================
// Storage Errors
// =============================================================================

/// Database and repository errors.
///
/// These errors originate from storage operations like queries,
/// transactions, and data serialization.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Failed to establish database connection.
    #[error("Database connection error: {0}")]
    ConnectionError(String),

    /// SQL query execution failed.
    #[error("Query execution error: {0}")]
    QueryError(String),

    /// Requested record was not found.
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Database constraint was violated (unique, foreign key, etc.).
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Database migration failed.
    #[error("Migration error: {0}")]
    MigrationError(String),

    /// Transaction commit/rollback failed.
    #[error("Transaction error: {0}")]
    TransactionError(String),

    /// Data serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

// =============================================================================
// Chain Errors
// =============================================================================

/// Node connectivity and query errors.
///
/// Every variant is treated as transient by the sync loop: the height in
/// progress is retried after a fixed backoff.
#[derive(Debug, Error)]
pub enum ChainError {
    /// HTTP connection failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// JSON-RPC call returned an error object.
    #[error("RPC error: {0}")]
    RpcError(String),

    /// Query gateway answered with a non-success status.
    #[error("Query error ({status}) at {path}: {message}")]
    QueryError {
        /// HTTP status code.
        status: u16,
        /// Request path.
        path: String,
        /// Response body or error details.
        message: String,
    },

    /// Response body could not be decoded into the expected shape.
    #[error("Decode error: {0}")]
    DecodeError(String),

    /// Block at the given height is not available yet.
    #[error("Block not found at height {0}")]
    BlockNotFound(u64),

    /// Transaction result is not available.
    #[error("Transaction not found: {0}")]
    TxNotFound(String),

    /// One or more transaction fetches failed for a height.
    #[error("{failed} of {total} transaction fetches failed at height {height}")]
    TxFetchFailed {
        /// Height whose transactions were being resolved.
        height: u64,
        /// Number of failed fetches.
        failed: usize,
        /// Number of transactions in the block.
        total: usize,
    },
}

// =============================================================================
// Indexer Errors
// =============================================================================

/// Top-level orchestration errors.
///
/// This is the main error type returned by the services in
/// [`crate::services`]. It wraps all lower-level errors and adds
/// orchestration-specific variants.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// Domain logic error.
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// Storage/database error.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Node connectivity error.
    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Connected node serves a different chain than configured.
    ///
    /// This is a fatal error that requires manual intervention.
    #[error("Chain mismatch: connected to {connected} but configured for {expected}")]
    ChainMismatch {
        /// Chain id reported by the node.
        connected: String,
        /// Chain id from configuration.
        expected: String,
    },

    /// A height could not be processed and cannot be retried in place.
    #[error("Height {height} failed: {reason}")]
    HeightFailed {
        /// Height that failed.
        height: u64,
        /// Failure details.
        reason: String,
    },

    /// Graceful shutdown was requested.
    ///
    /// This is not really an error but uses the error type for control flow.
    #[error("Indexer shutdown requested")]
    ShutdownRequested,

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for indexer operations.
pub type IndexerResult<T> = Result<T, IndexerError>;

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type for chain operations.
pub type ChainResult<T> = Result<T, ChainError>;
