//! Storage layer for the Chronicle indexer.
//!
//! This crate provides PostgreSQL implementations of the repository traits
//! defined in `chronicle-core`. It handles connection pooling, migrations,
//! the raw capture store and the refined relational tables.
//!
//! # Architecture
//!
//! - [`postgres::Database`] - Connection pool management and purge
//! - [`postgres::PgRepositories`] - Composite repository with the atomic per-height write
//! - Individual repositories for blocks, raw captures, validators, governance,
//!   accounts and the chain lookup table
//!
//! # Usage
//!
//! ```ignore
//! use chronicle_storage::{Database, DatabaseConfig, PgRepositories};
//!
//! let config = DatabaseConfig::for_indexer(&database_url);
//! let db = Database::connect(&config).await?;
//! db.migrate().await?;
//!
//! let repositories = Arc::new(PgRepositories::new(Arc::new(db)));
//! ```

pub mod postgres;

pub use postgres::{Database, DatabaseConfig, PgRepositories, PurgeStats};
