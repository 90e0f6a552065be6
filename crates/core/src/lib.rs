//! Core domain layer for the chronicle exporter.
//!
//! This crate contains the domain models, port traits (interfaces), and
//! pipeline services for the Cosmos chain indexer. It follows hexagonal
//! architecture principles - this is the innermost layer with no
//! dependencies on infrastructure.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    chronicle (binary)                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │ chronicle-handlers │ chronicle-cosmos │  chronicle-notify   │
//! │   (derivation)     │   (RPC + REST)   │   (push gateway)    │
//! ├────────────────────┴──────────────────┴─────────────────────┤
//! │                   chronicle-storage                         │
//! │                     (PostgreSQL)                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │                 chronicle-core  ← YOU ARE HERE              │
//! │               (models, ports, services)                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`models`] - Domain models (Block, Validator, MissBlock, Proposal, etc.)
//! - [`ports`] - Interface traits for adapters to implement
//! - [`services`] - Sync loop, refine stage, pollers and backfill
//! - [`error`] - Domain error types
//! - [`metrics`] - Prometheus metrics definitions
//!
//! # Key Concepts
//!
//! ## Ports
//!
//! - [`ports::ChainClient`] - Query a Cosmos node
//! - [`ports::Deriver`] - Turn a fetched height into refined rows
//! - [`ports::Repositories`] - Persist and query indexed data
//! - [`ports::TransferNotifier`] - Best-effort transfer notifications
//!
//! ## Height Lifecycle
//!
//! 1. Fetch block H, block H+1's commit, the validator set and every tx
//! 2. Derive block, uptime, power, governance and account records
//! 3. Write refined rows then the raw capture in one transaction
//! 4. Refresh touched accounts and dispatch notifications

pub mod error;
pub mod metrics;
pub mod models;
pub mod ports;
pub mod services;

#[cfg(any(test, feature = "testing"))]
pub mod testing;
