//! Cosmos chain adapter for the Chronicle indexer.
//!
//! This crate implements the [`ChainClient`] port from `chronicle-core`
//! against a CometBFT node and the Cosmos SDK query gateway.
//!
//! # Features
//!
//! - Blocks, last-commit signatures and evidence from `/block`
//! - Paginated consensus validator sets from `/validators`
//! - Transaction results, staking, governance, bank and distribution
//!   state from the REST gateway, optionally pinned to a height
//! - Transaction hashes computed locally from the block's raw tx bytes
//! - [`CosmosChunkDecoder`], decoding the captured responses back from the raw store
//!
//! # Usage
//!
//! ```ignore
//! use chronicle_cosmos::{CosmosClient, CosmosClientConfig};
//!
//! let client = CosmosClient::new(CosmosClientConfig {
//!     rpc_url: "http://localhost:26657".to_string(),
//!     api_url: "http://localhost:1317".to_string(),
//!     ..Default::default()
//! })?;
//!
//! let status = client.status().await?;
//! let block = client.get_block(status.latest_height - 1).await?;
//! ```
//!
//! [`ChainClient`]: chronicle_core::ports::ChainClient

mod client;
mod codec;
mod decoder;
mod query;
mod rpc;

pub use client::{CosmosClient, CosmosClientConfig};
pub use decoder::CosmosChunkDecoder;
