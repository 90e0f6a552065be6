//! Port traits for data repositories.
//!
//! These traits define the storage interface used by the domain layer.
//! Implementations live in the infrastructure layer (e.g., `chronicle-storage`).
//! Every method is scoped by the integer chain number from
//! [`ChainContext`](crate::models::ChainContext).

use async_trait::async_trait;

use crate::error::StorageResult;
use crate::models::{
    AccountSnapshot, Block, ChainDirectory, DerivedRecords, DeviceToken, GovernanceRecords,
    Proposal, Validator, ValidatorLedger,
};

use super::chain_client::FetchedHeight;

// =============================================================================
// Raw Rows
// =============================================================================

/// Row of `raw_block`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBlockRow {
    pub id: i64,
    pub chain_num: i32,
    pub height: u64,
    pub chunk: Vec<u8>,
}

/// Row of `raw_transaction`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTxRow {
    pub id: i64,
    pub chain_num: i32,
    pub height: u64,
    pub tx_hash: String,
    pub chunk: Vec<u8>,
}

// =============================================================================
// Repository Traits
// =============================================================================

/// Repository for refined block data.
#[async_trait]
pub trait BlockRepository: Send + Sync {
    /// Refined watermark: max height in `blocks`.
    async fn latest_height(&self, chain: i32) -> StorageResult<Option<u64>>;

    async fn get_block(&self, chain: i32, height: u64) -> StorageResult<Option<Block>>;
}

/// Repository for verbatim captured payloads.
#[async_trait]
pub trait RawRepository: Send + Sync {
    /// Raw watermark: max height in `raw_block`.
    async fn latest_height(&self, chain: i32) -> StorageResult<Option<u64>>;

    /// Raw blocks above `after_height`, in id order.
    async fn blocks_after(
        &self,
        chain: i32,
        after_height: u64,
        limit: i64,
    ) -> StorageResult<Vec<RawBlockRow>>;

    /// Raw transactions of one height, in id order.
    async fn txs_at(&self, chain: i32, height: u64) -> StorageResult<Vec<RawTxRow>>;

    /// First raw transaction id containing a message of `msg_type`.
    async fn first_tx_id_with_msg_type(&self, chain: i32, msg_type: &str)
    -> StorageResult<Option<i64>>;

    /// Next `limit` raw transactions containing `msg_type`, from `from_id` inclusive.
    async fn txs_with_msg_type_from(
        &self,
        chain: i32,
        msg_type: &str,
        from_id: i64,
        limit: i64,
    ) -> StorageResult<Vec<RawTxRow>>;
}

/// Repository for validators and their power ledger.
#[async_trait]
pub trait ValidatorRepository: Send + Sync {
    /// Tracked validators with their latest power event.
    async fn ledger(&self, chain: i32) -> StorageResult<ValidatorLedger>;

    async fn list(&self, chain: i32) -> StorageResult<Vec<Validator>>;

    /// Merge validators on operator address. Ids of existing rows are kept.
    async fn upsert(&self, chain: i32, validators: &[Validator]) -> StorageResult<()>;
}

/// Repository for governance records.
#[async_trait]
pub trait GovernanceRepository: Send + Sync {
    /// Merge proposals on id.
    async fn upsert_proposals(&self, chain: i32, proposals: &[Proposal]) -> StorageResult<()>;

    async fn get_proposal(&self, chain: i32, id: u64) -> StorageResult<Option<Proposal>>;

    /// Ids of stored proposals in deposit or voting period.
    async fn live_proposal_ids(&self, chain: i32) -> StorageResult<Vec<u64>>;
}

/// Repository for account snapshots and push tokens.
#[async_trait]
pub trait AccountRepository: Send + Sync {
    async fn upsert_snapshots(&self, chain: i32, snapshots: &[AccountSnapshot])
    -> StorageResult<()>;

    async fn get_snapshot(&self, chain: i32, address: &str)
    -> StorageResult<Option<AccountSnapshot>>;

    /// Registered push tokens for any of `addresses`.
    async fn device_tokens(&self, addresses: &[String]) -> StorageResult<Vec<DeviceToken>>;
}

/// Repository for the chain lookup table.
#[async_trait]
pub trait ChainRepository: Send + Sync {
    /// Chain number for `chain_id`, inserting a row on first sight.
    async fn ensure_chain(&self, chain_id: &str) -> StorageResult<i32>;

    async fn directory(&self) -> StorageResult<ChainDirectory>;
}

// =============================================================================
// Composite Repository
// =============================================================================

/// Everything written for one height.
#[derive(Debug, Clone, Copy)]
pub struct HeightBatch<'a> {
    pub chain_num: i32,
    /// Captured payload for the raw store. `None` in refine mode.
    pub raw: Option<&'a FetchedHeight>,
    /// Derived rows. `None` in raw mode.
    pub refined: Option<&'a DerivedRecords>,
}

/// What a height write actually inserted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistOutcome {
    /// Refined rows written. `false` when the block already existed.
    pub refined: bool,
    /// Raw rows written. `false` when the raw block already existed.
    pub raw: bool,
}

/// Combined repository access for the pipeline.
#[async_trait]
pub trait Repositories: Send + Sync {
    fn blocks(&self) -> &dyn BlockRepository;

    fn raw(&self) -> &dyn RawRepository;

    fn validators(&self) -> &dyn ValidatorRepository;

    fn governance(&self) -> &dyn GovernanceRepository;

    fn accounts(&self) -> &dyn AccountRepository;

    fn chains(&self) -> &dyn ChainRepository;

    /// Persist one height in a single transaction: refined rows, then raw rows.
    ///
    /// If any write fails, everything is rolled back. Replaying a height
    /// that is already present writes nothing.
    async fn persist_height_atomic(&self, batch: HeightBatch<'_>) -> StorageResult<PersistOutcome>;

    /// Persist governance records from a backfill in a single transaction.
    async fn persist_governance_atomic(
        &self,
        chain: i32,
        records: &GovernanceRecords,
    ) -> StorageResult<()>;
}
