//! PostgreSQL storage adapter.
//!
//! This module implements the repository traits defined in `chronicle-core`
//! using PostgreSQL as the backing store.
//!
//! # Architecture
//!
//! - [`Database`] - Connection pool and migrations
//! - [`PgRepositories`] - Composite repository implementing `Repositories` trait
//! - Individual repos: `PgBlockRepository`, `PgRawRepository`, etc.
//!
//! # Usage
//!
//! ```ignore
//! let config = DatabaseConfig::for_indexer(&database_url);
//! let db = Database::connect(&config).await?;
//! db.migrate().await?;
//!
//! let repositories = PgRepositories::new(Arc::new(db));
//! ```

mod account_repo;
mod block_repo;
mod chain_repo;
mod database;
mod governance_repo;
mod helpers;
mod raw_repo;
mod validator_repo;

pub use account_repo::PgAccountRepository;
pub use block_repo::PgBlockRepository;
pub use chain_repo::PgChainRepository;
pub use database::{Database, DatabaseConfig, PurgeStats};
pub use governance_repo::PgGovernanceRepository;
pub use raw_repo::PgRawRepository;
pub use validator_repo::PgValidatorRepository;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgConnection;
use tracing::{debug, trace};

use chronicle_core::error::{StorageError, StorageResult};
use chronicle_core::models::{DerivedRecords, GovernanceRecords, MissDetail};
use chronicle_core::ports::{
    AccountRepository, BlockRepository, ChainRepository, FetchedHeight, GovernanceRepository,
    HeightBatch, PersistOutcome, RawRepository, Repositories, ValidatorRepository,
};

use helpers::{query_error, transaction_error};

// =============================================================================
// Composite Repository
// =============================================================================

/// Aggregated PostgreSQL repositories implementing the `Repositories` trait.
///
/// This provides a single entry point for all storage operations and
/// implements atomic transactions that span multiple tables.
pub struct PgRepositories {
    db: Arc<Database>,
    blocks: PgBlockRepository,
    raw: PgRawRepository,
    validators: PgValidatorRepository,
    governance: PgGovernanceRepository,
    accounts: PgAccountRepository,
    chains: PgChainRepository,
}

impl PgRepositories {
    /// Create a new repository aggregate from a database connection.
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            blocks: PgBlockRepository::new(&db),
            raw: PgRawRepository::new(&db),
            validators: PgValidatorRepository::new(&db),
            governance: PgGovernanceRepository::new(&db),
            accounts: PgAccountRepository::new(&db),
            chains: PgChainRepository::new(&db),
            db,
        }
    }
}

#[async_trait]
impl Repositories for PgRepositories {
    fn blocks(&self) -> &dyn BlockRepository {
        &self.blocks
    }

    fn raw(&self) -> &dyn RawRepository {
        &self.raw
    }

    fn validators(&self) -> &dyn ValidatorRepository {
        &self.validators
    }

    fn governance(&self) -> &dyn GovernanceRepository {
        &self.governance
    }

    fn accounts(&self) -> &dyn AccountRepository {
        &self.accounts
    }

    fn chains(&self) -> &dyn ChainRepository {
        &self.chains
    }

    async fn persist_height_atomic(&self, batch: HeightBatch<'_>) -> StorageResult<PersistOutcome> {
        let mut tx = self.db.pool().begin().await.map_err(transaction_error)?;
        let mut outcome = PersistOutcome::default();

        if let Some(records) = batch.refined {
            outcome.refined = write_refined(&mut tx, batch.chain_num, records).await?;
        }
        if let Some(fetched) = batch.raw {
            outcome.raw = write_raw(&mut tx, batch.chain_num, fetched).await?;
        }

        tx.commit().await.map_err(transaction_error)?;
        Ok(outcome)
    }

    async fn persist_governance_atomic(
        &self,
        chain: i32,
        records: &GovernanceRecords,
    ) -> StorageResult<()> {
        let mut tx = self.db.pool().begin().await.map_err(transaction_error)?;
        governance_repo::write_governance(&mut tx, chain, records).await?;
        tx.commit().await.map_err(transaction_error)?;
        Ok(())
    }
}

// =============================================================================
// Height Writers
// =============================================================================

/// Write every refined row of one height.
///
/// The block row goes first; if it already exists the height was committed
/// before and nothing else is written.
async fn write_refined(
    conn: &mut PgConnection,
    chain: i32,
    records: &DerivedRecords,
) -> StorageResult<bool> {
    let block = &records.block;
    let inserted = sqlx::query(
        r#"
        INSERT INTO blocks (chain_id, height, hash, proposer_address, tx_count, timestamp)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (chain_id, height) DO NOTHING
        "#,
    )
    .bind(chain)
    .bind(block.height as i64)
    .bind(&block.hash)
    .bind(&block.proposer_address)
    .bind(block.tx_count as i32)
    .bind(block.timestamp)
    .execute(&mut *conn)
    .await
    .map_err(query_error)?
    .rows_affected();

    if inserted == 0 {
        trace!(height = block.height, "Refined block already present");
        return Ok(false);
    }

    for t in &records.transactions {
        sqlx::query(
            r#"
            INSERT INTO transactions (
                chain_id, hash, height, code, codespace, messages, msg_types, fee,
                signatures, logs, memo, gas_wanted, gas_used, timestamp
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (chain_id, hash) DO NOTHING
            "#,
        )
        .bind(chain)
        .bind(&t.hash)
        .bind(t.height as i64)
        .bind(t.code as i32)
        .bind(&t.codespace)
        .bind(&t.messages)
        .bind(&t.msg_types)
        .bind(&t.fee)
        .bind(&t.signatures)
        .bind(&t.logs)
        .bind(&t.memo)
        .bind(t.gas_wanted)
        .bind(t.gas_used)
        .bind(t.timestamp)
        .execute(&mut *conn)
        .await
        .map_err(query_error)?;
    }

    for e in &records.evidence {
        sqlx::query(
            r#"
            INSERT INTO evidence (
                chain_id, height, validator_address, reported_height, kind,
                total_voting_power, validator_power, timestamp
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (chain_id, height, validator_address) DO NOTHING
            "#,
        )
        .bind(chain)
        .bind(e.height as i64)
        .bind(&e.validator_address)
        .bind(e.reported_height as i64)
        .bind(&e.kind)
        .bind(e.total_voting_power)
        .bind(e.validator_power)
        .bind(e.timestamp)
        .execute(&mut *conn)
        .await
        .map_err(query_error)?;
    }

    // A validator stored concurrently by the poller keeps its id, and this
    // height's events must point at it.
    let mut stored_ids = HashMap::new();
    for v in &records.validators {
        let id = validator_repo::upsert_validator(conn, chain, v).await?;
        if id != v.id {
            debug!(
                operator = %v.operator_address,
                derived = v.id,
                stored = id,
                "Validator id resolved by store"
            );
        }
        stored_ids.insert(v.operator_address.as_str(), id);
    }

    for p in &records.power_events {
        let validator_id = stored_ids
            .get(p.operator_address.as_str())
            .copied()
            .unwrap_or(p.validator_id);
        sqlx::query(
            r#"
            INSERT INTO validator_power_events (
                chain_id, validator_id, height, seq, operator_address, kind, power, delta, tx_hash
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (chain_id, validator_id, height, seq) DO NOTHING
            "#,
        )
        .bind(chain)
        .bind(validator_id)
        .bind(p.height as i64)
        .bind(p.seq as i32)
        .bind(&p.operator_address)
        .bind(p.kind.as_str())
        .bind(p.power)
        .bind(p.delta)
        .bind(&p.tx_hash)
        .execute(&mut *conn)
        .await
        .map_err(query_error)?;
    }

    for miss in &records.misses {
        write_miss(conn, chain, miss).await?;
    }

    governance_repo::write_governance(conn, chain, &records.governance).await?;

    for a in &records.account_activity {
        sqlx::query(
            r#"
            INSERT INTO account_activity (chain_id, address, tx_hash, height, timestamp)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (chain_id, address, tx_hash) DO NOTHING
            "#,
        )
        .bind(chain)
        .bind(&a.address)
        .bind(&a.tx_hash)
        .bind(a.height as i64)
        .bind(a.timestamp)
        .execute(&mut *conn)
        .await
        .map_err(query_error)?;
    }

    Ok(true)
}

/// Record one miss and fold it into the validator's windows.
///
/// A miss already in `miss_details` is a replay and leaves the windows alone.
async fn write_miss(conn: &mut PgConnection, chain: i32, miss: &MissDetail) -> StorageResult<()> {
    let fresh = sqlx::query(
        r#"
        INSERT INTO miss_details (chain_id, address, height, proposer_address, timestamp)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (chain_id, address, height) DO NOTHING
        "#,
    )
    .bind(chain)
    .bind(&miss.address)
    .bind(miss.height as i64)
    .bind(&miss.proposer_address)
    .bind(miss.timestamp)
    .execute(&mut *conn)
    .await
    .map_err(query_error)?
    .rows_affected();

    if fresh == 0 {
        return Ok(());
    }

    let extended = sqlx::query(
        r#"
        UPDATE miss_blocks
        SET end_height = $3, end_time = $4, missing_count = missing_count + 1
        WHERE chain_id = $1 AND address = $2 AND end_height = $3 - 1
        "#,
    )
    .bind(chain)
    .bind(&miss.address)
    .bind(miss.height as i64)
    .bind(miss.timestamp)
    .execute(&mut *conn)
    .await
    .map_err(query_error)?
    .rows_affected();

    if extended == 0 {
        sqlx::query(
            r#"
            INSERT INTO miss_blocks (
                chain_id, address, start_height, end_height, missing_count, start_time, end_time
            )
            VALUES ($1, $2, $3, $3, 1, $4, $4)
            "#,
        )
        .bind(chain)
        .bind(&miss.address)
        .bind(miss.height as i64)
        .bind(miss.timestamp)
        .execute(&mut *conn)
        .await
        .map_err(query_error)?;
    }

    Ok(())
}

/// Write the raw capture of one height. Skipped when the raw block exists.
async fn write_raw(
    conn: &mut PgConnection,
    chain: i32,
    fetched: &FetchedHeight,
) -> StorageResult<bool> {
    let height = fetched.height();
    let chunk = fetched
        .payload
        .to_chunk()
        .map_err(|e| StorageError::SerializationError(e.to_string()))?;

    let inserted = sqlx::query(
        r#"
        INSERT INTO raw_block (chain_id, height, chunk)
        VALUES ($1, $2, $3)
        ON CONFLICT (chain_id, height) DO NOTHING
        "#,
    )
    .bind(chain)
    .bind(height as i64)
    .bind(&chunk)
    .execute(&mut *conn)
    .await
    .map_err(query_error)?
    .rows_affected();

    if inserted == 0 {
        trace!(height, "Raw block already present");
        return Ok(false);
    }

    for tx in &fetched.txs {
        let chunk = tx
            .to_chunk()
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO raw_transaction (chain_id, height, tx_hash, msg_types, chunk)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (chain_id, tx_hash) DO NOTHING
            "#,
        )
        .bind(chain)
        .bind(height as i64)
        .bind(&tx.hash)
        .bind(tx.msg_types())
        .bind(&chunk)
        .execute(&mut *conn)
        .await
        .map_err(query_error)?;
    }

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::helpers::to_json;
    use chronicle_core::models::Coin;

    // Test critique: le JSON d'un dépôt est stable entre écriture et relecture
    #[test]
    fn test_deposit_amount_encoding() {
        let value = to_json(&vec![Coin::new("uatom", "5")], "deposits.amount").unwrap();
        assert_eq!(value, serde_json::json!([{"denom": "uatom", "amount": "5"}]));
    }
}
