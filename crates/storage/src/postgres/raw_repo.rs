//! Raw store repository: verbatim block and transaction captures.

use async_trait::async_trait;
use sqlx::PgPool;

use chronicle_core::error::StorageResult;
use chronicle_core::ports::{RawBlockRow, RawRepository, RawTxRow};

use super::database::Database;
use super::helpers::{query_error, to_u64};

pub struct PgRawRepository {
    pool: PgPool,
}

impl PgRawRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }
}

#[async_trait]
impl RawRepository for PgRawRepository {
    async fn latest_height(&self, chain: i32) -> StorageResult<Option<u64>> {
        let row: (Option<i64>,) =
            sqlx::query_as("SELECT MAX(height) FROM raw_block WHERE chain_id = $1")
                .bind(chain)
                .fetch_one(&self.pool)
                .await
                .map_err(query_error)?;

        row.0.map(|h| to_u64(h, "raw_block.height")).transpose()
    }

    async fn blocks_after(
        &self,
        chain: i32,
        after_height: u64,
        limit: i64,
    ) -> StorageResult<Vec<RawBlockRow>> {
        let rows = sqlx::query_as::<_, PgRawBlockRow>(
            r#"
            SELECT id, chain_id, height, chunk
            FROM raw_block
            WHERE chain_id = $1 AND height > $2
            ORDER BY id
            LIMIT $3
            "#,
        )
        .bind(chain)
        .bind(after_height as i64)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(query_error)?;

        rows.into_iter().map(PgRawBlockRow::into_row).collect()
    }

    async fn txs_at(&self, chain: i32, height: u64) -> StorageResult<Vec<RawTxRow>> {
        let rows = sqlx::query_as::<_, PgRawTxRow>(
            r#"
            SELECT id, chain_id, height, tx_hash, chunk
            FROM raw_transaction
            WHERE chain_id = $1 AND height = $2
            ORDER BY id
            "#,
        )
        .bind(chain)
        .bind(height as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(query_error)?;

        rows.into_iter().map(PgRawTxRow::into_row).collect()
    }

    async fn first_tx_id_with_msg_type(
        &self,
        chain: i32,
        msg_type: &str,
    ) -> StorageResult<Option<i64>> {
        let row: (Option<i64>,) = sqlx::query_as(
            "SELECT MIN(id) FROM raw_transaction WHERE chain_id = $1 AND $2 = ANY(msg_types)",
        )
        .bind(chain)
        .bind(msg_type)
        .fetch_one(&self.pool)
        .await
        .map_err(query_error)?;

        Ok(row.0)
    }

    async fn txs_with_msg_type_from(
        &self,
        chain: i32,
        msg_type: &str,
        from_id: i64,
        limit: i64,
    ) -> StorageResult<Vec<RawTxRow>> {
        let rows = sqlx::query_as::<_, PgRawTxRow>(
            r#"
            SELECT id, chain_id, height, tx_hash, chunk
            FROM raw_transaction
            WHERE chain_id = $1 AND id >= $2 AND $3 = ANY(msg_types)
            ORDER BY id
            LIMIT $4
            "#,
        )
        .bind(chain)
        .bind(from_id)
        .bind(msg_type)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(query_error)?;

        rows.into_iter().map(PgRawTxRow::into_row).collect()
    }
}

#[derive(sqlx::FromRow)]
struct PgRawBlockRow {
    id: i64,
    chain_id: i32,
    height: i64,
    chunk: Vec<u8>,
}

impl PgRawBlockRow {
    fn into_row(self) -> StorageResult<RawBlockRow> {
        Ok(RawBlockRow {
            id: self.id,
            chain_num: self.chain_id,
            height: to_u64(self.height, "raw_block.height")?,
            chunk: self.chunk,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PgRawTxRow {
    id: i64,
    chain_id: i32,
    height: i64,
    tx_hash: String,
    chunk: Vec<u8>,
}

impl PgRawTxRow {
    fn into_row(self) -> StorageResult<RawTxRow> {
        Ok(RawTxRow {
            id: self.id,
            chain_num: self.chain_id,
            height: to_u64(self.height, "raw_transaction.height")?,
            tx_hash: self.tx_hash,
            chunk: self.chunk,
        })
    }
}
