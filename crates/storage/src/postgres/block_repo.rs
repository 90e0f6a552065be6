//! Block repository implementation for PostgreSQL.

use async_trait::async_trait;
use sqlx::PgPool;

use chronicle_core::error::StorageResult;
use chronicle_core::models::Block;
use chronicle_core::ports::BlockRepository;

use super::database::Database;
use super::helpers::{query_error, to_u64};

/// PostgreSQL implementation of BlockRepository.
pub struct PgBlockRepository {
    pool: PgPool,
}

impl PgBlockRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }
}

#[async_trait]
impl BlockRepository for PgBlockRepository {
    async fn latest_height(&self, chain: i32) -> StorageResult<Option<u64>> {
        // MAX returns NULL when table is empty, so we need Option<i64> in the tuple
        let row: (Option<i64>,) =
            sqlx::query_as("SELECT MAX(height) FROM blocks WHERE chain_id = $1")
                .bind(chain)
                .fetch_one(&self.pool)
                .await
                .map_err(query_error)?;

        row.0.map(|h| to_u64(h, "blocks.height")).transpose()
    }

    async fn get_block(&self, chain: i32, height: u64) -> StorageResult<Option<Block>> {
        let row = sqlx::query_as::<_, BlockRow>(
            r#"
            SELECT height, hash, proposer_address, tx_count, timestamp
            FROM blocks
            WHERE chain_id = $1 AND height = $2
            "#,
        )
        .bind(chain)
        .bind(height as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error)?;

        row.map(BlockRow::into_block).transpose()
    }
}

/// Database row representation for Block.
#[derive(sqlx::FromRow)]
struct BlockRow {
    height: i64,
    hash: String,
    proposer_address: String,
    tx_count: i32,
    timestamp: chrono::DateTime<chrono::Utc>,
}

impl BlockRow {
    fn into_block(self) -> StorageResult<Block> {
        Ok(Block {
            height: to_u64(self.height, "blocks.height")?,
            hash: self.hash,
            proposer_address: self.proposer_address,
            tx_count: self.tx_count.max(0) as u32,
            timestamp: self.timestamp,
        })
    }
}
