//! Chain lookup table.

use async_trait::async_trait;
use sqlx::PgPool;

use chronicle_core::error::StorageResult;
use chronicle_core::models::ChainDirectory;
use chronicle_core::ports::ChainRepository;

use super::database::Database;
use super::helpers::query_error;

pub struct PgChainRepository {
    pool: PgPool,
}

impl PgChainRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }
}

#[async_trait]
impl ChainRepository for PgChainRepository {
    async fn ensure_chain(&self, chain_id: &str) -> StorageResult<i32> {
        // The no-op update makes RETURNING yield the existing row too.
        let row: (i32,) = sqlx::query_as(
            r#"
            INSERT INTO chains (chain_id) VALUES ($1)
            ON CONFLICT (chain_id) DO UPDATE SET chain_id = EXCLUDED.chain_id
            RETURNING id
            "#,
        )
        .bind(chain_id)
        .fetch_one(&self.pool)
        .await
        .map_err(query_error)?;

        Ok(row.0)
    }

    async fn directory(&self) -> StorageResult<ChainDirectory> {
        let rows: Vec<(i32, String)> = sqlx::query_as("SELECT id, chain_id FROM chains")
            .fetch_all(&self.pool)
            .await
            .map_err(query_error)?;

        Ok(ChainDirectory::from_rows(rows))
    }
}
