//! Account snapshots and push tokens.

use async_trait::async_trait;
use sqlx::PgPool;

use chronicle_core::error::StorageResult;
use chronicle_core::models::{AccountSnapshot, DeviceToken};
use chronicle_core::ports::AccountRepository;

use super::database::Database;
use super::helpers::{query_error, transaction_error};

pub struct PgAccountRepository {
    pool: PgPool,
}

impl PgAccountRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }
}

#[async_trait]
impl AccountRepository for PgAccountRepository {
    async fn upsert_snapshots(
        &self,
        chain: i32,
        snapshots: &[AccountSnapshot],
    ) -> StorageResult<()> {
        if snapshots.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(transaction_error)?;
        for s in snapshots {
            sqlx::query(
                r#"
                INSERT INTO accounts (
                    chain_id, address, available, delegated, unbonding, rewards,
                    commission, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (chain_id, address) DO UPDATE SET
                    available = EXCLUDED.available,
                    delegated = EXCLUDED.delegated,
                    unbonding = EXCLUDED.unbonding,
                    rewards = EXCLUDED.rewards,
                    commission = EXCLUDED.commission,
                    updated_at = EXCLUDED.updated_at
                "#,
            )
            .bind(chain)
            .bind(&s.address)
            .bind(&s.available)
            .bind(&s.delegated)
            .bind(&s.unbonding)
            .bind(&s.rewards)
            .bind(&s.commission)
            .bind(s.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(query_error)?;
        }
        tx.commit().await.map_err(transaction_error)?;

        Ok(())
    }

    async fn get_snapshot(
        &self,
        chain: i32,
        address: &str,
    ) -> StorageResult<Option<AccountSnapshot>> {
        let row = sqlx::query_as::<_, SnapshotRow>(
            r#"
            SELECT address, available, delegated, unbonding, rewards, commission, updated_at
            FROM accounts
            WHERE chain_id = $1 AND address = $2
            "#,
        )
        .bind(chain)
        .bind(address)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error)?;

        Ok(row.map(|r| AccountSnapshot {
            address: r.address,
            available: r.available,
            delegated: r.delegated,
            unbonding: r.unbonding,
            rewards: r.rewards,
            commission: r.commission,
            updated_at: r.updated_at,
        }))
    }

    async fn device_tokens(&self, addresses: &[String]) -> StorageResult<Vec<DeviceToken>> {
        if addresses.is_empty() {
            return Ok(Vec::new());
        }

        let rows: Vec<(String, String, i32)> = sqlx::query_as(
            "SELECT address, token, platform FROM notification_tokens WHERE address = ANY($1)",
        )
        .bind(addresses)
        .fetch_all(&self.pool)
        .await
        .map_err(query_error)?;

        Ok(rows
            .into_iter()
            .map(|(address, token, platform)| DeviceToken {
                address,
                token,
                platform,
            })
            .collect())
    }
}

#[derive(sqlx::FromRow)]
struct SnapshotRow {
    address: String,
    available: String,
    delegated: String,
    unbonding: String,
    rewards: String,
    commission: String,
    updated_at: chrono::DateTime<chrono::Utc>,
}
