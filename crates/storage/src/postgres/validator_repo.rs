//! Validator repository: latest-state rows and the tracked power ledger.

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};

use chronicle_core::error::StorageResult;
use chronicle_core::models::{TrackedValidator, Validator, ValidatorLedger};
use chronicle_core::ports::ValidatorRepository;

use super::database::Database;
use super::helpers::{query_error, transaction_error};

pub struct PgValidatorRepository {
    pool: PgPool,
}

impl PgValidatorRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }
}

/// Merge one validator on operator address and return its stored id.
///
/// The stored id always wins, and a missing rank keeps the stored one.
pub(crate) async fn upsert_validator(
    conn: &mut PgConnection,
    chain: i32,
    v: &Validator,
) -> StorageResult<i64> {
    sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO validators (
            chain_id, operator_address, id, consensus_pubkey, proposer_address,
            consensus_address, moniker, status, jailed, tokens, delegator_shares,
            commission_rate, commission_max_rate, commission_max_change_rate,
            min_self_delegation, rank, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, NOW())
        ON CONFLICT (chain_id, operator_address) DO UPDATE SET
            consensus_pubkey = EXCLUDED.consensus_pubkey,
            proposer_address = EXCLUDED.proposer_address,
            consensus_address = EXCLUDED.consensus_address,
            moniker = EXCLUDED.moniker,
            status = EXCLUDED.status,
            jailed = EXCLUDED.jailed,
            tokens = EXCLUDED.tokens,
            delegator_shares = EXCLUDED.delegator_shares,
            commission_rate = EXCLUDED.commission_rate,
            commission_max_rate = EXCLUDED.commission_max_rate,
            commission_max_change_rate = EXCLUDED.commission_max_change_rate,
            min_self_delegation = EXCLUDED.min_self_delegation,
            rank = COALESCE(EXCLUDED.rank, validators.rank),
            updated_at = EXCLUDED.updated_at
        RETURNING id
        "#,
    )
    .bind(chain)
    .bind(&v.operator_address)
    .bind(v.id)
    .bind(&v.consensus_pubkey)
    .bind(&v.proposer_address)
    .bind(&v.consensus_address)
    .bind(&v.moniker)
    .bind(&v.status)
    .bind(v.jailed)
    .bind(&v.tokens)
    .bind(&v.delegator_shares)
    .bind(&v.commission_rate)
    .bind(&v.commission_max_rate)
    .bind(&v.commission_max_change_rate)
    .bind(&v.min_self_delegation)
    .bind(v.rank)
    .fetch_one(&mut *conn)
    .await
    .map_err(query_error)
}

#[async_trait]
impl ValidatorRepository for PgValidatorRepository {
    async fn ledger(&self, chain: i32) -> StorageResult<ValidatorLedger> {
        let rows = sqlx::query_as::<_, (i64, String, String, Option<i64>)>(
            r#"
            SELECT v.id, v.operator_address, v.proposer_address,
                   (SELECT e.power
                    FROM validator_power_events e
                    WHERE e.chain_id = v.chain_id AND e.validator_id = v.id
                    ORDER BY e.height DESC, e.seq DESC
                    LIMIT 1) AS power
            FROM validators v
            WHERE v.chain_id = $1
            ORDER BY v.id
            "#,
        )
        .bind(chain)
        .fetch_all(&self.pool)
        .await
        .map_err(query_error)?;

        Ok(ValidatorLedger::new(
            rows.into_iter()
                .map(|(id, operator_address, proposer, power)| TrackedValidator {
                    id,
                    operator_address,
                    proposer_address: Some(proposer).filter(|p| !p.is_empty()),
                    power,
                })
                .collect(),
        ))
    }

    async fn list(&self, chain: i32) -> StorageResult<Vec<Validator>> {
        let rows = sqlx::query_as::<_, ValidatorRow>(
            r#"
            SELECT id, operator_address, consensus_pubkey, proposer_address,
                   consensus_address, moniker, status, jailed, tokens, delegator_shares,
                   commission_rate, commission_max_rate, commission_max_change_rate,
                   min_self_delegation, rank
            FROM validators
            WHERE chain_id = $1
            ORDER BY id
            "#,
        )
        .bind(chain)
        .fetch_all(&self.pool)
        .await
        .map_err(query_error)?;

        Ok(rows.into_iter().map(ValidatorRow::into_validator).collect())
    }

    async fn upsert(&self, chain: i32, validators: &[Validator]) -> StorageResult<()> {
        if validators.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(transaction_error)?;
        for v in validators {
            upsert_validator(&mut tx, chain, v).await?;
        }
        tx.commit().await.map_err(transaction_error)?;

        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct ValidatorRow {
    id: i64,
    operator_address: String,
    consensus_pubkey: String,
    proposer_address: String,
    consensus_address: String,
    moniker: String,
    status: String,
    jailed: bool,
    tokens: String,
    delegator_shares: String,
    commission_rate: String,
    commission_max_rate: String,
    commission_max_change_rate: String,
    min_self_delegation: String,
    rank: Option<i32>,
}

impl ValidatorRow {
    fn into_validator(self) -> Validator {
        Validator {
            id: self.id,
            operator_address: self.operator_address,
            consensus_pubkey: self.consensus_pubkey,
            proposer_address: self.proposer_address,
            consensus_address: self.consensus_address,
            moniker: self.moniker,
            status: self.status,
            jailed: self.jailed,
            tokens: self.tokens,
            delegator_shares: self.delegator_shares,
            commission_rate: self.commission_rate,
            commission_max_rate: self.commission_max_rate,
            commission_max_change_rate: self.commission_max_change_rate,
            min_self_delegation: self.min_self_delegation,
            rank: self.rank,
        }
    }
}
