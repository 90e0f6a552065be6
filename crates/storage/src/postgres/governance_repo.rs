//! Governance repository: proposals (merged), deposits and votes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgConnection, PgPool};

use chronicle_core::error::StorageResult;
use chronicle_core::models::{Deposit, GovernanceRecords, Proposal, ProposalStatus, Vote};
use chronicle_core::ports::GovernanceRepository;

use super::database::Database;
use super::helpers::{from_json, query_error, to_json, to_u64, transaction_error};

pub struct PgGovernanceRepository {
    pool: PgPool,
}

impl PgGovernanceRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            pool: db.pool().clone(),
        }
    }
}

// =============================================================================
// Writers shared with the atomic height write
// =============================================================================

/// Merge a proposal on id: `NULL` columns keep the stored value.
pub(crate) async fn upsert_proposal(
    conn: &mut PgConnection,
    chain: i32,
    p: &Proposal,
) -> StorageResult<()> {
    let total_deposit = p
        .total_deposit
        .as_ref()
        .map(|d| to_json(d, "proposals.total_deposit"))
        .transpose()?;
    let tally = p
        .tally
        .as_ref()
        .map(|t| to_json(t, "proposals.tally"))
        .transpose()?;

    sqlx::query(
        r#"
        INSERT INTO proposals (
            chain_id, id, title, description, proposal_type, status, proposer,
            submit_height, tx_hash, submit_time, deposit_end_time, voting_start_time,
            voting_end_time, total_deposit, tally, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, NOW())
        ON CONFLICT (chain_id, id) DO UPDATE SET
            title = COALESCE(EXCLUDED.title, proposals.title),
            description = COALESCE(EXCLUDED.description, proposals.description),
            proposal_type = COALESCE(EXCLUDED.proposal_type, proposals.proposal_type),
            status = COALESCE(EXCLUDED.status, proposals.status),
            proposer = COALESCE(EXCLUDED.proposer, proposals.proposer),
            submit_height = COALESCE(EXCLUDED.submit_height, proposals.submit_height),
            tx_hash = COALESCE(EXCLUDED.tx_hash, proposals.tx_hash),
            submit_time = COALESCE(EXCLUDED.submit_time, proposals.submit_time),
            deposit_end_time = COALESCE(EXCLUDED.deposit_end_time, proposals.deposit_end_time),
            voting_start_time = COALESCE(EXCLUDED.voting_start_time, proposals.voting_start_time),
            voting_end_time = COALESCE(EXCLUDED.voting_end_time, proposals.voting_end_time),
            total_deposit = COALESCE(EXCLUDED.total_deposit, proposals.total_deposit),
            tally = COALESCE(EXCLUDED.tally, proposals.tally),
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(chain)
    .bind(p.id as i64)
    .bind(&p.title)
    .bind(&p.description)
    .bind(&p.proposal_type)
    .bind(p.status.map(|s| s.as_str()))
    .bind(&p.proposer)
    .bind(p.submit_height.map(|h| h as i64))
    .bind(&p.tx_hash)
    .bind(p.submit_time)
    .bind(p.deposit_end_time)
    .bind(p.voting_start_time)
    .bind(p.voting_end_time)
    .bind(total_deposit)
    .bind(tally)
    .execute(&mut *conn)
    .await
    .map_err(query_error)?;

    Ok(())
}

pub(crate) async fn insert_deposit(
    conn: &mut PgConnection,
    chain: i32,
    d: &Deposit,
) -> StorageResult<()> {
    sqlx::query(
        r#"
        INSERT INTO deposits (chain_id, proposal_id, depositor, tx_hash, amount, height, timestamp)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (chain_id, proposal_id, depositor, tx_hash) DO NOTHING
        "#,
    )
    .bind(chain)
    .bind(d.proposal_id as i64)
    .bind(&d.depositor)
    .bind(&d.tx_hash)
    .bind(to_json(&d.amount, "deposits.amount")?)
    .bind(d.height as i64)
    .bind(d.timestamp)
    .execute(&mut *conn)
    .await
    .map_err(query_error)?;

    Ok(())
}

/// Keep one vote per voter and proposal; a vote from a later height replaces it.
pub(crate) async fn upsert_vote(conn: &mut PgConnection, chain: i32, v: &Vote) -> StorageResult<()> {
    sqlx::query(
        r#"
        INSERT INTO votes (chain_id, proposal_id, voter, options, height, tx_hash, timestamp)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (chain_id, proposal_id, voter) DO UPDATE SET
            options = EXCLUDED.options,
            height = EXCLUDED.height,
            tx_hash = EXCLUDED.tx_hash,
            timestamp = EXCLUDED.timestamp
        WHERE votes.height <= EXCLUDED.height
        "#,
    )
    .bind(chain)
    .bind(v.proposal_id as i64)
    .bind(&v.voter)
    .bind(to_json(&v.options, "votes.options")?)
    .bind(v.height as i64)
    .bind(&v.tx_hash)
    .bind(v.timestamp)
    .execute(&mut *conn)
    .await
    .map_err(query_error)?;

    Ok(())
}

pub(crate) async fn write_governance(
    conn: &mut PgConnection,
    chain: i32,
    records: &GovernanceRecords,
) -> StorageResult<()> {
    for p in &records.proposals {
        upsert_proposal(conn, chain, p).await?;
    }
    for d in &records.deposits {
        insert_deposit(conn, chain, d).await?;
    }
    for v in &records.votes {
        upsert_vote(conn, chain, v).await?;
    }
    Ok(())
}

// =============================================================================
// Repository
// =============================================================================

#[async_trait]
impl GovernanceRepository for PgGovernanceRepository {
    async fn upsert_proposals(&self, chain: i32, proposals: &[Proposal]) -> StorageResult<()> {
        if proposals.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(transaction_error)?;
        for p in proposals {
            upsert_proposal(&mut tx, chain, p).await?;
        }
        tx.commit().await.map_err(transaction_error)?;

        Ok(())
    }

    async fn get_proposal(&self, chain: i32, id: u64) -> StorageResult<Option<Proposal>> {
        let row = sqlx::query_as::<_, ProposalRow>(
            r#"
            SELECT id, title, description, proposal_type, status, proposer, submit_height,
                   tx_hash, submit_time, deposit_end_time, voting_start_time, voting_end_time,
                   total_deposit, tally
            FROM proposals
            WHERE chain_id = $1 AND id = $2
            "#,
        )
        .bind(chain)
        .bind(id as i64)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_error)?;

        row.map(ProposalRow::into_proposal).transpose()
    }

    async fn live_proposal_ids(&self, chain: i32) -> StorageResult<Vec<u64>> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT id FROM proposals WHERE chain_id = $1 AND status = ANY($2) ORDER BY id",
        )
        .bind(chain)
        .bind(vec![
            ProposalStatus::DepositPeriod.as_str(),
            ProposalStatus::VotingPeriod.as_str(),
        ])
        .fetch_all(&self.pool)
        .await
        .map_err(query_error)?;

        rows.into_iter()
            .map(|(id,)| to_u64(id, "proposals.id"))
            .collect()
    }
}

#[derive(sqlx::FromRow)]
struct ProposalRow {
    id: i64,
    title: Option<String>,
    description: Option<String>,
    proposal_type: Option<String>,
    status: Option<String>,
    proposer: Option<String>,
    submit_height: Option<i64>,
    tx_hash: Option<String>,
    submit_time: Option<DateTime<Utc>>,
    deposit_end_time: Option<DateTime<Utc>>,
    voting_start_time: Option<DateTime<Utc>>,
    voting_end_time: Option<DateTime<Utc>>,
    total_deposit: Option<Value>,
    tally: Option<Value>,
}

impl ProposalRow {
    fn into_proposal(self) -> StorageResult<Proposal> {
        Ok(Proposal {
            id: to_u64(self.id, "proposals.id")?,
            title: self.title,
            description: self.description,
            proposal_type: self.proposal_type,
            status: self.status.as_deref().and_then(ProposalStatus::parse),
            proposer: self.proposer,
            submit_height: self
                .submit_height
                .map(|h| to_u64(h, "proposals.submit_height"))
                .transpose()?,
            tx_hash: self.tx_hash,
            submit_time: self.submit_time,
            deposit_end_time: self.deposit_end_time,
            voting_start_time: self.voting_start_time,
            voting_end_time: self.voting_end_time,
            total_deposit: self
                .total_deposit
                .map(|v| from_json(v, "proposals.total_deposit"))
                .transpose()?,
            tally: self
                .tally
                .map(|v| from_json(v, "proposals.tally"))
                .transpose()?,
        })
    }
}
