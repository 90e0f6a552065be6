//! Auxiliary pollers, independent of the height loop.
//!
//! - [`ValidatorPoller`] refreshes the full validator set and its ranking.
//! - [`ProposalTracker`] discovers proposals still in deposit or voting
//!   period and re-fetches them until they settle, since tallies move
//!   without an event the height loop would see.

use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{RwLock, watch};
use tracing::{debug, info, instrument, warn};

use crate::error::{IndexerError, IndexerResult};
use crate::metrics::record_poller_refresh;
use crate::models::{ChainContext, ProposalStatus, Validator};
use crate::ports::{ChainClient, Repositories, StakingValidator};

use super::pause;

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub validator_interval: Duration,
    pub proposal_discovery_interval: Duration,
    pub proposal_update_interval: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            validator_interval: Duration::from_secs(60),
            proposal_discovery_interval: Duration::from_secs(30),
            proposal_update_interval: Duration::from_secs(30),
        }
    }
}

/// Run `tick` every `interval` until shutdown. Tick errors are logged.
async fn every<F, Fut>(
    task: &'static str,
    interval: Duration,
    shutdown_rx: &mut watch::Receiver<bool>,
    mut tick: F,
) -> IndexerResult<()>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = IndexerResult<usize>>,
{
    loop {
        if *shutdown_rx.borrow() {
            return Err(IndexerError::ShutdownRequested);
        }
        match tick().await {
            Ok(count) => {
                debug!(task, count, "Poller refresh done");
                record_poller_refresh(task, "ok");
            }
            Err(e) => {
                warn!(task, error = %e, "⚠️  Poller refresh failed");
                record_poller_refresh(task, "error");
            }
        }
        pause(interval, shutdown_rx).await?;
    }
}

// =============================================================================
// Validators
// =============================================================================

pub struct ValidatorPoller<C: ChainClient, R: Repositories> {
    interval: Duration,
    ctx: Arc<ChainContext>,
    client: Arc<C>,
    repositories: Arc<R>,
}

impl<C: ChainClient, R: Repositories> ValidatorPoller<C, R> {
    pub fn new(
        interval: Duration,
        ctx: Arc<ChainContext>,
        client: Arc<C>,
        repositories: Arc<R>,
    ) -> Self {
        Self {
            interval,
            ctx,
            client,
            repositories,
        }
    }

    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) -> IndexerResult<()> {
        info!(every_secs = self.interval.as_secs(), "👥 Validator poller started");
        every("validators", self.interval, &mut shutdown_rx, || self.refresh()).await
    }

    /// Merge the current staking validator set and recompute ranks.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> IndexerResult<usize> {
        let chain = self.ctx.chain_num;
        let staking = self.client.get_staking_validators(None).await?;
        let existing = self.repositories.validators().list(chain).await?;

        let validators = merge_validator_set(&existing, &staking)?;
        self.repositories
            .validators()
            .upsert(chain, &validators)
            .await?;
        Ok(validators.len())
    }
}

/// Build validator rows for a staking snapshot.
///
/// Known operators keep their id; new ones get `max(id) + 1` in operator
/// address order. Ranks follow tokens, descending.
pub fn merge_validator_set(
    existing: &[Validator],
    staking: &[StakingValidator],
) -> IndexerResult<Vec<Validator>> {
    let ids: HashMap<&str, i64> = existing
        .iter()
        .map(|v| (v.operator_address.as_str(), v.id))
        .collect();
    let mut next_id = existing.iter().map(|v| v.id).max().unwrap_or(0) + 1;

    let mut sorted: Vec<&StakingValidator> = staking.iter().collect();
    sorted.sort_by(|a, b| a.operator_address.cmp(&b.operator_address));

    let mut validators = Vec::with_capacity(sorted.len());
    for sv in sorted {
        let id = match ids.get(sv.operator_address.as_str()) {
            Some(id) => *id,
            None => {
                let id = next_id;
                next_id += 1;
                id
            }
        };
        validators.push(sv.to_validator(id)?);
    }

    let mut by_tokens: Vec<usize> = (0..validators.len()).collect();
    by_tokens.sort_by_key(|&i| {
        let tokens = validators[i].tokens.parse::<u128>().unwrap_or(0);
        (Reverse(tokens), validators[i].operator_address.clone())
    });
    for (rank, index) in by_tokens.into_iter().enumerate() {
        validators[index].rank = Some(rank as i32 + 1);
    }

    Ok(validators)
}

// =============================================================================
// Governance
// =============================================================================

/// Ids of proposals whose state can still change.
///
/// Discovery inserts while updates iterate and remove, from two tasks.
#[derive(Debug, Clone, Default)]
pub struct LiveProposals(Arc<RwLock<BTreeSet<u64>>>);

impl LiveProposals {
    pub async fn insert_all(&self, ids: impl IntoIterator<Item = u64>) {
        self.0.write().await.extend(ids);
    }

    pub async fn remove(&self, id: u64) {
        self.0.write().await.remove(&id);
    }

    pub async fn snapshot(&self) -> Vec<u64> {
        self.0.read().await.iter().copied().collect()
    }
}

pub struct ProposalTracker<C: ChainClient, R: Repositories> {
    config: PollerConfig,
    ctx: Arc<ChainContext>,
    client: Arc<C>,
    repositories: Arc<R>,
    live: LiveProposals,
}

impl<C: ChainClient, R: Repositories> ProposalTracker<C, R> {
    pub fn new(
        config: PollerConfig,
        ctx: Arc<ChainContext>,
        client: Arc<C>,
        repositories: Arc<R>,
        live: LiveProposals,
    ) -> Self {
        Self {
            config,
            ctx,
            client,
            repositories,
            live,
        }
    }

    /// Seed the live set from proposals already stored as live.
    pub async fn seed(&self) -> IndexerResult<usize> {
        let ids = self
            .repositories
            .governance()
            .live_proposal_ids(self.ctx.chain_num)
            .await?;
        let count = ids.len();
        self.live.insert_all(ids).await;
        Ok(count)
    }

    pub async fn run_discovery(&self, mut shutdown_rx: watch::Receiver<bool>) -> IndexerResult<()> {
        if let Err(e) = self.seed().await {
            warn!(error = %e, "⚠️  Failed to seed live proposals");
        }
        every(
            "proposal_discovery",
            self.config.proposal_discovery_interval,
            &mut shutdown_rx,
            || self.discover(),
        )
        .await
    }

    pub async fn run_updates(&self, mut shutdown_rx: watch::Receiver<bool>) -> IndexerResult<()> {
        every(
            "proposal_update",
            self.config.proposal_update_interval,
            &mut shutdown_rx,
            || self.update(),
        )
        .await
    }

    /// Merge proposals in deposit or voting period and mark them live.
    #[instrument(skip(self))]
    pub async fn discover(&self) -> IndexerResult<usize> {
        let mut found = Vec::new();
        for status in [ProposalStatus::DepositPeriod, ProposalStatus::VotingPeriod] {
            found.extend(self.client.get_proposals_by_status(status).await?);
        }

        self.repositories
            .governance()
            .upsert_proposals(self.ctx.chain_num, &found)
            .await?;
        self.live.insert_all(found.iter().map(|p| p.id)).await;
        Ok(found.len())
    }

    /// Re-fetch every live proposal; drop the ones that settled.
    #[instrument(skip(self))]
    pub async fn update(&self) -> IndexerResult<usize> {
        let ids = self.live.snapshot().await;
        let mut updated = 0;

        for id in ids {
            let proposal = match self.client.get_proposal(id).await {
                Ok(p) => p,
                Err(e) => {
                    warn!(proposal = id, error = %e, "⚠️  Proposal refresh failed");
                    continue;
                }
            };

            self.repositories
                .governance()
                .upsert_proposals(self.ctx.chain_num, std::slice::from_ref(&proposal))
                .await?;
            updated += 1;

            if !proposal.status.is_some_and(|s| s.is_live()) {
                debug!(proposal = id, status = ?proposal.status, "Proposal settled");
                self.live.remove(id).await;
            }
        }

        Ok(updated)
    }
}
