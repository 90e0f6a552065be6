//! Core sync loop - drives heights from the chain into the stores.
//!
//! Heights are processed strictly in increasing order, one at a time.
//! A failed height is retried in place after a fixed backoff; the
//! watermark only moves once a height has committed.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::error::{IndexerError, IndexerResult};
use crate::metrics::{
    ProcessingTimer, record_height_failure, record_height_indexed, set_chain_head, set_watermark,
};
use crate::models::ChainContext;
use crate::ports::{
    ChainClient, Deriver, HeightBatch, PersistOutcome, Repositories, TransferNotifier,
};

use super::accounts::AccountRefresher;
use super::fetcher::{FetcherConfig, HeightFetcher};
use super::pause;

// =============================================================================
// Configuration
// =============================================================================

/// Which stores a run writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Derive and write refined rows, then the raw capture.
    #[default]
    Basic,
    /// Write the raw capture only.
    Raw,
    /// Replay the raw store into refined rows (see `RefineService`).
    Refine,
}

impl SyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Raw => "raw",
            Self::Refine => "refine",
        }
    }

    pub fn writes_refined(&self) -> bool {
        matches!(self, Self::Basic | Self::Refine)
    }
}

/// Configuration for the sync loop.
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    pub mode: SyncMode,
    /// Sleep between chain-head checks once caught up.
    pub poll_interval: Duration,
    /// Backoff before retrying a failed height.
    pub retry_delay: Duration,
    /// Refresh account snapshots after each committed height.
    pub refresh_accounts: bool,
    pub fetcher: FetcherConfig,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            mode: SyncMode::Basic,
            poll_interval: Duration::from_secs(1),
            retry_delay: Duration::from_secs(1),
            refresh_accounts: true,
            fetcher: FetcherConfig::default(),
        }
    }
}

// =============================================================================
// IndexerService
// =============================================================================

/// Live sync loop for one chain.
///
/// # Flow
///
/// 1. Read the watermark (refined store in basic mode, raw store in raw mode)
/// 2. Read the chain head (latest height - 1)
/// 3. For each height above the watermark: fetch, derive, write
/// 4. After a refined commit: refresh accounts, dispatch notifications
/// 5. Once caught up, poll for a new head
pub struct IndexerService<C: ChainClient, R: Repositories, D: Deriver> {
    config: IndexerConfig,
    ctx: Arc<ChainContext>,
    client: Arc<C>,
    repositories: Arc<R>,
    deriver: Arc<D>,
    fetcher: HeightFetcher<C>,
    accounts: AccountRefresher<C, R>,
    notifier: Arc<dyn TransferNotifier>,
}

impl<C, R, D> IndexerService<C, R, D>
where
    C: ChainClient + 'static,
    R: Repositories,
    D: Deriver,
{
    pub fn new(
        config: IndexerConfig,
        ctx: Arc<ChainContext>,
        client: Arc<C>,
        repositories: Arc<R>,
        deriver: Arc<D>,
        notifier: Arc<dyn TransferNotifier>,
    ) -> Self {
        let fetcher = HeightFetcher::new(config.fetcher.clone(), Arc::clone(&client));
        let accounts = AccountRefresher::new(Arc::clone(&client), Arc::clone(&repositories));
        Self {
            config,
            ctx,
            client,
            repositories,
            deriver,
            fetcher,
            accounts,
            notifier,
        }
    }

    /// Start the sync loop. Returns only on shutdown or a fatal error.
    #[instrument(skip_all, fields(chain = %self.ctx.chain_id, mode = self.config.mode.as_str()))]
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) -> IndexerResult<()> {
        if self.config.mode == SyncMode::Refine {
            return Err(IndexerError::ConfigError(
                "refine mode is driven by RefineService".into(),
            ));
        }

        info!("⛓️  Starting sync loop");
        let mut next = self.next_height().await?;
        debug!(next, "Resuming from watermark");

        loop {
            if *shutdown_rx.borrow() {
                debug!("Shutdown requested");
                return Err(IndexerError::ShutdownRequested);
            }

            let head = match self.chain_head().await {
                Ok(head) => head,
                Err(e) => {
                    warn!(error = %e, "⚠️  Failed to read chain head, retrying...");
                    pause(self.config.retry_delay, &mut shutdown_rx).await?;
                    continue;
                }
            };

            if next > head {
                trace!(head, "Caught up, waiting for new blocks");
                pause(self.config.poll_interval, &mut shutdown_rx).await?;
                continue;
            }

            while next <= head {
                if *shutdown_rx.borrow() {
                    return Err(IndexerError::ShutdownRequested);
                }

                match self.process_height(next).await {
                    Ok(outcome) => {
                        if outcome.refined || outcome.raw {
                            info!(height = next, head, "⛓️  Height indexed");
                        } else {
                            trace!(height = next, "Height skipped (already indexed)");
                        }
                        set_watermark(next);
                        next += 1;
                    }
                    Err(e) => {
                        error!(height = next, error = %e, "❌ Height processing failed, retrying");
                        pause(self.config.retry_delay, &mut shutdown_rx).await?;
                    }
                }
            }
        }
    }

    /// First height above the watermark of the store this mode writes.
    pub async fn next_height(&self) -> IndexerResult<u64> {
        let chain = self.ctx.chain_num;
        let watermark = match self.config.mode {
            SyncMode::Raw => self.repositories.raw().latest_height(chain).await?,
            _ => self.repositories.blocks().latest_height(chain).await?,
        };
        Ok(watermark.map_or(self.ctx.genesis_height, |h| h + 1))
    }

    /// Highest height whose commit is available.
    pub async fn chain_head(&self) -> IndexerResult<u64> {
        let status = self.client.status().await?;
        let head = status.latest_height.saturating_sub(1);
        set_chain_head(head);
        Ok(head)
    }

    /// Fetch, derive and write one height.
    #[instrument(skip(self))]
    pub async fn process_height(&self, height: u64) -> IndexerResult<PersistOutcome> {
        let _timer = ProcessingTimer::new();
        let chain = self.ctx.chain_num;

        let fetched = self
            .fetcher
            .fetch(&self.ctx, height)
            .await
            .inspect_err(|_| record_height_failure("fetch"))?;

        let derived = match self.config.mode {
            SyncMode::Basic => {
                let ledger = self.repositories.validators().ledger(chain).await?;
                let records = self
                    .deriver
                    .derive(&self.ctx, &fetched, &ledger)
                    .inspect_err(|_| record_height_failure("derive"))?;
                Some(records)
            }
            _ => None,
        };

        let outcome = self
            .repositories
            .persist_height_atomic(HeightBatch {
                chain_num: chain,
                raw: Some(&fetched),
                refined: derived.as_ref(),
            })
            .await
            .inspect_err(|_| record_height_failure("write"))?;

        if let Some(records) = derived
            && outcome.refined
        {
            if self.config.refresh_accounts {
                let addresses = records.active_addresses();
                if let Err(e) = self.accounts.refresh(&self.ctx, &addresses).await {
                    warn!(error = %e, "⚠️  Account refresh failed");
                }
            }

            if !records.transfers.is_empty() {
                let notifier = Arc::clone(&self.notifier);
                let ctx = Arc::clone(&self.ctx);
                tokio::spawn(async move { notifier.notify(&ctx, &records.transfers).await });
            }
        }

        record_height_indexed(self.config.mode.as_str());
        Ok(outcome)
    }
}
