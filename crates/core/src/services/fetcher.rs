//! Height fetcher - resolves one height into a [`FetchedHeight`].
//!
//! Transactions are fetched concurrently, bounded by a semaphore, and
//! joined before anything is returned. A single failed fetch fails the
//! whole height: callers retry the height from scratch, never a partial
//! transaction set.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, instrument, trace, warn};

use crate::error::{ChainError, ChainResult};
use crate::metrics::record_tx_fetch_failures;
use crate::models::ChainContext;
use crate::ports::{ChainClient, FetchedHeight, HeightPayload, RawTx, ValidatorPage};

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Maximum in-flight transaction fetches per height.
    pub concurrency: usize,
    /// Page size for validator-set queries.
    pub validator_page_size: u32,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            concurrency: 20,
            validator_page_size: 100,
        }
    }
}

// =============================================================================
// HeightFetcher
// =============================================================================

pub struct HeightFetcher<C: ChainClient> {
    config: FetcherConfig,
    client: Arc<C>,
}

impl<C: ChainClient + 'static> HeightFetcher<C> {
    pub fn new(config: FetcherConfig, client: Arc<C>) -> Self {
        Self { config, client }
    }

    /// Fetch block `height`, the next block's commit, the validator set
    /// and every transaction of the block.
    #[instrument(skip(self, ctx))]
    pub async fn fetch(&self, ctx: &ChainContext, height: u64) -> ChainResult<FetchedHeight> {
        let block = self.client.get_block(height).await?;
        let next = self.client.get_block(height + 1).await?;
        let pages = self.fetch_validator_set(height).await?;

        let genesis_validators = if ctx.is_genesis(height) {
            Some(self.client.get_staking_validators(Some(height)).await?)
        } else {
            None
        };

        let txs = self.fetch_txs(height, &block.tx_hashes).await?;
        let payload = HeightPayload::assemble(block, next, pages, genesis_validators);
        trace!(txs = txs.len(), validators = payload.validators.len(), "Height fetched");

        Ok(FetchedHeight { payload, txs })
    }

    /// Page through the consensus validator set at `height`, keeping every page.
    async fn fetch_validator_set(&self, height: u64) -> ChainResult<Vec<ValidatorPage>> {
        let per_page = self.config.validator_page_size.max(1);
        let mut pages = Vec::new();
        let mut seen = 0;
        let mut page = 1;

        loop {
            let result = self
                .client
                .get_validators_at_height(height, page, per_page)
                .await?;
            let received = result.validators.len();
            let total = result.total;
            seen += received;
            pages.push(result);

            if received == 0 || seen >= total {
                break;
            }
            page += 1;
        }

        Ok(pages)
    }

    /// Fetch every transaction, keeping block order.
    async fn fetch_txs(&self, height: u64, hashes: &[String]) -> ChainResult<Vec<RawTx>> {
        if hashes.is_empty() {
            return Ok(Vec::new());
        }

        let permits = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut join_set: JoinSet<(usize, ChainResult<RawTx>)> = JoinSet::new();

        for (index, hash) in hashes.iter().enumerate() {
            let client = Arc::clone(&self.client);
            let permits = Arc::clone(&permits);
            let hash = hash.clone();
            join_set.spawn(async move {
                let result = match permits.acquire_owned().await {
                    Ok(_permit) => client.get_tx(&hash).await,
                    Err(e) => Err(ChainError::ConnectionFailed(e.to_string())),
                };
                (index, result)
            });
        }

        let mut resolved: Vec<Option<RawTx>> = vec![None; hashes.len()];
        let mut failed = 0;

        // Barrier: every task is joined before the height is judged.
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, Ok(tx))) => resolved[index] = Some(tx),
                Ok((index, Err(e))) => {
                    debug!(hash = %hashes[index], error = %e, "Transaction fetch failed");
                    failed += 1;
                }
                Err(e) => {
                    warn!(error = %e, "Transaction fetch task aborted");
                    failed += 1;
                }
            }
        }

        if failed > 0 {
            record_tx_fetch_failures(failed);
            return Err(ChainError::TxFetchFailed {
                height,
                failed,
                total: hashes.len(),
            });
        }

        Ok(resolved.into_iter().flatten().collect())
    }
}
