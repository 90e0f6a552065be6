//! Refine stage - rebuilds refined rows from the raw store.
//!
//! Raw blocks are replayed in id order above the refined watermark,
//! decoded from the stored node responses and run through the same
//! [`Deriver`] and writer as the live loop. No chain access is needed.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::error::{DomainError, IndexerError, IndexerResult};
use crate::metrics::{
    ProcessingTimer, record_height_failure, record_height_indexed, set_watermark,
};
use crate::models::ChainContext;
use crate::ports::{
    ChunkDecoder, Deriver, FetchedHeight, HeightBatch, HeightPayload, RawBlockRow, RawTx,
    Repositories,
};

use super::pause;

#[derive(Debug, Clone)]
pub struct RefineConfig {
    /// Raw blocks read per batch.
    pub batch_size: i64,
    /// Keep polling for new raw blocks once the store is drained.
    pub follow: bool,
    pub poll_interval: Duration,
    /// Delay before retrying a height whose refine failed.
    pub retry_delay: Duration,
}

impl Default for RefineConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            follow: false,
            poll_interval: Duration::from_secs(1),
            retry_delay: Duration::from_secs(1),
        }
    }
}

pub struct RefineService<R: Repositories, D: Deriver> {
    config: RefineConfig,
    ctx: Arc<ChainContext>,
    repositories: Arc<R>,
    deriver: Arc<D>,
    decoder: Arc<dyn ChunkDecoder>,
}

impl<R: Repositories, D: Deriver> RefineService<R, D> {
    pub fn new(
        config: RefineConfig,
        ctx: Arc<ChainContext>,
        repositories: Arc<R>,
        deriver: Arc<D>,
        decoder: Arc<dyn ChunkDecoder>,
    ) -> Self {
        Self {
            config,
            ctx,
            repositories,
            deriver,
            decoder,
        }
    }

    /// Replay the raw store. Returns the number of heights refined.
    ///
    /// A failed height is rolled back and retried in place. Only a gap in
    /// the raw store stops the stage.
    #[instrument(skip_all, fields(chain = %self.ctx.chain_id))]
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) -> IndexerResult<u64> {
        info!("🔁 Starting refine stage");
        let chain = self.ctx.chain_num;
        let mut refined = 0;

        loop {
            if *shutdown_rx.borrow() {
                return Err(IndexerError::ShutdownRequested);
            }

            let (after, rows) = match self.next_batch(chain).await {
                Ok(batch) => batch,
                Err(e) => {
                    warn!(error = %e, "⚠️  Failed to read raw store, retrying...");
                    pause(self.config.retry_delay, &mut shutdown_rx).await?;
                    continue;
                }
            };

            if rows.is_empty() {
                if !self.config.follow {
                    info!(refined, "✅ Raw store drained");
                    return Ok(refined);
                }
                pause(self.config.poll_interval, &mut shutdown_rx).await?;
                continue;
            }

            let mut expected = after + 1;
            for row in rows {
                if row.height != expected {
                    return Err(IndexerError::HeightFailed {
                        height: expected,
                        reason: format!("raw store jumps to height {}", row.height),
                    });
                }
                self.refine_until_written(&row, &mut shutdown_rx).await?;
                set_watermark(row.height);
                refined += 1;
                expected += 1;
            }
            debug!(refined, "Refine batch committed");
        }
    }

    /// Refined watermark and the raw blocks above it.
    async fn next_batch(&self, chain: i32) -> IndexerResult<(u64, Vec<RawBlockRow>)> {
        let watermark = self.repositories.blocks().latest_height(chain).await?;
        let after = watermark.unwrap_or(self.ctx.genesis_height.saturating_sub(1));
        let rows = self
            .repositories
            .raw()
            .blocks_after(chain, after, self.config.batch_size)
            .await?;
        Ok((after, rows))
    }

    async fn refine_until_written(
        &self,
        row: &RawBlockRow,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> IndexerResult<()> {
        loop {
            match self.refine_row(row).await {
                Ok(_) => return Ok(()),
                Err(e @ IndexerError::HeightFailed { .. }) => return Err(e),
                Err(e) => {
                    error!(height = row.height, error = %e, "❌ Refine failed, retrying");
                    pause(self.config.retry_delay, shutdown_rx).await?;
                }
            }
        }
    }

    /// Rebuild and write the refined rows of one raw block.
    #[instrument(skip_all, fields(height = row.height))]
    pub async fn refine_row(&self, row: &RawBlockRow) -> IndexerResult<bool> {
        let _timer = ProcessingTimer::new();
        let fetched = self
            .load(row)
            .await
            .inspect_err(|_| record_height_failure("decode"))?;

        let ledger = self.repositories.validators().ledger(row.chain_num).await?;
        let records = self
            .deriver
            .derive(&self.ctx, &fetched, &ledger)
            .inspect_err(|_| record_height_failure("derive"))?;

        let outcome = self
            .repositories
            .persist_height_atomic(HeightBatch {
                chain_num: row.chain_num,
                raw: None,
                refined: Some(&records),
            })
            .await
            .inspect_err(|_| record_height_failure("write"))?;

        trace!(written = outcome.refined, "Height refined");
        record_height_indexed("refine");
        Ok(outcome.refined)
    }

    /// Decode a raw block and its transactions back into a [`FetchedHeight`].
    async fn load(&self, row: &RawBlockRow) -> IndexerResult<FetchedHeight> {
        let payload = HeightPayload::from_chunk(&row.chunk, self.decoder.as_ref())?;
        let tx_rows = self
            .repositories
            .raw()
            .txs_at(row.chain_num, row.height)
            .await?;

        let mut txs = tx_rows
            .iter()
            .map(|r| RawTx::from_chunk(&r.chunk, self.decoder.as_ref()))
            .collect::<Result<Vec<_>, DomainError>>()?;

        // Block order, regardless of how the rows were inserted.
        let position = |hash: &str| {
            payload
                .block
                .tx_hashes
                .iter()
                .position(|h| h == hash)
                .unwrap_or(usize::MAX)
        };
        txs.sort_by_key(|tx| position(&tx.hash));

        if txs.len() != payload.block.tx_hashes.len() {
            return Err(IndexerError::HeightFailed {
                height: row.height,
                reason: format!(
                    "raw store holds {} of {} transactions",
                    txs.len(),
                    payload.block.tx_hashes.len()
                ),
            });
        }

        Ok(FetchedHeight { payload, txs })
    }
}
