//! Governance backfill over the raw store.
//!
//! Replays every raw transaction carrying one message type and merges the
//! governance records it yields, without touching the rest of the refined
//! store. Used to repair proposal, deposit or vote rows after a decoder fix.

use std::sync::Arc;

use tracing::{debug, info, instrument};

use crate::error::IndexerResult;
use crate::models::{ChainContext, GovernanceRecords};
use crate::ports::{ChunkDecoder, Deriver, RawTx, Repositories};

pub struct GovernanceBackfill<R: Repositories, D: Deriver> {
    ctx: Arc<ChainContext>,
    repositories: Arc<R>,
    deriver: Arc<D>,
    decoder: Arc<dyn ChunkDecoder>,
    batch_size: i64,
}

impl<R: Repositories, D: Deriver> GovernanceBackfill<R, D> {
    pub fn new(
        ctx: Arc<ChainContext>,
        repositories: Arc<R>,
        deriver: Arc<D>,
        decoder: Arc<dyn ChunkDecoder>,
    ) -> Self {
        Self {
            ctx,
            repositories,
            deriver,
            decoder,
            batch_size: 100,
        }
    }

    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Backfill every transaction containing `msg_type`.
    ///
    /// Returns the number of governance records written.
    #[instrument(skip(self))]
    pub async fn run(&self, msg_type: &str) -> IndexerResult<usize> {
        let chain = self.ctx.chain_num;
        let raw = self.repositories.raw();

        let Some(mut cursor) = raw.first_tx_id_with_msg_type(chain, msg_type).await? else {
            info!("No raw transaction carries this message type");
            return Ok(0);
        };

        let mut written = 0;
        loop {
            let rows = raw
                .txs_with_msg_type_from(chain, msg_type, cursor, self.batch_size)
                .await?;
            let Some(last) = rows.last() else {
                break;
            };
            cursor = last.id + 1;

            let mut records = GovernanceRecords::default();
            for row in &rows {
                let tx = RawTx::from_chunk(&row.chunk, self.decoder.as_ref())?;
                if tx.is_success() {
                    records.extend(self.deriver.derive_governance(&self.ctx, &tx));
                }
            }

            if !records.is_empty() {
                self.repositories
                    .persist_governance_atomic(chain, &records)
                    .await?;
                written += records.len();
            }
            debug!(cursor, written, "Backfill batch committed");
        }

        info!(written, "✅ Governance backfill complete");
        Ok(written)
    }
}
