mod accounts;
mod backfill;
mod context;
mod fetcher;
mod indexer;
mod poller;
mod refine;

pub use accounts::AccountRefresher;
pub use backfill::GovernanceBackfill;
pub use context::resolve_context;
pub use fetcher::{FetcherConfig, HeightFetcher};
pub use indexer::{IndexerConfig, IndexerService, SyncMode};
pub use poller::{
    LiveProposals, PollerConfig, ProposalTracker, ValidatorPoller, merge_validator_set,
};
pub use refine::{RefineConfig, RefineService};

use std::time::Duration;

use tokio::sync::watch;

use crate::error::{IndexerError, IndexerResult};

/// Sleep for `duration`, returning early with `ShutdownRequested`.
async fn pause(duration: Duration, shutdown_rx: &mut watch::Receiver<bool>) -> IndexerResult<()> {
    tokio::select! {
        _ = tokio::time::sleep(duration) => Ok(()),
        changed = shutdown_rx.changed() => {
            // A dropped sender counts as shutdown.
            if changed.is_err() || *shutdown_rx.borrow() {
                Err(IndexerError::ShutdownRequested)
            } else {
                Ok(())
            }
        }
    }
}
