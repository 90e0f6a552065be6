//! Port trait for the derivation engine.
//!
//! Derivation is a pure transform from a fully fetched height to the rows
//! that describe it. The live sync loop and the refine stage call the same
//! implementation, so the same captured bytes always yield the same rows.

use crate::error::DomainResult;
use crate::models::{ChainContext, DerivedRecords, GovernanceRecords, ValidatorLedger};

use super::chain_client::{FetchedHeight, RawTx};

pub trait Deriver: Send + Sync {
    /// Derive every record for one height.
    ///
    /// `ledger` is the tracked validator state before this height. Errors
    /// are reserved for undecodable payloads; an unknown or malformed
    /// message is skipped.
    fn derive(
        &self,
        ctx: &ChainContext,
        height: &FetchedHeight,
        ledger: &ValidatorLedger,
    ) -> DomainResult<DerivedRecords>;

    /// Governance records of a single transaction, for backfills.
    fn derive_governance(&self, ctx: &ChainContext, tx: &RawTx) -> GovernanceRecords;
}
