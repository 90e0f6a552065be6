//! Derivation engine for the chronicle exporter.
//!
//! Turns a fully fetched height into the rows that describe it. Every
//! function here is pure: the same captured height and validator ledger
//! always yield the same records, which is what lets the refine stage
//! rebuild the refined store from raw captures alone.
//!
//! # Sub-derivations
//!
//! - [`block`] - block, transaction and evidence records
//! - [`uptime`] - missed precommits from the next block's commit
//! - [`staking`] - voting-power events and newly seen validators
//! - [`governance`] - proposals, deposits and votes
//! - [`accounts`] - account activity and transfers
//!
//! Messages are decoded once into [`messages::Msg`] and dispatched by kind.
//! Failed transactions are recorded but derive nothing else; an unknown
//! message type is skipped, a malformed one is logged and skipped.
//!
//! # Usage
//!
//! ```ignore
//! use chronicle_handlers::DerivationEngine;
//!
//! let engine = Arc::new(DerivationEngine::new());
//! let indexer = IndexerService::new(config, ctx, client, repositories, engine, notifier);
//! ```

pub mod accounts;
pub mod block;
pub mod governance;
pub mod messages;
pub mod staking;
pub mod uptime;
pub mod utils;

use tracing::{debug, trace, warn};

use chronicle_core::error::DomainResult;
use chronicle_core::metrics::record_decode_error;
use chronicle_core::models::{ChainContext, DerivedRecords, GovernanceRecords, ValidatorLedger};
use chronicle_core::ports::{Deriver, FetchedHeight, RawTx};

use crate::accounts::AccountCollector;
use crate::messages::Msg;
use crate::staking::PowerTracker;

/// Decode every message of `tx`, logging and dropping the malformed ones.
fn decoded(tx: &RawTx) -> Vec<(usize, Msg)> {
    tx.messages
        .iter()
        .enumerate()
        .filter_map(|(index, value)| match messages::decode(value) {
            Ok(msg) => Some((index, msg)),
            Err(e) => {
                let url = messages::type_url(value);
                warn!(tx = %tx.hash, msg_index = index, type_url = url, error = %e, "⚠️ Skipping undecodable message");
                record_decode_error(url);
                None
            }
        })
        .collect()
}

/// Stateless [`Deriver`] implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct DerivationEngine;

impl DerivationEngine {
    pub fn new() -> Self {
        Self
    }
}

impl Deriver for DerivationEngine {
    fn derive(
        &self,
        ctx: &ChainContext,
        height: &FetchedHeight,
        ledger: &ValidatorLedger,
    ) -> DomainResult<DerivedRecords> {
        block::validate_txs(height)?;

        let payload = &height.payload;
        let mut records = DerivedRecords::for_block(block::block_record(height));
        records.transactions = height
            .txs
            .iter()
            .map(block::transaction_record)
            .collect::<DomainResult<_>>()?;
        records.evidence = block::evidence_records(payload);
        records.misses = uptime::misses(payload);

        let mut power = PowerTracker::new(ctx, payload, ledger);
        power.genesis()?;
        let mut accounts = AccountCollector::default();
        let mut gov = GovernanceRecords::default();

        for tx in &height.txs {
            if !tx.is_success() {
                trace!(tx = %tx.hash, code = tx.code, "Failed tx, nothing to derive");
                continue;
            }
            for (index, msg) in decoded(tx) {
                match &msg {
                    Msg::Send(m) => accounts.send(tx, m),
                    Msg::MultiSend(m) => accounts.multi_send(tx, m),
                    Msg::CreateValidator(m) => power.create_validator(tx, m),
                    Msg::Delegate(m) => power.delegate(tx, m),
                    Msg::Undelegate(m) => power.undelegate(tx, m),
                    Msg::BeginRedelegate(m) => power.redelegate(tx, m),
                    Msg::SubmitProposal(m) => governance::submit_proposal(&mut gov, tx, index, m),
                    Msg::Deposit(m) => governance::deposit(&mut gov, tx, m),
                    Msg::Vote(m) => governance::vote(&mut gov, tx, m),
                    Msg::Unhandled(url) => trace!(tx = %tx.hash, type_url = %url, "Unhandled message"),
                }
            }
        }

        let (validators, power_events) = power.finish();
        records.validators = validators;
        records.power_events = power_events;
        records.governance = gov;
        records.account_activity = accounts.activity;
        records.transfers = accounts.transfers;

        debug!(
            height = height.height(),
            txs = records.transactions.len(),
            misses = records.misses.len(),
            power_events = records.power_events.len(),
            governance = records.governance.len(),
            "Derived height"
        );
        Ok(records)
    }

    fn derive_governance(&self, _ctx: &ChainContext, tx: &RawTx) -> GovernanceRecords {
        let mut gov = GovernanceRecords::default();
        if !tx.is_success() {
            return gov;
        }
        for (index, msg) in decoded(tx) {
            match &msg {
                Msg::SubmitProposal(m) => governance::submit_proposal(&mut gov, tx, index, m),
                Msg::Deposit(m) => governance::deposit(&mut gov, tx, m),
                Msg::Vote(m) => governance::vote(&mut gov, tx, m),
                _ => {}
            }
        }
        gov
    }
}
