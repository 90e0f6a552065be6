//! Governance records: proposals, deposits and votes.
//!
//! A submit-proposal message does not carry the chain-assigned id; it is
//! read from the `submit_proposal` event the message emitted.

use tracing::warn;

use chronicle_core::metrics::record_decode_error;
use chronicle_core::models::{Deposit, GovernanceRecords, Proposal, Vote, WeightedVoteOption};
use chronicle_core::ports::RawTx;

use crate::messages::{MsgDeposit, SubmitProposal, VoteCast, type_url};

/// Proposal id assigned to message `msg_index` of `tx`.
pub fn submitted_proposal_id(tx: &RawTx, msg_index: usize) -> Option<u64> {
    tx.events_for_msg(msg_index)
        .into_iter()
        .filter(|e| e.kind == "submit_proposal")
        .find_map(|e| e.attribute("proposal_id"))
        .and_then(|id| id.parse().ok())
}

pub fn submit_proposal(
    records: &mut GovernanceRecords,
    tx: &RawTx,
    msg_index: usize,
    msg: &SubmitProposal,
) {
    let Some(id) = submitted_proposal_id(tx, msg_index) else {
        let url = tx.messages.get(msg_index).map(type_url).unwrap_or_default();
        warn!(tx = %tx.hash, msg_index, "⚠️ Proposal id missing from events");
        record_decode_error(url);
        return;
    };

    let mut proposal = Proposal::with_id(id);
    proposal.title = msg.title.clone();
    proposal.description = msg.description.clone();
    proposal.proposal_type = msg.proposal_type.clone();
    proposal.proposer = Some(msg.proposer.clone());
    proposal.submit_height = Some(tx.height);
    proposal.tx_hash = Some(tx.hash.clone());
    proposal.submit_time = Some(tx.timestamp);
    records.proposals.push(proposal);

    if !msg.initial_deposit.is_empty() {
        records.deposits.push(Deposit {
            proposal_id: id,
            depositor: msg.proposer.clone(),
            amount: msg.initial_deposit.clone(),
            height: tx.height,
            tx_hash: tx.hash.clone(),
            timestamp: tx.timestamp,
        });
    }
}

pub fn deposit(records: &mut GovernanceRecords, tx: &RawTx, msg: &MsgDeposit) {
    records.deposits.push(Deposit {
        proposal_id: msg.proposal_id,
        depositor: msg.depositor.clone(),
        amount: msg.amount.clone(),
        height: tx.height,
        tx_hash: tx.hash.clone(),
        timestamp: tx.timestamp,
    });
}

/// A later vote of the same voter in the same height replaces the earlier one.
pub fn vote(records: &mut GovernanceRecords, tx: &RawTx, msg: &VoteCast) {
    records
        .votes
        .retain(|v| !(v.proposal_id == msg.proposal_id && v.voter == msg.voter));
    records.votes.push(Vote {
        proposal_id: msg.proposal_id,
        voter: msg.voter.clone(),
        options: msg
            .options
            .iter()
            .map(|(option, weight)| WeightedVoteOption {
                option: option.clone(),
                weight: weight.clone(),
            })
            .collect(),
        height: tx.height,
        tx_hash: tx.hash.clone(),
        timestamp: tx.timestamp,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chronicle_core::models::Coin;
    use chronicle_core::ports::{EventAttribute, TxEvent};
    use chronicle_core::testing::raw_tx;

    fn submit() -> SubmitProposal {
        SubmitProposal {
            proposer: "cosmos1p".into(),
            initial_deposit: vec![Coin::new("stake", "10")],
            title: Some("Upgrade".into()),
            description: None,
            proposal_type: Some("/cosmos.gov.v1beta1.TextProposal".into()),
        }
    }

    fn tx_with_proposal_event(id: &str) -> RawTx {
        let mut tx = raw_tx("AA", 42, vec![serde_json::json!({"@type": "x"})]);
        tx.events = vec![TxEvent {
            kind: "submit_proposal".into(),
            attributes: vec![
                EventAttribute {
                    key: "proposal_id".into(),
                    value: id.into(),
                },
                EventAttribute {
                    key: "msg_index".into(),
                    value: "0".into(),
                },
            ],
        }];
        tx
    }

    // Test critique: l'identifiant vient de l'événement, pas du message
    #[test]
    fn proposal_id_comes_from_events() {
        let tx = tx_with_proposal_event("17");
        let mut records = GovernanceRecords::default();
        submit_proposal(&mut records, &tx, 0, &submit());

        assert_eq!(records.proposals.len(), 1);
        let p = &records.proposals[0];
        assert_eq!(p.id, 17);
        assert_eq!(p.submit_height, Some(42));
        assert_eq!(p.status, None);
        assert_eq!(records.deposits.len(), 1);
        assert_eq!(records.deposits[0].depositor, "cosmos1p");
    }

    #[test]
    fn proposal_without_event_is_skipped() {
        let tx = raw_tx("AA", 42, vec![serde_json::json!({"@type": "x"})]);
        let mut records = GovernanceRecords::default();
        submit_proposal(&mut records, &tx, 0, &submit());
        assert!(records.is_empty());
    }

    #[test]
    fn later_vote_in_same_height_wins() {
        let tx = raw_tx("AA", 42, vec![]);
        let mut records = GovernanceRecords::default();
        let cast = |option: &str| VoteCast {
            proposal_id: 3,
            voter: "cosmos1v".into(),
            options: vec![(option.into(), "1.000000000000000000".into())],
        };
        vote(&mut records, &tx, &cast("VOTE_OPTION_YES"));
        vote(&mut records, &tx, &cast("VOTE_OPTION_NO"));

        assert_eq!(records.votes.len(), 1);
        assert_eq!(records.votes[0].options[0].option, "VOTE_OPTION_NO");
    }
}
