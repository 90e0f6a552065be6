//! Validator uptime.
//!
//! The precommits for height H travel in block H+1's last-commit. Slots are
//! in validator-set order, so an absent slot is matched by index against the
//! consensus set at H.

use tracing::warn;

use chronicle_core::models::MissDetail;
use chronicle_core::ports::HeightPayload;

/// One miss per absent precommit.
pub fn misses(payload: &HeightPayload) -> Vec<MissDetail> {
    let height = payload.height();

    if payload.commit.len() != payload.validators.len() {
        warn!(
            height,
            slots = payload.commit.len(),
            validators = payload.validators.len(),
            "⚠️ Commit size differs from validator set"
        );
    }

    payload
        .commit
        .iter()
        .enumerate()
        .filter(|(_, sig)| sig.is_absent())
        .filter_map(|(index, _)| {
            let validator = payload.validators.get(index);
            if validator.is_none() {
                warn!(height, index, "⚠️ Absent slot outside the validator set");
            }
            validator
        })
        .map(|validator| MissDetail {
            address: validator.address.clone(),
            height,
            proposer_address: payload.block.proposer_address.clone(),
            timestamp: payload.block.time,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chronicle_core::ports::{BlockIdFlag, CommitSig, RawBlock};
    use chronicle_core::testing::{block_time, consensus_validator};

    fn payload(height: u64, absent: &[usize]) -> HeightPayload {
        let validators: Vec<_> = (1..=4).map(|i| consensus_validator(i, 100)).collect();
        let commit = validators
            .iter()
            .enumerate()
            .map(|(i, v)| {
                if absent.contains(&i) {
                    CommitSig {
                        flag: BlockIdFlag::Absent,
                        validator_address: String::new(),
                        timestamp: None,
                    }
                } else {
                    CommitSig {
                        flag: BlockIdFlag::Commit,
                        validator_address: v.address.clone(),
                        timestamp: Some(block_time(height + 1)),
                    }
                }
            })
            .collect();
        HeightPayload {
            block: RawBlock {
                height,
                hash: "H".into(),
                chain_id: "testchain-1".into(),
                proposer_address: validators[0].address.clone(),
                time: block_time(height),
                tx_hashes: vec![],
                last_commit: vec![],
                evidence: vec![],
                source: Default::default(),
            },
            commit,
            next_evidence: vec![],
            next_height: height + 1,
            validators,
            genesis_validators: None,
            source: Default::default(),
        }
    }

    #[test]
    fn absent_slot_maps_to_validator_by_index() {
        let payload = payload(100, &[2]);
        let misses = misses(&payload);
        assert_eq!(misses.len(), 1);
        assert_eq!(misses[0].address, payload.validators[2].address);
        assert_eq!(misses[0].height, 100);
        assert_eq!(misses[0].proposer_address, payload.validators[0].address);
    }

    #[test]
    fn full_commit_yields_nothing() {
        assert!(misses(&payload(100, &[])).is_empty());
    }

    // Test critique: la genèse est signée dans le bloc suivant, ses absences comptent
    #[test]
    fn genesis_height_records_misses() {
        let payload = payload(1, &[0, 1]);
        let misses = misses(&payload);
        assert_eq!(misses.len(), 2);
        assert!(misses.iter().all(|m| m.height == 1));
        assert_eq!(misses[1].address, payload.validators[1].address);
    }
}
