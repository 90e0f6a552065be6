//! Block, transaction and evidence records.

use serde_json::Value;

use chronicle_core::error::{DomainError, DomainResult};
use chronicle_core::models::{Block, Evidence, Transaction};
use chronicle_core::ports::{FetchedHeight, HeightPayload, RawTx};

/// Check that the resolved transactions are exactly the block's hashes, in order.
pub fn validate_txs(height: &FetchedHeight) -> DomainResult<()> {
    let expected = &height.payload.block.tx_hashes;
    if expected.len() != height.txs.len() {
        return Err(DomainError::ValidationError(format!(
            "height {}: block lists {} txs, {} resolved",
            height.height(),
            expected.len(),
            height.txs.len()
        )));
    }
    if let Some((want, got)) = expected
        .iter()
        .zip(&height.txs)
        .find(|(want, tx)| !want.eq_ignore_ascii_case(&tx.hash))
    {
        return Err(DomainError::ValidationError(format!(
            "height {}: expected tx {want}, got {}",
            height.height(),
            got.hash
        )));
    }
    Ok(())
}

pub fn block_record(height: &FetchedHeight) -> Block {
    let block = &height.payload.block;
    Block {
        height: block.height,
        hash: block.hash.clone(),
        proposer_address: block.proposer_address.clone(),
        tx_count: u32::try_from(height.txs.len()).unwrap_or(u32::MAX),
        timestamp: block.time,
    }
}

pub fn transaction_record(tx: &RawTx) -> DomainResult<Transaction> {
    let logs =
        serde_json::to_value(&tx.logs).map_err(|e| DomainError::DecodingError(e.to_string()))?;
    Ok(Transaction {
        hash: tx.hash.clone(),
        height: tx.height,
        code: tx.code,
        codespace: tx.codespace.clone(),
        messages: Value::Array(tx.messages.clone()),
        msg_types: tx.msg_types(),
        fee: tx.fee.clone(),
        signatures: tx.signatures.clone(),
        logs,
        memo: tx.memo.clone(),
        gas_wanted: tx.gas_wanted,
        gas_used: tx.gas_used,
        timestamp: tx.timestamp,
    })
}

/// Evidence carried by the next block, keyed by the infraction height.
pub fn evidence_records(payload: &HeightPayload) -> Vec<Evidence> {
    payload
        .next_evidence
        .iter()
        .map(|e| Evidence {
            height: e.height,
            reported_height: payload.next_height,
            kind: e.kind.clone(),
            validator_address: e.validator_address.clone(),
            total_voting_power: e.total_voting_power,
            validator_power: e.validator_power,
            timestamp: e.timestamp,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chronicle_core::ports::{RawBlock, RawEvidence};
    use chronicle_core::testing::{block_time, msg_send, raw_tx};

    fn fetched(hashes: &[&str], txs: Vec<RawTx>) -> FetchedHeight {
        FetchedHeight {
            payload: HeightPayload {
                block: RawBlock {
                    height: 10,
                    hash: "BLOCKHASH".into(),
                    chain_id: "testchain-1".into(),
                    proposer_address: "PROPOSER".into(),
                    time: block_time(10),
                    tx_hashes: hashes.iter().map(|h| h.to_string()).collect(),
                    last_commit: vec![],
                    evidence: vec![],
                    source: Default::default(),
                },
                commit: vec![],
                next_evidence: vec![RawEvidence {
                    kind: "duplicate_vote".into(),
                    height: 8,
                    validator_address: "BAD".into(),
                    total_voting_power: 400,
                    validator_power: 100,
                    timestamp: Some(block_time(8)),
                }],
                next_height: 11,
                validators: vec![],
                genesis_validators: None,
                source: Default::default(),
            },
            txs,
        }
    }

    #[test]
    fn block_record_counts_txs() {
        let tx = raw_tx("AA", 10, vec![msg_send("a", "b", "1")]);
        let height = fetched(&["AA"], vec![tx]);
        let block = block_record(&height);
        assert_eq!(block.tx_count, 1);
        assert_eq!(block.proposer_address, "PROPOSER");
        assert!(validate_txs(&height).is_ok());
    }

    // Test critique: une hauteur incomplète ne doit jamais être dérivée
    #[test]
    fn missing_tx_is_rejected() {
        let tx = raw_tx("AA", 10, vec![]);
        let height = fetched(&["AA", "BB"], vec![tx]);
        assert!(matches!(
            validate_txs(&height),
            Err(DomainError::ValidationError(_))
        ));
    }

    #[test]
    fn out_of_order_txs_are_rejected() {
        let height = fetched(
            &["AA", "BB"],
            vec![raw_tx("BB", 10, vec![]), raw_tx("AA", 10, vec![])],
        );
        assert!(validate_txs(&height).is_err());
    }

    #[test]
    fn evidence_keeps_infraction_height() {
        let height = fetched(&[], vec![]);
        let evidence = evidence_records(&height.payload);
        assert_eq!(evidence.len(), 1);
        assert_eq!(evidence[0].height, 8);
        assert_eq!(evidence[0].reported_height, 11);
    }

    #[test]
    fn transaction_record_keeps_message_order() {
        let tx = raw_tx(
            "AA",
            10,
            vec![msg_send("a", "b", "1"), msg_send("b", "c", "2")],
        );
        let record = transaction_record(&tx).unwrap();
        assert_eq!(record.msg_types.len(), 2);
        assert_eq!(record.messages[1]["to_address"], "c");
        assert!(record.is_success());
    }
}
