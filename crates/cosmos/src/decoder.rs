//! Raw store decoding for Cosmos node responses.

use serde::de::DeserializeOwned;
use serde_json::Value;

use chronicle_core::error::{DomainError, DomainResult};
use chronicle_core::ports::{ChunkDecoder, RawBlock, RawTx, StakingValidator, ValidatorPage};

use crate::codec::Captured;
use crate::query::{GatewayValidator, GetTxResponse};
use crate::rpc::{BlockResult, ValidatorsResult};

/// Decodes the responses [`CosmosClient`](crate::CosmosClient) captures.
///
/// Uses the same conversions as the client, so refine yields exactly what
/// a live fetch of the same responses would.
#[derive(Debug, Clone, Copy, Default)]
pub struct CosmosChunkDecoder;

fn capture<T: DeserializeOwned>(what: &str, source: &Value) -> DomainResult<Captured<T>> {
    Captured::from_source(source.clone())
        .map_err(|e| DomainError::DecodingError(format!("{what}: {e}")))
}

impl ChunkDecoder for CosmosChunkDecoder {
    fn block(&self, source: &Value) -> DomainResult<RawBlock> {
        let block = capture::<BlockResult>("block", source)?;
        block
            .value
            .into_raw_block(block.source)
            .map_err(|e| DomainError::DecodingError(e.to_string()))
    }

    fn validator_page(&self, source: &Value) -> DomainResult<ValidatorPage> {
        let page = capture::<ValidatorsResult>("validators", source)?;
        Ok(page.value.into_page(page.source))
    }

    fn staking_validator(&self, source: &Value) -> DomainResult<StakingValidator> {
        let validator = capture::<GatewayValidator>("staking validator", source)?;
        Ok(validator.value.into_staking(validator.source))
    }

    fn tx(&self, source: &Value) -> DomainResult<RawTx> {
        let tx = capture::<GetTxResponse>("tx", source)?;
        Ok(tx.value.into_raw_tx(tx.source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chronicle_core::ports::{BlockIdFlag, HeightPayload, HeightSource};
    use serde_json::json;

    fn block_json(height: u64, signatures: Value) -> Value {
        json!({
            "block_id": {"hash": format!("HASH{height}")},
            "block": {
                "header": {
                    "chain_id": "test-1",
                    "height": height.to_string(),
                    "time": "2024-03-01T10:00:00Z",
                    "proposer_address": "PROPOSER",
                    "app_hash": "F00D"
                },
                "data": {"txs": [""]},
                "evidence": {"evidence": []},
                "last_commit": {"height": (height - 1).to_string(), "signatures": signatures}
            }
        })
    }

    fn validators_json() -> Value {
        json!({
            "block_height": "12",
            "validators": [
                {"address": "V1", "pub_key": {"type": "tendermint/PubKeyEd25519", "value": "a2V5MQ=="},
                 "voting_power": "100", "proposer_priority": "0"},
                {"address": "V2", "pub_key": {"type": "tendermint/PubKeyEd25519", "value": "a2V5Mg=="},
                 "voting_power": "50", "proposer_priority": "0"}
            ],
            "count": "2",
            "total": "2"
        })
    }

    fn chunk() -> Vec<u8> {
        let source = HeightSource {
            block: block_json(12, json!([])),
            next_block: block_json(
                13,
                json!([
                    {"block_id_flag": 2, "validator_address": "V1", "timestamp": "2024-03-01T10:00:05Z"},
                    {"block_id_flag": "BLOCK_ID_FLAG_ABSENT", "validator_address": "", "timestamp": "0001-01-01T00:00:00Z"}
                ]),
            ),
            validator_pages: vec![validators_json()],
            genesis_validators: None,
        };
        serde_json::to_vec(&source).unwrap()
    }

    // Test critique: le raffinage relit les réponses brutes du noeud avec les mêmes règles
    #[test]
    fn height_chunk_decodes_node_responses() {
        let payload = HeightPayload::from_chunk(&chunk(), &CosmosChunkDecoder).unwrap();

        assert_eq!(payload.height(), 12);
        assert_eq!(payload.next_height, 13);
        assert_eq!(
            payload.block.tx_hashes,
            vec!["E3B0C44298FC1C149AFBF4C8996FB92427AE41E4649B934CA495991B7852B855"]
        );
        let flags: Vec<_> = payload.commit.iter().map(|s| s.flag).collect();
        assert_eq!(flags, vec![BlockIdFlag::Commit, BlockIdFlag::Absent]);
        assert_eq!(payload.validators.len(), 2);
        assert_eq!(payload.validators[1].voting_power, 50);

        // Re-capturing yields the stored bytes, fields the decoder ignores included.
        assert_eq!(payload.to_chunk().unwrap(), chunk());
        assert_eq!(payload.block.source["block"]["header"]["app_hash"], "F00D");
    }

    #[test]
    fn malformed_response_is_a_decoding_error() {
        let mut source: HeightSource = serde_json::from_slice(&chunk()).unwrap();
        source.next_block = json!({"block_id": {}});
        let chunk = serde_json::to_vec(&source).unwrap();

        assert!(matches!(
            HeightPayload::from_chunk(&chunk, &CosmosChunkDecoder),
            Err(DomainError::DecodingError(_))
        ));
    }

    #[test]
    fn tx_chunk_decodes_gateway_response() {
        let response = json!({
            "tx": {
                "body": {"messages": [{"@type": "/cosmos.gov.v1beta1.MsgVote", "proposal_id": "3"}]},
                "auth_info": {"fee": {"amount": []}},
                "signatures": []
            },
            "tx_response": {
                "height": "12",
                "txhash": "e3b0",
                "code": 0,
                "timestamp": "2024-03-01T10:00:00Z"
            }
        });
        let chunk = serde_json::to_vec(&response).unwrap();

        let tx = RawTx::from_chunk(&chunk, &CosmosChunkDecoder).unwrap();
        assert_eq!(tx.hash, "E3B0");
        assert_eq!(tx.msg_types(), vec!["/cosmos.gov.v1beta1.MsgVote"]);
        assert_eq!(tx.to_chunk().unwrap(), chunk);
    }
}
