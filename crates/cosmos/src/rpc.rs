//! CometBFT JSON-RPC response types and their conversion into core payloads.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::trace;

use chronicle_core::error::{ChainError, ChainResult};
use chronicle_core::ports::{
    BlockIdFlag, CommitSig, ConsensusValidator, NodeStatus, RawBlock, RawEvidence, ValidatorPage,
};

use crate::codec::{int_of, number, tx_hash};

// =============================================================================
// Envelope
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub(crate) struct RpcResponse<T> {
    #[serde(default)]
    result: Option<T>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RpcErrorBody {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: String,
}

impl<T> RpcResponse<T> {
    pub(crate) fn into_result(self, method: &str) -> ChainResult<T> {
        if let Some(err) = self.error {
            return Err(ChainError::RpcError(format!(
                "{method}: {} ({}) {}",
                err.message, err.code, err.data
            )));
        }
        self.result
            .ok_or_else(|| ChainError::DecodeError(format!("{method}: empty result")))
    }
}

/// The node has not produced the requested height yet.
pub(crate) fn is_height_unavailable(err: &ChainError) -> bool {
    matches!(err, ChainError::RpcError(msg) if msg.contains("must be less than or equal"))
}

// =============================================================================
// /status
// =============================================================================

#[derive(Debug, Deserialize)]
pub(crate) struct StatusResult {
    node_info: NodeInfo,
    sync_info: SyncInfo,
}

#[derive(Debug, Deserialize)]
struct NodeInfo {
    network: String,
}

#[derive(Debug, Deserialize)]
struct SyncInfo {
    #[serde(deserialize_with = "number")]
    latest_block_height: u64,
    #[serde(default, deserialize_with = "number")]
    earliest_block_height: u64,
    #[serde(default)]
    catching_up: bool,
}

impl From<StatusResult> for NodeStatus {
    fn from(status: StatusResult) -> Self {
        NodeStatus {
            chain_id: status.node_info.network,
            latest_height: status.sync_info.latest_block_height,
            earliest_height: status.sync_info.earliest_block_height,
            catching_up: status.sync_info.catching_up,
        }
    }
}

// =============================================================================
// /block
// =============================================================================

#[derive(Debug, Deserialize)]
pub(crate) struct BlockResult {
    block_id: BlockId,
    block: BlockBody,
}

#[derive(Debug, Deserialize)]
struct BlockId {
    hash: String,
}

#[derive(Debug, Deserialize)]
struct BlockBody {
    header: Header,
    data: BlockData,
    #[serde(default)]
    evidence: EvidenceList,
    #[serde(default)]
    last_commit: Option<Commit>,
}

#[derive(Debug, Deserialize)]
struct Header {
    chain_id: String,
    #[serde(deserialize_with = "number")]
    height: u64,
    time: DateTime<Utc>,
    proposer_address: String,
}

#[derive(Debug, Deserialize)]
struct BlockData {
    #[serde(default)]
    txs: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct EvidenceList {
    #[serde(default)]
    evidence: Option<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct Commit {
    #[serde(default)]
    signatures: Vec<CommitSignature>,
}

#[derive(Debug, Deserialize)]
struct CommitSignature {
    block_id_flag: Value,
    #[serde(default)]
    validator_address: Option<String>,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
}

impl BlockResult {
    /// Convert, keeping `source` (the `/block` result this was read from).
    pub(crate) fn into_raw_block(self, source: Value) -> ChainResult<RawBlock> {
        let BlockBody {
            header,
            data,
            evidence,
            last_commit,
        } = self.block;

        let tx_hashes = data
            .txs
            .unwrap_or_default()
            .iter()
            .map(|tx| tx_hash(tx))
            .collect::<ChainResult<Vec<_>>>()?;

        let last_commit = last_commit
            .map(|c| c.signatures)
            .unwrap_or_default()
            .into_iter()
            .map(CommitSignature::into_commit_sig)
            .collect();

        let evidence = evidence
            .evidence
            .unwrap_or_default()
            .iter()
            .filter_map(|e| {
                let parsed = evidence_of(e);
                if parsed.is_none() {
                    trace!(height = header.height, "Skipping evidence without a duplicate vote");
                }
                parsed
            })
            .collect();

        Ok(RawBlock {
            height: header.height,
            hash: self.block_id.hash,
            chain_id: header.chain_id,
            proposer_address: header.proposer_address,
            time: header.time,
            tx_hashes,
            last_commit,
            evidence,
            source,
        })
    }
}

impl CommitSignature {
    fn into_commit_sig(self) -> CommitSig {
        let flag = block_id_flag(&self.block_id_flag);
        let absent = flag == BlockIdFlag::Absent;
        CommitSig {
            flag,
            validator_address: if absent {
                String::new()
            } else {
                self.validator_address.unwrap_or_default()
            },
            timestamp: if absent { None } else { self.timestamp },
        }
    }
}

fn block_id_flag(value: &Value) -> BlockIdFlag {
    let code = match value {
        Value::String(s) => match s.as_str() {
            "BLOCK_ID_FLAG_ABSENT" => 1,
            "BLOCK_ID_FLAG_COMMIT" => 2,
            "BLOCK_ID_FLAG_NIL" => 3,
            other => other.parse().unwrap_or(0),
        },
        other => int_of::<u64>(other).unwrap_or(0),
    };
    match code {
        1 => BlockIdFlag::Absent,
        2 => BlockIdFlag::Commit,
        3 => BlockIdFlag::Nil,
        _ => BlockIdFlag::Unknown,
    }
}

/// Duplicate-vote evidence. Other evidence kinds carry no single validator.
fn evidence_of(value: &Value) -> Option<RawEvidence> {
    let inner = value.get("value")?;
    let vote = inner.get("vote_a")?;
    Some(RawEvidence {
        kind: value.get("type")?.as_str()?.to_string(),
        height: int_of(vote.get("height")?)?,
        validator_address: vote.get("validator_address")?.as_str()?.to_string(),
        total_voting_power: int_of(inner.get("total_voting_power")?)?,
        validator_power: int_of(inner.get("validator_power")?)?,
        timestamp: inner
            .get("timestamp")
            .and_then(Value::as_str)
            .and_then(|t| t.parse::<DateTime<Utc>>().ok()),
    })
}

// =============================================================================
// /validators
// =============================================================================

#[derive(Debug, Deserialize)]
pub(crate) struct ValidatorsResult {
    validators: Vec<RpcValidator>,
    #[serde(deserialize_with = "number")]
    total: usize,
}

#[derive(Debug, Deserialize)]
struct RpcValidator {
    address: String,
    pub_key: RpcPubKey,
    #[serde(deserialize_with = "number")]
    voting_power: i64,
    #[serde(deserialize_with = "number")]
    proposer_priority: i64,
}

#[derive(Debug, Deserialize)]
struct RpcPubKey {
    value: String,
}

impl ValidatorsResult {
    pub(crate) fn into_page(self, source: Value) -> ValidatorPage {
        ValidatorPage {
            validators: self
                .validators
                .into_iter()
                .map(|v| ConsensusValidator {
                    address: v.address,
                    pub_key: v.pub_key.value,
                    voting_power: v.voting_power,
                    proposer_priority: v.proposer_priority,
                })
                .collect(),
            total: self.total,
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn block_json() -> Value {
        json!({
            "block_id": {"hash": "AAAA"},
            "block": {
                "header": {
                    "chain_id": "test-1",
                    "height": "12",
                    "time": "2024-03-01T10:00:00.123456789Z",
                    "proposer_address": "PROPOSER"
                },
                "data": {"txs": [""]},
                "evidence": {"evidence": [
                    {
                        "type": "tendermint/DuplicateVoteEvidence",
                        "value": {
                            "vote_a": {"height": "10", "validator_address": "BAD"},
                            "vote_b": {"height": "10", "validator_address": "BAD"},
                            "total_voting_power": "1000",
                            "validator_power": "10",
                            "timestamp": "2024-03-01T09:59:00Z"
                        }
                    },
                    {"type": "tendermint/LightClientAttackEvidence", "value": {}}
                ]},
                "last_commit": {
                    "height": "11",
                    "signatures": [
                        {"block_id_flag": 2, "validator_address": "V1", "timestamp": "2024-03-01T09:59:55Z"},
                        {"block_id_flag": 1, "validator_address": "", "timestamp": "0001-01-01T00:00:00Z"},
                        {"block_id_flag": 3, "validator_address": "V3", "timestamp": "2024-03-01T09:59:56Z"}
                    ]
                }
            }
        })
    }

    // Test critique: les emplacements absents du commit restent à leur index
    #[test]
    fn block_converts_commit_and_evidence() {
        let result: BlockResult = serde_json::from_value(block_json()).unwrap();
        let block = result.into_raw_block(block_json()).unwrap();

        assert_eq!(block.height, 12);
        assert_eq!(block.chain_id, "test-1");
        assert_eq!(
            block.tx_hashes,
            vec!["E3B0C44298FC1C149AFBF4C8996FB92427AE41E4649B934CA495991B7852B855"]
        );

        let flags: Vec<_> = block.last_commit.iter().map(|s| s.flag).collect();
        assert_eq!(
            flags,
            vec![BlockIdFlag::Commit, BlockIdFlag::Absent, BlockIdFlag::Nil]
        );
        assert!(block.last_commit[1].validator_address.is_empty());
        assert!(block.last_commit[1].timestamp.is_none());

        assert_eq!(block.evidence.len(), 1);
        assert_eq!(block.evidence[0].height, 10);
        assert_eq!(block.evidence[0].validator_address, "BAD");
        assert_eq!(block.evidence[0].validator_power, 10);
    }

    #[test]
    fn empty_block_has_no_txs() {
        let mut value = block_json();
        value["block"]["data"]["txs"] = Value::Null;
        value["block"]["evidence"]["evidence"] = Value::Null;
        value["block"]["last_commit"] = Value::Null;
        let block = serde_json::from_value::<BlockResult>(value.clone())
            .unwrap()
            .into_raw_block(value)
            .unwrap();
        assert!(block.tx_hashes.is_empty());
        assert!(block.evidence.is_empty());
        assert!(block.last_commit.is_empty());
    }

    #[test]
    fn named_flags_are_understood() {
        assert_eq!(block_id_flag(&json!("BLOCK_ID_FLAG_ABSENT")), BlockIdFlag::Absent);
        assert_eq!(block_id_flag(&json!("2")), BlockIdFlag::Commit);
        assert_eq!(block_id_flag(&json!(9)), BlockIdFlag::Unknown);
    }

    #[test]
    fn rpc_error_reports_unavailable_height() {
        let response: RpcResponse<BlockResult> = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": -1,
            "error": {
                "code": -32603,
                "message": "Internal error",
                "data": "height 20 must be less than or equal to the current blockchain height 19"
            }
        }))
        .unwrap();
        let err = response.into_result("block").unwrap_err();
        assert!(is_height_unavailable(&err));
    }

    #[test]
    fn validators_page_converts() {
        let source = json!({
            "block_height": "5",
            "validators": [{
                "address": "ABCD",
                "pub_key": {"type": "tendermint/PubKeyEd25519", "value": "a2V5"},
                "voting_power": "100",
                "proposer_priority": "-50"
            }],
            "count": "1",
            "total": "1"
        });
        let result: ValidatorsResult = serde_json::from_value(source.clone()).unwrap();
        let page = result.into_page(source);
        assert_eq!(page.total, 1);
        assert_eq!(page.validators[0].pub_key, "a2V5");
        assert_eq!(page.validators[0].proposer_priority, -50);
    }

    #[test]
    fn status_converts() {
        let status: StatusResult = serde_json::from_value(json!({
            "node_info": {"network": "test-1"},
            "sync_info": {"latest_block_height": "99", "earliest_block_height": "1", "catching_up": false}
        }))
        .unwrap();
        let status = NodeStatus::from(status);
        assert_eq!(status.chain_id, "test-1");
        assert_eq!(status.latest_height, 99);
    }
}
