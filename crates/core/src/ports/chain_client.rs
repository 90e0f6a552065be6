//! Port trait for chain access.
//!
//! This trait defines the query surface the pipeline needs from a node:
//! blocks, transactions, validator sets and module state. Implementations
//! live in the infrastructure layer (e.g., `chronicle-cosmos`).
//!
//! Every payload the pipeline captures carries the node response it was
//! decoded from (`source`). The raw store keeps those responses verbatim and
//! a [`ChunkDecoder`] turns them back into payloads during refine.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ChainResult, DomainError, DomainResult};
use crate::models::{Coin, Proposal, ProposalStatus, Validator, address};

// =============================================================================
// Block Payloads
// =============================================================================

/// Block as returned by the consensus node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawBlock {
    pub height: u64,
    pub hash: String,
    pub chain_id: String,
    pub proposer_address: String,
    pub time: DateTime<Utc>,
    /// Upper-case hex tx hashes, block order.
    pub tx_hashes: Vec<String>,
    /// Precommits for the previous height.
    pub last_commit: Vec<CommitSig>,
    pub evidence: Vec<RawEvidence>,
    /// Node response this block was decoded from.
    #[serde(skip)]
    pub source: Value,
}

/// Precommit flag of one validator-set slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockIdFlag {
    Absent,
    Commit,
    Nil,
    Unknown,
}

/// One slot of a commit. Slots are in validator-set order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitSig {
    pub flag: BlockIdFlag,
    /// Empty for absent slots.
    pub validator_address: String,
    pub timestamp: Option<DateTime<Utc>>,
}

impl CommitSig {
    pub fn is_absent(&self) -> bool {
        self.flag == BlockIdFlag::Absent
    }
}

/// Duplicate-vote evidence as carried in a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvidence {
    pub kind: String,
    /// Height of the infraction.
    pub height: u64,
    pub validator_address: String,
    pub total_voting_power: i64,
    pub validator_power: i64,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Member of the consensus validator set at a height.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusValidator {
    /// Upper-case hex consensus address.
    pub address: String,
    /// Base64 ed25519 public key.
    pub pub_key: String,
    pub voting_power: i64,
    pub proposer_priority: i64,
}

/// One page of the consensus validator set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatorPage {
    pub validators: Vec<ConsensusValidator>,
    pub total: usize,
    #[serde(skip)]
    pub source: Value,
}

/// Validator from the staking module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StakingValidator {
    pub operator_address: String,
    /// Base64 ed25519 public key.
    pub consensus_pubkey: String,
    pub moniker: String,
    pub status: String,
    pub jailed: bool,
    pub tokens: String,
    pub delegator_shares: String,
    pub commission_rate: String,
    pub commission_max_rate: String,
    pub commission_max_change_rate: String,
    pub min_self_delegation: String,
    #[serde(skip)]
    pub source: Value,
}

impl StakingValidator {
    /// Validator row for this staking entry under tracking id `id`.
    pub fn to_validator(&self, id: i64) -> DomainResult<Validator> {
        let proposer_address = address::consensus_hex_address(&self.consensus_pubkey)?;
        let consensus_address =
            address::consensus_bech32_address(&self.operator_address, &proposer_address)?;
        Ok(Validator {
            id,
            operator_address: self.operator_address.clone(),
            consensus_pubkey: self.consensus_pubkey.clone(),
            proposer_address,
            consensus_address,
            moniker: self.moniker.clone(),
            status: self.status.clone(),
            jailed: self.jailed,
            tokens: self.tokens.clone(),
            delegator_shares: self.delegator_shares.clone(),
            commission_rate: self.commission_rate.clone(),
            commission_max_rate: self.commission_max_rate.clone(),
            commission_max_change_rate: self.commission_max_change_rate.clone(),
            min_self_delegation: self.min_self_delegation.clone(),
            rank: None,
        })
    }
}

// =============================================================================
// Transaction Payloads
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventAttribute {
    pub key: String,
    pub value: String,
}

/// ABCI event emitted by a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub attributes: Vec<EventAttribute>,
}

impl TxEvent {
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.key == key)
            .map(|a| a.value.as_str())
    }

    /// Index of the message that emitted this event, when tagged.
    pub fn msg_index(&self) -> Option<usize> {
        self.attribute("msg_index").and_then(|v| v.parse().ok())
    }
}

/// Per-message log of a transaction (pre-0.50 chains).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageLog {
    pub msg_index: usize,
    pub events: Vec<TxEvent>,
}

/// Fully resolved transaction result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTx {
    pub hash: String,
    pub height: u64,
    pub code: u32,
    pub codespace: String,
    /// `Any`-encoded messages in JSON form, each with an `@type` key.
    pub messages: Vec<serde_json::Value>,
    pub memo: String,
    pub fee: serde_json::Value,
    pub signatures: Vec<String>,
    pub gas_wanted: i64,
    pub gas_used: i64,
    pub raw_log: String,
    pub logs: Vec<MessageLog>,
    pub events: Vec<TxEvent>,
    pub timestamp: DateTime<Utc>,
    /// Node response this transaction was decoded from.
    #[serde(skip)]
    pub source: Value,
}

impl RawTx {
    pub fn is_success(&self) -> bool {
        self.code == 0
    }

    /// Type URL of every message, in order.
    pub fn msg_types(&self) -> Vec<String> {
        self.messages
            .iter()
            .map(|m| {
                m.get("@type")
                    .and_then(|t| t.as_str())
                    .unwrap_or_default()
                    .to_string()
            })
            .collect()
    }

    /// Events emitted by message `msg_index`, from logs or tagged events.
    pub fn events_for_msg(&self, msg_index: usize) -> Vec<&TxEvent> {
        if let Some(log) = self.logs.iter().find(|l| l.msg_index == msg_index) {
            return log.events.iter().collect();
        }
        self.events
            .iter()
            .filter(|e| e.msg_index() == Some(msg_index))
            .collect()
    }

    /// Raw store chunk: the node response, verbatim.
    pub fn to_chunk(&self) -> DomainResult<Vec<u8>> {
        serde_json::to_vec(&self.source).map_err(|e| DomainError::DecodingError(e.to_string()))
    }

    pub fn from_chunk(chunk: &[u8], decoder: &dyn ChunkDecoder) -> DomainResult<Self> {
        let source: Value = serde_json::from_slice(chunk)
            .map_err(|e| DomainError::DecodingError(e.to_string()))?;
        let mut tx = decoder.tx(&source)?;
        tx.source = source;
        Ok(tx)
    }
}

// =============================================================================
// Captured Height
// =============================================================================

/// Node responses one height was assembled from. This is the raw block chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeightSource {
    /// `/block` result at the height.
    pub block: Value,
    /// `/block` result at the next height, for its last-commit and evidence.
    pub next_block: Value,
    /// `/validators` results, one per page.
    pub validator_pages: Vec<Value>,
    /// Staking validator entries, at the genesis height only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genesis_validators: Option<Vec<Value>>,
}

/// Everything derivation needs for one height except the transactions.
#[derive(Debug, Clone, PartialEq)]
pub struct HeightPayload {
    pub block: RawBlock,
    /// Precommits for this height, taken from the next block.
    pub commit: Vec<CommitSig>,
    /// Evidence carried by the next block.
    pub next_evidence: Vec<RawEvidence>,
    pub next_height: u64,
    /// Consensus validator set at this height.
    pub validators: Vec<ConsensusValidator>,
    /// Staking validators, captured at the genesis height only.
    pub genesis_validators: Option<Vec<StakingValidator>>,
    pub source: HeightSource,
}

impl HeightPayload {
    /// Build the payload of `block` from the responses that complete it.
    pub fn assemble(
        block: RawBlock,
        next: RawBlock,
        pages: Vec<ValidatorPage>,
        genesis_validators: Option<Vec<StakingValidator>>,
    ) -> Self {
        let source = HeightSource {
            block: block.source.clone(),
            next_block: next.source.clone(),
            validator_pages: pages.iter().map(|p| p.source.clone()).collect(),
            genesis_validators: genesis_validators
                .as_ref()
                .map(|set| set.iter().map(|v| v.source.clone()).collect()),
        };

        Self {
            block,
            commit: next.last_commit,
            next_evidence: next.evidence,
            next_height: next.height,
            validators: pages.into_iter().flat_map(|p| p.validators).collect(),
            genesis_validators,
            source,
        }
    }

    pub fn height(&self) -> u64 {
        self.block.height
    }

    /// Raw store chunk: every node response of the height, verbatim.
    pub fn to_chunk(&self) -> DomainResult<Vec<u8>> {
        serde_json::to_vec(&self.source).map_err(|e| DomainError::DecodingError(e.to_string()))
    }

    /// Decode a raw block chunk with the same rules as the live fetch.
    pub fn from_chunk(chunk: &[u8], decoder: &dyn ChunkDecoder) -> DomainResult<Self> {
        let source: HeightSource = serde_json::from_slice(chunk)
            .map_err(|e| DomainError::DecodingError(e.to_string()))?;

        let mut block = decoder.block(&source.block)?;
        block.source = source.block.clone();
        let mut next = decoder.block(&source.next_block)?;
        next.source = source.next_block.clone();
        let pages = source
            .validator_pages
            .iter()
            .map(|page| {
                decoder.validator_page(page).map(|mut decoded| {
                    decoded.source = page.clone();
                    decoded
                })
            })
            .collect::<DomainResult<Vec<_>>>()?;
        let genesis_validators = source
            .genesis_validators
            .as_ref()
            .map(|set| {
                set.iter()
                    .map(|v| {
                        decoder.staking_validator(v).map(|mut decoded| {
                            decoded.source = v.clone();
                            decoded
                        })
                    })
                    .collect::<DomainResult<Vec<_>>>()
            })
            .transpose()?;

        Ok(Self::assemble(block, next, pages, genesis_validators))
    }
}

/// Decodes node responses kept in the raw store.
///
/// Implemented by the chain adapter with the decoders its client uses, so a
/// decoding fix applies to both live sync and refine.
pub trait ChunkDecoder: Send + Sync {
    /// A `/block` result.
    fn block(&self, source: &Value) -> DomainResult<RawBlock>;

    /// A `/validators` result.
    fn validator_page(&self, source: &Value) -> DomainResult<ValidatorPage>;

    /// One staking validator entry.
    fn staking_validator(&self, source: &Value) -> DomainResult<StakingValidator>;

    /// A transaction query response.
    fn tx(&self, source: &Value) -> DomainResult<RawTx>;
}

/// A height with every transaction resolved, in block order.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedHeight {
    pub payload: HeightPayload,
    pub txs: Vec<RawTx>,
}

impl FetchedHeight {
    pub fn height(&self) -> u64 {
        self.payload.height()
    }
}

// =============================================================================
// Module State
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegation {
    pub validator_address: String,
    pub balance: Coin,
}

/// Chain status summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStatus {
    pub chain_id: String,
    pub latest_height: u64,
    pub earliest_height: u64,
    pub catching_up: bool,
}

// =============================================================================
// Chain Client Port
// =============================================================================

/// Port trait for the chain node.
///
/// Every call is a network request and may fail with a transient error;
/// retrying is the caller's business.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn status(&self) -> ChainResult<NodeStatus>;

    async fn get_block(&self, height: u64) -> ChainResult<RawBlock>;

    /// Full transaction result by upper-case hex hash.
    async fn get_tx(&self, hash: &str) -> ChainResult<RawTx>;

    /// One page of the consensus validator set. Pages start at 1.
    async fn get_validators_at_height(
        &self,
        height: u64,
        page: u32,
        per_page: u32,
    ) -> ChainResult<ValidatorPage>;

    async fn get_bond_denom(&self) -> ChainResult<String>;

    /// Staking validators, optionally as of `height`.
    async fn get_staking_validators(&self, height: Option<u64>)
    -> ChainResult<Vec<StakingValidator>>;

    async fn get_proposals(&self) -> ChainResult<Vec<Proposal>>;

    async fn get_proposal(&self, id: u64) -> ChainResult<Proposal>;

    async fn get_proposals_by_status(&self, status: ProposalStatus) -> ChainResult<Vec<Proposal>>;

    async fn get_balances(&self, address: &str) -> ChainResult<Vec<Coin>>;

    async fn get_delegator_delegations(&self, address: &str) -> ChainResult<Vec<Delegation>>;

    /// Sum of unbonding entries, one coin per validator.
    async fn get_unbonding_delegations(&self, address: &str) -> ChainResult<Vec<Coin>>;

    async fn get_total_rewards(&self, address: &str) -> ChainResult<Vec<Coin>>;

    async fn get_validator_commission(&self, operator: &str) -> ChainResult<Vec<Coin>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(kind: &str, attrs: &[(&str, &str)]) -> TxEvent {
        TxEvent {
            kind: kind.into(),
            attributes: attrs
                .iter()
                .map(|(k, v)| EventAttribute {
                    key: (*k).into(),
                    value: (*v).into(),
                })
                .collect(),
        }
    }

    fn tx() -> RawTx {
        RawTx {
            hash: "AB".into(),
            height: 10,
            code: 0,
            codespace: String::new(),
            messages: vec![
                json!({"@type": "/cosmos.bank.v1beta1.MsgSend"}),
                json!({"@type": "/cosmos.gov.v1.MsgSubmitProposal"}),
            ],
            memo: String::new(),
            fee: json!({}),
            signatures: vec![],
            gas_wanted: 0,
            gas_used: 0,
            raw_log: String::new(),
            logs: vec![],
            events: vec![
                event("submit_proposal", &[("proposal_id", "7"), ("msg_index", "1")]),
                event("transfer", &[("amount", "5uatom"), ("msg_index", "0")]),
            ],
            timestamp: DateTime::<Utc>::UNIX_EPOCH,
            source: Value::Null,
        }
    }

    #[test]
    fn msg_types_follow_message_order() {
        assert_eq!(
            tx().msg_types(),
            vec![
                "/cosmos.bank.v1beta1.MsgSend",
                "/cosmos.gov.v1.MsgSubmitProposal"
            ]
        );
    }

    // Test critique: les événements sont rattachés au bon message
    #[test]
    fn events_for_msg_uses_tagged_events() {
        let tx = tx();
        let events = tx.events_for_msg(1);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].attribute("proposal_id"), Some("7"));
    }

    #[test]
    fn events_for_msg_prefers_logs() {
        let mut tx = tx();
        tx.logs = vec![MessageLog {
            msg_index: 1,
            events: vec![event("submit_proposal", &[("proposal_id", "8")])],
        }];
        assert_eq!(tx.events_for_msg(1)[0].attribute("proposal_id"), Some("8"));
    }

    /// Decoder over chunks whose sources are the payloads' own JSON.
    struct PlainDecoder;

    fn plain<T: serde::de::DeserializeOwned>(source: &Value) -> DomainResult<T> {
        serde_json::from_value(source.clone()).map_err(|e| DomainError::DecodingError(e.to_string()))
    }

    impl ChunkDecoder for PlainDecoder {
        fn block(&self, source: &Value) -> DomainResult<RawBlock> {
            plain(source)
        }

        fn validator_page(&self, source: &Value) -> DomainResult<ValidatorPage> {
            plain(source)
        }

        fn staking_validator(&self, source: &Value) -> DomainResult<StakingValidator> {
            plain(source)
        }

        fn tx(&self, source: &Value) -> DomainResult<RawTx> {
            plain(source)
        }
    }

    fn block(height: u64, last_commit: Vec<CommitSig>) -> RawBlock {
        let mut block = RawBlock {
            height,
            hash: format!("H{height}"),
            chain_id: "test-1".into(),
            proposer_address: "P".into(),
            time: DateTime::<Utc>::UNIX_EPOCH,
            tx_hashes: vec![],
            last_commit,
            evidence: vec![],
            source: Value::Null,
        };
        let mut source = serde_json::to_value(&block).unwrap();
        // Fields the decoder does not read still belong to the capture.
        source["node_extra"] = json!({"app_version": "7"});
        block.source = source;
        block
    }

    #[test]
    fn corrupt_chunk_is_a_decoding_error() {
        assert!(matches!(
            RawTx::from_chunk(b"not json", &PlainDecoder),
            Err(DomainError::DecodingError(_))
        ));
        assert!(matches!(
            HeightPayload::from_chunk(b"{}", &PlainDecoder),
            Err(DomainError::DecodingError(_))
        ));
    }

    // Test critique: le chunk brut conserve les réponses du noeud telles quelles
    #[test]
    fn height_chunk_keeps_node_responses_verbatim() {
        let sig = CommitSig {
            flag: BlockIdFlag::Absent,
            validator_address: String::new(),
            timestamp: None,
        };
        let validators = vec![ConsensusValidator {
            address: "V1".into(),
            pub_key: "a2V5".into(),
            voting_power: 10,
            proposer_priority: 0,
        }];
        let mut page = ValidatorPage {
            validators,
            total: 1,
            source: Value::Null,
        };
        page.source = serde_json::to_value(&page).unwrap();

        let payload =
            HeightPayload::assemble(block(7, vec![]), block(8, vec![sig]), vec![page], None);
        let chunk = payload.to_chunk().unwrap();

        let stored: Value = serde_json::from_slice(&chunk).unwrap();
        assert_eq!(stored["block"]["node_extra"]["app_version"], "7");
        assert_eq!(stored["next_block"]["height"], 8);
        assert!(stored.get("genesis_validators").is_none());

        let decoded = HeightPayload::from_chunk(&chunk, &PlainDecoder).unwrap();
        assert_eq!(decoded.commit.len(), 1);
        assert!(decoded.commit[0].is_absent());
        assert_eq!(decoded.validators.len(), 1);
        assert_eq!(decoded.next_height, 8);
        assert_eq!(decoded.source, payload.source);
        assert_eq!(decoded.to_chunk().unwrap(), chunk);
    }
}
