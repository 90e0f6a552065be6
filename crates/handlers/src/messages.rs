//! Message decoding.
//!
//! Transactions carry `Any`-encoded messages. The messages derivation
//! branches on are decoded into [`Msg`]; every other type becomes
//! [`Msg::Unhandled`] and is skipped.

use serde::Deserialize;
use serde_json::Value;

use chronicle_core::error::{DomainError, DomainResult};
use chronicle_core::models::Coin;

use crate::utils::{deserialize_u64, extract_field, parse_string, vote_option_name};

// =============================================================================
// Type URLs
// =============================================================================

pub const MSG_SEND: &str = "/cosmos.bank.v1beta1.MsgSend";
pub const MSG_MULTI_SEND: &str = "/cosmos.bank.v1beta1.MsgMultiSend";
pub const MSG_CREATE_VALIDATOR: &str = "/cosmos.staking.v1beta1.MsgCreateValidator";
pub const MSG_DELEGATE: &str = "/cosmos.staking.v1beta1.MsgDelegate";
pub const MSG_UNDELEGATE: &str = "/cosmos.staking.v1beta1.MsgUndelegate";
pub const MSG_BEGIN_REDELEGATE: &str = "/cosmos.staking.v1beta1.MsgBeginRedelegate";
pub const MSG_SUBMIT_PROPOSAL_V1BETA1: &str = "/cosmos.gov.v1beta1.MsgSubmitProposal";
pub const MSG_SUBMIT_PROPOSAL_V1: &str = "/cosmos.gov.v1.MsgSubmitProposal";
pub const MSG_DEPOSIT_V1BETA1: &str = "/cosmos.gov.v1beta1.MsgDeposit";
pub const MSG_DEPOSIT_V1: &str = "/cosmos.gov.v1.MsgDeposit";
pub const MSG_VOTE_V1BETA1: &str = "/cosmos.gov.v1beta1.MsgVote";
pub const MSG_VOTE_V1: &str = "/cosmos.gov.v1.MsgVote";
pub const MSG_VOTE_WEIGHTED_V1BETA1: &str = "/cosmos.gov.v1beta1.MsgVoteWeighted";
pub const MSG_VOTE_WEIGHTED_V1: &str = "/cosmos.gov.v1.MsgVoteWeighted";

// =============================================================================
// Message Types
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MsgSend {
    pub from_address: String,
    pub to_address: String,
    pub amount: Vec<Coin>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BankIo {
    pub address: String,
    pub coins: Vec<Coin>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MsgMultiSend {
    pub inputs: Vec<BankIo>,
    pub outputs: Vec<BankIo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ValidatorDescription {
    #[serde(default)]
    pub moniker: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CommissionRates {
    pub rate: String,
    pub max_rate: String,
    pub max_change_rate: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PubKey {
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MsgCreateValidator {
    pub description: ValidatorDescription,
    pub commission: CommissionRates,
    pub min_self_delegation: String,
    pub validator_address: String,
    pub pubkey: PubKey,
    pub value: Coin,
}

/// Shape shared by `MsgDelegate` and `MsgUndelegate`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MsgDelegate {
    pub delegator_address: String,
    pub validator_address: String,
    pub amount: Coin,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MsgBeginRedelegate {
    pub delegator_address: String,
    pub validator_src_address: String,
    pub validator_dst_address: String,
    pub amount: Coin,
}

/// Submit-proposal, normalized across gov v1beta1 and v1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitProposal {
    pub proposer: String,
    pub initial_deposit: Vec<Coin>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub proposal_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MsgDeposit {
    #[serde(deserialize_with = "deserialize_u64")]
    pub proposal_id: u64,
    pub depositor: String,
    pub amount: Vec<Coin>,
}

/// Vote, normalized: a plain vote is one option with full weight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteCast {
    pub proposal_id: u64,
    pub voter: String,
    pub options: Vec<(String, String)>,
}

/// Message kinds derivation understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Msg {
    Send(MsgSend),
    MultiSend(MsgMultiSend),
    CreateValidator(MsgCreateValidator),
    Delegate(MsgDelegate),
    Undelegate(MsgDelegate),
    BeginRedelegate(MsgBeginRedelegate),
    SubmitProposal(SubmitProposal),
    Deposit(MsgDeposit),
    Vote(VoteCast),
    Unhandled(String),
}

// =============================================================================
// Decoding
// =============================================================================

/// Type URL of a message, empty when absent.
pub fn type_url(value: &Value) -> &str {
    value.get("@type").and_then(Value::as_str).unwrap_or_default()
}

/// Decode one message.
///
/// Unknown types decode to [`Msg::Unhandled`]; a known type with malformed
/// fields is an [`DomainError::InvalidMessage`].
pub fn decode(value: &Value) -> DomainResult<Msg> {
    let url = type_url(value);
    let msg = match url {
        MSG_SEND => Msg::Send(parse(url, value)?),
        MSG_MULTI_SEND => Msg::MultiSend(parse(url, value)?),
        MSG_CREATE_VALIDATOR => Msg::CreateValidator(parse(url, value)?),
        MSG_DELEGATE => Msg::Delegate(parse(url, value)?),
        MSG_UNDELEGATE => Msg::Undelegate(parse(url, value)?),
        MSG_BEGIN_REDELEGATE => Msg::BeginRedelegate(parse(url, value)?),
        MSG_SUBMIT_PROPOSAL_V1BETA1 | MSG_SUBMIT_PROPOSAL_V1 => {
            Msg::SubmitProposal(submit_proposal(url, value)?)
        }
        MSG_DEPOSIT_V1BETA1 | MSG_DEPOSIT_V1 => Msg::Deposit(parse(url, value)?),
        MSG_VOTE_V1BETA1 | MSG_VOTE_V1 => Msg::Vote(vote(url, value)?),
        MSG_VOTE_WEIGHTED_V1BETA1 | MSG_VOTE_WEIGHTED_V1 => Msg::Vote(weighted_vote(url, value)?),
        other => Msg::Unhandled(other.to_string()),
    };
    Ok(msg)
}

fn invalid(url: &str, message: impl Into<String>) -> DomainError {
    DomainError::InvalidMessage {
        type_url: url.to_string(),
        message: message.into(),
    }
}

fn parse<T: serde::de::DeserializeOwned>(url: &str, value: &Value) -> DomainResult<T> {
    serde_json::from_value(value.clone()).map_err(|e| invalid(url, e.to_string()))
}

fn submit_proposal(url: &str, value: &Value) -> DomainResult<SubmitProposal> {
    let proposer = extract_field(value, &["/proposer"], parse_string)
        .ok_or_else(|| invalid(url, "missing proposer"))?;
    let initial_deposit = match value.get("initial_deposit") {
        Some(coins) => parse(url, coins)?,
        None => Vec::new(),
    };

    Ok(SubmitProposal {
        proposer,
        initial_deposit,
        title: extract_field(value, &["/title", "/content/title"], parse_string),
        description: extract_field(
            value,
            &["/summary", "/content/description", "/metadata"],
            parse_string,
        ),
        proposal_type: extract_field(value, &["/content/@type", "/messages/0/@type"], parse_string),
    })
}

#[derive(Deserialize)]
struct RawVote {
    #[serde(deserialize_with = "deserialize_u64")]
    proposal_id: u64,
    voter: String,
    option: Value,
}

#[derive(Deserialize)]
struct RawWeightedOption {
    option: Value,
    weight: String,
}

#[derive(Deserialize)]
struct RawWeightedVote {
    #[serde(deserialize_with = "deserialize_u64")]
    proposal_id: u64,
    voter: String,
    options: Vec<RawWeightedOption>,
}

const FULL_WEIGHT: &str = "1.000000000000000000";

fn vote(url: &str, value: &Value) -> DomainResult<VoteCast> {
    let raw: RawVote = parse(url, value)?;
    let option = vote_option_name(&raw.option)
        .ok_or_else(|| invalid(url, format!("unknown vote option {}", raw.option)))?;
    Ok(VoteCast {
        proposal_id: raw.proposal_id,
        voter: raw.voter,
        options: vec![(option, FULL_WEIGHT.to_string())],
    })
}

fn weighted_vote(url: &str, value: &Value) -> DomainResult<VoteCast> {
    let raw: RawWeightedVote = parse(url, value)?;
    let options = raw
        .options
        .into_iter()
        .map(|o| {
            vote_option_name(&o.option)
                .map(|name| (name, o.weight))
                .ok_or_else(|| invalid(url, format!("unknown vote option {}", o.option)))
        })
        .collect::<DomainResult<Vec<_>>>()?;
    Ok(VoteCast {
        proposal_id: raw.proposal_id,
        voter: raw.voter,
        options,
    })
}
