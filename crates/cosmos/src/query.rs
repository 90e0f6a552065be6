//! Cosmos query gateway (REST) response types.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use chronicle_core::models::{Coin, Proposal, ProposalStatus, TallyResult};
use chronicle_core::ports::{Delegation, MessageLog, RawTx, StakingValidator, TxEvent};

use crate::codec::{Captured, int_of, number, set_time};

/// Responses carrying a `pagination.next_key` cursor.
pub(crate) trait Paged {
    type Item;

    /// Items of this page and the key of the next one, if any.
    fn into_page(self) -> (Vec<Self::Item>, Option<String>);
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct Pagination {
    #[serde(default)]
    next_key: Option<String>,
}

impl Pagination {
    fn next(self) -> Option<String> {
        self.next_key.filter(|k| !k.is_empty())
    }
}

// =============================================================================
// Transactions
// =============================================================================

#[derive(Debug, Deserialize)]
pub(crate) struct GetTxResponse {
    tx: TxEnvelope,
    tx_response: TxResponse,
}

#[derive(Debug, Deserialize)]
struct TxEnvelope {
    body: TxBody,
    #[serde(default)]
    auth_info: AuthInfo,
    #[serde(default)]
    signatures: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TxBody {
    #[serde(default)]
    messages: Vec<Value>,
    #[serde(default)]
    memo: String,
}

#[derive(Debug, Default, Deserialize)]
struct AuthInfo {
    #[serde(default)]
    fee: Value,
}

#[derive(Debug, Deserialize)]
struct TxResponse {
    #[serde(deserialize_with = "number")]
    height: u64,
    txhash: String,
    #[serde(default)]
    codespace: String,
    #[serde(default, deserialize_with = "number")]
    code: u32,
    #[serde(default)]
    raw_log: String,
    #[serde(default)]
    logs: Vec<TxLog>,
    #[serde(default, deserialize_with = "number")]
    gas_wanted: i64,
    #[serde(default, deserialize_with = "number")]
    gas_used: i64,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    events: Vec<TxEvent>,
}

#[derive(Debug, Deserialize)]
struct TxLog {
    #[serde(default, deserialize_with = "number")]
    msg_index: usize,
    #[serde(default)]
    events: Vec<TxEvent>,
}

impl GetTxResponse {
    /// Convert, keeping `source` (the gateway response this was read from).
    pub(crate) fn into_raw_tx(self, source: Value) -> RawTx {
        let GetTxResponse { tx, tx_response } = self;
        RawTx {
            hash: tx_response.txhash.to_uppercase(),
            height: tx_response.height,
            code: tx_response.code,
            codespace: tx_response.codespace,
            messages: tx.body.messages,
            memo: tx.body.memo,
            fee: tx.auth_info.fee,
            signatures: tx.signatures,
            gas_wanted: tx_response.gas_wanted,
            gas_used: tx_response.gas_used,
            raw_log: tx_response.raw_log,
            logs: tx_response
                .logs
                .into_iter()
                .map(|l| MessageLog {
                    msg_index: l.msg_index,
                    events: l.events,
                })
                .collect(),
            events: tx_response.events,
            timestamp: tx_response.timestamp,
            source,
        }
    }
}

// =============================================================================
// Staking
// =============================================================================

#[derive(Debug, Deserialize)]
pub(crate) struct StakingParamsResponse {
    params: StakingParams,
}

#[derive(Debug, Deserialize)]
struct StakingParams {
    bond_denom: String,
}

impl StakingParamsResponse {
    pub(crate) fn bond_denom(self) -> String {
        self.params.bond_denom
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ValidatorsPage {
    validators: Vec<Captured<GatewayValidator>>,
    #[serde(default)]
    pagination: Pagination,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GatewayValidator {
    operator_address: String,
    consensus_pubkey: GatewayPubKey,
    #[serde(default)]
    jailed: bool,
    status: String,
    tokens: String,
    delegator_shares: String,
    description: GatewayDescription,
    commission: GatewayCommission,
    #[serde(default)]
    min_self_delegation: String,
}

#[derive(Debug, Deserialize)]
struct GatewayPubKey {
    key: String,
}

#[derive(Debug, Deserialize)]
struct GatewayDescription {
    #[serde(default)]
    moniker: String,
}

#[derive(Debug, Deserialize)]
struct GatewayCommission {
    commission_rates: GatewayRates,
}

#[derive(Debug, Deserialize)]
struct GatewayRates {
    rate: String,
    max_rate: String,
    max_change_rate: String,
}

impl GatewayValidator {
    /// Convert, keeping `source` (this validator's entry in the response).
    pub(crate) fn into_staking(self, source: Value) -> StakingValidator {
        let rates = self.commission.commission_rates;
        StakingValidator {
            operator_address: self.operator_address,
            consensus_pubkey: self.consensus_pubkey.key,
            moniker: self.description.moniker,
            status: self.status,
            jailed: self.jailed,
            tokens: self.tokens,
            delegator_shares: self.delegator_shares,
            commission_rate: rates.rate,
            commission_max_rate: rates.max_rate,
            commission_max_change_rate: rates.max_change_rate,
            min_self_delegation: self.min_self_delegation,
            source,
        }
    }
}

impl Paged for ValidatorsPage {
    type Item = StakingValidator;

    fn into_page(self) -> (Vec<StakingValidator>, Option<String>) {
        let items = self
            .validators
            .into_iter()
            .map(|v| v.value.into_staking(v.source))
            .collect();
        (items, self.pagination.next())
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct DelegationsPage {
    delegation_responses: Vec<DelegationResponse>,
    #[serde(default)]
    pagination: Pagination,
}

#[derive(Debug, Deserialize)]
struct DelegationResponse {
    delegation: DelegationEntry,
    balance: Coin,
}

#[derive(Debug, Deserialize)]
struct DelegationEntry {
    validator_address: String,
}

impl Paged for DelegationsPage {
    type Item = Delegation;

    fn into_page(self) -> (Vec<Delegation>, Option<String>) {
        let items = self
            .delegation_responses
            .into_iter()
            .map(|d| Delegation {
                validator_address: d.delegation.validator_address,
                balance: d.balance,
            })
            .collect();
        (items, self.pagination.next())
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct UnbondingPage {
    unbonding_responses: Vec<UnbondingResponse>,
    #[serde(default)]
    pagination: Pagination,
}

#[derive(Debug, Deserialize)]
struct UnbondingResponse {
    #[serde(default)]
    entries: Vec<UnbondingEntry>,
}

#[derive(Debug, Deserialize)]
struct UnbondingEntry {
    balance: Value,
}

impl Paged for UnbondingPage {
    /// Sum of the entries with one validator, in the bond denom.
    type Item = u128;

    fn into_page(self) -> (Vec<u128>, Option<String>) {
        let items = self
            .unbonding_responses
            .into_iter()
            .map(|r| {
                r.entries
                    .iter()
                    .filter_map(|e| int_of::<u128>(&e.balance))
                    .sum()
            })
            .collect();
        (items, self.pagination.next())
    }
}

// =============================================================================
// Bank & Distribution
// =============================================================================

#[derive(Debug, Deserialize)]
pub(crate) struct BalancesPage {
    balances: Vec<Coin>,
    #[serde(default)]
    pagination: Pagination,
}

impl Paged for BalancesPage {
    type Item = Coin;

    fn into_page(self) -> (Vec<Coin>, Option<String>) {
        (self.balances, self.pagination.next())
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct RewardsResponse {
    #[serde(default)]
    total: Vec<Coin>,
}

impl RewardsResponse {
    pub(crate) fn total(self) -> Vec<Coin> {
        self.total
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct CommissionResponse {
    commission: CommissionBody,
}

#[derive(Debug, Deserialize)]
struct CommissionBody {
    #[serde(default)]
    commission: Vec<Coin>,
}

impl CommissionResponse {
    pub(crate) fn coins(self) -> Vec<Coin> {
        self.commission.commission
    }
}

// =============================================================================
// Governance
// =============================================================================

#[derive(Debug, Deserialize)]
pub(crate) struct ProposalsPage {
    proposals: Vec<GatewayProposal>,
    #[serde(default)]
    pagination: Pagination,
}

impl Paged for ProposalsPage {
    type Item = GatewayProposal;

    fn into_page(self) -> (Vec<GatewayProposal>, Option<String>) {
        (self.proposals, self.pagination.next())
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ProposalResponse {
    pub(crate) proposal: GatewayProposal,
}

/// Proposal as served by either the v1beta1 or the v1 gov query service.
#[derive(Debug, Deserialize)]
pub(crate) struct GatewayProposal {
    #[serde(alias = "id", deserialize_with = "number")]
    proposal_id: u64,
    #[serde(default)]
    content: Option<Value>,
    #[serde(default)]
    messages: Vec<Value>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    proposer: Option<String>,
    #[serde(default)]
    status: String,
    #[serde(default)]
    final_tally_result: Option<GatewayTally>,
    #[serde(default)]
    submit_time: Option<DateTime<Utc>>,
    #[serde(default)]
    deposit_end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    total_deposit: Vec<Coin>,
    #[serde(default)]
    voting_start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    voting_end_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct GatewayTally {
    #[serde(alias = "yes_count")]
    yes: String,
    #[serde(alias = "abstain_count")]
    abstain: String,
    #[serde(alias = "no_count")]
    no: String,
    #[serde(alias = "no_with_veto_count")]
    no_with_veto: String,
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|s| !s.is_empty())
}

fn content_str(content: &Option<Value>, key: &str) -> Option<String> {
    content
        .as_ref()
        .and_then(|c| c.get(key))
        .and_then(Value::as_str)
        .map(str::to_string)
}

impl GatewayProposal {
    pub(crate) fn into_proposal(self) -> Proposal {
        let title = non_empty(self.title).or_else(|| content_str(&self.content, "title"));
        let description =
            non_empty(self.summary).or_else(|| content_str(&self.content, "description"));
        let proposal_type = content_str(&self.content, "@type").or_else(|| {
            self.messages
                .first()
                .and_then(|m| m.get("@type"))
                .and_then(Value::as_str)
                .map(str::to_string)
        });

        Proposal {
            id: self.proposal_id,
            title,
            description,
            proposal_type,
            status: ProposalStatus::parse(&self.status),
            proposer: non_empty(self.proposer),
            submit_height: None,
            tx_hash: None,
            submit_time: set_time(self.submit_time),
            deposit_end_time: set_time(self.deposit_end_time),
            voting_start_time: set_time(self.voting_start_time),
            voting_end_time: set_time(self.voting_end_time),
            total_deposit: Some(self.total_deposit),
            tally: self.final_tally_result.map(|t| TallyResult {
                yes: t.yes,
                abstain: t.abstain,
                no: t.no,
                no_with_veto: t.no_with_veto,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // Test critique: un tx de la passerelle conserve ses événements par message
    #[test]
    fn tx_response_converts() {
        let source = json!({
            "tx": {
                "body": {
                    "messages": [{
                        "@type": "/cosmos.bank.v1beta1.MsgSend",
                        "from_address": "cosmos1a",
                        "to_address": "cosmos1b",
                        "amount": [{"denom": "uatom", "amount": "5"}]
                    }],
                    "memo": "hi"
                },
                "auth_info": {"fee": {"amount": [], "gas_limit": "200000"}},
                "signatures": ["c2ln"]
            },
            "tx_response": {
                "height": "77",
                "txhash": "abcdef",
                "codespace": "",
                "code": 0,
                "raw_log": "[]",
                "logs": [{
                    "msg_index": 0,
                    "log": "",
                    "events": [{"type": "transfer", "attributes": [{"key": "amount", "value": "5uatom"}]}]
                }],
                "gas_wanted": "200000",
                "gas_used": "81234",
                "timestamp": "2024-03-01T10:00:00Z",
                "events": [{"type": "tx", "attributes": [{"key": "fee", "value": "", "index": true}]}]
            }
        });
        let response: GetTxResponse = serde_json::from_value(source.clone()).unwrap();

        let tx = response.into_raw_tx(source.clone());
        assert_eq!(tx.hash, "ABCDEF");
        assert_eq!(tx.height, 77);
        assert!(tx.is_success());
        assert_eq!(tx.gas_used, 81_234);
        assert_eq!(tx.msg_types(), vec!["/cosmos.bank.v1beta1.MsgSend"]);
        assert_eq!(tx.events_for_msg(0)[0].attribute("amount"), Some("5uatom"));
        assert_eq!(tx.memo, "hi");
        assert_eq!(tx.source, source);
    }

    #[test]
    fn validators_page_flattens_commission() {
        let page: ValidatorsPage = serde_json::from_value(json!({
            "validators": [{
                "operator_address": "cosmosvaloper1x",
                "consensus_pubkey": {"@type": "/cosmos.crypto.ed25519.PubKey", "key": "a2V5"},
                "jailed": false,
                "status": "BOND_STATUS_BONDED",
                "tokens": "1000000",
                "delegator_shares": "1000000.000000000000000000",
                "description": {"moniker": "alpha"},
                "commission": {"commission_rates": {
                    "rate": "0.1", "max_rate": "0.2", "max_change_rate": "0.01"
                }},
                "min_self_delegation": "1"
            }],
            "pagination": {"next_key": "bmV4dA==", "total": "2"}
        }))
        .unwrap();

        let (items, next) = page.into_page();
        assert_eq!(next.as_deref(), Some("bmV4dA=="));
        assert_eq!(items[0].moniker, "alpha");
        assert_eq!(items[0].consensus_pubkey, "a2V5");
        assert_eq!(items[0].commission_max_rate, "0.2");
        assert_eq!(items[0].source["description"]["moniker"], "alpha");
    }

    #[test]
    fn last_page_has_no_next_key() {
        let page: BalancesPage = serde_json::from_value(json!({
            "balances": [{"denom": "uatom", "amount": "12"}],
            "pagination": {"next_key": null, "total": "1"}
        }))
        .unwrap();
        let (items, next) = page.into_page();
        assert_eq!(items, vec![Coin::new("uatom", "12")]);
        assert!(next.is_none());
    }

    #[test]
    fn unbonding_sums_entries_per_validator() {
        let page: UnbondingPage = serde_json::from_value(json!({
            "unbonding_responses": [
                {"delegator_address": "cosmos1a", "validator_address": "v1",
                 "entries": [{"balance": "10"}, {"balance": "5"}]},
                {"delegator_address": "cosmos1a", "validator_address": "v2",
                 "entries": [{"balance": "7"}]}
            ],
            "pagination": {}
        }))
        .unwrap();
        assert_eq!(page.into_page().0, vec![15, 7]);
    }

    #[test]
    fn v1beta1_proposal_converts() {
        let proposal: GatewayProposal = serde_json::from_value(json!({
            "proposal_id": "4",
            "content": {
                "@type": "/cosmos.gov.v1beta1.TextProposal",
                "title": "Signal",
                "description": "Text"
            },
            "status": "PROPOSAL_STATUS_DEPOSIT_PERIOD",
            "final_tally_result": {"yes": "0", "abstain": "0", "no": "0", "no_with_veto": "0"},
            "submit_time": "2024-03-01T10:00:00Z",
            "deposit_end_time": "2024-03-03T10:00:00Z",
            "total_deposit": [{"denom": "uatom", "amount": "100"}],
            "voting_start_time": "0001-01-01T00:00:00Z",
            "voting_end_time": "0001-01-01T00:00:00Z"
        }))
        .unwrap();

        let p = proposal.into_proposal();
        assert_eq!(p.id, 4);
        assert_eq!(p.title.as_deref(), Some("Signal"));
        assert_eq!(p.proposal_type.as_deref(), Some("/cosmos.gov.v1beta1.TextProposal"));
        assert_eq!(p.status, Some(ProposalStatus::DepositPeriod));
        assert!(p.voting_start_time.is_none());
        assert_eq!(p.total_deposit, Some(vec![Coin::new("uatom", "100")]));
    }

    #[test]
    fn v1_proposal_converts() {
        let proposal: GatewayProposal = serde_json::from_value(json!({
            "id": "9",
            "messages": [{"@type": "/cosmos.upgrade.v1beta1.MsgSoftwareUpgrade"}],
            "status": "PROPOSAL_STATUS_VOTING_PERIOD",
            "final_tally_result": {
                "yes_count": "10", "abstain_count": "0", "no_count": "2", "no_with_veto_count": "0"
            },
            "title": "Upgrade",
            "summary": "v2",
            "proposer": "cosmos1p"
        }))
        .unwrap();

        let p = proposal.into_proposal();
        assert_eq!(p.id, 9);
        assert_eq!(p.description.as_deref(), Some("v2"));
        assert_eq!(p.proposer.as_deref(), Some("cosmos1p"));
        assert_eq!(p.tally.unwrap().yes, "10");
        assert_eq!(p.proposal_type.as_deref(), Some("/cosmos.upgrade.v1beta1.MsgSoftwareUpgrade"));
    }
}
