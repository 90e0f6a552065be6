use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Coin;

/// Lifecycle status of a governance proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProposalStatus {
    #[serde(rename = "PROPOSAL_STATUS_DEPOSIT_PERIOD")]
    DepositPeriod,
    #[serde(rename = "PROPOSAL_STATUS_VOTING_PERIOD")]
    VotingPeriod,
    #[serde(rename = "PROPOSAL_STATUS_PASSED")]
    Passed,
    #[serde(rename = "PROPOSAL_STATUS_REJECTED")]
    Rejected,
    #[serde(rename = "PROPOSAL_STATUS_FAILED")]
    Failed,
}

impl ProposalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DepositPeriod => "PROPOSAL_STATUS_DEPOSIT_PERIOD",
            Self::VotingPeriod => "PROPOSAL_STATUS_VOTING_PERIOD",
            Self::Passed => "PROPOSAL_STATUS_PASSED",
            Self::Rejected => "PROPOSAL_STATUS_REJECTED",
            Self::Failed => "PROPOSAL_STATUS_FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "PROPOSAL_STATUS_DEPOSIT_PERIOD" => Self::DepositPeriod,
            "PROPOSAL_STATUS_VOTING_PERIOD" => Self::VotingPeriod,
            "PROPOSAL_STATUS_PASSED" => Self::Passed,
            "PROPOSAL_STATUS_REJECTED" => Self::Rejected,
            "PROPOSAL_STATUS_FAILED" => Self::Failed,
            _ => return None,
        })
    }

    /// Tally or deposits can still change.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::DepositPeriod | Self::VotingPeriod)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TallyResult {
    pub yes: String,
    pub abstain: String,
    pub no: String,
    pub no_with_veto: String,
}

/// Latest-state proposal row, merged on proposal id.
///
/// `None` fields leave the stored value untouched on merge, so a proposal
/// seen first in a message and later through a chain query keeps both
/// the submitter details and the live status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: u64,
    pub title: Option<String>,
    pub description: Option<String>,
    pub proposal_type: Option<String>,
    pub status: Option<ProposalStatus>,
    pub proposer: Option<String>,
    pub submit_height: Option<u64>,
    pub tx_hash: Option<String>,
    pub submit_time: Option<DateTime<Utc>>,
    pub deposit_end_time: Option<DateTime<Utc>>,
    pub voting_start_time: Option<DateTime<Utc>>,
    pub voting_end_time: Option<DateTime<Utc>>,
    pub total_deposit: Option<Vec<Coin>>,
    pub tally: Option<TallyResult>,
}

impl Proposal {
    /// Proposal with only its id set.
    pub fn with_id(id: u64) -> Self {
        Self {
            id,
            title: None,
            description: None,
            proposal_type: None,
            status: None,
            proposer: None,
            submit_height: None,
            tx_hash: None,
            submit_time: None,
            deposit_end_time: None,
            voting_start_time: None,
            voting_end_time: None,
            total_deposit: None,
            tally: None,
        }
    }

    /// Overlay every `Some` field of `newer` onto `self`.
    pub fn merge(&mut self, newer: &Proposal) {
        macro_rules! overlay {
            ($($field:ident),*) => {
                $(if newer.$field.is_some() { self.$field = newer.$field.clone(); })*
            };
        }
        overlay!(
            title,
            description,
            proposal_type,
            status,
            proposer,
            submit_height,
            tx_hash,
            submit_time,
            deposit_end_time,
            voting_start_time,
            voting_end_time,
            total_deposit,
            tally
        );
    }
}

/// Deposit made in a successful transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Deposit {
    pub proposal_id: u64,
    pub depositor: String,
    pub amount: Vec<Coin>,
    pub height: u64,
    pub tx_hash: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WeightedVoteOption {
    pub option: String,
    pub weight: String,
}

/// Latest vote of one voter on one proposal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Vote {
    pub proposal_id: u64,
    pub voter: String,
    pub options: Vec<WeightedVoteOption>,
    pub height: u64,
    pub tx_hash: String,
    pub timestamp: DateTime<Utc>,
}

/// Governance records derived from one height or one backfilled transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernanceRecords {
    pub proposals: Vec<Proposal>,
    pub deposits: Vec<Deposit>,
    pub votes: Vec<Vote>,
}

impl GovernanceRecords {
    pub fn is_empty(&self) -> bool {
        self.proposals.is_empty() && self.deposits.is_empty() && self.votes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.proposals.len() + self.deposits.len() + self.votes.len()
    }

    pub fn extend(&mut self, other: GovernanceRecords) {
        self.proposals.extend(other.proposals);
        self.deposits.extend(other.deposits);
        self.votes.extend(other.votes);
    }
}
