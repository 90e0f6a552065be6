//! Domain models representing indexed chain data.
//!
//! These models are storage-agnostic and represent the canonical
//! form of derived data within the domain layer.

pub mod address;
mod chain;
mod governance;
mod staking;

pub use chain::{ChainContext, ChainDirectory};
pub use governance::{
    Deposit, GovernanceRecords, Proposal, ProposalStatus, TallyResult, Vote, WeightedVoteOption,
};
pub use staking::{
    MissBlock, MissDetail, PowerEvent, PowerEventKind, TrackedValidator, Validator,
    ValidatorLedger, WindowChange, apply_miss,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Coins
// =============================================================================

/// Token amount in one denomination.
///
/// Amounts stay decimal strings: integer coins fit `u128`, reward and
/// commission coins carry an 18-digit fractional part.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coin {
    pub denom: String,
    pub amount: String,
}

impl Coin {
    pub fn new(denom: impl Into<String>, amount: impl Into<String>) -> Self {
        Self {
            denom: denom.into(),
            amount: amount.into(),
        }
    }

    /// Integer part of the amount, ignoring any fractional digits.
    pub fn integer_amount(&self) -> Option<u128> {
        let integer = self.amount.split('.').next().unwrap_or_default();
        if integer.is_empty() {
            return Some(0);
        }
        integer.parse().ok()
    }
}

/// Sum the integer amounts of `coins` in `denom`.
pub fn sum_denom(coins: &[Coin], denom: &str) -> u128 {
    coins
        .iter()
        .filter(|c| c.denom == denom)
        .filter_map(Coin::integer_amount)
        .sum()
}

// =============================================================================
// Block & Transaction Data
// =============================================================================

/// Indexed block. Append-only, unique per chain and height.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub height: u64,
    /// Upper-case hex block hash.
    pub hash: String,
    /// Upper-case hex consensus address of the proposer.
    pub proposer_address: String,
    pub tx_count: u32,
    pub timestamp: DateTime<Utc>,
}

/// Indexed transaction with its decoded messages and execution result.
///
/// Failed transactions (`code != 0`) are stored but contribute no
/// derived records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub hash: String,
    pub height: u64,
    pub code: u32,
    pub codespace: String,
    /// Ordered message list, verbatim from the node.
    pub messages: serde_json::Value,
    /// Type URL of each message, same order as `messages`.
    pub msg_types: Vec<String>,
    pub fee: serde_json::Value,
    pub signatures: Vec<String>,
    pub logs: serde_json::Value,
    pub memo: String,
    pub gas_wanted: i64,
    pub gas_used: i64,
    pub timestamp: DateTime<Utc>,
}

impl Transaction {
    pub fn is_success(&self) -> bool {
        self.code == 0
    }
}

/// Slashing evidence, keyed by the height at which the infraction occurred.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    /// Height of the infraction.
    pub height: u64,
    /// Height of the block whose header carried the evidence.
    pub reported_height: u64,
    pub kind: String,
    pub validator_address: String,
    pub total_voting_power: i64,
    pub validator_power: i64,
    pub timestamp: Option<DateTime<Utc>>,
}

// =============================================================================
// Accounts
// =============================================================================

/// Account touched by a bank transfer in a successful transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountActivity {
    pub address: String,
    pub tx_hash: String,
    pub height: u64,
    pub timestamp: DateTime<Utc>,
}

/// Best-effort balance snapshot, recomputed from a live chain query.
///
/// All amounts are in the bond denomination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub address: String,
    pub available: String,
    pub delegated: String,
    pub unbonding: String,
    pub rewards: String,
    pub commission: String,
    pub updated_at: DateTime<Utc>,
}

/// One sender/recipient pair of a bank transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub tx_hash: String,
    pub height: u64,
    pub from: String,
    pub to: String,
    pub amount: Vec<Coin>,
    pub timestamp: DateTime<Utc>,
}

/// Push-gateway device token registered for an address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceToken {
    pub address: String,
    pub token: String,
    pub platform: i32,
}

// =============================================================================
// Derivation Output
// =============================================================================

/// Every record derived from one height.
///
/// Produced by a [`crate::ports::Deriver`] and written in a single database
/// transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedRecords {
    pub block: Block,
    pub transactions: Vec<Transaction>,
    pub evidence: Vec<Evidence>,
    /// Validators first seen at this height (genesis set, create-validator).
    pub validators: Vec<Validator>,
    pub power_events: Vec<PowerEvent>,
    /// One row per validator that missed its precommit at this height.
    pub misses: Vec<MissDetail>,
    pub governance: GovernanceRecords,
    pub account_activity: Vec<AccountActivity>,
    pub transfers: Vec<Transfer>,
}

impl DerivedRecords {
    /// Records for a block with nothing else to derive.
    pub fn for_block(block: Block) -> Self {
        Self {
            block,
            transactions: Vec::new(),
            evidence: Vec::new(),
            validators: Vec::new(),
            power_events: Vec::new(),
            misses: Vec::new(),
            governance: GovernanceRecords::default(),
            account_activity: Vec::new(),
            transfers: Vec::new(),
        }
    }

    /// Distinct addresses with bank activity, in first-seen order.
    pub fn active_addresses(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        self.account_activity
            .iter()
            .filter(|a| seen.insert(a.address.as_str()))
            .map(|a| a.address.clone())
            .collect()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coin_integer_amount_drops_fraction() {
        assert_eq!(Coin::new("uatom", "1500").integer_amount(), Some(1500));
        assert_eq!(
            Coin::new("uatom", "12.345000000000000000").integer_amount(),
            Some(12)
        );
        assert_eq!(Coin::new("uatom", ".5").integer_amount(), Some(0));
        assert_eq!(Coin::new("uatom", "abc").integer_amount(), None);
    }

    #[test]
    fn sum_denom_ignores_other_denoms() {
        let coins = vec![
            Coin::new("uatom", "10"),
            Coin::new("ibc/27394FB0", "99"),
            Coin::new("uatom", "5.9"),
        ];
        assert_eq!(sum_denom(&coins, "uatom"), 15);
        assert_eq!(sum_denom(&coins, "stake"), 0);
    }

    #[test]
    fn active_addresses_deduplicates_in_order() {
        let ts = DateTime::<Utc>::UNIX_EPOCH;
        let block = Block {
            height: 7,
            hash: "AA".into(),
            proposer_address: "BB".into(),
            tx_count: 2,
            timestamp: ts,
        };
        let mut records = DerivedRecords::for_block(block);
        for (addr, tx) in [("bob", "T1"), ("alice", "T1"), ("bob", "T2")] {
            records.account_activity.push(AccountActivity {
                address: addr.into(),
                tx_hash: tx.into(),
                height: 7,
                timestamp: ts,
            });
        }
        assert_eq!(records.active_addresses(), vec!["bob", "alice"]);
    }
}
