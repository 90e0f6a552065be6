use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Validators
// =============================================================================

/// Latest-state validator row, merged on operator address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    /// Stable tracking id. Assigned once, never reused.
    pub id: i64,
    pub operator_address: String,
    /// Base64 ed25519 consensus public key.
    pub consensus_pubkey: String,
    /// Upper-case hex consensus address (`sha256(pubkey)[..20]`).
    pub proposer_address: String,
    /// Bech32 `valcons` form of the consensus address.
    pub consensus_address: String,
    pub moniker: String,
    pub status: String,
    pub jailed: bool,
    pub tokens: String,
    pub delegator_shares: String,
    pub commission_rate: String,
    pub commission_max_rate: String,
    pub commission_max_change_rate: String,
    pub min_self_delegation: String,
    /// Position by tokens, descending. Computed by the validator poller.
    pub rank: Option<i32>,
}

/// Validator identity and last known power, as seen by derivation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedValidator {
    pub id: i64,
    pub operator_address: String,
    pub proposer_address: Option<String>,
    /// Power from the latest power event, if any.
    pub power: Option<i64>,
}

/// Snapshot of every tracked validator, read before deriving a height.
///
/// Derivation works on a clone and mutates it as create-validator and
/// delegation messages are applied in message order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorLedger {
    validators: Vec<TrackedValidator>,
}

impl ValidatorLedger {
    pub fn new(validators: Vec<TrackedValidator>) -> Self {
        Self { validators }
    }

    pub fn by_operator(&self, operator: &str) -> Option<&TrackedValidator> {
        self.validators
            .iter()
            .find(|v| v.operator_address == operator)
    }

    pub fn by_proposer(&self, proposer: &str) -> Option<&TrackedValidator> {
        self.validators
            .iter()
            .find(|v| v.proposer_address.as_deref() == Some(proposer))
    }

    /// Highest id in use, `0` when empty.
    pub fn max_id(&self) -> i64 {
        self.validators.iter().map(|v| v.id).max().unwrap_or(0)
    }

    /// Track a validator, replacing any entry with the same operator.
    pub fn track(&mut self, validator: TrackedValidator) {
        match self
            .validators
            .iter_mut()
            .find(|v| v.operator_address == validator.operator_address)
        {
            Some(existing) => *existing = validator,
            None => self.validators.push(validator),
        }
    }

    pub fn set_power(&mut self, operator: &str, power: i64) {
        if let Some(v) = self
            .validators
            .iter_mut()
            .find(|v| v.operator_address == operator)
        {
            v.power = Some(power);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackedValidator> {
        self.validators.iter()
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }
}

// =============================================================================
// Power Events
// =============================================================================

/// What changed a validator's voting power.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerEventKind {
    Genesis,
    CreateValidator,
    Delegate,
    Undelegate,
    BeginRedelegate,
}

impl PowerEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Genesis => "genesis",
            Self::CreateValidator => "create_validator",
            Self::Delegate => "delegate",
            Self::Undelegate => "undelegate",
            Self::BeginRedelegate => "begin_redelegate",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "genesis" => Self::Genesis,
            "create_validator" => Self::CreateValidator,
            "delegate" => Self::Delegate,
            "undelegate" => Self::Undelegate,
            "begin_redelegate" => Self::BeginRedelegate,
            _ => return None,
        })
    }
}

/// One entry of the voting-power ledger.
///
/// `power == previous power + delta` for every non-genesis event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PowerEvent {
    pub validator_id: i64,
    pub operator_address: String,
    pub height: u64,
    pub kind: PowerEventKind,
    pub power: i64,
    /// `None` for genesis events.
    pub delta: Option<i64>,
    pub tx_hash: Option<String>,
    /// Position within the height, keeps two events of one validator apart.
    pub seq: u32,
}

// =============================================================================
// Uptime
// =============================================================================

/// One missed precommit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MissDetail {
    /// Hex consensus address of the validator that missed.
    pub address: String,
    pub height: u64,
    /// Proposer of the missed height.
    pub proposer_address: String,
    pub timestamp: DateTime<Utc>,
}

/// Contiguous run of missed heights for one validator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MissBlock {
    pub address: String,
    pub start_height: u64,
    pub end_height: u64,
    pub missing_count: u64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

/// Result of applying a miss to a validator's windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowChange {
    Extended,
    Opened,
    /// The height already belongs to a window (replayed height).
    AlreadyCovered,
}

impl MissBlock {
    pub fn open(miss: &MissDetail) -> Self {
        Self {
            address: miss.address.clone(),
            start_height: miss.height,
            end_height: miss.height,
            missing_count: 1,
            start_time: miss.timestamp,
            end_time: miss.timestamp,
        }
    }

    pub fn covers(&self, height: u64) -> bool {
        (self.start_height..=self.end_height).contains(&height)
    }

    /// Whether `height` directly follows this window.
    pub fn precedes(&self, height: u64) -> bool {
        self.end_height + 1 == height
    }

    pub fn extend(&mut self, miss: &MissDetail) {
        self.end_height = miss.height;
        self.end_time = miss.timestamp;
        self.missing_count += 1;
    }
}

/// Fold one miss into a validator's windows.
///
/// Windows are only ever extended from their immediate predecessor, so
/// they never overlap and `end - start + 1 == missing_count` holds.
pub fn apply_miss(windows: &mut Vec<MissBlock>, miss: &MissDetail) -> WindowChange {
    let mine = |w: &&mut MissBlock| w.address == miss.address;

    if windows
        .iter_mut()
        .filter(mine)
        .any(|w| w.covers(miss.height))
    {
        return WindowChange::AlreadyCovered;
    }

    if let Some(window) = windows
        .iter_mut()
        .filter(mine)
        .find(|w| w.precedes(miss.height))
    {
        window.extend(miss);
        return WindowChange::Extended;
    }

    windows.push(MissBlock::open(miss));
    WindowChange::Opened
}
