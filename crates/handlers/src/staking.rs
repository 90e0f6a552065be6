//! Voting-power ledger.
//!
//! [`PowerTracker`] works on a private copy of the validator ledger and
//! applies staking messages in (tx, message) order, so two messages touching
//! the same validator in one height chain their deltas.

use tracing::{debug, warn};

use chronicle_core::error::DomainResult;
use chronicle_core::metrics::record_decode_error;
use chronicle_core::models::{
    ChainContext, Coin, PowerEvent, PowerEventKind, TrackedValidator, Validator, ValidatorLedger,
};
use chronicle_core::ports::{HeightPayload, RawTx, StakingValidator};

use crate::messages::{MSG_CREATE_VALIDATOR, MsgBeginRedelegate, MsgCreateValidator, MsgDelegate};

/// Bond-denom units per unit of voting power.
///
/// Assumes a 6-decimal bond denomination; chains with another exponent get
/// a scaled ledger.
pub const POWER_REDUCTION: u128 = 1_000_000;

/// Voting power of a bond-denom amount. Other denoms carry no power.
pub fn power_of(coin: &Coin, bond_denom: &str) -> Option<i64> {
    if coin.denom != bond_denom {
        return None;
    }
    coin.integer_amount()
        .map(|amount| i64::try_from(amount / POWER_REDUCTION).unwrap_or(i64::MAX))
}

pub struct PowerTracker<'a> {
    ctx: &'a ChainContext,
    payload: &'a HeightPayload,
    ledger: ValidatorLedger,
    events: Vec<PowerEvent>,
    validators: Vec<Validator>,
}

impl<'a> PowerTracker<'a> {
    pub fn new(ctx: &'a ChainContext, payload: &'a HeightPayload, ledger: &ValidatorLedger) -> Self {
        Self {
            ctx,
            payload,
            ledger: ledger.clone(),
            events: Vec::new(),
            validators: Vec::new(),
        }
    }

    fn height(&self) -> u64 {
        self.payload.height()
    }

    fn push(&mut self, mut event: PowerEvent) {
        event.seq = u32::try_from(self.events.len()).unwrap_or(u32::MAX);
        self.ledger.set_power(&event.operator_address, event.power);
        self.events.push(event);
    }

    /// Reuse the tracked id of `operator`, or take the next free one.
    fn id_for(&self, operator: &str) -> i64 {
        self.ledger
            .by_operator(operator)
            .map(|v| v.id)
            .unwrap_or_else(|| self.ledger.max_id() + 1)
    }

    fn set_power(&self, proposer: &str) -> Option<i64> {
        self.payload
            .validators
            .iter()
            .find(|v| v.address == proposer)
            .map(|v| v.voting_power)
    }

    /// One `genesis` event per validator of the initial set.
    pub fn genesis(&mut self) -> DomainResult<()> {
        let payload = self.payload;
        let Some(initial) = payload.genesis_validators.as_ref() else {
            return Ok(());
        };
        if !self.ctx.is_genesis(self.height()) {
            return Ok(());
        }

        for staking in initial {
            let id = self.id_for(&staking.operator_address);
            let validator = staking.to_validator(id)?;
            let power = self.set_power(&validator.proposer_address).unwrap_or_else(|| {
                power_of(
                    &Coin::new(self.ctx.bond_denom.as_str(), staking.tokens.as_str()),
                    &self.ctx.bond_denom,
                )
                .unwrap_or(0)
            });

            self.track(&validator);
            self.push(PowerEvent {
                validator_id: id,
                operator_address: validator.operator_address.clone(),
                height: self.height(),
                kind: PowerEventKind::Genesis,
                power,
                delta: None,
                tx_hash: None,
                seq: 0,
            });
            self.validators.push(validator);
        }
        Ok(())
    }

    fn track(&mut self, validator: &Validator) {
        let power = self
            .ledger
            .by_operator(&validator.operator_address)
            .and_then(|v| v.power);
        self.ledger.track(TrackedValidator {
            id: validator.id,
            operator_address: validator.operator_address.clone(),
            proposer_address: Some(validator.proposer_address.clone()),
            power,
        });
    }

    pub fn create_validator(&mut self, tx: &RawTx, msg: &MsgCreateValidator) {
        let id = self.id_for(&msg.validator_address);
        let staking = StakingValidator {
            operator_address: msg.validator_address.clone(),
            consensus_pubkey: msg.pubkey.key.clone(),
            moniker: msg.description.moniker.clone(),
            status: "BOND_STATUS_UNBONDED".into(),
            jailed: false,
            tokens: msg.value.amount.clone(),
            delegator_shares: msg.value.amount.clone(),
            commission_rate: msg.commission.rate.clone(),
            commission_max_rate: msg.commission.max_rate.clone(),
            commission_max_change_rate: msg.commission.max_change_rate.clone(),
            min_self_delegation: msg.min_self_delegation.clone(),
            source: Default::default(),
        };
        let validator = match staking.to_validator(id) {
            Ok(validator) => validator,
            Err(e) => {
                warn!(tx = %tx.hash, error = %e, "⚠️ Skipping create-validator with bad key");
                record_decode_error(MSG_CREATE_VALIDATOR);
                return;
            }
        };
        let power = power_of(&msg.value, &self.ctx.bond_denom).unwrap_or(0);

        self.track(&validator);
        self.push(PowerEvent {
            validator_id: id,
            operator_address: validator.operator_address.clone(),
            height: self.height(),
            kind: PowerEventKind::CreateValidator,
            power,
            delta: Some(power),
            tx_hash: Some(tx.hash.clone()),
            seq: 0,
        });
        self.validators.push(validator);
    }

    pub fn delegate(&mut self, tx: &RawTx, msg: &MsgDelegate) {
        self.shift(tx, &msg.validator_address, &msg.amount, 1, PowerEventKind::Delegate);
    }

    pub fn undelegate(&mut self, tx: &RawTx, msg: &MsgDelegate) {
        self.shift(tx, &msg.validator_address, &msg.amount, -1, PowerEventKind::Undelegate);
    }

    /// Two events: source loses, destination gains.
    pub fn redelegate(&mut self, tx: &RawTx, msg: &MsgBeginRedelegate) {
        let kind = PowerEventKind::BeginRedelegate;
        self.shift(tx, &msg.validator_src_address, &msg.amount, -1, kind);
        self.shift(tx, &msg.validator_dst_address, &msg.amount, 1, kind);
    }

    fn shift(&mut self, tx: &RawTx, operator: &str, amount: &Coin, sign: i64, kind: PowerEventKind) {
        let Some(delta) = power_of(amount, &self.ctx.bond_denom) else {
            debug!(tx = %tx.hash, denom = %amount.denom, "Ignoring non-bond denom");
            return;
        };
        let Some(tracked) = self.ledger.by_operator(operator) else {
            warn!(
                height = self.height(),
                tx = %tx.hash,
                validator = operator,
                "⚠️ Staking message for untracked validator"
            );
            return;
        };

        let base = tracked
            .power
            .or_else(|| tracked.proposer_address.as_deref().and_then(|p| self.set_power(p)))
            .unwrap_or(0);
        let delta = delta.saturating_mul(sign);
        let event = PowerEvent {
            validator_id: tracked.id,
            operator_address: operator.to_string(),
            height: self.height(),
            kind,
            power: base.saturating_add(delta),
            delta: Some(delta),
            tx_hash: Some(tx.hash.clone()),
            seq: 0,
        };
        self.push(event);
    }

    pub fn finish(self) -> (Vec<Validator>, Vec<PowerEvent>) {
        (self.validators, self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chronicle_core::ports::RawBlock;
    use chronicle_core::testing::{
        block_time, consensus_pubkey, consensus_validator, operator_address, raw_tx,
        sample_context, staking_validator,
    };

    fn payload(height: u64, genesis: Option<Vec<StakingValidator>>) -> HeightPayload {
        HeightPayload {
            block: RawBlock {
                height,
                hash: "H".into(),
                chain_id: "testchain-1".into(),
                proposer_address: String::new(),
                time: block_time(height),
                tx_hashes: vec![],
                last_commit: vec![],
                evidence: vec![],
                source: Default::default(),
            },
            commit: vec![],
            next_evidence: vec![],
            next_height: height + 1,
            validators: (1..=4).map(|i| consensus_validator(i, 100)).collect(),
            genesis_validators: genesis,
            source: Default::default(),
        }
    }

    fn stake(amount: &str) -> Coin {
        Coin::new("stake", amount)
    }

    fn create_msg(seed: u8, amount: &str) -> MsgCreateValidator {
        serde_json::from_value(serde_json::json!({
            "description": {"moniker": format!("new-{seed}")},
            "commission": {
                "rate": "0.1", "max_rate": "0.2", "max_change_rate": "0.01"
            },
            "min_self_delegation": "1",
            "validator_address": operator_address(seed),
            "pubkey": {"@type": "/cosmos.crypto.ed25519.PubKey", "key": consensus_pubkey(seed)},
            "value": {"denom": "stake", "amount": amount}
        }))
        .unwrap()
    }

    #[test]
    fn power_of_scales_bond_denom_only() {
        assert_eq!(power_of(&stake("2500000"), "stake"), Some(2));
        assert_eq!(power_of(&Coin::new("uother", "2500000"), "stake"), None);
    }

    // Test critique: la genèse émet un événement par validateur initial
    #[test]
    fn genesis_emits_one_event_per_validator() {
        let ctx = sample_context();
        let genesis = (1..=4).map(|i| staking_validator(i, "100000000")).collect();
        let payload = payload(1, Some(genesis));
        let mut tracker = PowerTracker::new(&ctx, &payload, &ValidatorLedger::default());
        tracker.genesis().unwrap();
        let (validators, events) = tracker.finish();

        assert_eq!(validators.len(), 4);
        assert_eq!(
            validators.iter().map(|v| v.id).collect::<Vec<_>>(),
            vec![1, 2, 3, 4]
        );
        assert!(events.iter().all(|e| e.kind == PowerEventKind::Genesis));
        assert!(events.iter().all(|e| e.power == 100 && e.delta.is_none()));
    }

    #[test]
    fn genesis_reuses_tracked_ids() {
        let ctx = sample_context();
        let ledger = ValidatorLedger::new(vec![TrackedValidator {
            id: 7,
            operator_address: operator_address(2),
            proposer_address: None,
            power: None,
        }]);
        let payload = payload(1, Some(vec![staking_validator(2, "1"), staking_validator(3, "1")]));
        let mut tracker = PowerTracker::new(&ctx, &payload, &ledger);
        tracker.genesis().unwrap();
        let (validators, _) = tracker.finish();
        assert_eq!(validators[0].id, 7);
        assert_eq!(validators[1].id, 8);
    }

    // Test critique: deux créations dans le même bloc reçoivent des ids distincts
    #[test]
    fn same_block_creations_take_consecutive_ids() {
        let ctx = sample_context();
        let payload = payload(50, None);
        let ledger = ValidatorLedger::new(vec![TrackedValidator {
            id: 4,
            operator_address: operator_address(4),
            proposer_address: None,
            power: Some(100),
        }]);
        let tx = raw_tx("AA", 50, vec![]);
        let mut tracker = PowerTracker::new(&ctx, &payload, &ledger);
        tracker.create_validator(&tx, &create_msg(10, "5000000"));
        tracker.create_validator(&tx, &create_msg(11, "7000000"));
        let (validators, events) = tracker.finish();

        assert_eq!(validators.iter().map(|v| v.id).collect::<Vec<_>>(), vec![5, 6]);
        assert_eq!(events[0].power, 5);
        assert_eq!(events[1].delta, Some(7));
        assert_eq!(events.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn deltas_chain_within_a_height() {
        let ctx = sample_context();
        let payload = payload(60, None);
        let ledger = ValidatorLedger::new(vec![
            TrackedValidator {
                id: 1,
                operator_address: operator_address(1),
                proposer_address: None,
                power: Some(100),
            },
            TrackedValidator {
                id: 2,
                operator_address: operator_address(2),
                proposer_address: None,
                power: Some(50),
            },
        ]);
        let tx = raw_tx("AA", 60, vec![]);
        let mut tracker = PowerTracker::new(&ctx, &payload, &ledger);
        let delegate = MsgDelegate {
            delegator_address: "d".into(),
            validator_address: operator_address(1),
            amount: stake("10000000"),
        };
        tracker.delegate(&tx, &delegate);
        tracker.undelegate(&tx, &MsgDelegate {
            amount: stake("3000000"),
            ..delegate.clone()
        });
        tracker.redelegate(
            &tx,
            &MsgBeginRedelegate {
                delegator_address: "d".into(),
                validator_src_address: operator_address(1),
                validator_dst_address: operator_address(2),
                amount: stake("7000000"),
            },
        );
        let (_, events) = tracker.finish();

        let powers: Vec<_> = events.iter().map(|e| (e.validator_id, e.power)).collect();
        assert_eq!(powers, vec![(1, 110), (1, 107), (1, 100), (2, 57)]);
    }

    #[test]
    fn untracked_power_falls_back_to_validator_set() {
        let ctx = sample_context();
        let payload = payload(70, None);
        let proposer = payload.validators[2].address.clone();
        let ledger = ValidatorLedger::new(vec![TrackedValidator {
            id: 3,
            operator_address: operator_address(3),
            proposer_address: Some(proposer),
            power: None,
        }]);
        let tx = raw_tx("AA", 70, vec![]);
        let mut tracker = PowerTracker::new(&ctx, &payload, &ledger);
        tracker.delegate(
            &tx,
            &MsgDelegate {
                delegator_address: "d".into(),
                validator_address: operator_address(3),
                amount: stake("1000000"),
            },
        );
        let (_, events) = tracker.finish();
        assert_eq!(events[0].power, 101);
    }

    #[test]
    fn unknown_validator_is_skipped() {
        let ctx = sample_context();
        let payload = payload(70, None);
        let tx = raw_tx("AA", 70, vec![]);
        let mut tracker = PowerTracker::new(&ctx, &payload, &ValidatorLedger::default());
        tracker.delegate(
            &tx,
            &MsgDelegate {
                delegator_address: "d".into(),
                validator_address: operator_address(9),
                amount: stake("1000000"),
            },
        );
        assert!(tracker.finish().1.is_empty());
    }
}
