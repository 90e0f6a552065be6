//! In-memory adapters for pipeline tests.
//!
//! [`InMemoryRepositories`] follows the same write rules as the PostgreSQL
//! adapter (one atomic write per height, replay skips, window coalescing,
//! merge keys) and [`FakeChainClient`] serves a scripted chain with
//! per-transaction failure injection.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::error::{
    ChainError, ChainResult, DomainError, DomainResult, StorageError, StorageResult,
};
use crate::models::{
    AccountActivity, AccountSnapshot, Block, ChainContext, ChainDirectory, Coin, Deposit,
    DerivedRecords, DeviceToken, Evidence, GovernanceRecords, MissBlock, MissDetail, PowerEvent,
    Proposal, ProposalStatus, TrackedValidator, Transaction, Validator, ValidatorLedger, Vote,
    address, apply_miss,
};
use crate::ports::{
    AccountRepository, BlockIdFlag, BlockRepository, ChainClient, ChainRepository, ChunkDecoder,
    CommitSig, ConsensusValidator, Delegation, FetchedHeight, GovernanceRepository, HeightBatch,
    NodeStatus,
    PersistOutcome, RawBlock, RawBlockRow, RawRepository, RawTx, RawTxRow, Repositories,
    StakingValidator, ValidatorPage, ValidatorRepository,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// =============================================================================
// Fixtures
// =============================================================================

pub const TEST_CHAIN_ID: &str = "testchain-1";
pub const TEST_DENOM: &str = "stake";

pub fn sample_context() -> ChainContext {
    ChainContext {
        chain_id: TEST_CHAIN_ID.into(),
        chain_num: 1,
        bond_denom: TEST_DENOM.into(),
        genesis_height: 1,
    }
}

pub fn block_time(height: u64) -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH + Duration::seconds(1_700_000_000 + 6 * height as i64)
}

fn bech32(prefix: &str, seed: u8) -> String {
    let hrp = bech32::Hrp::parse(prefix).unwrap_or_else(|_| bech32::Hrp::parse_unchecked("cosmos"));
    bech32::encode::<bech32::Bech32>(hrp, &[seed; 20]).unwrap_or_default()
}

/// Deterministic account address for `seed`.
pub fn account_address(seed: u8) -> String {
    bech32("cosmos", seed)
}

/// Deterministic operator address for `seed`.
pub fn operator_address(seed: u8) -> String {
    bech32("cosmosvaloper", seed)
}

/// Deterministic base64 consensus key for `seed`.
pub fn consensus_pubkey(seed: u8) -> String {
    STANDARD.encode([seed; 32])
}

pub fn consensus_validator(seed: u8, voting_power: i64) -> ConsensusValidator {
    let pub_key = consensus_pubkey(seed);
    ConsensusValidator {
        address: address::consensus_hex_address(&pub_key).unwrap_or_default(),
        pub_key,
        voting_power,
        proposer_priority: 0,
    }
}

pub fn staking_validator(seed: u8, tokens: &str) -> StakingValidator {
    StakingValidator {
        operator_address: operator_address(seed),
        consensus_pubkey: consensus_pubkey(seed),
        moniker: format!("validator-{seed}"),
        status: "BOND_STATUS_BONDED".into(),
        jailed: false,
        tokens: tokens.into(),
        delegator_shares: format!("{tokens}.000000000000000000"),
        commission_rate: "0.050000000000000000".into(),
        commission_max_rate: "0.200000000000000000".into(),
        commission_max_change_rate: "0.010000000000000000".into(),
        min_self_delegation: "1".into(),
        source: Value::Null,
    }
}

/// Successful transaction carrying `messages`.
pub fn raw_tx(hash: &str, height: u64, messages: Vec<Value>) -> RawTx {
    RawTx {
        hash: hash.into(),
        height,
        code: 0,
        codespace: String::new(),
        messages,
        memo: String::new(),
        fee: json!({"amount": [{"denom": TEST_DENOM, "amount": "500"}], "gas_limit": "200000"}),
        signatures: vec!["c2ln".into()],
        gas_wanted: 200_000,
        gas_used: 80_000,
        raw_log: String::new(),
        logs: Vec::new(),
        events: Vec::new(),
        timestamp: block_time(height),
        source: Value::Null,
    }
}

pub fn msg_send(from: &str, to: &str, amount: &str) -> Value {
    json!({
        "@type": "/cosmos.bank.v1beta1.MsgSend",
        "from_address": from,
        "to_address": to,
        "amount": [{"denom": TEST_DENOM, "amount": amount}]
    })
}

// =============================================================================
// Fake Chain
// =============================================================================

struct ScriptedChain {
    chain_id: String,
    bond_denom: String,
    genesis: u64,
    latest: u64,
    blocks: BTreeMap<u64, RawBlock>,
    validator_sets: BTreeMap<u64, Vec<ConsensusValidator>>,
    default_set: Vec<ConsensusValidator>,
    staking: Vec<StakingValidator>,
    txs: HashMap<String, RawTx>,
    failures: HashMap<String, usize>,
    tx_calls: usize,
    proposals: BTreeMap<u64, Proposal>,
    balances: HashMap<String, Vec<Coin>>,
    delegations: HashMap<String, Vec<Delegation>>,
    rewards: HashMap<String, Vec<Coin>>,
}

impl ScriptedChain {
    fn validator_set(&self, height: u64) -> Vec<ConsensusValidator> {
        self.validator_sets
            .range(..=height)
            .next_back()
            .map(|(_, set)| set.clone())
            .unwrap_or_else(|| self.default_set.clone())
    }

    fn make_block(&self, height: u64) -> RawBlock {
        let set = self.validator_set(height);
        let proposer = set
            .get(height as usize % set.len().max(1))
            .map(|v| v.address.clone())
            .unwrap_or_default();
        let last_commit = if height > self.genesis {
            self.validator_set(height - 1)
                .iter()
                .map(|v| CommitSig {
                    flag: BlockIdFlag::Commit,
                    validator_address: v.address.clone(),
                    timestamp: Some(block_time(height)),
                })
                .collect()
        } else {
            Vec::new()
        };
        RawBlock {
            height,
            hash: format!("{height:064X}"),
            chain_id: self.chain_id.clone(),
            proposer_address: proposer,
            time: block_time(height),
            tx_hashes: Vec::new(),
            last_commit,
            evidence: Vec::new(),
            source: Value::Null,
        }
    }

    fn extend_to(&mut self, latest: u64) {
        for h in self.genesis..=latest {
            if !self.blocks.contains_key(&h) {
                let block = self.make_block(h);
                self.blocks.insert(h, block);
            }
        }
        self.latest = self.latest.max(latest);
    }
}

/// The fake node answers with the payloads' own JSON.
fn node_json<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_default()
}

/// Scripted chain with four equal validators.
///
/// Responses carry their JSON as `source`, readable by [`JsonChunkDecoder`].
pub struct FakeChainClient {
    chain: Mutex<ScriptedChain>,
}

impl FakeChainClient {
    /// Chain whose blocks run from `genesis` to `latest`.
    pub fn with_heights(genesis: u64, latest: u64) -> Self {
        let default_set: Vec<_> = (1..=4).map(|i| consensus_validator(i, 100)).collect();
        let staking = (1..=4).map(|i| staking_validator(i, "100000000")).collect();
        let mut chain = ScriptedChain {
            chain_id: TEST_CHAIN_ID.into(),
            bond_denom: TEST_DENOM.into(),
            genesis,
            latest,
            blocks: BTreeMap::new(),
            validator_sets: BTreeMap::new(),
            default_set,
            staking,
            txs: HashMap::new(),
            failures: HashMap::new(),
            tx_calls: 0,
            proposals: BTreeMap::new(),
            balances: HashMap::new(),
            delegations: HashMap::new(),
            rewards: HashMap::new(),
        };
        chain.extend_to(latest);
        Self {
            chain: Mutex::new(chain),
        }
    }

    /// Produce blocks up to `latest`.
    pub fn advance_to(&self, latest: u64) {
        lock(&self.chain).extend_to(latest);
    }

    /// Consensus validator set at genesis.
    pub fn validators(&self) -> Vec<ConsensusValidator> {
        lock(&self.chain).default_set.clone()
    }

    pub fn tx_calls(&self) -> usize {
        lock(&self.chain).tx_calls
    }

    /// Add `count` bank sends to `height`. Returns their hashes in block order.
    pub fn add_txs(&self, height: u64, count: usize) -> Vec<String> {
        (0..count)
            .map(|i| {
                let hash = format!("{:064X}", height * 10_000 + i as u64);
                let seed = (i % 50) as u8;
                let msg = msg_send(&account_address(100 + seed), &account_address(200 - seed), "1");
                self.push_tx(height, raw_tx(&hash, height, vec![msg]));
                hash
            })
            .collect()
    }

    /// Append a transaction to block `height`.
    pub fn push_tx(&self, height: u64, mut tx: RawTx) {
        let mut chain = lock(&self.chain);
        tx.height = height;
        tx.timestamp = block_time(height);
        if let Some(block) = chain.blocks.get_mut(&height) {
            block.tx_hashes.push(tx.hash.clone());
        }
        chain.txs.insert(tx.hash.clone(), tx);
    }

    /// Fail the next `times` fetches of `hash`.
    pub fn fail_tx(&self, hash: &str, times: usize) {
        lock(&self.chain).failures.insert(hash.to_string(), times);
    }

    /// Mark slot `index` of the commit for `height` as absent.
    pub fn set_absent(&self, height: u64, index: usize) {
        let mut chain = lock(&self.chain);
        if let Some(sig) = chain
            .blocks
            .get_mut(&(height + 1))
            .and_then(|b| b.last_commit.get_mut(index))
        {
            sig.flag = BlockIdFlag::Absent;
            sig.validator_address.clear();
            sig.timestamp = None;
        }
    }

    /// Replace the validator set from `height` onward (existing blocks keep theirs).
    pub fn set_validator_set(&self, height: u64, set: Vec<ConsensusValidator>) {
        lock(&self.chain).validator_sets.insert(height, set);
    }

    pub fn set_proposal(&self, proposal: Proposal) {
        lock(&self.chain).proposals.insert(proposal.id, proposal);
    }

    pub fn set_balances(&self, address: &str, coins: Vec<Coin>) {
        lock(&self.chain).balances.insert(address.into(), coins);
    }

    pub fn set_delegations(&self, address: &str, delegations: Vec<Delegation>) {
        lock(&self.chain)
            .delegations
            .insert(address.into(), delegations);
    }

    pub fn set_rewards(&self, address: &str, coins: Vec<Coin>) {
        lock(&self.chain).rewards.insert(address.into(), coins);
    }
}

#[async_trait]
impl ChainClient for FakeChainClient {
    async fn status(&self) -> ChainResult<NodeStatus> {
        let chain = lock(&self.chain);
        Ok(NodeStatus {
            chain_id: chain.chain_id.clone(),
            latest_height: chain.latest,
            earliest_height: chain.genesis,
            catching_up: false,
        })
    }

    async fn get_block(&self, height: u64) -> ChainResult<RawBlock> {
        let chain = lock(&self.chain);
        chain
            .blocks
            .get(&height)
            .filter(|_| height <= chain.latest)
            .map(|block| RawBlock {
                source: node_json(block),
                ..block.clone()
            })
            .ok_or(ChainError::BlockNotFound(height))
    }

    async fn get_tx(&self, hash: &str) -> ChainResult<RawTx> {
        let mut chain = lock(&self.chain);
        chain.tx_calls += 1;
        if let Some(left) = chain.failures.get_mut(hash)
            && *left > 0
        {
            *left -= 1;
            return Err(ChainError::ConnectionFailed(format!("injected failure for {hash}")));
        }
        chain
            .txs
            .get(hash)
            .map(|tx| RawTx {
                source: node_json(tx),
                ..tx.clone()
            })
            .ok_or_else(|| ChainError::TxNotFound(hash.to_string()))
    }

    async fn get_validators_at_height(
        &self,
        height: u64,
        page: u32,
        per_page: u32,
    ) -> ChainResult<ValidatorPage> {
        let set = lock(&self.chain).validator_set(height);
        let start = (page.saturating_sub(1) * per_page) as usize;
        let mut page = ValidatorPage {
            validators: set.iter().skip(start).take(per_page as usize).cloned().collect(),
            total: set.len(),
            source: Value::Null,
        };
        page.source = node_json(&page);
        Ok(page)
    }

    async fn get_bond_denom(&self) -> ChainResult<String> {
        Ok(lock(&self.chain).bond_denom.clone())
    }

    async fn get_staking_validators(
        &self,
        _height: Option<u64>,
    ) -> ChainResult<Vec<StakingValidator>> {
        Ok(lock(&self.chain)
            .staking
            .iter()
            .map(|v| StakingValidator {
                source: node_json(v),
                ..v.clone()
            })
            .collect())
    }

    async fn get_proposals(&self) -> ChainResult<Vec<Proposal>> {
        Ok(lock(&self.chain).proposals.values().cloned().collect())
    }

    async fn get_proposal(&self, id: u64) -> ChainResult<Proposal> {
        lock(&self.chain)
            .proposals
            .get(&id)
            .cloned()
            .ok_or_else(|| ChainError::QueryError {
                status: 404,
                path: format!("/cosmos/gov/v1/proposals/{id}"),
                message: "proposal not found".into(),
            })
    }

    async fn get_proposals_by_status(&self, status: ProposalStatus) -> ChainResult<Vec<Proposal>> {
        Ok(lock(&self.chain)
            .proposals
            .values()
            .filter(|p| p.status == Some(status))
            .cloned()
            .collect())
    }

    async fn get_balances(&self, address: &str) -> ChainResult<Vec<Coin>> {
        Ok(lock(&self.chain)
            .balances
            .get(address)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_delegator_delegations(&self, address: &str) -> ChainResult<Vec<Delegation>> {
        Ok(lock(&self.chain)
            .delegations
            .get(address)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_unbonding_delegations(&self, _address: &str) -> ChainResult<Vec<Coin>> {
        Ok(Vec::new())
    }

    async fn get_total_rewards(&self, address: &str) -> ChainResult<Vec<Coin>> {
        Ok(lock(&self.chain)
            .rewards
            .get(address)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_validator_commission(&self, _operator: &str) -> ChainResult<Vec<Coin>> {
        Ok(Vec::new())
    }
}

/// Reads raw store chunks written from [`FakeChainClient`] responses.
pub struct JsonChunkDecoder;

fn from_node_json<T: DeserializeOwned>(source: &Value) -> DomainResult<T> {
    serde_json::from_value(source.clone()).map_err(|e| DomainError::DecodingError(e.to_string()))
}

impl ChunkDecoder for JsonChunkDecoder {
    fn block(&self, source: &Value) -> DomainResult<RawBlock> {
        from_node_json(source)
    }

    fn validator_page(&self, source: &Value) -> DomainResult<ValidatorPage> {
        from_node_json(source)
    }

    fn staking_validator(&self, source: &Value) -> DomainResult<StakingValidator> {
        from_node_json(source)
    }

    fn tx(&self, source: &Value) -> DomainResult<RawTx> {
        from_node_json(source)
    }
}

// =============================================================================
// In-Memory Store
// =============================================================================

#[derive(Debug, Clone, Default)]
struct Store {
    chains: Vec<String>,
    blocks: BTreeMap<(i32, u64), Block>,
    transactions: BTreeMap<(i32, String), Transaction>,
    evidence: BTreeMap<(i32, u64, String), Evidence>,
    validators: BTreeMap<(i32, String), Validator>,
    power_events: BTreeMap<(i32, i64, u64, u32), PowerEvent>,
    miss_details: BTreeMap<(i32, String, u64), MissDetail>,
    miss_blocks: BTreeMap<i32, Vec<MissBlock>>,
    proposals: BTreeMap<(i32, u64), Proposal>,
    deposits: BTreeMap<(i32, u64, String, String), Deposit>,
    votes: BTreeMap<(i32, u64, String), Vote>,
    activity: BTreeMap<(i32, String, String), AccountActivity>,
    snapshots: BTreeMap<(i32, String), AccountSnapshot>,
    device_tokens: Vec<DeviceToken>,
    raw_blocks: Vec<RawBlockRow>,
    raw_txs: Vec<(RawTxRow, Vec<String>)>,
    next_raw_id: i64,
    failing_writes: usize,
}

impl Store {
    /// Returns the stored id, which wins over the incoming one.
    fn upsert_validator(&mut self, chain: i32, validator: &Validator) -> i64 {
        let key = (chain, validator.operator_address.clone());
        let mut row = validator.clone();
        if let Some(existing) = self.validators.get(&key) {
            row.id = existing.id;
            row.rank = row.rank.or(existing.rank);
        }
        let id = row.id;
        self.validators.insert(key, row);
        id
    }

    fn upsert_proposal(&mut self, chain: i32, proposal: &Proposal) {
        self.proposals
            .entry((chain, proposal.id))
            .and_modify(|p| p.merge(proposal))
            .or_insert_with(|| proposal.clone());
    }

    fn write_governance(&mut self, chain: i32, records: &GovernanceRecords) {
        for p in &records.proposals {
            self.upsert_proposal(chain, p);
        }
        for d in &records.deposits {
            self.deposits
                .entry((chain, d.proposal_id, d.depositor.clone(), d.tx_hash.clone()))
                .or_insert_with(|| d.clone());
        }
        for v in &records.votes {
            let key = (chain, v.proposal_id, v.voter.clone());
            let newer = self.votes.get(&key).is_none_or(|old| old.height <= v.height);
            if newer {
                self.votes.insert(key, v.clone());
            }
        }
    }

    fn write_refined(&mut self, chain: i32, records: &DerivedRecords) -> bool {
        let height = records.block.height;
        if self.blocks.contains_key(&(chain, height)) {
            return false;
        }
        self.blocks.insert((chain, height), records.block.clone());

        for tx in &records.transactions {
            self.transactions
                .entry((chain, tx.hash.clone()))
                .or_insert_with(|| tx.clone());
        }
        for ev in &records.evidence {
            self.evidence
                .entry((chain, ev.height, ev.validator_address.clone()))
                .or_insert_with(|| ev.clone());
        }
        let mut stored_ids = BTreeMap::new();
        for v in &records.validators {
            let id = self.upsert_validator(chain, v);
            stored_ids.insert(v.operator_address.clone(), id);
        }
        for pe in &records.power_events {
            let mut event = pe.clone();
            if let Some(id) = stored_ids.get(&pe.operator_address) {
                event.validator_id = *id;
            }
            self.power_events
                .entry((chain, event.validator_id, event.height, event.seq))
                .or_insert(event);
        }
        for miss in &records.misses {
            let key = (chain, miss.address.clone(), miss.height);
            if self.miss_details.contains_key(&key) {
                continue;
            }
            self.miss_details.insert(key, miss.clone());
            apply_miss(self.miss_blocks.entry(chain).or_default(), miss);
        }
        self.write_governance(chain, &records.governance);
        for a in &records.account_activity {
            self.activity
                .entry((chain, a.address.clone(), a.tx_hash.clone()))
                .or_insert_with(|| a.clone());
        }
        true
    }

    fn write_raw(&mut self, chain: i32, fetched: &FetchedHeight) -> StorageResult<bool> {
        let height = fetched.height();
        if self
            .raw_blocks
            .iter()
            .any(|r| r.chain_num == chain && r.height == height)
        {
            return Ok(false);
        }

        let chunk = fetched
            .payload
            .to_chunk()
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;
        self.next_raw_id += 1;
        self.raw_blocks.push(RawBlockRow {
            id: self.next_raw_id,
            chain_num: chain,
            height,
            chunk,
        });

        for tx in &fetched.txs {
            let chunk = tx
                .to_chunk()
                .map_err(|e| StorageError::SerializationError(e.to_string()))?;
            self.next_raw_id += 1;
            let row = RawTxRow {
                id: self.next_raw_id,
                chain_num: chain,
                height,
                tx_hash: tx.hash.clone(),
                chunk,
            };
            self.raw_txs.push((row, tx.msg_types()));
        }
        Ok(true)
    }
}

/// Order-independent view of every refined row of one chain.
#[derive(Debug, Clone, PartialEq)]
pub struct RefinedRows {
    pub blocks: Vec<Block>,
    pub transactions: Vec<Transaction>,
    pub evidence: Vec<Evidence>,
    pub validators: Vec<Validator>,
    pub power_events: Vec<PowerEvent>,
    pub miss_details: Vec<MissDetail>,
    pub miss_blocks: Vec<MissBlock>,
    pub proposals: Vec<Proposal>,
    pub deposits: Vec<Deposit>,
    pub votes: Vec<Vote>,
    pub activity: Vec<AccountActivity>,
}

/// In-memory [`Repositories`] implementation.
#[derive(Default)]
pub struct InMemoryRepositories {
    store: Mutex<Store>,
}

impl InMemoryRepositories {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` atomic writes before anything is applied.
    pub fn fail_next_writes(&self, count: usize) {
        lock(&self.store).failing_writes = count;
    }

    pub fn add_device_token(&self, token: DeviceToken) {
        lock(&self.store).device_tokens.push(token);
    }

    pub fn raw_block_count(&self) -> usize {
        lock(&self.store).raw_blocks.len()
    }

    pub fn raw_tx_count(&self) -> usize {
        lock(&self.store).raw_txs.len()
    }

    /// Every refined row of `chain`, sorted by natural key.
    pub fn refined_rows(&self, chain: i32) -> RefinedRows {
        let store = lock(&self.store);
        fn of_chain<K: Ord, V: Clone>(
            map: &BTreeMap<K, V>,
            chain: i32,
            chain_of: impl Fn(&K) -> i32,
        ) -> Vec<V> {
            map.iter()
                .filter(|(k, _)| chain_of(k) == chain)
                .map(|(_, v)| v.clone())
                .collect()
        }
        RefinedRows {
            blocks: of_chain(&store.blocks, chain, |k| k.0),
            transactions: of_chain(&store.transactions, chain, |k| k.0),
            evidence: of_chain(&store.evidence, chain, |k| k.0),
            validators: of_chain(&store.validators, chain, |k| k.0),
            power_events: of_chain(&store.power_events, chain, |k| k.0),
            miss_details: of_chain(&store.miss_details, chain, |k| k.0),
            miss_blocks: {
                let mut windows = store.miss_blocks.get(&chain).cloned().unwrap_or_default();
                windows.sort_by(|a, b| {
                    (&a.address, a.start_height).cmp(&(&b.address, b.start_height))
                });
                windows
            },
            proposals: of_chain(&store.proposals, chain, |k| k.0),
            deposits: of_chain(&store.deposits, chain, |k| k.0),
            votes: of_chain(&store.votes, chain, |k| k.0),
            activity: of_chain(&store.activity, chain, |k| k.0),
        }
    }

    fn take_failure(store: &mut Store) -> StorageResult<()> {
        if store.failing_writes > 0 {
            store.failing_writes -= 1;
            return Err(StorageError::TransactionError("injected write failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl BlockRepository for InMemoryRepositories {
    async fn latest_height(&self, chain: i32) -> StorageResult<Option<u64>> {
        Ok(lock(&self.store)
            .blocks
            .keys()
            .filter(|(c, _)| *c == chain)
            .map(|(_, h)| *h)
            .max())
    }

    async fn get_block(&self, chain: i32, height: u64) -> StorageResult<Option<Block>> {
        Ok(lock(&self.store).blocks.get(&(chain, height)).cloned())
    }
}

#[async_trait]
impl RawRepository for InMemoryRepositories {
    async fn latest_height(&self, chain: i32) -> StorageResult<Option<u64>> {
        Ok(lock(&self.store)
            .raw_blocks
            .iter()
            .filter(|r| r.chain_num == chain)
            .map(|r| r.height)
            .max())
    }

    async fn blocks_after(
        &self,
        chain: i32,
        after_height: u64,
        limit: i64,
    ) -> StorageResult<Vec<RawBlockRow>> {
        Ok(lock(&self.store)
            .raw_blocks
            .iter()
            .filter(|r| r.chain_num == chain && r.height > after_height)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn txs_at(&self, chain: i32, height: u64) -> StorageResult<Vec<RawTxRow>> {
        Ok(lock(&self.store)
            .raw_txs
            .iter()
            .filter(|(r, _)| r.chain_num == chain && r.height == height)
            .map(|(r, _)| r.clone())
            .collect())
    }

    async fn first_tx_id_with_msg_type(
        &self,
        chain: i32,
        msg_type: &str,
    ) -> StorageResult<Option<i64>> {
        Ok(lock(&self.store)
            .raw_txs
            .iter()
            .find(|(r, types)| r.chain_num == chain && types.iter().any(|t| t == msg_type))
            .map(|(r, _)| r.id))
    }

    async fn txs_with_msg_type_from(
        &self,
        chain: i32,
        msg_type: &str,
        from_id: i64,
        limit: i64,
    ) -> StorageResult<Vec<RawTxRow>> {
        Ok(lock(&self.store)
            .raw_txs
            .iter()
            .filter(|(r, types)| {
                r.chain_num == chain && r.id >= from_id && types.iter().any(|t| t == msg_type)
            })
            .take(limit.max(0) as usize)
            .map(|(r, _)| r.clone())
            .collect())
    }
}

#[async_trait]
impl ValidatorRepository for InMemoryRepositories {
    async fn ledger(&self, chain: i32) -> StorageResult<ValidatorLedger> {
        let store = lock(&self.store);
        let tracked = store
            .validators
            .iter()
            .filter(|((c, _), _)| *c == chain)
            .map(|(_, v)| {
                let power = store
                    .power_events
                    .iter()
                    .filter(|((c, id, _, _), _)| *c == chain && *id == v.id)
                    .max_by_key(|((_, _, h, seq), _)| (*h, *seq))
                    .map(|(_, e)| e.power);
                TrackedValidator {
                    id: v.id,
                    operator_address: v.operator_address.clone(),
                    proposer_address: Some(v.proposer_address.clone())
                        .filter(|p| !p.is_empty()),
                    power,
                }
            })
            .collect();
        Ok(ValidatorLedger::new(tracked))
    }

    async fn list(&self, chain: i32) -> StorageResult<Vec<Validator>> {
        let mut validators: Vec<_> = lock(&self.store)
            .validators
            .iter()
            .filter(|((c, _), _)| *c == chain)
            .map(|(_, v)| v.clone())
            .collect();
        validators.sort_by_key(|v| v.id);
        Ok(validators)
    }

    async fn upsert(&self, chain: i32, validators: &[Validator]) -> StorageResult<()> {
        let mut store = lock(&self.store);
        for v in validators {
            store.upsert_validator(chain, v);
        }
        Ok(())
    }
}

#[async_trait]
impl GovernanceRepository for InMemoryRepositories {
    async fn upsert_proposals(&self, chain: i32, proposals: &[Proposal]) -> StorageResult<()> {
        let mut store = lock(&self.store);
        for p in proposals {
            store.upsert_proposal(chain, p);
        }
        Ok(())
    }

    async fn get_proposal(&self, chain: i32, id: u64) -> StorageResult<Option<Proposal>> {
        Ok(lock(&self.store).proposals.get(&(chain, id)).cloned())
    }

    async fn live_proposal_ids(&self, chain: i32) -> StorageResult<Vec<u64>> {
        Ok(lock(&self.store)
            .proposals
            .iter()
            .filter(|((c, _), p)| *c == chain && p.status.is_some_and(|s| s.is_live()))
            .map(|((_, id), _)| *id)
            .collect())
    }
}

#[async_trait]
impl AccountRepository for InMemoryRepositories {
    async fn upsert_snapshots(
        &self,
        chain: i32,
        snapshots: &[AccountSnapshot],
    ) -> StorageResult<()> {
        let mut store = lock(&self.store);
        for s in snapshots {
            store.snapshots.insert((chain, s.address.clone()), s.clone());
        }
        Ok(())
    }

    async fn get_snapshot(
        &self,
        chain: i32,
        address: &str,
    ) -> StorageResult<Option<AccountSnapshot>> {
        Ok(lock(&self.store)
            .snapshots
            .get(&(chain, address.to_string()))
            .cloned())
    }

    async fn device_tokens(&self, addresses: &[String]) -> StorageResult<Vec<DeviceToken>> {
        Ok(lock(&self.store)
            .device_tokens
            .iter()
            .filter(|t| addresses.contains(&t.address))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ChainRepository for InMemoryRepositories {
    async fn ensure_chain(&self, chain_id: &str) -> StorageResult<i32> {
        let mut store = lock(&self.store);
        let index = match store.chains.iter().position(|c| c == chain_id) {
            Some(index) => index,
            None => {
                store.chains.push(chain_id.to_string());
                store.chains.len() - 1
            }
        };
        Ok(index as i32 + 1)
    }

    async fn directory(&self) -> StorageResult<ChainDirectory> {
        let store = lock(&self.store);
        Ok(ChainDirectory::from_rows(
            store
                .chains
                .iter()
                .enumerate()
                .map(|(i, id)| (i as i32 + 1, id.clone())),
        ))
    }
}

#[async_trait]
impl Repositories for InMemoryRepositories {
    fn blocks(&self) -> &dyn BlockRepository {
        self
    }

    fn raw(&self) -> &dyn RawRepository {
        self
    }

    fn validators(&self) -> &dyn ValidatorRepository {
        self
    }

    fn governance(&self) -> &dyn GovernanceRepository {
        self
    }

    fn accounts(&self) -> &dyn AccountRepository {
        self
    }

    fn chains(&self) -> &dyn ChainRepository {
        self
    }

    async fn persist_height_atomic(&self, batch: HeightBatch<'_>) -> StorageResult<PersistOutcome> {
        let mut guard = lock(&self.store);
        Self::take_failure(&mut guard)?;

        // Work on a copy so a failed raw write leaves nothing behind.
        let mut store = guard.clone();
        let mut outcome = PersistOutcome::default();
        if let Some(records) = batch.refined {
            outcome.refined = store.write_refined(batch.chain_num, records);
        }
        if let Some(fetched) = batch.raw {
            outcome.raw = store.write_raw(batch.chain_num, fetched)?;
        }
        *guard = store;
        Ok(outcome)
    }

    async fn persist_governance_atomic(
        &self,
        chain: i32,
        records: &GovernanceRecords,
    ) -> StorageResult<()> {
        let mut store = lock(&self.store);
        Self::take_failure(&mut store)?;
        store.write_governance(chain, records);
        Ok(())
    }
}
