//! End-to-end pipeline tests: fake chain → fetcher → derivation → in-memory store.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::watch;

use chronicle_core::error::IndexerError;
use chronicle_core::models::{MissBlock, PowerEvent, PowerEventKind};
use chronicle_core::ports::{
    Deriver, EventAttribute, HeightBatch, NoopNotifier, Repositories, TxEvent,
};
use chronicle_core::services::{
    FetcherConfig, GovernanceBackfill, HeightFetcher, IndexerConfig, IndexerService, RefineConfig,
    RefineService, SyncMode,
};
use chronicle_core::testing::{
    FakeChainClient, InMemoryRepositories, JsonChunkDecoder, TEST_DENOM, account_address,
    consensus_pubkey, msg_send, operator_address, raw_tx, sample_context, staking_validator,
};
use chronicle_handlers::DerivationEngine;

type Indexer = IndexerService<FakeChainClient, InMemoryRepositories, DerivationEngine>;

fn indexer(
    mode: SyncMode,
    client: &Arc<FakeChainClient>,
    repos: &Arc<InMemoryRepositories>,
) -> Indexer {
    let config = IndexerConfig {
        mode,
        poll_interval: Duration::from_millis(5),
        retry_delay: Duration::from_millis(5),
        refresh_accounts: false,
        ..Default::default()
    };
    IndexerService::new(
        config,
        Arc::new(sample_context()),
        Arc::clone(client),
        Arc::clone(repos),
        Arc::new(DerivationEngine::new()),
        Arc::new(NoopNotifier),
    )
}

/// Process every height up to `to`, retrying failed heights a bounded number of times.
async fn sync_to(indexer: &Indexer, to: u64) {
    let mut height = indexer.next_height().await.unwrap();
    let mut attempts = 0;
    while height <= to {
        match indexer.process_height(height).await {
            Ok(_) => height += 1,
            Err(e) => {
                attempts += 1;
                assert!(attempts < 10, "height {height} keeps failing: {e}");
            }
        }
    }
}

fn stake(amount: &str) -> Value {
    json!({"denom": TEST_DENOM, "amount": amount})
}

fn delegate(kind: &str, validator: u8, amount: &str) -> Value {
    json!({
        "@type": format!("/cosmos.staking.v1beta1.{kind}"),
        "delegator_address": account_address(50),
        "validator_address": operator_address(validator),
        "amount": stake(amount)
    })
}

fn redelegate(src: u8, dst: u8, amount: &str) -> Value {
    json!({
        "@type": "/cosmos.staking.v1beta1.MsgBeginRedelegate",
        "delegator_address": account_address(50),
        "validator_src_address": operator_address(src),
        "validator_dst_address": operator_address(dst),
        "amount": stake(amount)
    })
}

fn create_validator(seed: u8, amount: &str) -> Value {
    json!({
        "@type": "/cosmos.staking.v1beta1.MsgCreateValidator",
        "description": {"moniker": format!("joiner-{seed}")},
        "commission": {"rate": "0.1", "max_rate": "0.2", "max_change_rate": "0.01"},
        "min_self_delegation": "1",
        "delegator_address": account_address(seed),
        "validator_address": operator_address(seed),
        "pubkey": {"@type": "/cosmos.crypto.ed25519.PubKey", "key": consensus_pubkey(seed)},
        "value": stake(amount)
    })
}

fn events_of(events: &[PowerEvent], validator_id: i64) -> Vec<PowerEvent> {
    let mut mine: Vec<_> = events
        .iter()
        .filter(|e| e.validator_id == validator_id)
        .cloned()
        .collect();
    mine.sort_by_key(|e| (e.height, e.seq));
    mine
}

// =============================================================================
// Scenarios
// =============================================================================

// Test critique: genèse à 4 validateurs, 4 événements de puissance, aucune absence
#[tokio::test]
async fn genesis_height_seeds_power_ledger() {
    let client = Arc::new(FakeChainClient::with_heights(1, 3));
    let repos = Arc::new(InMemoryRepositories::new());
    let indexer = indexer(SyncMode::Basic, &client, &repos);

    indexer.process_height(1).await.unwrap();

    let rows = repos.refined_rows(1);
    assert_eq!(rows.blocks.len(), 1);
    assert_eq!(rows.validators.len(), 4);
    assert_eq!(rows.power_events.len(), 4);
    assert!(rows
        .power_events
        .iter()
        .all(|e| e.kind == PowerEventKind::Genesis && e.power == 100 && e.delta.is_none()));
    assert!(rows.miss_blocks.is_empty());
    assert!(rows.miss_details.is_empty());
}

// Test critique: deux absences contiguës donnent une seule fenêtre
#[tokio::test]
async fn contiguous_misses_coalesce_into_one_window() {
    let client = Arc::new(FakeChainClient::with_heights(1, 103));
    let missing = client.validators()[2].address.clone();
    client.set_absent(100, 2);
    client.set_absent(101, 2);
    let repos = Arc::new(InMemoryRepositories::new());
    let indexer = indexer(SyncMode::Basic, &client, &repos);

    sync_to(&indexer, 102).await;

    let rows = repos.refined_rows(1);
    assert_eq!(
        rows.miss_blocks,
        vec![MissBlock {
            address: missing.clone(),
            start_height: 100,
            end_height: 101,
            missing_count: 2,
            start_time: rows.miss_details[0].timestamp,
            end_time: rows.miss_details[1].timestamp,
        }]
    );
    assert_eq!(rows.miss_details.len(), 2);
    assert!(rows.miss_details.iter().all(|m| m.address == missing));
}

// Test critique: une absence à la hauteur de genèse est bien comptée
#[tokio::test]
async fn miss_at_genesis_height_is_recorded() {
    let client = Arc::new(FakeChainClient::with_heights(1, 5));
    let missing = client.validators()[2].address.clone();
    client.set_absent(1, 2);
    let repos = Arc::new(InMemoryRepositories::new());

    sync_to(&indexer(SyncMode::Basic, &client, &repos), 1).await;

    let rows = repos.refined_rows(1);
    assert_eq!(rows.miss_details.len(), 1);
    assert_eq!(rows.miss_details[0].address, missing);
    assert_eq!(rows.miss_details[0].height, 1);
    assert_eq!(rows.miss_blocks.len(), 1);
    assert_eq!(rows.miss_blocks[0].start_height, 1);
    assert_eq!(rows.miss_blocks[0].missing_count, 1);
}

// Test critique: un validateur inséré par le poller pendant la dérivation garde son id,
// et les événements de puissance de la hauteur pointent vers cet id
#[tokio::test]
async fn power_events_follow_validator_id_stored_concurrently() {
    let client = Arc::new(FakeChainClient::with_heights(1, 8));
    client.push_tx(6, raw_tx("C6", 6, vec![create_validator(9, "5000000")]));
    let repos = Arc::new(InMemoryRepositories::new());
    sync_to(&indexer(SyncMode::Basic, &client, &repos), 5).await;

    let ctx = sample_context();
    let fetched = HeightFetcher::new(FetcherConfig::default(), Arc::clone(&client))
        .fetch(&ctx, 6)
        .await
        .unwrap();
    let stale = repos.validators().ledger(1).await.unwrap();

    // The poller lands two new validators between the ledger read and the commit.
    repos
        .validators()
        .upsert(
            1,
            &[
                staking_validator(10, "1000000").to_validator(5).unwrap(),
                staking_validator(9, "5000000").to_validator(6).unwrap(),
            ],
        )
        .await
        .unwrap();

    let records = DerivationEngine::new().derive(&ctx, &fetched, &stale).unwrap();
    assert_eq!(records.validators[0].id, 5);
    repos
        .persist_height_atomic(HeightBatch {
            chain_num: 1,
            raw: None,
            refined: Some(&records),
        })
        .await
        .unwrap();

    let rows = repos.refined_rows(1);
    let joined: Vec<_> = rows
        .power_events
        .iter()
        .filter(|e| e.operator_address == operator_address(9))
        .collect();
    assert_eq!(joined.len(), 1);
    assert_eq!(joined[0].validator_id, 6);
    assert!(events_of(&rows.power_events, 5).is_empty());
}

// Test critique: un échec de récupération de tx fait échouer toute la hauteur
#[tokio::test]
async fn failed_tx_fetch_retries_whole_height() {
    let client = Arc::new(FakeChainClient::with_heights(1, 6));
    let hashes = client.add_txs(5, 50);
    client.fail_tx(&hashes[36], 1);
    let repos = Arc::new(InMemoryRepositories::new());
    let indexer = indexer(SyncMode::Basic, &client, &repos);

    sync_to(&indexer, 4).await;
    let err = indexer.process_height(5).await.unwrap_err();
    assert!(matches!(err, IndexerError::Chain(_)));
    assert_eq!(repos.refined_rows(1).transactions.len(), 0);
    assert_eq!(repos.raw_tx_count(), 0);

    indexer.process_height(5).await.unwrap();
    let rows = repos.refined_rows(1);
    assert_eq!(rows.transactions.len(), 50);
    assert_eq!(rows.blocks.last().map(|b| b.tx_count), Some(50));
    assert_eq!(repos.raw_tx_count(), 50);
}

// Test critique: rejouer une hauteur (crash puis reprise) ne duplique rien
#[tokio::test]
async fn replayed_height_is_idempotent() {
    let client = Arc::new(FakeChainClient::with_heights(1, 12));
    client.add_txs(4, 3);
    client.set_absent(5, 1);
    client.push_tx(6, raw_tx("D1", 6, vec![delegate("MsgDelegate", 1, "4000000")]));
    let repos = Arc::new(InMemoryRepositories::new());
    let indexer = indexer(SyncMode::Basic, &client, &repos);

    sync_to(&indexer, 6).await;
    let before = repos.refined_rows(1);
    let raw_before = (repos.raw_block_count(), repos.raw_tx_count());

    for height in 1..=6 {
        let outcome = indexer.process_height(height).await.unwrap();
        assert!(!outcome.refined && !outcome.raw);
    }

    assert_eq!(repos.refined_rows(1), before);
    assert_eq!((repos.raw_block_count(), repos.raw_tx_count()), raw_before);
    assert_eq!(before.blocks.len(), 6);
    assert_eq!(before.transactions.len(), 4);
}

#[tokio::test]
async fn failed_write_leaves_no_partial_height() {
    let client = Arc::new(FakeChainClient::with_heights(1, 4));
    client.add_txs(2, 2);
    let repos = Arc::new(InMemoryRepositories::new());
    let indexer = indexer(SyncMode::Basic, &client, &repos);

    indexer.process_height(1).await.unwrap();
    repos.fail_next_writes(1);
    assert!(indexer.process_height(2).await.is_err());
    assert_eq!(repos.refined_rows(1).blocks.len(), 1);
    assert_eq!(repos.raw_block_count(), 1);

    indexer.process_height(2).await.unwrap();
    assert_eq!(repos.refined_rows(1).transactions.len(), 2);
}

// Test critique: puissance[i] == puissance[i-1] + delta[i]
#[tokio::test]
async fn power_events_chain_deltas_across_heights() {
    let client = Arc::new(FakeChainClient::with_heights(1, 10));
    client.push_tx(3, raw_tx("P3", 3, vec![delegate("MsgDelegate", 1, "10000000")]));
    client.push_tx(4, raw_tx("P4", 4, vec![delegate("MsgUndelegate", 1, "3000000")]));
    client.push_tx(5, raw_tx("P5", 5, vec![redelegate(1, 2, "7000000")]));
    client.push_tx(
        6,
        raw_tx(
            "P6",
            6,
            vec![create_validator(9, "5000000"), create_validator(10, "2000000")],
        ),
    );
    client.push_tx(7, raw_tx("P7", 7, vec![delegate("MsgDelegate", 10, "1000000")]));
    let repos = Arc::new(InMemoryRepositories::new());
    let indexer = indexer(SyncMode::Basic, &client, &repos);

    sync_to(&indexer, 8).await;
    let rows = repos.refined_rows(1);

    let first = events_of(&rows.power_events, 1);
    assert_eq!(
        first.iter().map(|e| e.power).collect::<Vec<_>>(),
        vec![100, 110, 107, 100]
    );
    for pair in first.windows(2) {
        assert_eq!(pair[1].power, pair[0].power + pair[1].delta.unwrap());
    }
    assert_eq!(
        events_of(&rows.power_events, 2).last().map(|e| e.power),
        Some(107)
    );

    // Same-block creations: ids in message order.
    let joiners: Vec<_> = rows.validators.iter().filter(|v| v.id > 4).collect();
    assert_eq!(joiners.len(), 2);
    let id_of = |seed: u8| {
        joiners
            .iter()
            .find(|v| v.operator_address == operator_address(seed))
            .map(|v| v.id)
    };
    assert_eq!((id_of(9), id_of(10)), (Some(5), Some(6)));
    let tenth = events_of(&rows.power_events, 6);
    assert_eq!(tenth.iter().map(|e| e.power).collect::<Vec<_>>(), vec![2, 3]);
    assert_eq!(tenth[0].kind, PowerEventKind::CreateValidator);
}

#[tokio::test]
async fn failed_txs_are_stored_but_derive_nothing() {
    let client = Arc::new(FakeChainClient::with_heights(1, 4));
    let mut tx = raw_tx(
        "F2",
        2,
        vec![msg_send(&account_address(1), &account_address(2), "9")],
    );
    tx.code = 11;
    client.push_tx(2, tx);
    let repos = Arc::new(InMemoryRepositories::new());
    let indexer = indexer(SyncMode::Basic, &client, &repos);

    sync_to(&indexer, 2).await;
    let rows = repos.refined_rows(1);
    assert_eq!(rows.transactions.len(), 1);
    assert_eq!(rows.transactions[0].code, 11);
    assert!(rows.activity.is_empty());
}

// =============================================================================
// Raw capture, refine and backfill
// =============================================================================

fn submit_proposal_tx(hash: &str, height: u64, id: &str) -> chronicle_core::ports::RawTx {
    let mut tx = raw_tx(
        hash,
        height,
        vec![json!({
            "@type": "/cosmos.gov.v1.MsgSubmitProposal",
            "messages": [],
            "initial_deposit": [stake("10000000")],
            "proposer": account_address(7),
            "metadata": "",
            "title": "Community spend",
            "summary": "Fund the explorer"
        })],
    );
    tx.events = vec![TxEvent {
        kind: "submit_proposal".into(),
        attributes: vec![
            EventAttribute {
                key: "proposal_id".into(),
                value: id.into(),
            },
            EventAttribute {
                key: "msg_index".into(),
                value: "0".into(),
            },
        ],
    }];
    tx
}

fn vote_tx(hash: &str, height: u64, option: &str) -> chronicle_core::ports::RawTx {
    raw_tx(
        hash,
        height,
        vec![json!({
            "@type": "/cosmos.gov.v1.MsgVote",
            "proposal_id": "1",
            "voter": account_address(8),
            "option": option,
            "metadata": ""
        })],
    )
}

fn busy_chain() -> Arc<FakeChainClient> {
    let client = Arc::new(FakeChainClient::with_heights(1, 16));
    client.add_txs(2, 5);
    client.set_absent(3, 0);
    client.set_absent(4, 0);
    client.set_absent(7, 3);
    client.push_tx(5, raw_tx("S5", 5, vec![delegate("MsgDelegate", 2, "3000000")]));
    client.push_tx(6, submit_proposal_tx("G6", 6, "1"));
    client.push_tx(8, vote_tx("V8", 8, "VOTE_OPTION_YES"));
    client.push_tx(9, vote_tx("V9", 9, "VOTE_OPTION_NO"));
    client.push_tx(10, raw_tx("C10", 10, vec![create_validator(12, "4000000")]));
    client.push_tx(11, raw_tx("R11", 11, vec![redelegate(12, 3, "1000000")]));
    client
}

// Test critique: basic et raw+refine produisent exactement les mêmes lignes
#[tokio::test]
async fn refine_matches_basic_sync() {
    let client = busy_chain();

    let basic = Arc::new(InMemoryRepositories::new());
    sync_to(&indexer(SyncMode::Basic, &client, &basic), 14).await;

    let staged = Arc::new(InMemoryRepositories::new());
    sync_to(&indexer(SyncMode::Raw, &client, &staged), 14).await;
    assert!(staged.refined_rows(1).blocks.is_empty());
    assert_eq!(staged.raw_block_count(), 14);

    let refine = RefineService::new(
        RefineConfig {
            batch_size: 4,
            ..Default::default()
        },
        Arc::new(sample_context()),
        Arc::clone(&staged),
        Arc::new(DerivationEngine::new()),
        Arc::new(JsonChunkDecoder),
    );
    let (_tx, rx) = watch::channel(false);
    assert_eq!(refine.run(rx.clone()).await.unwrap(), 14);

    let expected = basic.refined_rows(1);
    assert_eq!(staged.refined_rows(1), expected);
    assert_eq!(expected.votes.len(), 1);
    assert_eq!(expected.votes[0].options[0].option, "VOTE_OPTION_NO");

    // A second pass finds nothing left to refine.
    assert_eq!(refine.run(rx).await.unwrap(), 0);
    assert_eq!(staged.refined_rows(1), expected);
}

// Test critique: un échec d'écriture pendant le raffinage est réessayé, pas fatal
#[tokio::test]
async fn refine_retries_failed_write() {
    let client = busy_chain();
    let repos = Arc::new(InMemoryRepositories::new());
    sync_to(&indexer(SyncMode::Raw, &client, &repos), 5).await;

    let refine = RefineService::new(
        RefineConfig {
            retry_delay: Duration::from_millis(5),
            ..Default::default()
        },
        Arc::new(sample_context()),
        Arc::clone(&repos),
        Arc::new(DerivationEngine::new()),
        Arc::new(JsonChunkDecoder),
    );
    repos.fail_next_writes(2);
    let (_tx, rx) = watch::channel(false);

    assert_eq!(refine.run(rx).await.unwrap(), 5);
    let heights: Vec<u64> = repos
        .refined_rows(1)
        .blocks
        .iter()
        .map(|b| b.height)
        .collect();
    assert_eq!(heights, vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn governance_backfill_replays_one_message_type() {
    let client = busy_chain();
    let repos = Arc::new(InMemoryRepositories::new());
    sync_to(&indexer(SyncMode::Raw, &client, &repos), 12).await;

    let backfill = GovernanceBackfill::new(
        Arc::new(sample_context()),
        Arc::clone(&repos),
        Arc::new(DerivationEngine::new()),
        Arc::new(JsonChunkDecoder),
    )
    .with_batch_size(1);

    let written = backfill
        .run("/cosmos.gov.v1.MsgSubmitProposal")
        .await
        .unwrap();
    assert_eq!(written, 2);

    let proposal = repos
        .governance()
        .get_proposal(1, 1)
        .await
        .unwrap()
        .expect("proposal backfilled");
    assert_eq!(proposal.title.as_deref(), Some("Community spend"));
    assert_eq!(proposal.submit_height, Some(6));
    assert_eq!(repos.refined_rows(1).deposits.len(), 1);
    assert!(repos.refined_rows(1).blocks.is_empty());

    assert_eq!(backfill.run("/cosmos.gov.v1.MsgVote").await.unwrap(), 2);
    let votes = repos.refined_rows(1).votes;
    assert_eq!(votes.len(), 1);
    assert_eq!(votes[0].height, 9);
}

// =============================================================================
// Sync loop
// =============================================================================

#[tokio::test]
async fn run_loop_reaches_chain_head_and_follows() {
    let client = Arc::new(FakeChainClient::with_heights(1, 8));
    client.add_txs(3, 4);
    let repos = Arc::new(InMemoryRepositories::new());
    let indexer = Arc::new(indexer(SyncMode::Basic, &client, &repos));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let handle = tokio::spawn({
        let indexer = Arc::clone(&indexer);
        async move { indexer.run(shutdown_rx).await }
    });

    let wait_for = |target: u64| {
        let repos = Arc::clone(&repos);
        async move {
            for _ in 0..400 {
                if repos.blocks().latest_height(1).await.unwrap() == Some(target) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            panic!("watermark never reached {target}");
        }
    };

    // Chain head is latest - 1.
    wait_for(7).await;
    client.advance_to(11);
    wait_for(10).await;

    shutdown_tx.send(true).unwrap();
    let result = handle.await.unwrap();
    assert!(matches!(result, Err(IndexerError::ShutdownRequested)));
    assert_eq!(repos.refined_rows(1).blocks.len(), 10);
}
