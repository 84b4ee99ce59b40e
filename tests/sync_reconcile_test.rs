use async_trait::async_trait;
use httpmock::prelude::*;
use notice_sync::core::sync::{MatchKind, ReconcileOutcome};
use notice_sync::domain::model::{
    ChainEvent, ChainEventKind, NoticePayload, NoticeStatus, StagedNotice, SyncCursor,
    TransactionInfo, TxStatus,
};
use notice_sync::domain::ports::{ChainClient, NoticeStore, ProcessServerUpsert};
use notice_sync::{
    BlockchainSync, InMemoryNoticeStore, NoticeError, Result, SyncSettings, TronGridClient,
    TronGridSettings,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const CONTRACT: &str = "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t";
const SERVER: &str = "TBXSw8fM4jpQkGc6zZjsVABFpVN7UvXPdV";
const RECIPIENT: &str = "TD5gsCwxykWsLN9aPrq2TAfNjByuZKYp4E";
const OTHER_RECIPIENT: &str = "TEdvoHEatmDKvTh3o9vBRB9Vdtbhn4QFhy";

/// Chain double whose block height, events and receipts are set by the test.
#[derive(Default)]
struct ScriptedChain {
    block: Mutex<u64>,
    events: Mutex<Vec<ChainEvent>>,
    receipts: Mutex<HashMap<String, TransactionInfo>>,
    failing: Mutex<bool>,
    calls: AtomicUsize,
}

impl ScriptedChain {
    fn set_block(&self, block: u64) {
        *self.block.lock().unwrap() = block;
    }

    fn push(&self, event: ChainEvent) {
        self.events.lock().unwrap().push(event);
    }

    fn set_receipt(&self, info: TransactionInfo) {
        self.receipts
            .lock()
            .unwrap()
            .insert(info.tx_hash.clone(), info);
    }

    fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }
}

#[async_trait]
impl ChainClient for ScriptedChain {
    async fn current_block(&self) -> Result<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if *self.failing.lock().unwrap() {
            return Err(NoticeError::ChainError {
                message: "node unavailable".to_string(),
            });
        }
        Ok(*self.block.lock().unwrap())
    }

    async fn events_since(&self, min_block_timestamp_ms: i64) -> Result<Vec<ChainEvent>> {
        Ok(self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.block_timestamp_ms >= min_block_timestamp_ms)
            .cloned()
            .collect())
    }

    async fn transaction_info(&self, tx_hash: &str) -> Result<Option<TransactionInfo>> {
        Ok(self.receipts.lock().unwrap().get(tx_hash).cloned())
    }
}

fn settings() -> SyncSettings {
    SyncSettings {
        poll_interval: Duration::from_millis(10),
        max_backoff: Duration::from_millis(40),
        start_block_timestamp_ms: Some(0),
        ..SyncSettings::default()
    }
}

fn served_event(tx: &str, block: u64, alert_id: &str, recipient: &str) -> ChainEvent {
    ChainEvent {
        transaction_hash: tx.to_string(),
        block_number: block,
        block_timestamp_ms: block as i64 * 3000,
        kind: ChainEventKind::NoticeServed {
            alert_id: alert_id.to_string(),
            document_id: Some(format!("{}-doc", alert_id)),
            server: SERVER.to_string(),
            recipient: recipient.to_string(),
        },
    }
}

async fn stage(store: &InMemoryNoticeStore, recipient: &str) -> StagedNotice {
    store
        .insert_staged(&NoticePayload {
            server_address: SERVER.to_string(),
            recipient_address: recipient.to_string(),
            case_number: "2024-CV-0042".to_string(),
            agency: "Harris County Sheriff".to_string(),
            notice_type: "Summons".to_string(),
            public_text: "You have been named in a civil action.".to_string(),
            ipfs_hash: None,
            jurisdiction: None,
            batch_id: None,
        })
        .await
        .unwrap()
}

fn sync_with(
    store: &InMemoryNoticeStore,
) -> (
    BlockchainSync<InMemoryNoticeStore, Arc<ScriptedChain>>,
    Arc<ScriptedChain>,
) {
    let chain = Arc::new(ScriptedChain::default());
    (
        BlockchainSync::new(store.clone(), chain.clone(), settings()),
        chain,
    )
}

#[tokio::test]
async fn test_served_event_matches_by_transaction_hash() {
    let store = InMemoryNoticeStore::new();
    let (sync, _) = sync_with(&store);

    // two pending rows for the same pair; the hash disambiguates
    let submitted = stage(&store, RECIPIENT).await;
    let other = stage(&store, RECIPIENT).await;
    let tx = "aa".repeat(32);
    store.attach_transaction(submitted.id, &tx).await.unwrap();

    let outcome = sync
        .reconcile(&served_event(&tx, 100, "41", RECIPIENT))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        ReconcileOutcome::Matched {
            staged_id: submitted.id,
            by: MatchKind::TransactionHash
        }
    );

    let row = store.get_staged(submitted.id).await.unwrap().unwrap();
    assert_eq!(row.status, NoticeStatus::Confirmed);
    assert_eq!(row.alert_id.as_deref(), Some("41"));
    assert_eq!(row.document_id.as_deref(), Some("41-doc"));
    assert_eq!(row.block_number, Some(100));

    let untouched = store.get_staged(other.id).await.unwrap().unwrap();
    assert_eq!(untouched.status, NoticeStatus::Pending);

    let served = store.get_served("41").await.unwrap().unwrap();
    assert_eq!(served.staged_id, Some(submitted.id));
    let record = store.get_transaction(&tx).await.unwrap().unwrap();
    assert_eq!(record.status, TxStatus::Success);
    assert_eq!(record.staged_id, Some(submitted.id));
}

#[tokio::test]
async fn test_served_event_matches_unique_pending_row() {
    let store = InMemoryNoticeStore::new();
    let (sync, _) = sync_with(&store);
    let staged = stage(&store, RECIPIENT).await;
    stage(&store, OTHER_RECIPIENT).await;

    let tx = "bb".repeat(32);
    let outcome = sync
        .reconcile(&served_event(&tx, 101, "42", RECIPIENT))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        ReconcileOutcome::Matched {
            staged_id: staged.id,
            by: MatchKind::UniquePending
        }
    );
    let row = store.get_staged(staged.id).await.unwrap().unwrap();
    assert_eq!(row.status, NoticeStatus::Confirmed);
    assert_eq!(row.transaction_hash.as_deref(), Some(tx.as_str()));
}

#[tokio::test]
async fn test_ambiguous_candidates_are_left_alone() {
    let store = InMemoryNoticeStore::new();
    let (sync, _) = sync_with(&store);
    let first = stage(&store, RECIPIENT).await;
    let second = stage(&store, RECIPIENT).await;

    let outcome = sync
        .reconcile(&served_event(&"cc".repeat(32), 102, "43", RECIPIENT))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        ReconcileOutcome::Ambiguous {
            candidates: vec![first.id, second.id]
        }
    );
    for id in [first.id, second.id] {
        let row = store.get_staged(id).await.unwrap().unwrap();
        assert_eq!(row.status, NoticeStatus::Pending);
        assert!(row.transaction_hash.is_none());
    }

    let served = store.get_served("43").await.unwrap().unwrap();
    assert!(served.staged_id.is_none());
}

#[tokio::test]
async fn test_orphan_is_recorded_and_replay_is_idempotent() {
    let store = InMemoryNoticeStore::new();
    let (sync, _) = sync_with(&store);
    let event = served_event(&"dd".repeat(32), 103, "44", RECIPIENT);

    assert_eq!(
        sync.reconcile(&event).await.unwrap(),
        ReconcileOutcome::Orphaned
    );
    assert!(store.get_served("44").await.unwrap().is_some());

    assert_eq!(
        sync.reconcile(&event).await.unwrap(),
        ReconcileOutcome::AlreadyApplied
    );
}

#[tokio::test]
async fn test_replay_after_match_does_not_touch_a_second_row() {
    let store = InMemoryNoticeStore::new();
    let (sync, _) = sync_with(&store);
    let first = stage(&store, RECIPIENT).await;

    let event = served_event(&"ee".repeat(32), 104, "45", RECIPIENT);
    sync.reconcile(&event).await.unwrap();

    // a later notice for the same pair must not absorb the replayed event
    let second = stage(&store, RECIPIENT).await;
    assert_eq!(
        sync.reconcile(&event).await.unwrap(),
        ReconcileOutcome::AlreadyApplied
    );

    assert_eq!(
        store.get_staged(first.id).await.unwrap().unwrap().status,
        NoticeStatus::Confirmed
    );
    assert_eq!(
        store.get_staged(second.id).await.unwrap().unwrap().status,
        NoticeStatus::Pending
    );
}

#[tokio::test]
async fn test_orphan_replay_ignores_notice_staged_later() {
    let store = InMemoryNoticeStore::new();
    let (sync, _) = sync_with(&store);
    let event = served_event(&"e2".repeat(32), 104, "47", RECIPIENT);

    assert_eq!(
        sync.reconcile(&event).await.unwrap(),
        ReconcileOutcome::Orphaned
    );

    let fresh = stage(&store, RECIPIENT).await;
    assert_eq!(
        sync.reconcile(&event).await.unwrap(),
        ReconcileOutcome::AlreadyApplied
    );

    let row = store.get_staged(fresh.id).await.unwrap().unwrap();
    assert_eq!(row.status, NoticeStatus::Pending);
    assert!(row.transaction_hash.is_none());
    assert!(row.alert_id.is_none());
    assert!(store.get_served("47").await.unwrap().unwrap().staged_id.is_none());
}

#[tokio::test]
async fn test_ambiguous_replay_leaves_remaining_candidate_pending() {
    let store = InMemoryNoticeStore::new();
    let (sync, _) = sync_with(&store);
    let first = stage(&store, RECIPIENT).await;
    let second = stage(&store, RECIPIENT).await;

    let event = served_event(&"e3".repeat(32), 104, "48", RECIPIENT);
    assert_eq!(
        sync.reconcile(&event).await.unwrap(),
        ReconcileOutcome::Ambiguous {
            candidates: vec![first.id, second.id]
        }
    );

    // the first notice lands through its own transaction
    let own_tx = "e4".repeat(32);
    store.attach_transaction(first.id, &own_tx).await.unwrap();
    assert_eq!(
        sync.reconcile(&served_event(&own_tx, 105, "49", RECIPIENT))
            .await
            .unwrap(),
        ReconcileOutcome::Matched {
            staged_id: first.id,
            by: MatchKind::TransactionHash
        }
    );

    assert_eq!(
        sync.reconcile(&event).await.unwrap(),
        ReconcileOutcome::AlreadyApplied
    );
    let row = store.get_staged(second.id).await.unwrap().unwrap();
    assert_eq!(row.status, NoticeStatus::Pending);
    assert!(row.transaction_hash.is_none());
    assert!(row.alert_id.is_none());
}

#[tokio::test]
async fn test_acknowledgement_records_view_once() {
    let store = InMemoryNoticeStore::new();
    let (sync, _) = sync_with(&store);
    sync.reconcile(&served_event(&"f1".repeat(32), 105, "46", RECIPIENT))
        .await
        .unwrap();

    let ack = ChainEvent {
        transaction_hash: "f2".repeat(32),
        block_number: 106,
        block_timestamp_ms: 318_000,
        kind: ChainEventKind::NoticeAcknowledged {
            alert_id: "46".to_string(),
            recipient: RECIPIENT.to_string(),
        },
    };

    assert_eq!(
        sync.reconcile(&ack).await.unwrap(),
        ReconcileOutcome::Acknowledged {
            alert_id: "46".to_string(),
            new_view: true
        }
    );
    assert_eq!(
        sync.reconcile(&ack).await.unwrap(),
        ReconcileOutcome::Acknowledged {
            alert_id: "46".to_string(),
            new_view: false
        }
    );

    assert!(store.get_served("46").await.unwrap().unwrap().acknowledged);
    let views = store.views_for("46").await;
    assert_eq!(views.len(), 1);
    assert!(views[0].acknowledged);
    assert_eq!(
        store
            .get_transaction(&"f2".repeat(32))
            .await
            .unwrap()
            .unwrap()
            .kind,
        "acknowledge"
    );
}

#[tokio::test]
async fn test_server_registration_and_unknown_events() {
    let store = InMemoryNoticeStore::new();
    let (sync, _) = sync_with(&store);

    store
        .upsert_process_server(&ProcessServerUpsert {
            wallet_address: SERVER.to_string(),
            agency: Some("Harris County Sheriff".to_string()),
            display_name: None,
            active: false,
        })
        .await
        .unwrap();

    let registered = |server: &str| ChainEvent {
        transaction_hash: "a1".repeat(32),
        block_number: 107,
        block_timestamp_ms: 321_000,
        kind: ChainEventKind::ServerRegistered {
            server: server.to_string(),
        },
    };

    sync.reconcile(&registered(SERVER)).await.unwrap();
    let existing = store.get_process_server(SERVER).await.unwrap().unwrap();
    assert_eq!(existing.agency, "Harris County Sheriff");
    assert!(existing.active);

    sync.reconcile(&registered(OTHER_RECIPIENT)).await.unwrap();
    let fresh = store
        .get_process_server(OTHER_RECIPIENT)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fresh.agency, "unassigned");

    let other = ChainEvent {
        transaction_hash: "a2".repeat(32),
        block_number: 108,
        block_timestamp_ms: 324_000,
        kind: ChainEventKind::Other {
            name: "FeeUpdated".to_string(),
        },
    };
    assert_eq!(
        sync.reconcile(&other).await.unwrap(),
        ReconcileOutcome::Ignored {
            name: "FeeUpdated".to_string()
        }
    );
}

#[tokio::test]
async fn test_tick_advances_cursor_and_goes_idle() {
    let store = InMemoryNoticeStore::new();
    let (mut sync, chain) = sync_with(&store);
    stage(&store, RECIPIENT).await;

    chain.set_block(200);
    chain.push(served_event(&"b1".repeat(32), 150, "50", RECIPIENT));
    chain.push(served_event(&"b2".repeat(32), 160, "51", OTHER_RECIPIENT));

    let report = sync.tick().await.unwrap();
    assert!(!report.idle);
    assert_eq!(report.events, 2);
    assert_eq!(report.matched, 1);
    assert_eq!(report.orphaned, 1);

    let cursor = store.load_cursor().await.unwrap().unwrap();
    assert_eq!(
        cursor,
        SyncCursor {
            block_number: 200,
            block_timestamp_ms: 160 * 3000
        }
    );

    let idle = sync.tick().await.unwrap();
    assert!(idle.idle);
    assert_eq!(idle.events, 0);

    // the boundary event comes back with the inclusive lower bound
    chain.set_block(201);
    chain.push(served_event(&"b3".repeat(32), 201, "52", RECIPIENT));
    let next = sync.tick().await.unwrap();
    assert_eq!(next.events, 2);
    assert_eq!(next.already_applied, 1);
    assert_eq!(next.orphaned, 1);
}

#[tokio::test]
async fn test_tick_resumes_from_saved_cursor() {
    let store = InMemoryNoticeStore::new();
    store
        .save_cursor(&SyncCursor {
            block_number: 500,
            block_timestamp_ms: 1_500_000,
        })
        .await
        .unwrap();

    let (mut sync, chain) = sync_with(&store);
    chain.set_block(500);
    chain.push(served_event(&"c1".repeat(32), 400, "60", RECIPIENT));

    let report = sync.tick().await.unwrap();
    assert!(report.idle);
    assert_eq!(sync.cursor().map(|c| c.block_number), Some(500));
    assert!(store.get_served("60").await.unwrap().is_none());
}

#[tokio::test]
async fn test_tick_expires_stale_unsubmitted_rows() {
    let store = InMemoryNoticeStore::new();
    let chain = Arc::new(ScriptedChain::default());
    let mut sync = BlockchainSync::new(
        store.clone(),
        chain.clone(),
        SyncSettings {
            stale_after: Some(chrono::Duration::hours(72)),
            ..settings()
        },
    );

    let stale = stage(&store, RECIPIENT).await;
    let fresh = stage(&store, OTHER_RECIPIENT).await;
    store
        .backdate_staged(stale.id, chrono::Utc::now() - chrono::Duration::hours(100))
        .await;

    chain.set_block(20);
    let report = sync.tick().await.unwrap();
    assert_eq!(report.expired, 1);

    assert_eq!(
        store.get_staged(stale.id).await.unwrap().unwrap().status,
        NoticeStatus::Expired
    );
    assert_eq!(
        store.get_staged(fresh.id).await.unwrap().unwrap().status,
        NoticeStatus::Pending
    );
}

#[tokio::test]
async fn test_tick_fails_reverted_pending_transactions() {
    let store = InMemoryNoticeStore::new();
    let (mut sync, chain) = sync_with(&store);

    let reverted = stage(&store, RECIPIENT).await;
    let waiting = stage(&store, OTHER_RECIPIENT).await;
    let reverted_tx = "d1".repeat(32);
    store
        .attach_transaction(reverted.id, &reverted_tx)
        .await
        .unwrap();
    store
        .attach_transaction(waiting.id, &"d2".repeat(32))
        .await
        .unwrap();

    chain.set_block(10);
    chain.set_receipt(TransactionInfo {
        tx_hash: reverted_tx.clone(),
        block_number: 9,
        success: false,
        result: "REVERT".to_string(),
    });

    let report = sync.tick().await.unwrap();
    assert_eq!(report.failed_transactions, 1);
    assert_eq!(
        store.get_staged(reverted.id).await.unwrap().unwrap().status,
        NoticeStatus::Failed
    );
    assert_eq!(
        store.get_staged(waiting.id).await.unwrap().unwrap().status,
        NoticeStatus::Pending
    );
    assert_eq!(
        store
            .get_transaction(&reverted_tx)
            .await
            .unwrap()
            .unwrap()
            .status,
        TxStatus::Failed
    );
}

#[tokio::test]
async fn test_run_keeps_polling_through_errors_until_shutdown() {
    let store = InMemoryNoticeStore::new();
    let (mut sync, chain) = sync_with(&store);
    chain.set_failing(true);

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        sync.run(tokio::time::sleep(Duration::from_millis(150))),
    )
    .await
    .expect("run should stop on shutdown");

    assert!(result.is_ok());
    assert!(chain.calls.load(Ordering::SeqCst) >= 2);
    assert!(store.load_cursor().await.unwrap().is_none());
}

#[tokio::test]
async fn test_tick_against_trongrid() {
    let server = MockServer::start();
    let tx = "e1".repeat(32);

    server.mock(|when, then| {
        when.method(POST).path("/wallet/getnowblock");
        then.status(200).json_body(serde_json::json!({
            "block_header": {"raw_data": {"number": 70_000_000u64}}
        }));
    });
    let events = server.mock(|when, then| {
        when.method(GET)
            .path(format!("/v1/contracts/{}/events", CONTRACT))
            .query_param("min_block_timestamp", "1000")
            .query_param("order_by", "block_timestamp,asc");
        then.status(200).json_body(serde_json::json!({
            "success": true,
            "data": [{
                "block_number": 69_999_990u64,
                "block_timestamp": 1_700_000_000_000i64,
                "event_name": "LegalNoticeCreated",
                "transaction_id": tx,
                "result": {
                    "alertId": "900",
                    "documentId": "901",
                    "server": "411111111111111111111111111111111111111111",
                    "recipient": "412222222222222222222222222222222222222222"
                }
            }],
            "meta": {}
        }));
    });

    let store = InMemoryNoticeStore::new();
    let staged = stage(&store, RECIPIENT).await;

    let client =
        Arc::new(TronGridClient::new(TronGridSettings::new(server.base_url(), CONTRACT)).unwrap());
    let mut sync = BlockchainSync::new(
        store.clone(),
        client,
        SyncSettings {
            start_block_timestamp_ms: Some(1000),
            recheck_pending: false,
            ..SyncSettings::default()
        },
    );

    let report = sync.tick().await.unwrap();
    events.assert();
    assert_eq!(report.matched, 1);

    let row = store.get_staged(staged.id).await.unwrap().unwrap();
    assert_eq!(row.status, NoticeStatus::Confirmed);
    assert_eq!(row.alert_id.as_deref(), Some("900"));
    assert_eq!(row.transaction_hash.as_deref(), Some(tx.as_str()));
    assert_eq!(
        sync.cursor().map(|c| c.block_timestamp_ms),
        Some(1_700_000_000_000)
    );
}
