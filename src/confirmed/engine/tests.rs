use std::sync::Arc;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::watch;

use crate::config::ScannerConfig;
use crate::confirmed::engine::ScanEngine;
use crate::confirmed::error::{HeightError, ScanError};
use crate::confirmed::engine::state::{ScanStatus, StopSignal};
use crate::events::{EventSink, PaymentEvent, ScannerEvent};
use crate::ledger::mock_client::{p2pkh_output, test_txid, transaction};
use crate::ledger::{LedgerError, MockLedgerClient, Output, ScriptPubKey};
use crate::persistence::MemoryHeightStore;

// =========================================================================
// Helpers
// =========================================================================

const HASH: &str = "89abcdefabcdefabcdefabcdefabcdefabcdef01";
const ADDRESS: &str = "1DbT3ZmLpCMQx5ZtwqrAfT5QeGfNWyqkAy";

struct Harness {
    engine: ScanEngine<MockLedgerClient, MemoryHeightStore>,
    ledger: MockLedgerClient,
    store: MemoryHeightStore,
    stop: Arc<StopSignal>,
    rx: UnboundedReceiver<ScannerEvent>,
}

impl Harness {
    fn payments(&mut self) -> Vec<PaymentEvent> {
        let mut payments = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            if let ScannerEvent::Output(payment) = event {
                payments.push(payment);
            }
        }
        payments
    }
}

async fn setup(ledger: MockLedgerClient, store: MemoryHeightStore, config: ScannerConfig) -> Harness {
    let (events, rx) = EventSink::channel();
    let stop = Arc::new(StopSignal::default());
    let engine = ScanEngine::load(ledger.clone(), store.clone(), config, events, stop.clone())
        .await
        .expect("engine loads");
    Harness {
        engine,
        ledger,
        store,
        stop,
        rx,
    }
}

/// Chain of `blocks` blocks above genesis, each paying one output.
fn paying_chain(blocks: usize) -> MockLedgerClient {
    let ledger = MockLedgerClient::new();
    for i in 0..blocks {
        ledger.push_block(vec![transaction(
            &format!("pay-{}", i),
            vec![p2pkh_output(0, 0.001, HASH, ADDRESS)],
        )]);
    }
    ledger
}

fn four_token_output() -> Output {
    Output {
        index: Some(0),
        value: Some(1.0),
        script_pub_key: Some(ScriptPubKey {
            script_type: Some("pubkeyhash".to_string()),
            asm: Some(format!("OP_DUP OP_HASH160 {} OP_EQUALVERIFY", HASH)),
            addresses: Some(vec![ADDRESS.to_string()]),
            address: None,
        }),
    }
}

// =========================================================================
// Tests
// =========================================================================

#[tokio::test]
async fn catches_up_to_tip_in_order() {
    let mut h = setup(paying_chain(5), MemoryHeightStore::new(), ScannerConfig::default()).await;

    let report = h.engine.tick().await.unwrap();

    assert_eq!(report.network_height, 5);
    assert_eq!(report.heights, 5);
    assert_eq!(report.payments, 5);
    assert!(!report.stopped);
    assert_eq!(h.engine.scanned_height(), Some(5));
    assert_eq!(h.ledger.requested_heights(), vec![1, 2, 3, 4, 5]);
    assert_eq!(h.store.history(), vec![1, 2, 3, 4, 5]);
    assert_eq!(h.payments().len(), 5);
}

#[tokio::test]
async fn idle_tick_changes_nothing() {
    let mut h = setup(paying_chain(2), MemoryHeightStore::with_height(2), ScannerConfig::default()).await;

    let report = h.engine.tick().await.unwrap();

    assert_eq!(report.heights, 0);
    assert_eq!(h.engine.scanned_height(), Some(2));
    assert!(h.ledger.requested_heights().is_empty());
    assert!(h.store.history().is_empty());
}

#[tokio::test]
async fn new_blocks_are_picked_up_by_the_next_tick() {
    let mut h = setup(paying_chain(2), MemoryHeightStore::new(), ScannerConfig::default()).await;
    h.engine.tick().await.unwrap();
    assert_eq!(h.engine.scanned_height(), Some(2));

    h.ledger.push_empty_blocks(3);
    let report = h.engine.tick().await.unwrap();

    assert_eq!(report.heights, 3);
    assert_eq!(h.engine.scanned_height(), Some(5));
    assert_eq!(h.store.history(), vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn confirmation_depth_gates_recent_heights() {
    let config = ScannerConfig {
        min_conf: 3,
        ..Default::default()
    };
    let mut h = setup(paying_chain(5), MemoryHeightStore::new(), config).await;

    h.engine.tick().await.unwrap();

    // 3 + (3 - 1) == 5
    assert_eq!(h.engine.scanned_height(), Some(3));
    assert!(h.ledger.requested_heights().iter().all(|&n| n + 2 <= 5));
}

#[tokio::test]
async fn confirmation_depth_deeper_than_chain_scans_nothing() {
    let config = ScannerConfig {
        min_conf: 10,
        ..Default::default()
    };
    let mut h = setup(paying_chain(3), MemoryHeightStore::new(), config).await;

    let report = h.engine.tick().await.unwrap();

    assert_eq!(report.heights, 0);
    assert_eq!(h.engine.scanned_height(), None);
    assert!(h.ledger.requested_heights().is_empty());
}

#[tokio::test]
async fn empty_store_skips_genesis_by_default() {
    // The node cannot return the genesis coinbase
    let coinbase = transaction("genesis-coinbase", vec![p2pkh_output(0, 50.0, HASH, ADDRESS)]);
    let ledger = MockLedgerClient::with_genesis(vec![coinbase]);
    ledger.fail_transaction(test_txid("genesis-coinbase"));
    for i in 0..2 {
        ledger.push_block(vec![transaction(
            &format!("pay-{}", i),
            vec![p2pkh_output(0, 0.001, HASH, ADDRESS)],
        )]);
    }
    let mut h = setup(ledger, MemoryHeightStore::new(), ScannerConfig::default()).await;
    assert_eq!(h.engine.next_height(), 1);

    h.engine.tick().await.unwrap();

    assert!(!h.ledger.requested_heights().contains(&0));
    assert_eq!(h.engine.scanned_height(), Some(2));
    assert_eq!(h.payments().len(), 2);
}

#[tokio::test]
async fn explicit_start_height_zero_scans_genesis() {
    let config = ScannerConfig {
        start_height: Some(0),
        ..Default::default()
    };
    let mut h = setup(paying_chain(2), MemoryHeightStore::new(), config).await;

    h.engine.tick().await.unwrap();

    assert_eq!(h.ledger.requested_heights(), vec![0, 1, 2]);
    assert_eq!(h.store.history(), vec![0, 1, 2]);
}

#[tokio::test]
async fn progress_is_published_after_every_height() {
    let (status, mut observer) = watch::channel(ScanStatus::default());
    let mut h = setup(paying_chain(3), MemoryHeightStore::new(), ScannerConfig::default()).await;
    h.engine = h.engine.with_progress(Arc::new(status));

    let ledger = h.ledger.clone();
    let walk = tokio::spawn(async move {
        let report = h.engine.tick().await.unwrap();
        (report, h.engine.scanned_height())
    });

    let mut seen = Vec::new();
    while observer.changed().await.is_ok() {
        seen.push(observer.borrow_and_update().scanned_height);
        if seen.last() == Some(&Some(3)) {
            break;
        }
    }
    let (report, scanned) = walk.await.unwrap();

    assert_eq!(report.heights, 3);
    assert_eq!(scanned, Some(3));
    assert_eq!(seen.last(), Some(&Some(3)));
    assert!(seen.windows(2).all(|w| w[0] < w[1]), "{:?}", seen);
    assert_eq!(ledger.requested_heights(), vec![1, 2, 3]);
}

#[tokio::test]
async fn restart_resumes_after_persisted_height() {
    let ledger = paying_chain(6);
    let mut h = setup(ledger, MemoryHeightStore::with_height(3), ScannerConfig::default()).await;
    assert_eq!(h.engine.next_height(), 4);

    h.engine.tick().await.unwrap();

    assert_eq!(h.ledger.requested_heights(), vec![4, 5, 6]);
    assert_eq!(h.payments().len(), 3);
}

#[tokio::test]
async fn start_height_applies_only_to_an_empty_store() {
    let config = ScannerConfig {
        start_height: Some(4),
        ..Default::default()
    };

    let mut fresh = setup(paying_chain(6), MemoryHeightStore::new(), config.clone()).await;
    fresh.engine.tick().await.unwrap();
    assert_eq!(fresh.ledger.requested_heights(), vec![4, 5, 6]);

    let mut resumed = setup(paying_chain(6), MemoryHeightStore::with_height(1), config).await;
    resumed.engine.tick().await.unwrap();
    assert_eq!(resumed.ledger.requested_heights(), vec![2, 3, 4, 5, 6]);
}

#[tokio::test]
async fn block_count_failure_leaves_state_untouched() {
    let ledger = paying_chain(2);
    ledger.fail_block_count(1);
    let mut h = setup(ledger, MemoryHeightStore::new(), ScannerConfig::default()).await;

    let err = h.engine.tick().await.unwrap_err();

    assert!(matches!(err, ScanError::BlockCount(LedgerError::Transport(_))));
    assert!(!err.is_fatal());
    assert_eq!(h.engine.scanned_height(), None);
    assert!(h.ledger.requested_heights().is_empty());

    h.engine.tick().await.unwrap();
    assert_eq!(h.engine.scanned_height(), Some(2));
}

#[tokio::test]
async fn malformed_p2pkh_aborts_tick_without_advancing() {
    let ledger = paying_chain(1);
    ledger.push_block(vec![transaction("bad", vec![four_token_output()])]);
    ledger.push_empty_blocks(2);
    let mut h = setup(ledger, MemoryHeightStore::new(), ScannerConfig::default()).await;

    let err = h.engine.tick().await.unwrap_err();

    assert_eq!(err.height(), Some(2));
    assert!(matches!(
        err,
        ScanError::Height {
            height: 2,
            source: HeightError::Process(_)
        }
    ));
    assert!(err.to_string().contains("non-standard transaction"));
    assert_eq!(h.engine.scanned_height(), Some(1));
    assert_eq!(h.store.height(), Some(1));
    // Heights after the failing one are not attempted
    assert_eq!(h.ledger.requested_heights(), vec![1, 2]);

    // The next tick retries the same height
    let err = h.engine.tick().await.unwrap_err();
    assert_eq!(err.height(), Some(2));
    assert_eq!(h.ledger.requested_heights(), vec![1, 2, 2]);
    assert_eq!(h.engine.scanned_height(), Some(1));
}

#[tokio::test]
async fn transient_fetch_failure_is_retried_from_same_height() {
    let ledger = paying_chain(3);
    let flaky = transaction("flaky", vec![p2pkh_output(1, 2.0, HASH, ADDRESS)]);
    let flaky_txid = flaky.txid.unwrap();
    ledger.push_block(vec![flaky]);
    ledger.fail_transaction(flaky_txid);
    let mut h = setup(ledger, MemoryHeightStore::with_height(2), ScannerConfig::default()).await;

    let err = h.engine.tick().await.unwrap_err();
    assert_eq!(err.height(), Some(4));
    assert_eq!(h.engine.scanned_height(), Some(3));

    h.ledger.heal_transaction(&flaky_txid);
    h.engine.tick().await.unwrap();

    assert_eq!(h.engine.scanned_height(), Some(4));
    let payments = h.payments();
    // Height 3 once, height 4 once after the retry
    assert_eq!(payments.len(), 2);
    assert_eq!(payments[1].txid, flaky_txid);
    assert_eq!(payments[1].output_index, 1);
}

#[tokio::test]
async fn persist_failure_aborts_tick_and_height_is_rescanned() {
    let store = MemoryHeightStore::new();
    store.fail_persists(1);
    let mut h = setup(paying_chain(2), store, ScannerConfig::default()).await;

    let err = h.engine.tick().await.unwrap_err();

    assert!(matches!(
        err,
        ScanError::Height {
            height: 1,
            source: HeightError::Persist(_)
        }
    ));
    assert_eq!(h.engine.scanned_height(), None);

    h.engine.tick().await.unwrap();
    assert_eq!(h.engine.scanned_height(), Some(2));
    assert_eq!(h.ledger.requested_heights(), vec![1, 1, 2]);
}

#[tokio::test]
async fn payments_of_a_failed_height_are_emitted_again_on_retry() {
    let ledger = paying_chain(1);
    let store = MemoryHeightStore::with_height(0);
    store.fail_persists(1);
    let mut h = setup(ledger, store, ScannerConfig::default()).await;

    assert!(h.engine.tick().await.is_err());
    h.engine.tick().await.unwrap();

    let payments = h.payments();
    assert_eq!(payments.len(), 2);
    assert_eq!(payments[0].outpoint(), payments[1].outpoint());
}

#[tokio::test]
async fn multisig_output_is_skipped_not_failed() {
    let ledger = MockLedgerClient::new();
    let multisig = Output {
        index: Some(0),
        value: Some(3.0),
        script_pub_key: Some(ScriptPubKey {
            script_type: Some("multisig".to_string()),
            asm: Some("2 02aa 02bb 2 OP_CHECKMULTISIG".to_string()),
            addresses: None,
            address: None,
        }),
    };
    ledger.push_block(vec![transaction(
        "multisig",
        vec![multisig, p2pkh_output(1, 0.5, HASH, ADDRESS)],
    )]);
    let mut h = setup(ledger, MemoryHeightStore::new(), ScannerConfig::default()).await;

    let report = h.engine.tick().await.unwrap();

    assert_eq!(report.payments, 1);
    let payments = h.payments();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].output_index, 1);
    assert_eq!(payments[0].value, "0.50000000");
}

#[tokio::test]
async fn stop_requested_before_tick_processes_nothing() {
    let mut h = setup(paying_chain(3), MemoryHeightStore::new(), ScannerConfig::default()).await;
    h.stop.request();

    let report = h.engine.tick().await.unwrap();

    assert!(report.stopped);
    assert_eq!(report.heights, 0);
    assert_eq!(h.engine.scanned_height(), None);
}

#[tokio::test]
async fn height_is_monotonic_across_mixed_ticks() {
    let ledger = paying_chain(4);
    let mut h = setup(ledger, MemoryHeightStore::new(), ScannerConfig::default()).await;

    let mut observed = vec![h.engine.scanned_height()];
    for round in 0..6 {
        if round % 2 == 0 {
            h.ledger.fail_block_count(1);
        }
        let _ = h.engine.tick().await;
        observed.push(h.engine.scanned_height());
        h.ledger.push_empty_blocks(1);
    }

    assert!(observed.windows(2).all(|w| w[0] <= w[1]), "{:?}", observed);
    let history = h.store.history();
    assert!(history.windows(2).all(|w| w[1] == w[0] + 1), "{:?}", history);
}

#[tokio::test]
async fn zero_concurrency_is_rejected_at_load() {
    let ledger = MockLedgerClient::new();
    let (events, _rx) = EventSink::channel();
    let config = ScannerConfig {
        concurrency: 0,
        ..Default::default()
    };

    let result = ScanEngine::load(
        ledger.clone(),
        MemoryHeightStore::new(),
        config,
        events,
        Arc::new(StopSignal::default()),
    )
    .await;

    match result {
        Err(err) => {
            assert!(err.is_fatal());
            assert!(matches!(err, ScanError::InvalidConfig(_)));
        }
        Ok(_) => panic!("engine must not load"),
    }
    assert_eq!(ledger.block_count_calls(), 0);
}

#[tokio::test]
async fn load_failure_is_fatal() {
    let store = MemoryHeightStore::new();
    store.fail_load();
    let (events, _rx) = EventSink::channel();

    let result = ScanEngine::load(
        MockLedgerClient::new(),
        store,
        ScannerConfig::default(),
        events,
        Arc::new(StopSignal::default()),
    )
    .await;

    match result {
        Err(err) => assert!(err.is_fatal()),
        Ok(_) => panic!("engine must not load"),
    }
}
