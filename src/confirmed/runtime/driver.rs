//! Scheduler for the scan engine.
//!
//! Runs the engine's state machine on a tokio task:
//!
//! ```text
//! Idle --load ok--> Scanning --tick done--> Waiting --interval--> Scanning ...
//!   |                  |                       |
//!   load failed        stop seen between       stop cancels the timer
//!   v                  heights                 v
//! Stopping <-----------+---------------------- Stopping
//! ```
//!
//! Stop has two branches. While the timer is armed it fires at once and no further
//! tick runs. While a tick is in flight the engine finishes the current height, notices
//! the flag and the task ends without rescheduling. There is no resume.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};

use crate::config::ScannerConfig;
use crate::confirmed::engine::state::{ScanPhase, ScanStatus, StopSignal};
use crate::confirmed::engine::ScanEngine;
use crate::events::{EventSink, ScannerEvent};
use crate::ledger::LedgerClient;
use crate::persistence::HeightStore;

/// Entry point of the confirmed scanner.
pub struct ConfirmedScanner;

impl ConfirmedScanner {
    /// Starts scanning on a background task.
    ///
    /// Events arrive on the returned receiver. The receiver closes once the task has
    /// terminated, after a stop or a fatal initialization error.
    pub fn spawn<L, S>(
        config: ScannerConfig,
        ledger: L,
        store: S,
    ) -> (ScannerHandle, mpsc::UnboundedReceiver<ScannerEvent>)
    where
        L: LedgerClient + 'static,
        S: HeightStore + 'static,
    {
        let (events, receiver) = EventSink::channel();
        let stop = Arc::new(StopSignal::default());
        let (status_tx, status_rx) = watch::channel(ScanStatus::default());

        let task = tokio::spawn(run(
            config,
            ledger,
            store,
            events,
            stop.clone(),
            Arc::new(status_tx),
        ));

        let handle = ScannerHandle {
            stop,
            status: status_rx,
            task,
        };
        (handle, receiver)
    }
}

async fn run<L, S>(
    config: ScannerConfig,
    ledger: L,
    store: S,
    events: EventSink,
    stop: Arc<StopSignal>,
    status: Arc<watch::Sender<ScanStatus>>,
) where
    L: LedgerClient,
    S: HeightStore,
{
    let interval = config.interval();

    let mut engine = match ScanEngine::load(ledger, store, config, events.clone(), stop.clone()).await {
        Ok(engine) => engine.with_progress(status.clone()),
        Err(err) => {
            log::error!("[SCAN] {}", err);
            events.error(err);
            set_phase(&status, ScanPhase::Stopping);
            return;
        }
    };
    publish_height(&status, engine.scanned_height());

    loop {
        if stop.is_requested() {
            break;
        }

        set_phase(&status, ScanPhase::Scanning);
        match engine.tick().await {
            Ok(report) => {
                if report.heights > 0 {
                    log::info!(
                        "[SCAN] Scanned {} heights, now at #{:?} (network #{})",
                        report.heights,
                        engine.scanned_height(),
                        report.network_height
                    );
                }
            }
            Err(err) => {
                log::warn!("[SCAN] {}", err);
                events.error(err);
            }
        }

        if stop.is_requested() {
            break;
        }

        set_phase(&status, ScanPhase::Waiting);
        log::debug!("[SCAN] scanning again in {:?}", interval);
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = stop.requested() => {
                log::info!("[SCAN] pending tick cancelled");
                break;
            }
        }
    }

    log::info!("[SCAN] stopped at height {:?}", engine.scanned_height());
    set_phase(&status, ScanPhase::Stopping);
}

fn set_phase(status: &watch::Sender<ScanStatus>, phase: ScanPhase) {
    status.send_modify(|s| s.phase = phase);
}

fn publish_height(status: &watch::Sender<ScanStatus>, height: Option<u64>) {
    status.send_modify(|s| s.scanned_height = height);
}

/// Control handle of a spawned scanner.
pub struct ScannerHandle {
    stop: Arc<StopSignal>,
    status: watch::Receiver<ScanStatus>,
    task: JoinHandle<()>,
}

impl ScannerHandle {
    /// Requests a stop. Idempotent.
    pub fn stop(&self) {
        log::debug!("[SCAN] stop requested");
        self.stop.request();
    }

    pub fn status(&self) -> ScanStatus {
        *self.status.borrow()
    }

    /// Receiver that observes every status change.
    pub fn subscribe(&self) -> watch::Receiver<ScanStatus> {
        self.status.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the scanner task to terminate.
    pub async fn join(self) -> Result<(), JoinError> {
        self.task.await
    }
}
