use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// Lifecycle of the scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanPhase {
    /// Constructed, loading the initial height
    #[default]
    Idle,
    /// Walking heights
    Scanning,
    /// Timer armed for the next tick
    Waiting,
    /// Terminal
    Stopping,
}

/// Snapshot published by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScanStatus {
    pub phase: ScanPhase,
    pub scanned_height: Option<u64>,
}

/// Scan progress. Only the engine mutates it, one height at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanState {
    /// Last fully processed and persisted height
    scanned_height: Option<u64>,
    /// Where to begin when nothing was scanned yet
    start_height: u64,
}

impl ScanState {
    pub fn new(scanned_height: Option<u64>, start_height: u64) -> Self {
        Self {
            scanned_height,
            start_height,
        }
    }

    pub fn scanned_height(&self) -> Option<u64> {
        self.scanned_height
    }

    pub fn next_height(&self) -> u64 {
        self.scanned_height.map_or(self.start_height, |h| h + 1)
    }

    /// Records `height` as done. Heights only ever advance by one.
    pub fn advance(&mut self, height: u64) {
        debug_assert_eq!(height, self.next_height(), "heights must not be skipped");
        self.scanned_height = Some(height);
    }
}

/// Cooperative stop request shared by the engine and its handle.
///
/// The height walk polls [`StopSignal::is_requested`] between heights; the runtime's
/// timer waits on [`StopSignal::requested`] so a pending tick is cancelled at once.
#[derive(Debug, Default)]
pub struct StopSignal {
    requested: AtomicBool,
    notify: Notify,
}

impl StopSignal {
    /// Idempotent.
    pub fn request(&self) {
        if !self.requested.swap(true, Ordering::SeqCst) {
            self.notify.notify_one();
        }
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Resolves once a stop has been requested.
    pub async fn requested(&self) {
        while !self.is_requested() {
            self.notify.notified().await;
        }
    }
}
