//! Confirmed-block scan engine.
//!
//! Owns the scanned height and walks the chain one height at a time. Each tick:
//! 1. asks the ledger for the network height,
//! 2. processes every eligible height in ascending order (see [`logic::is_eligible`]),
//! 3. persists each height before advancing past it.
//!
//! Any failure aborts the rest of the tick. The state is untouched by the failing height,
//! so the next tick starts from exactly the same place.
//!
//! The engine has no timer; [`runtime`](crate::confirmed::runtime) decides when to tick.

pub mod logic;
pub mod state;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use tokio::sync::watch;

use crate::config::ScannerConfig;
use crate::confirmed::block::process_block;
use crate::confirmed::error::{HeightError, ScanError};
use crate::events::EventSink;
use crate::ledger::LedgerClient;
use crate::persistence::HeightStore;

use state::{ScanState, ScanStatus, StopSignal};

/// Summary of one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub network_height: u64,
    /// Heights processed and persisted during the tick
    pub heights: u64,
    pub payments: usize,
    /// The walk ended early because a stop was requested
    pub stopped: bool,
}

pub struct ScanEngine<L, S> {
    state: ScanState,
    ledger: L,
    store: S,
    config: ScannerConfig,
    events: EventSink,
    stop: Arc<StopSignal>,
    progress: Option<Arc<watch::Sender<ScanStatus>>>,
}

impl<L, S> ScanEngine<L, S>
where
    L: LedgerClient,
    S: HeightStore,
{
    /// Validates `config` and loads the scanned height from `store`.
    ///
    /// Failure here is fatal: the engine is never constructed.
    pub async fn load(
        ledger: L,
        store: S,
        config: ScannerConfig,
        events: EventSink,
        stop: Arc<StopSignal>,
    ) -> Result<Self, ScanError> {
        config
            .validate()
            .map_err(|e| ScanError::InvalidConfig(e.to_string()))?;

        let scanned_height = store.load().await.map_err(ScanError::LoadHeight)?;
        log::debug!("[SCAN] scanned height loaded: {:?}", scanned_height);

        let state = ScanState::new(scanned_height, config.first_height());
        Ok(Self {
            state,
            ledger,
            store,
            config,
            events,
            stop,
            progress: None,
        })
    }

    /// Publishes the scanned height to `status` after every height.
    pub fn with_progress(mut self, status: Arc<watch::Sender<ScanStatus>>) -> Self {
        self.progress = Some(status);
        self
    }

    pub fn scanned_height(&self) -> Option<u64> {
        self.state.scanned_height()
    }

    pub fn next_height(&self) -> u64 {
        self.state.next_height()
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    /// Runs one tick.
    pub async fn tick(&mut self) -> Result<TickReport, ScanError> {
        let network_height = self
            .ledger
            .block_count()
            .await
            .map_err(ScanError::BlockCount)?;
        log::debug!("[SCAN] network height: {}", network_height);

        let mut report = TickReport {
            network_height,
            heights: 0,
            payments: 0,
            stopped: false,
        };

        match logic::eligible_range(self.next_height(), self.config.min_conf, network_height) {
            Some(range) => log::debug!("[SCAN] scanning heights {}..={}", range.start(), range.end()),
            None => log::trace!("[SCAN] nothing to scan"),
        }

        loop {
            let height = self.next_height();
            if !logic::is_eligible(height, self.config.min_conf, network_height) {
                break;
            }
            if self.stop.is_requested() {
                log::info!("[SCAN] stop requested before height {}", height);
                report.stopped = true;
                break;
            }

            let payments = self
                .scan_height(height)
                .await
                .map_err(|source| ScanError::Height { height, source })?;

            self.state.advance(height);
            if let Some(progress) = &self.progress {
                progress.send_modify(|s| s.scanned_height = Some(height));
            }
            report.heights += 1;
            report.payments += payments;
        }

        Ok(report)
    }

    /// Fetches, processes and persists one height. Does not touch the state.
    async fn scan_height(&self, height: u64) -> Result<usize, HeightError> {
        let hash = self
            .ledger
            .block_hash_at(height)
            .await
            .map_err(HeightError::BlockHash)?;
        let block = self
            .ledger
            .block_by_hash(&hash)
            .await
            .map_err(HeightError::Block)?;

        let payments = process_block(&self.ledger, &block, self.config.concurrency, &self.events).await?;

        self.store
            .persist(height)
            .await
            .map_err(HeightError::Persist)?;

        log::info!("[SCAN] Finished with block #{} ({} payments)", height, payments);
        Ok(payments)
    }
}
