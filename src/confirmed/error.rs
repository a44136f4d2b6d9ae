use thiserror::Error;

use crate::confirmed::block::BlockError;
use crate::ledger::LedgerError;
use crate::persistence::StoreError;

/// Failure surfaced to the consumer.
///
/// Only [`ScanError::InvalidConfig`] and [`ScanError::LoadHeight`] are fatal. Everything else aborts the current tick and
/// the next tick retries from the same height.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("invalid scanner configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to load height: {0}")]
    LoadHeight(#[source] StoreError),

    #[error("failed to get block count: {0}")]
    BlockCount(#[source] LedgerError),

    #[error("failed to scan height {height}: {source}")]
    Height {
        height: u64,
        #[source]
        source: HeightError,
    },
}

impl ScanError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, ScanError::InvalidConfig(_) | ScanError::LoadHeight(_))
    }

    /// Height whose processing failed, if any.
    pub fn height(&self) -> Option<u64> {
        match self {
            ScanError::Height { height, .. } => Some(*height),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum HeightError {
    #[error("failed to get block hash: {0}")]
    BlockHash(#[source] LedgerError),

    #[error("failed to get block: {0}")]
    Block(#[source] LedgerError),

    #[error(transparent)]
    Process(#[from] BlockError),

    #[error("failed to persist height: {0}")]
    Persist(#[source] StoreError),
}
