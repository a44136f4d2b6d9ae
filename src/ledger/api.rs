use async_trait::async_trait;
use bitcoin::{BlockHash, Txid};
use thiserror::Error;

use crate::ledger::types::{Block, Transaction};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger unreachable: {0}")]
    Transport(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("failed to decode ledger data: {0}")]
    Decode(String),

    #[error("ledger rejected request ({code}): {message}")]
    Rpc { code: i64, message: String },
}

/// Request/response interface of the ledger node.
///
/// Every call is a network round-trip and may fail. The scanner never retries a call
/// itself; a failure aborts the current tick and the next tick starts over.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Height of the current chain tip.
    async fn block_count(&self) -> Result<u64, LedgerError>;

    /// Fails with [`LedgerError::NotFound`] when `height` is above the tip.
    async fn block_hash_at(&self, height: u64) -> Result<BlockHash, LedgerError>;

    async fn block_by_hash(&self, hash: &BlockHash) -> Result<Block, LedgerError>;

    async fn raw_transaction(&self, txid: &Txid) -> Result<Vec<u8>, LedgerError>;

    async fn decode_transaction(&self, raw: &[u8]) -> Result<Transaction, LedgerError>;
}
