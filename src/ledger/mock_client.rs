use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bitcoin::hashes::{sha256d, Hash};
use bitcoin::{BlockHash, Txid};

use crate::ledger::api::{LedgerClient, LedgerError};
use crate::ledger::types::{Block, Output, ScriptPubKey, Transaction};

#[derive(Debug, Default)]
struct MockChain {
    /// Index is the block height
    blocks: Vec<Block>,
    txs: HashMap<Txid, Transaction>,
    next_synthetic_id: u64,

    block_count_failures: usize,
    block_count_calls: usize,
    failing_txs: HashSet<Txid>,
    requested_heights: Vec<u64>,

    fetch_delay: Duration,
    in_flight: usize,
    max_in_flight: usize,
}

/// Pure in-memory mock ledger for tests.
///
/// Clones share the same chain, so a test can keep a handle while the scanner owns another.
#[derive(Debug, Clone)]
pub struct MockLedgerClient {
    chain: Arc<Mutex<MockChain>>,
}

impl Default for MockLedgerClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLedgerClient {
    /// Creates a chain holding an empty genesis block.
    pub fn new() -> Self {
        Self::with_genesis(vec![])
    }

    /// Creates a chain whose genesis block holds `txs`.
    pub fn with_genesis(txs: Vec<Transaction>) -> Self {
        let client = Self {
            chain: Arc::new(Mutex::new(MockChain::default())),
        };
        client.push_block(txs);
        client
    }

    fn chain(&self) -> MutexGuard<'_, MockChain> {
        self.chain.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Appends a block and returns its height.
    ///
    /// Transactions without a txid are stored under a synthetic id so the block can
    /// still reference them.
    pub fn push_block(&self, txs: Vec<Transaction>) -> u64 {
        let mut chain = self.chain();
        let height = chain.blocks.len() as u64;

        let mut txids = Vec::with_capacity(txs.len());
        for tx in txs {
            let txid = match tx.txid {
                Some(txid) => txid,
                None => {
                    chain.next_synthetic_id += 1;
                    test_txid(&format!("synthetic-{}", chain.next_synthetic_id))
                }
            };
            txids.push(txid);
            chain.txs.insert(txid, tx);
        }

        chain.blocks.push(Block {
            hash: block_hash_for(height),
            height: Some(height),
            tx: txids,
        });
        height
    }

    /// Appends `count` blocks without transactions.
    pub fn push_empty_blocks(&self, count: usize) {
        for _ in 0..count {
            self.push_block(vec![]);
        }
    }

    pub fn tip(&self) -> u64 {
        self.chain().blocks.len() as u64 - 1
    }

    /// The next `count` calls to `block_count` fail with a transport error.
    pub fn fail_block_count(&self, count: usize) {
        self.chain().block_count_failures = count;
    }

    pub fn fail_transaction(&self, txid: Txid) {
        self.chain().failing_txs.insert(txid);
    }

    pub fn heal_transaction(&self, txid: &Txid) {
        self.chain().failing_txs.remove(txid);
    }

    /// Simulated latency of each transaction fetch step.
    pub fn set_fetch_delay(&self, delay: Duration) {
        self.chain().fetch_delay = delay;
    }

    pub fn block_count_calls(&self) -> usize {
        self.chain().block_count_calls
    }

    /// Heights passed to `block_hash_at`, in call order.
    pub fn requested_heights(&self) -> Vec<u64> {
        self.chain().requested_heights.clone()
    }

    /// Highest number of transactions fetched at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.chain().max_in_flight
    }

    async fn simulate_latency(&self) {
        let delay = self.chain().fetch_delay;
        if delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(delay).await;
        }
    }

    fn finish_fetch(&self) {
        let mut chain = self.chain();
        chain.in_flight = chain.in_flight.saturating_sub(1);
    }
}

#[async_trait]
impl LedgerClient for MockLedgerClient {
    async fn block_count(&self) -> Result<u64, LedgerError> {
        let mut chain = self.chain();
        chain.block_count_calls += 1;
        if chain.block_count_failures > 0 {
            chain.block_count_failures -= 1;
            return Err(LedgerError::Transport("connection refused".to_string()));
        }
        Ok(chain.blocks.len() as u64 - 1)
    }

    async fn block_hash_at(&self, height: u64) -> Result<BlockHash, LedgerError> {
        let mut chain = self.chain();
        chain.requested_heights.push(height);
        chain
            .blocks
            .get(height as usize)
            .map(|block| block.hash)
            .ok_or_else(|| LedgerError::NotFound(format!("block height {} out of range", height)))
    }

    async fn block_by_hash(&self, hash: &BlockHash) -> Result<Block, LedgerError> {
        self.chain()
            .blocks
            .iter()
            .find(|block| block.hash == *hash)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("block {}", hash)))
    }

    async fn raw_transaction(&self, txid: &Txid) -> Result<Vec<u8>, LedgerError> {
        {
            let mut chain = self.chain();
            if chain.failing_txs.contains(txid) {
                return Err(LedgerError::Transport(format!("timeout fetching {}", txid)));
            }
            if !chain.txs.contains_key(txid) {
                return Err(LedgerError::NotFound(format!("transaction {}", txid)));
            }
            chain.in_flight += 1;
            chain.max_in_flight = chain.max_in_flight.max(chain.in_flight);
        }

        self.simulate_latency().await;
        Ok(txid.to_byte_array().to_vec())
    }

    async fn decode_transaction(&self, raw: &[u8]) -> Result<Transaction, LedgerError> {
        let bytes: [u8; 32] = match raw.try_into() {
            Ok(bytes) => bytes,
            Err(_) => {
                self.finish_fetch();
                return Err(LedgerError::Decode(format!("unexpected raw length {}", raw.len())));
            }
        };

        self.simulate_latency().await;
        self.finish_fetch();

        let txid = Txid::from_byte_array(bytes);
        self.chain()
            .txs
            .get(&txid)
            .cloned()
            .ok_or_else(|| LedgerError::Decode(format!("unknown transaction {}", txid)))
    }
}

// =====================================================================
// Fixtures
// =====================================================================

pub fn test_txid(tag: &str) -> Txid {
    Txid::from_raw_hash(sha256d::Hash::hash(tag.as_bytes()))
}

fn block_hash_for(height: u64) -> BlockHash {
    BlockHash::from_raw_hash(sha256d::Hash::hash(&height.to_le_bytes()))
}

/// Canonical pay-to-public-key-hash output.
pub fn p2pkh_output(index: i64, value: f64, hash160: &str, address: &str) -> Output {
    Output {
        index: Some(index),
        value: Some(value),
        script_pub_key: Some(ScriptPubKey {
            script_type: Some("pubkeyhash".to_string()),
            asm: Some(format!(
                "OP_DUP OP_HASH160 {} OP_EQUALVERIFY OP_CHECKSIG",
                hash160
            )),
            addresses: Some(vec![address.to_string()]),
            address: None,
        }),
    }
}

/// Version 2 transaction with zero lock time.
pub fn transaction(tag: &str, outputs: Vec<Output>) -> Transaction {
    Transaction {
        txid: Some(test_txid(tag)),
        version: 2,
        lock_time: 0,
        outputs,
    }
}
