//! Configuration for the confirmed scanner and its ledger transport.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Scan engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Confirmations a block needs before it is scanned (1 = scan the tip)
    #[serde(default = "default_min_conf")]
    pub min_conf: u32,

    /// Milliseconds between ticks
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Transactions fetched and validated at the same time within one block
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// First height to scan when the height store holds nothing.
    /// Defaults to [`FIRST_SCANNABLE_HEIGHT`].
    #[serde(default)]
    pub start_height: Option<u64>,
}

/// Height 1. The genesis coinbase is not in the node's transaction index, so a scan
/// starting at 0 would fail on every tick.
pub const FIRST_SCANNABLE_HEIGHT: u64 = 1;

fn default_min_conf() -> u32 {
    1
}

fn default_interval_ms() -> u64 {
    10_000
}

fn default_concurrency() -> usize {
    3
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            min_conf: default_min_conf(),
            interval_ms: default_interval_ms(),
            concurrency: default_concurrency(),
            start_height: None,
        }
    }
}

impl ScannerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Where scanning begins when nothing was persisted yet.
    pub fn first_height(&self) -> u64 {
        self.start_height.unwrap_or(FIRST_SCANNABLE_HEIGHT)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.min_conf == 0 {
            anyhow::bail!("min_conf must be at least 1");
        }
        if self.concurrency == 0 {
            anyhow::bail!("concurrency must be at least 1");
        }
        if self.interval_ms == 0 {
            log::warn!("interval_ms is 0, the scanner will poll the node without pause");
        }
        Ok(())
    }
}

/// Connection parameters of the node's JSON-RPC interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcConfig {
    #[serde(default = "default_rpc_url")]
    pub url: String,

    pub user: Option<String>,

    pub password: Option<String>,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_rpc_url() -> String {
    "http://127.0.0.1:8332".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: default_rpc_url(),
            user: None,
            password: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl RpcConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
