//! Scanned-height persistence.
//!
//! The scanner only knows the [`HeightStore`] contract. Two stores ship with the crate:
//! a JSON file store for deployments and an in-memory store for tests and embedding.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_STATE_PATH: &str = "confirmed.json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("height store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("height store holds malformed data: {0}")]
    Format(#[from] serde_json::Error),

    #[error("height store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait HeightStore: Send + Sync {
    /// Last persisted height, or `None` when nothing was scanned yet.
    async fn load(&self) -> Result<Option<u64>, StoreError>;

    async fn persist(&self, height: u64) -> Result<(), StoreError>;
}

// =====================================================================
// JSON file store
// =====================================================================

#[derive(Debug, Serialize, Deserialize)]
struct HeightRecord {
    height: Option<u64>,
}

/// Stores the height as `{"height": n}`.
#[derive(Debug, Clone)]
pub struct JsonFileHeightStore {
    path: PathBuf,
}

impl JsonFileHeightStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl HeightStore for JsonFileHeightStore {
    async fn load(&self) -> Result<Option<u64>, StoreError> {
        if !tokio::fs::try_exists(&self.path).await? {
            log::info!("[STORE] No height file at {:?}, starting from scratch", self.path);
            return Ok(None);
        }

        let content = tokio::fs::read_to_string(&self.path).await?;
        let record: HeightRecord = serde_json::from_str(&content)?;
        log::info!("[STORE] Loaded scanned height {:?}", record.height);
        Ok(record.height)
    }

    /// Writes to a temporary file first, then renames over the old one.
    async fn persist(&self, height: u64) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(&HeightRecord {
            height: Some(height),
        })?;

        let temp_path = self.path.with_extension("tmp");
        tokio::fs::write(&temp_path, content).await?;
        tokio::fs::rename(&temp_path, &self.path).await?;

        log::trace!("[STORE] Persisted height {}", height);
        Ok(())
    }
}

// =====================================================================
// In-memory store
// =====================================================================

#[derive(Debug, Default)]
struct MemoryState {
    height: Option<u64>,
    history: Vec<u64>,
    fail_load: bool,
    persist_failures: usize,
}

/// Height store kept in memory.
///
/// Clones share state. Failures can be injected to exercise the scanner's error paths.
#[derive(Debug, Clone, Default)]
pub struct MemoryHeightStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryHeightStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_height(height: u64) -> Self {
        let store = Self::default();
        store.state().height = Some(height);
        store
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn height(&self) -> Option<u64> {
        self.state().height
    }

    /// Every height persisted so far, in order.
    pub fn history(&self) -> Vec<u64> {
        self.state().history.clone()
    }

    pub fn fail_load(&self) {
        self.state().fail_load = true;
    }

    /// The next `count` persists fail.
    pub fn fail_persists(&self, count: usize) {
        self.state().persist_failures = count;
    }
}

#[async_trait]
impl HeightStore for MemoryHeightStore {
    async fn load(&self) -> Result<Option<u64>, StoreError> {
        let state = self.state();
        if state.fail_load {
            return Err(StoreError::Unavailable("load refused".to_string()));
        }
        Ok(state.height)
    }

    async fn persist(&self, height: u64) -> Result<(), StoreError> {
        let mut state = self.state();
        if state.persist_failures > 0 {
            state.persist_failures -= 1;
            return Err(StoreError::Unavailable(format!("cannot persist height {}", height)));
        }
        state.height = Some(height);
        state.history.push(height);
        Ok(())
    }
}
