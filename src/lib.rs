//! Bitcoin payment watcher.
//!
//! Watches the ledger for pay-to-public-key-hash payments and emits normalized
//! [`PaymentEvent`]s to a downstream consumer.
//!
//! # Ingestion paths
//! * **Confirmed** ([`confirmed`]): a polling scanner that walks block heights in strict
//!   order, validates every transaction and persists its progress per height.
//! * **Unconfirmed** ([`unconfirmed`]): a push consumer decoding mempool frames into
//!   events of the same shape.
//!
//! The ledger transport ([`ledger::LedgerClient`]) and height persistence
//! ([`persistence::HeightStore`]) are injected collaborators.

pub mod config;
pub mod confirmed;
pub mod events;
pub mod ledger;
pub mod persistence;
pub mod unconfirmed;

pub use config::{RpcConfig, ScannerConfig};
pub use confirmed::{ConfirmedScanner, ScanError, ScanPhase, ScanStatus, ScannerHandle};
pub use events::{EventSink, PaymentEvent, ScannerEvent};
pub use ledger::{LedgerClient, LedgerError};
pub use persistence::{HeightStore, JsonFileHeightStore, MemoryHeightStore, StoreError};
