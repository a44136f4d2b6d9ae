//! Confirmed-block scanning.
//!
//! Data flows engine → block processor → transaction validator → output validator →
//! [`EventSink`](crate::events::EventSink). The engine drives everything; the runtime
//! owns the timer and the stop signal.

pub mod block;
pub mod engine;
pub mod error;
pub mod runtime;
pub mod validate;

pub use engine::state::{ScanPhase, ScanState, ScanStatus, StopSignal};
pub use engine::ScanEngine;
pub use error::{HeightError, ScanError};
pub use runtime::{ConfirmedScanner, ScannerHandle};
