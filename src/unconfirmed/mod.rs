//! Listener for unconfirmed (mempool) transactions.
//!
//! Consumes text frames from a push feed that speaks the blockchain.info `inv` protocol
//! and turns `utx` notifications into the same [`PaymentEvent`]s the confirmed scanner
//! emits. The transport is not owned here: any stream of frames can be fed to
//! [`UnconfirmedListener::run`], after sending [`SUBSCRIBE_MESSAGE`] on the socket.
//!
//! Unlike the confirmed path nothing is persisted and a bad frame never stops the
//! listener.

use bitcoin::{Amount, Txid};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use thiserror::Error;

use crate::events::{format_btc, EventSink, PaymentEvent};


/// Frame that subscribes the socket to unconfirmed transactions.
pub const SUBSCRIBE_MESSAGE: &str = r#"{"op":"unconfirmed_sub"}"#;

const UNCONFIRMED_TX_OP: &str = "utx";
const SUPPORTED_VERSION: i64 = 1;
/// Output type code of a standard address output
const ADDRESS_OUTPUT_TYPE: i64 = 0;

#[derive(Debug, Error)]
pub enum MempoolError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("utx frame without transaction body")]
    MissingBody,
}

#[derive(Debug, Deserialize)]
struct Frame {
    op: String,
    #[serde(default)]
    x: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct MempoolTransaction {
    hash: Option<Txid>,
    ver: i64,
    lock_time: i64,
    #[serde(default)]
    out: Vec<MempoolOutput>,
}

#[derive(Debug, Deserialize)]
struct MempoolOutput {
    #[serde(rename = "type")]
    output_type: Option<i64>,
    addr: Option<String>,
    /// Satoshis
    value: u64,
    n: Option<u32>,
}

/// Decodes one frame into the payments it announces.
///
/// Frames for other ops, unsupported versions and time-locked transactions yield
/// nothing. Outputs that are not plain address outputs, or that lack the address or
/// outpoint, are skipped.
pub fn decode_message(frame: &str) -> Result<Vec<PaymentEvent>, MempoolError> {
    let frame: Frame = serde_json::from_str(frame)?;
    if frame.op != UNCONFIRMED_TX_OP {
        log::debug!("[MEMPOOL] ignoring op {}", frame.op);
        return Ok(Vec::new());
    }

    let body = frame.x.ok_or(MempoolError::MissingBody)?;
    let tx: MempoolTransaction = serde_json::from_value(body)?;

    if tx.ver != SUPPORTED_VERSION {
        log::debug!("[MEMPOOL] ignoring tx version {}", tx.ver);
        return Ok(Vec::new());
    }
    if tx.lock_time != 0 {
        log::debug!("[MEMPOOL] ignoring lock time {}", tx.lock_time);
        return Ok(Vec::new());
    }
    let Some(txid) = tx.hash else {
        log::debug!("[MEMPOOL] ignoring tx without hash");
        return Ok(Vec::new());
    };

    let payments = tx
        .out
        .into_iter()
        .filter_map(|out| {
            if out.output_type != Some(ADDRESS_OUTPUT_TYPE) {
                log::debug!("[MEMPOOL] ignoring output type {:?}", out.output_type);
                return None;
            }
            Some(PaymentEvent {
                txid,
                address: out.addr?,
                value: format_btc(Amount::from_sat(out.value)),
                output_index: out.n?,
            })
        })
        .collect();

    Ok(payments)
}

/// Forwards mempool payments to an [`EventSink`].
pub struct UnconfirmedListener {
    events: EventSink,
}

impl UnconfirmedListener {
    pub fn new(events: EventSink) -> Self {
        Self { events }
    }

    /// Drains `frames` until the stream ends. Returns the number of payments emitted.
    pub async fn run<St>(&self, mut frames: St) -> usize
    where
        St: Stream<Item = String> + Unpin,
    {
        let mut emitted = 0;
        while let Some(frame) = frames.next().await {
            match decode_message(&frame) {
                Ok(payments) => {
                    emitted += payments.len();
                    for payment in payments {
                        self.events.output(payment);
                    }
                }
                Err(err) => log::warn!("[MEMPOOL] skipping frame: {}", err),
            }
        }
        log::info!("[MEMPOOL] feed closed after {} payments", emitted);
        emitted
    }
}
