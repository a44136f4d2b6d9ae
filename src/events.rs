//! Events delivered to the downstream consumer.

use bitcoin::{Amount, OutPoint, Txid};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::confirmed::ScanError;

const SATS_PER_BTC: u64 = 100_000_000;

/// A validated payment to a single address.
///
/// The value is a fixed-point decimal string with 8 fractional digits so that
/// consumers never round-trip it through a float.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentEvent {
    #[serde(rename = "txId")]
    pub txid: Txid,
    pub address: String,
    pub value: String,
    #[serde(rename = "outputIndex")]
    pub output_index: u32,
}

impl PaymentEvent {
    /// Stable key of the paid output.
    ///
    /// A height that fails after partially emitting is rescanned from scratch, so the
    /// same payment can be delivered again. Consumers deduplicate on this key.
    pub fn outpoint(&self) -> OutPoint {
        OutPoint {
            txid: self.txid,
            vout: self.output_index,
        }
    }
}

/// Formats an amount as BTC with exactly 8 decimal places.
pub fn format_btc(amount: Amount) -> String {
    let sats = amount.to_sat();
    format!("{}.{:08}", sats / SATS_PER_BTC, sats % SATS_PER_BTC)
}

#[derive(Debug)]
pub enum ScannerEvent {
    Output(PaymentEvent),
    Error(ScanError),
}

/// Sending half of the consumer channel.
///
/// Emission never blocks the scanner. Events sent after the receiver is gone are dropped.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<ScannerEvent>,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ScannerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn output(&self, payment: PaymentEvent) {
        log::debug!(
            "[EVENT] {} to {} ({}:{})",
            payment.value,
            payment.address,
            payment.txid,
            payment.output_index
        );
        self.send(ScannerEvent::Output(payment));
    }

    pub fn error(&self, error: ScanError) {
        self.send(ScannerEvent::Error(error));
    }

    fn send(&self, event: ScannerEvent) {
        if self.tx.send(event).is_err() {
            log::trace!("[EVENT] receiver dropped, discarding event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::mock_client::test_txid;

    #[test]
    fn formats_whole_and_fractional_btc() {
        assert_eq!(format_btc(Amount::from_sat(0)), "0.00000000");
        assert_eq!(format_btc(Amount::from_sat(1)), "0.00000001");
        assert_eq!(format_btc(Amount::from_sat(150_000_000)), "1.50000000");
        assert_eq!(format_btc(Amount::from_sat(2_100_000_000_000_000)), "21000000.00000000");
    }

    #[test]
    fn serializes_with_consumer_field_names() {
        let event = PaymentEvent {
            txid: test_txid("serde"),
            address: "1BoatSLRHtKNngkdXEeobR76b53LETtpyT".to_string(),
            value: "0.00010000".to_string(),
            output_index: 3,
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["txId"], event.txid.to_string());
        assert_eq!(json["outputIndex"], 3);
        assert_eq!(json["value"], "0.00010000");
    }

    #[test]
    fn outpoint_is_txid_and_index() {
        let txid = test_txid("outpoint");
        let event = PaymentEvent {
            txid,
            address: "addr".to_string(),
            value: "1.00000000".to_string(),
            output_index: 7,
        };
        assert_eq!(event.outpoint(), OutPoint { txid, vout: 7 });
    }

    #[tokio::test]
    async fn sink_survives_dropped_receiver() {
        let (sink, rx) = EventSink::channel();
        drop(rx);
        sink.output(PaymentEvent {
            txid: test_txid("dropped"),
            address: "addr".to_string(),
            value: "0.00000001".to_string(),
            output_index: 0,
        });
    }
}
