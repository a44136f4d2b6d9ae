//! Block processing with bounded concurrency.
//!
//! Each transaction of a block is one work item: fetch raw, decode, validate, emit.
//! At most `concurrency` items run at once. The first failing item aborts the block and
//! no further items are started; payments already emitted for earlier items stay emitted.

use std::sync::atomic::{AtomicUsize, Ordering};

use bitcoin::Txid;
use futures::stream::{self, TryStreamExt};
use thiserror::Error;

use crate::confirmed::validate::{validate_transaction, TransactionError};
use crate::events::{EventSink, PaymentEvent};
use crate::ledger::{Block, LedgerClient, LedgerError, Transaction};

#[derive(Debug, Error)]
#[error("failed to process {txid}: {source}")]
pub struct BlockError {
    pub txid: Txid,
    #[source]
    pub source: TxFailure,
}

#[derive(Debug, Error)]
pub enum TxFailure {
    #[error("fetch failed: {0}")]
    Fetch(#[source] LedgerError),

    #[error(transparent)]
    Invalid(#[from] TransactionError),
}

/// Processes every transaction of `block`, emitting payments as transactions validate.
///
/// Returns the number of payments emitted. A `concurrency` of 0 runs one at a time.
pub async fn process_block<L>(
    ledger: &L,
    block: &Block,
    concurrency: usize,
    events: &EventSink,
) -> Result<usize, BlockError>
where
    L: LedgerClient + ?Sized,
{
    log::debug!(
        "[BLOCK] processing {} transactions of {}",
        block.tx.len(),
        block.hash
    );

    let emitted = AtomicUsize::new(0);
    let emitted_ref = &emitted;

    stream::iter(block.tx.iter().map(Ok::<_, BlockError>))
        .try_for_each_concurrent(concurrency.max(1), |txid| async move {
            let payments = match fetch_and_validate(ledger, txid).await {
                Ok(payments) => payments,
                Err(source) => return Err(BlockError { txid: *txid, source }),
            };

            emitted_ref.fetch_add(payments.len(), Ordering::Relaxed);
            for payment in payments {
                events.output(payment);
            }
            Ok(())
        })
        .await?;

    Ok(emitted.into_inner())
}

/// Two sequential ledger calls: raw bytes, then decode.
pub async fn fetch_transaction<L>(ledger: &L, txid: &Txid) -> Result<Transaction, LedgerError>
where
    L: LedgerClient + ?Sized,
{
    let raw = ledger.raw_transaction(txid).await?;
    ledger.decode_transaction(&raw).await
}

async fn fetch_and_validate<L>(ledger: &L, txid: &Txid) -> Result<Vec<PaymentEvent>, TxFailure>
where
    L: LedgerClient + ?Sized,
{
    let tx = fetch_transaction(ledger, txid).await.map_err(TxFailure::Fetch)?;
    Ok(validate_transaction(&tx)?)
}
