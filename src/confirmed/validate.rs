//! Structural validation of decoded transactions.
//!
//! Pure functions: a transaction goes in, the payments it makes come out. Three kinds
//! of result are kept apart:
//! * **payment**: a canonical pay-to-public-key-hash output paying one address,
//! * **ignored**: unsupported transaction versions and other output types, skipped silently,
//! * **error**: anything malformed, including a pay-to-public-key-hash output whose script
//!   does not match the canonical template.

use bitcoin::{Amount, Txid};
use thiserror::Error;

use crate::events::{format_btc, PaymentEvent};
use crate::ledger::{Output, Transaction};

pub const PAY_TO_PUBKEY_HASH: &str = "pubkeyhash";
pub const SUPPORTED_VERSIONS: [i64; 2] = [1, 2];

const HASH160_HEX_LEN: usize = 40;

#[derive(Debug, Error, PartialEq)]
pub enum OutputError {
    #[error("output index missing")]
    MissingIndex,

    #[error("output index < 0 ({0})")]
    NegativeIndex(i64),

    #[error("output index {0} out of range")]
    IndexOutOfRange(i64),

    #[error("output value missing")]
    MissingValue,

    #[error("output value < 0 ({0})")]
    NegativeValue(f64),

    #[error("output value {0} is not a valid amount")]
    InvalidValue(f64),

    #[error("scriptPubKey missing")]
    MissingScriptPubKey,

    #[error("script missing")]
    MissingScript,

    #[error("non-standard transaction {0}")]
    NonStandard(String),

    #[error("addresses missing from scriptPubKey")]
    MissingAddresses,

    #[error("unexpected number of addresses {0}")]
    UnexpectedAddressCount(usize),
}

#[derive(Debug, Error, PartialEq)]
pub enum TransactionError {
    #[error("txid missing")]
    MissingTxid,

    #[error("unexpected locktime {0}")]
    UnexpectedLockTime(i64),

    #[error("failed to process output #{index}: {source}")]
    Output {
        index: i64,
        #[source]
        source: OutputError,
    },
}

/// Validates one output of `txid`.
///
/// Returns `Ok(None)` for outputs of any type other than pay-to-public-key-hash.
pub fn validate_output(txid: &Txid, output: &Output) -> Result<Option<PaymentEvent>, OutputError> {
    let index = output.index.ok_or(OutputError::MissingIndex)?;
    if index < 0 {
        return Err(OutputError::NegativeIndex(index));
    }
    let output_index = u32::try_from(index).map_err(|_| OutputError::IndexOutOfRange(index))?;

    let value = output.value.ok_or(OutputError::MissingValue)?;
    if value < 0.0 {
        return Err(OutputError::NegativeValue(value));
    }

    let script = output
        .script_pub_key
        .as_ref()
        .ok_or(OutputError::MissingScriptPubKey)?;

    if script.script_type.as_deref() != Some(PAY_TO_PUBKEY_HASH) {
        log::debug!(
            "[VALIDATE] ignoring non-pubkeyhash ({}) of {}:{}",
            script.script_type.as_deref().unwrap_or("<none>"),
            txid,
            index
        );
        return Ok(None);
    }

    let asm = script.asm.as_deref().ok_or(OutputError::MissingScript)?;
    if !is_canonical_p2pkh(asm) {
        return Err(OutputError::NonStandard(asm.to_string()));
    }

    let addresses = script.address_list().ok_or(OutputError::MissingAddresses)?;
    let [address] = addresses.as_slice() else {
        return Err(OutputError::UnexpectedAddressCount(addresses.len()));
    };

    let amount = Amount::from_btc(value).map_err(|_| OutputError::InvalidValue(value))?;

    Ok(Some(PaymentEvent {
        txid: *txid,
        address: address.to_string(),
        value: format_btc(amount),
        output_index,
    }))
}

/// Validates a transaction and collects its payments in output order.
///
/// The first invalid output fails the whole transaction; no payments are returned then.
pub fn validate_transaction(tx: &Transaction) -> Result<Vec<PaymentEvent>, TransactionError> {
    let txid = tx.txid.ok_or(TransactionError::MissingTxid)?;

    if !SUPPORTED_VERSIONS.contains(&tx.version) {
        log::debug!("[VALIDATE] ignoring tx {} with version {}", txid, tx.version);
        return Ok(Vec::new());
    }

    if tx.lock_time < 0 {
        return Err(TransactionError::UnexpectedLockTime(tx.lock_time));
    }

    tx.outputs
        .iter()
        .enumerate()
        .filter_map(|(position, output)| {
            validate_output(&txid, output)
                .map_err(|source| TransactionError::Output {
                    index: output.index.unwrap_or(position as i64),
                    source,
                })
                .transpose()
        })
        .collect()
}

/// `OP_DUP OP_HASH160 <40 lowercase hex> OP_EQUALVERIFY OP_CHECKSIG`, single spaces, nothing else.
fn is_canonical_p2pkh(asm: &str) -> bool {
    let tokens: Vec<&str> = asm.split(' ').collect();
    match tokens.as_slice() {
        ["OP_DUP", "OP_HASH160", hash, "OP_EQUALVERIFY", "OP_CHECKSIG"] => is_hash160_hex(hash),
        _ => false,
    }
}

fn is_hash160_hex(token: &str) -> bool {
    token.len() == HASH160_HEX_LEN && token.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
