//! Bitcoin node JSON-RPC adapter.
//!
//! Implements [`LedgerClient`] over the node's HTTP JSON-RPC interface. Raw
//! transactions travel as hex on the wire and as bytes through the trait.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bitcoin::{BlockHash, Txid};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::config::RpcConfig;
use crate::ledger::api::{LedgerClient, LedgerError};
use crate::ledger::rpc::types::*;
use crate::ledger::types::{Block, Transaction};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Generates a unique, monotonically increasing ID for JSON-RPC requests.
pub fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

pub struct RpcLedgerClient {
    http: reqwest::Client,
    config: RpcConfig,
}

impl RpcLedgerClient {
    pub fn new(config: RpcConfig) -> Result<Self, LedgerError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| LedgerError::Transport(e.to_string()))?;

        Ok(Self { http, config })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, LedgerError> {
        let id = next_id();
        log::trace!("[RPC] -> #{} {} {}", id, method, params);

        let request = RpcRequest {
            jsonrpc: "1.0",
            id,
            method,
            params,
        };

        let mut builder = self.http.post(&self.config.url).json(&request);
        if let Some(user) = &self.config.user {
            builder = builder.basic_auth(user, self.config.password.as_ref());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| LedgerError::Transport(format!("{}: {}", method, e)))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| LedgerError::Transport(format!("{}: {}", method, e)))?;

        log::trace!("[RPC] <- #{} HTTP {} ({} bytes)", id, status, body.len());
        parse_response(method, status, &body)
    }
}

/// Decodes a JSON-RPC response body.
///
/// The node answers RPC-level errors with a non-2xx status and a JSON body, so the body
/// is inspected first and the status only matters when the body is not JSON-RPC.
pub(crate) fn parse_response<T: DeserializeOwned>(
    method: &str,
    status: u16,
    body: &[u8],
) -> Result<T, LedgerError> {
    let response: RpcResponse<T> = match serde_json::from_slice(body) {
        Ok(response) => response,
        Err(e) if (200..300).contains(&status) => {
            return Err(LedgerError::Decode(format!("{}: {}", method, e)));
        }
        Err(_) => {
            return Err(LedgerError::Transport(format!("{}: HTTP {}", method, status)));
        }
    };

    if let Some(error) = response.error {
        return Err(map_rpc_error(error));
    }

    response
        .result
        .ok_or_else(|| LedgerError::Decode(format!("{}: empty result", method)))
}

pub(crate) fn map_rpc_error(error: RpcErrorBody) -> LedgerError {
    match error.code {
        RPC_INVALID_ADDRESS_OR_KEY | RPC_INVALID_PARAMETER => LedgerError::NotFound(error.message),
        RPC_DESERIALIZATION_ERROR => LedgerError::Decode(error.message),
        code => LedgerError::Rpc {
            code,
            message: error.message,
        },
    }
}

#[async_trait]
impl LedgerClient for RpcLedgerClient {
    async fn block_count(&self) -> Result<u64, LedgerError> {
        self.call("getblockcount", json!([])).await
    }

    async fn block_hash_at(&self, height: u64) -> Result<BlockHash, LedgerError> {
        self.call("getblockhash", json!([height])).await
    }

    async fn block_by_hash(&self, hash: &BlockHash) -> Result<Block, LedgerError> {
        self.call("getblock", json!([hash.to_string(), 1])).await
    }

    async fn raw_transaction(&self, txid: &Txid) -> Result<Vec<u8>, LedgerError> {
        let raw: String = self
            .call("getrawtransaction", json!([txid.to_string(), false]))
            .await?;
        hex::decode(&raw).map_err(|e| LedgerError::Decode(format!("raw transaction {}: {}", txid, e)))
    }

    async fn decode_transaction(&self, raw: &[u8]) -> Result<Transaction, LedgerError> {
        self.call("decoderawtransaction", json!([hex::encode(raw)])).await
    }
}
