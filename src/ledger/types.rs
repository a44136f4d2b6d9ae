//! Ledger data model, shaped after the node's verbose JSON.
//!
//! Fields the validators check for presence are `Option`s: a missing field is a
//! validation failure, not a decode failure.

use bitcoin::{BlockHash, Txid};
use serde::Deserialize;

/// Block as returned for one height.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Block {
    pub hash: BlockHash,
    pub height: Option<u64>,
    /// Transaction ids in block order
    pub tx: Vec<Txid>,
}

/// Decoded transaction.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Transaction {
    pub txid: Option<Txid>,
    pub version: i64,
    #[serde(rename = "locktime")]
    pub lock_time: i64,
    #[serde(rename = "vout", default)]
    pub outputs: Vec<Output>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Output {
    #[serde(rename = "n")]
    pub index: Option<i64>,
    /// Value in BTC
    pub value: Option<f64>,
    #[serde(rename = "scriptPubKey")]
    pub script_pub_key: Option<ScriptPubKey>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ScriptPubKey {
    #[serde(rename = "type")]
    pub script_type: Option<String>,
    /// Human-readable disassembly
    pub asm: Option<String>,
    pub addresses: Option<Vec<String>>,
    /// Newer nodes report a single `address` instead of `addresses`
    pub address: Option<String>,
}

impl ScriptPubKey {
    /// Addresses paid by this script, if the node reported any.
    pub fn address_list(&self) -> Option<Vec<&str>> {
        match (&self.addresses, &self.address) {
            (Some(list), _) => Some(list.iter().map(String::as_str).collect()),
            (None, Some(single)) => Some(vec![single.as_str()]),
            (None, None) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_node_transaction_json() {
        let json = r#"{
            "txid": "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b",
            "hash": "4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b",
            "version": 2,
            "size": 225,
            "locktime": 0,
            "vin": [],
            "vout": [
                {
                    "value": 0.00015000,
                    "n": 0,
                    "scriptPubKey": {
                        "asm": "OP_DUP OP_HASH160 89abcdefabcdefabcdefabcdefabcdefabcdef01 OP_EQUALVERIFY OP_CHECKSIG",
                        "hex": "76a91489abcdefabcdefabcdefabcdefabcdefabcdef0188ac",
                        "reqSigs": 1,
                        "type": "pubkeyhash",
                        "addresses": ["1DbT3ZmLpCMQx5ZtwqrAfT5QeGfNWyqkAy"]
                    }
                }
            ]
        }"#;

        let tx: Transaction = serde_json::from_str(json).unwrap();
        assert!(tx.txid.is_some());
        assert_eq!(tx.version, 2);
        assert_eq!(tx.lock_time, 0);
        assert_eq!(tx.outputs.len(), 1);

        let output = &tx.outputs[0];
        assert_eq!(output.index, Some(0));
        assert_eq!(output.value, Some(0.00015));
        let script = output.script_pub_key.as_ref().unwrap();
        assert_eq!(script.script_type.as_deref(), Some("pubkeyhash"));
        assert_eq!(
            script.address_list(),
            Some(vec!["1DbT3ZmLpCMQx5ZtwqrAfT5QeGfNWyqkAy"])
        );
    }

    #[test]
    fn missing_fields_stay_absent() {
        let json = r#"{"version": 1, "locktime": 0, "vout": [{"scriptPubKey": {}}]}"#;

        let tx: Transaction = serde_json::from_str(json).unwrap();
        assert_eq!(tx.txid, None);
        assert_eq!(tx.outputs[0].index, None);
        assert_eq!(tx.outputs[0].value, None);
        assert_eq!(tx.outputs[0].script_pub_key.as_ref().unwrap().address_list(), None);
    }

    #[test]
    fn single_address_field_is_a_one_element_list() {
        let script = ScriptPubKey {
            address: Some("bc1qexample".to_string()),
            ..Default::default()
        };
        assert_eq!(script.address_list(), Some(vec!["bc1qexample"]));
    }

    #[test]
    fn decodes_block_json() {
        let json = r#"{
            "hash": "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f",
            "height": 0,
            "confirmations": 1,
            "tx": ["4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b"]
        }"#;

        let block: Block = serde_json::from_str(json).unwrap();
        assert_eq!(block.height, Some(0));
        assert_eq!(block.tx.len(), 1);
    }
}
