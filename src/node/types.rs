//! Validated response shapes for the node's JSON-RPC interface

use serde::{Deserialize, Serialize};

/// JSON-RPC error code the node uses for unknown transactions and blocks.
pub const RPC_INVALID_ADDRESS_OR_KEY: i64 = -5;

/// Script type the node reports for null-data (OP_RETURN) outputs.
pub const NULL_DATA_SCRIPT_TYPE: &str = "nulldata";

/// Subset of `getblockchaininfo` the sync engine relies on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockchainInfo {
    /// Height of the node's current best block.
    pub blocks: u64,
}

/// A block as returned by `getblock` with default verbosity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockSummary {
    /// The block hash.
    pub hash: String,
    /// The block height.
    pub height: u64,
    /// Hash of the parent block, absent for genesis.
    #[serde(rename = "previousblockhash", default)]
    pub previous_block_hash: Option<String>,
    /// Transaction ids in block order.
    pub tx: Vec<String>,
}

/// A transaction input from `decoderawtransaction`.
///
/// Coinbase inputs carry a `coinbase` field, every other input names the
/// outpoint it spends through `txid` and `vout`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TxInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coinbase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vout: Option<u32>,
}

/// Classified input reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputRef<'a> {
    /// Creates value, consumes nothing.
    Coinbase,
    /// Spends the output `vout` of transaction `txid`.
    Spend { txid: &'a str, vout: u32 },
}

impl TxInput {
    /// Classify the input, rejecting inputs that are neither coinbase nor a
    /// complete outpoint reference.
    pub fn classify(&self) -> Result<InputRef<'_>, NodeError> {
        if self.coinbase.is_some() {
            return Ok(InputRef::Coinbase);
        }
        match (&self.txid, self.vout) {
            (Some(txid), Some(vout)) => Ok(InputRef::Spend { txid, vout }),
            _ => Err(NodeError::MalformedResponse(
                "input is neither coinbase nor an outpoint reference".to_string(),
            )),
        }
    }
}

/// Locking script summary of an output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptPubKey {
    /// Script template name (`pubkeyhash`, `scripthash`, `nulldata`, ...).
    #[serde(rename = "type")]
    pub script_type: String,
    /// Addresses reported by older nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub addresses: Option<Vec<String>>,
    /// Single address reported by newer nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl ScriptPubKey {
    pub fn is_null_data(&self) -> bool {
        self.script_type == NULL_DATA_SCRIPT_TYPE
    }

    /// All addresses the node associated with this script.
    pub fn resolved_addresses(&self) -> Vec<&str> {
        match (&self.addresses, &self.address) {
            (Some(addresses), _) => addresses.iter().map(String::as_str).collect(),
            (None, Some(address)) => vec![address.as_str()],
            (None, None) => Vec::new(),
        }
    }
}

/// A transaction output from `decoderawtransaction`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxOutput {
    /// Output index within the transaction.
    pub n: u32,
    /// Value in coins, as the node's decimal literal.
    pub value: serde_json::Value,
    #[serde(rename = "scriptPubKey")]
    pub script_pub_key: ScriptPubKey,
}

/// A decoded transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecodedTransaction {
    pub txid: String,
    pub vin: Vec<TxInput>,
    pub vout: Vec<TxOutput>,
}

/// A block with all of its transactions decoded, in block order.
#[derive(Debug, Clone)]
pub struct FetchedBlock {
    pub height: u64,
    pub hash: String,
    pub previous_hash: Option<String>,
    pub transactions: Vec<DecodedTransaction>,
}

/// Error types for node RPC calls
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("RPC error {code}: {message}")]
    RpcError { code: i64, message: String },

    #[error("No result returned")]
    NoData,

    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

impl NodeError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            NodeError::HttpError(_) | NodeError::NoData => true,
            NodeError::RpcError { code, .. } => *code != RPC_INVALID_ADDRESS_OR_KEY,
            NodeError::JsonError(_) | NodeError::MalformedResponse(_) => false,
        }
    }

    /// Whether the node reported that the requested object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, NodeError::RpcError { code, .. } if *code == RPC_INVALID_ADDRESS_OR_KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_coinbase_and_spend_inputs() {
        let tx: DecodedTransaction = serde_json::from_value(json!({
            "txid": "aa",
            "vin": [
                { "coinbase": "03a0860100", "sequence": 4294967295u64 },
                { "txid": "bb", "vout": 2, "scriptSig": { "hex": "" }, "sequence": 0 }
            ],
            "vout": []
        }))
        .unwrap();

        assert_eq!(tx.vin[0].classify().unwrap(), InputRef::Coinbase);
        assert_eq!(
            tx.vin[1].classify().unwrap(),
            InputRef::Spend { txid: "bb", vout: 2 }
        );
    }

    #[test]
    fn rejects_incomplete_input() {
        let input = TxInput {
            txid: Some("bb".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            input.classify(),
            Err(NodeError::MalformedResponse(_))
        ));
    }

    #[test]
    fn keeps_decimal_literal_of_output_value() {
        let out: TxOutput = serde_json::from_str(
            r#"{"n":0,"value":12.00000001,"scriptPubKey":{"type":"pubkeyhash","addresses":["DAddr"]}}"#,
        )
        .unwrap();
        assert_eq!(out.value.to_string(), "12.00000001");
        assert_eq!(out.script_pub_key.resolved_addresses(), vec!["DAddr"]);
    }

    #[test]
    fn resolves_single_address_field() {
        let script = ScriptPubKey {
            script_type: "witness_v0_keyhash".to_string(),
            addresses: None,
            address: Some("addr1".to_string()),
        };
        assert_eq!(script.resolved_addresses(), vec!["addr1"]);
        assert!(!script.is_null_data());
    }
}
