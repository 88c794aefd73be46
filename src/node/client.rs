//!
//! JSON-RPC client for the full node.
//!
//! This module provides the `NodeRpc` capability trait consumed by the sync engine, the mempool
//! estimator and the query service, together with `NodeRpcClient`, its HTTP implementation.
//! Every call decodes the node's reply into an explicit shape so malformed responses surface as
//! `NodeError`s instead of being trusted field by field.

use super::types::*;
use futures::stream::{self, StreamExt, TryStreamExt};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

/// Capability set the indexer consumes from a full node.
#[async_trait::async_trait]
pub trait NodeRpc: Send + Sync {
	async fn get_block_hash(&self, height: u64) -> Result<String, NodeError>;

	async fn get_block(&self, hash: &str) -> Result<BlockSummary, NodeError>;

	async fn get_raw_transaction(&self, txid: &str) -> Result<String, NodeError>;

	async fn decode_raw_transaction(&self, hex: &str) -> Result<DecodedTransaction, NodeError>;

	async fn get_blockchain_info(&self) -> Result<BlockchainInfo, NodeError>;

	async fn get_raw_mempool(&self) -> Result<Vec<String>, NodeError>;

	async fn send_raw_transaction(&self, hex: &str) -> Result<String, NodeError>;

	/// Fetch and decode one transaction by id.
	async fn fetch_transaction(&self, txid: &str) -> Result<DecodedTransaction, NodeError> {
		let raw = self.get_raw_transaction(txid).await?;
		self.decode_raw_transaction(&raw).await
	}

	/// Fetch the block at `height` with all of its transactions decoded.
	///
	/// Up to `concurrency` transactions are requested at once; the result keeps block order.
	async fn fetch_block(&self, height: u64, concurrency: usize) -> Result<FetchedBlock, NodeError> {
		let hash = self.get_block_hash(height).await?;
		let summary = self.get_block(&hash).await?;
		if summary.height != height {
			return Err(NodeError::MalformedResponse(format!(
				"block {} reported height {} instead of {}",
				hash, summary.height, height
			)));
		}

		let transactions = stream::iter(summary.tx.clone())
			.map(|txid| async move { self.fetch_transaction(&txid).await })
			.buffered(concurrency.max(1))
			.try_collect::<Vec<_>>()
			.await?;

		debug!(
			"Fetched block {} at height {} with {} transactions",
			hash,
			height,
			transactions.len()
		);

		Ok(FetchedBlock {
			height,
			hash: summary.hash,
			previous_hash: summary.previous_block_hash,
			transactions,
		})
	}
}

/// HTTP JSON-RPC client for a full node
#[derive(Clone)]
pub struct NodeRpcClient {
	/// The underlying HTTP client.
	http_client: Client,
	/// The node's RPC endpoint.
	rpc_url: String,
	/// Optional basic-auth credentials.
	auth: Option<(String, String)>,
}

impl NodeRpcClient {
	/// Create a new node client.
	///
	/// # Arguments
	/// * `rpc_url` - The HTTP endpoint of the node's JSON-RPC server.
	/// * `auth` - Optional `(user, password)` pair for basic authentication.
	pub fn new(rpc_url: String, auth: Option<(String, String)>) -> Result<Self, NodeError> {
		let http_client = Client::builder().timeout(Duration::from_secs(30)).build()?;

		Ok(Self {
			http_client,
			rpc_url,
			auth,
		})
	}

	/// Execute a JSON-RPC call and decode its `result`.
	///
	/// # Arguments
	/// * `method` - The RPC method name.
	/// * `params` - Positional parameters.
	///
	/// # Returns
	/// The decoded result, or a `NodeError` on transport failure, RPC error or unexpected shape.
	pub async fn call<T: DeserializeOwned>(
		&self,
		method: &str,
		params: serde_json::Value,
	) -> Result<T, NodeError> {
		let request_body = json!({
			"jsonrpc": "1.0",
			"id": method,
			"method": method,
			"params": params
		});

		let mut request = self
			.http_client
			.post(&self.rpc_url)
			.header("Content-Type", "text/plain")
			.json(&request_body);
		if let Some((user, password)) = &self.auth {
			request = request.basic_auth(user, Some(password));
		}

		let response = request.send().await?;
		let status = response.status();
		let body = response.bytes().await?;

		decode_response(method, status, &body)
	}
}

/// Decode a JSON-RPC reply body into the call's `result`.
///
/// The node answers RPC failures with a non-2xx status and an error body, so the `error` member
/// is checked before the status.
fn decode_response<T: DeserializeOwned>(
	method: &str,
	status: StatusCode,
	body: &[u8],
) -> Result<T, NodeError> {
	let response_json: serde_json::Value = match serde_json::from_slice(body) {
		Ok(value) => value,
		Err(_) if !status.is_success() => {
			return Err(NodeError::MalformedResponse(format!(
				"HTTP error {} calling {}",
				status, method
			)));
		}
		Err(e) => return Err(NodeError::JsonError(e)),
	};

	if let Some(error) = response_json.get("error").filter(|e| !e.is_null()) {
		let code = error.get("code").and_then(|c| c.as_i64()).unwrap_or(0);
		let message = error
			.get("message")
			.and_then(|m| m.as_str())
			.unwrap_or("unknown error")
			.to_string();
		return Err(NodeError::RpcError { code, message });
	}

	let result = response_json
		.get("result")
		.filter(|r| !r.is_null())
		.cloned()
		.ok_or(NodeError::NoData)?;

	serde_json::from_value(result)
		.map_err(|e| NodeError::MalformedResponse(format!("unexpected {} result: {}", method, e)))
}

#[async_trait::async_trait]
impl NodeRpc for NodeRpcClient {
	async fn get_block_hash(&self, height: u64) -> Result<String, NodeError> {
		self.call("getblockhash", json!([height])).await
	}

	async fn get_block(&self, hash: &str) -> Result<BlockSummary, NodeError> {
		self.call("getblock", json!([hash])).await
	}

	async fn get_raw_transaction(&self, txid: &str) -> Result<String, NodeError> {
		self.call("getrawtransaction", json!([txid])).await
	}

	async fn decode_raw_transaction(&self, hex: &str) -> Result<DecodedTransaction, NodeError> {
		self.call("decoderawtransaction", json!([hex])).await
	}

	async fn get_blockchain_info(&self) -> Result<BlockchainInfo, NodeError> {
		self.call("getblockchaininfo", json!([])).await
	}

	async fn get_raw_mempool(&self) -> Result<Vec<String>, NodeError> {
		self.call("getrawmempool", json!([])).await
	}

	async fn send_raw_transaction(&self, hex: &str) -> Result<String, NodeError> {
		self.call("sendrawtransaction", json!([hex])).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::node::mock::{MockNode, coinbase_tx};

	#[test]
	fn decodes_result_member() {
		let hash: String =
			decode_response("getblockhash", StatusCode::OK, br#"{"result":"00ab","error":null,"id":"x"}"#)
				.unwrap();
		assert_eq!(hash, "00ab");
	}

	#[test]
	fn maps_error_body_on_failed_status() {
		let result: Result<String, _> = decode_response(
			"getrawtransaction",
			StatusCode::INTERNAL_SERVER_ERROR,
			br#"{"result":null,"error":{"code":-5,"message":"No such mempool or blockchain transaction"}}"#,
		);
		match result {
			Err(e @ NodeError::RpcError { code: -5, .. }) => assert!(e.is_not_found()),
			other => panic!("unexpected result: {:?}", other),
		}
	}

	#[test]
	fn maps_unreadable_failed_status() {
		let result: Result<String, _> =
			decode_response("getblock", StatusCode::UNAUTHORIZED, b"401 Unauthorized");
		assert!(matches!(result, Err(NodeError::MalformedResponse(_))));

		let result: Result<String, _> = decode_response("getblock", StatusCode::OK, b"not json");
		assert!(matches!(result, Err(NodeError::JsonError(_))));
	}

	#[test]
	fn null_result_is_no_data() {
		let result: Result<String, _> =
			decode_response("getblockhash", StatusCode::OK, br#"{"result":null,"error":null}"#);
		assert!(matches!(result, Err(NodeError::NoData)));
	}

	#[test]
	fn shape_mismatch_is_malformed() {
		let result: Result<BlockchainInfo, _> = decode_response(
			"getblockchaininfo",
			StatusCode::OK,
			br#"{"result":{"chain":"main"},"error":null}"#,
		);
		assert!(matches!(result, Err(NodeError::MalformedResponse(_))));
	}

	#[tokio::test]
	async fn fetch_block_keeps_transaction_order() {
		let node = MockNode::new();
		let txs: Vec<_> = (0..10)
			.map(|i| coinbase_tx(&format!("tx-{i}"), &[("A", "1")]))
			.collect();
		let hash = node.push_block(txs);

		let block = node.fetch_block(1, 4).await.unwrap();

		assert_eq!(block.hash, hash);
		assert_eq!(block.previous_hash, None);
		let txids: Vec<_> = block.transactions.iter().map(|tx| tx.txid.clone()).collect();
		let expected: Vec<_> = (0..10).map(|i| format!("tx-{i}")).collect();
		assert_eq!(txids, expected);
	}
}
