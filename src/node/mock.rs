//! In-memory node used by the unit tests.

use super::client::NodeRpc;
use super::types::*;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Mutex;

struct MockBlock {
	hash: String,
	txids: Vec<String>,
}

#[derive(Default)]
struct MockState {
	chain: Vec<MockBlock>,
	transactions: HashMap<String, DecodedTransaction>,
	mempool: Vec<String>,
	sent: Vec<String>,
	requested_heights: Vec<u64>,
	failing_calls: usize,
	next_nonce: u64,
}

#[derive(Default)]
pub struct MockNode {
	state: Mutex<MockState>,
}

impl MockNode {
	pub fn new() -> Self {
		Self::default()
	}

	/// Append a block holding `transactions` and return its hash.
	pub fn push_block(&self, transactions: Vec<DecodedTransaction>) -> String {
		let mut state = self.state.lock().unwrap();
		state.next_nonce += 1;
		let height = state.chain.len() + 1;
		let hash = format!("{:056x}{:08x}", state.next_nonce, height);
		let txids = transactions.iter().map(|tx| tx.txid.clone()).collect();
		for tx in transactions {
			state.transactions.insert(tx.txid.clone(), tx);
		}
		state.chain.push(MockBlock {
			hash: hash.clone(),
			txids,
		});
		hash
	}

	/// Swap in a new body for an already known transaction.
	pub fn replace_transaction(&self, tx: DecodedTransaction) {
		self.state
			.lock()
			.unwrap()
			.transactions
			.insert(tx.txid.clone(), tx);
	}

	/// Append `count` blocks that only carry a coinbase paying `address`.
	pub fn push_coinbase_blocks(&self, count: u64, address: &str) {
		for _ in 0..count {
			let height = self.tip() + 1;
			self.push_block(vec![coinbase_tx(
				&format!("cb-{}-{}", height, self.nonce()),
				&[(address, "50")],
			)]);
		}
	}

	/// Drop every block above `height`, as a reorganization would.
	pub fn truncate(&self, height: u64) {
		self.state.lock().unwrap().chain.truncate(height as usize);
	}

	pub fn tip(&self) -> u64 {
		self.state.lock().unwrap().chain.len() as u64
	}

	pub fn add_to_mempool(&self, tx: DecodedTransaction) {
		let mut state = self.state.lock().unwrap();
		state.mempool.push(tx.txid.clone());
		state.transactions.insert(tx.txid.clone(), tx);
	}

	/// Announce a mempool transaction the node can no longer serve.
	pub fn add_vanished_to_mempool(&self, txid: &str) {
		self.state.lock().unwrap().mempool.push(txid.to_string());
	}

	pub fn sent(&self) -> Vec<String> {
		self.state.lock().unwrap().sent.clone()
	}

	/// Heights passed to `get_block_hash` since the last call, oldest first.
	pub fn take_requested_heights(&self) -> Vec<u64> {
		std::mem::take(&mut self.state.lock().unwrap().requested_heights)
	}

	/// Make the next `count` RPC calls fail with a transport-like error.
	pub fn fail_next_calls(&self, count: usize) {
		self.state.lock().unwrap().failing_calls = count;
	}

	fn nonce(&self) -> u64 {
		self.state.lock().unwrap().next_nonce
	}

	fn check_failure(&self) -> Result<(), NodeError> {
		let mut state = self.state.lock().unwrap();
		if state.failing_calls > 0 {
			state.failing_calls -= 1;
			return Err(NodeError::NoData);
		}
		Ok(())
	}
}

#[async_trait::async_trait]
impl NodeRpc for MockNode {
	async fn get_block_hash(&self, height: u64) -> Result<String, NodeError> {
		self.state.lock().unwrap().requested_heights.push(height);
		self.check_failure()?;
		let state = self.state.lock().unwrap();
		height
			.checked_sub(1)
			.and_then(|index| state.chain.get(index as usize))
			.map(|block| block.hash.clone())
			.ok_or_else(|| NodeError::RpcError {
				code: -8,
				message: "Block height out of range".to_string(),
			})
	}

	async fn get_block(&self, hash: &str) -> Result<BlockSummary, NodeError> {
		self.check_failure()?;
		let state = self.state.lock().unwrap();
		let index = state
			.chain
			.iter()
			.position(|block| block.hash == hash)
			.ok_or(NodeError::RpcError {
				code: RPC_INVALID_ADDRESS_OR_KEY,
				message: "Block not found".to_string(),
			})?;
		Ok(BlockSummary {
			hash: hash.to_string(),
			height: index as u64 + 1,
			previous_block_hash: index
				.checked_sub(1)
				.map(|parent| state.chain[parent].hash.clone()),
			tx: state.chain[index].txids.clone(),
		})
	}

	async fn get_raw_transaction(&self, txid: &str) -> Result<String, NodeError> {
		self.check_failure()?;
		let state = self.state.lock().unwrap();
		if state.transactions.contains_key(txid) {
			Ok(format!("raw:{}", txid))
		} else {
			Err(NodeError::RpcError {
				code: RPC_INVALID_ADDRESS_OR_KEY,
				message: "No such mempool or blockchain transaction".to_string(),
			})
		}
	}

	async fn decode_raw_transaction(&self, hex: &str) -> Result<DecodedTransaction, NodeError> {
		self.check_failure()?;
		let state = self.state.lock().unwrap();
		hex.strip_prefix("raw:")
			.and_then(|txid| state.transactions.get(txid))
			.cloned()
			.ok_or_else(|| NodeError::RpcError {
				code: -22,
				message: "TX decode failed".to_string(),
			})
	}

	async fn get_blockchain_info(&self) -> Result<BlockchainInfo, NodeError> {
		self.check_failure()?;
		Ok(BlockchainInfo {
			blocks: self.state.lock().unwrap().chain.len() as u64,
		})
	}

	async fn get_raw_mempool(&self) -> Result<Vec<String>, NodeError> {
		self.check_failure()?;
		Ok(self.state.lock().unwrap().mempool.clone())
	}

	async fn send_raw_transaction(&self, hex: &str) -> Result<String, NodeError> {
		self.check_failure()?;
		let mut state = self.state.lock().unwrap();
		state.sent.push(hex.to_string());
		Ok(format!("sent-{}", state.sent.len()))
	}
}

pub fn output(n: u32, address: &str, value: &str) -> TxOutput {
	TxOutput {
		n,
		value: json!(value),
		script_pub_key: ScriptPubKey {
			script_type: "pubkeyhash".to_string(),
			addresses: Some(vec![address.to_string()]),
			address: None,
		},
	}
}

pub fn null_data_output(n: u32) -> TxOutput {
	TxOutput {
		n,
		value: json!("0"),
		script_pub_key: ScriptPubKey {
			script_type: NULL_DATA_SCRIPT_TYPE.to_string(),
			addresses: None,
			address: None,
		},
	}
}

pub fn coinbase_tx(txid: &str, outputs: &[(&str, &str)]) -> DecodedTransaction {
	DecodedTransaction {
		txid: txid.to_string(),
		vin: vec![TxInput {
			coinbase: Some("00".to_string()),
			..Default::default()
		}],
		vout: outputs
			.iter()
			.enumerate()
			.map(|(n, (address, value))| output(n as u32, address, value))
			.collect(),
	}
}

pub fn spend_tx(txid: &str, inputs: &[(&str, u32)], outputs: &[(&str, &str)]) -> DecodedTransaction {
	DecodedTransaction {
		txid: txid.to_string(),
		vin: inputs
			.iter()
			.map(|(prev, vout)| TxInput {
				coinbase: None,
				txid: Some(prev.to_string()),
				vout: Some(*vout),
			})
			.collect(),
		vout: outputs
			.iter()
			.enumerate()
			.map(|(n, (address, value))| output(n as u32, address, value))
			.collect(),
	}
}
