use crate::index::IndexError;
use crate::index::mempool::MempoolEstimator;
use crate::index::sync::store::UtxoStore;
use crate::node::NodeRpc;
use crate::utils::from_minor_units;

use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// One row of an address's UTXO listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddressUtxo {
	pub txid: String,
	pub vout: u32,
	pub height: u64,
	/// Minor units as a decimal string.
	pub amount: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MempoolChange {
	/// Signed minor units as a decimal string.
	pub change: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendResult {
	pub txid: String,
}

/// Read-side queries over the store and the node
pub struct AddressQueryService {
	node: Arc<dyn NodeRpc>,
	store: Arc<UtxoStore>,
	mempool: MempoolEstimator,
}

impl AddressQueryService {
	pub fn new(node: Arc<dyn NodeRpc>, store: Arc<UtxoStore>) -> Self {
		Self {
			mempool: MempoolEstimator::new(node.clone(), store.clone()),
			node,
			store,
		}
	}

	/// List the live UTXOs of `address`.
	pub async fn utxos(&self, address: &str) -> Result<Vec<AddressUtxo>, IndexError> {
		info!("GET {}", address);
		let utxos = self.store.get_utxos_by_address(address).await?;
		let total: u128 = utxos.iter().map(|utxo| utxo.amount).sum();
		info!(
			"{} holds {} in {} utxos",
			address,
			from_minor_units(total),
			utxos.len()
		);
		Ok(utxos
			.into_iter()
			.map(|utxo| AddressUtxo {
				txid: utxo.outpoint.txid,
				vout: utxo.outpoint.vout,
				height: utxo.height,
				amount: utxo.amount.to_string(),
			})
			.collect())
	}

	pub async fn mempool_change(&self, address: &str) -> Result<MempoolChange, IndexError> {
		info!("MEMPOOL {}", address);
		let change = self.mempool.estimate_delta(address).await?;
		Ok(MempoolChange {
			change: change.to_string(),
		})
	}

	/// Broadcast a raw transaction through the node.
	pub async fn send_raw_transaction(&self, raw_tx: &str) -> Result<SendResult, IndexError> {
		info!("SEND {}", raw_tx);
		hex::decode(raw_tx)
			.map_err(|e| IndexError::Validation(format!("raw transaction is not hex: {}", e)))?;
		let txid = self.node.send_raw_transaction(raw_tx).await?;
		Ok(SendResult { txid })
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::index::{BlockDiff, Outpoint, Utxo};
	use crate::node::mock::{MockNode, spend_tx};
	use serde_json::json;

	async fn service(dir: &tempfile::TempDir, node: Arc<MockNode>) -> AddressQueryService {
		let store = UtxoStore::open(&dir.path().join("utxos.sqlite")).await.unwrap();
		store
			.apply_diff(&BlockDiff {
				height: 1,
				block_hash: "h1".to_string(),
				new_utxos: vec![Utxo {
					outpoint: Outpoint::new("prev", 1),
					height: 1,
					address: "X".to_string(),
					amount: 500_000_000,
				}],
				del_utxos: vec![],
			})
			.await
			.unwrap();
		AddressQueryService::new(node, Arc::new(store))
	}

	#[tokio::test]
	async fn renders_contract_shapes() {
		let dir = tempfile::tempdir().unwrap();
		let node = Arc::new(MockNode::new());
		node.add_to_mempool(spend_tx("m1", &[("prev", 1)], &[("X", "2")]));
		let service = service(&dir, node.clone()).await;

		assert_eq!(
			serde_json::to_value(service.utxos("X").await.unwrap()).unwrap(),
			json!([{ "txid": "prev", "vout": 1, "height": 1, "amount": "500000000" }])
		);
		assert_eq!(
			serde_json::to_value(service.mempool_change("X").await.unwrap()).unwrap(),
			json!({ "change": "-300000000" })
		);
		assert_eq!(
			serde_json::to_value(service.send_raw_transaction("00ff").await.unwrap()).unwrap(),
			json!({ "txid": "sent-1" })
		);
		assert_eq!(node.sent(), vec!["00ff".to_string()]);
	}

	#[tokio::test]
	async fn rejects_non_hex_broadcast() {
		let dir = tempfile::tempdir().unwrap();
		let node = Arc::new(MockNode::new());
		let service = service(&dir, node.clone()).await;

		assert!(matches!(
			service.send_raw_transaction("not-hex").await,
			Err(IndexError::Validation(_))
		));
		assert!(node.sent().is_empty());
	}
}
