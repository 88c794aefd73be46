use crate::index::sync::differ::payable_address;
use crate::index::sync::store::UtxoStore;
use crate::index::{IndexError, Outpoint};
use crate::node::{DecodedTransaction, InputRef, NodeRpc};
use crate::utils::value_to_minor_units;

use std::sync::Arc;
use tracing::{debug, warn};

/// Estimates how pending transactions change an address's balance.
pub struct MempoolEstimator {
	node: Arc<dyn NodeRpc>,
	store: Arc<UtxoStore>,
}

impl MempoolEstimator {
	pub fn new(node: Arc<dyn NodeRpc>, store: Arc<UtxoStore>) -> Self {
		Self { node, store }
	}

	/// Net change in minor units the node's mempool would apply to `address`.
	///
	/// Spent inputs resolved through the store subtract, outputs paying the address add.
	/// Inputs the store does not know and transactions that left the mempool meanwhile are
	/// logged and skipped.
	pub async fn estimate_delta(&self, address: &str) -> Result<i128, IndexError> {
		let mut change: i128 = 0;

		for txid in self.node.get_raw_mempool().await? {
			let tx = match self.node.fetch_transaction(&txid).await {
				Ok(tx) => tx,
				Err(e) if e.is_not_found() => {
					warn!("Mempool transaction {} vanished before it was fetched", txid);
					continue;
				}
				Err(e) => return Err(e.into()),
			};

			change += self.spent_by(&tx, address).await?;
			change += received_by(&tx, address);
		}

		debug!("Mempool change for {}: {}", address, change);
		Ok(change)
	}

	async fn spent_by(&self, tx: &DecodedTransaction, address: &str) -> Result<i128, IndexError> {
		let mut spent: i128 = 0;

		for input in &tx.vin {
			let outpoint = match input.classify() {
				Ok(InputRef::Coinbase) => continue,
				Ok(InputRef::Spend { txid, vout }) => Outpoint::new(txid, vout),
				Err(e) => {
					warn!("Skipping malformed input of mempool transaction {}: {}", tx.txid, e);
					continue;
				}
			};

			match self.store.get_utxo(&outpoint).await? {
				Some(utxo) if utxo.address == address => spent -= utxo.amount as i128,
				Some(_) => {}
				None => warn!(
					"Mempool transaction {} spends unknown outpoint {}",
					tx.txid, outpoint
				),
			}
		}

		Ok(spent)
	}
}

fn received_by(tx: &DecodedTransaction, address: &str) -> i128 {
	tx.vout
		.iter()
		.filter(|output| matches!(payable_address(output), Ok(Some(paid)) if paid == address))
		.filter_map(|output| match value_to_minor_units(&output.value) {
			Ok(amount) => Some(amount as i128),
			Err(e) => {
				warn!(
					"Skipping output {} of mempool transaction {}: {}",
					output.n, tx.txid, e
				);
				None
			}
		})
		.sum()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::index::BlockDiff;
	use crate::index::Utxo;
	use crate::node::mock::{MockNode, coinbase_tx, spend_tx};

	async fn store_with(dir: &tempfile::TempDir, utxos: Vec<Utxo>) -> Arc<UtxoStore> {
		let store = UtxoStore::open(&dir.path().join("utxos.sqlite")).await.unwrap();
		store
			.apply_diff(&BlockDiff {
				height: 1,
				block_hash: "h1".to_string(),
				new_utxos: utxos,
				del_utxos: vec![],
			})
			.await
			.unwrap();
		Arc::new(store)
	}

	fn utxo(txid: &str, address: &str, amount: u128) -> Utxo {
		Utxo {
			outpoint: Outpoint::new(txid, 0),
			height: 1,
			address: address.to_string(),
			amount,
		}
	}

	#[tokio::test]
	async fn nets_spent_and_received_amounts() {
		let dir = tempfile::tempdir().unwrap();
		let store = store_with(&dir, vec![utxo("prev", "X", 500_000_000)]).await;
		let node = Arc::new(MockNode::new());
		node.add_to_mempool(spend_tx("m1", &[("prev", 0)], &[("X", "2"), ("Y", "2.9")]));

		let estimator = MempoolEstimator::new(node, store);

		assert_eq!(estimator.estimate_delta("X").await.unwrap(), -300_000_000);
		assert_eq!(estimator.estimate_delta("Y").await.unwrap(), 290_000_000);
		assert_eq!(estimator.estimate_delta("Z").await.unwrap(), 0);
	}

	#[tokio::test]
	async fn skips_unknown_inputs_and_vanished_transactions() {
		let dir = tempfile::tempdir().unwrap();
		let store = store_with(&dir, vec![utxo("prev", "X", 100)]).await;
		let node = Arc::new(MockNode::new());
		node.add_vanished_to_mempool("gone");
		node.add_to_mempool(spend_tx("m1", &[("unknown", 3)], &[("X", "0.00000007")]));
		node.add_to_mempool(coinbase_tx("m2", &[("X", "0.00000001")]));

		let estimator = MempoolEstimator::new(node, store);

		assert_eq!(estimator.estimate_delta("X").await.unwrap(), 8);
	}

	#[tokio::test]
	async fn propagates_transport_failures() {
		let dir = tempfile::tempdir().unwrap();
		let store = store_with(&dir, vec![]).await;
		let node = Arc::new(MockNode::new());
		node.fail_next_calls(1);

		let estimator = MempoolEstimator::new(node, store);

		assert!(matches!(
			estimator.estimate_delta("X").await,
			Err(IndexError::Node(_))
		));
	}
}
