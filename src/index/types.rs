use crate::index::sync::store::StoreError;
use crate::index::sync::snapshot::SnapshotError;
use crate::node::NodeError;
use crate::utils::AmountError;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one transaction output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Outpoint {
	pub txid: String,
	pub vout: u32,
}

impl Outpoint {
	pub fn new(txid: impl Into<String>, vout: u32) -> Self {
		Self {
			txid: txid.into(),
			vout,
		}
	}
}

impl fmt::Display for Outpoint {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}:{}", self.txid, self.vout)
	}
}

/// A live unspent output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
	pub outpoint: Outpoint,
	/// Height of the block that created the output.
	pub height: u64,
	pub address: String,
	/// Value in minor units.
	pub amount: u128,
}

/// The UTXO changes introduced by one block.
///
/// Creations are applied before deletions, so an output created and spent
/// inside the same block ends up absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockDiff {
	pub height: u64,
	pub block_hash: String,
	pub new_utxos: Vec<Utxo>,
	pub del_utxos: Vec<Outpoint>,
}

/// Errors raised while indexing
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
	#[error("Validation error: {0}")]
	Validation(String),

	#[error("Invalid amount: {0}")]
	Amount(#[from] AmountError),

	#[error("Node error: {0}")]
	Node(#[from] NodeError),

	#[error("Rollback detected at height {height}: {reason}")]
	Rollback { height: u64, reason: String },

	#[error("Store error: {0}")]
	Store(#[from] StoreError),

	#[error("Snapshot error: {0}")]
	Snapshot(#[from] SnapshotError),
}

impl IndexError {
	/// Fatal errors stop the sync loop; the rest abort one iteration and are retried.
	pub fn is_fatal(&self) -> bool {
		matches!(self, IndexError::Snapshot(_))
	}

	/// Whether the error means the node's chain no longer matches the store.
	pub fn is_rollback(&self) -> bool {
		matches!(self, IndexError::Rollback { .. })
	}
}
