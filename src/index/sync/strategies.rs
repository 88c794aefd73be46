use crate::index::sync::differ::diff_block;
use crate::index::sync::events::{EventDispatcher, SyncEvent};
use crate::index::sync::progress_tracker::SyncProgressTracker;
use crate::index::sync::reorg::check_parent;
use crate::index::sync::store::UtxoStore;
use crate::index::{BlockDiff, IndexError, Outpoint, Utxo};
use crate::node::{FetchedBlock, NodeError, NodeRpc};

use backoff::{ExponentialBackoffBuilder, future::retry};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Configuration for sync strategies
#[derive(Debug, Clone)]
pub struct SyncConfig {
	/// Sleep between polls once the store has caught up with the node
	pub poll_interval: Duration,
	/// Rows per multi-row insert when the catch-up working set is written
	pub flush_batch_size: usize,
	/// Transactions of one block fetched concurrently
	pub rpc_concurrency: usize,
	/// First delay of the catch-up retry backoff
	pub retry_initial_interval: Duration,
	/// Give up retrying a catch-up fetch after this long
	pub retry_max_elapsed: Duration,
}

impl Default for SyncConfig {
	fn default() -> Self {
		Self {
			poll_interval: Duration::from_secs(1),
			flush_batch_size: 1000,
			rpc_concurrency: 8,
			retry_initial_interval: Duration::from_millis(500),
			retry_max_elapsed: Duration::from_secs(15 * 60),
		}
	}
}

/// Result of a completed catch-up run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatchUpOutcome {
	pub height: u64,
	pub utxos: usize,
}

/// Strategy for populating an empty store
///
/// Blocks are diffed into an in-memory working set keyed by outpoint. The set is written to the
/// store in one bulk load once the node's tip is reached. The working set and the next height
/// outlive a failed run, so the following run resumes at the height that failed. Only a broken
/// parent link discards them and restarts from height 1.
pub struct CatchUpSync {
	node: Arc<dyn NodeRpc>,
	store: Arc<UtxoStore>,
	config: SyncConfig,

	working_set: HashMap<Outpoint, Utxo>,
	next_height: u64,
	tip_hash: Option<String>,
}

impl CatchUpSync {
	pub fn new(node: Arc<dyn NodeRpc>, store: Arc<UtxoStore>, config: SyncConfig) -> Self {
		Self {
			node,
			store,
			config,
			working_set: HashMap::new(),
			next_height: 1,
			tip_hash: None,
		}
	}

	/// Next height the catch-up run will fetch.
	pub fn next_height(&self) -> u64 {
		self.next_height
	}

	/// Drop the working set and start over from height 1.
	pub fn reset(&mut self) {
		self.working_set.clear();
		self.next_height = 1;
		self.tip_hash = None;
	}

	/// Diff heights up to `tip` into the working set and bulk-load it.
	///
	/// A failed height is not applied; the next call retries it. A parent-hash break resets the
	/// working set and returns `IndexError::Rollback`.
	pub async fn sync(
		&mut self,
		tip: u64,
		event_dispatcher: &mut EventDispatcher,
		progress_tracker: &mut SyncProgressTracker,
	) -> Result<CatchUpOutcome, IndexError> {
		if tip + 1 < self.next_height {
			let height = tip + 1;
			self.reset();
			return Err(IndexError::Rollback {
				height,
				reason: "node tip fell below the catch-up progress".to_string(),
			});
		}
		info!("Catch-up sync from height {} to {}", self.next_height, tip);

		while self.next_height <= tip {
			let height = self.next_height;
			let block = self.fetch_with_retry(height).await?;
			let linked = match &self.tip_hash {
				Some(parent) => block.previous_hash.as_ref() == Some(parent),
				None => true,
			};
			if !linked {
				self.reset();
				return Err(IndexError::Rollback {
					height,
					reason: "chain changed during catch-up".to_string(),
				});
			}

			let diff = diff_block(&block)?;
			progress_tracker.record_block(height, diff.new_utxos.len(), diff.del_utxos.len());
			apply_to_working_set(&mut self.working_set, diff);
			progress_tracker.log_progress(false);

			self.tip_hash = Some(block.hash);
			self.next_height += 1;
		}

		let height = self.next_height - 1;
		let tip_hash = self.tip_hash.clone().unwrap_or_default();
		let utxos: Vec<Utxo> = self.working_set.values().cloned().collect();
		self.store
			.bulk_load(height, &tip_hash, &utxos, self.config.flush_batch_size)
			.await?;
		self.reset();

		progress_tracker.log_progress(true);
		progress_tracker.validate_completion();
		info!("Catch-up sync completed: {}", progress_tracker.get_stats().summary());

		let outcome = CatchUpOutcome {
			height,
			utxos: utxos.len(),
		};
		event_dispatcher
			.dispatch(&SyncEvent::CatchUpCompleted {
				height: outcome.height,
				utxos: outcome.utxos,
			})
			.await;
		Ok(outcome)
	}

	/// Fetch a block, retrying transient node failures with exponential backoff so the
	/// working set survives a flaky node.
	async fn fetch_with_retry(&self, height: u64) -> Result<FetchedBlock, NodeError> {
		let policy = ExponentialBackoffBuilder::new()
			.with_initial_interval(self.config.retry_initial_interval)
			.with_max_elapsed_time(Some(self.config.retry_max_elapsed))
			.build();
		let node = &*self.node;
		let concurrency = self.config.rpc_concurrency;

		retry(policy, || async move {
			node.fetch_block(height, concurrency).await.map_err(|e| {
				if e.is_transient() {
					warn!("Fetching block {} failed, retrying: {}", height, e);
					backoff::Error::transient(e)
				} else {
					backoff::Error::permanent(e)
				}
			})
		})
		.await
	}
}

/// Creations insert or overwrite, deletions remove.
fn apply_to_working_set(working_set: &mut HashMap<Outpoint, Utxo>, diff: BlockDiff) {
	for utxo in diff.new_utxos {
		working_set.insert(utxo.outpoint.clone(), utxo);
	}
	for outpoint in &diff.del_utxos {
		if working_set.remove(outpoint).is_none() {
			debug!("Spent outpoint {} was not in the working set", outpoint);
		}
	}
}

/// Strategy for following the tip one block at a time
pub struct LiveSync {
	node: Arc<dyn NodeRpc>,
	store: Arc<UtxoStore>,
	config: SyncConfig,
}

impl LiveSync {
	pub fn new(node: Arc<dyn NodeRpc>, store: Arc<UtxoStore>, config: SyncConfig) -> Self {
		Self {
			node,
			store,
			config,
		}
	}

	/// Fetch, verify, diff and apply the block at `height` as one store transaction.
	pub async fn apply_block(
		&self,
		height: u64,
		event_dispatcher: &mut EventDispatcher,
		progress_tracker: &mut SyncProgressTracker,
	) -> Result<(), IndexError> {
		let block = self
			.node
			.fetch_block(height, self.config.rpc_concurrency)
			.await?;
		check_parent(&self.store, &block).await?;

		let diff = diff_block(&block)?;
		self.store.apply_diff(&diff).await?;

		progress_tracker.record_block(height, diff.new_utxos.len(), diff.del_utxos.len());
		progress_tracker.log_progress(false);
		event_dispatcher
			.dispatch(&SyncEvent::BlockApplied {
				height,
				created: diff.new_utxos.len(),
				spent: diff.del_utxos.len(),
			})
			.await;
		Ok(())
	}
}
