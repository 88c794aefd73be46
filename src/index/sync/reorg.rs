//! Rollback detection for the live sync loop.
//!
//! A rollback is reported when the node's view of the chain no longer extends the blocks the store
//! has applied: the node's tip fell below the store's latest height, or the node reports a
//! different hash at that height. The live loop additionally checks each fetched block's parent
//! hash through `check_parent`.

use crate::index::IndexError;
use crate::index::sync::store::UtxoStore;
use crate::node::{FetchedBlock, NodeRpc};

use tracing::{debug, warn};

/// Decides whether the store has diverged from the node's chain.
#[async_trait::async_trait]
pub trait RollbackDetector: Send + Sync {
    /// Returns a description of the divergence, or `None` when the store still follows the node.
    async fn detect(
        &self,
        store: &UtxoStore,
        node: &dyn NodeRpc,
        tip: u64,
    ) -> Result<Option<String>, IndexError>;

    /// Get the name of this detector for logging.
    fn name(&self) -> &'static str;
}

/// Compares the node's block hash at the store's latest height with the recorded one.
#[derive(Debug, Default, Clone)]
pub struct TipHashDetector;

#[async_trait::async_trait]
impl RollbackDetector for TipHashDetector {
    async fn detect(
        &self,
        store: &UtxoStore,
        node: &dyn NodeRpc,
        tip: u64,
    ) -> Result<Option<String>, IndexError> {
        let Some(latest) = store.latest_height().await? else {
            return Ok(None);
        };

        if tip < latest {
            return Ok(Some(format!(
                "node tip {} is below the latest applied height {}",
                tip, latest
            )));
        }

        let Some(recorded) = store.block_hash(latest).await? else {
            return Ok(Some(format!("no hash recorded for applied height {}", latest)));
        };

        let current = node.get_block_hash(latest).await?;
        if current != recorded {
            warn!(
                "Block at height {} changed from {} to {}",
                latest, recorded, current
            );
            return Ok(Some(format!(
                "hash at height {} is now {} instead of {}",
                latest, current, recorded
            )));
        }

        debug!("Store still follows the node at height {}", latest);
        Ok(None)
    }

    fn name(&self) -> &'static str {
        "TipHashDetector"
    }
}

/// Check that a fetched block builds on the block the store applied just below it.
pub async fn check_parent(store: &UtxoStore, block: &FetchedBlock) -> Result<(), IndexError> {
    if block.height <= 1 {
        return Ok(());
    }

    let Some(recorded) = store.block_hash(block.height - 1).await? else {
        return Ok(());
    };

    match block.previous_hash.as_deref() {
        Some(parent) if parent == recorded => Ok(()),
        parent => Err(IndexError::Rollback {
            height: block.height,
            reason: format!(
                "parent hash {:?} does not match recorded hash {} at height {}",
                parent,
                recorded,
                block.height - 1
            ),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::sync::differ::diff_block;
    use crate::node::mock::MockNode;

    async fn synced_store(node: &MockNode, dir: &tempfile::TempDir) -> UtxoStore {
        let store = UtxoStore::open(&dir.path().join("utxos.sqlite")).await.unwrap();
        for height in 1..=node.tip() {
            let block = node.fetch_block(height, 1).await.unwrap();
            store.apply_diff(&diff_block(&block).unwrap()).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn reports_nothing_while_chains_agree() {
        let dir = tempfile::tempdir().unwrap();
        let node = MockNode::new();
        node.push_coinbase_blocks(3, "A");
        let store = synced_store(&node, &dir).await;

        node.push_coinbase_blocks(2, "A");
        let detected = TipHashDetector.detect(&store, &node, node.tip()).await.unwrap();
        assert_eq!(detected, None);
    }

    #[tokio::test]
    async fn reports_replaced_and_shortened_chains() {
        let dir = tempfile::tempdir().unwrap();
        let node = MockNode::new();
        node.push_coinbase_blocks(3, "A");
        let store = synced_store(&node, &dir).await;

        node.truncate(2);
        let detected = TipHashDetector.detect(&store, &node, node.tip()).await.unwrap();
        assert!(detected.is_some());

        node.push_coinbase_blocks(2, "B");
        let detected = TipHashDetector.detect(&store, &node, node.tip()).await.unwrap();
        assert!(detected.is_some());
    }

    #[tokio::test]
    async fn rejects_block_with_foreign_parent() {
        let dir = tempfile::tempdir().unwrap();
        let node = MockNode::new();
        node.push_coinbase_blocks(2, "A");
        let store = synced_store(&node, &dir).await;

        node.truncate(1);
        node.push_coinbase_blocks(2, "B");
        let block = node.fetch_block(3, 1).await.unwrap();

        assert!(check_parent(&store, &block).await.unwrap_err().is_rollback());

        let block = node.fetch_block(2, 1).await.unwrap();
        assert!(check_parent(&store, &block).await.is_ok());
    }
}
