//! Snapshot management for the UTXO store.
//!
//! This module provides the `SnapshotManager`, which keeps two rotated file copies of the store
//! database ("most recent" and "previous"). A rollback restores the previous generation, which
//! lags the tip by at least one snapshot interval and therefore sits below any shallow reorg.
//!
//! Every copy is taken with the store's pool closed, so the files on disk are a consistent
//! point-in-time image.

use crate::index::sync::repositories::{FileSnapshotRepository, SnapshotMetadata, SnapshotRepository};
use crate::index::sync::store::{StoreError, UtxoStore};

use std::sync::Arc;
use tracing::{info, warn};

/// Errors raised while taking or restoring snapshots.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Metadata error: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("No {0} snapshot available")]
    Unavailable(&'static str),

    #[error("Restored store is at height {found:?} but the snapshot recorded {expected:?}")]
    Inconsistent {
        expected: Option<u64>,
        found: Option<u64>,
    },
}

/// Configuration for snapshot taking.
#[derive(Debug, Clone)]
pub struct SnapshotConfig {
    /// Take a snapshot every N applied blocks.
    pub interval: u64,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self { interval: 200 }
    }
}

/// Takes and restores snapshots of a `UtxoStore`.
pub struct SnapshotManager {
    store: Arc<UtxoStore>,
    repository: Box<dyn SnapshotRepository + Send + Sync>,
}

impl SnapshotManager {
    /// Create a manager keeping its generations next to the store's database file.
    pub fn new(store: Arc<UtxoStore>) -> Self {
        let repository = FileSnapshotRepository::new(store.path().to_path_buf());
        Self::with_repository(store, Box::new(repository))
    }

    pub fn with_repository(
        store: Arc<UtxoStore>,
        repository: Box<dyn SnapshotRepository + Send + Sync>,
    ) -> Self {
        Self { store, repository }
    }

    /// Rotate the generations and copy the live store into the most recent one.
    ///
    /// The store is reopened whether or not the copy succeeded.
    pub async fn snapshot(&self) -> Result<Option<u64>, SnapshotError> {
        let sync_height = self.store.latest_height().await?;
        let metadata = SnapshotMetadata {
            sync_height,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        let mut exclusive = self.store.exclusive().await;
        let copied = match exclusive.close().await {
            Ok(()) => {
                let source = exclusive.path().to_path_buf();
                match self.repository.rotate().await {
                    Ok(()) => self.repository.save(&source, &metadata).await,
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e.into()),
        };
        exclusive.reopen().await?;
        copied?;

        info!("Snapshot taken at height {:?}", sync_height);
        Ok(sync_height)
    }

    /// Replace the live store with the previous generation.
    ///
    /// Returns the latest height of the restored store, which must match the height the
    /// snapshot recorded.
    pub async fn restore(&self) -> Result<Option<u64>, SnapshotError> {
        let mut exclusive = self.store.exclusive().await;
        let restored = match exclusive.close().await {
            Ok(()) => {
                let target = exclusive.path().to_path_buf();
                self.repository.restore_previous(&target).await
            }
            Err(e) => Err(e.into()),
        };
        exclusive.reopen().await?;
        drop(exclusive);
        let metadata = restored?;

        let found = self.store.latest_height().await?;
        if found != metadata.sync_height {
            return Err(SnapshotError::Inconsistent {
                expected: metadata.sync_height,
                found,
            });
        }

        warn!("Store rolled back to snapshot height {:?}", found);
        Ok(found)
    }
}
