//! UTXO sync orchestrator and integration point for all sync services.
//!
//! This module defines the `UtxoSyncOrchestrator`, the single background task that keeps the UTXO
//! store in step with the node. It owns the height cursor, the sync mode and the snapshot counter,
//! and is responsible for:
//! - Choosing catch-up (empty store) or live mode (populated store) on startup
//! - Applying blocks strictly in height order, one store transaction per block in live mode
//! - Taking a snapshot every `SnapshotConfig::interval` applied blocks
//! - Restoring the previous snapshot when the node's chain diverges from the store
//!
//! Recoverable errors abort the current iteration without advancing the cursor; the same height is
//! retried after the poll interval. Snapshot failures are fatal and stop the loop.

use crate::index::IndexError;
use crate::index::sync::{
    events::{EventDispatcher, LogEventHandler, SyncEvent},
    progress_tracker::SyncProgressTracker,
    reorg::{RollbackDetector, TipHashDetector},
    snapshot::{SnapshotConfig, SnapshotManager},
    store::UtxoStore,
    strategies::{CatchUpSync, LiveSync, SyncConfig},
};
use crate::node::NodeRpc;

use std::sync::Arc;
use tracing::{debug, info, warn};

/// Mode of the sync loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// The store is empty and is being populated from height 1
    CatchingUp,
    /// The store follows the tip block by block
    Live,
}

/// Main sync orchestrator that coordinates all sync components.
pub struct UtxoSyncOrchestrator {
    node: Arc<dyn NodeRpc>,
    store: Arc<UtxoStore>,

    // Services
    catch_up: CatchUpSync,
    live: LiveSync,
    snapshots: SnapshotManager,
    detector: Box<dyn RollbackDetector>,
    event_dispatcher: EventDispatcher,
    progress_tracker: SyncProgressTracker,

    // Configuration
    config: SyncConfig,
    snapshot_config: SnapshotConfig,

    // State
    mode: SyncMode,
    cursor: u64,
    blocks_since_snapshot: u64,
}

impl UtxoSyncOrchestrator {
    /// Create an orchestrator with the default rollback detector and a logging event handler.
    pub fn new(
        node: Arc<dyn NodeRpc>,
        store: Arc<UtxoStore>,
        config: SyncConfig,
        snapshot_config: SnapshotConfig,
    ) -> Self {
        let mut event_dispatcher = EventDispatcher::new();
        event_dispatcher.register_handler(Box::new(LogEventHandler));

        Self {
            catch_up: CatchUpSync::new(node.clone(), store.clone(), config.clone()),
            live: LiveSync::new(node.clone(), store.clone(), config.clone()),
            snapshots: SnapshotManager::new(store.clone()),
            detector: Box::new(TipHashDetector),
            event_dispatcher,
            progress_tracker: SyncProgressTracker::new("Initial sync", 1),
            node,
            store,
            config,
            snapshot_config,
            mode: SyncMode::CatchingUp,
            cursor: 1,
            blocks_since_snapshot: 0,
        }
    }

    /// Replace the rollback detector.
    #[cfg(test)]
    pub fn with_detector(mut self, detector: Box<dyn RollbackDetector>) -> Self {
        self.detector = detector;
        self
    }

    /// Register an additional event handler.
    #[cfg(test)]
    pub fn register_handler(
        &mut self,
        handler: Box<dyn crate::index::sync::events::SyncEventHandler>,
    ) {
        self.event_dispatcher.register_handler(handler);
    }

    pub fn mode(&self) -> SyncMode {
        self.mode
    }

    /// Next height the sync loop will fetch.
    pub fn cursor(&self) -> u64 {
        match self.mode {
            SyncMode::CatchingUp => self.catch_up.next_height(),
            SyncMode::Live => self.cursor,
        }
    }

    /// Pick the starting mode and cursor from the store's latest height.
    pub async fn initialize(&mut self) -> Result<(), IndexError> {
        match self.store.latest_height().await? {
            Some(latest) => {
                info!("Store is at height {}, resuming live sync", latest);
                self.enter_live(latest + 1);
            }
            None => {
                info!("Store is empty, starting catch-up sync");
                self.start_catch_up();
            }
        }
        Ok(())
    }

    /// Run the sync loop until a fatal error occurs.
    pub async fn run(&mut self) -> Result<(), IndexError> {
        self.initialize().await?;

        loop {
            if let Err(e) = self.sync_once().await {
                let recoverable = !e.is_fatal();
                self.event_dispatcher
                    .dispatch(&SyncEvent::SyncError {
                        error: e.to_string(),
                        recoverable,
                    })
                    .await;

                if !recoverable {
                    info!("Stopping sync at height {}", self.cursor());
                    return Err(e);
                }
            }

            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// Run one iteration: catch up to the node's tip, or apply every block up to it.
    pub async fn sync_once(&mut self) -> Result<(), IndexError> {
        let tip = self.node.get_blockchain_info().await?.blocks;

        match self.mode {
            SyncMode::CatchingUp => self.catch_up_to(tip).await,
            SyncMode::Live => self.follow_tip(tip).await,
        }
    }

    async fn catch_up_to(&mut self, tip: u64) -> Result<(), IndexError> {
        if tip == 0 {
            debug!("Node has no blocks yet");
            return Ok(());
        }

        // A failed height is retried by the next iteration; a broken chain starts over.
        let outcome = match self
            .catch_up
            .sync(tip, &mut self.event_dispatcher, &mut self.progress_tracker)
            .await
        {
            Err(e) if e.is_rollback() => {
                warn!("Restarting catch-up: {}", e);
                self.start_catch_up();
                return Err(e);
            }
            result => result?,
        };

        self.enter_live(outcome.height + 1);
        self.take_snapshot().await
    }

    async fn follow_tip(&mut self, tip: u64) -> Result<(), IndexError> {
        if let Some(reason) = self
            .detector
            .detect(&self.store, self.node.as_ref(), tip)
            .await?
        {
            return self.recover(&reason).await;
        }

        while self.cursor <= tip {
            let applied = self
                .live
                .apply_block(
                    self.cursor,
                    &mut self.event_dispatcher,
                    &mut self.progress_tracker,
                )
                .await;
            match applied {
                Err(e) if e.is_rollback() => return self.recover(&e.to_string()).await,
                result => result?,
            }

            self.cursor += 1;
            self.blocks_since_snapshot += 1;
            if self.blocks_since_snapshot >= self.snapshot_config.interval {
                self.take_snapshot().await?;
            }
        }

        Ok(())
    }

    async fn take_snapshot(&mut self) -> Result<(), IndexError> {
        let height = self.snapshots.snapshot().await?;
        self.blocks_since_snapshot = 0;
        self.event_dispatcher
            .dispatch(&SyncEvent::SnapshotTaken { height })
            .await;
        Ok(())
    }

    /// Restore the previous snapshot and recompute the cursor from the restored store.
    async fn recover(&mut self, reason: &str) -> Result<(), IndexError> {
        warn!("Rollback detected by {}: {}", self.detector.name(), reason);

        let height = self.snapshots.restore().await?;
        match height {
            Some(latest) => self.enter_live(latest + 1),
            None => self.start_catch_up(),
        }
        self.blocks_since_snapshot = 0;

        self.event_dispatcher
            .dispatch(&SyncEvent::RollbackRestored { height })
            .await;
        Ok(())
    }

    fn start_catch_up(&mut self) {
        self.catch_up.reset();
        self.mode = SyncMode::CatchingUp;
        self.cursor = 1;
        self.progress_tracker = SyncProgressTracker::new("Initial sync", 1);
    }

    fn enter_live(&mut self, cursor: u64) {
        self.mode = SyncMode::Live;
        self.cursor = cursor;
        self.progress_tracker = SyncProgressTracker::new("Live sync", cursor);
    }
}
