//! Event system for UTXO synchronization.
//!
//! This module defines the events the sync orchestrator emits, the handler trait, and the
//! dispatcher that fans each event out to the registered handlers. Handlers observe the sync
//! process without taking part in it: a failing handler is logged and never stops the loop.

use crate::index::IndexError;

use tracing::{error, info, warn};

/// Events that occur during UTXO synchronization
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A block was applied to the store in live mode
    BlockApplied {
        height: u64,
        created: usize,
        spent: usize,
    },
    /// The catch-up working set was written to the store
    CatchUpCompleted { height: u64, utxos: usize },
    /// A snapshot of the store was taken
    SnapshotTaken { height: Option<u64> },
    /// The store was rolled back to the previous snapshot
    RollbackRestored { height: Option<u64> },
    /// An iteration failed
    SyncError { error: String, recoverable: bool },
}

/// Trait for handling sync events.
#[async_trait::async_trait]
pub trait SyncEventHandler: Send + Sync {
    /// Handle a sync event.
    async fn handle(&mut self, event: &SyncEvent) -> Result<(), IndexError>;

    /// Get the name of this handler for logging and diagnostics.
    fn name(&self) -> &'static str;
}

/// Event dispatcher that manages multiple event handlers.
///
/// Handlers are called in the order they are registered.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: Vec<Box<dyn SyncEventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_handler(&mut self, handler: Box<dyn SyncEventHandler>) {
        self.handlers.push(handler);
    }

    /// Dispatch an event to all registered handlers.
    ///
    /// Errors from handlers are logged, but do not stop other handlers from running.
    pub async fn dispatch(&mut self, event: &SyncEvent) {
        for handler in &mut self.handlers {
            if let Err(e) = handler.handle(event).await {
                error!("Handler {} failed to process event: {}", handler.name(), e);
            }
        }
    }
}

/// Handler that writes every event to the log.
pub struct LogEventHandler;

#[async_trait::async_trait]
impl SyncEventHandler for LogEventHandler {
    async fn handle(&mut self, event: &SyncEvent) -> Result<(), IndexError> {
        match event {
            SyncEvent::BlockApplied {
                height,
                created,
                spent,
            } => info!(
                "[Live sync] Height = {} (+{} / -{} utxos)",
                height, created, spent
            ),
            SyncEvent::CatchUpCompleted { height, utxos } => info!(
                "[Initial sync] Completed at height {} with {} utxos",
                height, utxos
            ),
            SyncEvent::SnapshotTaken { height } => {
                info!("[Snapshot] Taken at height {:?}", height)
            }
            SyncEvent::RollbackRestored { height } => {
                warn!("[Rollback] Store restored to height {:?}", height)
            }
            SyncEvent::SyncError { error, recoverable } => {
                if *recoverable {
                    error!("[Sync error] {} (retrying next poll)", error)
                } else {
                    error!("[Sync error] {} (fatal)", error)
                }
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "LogEventHandler"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct Recorder(Arc<Mutex<Vec<SyncEvent>>>);

    #[async_trait::async_trait]
    impl SyncEventHandler for Recorder {
        async fn handle(&mut self, event: &SyncEvent) -> Result<(), IndexError> {
            self.0.lock().unwrap().push(event.clone());
            Ok(())
        }

        fn name(&self) -> &'static str {
            "Recorder"
        }
    }

    struct Failing;

    #[async_trait::async_trait]
    impl SyncEventHandler for Failing {
        async fn handle(&mut self, _event: &SyncEvent) -> Result<(), IndexError> {
            Err(IndexError::Validation("boom".to_string()))
        }

        fn name(&self) -> &'static str {
            "Failing"
        }
    }

    #[tokio::test]
    async fn failing_handler_does_not_block_others() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = EventDispatcher::new();
        dispatcher.register_handler(Box::new(Failing));
        dispatcher.register_handler(Box::new(Recorder(seen.clone())));

        let event = SyncEvent::SnapshotTaken { height: Some(4) };
        dispatcher.dispatch(&event).await;

        assert_eq!(*seen.lock().unwrap(), vec![event]);
    }
}
