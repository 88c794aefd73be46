//! UTXO Synchronization Module
//!
//! This module provides the services that keep the UTXO store in step with the node:
//!
//! - `orchestrator`: The sync loop. Owns the cursor and mode, and wires together all services.
//! - `strategies`: Catch-up through an in-memory working set, and the live per-block step.
//! - `differ`: Turns a fetched block into UTXO creations and deletions.
//! - `store`: The SQLite UTXO set with atomic per-block application.
//! - `snapshot` / `repositories`: Rotated file snapshots of the store and their restore.
//! - `reorg`: Detects when the node's chain no longer extends the applied blocks.
//! - `events`: Event types and handlers for observing the sync process.
//! - `progress_tracker`: Block and UTXO counters with periodic progress logging.

/// Block differencing
pub mod differ;
/// Event system for decoupled observation of the sync
pub mod events;
/// Main coordinator for the sync process
pub mod orchestrator;
/// Tracks synchronization progress and statistics
pub mod progress_tracker;
/// Rollback detection
pub mod reorg;
/// Snapshot generation files
pub mod repositories;
/// Snapshot manager
pub mod snapshot;
/// SQLite UTXO store
pub mod store;
/// Catch-up and live sync strategies
pub mod strategies;

pub use orchestrator::*;
