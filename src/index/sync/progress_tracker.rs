//! Progress tracking for UTXO synchronization.
//!
//! This module provides the `SyncProgressTracker`, which counts processed blocks and UTXO
//! creations/deletions, logs progress every 1000 heights, and reports heights that were skipped.

use tracing::{info, warn};

/// Heights between two periodic progress lines.
const LOG_INTERVAL: u64 = 1000;

/// Service for tracking synchronization progress
#[derive(Debug, Clone)]
pub struct SyncProgressTracker {
    /// Label used as the log prefix, e.g. "Initial sync"
    label: &'static str,
    /// Starting height for this session
    start_height: u64,
    /// The highest height we've processed
    highest_processed_height: Option<u64>,
    blocks_processed: u64,
    utxos_created: u64,
    utxos_spent: u64,
    /// Ranges `(last, next)` between which heights were not recorded
    gaps: Vec<(u64, u64)>,
    /// Last height at which we logged progress
    last_logged_height: u64,
}

impl SyncProgressTracker {
    /// Create a new progress tracker expecting `start_height` first.
    pub fn new(label: &'static str, start_height: u64) -> Self {
        Self {
            label,
            start_height,
            highest_processed_height: None,
            blocks_processed: 0,
            utxos_created: 0,
            utxos_spent: 0,
            gaps: Vec::new(),
            last_logged_height: start_height,
        }
    }

    /// Record one processed block
    pub fn record_block(&mut self, height: u64, created: usize, spent: usize) {
        if let Some(last) = self.highest_processed_height {
            if height > last + 1 {
                self.gaps.push((last, height));
            }
        }
        self.highest_processed_height = Some(
            self.highest_processed_height
                .map_or(height, |last| last.max(height)),
        );
        self.blocks_processed += 1;
        self.utxos_created += created as u64;
        self.utxos_spent += spent as u64;
    }

    /// Log progress every 1000 heights or when forced
    pub fn log_progress(&mut self, force: bool) {
        let Some(highest) = self.highest_processed_height else {
            return;
        };

        if force || highest.saturating_sub(self.last_logged_height) >= LOG_INTERVAL {
            info!(
                "[{}] Height = {} ({} blocks, +{} / -{} utxos)",
                self.label, highest, self.blocks_processed, self.utxos_created, self.utxos_spent
            );
            self.last_logged_height = highest;
        }
    }

    pub fn get_stats(&self) -> SyncStats {
        SyncStats {
            start_height: self.start_height,
            highest_processed_height: self.highest_processed_height,
            blocks_processed: self.blocks_processed,
            utxos_created: self.utxos_created,
            utxos_spent: self.utxos_spent,
            gaps: self.gaps.clone(),
        }
    }

    /// Warn about every gap seen in the processed heights
    pub fn validate_completion(&self) {
        for (last, next) in &self.gaps {
            warn!(
                "[{}] Gap detected: missing heights between {} and {}",
                self.label, last, next
            );
        }
    }
}

/// Statistics about the sync progress
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStats {
    pub start_height: u64,
    pub highest_processed_height: Option<u64>,
    pub blocks_processed: u64,
    pub utxos_created: u64,
    pub utxos_spent: u64,
    pub gaps: Vec<(u64, u64)>,
}

impl SyncStats {
    /// Get a human-readable summary of the sync statistics
    pub fn summary(&self) -> String {
        format!(
            "Sync from {} to {}: {} blocks, {} utxos created, {} spent{}",
            self.start_height,
            self.highest_processed_height
                .map_or_else(|| "-".to_string(), |h| h.to_string()),
            self.blocks_processed,
            self.utxos_created,
            self.utxos_spent,
            if self.gaps.is_empty() {
                String::new()
            } else {
                format!(" ({} gaps)", self.gaps.len())
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_blocks_and_gaps() {
        let mut tracker = SyncProgressTracker::new("Initial sync", 1);
        tracker.record_block(1, 2, 0);
        tracker.record_block(2, 1, 1);
        tracker.record_block(5, 0, 3);

        let stats = tracker.get_stats();
        assert_eq!(stats.highest_processed_height, Some(5));
        assert_eq!(stats.blocks_processed, 3);
        assert_eq!(stats.utxos_created, 3);
        assert_eq!(stats.utxos_spent, 4);
        assert_eq!(stats.gaps, vec![(2, 5)]);
        assert_eq!(
            stats.summary(),
            "Sync from 1 to 5: 3 blocks, 3 utxos created, 4 spent (1 gaps)"
        );
    }
}
