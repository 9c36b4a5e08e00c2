//! Maintenance operations: compaction and age-based pruning.

use super::{HnswIndex, IndexState};
use crate::events::OpKind;
use crate::hnsw::graph::CompactReport;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Current Unix timestamp in seconds.
pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl HnswIndex {
    /// Removes orphan nodes and repairs neighbor lists that drifted above
    /// `1.5 ×` their degree cap, restoring bidirectionality for any link it
    /// rewrites.
    ///
    /// The pass holds the write lock for its duration; concurrent searches
    /// queue until it completes and never observe a partially rewritten
    /// graph. Returns what was removed and repaired.
    pub fn compact(&self) -> CompactReport {
        let started = Instant::now();
        self.state
            .store(IndexState::Compacting as u8, Ordering::Release);

        let report = {
            let mut core = self.core.write();
            core.compact()
        };

        self.settle_state();
        self.emit(
            OpKind::Compact,
            started,
            true,
            report.removed_nodes + report.optimized_connections,
        );
        report
    }

    /// Deletes every node whose `inserted_at` metadata is older than
    /// `now - max_age`. Nodes without the key are exempt. Returns the number
    /// of nodes removed.
    ///
    /// Removing the entry point re-elects the live node with the greatest
    /// top level (ties: lowest id); pruning the last node empties the index.
    pub fn prune_by_age(&self, max_age: Duration) -> usize {
        self.prune_by_age_at(max_age, unix_now())
    }

    /// Age-based pruning against an explicit clock, for deterministic tests.
    pub fn prune_by_age_at(&self, max_age: Duration, now_unix_secs: u64) -> usize {
        let started = Instant::now();
        let removed = {
            let mut core = self.core.write();
            core.prune_by_age(max_age, now_unix_secs)
        };
        self.settle_state();
        self.emit(OpKind::Prune, started, true, removed);
        removed
    }
}
