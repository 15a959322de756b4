//! Read statistics shared across the read path
//!
//! One `ReadStats` is created per Reader and handed (via `Arc`) to segment
//! cursors and segments, which bump counters as rows flow through. The
//! caller snapshots the totals after (or during) the scan.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters written by the read core.
#[derive(Debug, Default)]
pub struct ReadStats {
    /// Rows emitted by segments into the merge, before any merge policy.
    rows_read: AtomicU64,
    /// Rows eliminated by segment-level min/max or bloom pruning.
    rows_stats_filtered: AtomicU64,
    /// Rows eliminated by delete predicates or unique-key tombstones.
    rows_del_filtered: AtomicU64,
    /// Physical rows folded into logical rows by the AGG/UNIQUE policies.
    merged_rows: AtomicU64,
}

impl ReadStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_rows_read(&self, n: u64) {
        self.rows_read.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_rows_stats_filtered(&self, n: u64) {
        self.rows_stats_filtered.fetch_add(n, Ordering::Relaxed);
    }

    pub fn inc_rows_del_filtered(&self, n: u64) {
        self.rows_del_filtered.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_merged_rows(&self, n: u64) {
        self.merged_rows.fetch_add(n, Ordering::Relaxed);
    }

    pub fn rows_read(&self) -> u64 {
        self.rows_read.load(Ordering::Relaxed)
    }

    pub fn rows_stats_filtered(&self) -> u64 {
        self.rows_stats_filtered.load(Ordering::Relaxed)
    }

    pub fn rows_del_filtered(&self) -> u64 {
        self.rows_del_filtered.load(Ordering::Relaxed)
    }

    pub fn merged_rows(&self) -> u64 {
        self.merged_rows.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            rows_read: self.rows_read(),
            rows_stats_filtered: self.rows_stats_filtered(),
            rows_del_filtered: self.rows_del_filtered(),
            merged_rows: self.merged_rows(),
        }
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub rows_read: u64,
    pub rows_stats_filtered: u64,
    pub rows_del_filtered: u64,
    pub merged_rows: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let stats = ReadStats::new();
        stats.inc_rows_read(10);
        stats.inc_rows_read(5);
        stats.inc_rows_del_filtered(2);
        stats.add_merged_rows(7);

        let snap = stats.snapshot();
        assert_eq!(snap.rows_read, 15);
        assert_eq!(snap.rows_stats_filtered, 0);
        assert_eq!(snap.rows_del_filtered, 2);
        assert_eq!(snap.merged_rows, 7);
    }
}
