//! Engine operation counters.
//!
//! Lock-free counters updated on the scan, write and query paths, with a
//! serializable point-in-time snapshot for host processes.

use serde::{Deserialize, Serialize};

use crate::sync::{AtomicU64, Ordering};

/// Engine-wide counters.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    scans: AtomicU64,
    records_scanned: AtomicU64,
    queries: AtomicU64,
    commits: AtomicU64,
    rollbacks: AtomicU64,
    conflicts: AtomicU64,
    retries: AtomicU64,
    timeouts: AtomicU64,
}

/// Point-in-time copy of [`EngineMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Column scans executed (one per sub-range).
    pub scans: u64,
    /// Records visited by those scans.
    pub records_scanned: u64,
    /// Orchestrated multi-column queries.
    pub queries: u64,
    /// Successful commits.
    pub commits: u64,
    /// Completed rollbacks.
    pub rollbacks: u64,
    /// Stage attempts that found a position locked by another session.
    pub conflicts: u64,
    /// Retry polling rounds during commit.
    pub retries: u64,
    /// Commits that gave up on queued positions.
    pub timeouts: u64,
}

impl EngineMetrics {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_scan(&self, records: u64) {
        self.scans.fetch_add(1, Ordering::Relaxed);
        self.records_scanned.fetch_add(records, Ordering::Relaxed);
    }

    pub(crate) fn record_query(&self) {
        self.queries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_commit(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rollback(&self) {
        self.rollbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_conflict(&self) {
        self.conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Reads every counter.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            scans: self.scans.load(Ordering::Relaxed),
            records_scanned: self.records_scanned.load(Ordering::Relaxed),
            queries: self.queries.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            rollbacks: self.rollbacks.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }

    /// Zeroes every counter.
    pub fn reset(&self) {
        for counter in [
            &self.scans,
            &self.records_scanned,
            &self.queries,
            &self.commits,
            &self.rollbacks,
            &self.conflicts,
            &self.retries,
            &self.timeouts,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
