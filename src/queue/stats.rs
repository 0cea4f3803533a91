//! Save-path counters, cheap enough to bump from every worker.

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of the save counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SaveStatsSnapshot {
    /// Entries successfully written to storage.
    pub saved_count: u64,

    /// Total payload bytes of those entries.
    pub saved_bytes: u64,

    /// Entries deleted by overwrites, reconciliation, or truncation.
    pub deleted_count: u64,

    /// Divergent overwrites that forced the saved index backwards.
    pub overwrite_count: u64,
}

pub(super) struct SaveStats {
    saved_count: AtomicU64,
    saved_bytes: AtomicU64,
    deleted_count: AtomicU64,
    overwrite_count: AtomicU64,
}

impl SaveStats {
    pub(super) const fn new() -> Self {
        SaveStats {
            saved_count: AtomicU64::new(0),
            saved_bytes: AtomicU64::new(0),
            deleted_count: AtomicU64::new(0),
            overwrite_count: AtomicU64::new(0),
        }
    }

    pub(super) fn record_saved(&self, bytes: usize) {
        self.saved_count.fetch_add(1, Ordering::Relaxed);
        self.saved_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(super) fn record_deleted(&self, count: u64) {
        self.deleted_count.fetch_add(count, Ordering::Relaxed);
    }

    pub(super) fn record_overwrite(&self) {
        self.overwrite_count.fetch_add(1, Ordering::Relaxed);
    }

    pub(super) fn snapshot(&self) -> SaveStatsSnapshot {
        SaveStatsSnapshot {
            saved_count: self.saved_count.load(Ordering::Relaxed),
            saved_bytes: self.saved_bytes.load(Ordering::Relaxed),
            deleted_count: self.deleted_count.load(Ordering::Relaxed),
            overwrite_count: self.overwrite_count.load(Ordering::Relaxed),
        }
    }
}
