//! # WAL Metrics
//!
//! Counters for monitoring the append path.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated by the append log. Cheap to read from another thread.
#[derive(Debug, Default)]
pub struct WalMetrics {
    /// Entries accepted by `append`
    pub appends: AtomicU64,
    /// Frame bytes (header + body) accepted by `append`
    pub bytes_appended: AtomicU64,
    /// Group writes followed by a sync
    pub flushes: AtomicU64,
    /// Segments sealed and replaced by a new one
    pub rotations: AtomicU64,
    /// Torn tails cut on open or on resume
    pub torn_tails_repaired: AtomicU64,
    /// Transient I/O errors that were retried
    pub io_retries: AtomicU64,
}

/// Point-in-time copy of [`WalMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalMetricsSnapshot {
    pub appends: u64,
    pub bytes_appended: u64,
    pub flushes: u64,
    pub rotations: u64,
    pub torn_tails_repaired: u64,
    pub io_retries: u64,
}

impl WalMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_append(&self, frame_bytes: u64) {
        self.appends.fetch_add(1, Ordering::Relaxed);
        self.bytes_appended.fetch_add(frame_bytes, Ordering::Relaxed);
    }

    pub fn record_flush(&self) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rotation(&self) {
        self.rotations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_torn_tail(&self) {
        self.torn_tails_repaired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_io_retry(&self) {
        self.io_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> WalMetricsSnapshot {
        WalMetricsSnapshot {
            appends: self.appends.load(Ordering::Relaxed),
            bytes_appended: self.bytes_appended.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            rotations: self.rotations.load(Ordering::Relaxed),
            torn_tails_repaired: self.torn_tails_repaired.load(Ordering::Relaxed),
            io_retries: self.io_retries.load(Ordering::Relaxed),
        }
    }

    /// Export as Prometheus-style metrics string
    pub fn export_prometheus(&self) -> String {
        let s = self.snapshot();
        format!(
            "# HELP qc18_wal_appends Entries appended\n\
             # TYPE qc18_wal_appends counter\n\
             qc18_wal_appends {}\n\
             # HELP qc18_wal_bytes_appended Frame bytes appended\n\
             # TYPE qc18_wal_bytes_appended counter\n\
             qc18_wal_bytes_appended {}\n\
             # HELP qc18_wal_flushes Synced group writes\n\
             # TYPE qc18_wal_flushes counter\n\
             qc18_wal_flushes {}\n\
             # HELP qc18_wal_rotations Segment rotations\n\
             # TYPE qc18_wal_rotations counter\n\
             qc18_wal_rotations {}\n\
             # HELP qc18_wal_torn_tails_repaired Torn tails truncated\n\
             # TYPE qc18_wal_torn_tails_repaired counter\n\
             qc18_wal_torn_tails_repaired {}\n",
            s.appends, s.bytes_appended, s.flushes, s.rotations, s.torn_tails_repaired
        )
    }
}
