//! Compaction statistics.
//!
//! # Usage
//!
//! ```rust,ignore
//! let controller = CompactionController::open(dir, log, payloads, config)?;
//! controller.run_pass()?;
//!
//! let stats = controller.stats().snapshot();
//! println!("Compactions: {}", stats.compactions);
//! println!("Reclaimed: {} bytes", stats.bytes_reclaimed);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Controller statistics.
///
/// All counters are atomic and can be read while a pass is in progress.
/// Values only increase.
#[derive(Debug, Default)]
pub struct CompactionStats {
    /// Passes started.
    passes: AtomicU64,
    /// Successful compaction steps.
    compactions: AtomicU64,
    /// Log truncations performed.
    truncations: AtomicU64,
    /// Compaction failures (excluding cancellation).
    failures: AtomicU64,
    /// Passes stopped by cancellation.
    cancellations: AtomicU64,
    /// Log operations folded into the compacted state.
    operations_compacted: AtomicU64,
    /// Bytes of log dropped by truncation.
    log_bytes_truncated: AtomicU64,
    /// Bytes of obsolete blocks deleted.
    bytes_reclaimed: AtomicU64,
}

impl CompactionStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_pass(&self) {
        self.passes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_compaction(&self, operations: u64, bytes_reclaimed: u64) {
        self.compactions.fetch_add(1, Ordering::Relaxed);
        self.operations_compacted
            .fetch_add(operations, Ordering::Relaxed);
        self.bytes_reclaimed
            .fetch_add(bytes_reclaimed, Ordering::Relaxed);
    }

    pub(crate) fn record_truncation(&self, bytes: u64) {
        self.truncations.fetch_add(1, Ordering::Relaxed);
        self.log_bytes_truncated.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cancellation(&self) {
        self.cancellations.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of passes started.
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }

    /// Returns the number of successful compaction steps.
    pub fn compactions(&self) -> u64 {
        self.compactions.load(Ordering::Relaxed)
    }

    /// Returns the number of log truncations.
    pub fn truncations(&self) -> u64 {
        self.truncations.load(Ordering::Relaxed)
    }

    /// Returns the number of compaction failures.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Returns the number of cancelled passes.
    pub fn cancellations(&self) -> u64 {
        self.cancellations.load(Ordering::Relaxed)
    }

    /// Returns a point-in-time copy of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            passes: self.passes(),
            compactions: self.compactions(),
            truncations: self.truncations(),
            failures: self.failures(),
            cancellations: self.cancellations(),
            operations_compacted: self.operations_compacted.load(Ordering::Relaxed),
            log_bytes_truncated: self.log_bytes_truncated.load(Ordering::Relaxed),
            bytes_reclaimed: self.bytes_reclaimed.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of [`CompactionStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Passes started.
    pub passes: u64,
    /// Successful compaction steps.
    pub compactions: u64,
    /// Log truncations performed.
    pub truncations: u64,
    /// Compaction failures.
    pub failures: u64,
    /// Cancelled passes.
    pub cancellations: u64,
    /// Log operations folded into the compacted state.
    pub operations_compacted: u64,
    /// Bytes of log dropped.
    pub log_bytes_truncated: u64,
    /// Bytes of obsolete blocks deleted.
    pub bytes_reclaimed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = CompactionStats::new();
        stats.record_pass();
        stats.record_compaction(10, 4096);
        stats.record_compaction(5, 0);
        stats.record_truncation(300);
        stats.record_failure();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.passes, 1);
        assert_eq!(snapshot.compactions, 2);
        assert_eq!(snapshot.operations_compacted, 15);
        assert_eq!(snapshot.bytes_reclaimed, 4096);
        assert_eq!(snapshot.log_bytes_truncated, 300);
        assert_eq!(snapshot.failures, 1);
        assert_eq!(snapshot.cancellations, 0);
    }
}
