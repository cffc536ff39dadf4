//! Pipeline counters.
//!
//! Every stage bumps its own relaxed atomic; readers take a [`PipelineStats`]
//! snapshot. Counts are diagnostics only and never drive control flow.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Shared, lock-free counters updated from every concurrency domain.
#[derive(Debug, Default)]
pub struct PipelineCounters {
    pub(crate) ticks: AtomicU64,
    pub(crate) ticks_skipped: AtomicU64,
    pub(crate) read_failures: AtomicU64,
    pub(crate) windows_forwarded: AtomicU64,
    pub(crate) samples_forwarded: AtomicU64,
    pub(crate) windows_processed: AtomicU64,
    pub(crate) values_rendered: AtomicU64,
    pub(crate) results_painted: AtomicU64,
    pub(crate) errors_presented: AtomicU64,
    pub(crate) errors_suppressed: AtomicU64,
}

impl PipelineCounters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, amount: u64) {
        counter.fetch_add(amount, Ordering::Relaxed);
    }

    /// Point-in-time copy. `samples_dropped` comes from the queue.
    pub fn snapshot(&self, samples_dropped: u64) -> PipelineStats {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        PipelineStats {
            ticks: load(&self.ticks),
            ticks_skipped: load(&self.ticks_skipped),
            read_failures: load(&self.read_failures),
            windows_forwarded: load(&self.windows_forwarded),
            samples_forwarded: load(&self.samples_forwarded),
            samples_dropped,
            windows_processed: load(&self.windows_processed),
            values_rendered: load(&self.values_rendered),
            results_painted: load(&self.results_painted),
            errors_presented: load(&self.errors_presented),
            errors_suppressed: load(&self.errors_suppressed),
        }
    }
}

/// Serializable counter snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStats {
    /// Acquisition ticks that fired
    pub ticks: u64,
    /// Ticks skipped: no connection, empty window, failed read or not running
    pub ticks_skipped: u64,
    /// Gateway reads that failed
    pub read_failures: u64,
    /// Windows whose raw samples reached the queue
    pub windows_forwarded: u64,
    /// Raw samples offered to the queue
    pub samples_forwarded: u64,
    /// Samples lost to queue overflow
    pub samples_dropped: u64,
    /// Windows handed to the processing capability
    pub windows_processed: u64,
    /// Raw values appended to the sliding display
    pub values_rendered: u64,
    /// Processed results painted on the band display
    pub results_painted: u64,
    /// Error presentations shown
    pub errors_presented: u64,
    /// Error presentations dropped because one was already showing
    pub errors_suppressed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_bumps() {
        let counters = PipelineCounters::default();
        PipelineCounters::bump(&counters.ticks);
        PipelineCounters::bump(&counters.ticks);
        PipelineCounters::add(&counters.samples_forwarded, 10);

        let stats = counters.snapshot(3);
        assert_eq!(stats.ticks, 2);
        assert_eq!(stats.samples_forwarded, 10);
        assert_eq!(stats.samples_dropped, 3);
        assert_eq!(stats.errors_presented, 0);
    }
}
