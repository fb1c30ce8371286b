//! Structured processing counters exposed by the State Service and
//! Scheduler, mirroring the teacher's `OrchestrationProcessingStats`
//! convention of counting events/outcomes rather than timing them.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Lock-free counters updated as events are handled. Cheap to clone via
/// `Arc`; every count is `Relaxed` since these are approximate observability
/// counters, not a source of truth for control flow.
#[derive(Debug, Default)]
pub struct ProcessingStats {
    events_processed: AtomicU64,
    tasks_completed: AtomicU64,
    tasks_failed: AtomicU64,
    tasks_ready_computed: AtomicU64,
    tasks_assigned: AtomicU64,
}

impl ProcessingStats {
    pub(crate) fn record_event(&self) {
        self.events_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_completed(&self) {
        self.tasks_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_ready(&self) {
        self.tasks_ready_computed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_assigned(&self) {
        self.tasks_assigned.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> ProcessingStatsSnapshot {
        ProcessingStatsSnapshot {
            events_processed: self.events_processed.load(Ordering::Relaxed),
            tasks_completed: self.tasks_completed.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            tasks_ready_computed: self.tasks_ready_computed.load(Ordering::Relaxed),
            tasks_assigned: self.tasks_assigned.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time read of [`ProcessingStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProcessingStatsSnapshot {
    pub events_processed: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub tasks_ready_computed: u64,
    pub tasks_assigned: u64,
}
