//! Node-level counters.
//!
//! Plain atomics rather than a metrics pipeline; an exporter scrapes these
//! through [`NodeMetrics::snapshot`].

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct NodeMetrics {
    state_transition_errors: AtomicU64,
    resume_decommission_errors: AtomicU64,
    store_start_failures: AtomicU64,
    unexpected_dirs_found: AtomicU64,
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub state_transition_errors: u64,
    pub resume_decommission_errors: u64,
    pub store_start_failures: u64,
    pub unexpected_dirs_found: u64,
}

impl NodeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_state_transition_error(&self) {
        self.state_transition_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_resume_decommission_error(&self) {
        self.resume_decommission_errors
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_start_failure(&self) {
        self.store_start_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unexpected_dirs(&self, count: u64) {
        self.unexpected_dirs_found.fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            state_transition_errors: self.state_transition_errors.load(Ordering::Relaxed),
            resume_decommission_errors: self.resume_decommission_errors.load(Ordering::Relaxed),
            store_start_failures: self.store_start_failures.load(Ordering::Relaxed),
            unexpected_dirs_found: self.unexpected_dirs_found.load(Ordering::Relaxed),
        }
    }
}
