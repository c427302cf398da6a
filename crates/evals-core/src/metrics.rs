//! Process-wide counters for harness activity.
//!
//! Incremented at the call site; [`Metrics::flush`] emits the current values
//! as one `info!` event, typically at the end of a CLI run.

use std::sync::atomic::{AtomicU64, Ordering};

pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    scenarios_run: AtomicU64,
    timeouts: AtomicU64,
    protocol_errors: AtomicU64,
    archive_failures: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            scenarios_run: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            protocol_errors: AtomicU64::new(0),
            archive_failures: AtomicU64::new(0),
        }
    }

    pub fn inc_scenarios_run(&self) {
        self.scenarios_run.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_timeouts(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "timeouts", "counter incremented");
    }

    pub fn inc_protocol_errors(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "protocol_errors", "counter incremented");
    }

    pub fn inc_archive_failures(&self) {
        self.archive_failures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "archive_failures", "counter incremented");
    }

    /// Emit all counters as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            scenarios_run = self.scenarios_run(),
            timeouts = self.timeouts(),
            protocol_errors = self.protocol_errors(),
            archive_failures = self.archive_failures(),
        );
    }

    pub fn scenarios_run(&self) -> u64 {
        self.scenarios_run.load(Ordering::Relaxed)
    }

    pub fn timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }

    pub fn protocol_errors(&self) -> u64 {
        self.protocol_errors.load(Ordering::Relaxed)
    }

    pub fn archive_failures(&self) -> u64 {
        self.archive_failures.load(Ordering::Relaxed)
    }

    /// Reset all counters (tests only share the global when they must).
    pub fn reset(&self) {
        self.scenarios_run.store(0, Ordering::Relaxed);
        self.timeouts.store(0, Ordering::Relaxed);
        self.protocol_errors.store(0, Ordering::Relaxed);
        self.archive_failures.store(0, Ordering::Relaxed);
    }
}
