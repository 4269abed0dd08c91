//! Run statistics
//!
//! Workers bump lock-free counters; [`StatsCounters::snapshot`] produces the
//! plain [`RunStats`] value reported at the end of a run.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::CallOutcome;

/// Counters shared by the scheduler and its workers.
#[derive(Debug, Default)]
pub struct StatsCounters {
    submitted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    interrupted: AtomicU64,
    write_errors: AtomicU64,
}

impl StatsCounters {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// An item was dispatched to a worker.
    pub fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    /// An outcome is being persisted. Returns the number of outcomes so far.
    pub fn record_outcome(&self, outcome: &CallOutcome) -> u64 {
        self.outcome_counter(outcome).fetch_add(1, Ordering::Relaxed);
        self.completed()
    }

    /// Take back [`record_outcome`](Self::record_outcome) for an outcome the
    /// sink rejected.
    pub fn revert_outcome(&self, outcome: &CallOutcome) {
        self.outcome_counter(outcome).fetch_sub(1, Ordering::Relaxed);
    }

    fn outcome_counter(&self, outcome: &CallOutcome) -> &AtomicU64 {
        if outcome.is_success() {
            &self.succeeded
        } else {
            &self.failed
        }
    }

    /// A retry was scheduled.
    pub fn record_retry(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    /// An item stopped without an outcome because of an interrupt.
    pub fn record_interrupted(&self) {
        self.interrupted.fetch_add(1, Ordering::Relaxed);
    }

    /// An outcome could not be persisted.
    pub fn record_write_error(&self) {
        self.write_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Persisted outcomes so far.
    pub fn completed(&self) -> u64 {
        self.succeeded.load(Ordering::Relaxed) + self.failed.load(Ordering::Relaxed)
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self, paused_duration_total: Duration) -> RunStats {
        RunStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            interrupted: self.interrupted.load(Ordering::Relaxed),
            write_errors: self.write_errors.load(Ordering::Relaxed),
            paused_duration_total,
        }
    }
}

/// Statistics of one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunStats {
    /// Items dispatched to a worker
    pub submitted: u64,
    /// Items persisted with a success outcome
    pub succeeded: u64,
    /// Items persisted with a failed outcome
    pub failed: u64,
    /// Retries scheduled across all items
    pub retried: u64,
    /// Items stopped by an interrupt before producing an outcome
    pub interrupted: u64,
    /// Outcomes that could not be persisted
    pub write_errors: u64,
    /// Time dispatch spent paused on quota pressure
    #[serde(serialize_with = "serialize_secs")]
    pub paused_duration_total: Duration,
}

impl RunStats {
    /// Persisted outcomes.
    pub fn completed(&self) -> u64 {
        self.succeeded + self.failed
    }

    /// Share of persisted outcomes that succeeded, in percent.
    pub fn success_rate(&self) -> f64 {
        match self.completed() {
            0 => 0.0,
            n => self.succeeded as f64 / n as f64 * 100.0,
        }
    }
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}
