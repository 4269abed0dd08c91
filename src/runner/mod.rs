//! Execution engine
//!
//! [`Orchestrator`] builds a [`Scheduler`] that dispatches work items to a
//! bounded pool of workers. Each worker runs the [`CallExecutor`] retry loop
//! and hands the outcome to a sink.

pub mod backoff;
pub mod config;
pub mod executor;
pub mod orchestrator;
pub mod progress;
pub mod scheduler;
pub mod stats;

pub use config::{ConfigError, RetryCaps, RunConfig};
pub use executor::{CallError, CallExecutor};
pub use orchestrator::{Orchestrator, RunReport, RunStatus};
pub use scheduler::{ScheduleReport, Scheduler, StopReason};
pub use stats::{RunStats, StatsCounters};

use crate::quota::QuotaStateError;

/// Errors setting up a run
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Saved quota state could not be read
    #[error("quota state: {0}")]
    QuotaState(#[from] QuotaStateError),
}
