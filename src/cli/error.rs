//! CLI error types and exit codes

use crate::input::InputError;
use crate::metrics::MetricsError;
use crate::runner::{ConfigError, RunError, RunStatus};
use crate::service::ServiceError;
use crate::sink::SinkError;

/// Everything finished and succeeded
pub const EXIT_OK: i32 = 0;
/// Input file missing, unreadable, or without valid items
pub const EXIT_INPUT: i32 = 2;
/// Invalid configuration, or a systemic service failure
pub const EXIT_CONFIG: i32 = 3;
/// Run completed but some items failed
pub const EXIT_FAILURES: i32 = 4;
/// Anything else
pub const EXIT_UNEXPECTED: i32 = 10;
/// Run interrupted by the operator
pub const EXIT_INTERRUPTED: i32 = 130;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Input error
    #[error("input error: {0}")]
    Input(#[from] InputError),

    /// Output error
    #[error("output error: {0}")]
    Sink(#[from] SinkError),

    /// Service client could not be created
    #[error("service error: {0}")]
    Service(#[from] ServiceError),

    /// Invalid run settings
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Run setup failed
    #[error("run error: {0}")]
    Run(#[from] RunError),

    /// Metrics exporter could not start
    #[error("metrics error: {0}")]
    Metrics(#[from] MetricsError),
}

impl CliError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Input(_) => EXIT_INPUT,
            Self::Sink(SinkError::Locked(_)) => EXIT_CONFIG,
            Self::Sink(_) => EXIT_UNEXPECTED,
            Self::Service(_) | Self::Config(_) | Self::Run(_) | Self::Metrics(_) => EXIT_CONFIG,
        }
    }
}

/// Process exit code for a finished run.
pub fn status_exit_code(status: &RunStatus) -> i32 {
    match status {
        RunStatus::Completed => EXIT_OK,
        RunStatus::CompletedWithFailures => EXIT_FAILURES,
        RunStatus::Interrupted => EXIT_INTERRUPTED,
        RunStatus::Systemic(_) => EXIT_CONFIG,
        RunStatus::SinkFailure(_) => EXIT_UNEXPECTED,
    }
}
