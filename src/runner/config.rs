//! Run configuration and its validation

use std::path::PathBuf;
use std::time::Duration;

use crate::ErrorKind;

/// Maximum number of concurrent calls.
/// Provider request windows are shared by every worker, so more than 32
/// concurrent calls only moves the bottleneck to 429 handling.
pub const MAX_CONCURRENCY: usize = 32;

/// Default number of concurrent calls.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Default session budget usage ratio that triggers a pause.
pub const DEFAULT_PAUSE_THRESHOLD: f64 = 0.8;

/// Lowest accepted pause threshold.
pub const MIN_PAUSE_THRESHOLD: f64 = 0.1;

/// Default pause length once quota pressure is detected.
/// Daily budgets reset once per day, so a full day is the conservative default.
pub const DEFAULT_PAUSE_DURATION: Duration = Duration::from_secs(24 * 3600);

/// Shortest accepted pause.
pub const MIN_PAUSE_DURATION: Duration = Duration::from_secs(3600);

/// Longest accepted pause.
pub const MAX_PAUSE_DURATION: Duration = Duration::from_secs(72 * 3600);

/// Default number of completed items between progress log lines.
pub const DEFAULT_LOG_INTERVAL: u64 = 100;

/// Default time in-flight items get to finish after an interrupt.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(30);

/// Per-kind maximum number of attempts (first call included).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryCaps {
    /// Attempts allowed for short-window rate limits
    pub rate_limited: u32,
    /// Attempts allowed for billing quota exhaustion
    pub quota_exhausted: u32,
    /// Attempts allowed for 5xx responses
    pub server_error: u32,
    /// Attempts allowed for transport failures
    pub network_error: u32,
}

impl Default for RetryCaps {
    fn default() -> Self {
        Self {
            rate_limited: 5,
            quota_exhausted: 3,
            server_error: 3,
            network_error: 3,
        }
    }
}

impl RetryCaps {
    /// Maximum attempts for `kind`. Non-transient kinds get exactly one.
    pub fn for_kind(&self, kind: ErrorKind) -> u32 {
        match kind {
            ErrorKind::RateLimited => self.rate_limited,
            ErrorKind::QuotaExhausted => self.quota_exhausted,
            ErrorKind::ServerError => self.server_error,
            ErrorKind::NetworkError => self.network_error,
            ErrorKind::ClientError | ErrorKind::Systemic => 1,
        }
    }
}

/// Validated operator settings for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    /// Number of concurrent calls
    pub concurrency: usize,
    /// Session budget usage ratio (0.1..=1.0) at which dispatch pauses
    pub pause_threshold: f64,
    /// Requests allowed per session/day, if a budget applies
    pub session_budget: Option<u64>,
    /// How long a quota pause lasts
    pub pause_duration: Duration,
    /// Completed items between progress log lines
    pub log_interval: u64,
    /// Time in-flight items get to finish after an interrupt
    pub grace_period: Duration,
    /// Per-kind attempt limits
    pub retry_caps: RetryCaps,
    /// Where quota monitor state is persisted between runs
    pub quota_state_path: Option<PathBuf>,
    /// Whether quota pressure pauses dispatch. Usage is still tracked and
    /// logged when this is off.
    pub quota_monitoring: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            pause_threshold: DEFAULT_PAUSE_THRESHOLD,
            session_budget: None,
            pause_duration: DEFAULT_PAUSE_DURATION,
            log_interval: DEFAULT_LOG_INTERVAL,
            grace_period: DEFAULT_GRACE_PERIOD,
            retry_caps: RetryCaps::default(),
            quota_state_path: None,
            quota_monitoring: true,
        }
    }
}

/// Invalid configuration values
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// Concurrency outside 1..=MAX_CONCURRENCY
    #[error("concurrency must be between 1 and {MAX_CONCURRENCY}, got {0}")]
    Concurrency(usize),
    /// Threshold outside 0.1..=1.0
    #[error("pause threshold must be between {MIN_PAUSE_THRESHOLD} and 1.0, got {0}")]
    PauseThreshold(f64),
    /// Zero budget
    #[error("session budget must be greater than zero")]
    SessionBudget,
    /// Pause duration outside 1h..=72h
    #[error("pause duration must be between 1 and 72 hours, got {0:?}")]
    PauseDuration(Duration),
    /// Zero log interval
    #[error("log interval must be greater than zero")]
    LogInterval,
    /// A retry cap of zero would never call the service
    #[error("retry cap for {0} must be at least 1")]
    RetryCap(ErrorKind),
}

impl RunConfig {
    /// Check every field once; the engine trusts a validated config.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 || self.concurrency > MAX_CONCURRENCY {
            return Err(ConfigError::Concurrency(self.concurrency));
        }
        if !(MIN_PAUSE_THRESHOLD..=1.0).contains(&self.pause_threshold) {
            return Err(ConfigError::PauseThreshold(self.pause_threshold));
        }
        if self.session_budget == Some(0) {
            return Err(ConfigError::SessionBudget);
        }
        if self.pause_duration < MIN_PAUSE_DURATION || self.pause_duration > MAX_PAUSE_DURATION {
            return Err(ConfigError::PauseDuration(self.pause_duration));
        }
        if self.log_interval == 0 {
            return Err(ConfigError::LogInterval);
        }
        for kind in [
            ErrorKind::RateLimited,
            ErrorKind::QuotaExhausted,
            ErrorKind::ServerError,
            ErrorKind::NetworkError,
        ] {
            if self.retry_caps.for_kind(kind) == 0 {
                return Err(ConfigError::RetryCap(kind));
            }
        }
        Ok(())
    }
}
