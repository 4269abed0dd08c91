//! Failure classification and retry messaging
//!
//! [`classify`] maps a raw [`ServiceFailure`] onto the engine's [`ErrorKind`]
//! taxonomy. [`RetryContext`] formats the operator-facing retry, recovery and
//! final failure messages the executor logs.

use std::time::Duration;

use super::ServiceFailure;
use crate::ErrorKind;

/// Provider codes on a 429 that mean billing quota, not a short window.
pub const QUOTA_CODES: [&str; 3] = [
    "insufficient_quota",
    "billing_hard_limit_reached",
    "quota_exceeded",
];

/// Provider codes that mean every request will fail the same way.
pub const SYSTEMIC_CODES: [&str; 1] = ["invalid_api_key"];

/// Classify a failed call.
pub fn classify(failure: &ServiceFailure) -> ErrorKind {
    if failure.transport {
        return ErrorKind::NetworkError;
    }

    let code = failure.code.as_deref();
    if code.is_some_and(|c| SYSTEMIC_CODES.contains(&c)) {
        return ErrorKind::Systemic;
    }

    match failure.status {
        Some(429) if code.is_some_and(|c| QUOTA_CODES.contains(&c)) => ErrorKind::QuotaExhausted,
        Some(429) => ErrorKind::RateLimited,
        // Every item shares the key, the endpoint and the prompt, so a
        // rejected key or an unknown prompt or model fails them all.
        Some(401 | 403 | 404) => ErrorKind::Systemic,
        Some(status) if (500..=599).contains(&status) => ErrorKind::ServerError,
        _ => ErrorKind::ClientError,
    }
}

/// Short description used inside log messages.
pub fn description(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::RateLimited => "rate limit exceeded",
        ErrorKind::QuotaExhausted => "billing quota exhausted",
        ErrorKind::ServerError => "provider server error",
        ErrorKind::NetworkError => "network error",
        ErrorKind::ClientError => "request rejected",
        ErrorKind::Systemic => "authentication or configuration failure",
    }
}

/// Remediation hint shown with final failures.
pub fn suggestion(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::RateLimited => "Lower --max-workers or wait for the request window to reset",
        ErrorKind::QuotaExhausted => "Check billing limits on the provider account",
        ErrorKind::ServerError => "The provider may be degraded, resume the run later",
        ErrorKind::NetworkError => "Check network connectivity and DNS, then resume",
        ErrorKind::ClientError => "Inspect the item's name and data for invalid content",
        ErrorKind::Systemic => "Verify OPENAI_API_KEY and OPENAI_PROMPT_ID",
    }
}

/// Context for formatting retry messages about one work item.
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// Current attempt number (1-based)
    pub attempt: u32,
    /// Maximum attempts allowed for `kind`
    pub max_attempts: u32,
    /// Classification of the failure
    pub kind: ErrorKind,
    /// Delay before the next attempt
    pub backoff: Duration,
    /// Display name of the item
    pub item_name: String,
    /// Last error message
    pub error_message: String,
}

impl RetryContext {
    /// Convenience constructor.
    pub fn new(
        attempt: u32,
        max_attempts: u32,
        kind: ErrorKind,
        backoff: Duration,
        item_name: impl Into<String>,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            attempt,
            max_attempts,
            kind,
            backoff,
            item_name: item_name.into(),
            error_message: error_message.into(),
        }
    }

    /// `Retrying (attempt 2/5) after rate limit exceeded - waiting 61.3 seconds... (Nina Simone)`
    pub fn format_retry(&self) -> String {
        format!(
            "Retrying (attempt {}/{}) after {} - waiting {:.1} seconds... ({})",
            self.attempt + 1,
            self.max_attempts,
            description(self.kind),
            self.backoff.as_secs_f64(),
            self.item_name
        )
    }

    /// Message logged when a retried item finally succeeds.
    pub fn format_success(&self) -> String {
        format!(
            "Attempt {}/{} succeeded after {} ({})",
            self.attempt,
            self.max_attempts,
            description(self.kind),
            self.item_name
        )
    }

    /// Multi-line final failure summary with a remediation hint.
    pub fn format_failure(&self) -> String {
        let name = if self.item_name.is_empty() {
            "unknown"
        } else {
            &self.item_name
        };
        [
            format!(
                "[FAILED] {name} failed after {} attempt(s)",
                self.attempt
            ),
            format!("  Last error: {}", self.error_message),
            format!("  Kind: {}", self.kind),
            format!("  Suggestion: {}", suggestion(self.kind)),
        ]
        .join("\n")
    }
}
