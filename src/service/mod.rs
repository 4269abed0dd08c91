//! External completion service
//!
//! The engine talks to the provider only through [`CompletionService`]. A call
//! either yields a [`ServiceReply`] or a [`ServiceFailure`] carrying enough
//! raw detail (status, provider error code, retry hint, transport flag) for
//! [`classify`] to decide what happens next. Both carry the quota feedback
//! observed on the response.

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

use crate::quota::QuotaFeedback;
use crate::WorkItem;

pub mod classify;
pub mod openai;

pub use classify::{classify, RetryContext};

/// Successful service response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceReply {
    /// Generated text
    pub text: String,
    /// Provider response id
    pub response_id: Option<String>,
    /// Quota feedback observed on the response
    pub feedback: QuotaFeedback,
}

/// Failed service call, before classification.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceFailure {
    /// HTTP status, absent for transport failures
    pub status: Option<u16>,
    /// Provider error code such as `insufficient_quota`
    pub code: Option<String>,
    /// Human-readable message
    pub message: String,
    /// Server retry hint
    pub retry_after: Option<Duration>,
    /// Quota feedback observed on the response, if any
    pub feedback: QuotaFeedback,
    /// The request never produced a response (timeout, connect, DNS)
    pub transport: bool,
}

impl ServiceFailure {
    /// Failure for an HTTP error response.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
            ..Default::default()
        }
    }

    /// Failure for a request that never got a response.
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transport: true,
            ..Default::default()
        }
    }

    /// Attach a provider error code.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Attach a server retry hint.
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    /// Attach quota feedback.
    pub fn with_feedback(mut self, feedback: QuotaFeedback) -> Self {
        self.feedback = feedback;
        self
    }
}

impl fmt::Display for ServiceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.status, &self.code) {
            (Some(status), Some(code)) => write!(f, "HTTP {status} ({code}): {}", self.message),
            (Some(status), None) => write!(f, "HTTP {status}: {}", self.message),
            (None, _) => write!(f, "transport error: {}", self.message),
        }
    }
}

/// Errors constructing a service client.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Required setting missing or empty
    #[error("missing configuration: {0}")]
    MissingConfig(&'static str),
    /// HTTP client could not be built
    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

/// One request per work item against the provider.
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Generate text for `item`.
    async fn complete(&self, item: &WorkItem) -> Result<ServiceReply, ServiceFailure>;
}
