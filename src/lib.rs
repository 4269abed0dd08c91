//! # bio-batch
//!
//! Bulk generation of short text documents (artist biographies) against a
//! rate-limited, quota-constrained completion API. One request is made per
//! work item and every result is streamed to disk as soon as it arrives, so an
//! interrupted run can be resumed without losing work or paying twice.
//!
//! ## Features
//!
//! - **Bounded worker pool**: a fixed number of concurrent calls, dispatched in input order
//! - **Error classification**: rate limits, billing quota, server, network, client and systemic failures
//! - **Backoff**: per-kind exponential backoff with caps, jitter and `Retry-After` support
//! - **Quota pausing**: stop submitting new work when a session budget or provider window runs low
//! - **Crash-safe output**: append-only JSON Lines, one durable record per item
//! - **Resume**: re-scan the output and skip items that already have a record
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use bio_batch::runner::{Orchestrator, RunConfig};
//! use bio_batch::service::openai::OpenAiService;
//! use bio_batch::sink::{JsonlSink, OpenMode};
//! use bio_batch::WorkItem;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let (sink, _done) = JsonlSink::open("out.jsonl", OpenMode::Fresh)?;
//! let service = OpenAiService::new("sk-...", "pmpt_123", None)?;
//!
//! let orchestrator = Orchestrator::new(RunConfig::default(), Arc::new(service), Arc::new(sink))?;
//! let items = vec![WorkItem::new("7c9e6679-7425-40de-944b-e07fc1f90ae7", "Nina Simone", None)];
//! let report = orchestrator.run(items).await;
//! println!("{} succeeded", report.stats.succeeded);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`input`] - CSV work item reader with resume filtering
//! - [`service`] - Completion service trait, error classification, OpenAI client
//! - [`quota`] - Quota monitor, header parsing, pause controller
//! - [`runner`] - Backoff, call executor, scheduler and orchestrator
//! - [`sink`] - Append-only outcome sinks
//! - [`shutdown`] - Ctrl+C coordination

#![warn(missing_docs)]
#![warn(clippy::all)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// CLI command implementations
pub mod cli;

/// Work item input readers
pub mod input;

/// Metrics emission and Prometheus exporter
pub mod metrics;

/// Quota tracking and pause control
pub mod quota;

/// Execution engine
pub mod runner;

/// External completion service
pub mod service;

/// Graceful shutdown coordination shared across modules
pub mod shutdown;

/// Outcome persistence
pub mod sink;

/// One unit of input to be sent to the completion service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Opaque, unique key of the item (a UUID for CSV input)
    pub id: String,
    /// Display name, sent as the `artist_name` variable
    pub name: String,
    /// Optional free-form context, sent as the `artist_data` variable
    pub payload: Option<String>,
}

impl WorkItem {
    /// Create a work item.
    pub fn new(id: impl Into<String>, name: impl Into<String>, payload: Option<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            payload,
        }
    }
}

/// Terminal status of a processed item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// The service returned text
    Success,
    /// Every permitted attempt failed
    Failed,
}

/// Classification of a failed service call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Short-window rate limit (429), usually with a retry hint
    RateLimited,
    /// Billing or hard quota depleted
    QuotaExhausted,
    /// 5xx from the provider
    ServerError,
    /// Transport failure: timeout, refused connection, DNS
    NetworkError,
    /// Permanent rejection of this item
    ClientError,
    /// Authentication or configuration failure that affects every item
    Systemic,
}

impl ErrorKind {
    /// Whether the executor retries this kind locally.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::QuotaExhausted | Self::ServerError | Self::NetworkError
        )
    }

    /// Stable snake_case label used in records, logs and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::QuotaExhausted => "quota_exhausted",
            Self::ServerError => "server_error",
            Self::NetworkError => "network_error",
            Self::ClientError => "client_error",
            Self::Systemic => "systemic",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rate_limited" => Ok(Self::RateLimited),
            "quota_exhausted" => Ok(Self::QuotaExhausted),
            "server_error" => Ok(Self::ServerError),
            "network_error" => Ok(Self::NetworkError),
            "client_error" => Ok(Self::ClientError),
            "systemic" => Ok(Self::Systemic),
            _ => Err(format!("Invalid error kind: {s}")),
        }
    }
}

/// Result of processing one work item, handed to a sink exactly once.
#[derive(Debug, Clone, PartialEq)]
pub struct CallOutcome {
    /// Id of the originating work item
    pub id: String,
    /// Name of the originating work item
    pub name: String,
    /// Payload of the originating work item
    pub payload: Option<String>,
    /// Success or failure
    pub status: OutcomeStatus,
    /// Generated text on success
    pub output_text: Option<String>,
    /// Provider response id on success
    pub response_id: Option<String>,
    /// Classification of the last failure
    pub error_kind: Option<ErrorKind>,
    /// Human-readable detail of the last failure
    pub error_detail: Option<String>,
    /// Number of service calls made for this item (1-based)
    pub attempt_count: u32,
    /// Wall time spent on the item, backoff sleeps included
    pub duration: Duration,
    /// When the outcome was produced
    pub completed_at: DateTime<Utc>,
}

impl CallOutcome {
    /// Build a successful outcome.
    pub fn success(
        item: &WorkItem,
        output_text: String,
        response_id: Option<String>,
        attempt_count: u32,
        duration: Duration,
    ) -> Self {
        Self {
            id: item.id.clone(),
            name: item.name.clone(),
            payload: item.payload.clone(),
            status: OutcomeStatus::Success,
            output_text: Some(output_text),
            response_id,
            error_kind: None,
            error_detail: None,
            attempt_count,
            duration,
            completed_at: Utc::now(),
        }
    }

    /// Build a failed outcome.
    pub fn failure(
        item: &WorkItem,
        kind: ErrorKind,
        detail: impl Into<String>,
        attempt_count: u32,
        duration: Duration,
    ) -> Self {
        Self {
            id: item.id.clone(),
            name: item.name.clone(),
            payload: item.payload.clone(),
            status: OutcomeStatus::Failed,
            output_text: None,
            response_id: None,
            error_kind: Some(kind),
            error_detail: Some(detail.into()),
            attempt_count,
            duration,
            completed_at: Utc::now(),
        }
    }

    /// Whether the item succeeded.
    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }
}
