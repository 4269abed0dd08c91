//! Outcome persistence
//!
//! Every [`CallOutcome`] is handed to an [`OutcomeSink`] exactly once, as soon
//! as it exists. [`JsonlSink`] is the durable implementation; [`MemorySink`]
//! collects outcomes in memory for tests and embedding.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

use crate::{CallOutcome, ErrorKind, OutcomeStatus};

pub mod jsonl;
pub mod lock;

pub use jsonl::{JsonlSink, OpenMode};
pub use lock::OutputLock;

/// Sink errors
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// IO error
    #[error("IO error on {path}: {message}")]
    Io {
        /// File involved
        path: String,
        /// Underlying error
        message: String,
    },

    /// Another process is writing to the same destination
    #[error("output {0} is locked by another process")]
    Locked(String),

    /// Record could not be serialized
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A failed write could not be rolled back; the file may end with a
    /// partial record
    #[error("output {0} may end with a partial record, no further writes accepted")]
    Damaged(String),

    /// Blocking write task failed
    #[error("write task failed: {0}")]
    Task(String),
}

/// Result type for sink operations
pub type SinkResult<T> = Result<T, SinkError>;

/// Destination for finished outcomes.
///
/// `append` must persist one complete record per call and must not return
/// before the record is durable. Concurrent calls are serialized by the sink.
#[async_trait]
pub trait OutcomeSink: Send + Sync {
    /// Persist one outcome.
    async fn append(&self, outcome: &CallOutcome) -> SinkResult<()>;
}

/// On-disk shape of one outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    /// Work item id
    pub id: String,
    /// Work item name
    pub name: String,
    /// Work item payload
    pub payload: Option<String>,
    /// Success or failure
    pub status: OutcomeStatus,
    /// Generated text
    pub output_text: Option<String>,
    /// Provider response id
    pub response_id: Option<String>,
    /// Last failure classification
    pub error_kind: Option<ErrorKind>,
    /// Last failure detail
    pub error_detail: Option<String>,
    /// Number of service calls made
    pub attempt_count: u32,
    /// Wall time spent on the item in milliseconds
    pub duration_ms: u64,
    /// When the outcome was produced
    pub completed_at: DateTime<Utc>,
}

impl From<&CallOutcome> for OutcomeRecord {
    fn from(outcome: &CallOutcome) -> Self {
        Self {
            id: outcome.id.clone(),
            name: outcome.name.clone(),
            payload: outcome.payload.clone(),
            status: outcome.status,
            output_text: outcome.output_text.clone(),
            response_id: outcome.response_id.clone(),
            error_kind: outcome.error_kind,
            error_detail: outcome.error_detail.clone(),
            attempt_count: outcome.attempt_count,
            duration_ms: outcome.duration.as_millis() as u64,
            completed_at: outcome.completed_at,
        }
    }
}

/// In-memory sink.
#[derive(Debug, Default)]
pub struct MemorySink {
    outcomes: Mutex<Vec<CallOutcome>>,
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Outcomes appended so far, in append order.
    pub fn outcomes(&self) -> Vec<CallOutcome> {
        self.outcomes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Number of outcomes appended so far.
    pub fn len(&self) -> usize {
        self.outcomes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Whether nothing was appended yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl OutcomeSink for MemorySink {
    async fn append(&self, outcome: &CallOutcome) -> SinkResult<()> {
        self.outcomes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(outcome.clone());
        Ok(())
    }
}
