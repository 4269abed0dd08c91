//! Quota state persistence
//!
//! Lets a run that is restarted on the same day pick up its session counter
//! instead of starting the budget from zero. Writes are atomic: the state is
//! written to a temp file in the target directory, synced, then renamed over
//! the previous file.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use tracing::{debug, info, warn};

use super::monitor::QuotaSnapshot;

/// Current quota state schema version
const SCHEMA_VERSION: &str = "1.0.0";

/// Maximum accepted state file size (1 MB)
pub const MAX_STATE_FILE_SIZE: u64 = 1024 * 1024;

/// Quota state persistence errors
#[derive(Debug, thiserror::Error)]
pub enum QuotaStateError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(String),
    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Deserialization error
    #[error("deserialization error: {0}")]
    Deserialization(String),
    /// Unknown schema version
    #[error("unsupported quota state schema version {0}")]
    SchemaVersion(String),
    /// File too large to be a state file
    #[error("quota state file too large: {size} bytes (max: {max} bytes)")]
    TooLarge {
        /// Actual size
        size: u64,
        /// Maximum allowed size
        max: u64,
    },
}

/// Persisted quota monitor state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaState {
    schema_version: String,
    /// Local calendar day the session counter belongs to
    pub day: NaiveDate,
    /// Requests counted against the session budget on `day`
    pub session_requests: u64,
    /// Latest provider snapshot
    pub snapshot: Option<QuotaSnapshot>,
}

impl QuotaState {
    /// Create a state record.
    pub fn new(day: NaiveDate, session_requests: u64, snapshot: Option<QuotaSnapshot>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            day,
            session_requests,
            snapshot,
        }
    }

    /// Atomically write the state to `path`.
    pub fn save(&self, path: &Path) -> Result<(), QuotaStateError> {
        debug!(path = %path.display(), "Saving quota state");

        let parent_dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(parent_dir).map_err(|e| QuotaStateError::Io(e.to_string()))?;

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| QuotaStateError::Serialization(e.to_string()))?;

        let mut temp_file = tempfile::NamedTempFile::new_in(parent_dir)
            .map_err(|e| QuotaStateError::Io(format!("Failed to create temp file: {e}")))?;
        temp_file
            .write_all(json.as_bytes())
            .map_err(|e| QuotaStateError::Io(format!("Failed to write temp file: {e}")))?;
        temp_file
            .flush()
            .map_err(|e| QuotaStateError::Io(format!("Failed to flush temp file: {e}")))?;
        temp_file
            .as_file()
            .sync_all()
            .map_err(|e| QuotaStateError::Io(format!("Failed to sync temp file: {e}")))?;
        temp_file
            .persist(path)
            .map_err(|e| QuotaStateError::Io(format!("Failed to persist temp file: {e}")))?;

        if let Ok(dir) = std::fs::File::open(parent_dir) {
            let _ = dir.sync_all();
        }

        info!(
            path = %path.display(),
            day = %self.day,
            session_requests = self.session_requests,
            "Quota state saved"
        );
        Ok(())
    }

    /// Load state from `path`. Returns `Ok(None)` when no file exists yet.
    pub fn load(path: &Path) -> Result<Option<Self>, QuotaStateError> {
        let metadata = match std::fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No quota state file yet");
                return Ok(None);
            }
            Err(e) => return Err(QuotaStateError::Io(e.to_string())),
        };
        if metadata.len() > MAX_STATE_FILE_SIZE {
            return Err(QuotaStateError::TooLarge {
                size: metadata.len(),
                max: MAX_STATE_FILE_SIZE,
            });
        }

        let contents =
            std::fs::read_to_string(path).map_err(|e| QuotaStateError::Io(e.to_string()))?;
        let state: QuotaState = serde_json::from_str(&contents).map_err(|e| {
            warn!(error = %e, "Failed to deserialize quota state");
            QuotaStateError::Deserialization(e.to_string())
        })?;
        if state.schema_version != SCHEMA_VERSION {
            return Err(QuotaStateError::SchemaVersion(state.schema_version));
        }

        info!(
            path = %path.display(),
            day = %state.day,
            session_requests = state.session_requests,
            "Quota state loaded"
        );
        Ok(Some(state))
    }
}
