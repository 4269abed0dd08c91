//! Advisory lock on an output destination
//!
//! Two processes streaming into the same file would interleave records, so
//! opening a destination takes an exclusive fd-lock on `<output>.lock` and
//! holds it until the sink is dropped.

use fd_lock::RwLock;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::SinkError;

/// Exclusive lock held for the lifetime of a sink.
pub struct OutputLock {
    // The OS lock lives as long as this descriptor stays open.
    _file: RwLock<File>,
    path: PathBuf,
}

impl OutputLock {
    /// Lock file path used for `output`.
    pub fn lock_path(output: &Path) -> PathBuf {
        let mut name = output.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }

    /// Take the lock without blocking; fails with [`SinkError::Locked`] if
    /// another process holds it.
    pub fn try_acquire(output: &Path) -> Result<Self, SinkError> {
        let path = Self::lock_path(output);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| SinkError::Io {
                path: path.display().to_string(),
                message: format!("failed to open lock file: {e}"),
            })?;

        let mut lock = RwLock::new(file);
        match lock.try_write() {
            // Dropping the guard would unlock; closing the descriptor
            // releases the lock instead.
            Ok(guard) => std::mem::forget(guard),
            Err(_) => return Err(SinkError::Locked(output.display().to_string())),
        }

        debug!(lock = %path.display(), "Output lock acquired");
        Ok(Self { _file: lock, path })
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for OutputLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputLock").field("path", &self.path).finish()
    }
}
