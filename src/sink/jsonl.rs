//! Append-only JSON Lines sink
//!
//! One JSON object per line, one line per outcome. Each append is a single
//! `write_all` of the full line followed by `sync_data`, performed on the
//! blocking pool under the file mutex, so records never interleave and a
//! record that was acknowledged survives a crash. A write that fails part way
//! is truncated back to the previous end of file; if that also fails the sink
//! refuses further appends.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use super::{OutcomeRecord, OutcomeSink, OutputLock, SinkError, SinkResult};
use crate::CallOutcome;

/// How an existing destination is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Start from an empty file
    Fresh,
    /// Keep existing records and report their ids
    Resume,
}

/// Only the id is needed when scanning for already processed items.
#[derive(Deserialize)]
struct RecordId {
    id: String,
}

/// Durable JSON Lines outcome sink.
#[derive(Debug)]
pub struct JsonlSink {
    path: PathBuf,
    file: Arc<Mutex<File>>,
    damaged: Arc<AtomicBool>,
    records_written: AtomicU64,
    _lock: OutputLock,
}

impl JsonlSink {
    /// Open `path` and return the sink with the ids already recorded in it.
    ///
    /// `Fresh` truncates the file and returns an empty set. `Resume` scans
    /// existing lines; lines that do not parse, such as a record torn by a
    /// crash, are skipped and reported. If the file does not end with a
    /// newline one is written so the next record starts on its own line.
    pub fn open(path: impl AsRef<Path>, mode: OpenMode) -> SinkResult<(Self, HashSet<String>)> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
        }

        let lock = OutputLock::try_acquire(&path)?;

        let (file, ids) = match mode {
            OpenMode::Fresh => {
                let file = OpenOptions::new()
                    .create(true)
                    .write(true)
                    .truncate(true)
                    .open(&path)
                    .map_err(|e| io_error(&path, e))?;
                (file, HashSet::new())
            }
            OpenMode::Resume => {
                let mut file = OpenOptions::new()
                    .create(true)
                    .read(true)
                    .append(true)
                    .open(&path)
                    .map_err(|e| io_error(&path, e))?;
                let ids = scan_ids(&path, &mut file)?;
                (file, ids)
            }
        };

        info!(
            path = %path.display(),
            mode = ?mode,
            existing_records = ids.len(),
            "Output opened"
        );

        Ok((
            Self {
                path,
                file: Arc::new(Mutex::new(file)),
                damaged: Arc::new(AtomicBool::new(false)),
                records_written: AtomicU64::new(0),
                _lock: lock,
            },
            ids,
        ))
    }

    /// Destination path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records appended through this sink.
    pub fn records_written(&self) -> u64 {
        self.records_written.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl OutcomeSink for JsonlSink {
    async fn append(&self, outcome: &CallOutcome) -> SinkResult<()> {
        let record = OutcomeRecord::from(outcome);
        let mut line =
            serde_json::to_vec(&record).map_err(|e| SinkError::Serialization(e.to_string()))?;
        line.push(b'\n');

        let file = Arc::clone(&self.file);
        let damaged = Arc::clone(&self.damaged);
        let path = self.path.clone();
        // Once spawned the write completes even if this future is dropped.
        tokio::task::spawn_blocking(move || {
            let mut file = file.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if damaged.load(Ordering::SeqCst) {
                return Err(SinkError::Damaged(path.display().to_string()));
            }
            append_line(&mut *file, &line).map_err(|e| match e {
                AppendError::Write(e) => io_error(&path, e),
                AppendError::Rollback { write, rollback } => {
                    damaged.store(true, Ordering::SeqCst);
                    warn!(
                        path = %path.display(),
                        write_error = %write,
                        rollback_error = %rollback,
                        "Could not remove a partial record"
                    );
                    SinkError::Damaged(path.display().to_string())
                }
            })
        })
        .await
        .map_err(|e| SinkError::Task(e.to_string()))??;

        self.records_written.fetch_add(1, Ordering::Relaxed);
        debug!(item_id = %outcome.id, status = ?outcome.status, "Outcome persisted");
        Ok(())
    }
}

/// File operations an append needs, so a failing write can be rolled back.
trait RecordFile: Write {
    fn end(&mut self) -> io::Result<u64>;
    fn truncate_to(&mut self, len: u64) -> io::Result<()>;
    fn sync(&mut self) -> io::Result<()>;
}

impl RecordFile for File {
    fn end(&mut self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)?;
        self.seek(SeekFrom::Start(len)).map(|_| ())
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }
}

enum AppendError {
    /// Nothing of the record is left in the file
    Write(io::Error),
    /// Part of the record may be left in the file
    Rollback { write: io::Error, rollback: io::Error },
}

/// Write one full line, or leave the file as it was.
fn append_line<F: RecordFile>(file: &mut F, line: &[u8]) -> Result<(), AppendError> {
    let start = file.end().map_err(AppendError::Write)?;
    let written = file.write_all(line).and_then(|()| file.sync());
    match written {
        Ok(()) => Ok(()),
        Err(write) => match file.truncate_to(start).and_then(|()| file.sync()) {
            Ok(()) => Err(AppendError::Write(write)),
            Err(rollback) => Err(AppendError::Rollback { write, rollback }),
        },
    }
}

fn scan_ids(path: &Path, file: &mut File) -> SinkResult<HashSet<String>> {
    let mut ids = HashSet::new();
    let mut skipped = 0usize;
    let mut ends_with_newline = true;

    {
        let mut reader = BufReader::new(&mut *file);
        let mut buf = Vec::new();
        let mut line_no = 0usize;
        loop {
            buf.clear();
            let read = reader
                .read_until(b'\n', &mut buf)
                .map_err(|e| io_error(path, e))?;
            if read == 0 {
                break;
            }
            line_no += 1;
            ends_with_newline = buf.last() == Some(&b'\n');

            let text = String::from_utf8_lossy(&buf);
            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            match serde_json::from_str::<RecordId>(text) {
                Ok(record) => {
                    ids.insert(record.id);
                }
                Err(e) => {
                    skipped += 1;
                    warn!(
                        path = %path.display(),
                        line = line_no,
                        error = %e,
                        "Skipping unreadable output line"
                    );
                }
            }
        }
    }

    if !ends_with_newline {
        warn!(path = %path.display(), "Output ends with a partial record, terminating it");
        file.seek(SeekFrom::End(0)).map_err(|e| io_error(path, e))?;
        file.write_all(b"\n").map_err(|e| io_error(path, e))?;
        file.sync_data().map_err(|e| io_error(path, e))?;
    }

    if skipped > 0 {
        warn!(skipped, "Unreadable lines ignored during resume scan");
    }
    Ok(ids)
}

fn io_error(path: &Path, e: std::io::Error) -> SinkError {
    SinkError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    }
}

/// Read every parseable record from a JSON Lines file.
pub fn read_records(path: impl AsRef<Path>) -> SinkResult<Vec<OutcomeRecord>> {
    let path = path.as_ref();
    let mut contents = String::new();
    File::open(path)
        .and_then(|mut f| f.read_to_string(&mut contents))
        .map_err(|e| io_error(path, e))?;
    Ok(contents
        .lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect())
}
