//! CSV work item reader
//!
//! Format: `id,name[,payload]`, one item per row.
//!
//! - rows whose first field starts with `#` are comments
//! - blank rows are ignored
//! - a first row whose id column reads `artist_id`, `id` or `uuid` is a header
//! - `id` must be a UUID and `name` must not be empty; offending rows are
//!   counted and skipped
//!
//! Parsing is lazy: [`CsvItems`] yields items as the scheduler pulls them.
//! [`scan`] makes a counting pass first so the caller knows the total and can
//! reject an input without valid rows before anything else happens.

use csv::{ReaderBuilder, StringRecord, Trim};
use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::InputError;
use crate::WorkItem;

const HEADER_NAMES: [&str; 3] = ["artist_id", "id", "uuid"];

/// Running line counts, shared with whoever consumes the iterator.
#[derive(Debug, Default)]
pub struct ParseCounts {
    parsed: AtomicU64,
    skipped: AtomicU64,
    errors: AtomicU64,
    excluded: AtomicU64,
}

impl ParseCounts {
    /// Point-in-time copy of the counts.
    pub fn summary(&self) -> ParseSummary {
        ParseSummary {
            parsed: self.parsed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            excluded: self.excluded.load(Ordering::Relaxed),
        }
    }
}

/// Line counts of a parsed input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseSummary {
    /// Valid items yielded
    pub parsed: u64,
    /// Comment, blank and header rows
    pub skipped: u64,
    /// Invalid rows
    pub errors: u64,
    /// Valid rows dropped because their id was excluded
    pub excluded: u64,
}

/// Lazy iterator of work items from CSV.
pub struct CsvItems<R: Read> {
    records: csv::StringRecordsIntoIter<R>,
    exclude: HashSet<String>,
    counts: Arc<ParseCounts>,
    header_checked: bool,
    row: u64,
    quiet: bool,
}

impl CsvItems<File> {
    /// Open a CSV file. Items whose id is in `exclude` are skipped.
    pub fn open(path: impl AsRef<Path>, exclude: HashSet<String>) -> Result<Self, InputError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                InputError::NotFound(path.display().to_string())
            } else {
                InputError::Io {
                    path: path.display().to_string(),
                    message: e.to_string(),
                }
            }
        })?;
        Ok(Self::from_reader(file, exclude))
    }
}

impl<R: Read> CsvItems<R> {
    /// Parse CSV from any reader.
    pub fn from_reader(reader: R, exclude: HashSet<String>) -> Self {
        let reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(Trim::All)
            .from_reader(reader);
        Self {
            records: reader.into_records(),
            exclude,
            counts: Arc::new(ParseCounts::default()),
            header_checked: false,
            row: 0,
            quiet: false,
        }
    }

    /// Log rejected rows at debug level only, for a second pass over an
    /// input whose problems were already reported.
    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    /// Shared counts, updated as the iterator advances.
    pub fn counts(&self) -> Arc<ParseCounts> {
        self.counts.clone()
    }

    fn reject(&self, id: Option<&str>, reason: &str) {
        self.counts.errors.fetch_add(1, Ordering::Relaxed);
        if self.quiet {
            debug!(row = self.row, id, "{reason}, skipping");
        } else {
            warn!(row = self.row, id, "{reason}, skipping");
        }
    }

    fn parse_row(&mut self, record: &StringRecord) -> Option<WorkItem> {
        let first = record.get(0).unwrap_or_default();
        if record.iter().all(str::is_empty) || first.starts_with('#') {
            self.counts.skipped.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        if !self.header_checked {
            self.header_checked = true;
            if record.len() >= 2 && HEADER_NAMES.contains(&first.to_lowercase().as_str()) {
                self.counts.skipped.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        }

        if record.len() < 2 {
            self.reject(None, "Insufficient columns (need at least id,name)");
            return None;
        }
        if Uuid::parse_str(first).is_err() {
            self.reject(Some(first), "Invalid UUID");
            return None;
        }
        let name = record.get(1).unwrap_or_default();
        if name.is_empty() {
            self.reject(Some(first), "Empty name");
            return None;
        }
        if self.exclude.contains(first) {
            self.counts.excluded.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let payload = record
            .get(2)
            .filter(|p| !p.is_empty())
            .map(str::to_string);
        self.counts.parsed.fetch_add(1, Ordering::Relaxed);
        Some(WorkItem::new(first, name, payload))
    }
}

impl<R: Read> Iterator for CsvItems<R> {
    type Item = WorkItem;

    fn next(&mut self) -> Option<WorkItem> {
        loop {
            self.row += 1;
            match self.records.next()? {
                Ok(record) => {
                    if let Some(item) = self.parse_row(&record) {
                        return Some(item);
                    }
                }
                Err(e) if e.is_io_error() => {
                    warn!(row = self.row, error = %e, "Read error, stopping input");
                    self.counts.errors.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
                Err(e) => self.reject(None, &format!("Unparsable row ({e})")),
            }
        }
    }
}

/// Count the rows of a CSV file without keeping any items.
pub fn scan(path: impl AsRef<Path>, exclude: &HashSet<String>) -> Result<ParseSummary, InputError> {
    let path = path.as_ref();
    let items = CsvItems::open(path, exclude.clone())?;
    let counts = items.counts();
    items.for_each(drop);
    let summary = counts.summary();

    info!(
        path = %path.display(),
        parsed = summary.parsed,
        skipped = summary.skipped,
        errors = summary.errors,
        excluded = summary.excluded,
        "Input parsed"
    );
    Ok(summary)
}
