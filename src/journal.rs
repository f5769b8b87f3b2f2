//! Append-only JSONL record of parameter writes
//!
//! One line per write made through the facade, so an experiment can be
//! reconstructed afterwards. Entries are buffered and appended in batches;
//! a few failed flushes are tolerated before the journal reports an error.

use crate::error::SxmError;
use crate::types::ParamKind;
use chrono::{DateTime, Utc};
use log::{debug, error, warn};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

const MAX_FLUSH_FAILURES: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub timestamp: DateTime<Utc>,
    /// Uppercase parameter tag, e.g. `EDIT`
    pub kind: String,
    pub code: String,
    pub value: f64,
    /// Written to the offline stand-in rather than SXM
    pub mock: bool,
}

impl JournalEntry {
    pub fn new(kind: ParamKind, code: &str, value: f64, mock: bool) -> Self {
        Self {
            timestamp: Utc::now(),
            kind: kind.tag().to_string(),
            code: code.to_string(),
            value,
            mock,
        }
    }
}

#[derive(Debug)]
pub struct Journal {
    buffer: Vec<JournalEntry>,
    buffer_size: usize,
    file_path: PathBuf,
    flush_failures: usize,
    dropped: usize,
}

impl Journal {
    /// Journal appending to `file_path` with a `.jsonl` extension
    pub fn new<P: Into<PathBuf>>(file_path: P, buffer_size: usize) -> Self {
        let mut path = file_path.into();
        if path.extension().is_none_or(|ext| ext != "jsonl") {
            path.set_extension("jsonl");
        }
        Self {
            buffer: Vec::with_capacity(buffer_size),
            buffer_size: buffer_size.max(1),
            file_path: path,
            flush_failures: 0,
            dropped: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    /// Buffer an entry, flushing when the batch is full.
    ///
    /// While the file cannot be written at most `buffer_size *`
    /// [`MAX_FLUSH_FAILURES`] entries are kept; older ones are dropped.
    pub fn record(&mut self, entry: JournalEntry) -> Result<(), SxmError> {
        if self.buffer.len() >= self.buffer_size * MAX_FLUSH_FAILURES {
            self.buffer.remove(0);
            self.dropped += 1;
            if self.dropped == 1 {
                warn!(
                    "Journal {} is not writable, dropping oldest entries",
                    self.file_path.display()
                );
            }
        }
        self.buffer.push(entry);
        if self.buffer.len() >= self.buffer_size {
            self.flush()?;
        }
        Ok(())
    }

    /// Append buffered entries to the file.
    ///
    /// A failed write keeps the entries buffered and returns `Ok` until
    /// [`MAX_FLUSH_FAILURES`] consecutive failures have accumulated.
    pub fn flush(&mut self) -> Result<(), SxmError> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        match self.append_buffer() {
            Ok(()) => {
                debug!(
                    "Journal flushed {} entries to {}",
                    self.buffer.len(),
                    self.file_path.display()
                );
                self.flush_failures = 0;
                self.buffer.clear();
                Ok(())
            }
            Err(e) => {
                self.flush_failures += 1;
                error!(
                    "Journal flush failure {}/{}: {e}",
                    self.flush_failures, MAX_FLUSH_FAILURES
                );
                if self.flush_failures % 3 == 0 {
                    warn!(
                        "Experiencing intermittent journal flush failures ({}/{})",
                        self.flush_failures, MAX_FLUSH_FAILURES
                    );
                }
                if self.flush_failures >= MAX_FLUSH_FAILURES {
                    return Err(SxmError::Io {
                        source: std::io::Error::other(e.to_string()),
                        context: format!(
                            "Too many consecutive flush failures ({MAX_FLUSH_FAILURES}) for {}",
                            self.file_path.display()
                        ),
                    });
                }
                Ok(())
            }
        }
    }

    fn append_buffer(&self) -> Result<(), SxmError> {
        if let Some(dir) = self.file_path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|source| SxmError::Io {
                source,
                context: format!("creating journal directory {}", dir.display()),
            })?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)
            .map_err(|source| SxmError::Io {
                source,
                context: format!("opening journal {}", self.file_path.display()),
            })?;

        let mut writer = std::io::BufWriter::new(file);
        for entry in &self.buffer {
            let line = serde_json::to_string(entry)?;
            writeln!(writer, "{line}")?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Entries waiting to be flushed
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Entries discarded because the file stayed unwritable
    pub fn dropped(&self) -> usize {
        self.dropped
    }
}

impl Drop for Journal {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

/// Read a journal file back
pub fn read_journal(path: &Path) -> Result<Vec<JournalEntry>, SxmError> {
    let content = std::fs::read_to_string(path).map_err(|source| SxmError::Io {
        source,
        context: format!("reading journal {}", path.display()),
    })?;
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(SxmError::from))
        .collect()
}
