//! Result types returned by a batch run.
//!
//! A [`BatchReport`] aggregates counts at two granularities (files and
//! pages) plus the list of everything that failed and why. It is
//! serialisable so the CLI can print it as JSON.

use crate::error::PageError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Terminal state of one source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileStatus {
    /// Every attempted page produced a CSV.
    Completed,
    /// At least one page produced a CSV and at least one failed.
    CompletedWithPartialFailure,
    /// Every output already existed; nothing was attempted.
    Skipped,
    /// The document could not be read, or every attempted page failed.
    Failed,
    /// The run was cancelled before any pending page of this file finished.
    Cancelled,
}

impl FileStatus {
    /// Whether the file counts towards `files_processed`.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            FileStatus::Completed | FileStatus::CompletedWithPartialFailure
        )
    }
}

/// Per-file outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileOutcome {
    /// Absolute path of the source document.
    pub source: PathBuf,
    pub status: FileStatus,
    /// Physical pages in the document (0 when it could not be read).
    pub page_count: usize,
    /// CSV files written for this source during this run.
    pub outputs: Vec<PathBuf>,
    /// Pages whose output already existed.
    pub pages_skipped: usize,
    /// Terminal page failures.
    pub page_errors: Vec<PageError>,
    /// Document-level failure reason, if the file could not be read.
    pub document_error: Option<String>,
    pub duration_ms: u64,
}

impl FileOutcome {
    pub(crate) fn new(source: PathBuf) -> Self {
        Self {
            source,
            status: FileStatus::Completed,
            page_count: 0,
            outputs: Vec::new(),
            pages_skipped: 0,
            page_errors: Vec::new(),
            document_error: None,
            duration_ms: 0,
        }
    }
}

/// One entry in the failure list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedItem {
    pub source: PathBuf,
    /// `None` for document-level failures.
    pub page: Option<usize>,
    pub reason: String,
}

/// Aggregate result of [`crate::convert::BatchOrchestrator::run`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchReport {
    /// Files that reached `Completed` or `CompletedWithPartialFailure`.
    pub files_processed: usize,
    pub files_skipped: usize,
    pub files_failed: usize,
    /// Files interrupted by cancellation before any page finished.
    pub files_cancelled: usize,

    /// Pages whose CSV was written in this run.
    pub pages_processed: usize,
    /// Pages whose CSV already existed.
    pub pages_skipped: usize,
    pub pages_failed: usize,

    /// Every CSV written in this run, in write order.
    pub written: Vec<PathBuf>,
    /// Every document-level and page-level failure, in discovery order.
    pub failures: Vec<FailedItem>,
    /// Per-file detail, in discovery order.
    pub files: Vec<FileOutcome>,

    /// The run stopped early because cancellation was requested.
    pub cancelled: bool,
    pub total_duration_ms: u64,
}

impl BatchReport {
    /// Fold one file's outcome into the aggregate counts.
    pub(crate) fn record(&mut self, outcome: FileOutcome) {
        match outcome.status {
            FileStatus::Completed | FileStatus::CompletedWithPartialFailure => {
                self.files_processed += 1
            }
            FileStatus::Skipped => self.files_skipped += 1,
            FileStatus::Failed => self.files_failed += 1,
            FileStatus::Cancelled => self.files_cancelled += 1,
        }

        self.pages_processed += outcome.outputs.len();
        self.pages_skipped += outcome.pages_skipped;
        self.pages_failed += outcome.page_errors.len();
        self.written.extend(outcome.outputs.iter().cloned());

        if let Some(reason) = &outcome.document_error {
            self.failures.push(FailedItem {
                source: outcome.source.clone(),
                page: None,
                reason: reason.clone(),
            });
        }
        for err in &outcome.page_errors {
            self.failures.push(FailedItem {
                source: outcome.source.clone(),
                page: Some(err.page()),
                reason: err.to_string(),
            });
        }

        self.files.push(outcome);
    }

    /// Look up the outcome for a given source path.
    pub fn file(&self, source: &std::path::Path) -> Option<&FileOutcome> {
        self.files.iter().find(|f| f.source == source)
    }
}
