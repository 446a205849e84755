//! Progress-callback trait for per-file and per-page batch events.
//!
//! Inject an [`Arc<dyn BatchProgressCallback>`] via
//! [`crate::config::BatchConfigBuilder::progress_callback`] to receive events
//! as the orchestrator walks the input tree. The library never prints; the
//! CLI forwards these events to an indicatif progress bar, and a host
//! application can forward them anywhere else.
//!
//! # Example
//!
//! ```rust
//! use edgequake_pdf2csv::{BatchConfig, BatchProgressCallback};
//! use std::path::Path;
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     written: AtomicUsize,
//! }
//!
//! impl BatchProgressCallback for CountingCallback {
//!     fn on_page_complete(&self, _source: &Path, _page: usize, output: &Path) {
//!         self.written.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("wrote {}", output.display());
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { written: AtomicUsize::new(0) });
//! let config = BatchConfig::builder()
//!     .progress_callback(counter as Arc<dyn BatchProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::output::{BatchReport, FileStatus};
use std::path::Path;
use std::sync::Arc;

/// Called by the orchestrator as it processes each file and page.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Processing is sequential, but the trait is
/// `Send + Sync` so a callback can be shared with other tasks.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once after discovery, before any file is processed.
    ///
    /// # Arguments
    /// * `total_files` — number of candidate files found
    fn on_batch_start(&self, total_files: usize) {
        let _ = total_files;
    }

    /// Called when a file is about to be processed.
    ///
    /// * `pending_pages` — pages that still need an output file
    fn on_file_start(&self, source: &Path, pending_pages: usize) {
        let _ = (source, pending_pages);
    }

    /// Called when every output of a file already exists.
    fn on_file_skipped(&self, source: &Path) {
        let _ = source;
    }

    /// Called just before the extraction request for a page is sent.
    fn on_page_start(&self, source: &Path, page: usize) {
        let _ = (source, page);
    }

    /// Called after a page's CSV has been written.
    fn on_page_complete(&self, source: &Path, page: usize, output: &Path) {
        let _ = (source, page, output);
    }

    /// Called when a page fails terminally.
    fn on_page_error(&self, source: &Path, page: usize, error: &str) {
        let _ = (source, page, error);
    }

    /// Called once a file reaches a terminal state (skipped files excluded).
    fn on_file_complete(&self, source: &Path, status: FileStatus) {
        let _ = (source, status);
    }

    /// Called once after the last file.
    fn on_batch_complete(&self, report: &BatchReport) {
        let _ = report;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::BatchConfig`].
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;
