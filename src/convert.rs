//! Batch conversion: walk a directory tree and turn every page into a CSV.
//!
//! ## Why sequential?
//!
//! Free-tier vision APIs enforce per-minute quotas, and a batch of scanned
//! monitoring sheets is usually a few hundred pages run once. One page at a
//! time with a fixed gap between calls is slower than a concurrent pipeline
//! but never trips a quota, and it makes the resume story trivial: every
//! finished page is a file on disk, and a file on disk is never redone.
//!
//! ## Per-page state machine
//!
//! ```text
//! Pending ──▶ Extracting ──▶ Sanitizing ──▶ Writing ──▶ Done
//!                 │               │             │
//!                 └───────────────┴─────────────┴──▶ Failed (recorded, batch continues)
//! ```

use crate::config::{BatchConfig, NamingMode};
use crate::error::{DocumentError, PageError, Pdf2CsvError};
use crate::output::{BatchReport, FileOutcome, FileStatus};
use crate::pipeline::input::{self, SourceDocument};
use crate::pipeline::llm::{resolve_provider, ExtractionClient, ExtractionOracle, LlmOracle};
use crate::pipeline::manifest::Manifest;
use crate::pipeline::metadata::{declared_metadata, extract_metadata, Metadata};
use crate::pipeline::naming::OutputNamer;
use crate::pipeline::postprocess::sanitize;
use crate::pipeline::render::{DocumentSplitter, PageSplitter};
use crate::progress::{BatchProgressCallback, NoopProgressCallback};
use crate::prompts::page_hint;
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Convert every PDF/JPEG under `root` using the configured LLM provider.
///
/// This is the primary entry point for the library. The provider credential
/// is checked before any file is touched.
///
/// # Returns
/// `Ok(BatchReport)` whenever the batch ran, even if some files or pages
/// failed (check `report.failures`).
///
/// # Errors
/// Returns `Err(Pdf2CsvError)` only for invocation errors:
/// - Input directory missing or not a directory
/// - Provider credential missing / provider not constructible
/// - pdfium not loadable while PDFs are present
///
/// # Example
/// ```rust,no_run
/// use edgequake_pdf2csv::{convert_directory, BatchConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = BatchConfig::builder().recursive(true).build()?;
///     let report = convert_directory("scans/", &config).await?;
///     eprintln!("{} pages written, {} failed", report.pages_processed, report.pages_failed);
///     Ok(())
/// }
/// ```
pub async fn convert_directory(
    root: impl AsRef<Path>,
    config: &BatchConfig,
) -> Result<BatchReport, Pdf2CsvError> {
    BatchOrchestrator::from_config(config)?
        .run(root.as_ref(), config.recursive)
        .await
}

/// Synchronous wrapper around [`convert_directory`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_directory_sync(
    root: impl AsRef<Path>,
    config: &BatchConfig,
) -> Result<BatchReport, Pdf2CsvError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| Pdf2CsvError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert_directory(root, config))
}

/// Drives discovery, splitting, extraction and writing for one batch.
pub struct BatchOrchestrator {
    config: BatchConfig,
    splitter: Arc<dyn PageSplitter>,
    client: ExtractionClient,
    cancel: Arc<AtomicBool>,
}

/// Mutable bookkeeping for one run.
struct RunState {
    namer: OutputNamer,
    manifests: HashMap<PathBuf, Manifest>,
    dir_errors: HashMap<PathBuf, String>,
}

impl BatchOrchestrator {
    /// Wire an orchestrator from explicit components.
    pub fn new(
        config: BatchConfig,
        splitter: Arc<dyn PageSplitter>,
        oracle: Arc<dyn ExtractionOracle>,
    ) -> Self {
        let client = ExtractionClient::from_config(oracle, &config);
        Self {
            config,
            splitter,
            client,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Wire the production splitter and LLM oracle from configuration.
    pub fn from_config(config: &BatchConfig) -> Result<Self, Pdf2CsvError> {
        let provider = resolve_provider(config)?;
        let oracle = Arc::new(LlmOracle::new(provider, config));
        let splitter = Arc::new(DocumentSplitter::new(
            config.max_rendered_pixels,
            config.password.clone(),
        ));
        Ok(Self::new(config.clone(), splitter, oracle))
    }

    /// Share a cancellation flag. Setting it stops the run before the next
    /// file or page; an in-flight extraction call is allowed to finish.
    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = flag;
        self
    }

    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn callback(&self) -> Arc<dyn BatchProgressCallback> {
        self.config
            .progress_callback
            .clone()
            .unwrap_or_else(|| Arc::new(NoopProgressCallback))
    }

    /// Process every candidate file under `root`.
    pub async fn run(&self, root: &Path, recursive: bool) -> Result<BatchReport, Pdf2CsvError> {
        let start = Instant::now();
        let root = input::resolve_root(root)?;
        info!("Starting batch: {} (recursive={})", root.display(), recursive);

        // ── Step 1: Discover inputs ──────────────────────────────────────
        let docs = input::discover(&root, recursive);
        self.splitter.preflight(&docs)?;

        // ── Step 2: Prepare output directories ──────────────────────────
        let mut state = RunState {
            namer: OutputNamer::new(self.config.naming),
            manifests: HashMap::new(),
            dir_errors: HashMap::new(),
        };
        for dir in input::source_dirs(&docs) {
            let out_dir = dir.join(input::OUTPUT_DIR_NAME);
            if let Err(e) = tokio::fs::create_dir_all(&out_dir).await {
                warn!("Cannot create {}: {}", out_dir.display(), e);
                state
                    .dir_errors
                    .insert(out_dir, format!("cannot create output directory: {e}"));
            }
        }

        let cb = self.callback();
        cb.on_batch_start(docs.len());
        info!("Found {} candidate files", docs.len());

        // ── Step 3: Process files in discovery order ─────────────────────
        let mut report = BatchReport::default();
        for doc in &docs {
            if self.cancelled() {
                break;
            }
            let outcome = self.process_file(doc, &mut state, cb.as_ref()).await;
            report.record(outcome);
        }

        report.cancelled = self.cancelled();
        report.total_duration_ms = start.elapsed().as_millis() as u64;
        if report.cancelled {
            warn!("Batch cancelled after {} files", report.files.len());
        }
        info!(
            "Batch done: {} files processed, {} skipped, {} failed; {} pages written in {}ms",
            report.files_processed,
            report.files_skipped,
            report.files_failed,
            report.pages_processed,
            report.total_duration_ms
        );

        cb.on_batch_complete(&report);
        Ok(report)
    }

    async fn process_file(
        &self,
        doc: &SourceDocument,
        state: &mut RunState,
        cb: &dyn BatchProgressCallback,
    ) -> FileOutcome {
        let start = Instant::now();
        let mut outcome = FileOutcome::new(doc.path.clone());
        let out_dir = doc.output_dir();

        if let Some(reason) = state.dir_errors.get(&out_dir) {
            return self.fail_document(outcome, reason.clone(), start, cb);
        }

        // ── Count pages ──────────────────────────────────────────────────
        let splitter = Arc::clone(&self.splitter);
        let d = doc.clone();
        let page_count = match run_blocking(doc, move || splitter.page_count(&d)).await {
            Ok(n) => n,
            Err(e) => return self.fail_document(outcome, e.to_string(), start, cb),
        };
        outcome.page_count = page_count;

        // ── Skip-if-exists ───────────────────────────────────────────────
        state.namer.observe_dir(&out_dir);
        let done = self.completed_pages(doc, page_count, state);
        let pending: Vec<usize> = (1..=page_count).filter(|i| !done.contains_key(i)).collect();
        outcome.pages_skipped = done.len();

        if pending.is_empty() {
            debug!("Skipping {}: all {} outputs exist", doc.path.display(), page_count);
            outcome.status = FileStatus::Skipped;
            outcome.duration_ms = start.elapsed().as_millis() as u64;
            cb.on_file_skipped(&doc.path);
            return outcome;
        }

        info!(
            "Processing {} ({} of {} pages pending)",
            doc.path.display(),
            pending.len(),
            page_count
        );
        cb.on_file_start(&doc.path, pending.len());

        // ── Render pending pages ─────────────────────────────────────────
        let splitter = Arc::clone(&self.splitter);
        let d = doc.clone();
        let indices = pending.clone();
        let pages = match run_blocking(doc, move || splitter.render(&d, &indices)).await {
            Ok(p) => p,
            Err(e) => return self.fail_document(outcome, e.to_string(), start, cb),
        };

        // ── Extract → sanitize → write, page by page ─────────────────────
        let mut inherited = Metadata::default();
        let mut absorbed_up_to = 0usize;
        let mut interrupted = false;

        for page in &pages {
            if self.cancelled() {
                interrupted = true;
                break;
            }

            // Earlier pages finished in a previous run still pass on their metadata.
            for (_, path) in done.range(absorbed_up_to + 1..page.index) {
                inherited = read_output_metadata(path).inherit(&inherited);
            }
            absorbed_up_to = page.index;

            cb.on_page_start(&doc.path, page.index);
            let hint = page_hint(doc.kind.label(), page.index, page_count);
            let result = self.client.extract(page, hint).await;

            if !result.is_ok() {
                let err = PageError::ExtractionFailed {
                    page: page.index,
                    attempts: result.attempts,
                    detail: result
                        .error
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "unknown error".to_string()),
                };
                self.record_page_error(&mut outcome, err, cb);
                continue;
            }

            let metadata =
                extract_metadata(page.text.as_deref(), &result.raw_text).inherit(&inherited);
            inherited = metadata.clone();

            let table = match sanitize(&result.raw_text) {
                Ok(t) => t,
                Err(e) => {
                    let err = PageError::Sanitization {
                        page: page.index,
                        reason: e.to_string(),
                    };
                    self.record_page_error(&mut outcome, err, cb);
                    continue;
                }
            };

            let path = state.namer.resolve(doc, page.index, page_count, &metadata);
            let write_result = table
                .to_csv(&metadata)
                .map_err(|e| e.to_string())
                .and_then(|content| write_csv_noclobber(&path, &content).map_err(|e| e.to_string()));

            match write_result {
                Ok(true) => {
                    debug!("Page {}: wrote {}", page.index, path.display());
                    state.namer.claim(&path);
                    self.record_manifest(doc, page.index, &path, state);
                    cb.on_page_complete(&doc.path, page.index, &path);
                    outcome.outputs.push(path);
                }
                Ok(false) => {
                    warn!(
                        "Page {}: {} appeared during the run; leaving it untouched",
                        page.index,
                        path.display()
                    );
                    state.namer.claim(&path);
                    outcome.pages_skipped += 1;
                }
                Err(detail) => {
                    let err = PageError::WriteFailed {
                        page: page.index,
                        path,
                        detail,
                    };
                    self.record_page_error(&mut outcome, err, cb);
                }
            }
        }

        outcome.status = match (outcome.outputs.is_empty(), outcome.page_errors.is_empty()) {
            (true, true) if interrupted => FileStatus::Cancelled,
            (true, true) => FileStatus::Skipped,
            (false, true) => FileStatus::Completed,
            (true, false) => FileStatus::Failed,
            (false, false) => FileStatus::CompletedWithPartialFailure,
        };
        outcome.duration_ms = start.elapsed().as_millis() as u64;

        if outcome.status == FileStatus::Skipped {
            cb.on_file_skipped(&doc.path);
        } else {
            cb.on_file_complete(&doc.path, outcome.status);
        }
        outcome
    }

    /// Pages whose output already exists, mapped to that output.
    fn completed_pages(
        &self,
        doc: &SourceDocument,
        page_count: usize,
        state: &mut RunState,
    ) -> BTreeMap<usize, PathBuf> {
        let out_dir = doc.output_dir();
        let file_name = doc.file_name();
        let monthly = self.config.naming == NamingMode::Monthly;

        let manifest = if monthly {
            Some(
                state
                    .manifests
                    .entry(out_dir.clone())
                    .or_insert_with(|| Manifest::load(&out_dir)),
            )
        } else {
            None
        };

        (1..=page_count)
            .filter_map(|i| {
                let per_page = OutputNamer::per_page_path(doc, i, page_count);
                if per_page.exists() {
                    return Some((i, per_page));
                }
                manifest
                    .as_ref()
                    .and_then(|m| m.completed_output(&out_dir, &file_name, i))
                    .map(|p| (i, p))
            })
            .collect()
    }

    fn record_manifest(&self, doc: &SourceDocument, page: usize, path: &Path, state: &mut RunState) {
        if self.config.naming != NamingMode::Monthly {
            return;
        }
        let out_dir = doc.output_dir();
        let manifest = state
            .manifests
            .entry(out_dir.clone())
            .or_insert_with(|| Manifest::load(&out_dir));
        manifest.record(&doc.file_name(), page, path);
        if let Err(e) = manifest.save(&out_dir) {
            warn!("Failed to save manifest in {}: {}", out_dir.display(), e);
        }
    }

    fn record_page_error(
        &self,
        outcome: &mut FileOutcome,
        err: PageError,
        cb: &dyn BatchProgressCallback,
    ) {
        warn!("{}: {}", outcome.source.display(), err);
        cb.on_page_error(&outcome.source, err.page(), &err.to_string());
        outcome.page_errors.push(err);
    }

    fn fail_document(
        &self,
        mut outcome: FileOutcome,
        reason: String,
        start: Instant,
        cb: &dyn BatchProgressCallback,
    ) -> FileOutcome {
        warn!("{}: {}", outcome.source.display(), reason);
        outcome.status = FileStatus::Failed;
        outcome.document_error = Some(reason);
        outcome.duration_ms = start.elapsed().as_millis() as u64;
        cb.on_file_complete(&outcome.source, FileStatus::Failed);
        outcome
    }
}

// ── Internal helpers ─────────────────────────────────────────────────────

/// Run a blocking splitter call on the blocking pool.
async fn run_blocking<T, F>(doc: &SourceDocument, f: F) -> Result<T, DocumentError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, DocumentError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| DocumentError::TaskFailed {
            path: doc.path.clone(),
            detail: e.to_string(),
        })?
}

/// Write `content` to `path` unless a file is already there.
///
/// The content goes to a temp file in the same directory first and is then
/// hard-linked into place, so readers never see a half-written CSV and an
/// existing file is never replaced. Returns `Ok(false)` if `path` existed.
fn write_csv_noclobber(path: &Path, content: &str) -> std::io::Result<bool> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(content.as_bytes())?;
    tmp.as_file().sync_all()?;

    match tmp.persist_noclobber(path) {
        Ok(_) => Ok(true),
        Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e.error),
    }
}

/// Metadata from the header line of an existing output file.
fn read_output_metadata(path: &Path) -> Metadata {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|text| text.lines().next().map(declared_metadata))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noclobber_write_creates_then_refuses() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("a.csv");

        assert!(write_csv_noclobber(&path, "#METADATA:;\nA,B\n1,2\n").unwrap());
        assert!(!write_csv_noclobber(&path, "different").unwrap());
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "#METADATA:;\nA,B\n1,2\n"
        );

        let leftovers: Vec<_> = std::fs::read_dir(tmp.path()).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn output_metadata_is_read_from_header_line() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("a.csv");
        std::fs::write(&path, "#METADATA:2024-03;ST7\nA,B\n1,2\n").unwrap();

        let meta = read_output_metadata(&path);
        assert_eq!(meta.station_code.as_deref(), Some("ST7"));
        assert_eq!(meta.month.map(|m| m.to_string()).as_deref(), Some("2024-03"));
        assert_eq!(read_output_metadata(&tmp.path().join("missing.csv")), Metadata::default());
    }
}
