//! Batch-level integration tests.
//!
//! These drive [`BatchOrchestrator`] end to end against a scripted oracle and
//! an in-memory splitter, so they need neither pdfium nor an API key. Every
//! test runs in its own temp directory.

use async_trait::async_trait;
use edgequake_pdf2csv::{
    BatchConfig, BatchOrchestrator, BatchProgressCallback, DocumentError, ExtractionOracle,
    FileStatus, NamingMode, OracleError, OracleRequest, Page, PagePayload, PageError,
    PageSplitter, Pdf2CsvError, SourceDocument,
};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ── Test doubles ─────────────────────────────────────────────────────────────

/// Splitter that never reads file content. Page payloads are
/// `<file name>#<page>` so the oracle can answer per page.
#[derive(Default)]
struct FakeSplitter {
    page_counts: HashMap<String, usize>,
    texts: HashMap<String, String>,
    renders: AtomicUsize,
    cancel_on_render: Option<Arc<AtomicBool>>,
}

impl FakeSplitter {
    fn with_pages(mut self, file: &str, count: usize) -> Self {
        self.page_counts.insert(file.to_string(), count);
        self
    }

    fn with_text(mut self, key: &str, text: &str) -> Self {
        self.texts.insert(key.to_string(), text.to_string());
        self
    }
}

impl PageSplitter for FakeSplitter {
    fn page_count(&self, doc: &SourceDocument) -> Result<usize, DocumentError> {
        let name = doc.file_name();
        if name.contains("corrupt") {
            return Err(DocumentError::CorruptPdf {
                path: doc.path.clone(),
                detail: "xref table damaged".into(),
            });
        }
        Ok(*self.page_counts.get(&name).unwrap_or(&1))
    }

    fn render(&self, doc: &SourceDocument, indices: &[usize]) -> Result<Vec<Page>, DocumentError> {
        self.renders.fetch_add(1, Ordering::SeqCst);
        if let Some(flag) = &self.cancel_on_render {
            flag.store(true, Ordering::SeqCst);
        }
        let name = doc.file_name();
        Ok(indices
            .iter()
            .map(|&i| {
                let key = format!("{name}#{i}");
                Page {
                    index: i,
                    text: self.texts.get(&key).cloned(),
                    payload: PagePayload {
                        bytes: key.into_bytes(),
                        mime_type: "image/png".into(),
                    },
                }
            })
            .collect())
    }
}

/// Oracle answering from a script keyed by `<file name>#<page>`.
#[derive(Default)]
struct ScriptedOracle {
    replies: HashMap<String, Result<String, OracleError>>,
    default_reply: Option<Result<String, OracleError>>,
    calls: Mutex<Vec<String>>,
    cancel_on_first_call: Option<Arc<AtomicBool>>,
}

impl ScriptedOracle {
    fn reply(mut self, key: &str, text: &str) -> Self {
        self.replies.insert(key.to_string(), Ok(text.to_string()));
        self
    }

    fn default_reply(mut self, reply: Result<String, OracleError>) -> Self {
        self.default_reply = Some(reply);
        self
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ExtractionOracle for ScriptedOracle {
    async fn extract(&self, request: &OracleRequest) -> Result<String, OracleError> {
        let key = String::from_utf8_lossy(&request.image.bytes).into_owned();
        self.calls.lock().unwrap().push(key.clone());
        if let Some(flag) = &self.cancel_on_first_call {
            flag.store(true, Ordering::SeqCst);
        }
        self.replies
            .get(&key)
            .cloned()
            .or_else(|| self.default_reply.clone())
            .unwrap_or_else(|| Ok("Col A,Col B\n1,2\n".to_string()))
    }
}

#[derive(Default)]
struct CountingCallback {
    files_started: AtomicUsize,
    files_skipped: AtomicUsize,
    pages_ok: AtomicUsize,
    pages_err: AtomicUsize,
    batches_done: AtomicUsize,
}

impl BatchProgressCallback for CountingCallback {
    fn on_file_start(&self, _source: &Path, _pending_pages: usize) {
        self.files_started.fetch_add(1, Ordering::SeqCst);
    }
    fn on_file_skipped(&self, _source: &Path) {
        self.files_skipped.fetch_add(1, Ordering::SeqCst);
    }
    fn on_page_complete(&self, _source: &Path, _page: usize, _output: &Path) {
        self.pages_ok.fetch_add(1, Ordering::SeqCst);
    }
    fn on_page_error(&self, _source: &Path, _page: usize, _error: &str) {
        self.pages_err.fetch_add(1, Ordering::SeqCst);
    }
    fn on_batch_complete(&self, _report: &edgequake_pdf2csv::BatchReport) {
        self.batches_done.fetch_add(1, Ordering::SeqCst);
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn fast_config() -> BatchConfig {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    BatchConfig::builder()
        .inter_call_delay_ms(0)
        .retry_backoff_ms(0)
        .build()
        .unwrap()
}

fn touch(dir: &Path, name: &str) -> PathBuf {
    let p = dir.join(name);
    if let Some(parent) = p.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&p, b"placeholder").unwrap();
    p
}

fn orchestrator(
    config: BatchConfig,
    splitter: Arc<FakeSplitter>,
    oracle: Arc<ScriptedOracle>,
) -> BatchOrchestrator {
    BatchOrchestrator::new(config, splitter, oracle)
}

fn csv_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir.join("csv"))
        .map(|rd| {
            rd.filter_map(Result::ok)
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .filter(|n| n.ends_with(".csv"))
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn two_page_document_with_one_bad_page() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().canonicalize().unwrap();
    let source = touch(&root, "source.pdf");

    let splitter = Arc::new(FakeSplitter::default().with_pages("source.pdf", 2));
    let oracle = Arc::new(
        ScriptedOracle::default()
            .reply("source.pdf#1", "#METADATA:2024-03;\nA,B\n1,2")
            .reply("source.pdf#2", "I could not find a table on this page."),
    );

    let report = orchestrator(fast_config(), splitter, oracle.clone())
        .run(&root, false)
        .await
        .unwrap();

    assert_eq!(csv_names(&root), vec!["source_page1.csv"]);
    assert_eq!(
        fs::read_to_string(root.join("csv/source_page1.csv")).unwrap(),
        "#METADATA:2024-03;\nA,B\n1,2\n"
    );

    let outcome = report.file(&source).unwrap();
    assert_eq!(outcome.status, FileStatus::CompletedWithPartialFailure);
    assert_eq!(outcome.page_count, 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].page, Some(2));
    assert!(matches!(
        outcome.page_errors[0],
        PageError::Sanitization { page: 2, .. }
    ));
    assert_eq!(report.files_processed, 1);
    assert_eq!(report.pages_processed, 1);
    assert_eq!(report.pages_failed, 1);
    assert_eq!(oracle.call_count(), 2);
}

#[tokio::test]
async fn second_run_is_a_no_op() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().canonicalize().unwrap();
    touch(&root, "a.pdf");
    touch(&root, "b.jpg");

    let splitter = Arc::new(FakeSplitter::default().with_pages("a.pdf", 3));

    let first_oracle = Arc::new(ScriptedOracle::default());
    let first = orchestrator(fast_config(), splitter.clone(), first_oracle.clone())
        .run(&root, false)
        .await
        .unwrap();
    assert_eq!(first.pages_processed, 4);
    assert_eq!(first_oracle.call_count(), 4);

    let snapshot: Vec<String> = csv_names(&root)
        .iter()
        .map(|n| fs::read_to_string(root.join("csv").join(n)).unwrap())
        .collect();

    let second_oracle = Arc::new(ScriptedOracle::default().default_reply(Ok("X,Y\n9,9".into())));
    let renders_before = splitter.renders.load(Ordering::SeqCst);
    let second = orchestrator(fast_config(), splitter.clone(), second_oracle.clone())
        .run(&root, false)
        .await
        .unwrap();

    assert_eq!(second_oracle.call_count(), 0);
    assert!(second.written.is_empty());
    assert_eq!(second.files_skipped, 2);
    assert_eq!(second.pages_skipped, 4);
    assert_eq!(splitter.renders.load(Ordering::SeqCst), renders_before);

    let after: Vec<String> = csv_names(&root)
        .iter()
        .map(|n| fs::read_to_string(root.join("csv").join(n)).unwrap())
        .collect();
    assert_eq!(snapshot, after);
}

#[tokio::test]
async fn corrupt_file_does_not_stop_the_batch() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().canonicalize().unwrap();
    touch(&root, "a.pdf");
    let corrupt = touch(&root, "b_corrupt.pdf");
    touch(&root, "c.jpg");

    let report = orchestrator(
        fast_config(),
        Arc::new(FakeSplitter::default()),
        Arc::new(ScriptedOracle::default()),
    )
    .run(&root, false)
    .await
    .unwrap();

    assert_eq!(report.files_processed, 2);
    assert_eq!(report.files_failed, 1);
    assert_eq!(csv_names(&root), vec!["a.csv", "c.csv"]);

    let failed = report.file(&corrupt).unwrap();
    assert_eq!(failed.status, FileStatus::Failed);
    assert!(failed.document_error.as_deref().unwrap().contains("corrupt"));
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].page, None);
}

#[tokio::test]
async fn retries_stop_at_max_attempts() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().canonicalize().unwrap();
    let scan = touch(&root, "scan.jpg");

    let oracle = Arc::new(ScriptedOracle::default().default_reply(Err(
        OracleError::RateLimited {
            retry_after_secs: None,
        },
    )));
    let config = BatchConfig::builder()
        .inter_call_delay_ms(0)
        .retry_backoff_ms(1)
        .max_attempts(3)
        .build()
        .unwrap();

    let report = orchestrator(config, Arc::new(FakeSplitter::default()), oracle.clone())
        .run(&root, false)
        .await
        .unwrap();

    assert_eq!(oracle.call_count(), 3);
    let outcome = report.file(&scan).unwrap();
    assert_eq!(outcome.status, FileStatus::Failed);
    assert!(matches!(
        outcome.page_errors[0],
        PageError::ExtractionFailed {
            page: 1,
            attempts: 3,
            ..
        }
    ));
    assert!(csv_names(&root).is_empty());
}

#[tokio::test]
async fn monthly_names_never_collide_and_resume() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().canonicalize().unwrap();
    touch(&root, "a.jpg");
    touch(&root, "b.jpg");
    touch(&root, "c.jpg");

    let oracle = Arc::new(
        ScriptedOracle::default()
            .reply("a.jpg#1", "#METADATA:2024-03;S1\nA,B\n1,2")
            .reply("b.jpg#1", "#METADATA:2024-03;S1\nA,B\n3,4")
            .reply("c.jpg#1", "A,B\n5,6"),
    );
    let config = BatchConfig::builder()
        .inter_call_delay_ms(0)
        .naming(NamingMode::Monthly)
        .build()
        .unwrap();

    let report = orchestrator(config.clone(), Arc::new(FakeSplitter::default()), oracle)
        .run(&root, false)
        .await
        .unwrap();

    assert_eq!(report.pages_processed, 3);
    assert_eq!(
        csv_names(&root),
        vec!["March_2024.csv", "March_2024_2.csv", "c.csv"]
    );
    assert!(fs::read_to_string(root.join("csv/March_2024_2.csv"))
        .unwrap()
        .ends_with("3,4\n"));

    let rerun_oracle = Arc::new(ScriptedOracle::default());
    let rerun = orchestrator(config, Arc::new(FakeSplitter::default()), rerun_oracle.clone())
        .run(&root, false)
        .await
        .unwrap();
    assert_eq!(rerun_oracle.call_count(), 0);
    assert_eq!(rerun.files_skipped, 3);
}

#[tokio::test]
async fn metadata_is_inherited_within_a_document() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().canonicalize().unwrap();
    touch(&root, "log.pdf");

    let splitter = Arc::new(
        FakeSplitter::default()
            .with_pages("log.pdf", 2)
            .with_text("log.pdf#1", "Station Code: K-7\nReadings for June 2021"),
    );
    let oracle = Arc::new(
        ScriptedOracle::default()
            .reply("log.pdf#1", "Day,Level\n1,0.4")
            .reply("log.pdf#2", "#METADATA:;\nDay,Level\n16,0.9"),
    );

    orchestrator(fast_config(), splitter, oracle)
        .run(&root, false)
        .await
        .unwrap();

    for page in ["log_page1.csv", "log_page2.csv"] {
        let content = fs::read_to_string(root.join("csv").join(page)).unwrap();
        assert!(
            content.starts_with("#METADATA:2021-06;K-7\n"),
            "{page}: {content:?}"
        );
    }
}

#[tokio::test]
async fn existing_outputs_are_never_overwritten() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().canonicalize().unwrap();
    touch(&root, "keep.jpg");
    fs::create_dir_all(root.join("csv")).unwrap();
    fs::write(root.join("csv/keep.csv"), "hand-edited\n").unwrap();

    let oracle = Arc::new(ScriptedOracle::default());
    let report = orchestrator(fast_config(), Arc::new(FakeSplitter::default()), oracle.clone())
        .run(&root, false)
        .await
        .unwrap();

    assert_eq!(oracle.call_count(), 0);
    assert_eq!(report.files_skipped, 1);
    assert_eq!(
        fs::read_to_string(root.join("csv/keep.csv")).unwrap(),
        "hand-edited\n"
    );
}

#[tokio::test]
async fn recursive_mode_writes_next_to_each_source() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().canonicalize().unwrap();
    touch(&root, "top.jpg");
    touch(&root, "2024/march.JPEG");

    let flat = orchestrator(
        fast_config(),
        Arc::new(FakeSplitter::default()),
        Arc::new(ScriptedOracle::default()),
    )
    .run(&root, false)
    .await
    .unwrap();
    assert_eq!(flat.files.len(), 1);

    let deep = orchestrator(
        fast_config(),
        Arc::new(FakeSplitter::default()),
        Arc::new(ScriptedOracle::default()),
    )
    .run(&root, true)
    .await
    .unwrap();
    assert_eq!(deep.files_processed, 1);
    assert_eq!(deep.files_skipped, 1);
    assert_eq!(csv_names(&root.join("2024")), vec!["march.csv"]);
}

#[tokio::test]
async fn cancellation_stops_before_next_page() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().canonicalize().unwrap();
    touch(&root, "a.pdf");
    touch(&root, "b.pdf");

    let cancel = Arc::new(AtomicBool::new(false));
    let oracle = Arc::new(ScriptedOracle {
        cancel_on_first_call: Some(cancel.clone()),
        ..Default::default()
    });
    let splitter = Arc::new(
        FakeSplitter::default()
            .with_pages("a.pdf", 3)
            .with_pages("b.pdf", 2),
    );

    let report = orchestrator(fast_config(), splitter, oracle.clone())
        .with_cancel(cancel)
        .run(&root, false)
        .await
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(oracle.call_count(), 1);
    assert_eq!(report.written.len(), 1);
    assert_eq!(report.files.len(), 1);
}

#[tokio::test]
async fn cancelling_during_render_is_not_reported_as_skipped() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().canonicalize().unwrap();
    let source = touch(&root, "a.pdf");

    let cancel = Arc::new(AtomicBool::new(false));
    let counter = Arc::new(CountingCallback::default());
    let config = BatchConfig::builder()
        .inter_call_delay_ms(0)
        .progress_callback(counter.clone())
        .build()
        .unwrap();
    let splitter = Arc::new(FakeSplitter {
        cancel_on_render: Some(cancel.clone()),
        ..FakeSplitter::default().with_pages("a.pdf", 2)
    });
    let oracle = Arc::new(ScriptedOracle::default());

    let report = orchestrator(config, splitter, oracle.clone())
        .with_cancel(cancel)
        .run(&root, false)
        .await
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(oracle.call_count(), 0);
    assert_eq!(report.file(&source).unwrap().status, FileStatus::Cancelled);
    assert_eq!(report.files_cancelled, 1);
    assert_eq!(report.files_skipped, 0);
    assert_eq!(counter.files_skipped.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn progress_callback_sees_every_page() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().canonicalize().unwrap();
    touch(&root, "a.pdf");
    touch(&root, "b.jpg");

    let counter = Arc::new(CountingCallback::default());
    let config = BatchConfig::builder()
        .inter_call_delay_ms(0)
        .progress_callback(counter.clone())
        .build()
        .unwrap();
    let splitter = Arc::new(FakeSplitter::default().with_pages("a.pdf", 2));
    let oracle = Arc::new(ScriptedOracle::default().reply("a.pdf#2", "no table"));

    orchestrator(config, splitter, oracle)
        .run(&root, false)
        .await
        .unwrap();

    assert_eq!(counter.files_started.load(Ordering::SeqCst), 2);
    assert_eq!(counter.pages_ok.load(Ordering::SeqCst), 2);
    assert_eq!(counter.pages_err.load(Ordering::SeqCst), 1);
    assert_eq!(counter.batches_done.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn missing_input_directory_is_fatal() {
    let tmp = tempfile::tempdir().unwrap();
    let result = orchestrator(
        fast_config(),
        Arc::new(FakeSplitter::default()),
        Arc::new(ScriptedOracle::default()),
    )
    .run(&tmp.path().join("does-not-exist"), false)
    .await;

    assert!(matches!(result, Err(Pdf2CsvError::InputNotFound { .. })));
}
