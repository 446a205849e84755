//! CLI binary for edgequake-pdf2csv.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `BatchConfig` and prints results.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use edgequake_pdf2csv::{
    BatchConfig, BatchOrchestrator, BatchProgressCallback, BatchReport, FileStatus,
    ModelSelection, NamingMode, ProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one bar over files, plus a ✓/✗ line per page.
struct CliProgressCallback {
    bar: ProgressBar,
    /// Per-page wall-clock start times, keyed by (source, page).
    start_times: Mutex<HashMap<(PathBuf, usize), Instant>>,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Scanning");
        bar.set_message("Looking for PDF and JPEG files…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
        })
    }

    fn elapsed_secs(&self, source: &Path, page: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&(source.to_path_buf(), page)))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

fn file_label(source: &Path) -> String {
    source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| source.display().to_string())
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_files: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} files  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total_files as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Extracting");
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Found {total_files} files"))
        ));
    }

    fn on_file_start(&self, source: &Path, pending_pages: usize) {
        self.bar.println(format!(
            "{} {}  {}",
            cyan("▸"),
            bold(&file_label(source)),
            dim(&format!("{pending_pages} page(s) to extract"))
        ));
    }

    fn on_file_skipped(&self, source: &Path) {
        self.bar.println(format!(
            "{} {}  {}",
            dim("–"),
            file_label(source),
            dim("already extracted")
        ));
        self.bar.inc(1);
    }

    fn on_page_start(&self, source: &Path, page: usize) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert((source.to_path_buf(), page), Instant::now());
        }
        self.bar
            .set_message(format!("{} p{}", file_label(source), page));
    }

    fn on_page_complete(&self, source: &Path, page: usize, output: &Path) {
        let secs = self.elapsed_secs(source, page);
        self.bar.println(format!(
            "  {} Page {:>3}  → {}  {}",
            green("✓"),
            page,
            file_label(output),
            dim(&format!("{secs:.1}s")),
        ));
    }

    fn on_page_error(&self, source: &Path, page: usize, error: &str) {
        let secs = self.elapsed_secs(source, page);
        // Truncate very long error messages to keep output tidy.
        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} Page {:>3}  {}  {}",
            red("✗"),
            page,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
    }

    fn on_file_complete(&self, source: &Path, status: FileStatus) {
        match status {
            FileStatus::Failed => self
                .bar
                .println(format!("  {} {}", red("✘"), red(&file_label(source)))),
            FileStatus::Cancelled => self.bar.println(format!(
                "  {} {}  {}",
                yellow("■"),
                file_label(source),
                dim("cancelled")
            )),
            _ => {}
        }
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, _report: &BatchReport) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract every PDF/JPEG in a folder into <folder>/csv/
  pdf2csv convert scans/

  # Walk subfolders too, using the more accurate model tier
  pdf2csv convert -r --model accurate archive/

  # Name outputs by collection month (March_2024.csv, …)
  pdf2csv convert --monthly scans/

  # Another provider with an explicit model
  pdf2csv convert --provider openai --model gpt-4.1 scans/

  # Machine-readable report
  pdf2csv convert --json scans/ > report.json

OUTPUT:
  Each page becomes <source-dir>/csv/<stem>_page<N>.csv (<stem>.csv for
  single-page sources). The first line is #METADATA:<YYYY-MM>;<station>,
  fields left empty when unknown. Existing files are never overwritten:
  rerunning a batch only processes what is missing.

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY          Google Gemini API key (default provider)
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  PDFIUM_LIB_PATH         Path to libpdfium (otherwise next to the binary,
                          then the system library path)
  RUST_LOG                Override log filter (e.g. edgequake_pdf2csv=debug)

  A .env file in the working directory is loaded automatically.
"#;

/// Extract tables from scanned PDFs and images into CSV using Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2csv",
    version,
    about = "Extract tables from scanned PDFs and images into CSV using Vision LLMs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert every PDF/JPEG under a directory into CSV files.
    Convert(ConvertArgs),
}

#[derive(Args, Debug)]
struct ConvertArgs {
    /// Directory holding the source documents.
    input_dir: PathBuf,

    /// Also process subdirectories.
    #[arg(short, long, env = "PDF2CSV_RECURSIVE")]
    recursive: bool,

    /// Model tier (fast, accurate) or an explicit model id.
    #[arg(long, env = "PDF2CSV_MODEL", default_value = "fast")]
    model: String,

    /// LLM provider: gemini, openai, anthropic, azure, ollama, …
    #[arg(long, env = "PDF2CSV_PROVIDER", default_value = "gemini")]
    provider: String,

    /// Name outputs <Month>_<Year>.csv by extracted collection month.
    #[arg(long, env = "PDF2CSV_MONTHLY")]
    monthly: bool,

    /// Extraction attempts per page, first try included.
    #[arg(long, env = "PDF2CSV_MAX_ATTEMPTS", default_value_t = 3,
          value_parser = clap::value_parser!(u32).range(1..=10))]
    max_attempts: u32,

    /// Base retry backoff in milliseconds (doubles per attempt).
    #[arg(long, env = "PDF2CSV_RETRY_BACKOFF_MS", default_value_t = 2000)]
    retry_backoff_ms: u64,

    /// Minimum delay between consecutive model calls, in milliseconds.
    #[arg(long, env = "PDF2CSV_DELAY_MS", default_value_t = 1000)]
    delay_ms: u64,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "PDF2CSV_PASSWORD")]
    password: Option<String>,

    /// Path to a text file containing a custom extraction prompt.
    #[arg(long, env = "PDF2CSV_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Print the batch report as JSON on stdout.
    #[arg(long, env = "PDF2CSV_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "PDF2CSV_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDF2CSV_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDF2CSV_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env before clap so env fallbacks see it.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    match cli.command {
        Command::Convert(args) => run_convert(args).await,
    }
}

async fn run_convert(args: ConvertArgs) -> Result<()> {
    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress bar is active;
    // the bar provides all the feedback that matters to the user.
    let show_progress = !args.quiet && !args.no_progress && !args.json;
    let filter = if args.verbose {
        "debug"
    } else if args.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn BatchProgressCallback>)
    } else {
        None
    };
    let config = build_config(&args, progress_cb).await?;

    let orchestrator = BatchOrchestrator::from_config(&config)
        .context("Cannot start extraction")?;

    // ── Ctrl-C: finish the current page, then stop ───────────────────────
    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = Arc::clone(&cancel);
        let quiet = args.quiet;
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.store(true, Ordering::SeqCst);
                if !quiet {
                    eprintln!("{} stopping after the current page…", yellow("⚠"));
                }
            }
        });
    }

    // ── Run batch ────────────────────────────────────────────────────────
    let report = orchestrator
        .with_cancel(cancel)
        .run(&args.input_dir, config.recursive)
        .await
        .with_context(|| format!("Batch failed for {}", args.input_dir.display()))?;

    if args.json {
        let json = serde_json::to_string_pretty(&report).context("Failed to serialise report")?;
        println!("{json}");
    } else if !args.quiet {
        print_summary(&report);
    }

    Ok(())
}

/// Map CLI args to `BatchConfig`.
async fn build_config(args: &ConvertArgs, progress: Option<ProgressCallback>) -> Result<BatchConfig> {
    let system_prompt = if let Some(ref path) = args.system_prompt {
        Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read system prompt from {:?}", path))?,
        )
    } else {
        None
    };

    let model: ModelSelection = args.model.parse().context("Invalid --model")?;

    let mut builder = BatchConfig::builder()
        .recursive(args.recursive)
        .provider_name(args.provider.clone())
        .model(model)
        .max_attempts(args.max_attempts)
        .retry_backoff_ms(args.retry_backoff_ms)
        .inter_call_delay_ms(args.delay_ms)
        .naming(if args.monthly {
            NamingMode::Monthly
        } else {
            NamingMode::PerPage
        });

    if let Some(ref pwd) = args.password {
        builder = builder.password(pwd.clone());
    }
    if let Some(prompt) = system_prompt {
        builder = builder.system_prompt(prompt);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn print_summary(report: &BatchReport) {
    let icon = if report.files_failed == 0 && report.pages_failed == 0 {
        green("✔")
    } else if report.pages_processed == 0 {
        red("✘")
    } else {
        cyan("⚠")
    };

    eprintln!(
        "{}  {} files processed, {} skipped, {} failed  ·  {} CSV written, {} pages failed  ·  {}ms",
        icon,
        bold(&report.files_processed.to_string()),
        report.files_skipped,
        report.files_failed,
        bold(&report.pages_processed.to_string()),
        report.pages_failed,
        report.total_duration_ms,
    );

    for failure in &report.failures {
        let location = match failure.page {
            Some(p) => format!("{} p{}", failure.source.display(), p),
            None => failure.source.display().to_string(),
        };
        eprintln!("   {} {}  {}", red("✗"), location, dim(&failure.reason));
    }

    if report.cancelled {
        eprintln!("{} cancelled; rerun to continue where it stopped", yellow("⚠"));
    }
}
