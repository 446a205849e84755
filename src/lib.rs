//! # edgequake-pdf2csv
//!
//! Extract tables from scanned PDF and JPEG documents into CSV using Vision
//! Language Models (VLMs).
//!
//! ## Why this crate?
//!
//! Field monitoring data often survives only as scanned sheets: a station
//! code and a month in the heading, then a grid of readings. OCR engines
//! lose the grid; table extractors need a text layer that scans don't have.
//! This crate renders each page to an image, asks a VLM to transcribe the
//! main table as CSV, and then deterministically repairs whatever the model
//! got almost right, so every output file is a rectangular table headed by a
//! `#METADATA:<YYYY-MM>;<station>` line.
//!
//! ## Pipeline Overview
//!
//! ```text
//! input dir
//!  │
//!  ├─ 1. Discover  pdf / jpg / jpeg files, sorted (optionally recursive)
//!  ├─ 2. Skip      pages whose CSV already exists
//!  ├─ 3. Render    pages via pdfium / image (spawn_blocking)
//!  ├─ 4. Extract   one VLM call per page, bounded retries, fixed pacing
//!  ├─ 5. Sanitise  fences, commentary, ragged rows, empty columns
//!  ├─ 6. Metadata  station code + collection month
//!  └─ 7. Write     <dir>/csv/<stem>_page<N>.csv (never overwrites)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_pdf2csv::{convert_directory, BatchConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Gemini by default; needs GEMINI_API_KEY
//!     let config = BatchConfig::default();
//!     let report = convert_directory("scans/", &config).await?;
//!     for failure in &report.failures {
//!         eprintln!("{}: {}", failure.source.display(), failure.reason);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2csv` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-pdf2csv = { version = "0.1", default-features = false }
//! ```
//!
//! ## Choosing a Model
//!
//! | Tier | gemini | openai | anthropic |
//! |------|--------|--------|-----------|
//! | `fast` (default) | `gemini-2.0-flash` | `gpt-4.1-mini` | `claude-haiku-4-20250514` |
//! | `accurate` | `gemini-2.5-pro` | `gpt-4.1` | `claude-sonnet-4-20250514` |
//!
//! Any other provider needs an explicit model id.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{BatchConfig, BatchConfigBuilder, ModelSelection, ModelTier, NamingMode, RetryPolicy};
pub use convert::{convert_directory, convert_directory_sync, BatchOrchestrator};
pub use error::{DocumentError, OracleError, PageError, Pdf2CsvError, SanitizeError};
pub use output::{BatchReport, FailedItem, FileOutcome, FileStatus};
pub use pipeline::llm::{ExtractionClient, ExtractionOracle, ExtractionResult, ExtractionStatus, OracleRequest};
pub use pipeline::metadata::{Metadata, YearMonth};
pub use pipeline::postprocess::TableRecord;
pub use pipeline::render::{DocumentSplitter, Page, PagePayload, PageSplitter};
pub use pipeline::input::{DocumentKind, SourceDocument};
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
