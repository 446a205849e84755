//! Error types for the edgequake-pdf2csv library.
//!
//! Errors are split by the scope of what they stop:
//!
//! * [`Pdf2CsvError`] — **Fatal**: the batch cannot start at all (missing
//!   input directory, missing API credential, pdfium not loadable). Returned
//!   as `Err(Pdf2CsvError)` from the top-level entry points.
//!
//! * [`DocumentError`] — **Per file**: one source document could not be read
//!   or split into pages. The file is reported as failed and the batch moves
//!   on to the next one.
//!
//! * [`PageError`] — **Per page**: extraction, sanitisation or writing failed
//!   for a single page. Stored in [`crate::output::BatchReport`] so callers
//!   can inspect partial success.
//!
//! [`SanitizeError`] and [`OracleError`] are component-local and are folded
//! into [`PageError`] by the orchestrator.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-pdf2csv library.
#[derive(Debug, Error)]
pub enum Pdf2CsvError {
    // ── Invocation errors ─────────────────────────────────────────────────
    /// The input directory does not exist.
    #[error("Input directory not found: '{path}'\nCheck the path exists and is readable.")]
    InputNotFound { path: PathBuf },

    /// The input path exists but is a file, not a directory.
    #[error("Input path is not a directory: '{path}'")]
    NotADirectory { path: PathBuf },

    /// The provider needs an API key that is not set in the environment.
    #[error("Missing API credential for provider '{provider}'.\nSet {var} in the environment or in a .env file.")]
    MissingCredential { provider: String, var: String },

    /// The configured provider could not be constructed.
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium, place the library next to the\n\
pdf2csv executable, or install it in a system library directory.\n"
    )]
    PdfiumBindingFailed(String),

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A source document could not be read or split into pages.
///
/// Splitting is all-or-nothing: any of these means the document produced
/// zero pages.
#[derive(Debug, Error)]
pub enum DocumentError {
    /// The file could not be opened or read.
    #[error("Cannot read '{path}': {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file has a `.pdf` extension but not the `%PDF` magic bytes.
    #[error("File is not a valid PDF: '{path}' (first bytes: {magic:?})")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    /// pdfium could not parse the document.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was configured.
    #[error("PDF '{path}' is encrypted and requires a password (--password)")]
    PasswordRequired { path: PathBuf },

    /// A password was configured but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// The image file could not be decoded.
    #[error("Image '{path}' cannot be decoded: {detail}")]
    CorruptImage { path: PathBuf, detail: String },

    /// pdfium returned an error for one page; the whole document is rejected.
    #[error("Rasterisation failed for page {page} of '{path}': {detail}")]
    RasterisationFailed {
        path: PathBuf,
        page: usize,
        detail: String,
    },

    /// The blocking render task panicked or was cancelled.
    #[error("Render task failed for '{path}': {detail}")]
    TaskFailed { path: PathBuf, detail: String },
}

/// A terminal failure for a single page.
///
/// The batch continues after recording one of these.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// The extraction call failed after all attempts (or permanently).
    #[error("Page {page}: extraction failed after {attempts} attempt(s): {detail}")]
    ExtractionFailed {
        page: usize,
        attempts: u32,
        detail: String,
    },

    /// The model answered but no usable table could be recovered.
    #[error("Page {page}: {reason}")]
    Sanitization { page: usize, reason: String },

    /// The CSV could not be written.
    #[error("Page {page}: failed to write '{path}': {detail}")]
    WriteFailed {
        page: usize,
        path: PathBuf,
        detail: String,
    },
}

impl PageError {
    /// 1-based page number the error refers to.
    pub fn page(&self) -> usize {
        match self {
            PageError::ExtractionFailed { page, .. }
            | PageError::Sanitization { page, .. }
            | PageError::WriteFailed { page, .. } => *page,
        }
    }
}

/// Raw model output could not be turned into a rectangular table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SanitizeError {
    /// No line of the response looked like delimited data.
    #[error("no table found in model response")]
    NoTable,

    /// A header and at least one data row are required.
    #[error("table has {rows} row(s); a header and at least one data row are required")]
    TooFewRows { rows: usize },

    /// Every column was empty.
    #[error("table has no non-empty columns")]
    NoColumns,

    /// A row carries data beyond the table width.
    #[error("row {row} has {found} cells with data past the table width of {expected}")]
    Ragged {
        row: usize,
        expected: usize,
        found: usize,
    },
}

/// Outcome of a single failed oracle attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OracleError {
    /// HTTP 429 or provider quota exhaustion — always retried.
    #[error("rate limit exceeded{}", retry_suffix(.retry_after_secs))]
    RateLimited { retry_after_secs: Option<u64> },

    /// Network blip, timeout or 5xx — retried.
    #[error("transient error: {0}")]
    Transient(String),

    /// Authentication or request error — retrying will not help.
    #[error("permanent error: {0}")]
    Permanent(String),
}

fn retry_suffix(secs: &Option<u64>) -> String {
    secs.map(|s| format!(" (retry after {s}s)")).unwrap_or_default()
}

impl OracleError {
    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, OracleError::Permanent(_))
    }
}
