//! Pipeline stages for document-to-CSV extraction.
//!
//! Each submodule implements exactly one transformation step, so each can
//! be tested on its own and swapped (e.g. a different rendering backend)
//! without touching the others.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ encode ──▶ llm ──▶ postprocess ──▶ naming
//! (scan)    (pages)    (base64)   (VLM)   (sanitise)      (path)
//!                                   │
//!                                   └──▶ metadata (station, month)
//! ```
//!
//! 1. [`input`]    — discover PDF/JPEG files under the input root
//! 2. [`render`]   — split a document into page images; pdfium work runs in
//!    `spawn_blocking`
//! 3. [`encode`]   — base64-wrap each page for the multimodal request body
//! 4. [`llm`]      — call the model with retry, backoff and pacing; the only
//!    stage with network I/O
//! 5. [`postprocess`] — deterministic rules that recover a rectangular table
//! 6. [`metadata`] — station code and collection month for the CSV header
//! 7. [`naming`] / [`manifest`] — output paths and the monthly resume ledger

pub mod encode;
pub mod input;
pub mod llm;
pub mod manifest;
pub mod metadata;
pub mod naming;
pub mod postprocess;
pub mod render;
