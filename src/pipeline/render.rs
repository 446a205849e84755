//! Page splitting: turn a source document into page images.
//!
//! ## Why a trait?
//!
//! The orchestrator only needs "how many pages" and "give me these pages".
//! Putting that behind [`PageSplitter`] lets the batch logic be tested with
//! an in-memory splitter, and keeps pdfium out of every test that does not
//! exercise rasterisation itself.
//!
//! ## Why spawn_blocking?
//!
//! pdfium wraps a C++ library that is CPU-bound and not async-aware. The
//! splitter methods are synchronous; the orchestrator moves every call onto
//! the blocking thread pool so the Tokio workers never stall during
//! rendering.
//!
//! ## Why cap pixels, not DPI?
//!
//! Page sizes vary wildly and so do scanner resolutions. `max_rendered_pixels`
//! caps the longest edge regardless of physical size, keeping memory bounded
//! and request bodies within what vision APIs accept.

use crate::error::{DocumentError, Pdf2CsvError};
use crate::pipeline::encode::encode_png;
use crate::pipeline::input::{DocumentKind, SourceDocument};
use image::imageops::FilterType;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

/// Env var naming an explicit pdfium library file.
pub const PDFIUM_LIB_PATH_ENV: &str = "PDFIUM_LIB_PATH";

/// Encoded image bytes plus their MIME type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PagePayload {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// One page of a source document, ready to send to the model.
#[derive(Debug, Clone)]
pub struct Page {
    /// 1-based position within the source document.
    pub index: usize,
    pub payload: PagePayload,
    /// Embedded text layer, when the PDF has one. Scans usually don't.
    pub text: Option<String>,
}

/// Converts a source document into page images.
///
/// All methods are blocking. Errors are all-or-nothing: a document either
/// yields every requested page or none of them.
pub trait PageSplitter: Send + Sync {
    /// Physical page count (1 for images).
    fn page_count(&self, doc: &SourceDocument) -> Result<usize, DocumentError>;

    /// Render the given 1-based page indices, in the order given.
    fn render(&self, doc: &SourceDocument, indices: &[usize]) -> Result<Vec<Page>, DocumentError>;

    /// Render every page of the document.
    fn split(&self, doc: &SourceDocument) -> Result<Vec<Page>, DocumentError> {
        let count = self.page_count(doc)?;
        let all: Vec<usize> = (1..=count).collect();
        self.render(doc, &all)
    }

    /// Called once after discovery with every document about to be processed.
    ///
    /// Lets an implementation fail the whole batch early, e.g. when a native
    /// library it needs is missing.
    fn preflight(&self, docs: &[SourceDocument]) -> Result<(), Pdf2CsvError> {
        let _ = docs;
        Ok(())
    }
}

/// The production splitter: pdfium for PDFs, the `image` crate for JPEGs.
///
/// Stateless apart from its settings. A fresh `Pdfium` is bound per call;
/// the OS caches the library load so repeat binds are cheap.
#[derive(Debug, Clone)]
pub struct DocumentSplitter {
    max_pixels: u32,
    password: Option<String>,
}

impl DocumentSplitter {
    pub fn new(max_pixels: u32, password: Option<String>) -> Self {
        Self {
            max_pixels,
            password,
        }
    }

    fn open_pdf<'a>(
        &'a self,
        pdfium: &'a Pdfium,
        path: &Path,
    ) -> Result<PdfDocument<'a>, DocumentError> {
        check_pdf_magic(path)?;
        pdfium
            .load_pdf_from_file(path, self.password.as_deref())
            .map_err(|e| map_load_error(e, path, self.password.is_some()))
    }

    fn pdf_page_count(&self, path: &Path) -> Result<usize, DocumentError> {
        let pdfium = bind_pdfium(path)?;
        let document = self.open_pdf(&pdfium, path)?;
        Ok(document.pages().len() as usize)
    }

    fn render_pdf(&self, path: &Path, indices: &[usize]) -> Result<Vec<Page>, DocumentError> {
        let pdfium = bind_pdfium(path)?;
        let document = self.open_pdf(&pdfium, path)?;
        let pages = document.pages();
        let total = pages.len() as usize;
        info!("PDF loaded: {} ({} pages)", path.display(), total);

        let render_config = PdfRenderConfig::new()
            .set_target_width(self.max_pixels as i32)
            .set_maximum_height(self.max_pixels as i32);

        let mut out = Vec::with_capacity(indices.len());
        for &index in indices {
            let raster_err = |detail: String| DocumentError::RasterisationFailed {
                path: path.to_path_buf(),
                page: index,
                detail,
            };

            if index == 0 || index > total {
                return Err(raster_err(format!("page out of range (total={total})")));
            }

            let page = pages
                .get((index - 1) as u16)
                .map_err(|e| raster_err(format!("{e:?}")))?;

            let text = page
                .text()
                .ok()
                .map(|t| t.all())
                .filter(|t| !t.trim().is_empty());

            let image = page
                .render_with_config(&render_config)
                .map_err(|e| raster_err(format!("{e:?}")))?
                .as_image();

            debug!(
                "Rendered page {} → {}x{} px",
                index,
                image.width(),
                image.height()
            );

            let bytes = encode_png(&image).map_err(|e| raster_err(e.to_string()))?;
            out.push(Page {
                index,
                payload: PagePayload {
                    bytes,
                    mime_type: "image/png".to_string(),
                },
                text,
            });
        }

        Ok(out)
    }

    fn render_image(&self, path: &Path, indices: &[usize]) -> Result<Vec<Page>, DocumentError> {
        if let Some(&bad) = indices.iter().find(|&&i| i != 1) {
            return Err(DocumentError::RasterisationFailed {
                path: path.to_path_buf(),
                page: bad,
                detail: "images have a single page".to_string(),
            });
        }
        if indices.is_empty() {
            return Ok(Vec::new());
        }

        let bytes = std::fs::read(path).map_err(|source| DocumentError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        let payload = prepare_image(&bytes, self.max_pixels).map_err(|detail| {
            DocumentError::CorruptImage {
                path: path.to_path_buf(),
                detail,
            }
        })?;

        Ok(vec![Page {
            index: 1,
            payload,
            text: None,
        }])
    }
}

impl PageSplitter for DocumentSplitter {
    fn page_count(&self, doc: &SourceDocument) -> Result<usize, DocumentError> {
        match doc.kind {
            DocumentKind::Pdf => self.pdf_page_count(&doc.path),
            DocumentKind::Image => Ok(1),
        }
    }

    fn render(&self, doc: &SourceDocument, indices: &[usize]) -> Result<Vec<Page>, DocumentError> {
        match doc.kind {
            DocumentKind::Pdf => self.render_pdf(&doc.path, indices),
            DocumentKind::Image => self.render_image(&doc.path, indices),
        }
    }

    fn preflight(&self, docs: &[SourceDocument]) -> Result<(), Pdf2CsvError> {
        if docs.iter().any(|d| d.kind == DocumentKind::Pdf) {
            load_pdfium()?;
        }
        Ok(())
    }
}

/// Decode an image, downscaling it when its longest edge exceeds `max_pixels`.
///
/// Images already within budget are forwarded as their original JPEG bytes.
fn prepare_image(bytes: &[u8], max_pixels: u32) -> Result<PagePayload, String> {
    let img: DynamicImage = image::load_from_memory(bytes).map_err(|e| e.to_string())?;

    if img.width().max(img.height()) <= max_pixels {
        return Ok(PagePayload {
            bytes: bytes.to_vec(),
            mime_type: "image/jpeg".to_string(),
        });
    }

    let resized = img.resize(max_pixels, max_pixels, FilterType::Lanczos3);
    debug!(
        "Downscaled image {}x{} → {}x{}",
        img.width(),
        img.height(),
        resized.width(),
        resized.height()
    );
    let png = encode_png(&resized).map_err(|e| e.to_string())?;
    Ok(PagePayload {
        bytes: png,
        mime_type: "image/png".to_string(),
    })
}

fn check_pdf_magic(path: &Path) -> Result<(), DocumentError> {
    let mut magic = [0u8; 4];
    let mut file = std::fs::File::open(path).map_err(|source| DocumentError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;
    let n = file
        .read(&mut magic)
        .map_err(|source| DocumentError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
    if n < 4 || &magic != b"%PDF" {
        return Err(DocumentError::NotAPdf {
            path: path.to_path_buf(),
            magic,
        });
    }
    Ok(())
}

fn map_load_error(e: PdfiumError, path: &Path, had_password: bool) -> DocumentError {
    let msg = format!("{e:?}");
    let lower = msg.to_lowercase();
    if lower.contains("password") || lower.contains("encrypt") {
        if had_password {
            DocumentError::WrongPassword {
                path: path.to_path_buf(),
            }
        } else {
            DocumentError::PasswordRequired {
                path: path.to_path_buf(),
            }
        }
    } else {
        DocumentError::CorruptPdf {
            path: path.to_path_buf(),
            detail: msg,
        }
    }
}

fn bind_pdfium(path: &Path) -> Result<Pdfium, DocumentError> {
    load_pdfium().map_err(|e| DocumentError::CorruptPdf {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })
}

/// Bind to the pdfium dynamic library.
///
/// Discovery order:
/// 1. `PDFIUM_LIB_PATH` env var (explicit path to the library file)
/// 2. Alongside the running executable
/// 3. System library search paths
pub fn load_pdfium() -> Result<Pdfium, Pdf2CsvError> {
    if let Ok(path) = std::env::var(PDFIUM_LIB_PATH_ENV) {
        debug!(path = %path, "Loading pdfium from env var");
        let bindings = Pdfium::bind_to_library(&path)
            .map_err(|e| Pdf2CsvError::PdfiumBindingFailed(format!("{path}: {e}")))?;
        return Ok(Pdfium::new(bindings));
    }

    if let Ok(exe) = std::env::current_exe() {
        if let Some(exe_dir) = exe.parent() {
            let lib_path =
                Pdfium::pdfium_platform_library_name_at_path(exe_dir.to_string_lossy().as_ref());
            if let Ok(bindings) = Pdfium::bind_to_library(&lib_path) {
                debug!(dir = %exe_dir.display(), "Loaded pdfium next to executable");
                return Ok(Pdfium::new(bindings));
            }
        }
    }

    let bindings = Pdfium::bind_to_system_library()
        .map_err(|e| Pdf2CsvError::PdfiumBindingFailed(e.to_string()))?;
    Ok(Pdfium::new(bindings))
}
