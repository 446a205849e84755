//! Input discovery: enumerate source documents under a root directory.
//!
//! Discovery is purely a naming exercise: files are classified by extension
//! and returned in a stable, sorted order so that reruns visit files in the
//! same sequence. Content validation (PDF magic bytes, image decodability)
//! happens later in [`crate::pipeline::render`], where a bad file can be
//! reported against that file without stopping the scan.

use crate::error::Pdf2CsvError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

/// Name of the per-directory output folder.
pub const OUTPUT_DIR_NAME: &str = "csv";

/// What kind of file a source document is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentKind {
    Pdf,
    Image,
}

impl DocumentKind {
    /// Classify a path by its extension (case-insensitive).
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(DocumentKind::Pdf),
            "jpg" | "jpeg" => Some(DocumentKind::Image),
            _ => None,
        }
    }

    /// Label used in the page hint sent to the model.
    pub fn label(&self) -> &'static str {
        match self {
            DocumentKind::Pdf => "PDF",
            DocumentKind::Image => "JPEG image",
        }
    }
}

/// A discovered input file. Immutable; never modified or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceDocument {
    /// Absolute path to the file.
    pub path: PathBuf,
    pub kind: DocumentKind,
}

impl SourceDocument {
    /// Build a source document from a path, if its extension is supported.
    pub fn from_path(path: impl Into<PathBuf>) -> Option<Self> {
        let path = path.into();
        let kind = DocumentKind::from_path(&path)?;
        Some(Self { path, kind })
    }

    /// Directory holding the source.
    pub fn dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }

    /// File name without extension.
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string())
    }

    /// File name with extension, used as the ledger key in monthly mode.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// `<dir>/csv/` for this source.
    pub fn output_dir(&self) -> PathBuf {
        self.dir().join(OUTPUT_DIR_NAME)
    }
}

/// Validate the input root, returning its canonical absolute path.
pub fn resolve_root(root: &Path) -> Result<PathBuf, Pdf2CsvError> {
    if !root.exists() {
        return Err(Pdf2CsvError::InputNotFound {
            path: root.to_path_buf(),
        });
    }
    if !root.is_dir() {
        return Err(Pdf2CsvError::NotADirectory {
            path: root.to_path_buf(),
        });
    }
    root.canonicalize().map_err(|_| Pdf2CsvError::InputNotFound {
        path: root.to_path_buf(),
    })
}

/// Enumerate candidate files under `root`.
///
/// Only `root` itself is scanned unless `recursive` is set. Output folders
/// (`csv/`) and hidden entries are never descended into. Entries come back
/// sorted by path within each directory.
pub fn discover(root: &Path, recursive: bool) -> Vec<SourceDocument> {
    let max_depth = if recursive { usize::MAX } else { 1 };

    let docs: Vec<SourceDocument> = WalkDir::new(root)
        .max_depth(max_depth)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_excluded(e))
        .filter_map(|entry| match entry {
            Ok(e) => Some(e),
            Err(err) => {
                warn!("Skipping unreadable entry: {}", err);
                None
            }
        })
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| SourceDocument::from_path(e.into_path()))
        .collect();

    debug!("Discovered {} candidate files under {}", docs.len(), root.display());
    docs
}

/// Distinct source directories, in order of first appearance.
pub fn source_dirs(docs: &[SourceDocument]) -> Vec<PathBuf> {
    let mut seen = BTreeSet::new();
    docs.iter()
        .map(|d| d.dir().to_path_buf())
        .filter(|d| seen.insert(d.clone()))
        .collect()
}

fn is_excluded(entry: &DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    if name.starts_with('.') {
        return true;
    }
    entry.file_type().is_dir() && name == OUTPUT_DIR_NAME
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(p: &Path) {
        if let Some(parent) = p.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(p, b"x").unwrap();
    }

    #[test]
    fn kind_from_extension_is_case_insensitive() {
        assert_eq!(DocumentKind::from_path(Path::new("a.PDF")), Some(DocumentKind::Pdf));
        assert_eq!(DocumentKind::from_path(Path::new("a.Jpeg")), Some(DocumentKind::Image));
        assert_eq!(DocumentKind::from_path(Path::new("a.jpg")), Some(DocumentKind::Image));
        assert_eq!(DocumentKind::from_path(Path::new("a.png")), None);
        assert_eq!(DocumentKind::from_path(Path::new("noext")), None);
    }

    #[test]
    fn discover_flat_ignores_subdirectories() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        touch(&root.join("b.pdf"));
        touch(&root.join("a.jpg"));
        touch(&root.join("notes.txt"));
        touch(&root.join("sub/c.pdf"));

        let docs = discover(root, false);
        let names: Vec<String> = docs.iter().map(|d| d.file_name()).collect();
        assert_eq!(names, vec!["a.jpg", "b.pdf"]);
    }

    #[test]
    fn discover_recursive_skips_output_and_hidden_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        touch(&root.join("a.pdf"));
        touch(&root.join("sub/b.jpeg"));
        touch(&root.join("csv/stray.pdf"));
        touch(&root.join(".cache/c.pdf"));

        let docs = discover(root, true);
        let names: Vec<String> = docs.iter().map(|d| d.file_name()).collect();
        assert_eq!(names, vec!["a.pdf", "b.jpeg"]);
        assert_eq!(source_dirs(&docs).len(), 2);
    }

    #[test]
    fn resolve_root_rejects_missing_and_files() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("f.pdf");
        touch(&file);

        assert!(matches!(
            resolve_root(&tmp.path().join("nope")),
            Err(Pdf2CsvError::InputNotFound { .. })
        ));
        assert!(matches!(
            resolve_root(&file),
            Err(Pdf2CsvError::NotADirectory { .. })
        ));
        assert!(resolve_root(tmp.path()).is_ok());
    }

    #[test]
    fn output_dir_is_sibling_csv_folder() {
        let doc = SourceDocument::from_path("/data/2024/report.pdf").unwrap();
        assert_eq!(doc.output_dir(), PathBuf::from("/data/2024/csv"));
        assert_eq!(doc.stem(), "report");
    }
}
