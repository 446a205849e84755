//! Resume ledger for monthly naming.
//!
//! A per-page name can be computed before extraction, so "does the output
//! exist?" is enough to skip finished work. A monthly name is only known
//! after the model has read the page. The ledger closes that gap: it records
//! which output file each `(source file, page)` produced, and a rerun skips
//! any page whose recorded output still exists.
//!
//! Stored as `csv/.pdf2csv-manifest.json`, rewritten atomically after every
//! page so an interrupted run loses at most the page in flight.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// File name of the ledger inside each output directory.
pub const MANIFEST_FILE_NAME: &str = ".pdf2csv-manifest.json";

const MANIFEST_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    version: u32,
    /// `<source file name>#<page>` → output file name (relative to the csv dir).
    pages: BTreeMap<String, String>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            version: MANIFEST_VERSION,
            pages: BTreeMap::new(),
        }
    }
}

impl Manifest {
    /// Load the ledger from an output directory.
    ///
    /// A missing file is an empty ledger. An unreadable or corrupt one is
    /// logged and treated as empty; the pages it covered are redone but
    /// never overwrite anything, because writes are skip-if-exists.
    pub fn load(out_dir: &Path) -> Self {
        let path = out_dir.join(MANIFEST_FILE_NAME);
        let Ok(text) = std::fs::read_to_string(&path) else {
            return Self::default();
        };
        match serde_json::from_str::<Manifest>(&text) {
            Ok(manifest) => {
                debug!("Resuming from {} ({} pages done)", path.display(), manifest.len());
                manifest
            }
            Err(e) => {
                warn!("Ignoring unreadable manifest {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Output recorded for a page, if its file still exists.
    pub fn completed_output(&self, out_dir: &Path, source_name: &str, page: usize) -> Option<PathBuf> {
        self.pages
            .get(&key(source_name, page))
            .map(|name| out_dir.join(name))
            .filter(|p| p.exists())
    }

    pub fn record(&mut self, source_name: &str, page: usize, output: &Path) {
        if let Some(name) = output.file_name() {
            self.pages
                .insert(key(source_name, page), name.to_string_lossy().into_owned());
        }
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Write the ledger atomically (temp file in the same dir, then rename).
    pub fn save(&self, out_dir: &Path) -> std::io::Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        let mut tmp = tempfile::NamedTempFile::new_in(out_dir)?;
        tmp.write_all(&json)?;
        tmp.persist(out_dir.join(MANIFEST_FILE_NAME))
            .map_err(|e| e.error)?;
        Ok(())
    }
}

fn key(source_name: &str, page: usize) -> String {
    format!("{source_name}#{page}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_and_reload() {
        let tmp = tempfile::tempdir().unwrap();
        let out = tmp.path();
        std::fs::write(out.join("March_2024.csv"), "x").unwrap();

        let mut m = Manifest::default();
        m.record("a.pdf", 1, &out.join("March_2024.csv"));
        m.save(out).unwrap();

        let loaded = Manifest::load(out);
        assert_eq!(loaded, m);
        assert_eq!(loaded.len(), 1);
        assert_eq!(
            loaded.completed_output(out, "a.pdf", 1),
            Some(out.join("March_2024.csv"))
        );
        assert_eq!(loaded.completed_output(out, "a.pdf", 2), None);
    }

    #[test]
    fn deleted_output_is_not_completed() {
        let tmp = tempfile::tempdir().unwrap();
        let mut m = Manifest::default();
        m.record("a.pdf", 1, &tmp.path().join("gone.csv"));
        assert_eq!(m.completed_output(tmp.path(), "a.pdf", 1), None);
    }

    #[test]
    fn corrupt_manifest_loads_empty() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(MANIFEST_FILE_NAME), "{not json").unwrap();
        assert!(Manifest::load(tmp.path()).is_empty());
    }
}
