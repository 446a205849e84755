//! Output naming: where each page's CSV goes.
//!
//! Per-page names are a pure function of the source path and page position.
//! Monthly names depend on extracted metadata and on which names are already
//! taken, so the namer keeps a claim set: every name written in this run plus
//! every `.csv` already present in an output directory when that directory
//! is first seen.

use crate::config::NamingMode;
use crate::pipeline::input::SourceDocument;
use crate::pipeline::metadata::{Metadata, YearMonth};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Resolves output paths and tracks names claimed during a run.
#[derive(Debug, Clone)]
pub struct OutputNamer {
    mode: NamingMode,
    claimed: HashSet<PathBuf>,
    observed_dirs: HashSet<PathBuf>,
}

impl OutputNamer {
    pub fn new(mode: NamingMode) -> Self {
        Self {
            mode,
            claimed: HashSet::new(),
            observed_dirs: HashSet::new(),
        }
    }

    /// `<dir>/csv/<stem>.csv` for single-page sources,
    /// `<dir>/csv/<stem>_page<N>.csv` otherwise.
    pub fn per_page_path(source: &SourceDocument, page_index: usize, page_count: usize) -> PathBuf {
        let stem = source.stem();
        let name = if page_count <= 1 {
            format!("{stem}.csv")
        } else {
            format!("{stem}_page{page_index}.csv")
        };
        source.output_dir().join(name)
    }

    /// Compute the output path for one page.
    ///
    /// Deterministic for a given claim set. In monthly mode a page without a
    /// month falls back to its per-page name.
    pub fn resolve(
        &self,
        source: &SourceDocument,
        page_index: usize,
        page_count: usize,
        metadata: &Metadata,
    ) -> PathBuf {
        match (self.mode, metadata.month) {
            (NamingMode::Monthly, Some(month)) => self.monthly_path(&source.output_dir(), month),
            _ => Self::per_page_path(source, page_index, page_count),
        }
    }

    /// Record that `path` is taken.
    pub fn claim(&mut self, path: &Path) {
        self.claimed.insert(path.to_path_buf());
    }

    pub fn is_claimed(&self, path: &Path) -> bool {
        self.claimed.contains(path)
    }

    /// Claim every `.csv` already in `dir`, once per directory.
    ///
    /// Only meaningful in monthly mode; per-page names never collide.
    pub fn observe_dir(&mut self, dir: &Path) {
        if self.mode != NamingMode::Monthly || !self.observed_dirs.insert(dir.to_path_buf()) {
            return;
        }
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        let existing: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.extension().map(|e| e.eq_ignore_ascii_case("csv")).unwrap_or(false))
            .collect();
        debug!("{} existing CSV files in {}", existing.len(), dir.display());
        self.claimed.extend(existing);
    }

    fn monthly_path(&self, out_dir: &Path, month: YearMonth) -> PathBuf {
        let base = format!("{}_{}", month.month_name(), month.year);
        let first = out_dir.join(format!("{base}.csv"));
        if !self.is_claimed(&first) {
            return first;
        }
        (2usize..)
            .map(|n| out_dir.join(format!("{base}_{n}.csv")))
            .find(|p| !self.is_claimed(p))
            .unwrap_or(first)
    }
}
