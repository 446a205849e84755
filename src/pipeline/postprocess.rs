//! Post-processing: turn raw model output into a rectangular table.
//!
//! ## Why is sanitisation necessary?
//!
//! Even well-prompted models return text that is *almost* CSV:
//!
//! - Wrapped in ` ```csv ... ``` ` fences despite the prompt saying not to
//! - Preceded by a sentence of commentary ("Here is the table:")
//! - Windows `\r\n` line endings, zero-width spaces, a stray BOM
//! - A data row one cell short because a blank cell was dropped
//! - A trailing empty column from a dangling comma on every row
//!
//! None of these should cost a page. The rules below are cheap,
//! deterministic and independently testable; whatever they cannot repair
//! becomes a [`SanitizeError`] and the page is reported as failed.
//!
//! ## Rule Order
//!
//! Line endings and invisible characters are normalised before block
//! selection so a BOM cannot hide a delimiter line; rows are parsed with the
//! `csv` reader before width repair so quoted commas never count as cells.

use crate::error::SanitizeError;
use crate::pipeline::metadata::Metadata;
use std::collections::HashMap;

/// A sanitised table: every row has the same number of cells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRecord {
    rows: Vec<Vec<String>>,
}

impl TableRecord {
    /// Header row first, then data rows.
    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    /// Number of columns.
    pub fn width(&self) -> usize {
        self.rows.first().map(Vec::len).unwrap_or(0)
    }

    /// Render the output file: metadata line, header, data rows.
    ///
    /// Uses `\n` line endings and quotes a cell only when it has to.
    pub fn to_csv(&self, metadata: &Metadata) -> Result<String, csv::Error> {
        let mut writer = csv::WriterBuilder::new()
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(Vec::new());
        for row in &self.rows {
            writer.write_record(row)?;
        }
        let body = writer
            .into_inner()
            .map_err(|e| csv::Error::from(e.into_error()))?;

        let mut out = metadata.header_line();
        out.push('\n');
        out.push_str(&String::from_utf8_lossy(&body));
        Ok(out)
    }
}

/// Apply all sanitisation rules to a raw model response.
///
/// Rules (applied in order):
/// 1. Normalise line endings (CRLF / CR → LF)
/// 2. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 3. Drop code-fence lines and the `#METADATA:` line
/// 4. Keep the longest contiguous block of non-empty lines containing a comma
/// 5. Parse the block as CSV, trim cells, flatten embedded newlines
/// 6. Drop rows whose cells are all empty
/// 7. Normalise every row to the most common width
/// 8. Drop columns that are empty in every row
pub fn sanitize(raw: &str) -> Result<TableRecord, SanitizeError> {
    let s = normalise_line_endings(raw);
    let s = remove_invisible_chars(&s);
    let lines = strip_fences_and_metadata(&s);
    let block = select_table_block(&lines).ok_or(SanitizeError::NoTable)?;

    let rows = parse_rows(&block);
    let rows = drop_empty_rows(rows);
    if rows.len() < 2 {
        return Err(SanitizeError::TooFewRows { rows: rows.len() });
    }

    let rows = normalise_width(rows)?;
    let rows = drop_empty_columns(rows)?;

    Ok(TableRecord { rows })
}

// ── Rule 1: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 2: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 3: Strip fences and the metadata line ──────────────────────────────

fn strip_fences_and_metadata(input: &str) -> Vec<&str> {
    input
        .lines()
        .map(|line| {
            let t = line.trim();
            if t.starts_with("```") || t.starts_with("#METADATA:") {
                ""
            } else {
                line
            }
        })
        .collect()
}

// ── Rule 4: Select the table block ──────────────────────────────────────────
//
// A fence or metadata line blanks out rather than disappearing, so it still
// separates blocks. A line inside an open quoted cell continues the block
// even without a comma. Ties go to the earlier block.

fn select_table_block(lines: &[&str]) -> Option<String> {
    let mut best: Option<(usize, usize)> = None;
    let mut start: Option<usize> = None;
    let mut in_quote = false;

    for i in 0..=lines.len() {
        let is_data = lines
            .get(i)
            .map(|l| in_quote || (!l.trim().is_empty() && l.contains(',')))
            .unwrap_or(false);

        if is_data {
            start.get_or_insert(i);
            in_quote = quote_open_after(lines[i], in_quote);
        } else if let Some(s) = start.take() {
            if best.map(|(bs, be)| i - s > be - bs).unwrap_or(true) {
                best = Some((s, i));
            }
        }
    }

    best.map(|(s, e)| lines[s..e].join("\n"))
}

/// Whether a quoted field is still open at the end of `line`.
///
/// Follows the CSV reader: a quote opens a field only as the field's first
/// character, `""` inside a quoted field is an escaped quote, and any other
/// quote is a literal (an inch mark in `12"`, say).
fn quote_open_after(line: &str, mut in_quote: bool) -> bool {
    let mut at_field_start = !in_quote;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quote {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    chars.next();
                } else {
                    in_quote = false;
                    at_field_start = false;
                }
            }
            continue;
        }
        match c {
            '"' if at_field_start => in_quote = true,
            ',' => at_field_start = true,
            _ => at_field_start = false,
        }
    }
    in_quote
}

// ── Rule 5: Parse rows ──────────────────────────────────────────────────────

fn parse_rows(block: &str) -> Vec<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(block.as_bytes());

    reader
        .records()
        .filter_map(Result::ok)
        .map(|record| record.iter().map(clean_cell).collect())
        .collect()
}

fn clean_cell(cell: &str) -> String {
    if cell.contains('\n') {
        cell.split_whitespace().collect::<Vec<_>>().join(" ")
    } else {
        cell.trim().to_string()
    }
}

// ── Rule 6: Drop empty rows ─────────────────────────────────────────────────

fn drop_empty_rows(rows: Vec<Vec<String>>) -> Vec<Vec<String>> {
    rows.into_iter()
        .filter(|row| row.iter().any(|c| !c.is_empty()))
        .collect()
}

// ── Rule 7: Normalise row width ─────────────────────────────────────────────
//
// The target is the most common width, ties going to the wider. Short rows
// are padded on the right; long rows lose their tail only if it is empty.

fn normalise_width(rows: Vec<Vec<String>>) -> Result<Vec<Vec<String>>, SanitizeError> {
    let mut counts: HashMap<usize, usize> = HashMap::new();
    for row in &rows {
        *counts.entry(row.len()).or_insert(0) += 1;
    }
    let target = counts
        .into_iter()
        .max_by_key(|&(width, count)| (count, width))
        .map(|(width, _)| width)
        .unwrap_or(0);

    rows.into_iter()
        .enumerate()
        .map(|(i, mut row)| {
            if row.len() > target {
                if row[target..].iter().any(|c| !c.is_empty()) {
                    return Err(SanitizeError::Ragged {
                        row: i + 1,
                        expected: target,
                        found: row.len(),
                    });
                }
                row.truncate(target);
            } else {
                row.resize(target, String::new());
            }
            Ok(row)
        })
        .collect()
}

// ── Rule 8: Drop all-empty columns ──────────────────────────────────────────
//
// A column is dropped only when it is empty in every row, header included.
// Partly-empty columns are real data with gaps and stay.

fn drop_empty_columns(rows: Vec<Vec<String>>) -> Result<Vec<Vec<String>>, SanitizeError> {
    let width = rows.first().map(Vec::len).unwrap_or(0);
    let keep: Vec<bool> = (0..width)
        .map(|col| rows.iter().any(|row| !row[col].is_empty()))
        .collect();

    if !keep.iter().any(|&k| k) {
        return Err(SanitizeError::NoColumns);
    }

    Ok(rows
        .into_iter()
        .map(|row| {
            row.into_iter()
                .zip(keep.iter())
                .filter_map(|(cell, &k)| k.then_some(cell))
                .collect()
        })
        .collect())
}
