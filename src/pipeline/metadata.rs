//! Metadata extraction: station code and collection month.
//!
//! Three sources are consulted, in order, and each field is taken from the
//! first source that has it:
//!
//! 1. The `#METADATA:YYYY-MM;CODE` line the prompt asks the model to emit
//! 2. The page's embedded text layer (digital PDFs only)
//! 3. The raw model response itself
//!
//! Within a source, the earliest match in the text wins. Nothing here ever
//! invents a value: absence is `None`, and the CSV header simply leaves the
//! field empty.

use chrono::Month;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A calendar month, rendered as `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    /// Build a year/month, rejecting implausible values.
    pub fn new(year: i32, month: u32) -> Option<Self> {
        ((1900..=2100).contains(&year) && (1..=12).contains(&month)).then_some(Self { year, month })
    }

    /// English month name, e.g. "March".
    pub fn month_name(&self) -> &'static str {
        u8::try_from(self.month)
            .ok()
            .and_then(|m| Month::try_from(m).ok())
            .map(|m| m.name())
            .unwrap_or("Unknown")
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// Metadata attached to one output CSV.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub station_code: Option<String>,
    pub month: Option<YearMonth>,
}

impl Metadata {
    /// Fill absent fields from an earlier page of the same document.
    pub fn inherit(self, prev: &Metadata) -> Metadata {
        Metadata {
            station_code: self.station_code.or_else(|| prev.station_code.clone()),
            month: self.month.or(prev.month),
        }
    }

    /// The first line of every output file.
    pub fn header_line(&self) -> String {
        format!(
            "#METADATA:{};{}",
            self.month.map(|m| m.to_string()).unwrap_or_default(),
            self.station_code.as_deref().unwrap_or("")
        )
    }

    fn fill_from(self, other: Metadata) -> Metadata {
        Metadata {
            station_code: self.station_code.or(other.station_code),
            month: self.month.or(other.month),
        }
    }

    fn is_complete(&self) -> bool {
        self.station_code.is_some() && self.month.is_some()
    }
}

// ── Patterns ─────────────────────────────────────────────────────────────────

static RE_DECLARED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*#METADATA:[ \t]*([^;\r\n]*);([^\r\n]*?)\r?$").unwrap());

static RE_STATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:station|stn)\.?\s*code\s*:\s*([A-Za-z0-9][A-Za-z0-9-]*)").unwrap()
});

static RE_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9-]*$").unwrap());

static RE_MONTH_NAME_YEAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|june?|july?|aug(?:ust)?|sep(?:t(?:ember)?)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?)\.?,?\s+(\d{4})\b",
    )
    .unwrap()
});

static RE_YEAR_FIRST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{4})[-/](\d{1,2})(?:[-/]\d{1,2})?\b").unwrap());

static RE_MONTH_FIRST: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(\d{1,2})/(\d{4})\b").unwrap());

// ── Extraction ───────────────────────────────────────────────────────────────

/// Extract metadata for one page.
///
/// `page_text` is the page's embedded text layer, if any; `raw` is the
/// unsanitised model response. Pure: the same inputs always give the same
/// result.
pub fn extract_metadata(page_text: Option<&str>, raw: &str) -> Metadata {
    let mut meta = declared_metadata(raw);
    if meta.is_complete() {
        return meta;
    }

    if let Some(text) = page_text {
        meta = meta.fill_from(search_text(text));
    }
    if !meta.is_complete() {
        meta = meta.fill_from(search_text(&strip_declared(raw)));
    }
    meta
}

/// Parse the `#METADATA:` line, if the model emitted a well-formed one.
pub fn declared_metadata(raw: &str) -> Metadata {
    let Some(caps) = RE_DECLARED.captures(raw) else {
        return Metadata::default();
    };

    let month = parse_iso_month(caps[1].trim());
    let station = caps[2].trim();
    let station_code = RE_TOKEN.is_match(station).then(|| station.to_string());

    Metadata {
        station_code,
        month,
    }
}

/// Pattern search over free text.
pub fn search_text(text: &str) -> Metadata {
    Metadata {
        station_code: RE_STATION
            .captures(text)
            .map(|caps| caps[1].to_string()),
        month: find_month(text),
    }
}

fn strip_declared(raw: &str) -> String {
    RE_DECLARED.replace_all(raw, "").into_owned()
}

fn parse_iso_month(s: &str) -> Option<YearMonth> {
    let (y, m) = s.split_once('-')?;
    YearMonth::new(y.parse().ok()?, m.parse().ok()?)
}

/// Earliest date-like token in `text` that converts to a valid month.
fn find_month(text: &str) -> Option<YearMonth> {
    let mut candidates: Vec<(usize, YearMonth)> = Vec::new();

    candidates.extend(RE_MONTH_NAME_YEAR.captures_iter(text).filter_map(|caps| {
        let start = caps.get(0)?.start();
        let name = caps[1].get(..3)?;
        let month = Month::from_str(name).ok()?.number_from_month();
        Some((start, YearMonth::new(caps[2].parse().ok()?, month)?))
    }));

    candidates.extend(RE_YEAR_FIRST.captures_iter(text).filter_map(|caps| {
        let start = caps.get(0)?.start();
        Some((
            start,
            YearMonth::new(caps[1].parse().ok()?, caps[2].parse().ok()?)?,
        ))
    }));

    candidates.extend(RE_MONTH_FIRST.captures_iter(text).filter_map(|caps| {
        let start = caps.get(0)?.start();
        Some((
            start,
            YearMonth::new(caps[2].parse().ok()?, caps[1].parse().ok()?)?,
        ))
    }));

    candidates.into_iter().min_by_key(|(start, _)| *start).map(|(_, ym)| ym)
}
