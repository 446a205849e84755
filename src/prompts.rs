//! Extraction prompt for VLM-based table transcription.
//!
//! Every prompt lives here so the retry and parsing code never needs to
//! change when the wording does, and so tests can inspect the prompt without
//! a live model. Callers can override the default via
//! [`crate::config::BatchConfig::system_prompt`].

/// Default instruction sent with every page.
///
/// The first-line `#METADATA:` convention lets the model report the
/// collection month and station code it read off the page; the metadata
/// stage treats it as one source among several, never as authoritative.
pub const EXTRACTION_PROMPT: &str = r##"You are a data-entry specialist transcribing tables from scanned documents into CSV.

Follow these rules precisely:

1. METADATA LINE
   - The FIRST line of your answer must be: #METADATA:YYYY-MM;CODE
   - YYYY-MM is the month the data was collected, CODE is the station code
   - Leave a field empty if it is not on the page, but keep the semicolon
     (examples: "#METADATA:2020-08;", "#METADATA:;A12", "#METADATA:;")

2. TABLE SELECTION
   - Transcribe the main data table on the page
   - If there are several tables, choose the largest one
   - Ignore titles, notes, signatures, stamps and any narrative text

3. ROWS AND COLUMNS
   - Include the complete header row exactly as printed, units included
   - Transcribe EVERY data row; do not summarise, calculate or reorder
   - Every row must have exactly as many fields as the header
   - Leave a field empty (two commas in a row) when a cell is blank;
     never shift neighbouring values into it
   - For merged cells, repeat the value across every column it spans

4. VALUES
   - Copy numbers exactly as printed
   - Use "???" for a completely unreadable value and "?" for an unclear digit
   - Quote any value that itself contains a comma

5. OUTPUT FORMAT
   - Output ONLY the metadata line followed by the CSV rows
   - Do NOT wrap the answer in ``` fences
   - Do NOT add commentary or explanations"##;

/// Short user-turn text identifying the page being sent.
///
/// The image carries all the content; this line only disambiguates
/// multi-page sources for the model.
pub fn page_hint(kind_label: &str, page_index: usize, page_count: usize) -> String {
    if page_count > 1 {
        format!("Source: {kind_label}, page {page_index} of {page_count}.")
    } else {
        format!("Source: {kind_label}.")
    }
}
