//! Judgment PDF parsing
//!
//! Text is extracted page by page with lopdf. Note that `Document::load_from`
//! still materializes the parsed object tree, so the bounded-memory guarantee
//! applies to the raw download spool, not to the lopdf document; page-by-page
//! extraction only keeps the decoded text incremental. Parsing is pure with
//! respect to the input bytes (`fetched_at` aside): identical bytes always
//! yield the identical record. A missing required field is a structural
//! failure and is never retried.

use chrono::{NaiveDate, Utc};
use regex::Regex;
use tracing::debug;

use crate::domain::entities::{DocumentStream, JudgmentRecord, ListingRow};
use crate::domain::errors::ScrapeError;
use crate::domain::services::DocumentParser;

/// Citation pattern of the portal's judgments, e.g. "2025 SCJ 101".
const CASE_NUMBER_PATTERN: &str = r"\b(\d{4}\s+SCJ\s+\d+)\b";

/// Date formats the portal renders in the delivered-on column.
const PORTAL_DATE_FORMATS: [&str; 4] = ["%d/%m/%Y", "%Y-%m-%d", "%d-%m-%Y", "%d/%m/%y"];

pub struct JudgmentParser {
    case_number_pattern: Regex,
}

impl JudgmentParser {
    pub fn new() -> Self {
        Self::with_pattern(CASE_NUMBER_PATTERN).expect("valid case number pattern")
    }

    /// Use a portal-specific citation pattern.
    pub fn with_pattern(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            case_number_pattern: Regex::new(pattern)?,
        })
    }
}

impl Default for JudgmentParser {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentParser for JudgmentParser {
    fn parse(
        &self,
        row: &ListingRow,
        stream: DocumentStream,
    ) -> Result<JudgmentRecord, ScrapeError> {
        let external_id = row.external_id.clone();
        let file_name = stream.file_name().to_string();

        let parse_err = |reason: String| ScrapeError::Parse {
            external_id: external_id.clone(),
            reason,
        };

        let reader = stream
            .into_reader()
            .map_err(|e| parse_err(format!("failed to rewind document stream: {e}")))?;
        let document = lopdf::Document::load_from(reader)
            .map_err(|e| parse_err(format!("not a loadable PDF: {e}")))?;

        if document.is_encrypted() {
            return Err(parse_err("document is encrypted".to_string()));
        }

        let pages = document.get_pages();
        let page_count = pages.len() as u32;
        if page_count == 0 {
            return Err(parse_err("document has no pages".to_string()));
        }

        // Page-by-page extraction keeps the decoded text incremental.
        let mut content = String::new();
        for &page_number in pages.keys() {
            let page_text = document
                .extract_text(&[page_number])
                .map_err(|e| parse_err(format!("text extraction failed on page {page_number}: {e}")))?;
            let page_text = page_text.trim();
            if page_text.is_empty() {
                continue;
            }
            if !content.is_empty() {
                content.push_str("\n\n");
            }
            content.push_str(page_text);
        }

        if content.is_empty() {
            return Err(parse_err(
                "no extractable text (scanned or image-only document)".to_string(),
            ));
        }
        if row.title.trim().is_empty() {
            return Err(parse_err("listing row carries no title".to_string()));
        }

        let case_number = row
            .document_number
            .clone()
            .or_else(|| {
                self.case_number_pattern
                    .find(&content)
                    .map(|m| m.as_str().to_string())
            });

        let judgment_date = parse_portal_date(&row.published_date);
        debug!(
            "Parsed '{}': {} pages, {} chars",
            external_id,
            page_count,
            content.len()
        );

        Ok(JudgmentRecord {
            external_id,
            case_number,
            title: row.title.trim().to_string(),
            judgment_date,
            content,
            page_count,
            file_name,
            source_url: row.pdf_url.clone(),
            page_number: row.page_index + 1,
            fetched_at: Utc::now(),
        })
    }
}

/// Parse the portal's delivered-on column, which has appeared in several
/// formats over time.
pub fn parse_portal_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    PORTAL_DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(trimmed, format).ok())
}
