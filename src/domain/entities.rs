//! Core entities produced and consumed by the pipeline.

use std::io::{Read, Seek, SeekFrom};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tempfile::SpooledTempFile;

use crate::domain::errors::ScrapeError;

/// One entry of the paginated judgments table.
///
/// Immutable once yielded by the crawler; consumed exactly once by the
/// fetch/parse/upsert chain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListingRow {
    /// Stable dedup key: the portal's document number when present,
    /// otherwise derived via [`derive_external_id`].
    pub external_id: String,
    pub title: String,
    /// Portal document number column, when the row carries one.
    pub document_number: Option<String>,
    /// Raw date string as rendered by the portal (normalized at parse time).
    pub published_date: String,
    pub pdf_url: String,
    /// Zero-based listing page this row came from.
    pub page_index: u32,
    pub index_in_page: u32,
}

/// Rows of one listing page plus the pager verdict.
#[derive(Debug, Clone)]
pub struct ListingPage {
    pub page_index: u32,
    pub rows: Vec<ListingRow>,
    /// Whether the page rendered a usable "next" control.
    pub has_next: bool,
}

/// The extracted output entity, keyed by `external_id` for idempotent
/// re-runs: re-processing the same listing row overwrites, never duplicates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JudgmentRecord {
    pub external_id: String,
    pub case_number: Option<String>,
    pub title: String,
    pub judgment_date: Option<NaiveDate>,
    /// Full extracted text of the judgment.
    pub content: String,
    pub page_count: u32,
    pub file_name: String,
    pub source_url: String,
    /// 1-based listing page the row was discovered on.
    pub page_number: u32,
    pub fetched_at: DateTime<Utc>,
}

/// A judgment PDF spooled into a bounded buffer.
///
/// Bytes are written chunk-by-chunk as they arrive and spill to a temp file
/// once the in-memory ceiling is exceeded, so memory stays O(1) relative to
/// document size. A failed download discards the spool; retries restart.
pub struct DocumentStream {
    spool: SpooledTempFile,
    file_name: String,
    len: u64,
}

impl DocumentStream {
    pub fn new(spool: SpooledTempFile, file_name: String, len: u64) -> Self {
        Self {
            spool,
            file_name,
            len,
        }
    }

    /// Build a stream from an in-memory byte buffer. Used by tests and by
    /// callers that already hold the document bytes.
    pub fn from_bytes(bytes: &[u8], file_name: &str) -> std::io::Result<Self> {
        use std::io::Write;
        let mut spool = SpooledTempFile::new(bytes.len().max(1));
        spool.write_all(bytes)?;
        Ok(Self {
            spool,
            file_name: file_name.to_string(),
            len: bytes.len() as u64,
        })
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Rewind and hand the underlying reader to the parser.
    pub fn into_reader(mut self) -> std::io::Result<impl Read + Seek> {
        self.spool.seek(SeekFrom::Start(0))?;
        Ok(self.spool)
    }
}

impl std::fmt::Debug for DocumentStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentStream")
            .field("file_name", &self.file_name)
            .field("len", &self.len)
            .finish()
    }
}

/// Derive a stable dedup key from visible row fields when the portal
/// provides no explicit document number.
pub fn derive_external_id(title: &str, published_date: &str, pdf_url: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(title.trim().as_bytes());
    hasher.update(b"|");
    hasher.update(published_date.trim().as_bytes());
    hasher.update(b"|");
    hasher.update(pdf_url.trim().as_bytes());
    hasher.finalize().to_hex().to_string()
}

/// Outcome of one crawl run, reported to the operator at the end.
#[derive(Debug, Default, Clone, Serialize)]
pub struct RunSummary {
    pub pages_crawled: u32,
    /// Listing pages that exhausted their retry budget.
    pub pages_skipped: Vec<u32>,
    pub rows_seen: u32,
    pub records_upserted: u32,
    /// Rows that failed fetch, parse or upsert, with the reason.
    pub rows_skipped: Vec<SkippedRow>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedRow {
    pub external_id: String,
    pub pdf_url: String,
    pub reason: String,
}

impl RunSummary {
    /// True when nothing was skipped. Partial success still exits zero;
    /// this only drives reporting.
    pub fn is_clean(&self) -> bool {
        self.pages_skipped.is_empty() && self.rows_skipped.is_empty()
    }

    pub fn record_skipped_row(&mut self, row: &ListingRow, error: &ScrapeError) {
        self.rows_skipped.push(SkippedRow {
            external_id: row.external_id.clone(),
            pdf_url: row.pdf_url.clone(),
            reason: error.to_string(),
        });
    }
}
