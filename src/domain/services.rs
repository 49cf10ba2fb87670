//! Trait seams between the crawl engine and its collaborators
//!
//! The engine is generic over these traits; the reqwest/lopdf/Supabase
//! implementations live in the infrastructure layer and tests substitute
//! in-memory fakes.

use async_trait::async_trait;

use crate::domain::entities::{DocumentStream, JudgmentRecord, ListingPage, ListingRow};
use crate::domain::errors::ScrapeError;

/// Walks the paginated judgments table. A fresh crawl always starts at the
/// configured first page; the sequence is not restartable mid-run.
#[async_trait]
pub trait ListingSource: Send + Sync {
    async fn fetch_page(&self, page_index: u32) -> Result<ListingPage, ScrapeError>;
}

/// Downloads one judgment PDF as a bounded-memory stream.
#[async_trait]
pub trait DocumentFetcher: Send + Sync {
    async fn fetch(&self, row: &ListingRow) -> Result<DocumentStream, ScrapeError>;
}

/// Extracts the structured record from a fetched document. Pure with
/// respect to input bytes (`fetched_at` aside); failures are structural
/// and never retried.
pub trait DocumentParser: Send + Sync {
    fn parse(
        &self,
        row: &ListingRow,
        stream: DocumentStream,
    ) -> Result<JudgmentRecord, ScrapeError>;
}

/// Writes records keyed by `external_id`. Upserting an identical record
/// twice must leave the destination in the same observable state.
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn upsert(&self, record: &JudgmentRecord) -> Result<(), ScrapeError>;
}
