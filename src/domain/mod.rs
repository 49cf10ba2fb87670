//! Domain module - Core entities, error taxonomy and trait seams
//!
//! This module contains the data model of the pipeline and the traits the
//! crawl engine is written against. No I/O happens here.

pub mod entities;
pub mod errors;
pub mod services;
pub mod session;

// Re-export commonly used items
pub use entities::{
    DocumentStream, JudgmentRecord, ListingPage, ListingRow, RunSummary, SkippedRow,
    derive_external_id,
};
pub use errors::ScrapeError;
pub use services::{DocumentFetcher, DocumentParser, ListingSource, RecordSink};
pub use session::SessionState;
