//! Judgment Crawler - Authenticated court judgment scraping pipeline
//!
//! Logs into a protected judgments portal (handling an OTP second factor
//! sourced from an external endpoint), walks the paginated judgments
//! table, streams each linked PDF through a bounded-memory fetch and a
//! page-by-page text extraction, and upserts the extracted records into a
//! Supabase table keyed by a stable external id.

pub mod application;
pub mod domain;
pub mod infrastructure;
