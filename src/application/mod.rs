//! Application layer - the crawl run orchestration
//!
//! Coordinates the domain trait seams into the page/row processing loop.

pub mod engine;

pub use engine::{CrawlEngine, EngineConfig};
