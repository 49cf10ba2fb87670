//! Crawl engine - the page/row processing loop
//!
//! One logical worker walks the listing pages in order; every row runs an
//! independent fetch → parse → upsert chain. A row failure is recorded and
//! skipped, never fatal; only unrecoverable authentication failures abort
//! the run. Cancellation stops new work promptly between pages and rows.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::domain::entities::{ListingRow, RunSummary};
use crate::domain::errors::ScrapeError;
use crate::domain::services::{DocumentFetcher, DocumentParser, ListingSource, RecordSink};
use crate::infrastructure::retry::RetryPolicy;

/// Consecutive listing-page failures tolerated before the crawl gives up
/// on finding further pages.
const MAX_CONSECUTIVE_PAGE_GAPS: u32 = 2;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// 1-based first page to crawl.
    pub start_page: u32,
    /// 1-based inclusive last page; `None` crawls until the pager ends.
    pub end_page: Option<u32>,
    /// Courtesy delay between listing page requests.
    pub page_delay: Duration,
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            start_page: 1,
            end_page: None,
            page_delay: Duration::from_secs(20),
            retry: RetryPolicy::default(),
        }
    }
}

pub struct CrawlEngine<S, F, P, K> {
    listing: S,
    fetcher: F,
    parser: P,
    sink: K,
    config: EngineConfig,
    cancel: CancellationToken,
}

impl<S, F, P, K> CrawlEngine<S, F, P, K>
where
    S: ListingSource,
    F: DocumentFetcher,
    P: DocumentParser,
    K: RecordSink,
{
    pub fn new(
        listing: S,
        fetcher: F,
        parser: P,
        sink: K,
        config: EngineConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            listing,
            fetcher,
            parser,
            sink,
            config,
            cancel,
        }
    }

    /// Crawl from the configured first page until the pager ends, the page
    /// window closes, or cancellation is observed. Fatal errors abort with
    /// `Err`; everything else lands in the returned summary.
    pub async fn run(&self) -> Result<RunSummary, ScrapeError> {
        let mut summary = RunSummary::default();
        // The portal pager is zero-based; configuration is 1-based.
        let mut page_index = self.config.start_page.saturating_sub(1);
        let last_index = self.config.end_page.map(|p| p.saturating_sub(1));
        let mut consecutive_gaps = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                info!("Cancellation observed, stopping page crawl");
                break;
            }
            if let Some(last) = last_index {
                if page_index > last {
                    break;
                }
            }

            info!("Crawling listing page {}", page_index + 1);
            let fetched = self
                .config
                .retry
                .run_when(
                    &format!("listing page {}", page_index + 1),
                    ScrapeError::is_retryable,
                    || self.listing.fetch_page(page_index),
                )
                .await;

            match fetched {
                Ok(page) => {
                    consecutive_gaps = 0;
                    summary.pages_crawled += 1;

                    if page.rows.is_empty() {
                        info!("Listing page {} is empty, crawl complete", page_index + 1);
                        break;
                    }

                    for row in &page.rows {
                        if self.cancel.is_cancelled() {
                            info!("Cancellation observed, ceasing new fetches");
                            return Ok(summary);
                        }
                        summary.rows_seen += 1;
                        self.process_row(row, &mut summary).await?;
                    }

                    if !page.has_next {
                        info!("No next page after page {}, crawl complete", page_index + 1);
                        break;
                    }
                }
                Err(error) if error.is_fatal() => return Err(error),
                Err(error) => {
                    // Page gap: with numeric pagination the next page is
                    // still determinable, so the crawl moves on unless the
                    // portal keeps failing.
                    warn!("Skipping listing page {}: {}", page_index + 1, error);
                    summary.pages_skipped.push(page_index + 1);
                    consecutive_gaps += 1;
                    if consecutive_gaps >= MAX_CONSECUTIVE_PAGE_GAPS {
                        warn!(
                            "{} consecutive page failures, ending crawl",
                            consecutive_gaps
                        );
                        break;
                    }
                }
            }

            page_index += 1;
            self.throttle().await;
        }

        Ok(summary)
    }

    /// Run one row's fetch → parse → upsert chain. Per-row failures are
    /// recorded in the summary; only fatal errors propagate.
    async fn process_row(
        &self,
        row: &ListingRow,
        summary: &mut RunSummary,
    ) -> Result<(), ScrapeError> {
        match self.process_row_inner(row).await {
            Ok(()) => {
                summary.records_upserted += 1;
                Ok(())
            }
            Err(error) if error.is_fatal() => Err(error),
            Err(error) => {
                warn!("Skipping row '{}': {}", row.external_id, error);
                summary.record_skipped_row(row, &error);
                Ok(())
            }
        }
    }

    async fn process_row_inner(&self, row: &ListingRow) -> Result<(), ScrapeError> {
        let stream = self
            .config
            .retry
            .run_when(
                &format!("document fetch '{}'", row.external_id),
                ScrapeError::is_retryable,
                || self.fetcher.fetch(row),
            )
            .await?;

        // Parsing is structural; a bad document never improves on retry.
        let record = self.parser.parse(row, stream)?;

        self.config
            .retry
            .run_when(
                &format!("upsert '{}'", record.external_id),
                ScrapeError::is_retryable,
                || self.sink.upsert(&record),
            )
            .await?;
        Ok(())
    }

    /// Courtesy delay between page requests, cut short by cancellation.
    async fn throttle(&self) {
        if self.config.page_delay.is_zero() {
            return;
        }
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = tokio::time::sleep(self.config.page_delay) => {}
        }
    }
}
