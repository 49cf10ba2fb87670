//! End-to-end engine scenarios against in-memory portal fakes.

mod common;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use judgment_crawler::application::{CrawlEngine, EngineConfig};
use judgment_crawler::domain::{
    DocumentFetcher, DocumentStream, JudgmentRecord, ListingPage, ListingRow, ListingSource,
    RecordSink, ScrapeError,
};
use judgment_crawler::infrastructure::{JudgmentParser, RetryPolicy};

use common::{row, synthetic_pdf};

/// Serves a fixed sequence of listing pages, with optional scripted
/// failures per page.
struct ScriptedListing {
    pages: Vec<ListingPage>,
    failures_left: Mutex<HashMap<u32, u32>>,
    fatal_on: Option<u32>,
}

impl ScriptedListing {
    fn new(pages: Vec<ListingPage>) -> Self {
        Self {
            pages,
            failures_left: Mutex::new(HashMap::new()),
            fatal_on: None,
        }
    }

    fn failing(self, page_index: u32, times: u32) -> Self {
        self.failures_left
            .lock()
            .unwrap()
            .insert(page_index, times);
        self
    }

    fn fatal_on(mut self, page_index: u32) -> Self {
        self.fatal_on = Some(page_index);
        self
    }
}

#[async_trait]
impl ListingSource for ScriptedListing {
    async fn fetch_page(&self, page_index: u32) -> Result<ListingPage, ScrapeError> {
        if self.fatal_on == Some(page_index) {
            return Err(ScrapeError::SessionExpired);
        }
        {
            let mut failures = self.failures_left.lock().unwrap();
            if let Some(left) = failures.get_mut(&page_index) {
                if *left > 0 {
                    *left -= 1;
                    return Err(ScrapeError::Fetch {
                        url: format!("https://portal.example.org/judgments?page={page_index}"),
                        message: "503 Service Unavailable".to_string(),
                    });
                }
            }
        }
        Ok(self
            .pages
            .get(page_index as usize)
            .cloned()
            .unwrap_or(ListingPage {
                page_index,
                rows: Vec::new(),
                has_next: false,
            }))
    }
}

/// Serves synthetic PDFs keyed by URL, with scripted failure budgets.
/// Call counts stay observable through a shared handle after the fetcher
/// moves into the engine.
struct FlakyFetcher {
    documents: HashMap<String, Vec<u8>>,
    failures_left: Mutex<HashMap<String, u32>>,
    calls: Arc<Mutex<HashMap<String, u32>>>,
}

#[derive(Clone)]
struct FetchCalls(Arc<Mutex<HashMap<String, u32>>>);

impl FetchCalls {
    fn for_url(&self, url: &str) -> u32 {
        self.0.lock().unwrap().get(url).copied().unwrap_or(0)
    }
}

impl FlakyFetcher {
    fn for_rows(rows: &[ListingRow]) -> Self {
        let documents = rows
            .iter()
            .map(|row| {
                let text = format!("2025 SCJ 900 Judgment for {}", row.external_id);
                (row.pdf_url.clone(), synthetic_pdf(&[text.as_str()]))
            })
            .collect();
        Self {
            documents,
            failures_left: Mutex::new(HashMap::new()),
            calls: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn failing(self, url: &str, times: u32) -> Self {
        self.failures_left
            .lock()
            .unwrap()
            .insert(url.to_string(), times);
        self
    }

    fn calls(&self) -> FetchCalls {
        FetchCalls(Arc::clone(&self.calls))
    }
}

#[async_trait]
impl DocumentFetcher for FlakyFetcher {
    async fn fetch(&self, row: &ListingRow) -> Result<DocumentStream, ScrapeError> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(row.pdf_url.clone())
            .or_insert(0) += 1;

        {
            let mut failures = self.failures_left.lock().unwrap();
            if let Some(left) = failures.get_mut(&row.pdf_url) {
                if *left > 0 {
                    *left -= 1;
                    return Err(ScrapeError::Fetch {
                        url: row.pdf_url.clone(),
                        message: "connection reset".to_string(),
                    });
                }
            }
        }

        let bytes = self
            .documents
            .get(&row.pdf_url)
            .ok_or_else(|| ScrapeError::Fetch {
                url: row.pdf_url.clone(),
                message: "404 Not Found".to_string(),
            })?;
        DocumentStream::from_bytes(bytes, "judgment.pdf").map_err(|e| ScrapeError::Fetch {
            url: row.pdf_url.clone(),
            message: e.to_string(),
        })
    }
}

/// Keyed in-memory destination table observing upsert order.
#[derive(Default)]
struct MemorySink {
    records: Arc<Mutex<BTreeMap<String, JudgmentRecord>>>,
    upsert_order: Arc<Mutex<Vec<String>>>,
}

#[derive(Clone)]
struct SinkView {
    records: Arc<Mutex<BTreeMap<String, JudgmentRecord>>>,
    upsert_order: Arc<Mutex<Vec<String>>>,
}

impl MemorySink {
    fn view(&self) -> SinkView {
        SinkView {
            records: Arc::clone(&self.records),
            upsert_order: Arc::clone(&self.upsert_order),
        }
    }
}

impl SinkView {
    fn contains(&self, external_id: &str) -> bool {
        self.records.lock().unwrap().contains_key(external_id)
    }

    fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    fn order(&self) -> Vec<String> {
        self.upsert_order.lock().unwrap().clone()
    }

    fn get(&self, external_id: &str) -> Option<JudgmentRecord> {
        self.records.lock().unwrap().get(external_id).cloned()
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    async fn upsert(&self, record: &JudgmentRecord) -> Result<(), ScrapeError> {
        self.records
            .lock()
            .unwrap()
            .insert(record.external_id.clone(), record.clone());
        self.upsert_order
            .lock()
            .unwrap()
            .push(record.external_id.clone());
        Ok(())
    }
}

fn page(page_index: u32, rows: Vec<ListingRow>, has_next: bool) -> ListingPage {
    ListingPage {
        page_index,
        rows,
        has_next,
    }
}

fn fast_config() -> EngineConfig {
    EngineConfig {
        start_page: 1,
        end_page: None,
        page_delay: Duration::from_millis(1),
        retry: RetryPolicy::new(3, Duration::from_millis(5), Duration::from_millis(50)),
    }
}

#[tokio::test(start_paused = true)]
async fn three_page_listing_with_flaky_fetch_upserts_every_row() {
    let rows = vec![
        row("2025 SCJ 101", 0, 0),
        row("2025 SCJ 102", 0, 1),
        row("2025 SCJ 103", 1, 0),
        row("2025 SCJ 104", 1, 1),
    ];
    let listing = ScriptedListing::new(vec![
        page(0, vec![rows[0].clone(), rows[1].clone()], true),
        page(1, vec![rows[2].clone(), rows[3].clone()], true),
        page(2, Vec::new(), false),
    ]);
    let flaky_url = rows[2].pdf_url.clone();
    let fetcher = FlakyFetcher::for_rows(&rows).failing(&flaky_url, 2);
    let calls = fetcher.calls();
    let sink = MemorySink::default();
    let table = sink.view();

    let engine = CrawlEngine::new(
        listing,
        fetcher,
        JudgmentParser::new(),
        sink,
        fast_config(),
        CancellationToken::new(),
    );
    let summary = engine.run().await.unwrap();

    assert_eq!(summary.pages_crawled, 3);
    assert_eq!(summary.rows_seen, 4);
    assert_eq!(summary.records_upserted, 4);
    assert!(summary.rows_skipped.is_empty());
    assert!(summary.pages_skipped.is_empty());
    assert_eq!(table.len(), 4);
    // Two failures, then success on the third attempt.
    assert_eq!(calls.for_url(&flaky_url), 3);
}

#[tokio::test(start_paused = true)]
async fn row_exhausting_its_retry_budget_is_skipped_and_recorded() {
    let rows = vec![
        row("2025 SCJ 101", 0, 0),
        row("2025 SCJ 102", 0, 1),
        row("2025 SCJ 103", 0, 2),
    ];
    let listing = ScriptedListing::new(vec![page(0, rows.clone(), false)]);
    let dead_url = rows[1].pdf_url.clone();
    let fetcher = FlakyFetcher::for_rows(&rows).failing(&dead_url, 99);
    let calls = fetcher.calls();
    let sink = MemorySink::default();
    let table = sink.view();

    let engine = CrawlEngine::new(
        listing,
        fetcher,
        JudgmentParser::new(),
        sink,
        fast_config(),
        CancellationToken::new(),
    );
    let summary = engine.run().await.unwrap();

    assert_eq!(summary.records_upserted, 2);
    assert_eq!(summary.rows_skipped.len(), 1);
    assert_eq!(summary.rows_skipped[0].external_id, "2025 SCJ 102");
    assert!(!table.contains("2025 SCJ 102"));
    assert!(table.contains("2025 SCJ 101"));
    assert!(table.contains("2025 SCJ 103"));
    // The attempt bound was honored exactly.
    assert_eq!(calls.for_url(&dead_url), 3);
}

#[tokio::test(start_paused = true)]
async fn rows_are_processed_in_page_then_row_order() {
    let rows = vec![
        row("2025 SCJ 101", 0, 0),
        row("2025 SCJ 102", 0, 1),
        row("2025 SCJ 103", 1, 0),
    ];
    let listing = ScriptedListing::new(vec![
        page(0, vec![rows[0].clone(), rows[1].clone()], true),
        page(1, vec![rows[2].clone()], false),
    ]);
    let fetcher = FlakyFetcher::for_rows(&rows);
    let sink = MemorySink::default();
    let table = sink.view();

    let engine = CrawlEngine::new(
        listing,
        fetcher,
        JudgmentParser::new(),
        sink,
        fast_config(),
        CancellationToken::new(),
    );
    engine.run().await.unwrap();

    assert_eq!(
        table.order(),
        vec!["2025 SCJ 101", "2025 SCJ 102", "2025 SCJ 103"]
    );
}

#[tokio::test(start_paused = true)]
async fn rerunning_the_crawl_leaves_the_table_unchanged() {
    let rows = vec![row("2025 SCJ 101", 0, 0), row("2025 SCJ 102", 0, 1)];
    let sink = MemorySink::default();
    let table = sink.view();

    let mut sinks = vec![sink];
    for _ in 0..2 {
        let listing = ScriptedListing::new(vec![page(0, rows.clone(), false)]);
        let fetcher = FlakyFetcher::for_rows(&rows);
        let sink = sinks.pop().unwrap_or_else(|| MemorySink {
            records: Arc::clone(&table.records),
            upsert_order: Arc::clone(&table.upsert_order),
        });
        let engine = CrawlEngine::new(
            listing,
            fetcher,
            JudgmentParser::new(),
            sink,
            fast_config(),
            CancellationToken::new(),
        );
        engine.run().await.unwrap();
    }

    // Same keys, same field values; only the write count doubled.
    assert_eq!(table.len(), 2);
    assert_eq!(table.order().len(), 4);
    let record = table.get("2025 SCJ 101").unwrap();
    assert_eq!(record.title, "2025 SCJ 101 v The State");
    assert_eq!(record.page_count, 1);
    assert_eq!(record.source_url, rows[0].pdf_url);
}

#[tokio::test(start_paused = true)]
async fn failed_page_is_recorded_as_gap_and_crawl_continues() {
    let surviving = vec![row("2025 SCJ 103", 1, 0)];
    let listing = ScriptedListing::new(vec![
        page(0, vec![row("2025 SCJ 101", 0, 0)], true),
        page(1, surviving.clone(), false),
    ])
    .failing(0, 99);
    let fetcher = FlakyFetcher::for_rows(&surviving);
    let sink = MemorySink::default();
    let table = sink.view();

    let engine = CrawlEngine::new(
        listing,
        fetcher,
        JudgmentParser::new(),
        sink,
        fast_config(),
        CancellationToken::new(),
    );
    let summary = engine.run().await.unwrap();

    assert_eq!(summary.pages_skipped, vec![1]);
    assert_eq!(summary.records_upserted, 1);
    assert!(table.contains("2025 SCJ 103"));
}

#[tokio::test(start_paused = true)]
async fn cancellation_stops_the_crawl_before_new_work() {
    let rows = vec![row("2025 SCJ 101", 0, 0)];
    let listing = ScriptedListing::new(vec![page(0, rows.clone(), false)]);
    let fetcher = FlakyFetcher::for_rows(&rows);
    let sink = MemorySink::default();
    let table = sink.view();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let engine = CrawlEngine::new(
        listing,
        fetcher,
        JudgmentParser::new(),
        sink,
        fast_config(),
        cancel,
    );
    let summary = engine.run().await.unwrap();

    assert_eq!(summary.pages_crawled, 0);
    assert_eq!(table.len(), 0);
}

#[tokio::test(start_paused = true)]
async fn fatal_session_error_aborts_the_run() {
    let rows = vec![row("2025 SCJ 101", 0, 0)];
    let listing = ScriptedListing::new(vec![page(0, rows.clone(), true)]).fatal_on(1);
    let fetcher = FlakyFetcher::for_rows(&rows);
    let sink = MemorySink::default();
    let table = sink.view();

    let engine = CrawlEngine::new(
        listing,
        fetcher,
        JudgmentParser::new(),
        sink,
        fast_config(),
        CancellationToken::new(),
    );
    let error = engine.run().await.unwrap_err();

    assert!(matches!(error, ScrapeError::SessionExpired));
    // Work done before the failure is kept.
    assert!(table.contains("2025 SCJ 101"));
}
