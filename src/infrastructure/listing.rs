//! Listing page retrieval and row extraction
//!
//! Fetches one page of the judgments table at a time through the
//! authenticated session and extracts row metadata with configurable CSS
//! selectors. Termination is indicator-driven: the pager's "next" control
//! (or an empty row set) decides when the crawl ends, never a hardcoded
//! page count.

use std::sync::Arc;

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};
use url::Url;

use crate::domain::entities::{ListingPage, ListingRow, derive_external_id};
use crate::domain::errors::ScrapeError;
use crate::domain::services::ListingSource;
use crate::infrastructure::config::PortalSelectors;
use crate::infrastructure::session::SessionManager;

pub struct ListingClient {
    session: Arc<SessionManager>,
    target_url: String,
    selectors: PortalSelectors,
}

impl ListingClient {
    pub fn new(session: Arc<SessionManager>, target_url: String, selectors: PortalSelectors) -> Self {
        Self {
            session,
            target_url,
            selectors,
        }
    }
}

#[async_trait]
impl ListingSource for ListingClient {
    async fn fetch_page(&self, page_index: u32) -> Result<ListingPage, ScrapeError> {
        let url = page_url(&self.target_url, page_index);
        debug!("Fetching listing page {} from {}", page_index + 1, url);

        let response = self.session.get(&url).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ScrapeError::Fetch {
                url,
                message: format!("listing page answered {status}"),
            });
        }

        let body = response.text().await.map_err(|e| ScrapeError::Fetch {
            url: url.clone(),
            message: e.to_string(),
        })?;

        parse_listing_page(&body, page_index, &self.target_url, &self.selectors)
    }
}

/// Build the URL of one listing page. The portal pager is zero-based
/// (`?page=0` is the first page).
pub fn page_url(target_url: &str, page_index: u32) -> String {
    let separator = if target_url.contains('?') { '&' } else { '?' };
    format!("{target_url}{separator}page={page_index}")
}

/// Extract the rows and the pager verdict from one listing page.
pub fn parse_listing_page(
    html: &str,
    page_index: u32,
    base_url: &str,
    selectors: &PortalSelectors,
) -> Result<ListingPage, ScrapeError> {
    let document = Html::parse_document(html);

    let row_selector = parse_selector(&selectors.row)?;
    let title_selector = parse_selector(&selectors.title)?;
    let number_selector = parse_selector(&selectors.document_number)?;
    let date_selector = parse_selector(&selectors.delivered_on)?;
    let link_selector = parse_selector(&selectors.pdf_link)?;
    let pager_selector = parse_selector(&selectors.next_pager)?;

    let mut rows = Vec::new();
    for element in document.select(&row_selector) {
        let title = select_text(&element, &title_selector).unwrap_or_default();
        let document_number = select_text(&element, &number_selector);
        let published_date = select_text(&element, &date_selector).unwrap_or_default();

        // Rows without a download link reference nothing fetchable; skip
        // them the way the portal's own header/footer rows are skipped.
        let Some(href) = element
            .select(&link_selector)
            .next()
            .and_then(|link| link.value().attr("href"))
        else {
            continue;
        };
        let Some(pdf_url) = resolve_url(href, base_url) else {
            warn!("Unresolvable document link on page {}: {}", page_index + 1, href);
            continue;
        };

        let external_id = document_number
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| derive_external_id(&title, &published_date, &pdf_url));

        rows.push(ListingRow {
            external_id,
            title,
            document_number,
            published_date,
            pdf_url,
            page_index,
            index_in_page: rows.len() as u32,
        });
    }

    let has_next = document.select(&pager_selector).next().is_some();
    debug!(
        "Listing page {}: {} rows, next page {}",
        page_index + 1,
        rows.len(),
        if has_next { "present" } else { "absent" }
    );

    Ok(ListingPage {
        page_index,
        rows,
        has_next,
    })
}

fn parse_selector(selector: &str) -> Result<Selector, ScrapeError> {
    Selector::parse(selector).map_err(|_| ScrapeError::InvalidSelector {
        selector: selector.to_string(),
    })
}

fn select_text(element: &ElementRef, selector: &Selector) -> Option<String> {
    element
        .select(selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|text| !text.is_empty())
}

/// Resolve a possibly relative document link against the listing URL.
fn resolve_url(href: &str, base_url: &str) -> Option<String> {
    if href.starts_with("http://") || href.starts_with("https://") {
        return Some(href.to_string());
    }
    Url::parse(base_url)
        .ok()?
        .join(href)
        .ok()
        .map(|u| u.to_string())
}
