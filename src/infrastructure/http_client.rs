//! HTTP client for authenticated crawling with rate limiting
//!
//! One shared client carries the session cookie jar across login, listing
//! pages and PDF downloads, and funnels every request through a governor
//! rate limiter so the portal is crawled courteously.

use std::num::NonZeroU32;
use std::time::Duration;

use anyhow::{Context, Result};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, direct::NotKeyed};
use governor::{Quota, RateLimiter};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Client, Response};

/// HTTP client configuration for crawling.
#[derive(Debug, Clone, serde::Serialize)]
pub struct HttpClientConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_requests_per_second: u32,
    pub follow_redirects: bool,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            user_agent: "judgment-crawler/0.1 (research use)".to_string(),
            timeout_seconds: 30,
            max_requests_per_second: 2,
            follow_redirects: true,
        }
    }
}

/// Rate-limited HTTP client with a persistent cookie store.
pub struct HttpClient {
    client: Client,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
    config: HttpClientConfig,
}

impl HttpClient {
    /// Create a new HTTP client with the given configuration.
    pub fn new(config: HttpClientConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent).context("Invalid user agent")?,
        );

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .default_headers(headers)
            // The session lives in the cookie jar; it must survive across
            // login, listing and download requests.
            .cookie_store(true)
            .redirect(if config.follow_redirects {
                reqwest::redirect::Policy::limited(10)
            } else {
                reqwest::redirect::Policy::none()
            })
            .build()
            .context("Failed to create HTTP client")?;

        let quota = Quota::per_second(
            NonZeroU32::new(config.max_requests_per_second)
                .context("Rate limit must be greater than 0")?,
        );
        let rate_limiter = RateLimiter::direct(quota);

        Ok(Self {
            client,
            rate_limiter,
            config,
        })
    }

    /// Issue a GET with rate limiting. Status is not checked here: callers
    /// classify the response (login redirects, auth errors) themselves.
    pub async fn get(&self, url: &str) -> Result<Response> {
        self.rate_limiter.until_ready().await;

        tracing::debug!("GET {}", url);
        self.client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch URL: {url}"))
    }

    /// GET with a per-request timeout override, for large document
    /// downloads that outlive the default request timeout.
    pub async fn get_with_timeout(&self, url: &str, timeout: Duration) -> Result<Response> {
        self.rate_limiter.until_ready().await;

        tracing::debug!("GET {} (timeout {:?})", url, timeout);
        self.client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .with_context(|| format!("Failed to fetch URL: {url}"))
    }

    /// Submit a URL-encoded form with rate limiting.
    pub async fn post_form(&self, url: &str, fields: &[(&str, &str)]) -> Result<Response> {
        self.rate_limiter.until_ready().await;

        tracing::debug!("POST {} ({} fields)", url, fields.len());
        self.client
            .post(url)
            .form(fields)
            .send()
            .await
            .with_context(|| format!("Failed to post form to: {url}"))
    }

    /// Get the configuration.
    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }
}
