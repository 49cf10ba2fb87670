//! Binary entrypoint: wire configuration, logging and the pipeline.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use judgment_crawler::application::{CrawlEngine, EngineConfig};
use judgment_crawler::infrastructure::{
    CredentialResolver, HttpClient, HttpClientConfig, JudgmentParser, ListingClient, PdfFetcher,
    RetryPolicy, SessionManager, Settings, SupabaseSink, logging,
};

#[tokio::main]
async fn main() -> ExitCode {
    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("configuration error: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = logging::init_logging(&settings.log_level) {
        eprintln!("{e:#}");
        return ExitCode::FAILURE;
    }

    match run(settings).await {
        // Partial success (skipped rows or pages) still exits zero; only
        // run-fatal conditions are a failure.
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Run aborted: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Build the pipeline and crawl.
async fn run(settings: Settings) -> anyhow::Result<()> {
    let http = Arc::new(HttpClient::new(HttpClientConfig {
        timeout_seconds: 30,
        max_requests_per_second: settings.max_requests_per_second,
        ..Default::default()
    })?);

    let credentials = CredentialResolver::new(
        settings.username.clone(),
        settings.password.clone(),
        settings.totp_endpoint.clone(),
        Arc::clone(&http),
    );
    let session = Arc::new(SessionManager::new(
        Arc::clone(&http),
        credentials,
        settings.login_url.clone(),
        settings.selectors.clone(),
    ));

    let listing = ListingClient::new(
        Arc::clone(&session),
        settings.target_url.clone(),
        settings.selectors.clone(),
    );
    let fetcher = PdfFetcher::new(
        Arc::clone(&session),
        Duration::from_millis(settings.download_timeout_ms),
    );
    let parser = JudgmentParser::new();
    let sink = SupabaseSink::new(
        &settings.supabase_url,
        &settings.supabase_service_key,
        &settings.table_name,
    )?;

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight work");
            signal_token.cancel();
        }
    });

    // Authenticate once per run before any listing request.
    session.login().await?;

    let engine = CrawlEngine::new(
        listing,
        fetcher,
        parser,
        sink,
        EngineConfig {
            start_page: settings.start_page,
            end_page: settings.end_page,
            page_delay: Duration::from_millis(settings.page_delay_ms),
            retry: RetryPolicy {
                max_attempts: settings.max_retries,
                ..Default::default()
            },
        },
        cancel,
    );

    let summary = engine.run().await?;

    info!(
        "Run complete: {} pages crawled, {} rows seen, {} records upserted",
        summary.pages_crawled, summary.rows_seen, summary.records_upserted
    );
    for page in &summary.pages_skipped {
        warn!("Gap: listing page {} was skipped", page);
    }
    for row in &summary.rows_skipped {
        warn!("Gap: row '{}' skipped ({})", row.external_id, row.reason);
    }
    if summary.is_clean() {
        info!("No gaps recorded");
    }

    Ok(())
}
