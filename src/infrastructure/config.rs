//! Configuration infrastructure
//!
//! Settings are loaded from environment variables (with `.env` support via
//! dotenvy). Site-specific details (row selectors, pager control, login
//! form field names) live here as configuration with portal defaults, not
//! as hardcoded assumptions inside parsing code.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

/// Complete runtime configuration for one crawl run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub login_url: String,
    pub target_url: String,
    pub username: String,
    pub password: String,

    pub supabase_url: String,
    pub supabase_service_key: String,
    pub table_name: String,

    /// External HTTP source for one-time codes. Optional: portals without
    /// 2FA never consult it.
    pub totp_endpoint: Option<String>,

    /// 1-based first page to crawl.
    pub start_page: u32,
    /// 1-based inclusive last page; `None` means crawl until the pager
    /// says there is no next page.
    pub end_page: Option<u32>,

    pub max_retries: u32,
    pub download_timeout_ms: u64,
    /// Courtesy delay between listing page requests.
    pub page_delay_ms: u64,
    pub max_requests_per_second: u32,

    pub log_level: String,

    pub selectors: PortalSelectors,
}

/// CSS selectors and form field names for the target portal.
///
/// Defaults match the judgments table layout of the supported portal
/// (Drupal views table with a pager).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortalSelectors {
    /// Selector for one listing row.
    pub row: String,
    /// Selector for the title cell within a row.
    pub title: String,
    /// Selector for the document number cell within a row.
    pub document_number: String,
    /// Selector for the delivered-on date cell within a row.
    pub delivered_on: String,
    /// Selector for the PDF download link within a row.
    pub pdf_link: String,
    /// Selector for the "next page" pager control.
    pub next_pager: String,
    /// Login form field name for the username.
    pub login_username_field: String,
    /// Login form field name for the password.
    pub login_password_field: String,
    /// Selector that identifies a rendered 2FA prompt.
    pub otp_challenge_marker: String,
    /// Form field name for submitting the one-time code.
    pub otp_field: String,
    /// Selector that identifies a rendered login error message.
    pub login_error_marker: String,
}

impl Default for PortalSelectors {
    fn default() -> Self {
        Self {
            row: "table tbody tr".to_string(),
            title: "td.views-field-title, td.views-field.views-field-title".to_string(),
            document_number: "td.views-field-field-document-number-hidden".to_string(),
            delivered_on: "td.views-field-field-delivered-on".to_string(),
            pdf_link: "td.views-field-nothing-1 a.faDownload, td .faDownload".to_string(),
            next_pager: "nav.pager li.pager__item--next a".to_string(),
            login_username_field: "name".to_string(),
            login_password_field: "pass".to_string(),
            otp_challenge_marker:
                "input[name='otp'], input[name='totp'], form.two-factor, #edit-otp".to_string(),
            otp_field: "otp".to_string(),
            login_error_marker: ".messages--error, .alert-danger".to_string(),
        }
    }
}

impl PortalSelectors {
    /// Parse every selector once so misconfiguration surfaces at startup
    /// instead of mid-crawl.
    pub fn validate(&self) -> Result<()> {
        for (name, selector) in [
            ("row", &self.row),
            ("title", &self.title),
            ("document_number", &self.document_number),
            ("delivered_on", &self.delivered_on),
            ("pdf_link", &self.pdf_link),
            ("next_pager", &self.next_pager),
            ("otp_challenge_marker", &self.otp_challenge_marker),
            ("login_error_marker", &self.login_error_marker),
        ] {
            if scraper::Selector::parse(selector).is_err() {
                bail!("invalid CSS selector for '{name}': {selector}");
            }
        }
        Ok(())
    }
}

impl Settings {
    /// Load settings from the environment, honoring a `.env` file when
    /// present. Required: LOGIN_URL, TARGET_URL, LOGIN_USERNAME,
    /// LOGIN_PASSWORD, SUPABASE_URL, SUPABASE_SERVICE_KEY.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let login_url = required_env("LOGIN_URL")?;
        let target_url = required_env("TARGET_URL")?;
        let username = required_env("LOGIN_USERNAME")?;
        let password = required_env("LOGIN_PASSWORD")?;

        let supabase_url = required_env("SUPABASE_URL")?;
        // Service key preferred; anon key accepted as a fallback.
        let supabase_service_key = match optional_env("SUPABASE_SERVICE_KEY") {
            Some(key) => key,
            None => optional_env("SUPABASE_ANON_KEY")
                .context("missing required SUPABASE_SERVICE_KEY (or SUPABASE_ANON_KEY)")?,
        };

        let settings = Self {
            login_url,
            target_url,
            username,
            password,
            supabase_url,
            supabase_service_key,
            table_name: optional_env("TABLE_NAME").unwrap_or_else(|| "judgments".to_string()),
            totp_endpoint: optional_env("TOTP_ENDPOINT"),
            start_page: parsed_env("START_PAGE", 1)?,
            end_page: optional_env("END_PAGE")
                .map(|v| v.parse::<u32>().context("END_PAGE must be a page number"))
                .transpose()?,
            max_retries: parsed_env("MAX_RETRIES", 5)?,
            download_timeout_ms: parsed_env("DOWNLOAD_TIMEOUT", 60_000)?,
            page_delay_ms: parsed_env("PAGE_DELAY", 20_000)?,
            max_requests_per_second: parsed_env("MAX_REQUESTS_PER_SECOND", 2)?,
            log_level: optional_env("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            selectors: PortalSelectors::default(),
        };

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.start_page == 0 {
            bail!("START_PAGE is 1-based and must be at least 1");
        }
        if let Some(end) = self.end_page {
            if end < self.start_page {
                bail!("END_PAGE ({end}) must not precede START_PAGE ({})", self.start_page);
            }
        }
        if self.max_retries == 0 {
            bail!("MAX_RETRIES must be at least 1");
        }
        self.selectors.validate()
    }
}

fn required_env(key: &str) -> Result<String> {
    optional_env(key).with_context(|| format!("missing required environment variable {key}"))
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parsed_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional_env(key) {
        Some(raw) => raw
            .parse::<T>()
            .with_context(|| format!("{key} has an invalid value: {raw}")),
        None => Ok(default),
    }
}
