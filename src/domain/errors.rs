//! Error taxonomy for the crawling pipeline
//!
//! Authentication failures are run-fatal (after the single re-auth attempt),
//! per-document failures are retried or skipped without aborting the crawl.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScrapeError {
    #[error("login rejected for user '{username}': {reason}")]
    LoginRejected { username: String, reason: String },

    #[error("one-time password unavailable: {reason}")]
    OtpUnavailable { reason: String },

    #[error("login failed after {attempts} OTP attempts")]
    LoginFailed { attempts: u32 },

    #[error("session expired and re-authentication failed")]
    SessionExpired,

    #[error("fetch failed for {url}: {message}")]
    Fetch { url: String, message: String },

    #[error("not a PDF document at {url}: {reason}")]
    InvalidDocument { url: String, reason: String },

    #[error("parse failed for '{external_id}': {reason}")]
    Parse { external_id: String, reason: String },

    #[error("upsert failed for '{external_id}': {message}")]
    Upsert { external_id: String, message: String },

    #[error("invalid CSS selector '{selector}'")]
    InvalidSelector { selector: String },
}

impl ScrapeError {
    /// Whether another attempt is worth making. Structurally bad content
    /// (`Parse`) and authentication failures are not transient.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ScrapeError::Fetch { .. }
                | ScrapeError::InvalidDocument { .. }
                | ScrapeError::Upsert { .. }
        )
    }

    /// Whether the whole run must stop. Per-row failures are never fatal.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ScrapeError::LoginRejected { .. }
                | ScrapeError::OtpUnavailable { .. }
                | ScrapeError::LoginFailed { .. }
                | ScrapeError::SessionExpired
        )
    }
}
