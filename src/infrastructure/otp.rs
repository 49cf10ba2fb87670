//! Credential and one-time-password resolution
//!
//! Login credentials come from configuration. One-time codes come from an
//! external HTTP endpoint whose response is loosely typed: JSON with one of
//! a few recognized keys, or plain text containing a code-shaped token.
//! Extraction tries JSON first and falls back to pattern matching, in one
//! place, instead of ad-hoc sniffing at call sites.

use std::sync::Arc;

use regex::Regex;
use serde_json::Value;

use crate::domain::errors::ScrapeError;
use crate::infrastructure::http_client::HttpClient;

/// JSON keys accepted as carrying the one-time code.
const OTP_KEYS: [&str; 4] = ["code", "totp", "token", "otp"];

/// Code-shaped token in free text: 4 to 8 consecutive digits.
const OTP_PATTERN: &str = r"\b\d{4,8}\b";

/// Resolves login credentials and, when challenged, fresh one-time codes.
///
/// OTPs are single-use and short-lived, so no code is ever cached or
/// retried internally; the session manager requests a fresh one per
/// submission attempt.
pub struct CredentialResolver {
    username: String,
    password: String,
    totp_endpoint: Option<String>,
    http: Arc<HttpClient>,
    code_pattern: Regex,
}

impl CredentialResolver {
    pub fn new(
        username: String,
        password: String,
        totp_endpoint: Option<String>,
        http: Arc<HttpClient>,
    ) -> Self {
        Self {
            username,
            password,
            totp_endpoint,
            http,
            // The pattern is a checked constant.
            code_pattern: Regex::new(OTP_PATTERN).expect("valid OTP pattern"),
        }
    }

    /// Primary credentials for the login form.
    pub fn resolve_login(&self) -> (&str, &str) {
        (&self.username, &self.password)
    }

    /// Fetch a fresh one-time code from the configured endpoint.
    pub async fn resolve_otp(&self) -> Result<String, ScrapeError> {
        let endpoint = self
            .totp_endpoint
            .as_deref()
            .ok_or_else(|| ScrapeError::OtpUnavailable {
                reason: "portal requested 2FA but TOTP_ENDPOINT is not configured".to_string(),
            })?;

        let response =
            self.http
                .get(endpoint)
                .await
                .map_err(|e| ScrapeError::OtpUnavailable {
                    reason: format!("request to code source failed: {e}"),
                })?;

        if !response.status().is_success() {
            return Err(ScrapeError::OtpUnavailable {
                reason: format!("code source answered {}", response.status()),
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| ScrapeError::OtpUnavailable {
                reason: format!("failed to read code source response: {e}"),
            })?;

        extract_code(&body, &self.code_pattern).ok_or_else(|| ScrapeError::OtpUnavailable {
            reason: "no recognizable code in response".to_string(),
        })
    }
}

/// Extract a one-time code from a loosely-typed response body.
///
/// JSON bodies are checked for the recognized keys first; anything else is
/// scanned for a code-shaped token.
fn extract_code(body: &str, pattern: &Regex) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if let Some(object) = value.as_object() {
            for key in OTP_KEYS {
                match object.get(key) {
                    Some(Value::String(code)) if !code.trim().is_empty() => {
                        return Some(code.trim().to_string());
                    }
                    Some(Value::Number(code)) => return Some(code.to_string()),
                    _ => {}
                }
            }
            // JSON without a recognized key is not sniffed further.
            return None;
        }
    }

    pattern.find(trimmed).map(|m| m.as_str().to_string())
}
