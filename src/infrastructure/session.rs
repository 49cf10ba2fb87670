//! Session manager driving the portal login state machine
//!
//! `Unauthenticated → CredentialsSubmitted → OtpChallenged → Authenticated`,
//! with `LoginFailed` as the terminal failure state. The authenticated
//! transport is the shared cookie-jar HTTP client; expiry mid-crawl
//! (redirect back to the login page or an auth-error status) triggers
//! exactly one serialized re-authentication before the run aborts.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use reqwest::{Response, StatusCode, Url};
use scraper::{Html, Selector};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::domain::errors::ScrapeError;
use crate::domain::session::SessionState;
use crate::infrastructure::config::PortalSelectors;
use crate::infrastructure::http_client::HttpClient;
use crate::infrastructure::otp::CredentialResolver;

/// OTP mismatches tolerated before the login is declared failed.
const MAX_OTP_ATTEMPTS: u32 = 3;

pub struct SessionManager {
    http: Arc<HttpClient>,
    credentials: CredentialResolver,
    login_url: String,
    login_page: Option<Url>,
    selectors: PortalSelectors,
    state: RwLock<SessionState>,
    /// Bumped on every successful login; lets concurrent expiry observers
    /// detect that somebody else already re-authenticated.
    auth_epoch: AtomicU64,
    reauth: Mutex<()>,
}

/// Classification of the page rendered after a credential or OTP submit.
#[derive(Debug, PartialEq, Eq)]
enum LoginOutcome {
    Authenticated,
    OtpChallenged,
    Rejected(String),
}

impl SessionManager {
    pub fn new(
        http: Arc<HttpClient>,
        credentials: CredentialResolver,
        login_url: String,
        selectors: PortalSelectors,
    ) -> Self {
        let login_page = Url::parse(&login_url).ok();
        Self {
            http,
            credentials,
            login_url,
            login_page,
            selectors,
            state: RwLock::new(SessionState::Unauthenticated),
            auth_epoch: AtomicU64::new(0),
            reauth: Mutex::new(()),
        }
    }

    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    /// Drive the full login flow to `Authenticated` or a terminal error.
    pub async fn login(&self) -> Result<(), ScrapeError> {
        self.set_state(SessionState::Unauthenticated).await;

        let (username, password) = self.credentials.resolve_login();
        let username = username.to_string();

        info!("Submitting credentials to {}", self.login_url);
        let response = self
            .http
            .post_form(
                &self.login_url,
                &[
                    (self.selectors.login_username_field.as_str(), username.as_str()),
                    (self.selectors.login_password_field.as_str(), password),
                ],
            )
            .await
            .map_err(|e| ScrapeError::Fetch {
                url: self.login_url.clone(),
                message: e.to_string(),
            })?;
        self.set_state(SessionState::CredentialsSubmitted).await;

        let body = response.text().await.map_err(|e| ScrapeError::Fetch {
            url: self.login_url.clone(),
            message: e.to_string(),
        })?;

        match classify_login_response(&body, &self.selectors) {
            LoginOutcome::Authenticated => {
                self.mark_authenticated().await;
                Ok(())
            }
            LoginOutcome::OtpChallenged => {
                info!("Portal rendered a 2FA challenge");
                self.set_state(SessionState::OtpChallenged).await;
                self.submit_otp_codes().await
            }
            LoginOutcome::Rejected(reason) => {
                self.set_state(SessionState::LoginFailed).await;
                Err(ScrapeError::LoginRejected { username, reason })
            }
        }
    }

    /// Submit fresh one-time codes until one is accepted or the attempt
    /// bound is hit. Codes are single-use; a stale code is never resent.
    async fn submit_otp_codes(&self) -> Result<(), ScrapeError> {
        for attempt in 1..=MAX_OTP_ATTEMPTS {
            let code = self.credentials.resolve_otp().await?;

            let response = self
                .http
                .post_form(&self.login_url, &[(self.selectors.otp_field.as_str(), code.as_str())])
                .await
                .map_err(|e| ScrapeError::Fetch {
                    url: self.login_url.clone(),
                    message: e.to_string(),
                })?;
            let body = response.text().await.map_err(|e| ScrapeError::Fetch {
                url: self.login_url.clone(),
                message: e.to_string(),
            })?;

            match classify_login_response(&body, &self.selectors) {
                LoginOutcome::Authenticated => {
                    self.mark_authenticated().await;
                    return Ok(());
                }
                outcome => {
                    warn!(
                        "OTP submission not accepted (attempt {}/{}): {:?}",
                        attempt, MAX_OTP_ATTEMPTS, outcome
                    );
                }
            }
        }

        self.set_state(SessionState::LoginFailed).await;
        Err(ScrapeError::LoginFailed {
            attempts: MAX_OTP_ATTEMPTS,
        })
    }

    /// Authenticated GET carrying the session cookie jar. On expiry
    /// detection, re-authenticates once (serialized across callers) and
    /// replays the request; a second expiry is run-fatal.
    pub async fn get(&self, url: &str) -> Result<Response, ScrapeError> {
        self.get_with_timeout(url, None).await
    }

    pub async fn get_with_timeout(
        &self,
        url: &str,
        timeout: Option<Duration>,
    ) -> Result<Response, ScrapeError> {
        let observed_epoch = self.auth_epoch.load(Ordering::SeqCst);

        let response = self.raw_get(url, timeout).await?;
        if !self.looks_expired(&response) {
            return Ok(response);
        }

        warn!("Session expiry detected while fetching {}", url);
        self.reauthenticate(observed_epoch).await?;

        let response = self.raw_get(url, timeout).await?;
        if self.looks_expired(&response) {
            error!("Still unauthenticated after re-login; aborting run");
            return Err(ScrapeError::SessionExpired);
        }
        Ok(response)
    }

    async fn raw_get(&self, url: &str, timeout: Option<Duration>) -> Result<Response, ScrapeError> {
        let result = match timeout {
            Some(t) => self.http.get_with_timeout(url, t).await,
            None => self.http.get(url).await,
        };
        result.map_err(|e| ScrapeError::Fetch {
            url: url.to_string(),
            message: e.to_string(),
        })
    }

    /// Expiry heuristics: auth-error status, or a redirect that landed back
    /// on the login page.
    fn looks_expired(&self, response: &Response) -> bool {
        if matches!(
            response.status(),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        ) {
            return true;
        }
        if let Some(login) = &self.login_page {
            let landed = response.url();
            return landed.host_str() == login.host_str() && landed.path() == login.path();
        }
        false
    }

    /// Single re-authentication attempt, serialized: only one caller logs
    /// in, others wait on the mutex and observe the bumped epoch.
    async fn reauthenticate(&self, observed_epoch: u64) -> Result<(), ScrapeError> {
        let _guard = self.reauth.lock().await;

        if self.auth_epoch.load(Ordering::SeqCst) > observed_epoch {
            debug!("Session already refreshed by another caller");
            return Ok(());
        }

        info!("Re-authenticating after session expiry");
        self.login().await.map_err(|e| {
            error!("Re-authentication failed: {e}");
            ScrapeError::SessionExpired
        })
    }

    async fn mark_authenticated(&self) {
        self.set_state(SessionState::Authenticated).await;
        self.auth_epoch.fetch_add(1, Ordering::SeqCst);
        info!("Login complete, session established");
    }

    async fn set_state(&self, next: SessionState) {
        let mut state = self.state.write().await;
        // Restarting the machine from any state is allowed; other
        // off-script transitions are logged for diagnosis.
        if *state != next
            && next != SessionState::Unauthenticated
            && !state.can_transition_to(next)
        {
            debug!("Unusual session transition {:?} -> {:?}", *state, next);
        }
        *state = next;
    }
}

/// Classify the page rendered after a login-form submission.
fn classify_login_response(html: &str, selectors: &PortalSelectors) -> LoginOutcome {
    let document = Html::parse_document(html);

    if let Ok(otp_marker) = Selector::parse(&selectors.otp_challenge_marker) {
        if document.select(&otp_marker).next().is_some() {
            return LoginOutcome::OtpChallenged;
        }
    }

    if let Ok(error_marker) = Selector::parse(&selectors.login_error_marker) {
        if let Some(element) = document.select(&error_marker).next() {
            let message = element.text().collect::<String>().trim().to_string();
            let reason = if message.is_empty() {
                "portal reported a login error".to_string()
            } else {
                message
            };
            return LoginOutcome::Rejected(reason);
        }
    }

    LoginOutcome::Authenticated
}
