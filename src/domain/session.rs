//! Login state machine states
//!
//! The browser-style login flow is inherently stateful (cookies, rendered
//! challenges), so it is modeled as an explicit state machine instead of
//! ambient global state. Transitions are driven by the session manager in
//! the infrastructure layer.

use serde::{Deserialize, Serialize};

/// Where the session currently stands in the login flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Unauthenticated,
    /// Primary credentials submitted, response not yet classified.
    CredentialsSubmitted,
    /// The portal rendered a 2FA prompt after the first submit.
    OtpChallenged,
    Authenticated,
    /// Terminal failure state; the run aborts.
    LoginFailed,
}

impl SessionState {
    /// Valid forward transitions. Used to guard against out-of-order
    /// driving of the state machine.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Unauthenticated, CredentialsSubmitted)
                | (CredentialsSubmitted, OtpChallenged)
                | (CredentialsSubmitted, Authenticated)
                | (CredentialsSubmitted, LoginFailed)
                | (OtpChallenged, Authenticated)
                | (OtpChallenged, LoginFailed)
                // Expiry detection sends an authenticated session back to the start.
                | (Authenticated, Unauthenticated)
        )
    }
}
