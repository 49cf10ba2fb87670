//! Reusable retry policy with exponential backoff
//!
//! Retry is a cross-cutting concern (listing pages, PDF downloads, sink
//! writes); it is implemented once here and applied uniformly, rather than
//! duplicated per call site. Delays grow exponentially from a fixed base up
//! to a cap, and the number of attempts is bounded.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// Delay to wait after the given failed attempt (1-based):
    /// `base * 2^(attempt - 1)`, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `op` until it succeeds or the attempt budget is exhausted,
    /// sleeping between attempts. The last error is returned on exhaustion.
    pub async fn run<T, E, Fut, F>(&self, what: &str, op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.run_when(what, |_| true, op).await
    }

    /// Like [`run`](Self::run), but only errors accepted by `should_retry`
    /// consume further attempts; anything else is returned immediately.
    pub async fn run_when<T, E, Fut, F, P>(
        &self,
        what: &str,
        should_retry: P,
        mut op: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let mut attempt = 1u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(error) if !should_retry(&error) => return Err(error),
                Err(error) if attempt >= self.max_attempts => {
                    warn!(
                        "{} failed on final attempt {}/{}: {}",
                        what, attempt, self.max_attempts, error
                    );
                    return Err(error);
                }
                Err(error) => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        "{} failed (attempt {}/{}): {} - retrying in {:?}",
                        what, attempt, self.max_attempts, error, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
