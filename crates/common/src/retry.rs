use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

/// Fixed-delay retry used for connection establishment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one (at least 1)
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error, or
    /// attempts run out. The last error is returned.
    pub async fn retry<T, E, F, Fut, R>(
        &self,
        name: &str,
        mut operation: F,
        is_retryable: R,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: Fn(&E) -> bool,
        E: Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if !is_retryable(&e) => {
                    error!(operation = name, error = %e, "non-retryable failure");
                    return Err(e);
                }
                Err(e) if attempt >= max_attempts => {
                    error!(
                        operation = name,
                        attempts = attempt,
                        error = %e,
                        "max retry attempts reached"
                    );
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        operation = name,
                        attempt = attempt,
                        max_attempts = max_attempts,
                        delay_ms = self.delay.as_millis() as u64,
                        error = %e,
                        "attempt failed, retrying"
                    );
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
