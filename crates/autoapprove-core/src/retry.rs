//! Retry with exponential backoff for collaborator clients.
//!
//! Clients own their retry policy; the engine never retries. A failure is
//! retried only when the error classifies itself as transient through
//! [`Retryable`], and a server-supplied retry hint overrides the computed
//! delay (still capped).

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::domain::{HostingError, ModelError};

/// Errors that know whether a repeat of the same request may succeed.
pub trait Retryable {
    fn is_retryable(&self) -> bool;

    /// Delay the server asked for, if any.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl Retryable for HostingError {
    fn is_retryable(&self) -> bool {
        HostingError::is_retryable(self)
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            HostingError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl Retryable for ModelError {
    fn is_retryable(&self) -> bool {
        ModelError::is_retryable(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first (at least 1).
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles after each failure.
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay after failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    /// The last error is returned unchanged.
    pub async fn run<F, Fut, T, E>(&self, operation: &str, op: F) -> Result<T, E>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + std::fmt::Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < max_attempts && err.is_retryable() => {
                    let delay = err
                        .retry_after()
                        .map(|d| d.min(self.max_delay))
                        .unwrap_or_else(|| self.backoff(attempt));
                    warn!(
                        event = "retry.scheduled",
                        operation,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying after transient failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
