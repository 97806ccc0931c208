//! Bounded retry for rate-limited platform calls.
//!
//! Only [`PlatformErrorKind::RateLimited`] is retried. The wait before each
//! retry is the server's `retry_after` hint when present, otherwise an
//! exponential backoff from [`RetryConfig`]. Every other error is returned at
//! once.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use super::error::{PlatformError, PlatformErrorKind};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    /// Retries after the initial attempt.
    pub max_retries: u32,

    /// Backoff before the first retry when the server gives no hint.
    pub initial_delay: Duration,

    /// Cap on any single wait, hinted or not.
    pub max_delay: Duration,

    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// 3 retries; 1s, 2s, 4s without hints; never more than 30s per wait.
    pub const DEFAULT: Self = Self {
        max_retries: 3,
        initial_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(30),
        backoff_multiplier: 2.0,
    };

    /// No retries at all.
    pub const NONE: Self = Self {
        max_retries: 0,
        initial_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
        backoff_multiplier: 1.0,
    };

    pub fn new(
        max_retries: u32,
        initial_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay,
            backoff_multiplier,
        }
    }

    /// Backoff for the given retry (0-indexed), capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = self.backoff_multiplier.powi(attempt as i32);
        let delay_secs = self.initial_delay.as_secs_f64() * multiplier;
        Duration::from_secs_f64(delay_secs.min(self.max_delay.as_secs_f64()))
    }

    /// The wait before retry `attempt`, preferring the server's hint.
    pub fn wait_for(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        match hint {
            Some(hint) => hint.min(self.max_delay),
            None => self.delay_for_attempt(attempt),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Debug)]
pub enum RetryResult<T> {
    Success(T),

    /// Still rate limited after every retry.
    ExhaustedRetries {
        last_error: PlatformError,
        attempts: u32,
    },

    /// A non-retriable error.
    Failed(PlatformError),
}

impl<T> RetryResult<T> {
    pub fn into_result(self) -> Result<T, PlatformError> {
        match self {
            RetryResult::Success(v) => Ok(v),
            RetryResult::ExhaustedRetries { last_error, .. } => Err(last_error),
            RetryResult::Failed(e) => Err(e),
        }
    }
}

/// Runs `operation`, retrying rate-limit errors per `config`.
pub async fn retry_rate_limited<T, F, Fut>(config: RetryConfig, mut operation: F) -> RetryResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PlatformError>>,
{
    let max_attempts = config.max_retries + 1;
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(value) => return RetryResult::Success(value),
            Err(e) => {
                attempt += 1;
                let PlatformErrorKind::RateLimited { retry_after } = e.kind else {
                    return RetryResult::Failed(e);
                };
                if attempt >= max_attempts {
                    return RetryResult::ExhaustedRetries {
                        last_error: e,
                        attempts: attempt,
                    };
                }

                let wait = config.wait_for(attempt - 1, retry_after);
                debug!(?wait, attempt, max_attempts, "Rate limited, waiting before retry");
                tokio::time::sleep(wait).await;
            }
        }
    }
}
