//! Bounded exponential backoff for provider calls.
//!
//! The delay before attempt `n + 1` is `multiplier * 2^(n-1)` seconds,
//! clamped to `[min_delay, max_delay]`. Only transient failures (timeouts,
//! connection errors, HTTP 429 and 5xx) are retried; everything else fails
//! on the first attempt.

use anyhow::Result;
use reqwest::StatusCode;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::ApiConfig;
use crate::types::BotError;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub multiplier: f64,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(api: &ApiConfig) -> Self {
        Self {
            max_attempts: api.max_retries.max(1),
            multiplier: api.retry_backoff_multiplier.max(0.0),
            min_delay: seconds(api.min_delay_secs),
            max_delay: seconds(api.max_delay_secs),
        }
    }

    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            multiplier: 0.0,
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay to wait after the `attempt`-th failure (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = 2f64.powi(attempt.saturating_sub(1).min(30) as i32);
        let min = self.min_delay.as_secs_f64();
        let max = self.max_delay.as_secs_f64().max(min);
        let raw = self.multiplier * exp;
        let secs = if raw.is_nan() { min } else { raw.clamp(min, max) };
        Duration::from_secs_f64(secs)
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_attempts && is_transient(&e) => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        call = label,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    debug!(call = label, attempt, error = %e, "Giving up");
                    return Err(e);
                }
            }
        }
    }
}

/// Seconds from config as a `Duration`; negative or non-finite values
/// become zero.
fn seconds(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::ZERO)
}

/// Whether an error chain contains a retryable failure.
pub fn is_transient(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        if let Some(bot) = cause.downcast_ref::<BotError>() {
            return bot.is_transient();
        }
        if let Some(http) = cause.downcast_ref::<reqwest::Error>() {
            if http.is_timeout() || http.is_connect() || http.is_request() {
                return true;
            }
            return http.status().is_some_and(is_retryable_status);
        }
        false
    })
}

pub fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Turn an unsuccessful HTTP response into a classified `BotError`.
pub async fn status_error(provider: &str, response: reqwest::Response) -> BotError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = format!("HTTP {status}: {body}");
    if is_retryable_status(status) {
        BotError::Transient {
            provider: provider.to_string(),
            message,
        }
    } else {
        BotError::Provider {
            provider: provider.to_string(),
            message,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
