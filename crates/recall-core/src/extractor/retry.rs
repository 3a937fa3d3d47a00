//! ============================================================================
//! Retry Logic - Exponential backoff for model calls
//! ============================================================================
//! Structured-output calls fail transiently (rate limits, timeouts, the model
//! skipping the tool call). This module provides:
//! - Exponential backoff with jitter
//! - Error classification (retryable vs permanent vs rate limited)
//! - A generic async retry driver
//! ============================================================================

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Configuration for model call retry behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first)
    pub max_attempts: u32,
    /// Base delay between retries (will be multiplied by 2^attempt)
    pub base_delay_ms: u64,
    /// Maximum delay between retries
    pub max_delay_ms: u64,
    /// Whether to add jitter to delays
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 8000,
            jitter: true,
        }
    }
}

/// Error classification for retry decisions
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ErrorKind {
    /// Error is likely transient, should retry
    Retryable,
    /// Error is permanent, don't retry
    Permanent,
    /// Rate limited, back off more aggressively
    RateLimited,
}

/// Classify an error message to determine if retry is appropriate
pub fn classify_error(error: &str) -> ErrorKind {
    let lower = error.to_lowercase();

    if lower.contains("rate limit") || lower.contains("too many requests") || lower.contains("429")
    {
        return ErrorKind::RateLimited;
    }

    // Credentials and malformed requests will not fix themselves
    if lower.contains("401")
        || lower.contains("403")
        || lower.contains("unauthorized")
        || lower.contains("invalid api key")
        || lower.contains("invalid_request_error")
        || lower.contains("model not found")
    {
        return ErrorKind::Permanent;
    }

    // Network errors, 5xx and unparsable output are worth another try
    ErrorKind::Retryable
}

/// Calculate delay with exponential backoff and optional jitter
pub fn calculate_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let multiplier = 2u64.saturating_pow(attempt.min(63));
    let base_delay = config.base_delay_ms.saturating_mul(multiplier);
    let capped_delay = base_delay.min(config.max_delay_ms);

    let final_delay = if config.jitter {
        // Add random jitter (0-50% of delay)
        let jitter_factor = 1.0 + rand::random::<f64>() * 0.5;
        (capped_delay as f64 * jitter_factor) as u64
    } else {
        capped_delay
    };

    Duration::from_millis(final_delay)
}

/// Run `op` until it succeeds, fails permanently, or attempts run out.
///
/// Returns the last error message on failure.
pub async fn retry_async<T, F, Fut>(config: &RetryConfig, label: &str, mut op: F) -> Result<T, String>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let attempts = config.max_attempts.max(1);
    let mut last_error = String::new();

    for attempt in 0..attempts {
        if attempt > 0 {
            let delay = calculate_delay(attempt - 1, config);
            debug!("{}: retry attempt {} after {:?}", label, attempt, delay);
            sleep(delay).await;
        }

        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                let error_str = format!("{:#}", e);
                let kind = classify_error(&error_str);
                warn!(
                    "{}: attempt {} failed ({:?}): {}",
                    label,
                    attempt + 1,
                    kind,
                    error_str
                );

                match kind {
                    ErrorKind::Permanent => return Err(error_str),
                    // No point waiting out a rate limit with no attempt left
                    ErrorKind::RateLimited if attempt + 1 < attempts => {
                        let rate_limit_delay = Duration::from_millis(config.max_delay_ms);
                        warn!("{}: rate limited, waiting {:?}", label, rate_limit_delay);
                        sleep(rate_limit_delay).await;
                    }
                    ErrorKind::RateLimited | ErrorKind::Retryable => {}
                }

                last_error = error_str;
            }
        }
    }

    Err(format!(
        "Max attempts ({}) exceeded. Last error: {}",
        attempts, last_error
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            base_delay_ms: 1,
            max_delay_ms: 2,
            jitter: false,
        }
    }

    #[test]
    fn test_error_classification() {
        assert_eq!(classify_error("HTTP 429 Too Many Requests"), ErrorKind::RateLimited);
        assert_eq!(classify_error("rate limit exceeded"), ErrorKind::RateLimited);
        assert_eq!(classify_error("API error 401 Unauthorized"), ErrorKind::Permanent);
        assert_eq!(classify_error("invalid_request_error: bad tool"), ErrorKind::Permanent);
        assert_eq!(classify_error("connection reset"), ErrorKind::Retryable);
        assert_eq!(classify_error("model returned no tool calls"), ErrorKind::Retryable);
    }

    #[test]
    fn test_calculate_delay() {
        let config = RetryConfig {
            jitter: false,
            ..Default::default()
        };

        assert_eq!(calculate_delay(0, &config), Duration::from_millis(500));
        assert_eq!(calculate_delay(1, &config), Duration::from_millis(1000));
        assert_eq!(calculate_delay(2, &config), Duration::from_millis(2000));
        // Capped at max_delay_ms
        assert_eq!(calculate_delay(10, &config), Duration::from_millis(8000));
        assert_eq!(calculate_delay(200, &config), Duration::from_millis(8000));
    }

    #[test]
    fn test_calculate_delay_with_jitter() {
        let config = RetryConfig {
            jitter: true,
            base_delay_ms: 1000,
            max_delay_ms: 10000,
            ..Default::default()
        };

        for _ in 0..10 {
            let delay = calculate_delay(0, &config);
            assert!(delay >= Duration::from_millis(1000));
            assert!(delay <= Duration::from_millis(1500));
        }
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_transient_failure() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = retry_async(&fast_config(3), "test", move || async move {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                anyhow::bail!("connection reset");
            }
            Ok(42)
        })
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_stops_on_permanent_error() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), String> = retry_async(&fast_config(5), "test", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("401 Unauthorized")
        })
        .await;

        assert!(result.unwrap_err().contains("401"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_exhausts_attempts() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), String> = retry_async(&fast_config(3), "test", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("timeout")
        })
        .await;

        let err = result.unwrap_err();
        assert!(err.contains("Max attempts (3) exceeded"));
        assert!(err.contains("timeout"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_rate_limit_on_last_attempt_returns_without_waiting() {
        let config = RetryConfig {
            max_attempts: 1,
            base_delay_ms: 1,
            max_delay_ms: 60_000,
            jitter: false,
        };
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result: Result<(), String> = tokio::time::timeout(
            Duration::from_secs(5),
            retry_async(&config, "test", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                anyhow::bail!("429 rate limit")
            }),
        )
        .await
        .expect("rate limited final attempt should not sleep");

        assert!(result.unwrap_err().contains("429"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
