use crate::{CoreError, ErrorExt};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Base delay for exponential backoff (in milliseconds)
    pub base_delay_ms: u64,
    /// Maximum delay between retries (in milliseconds)
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Maximum jitter factor (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryConfig {
    /// Backoff used for LLM batch calls: 1s, 2s, 4s, no jitter.
    pub fn llm_batch() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
        }
    }

    /// Retry config for Reddit API calls. A 429 overrides the computed delay
    /// with the server's `retry-after`, capped at `max_delay_ms`.
    pub fn reddit() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2000,
            max_delay_ms: 60000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.2,
        }
    }

    /// Single attempt, no backoff.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }
}

/// Retry strategy based on error type
#[derive(Debug, Clone, PartialEq)]
pub enum RetryStrategy {
    /// Retry with exponential backoff
    Retry,
    /// Retry after a server-specified delay
    RetryWithDelay(Duration),
    /// Don't retry (permanent failures)
    NoRetry,
}

/// Determine retry strategy based on error type
pub fn get_retry_strategy(error: &CoreError) -> RetryStrategy {
    if !error.is_retryable() {
        return RetryStrategy::NoRetry;
    }
    match error.retry_after() {
        Some(delay) => RetryStrategy::RetryWithDelay(delay),
        None => RetryStrategy::Retry,
    }
}

/// Calculate delay with exponential backoff and jitter
pub fn calculate_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let base_delay = Duration::from_millis(config.base_delay_ms);
    let max_delay = Duration::from_millis(config.max_delay_ms);

    let exponential_delay = if attempt == 0 {
        base_delay
    } else {
        let multiplier = config.backoff_multiplier.powi(attempt as i32);
        let delay_ms = (config.base_delay_ms as f64 * multiplier) as u64;
        Duration::from_millis(delay_ms.min(config.max_delay_ms))
    };

    let jitter_range = (exponential_delay.as_millis() as f64 * config.jitter_factor) as u64;
    let jitter = if jitter_range > 0 {
        fastrand::u64(0..=jitter_range)
    } else {
        0
    };
    let final_delay = exponential_delay + Duration::from_millis(jitter);

    final_delay.min(max_delay)
}

/// Run `operation` until it succeeds, returns a non-retryable error, or
/// `max_attempts` is reached. Sleeps only between attempts; the last error is
/// returned unchanged.
pub async fn retry_async<F, Fut, T>(
    operation_name: &str,
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, CoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CoreError>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    info!(
                        "Operation {} succeeded after {} retries",
                        operation_name, attempt
                    );
                }
                return Ok(result);
            }
            Err(error) => {
                let is_last = attempt + 1 >= max_attempts;
                let delay = match get_retry_strategy(&error) {
                    RetryStrategy::NoRetry => {
                        debug!(
                            "Not retrying {} due to error type: {}",
                            operation_name, error
                        );
                        return Err(error);
                    }
                    _ if is_last => {
                        warn!(
                            "Operation {} failed after {} attempts: {}",
                            operation_name, max_attempts, error
                        );
                        return Err(error);
                    }
                    RetryStrategy::Retry => calculate_delay(attempt, config),
                    RetryStrategy::RetryWithDelay(delay) => {
                        delay.min(Duration::from_millis(config.max_delay_ms))
                    }
                };

                info!(
                    "Retrying {} in {:?} (attempt {}/{}) due to: {}",
                    operation_name,
                    delay,
                    attempt + 2,
                    max_attempts,
                    error
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
