use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::warn;

use super::error::ApiError;

/// Configuration for retry behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
    /// Base delay in milliseconds for exponential backoff.
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
        }
    }
}

impl RetryConfig {
    /// No automatic retries; the caller decides.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay_ms: 0,
        }
    }

    /// Calculate the delay for a given retry attempt using exponential backoff.
    /// delay = base_delay_ms * 2^(attempt - 1)
    pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
        self.base_delay_ms.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
    }
}

/// Run `op` until it succeeds, fails with a final error, or retries run out.
///
/// Returns the last result together with the number of attempts made. A
/// rate-limit response waits at least as long as the server asked.
pub async fn retry_transport<T, F, Fut>(config: &RetryConfig, mut op: F) -> (Result<T, ApiError>, u32)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return (Ok(value), attempt),
            Err(err) if err.is_retryable() && attempt <= config.max_retries => {
                let delay_ms = config
                    .delay_for_attempt(attempt)
                    .max(err.retry_after_ms().unwrap_or(0));
                warn!(attempt, max = config.max_retries, delay_ms, error = %err, "retrying request");
                sleep(Duration::from_millis(delay_ms)).await;
            }
            Err(err) => return (Err(err), attempt),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn unavailable() -> ApiError {
        ApiError::Status {
            status: 503,
            message: "unavailable".into(),
        }
    }

    #[test]
    fn retry_config_exponential_backoff() {
        let config = RetryConfig {
            max_retries: 5,
            base_delay_ms: 1000,
        };
        assert_eq!(config.delay_for_attempt(1), 1000);
        assert_eq!(config.delay_for_attempt(2), 2000);
        assert_eq!(config.delay_for_attempt(3), 4000);
        assert_eq!(config.delay_for_attempt(4), 8000);
        assert_eq!(config.delay_for_attempt(80), u64::MAX);
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let calls = Cell::new(0);
        let config = RetryConfig {
            max_retries: 3,
            base_delay_ms: 1,
        };
        let (result, attempts) = retry_transport(&config, || {
            calls.set(calls.get() + 1);
            let n = calls.get();
            async move { if n < 3 { Err(unavailable()) } else { Ok(n) } }
        })
        .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let config = RetryConfig {
            max_retries: 2,
            base_delay_ms: 1,
        };
        let (result, attempts) = retry_transport(&config, || async { Err::<(), _>(unavailable()) }).await;
        assert!(result.is_err());
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let (result, attempts) = retry_transport(&RetryConfig::default(), || async {
            Err::<(), _>(ApiError::Status {
                status: 409,
                message: "conflict".into(),
            })
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts, 1);
    }
}
