//! Fixed-backoff retry for transport-level failures.
//!
//! Uploads, submissions and downloads all share the same policy: a small
//! number of attempts with a constant delay in between. Only errors for
//! which [`ComfyUIApiError::is_transport`] holds are repeated; anything
//! the server actually answered is surfaced on the first attempt.

use std::future::Future;
use std::time::Duration;

use crate::api::ComfyUIApiError;

/// Tunable parameters for the fixed-backoff strategy.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Zero is treated as one.
    pub max_attempts: u32,
    /// Delay between consecutive attempts.
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
    /// Whether another attempt should follow a failure on `attempt` (1-based).
    pub fn should_retry(&self, attempt: u32, error: &ComfyUIApiError) -> bool {
        error.is_transport() && attempt < self.max_attempts.max(1)
    }
}

/// Run `op` until it succeeds, fails with a non-transport error, or the
/// policy runs out of attempts. The last error is returned.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut op: F,
) -> Result<T, ComfyUIApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ComfyUIApiError>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if policy.should_retry(attempt, &e) => {
                tracing::warn!(
                    what,
                    attempt,
                    delay_ms = policy.delay.as_millis() as u64,
                    error = %e,
                    "Transport failure, retrying",
                );
                tokio::time::sleep(policy.delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            delay: Duration::from_millis(1),
        }
    }

    async fn transport_error() -> ComfyUIApiError {
        // Port 9 (discard) is closed on test hosts; connecting fails fast.
        let err = reqwest::Client::new()
            .get("http://127.0.0.1:9/")
            .send()
            .await
            .unwrap_err();
        ComfyUIApiError::Request(err)
    }

    #[test]
    fn default_policy_is_three_attempts_one_second_apart() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn transport_errors_are_retried_until_exhausted() {
        let calls = Cell::new(0);
        let result: Result<(), _> = with_retry(&fast(), "test", || {
            calls.set(calls.get() + 1);
            async { Err(transport_error().await) }
        })
        .await;
        assert!(result.unwrap_err().is_transport());
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn api_errors_are_not_retried() {
        let calls = Cell::new(0);
        let result: Result<(), _> = with_retry(&fast(), "test", || {
            calls.set(calls.get() + 1);
            async {
                Err(ComfyUIApiError::ApiError {
                    status: 400,
                    body: "bad".into(),
                })
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn success_after_a_transport_failure() {
        let calls = Cell::new(0);
        let result = with_retry(&fast(), "test", || {
            calls.set(calls.get() + 1);
            let n = calls.get();
            async move {
                if n == 1 {
                    Err(transport_error().await)
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
    }

    #[test]
    fn zero_attempts_means_one() {
        let policy = RetryPolicy {
            max_attempts: 0,
            delay: Duration::ZERO,
        };
        let err = ComfyUIApiError::ApiError {
            status: 500,
            body: String::new(),
        };
        assert!(!policy.should_retry(1, &err));
    }
}
