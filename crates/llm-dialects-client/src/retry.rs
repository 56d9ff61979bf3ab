//! Bounded retry for side-effecting helper calls.
//!
//! Completion calls themselves are never retried here. Helpers that call a
//! provider on the model's behalf (image generation, a tool's own HTTP
//! request) wrap the call in [`with_retry`] so a transient failure does not
//! abort the whole turn.

use std::future::Future;
use std::time::Duration;

use llm_dialects::LlmError;

/// How many times to try and how long to wait between tries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Fixed delay between attempts.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

/// Runs `op` until it succeeds, fails with a non-retryable error, or the
/// attempts run out. The last error is returned unchanged.
///
/// `op` receives the 1-based attempt number.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, LlmError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < attempts => {
                tracing::warn!(attempt, max_attempts = attempts, error = %err, "retrying side call");
                tokio::time::sleep(policy.backoff).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn unavailable() -> LlmError {
        LlmError::Provider {
            status: Some(http::StatusCode::SERVICE_UNAVAILABLE),
            message: "busy".into(),
            body: String::new(),
            retryable: true,
        }
    }

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast(), |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { if attempt < 3 { Err(unavailable()) } else { Ok(attempt) } }
        })
        .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error() {
        let result: Result<(), _> = with_retry(&fast(), |_| async { Err(unavailable()) }).await;
        let err = result.unwrap_err();
        assert_eq!(err.status(), Some(http::StatusCode::SERVICE_UNAVAILABLE));
    }

    #[tokio::test]
    async fn test_non_retryable_fails_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&fast(), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(LlmError::configuration("bad tool")) }
        })
        .await;
        assert!(matches!(result, Err(LlmError::Configuration(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
