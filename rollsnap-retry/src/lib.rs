//! Bounded retry and backoff for Rollsnap cloud API calls
//!
//! Collaborator calls classify each failure as transient (the request had no
//! effect and may be re-sent) or permanent. Transient failures are retried
//! with exponential backoff until the attempt bound or the policy's elapsed
//! time budget runs out.

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Boxed error carried through the retry loop
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Common retry error types
#[derive(Error, Debug)]
pub enum RetryError {
    #[error("Operation '{operation}' failed after {attempts} attempts: {source}")]
    MaxRetriesExceeded {
        operation: &'static str,
        attempts: usize,
        source: BoxError,
    },
    #[error("Transient error in '{operation}': {source}")]
    Transient {
        operation: &'static str,
        source: BoxError,
    },
    #[error("Permanent error in '{operation}': {source}")]
    Permanent {
        operation: &'static str,
        source: BoxError,
    },
}

impl RetryError {
    /// Returns true if the error may be retried
    pub fn is_transient(&self) -> bool {
        matches!(self, RetryError::Transient { .. })
    }
}

/// Result type for retry operations
pub type RetryResult<T> = std::result::Result<T, RetryError>;

/// Attempt bound plus the backoff schedule between attempts
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub backoff: ExponentialBackoff,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, backoff: ExponentialBackoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Policy for control-plane calls against a cloud provider API
    pub fn cloud_api(max_attempts: usize) -> Self {
        Self::new(max_attempts, cloud_api_backoff_policy())
    }

    /// A single attempt, no retries
    pub fn no_retry() -> Self {
        Self::new(1, default_backoff_policy())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, default_backoff_policy())
    }
}

/// Execute an operation with the default retry policy
pub async fn with_backoff<F, Fut, T>(op_name: &'static str, f: F) -> RetryResult<T>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = RetryResult<T>>,
{
    with_policy(op_name, RetryPolicy::default(), f).await
}

/// Execute an operation with a custom retry policy
///
/// The closure receives the 1-based attempt number. A `Permanent` error is
/// returned as-is on the first occurrence; `Transient` errors are retried
/// until `max_attempts` or until the backoff schedule is exhausted.
pub async fn with_policy<F, Fut, T>(
    op_name: &'static str,
    policy: RetryPolicy,
    mut f: F,
) -> RetryResult<T>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = RetryResult<T>>,
{
    let RetryPolicy {
        max_attempts,
        mut backoff,
    } = policy;
    backoff.reset();

    let mut attempt = 1;
    loop {
        debug!("Attempting operation '{}' (attempt {})", op_name, attempt);

        match f(attempt).await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(
                        "Operation '{}' succeeded after {} attempts",
                        op_name, attempt
                    );
                }
                return Ok(result);
            }
            Err(err @ RetryError::Permanent { .. }) => {
                warn!(
                    "Operation '{}' failed permanently on attempt {}: {}",
                    op_name, attempt, err
                );
                return Err(err);
            }
            Err(err) => {
                warn!(
                    "Operation '{}' failed on attempt {}: {}",
                    op_name, attempt, err
                );

                let delay = if attempt >= max_attempts {
                    None
                } else {
                    backoff.next_backoff()
                };

                let Some(delay) = delay else {
                    return Err(RetryError::MaxRetriesExceeded {
                        operation: op_name,
                        attempts: attempt,
                        source: into_source(err),
                    });
                };

                attempt += 1;
                sleep(delay).await;
            }
        }
    }
}

fn into_source(err: RetryError) -> BoxError {
    match err {
        RetryError::MaxRetriesExceeded { source, .. }
        | RetryError::Transient { source, .. }
        | RetryError::Permanent { source, .. } => source,
    }
}

#[cfg(feature = "async-rt")]
async fn sleep(delay: Duration) {
    tokio::time::sleep(delay).await;
}

#[cfg(not(feature = "async-rt"))]
async fn sleep(delay: Duration) {
    std::thread::sleep(delay);
}

/// Default backoff policy for general operations
pub fn default_backoff_policy() -> ExponentialBackoff {
    ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(100))
        .with_max_interval(Duration::from_secs(5))
        .with_max_elapsed_time(Some(Duration::from_secs(30)))
        .with_multiplier(2.0)
        .build()
}

/// Backoff policy for cloud control-plane calls, which throttle aggressively
pub fn cloud_api_backoff_policy() -> ExponentialBackoff {
    ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(500))
        .with_max_interval(Duration::from_secs(10))
        .with_max_elapsed_time(Some(Duration::from_secs(60)))
        .with_multiplier(1.5)
        .build()
}

/// Helper macro for creating transient errors
#[macro_export]
macro_rules! transient_error {
    ($op:expr, $err:expr) => {
        $crate::RetryError::Transient {
            operation: $op,
            source: Box::new($err),
        }
    };
}

/// Helper macro for creating permanent errors
#[macro_export]
macro_rules! permanent_error {
    ($op:expr, $err:expr) => {
        $crate::RetryError::Permanent {
            operation: $op,
            source: Box::new($err),
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_attempts: usize) -> RetryPolicy {
        RetryPolicy::new(
            max_attempts,
            ExponentialBackoffBuilder::new()
                .with_initial_interval(Duration::from_millis(1))
                .with_max_interval(Duration::from_millis(2))
                .with_max_elapsed_time(Some(Duration::from_secs(5)))
                .build(),
        )
    }

    fn throttled() -> std::io::Error {
        std::io::Error::new(std::io::ErrorKind::WouldBlock, "RequestLimitExceeded")
    }

    #[tokio::test]
    async fn test_successful_operation() {
        let result = with_backoff("test_op", |_attempt| async { Ok("success") }).await;

        assert!(result.is_ok());
        assert_eq!(result.unwrap(), "success");
    }

    #[tokio::test]
    async fn test_transient_failure_then_success() {
        let attempt_count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempt_count);

        let result = with_policy("test_op", fast_policy(3), move |_attempt| {
            let count = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if count < 2 {
                    Err(transient_error!("test_op", throttled()))
                } else {
                    Ok("success")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "success");
        assert_eq!(attempt_count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let attempt_count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempt_count);

        let result: RetryResult<&str> = with_policy("test_op", fast_policy(5), move |_attempt| {
            counter.fetch_add(1, Ordering::SeqCst);
            async {
                Err(permanent_error!(
                    "test_op",
                    std::io::Error::new(std::io::ErrorKind::PermissionDenied, "permission denied")
                ))
            }
        })
        .await;

        assert!(matches!(result, Err(RetryError::Permanent { .. })));
        assert_eq!(attempt_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attempt_bound_is_respected() {
        let attempts_seen = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&attempts_seen);

        let result: RetryResult<()> = with_policy("test_op", fast_policy(2), move |attempt| {
            seen.store(attempt, Ordering::SeqCst);
            async { Err(transient_error!("test_op", throttled())) }
        })
        .await;

        match result {
            Err(RetryError::MaxRetriesExceeded {
                operation,
                attempts,
                source,
            }) => {
                assert_eq!(operation, "test_op");
                assert_eq!(attempts, 2);
                assert!(source.to_string().contains("RequestLimitExceeded"));
            }
            other => panic!("expected MaxRetriesExceeded, got {other:?}"),
        }
        assert_eq!(attempts_seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_no_retry_policy_makes_one_attempt() {
        let result: RetryResult<()> = with_policy("test_op", RetryPolicy::no_retry(), |_| async {
            Err(transient_error!("test_op", throttled()))
        })
        .await;

        assert!(matches!(
            result,
            Err(RetryError::MaxRetriesExceeded { attempts: 1, .. })
        ));
    }

    #[test]
    fn test_policy_clamps_zero_attempts() {
        assert_eq!(RetryPolicy::cloud_api(0).max_attempts, 1);
    }
}
