//! # Connection Manager
//!
//! Establishes a connection and channel to the AMQP broker, retrying with a
//! fixed delay until a policy-defined attempt limit is reached. Attempts are
//! fully sequential. There is no automatic reconnection once an established
//! connection drops mid-run; that failure is fatal to the owning worker.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use lapin::{Channel, Connection, ConnectionProperties};
use tracing::{info, warn};

use crate::config::ConnectionParameters;
use crate::error::{Result, WorkerError};

/// Retry policy for broker connection attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of connection attempts before giving up.
    pub max_retries: u32,
    /// Fixed delay between consecutive attempts.
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 12,
            retry_delay: Duration::from_secs(5),
        }
    }
}

/// Open a connection and channel using the default retry policy
/// (12 attempts, 5 seconds apart).
pub async fn connect(params: &ConnectionParameters) -> Result<(Connection, Channel)> {
    connect_with_policy(params, RetryPolicy::default()).await
}

/// Open a connection and channel, retrying per `policy`.
///
/// The returned channel is the single logical conduit for all route
/// registrations of the worker that owns it.
pub async fn connect_with_policy(
    params: &ConnectionParameters,
    policy: RetryPolicy,
) -> Result<(Connection, Channel)> {
    let url = params.url();
    info!(broker = %params.redacted(), "connecting to broker");

    let connection = retry(policy, &params.redacted(), || {
        Connection::connect(
            &url,
            ConnectionProperties::default().with_connection_name("amqp-routes".into()),
        )
    })
    .await?;

    let channel = connection
        .create_channel()
        .await
        .map_err(|e| WorkerError::channel("create_channel", e.to_string()))?;

    info!(broker = %params.redacted(), "broker connection established");
    Ok((connection, channel))
}

/// Sequential retry loop around a fallible connect attempt.
///
/// Generic over the attempt so the timing and counting behavior is testable
/// without a broker.
async fn retry<T, E, F, Fut>(policy: RetryPolicy, target: &str, mut attempt: F) -> Result<T>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
{
    let mut failures = 0u32;
    loop {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                failures += 1;
                if failures >= policy.max_retries {
                    return Err(WorkerError::connection_exhausted(failures, err.to_string()));
                }

                warn!(
                    broker = %target,
                    attempt = failures,
                    delay_secs = policy.retry_delay.as_secs(),
                    error = %err,
                    "broker connection failed, retrying"
                );
                tokio::time::sleep(policy.retry_delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio_test::assert_ok;

    /// Attempt that fails `fail_times` times, then succeeds.
    fn flaky_attempt(
        fail_times: u32,
    ) -> (
        Arc<AtomicU32>,
        impl FnMut() -> std::future::Ready<std::result::Result<u32, String>>,
    ) {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let attempt = move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(if n < fail_times {
                Err("connection refused".to_string())
            } else {
                Ok(n + 1)
            })
        };
        (calls, attempt)
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_k_failures_with_delays() {
        let (calls, attempt) = flaky_attempt(3);
        let start = tokio::time::Instant::now();

        tokio_test::assert_ok!(retry(RetryPolicy::default(), "test", attempt).await);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        // three failures, each followed by the configured 5 s delay
        assert_eq!(start.elapsed(), Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_after_max_retries() {
        let (calls, attempt) = flaky_attempt(u32::MAX);

        let result = retry(RetryPolicy::default(), "test", attempt).await;

        match result {
            Err(WorkerError::ConnectionExhausted { attempts, message }) => {
                assert_eq!(attempts, 12);
                assert!(message.contains("connection refused"));
            }
            other => panic!("expected ConnectionExhausted, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 12);
    }

    #[tokio::test(start_paused = true)]
    async fn first_attempt_success_sleeps_never() {
        let (calls, attempt) = flaky_attempt(0);
        let start = tokio::time::Instant::now();

        tokio_test::assert_ok!(retry(RetryPolicy::default(), "test", attempt).await);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn custom_policy_is_honored() {
        let policy = RetryPolicy {
            max_retries: 3,
            retry_delay: Duration::from_millis(100),
        };
        let (calls, attempt) = flaky_attempt(u32::MAX);
        let start = tokio::time::Instant::now();

        let result = retry(policy, "test", attempt).await;

        assert!(matches!(
            result,
            Err(WorkerError::ConnectionExhausted { attempts: 3, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // two delays: after the first and second failures
        assert_eq!(start.elapsed(), Duration::from_millis(200));
    }
}
