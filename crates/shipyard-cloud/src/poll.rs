//! Bounded polling and retry
//!
//! Every readiness wait in shipyard goes through [`poll`]: a fixed number of
//! attempts at a fixed interval, ending in a typed [`PollError`] when the
//! budget runs out or the run is cancelled. [`retry_with_backoff`] covers the
//! other case, re-issuing a failed API call after a transient error.

use crate::error::CloudError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Attempt budget for one readiness wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl PollPolicy {
    pub const fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }

    pub const fn secs(max_attempts: u32, interval_secs: u64) -> Self {
        Self::new(max_attempts, Duration::from_secs(interval_secs))
    }
}

#[derive(Debug, Error)]
pub enum PollError<E> {
    #[error("{what} not ready after {attempts} attempts")]
    Exhausted { what: String, attempts: u32 },

    #[error("{what} cancelled")]
    Cancelled { what: String },

    #[error("{0}")]
    Probe(E),
}

impl<E> PollError<E> {
    /// Convert the probe error type, keeping exhaustion/cancellation as is
    pub fn map_probe<F>(self, f: impl FnOnce(E) -> F) -> PollError<F> {
        match self {
            PollError::Exhausted { what, attempts } => PollError::Exhausted { what, attempts },
            PollError::Cancelled { what } => PollError::Cancelled { what },
            PollError::Probe(e) => PollError::Probe(f(e)),
        }
    }
}

impl From<PollError<CloudError>> for CloudError {
    fn from(err: PollError<CloudError>) -> Self {
        match err {
            PollError::Exhausted { what, attempts } => CloudError::Timeout {
                operation: what,
                attempts,
            },
            PollError::Cancelled { what } => CloudError::Cancelled(what),
            PollError::Probe(e) => e,
        }
    }
}

/// Sleep for `duration` unless `cancel` fires first. Returns false when cancelled.
pub async fn pause(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

/// Run `probe` until it yields `Some`, up to `policy.max_attempts` times.
///
/// `Ok(None)` means "not ready yet". An `Err` from the probe ends polling
/// immediately; probes that consider a failure transient should map it to
/// `Ok(None)` themselves. The interval is slept between attempts, not after
/// the last one.
pub async fn poll<T, E, F, Fut>(
    policy: PollPolicy,
    what: &str,
    cancel: &CancellationToken,
    mut probe: F,
) -> std::result::Result<T, PollError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<Option<T>, E>>,
{
    for attempt in 1..=policy.max_attempts {
        if cancel.is_cancelled() {
            return Err(PollError::Cancelled {
                what: what.to_string(),
            });
        }

        if let Some(value) = probe().await.map_err(PollError::Probe)? {
            debug!(operation = %what, attempt, "Ready");
            return Ok(value);
        }

        debug!(
            operation = %what,
            attempt,
            max_attempts = policy.max_attempts,
            "Not ready yet"
        );

        if attempt < policy.max_attempts && !pause(policy.interval, cancel).await {
            return Err(PollError::Cancelled {
                what: what.to_string(),
            });
        }
    }

    Err(PollError::Exhausted {
        what: what.to_string(),
        attempts: policy.max_attempts,
    })
}

/// Retry configuration for provider API calls
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,

    /// Initial delay between retries
    pub initial_delay: Duration,

    /// Maximum delay between retries
    pub max_delay: Duration,

    /// Backoff multiplier
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }
}

/// Re-run `operation` after retryable [`CloudError`]s with jittered
/// exponential backoff. Non-retryable errors are returned at once.
pub async fn retry_with_backoff<T, F, Fut>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> std::result::Result<T, CloudError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, CloudError>>,
{
    let mut attempt = 0u32;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => {
                if attempt >= config.max_attempts {
                    error!(
                        operation = %operation_name,
                        attempt,
                        error = %e,
                        "Operation failed after max retries"
                    );
                    return Err(e);
                }

                let jitter = rand::thread_rng().gen_range(0.5..1.5);
                let jittered = Duration::from_secs_f64(delay.as_secs_f64() * jitter);

                warn!(
                    operation = %operation_name,
                    attempt,
                    error = %e,
                    delay_ms = jittered.as_millis() as u64,
                    "Operation failed, retrying"
                );

                tokio::time::sleep(jittered).await;

                delay = Duration::from_secs_f64(
                    (delay.as_secs_f64() * config.backoff_multiplier)
                        .min(config.max_delay.as_secs_f64()),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_poll_returns_first_ready_value() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();

        let c = calls.clone();
        let value: std::result::Result<u32, PollError<CloudError>> =
            poll(PollPolicy::secs(5, 2), "server", &cancel, move || {
                let c = c.clone();
                async move {
                    let n = c.fetch_add(1, Ordering::SeqCst) + 1;
                    Ok(if n == 3 { Some(n) } else { None })
                }
            })
            .await;

        assert_eq!(value.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_exhausts_budget() {
        let cancel = CancellationToken::new();
        let start = tokio::time::Instant::now();

        let result: std::result::Result<(), PollError<CloudError>> =
            poll(PollPolicy::secs(4, 5), "device path", &cancel, || async {
                Ok(None)
            })
            .await;

        match result {
            Err(PollError::Exhausted { what, attempts }) => {
                assert_eq!(what, "device path");
                assert_eq!(attempts, 4);
            }
            other => panic!("unexpected: {:?}", other),
        }
        // three pauses between four attempts
        assert_eq!(start.elapsed(), Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_probe_error_stops_immediately() {
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result: std::result::Result<(), PollError<CloudError>> =
            poll(PollPolicy::secs(10, 1), "server", &cancel, move || {
                c.fetch_add(1, Ordering::SeqCst);
                async { Err(CloudError::Authentication("bad token".into())) }
            })
            .await;

        assert!(matches!(
            result,
            Err(PollError::Probe(CloudError::Authentication(_)))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: std::result::Result<(), PollError<CloudError>> =
            poll(PollPolicy::secs(10, 1), "k3s", &cancel, || async { Ok(None) }).await;

        let err: CloudError = result.unwrap_err().into();
        assert!(matches!(err, CloudError::Cancelled(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_with_backoff_retries_rate_limit() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result = retry_with_backoff(&RetryConfig::default(), "list servers", move || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(CloudError::RateLimit("slow down".into()))
                } else {
                    Ok("ok")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_with_backoff_passes_through_permanent_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result: std::result::Result<(), CloudError> =
            retry_with_backoff(&RetryConfig::default(), "create server", move || {
                c.fetch_add(1, Ordering::SeqCst);
                async { Err(CloudError::Validation("bad type".into())) }
            })
            .await;

        assert!(matches!(result, Err(CloudError::Validation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
