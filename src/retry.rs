//! Retry policy: error classification, retry budgets, and cancellable delays
//!
//! Two layers retry in chan-dl. The manifest request is retried a fixed number
//! of times inside [`retry_transient`]. File transfers are never retried
//! individually; the orchestrator resubmits whole batches according to a
//! [`RetryBudget`], sleeping between attempts with a [`Backoff`].

use crate::config::RetryConfig;
use crate::error::{Error, Result};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (unreachable host, timeout, server error) return `true`.
/// Permanent failures (thread gone, malformed input, cancellation) return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::ManifestUnavailable { .. } => true,
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::Interrupted
            ),
            // A 404 means the thread is gone; asking again will not bring it back
            Error::ThreadNotFound { .. } => false,
            Error::RetriesExhausted { .. } => false,
            Error::Filesystem { .. } => false,
            Error::MalformedInput(_) => false,
            Error::Cancelled => false,
            Error::Config { .. } => false,
        }
    }
}

/// How many times a batch may be resubmitted after its first attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryBudget {
    /// Single attempt only
    Disabled,
    /// Up to this many additional attempts
    Limited(u32),
    /// Retry until success or cancellation
    Unlimited,
}

impl RetryBudget {
    /// Whether another attempt may start after `retries_done` retries have run
    pub fn allows(&self, retries_done: u32) -> bool {
        match self {
            RetryBudget::Disabled => false,
            RetryBudget::Limited(max) => retries_done < *max,
            RetryBudget::Unlimited => true,
        }
    }

    /// The retry limit, `None` when unlimited
    pub fn limit(&self) -> Option<u32> {
        match self {
            RetryBudget::Disabled => Some(0),
            RetryBudget::Limited(max) => Some(*max),
            RetryBudget::Unlimited => None,
        }
    }
}

impl From<i32> for RetryBudget {
    fn from(value: i32) -> Self {
        match value {
            0 => RetryBudget::Disabled,
            n if n < 0 => RetryBudget::Unlimited,
            n => RetryBudget::Limited(n.unsigned_abs()),
        }
    }
}

/// Delay schedule between batch attempts
#[derive(Clone, Debug)]
pub struct Backoff {
    next: Duration,
    multiplier: f64,
    max_delay: Duration,
    jitter: bool,
}

impl Backoff {
    /// Start a schedule from the retry configuration
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            next: config.delay.min(config.max_delay),
            multiplier: config.backoff_multiplier,
            max_delay: config.max_delay,
            jitter: config.jitter,
        }
    }

    /// Delay to wait now; advances the schedule
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        let grown = Duration::try_from_secs_f64(self.next.as_secs_f64() * self.multiplier)
            .unwrap_or(self.max_delay);
        self.next = grown.min(self.max_delay);

        if self.jitter {
            add_jitter(delay).min(self.max_delay)
        } else {
            delay
        }
    }
}

/// Sleep for `delay`, returning [`Error::Cancelled`] if the token fires first
pub async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> Result<()> {
    tokio::select! {
        _ = cancel.cancelled() => Err(Error::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

/// Run `operation`, retrying retryable errors up to `retries` more times
///
/// Waits a fixed `delay` between attempts. Non-retryable errors are returned
/// immediately. Cancellation during the delay yields [`Error::Cancelled`].
pub async fn retry_transient<F, Fut, T>(
    retries: u32,
    delay: Duration,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(attempts = attempt + 1, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < retries => {
                attempt += 1;
                tracing::warn!(
                    error = %e,
                    attempt,
                    max_attempts = retries,
                    delay_ms = delay.as_millis(),
                    "Operation failed, retrying"
                );
                sleep_or_cancel(delay, cancel).await?;
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(
                        error = %e,
                        attempts = attempt + 1,
                        "Operation failed after all retry attempts exhausted"
                    );
                } else {
                    tracing::debug!(error = %e, "Operation failed with non-retryable error");
                }
                return Err(e);
            }
        }
    }
}

/// Add random jitter to a delay
///
/// The result is uniformly distributed between `delay` and `2 * delay`,
/// saturating at `Duration::MAX`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::try_from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
        .unwrap_or(Duration::MAX)
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn unavailable() -> Error {
        Error::ManifestUnavailable {
            url: "http://localhost/g/thread/1.json".to_string(),
            reason: "connection refused".to_string(),
        }
    }

    #[test]
    fn budget_from_signed_retries() {
        assert_eq!(RetryBudget::from(0), RetryBudget::Disabled);
        assert_eq!(RetryBudget::from(3), RetryBudget::Limited(3));
        assert_eq!(RetryBudget::from(-1), RetryBudget::Unlimited);
        assert_eq!(RetryBudget::from(i32::MIN), RetryBudget::Unlimited);
    }

    #[test]
    fn disabled_budget_never_allows_a_retry() {
        assert!(!RetryBudget::Disabled.allows(0));
        assert_eq!(RetryBudget::Disabled.limit(), Some(0));
    }

    #[test]
    fn limited_budget_allows_exactly_n_retries() {
        let budget = RetryBudget::Limited(3);
        let allowed = (0..10).take_while(|done| budget.allows(*done)).count();
        assert_eq!(allowed, 3, "N=3 permits 3 retries, 4 attempts in total");
    }

    #[test]
    fn unlimited_budget_always_allows() {
        assert!(RetryBudget::Unlimited.allows(0));
        assert!(RetryBudget::Unlimited.allows(u32::MAX));
        assert_eq!(RetryBudget::Unlimited.limit(), None);
    }

    #[test]
    fn fixed_backoff_repeats_the_same_delay() {
        let mut backoff = Backoff::new(&RetryConfig {
            delay: Duration::from_millis(20),
            ..RetryConfig::default()
        });
        for _ in 0..4 {
            assert_eq!(backoff.next_delay(), Duration::from_millis(20));
        }
    }

    #[test]
    fn growing_backoff_is_capped_at_max_delay() {
        let mut backoff = Backoff::new(&RetryConfig {
            retries: 5,
            delay: Duration::from_millis(50),
            backoff_multiplier: 10.0,
            max_delay: Duration::from_millis(200),
            jitter: false,
        });
        assert_eq!(backoff.next_delay(), Duration::from_millis(50));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
    }

    #[test]
    fn huge_multiplier_saturates_at_max_delay() {
        let config = RetryConfig {
            delay: Duration::from_secs(5),
            backoff_multiplier: 1e300,
            max_delay: Duration::from_secs(60),
            jitter: true,
            ..RetryConfig::default()
        };
        let mut backoff = Backoff::new(&config);

        assert!(backoff.next_delay() <= Duration::from_secs(60));
        assert_eq!(backoff.next_delay(), Duration::from_secs(60));
        assert_eq!(backoff.next_delay(), Duration::from_secs(60));
    }

    #[test]
    fn jitter_on_enormous_delay_does_not_overflow() {
        assert_eq!(add_jitter(Duration::MAX), Duration::MAX);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let delay = Duration::from_millis(50);
        for i in 0..200 {
            let jittered = add_jitter(delay);
            assert!(jittered >= delay, "iteration {i}: {jittered:?} < {delay:?}");
            assert!(jittered <= delay * 2, "iteration {i}: {jittered:?} > 2x");
        }
    }

    #[test]
    fn classification_of_thread_errors() {
        assert!(unavailable().is_retryable());
        assert!(
            !Error::ThreadNotFound {
                board: "g".to_string(),
                thread: 1
            }
            .is_retryable()
        );
        assert!(!Error::MalformedInput("x".to_string()).is_retryable());
        assert!(!Error::Cancelled.is_retryable());
        assert!(
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "reset"
            ))
            .is_retryable()
        );
        assert!(
            !Error::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "denied"
            ))
            .is_retryable()
        );
    }

    #[tokio::test]
    async fn retry_transient_retries_once_then_surfaces_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let cancel = CancellationToken::new();

        let result: Result<()> = retry_transient(1, Duration::from_millis(10), &cancel, || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(unavailable())
            }
        })
        .await;

        assert!(matches!(result, Err(Error::ManifestUnavailable { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2, "initial try + one retry");
    }

    #[tokio::test]
    async fn retry_transient_does_not_retry_permanent_errors() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let cancel = CancellationToken::new();

        let result: Result<()> = retry_transient(3, Duration::from_millis(10), &cancel, || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(Error::ThreadNotFound {
                    board: "g".to_string(),
                    thread: 1,
                })
            }
        })
        .await;

        assert!(matches!(result, Err(Error::ThreadNotFound { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_transient_succeeds_after_transient_failure() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let cancel = CancellationToken::new();

        let result = retry_transient(1, Duration::from_millis(10), &cancel, || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(unavailable())
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn cancellation_interrupts_the_delay() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let start = std::time::Instant::now();
        let result = sleep_or_cancel(Duration::from_secs(30), &cancel).await;

        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
