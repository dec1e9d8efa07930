//! Classification-aware retry loop for flaky upstream operations.
//!
//! Remote generation calls fail transiently (quota exhaustion, rate limits,
//! timeouts). [`RetryExecutor::execute`] re-runs such an operation under a
//! [`RetryPolicy`], sleeping `base_delay * multiplier^(attempt-1)` between
//! attempts. Errors the policy does not classify as retryable are returned
//! immediately. The sleep is a tokio timer, so other tasks keep running.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::{Error, Result};

/// Lower-cased substrings that mark an error message as transient.
const TRANSIENT_MARKERS: &[&str] = &[
    "429",
    "resource exhausted",
    "resource_exhausted",
    "quota",
    "rate limit",
    "too many requests",
    "timeout",
    "timed out",
    "temporar",
];

/// Returns `true` when `message` looks like a quota, rate-limit, timeout, or
/// otherwise temporary failure. Matching is case-insensitive.
pub fn is_transient_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    TRANSIENT_MARKERS.iter().any(|m| lower.contains(m))
}

type Classifier<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// How many times to try, how long to wait, and which errors qualify.
///
/// A policy is plain configuration; it holds no per-invocation state and can
/// be shared by any number of concurrent [`RetryExecutor::execute`] calls.
pub struct RetryPolicy<E> {
    max_attempts: u32,
    base_delay: Duration,
    backoff_multiplier: f64,
    max_delay: Duration,
    is_retryable: Classifier<E>,
}

impl<E> RetryPolicy<E> {
    /// Build a policy with a custom classification predicate.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if `max_attempts` is zero or the
    /// multiplier is below 1.0 (or NaN).
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        backoff_multiplier: f64,
        is_retryable: impl Fn(&E) -> bool + Send + Sync + 'static,
    ) -> Result<Self> {
        if max_attempts < 1 {
            return Err(Error::Validation(
                "retry max_attempts must be at least 1".into(),
            ));
        }
        if backoff_multiplier.is_nan() || backoff_multiplier < 1.0 {
            return Err(Error::Validation(format!(
                "retry backoff_multiplier must be >= 1.0, got {backoff_multiplier}"
            )));
        }
        Ok(Self {
            max_attempts,
            base_delay,
            backoff_multiplier,
            max_delay: Duration::MAX,
            is_retryable: Arc::new(is_retryable),
        })
    }

    /// Cap every individual backoff sleep at `max_delay`.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    pub fn backoff_multiplier(&self) -> f64 {
        self.backoff_multiplier
    }

    /// Whether `err` should be retried.
    pub fn is_retryable(&self, err: &E) -> bool {
        (self.is_retryable)(err)
    }

    /// Delay to sleep after the given (1-based) failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.backoff_multiplier.powi(exponent);
        Duration::try_from_secs_f64(self.base_delay.as_secs_f64() * factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl<E: fmt::Display + 'static> RetryPolicy<E> {
    /// Policy that retries errors whose message matches
    /// [`is_transient_message`].
    pub fn transient(
        max_attempts: u32,
        base_delay: Duration,
        backoff_multiplier: f64,
    ) -> Result<Self> {
        Self::new(max_attempts, base_delay, backoff_multiplier, |e: &E| {
            is_transient_message(&e.to_string())
        })
    }

    /// Transient-message policy built from the `[retry]` config section.
    pub fn from_config(config: &RetryConfig) -> Result<Self> {
        Ok(Self::transient(
            config.max_attempts,
            Duration::from_millis(config.base_delay_ms),
            config.backoff_multiplier,
        )?
        .with_max_delay(Duration::from_millis(config.max_delay_ms)))
    }
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            max_attempts: self.max_attempts,
            base_delay: self.base_delay,
            backoff_multiplier: self.backoff_multiplier,
            max_delay: self.max_delay,
            is_retryable: Arc::clone(&self.is_retryable),
        }
    }
}

impl<E> fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("max_delay", &self.max_delay)
            .finish_non_exhaustive()
    }
}

/// The last error of a retried operation, annotated with how many attempts
/// were made before giving up.
#[derive(Debug, thiserror::Error)]
#[error("{source} (gave up after {attempts} attempt(s))")]
pub struct RetryError<E>
where
    E: std::error::Error + 'static,
{
    /// Number of times the operation was invoked.
    pub attempts: u32,
    /// The error returned by the final attempt.
    #[source]
    pub source: E,
}

impl<E> RetryError<E>
where
    E: std::error::Error + 'static,
{
    /// Discard the attempt count and return the underlying error.
    pub fn into_inner(self) -> E {
        self.source
    }
}

/// Counters describing what the executor has done. Observational only.
#[derive(Debug, Default)]
pub struct RetryStats {
    attempts: AtomicU64,
    backoffs: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
}

/// Point-in-time copy of [`RetryStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryStatsSnapshot {
    pub attempts: u64,
    pub backoffs: u64,
    pub successes: u64,
    pub failures: u64,
}

impl RetryStats {
    pub fn snapshot(&self) -> RetryStatsSnapshot {
        RetryStatsSnapshot {
            attempts: self.attempts.load(Ordering::Relaxed),
            backoffs: self.backoffs.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

/// Runs fallible async operations under a [`RetryPolicy`].
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    stats: Arc<RetryStats>,
}

impl RetryExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Share counters with other executors (e.g. one per collaborator).
    pub fn with_stats(stats: Arc<RetryStats>) -> Self {
        Self { stats }
    }

    pub fn stats(&self) -> &Arc<RetryStats> {
        &self.stats
    }

    /// Call `operation` until it succeeds, fails with a non-retryable error,
    /// or `policy.max_attempts()` is reached.
    ///
    /// `name` only labels log events.
    ///
    /// # Errors
    ///
    /// Returns the last error wrapped in a [`RetryError`] carrying the number
    /// of attempts made.
    pub async fn execute<T, E, F, Fut>(
        &self,
        name: &str,
        policy: &RetryPolicy<E>,
        mut operation: F,
    ) -> std::result::Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: std::error::Error + 'static,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            self.stats.attempts.fetch_add(1, Ordering::Relaxed);

            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(operation = name, attempt, "Succeeded after retry");
                    }
                    self.stats.successes.fetch_add(1, Ordering::Relaxed);
                    return Ok(value);
                }
                Err(err) => {
                    let retryable = policy.is_retryable(&err);
                    if !retryable || attempt >= policy.max_attempts() {
                        if retryable {
                            tracing::error!(
                                operation = name,
                                attempt,
                                error = %err,
                                "Retries exhausted"
                            );
                        } else {
                            tracing::warn!(
                                operation = name,
                                attempt,
                                error = %err,
                                "Non-retryable failure"
                            );
                        }
                        self.stats.failures.fetch_add(1, Ordering::Relaxed);
                        return Err(RetryError {
                            attempts: attempt,
                            source: err,
                        });
                    }

                    let delay = policy.delay_for(attempt);
                    tracing::warn!(
                        operation = name,
                        attempt,
                        max_attempts = policy.max_attempts(),
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient failure, backing off"
                    );
                    self.stats.backoffs.fetch_add(1, Ordering::Relaxed);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
