//! Retry with exponential backoff.
//!
//! [`retry`] runs a fallible async operation up to [`RetryConfig::attempts`] times. Whether a
//! failure is worth another attempt, and how long the server asked us to wait, are answered by
//! callbacks on the config, so the executor works with any error type. Types that know how to
//! classify themselves implement [`Classify`] and can use [`RetryConfig::classified`].
//!
//! # Example
//!
//! ```rust, no_run
//! use std::time::Duration;
//!
//! use etoro_client_sdk::retry::{RetryConfig, retry};
//!
//! # async fn example() -> Result<(), std::io::Error> {
//! let config = RetryConfig::default()
//!     .with_attempts(5)
//!     .with_delay(Duration::from_millis(250))
//!     .should_retry(|e: &std::io::Error| e.kind() == std::io::ErrorKind::ConnectionReset);
//!
//! let body = retry(|| async { Ok::<_, std::io::Error>("pong") }, &config).await?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use backoff::ExponentialBackoff;
use backoff::ExponentialBackoffBuilder;
use backoff::backoff::Backoff as _;
use rand::Rng as _;

const DEFAULT_ATTEMPTS: u32 = 3;
const DEFAULT_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_MULTIPLIER: f64 = 2.0;
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(600);
/// Relative spread applied to a computed wait when jitter is enabled (±25%).
const JITTER_RATIO: f64 = 0.25;

/// Capability interface for failures that know whether they are transient.
pub trait Classify {
    /// Whether the failed operation may succeed if attempted again.
    fn is_retryable(&self) -> bool {
        false
    }

    /// A wait suggested by the remote side (e.g. `Retry-After`), if any.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

type Predicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;
type Extractor<E> = Arc<dyn Fn(&E) -> Option<Duration> + Send + Sync>;
type Observer<E> = Arc<dyn Fn(u32, Duration, &E) + Send + Sync>;

/// Configuration for [`retry`].
#[non_exhaustive]
pub struct RetryConfig<E> {
    /// Maximum number of tries, including the first one. Zero is treated as one.
    pub attempts: u32,
    /// Wait before the first retry.
    pub delay: Duration,
    /// Factor applied to the wait after every retry.
    pub multiplier: f64,
    /// Upper bound for the computed (non server-suggested) wait.
    pub max_delay: Duration,
    /// Perturb computed waits by up to ±25%.
    pub jitter: bool,
    should_retry: Predicate<E>,
    retry_after: Option<Extractor<E>>,
    on_retry: Option<Observer<E>>,
}

impl<E> Default for RetryConfig<E> {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_ATTEMPTS,
            delay: DEFAULT_DELAY,
            multiplier: DEFAULT_MULTIPLIER,
            max_delay: DEFAULT_MAX_DELAY,
            jitter: true,
            should_retry: Arc::new(|_| false),
            retry_after: None,
            on_retry: None,
        }
    }
}

impl<E> Clone for RetryConfig<E> {
    fn clone(&self) -> Self {
        Self {
            attempts: self.attempts,
            delay: self.delay,
            multiplier: self.multiplier,
            max_delay: self.max_delay,
            jitter: self.jitter,
            should_retry: Arc::clone(&self.should_retry),
            retry_after: self.retry_after.clone(),
            on_retry: self.on_retry.clone(),
        }
    }
}

impl<E> fmt::Debug for RetryConfig<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryConfig")
            .field("attempts", &self.attempts)
            .field("delay", &self.delay)
            .field("multiplier", &self.multiplier)
            .field("max_delay", &self.max_delay)
            .field("jitter", &self.jitter)
            .field("retry_after", &self.retry_after.is_some())
            .field("on_retry", &self.on_retry.is_some())
            .finish_non_exhaustive()
    }
}

impl<E: Classify + 'static> RetryConfig<E> {
    /// Default config whose predicate and extractor come from [`Classify`].
    #[must_use]
    pub fn classified() -> Self {
        Self::default()
            .should_retry(E::is_retryable)
            .retry_after(E::retry_after)
    }
}

impl<E> RetryConfig<E> {
    #[must_use]
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    #[must_use]
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    #[must_use]
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Predicate deciding whether a failure is retried. Defaults to never.
    #[must_use]
    pub fn should_retry<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Arc::new(predicate);
        self
    }

    /// Extracts a server-suggested wait from a failure. A returned value replaces the computed
    /// backoff and is never jittered.
    #[must_use]
    pub fn retry_after<F>(mut self, extractor: F) -> Self
    where
        F: Fn(&E) -> Option<Duration> + Send + Sync + 'static,
    {
        self.retry_after = Some(Arc::new(extractor));
        self
    }

    /// Observer called with `(attempt_number, wait, failure)` before each sleep.
    #[must_use]
    pub fn on_retry<F>(mut self, observer: F) -> Self
    where
        F: Fn(u32, Duration, &E) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(observer));
        self
    }

    /// Deterministic `delay * multiplier^k` schedule; jitter is applied on top by [`retry`].
    fn schedule(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::default()
            .with_initial_interval(self.delay)
            .with_randomization_factor(0.0)
            .with_multiplier(self.multiplier)
            .with_max_interval(self.max_delay)
            .with_max_elapsed_time(None)
            .build()
    }
}

/// Runs `operation` until it succeeds, fails with a non-retryable error, or runs out of attempts.
///
/// The final failure is returned exactly as the operation produced it. The sleep between attempts
/// is a plain tokio timer, so dropping the returned future (e.g. under [`tokio::time::timeout`])
/// aborts the loop mid-wait.
pub async fn retry<T, E, F, Fut>(mut operation: F, config: &RetryConfig<E>) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = config.attempts.max(1);
    let mut schedule = config.schedule();
    let mut attempt = 0_u32;

    loop {
        attempt += 1;

        let error = match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if attempt >= attempts || !(config.should_retry)(&error) {
            return Err(error);
        }

        let computed = schedule.next_backoff().unwrap_or(config.max_delay);
        let wait = match config.retry_after.as_ref().and_then(|extract| extract(&error)) {
            Some(suggested) => suggested,
            None if config.jitter => apply_jitter(computed),
            None => computed,
        };

        if let Some(observer) = &config.on_retry {
            observer(attempt, wait, &error);
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(attempt, attempts, ?wait, "operation failed, retrying");

        tokio::time::sleep(wait).await;
    }
}

fn apply_jitter(wait: Duration) -> Duration {
    let spread = rand::rng().random_range(-JITTER_RATIO..=JITTER_RATIO);
    wait.mul_f64(1.0 + spread)
}
