//! Sliding-window admission control for outbound requests.
//!
//! [`RateLimiter::acquire`] suspends the caller until a slot in the trailing window is free.
//! Callers are admitted one at a time, in arrival order, behind an async mutex. When the remote
//! side rejects a request for rate limiting, call [`RateLimiter::penalize`] so that every
//! subsequent admission first waits out the server's back-off.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;

const DEFAULT_MAX_REQUESTS: usize = 20;
const DEFAULT_WINDOW: Duration = Duration::from_secs(10);
/// Added to computed waits so the oldest entry has definitely left the window on wake-up.
const BOUNDARY_EPSILON: Duration = Duration::from_millis(1);

/// Configuration for [`RateLimiter`].
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Maximum admissions within any trailing `window`
    pub max_requests: usize,
    /// Length of the sliding window
    pub window: Duration,
}

impl RateLimitConfig {
    #[must_use]
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW)
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    /// Serializes admission decisions; tokio's mutex queues waiters fairly.
    admission: tokio::sync::Mutex<()>,
    /// Admission instants still inside (or just past) the window, oldest first.
    timestamps: Mutex<VecDeque<Instant>>,
    penalty_until: Mutex<Option<Instant>>,
    disposed: CancellationToken,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

impl RateLimiter {
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            max_requests: config.max_requests.max(1),
            window: config.window,
            admission: tokio::sync::Mutex::new(()),
            timestamps: Mutex::new(VecDeque::with_capacity(config.max_requests)),
            penalty_until: Mutex::new(None),
            disposed: CancellationToken::new(),
        }
    }

    /// Waits until a slot is available and reserves it.
    ///
    /// Never fails. Returns immediately once the limiter is disposed, including for callers that
    /// are already waiting.
    pub async fn acquire(&self) {
        if self.disposed.is_cancelled() {
            return;
        }

        tokio::select! {
            biased;
            () = self.disposed.cancelled() => {}
            () = self.admit() => {}
        }
    }

    async fn admit(&self) {
        let _turn = self.admission.lock().await;

        loop {
            if let Some(until) = self.active_penalty() {
                #[cfg(feature = "tracing")]
                tracing::debug!(wait = ?until.saturating_duration_since(Instant::now()), "rate limiter penalized, waiting");
                sleep_until(until).await;
                continue;
            }

            let now = Instant::now();
            let wait = {
                let mut timestamps = self.lock_timestamps();
                self.prune(&mut timestamps, now);

                if timestamps.len() < self.max_requests {
                    timestamps.push_back(now);
                    return;
                }

                timestamps.front().map(|oldest| {
                    (*oldest + self.window).saturating_duration_since(now) + BOUNDARY_EPSILON
                })
            };

            if let Some(wait) = wait {
                #[cfg(feature = "tracing")]
                tracing::trace!(?wait, "rate limit window full, waiting");
                sleep(wait).await;
            }
        }
    }

    /// Forces every subsequent admission to wait at least `retry_after` from now.
    ///
    /// Overlapping penalties keep the later expiry; they never add up.
    pub fn penalize(&self, retry_after: Duration) {
        let until = Instant::now() + retry_after;
        let mut penalty = self
            .penalty_until
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if (*penalty).is_none_or(|current| until > current) {
            *penalty = Some(until);
        }
    }

    /// Marks the limiter inert: pending and future [`acquire`](Self::acquire) calls return
    /// immediately.
    pub fn dispose(&self) {
        self.disposed.cancel();
        self.lock_timestamps().clear();
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.is_cancelled()
    }

    /// Number of admissions within the trailing window.
    #[must_use]
    pub fn current_usage(&self) -> usize {
        let mut timestamps = self.lock_timestamps();
        self.prune(&mut timestamps, Instant::now());
        timestamps.len()
    }

    #[must_use]
    pub fn is_penalized(&self) -> bool {
        self.active_penalty().is_some()
    }

    fn active_penalty(&self) -> Option<Instant> {
        let penalty = *self
            .penalty_until
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        penalty.filter(|until| *until > Instant::now())
    }

    fn prune(&self, timestamps: &mut VecDeque<Instant>, now: Instant) {
        while timestamps
            .front()
            .is_some_and(|oldest| now.saturating_duration_since(*oldest) > self.window)
        {
            timestamps.pop_front();
        }
    }

    // The deque has no invariant a panicking holder could break halfway.
    fn lock_timestamps(&self) -> MutexGuard<'_, VecDeque<Instant>> {
        self.timestamps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
