//! Process-local circuit breaker and in-flight dispatch limiter.
//!
//! Both mechanisms are scoped to a single process. Under horizontal
//! scaling each instance enforces its own bound, so the global limit is
//! only approximate — an accepted design limitation, not something to
//! silently replace with distributed coordination.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// Circuit breaker
// ---------------------------------------------------------------------------

/// Tunable parameters for the circuit breaker.
#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    /// Consecutive failures before the breaker opens.
    pub failure_threshold: u32,
    /// How long dispatch stays short-circuited after the last failure.
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
        }
    }
}

/// Rejection returned while the breaker is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerOpen {
    /// Seconds until the cooldown elapses and one attempt is allowed.
    pub retry_after_secs: u64,
}

#[derive(Debug, Default)]
struct BreakerState {
    failures: u32,
    last_failure: Option<Instant>,
}

/// Tracks dispatch failures and short-circuits new attempts once the
/// failure threshold is reached, until the cooldown elapses.
///
/// After the cooldown, the counter resets and one fresh attempt is
/// allowed; a success keeps the breaker closed, a failure starts
/// accumulating again.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(BreakerState::default()),
        }
    }

    /// Check whether a dispatch attempt is currently allowed.
    pub fn check(&self) -> Result<(), BreakerOpen> {
        self.check_at(Instant::now())
    }

    /// Record a dispatch failure.
    pub fn record_failure(&self) {
        self.record_failure_at(Instant::now());
    }

    /// Record a successful dispatch, closing the breaker.
    pub fn record_success(&self) {
        let mut state = self.lock();
        state.failures = 0;
        state.last_failure = None;
    }

    /// Time-explicit variant of [`check`](Self::check) for deterministic tests.
    pub fn check_at(&self, now: Instant) -> Result<(), BreakerOpen> {
        let mut state = self.lock();

        if state.failures < self.config.failure_threshold {
            return Ok(());
        }

        let last = match state.last_failure {
            Some(last) => last,
            // Threshold reached but no timestamp recorded; treat as closed.
            None => return Ok(()),
        };

        let elapsed = now.saturating_duration_since(last);
        if elapsed >= self.config.cooldown {
            // Cooldown elapsed: reset and allow one fresh attempt.
            state.failures = 0;
            state.last_failure = None;
            return Ok(());
        }

        let remaining = self.config.cooldown - elapsed;
        Err(BreakerOpen {
            retry_after_secs: remaining.as_secs().max(1),
        })
    }

    /// Time-explicit variant of [`record_failure`](Self::record_failure).
    pub fn record_failure_at(&self, now: Instant) {
        let mut state = self.lock();
        state.failures += 1;
        state.last_failure = Some(now);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// In-flight limiter
// ---------------------------------------------------------------------------

/// Bounds the number of concurrent dispatches in this process.
///
/// Requests beyond the limit are rejected immediately with a capacity
/// error rather than queued, so no credits are reserved for them.
#[derive(Debug, Clone)]
pub struct InFlightLimiter {
    limit: usize,
    count: Arc<AtomicUsize>,
}

/// RAII permit; dropping it releases the in-flight slot.
#[derive(Debug)]
pub struct InFlightPermit {
    count: Arc<AtomicUsize>,
}

impl InFlightLimiter {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// The configured concurrency limit.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Number of dispatches currently in flight.
    pub fn in_flight(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Try to claim an in-flight slot.
    ///
    /// Returns `None` when the limit is reached.
    pub fn try_acquire(&self) -> Option<InFlightPermit> {
        let claimed = self
            .count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current < self.limit).then_some(current + 1)
            });

        claimed.ok().map(|_| InFlightPermit {
            count: Arc::clone(&self.count),
        })
    }
}

impl Drop for InFlightPermit {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
