//! Retransmission timer with exponential backoff.

use std::time::Duration;

use quanta::Instant;

/// Minimum timeout used when none is given.
pub const DEFAULT_MIN_TIMEOUT: Duration = Duration::from_millis(250);

/// Maximum timeout used when none is given.
pub const DEFAULT_MAX_TIMEOUT: Duration = Duration::from_secs(10);

/// Largest timeout a timer accepts. Longer bounds are clamped to it.
pub const TIMEOUT_CEILING: Duration = Duration::from_secs(24 * 60 * 60);

/// Per-request retransmission timer.
///
/// The timer is passive: the owner polls [`RetryTimer::is_expired()`] and
/// calls [`RetryTimer::fire()`] when it is. Each firing doubles the timeout;
/// once the doubled timeout exceeds the ceiling the retry budget is
/// exhausted and the owner is expected to give up.
#[derive(Debug, Clone)]
pub struct RetryTimer {
    /// Floor applied when the timer is (re)started.
    min_timeout: Duration,
    /// Ceiling beyond which the budget is exhausted.
    max_timeout: Duration,

    /// Current timeout.
    timeout: Duration,
    /// Expiry time, `None` while stopped.
    deadline: Option<Instant>,
}

impl RetryTimer {
    /// Create a stopped timer.
    ///
    /// A zero bound selects the default one, both bounds are clamped to
    /// [`TIMEOUT_CEILING`], and a maximum below the minimum is raised to it.
    pub fn new(min_timeout: Duration, max_timeout: Duration) -> Self {
        let or_default = |t: Duration, default: Duration| {
            if t.is_zero() {
                default
            } else {
                t.min(TIMEOUT_CEILING)
            }
        };
        let min_timeout = or_default(min_timeout, DEFAULT_MIN_TIMEOUT);
        let max_timeout = or_default(max_timeout, DEFAULT_MAX_TIMEOUT).max(min_timeout);
        Self {
            min_timeout,
            max_timeout,
            timeout: Duration::ZERO,
            deadline: None,
        }
    }

    /// Start the timer so that it is already expired at `now`.
    pub fn start_nodelay(&mut self, now: Instant) {
        self.timeout = Duration::ZERO;
        self.deadline = Some(now);
    }

    /// (Re)start the timer with the current timeout, raised to at least the
    /// minimum timeout.
    pub fn restart(&mut self, now: Instant) {
        self.timeout = self.timeout.max(self.min_timeout);
        self.deadline = Some(now + self.timeout);
    }

    /// Stop the timer.
    #[inline]
    pub fn stop(&mut self) {
        self.deadline = None;
    }

    /// Return `true` if the timer is running.
    #[inline]
    pub fn is_running(&self) -> bool {
        self.deadline.is_some()
    }

    /// Return the expiry time, if running.
    #[inline]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Return the current timeout.
    #[inline]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Return `true` if the timer is running and its deadline has passed.
    #[inline]
    pub fn is_expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| deadline <= now)
    }

    /// Fire the timer: stop it and back off.
    /// Return `true` if the retry budget is exhausted.
    pub fn fire(&mut self) -> bool {
        self.deadline = None;
        self.timeout = self.timeout.saturating_mul(2);
        if self.timeout > self.max_timeout {
            self.timeout = self.max_timeout;
            return true;
        }
        false
    }
}
