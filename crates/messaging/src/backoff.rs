//! Exponential backoff policy shared by the connect and per-record retry loops.

use std::time::Duration;

/// Default initial wait between retry attempts.
pub const DEFAULT_INITIAL_INTERVAL: Duration = Duration::from_millis(500);

/// Default cap on the wait between retry attempts.
pub const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(30);

/// Default growth factor applied after each attempt.
pub const DEFAULT_MULTIPLIER: f64 = 1.5;

/// Exponential backoff with a capped interval and no elapsed-time cutoff.
///
/// There is deliberately no jitter and no maximum number of attempts: the
/// policy produces intervals forever and the caller decides when to stop.
/// Each retry scope (a new session, a new record) gets a fresh start via
/// [`ExponentialBackoff::reset`].
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial: Duration,
    max: Duration,
    multiplier: f64,
    next: Duration,
}

impl ExponentialBackoff {
    /// Create a policy growing from `initial` up to `max`.
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            multiplier: DEFAULT_MULTIPLIER,
            next: initial,
        }
    }

    /// Override the growth factor.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Return the next wait interval and advance the policy.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = self.next.mul_f64(self.multiplier).min(self.max);
        delay
    }

    /// Restart from the initial interval.
    pub fn reset(&mut self) {
        self.next = self.initial;
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL_INTERVAL, DEFAULT_MAX_INTERVAL)
    }
}
