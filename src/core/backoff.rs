//! Exponential backoff between failed iterations.

use std::time::Duration;

/// Default wait after the first consecutive failure.
pub const BASE_BACKOFF: Duration = Duration::from_secs(5 * 60);

/// Upper bound for the exponential backoff.
pub const MAX_BACKOFF: Duration = Duration::from_secs(60 * 60);

/// Cooldown after the agent reports a provider rate limit.
pub const RATE_LIMIT_COOLDOWN: Duration = Duration::from_secs(60 * 60);

/// Sleep durations used by the outer loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Wait at level 0.
    pub base: Duration,
    /// Cap that doubling never exceeds.
    pub max: Duration,
    /// Fixed wait after a rate-limit error.
    pub rate_limit_cooldown: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: BASE_BACKOFF,
            max: MAX_BACKOFF,
            rate_limit_cooldown: RATE_LIMIT_COOLDOWN,
        }
    }
}

impl BackoffPolicy {
    /// Creates a policy with custom durations.
    ///
    /// # Arguments
    ///
    /// * `base` - Wait at level 0
    /// * `max` - Cap for the doubled wait
    /// * `rate_limit_cooldown` - Wait after a rate-limit error
    #[must_use]
    pub const fn new(base: Duration, max: Duration, rate_limit_cooldown: Duration) -> Self {
        Self {
            base,
            max,
            rate_limit_cooldown,
        }
    }

    /// Calculates the wait for a given consecutive-failure level.
    ///
    /// Uses exponential backoff: `min(base * 2^level, max)`.
    ///
    /// # Examples
    ///
    /// ```
    /// use fixloop::core::BackoffPolicy;
    /// use std::time::Duration;
    ///
    /// let policy = BackoffPolicy::default();
    /// assert_eq!(policy.delay(0), Duration::from_secs(5 * 60));
    /// assert_eq!(policy.delay(2), Duration::from_secs(20 * 60));
    /// assert_eq!(policy.delay(9), Duration::from_secs(60 * 60));
    /// ```
    #[must_use]
    pub fn delay(&self, level: u32) -> Duration {
        let mut wait = self.base.min(self.max);
        for _ in 0..level {
            wait = match wait.checked_mul(2) {
                Some(doubled) if doubled < self.max => doubled,
                _ => return self.max,
            };
        }
        wait
    }
}

/// Backoff delay with the default policy (5 minutes doubling up to 1 hour).
#[must_use]
pub fn backoff(level: u32) -> Duration {
    BackoffPolicy::default().delay(level)
}

/// Consecutive-failure counter owned by the runner.
#[derive(Debug, Clone, Default)]
pub struct BackoffState {
    level: u32,
}

impl BackoffState {
    #[must_use]
    pub const fn level(&self) -> u32 {
        self.level
    }

    /// Returns the wait for the current level, then moves one level up.
    pub fn next_delay(&mut self, policy: &BackoffPolicy) -> Duration {
        let wait = policy.delay(self.level);
        self.level = self.level.saturating_add(1);
        wait
    }

    pub fn reset(&mut self) {
        self.level = 0;
    }
}
