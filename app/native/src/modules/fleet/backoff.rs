//! Retry budgets for display creation.
//!
//! Creation fails transiently right after a teardown of the same serial, so
//! creation is retried with a budget chosen from how cleanly the previous
//! display went away.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Maps an attempt number (1-based) to the delay before the next attempt.
pub trait BackoffPolicy: Send + Sync {
    fn delay_after(&self, attempt: u32) -> Duration;
}

/// Same delay after every attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FixedBackoff(pub Duration);

impl BackoffPolicy for FixedBackoff {
    fn delay_after(&self, _attempt: u32) -> Duration { self.0 }
}

/// Delay grows by `step` per attempt, capped at `max`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LinearBackoff {
    pub step: Duration,
    pub max: Duration,
}

impl BackoffPolicy for LinearBackoff {
    fn delay_after(&self, attempt: u32) -> Duration { self.step.saturating_mul(attempt).min(self.max) }
}

/// Retry budget as written in the settings file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct RetryBudget {
    /// Total attempts including the first one.
    pub attempts: u32,
    /// Delay after the first failed attempt, in milliseconds.
    pub base_delay_ms: u64,
    /// Whether the delay grows with every attempt.
    pub growing: bool,
    /// Upper bound for a growing delay, in milliseconds.
    pub max_delay_ms: u64,
}

impl RetryBudget {
    /// Budget used when the previous display's termination was confirmed.
    #[must_use]
    pub const fn clean() -> Self {
        Self {
            attempts: 3,
            base_delay_ms: 250,
            growing: false,
            max_delay_ms: 250,
        }
    }

    /// Budget used when only the offline check succeeded.
    #[must_use]
    pub const fn conservative() -> Self {
        Self {
            attempts: 10,
            base_delay_ms: 250,
            growing: true,
            max_delay_ms: 2_000,
        }
    }

    /// Builds the backoff policy described by this budget.
    #[must_use]
    pub fn policy(&self) -> Box<dyn BackoffPolicy> {
        let base = Duration::from_millis(self.base_delay_ms);
        if self.growing {
            Box::new(LinearBackoff {
                step: base,
                max: Duration::from_millis(self.max_delay_ms.max(self.base_delay_ms)),
            })
        } else {
            Box::new(FixedBackoff(base))
        }
    }
}

impl Default for RetryBudget {
    fn default() -> Self { Self::clean() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_backoff_is_constant() {
        let policy = RetryBudget::clean().policy();
        assert_eq!(policy.delay_after(1), Duration::from_millis(250));
        assert_eq!(policy.delay_after(5), Duration::from_millis(250));
    }

    #[test]
    fn test_linear_backoff_grows_and_caps() {
        let policy = RetryBudget::conservative().policy();
        assert_eq!(policy.delay_after(1), Duration::from_millis(250));
        assert_eq!(policy.delay_after(3), Duration::from_millis(750));
        assert_eq!(policy.delay_after(9), Duration::from_secs(2));
    }

    #[test]
    fn test_conservative_budget_allows_more_attempts() {
        assert!(RetryBudget::conservative().attempts > RetryBudget::clean().attempts);
    }
}
