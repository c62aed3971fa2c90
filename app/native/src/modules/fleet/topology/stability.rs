//! Stability sampling.
//!
//! The OS keeps rearranging displays for a while after one is created or torn
//! down. Repairs are only planned against a topology that has stopped moving:
//! `K` structurally equal samples in a row. Comparing each sample only with its
//! predecessor is not enough, since that would accept an A/B/A/B oscillation
//! as soon as it repeats once.

use std::time::Duration;

use tokio::time::{Instant, sleep};

use super::TopologySnapshot;

/// How to sample for stability.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StabilityPolicy {
    /// Consecutive equal samples required.
    pub required_samples: usize,
    /// Overall time budget.
    pub deadline: Duration,
    /// Poll interval after a change.
    pub initial_interval: Duration,
    /// Upper bound for the interval while samples keep matching.
    pub max_interval: Duration,
}

impl StabilityPolicy {
    /// Three matching samples within six seconds.
    #[must_use]
    pub const fn standard() -> Self {
        Self {
            required_samples: 3,
            deadline: Duration::from_secs(6),
            initial_interval: Duration::from_millis(50),
            max_interval: Duration::from_millis(400),
        }
    }

    /// Single sample; used when a fresh read is good enough.
    #[must_use]
    pub const fn fast() -> Self { Self { required_samples: 1, ..Self::standard() } }
}

impl Default for StabilityPolicy {
    fn default() -> Self { Self::standard() }
}

/// Result of [`wait_for_stable_topology`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StabilityOutcome {
    Stable(TopologySnapshot),
    Unstable { samples: usize },
}

/// Samples until `required_samples` consecutive snapshots are equal.
///
/// `sample` returns `None` when the OS could not be queried; that breaks the
/// current streak. The interval doubles while samples match and drops back to
/// `initial_interval` on any change.
pub async fn wait_for_stable_topology<F>(mut sample: F, policy: StabilityPolicy) -> StabilityOutcome
where F: FnMut() -> Option<TopologySnapshot> {
    let deadline = Instant::now() + policy.deadline;
    let required = policy.required_samples.max(1);
    let mut interval = policy.initial_interval;
    let mut last: Option<TopologySnapshot> = None;
    let mut streak = 0usize;
    let mut samples = 0usize;

    loop {
        samples += 1;
        match sample() {
            Some(snapshot) if last.as_ref() == Some(&snapshot) => {
                streak += 1;
                interval = (interval * 2).min(policy.max_interval);
            }
            Some(snapshot) => {
                last = Some(snapshot);
                streak = 1;
                interval = policy.initial_interval;
            }
            None => {
                last = None;
                streak = 0;
                interval = policy.initial_interval;
            }
        }

        if streak >= required
            && let Some(snapshot) = last
        {
            tracing::trace!(samples, "topology stable");
            return StabilityOutcome::Stable(snapshot);
        }

        let now = Instant::now();
        if now >= deadline {
            tracing::debug!(samples, streak, "topology did not stabilize before deadline");
            return StabilityOutcome::Unstable { samples };
        }
        sleep(interval.min(deadline - now)).await;
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(main: u32) -> TopologySnapshot {
        TopologySnapshot { displays: Vec::new(), main_display_id: Some(main) }
    }

    #[tokio::test(start_paused = true)]
    async fn test_oscillation_is_unstable_before_deadline() {
        let policy = StabilityPolicy::standard();
        let started = Instant::now();
        let mut flip = false;

        let outcome = wait_for_stable_topology(
            || {
                flip = !flip;
                Some(snapshot(if flip { 1 } else { 2 }))
            },
            policy,
        )
        .await;

        assert!(matches!(outcome, StabilityOutcome::Unstable { samples } if samples > 3));
        assert!(started.elapsed() <= policy.deadline);
    }

    #[tokio::test(start_paused = true)]
    async fn test_identical_samples_return_snapshot() {
        let mut calls = 0;
        let outcome = wait_for_stable_topology(
            || {
                calls += 1;
                Some(snapshot(7))
            },
            StabilityPolicy::standard(),
        )
        .await;

        assert_eq!(outcome, StabilityOutcome::Stable(snapshot(7)));
        assert_eq!(calls, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_settles_after_initial_churn() {
        let sequence = [1, 2, 1, 3, 3, 3];
        let mut index = 0;
        let outcome = wait_for_stable_topology(
            || {
                let value = sequence[index.min(sequence.len() - 1)];
                index += 1;
                Some(snapshot(value))
            },
            StabilityPolicy::standard(),
        )
        .await;

        assert_eq!(outcome, StabilityOutcome::Stable(snapshot(3)));
        assert_eq!(index, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_path_accepts_first_sample() {
        let outcome = wait_for_stable_topology(|| Some(snapshot(4)), StabilityPolicy::fast()).await;
        assert_eq!(outcome, StabilityOutcome::Stable(snapshot(4)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_samples_break_the_streak() {
        let mut calls = 0;
        let outcome = wait_for_stable_topology(
            || {
                calls += 1;
                (calls % 2 == 0).then(|| snapshot(1))
            },
            StabilityPolicy::standard(),
        )
        .await;

        assert!(matches!(outcome, StabilityOutcome::Unstable { .. }));
    }
}
