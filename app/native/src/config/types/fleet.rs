//! Fleet tuning.
//!
//! Every timeout the lifecycle engine uses is configurable because the
//! display subsystem's latency differs a lot between OS builds and machines.

use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::modules::fleet::backoff::RetryBudget;
use crate::modules::fleet::os::ManagedIdentity;
use crate::modules::fleet::topology::stability::StabilityPolicy;

/// Vendor id stamped on every managed display.
pub const DEFAULT_VENDOR_ID: u32 = 0x3456;

/// Product id stamped on every managed display.
pub const DEFAULT_PRODUCT_ID: u32 = 0x1234;

/// Vendor/product pair identifying managed displays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct IdentityConfig {
    /// Vendor id reported by managed displays.
    pub vendor_id: u32,
    /// Product id reported by managed displays.
    pub product_id: u32,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            vendor_id: DEFAULT_VENDOR_ID,
            product_id: DEFAULT_PRODUCT_ID,
        }
    }
}

impl From<IdentityConfig> for ManagedIdentity {
    fn from(config: IdentityConfig) -> Self {
        Self {
            vendor_id: config.vendor_id,
            product_id: config.product_id,
        }
    }
}

/// Stability sampling after a topology change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct StabilityConfig {
    /// Consecutive identical samples required.
    pub required_samples: usize,
    /// Overall sampling budget in milliseconds.
    pub deadline_ms: u64,
    /// Poll interval right after a change, in milliseconds.
    pub initial_interval_ms: u64,
    /// Longest poll interval while samples keep matching, in milliseconds.
    pub max_interval_ms: u64,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        let policy = StabilityPolicy::standard();
        Self {
            required_samples: policy.required_samples,
            deadline_ms: millis(policy.deadline),
            initial_interval_ms: millis(policy.initial_interval),
            max_interval_ms: millis(policy.max_interval),
        }
    }
}

impl StabilityConfig {
    #[must_use]
    pub const fn policy(&self) -> StabilityPolicy {
        StabilityPolicy {
            required_samples: self.required_samples,
            deadline: Duration::from_millis(self.deadline_ms),
            initial_interval: Duration::from_millis(self.initial_interval_ms),
            max_interval: Duration::from_millis(self.max_interval_ms),
        }
    }
}

/// Timeouts, retry budgets and layout of the display fleet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct FleetSettings {
    /// Identity stamped on managed displays.
    pub identity: IdentityConfig,

    /// How long to wait for the OS termination callback, in milliseconds.
    pub termination_timeout_ms: u64,

    /// How long to wait for a torn-down display to go offline, in milliseconds.
    pub offline_timeout_ms: u64,

    /// Fleet-wide offline gate during a coordinated rebuild, in milliseconds.
    pub rebuild_offline_timeout_ms: u64,

    /// Pause before recreating displays during a rebuild, in milliseconds.
    pub creation_cooldown_ms: u64,

    /// Creation retries after a confirmed teardown.
    pub clean_retry: RetryBudget,

    /// Creation retries when only the offline check confirmed the teardown.
    pub conservative_retry: RetryBudget,

    /// Stability sampling before evaluating the topology.
    pub stability: StabilityConfig,

    /// Repair passes before the final health check.
    pub max_repair_attempts: u32,

    /// Horizontal gap between managed displays after a repair, in pixels.
    pub layout_gap: u32,

    /// Offline re-check interval while topology events are delivered, in milliseconds.
    pub event_poll_interval_ms: u64,

    /// Offline poll interval when topology events are unavailable, in milliseconds.
    pub fallback_poll_interval_ms: u64,
}

impl Default for FleetSettings {
    fn default() -> Self {
        Self {
            identity: IdentityConfig::default(),
            termination_timeout_ms: 2_000,
            offline_timeout_ms: 8_000,
            rebuild_offline_timeout_ms: 10_000,
            creation_cooldown_ms: 500,
            clean_retry: RetryBudget::clean(),
            conservative_retry: RetryBudget::conservative(),
            stability: StabilityConfig::default(),
            max_repair_attempts: 2,
            layout_gap: 0,
            event_poll_interval_ms: 500,
            fallback_poll_interval_ms: 100,
        }
    }
}

impl FleetSettings {
    #[must_use]
    pub const fn termination_timeout(&self) -> Duration { Duration::from_millis(self.termination_timeout_ms) }

    #[must_use]
    pub const fn offline_timeout(&self) -> Duration { Duration::from_millis(self.offline_timeout_ms) }

    #[must_use]
    pub const fn rebuild_offline_timeout(&self) -> Duration {
        Duration::from_millis(self.rebuild_offline_timeout_ms)
    }

    #[must_use]
    pub const fn creation_cooldown(&self) -> Duration { Duration::from_millis(self.creation_cooldown_ms) }

    #[must_use]
    pub const fn event_poll_interval(&self) -> Duration { Duration::from_millis(self.event_poll_interval_ms) }

    #[must_use]
    pub const fn fallback_poll_interval(&self) -> Duration {
        Duration::from_millis(self.fallback_poll_interval_ms)
    }

    #[must_use]
    pub fn identity(&self) -> ManagedIdentity { self.identity.into() }
}

fn millis(duration: Duration) -> u64 { u64::try_from(duration.as_millis()).unwrap_or(u64::MAX) }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_settings_keep_defaults() {
        let settings: FleetSettings =
            serde_json::from_str(r#"{ "offlineTimeoutMs": 3000, "cleanRetry": { "attempts": 5 } }"#)
                .unwrap();

        assert_eq!(settings.offline_timeout(), Duration::from_secs(3));
        assert_eq!(settings.termination_timeout(), Duration::from_secs(2));
        assert_eq!(settings.clean_retry.attempts, 5);
        assert_eq!(settings.clean_retry.base_delay_ms, 250);
        assert_eq!(settings.conservative_retry, RetryBudget::conservative());
    }

    #[test]
    fn test_stability_defaults_match_standard_policy() {
        assert_eq!(StabilityConfig::default().policy(), StabilityPolicy::standard());
    }

    #[test]
    fn test_identity_converts_to_managed_identity() {
        let settings = FleetSettings::default();
        assert_eq!(
            settings.identity(),
            ManagedIdentity { vendor_id: DEFAULT_VENDOR_ID, product_id: DEFAULT_PRODUCT_ID }
        );
    }
}
