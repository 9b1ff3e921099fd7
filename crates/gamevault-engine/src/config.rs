//! Engine tuning knobs.

use std::time::Duration;

use gamevault_core::RewardCurves;
use serde::{Deserialize, Serialize};

/// Engine configuration.
///
/// Every field has a default, so a partial JSON document or an empty one is a
/// valid configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How long player progress stays cached.
    pub progress_cache_ttl_secs: u64,

    /// How long remote config values stay cached.
    pub config_cache_ttl_secs: u64,

    /// How long the system status snapshot stays cached.
    pub status_cache_ttl_secs: u64,

    /// Purchase initiations allowed per player per window.
    pub purchase_rate_limit: usize,

    /// Rate limit window.
    pub purchase_rate_window_secs: u64,

    /// Currency rewards for XP, per source.
    pub reward_curves: RewardCurves,

    /// Effects delivered per outbox pass.
    pub outbox_batch_size: usize,

    /// Outbox poll interval when no commit wakes the dispatcher.
    pub outbox_poll_interval_ms: u64,

    /// Failed deliveries before an effect is dropped.
    pub outbox_max_attempts: u32,

    /// How often the liveops scheduler looks for due and expired events.
    pub scheduler_interval_secs: u64,

    /// Row lock wait bound.
    pub lock_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            progress_cache_ttl_secs: 5,
            config_cache_ttl_secs: 30,
            status_cache_ttl_secs: 10,
            purchase_rate_limit: 5,
            purchase_rate_window_secs: 60,
            reward_curves: RewardCurves::default(),
            outbox_batch_size: 100,
            outbox_poll_interval_ms: 1_000,
            outbox_max_attempts: 5,
            scheduler_interval_secs: 15,
            lock_timeout_ms: 5_000,
        }
    }
}

impl EngineConfig {
    /// Progress cache TTL.
    #[must_use]
    pub const fn progress_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.progress_cache_ttl_secs)
    }

    /// Config cache TTL.
    #[must_use]
    pub const fn config_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.config_cache_ttl_secs)
    }

    /// Status cache TTL.
    #[must_use]
    pub const fn status_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.status_cache_ttl_secs)
    }

    /// Rate limit window.
    #[must_use]
    pub const fn purchase_rate_window(&self) -> Duration {
        Duration::from_secs(self.purchase_rate_window_secs)
    }

    /// Outbox poll interval.
    #[must_use]
    pub const fn outbox_poll_interval(&self) -> Duration {
        Duration::from_millis(self.outbox_poll_interval_ms)
    }

    /// Scheduler interval.
    #[must_use]
    pub const fn scheduler_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler_interval_secs)
    }

    /// Row lock timeout.
    #[must_use]
    pub const fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"purchase_rate_limit": 3}"#).unwrap();
        assert_eq!(config.purchase_rate_limit, 3);
        assert_eq!(config.progress_cache_ttl(), Duration::from_secs(5));
        assert_eq!(config.lock_timeout(), Duration::from_secs(5));
        assert_eq!(config.reward_curves.default.gems_per_level, 5);
    }
}
