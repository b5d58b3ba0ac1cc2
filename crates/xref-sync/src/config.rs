//! Sync layer configuration.
//!
//! This module defines the operational limits of the apply pipeline.

use std::str::FromStr;

use serde::Deserialize;

/// Configuration for the apply pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SyncConfig {
    /// Deferred records older than this are evicted as stale.
    #[serde(default = "SyncConfig::default_stale_after")]
    pub stale_after_seconds: u64,

    /// Capacity of the deferred queue.
    #[serde(default = "SyncConfig::default_max_deferred")]
    pub max_deferred_records: usize,

    /// Maximum number of records applied concurrently by a batch.
    #[serde(default = "SyncConfig::default_apply_concurrency")]
    pub apply_concurrency: usize,

    /// Deferred records re-deferred more often than this are evicted as stale.
    #[serde(default = "SyncConfig::default_max_retry_attempts")]
    pub max_retry_attempts: u32,
}

impl SyncConfig {
    const fn default_stale_after() -> u64 {
        86_400 // 1 day
    }

    const fn default_max_deferred() -> usize {
        100_000
    }

    const fn default_apply_concurrency() -> usize {
        16
    }

    const fn default_max_retry_attempts() -> u32 {
        32
    }

    /// Build a configuration from `XREF_*` environment variables.
    ///
    /// Unset or unparsable variables fall back to their defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            stale_after_seconds: env_or("XREF_STALE_AFTER_SECONDS", Self::default_stale_after()),
            max_deferred_records: env_or("XREF_MAX_DEFERRED", Self::default_max_deferred()),
            apply_concurrency: env_or(
                "XREF_APPLY_CONCURRENCY",
                Self::default_apply_concurrency(),
            ),
            max_retry_attempts: env_or(
                "XREF_MAX_RETRY_ATTEMPTS",
                Self::default_max_retry_attempts(),
            ),
        }
    }

    /// Get the stale threshold as a `chrono::TimeDelta`.
    ///
    /// Thresholds beyond the representable range mean "never stale".
    #[must_use]
    pub fn stale_after(&self) -> chrono::TimeDelta {
        i64::try_from(self.stale_after_seconds)
            .ok()
            .and_then(chrono::TimeDelta::try_seconds)
            .unwrap_or(chrono::TimeDelta::MAX)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            stale_after_seconds: Self::default_stale_after(),
            max_deferred_records: Self::default_max_deferred(),
            apply_concurrency: Self::default_apply_concurrency(),
            max_retry_attempts: Self::default_max_retry_attempts(),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "Ignoring unparsable setting");
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = SyncConfig::default();
        assert_eq!(config.stale_after_seconds, 86_400);
        assert_eq!(config.max_deferred_records, 100_000);
        assert_eq!(config.apply_concurrency, 16);
        assert_eq!(config.max_retry_attempts, 32);
    }

    #[test]
    fn stale_after_duration() {
        let config = SyncConfig {
            stale_after_seconds: 90,
            ..SyncConfig::default()
        };
        assert_eq!(config.stale_after(), chrono::Duration::seconds(90));
    }

    #[test]
    fn huge_stale_after_saturates() {
        for stale_after_seconds in [10_u64.pow(16), u64::MAX] {
            let config = SyncConfig {
                stale_after_seconds,
                ..SyncConfig::default()
            };
            assert_eq!(config.stale_after(), chrono::TimeDelta::MAX);
        }
    }

    #[test]
    fn env_or_falls_back() {
        assert_eq!(env_or("XREF_TEST_SURELY_UNSET", 7u32), 7);
    }
}
