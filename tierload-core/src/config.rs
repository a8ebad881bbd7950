//! Configuration types

use crate::{ConfigError, TierId};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Default TTL for the critical tier.
pub const DEFAULT_CRITICAL_TTL_MS: u64 = 15_000;
/// Default TTL for the secondary tier.
pub const DEFAULT_SECONDARY_TTL_MS: u64 = 30_000;
/// Default TTL for the detailed tier.
pub const DEFAULT_DETAILED_TTL_MS: u64 = 60_000;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 300;
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 10_000;
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;
pub const DEFAULT_BREAKER_FAILURE_THRESHOLD: u32 = 5;
pub const DEFAULT_BREAKER_COOLDOWN_MS: u64 = 30_000;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 100;

/// Loader configuration.
///
/// Every field has a default, so a TOML file only needs the keys it wants to
/// override. Keys are snake_case; the camelCase spellings used by the
/// dashboard front-end are accepted as aliases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoaderConfig {
    #[serde(alias = "criticalTtlMs")]
    pub critical_ttl_ms: u64,
    #[serde(alias = "secondaryTtlMs")]
    pub secondary_ttl_ms: u64,
    #[serde(alias = "detailedTtlMs")]
    pub detailed_ttl_ms: u64,

    #[serde(alias = "maxRetries")]
    pub max_retries: u32,
    #[serde(alias = "backoffBaseMs")]
    pub backoff_base_ms: u64,
    #[serde(alias = "backoffMaxMs")]
    pub backoff_max_ms: u64,
    #[serde(alias = "backoffMultiplier")]
    pub backoff_multiplier: f64,
    /// Upper bound of random jitter added to each backoff delay
    #[serde(alias = "backoffJitterMs")]
    pub backoff_jitter_ms: u64,

    #[serde(alias = "breakerFailureThreshold")]
    pub breaker_failure_threshold: u32,
    #[serde(alias = "breakerCooldownMs")]
    pub breaker_cooldown_ms: u64,
    #[serde(alias = "requestTimeoutMs")]
    pub request_timeout_ms: u64,

    #[serde(alias = "cacheMaxEntries")]
    pub cache_max_entries: usize,
    /// Try one combined fetch before falling back to per-tier fetches
    #[serde(alias = "comprehensiveEnabled")]
    pub comprehensive_enabled: bool,
    /// Start the next tier automatically when a tier succeeds
    #[serde(alias = "autoAdvance")]
    pub auto_advance: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            critical_ttl_ms: DEFAULT_CRITICAL_TTL_MS,
            secondary_ttl_ms: DEFAULT_SECONDARY_TTL_MS,
            detailed_ttl_ms: DEFAULT_DETAILED_TTL_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            backoff_jitter_ms: 0,
            breaker_failure_threshold: DEFAULT_BREAKER_FAILURE_THRESHOLD,
            breaker_cooldown_ms: DEFAULT_BREAKER_COOLDOWN_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            cache_max_entries: DEFAULT_CACHE_MAX_ENTRIES,
            comprehensive_enabled: true,
            auto_advance: true,
        }
    }
}

impl LoaderConfig {
    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `TIERLOAD_CRITICAL_TTL_MS` (default: 15000)
    /// - `TIERLOAD_SECONDARY_TTL_MS` (default: 30000)
    /// - `TIERLOAD_DETAILED_TTL_MS` (default: 60000)
    /// - `TIERLOAD_MAX_RETRIES` (default: 3)
    /// - `TIERLOAD_BACKOFF_BASE_MS` (default: 300)
    /// - `TIERLOAD_BACKOFF_MAX_MS` (default: 10000)
    /// - `TIERLOAD_BACKOFF_MULTIPLIER` (default: 2.0)
    /// - `TIERLOAD_BACKOFF_JITTER_MS` (default: 0)
    /// - `TIERLOAD_BREAKER_FAILURE_THRESHOLD` (default: 5)
    /// - `TIERLOAD_BREAKER_COOLDOWN_MS` (default: 30000)
    /// - `TIERLOAD_REQUEST_TIMEOUT_MS` (default: 10000)
    /// - `TIERLOAD_CACHE_MAX_ENTRIES` (default: 100)
    /// - `TIERLOAD_COMPREHENSIVE_ENABLED` (default: true)
    /// - `TIERLOAD_AUTO_ADVANCE` (default: true)
    pub fn from_env() -> Self {
        Self::default().overlay_env()
    }

    /// Override fields present in the environment, keeping `self` otherwise.
    pub fn overlay_env(self) -> Self {
        Self {
            critical_ttl_ms: env_or("TIERLOAD_CRITICAL_TTL_MS", self.critical_ttl_ms),
            secondary_ttl_ms: env_or("TIERLOAD_SECONDARY_TTL_MS", self.secondary_ttl_ms),
            detailed_ttl_ms: env_or("TIERLOAD_DETAILED_TTL_MS", self.detailed_ttl_ms),
            max_retries: env_or("TIERLOAD_MAX_RETRIES", self.max_retries),
            backoff_base_ms: env_or("TIERLOAD_BACKOFF_BASE_MS", self.backoff_base_ms),
            backoff_max_ms: env_or("TIERLOAD_BACKOFF_MAX_MS", self.backoff_max_ms),
            backoff_multiplier: env_or("TIERLOAD_BACKOFF_MULTIPLIER", self.backoff_multiplier),
            backoff_jitter_ms: env_or("TIERLOAD_BACKOFF_JITTER_MS", self.backoff_jitter_ms),
            breaker_failure_threshold: env_or(
                "TIERLOAD_BREAKER_FAILURE_THRESHOLD",
                self.breaker_failure_threshold,
            ),
            breaker_cooldown_ms: env_or("TIERLOAD_BREAKER_COOLDOWN_MS", self.breaker_cooldown_ms),
            request_timeout_ms: env_or("TIERLOAD_REQUEST_TIMEOUT_MS", self.request_timeout_ms),
            cache_max_entries: env_or("TIERLOAD_CACHE_MAX_ENTRIES", self.cache_max_entries),
            comprehensive_enabled: env_or(
                "TIERLOAD_COMPREHENSIVE_ENABLED",
                self.comprehensive_enabled,
            ),
            auto_advance: env_or("TIERLOAD_AUTO_ADVANCE", self.auto_advance),
        }
    }

    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })
    }

    /// Read and parse a TOML file.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&contents)
    }

    /// Cache TTL for a tier.
    pub fn ttl_for(&self, tier: TierId) -> Duration {
        Duration::from_millis(match tier {
            TierId::Critical => self.critical_ttl_ms,
            TierId::Secondary => self.secondary_ttl_ms,
            TierId::Detailed => self.detailed_ttl_ms,
        })
    }

    /// TTL for comprehensive results: the shortest tier TTL, so a bundle is
    /// never considered fresher than its most volatile part.
    pub fn comprehensive_ttl(&self) -> Duration {
        TierId::ALL
            .iter()
            .map(|tier| self.ttl_for(*tier))
            .min()
            .unwrap_or(Duration::from_millis(DEFAULT_CRITICAL_TTL_MS))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn breaker_cooldown(&self) -> Duration {
        Duration::from_millis(self.breaker_cooldown_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - every TTL, timeout, and cooldown is positive
    /// - backoff_max_ms >= backoff_base_ms
    /// - backoff_multiplier >= 1.0
    /// - breaker_failure_threshold >= 1
    /// - cache_max_entries >= 1
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("critical_ttl_ms", self.critical_ttl_ms),
            ("secondary_ttl_ms", self.secondary_ttl_ms),
            ("detailed_ttl_ms", self.detailed_ttl_ms),
            ("backoff_base_ms", self.backoff_base_ms),
            ("breaker_cooldown_ms", self.breaker_cooldown_ms),
            ("request_timeout_ms", self.request_timeout_ms),
        ] {
            if value == 0 {
                return Err(invalid(field, value, "must be greater than 0"));
            }
        }

        if self.backoff_max_ms < self.backoff_base_ms {
            return Err(invalid(
                "backoff_max_ms",
                self.backoff_max_ms,
                "must be >= backoff_base_ms",
            ));
        }

        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(invalid(
                "backoff_multiplier",
                self.backoff_multiplier,
                "must be a finite value >= 1.0",
            ));
        }

        if self.breaker_failure_threshold == 0 {
            return Err(invalid(
                "breaker_failure_threshold",
                self.breaker_failure_threshold,
                "must be at least 1",
            ));
        }

        if self.cache_max_entries == 0 {
            return Err(invalid(
                "cache_max_entries",
                self.cache_max_entries,
                "must be at least 1",
            ));
        }

        Ok(())
    }
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn env_or<T: FromStr>(key: &str, fallback: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(fallback)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = LoaderConfig::default();
        assert_eq!(config.critical_ttl_ms, 15_000);
        assert_eq!(config.secondary_ttl_ms, 30_000);
        assert_eq!(config.detailed_ttl_ms, 60_000);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.backoff_base_ms, 300);
        assert_eq!(config.breaker_failure_threshold, 5);
        assert_eq!(config.breaker_cooldown_ms, 30_000);
        assert_eq!(config.request_timeout_ms, 10_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_ttl_for_tiers_is_staged() {
        let config = LoaderConfig::default();
        assert!(config.ttl_for(TierId::Critical) < config.ttl_for(TierId::Secondary));
        assert!(config.ttl_for(TierId::Secondary) < config.ttl_for(TierId::Detailed));
        assert_eq!(config.comprehensive_ttl(), Duration::from_secs(15));
    }

    #[test]
    fn test_toml_partial_override() {
        let config = LoaderConfig::from_toml_str(
            r#"
            max_retries = 1
            criticalTtlMs = 5000
            auto_advance = false
            "#,
        )
        .unwrap();
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.critical_ttl_ms, 5000);
        assert!(!config.auto_advance);
        assert_eq!(config.detailed_ttl_ms, DEFAULT_DETAILED_TTL_MS);
    }

    #[test]
    fn test_toml_rejects_unknown_keys() {
        let err = LoaderConfig::from_toml_str("max_retires = 2").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_from_path_missing_file() {
        let err = LoaderConfig::from_path(Path::new("/nonexistent/tierload.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_from_path_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "request_timeout_ms = 2500").unwrap();
        let config = LoaderConfig::from_path(file.path()).unwrap();
        assert_eq!(config.request_timeout(), Duration::from_millis(2500));
    }

    #[test]
    fn test_validate_rejects_zero_ttl() {
        let config = LoaderConfig {
            secondary_ttl_ms: 0,
            ..LoaderConfig::default()
        };
        match config.validate() {
            Err(ConfigError::InvalidValue { field, .. }) => assert_eq!(field, "secondary_ttl_ms"),
            other => panic!("expected InvalidValue, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_inverted_backoff_bounds() {
        let config = LoaderConfig {
            backoff_base_ms: 500,
            backoff_max_ms: 100,
            ..LoaderConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_shrinking_multiplier() {
        let config = LoaderConfig {
            backoff_multiplier: 0.5,
            ..LoaderConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_threshold() {
        let config = LoaderConfig {
            breaker_failure_threshold: 0,
            ..LoaderConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
