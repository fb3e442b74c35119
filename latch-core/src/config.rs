//! Configuration types

use crate::*;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::time::Duration;

/// Default maximum number of cached read results per environment.
pub const DEFAULT_CAPACITY: usize = 1000;

/// Default time fetched data stays retained after its request completes.
pub const DEFAULT_RETENTION_GRACE: Duration = Duration::from_secs(30);

/// Configuration for one environment's data cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of entries before least-recently-used eviction.
    pub capacity: usize,
    /// Grace window between request completion and release of retained data.
    pub retention_grace: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            retention_grace: DEFAULT_RETENTION_GRACE,
        }
    }
}

impl CacheConfig {
    /// Create a new cache config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of cached entries.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the retention grace window.
    pub fn with_retention_grace(mut self, grace: Duration) -> Self {
        self.retention_grace = grace;
        self
    }

    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `LATCH_CACHE_CAPACITY`: maximum cached entries (default: 1000)
    /// - `LATCH_RETENTION_GRACE_MS`: retention grace in milliseconds (default: 30000)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            capacity: std::env::var("LATCH_CACHE_CAPACITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.capacity),
            retention_grace: std::env::var("LATCH_RETENTION_GRACE_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.retention_grace),
        }
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - capacity > 0
    /// - retention_grace is positive
    pub fn validate(&self) -> LatchResult<()> {
        self.capacity_nonzero().map(|_| ())
    }

    /// Validate the configuration and return the capacity as a `NonZeroUsize`.
    pub fn capacity_nonzero(&self) -> LatchResult<NonZeroUsize> {
        let capacity = NonZeroUsize::new(self.capacity).ok_or_else(|| ConfigError::InvalidValue {
            field: "capacity".to_string(),
            value: self.capacity.to_string(),
            reason: "capacity must be greater than 0".to_string(),
        })?;

        if self.retention_grace.is_zero() {
            return Err(LatchError::Config(ConfigError::InvalidValue {
                field: "retention_grace".to_string(),
                value: format!("{:?}", self.retention_grace),
                reason: "retention_grace must be positive".to_string(),
            }));
        }

        Ok(capacity)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = CacheConfig::default();
        assert_eq!(config.capacity, 1000);
        assert_eq!(config.retention_grace, Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = CacheConfig::new()
            .with_capacity(16)
            .with_retention_grace(Duration::from_millis(250));
        assert_eq!(config.capacity, 16);
        assert_eq!(config.retention_grace, Duration::from_millis(250));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let err = CacheConfig::new().with_capacity(0).validate().unwrap_err();
        match err {
            LatchError::Config(ConfigError::InvalidValue { field, .. }) => {
                assert_eq!(field, "capacity")
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_zero_grace_rejected() {
        let result = CacheConfig::new()
            .with_retention_grace(Duration::ZERO)
            .validate();
        assert!(matches!(
            result,
            Err(LatchError::Config(ConfigError::InvalidValue { ref field, .. })) if field == "retention_grace"
        ));
    }

    #[test]
    fn test_capacity_nonzero() {
        let config = CacheConfig::new().with_capacity(16);
        assert_eq!(config.capacity_nonzero().unwrap().get(), 16);
        assert!(CacheConfig::new().with_capacity(0).capacity_nonzero().is_err());
        assert!(CacheConfig::new()
            .with_retention_grace(Duration::ZERO)
            .capacity_nonzero()
            .is_err());
    }

    #[test]
    fn test_config_serde_roundtrip() {
        let config = CacheConfig::new().with_capacity(42);
        let json = serde_json::to_string(&config).unwrap();
        let parsed: CacheConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }
}
