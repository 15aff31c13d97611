//! Test configuration builder for creating test setups quickly.

use std::time::Duration;

use crate::config::Configuration;

/// Builder for creating test configurations.
///
/// Starts from the defaults and exposes a fluent API for the knobs tests
/// usually care about.
///
/// # Example
///
/// ```rust,ignore
/// use common::testing::TestConfigBuilder;
///
/// let config = TestConfigBuilder::new()
///     .with_flux_interval(Duration::ZERO)
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct TestConfigBuilder {
    config: Configuration,
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Configuration::default(),
        }
    }

    /// Disable the bucket cache.
    pub fn without_cache(mut self) -> Self {
        self.config.cache.enabled = false;
        self
    }

    /// Set the window of recent data the cache refuses to store.
    pub fn with_flux_interval(mut self, interval: Duration) -> Self {
        self.config.cache.flux_interval = interval;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.config.cache.ttl = ttl;
        self
    }

    /// Set the look-back applied to the resource bucket window.
    pub fn with_bucket_lookback(mut self, seconds: u64) -> Self {
        self.config.query.bucket_lookback = seconds;
        self
    }

    /// Make unknown filter keys a hard error.
    pub fn strict_keys(mut self) -> Self {
        self.config.query.ignore_not_found_keys = false;
        self
    }

    pub fn with_default_step(mut self, step: Duration) -> Self {
        self.config.postprocess.default_step = step;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> Configuration {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_builder() {
        let config = TestConfigBuilder::new().build();
        assert!(config.cache.enabled);
        assert_eq!(config.query.bucket_lookback, 1800);
    }

    #[test]
    fn test_cache_knobs() {
        let config = TestConfigBuilder::new()
            .with_flux_interval(Duration::ZERO)
            .with_cache_ttl(Duration::from_secs(60))
            .build();
        assert_eq!(config.cache.flux_interval, Duration::ZERO);
        assert_eq!(config.cache.ttl, Duration::from_secs(60));

        let config = TestConfigBuilder::new().without_cache().build();
        assert!(!config.cache.enabled);
    }

    #[test]
    fn test_query_knobs() {
        let config = TestConfigBuilder::new()
            .with_bucket_lookback(0)
            .strict_keys()
            .with_default_step(Duration::from_secs(30))
            .build();
        assert_eq!(config.query.bucket_lookback, 0);
        assert!(!config.query.ignore_not_found_keys);
        assert_eq!(config.postprocess.default_step, Duration::from_secs(30));
    }
}
