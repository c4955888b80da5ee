//! Configuration management for the query engine.
//!
//! This module provides configuration handling with:
//! - YAML file support
//! - Environment variable and CLI overrides (see `cli`)
//! - Validation and defaults

use crate::core::{DiscoverError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Complete configuration for the query engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Query shape limits and timeouts
    pub query: QueryConfig,
    /// Retention window and date-range quantization
    pub retention: RetentionConfig,
    /// Performance function policy constants
    pub performance: PerformanceConfig,
    /// Reference engine settings
    pub engine: EngineConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Debug mode
    #[serde(skip)]
    pub debug: bool,
}

/// Query shape limits and timeouts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Maximum number of requested fields, duplicates included
    pub max_fields: usize,
    /// Page size when the request gives none
    pub default_per_page: usize,
    /// Upper bound on page size
    pub max_per_page: usize,
    /// Time allowed for one engine call
    #[serde(with = "humantime_serde")]
    pub execution_timeout: Duration,
    /// Relative period used when neither start/end nor statsPeriod is given
    #[serde(with = "humantime_serde")]
    pub default_stats_period: Duration,
}

/// Retention window and date-range quantization
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Oldest queryable data, in days
    pub event_retention_days: u32,
    /// Relative ranges strictly longer than this are quantized
    #[serde(with = "humantime_serde")]
    pub quantize_threshold: Duration,
    /// Boundary that quantized ranges are rounded to
    #[serde(with = "humantime_serde")]
    pub quantize_granularity: Duration,
}

/// Policy constants for apdex, misery and failure functions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Default satisfied/tolerated boundary in milliseconds
    pub apdex_threshold_ms: f64,
    /// Tolerated samples lie in `(T, multiplier * T]`
    pub frustration_multiplier: f64,
    /// Transaction statuses that do not count as failures
    pub successful_statuses: Vec<String>,
    /// Prior for `user_misery_prototype`
    pub misery_alpha: f64,
    /// Prior for `user_misery_prototype`
    pub misery_beta: f64,
}

/// Reference engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Queries allowed to run at the same time before rate limiting
    pub max_concurrent_queries: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: LogLevel,
    /// Emit JSON log lines instead of compact text
    pub structured: bool,
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level
    Trace,
    /// Debug level
    Debug,
    /// Info level
    Info,
    /// Warn level
    Warn,
    /// Error level
    Error,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            query: QueryConfig::default(),
            retention: RetentionConfig::default(),
            performance: PerformanceConfig::default(),
            engine: EngineConfig::default(),
            logging: LoggingConfig::default(),
            debug: false,
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        QueryConfig {
            max_fields: 20,
            default_per_page: 50,
            max_per_page: 100,
            execution_timeout: Duration::from_secs(30),
            default_stats_period: Duration::from_secs(14 * 24 * 3600), // 14 days
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        RetentionConfig {
            event_retention_days: 90,
            quantize_threshold: Duration::from_secs(24 * 3600),
            quantize_granularity: Duration::from_secs(3600),
        }
    }
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        PerformanceConfig {
            apdex_threshold_ms: 300.0,
            frustration_multiplier: 4.0,
            successful_statuses: ["ok", "cancelled", "unknown", "unknown_error"]
                .iter()
                .map(ToString::to_string)
                .collect(),
            misery_alpha: 5.8875,
            misery_beta: 111.8625,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_concurrent_queries: 8,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: LogLevel::Warn,
            structured: false,
        }
    }
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Result<Self> {
        let config = Config::default();
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        // Query validation
        if self.query.max_fields == 0 {
            return Err(DiscoverError::config("max_fields must be greater than 0"));
        }

        if self.query.default_per_page == 0 || self.query.max_per_page == 0 {
            return Err(DiscoverError::config("page sizes must be greater than 0"));
        }

        if self.query.default_per_page > self.query.max_per_page {
            return Err(DiscoverError::config(format!(
                "default_per_page ({}) cannot exceed max_per_page ({})",
                self.query.default_per_page, self.query.max_per_page
            )));
        }

        if self.query.execution_timeout.is_zero() {
            return Err(DiscoverError::config("execution_timeout must be greater than 0"));
        }

        // Retention validation
        if self.retention.event_retention_days == 0 {
            return Err(DiscoverError::config("event_retention_days must be greater than 0"));
        }

        if self.retention.quantize_granularity.as_secs() == 0 {
            return Err(DiscoverError::config(
                "quantize_granularity must be at least one second",
            ));
        }

        // Performance validation
        if self.performance.apdex_threshold_ms <= 0.0 {
            return Err(DiscoverError::config(format!(
                "apdex_threshold_ms must be positive, got {}",
                self.performance.apdex_threshold_ms
            )));
        }

        if self.performance.frustration_multiplier < 1.0 {
            return Err(DiscoverError::config(format!(
                "frustration_multiplier must be at least 1, got {}",
                self.performance.frustration_multiplier
            )));
        }

        if self.engine.max_concurrent_queries == 0 {
            return Err(DiscoverError::config("max_concurrent_queries must be greater than 0"));
        }

        Ok(())
    }

    /// Retention window as a chrono duration
    pub fn retention_window(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.retention.event_retention_days))
    }
}

impl LogLevel {
    /// Convert to tracing filter string
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Configuration builder for programmatic construction
pub struct ConfigBuilder {
    config: Config,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        ConfigBuilder {
            config: Config::default(),
        }
    }

    /// Load configuration from YAML string
    pub fn from_yaml(mut self, yaml: &str) -> Result<Self> {
        self.config = serde_yaml::from_str(yaml)
            .map_err(|e| DiscoverError::config(format!("Failed to parse YAML config: {}", e)))?;
        Ok(self)
    }

    /// Set field cap
    pub fn max_fields(mut self, max: usize) -> Self {
        self.config.query.max_fields = max;
        self
    }

    /// Set maximum page size
    pub fn max_per_page(mut self, max: usize) -> Self {
        self.config.query.max_per_page = max;
        self
    }

    /// Set engine call timeout
    pub fn execution_timeout(mut self, timeout: Duration) -> Self {
        self.config.query.execution_timeout = timeout;
        self
    }

    /// Set retention window
    pub fn event_retention_days(mut self, days: u32) -> Self {
        self.config.retention.event_retention_days = days;
        self
    }

    /// Set default apdex threshold
    pub fn apdex_threshold_ms(mut self, threshold: f64) -> Self {
        self.config.performance.apdex_threshold_ms = threshold;
        self
    }

    /// Set concurrent query limit
    pub fn max_concurrent_queries(mut self, max: usize) -> Self {
        self.config.engine.max_concurrent_queries = max;
        self
    }

    /// Set debug mode
    pub fn debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.query.max_fields, 20);
        assert_eq!(config.retention.event_retention_days, 90);
    }

    #[test]
    fn test_page_size_conflict() {
        let mut config = Config::default();
        config.query.default_per_page = 500;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_threshold() {
        let mut config = Config::default();
        config.performance.apdex_threshold_ms = 0.0;
        assert!(config.validate().is_err());

        config.performance.apdex_threshold_ms = 300.0;
        config.performance.frustration_multiplier = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_builder() {
        let config = ConfigBuilder::new()
            .max_fields(10)
            .event_retention_days(30)
            .apdex_threshold_ms(500.0)
            .execution_timeout(Duration::from_secs(5))
            .debug(true)
            .build();

        assert!(config.is_ok());
        let config = config.unwrap();
        assert_eq!(config.query.max_fields, 10);
        assert_eq!(config.retention.event_retention_days, 30);
        assert_eq!(config.performance.apdex_threshold_ms, 500.0);
        assert_eq!(config.query.execution_timeout, Duration::from_secs(5));
        assert!(config.debug);
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r#"
query:
  max_fields: 15
  execution_timeout: 10s
  default_stats_period: 24h
retention:
  event_retention_days: 30
  quantize_granularity: 5m
performance:
  apdex_threshold_ms: 250
"#;

        let config = ConfigBuilder::new().from_yaml(yaml).unwrap().build();

        assert!(config.is_ok());
        let config = config.unwrap();
        assert_eq!(config.query.max_fields, 15);
        assert_eq!(config.query.default_per_page, 50);
        assert_eq!(config.query.execution_timeout, Duration::from_secs(10));
        assert_eq!(config.query.default_stats_period, Duration::from_secs(86400));
        assert_eq!(config.retention.quantize_granularity, Duration::from_secs(300));
        assert_eq!(config.performance.apdex_threshold_ms, 250.0);
        assert_eq!(config.performance.successful_statuses.len(), 4);
    }
}
