//! Configuration system tests.

use clap::Parser;
use discover_lib::cli::Cli;
use discover_lib::core::config::LogLevel;
use discover_lib::core::{Config, ConfigBuilder};
use std::io::Write;
use std::time::Duration;

#[test]
fn test_default_config() {
    let config = Config::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.query.max_fields, 20);
    assert_eq!(config.query.default_per_page, 50);
    assert_eq!(config.query.max_per_page, 100);
    assert_eq!(config.retention.event_retention_days, 90);
    assert_eq!(config.performance.apdex_threshold_ms, 300.0);
    assert_eq!(config.performance.frustration_multiplier, 4.0);
    assert_eq!(config.logging.level, LogLevel::Warn);
    assert!(!config.logging.structured);
}

#[test]
fn test_config_builder() {
    let config = ConfigBuilder::new()
        .max_fields(10)
        .max_per_page(200)
        .execution_timeout(Duration::from_secs(5))
        .event_retention_days(30)
        .apdex_threshold_ms(500.0)
        .debug(true)
        .build()
        .unwrap();

    assert_eq!(config.query.max_fields, 10);
    assert_eq!(config.query.max_per_page, 200);
    assert_eq!(config.query.execution_timeout, Duration::from_secs(5));
    assert_eq!(config.retention.event_retention_days, 30);
    assert_eq!(config.performance.apdex_threshold_ms, 500.0);
    assert!(config.debug);
}

#[test]
fn test_yaml_config() {
    let yaml = r#"
query:
  max_fields: 15
  execution_timeout: 10s
  default_stats_period: 7d
retention:
  event_retention_days: 30
  quantize_threshold: 12h
performance:
  apdex_threshold_ms: 250
  successful_statuses: [ok]
logging:
  level: debug
  structured: true
"#;

    let config = ConfigBuilder::new().from_yaml(yaml).unwrap().build().unwrap();

    assert_eq!(config.query.max_fields, 15);
    assert_eq!(config.query.max_per_page, 100);
    assert_eq!(config.query.execution_timeout, Duration::from_secs(10));
    assert_eq!(config.query.default_stats_period, Duration::from_secs(7 * 24 * 3600));
    assert_eq!(config.retention.event_retention_days, 30);
    assert_eq!(config.retention.quantize_threshold, Duration::from_secs(12 * 3600));
    assert_eq!(config.performance.apdex_threshold_ms, 250.0);
    assert_eq!(config.performance.successful_statuses, vec!["ok".to_string()]);
    assert_eq!(config.logging.level, LogLevel::Debug);
    assert!(config.logging.structured);
}

#[test]
fn test_config_validation() {
    assert!(Config::default().validate().is_ok());

    assert!(ConfigBuilder::new().max_fields(0).build().is_err());
    assert!(ConfigBuilder::new().max_per_page(10).build().is_err());
    assert!(ConfigBuilder::new().execution_timeout(Duration::ZERO).build().is_err());
    assert!(ConfigBuilder::new().event_retention_days(0).build().is_err());
    assert!(ConfigBuilder::new().apdex_threshold_ms(-1.0).build().is_err());
    assert!(ConfigBuilder::new().max_concurrent_queries(0).build().is_err());
}

#[test]
fn test_invalid_yaml_is_config_error() {
    let err = ConfigBuilder::new().from_yaml("query: [not, a, map]").err().unwrap();
    assert_eq!(err.category(), "config");
}

#[tokio::test]
async fn test_cli_loads_config_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "query:\n  max_fields: 5\n  execution_timeout: 2s").unwrap();

    let cli = Cli::parse_from(["discover", "--config", file.path().to_str().unwrap(), "--debug"]);
    let config = cli.load_config().await.unwrap();
    assert_eq!(config.query.max_fields, 5);
    assert_eq!(config.query.execution_timeout, Duration::from_secs(2));
    assert!(config.debug);
}

#[tokio::test]
async fn test_cli_missing_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.yaml");
    let cli = Cli::parse_from(["discover", "--config", missing.to_str().unwrap()]);
    assert!(cli.load_config().await.is_err());
}
