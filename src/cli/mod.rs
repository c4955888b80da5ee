//! Command-line interface for Discover.
//!
//! Runs a single events query against a JSON fixture and prints the
//! response, e.g. `discover --fixture events.json --field title --field count()`.

use crate::core::config::{LogLevel, LoggingConfig};
use crate::core::{Config, DiscoverError, ErrorResponse, Result};
use crate::query::{DiscoverService, EventsRequest, Principal};
use crate::storage::{Event, InMemoryEventStore, Project};
use clap::Parser;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Run events queries against a fixture of stored events
#[derive(Parser, Debug)]
#[command(name = "discover")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// JSON fixture with projects, events and starred transactions
    #[arg(long, env = "DISCOVER_FIXTURE")]
    pub fixture: Option<PathBuf>,

    /// Field or function to select (repeatable)
    #[arg(short, long = "field")]
    pub fields: Vec<String>,

    /// Search filter
    #[arg(short, long, default_value = "")]
    pub query: String,

    /// Sort key, prefix with `-` for descending (repeatable)
    #[arg(short, long, allow_hyphen_values = true)]
    pub sort: Vec<String>,

    /// Project id to query, -1 for all accessible projects (repeatable)
    #[arg(short, long, allow_negative_numbers = true)]
    pub project: Vec<i64>,

    /// Relative period such as `14d`
    #[arg(long)]
    pub stats_period: Option<String>,

    /// Absolute range start
    #[arg(long)]
    pub start: Option<String>,

    /// Absolute range end
    #[arg(long)]
    pub end: Option<String>,

    /// Pagination cursor from a previous response
    #[arg(long)]
    pub cursor: Option<String>,

    /// Rows per page
    #[arg(long)]
    pub per_page: Option<usize>,

    /// Return a single page of up to the maximum page size
    #[arg(long)]
    pub no_pagination: bool,

    /// User the query runs as
    #[arg(long, env = "DISCOVER_USER_ID", default_value_t = 1)]
    pub user_id: u64,

    /// Organization the query runs in
    #[arg(long, env = "DISCOVER_ORG_ID", default_value_t = 1)]
    pub organization_id: u64,

    /// Allow querying several projects at once
    #[arg(long, env = "DISCOVER_GLOBAL_VIEWS")]
    pub global_views: bool,

    /// Configuration file path (default: ~/.config/discover/config.yaml)
    #[arg(short, long, env = "DISCOVER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, env = "DISCOVER_DEBUG")]
    pub debug: bool,

    /// Validate configuration and exit
    #[arg(long)]
    pub check_config: bool,
}

/// Contents of a fixture file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Fixture {
    /// Projects to register
    pub projects: Vec<Project>,
    /// `(user_id, project_id)` memberships
    pub members: Vec<Membership>,
    /// Events, stored in file order
    pub events: Vec<Event>,
    /// Starred transactions
    pub starred: Vec<StarredTransaction>,
}

/// A user restricted to a project.
#[derive(Debug, Deserialize)]
pub struct Membership {
    /// User id
    pub user_id: u64,
    /// Project id
    pub project_id: u64,
}

/// A transaction starred by a user.
#[derive(Debug, Deserialize)]
pub struct StarredTransaction {
    /// User id
    pub user_id: u64,
    /// Organization the star belongs to
    #[serde(default = "default_organization")]
    pub organization_id: u64,
    /// Project id
    pub project_id: u64,
    /// Transaction name
    pub transaction: String,
}

fn default_organization() -> u64 {
    1
}

impl Fixture {
    /// Read a fixture file.
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Build a store holding the fixture contents.
    pub fn into_store(self, config: &Config) -> Result<InMemoryEventStore> {
        let store = InMemoryEventStore::with_config(config);
        for project in self.projects {
            store.add_project(project);
        }
        for member in self.members {
            store.add_member(member.user_id, member.project_id);
        }
        let stored = store.store_events(self.events)?;
        for star in self.starred {
            store.star_transaction(star.user_id, star.organization_id, star.project_id, star.transaction);
        }
        tracing::debug!(events = stored, issues = store.issue_count(), "Loaded fixture");
        Ok(store)
    }
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Load configuration with proper precedence:
    /// 1. CLI arguments (highest priority)
    /// 2. Environment variables
    /// 3. Config file
    /// 4. Defaults (lowest priority)
    pub async fn load_config(&self) -> Result<Config> {
        use crate::core::config::ConfigBuilder;

        let mut builder = ConfigBuilder::new();

        let config_path = if let Some(path) = &self.config {
            path.clone()
        } else {
            let default_path = dirs::config_dir()
                .map(|d| d.join("discover").join("config.yaml"))
                .unwrap_or_else(|| PathBuf::from("~/.config/discover/config.yaml"));

            if default_path.exists() {
                default_path
            } else {
                return builder.debug(self.debug).build();
            }
        };

        match tokio::fs::read_to_string(&config_path).await {
            Ok(content) => {
                builder = builder.from_yaml(&content)?;
                tracing::info!("Loaded configuration from: {:?}", config_path);
            },
            Err(e) if self.config.is_some() => {
                return Err(DiscoverError::config(format!(
                    "Failed to read config file {:?}: {}",
                    config_path, e
                )));
            },
            Err(_) => {
                tracing::debug!("No config file found at {:?}, using defaults", config_path);
            },
        }

        builder.debug(self.debug).build()
    }

    /// Initialize logging based on configuration.
    ///
    /// `RUST_LOG` wins, then `--debug`, then `DISCOVER_LOG_LEVEL`, then the
    /// configured level. Logs go to stderr so stdout carries only the response.
    pub fn init_logging(&self, logging: &LoggingConfig) -> Result<()> {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

        let directive = self.log_directive(std::env::var("DISCOVER_LOG_LEVEL").ok(), logging);
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

        let registry = tracing_subscriber::registry().with(filter);
        let result = if logging.structured {
            registry
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr).json())
                .try_init()
        } else {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(self.debug)
                        .compact(),
                )
                .try_init()
        };

        result.map_err(|e| DiscoverError::config(format!("Failed to initialize logging: {}", e)))
    }

    fn log_directive(&self, env_level: Option<String>, logging: &LoggingConfig) -> String {
        if self.debug {
            return LogLevel::Debug.as_str().to_string();
        }
        env_level.unwrap_or_else(|| logging.level.as_str().to_string())
    }

    /// The request described by the arguments.
    pub fn request(&self) -> EventsRequest {
        EventsRequest {
            fields: self.fields.clone(),
            query: self.query.clone(),
            sort: self.sort.clone(),
            project: self.project.clone(),
            start: self.start.clone(),
            end: self.end.clone(),
            stats_period: self.stats_period.clone(),
            cursor: self.cursor.clone(),
            per_page: self.per_page,
            no_pagination: self.no_pagination,
        }
    }

    /// The principal the query runs as.
    pub fn principal(&self) -> Principal {
        Principal::new(self.user_id, self.organization_id).with_global_views(self.global_views)
    }
}

/// Execute the Discover CLI.
pub async fn execute(cli: Cli) -> Result<()> {
    let config = cli.load_config().await?;
    cli.init_logging(&config.logging)?;
    tracing::debug!(level = config.logging.level.as_str(), "Logging initialized");

    if cli.check_config {
        config.validate()?;
        println!("Configuration is valid!");
        println!("  Max fields: {}", config.query.max_fields);
        println!("  Page size: {} (max {})", config.query.default_per_page, config.query.max_per_page);
        println!("  Retention: {} days", config.retention.event_retention_days);
        println!("  Execution timeout: {:?}", config.query.execution_timeout);
        return Ok(());
    }

    let fixture = match &cli.fixture {
        Some(path) => Fixture::load(path).await?,
        None => return Err(DiscoverError::config("--fixture is required to run a query")),
    };
    let store = Arc::new(fixture.into_store(&config)?);
    let service = DiscoverService::with_store(config, store);

    match service.events(&cli.principal(), &cli.request()).await {
        Ok(response) => {
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        },
        Err(err) => {
            println!("{}", serde_json::to_string_pretty(&ErrorResponse::from(&err))?);
            Err(err)
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::selects_all_projects;
    use crate::storage::KeyTransactionStore;

    #[test]
    fn test_cli_parses_query_arguments() {
        let cli = Cli::parse_from([
            "discover",
            "--fixture",
            "events.json",
            "--field",
            "title",
            "--field",
            "count()",
            "--query",
            "event.type:error",
            "--sort",
            "-count",
            "--project",
            "-1",
            "--stats-period",
            "14d",
            "--global-views",
        ]);

        let request = cli.request();
        assert_eq!(request.fields, vec!["title", "count()"]);
        assert_eq!(request.sort, vec!["-count"]);
        assert!(selects_all_projects(&request.project));
        assert_eq!(request.stats_period.as_deref(), Some("14d"));
        assert!(cli.principal().global_views);
    }

    #[test]
    fn test_log_level_precedence() {
        let logging = LoggingConfig {
            level: LogLevel::Error,
            structured: false,
        };

        let cli = Cli::parse_from(["discover"]);
        assert_eq!(cli.log_directive(None, &logging), "error");
        assert_eq!(cli.log_directive(Some("info".to_string()), &logging), "info");

        let cli = Cli::parse_from(["discover", "--debug"]);
        assert_eq!(cli.log_directive(Some("info".to_string()), &logging), "debug");
    }

    #[test]
    fn test_fixture_into_store() {
        let fixture: Fixture = serde_json::from_str(
            r#"{
                "projects": [{"id": 1, "slug": "web"}],
                "events": [
                    {"event_id": "a", "project_id": 1, "timestamp": "2020-06-01T10:00:00Z", "message": "boom"}
                ],
                "starred": [
                    {"user_id": 1, "project_id": 1, "transaction": "/home"},
                    {"user_id": 1, "organization_id": 2, "project_id": 1, "transaction": "/cart"}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(fixture.starred[0].organization_id, 1);

        let store = fixture.into_store(&Config::default()).unwrap();
        assert_eq!(store.event_count(), 1);
        assert_eq!(store.issue_count(), 1);

        let starred = store.starred(&Principal::new(1, 1), &[1]);
        assert_eq!(starred.len(), 1);
        assert!(starred.contains(&(1, "/home".to_string())));
    }
}
