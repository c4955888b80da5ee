//! Discover - event analytics query translation.
//!
//! Discover turns user-facing events queries (selected fields, aggregate
//! functions, a free-form search filter, sort keys, a project scope and a
//! time window) into a validated query plan, runs it through an execution
//! engine and normalizes the result rows.
//!
//! # Architecture
//!
//! - `query`: field resolver, function registry, filter parser, query
//!   builder and result normalizer, plus the request-level service
//! - `storage`: collaborator traits and an in-memory reference engine
//! - `core`: errors, configuration and typed values
//! - `cli`: command-line interface
//!
//! # Example
//!
//! ```no_run
//! use discover_lib::core::Config;
//! use discover_lib::query::{DiscoverService, EventsRequest, Principal};
//! use discover_lib::storage::{InMemoryEventStore, Project};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(InMemoryEventStore::new());
//!     store.add_project(Project::new(1, "web"));
//!
//!     let service = DiscoverService::with_store(Config::default(), store);
//!     let request = EventsRequest::new(&["title", "count()"]).stats_period("24h");
//!     let response = service.events(&Principal::new(1, 1), &request).await?;
//!     println!("{} rows", response.data.len());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod cli;
pub mod core;
pub mod query;
pub mod storage;

// Re-export core types for convenience
pub use crate::core::{Config, DiscoverError, Result};
pub use crate::query::DiscoverService;
