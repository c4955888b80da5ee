//! Core domain types shared by the query pipeline.
//!
//! This module contains the error taxonomy, configuration and the typed
//! value model used from field resolution through result normalization.

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use config::{Config, ConfigBuilder};
pub use error::{DiscoverError, ErrorResponse, Result};
pub use types::{OutputType, ResultRow, Value};
