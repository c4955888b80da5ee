//! Event storage and the reference execution engine.
//!
//! This module provides the collaborator interfaces the query service
//! depends on and an in-memory implementation of all of them.

pub mod aggregator;
pub mod backend;
pub mod engine;
pub mod memory;
pub mod types;

// Re-export commonly used types
pub use backend::{
    EngineError, ExecutionEngine, IssueDirectory, KeyTransactionSet, KeyTransactionStore,
    ProjectDirectory, RawColumn, RawResult,
};
pub use memory::InMemoryEventStore;
pub use types::{Event, EventBuilder, EventType, ExceptionInfo, Project, UserInfo};
