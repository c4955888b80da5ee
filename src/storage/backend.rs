//! Collaborator traits consumed by the query service.
//!
//! The execution engine runs a compiled [`QueryPlan`]; the directories answer
//! the lookups the builder and normalizer need (projects, issues, starred
//! transactions). [`super::InMemoryEventStore`] implements all of them.

use super::types::Project;
use crate::core::{DiscoverError, ResultRow};
use crate::query::builder::QueryPlan;
use crate::query::request::Principal;
use ahash::AHashSet;
use thiserror::Error;

/// Starred `(project_id, transaction)` pairs for one principal.
pub type KeyTransactionSet = AHashSet<(u64, String)>;

/// Failures reported by an execution engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Too many concurrent queries or the engine gave up waiting
    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    /// Generic failure inside the engine
    #[error("Query execution failed: {0}")]
    Execution(String),

    /// A function received an argument of the wrong type
    #[error("Illegal type of argument: {0}")]
    IllegalTypeOfArgument(String),
}

impl From<EngineError> for DiscoverError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::RateLimited(reason) => DiscoverError::RateLimitExceeded { reason },
            EngineError::Execution(reason) => DiscoverError::QueryExecution { reason },
            EngineError::IllegalTypeOfArgument(reason) => {
                DiscoverError::QueryIllegalTypeOfArgument { reason }
            },
        }
    }
}

/// Column name and backend type name of a raw result column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawColumn {
    /// Key used in raw rows
    pub name: String,
    /// Backend type such as `UInt64` or `Nullable(String)`
    pub type_name: String,
}

/// Rows and column metadata returned by an engine.
#[derive(Debug, Clone, Default)]
pub struct RawResult {
    /// Column metadata, in emission order
    pub columns: Vec<RawColumn>,
    /// Rows keyed by raw column name or aggregate alias
    pub rows: Vec<ResultRow>,
}

impl RawResult {
    /// Backend type reported for a column
    pub fn column_type(&self, name: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.type_name.as_str())
    }
}

/// Executes compiled query plans.
#[async_trait::async_trait]
pub trait ExecutionEngine: Send + Sync {
    /// Run a plan, returning at most `plan.limit` rows starting at `plan.offset`.
    async fn execute(&self, plan: &QueryPlan) -> std::result::Result<RawResult, EngineError>;
}

/// Resolves which projects a principal may query.
pub trait ProjectDirectory: Send + Sync {
    /// Projects the principal can access, ordered by id.
    fn accessible_projects(&self, principal: &Principal) -> Vec<Project>;

    /// Most recently seen release across the given projects.
    fn latest_release(&self, project_ids: &[u64]) -> Option<String>;
}

/// Maps issue ids to short ids and back.
pub trait IssueDirectory: Send + Sync {
    /// Short id for an issue; `None` once the issue is deleted.
    fn short_id(&self, group_id: u64) -> Option<String>;

    /// Issue id for a short id such as `MY-APP-1`.
    fn resolve_short_id(&self, short_id: &str) -> Option<u64>;
}

/// Per-user starred transactions backing `key_transaction`.
pub trait KeyTransactionStore: Send + Sync {
    /// Starred transactions owned by the principal within the given projects.
    fn starred(&self, principal: &Principal, project_ids: &[u64]) -> KeyTransactionSet;
}
