//! Event query translation.
//!
//! Requests flow through field resolution, function parsing and filter
//! parsing into a [`QueryPlan`], which an [`ExecutionEngine`] runs; raw rows
//! are then normalized into typed, user-facing rows.

pub mod ast;
pub mod builder;
pub mod dates;
pub mod fields;
pub mod functions;
pub mod normalize;
pub mod parser;
pub mod request;

use crate::core::{Config, DiscoverError, Result};
use crate::storage::{ExecutionEngine, InMemoryEventStore, IssueDirectory, KeyTransactionStore, ProjectDirectory};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

pub use builder::{resolve_project_scope, Pagination, ProjectScope, QueryBuilder, QueryPlan};
pub use dates::TimeRange;
pub use fields::{FieldResolver, FieldSpec};
pub use functions::{AggregateExpr, FunctionRegistry};
pub use normalize::Normalizer;
pub use parser::{parse_search, ParseContext};
pub use request::{selects_all_projects, Cursor, EventsRequest, EventsResponse, PageLinks, Principal};

/// Runs events queries against a set of collaborators.
pub struct DiscoverService {
    config: Arc<Config>,
    engine: Arc<dyn ExecutionEngine>,
    projects: Arc<dyn ProjectDirectory>,
    issues: Arc<dyn IssueDirectory>,
    key_transactions: Arc<dyn KeyTransactionStore>,
}

impl DiscoverService {
    /// Create a service over separate collaborators
    pub fn new(
        config: Config,
        engine: Arc<dyn ExecutionEngine>,
        projects: Arc<dyn ProjectDirectory>,
        issues: Arc<dyn IssueDirectory>,
        key_transactions: Arc<dyn KeyTransactionStore>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            engine,
            projects,
            issues,
            key_transactions,
        }
    }

    /// Create a service backed entirely by an in-memory store
    pub fn with_store(config: Config, store: Arc<InMemoryEventStore>) -> Self {
        Self::new(
            config,
            Arc::clone(&store) as Arc<dyn ExecutionEngine>,
            Arc::clone(&store) as Arc<dyn ProjectDirectory>,
            Arc::clone(&store) as Arc<dyn IssueDirectory>,
            store as Arc<dyn KeyTransactionStore>,
        )
    }

    /// Active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run an events query relative to the current time.
    pub async fn events(&self, principal: &Principal, request: &EventsRequest) -> Result<EventsResponse> {
        self.events_at(principal, request, Utc::now()).await
    }

    /// Run an events query relative to `now`.
    ///
    /// Identical requests against unchanged data with the same `now` return
    /// identical responses.
    pub async fn events_at(
        &self,
        principal: &Principal,
        request: &EventsRequest,
        now: DateTime<Utc>,
    ) -> Result<EventsResponse> {
        let started = Instant::now();
        let result = self.run(principal, request, now).await;

        match &result {
            Ok(response) => info!(
                user_id = principal.user_id,
                rows = response.data.len(),
                elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                "Events query completed"
            ),
            Err(err) if err.is_validation() => debug!(
                user_id = principal.user_id,
                category = err.category(),
                error = %err,
                "Events query rejected"
            ),
            Err(err) => warn!(
                user_id = principal.user_id,
                category = err.category(),
                error = ?err,
                "Events query failed"
            ),
        }

        result
    }

    async fn run(&self, principal: &Principal, request: &EventsRequest, now: DateTime<Utc>) -> Result<EventsResponse> {
        let scope = resolve_project_scope(principal, &request.project, self.projects.as_ref())?;
        if scope.is_empty() {
            debug!(user_id = principal.user_id, "No projects in scope");
            return Ok(EventsResponse::empty());
        }

        let resolved = dates::resolve_time_range(
            request.start.as_deref(),
            request.end.as_deref(),
            request.stats_period.as_deref(),
            now,
            &self.config,
        )?;
        if resolved.quantized {
            debug!(range = %resolved.range, "Quantized time range");
        }

        let (per_page, offset) = self.page(request)?;
        let builder = QueryBuilder::new(
            &self.config,
            principal,
            self.projects.as_ref(),
            self.issues.as_ref(),
            self.key_transactions.as_ref(),
        )
        .at(now);
        let plan = builder.build(
            &request.fields,
            &request.query,
            &request.sort,
            &scope,
            resolved.range,
            Pagination {
                limit: per_page + 1,
                offset,
            },
        )?;

        let timeout = self.config.query.execution_timeout;
        let raw = match tokio::time::timeout(timeout, self.engine.execute(&plan)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(DiscoverError::RateLimitExceeded {
                    reason: format!("query did not finish within {timeout:?}"),
                })
            },
        };

        let has_next = raw.rows.len() > per_page;
        let normalized = Normalizer::new(self.issues.as_ref(), &scope.accessible).normalize(&raw, &plan, per_page);

        Ok(EventsResponse {
            data: normalized.data,
            meta: normalized.meta,
            links: (!request.no_pagination).then(|| PageLinks::around(per_page, offset, has_next)),
        })
    }

    /// Page size and offset for a request.
    ///
    /// An explicit page size wins over the one carried by the cursor.
    fn page(&self, request: &EventsRequest) -> Result<(usize, usize)> {
        let max = self.config.query.max_per_page;
        if request.no_pagination {
            return Ok((max, 0));
        }

        let cursor = request.cursor.as_deref().map(Cursor::parse).transpose()?;
        let per_page = request
            .per_page
            .or(cursor.map(|c| c.limit))
            .unwrap_or(self.config.query.default_per_page);
        if per_page == 0 || per_page > max {
            return Err(DiscoverError::invalid_search(format!(
                "Invalid per_page parameter. Must be between 1 and {max}."
            )));
        }

        Ok((per_page, cursor.map_or(0, |c| c.offset)))
    }
}
