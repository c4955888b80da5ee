//! Query plan compilation.
//!
//! Turns resolved fields, parsed functions and the filter tree into a
//! [`QueryPlan`] that an execution engine can run without further lookups.
//! Filter conditions on aggregates are routed to `having`; everything else
//! to `where`. Aggregates referenced only by the filter are computed as
//! hidden columns.

use super::ast::{CompareOp, ConditionNode, SearchKey, SearchValue};
use super::dates::TimeRange;
use super::fields::{FieldResolver, FieldSpec, PseudoField};
use super::functions::{is_function_call, AggregateExpr, FunctionKind, FunctionRegistry};
use super::parser::{parse_search, ParseContext};
use super::request::{selects_all_projects, Principal};
use crate::core::config::{Config, PerformanceConfig};
use crate::core::{DiscoverError, Result};
use crate::storage::{IssueDirectory, KeyTransactionSet, KeyTransactionStore, Project, ProjectDirectory};
use ahash::AHashSet;
use chrono::{DateTime, Utc};
use std::fmt::Write as _;
use tracing::debug;

/// Field added next to `id` so rows can be attributed to a project.
const AUTO_PROJECT_FIELD: &str = "project.name";

/// Any of these already identifies the project.
const PROJECT_FIELDS: &[&str] = &["project", "project.name", "project.id"];

const MIXED_OR_MESSAGE: &str = "Having an OR between aggregate filters and normal filters is invalid.";

/// Which events a plan reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dataset {
    /// Every event type
    Discover,
    /// Transaction events only
    Transactions,
}

/// What a sort key refers to.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderTarget {
    /// A selected field
    Field(FieldSpec),
    /// A selected aggregate, by alias
    Aggregate(String),
}

impl OrderTarget {
    /// Output name of the sorted column
    pub fn name(&self) -> &str {
        match self {
            OrderTarget::Field(spec) => &spec.name,
            OrderTarget::Aggregate(alias) => alias,
        }
    }
}

/// One sort key.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    /// Sorted column
    pub target: OrderTarget,
    /// Largest first
    pub descending: bool,
}

/// Rows to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    /// Maximum rows returned by the engine
    pub limit: usize,
    /// Rows skipped
    pub offset: usize,
}

/// Projects a request reads and the wider set the principal can see.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectScope {
    /// Projects the query runs against
    pub selected: Vec<Project>,
    /// Every project the principal can access
    pub accessible: Vec<Project>,
}

impl ProjectScope {
    /// Selected project ids
    pub fn ids(&self) -> Vec<u64> {
        self.selected.iter().map(|p| p.id).collect()
    }

    /// True if nothing is selected
    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }
}

/// Resolve requested project ids against what the principal can access.
///
/// An empty request or `-1` selects every accessible project.
pub fn resolve_project_scope(
    principal: &Principal,
    requested: &[i64],
    directory: &dyn ProjectDirectory,
) -> Result<ProjectScope> {
    let accessible = directory.accessible_projects(principal);

    let selected = if selects_all_projects(requested) {
        accessible.clone()
    } else {
        let mut selected: Vec<Project> = Vec::with_capacity(requested.len());
        for id in requested {
            let project = u64::try_from(*id)
                .ok()
                .and_then(|id| accessible.iter().find(|p| p.id == id))
                .ok_or_else(|| DiscoverError::ProjectNotFound(id.to_string()))?;
            if !selected.iter().any(|p| p.id == project.id) {
                selected.push(project.clone());
            }
        }
        selected
    };

    if selected.len() > 1 && !principal.global_views {
        return Err(DiscoverError::MultipleProjectsDenied);
    }

    Ok(ProjectScope { selected, accessible })
}

/// A compiled query, ready for an execution engine.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    /// Event types read
    pub dataset: Dataset,
    /// Non-aggregate output columns, in request order
    pub selected_fields: Vec<FieldSpec>,
    /// Aggregates, visible ones first in request order, then hidden ones
    pub aggregates: Vec<AggregateExpr>,
    /// Conditions applied to events, all must hold
    pub where_conditions: Vec<ConditionNode>,
    /// Conditions applied to aggregated rows, all must hold
    pub having: Vec<ConditionNode>,
    /// Grouping columns; empty for non-aggregate queries
    pub groupby: Vec<FieldSpec>,
    /// Sort keys, most significant first
    pub orderby: Vec<OrderBy>,
    /// Projects read
    pub project_ids: Vec<u64>,
    /// Event time window
    pub time_range: TimeRange,
    /// Maximum rows returned
    pub limit: usize,
    /// Rows skipped
    pub offset: usize,
    /// Starred transactions for `key_transaction`
    pub key_transactions: KeyTransactionSet,
    /// Policy constants for performance functions
    pub performance: PerformanceConfig,
}

impl QueryPlan {
    /// True if rows are grouped and aggregated
    pub fn is_aggregate(&self) -> bool {
        !self.aggregates.is_empty()
    }

    /// Aggregates returned to the caller
    pub fn visible_aggregates(&self) -> impl Iterator<Item = &AggregateExpr> {
        self.aggregates.iter().filter(|a| !a.hidden)
    }

    /// Renders the plan in a SQL-like form for logs.
    pub fn describe(&self) -> String {
        let mut columns: Vec<String> = self.selected_fields.iter().map(FieldSpec::raw_key).collect();
        columns.extend(
            self.aggregates
                .iter()
                .map(|a| format!("{} AS {}", a.render(&self.performance), a.alias)),
        );

        let mut out = format!("SELECT {} FROM {:?}", columns.join(", "), self.dataset);
        let _ = write!(
            out,
            " WHERE project_id IN {:?} AND timestamp IN {}",
            self.project_ids, self.time_range
        );
        for condition in &self.where_conditions {
            let _ = write!(out, " AND {condition}");
        }
        if !self.groupby.is_empty() {
            let keys: Vec<String> = self.groupby.iter().map(FieldSpec::raw_key).collect();
            let _ = write!(out, " GROUP BY {}", keys.join(", "));
        }
        if !self.having.is_empty() {
            let parts: Vec<String> = self.having.iter().map(ToString::to_string).collect();
            let _ = write!(out, " HAVING {}", parts.join(" AND "));
        }
        if !self.orderby.is_empty() {
            let keys: Vec<String> = self
                .orderby
                .iter()
                .map(|o| format!("{}{}", o.target.name(), if o.descending { " DESC" } else { "" }))
                .collect();
            let _ = write!(out, " ORDER BY {}", keys.join(", "));
        }
        let _ = write!(out, " LIMIT {} OFFSET {}", self.limit, self.offset);
        out
    }
}

/// Compiles requests into plans.
pub struct QueryBuilder<'a> {
    config: &'a Config,
    principal: &'a Principal,
    resolver: &'a FieldResolver,
    registry: &'a FunctionRegistry,
    projects: &'a dyn ProjectDirectory,
    issues: &'a dyn IssueDirectory,
    key_transactions: &'a dyn KeyTransactionStore,
    now: DateTime<Utc>,
}

impl<'a> QueryBuilder<'a> {
    /// Creates a builder over the process-wide field and function tables
    pub fn new(
        config: &'a Config,
        principal: &'a Principal,
        projects: &'a dyn ProjectDirectory,
        issues: &'a dyn IssueDirectory,
        key_transactions: &'a dyn KeyTransactionStore,
    ) -> Self {
        Self {
            config,
            principal,
            resolver: FieldResolver::global(),
            registry: FunctionRegistry::global(),
            projects,
            issues,
            key_transactions,
            now: Utc::now(),
        }
    }

    /// Sets the reference time for relative dates in filters
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    /// Compile a query.
    pub fn build(
        &self,
        fields: &[String],
        query: &str,
        sort: &[String],
        scope: &ProjectScope,
        time_range: TimeRange,
        page: Pagination,
    ) -> Result<QueryPlan> {
        let max_fields = self.config.query.max_fields;
        if fields.len() > max_fields {
            return Err(DiscoverError::TooManyFields { max: max_fields });
        }

        let ctx = ParseContext {
            resolver: self.resolver,
            registry: self.registry,
            performance: &self.config.performance,
            now: self.now,
        };
        let (selection, filter) = rayon::join(
            || self.resolve_selection(fields),
            || parse_search(query, &ctx),
        );
        let (mut selected_fields, mut aggregates) = selection?;
        let filter = filter?
            .map(|node| self.rewrite_condition(node, scope))
            .transpose()?;

        if selected_fields.iter().any(|f| f.name == "id")
            && !selected_fields
                .iter()
                .any(|f| PROJECT_FIELDS.contains(&f.name.as_str()))
        {
            selected_fields.push(self.resolver.resolve(AUTO_PROJECT_FIELD)?);
        }

        let (where_conditions, having) = route_conditions(filter)?;

        let mut implicit = Vec::new();
        for condition in &having {
            condition.for_each_comparison(&mut |key, _, _| {
                if let SearchKey::Aggregate(expr) = key {
                    implicit.push(expr.clone());
                }
            });
        }
        for mut expr in implicit {
            if !aggregates.iter().any(|a| a.alias == expr.alias) {
                expr.hidden = true;
                aggregates.push(expr);
            }
        }

        if selected_fields.is_empty() && aggregates.is_empty() {
            return Err(DiscoverError::NoColumnsSelected);
        }

        check_aggregate_references(&aggregates)?;

        let orderby = self.resolve_orderby(sort, &selected_fields, &aggregates)?;

        let groupby = if aggregates.is_empty() {
            Vec::new()
        } else {
            selected_fields.clone()
        };

        let mut referenced: Vec<&FieldSpec> = selected_fields
            .iter()
            .chain(aggregates.iter().filter_map(AggregateExpr::column))
            .collect();
        for condition in &where_conditions {
            condition.for_each_comparison(&mut |key, _, _| {
                if let SearchKey::Field(spec) = key {
                    referenced.push(spec);
                }
            });
        }

        let dataset = if referenced.iter().any(|f| f.transactions_only)
            || aggregates.iter().any(|a| a.transactions_only)
        {
            Dataset::Transactions
        } else {
            Dataset::Discover
        };

        let key_transactions = if referenced
            .iter()
            .any(|f| f.pseudo_field() == Some(PseudoField::KeyTransaction))
        {
            self.key_transactions.starred(self.principal, &scope.ids())
        } else {
            KeyTransactionSet::default()
        };

        let plan = QueryPlan {
            dataset,
            selected_fields,
            aggregates,
            where_conditions,
            having,
            groupby,
            orderby,
            project_ids: scope.ids(),
            time_range,
            limit: page.limit,
            offset: page.offset,
            key_transactions,
            performance: self.config.performance.clone(),
        };
        debug!(plan = %plan.describe(), "Compiled query plan");
        Ok(plan)
    }

    /// Resolve field and function tokens, keeping the first of each alias.
    fn resolve_selection(&self, fields: &[String]) -> Result<(Vec<FieldSpec>, Vec<AggregateExpr>)> {
        let mut seen = AHashSet::new();
        let mut columns = Vec::new();
        let mut aggregates = Vec::new();

        for token in fields {
            let token = token.trim();
            if is_function_call(token) {
                let expr = self
                    .registry
                    .parse_function(token, self.resolver, &self.config.performance)?;
                if seen.insert(expr.alias.clone()) {
                    aggregates.push(expr);
                }
            } else {
                let spec = self.resolver.resolve(token)?;
                if seen.insert(spec.name.clone()) {
                    columns.push(spec);
                }
            }
        }

        Ok((columns, aggregates))
    }

    fn rewrite_condition(&self, node: ConditionNode, scope: &ProjectScope) -> Result<ConditionNode> {
        node.try_map_comparisons(&mut |key, op, value| match key {
            SearchKey::Field(spec) => self.rewrite_field(spec, op, value, scope),
            aggregate => Ok(ConditionNode::comparison(aggregate, op, value)),
        })
    }

    /// Replace lookups the engine cannot answer (slugs, short ids, `latest`).
    #[allow(clippy::cast_precision_loss)]
    fn rewrite_field(
        &self,
        spec: FieldSpec,
        op: CompareOp,
        value: SearchValue,
        scope: &ProjectScope,
    ) -> Result<ConditionNode> {
        // Negated project filters may name projects outside the selection.
        let candidates = if op == CompareOp::NotEq {
            &scope.accessible
        } else {
            &scope.selected
        };

        match (spec.pseudo_field(), value) {
            (Some(PseudoField::Project), SearchValue::String(slug)) => {
                let project = candidates
                    .iter()
                    .find(|p| p.slug == slug)
                    .ok_or(DiscoverError::ProjectNotFound(slug))?;
                let key = SearchKey::Field(self.resolver.resolve("project.id")?);
                Ok(ConditionNode::comparison(key, op, SearchValue::Number(project.id as f64)))
            },
            (Some(PseudoField::Project), SearchValue::Wildcard(pattern)) => {
                let key = SearchKey::Field(self.resolver.resolve("project.id")?);
                let mut matched = candidates
                    .iter()
                    .filter(|p| pattern.matches(&p.slug))
                    .map(|p| ConditionNode::comparison(key.clone(), op, SearchValue::Number(p.id as f64)));
                let first = matched
                    .next()
                    .ok_or_else(|| DiscoverError::ProjectNotFound(pattern.as_str().to_string()))?;
                Ok(matched.fold(first, |acc, next| {
                    if op == CompareOp::NotEq {
                        ConditionNode::and(acc, next)
                    } else {
                        ConditionNode::or(acc, next)
                    }
                }))
            },
            (Some(PseudoField::Issue), SearchValue::String(short_id)) => {
                let key = SearchKey::Field(self.resolver.resolve("issue.id")?);
                if short_id == "unknown" {
                    let op = if op == CompareOp::NotEq {
                        CompareOp::Has
                    } else {
                        CompareOp::NotHas
                    };
                    return Ok(ConditionNode::comparison(key, op, SearchValue::Null));
                }
                let group_id = self.issues.resolve_short_id(&short_id).ok_or_else(|| {
                    DiscoverError::invalid_search(format!("Invalid value '{short_id}' for 'issue:' filter"))
                })?;
                Ok(ConditionNode::comparison(key, op, SearchValue::Number(group_id as f64)))
            },
            (None, SearchValue::String(release)) if spec.name == "release" && release == "latest" => {
                let latest = self.projects.latest_release(&scope.ids()).unwrap_or_default();
                Ok(ConditionNode::comparison(SearchKey::Field(spec), op, SearchValue::String(latest)))
            },
            (_, value) => Ok(ConditionNode::comparison(SearchKey::Field(spec), op, value)),
        }
    }

    fn resolve_orderby(
        &self,
        sort: &[String],
        fields: &[FieldSpec],
        aggregates: &[AggregateExpr],
    ) -> Result<Vec<OrderBy>> {
        let mut orderby = Vec::with_capacity(sort.len());

        for token in sort.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
            let (descending, name) = match token.strip_prefix('-') {
                Some(rest) => (true, rest),
                None => (false, token),
            };
            let invalid = || DiscoverError::InvalidOrderBy {
                field: name.to_string(),
            };
            let aggregate = |alias: &str| {
                aggregates
                    .iter()
                    .find(|a| !a.hidden && a.alias == alias)
                    .map(|a| OrderTarget::Aggregate(a.alias.clone()))
            };
            let field = |field_name: &str| {
                fields
                    .iter()
                    .find(|f| f.name == field_name)
                    .map(|f| OrderTarget::Field(f.clone()))
            };

            let target = if let Some(target) = aggregate(name).or_else(|| field(name)) {
                target
            } else if is_function_call(name) {
                let expr = self
                    .registry
                    .parse_function(name, self.resolver, &self.config.performance)
                    .map_err(|_| invalid())?;
                aggregate(&expr.alias).ok_or_else(invalid)?
            } else {
                let spec = self.resolver.resolve(name).map_err(|_| invalid())?;
                field(&spec.name).ok_or_else(invalid)?
            };

            orderby.push(OrderBy { target, descending });
        }

        Ok(orderby)
    }
}

/// Split top-level conjuncts between `where` and `having`.
fn route_conditions(filter: Option<ConditionNode>) -> Result<(Vec<ConditionNode>, Vec<ConditionNode>)> {
    let mut where_conditions = Vec::new();
    let mut having = Vec::new();

    for part in filter.map(ConditionNode::into_conjuncts).unwrap_or_default() {
        match (part.has_aggregate(), part.has_plain()) {
            (true, true) => return Err(DiscoverError::invalid_search(MIXED_OR_MESSAGE)),
            (true, false) => having.push(part),
            _ => where_conditions.push(part),
        }
    }

    Ok((where_conditions, having))
}

/// `compare_numeric_aggregate` may only reference aggregates in the plan.
fn check_aggregate_references(aggregates: &[AggregateExpr]) -> Result<()> {
    for expr in aggregates
        .iter()
        .filter(|a| a.kind == FunctionKind::CompareNumericAggregate)
    {
        let target = expr.referenced_alias().unwrap_or_default();
        let present = aggregates
            .iter()
            .any(|a| a.kind != FunctionKind::CompareNumericAggregate && a.alias == target);
        if !present {
            return Err(DiscoverError::invalid_function(format!(
                "{target} is not a valid function alias to compare against, it must be a selected aggregate"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Event, InMemoryEventStore};
    use chrono::{Duration, TimeZone};

    struct Fixture {
        store: InMemoryEventStore,
        config: Config,
        principal: Principal,
    }

    impl Fixture {
        fn new() -> Self {
            let store = InMemoryEventStore::new();
            store.add_project(Project::new(1, "frontend"));
            store.add_project(Project::new(2, "backend"));
            Self {
                store,
                config: Config::default(),
                principal: Principal::new(7, 1).with_global_views(true),
            }
        }

        fn now() -> DateTime<Utc> {
            Utc.with_ymd_and_hms(2020, 6, 1, 12, 0, 0).unwrap()
        }

        fn build(&self, fields: &[&str], query: &str, sort: &[&str]) -> Result<QueryPlan> {
            let scope = resolve_project_scope(&self.principal, &[], &self.store)?;
            let builder = QueryBuilder::new(&self.config, &self.principal, &self.store, &self.store, &self.store)
                .at(Self::now());
            let fields: Vec<String> = fields.iter().map(ToString::to_string).collect();
            let sort: Vec<String> = sort.iter().map(ToString::to_string).collect();
            builder.build(
                &fields,
                query,
                &sort,
                &scope,
                TimeRange::new(Self::now() - Duration::days(14), Self::now()),
                Pagination { limit: 51, offset: 0 },
            )
        }
    }

    #[test]
    fn test_field_limit() {
        let fixture = Fixture::new();
        let twenty: Vec<String> = (0..20).map(|i| format!("tag{i}")).collect();
        let refs: Vec<&str> = twenty.iter().map(String::as_str).collect();
        assert!(fixture.build(&refs, "", &[]).is_ok());

        let mut too_many = refs.clone();
        too_many.push("tag20");
        match fixture.build(&too_many, "", &[]) {
            Err(DiscoverError::TooManyFields { max }) => assert_eq!(max, 20),
            other => panic!("Expected TooManyFields, got {:?}", other.map(|p| p.describe())),
        }
    }

    #[test]
    fn test_duplicate_fields_count_toward_limit() {
        let fixture = Fixture::new();
        let fields = vec!["id"; 21];
        assert!(matches!(fixture.build(&fields, "", &[]), Err(DiscoverError::TooManyFields { .. })));

        let plan = fixture.build(&["id", "id", "project.id"], "", &[]).unwrap();
        assert_eq!(plan.selected_fields.len(), 2);
    }

    #[test]
    fn test_no_columns_selected() {
        let fixture = Fixture::new();
        assert!(matches!(fixture.build(&[], "", &[]), Err(DiscoverError::NoColumnsSelected)));

        let plan = fixture.build(&[], "count():>1", &[]).unwrap();
        assert_eq!(plan.aggregates.len(), 1);
        assert!(plan.aggregates[0].hidden);
    }

    #[test]
    fn test_project_name_auto_added() {
        let fixture = Fixture::new();
        let plan = fixture.build(&["id"], "", &[]).unwrap();
        let names: Vec<&str> = plan.selected_fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["id", "project.name"]);

        let plan = fixture.build(&["id", "project.id"], "", &[]).unwrap();
        assert_eq!(plan.selected_fields.len(), 2);
    }

    #[test]
    fn test_implicit_groupby() {
        let fixture = Fixture::new();
        let plan = fixture.build(&["transaction", "count()"], "", &["-count"]).unwrap();
        assert!(plan.is_aggregate());
        assert_eq!(plan.groupby.len(), 1);
        assert_eq!(plan.groupby[0].name, "transaction");
        assert_eq!(plan.orderby[0].target, OrderTarget::Aggregate("count".to_string()));
        assert!(plan.orderby[0].descending);
    }

    #[test]
    fn test_having_routing() {
        let fixture = Fixture::new();
        let plan = fixture
            .build(&["transaction", "count()"], "event.type:transaction p95():>100", &[])
            .unwrap();
        assert_eq!(plan.where_conditions.len(), 1);
        assert_eq!(plan.having.len(), 1);
        let hidden: Vec<&str> = plan
            .aggregates
            .iter()
            .filter(|a| a.hidden)
            .map(|a| a.alias.as_str())
            .collect();
        assert_eq!(hidden, vec!["p95"]);
        assert_eq!(plan.dataset, Dataset::Transactions);
    }

    #[test]
    fn test_mixed_or_rejected() {
        let fixture = Fixture::new();
        match fixture.build(&["transaction", "count()"], "count():>1 OR transaction:/a", &[]) {
            Err(DiscoverError::InvalidSearchQuery(msg)) => assert_eq!(msg, MIXED_OR_MESSAGE),
            other => panic!("Expected InvalidSearchQuery, got {:?}", other.map(|p| p.describe())),
        }
    }

    #[test]
    fn test_orderby_must_be_selected() {
        let fixture = Fixture::new();
        assert!(fixture.build(&["title", "count()"], "", &["count()"]).is_ok());
        assert!(fixture.build(&["title", "count()"], "", &["-title"]).is_ok());
        match fixture.build(&["title"], "", &["timestamp"]) {
            Err(DiscoverError::InvalidOrderBy { field }) => assert_eq!(field, "timestamp"),
            other => panic!("Expected InvalidOrderBy, got {:?}", other.map(|p| p.describe())),
        }
    }

    #[test]
    fn test_project_slug_rewritten() {
        let fixture = Fixture::new();
        let plan = fixture.build(&["id"], "project:backend", &[]).unwrap();
        match &plan.where_conditions[0] {
            ConditionNode::Comparison { key, op, value } => {
                assert_eq!(key.name(), "project.id");
                assert_eq!(*op, CompareOp::Eq);
                assert_eq!(*value, SearchValue::Number(2.0));
            },
            other => panic!("Expected comparison, got {}", other),
        }

        match fixture.build(&["id"], "project:missing", &[]) {
            Err(DiscoverError::ProjectNotFound(slug)) => assert_eq!(slug, "missing"),
            other => panic!("Expected ProjectNotFound, got {:?}", other.map(|p| p.describe())),
        }
    }

    #[test]
    fn test_issue_short_id_rewritten() {
        let fixture = Fixture::new();
        let event = Event::builder("a".repeat(32), 1)
            .timestamp(Fixture::now() - Duration::hours(1))
            .message("boom")
            .build();
        let group = fixture.store.store_event(event).unwrap().unwrap();

        let plan = fixture.build(&["id"], "issue:FRONTEND-1", &[]).unwrap();
        match &plan.where_conditions[0] {
            ConditionNode::Comparison { value, .. } => {
                assert_eq!(*value, SearchValue::Number(group as f64));
            },
            other => panic!("Expected comparison, got {}", other),
        }

        let plan = fixture.build(&["id"], "issue:unknown", &[]).unwrap();
        assert!(matches!(
            &plan.where_conditions[0],
            ConditionNode::Comparison { op: CompareOp::NotHas, .. }
        ));

        assert!(matches!(
            fixture.build(&["id"], "issue:NOPE-9", &[]),
            Err(DiscoverError::InvalidSearchQuery(_))
        ));
    }

    #[test]
    fn test_compare_numeric_aggregate_requires_alias() {
        let fixture = Fixture::new();
        assert!(fixture
            .build(&["transaction", "p50()"], "compare_numeric_aggregate(p50, greater, 100):1", &[])
            .is_ok());
        assert!(matches!(
            fixture.build(&["transaction", "count()"], "compare_numeric_aggregate(p50, greater, 100):1", &[]),
            Err(DiscoverError::InvalidFunctionArguments(_))
        ));
    }

    #[test]
    fn test_scope_resolution() {
        let fixture = Fixture::new();
        let scope = resolve_project_scope(&fixture.principal, &[-1], &fixture.store).unwrap();
        assert_eq!(scope.ids(), vec![1, 2]);

        let single = Principal::new(7, 1);
        assert!(matches!(
            resolve_project_scope(&single, &[1, 2], &fixture.store),
            Err(DiscoverError::MultipleProjectsDenied)
        ));
        assert_eq!(resolve_project_scope(&single, &[2], &fixture.store).unwrap().ids(), vec![2]);
        assert!(matches!(
            resolve_project_scope(&single, &[99], &fixture.store),
            Err(DiscoverError::ProjectNotFound(_))
        ));
    }
}
