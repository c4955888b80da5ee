//! In-memory event store.
//!
//! Holds projects, events, issues and starred transactions behind one lock
//! and implements every collaborator trait the query service needs. Events
//! are kept in insertion order, which is the canonical order results fall
//! back to when sort keys tie.

use super::backend::{
    EngineError, ExecutionEngine, IssueDirectory, KeyTransactionSet, KeyTransactionStore,
    ProjectDirectory, RawResult,
};
use super::engine::execute_plan;
use super::types::{Event, Project};
use crate::core::{Config, DiscoverError, Result};
use crate::query::builder::QueryPlan;
use crate::query::request::Principal;
use ahash::{AHashMap, AHashSet};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// An issue created from a grouping key.
#[derive(Debug, Clone)]
struct Issue {
    project_id: u64,
    short_id: String,
    deleted: bool,
}

/// A starred transaction, owned by a user within one organization.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct StarredTransaction {
    user_id: u64,
    organization_id: u64,
    project_id: u64,
    transaction: String,
}

#[derive(Debug, Default)]
struct StoreState {
    projects: Vec<Project>,
    /// Project memberships; users without any can see every project
    members: AHashMap<u64, AHashSet<u64>>,
    /// Shared with running queries; writes copy only while a query holds it
    events: Arc<Vec<Event>>,
    issues: AHashMap<u64, Issue>,
    /// `(project_id, grouping key)` to issue id
    fingerprints: AHashMap<(u64, String), u64>,
    /// Per-project short id counters
    issue_counters: AHashMap<u64, u64>,
    next_group_id: u64,
    starred: AHashSet<StarredTransaction>,
}

/// Event store and reference execution engine.
pub struct InMemoryEventStore {
    state: RwLock<StoreState>,
    permits: Arc<Semaphore>,
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEventStore {
    /// Creates a store with default engine settings
    pub fn new() -> Self {
        Self::with_config(&Config::default())
    }

    /// Creates a store from configuration
    pub fn with_config(config: &Config) -> Self {
        Self {
            state: RwLock::new(StoreState {
                next_group_id: 1,
                ..StoreState::default()
            }),
            permits: Arc::new(Semaphore::new(config.engine.max_concurrent_queries.max(1))),
        }
    }

    /// Registers a project; re-adding an id replaces its slug
    pub fn add_project(&self, project: Project) {
        let mut state = self.state.write();
        match state.projects.iter_mut().find(|p| p.id == project.id) {
            Some(existing) => *existing = project,
            None => {
                state.projects.push(project);
                state.projects.sort_by_key(|p| p.id);
            },
        }
    }

    /// Restricts a user to the projects they are added to
    pub fn add_member(&self, user_id: u64, project_id: u64) {
        self.state.write().members.entry(user_id).or_default().insert(project_id);
    }

    /// Stores an event, assigning an issue to non-transaction events.
    ///
    /// Returns the issue id, if one was assigned.
    pub fn store_event(&self, mut event: Event) -> Result<Option<u64>> {
        let mut state = self.state.write();
        let project = state
            .projects
            .iter()
            .find(|p| p.id == event.project_id)
            .cloned()
            .ok_or_else(|| DiscoverError::ProjectNotFound(event.project_id.to_string()))?;

        if event.is_transaction() {
            event.group_id = None;
            Arc::make_mut(&mut state.events).push(event);
            return Ok(None);
        }

        let key = (project.id, event.grouping_key());
        let existing = state.fingerprints.get(&key).copied();
        let group_id = match existing {
            Some(id) => id,
            None => {
                let id = state.next_group_id;
                state.next_group_id += 1;
                let counter = state.issue_counters.entry(project.id).or_insert(0);
                *counter += 1;
                let short_id = format!("{}-{}", project.short_id_prefix(), counter);
                debug!(group_id = id, short_id = %short_id, "Created issue");
                state.issues.insert(
                    id,
                    Issue {
                        project_id: project.id,
                        short_id,
                        deleted: false,
                    },
                );
                state.fingerprints.insert(key, id);
                id
            },
        };

        event.group_id = Some(group_id);
        Arc::make_mut(&mut state.events).push(event);
        Ok(Some(group_id))
    }

    /// Stores many events, stopping at the first failure
    pub fn store_events<I: IntoIterator<Item = Event>>(&self, events: I) -> Result<usize> {
        let mut stored = 0;
        for event in events {
            self.store_event(event)?;
            stored += 1;
        }
        Ok(stored)
    }

    /// Marks an issue deleted; its events keep their issue id
    pub fn delete_group(&self, group_id: u64) -> bool {
        match self.state.write().issues.get_mut(&group_id) {
            Some(issue) => {
                issue.deleted = true;
                true
            },
            None => false,
        }
    }

    /// Stars a transaction for a user within an organization
    pub fn star_transaction(
        &self,
        user_id: u64,
        organization_id: u64,
        project_id: u64,
        transaction: impl Into<String>,
    ) {
        self.state.write().starred.insert(StarredTransaction {
            user_id,
            organization_id,
            project_id,
            transaction: transaction.into(),
        });
    }

    /// Number of stored events
    pub fn event_count(&self) -> usize {
        self.state.read().events.len()
    }

    /// Number of live issues
    pub fn issue_count(&self) -> usize {
        self.state.read().issues.values().filter(|i| !i.deleted).count()
    }
}

#[async_trait::async_trait]
impl ExecutionEngine for InMemoryEventStore {
    async fn execute(&self, plan: &QueryPlan) -> std::result::Result<RawResult, EngineError> {
        let permit = Arc::clone(&self.permits).try_acquire_owned().map_err(|_| {
            warn!("Concurrent query limit reached");
            EngineError::RateLimited("too many concurrent queries".to_string())
        })?;

        // Run off the async workers so the caller's timeout can fire mid-scan.
        let events = Arc::clone(&self.state.read().events);
        let plan = plan.clone();
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            execute_plan(&plan, &events)
        })
        .await
        .map_err(|err| EngineError::Execution(format!("query task failed: {err}")))?
    }
}

impl ProjectDirectory for InMemoryEventStore {
    fn accessible_projects(&self, principal: &Principal) -> Vec<Project> {
        let state = self.state.read();
        match state.members.get(&principal.user_id) {
            Some(allowed) => state
                .projects
                .iter()
                .filter(|p| allowed.contains(&p.id))
                .cloned()
                .collect(),
            None => state.projects.clone(),
        }
    }

    fn latest_release(&self, project_ids: &[u64]) -> Option<String> {
        let state = self.state.read();
        state
            .events
            .iter()
            .filter(|e| project_ids.contains(&e.project_id))
            .filter_map(|e| e.release.as_ref().map(|r| (e.timestamp, r)))
            .max_by_key(|(ts, _)| *ts)
            .map(|(_, release)| release.clone())
    }
}

impl IssueDirectory for InMemoryEventStore {
    fn short_id(&self, group_id: u64) -> Option<String> {
        self.state
            .read()
            .issues
            .get(&group_id)
            .filter(|issue| !issue.deleted)
            .map(|issue| issue.short_id.clone())
    }

    fn resolve_short_id(&self, short_id: &str) -> Option<u64> {
        let state = self.state.read();
        state
            .issues
            .iter()
            .find(|(_, issue)| !issue.deleted && issue.short_id.eq_ignore_ascii_case(short_id))
            .map(|(id, issue)| {
                debug!(group_id = *id, project_id = issue.project_id, "Resolved short id");
                *id
            })
    }
}

impl KeyTransactionStore for InMemoryEventStore {
    fn starred(&self, principal: &Principal, project_ids: &[u64]) -> KeyTransactionSet {
        self.state
            .read()
            .starred
            .iter()
            .filter(|star| {
                star.user_id == principal.user_id
                    && star.organization_id == principal.organization_id
                    && project_ids.contains(&star.project_id)
            })
            .map(|star| (star.project_id, star.transaction.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn store() -> InMemoryEventStore {
        let store = InMemoryEventStore::new();
        store.add_project(Project::new(1, "my-app"));
        store
    }

    fn error(id: char, message: &str) -> Event {
        Event::builder(id.to_string().repeat(32), 1)
            .timestamp(Utc.with_ymd_and_hms(2020, 6, 1, 10, 0, 0).unwrap())
            .message(message)
            .build()
    }

    #[test]
    fn test_issue_assignment() {
        let store = store();
        let first = store.store_event(error('a', "boom")).unwrap();
        let second = store.store_event(error('b', "boom")).unwrap();
        let third = store.store_event(error('c', "other")).unwrap();

        assert_eq!(first, second);
        assert_ne!(first, third);
        assert_eq!(store.short_id(first.unwrap()).as_deref(), Some("MY-APP-1"));
        assert_eq!(store.resolve_short_id("my-app-2"), third);
        assert_eq!(store.issue_count(), 2);
    }

    #[test]
    fn test_deleted_issue_has_no_short_id() {
        let store = store();
        let group = store.store_event(error('a', "boom")).unwrap().unwrap();
        assert!(store.delete_group(group));
        assert_eq!(store.short_id(group), None);
        assert_eq!(store.resolve_short_id("MY-APP-1"), None);
        assert!(!store.delete_group(999));
    }

    #[test]
    fn test_unknown_project_rejected() {
        let store = store();
        let event = Event::builder("a".repeat(32), 9).build();
        assert!(matches!(store.store_event(event), Err(DiscoverError::ProjectNotFound(_))));
    }

    #[test]
    fn test_transactions_have_no_issue() {
        let store = store();
        let event = Event::builder("a".repeat(32), 1).transaction("/home", 120.0).build();
        assert_eq!(store.store_event(event).unwrap(), None);
    }

    #[test]
    fn test_membership_and_starring() {
        let store = store();
        store.add_project(Project::new(2, "api"));
        let everyone = Principal::new(1, 1);
        assert_eq!(store.accessible_projects(&everyone).len(), 2);

        store.add_member(5, 2);
        let member = Principal::new(5, 1);
        let projects = store.accessible_projects(&member);
        assert_eq!(projects, vec![Project::new(2, "api")]);

        store.star_transaction(5, 1, 2, "/checkout");
        store.star_transaction(6, 1, 2, "/other");
        store.star_transaction(5, 7, 2, "/elsewhere");
        let starred = store.starred(&member, &[2]);
        assert_eq!(starred.len(), 1);
        assert!(starred.contains(&(2, "/checkout".to_string())));
        assert!(store.starred(&member, &[1]).is_empty());

        let other_org = store.starred(&Principal::new(5, 7), &[2]);
        assert_eq!(other_org.len(), 1);
        assert!(other_org.contains(&(2, "/elsewhere".to_string())));
    }

    #[tokio::test]
    async fn test_concurrency_limit() {
        let config = crate::core::ConfigBuilder::new().max_concurrent_queries(1).build().unwrap();
        let store = InMemoryEventStore::with_config(&config);
        let _held = Arc::clone(&store.permits).try_acquire_owned().unwrap();

        let now = Utc::now();
        let plan = QueryPlan {
            dataset: crate::query::builder::Dataset::Discover,
            selected_fields: Vec::new(),
            aggregates: Vec::new(),
            where_conditions: Vec::new(),
            having: Vec::new(),
            groupby: Vec::new(),
            orderby: Vec::new(),
            project_ids: vec![1],
            time_range: crate::query::dates::TimeRange::new(now - chrono::Duration::hours(1), now),
            limit: 10,
            offset: 0,
            key_transactions: KeyTransactionSet::default(),
            performance: config.performance.clone(),
        };
        match store.execute(&plan).await {
            Err(EngineError::RateLimited(_)) => {},
            other => panic!("Expected RateLimited, got {:?}", other.map(|r| r.rows)),
        }
    }
}
