//! Common test utilities and fixtures.

#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use discover_lib::core::{Config, Result};
use discover_lib::query::{DiscoverService, EventsRequest, EventsResponse, Principal};
use discover_lib::storage::{Event, EventBuilder, ExceptionInfo, InMemoryEventStore, Project, UserInfo};
use std::sync::Arc;

pub const FRONTEND: u64 = 1;
pub const BACKEND: u64 = 2;

/// Fixed reference time for every query.
pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2020, 6, 1, 12, 0, 0).unwrap()
}

/// Event id made of one repeated character.
pub fn event_id(c: char) -> String {
    c.to_string().repeat(32)
}

/// Test fixture builder for events with sensible defaults.
pub struct TestEventBuilder {
    inner: EventBuilder,
}

impl TestEventBuilder {
    pub fn error(id: char, project_id: u64, message: &str) -> Self {
        Self {
            inner: Event::builder(event_id(id), project_id)
                .timestamp(now() - Duration::hours(1))
                .message(message),
        }
    }

    pub fn transaction(n: usize, project_id: u64, name: &str, duration_ms: f64) -> Self {
        Self {
            inner: Event::builder(format!("{n:032x}"), project_id)
                .timestamp(now() - Duration::minutes(n as i64 + 1))
                .transaction(name, duration_ms)
                .status("ok"),
        }
    }

    pub fn user(mut self, id: &str) -> Self {
        self.inner = self.inner.user(UserInfo {
            id: Some(id.to_string()),
            ..UserInfo::default()
        });
        self
    }

    pub fn minutes_ago(mut self, minutes: i64) -> Self {
        self.inner = self.inner.timestamp(now() - Duration::minutes(minutes));
        self
    }

    /// Attach an exception whose mechanism reports `handled`
    pub fn handled(mut self, handled: Option<bool>) -> Self {
        self.inner = self.inner.exception(ExceptionInfo {
            kind: Some("ValueError".to_string()),
            handled,
            ..ExceptionInfo::default()
        });
        self
    }

    pub fn tag(mut self, key: &str, value: &str) -> Self {
        self.inner = self.inner.tag(key, value);
        self
    }

    pub fn build(self) -> Event {
        self.inner.build()
    }
}

/// A store with two projects and a service over it.
pub struct TestContext {
    pub store: Arc<InMemoryEventStore>,
    pub service: DiscoverService,
    pub principal: Principal,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let store = Arc::new(InMemoryEventStore::with_config(&config));
        store.add_project(Project::new(FRONTEND, "frontend"));
        store.add_project(Project::new(BACKEND, "backend"));
        Self {
            service: DiscoverService::with_store(config, Arc::clone(&store)),
            store,
            principal: Principal::new(1, 1).with_global_views(true),
        }
    }

    /// Store an event, returning its issue id if it has one.
    pub fn store(&self, event: Event) -> Option<u64> {
        self.store.store_event(event).unwrap()
    }

    pub async fn query(&self, request: &EventsRequest) -> Result<EventsResponse> {
        self.service.events_at(&self.principal, request, now()).await
    }
}

/// Request over the last day for the given fields.
pub fn request(fields: &[&str]) -> EventsRequest {
    EventsRequest::new(fields).stats_period("24h")
}
