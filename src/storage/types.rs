//! Stored event model shared by the reference engine and fixtures.

use crate::core::Value;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A project events belong to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Project {
    /// Numeric project id
    pub id: u64,
    /// URL-safe project name, also shown as `project.name`
    pub slug: String,
}

impl Project {
    /// Creates a project
    pub fn new(id: u64, slug: impl Into<String>) -> Self {
        Self {
            id,
            slug: slug.into(),
        }
    }

    /// Prefix used for short issue ids (`MY-APP-3`)
    pub fn short_id_prefix(&self) -> String {
        self.slug.to_uppercase()
    }
}

/// Which stream an event belongs to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    /// Error event
    #[default]
    Error,
    /// Message event without an exception
    Default,
    /// Performance transaction
    Transaction,
}

impl EventType {
    /// Lowercase name used by `event.type`
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Error => "error",
            EventType::Default => "default",
            EventType::Transaction => "transaction",
        }
    }
}

/// User attached to an event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserInfo {
    /// Application user id
    pub id: Option<String>,
    /// Email address
    pub email: Option<String>,
    /// Username
    pub username: Option<String>,
    /// IP address
    pub ip_address: Option<String>,
}

/// First exception of an error event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExceptionInfo {
    /// Exception type
    #[serde(rename = "type")]
    pub kind: Option<String>,
    /// Exception message
    pub value: Option<String>,
    /// Mechanism that captured it
    pub mechanism: Option<String>,
    /// Whether the mechanism reported it as handled; `None` is undetermined
    pub handled: Option<bool>,
    /// Stack frame filenames, innermost last
    pub filenames: Vec<String>,
}

/// A stored event, either an error or a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// 32-char hex event id
    pub event_id: String,
    /// Owning project
    pub project_id: u64,
    /// When the event happened
    pub timestamp: DateTime<Utc>,
    /// Error, default or transaction
    #[serde(default, rename = "type")]
    pub event_type: EventType,
    /// Issue assigned at ingestion; transactions have none
    #[serde(default)]
    pub group_id: Option<u64>,
    /// Grouping fingerprint; defaults to the title
    #[serde(default)]
    pub fingerprint: Vec<String>,
    /// Log message or exception summary
    #[serde(default)]
    pub message: String,
    /// Display title
    #[serde(default)]
    pub title: String,
    /// Code location blamed for the event
    #[serde(default)]
    pub culprit: Option<String>,
    /// SDK platform such as `python`
    #[serde(default)]
    pub platform: Option<String>,
    /// Deployment environment
    #[serde(default)]
    pub environment: Option<String>,
    /// Release version
    #[serde(default)]
    pub release: Option<String>,
    /// Release distribution
    #[serde(default)]
    pub dist: Option<String>,
    /// Transaction name
    #[serde(default)]
    pub transaction: Option<String>,
    /// Transaction operation, for example `http.server`
    #[serde(default)]
    pub transaction_op: Option<String>,
    /// Transaction status such as `ok` or `internal_error`
    #[serde(default)]
    pub transaction_status: Option<String>,
    /// Transaction duration in milliseconds
    #[serde(default)]
    pub duration_ms: Option<f64>,
    /// Trace the transaction belongs to
    #[serde(default)]
    pub trace_id: Option<String>,
    /// Root span id
    #[serde(default)]
    pub span_id: Option<String>,
    /// Parent span id
    #[serde(default)]
    pub parent_span_id: Option<String>,
    /// Affected user
    #[serde(default)]
    pub user: UserInfo,
    /// SDK name
    #[serde(default)]
    pub sdk_name: Option<String>,
    /// SDK version
    #[serde(default)]
    pub sdk_version: Option<String>,
    /// Request method
    #[serde(default)]
    pub http_method: Option<String>,
    /// Request referer
    #[serde(default)]
    pub http_referer: Option<String>,
    /// Request URL
    #[serde(default)]
    pub http_url: Option<String>,
    /// First exception, for error events
    #[serde(default)]
    pub exception: Option<ExceptionInfo>,
    /// Free-form tags
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Flattened context values keyed like `os.name`
    #[serde(default)]
    pub contexts: BTreeMap<String, String>,
    /// Measurement values keyed by lowercase name
    #[serde(default)]
    pub measurements: BTreeMap<String, f64>,
}

fn text(value: Option<&String>) -> Value {
    value.map_or(Value::Null, |s| Value::String(s.clone()))
}

/// Extracts the key of a bracketed column such as `tags[browser]`.
fn bracketed<'a>(column: &'a str, prefix: &str) -> Option<&'a str> {
    column
        .strip_prefix(prefix)?
        .strip_prefix('[')?
        .strip_suffix(']')
}

impl Event {
    /// Creates a new builder
    pub fn builder(event_id: impl Into<String>, project_id: u64) -> EventBuilder {
        EventBuilder::new(event_id, project_id)
    }

    /// Reads a backend column.
    ///
    /// Unknown columns and absent values read as `Null`; bracketed columns
    /// address tag, context and measurement maps.
    pub fn column(&self, name: &str) -> Value {
        if let Some(key) = bracketed(name, "tags") {
            return text(self.tags.get(key));
        }
        if let Some(key) = bracketed(name, "contexts") {
            return text(self.contexts.get(key));
        }
        if let Some(key) = bracketed(name, "measurements") {
            return self.measurements.get(key).copied().map_or(Value::Null, Value::Number);
        }

        let exception = self.exception.as_ref();
        match name {
            "event_id" => Value::String(self.event_id.clone()),
            "project_id" => Value::from(self.project_id),
            "group_id" => Value::from(self.group_id),
            "timestamp" => Value::Date(self.timestamp),
            "type" => Value::from(self.event_type.as_str()),
            "message" => Value::String(self.message.clone()),
            "title" => Value::String(self.title.clone()),
            "culprit" => text(self.culprit.as_ref()),
            "platform" => text(self.platform.as_ref()),
            "environment" => text(self.environment.as_ref()),
            "release" => text(self.release.as_ref()),
            "dist" => text(self.dist.as_ref()),
            "transaction" => text(self.transaction.as_ref()),
            "transaction_op" => text(self.transaction_op.as_ref()),
            "transaction_status" => text(self.transaction_status.as_ref()),
            "duration" => self.duration_ms.map_or(Value::Null, Value::Number),
            "trace_id" => text(self.trace_id.as_ref()),
            "span_id" => text(self.span_id.as_ref()),
            "parent_span_id" => text(self.parent_span_id.as_ref()),
            "user_id" => text(self.user.id.as_ref()),
            "email" => text(self.user.email.as_ref()),
            "username" => text(self.user.username.as_ref()),
            "ip_address" => text(self.user.ip_address.as_ref()),
            "sdk_name" => text(self.sdk_name.as_ref()),
            "sdk_version" => text(self.sdk_version.as_ref()),
            "http_method" => text(self.http_method.as_ref()),
            "http_referer" => text(self.http_referer.as_ref()),
            "http_url" => text(self.http_url.as_ref()),
            "exception_type" => text(exception.and_then(|e| e.kind.as_ref())),
            "exception_value" => text(exception.and_then(|e| e.value.as_ref())),
            "exception_mechanism" => text(exception.and_then(|e| e.mechanism.as_ref())),
            "exception_handled" => exception
                .and_then(|e| e.handled)
                .map_or(Value::Null, |h| Value::Integer(i64::from(h))),
            "exception_filenames" => Value::Array(
                exception
                    .map(|e| e.filenames.iter().cloned().map(Value::String).collect())
                    .unwrap_or_default(),
            ),
            _ => Value::Null,
        }
    }

    /// Fingerprint used for issue assignment
    pub fn grouping_key(&self) -> String {
        if self.fingerprint.is_empty() {
            if self.title.is_empty() {
                self.message.clone()
            } else {
                self.title.clone()
            }
        } else {
            self.fingerprint.join("|")
        }
    }

    /// True for performance transactions
    pub fn is_transaction(&self) -> bool {
        self.event_type == EventType::Transaction
    }
}

/// Builder for constructing events
pub struct EventBuilder {
    event: Event,
}

impl EventBuilder {
    /// Create a new builder for an error event timestamped now
    pub fn new(event_id: impl Into<String>, project_id: u64) -> Self {
        Self {
            event: Event {
                event_id: event_id.into(),
                project_id,
                timestamp: Utc::now(),
                event_type: EventType::Error,
                group_id: None,
                fingerprint: Vec::new(),
                message: String::new(),
                title: String::new(),
                culprit: None,
                platform: None,
                environment: None,
                release: None,
                dist: None,
                transaction: None,
                transaction_op: None,
                transaction_status: None,
                duration_ms: None,
                trace_id: None,
                span_id: None,
                parent_span_id: None,
                user: UserInfo::default(),
                sdk_name: None,
                sdk_version: None,
                http_method: None,
                http_referer: None,
                http_url: None,
                exception: None,
                tags: BTreeMap::new(),
                contexts: BTreeMap::new(),
                measurements: BTreeMap::new(),
            },
        }
    }

    /// Set timestamp
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.event.timestamp = timestamp;
        self
    }

    /// Set message; also used as title when none is set
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.event.message = message.into();
        self
    }

    /// Set title
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.event.title = title.into();
        self
    }

    /// Set fingerprint
    pub fn fingerprint(mut self, parts: &[&str]) -> Self {
        self.event.fingerprint = parts.iter().map(ToString::to_string).collect();
        self
    }

    /// Set environment
    pub fn environment(mut self, environment: impl Into<String>) -> Self {
        self.event.environment = Some(environment.into());
        self
    }

    /// Set release
    pub fn release(mut self, release: impl Into<String>) -> Self {
        self.event.release = Some(release.into());
        self
    }

    /// Add a tag
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.event.tags.insert(key.into(), value.into());
        self
    }

    /// Add a context value such as `os.name`
    pub fn context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.event.contexts.insert(key.into(), value.into());
        self
    }

    /// Add a measurement
    pub fn measurement(mut self, key: &str, value: f64) -> Self {
        self.event.measurements.insert(key.to_lowercase(), value);
        self
    }

    /// Set user
    pub fn user(mut self, user: UserInfo) -> Self {
        self.event.user = user;
        self
    }

    /// Set exception
    pub fn exception(mut self, exception: ExceptionInfo) -> Self {
        self.event.exception = Some(exception);
        self
    }

    /// Turn the event into a transaction
    pub fn transaction(mut self, name: impl Into<String>, duration_ms: f64) -> Self {
        self.event.event_type = EventType::Transaction;
        self.event.transaction = Some(name.into());
        self.event.duration_ms = Some(duration_ms);
        self
    }

    /// Set transaction status
    pub fn status(mut self, status: impl Into<String>) -> Self {
        self.event.transaction_status = Some(status.into());
        self
    }

    /// Set trace id
    pub fn trace(mut self, trace_id: impl Into<String>) -> Self {
        self.event.trace_id = Some(trace_id.into());
        self
    }

    /// Build the event
    pub fn build(mut self) -> Event {
        if self.event.title.is_empty() {
            self.event.title = if self.event.is_transaction() {
                self.event.transaction.clone().unwrap_or_default()
            } else {
                self.event.message.clone()
            };
        }
        self.event
    }
}
