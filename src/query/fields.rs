//! Field resolution: user-facing field tokens to backend columns and types.
//!
//! The table of known fields is built once per process and never mutated.
//! Tokens that are not known fields resolve to tags, so arbitrary tag keys
//! can be selected and filtered; only tokens that cannot be tag keys fail.

use crate::core::{DiscoverError, OutputType, Result, Value};
use crate::storage::KeyTransactionSet;
use ahash::AHashMap;
use chrono::{DateTime, Duration, DurationRound, Utc};
use once_cell::sync::Lazy;

const MEASUREMENTS_PREFIX: &str = "measurements.";

/// Context namespaces shared between error and transaction events.
const CONTEXT_PREFIXES: &[&str] = &["os.", "device.", "geo."];

/// Web vitals reported in milliseconds.
const DURATION_MEASUREMENTS: &[&str] = &["fp", "fcp", "lcp", "fid", "ttfb", "ttfb.requesttime"];

static KNOWN_FIELDS: Lazy<AHashMap<String, FieldSpec>> = Lazy::new(build_known_fields);

static GLOBAL: Lazy<FieldResolver> = Lazy::new(FieldResolver::new);

/// Timestamp truncation granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeBucket {
    /// Start of the hour
    Hour,
    /// Start of the day
    Day,
}

impl TimeBucket {
    /// Truncates a timestamp to the bucket start
    pub fn truncate(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let step = match self {
            TimeBucket::Hour => Duration::hours(1),
            TimeBucket::Day => Duration::days(1),
        };
        ts.duration_trunc(step).unwrap_or(ts)
    }

    fn backend_function(&self) -> &'static str {
        match self {
            TimeBucket::Hour => "toStartOfHour",
            TimeBucket::Day => "toStartOfDay",
        }
    }
}

/// Fields computed from several columns or from external lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PseudoField {
    /// Short issue id looked up from the issue id
    Issue,
    /// Project slug looked up from the project id
    Project,
    /// First non-empty of email, username, id, ip
    UserDisplay,
    /// 1 handled, 0 unhandled, null undetermined
    Handled,
    /// 1 only when explicitly unhandled
    Unhandled,
    /// 1 when the transaction is starred by the requester
    KeyTransaction,
}

/// How a field reads its backend columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    /// One backend column read as-is
    Column,
    /// Arbitrary tag storage; missing values render as empty strings
    Tag,
    /// Timestamp truncated to a bucket
    Bucket(TimeBucket),
    /// Computed from constituent columns
    Pseudo(PseudoField),
}

/// A resolved field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldSpec {
    /// Canonical field name, also its output alias
    pub name: String,
    /// Backend columns read, in order
    pub backend_columns: Vec<String>,
    /// Declared output type
    pub output_type: OutputType,
    /// Always false for fields; functions carry their own flag
    pub is_aggregate: bool,
    /// Column access strategy
    pub kind: FieldKind,
    /// Only meaningful for transaction events
    pub transactions_only: bool,
}

impl FieldSpec {
    fn column(name: &str, column: &str, output_type: OutputType) -> Self {
        Self {
            name: name.to_string(),
            backend_columns: vec![column.to_string()],
            output_type,
            is_aggregate: false,
            kind: FieldKind::Column,
            transactions_only: false,
        }
    }

    fn pseudo(name: &str, pseudo: PseudoField, columns: &[&str], output_type: OutputType) -> Self {
        Self {
            name: name.to_string(),
            backend_columns: columns.iter().map(ToString::to_string).collect(),
            output_type,
            is_aggregate: false,
            kind: FieldKind::Pseudo(pseudo),
            transactions_only: false,
        }
    }

    fn tag(name: &str, key: &str) -> Self {
        Self {
            name: name.to_string(),
            backend_columns: vec![format!("tags[{key}]")],
            output_type: OutputType::String,
            is_aggregate: false,
            kind: FieldKind::Tag,
            transactions_only: false,
        }
    }

    fn transactions_only(mut self) -> Self {
        self.transactions_only = true;
        self
    }

    /// Key under which the engine reports this field in raw rows.
    ///
    /// Pseudo fields have no single key; they are reported through their
    /// constituent columns.
    pub fn raw_key(&self) -> String {
        match self.kind {
            FieldKind::Bucket(bucket) => format!("{}(timestamp)", bucket.backend_function()),
            _ => self.backend_columns.first().cloned().unwrap_or_default(),
        }
    }

    /// Pseudo field this spec computes, if any
    pub fn pseudo_field(&self) -> Option<PseudoField> {
        match self.kind {
            FieldKind::Pseudo(pseudo) => Some(pseudo),
            _ => None,
        }
    }

    /// True for tag-backed fields
    pub fn is_tag(&self) -> bool {
        self.kind == FieldKind::Tag
    }

    /// Type search values are coerced to.
    ///
    /// Flag-like pseudo fields accept booleans even when rendered as integers.
    pub fn search_type(&self) -> OutputType {
        match self.kind {
            FieldKind::Pseudo(
                PseudoField::Handled | PseudoField::Unhandled | PseudoField::KeyTransaction,
            ) => OutputType::Boolean,
            _ => self.output_type,
        }
    }

    /// Evaluates the field from backend columns supplied by `read`.
    pub fn evaluate<F>(&self, read: F, starred: &KeyTransactionSet) -> Value
    where
        F: Fn(&str) -> Value,
    {
        let first = || {
            self.backend_columns
                .first()
                .map_or(Value::Null, |column| read(column))
        };
        match self.kind {
            FieldKind::Column | FieldKind::Tag => first(),
            FieldKind::Bucket(bucket) => match first() {
                Value::Date(ts) => Value::Date(bucket.truncate(ts)),
                other => other,
            },
            FieldKind::Pseudo(pseudo) => self.derive(pseudo, &read, starred),
        }
    }

    fn derive<F>(&self, pseudo: PseudoField, read: &F, starred: &KeyTransactionSet) -> Value
    where
        F: Fn(&str) -> Value,
    {
        match pseudo {
            PseudoField::Issue => read("group_id"),
            PseudoField::Project => read("project_id"),
            PseudoField::UserDisplay => self
                .backend_columns
                .iter()
                .map(|column| read(column))
                .find(|value| !value.is_empty())
                .unwrap_or(Value::Null),
            PseudoField::Handled => match read("exception_handled") {
                Value::Integer(h) => Value::Integer(i64::from(h != 0)),
                _ => Value::Null,
            },
            PseudoField::Unhandled => {
                Value::Integer(i64::from(read("exception_handled") == Value::Integer(0)))
            },
            PseudoField::KeyTransaction => {
                let project = read("project_id").as_i64().and_then(|id| u64::try_from(id).ok());
                let member = match (project, read("transaction")) {
                    (Some(project), Value::String(name)) => starred.contains(&(project, name)),
                    _ => false,
                };
                Value::Integer(i64::from(member))
            },
        }
    }
}

fn build_known_fields() -> AHashMap<String, FieldSpec> {
    use OutputType::{Boolean, Date, Duration, Integer, String};

    let user_columns = ["email", "username", "user_id", "ip_address"];
    let mut fields = vec![
        FieldSpec::column("id", "event_id", String),
        FieldSpec::column("project.id", "project_id", Integer),
        FieldSpec::pseudo("project", PseudoField::Project, &["project_id"], String),
        FieldSpec::pseudo("project.name", PseudoField::Project, &["project_id"], String),
        FieldSpec::column("issue.id", "group_id", Integer),
        FieldSpec::pseudo("issue", PseudoField::Issue, &["group_id"], String),
        FieldSpec::column("timestamp", "timestamp", Date),
        FieldSpec::column("culprit", "culprit", String),
        FieldSpec::column("message", "message", String),
        FieldSpec::column("title", "title", String),
        FieldSpec::column("platform.name", "platform", String),
        FieldSpec::column("environment", "environment", String),
        FieldSpec::column("release", "release", String),
        FieldSpec::column("dist", "dist", String),
        FieldSpec::column("event.type", "type", String),
        FieldSpec::column("transaction", "transaction", String),
        FieldSpec::pseudo("user", PseudoField::UserDisplay, &user_columns, String),
        FieldSpec::pseudo("user.display", PseudoField::UserDisplay, &user_columns, String),
        FieldSpec::column("user.id", "user_id", String),
        FieldSpec::column("user.email", "email", String),
        FieldSpec::column("user.username", "username", String),
        FieldSpec::column("user.ip", "ip_address", String),
        FieldSpec::column("sdk.name", "sdk_name", String),
        FieldSpec::column("sdk.version", "sdk_version", String),
        FieldSpec::column("http.method", "http_method", String),
        FieldSpec::column("http.referer", "http_referer", String),
        FieldSpec::column("http.url", "http_url", String),
        FieldSpec::column("error.type", "exception_type", String),
        FieldSpec::column("error.value", "exception_value", String),
        FieldSpec::column("error.mechanism", "exception_mechanism", String),
        FieldSpec::pseudo("error.handled", PseudoField::Handled, &["exception_handled"], Boolean),
        FieldSpec::pseudo(
            "error.unhandled",
            PseudoField::Unhandled,
            &["exception_handled"],
            Boolean,
        ),
        FieldSpec::column("stack.filename", "exception_filenames", String),
        FieldSpec::column("transaction.op", "transaction_op", String),
        FieldSpec::column("transaction.duration", "duration", Duration).transactions_only(),
        FieldSpec::column("transaction.status", "transaction_status", String).transactions_only(),
        FieldSpec::column("trace", "trace_id", String).transactions_only(),
        FieldSpec::column("trace.span", "span_id", String),
        FieldSpec::column("trace.parent_span", "parent_span_id", String),
        FieldSpec::pseudo(
            "key_transaction",
            PseudoField::KeyTransaction,
            &["project_id", "transaction"],
            Integer,
        ),
    ];

    for (name, bucket) in [("timestamp.to_hour", TimeBucket::Hour), ("timestamp.to_day", TimeBucket::Day)] {
        let mut spec = FieldSpec::column(name, "timestamp", Date);
        spec.kind = FieldKind::Bucket(bucket);
        fields.push(spec);
    }

    fields.into_iter().map(|spec| (spec.name.clone(), spec)).collect()
}

/// Characters allowed in tag keys.
fn is_tag_key(token: &str) -> bool {
    !token.is_empty()
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ':' | '-'))
}

/// Resolves user-facing field tokens.
#[derive(Debug, Clone, Copy)]
pub struct FieldResolver {
    known: &'static AHashMap<String, FieldSpec>,
}

impl Default for FieldResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldResolver {
    /// Creates a resolver over the process-wide field table
    pub fn new() -> Self {
        Self {
            known: &KNOWN_FIELDS,
        }
    }

    /// Shared resolver instance
    pub fn global() -> &'static FieldResolver {
        &GLOBAL
    }

    /// Resolves a token to its field spec.
    ///
    /// `measurements.*` names are case-insensitive; every other namespace is
    /// case-sensitive. Unknown tokens that look like tag keys resolve to tags.
    pub fn resolve(&self, token: &str) -> Result<FieldSpec> {
        let token = token.trim();

        if let Some(spec) = self.known.get(token) {
            return Ok(spec.clone());
        }

        if let Some(name) = measurement_name(token) {
            let output_type = if DURATION_MEASUREMENTS.contains(&name.as_str()) {
                OutputType::Duration
            } else {
                OutputType::Number
            };
            let mut spec = FieldSpec::column(
                &format!("{MEASUREMENTS_PREFIX}{name}"),
                &format!("measurements[{name}]"),
                output_type,
            );
            spec.transactions_only = true;
            return Ok(spec);
        }

        if CONTEXT_PREFIXES.iter().any(|p| token.starts_with(p)) && is_tag_key(token) {
            return Ok(FieldSpec::column(
                token,
                &format!("contexts[{token}]"),
                OutputType::String,
            ));
        }

        if let Some(key) = token
            .strip_prefix("tags[")
            .and_then(|rest| rest.strip_suffix(']'))
            .filter(|key| is_tag_key(key))
        {
            return Ok(FieldSpec::tag(token, key));
        }

        if is_tag_key(token) {
            return Ok(FieldSpec::tag(token, token));
        }

        Err(DiscoverError::UnknownField(token.to_string()))
    }

    /// True if the token names a field rather than falling back to a tag
    pub fn is_known(&self, token: &str) -> bool {
        self.known.contains_key(token) || measurement_name(token).is_some()
    }
}

fn measurement_name(token: &str) -> Option<String> {
    let prefix = token.get(..MEASUREMENTS_PREFIX.len())?;
    if !prefix.eq_ignore_ascii_case(MEASUREMENTS_PREFIX) {
        return None;
    }
    let name = &token[MEASUREMENTS_PREFIX.len()..];
    if !is_tag_key(name) {
        return None;
    }
    Some(name.to_lowercase())
}
