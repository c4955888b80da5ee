//! Result normalization.
//!
//! Converts raw engine rows into user-facing rows keyed by field name or
//! aggregate alias, derives computed fields from their constituent columns,
//! and reports an output type for every returned key.

use super::builder::QueryPlan;
use super::fields::{FieldSpec, PseudoField};
use crate::core::{OutputType, ResultRow, Value};
use crate::storage::{IssueDirectory, Project, RawResult};
use ahash::AHashMap;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::BTreeMap;

/// Rendered for issues that are missing or deleted.
pub const UNKNOWN_ISSUE: &str = "unknown";

/// Rows and per-key output types.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedResult {
    /// User-facing rows
    pub data: Vec<ResultRow>,
    /// Output type per key
    pub meta: BTreeMap<String, OutputType>,
}

/// Lookups needed to render computed fields.
pub struct Normalizer<'a> {
    issues: &'a dyn IssueDirectory,
    slugs: AHashMap<u64, String>,
}

impl<'a> Normalizer<'a> {
    /// Creates a normalizer for rows from the given projects
    pub fn new(issues: &'a dyn IssueDirectory, projects: &[Project]) -> Self {
        Self {
            issues,
            slugs: projects.iter().map(|p| (p.id, p.slug.clone())).collect(),
        }
    }

    /// Normalize at most `max_rows` rows of a raw result.
    pub fn normalize(&self, raw: &RawResult, plan: &QueryPlan, max_rows: usize) -> NormalizedResult {
        let mut meta = BTreeMap::new();
        for field in &plan.selected_fields {
            let output = if field.is_tag() {
                OutputType::String
            } else {
                field.output_type
            };
            meta.insert(field.name.clone(), output);
        }
        for expr in plan.visible_aggregates() {
            let output = expr.result_type.unwrap_or_else(|| {
                raw.column_type(&expr.alias)
                    .map_or(OutputType::String, OutputType::from_backend_type)
            });
            meta.insert(expr.alias.clone(), output);
        }

        let data = raw
            .rows
            .iter()
            .take(max_rows)
            .map(|row| {
                let mut out = ResultRow::new();
                for field in &plan.selected_fields {
                    out.insert(field.name.as_str(), self.field_value(field, row, plan));
                }
                for expr in plan.visible_aggregates() {
                    let value = row.get(&expr.alias).cloned().unwrap_or(Value::Null);
                    let value = match expr.result_type {
                        Some(output) => coerce(value, output),
                        None => value,
                    };
                    out.insert(expr.alias.as_str(), value);
                }
                out
            })
            .collect();

        NormalizedResult { data, meta }
    }

    fn field_value(&self, field: &FieldSpec, row: &ResultRow, plan: &QueryPlan) -> Value {
        let value = field.evaluate(
            |column| {
                let key = if field.pseudo_field().is_some() {
                    column.to_string()
                } else {
                    field.raw_key()
                };
                row.get(&key).cloned().unwrap_or(Value::Null)
            },
            &plan.key_transactions,
        );

        match field.pseudo_field() {
            Some(PseudoField::Issue) => Value::String(
                as_id(&value)
                    .and_then(|id| self.issues.short_id(id))
                    .unwrap_or_else(|| UNKNOWN_ISSUE.to_string()),
            ),
            Some(PseudoField::Project) => match as_id(&value).and_then(|id| self.slugs.get(&id)) {
                Some(slug) => Value::String(slug.clone()),
                None => Value::Null,
            },
            _ if field.is_tag() => match value {
                Value::Null => Value::String(String::new()),
                other => coerce(other, OutputType::String),
            },
            _ => coerce(value, field.output_type),
        }
    }
}

fn as_id(value: &Value) -> Option<u64> {
    value.as_i64().and_then(|id| u64::try_from(id).ok())
}

/// Convert a raw value to the representation of an output type.
///
/// Values that cannot be represented are returned unchanged; nulls stay null.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
pub fn coerce(value: Value, output: OutputType) -> Value {
    match (output, value) {
        (_, Value::Null) => Value::Null,
        (OutputType::String, Value::String(s)) => Value::String(s),
        (OutputType::String, Value::Array(items)) => Value::Array(items),
        (OutputType::String, other) => Value::String(other.to_string()),
        (OutputType::Integer, Value::Number(n)) if n.fract() == 0.0 && n.is_finite() => Value::Integer(n as i64),
        (OutputType::Integer, Value::Boolean(b)) => Value::Integer(i64::from(b)),
        (OutputType::Integer, Value::String(s)) => s.parse().map_or(Value::String(s), Value::Integer),
        (OutputType::Number | OutputType::Duration | OutputType::Percentage, Value::Integer(i)) => {
            Value::Number(i as f64)
        },
        (OutputType::Number | OutputType::Duration | OutputType::Percentage, Value::Boolean(b)) => {
            Value::Number(if b { 1.0 } else { 0.0 })
        },
        (OutputType::Boolean, Value::Integer(i)) => Value::Boolean(i != 0),
        (OutputType::Boolean, Value::Number(n)) => Value::Boolean(n != 0.0),
        (OutputType::Date, Value::Integer(secs)) => Utc
            .timestamp_opt(secs, 0)
            .single()
            .map_or(Value::Integer(secs), Value::Date),
        (OutputType::Date, Value::String(s)) => DateTime::parse_from_rfc3339(&s)
            .map_or(Value::String(s), |ts| Value::Date(ts.with_timezone(&Utc))),
        (_, other) => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coerce() {
        assert_eq!(coerce(Value::Integer(1), OutputType::Boolean), Value::Boolean(true));
        assert_eq!(coerce(Value::Integer(3), OutputType::Number), Value::Number(3.0));
        assert_eq!(coerce(Value::Number(4.0), OutputType::Integer), Value::Integer(4));
        assert_eq!(coerce(Value::Number(4.5), OutputType::Integer), Value::Number(4.5));
        assert_eq!(coerce(Value::Integer(7), OutputType::String), Value::from("7"));
        assert_eq!(coerce(Value::Null, OutputType::Integer), Value::Null);
    }

    #[test]
    fn test_coerce_dates() {
        let ts = Utc.with_ymd_and_hms(2020, 5, 17, 0, 0, 0).unwrap();
        assert_eq!(coerce(Value::Integer(ts.timestamp()), OutputType::Date), Value::Date(ts));
        assert_eq!(
            coerce(Value::from("2020-05-17T00:00:00+00:00"), OutputType::Date),
            Value::Date(ts)
        );
    }
}
