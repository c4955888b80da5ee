//! Aggregate computation over groups of events.
//!
//! Every function buffers the group's samples and computes exact results;
//! percentiles interpolate linearly between the closest ranks.

use super::backend::{EngineError, KeyTransactionSet};
use super::types::Event;
use crate::core::config::PerformanceConfig;
use crate::core::{ResultRow, Value};
use crate::query::dates::TimeRange;
use crate::query::fields::{FieldResolver, FieldSpec};
use crate::query::functions::{AggregateExpr, FunctionArg, FunctionKind};
use ahash::AHashSet;
use once_cell::sync::Lazy;
use std::cmp::Ordering;

/// Inputs shared by every aggregate in a plan.
#[derive(Debug, Clone, Copy)]
pub struct AggregateContext<'a> {
    /// Policy constants
    pub performance: &'a PerformanceConfig,
    /// Query window, for rates
    pub range: TimeRange,
    /// Starred transactions, for `key_transaction` arguments
    pub starred: &'a KeyTransactionSet,
}

type Outcome = std::result::Result<Value, EngineError>;

/// Reads a field from an event.
pub fn read_field(spec: &FieldSpec, event: &Event, starred: &KeyTransactionSet) -> Value {
    spec.evaluate(|column| event.column(column), starred)
}

/// Key identifying a value for distinct counting and grouping.
pub fn value_key(value: &Value) -> String {
    format!("{}:{}", value.backend_type(), value)
}

/// Computes one aggregate over a group of events.
///
/// `compare_numeric_aggregate` depends on other aggregates and is computed
/// by [`compare_aggregate`] once they are known.
pub fn compute(expr: &AggregateExpr, events: &[&Event], ctx: &AggregateContext<'_>) -> Outcome {
    let perf = ctx.performance;
    let column_values = || -> Vec<Value> {
        match expr.column() {
            Some(spec) => events
                .iter()
                .map(|event| read_field(spec, event, ctx.starred))
                .filter(|value| !value.is_null())
                .collect(),
            None => Vec::new(),
        }
    };

    Ok(match expr.kind {
        FunctionKind::Count => match expr.column() {
            Some(_) => count(column_values().len()),
            None => count(events.len()),
        },
        FunctionKind::CountUnique => {
            let distinct: AHashSet<String> = column_values().iter().map(value_key).collect();
            count(distinct.len())
        },
        FunctionKind::FailureCount => count(failures(events, perf)),
        FunctionKind::Min => column_values()
            .into_iter()
            .min_by(Value::total_cmp)
            .unwrap_or(Value::Null),
        FunctionKind::Max => column_values()
            .into_iter()
            .max_by(Value::total_cmp)
            .unwrap_or(Value::Null),
        FunctionKind::Avg => {
            let samples = numeric(expr, column_values())?;
            if samples.is_empty() {
                Value::Null
            } else {
                Value::Number(samples.iter().sum::<f64>() / samples.len() as f64)
            }
        },
        FunctionKind::Sum => {
            let samples = numeric(expr, column_values())?;
            if samples.is_empty() {
                Value::Null
            } else {
                Value::Number(samples.iter().sum())
            }
        },
        FunctionKind::Any => column_values().into_iter().next().unwrap_or(Value::Null),
        FunctionKind::LastSeen => events
            .iter()
            .map(|event| event.timestamp)
            .max()
            .map_or(Value::Null, Value::Date),
        FunctionKind::LatestEvent => events
            .iter()
            .copied()
            .reduce(|latest, event| if event.timestamp > latest.timestamp { event } else { latest })
            .map_or(Value::Null, |event| Value::String(event.event_id.clone())),
        FunctionKind::Percentile => {
            let quantile = expr.number(1).unwrap_or(0.5);
            let mut samples = numeric(expr, column_values())?;
            percentile(&mut samples, quantile).map_or(Value::Null, Value::Number)
        },
        FunctionKind::Stddev => {
            let samples = numeric(expr, column_values())?;
            variance(&samples).map_or(Value::Null, |v| Value::Number(v.sqrt()))
        },
        FunctionKind::Var => {
            let samples = numeric(expr, column_values())?;
            variance(&samples).map_or(Value::Null, Value::Number)
        },
        FunctionKind::FailureRate => {
            if events.is_empty() {
                Value::Null
            } else {
                Value::Number(failures(events, perf) as f64 / events.len() as f64)
            }
        },
        FunctionKind::Apdex => {
            let threshold = expr.number(0).unwrap_or(perf.apdex_threshold_ms);
            apdex(&durations(events), threshold, perf.frustration_multiplier)
                .map_or(Value::Null, Value::Number)
        },
        FunctionKind::UserMisery => {
            let threshold = expr.number(0).unwrap_or(perf.apdex_threshold_ms);
            let miserable = miserable_users(events, threshold * perf.frustration_multiplier, ctx);
            count(miserable.len())
        },
        FunctionKind::CountMiserable => {
            let threshold = expr.number(1).unwrap_or(perf.apdex_threshold_ms);
            let limit = threshold * perf.frustration_multiplier;
            let distinct: AHashSet<String> = match expr.column() {
                Some(spec) => events
                    .iter()
                    .filter(|event| event.duration_ms.map_or(false, |d| d > limit))
                    .map(|event| read_field(spec, event, ctx.starred))
                    .filter(|value| !value.is_empty())
                    .map(|value| value_key(&value))
                    .collect(),
                None => AHashSet::new(),
            };
            count(distinct.len())
        },
        FunctionKind::UserMiseryPrototype => {
            let threshold = expr.number(0).unwrap_or(perf.apdex_threshold_ms);
            let users = distinct_users(events, ctx);
            if users == 0 {
                Value::Number(0.0)
            } else {
                let miserable = miserable_users(events, threshold * perf.frustration_multiplier, ctx).len();
                Value::Number(
                    (miserable as f64 + perf.misery_alpha)
                        / (users as f64 + perf.misery_alpha + perf.misery_beta),
                )
            }
        },
        FunctionKind::Epm => Value::Number(events.len() as f64 / (ctx.range.seconds() / 60.0)),
        FunctionKind::Eps => Value::Number(events.len() as f64 / ctx.range.seconds()),
        FunctionKind::CountAtLeast => {
            let threshold = expr.number(1).unwrap_or(0.0);
            let samples = numeric(expr, column_values())?;
            count(samples.iter().filter(|v| **v >= threshold).count())
        },
        FunctionKind::CompareNumericAggregate => Value::Null,
    })
}

/// Evaluates `compare_numeric_aggregate` against already computed aggregates.
pub fn compare_aggregate(expr: &AggregateExpr, row: &ResultRow) -> Value {
    let op = expr.args.iter().find_map(|arg| match arg {
        FunctionArg::Comparison(op) => Some(*op),
        _ => None,
    });
    let left = expr
        .referenced_alias()
        .and_then(|alias| row.get(alias))
        .and_then(Value::as_f64);

    match (op, left, expr.number(2)) {
        (Some(op), Some(left), Some(right)) => Value::Integer(i64::from(op.apply(left, right))),
        _ => Value::Integer(0),
    }
}

#[allow(clippy::cast_possible_wrap)]
fn count(n: usize) -> Value {
    Value::Integer(n as i64)
}

fn numeric(expr: &AggregateExpr, values: Vec<Value>) -> std::result::Result<Vec<f64>, EngineError> {
    values
        .into_iter()
        .map(|value| {
            value.as_f64().ok_or_else(|| {
                EngineError::IllegalTypeOfArgument(format!(
                    "{} received a {} value",
                    expr.name,
                    value.backend_type()
                ))
            })
        })
        .collect()
}

fn failures(events: &[&Event], perf: &PerformanceConfig) -> usize {
    events
        .iter()
        .filter(|event| match &event.transaction_status {
            Some(status) => !perf.successful_statuses.iter().any(|s| s == status),
            None => false,
        })
        .count()
}

fn durations(events: &[&Event]) -> Vec<f64> {
    events.iter().filter_map(|event| event.duration_ms).collect()
}

static USER_FIELD: Lazy<Option<FieldSpec>> = Lazy::new(|| FieldResolver::global().resolve("user").ok());

fn user_keys<'e>(
    events: impl Iterator<Item = &'e &'e Event>,
    ctx: &AggregateContext<'_>,
) -> AHashSet<String> {
    let Some(user) = USER_FIELD.as_ref() else {
        return AHashSet::new();
    };
    events
        .map(|event| read_field(user, event, ctx.starred))
        .filter(|value| !value.is_empty())
        .map(|value| value_key(&value))
        .collect()
}

/// Users with at least one sample slower than `limit`.
fn miserable_users(events: &[&Event], limit: f64, ctx: &AggregateContext<'_>) -> AHashSet<String> {
    user_keys(
        events
            .iter()
            .filter(|event| event.duration_ms.map_or(false, |d| d > limit)),
        ctx,
    )
}

fn distinct_users(events: &[&Event], ctx: &AggregateContext<'_>) -> usize {
    user_keys(events.iter(), ctx).len()
}

/// `(satisfied + tolerated / 2) / total`
pub fn apdex(samples: &[f64], threshold: f64, multiplier: f64) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    let (satisfied, tolerated) = samples.iter().fold((0usize, 0usize), |(s, t), &d| {
        if d <= threshold {
            (s + 1, t)
        } else if d <= threshold * multiplier {
            (s, t + 1)
        } else {
            (s, t)
        }
    });
    Some((satisfied as f64 + tolerated as f64 / 2.0) / samples.len() as f64)
}

/// Linear interpolation between closest ranks; sorts in place.
pub fn percentile(samples: &mut [f64], quantile: f64) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    samples.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let position = quantile.clamp(0.0, 1.0) * (samples.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    Some(samples[lower] + (samples[upper] - samples[lower]) * fraction)
}

/// Sample variance; undefined below two samples.
pub fn variance(samples: &[f64]) -> Option<f64> {
    if samples.len() < 2 {
        return None;
    }
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    Some(samples.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0))
}
