//! Plan execution over an in-memory event set.
//!
//! Mirrors what a columnar backend does with a compiled plan: filter, group,
//! aggregate, apply `having`, sort, page. Raw rows report plain fields under
//! their backend keys and computed fields through their constituent columns,
//! so the normalizer sees the same shape a real backend would return.

use super::aggregator::{self, read_field, value_key, AggregateContext};
use super::backend::{EngineError, KeyTransactionSet, RawColumn, RawResult};
use super::types::Event;
use crate::core::{ResultRow, Value};
use crate::query::ast::{CompareOp, ConditionNode, SearchKey, SearchValue};
use crate::query::builder::{Dataset, OrderTarget, QueryPlan};
use crate::query::fields::{FieldKind, FieldSpec, PseudoField};
use crate::query::functions::FunctionKind;
use ahash::{AHashMap, AHashSet};
use rayon::prelude::*;
use std::cmp::Ordering;

/// Backend type reported for columns with no non-null value.
const NULL_TYPE: &str = "Nullable(Nothing)";

/// A result row plus the values it sorts by.
struct Candidate {
    row: ResultRow,
    sort_keys: Vec<Value>,
}

/// Run a plan against events held in canonical storage order.
///
/// Rows that compare equal on every sort key keep that order, so results
/// are deterministic for identical inputs.
pub fn execute_plan(plan: &QueryPlan, events: &[Event]) -> Result<RawResult, EngineError> {
    let matching: Vec<&Event> = events
        .par_iter()
        .filter(|event| admits(plan, event))
        .collect();

    let mut candidates = if plan.is_aggregate() {
        aggregate_rows(plan, &matching)?
    } else {
        matching
            .iter()
            .map(|event| Candidate {
                row: field_row(&plan.selected_fields, event, &plan.key_transactions),
                sort_keys: plan
                    .orderby
                    .iter()
                    .map(|order| match &order.target {
                        OrderTarget::Field(spec) => read_field(spec, event, &plan.key_transactions),
                        OrderTarget::Aggregate(_) => Value::Null,
                    })
                    .collect(),
            })
            .collect()
    };

    if !plan.orderby.is_empty() {
        candidates.sort_by(|a, b| compare_keys(plan, &a.sort_keys, &b.sort_keys));
    }

    let rows: Vec<ResultRow> = candidates
        .into_iter()
        .skip(plan.offset)
        .take(plan.limit)
        .map(|candidate| candidate.row)
        .collect();

    Ok(RawResult {
        columns: describe_columns(plan, &rows),
        rows,
    })
}

fn admits(plan: &QueryPlan, event: &Event) -> bool {
    if plan.dataset == Dataset::Transactions && !event.is_transaction() {
        return false;
    }
    plan.project_ids.contains(&event.project_id)
        && plan.time_range.contains(event.timestamp)
        && plan
            .where_conditions
            .iter()
            .all(|condition| matches_event(condition, event, &plan.key_transactions))
}

fn matches_event(node: &ConditionNode, event: &Event, starred: &KeyTransactionSet) -> bool {
    match node {
        ConditionNode::Comparison {
            key: SearchKey::Field(spec),
            op,
            value,
        } => {
            let actual = read_field(spec, event, starred);
            compare(&actual, *op, value, spec.pseudo_field())
        },
        ConditionNode::Comparison { .. } => true,
        ConditionNode::And(l, r) => matches_event(l, event, starred) && matches_event(r, event, starred),
        ConditionNode::Or(l, r) => matches_event(l, event, starred) || matches_event(r, event, starred),
        ConditionNode::Not(inner) => !matches_event(inner, event, starred),
        ConditionNode::Raw(text) => {
            let needle = text.to_lowercase();
            event.message.to_lowercase().contains(&needle) || event.title.to_lowercase().contains(&needle)
        },
    }
}

fn matches_row(node: &ConditionNode, row: &ResultRow) -> bool {
    match node {
        ConditionNode::Comparison {
            key: SearchKey::Aggregate(expr),
            op,
            value,
        } => {
            let actual = row.get(&expr.alias).cloned().unwrap_or(Value::Null);
            compare(&actual, *op, value, None)
        },
        ConditionNode::Comparison { .. } | ConditionNode::Raw(_) => true,
        ConditionNode::And(l, r) => matches_row(l, row) && matches_row(r, row),
        ConditionNode::Or(l, r) => matches_row(l, row) || matches_row(r, row),
        ConditionNode::Not(inner) => !matches_row(inner, row),
    }
}

/// Evaluate one comparison against a value.
fn compare(actual: &Value, op: CompareOp, expected: &SearchValue, pseudo: Option<PseudoField>) -> bool {
    match op {
        CompareOp::Has => return !actual.is_empty(),
        CompareOp::NotHas => return actual.is_empty(),
        _ => {},
    }

    if let Value::Array(items) = actual {
        let positive = match op {
            CompareOp::NotEq => CompareOp::Eq,
            other => other,
        };
        let any = items.iter().any(|item| compare(item, positive, expected, pseudo));
        return if op == CompareOp::NotEq { !any } else { any };
    }

    // Events with no handled flag count as handled.
    let actual = match (pseudo, actual) {
        (Some(PseudoField::Handled), Value::Null) => Value::Integer(1),
        (_, other) => other.clone(),
    };

    let ordering = match (expected, &actual) {
        (_, Value::Null) => None,
        (SearchValue::Null, _) => None,
        (SearchValue::String(text), value) => Some(display(value).as_str().cmp(text.as_str())),
        (SearchValue::Wildcard(pattern), value) => {
            let matched = pattern.matches(&display(value));
            return match op {
                CompareOp::Eq => matched,
                CompareOp::NotEq => !matched,
                _ => false,
            };
        },
        (SearchValue::Number(n), value) => value.as_f64().and_then(|v| v.partial_cmp(n)),
        (SearchValue::Date(expected), Value::Date(ts)) => Some(ts.cmp(expected)),
        (SearchValue::Date(_), _) => None,
        (SearchValue::Boolean(flag), value) => value
            .as_f64()
            .map(|v| (v != 0.0).cmp(flag)),
    };

    match ordering {
        None => op == CompareOp::NotEq,
        Some(ordering) => match op {
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::NotEq => ordering != Ordering::Equal,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Lte => ordering != Ordering::Greater,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Gte => ordering != Ordering::Less,
            CompareOp::Has | CompareOp::NotHas => false,
        },
    }
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Raw columns for the selected fields of one event.
fn field_row(fields: &[FieldSpec], event: &Event, starred: &KeyTransactionSet) -> ResultRow {
    let mut row = ResultRow::new();
    for spec in fields {
        match spec.kind {
            FieldKind::Pseudo(_) => {
                for column in &spec.backend_columns {
                    row.insert(column.as_str(), event.column(column));
                }
            },
            _ => row.insert(spec.raw_key(), read_field(spec, event, starred)),
        }
    }
    row
}

fn aggregate_rows(plan: &QueryPlan, events: &[&Event]) -> Result<Vec<Candidate>, EngineError> {
    let ctx = AggregateContext {
        performance: &plan.performance,
        range: plan.time_range,
        starred: &plan.key_transactions,
    };

    // Groups in order of first appearance.
    let mut groups: Vec<Vec<&Event>> = Vec::new();
    if plan.groupby.is_empty() {
        groups.push(events.to_vec());
    } else {
        let mut index: AHashMap<String, usize> = AHashMap::new();
        for &event in events {
            let key = plan
                .groupby
                .iter()
                .map(|spec| value_key(&read_field(spec, event, &plan.key_transactions)))
                .collect::<Vec<_>>()
                .join("\u{1f}");
            let slot = *index.entry(key).or_insert_with(|| {
                groups.push(Vec::new());
                groups.len() - 1
            });
            groups[slot].push(event);
        }
    }

    let mut candidates = Vec::with_capacity(groups.len());
    for members in groups {
        let mut row = match members.first() {
            Some(representative) => field_row(&plan.groupby, representative, &plan.key_transactions),
            None => ResultRow::new(),
        };

        for expr in plan
            .aggregates
            .iter()
            .filter(|a| a.kind != FunctionKind::CompareNumericAggregate)
        {
            row.insert(expr.alias.as_str(), aggregator::compute(expr, &members, &ctx)?);
        }
        for expr in plan
            .aggregates
            .iter()
            .filter(|a| a.kind == FunctionKind::CompareNumericAggregate)
        {
            let value = aggregator::compare_aggregate(expr, &row);
            row.insert(expr.alias.as_str(), value);
        }

        if !plan.having.iter().all(|condition| matches_row(condition, &row)) {
            continue;
        }

        let sort_keys = plan
            .orderby
            .iter()
            .map(|order| match &order.target {
                OrderTarget::Aggregate(alias) => row.get(alias).cloned().unwrap_or(Value::Null),
                OrderTarget::Field(spec) => members
                    .first()
                    .map_or(Value::Null, |event| read_field(spec, event, &plan.key_transactions)),
            })
            .collect();
        candidates.push(Candidate { row, sort_keys });
    }

    Ok(candidates)
}

/// Nulls sort last in either direction.
fn compare_keys(plan: &QueryPlan, a: &[Value], b: &[Value]) -> Ordering {
    for ((left, right), order) in a.iter().zip(b).zip(&plan.orderby) {
        let ordering = match (left.is_null(), right.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) if order.descending => right.total_cmp(left),
            (false, false) => left.total_cmp(right),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn describe_columns(plan: &QueryPlan, rows: &[ResultRow]) -> Vec<RawColumn> {
    let mut names: Vec<String> = Vec::new();
    for spec in &plan.selected_fields {
        match spec.kind {
            FieldKind::Pseudo(_) => names.extend(spec.backend_columns.iter().cloned()),
            _ => names.push(spec.raw_key()),
        }
    }
    names.extend(plan.aggregates.iter().map(|a| a.alias.clone()));
    let mut seen = AHashSet::new();
    names.retain(|name| seen.insert(name.clone()));

    names
        .into_iter()
        .map(|name| {
            let type_name = rows
                .iter()
                .filter_map(|row| row.get(&name))
                .find(|value| !value.is_null())
                .map_or(NULL_TYPE, Value::backend_type)
                .to_string();
            RawColumn { name, type_name }
        })
        .collect()
}
