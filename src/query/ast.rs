//! Abstract syntax tree for search filters.

use super::fields::FieldSpec;
use super::functions::AggregateExpr;
use crate::core::{DiscoverError, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use std::fmt;

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    /// Equals
    Eq,
    /// Not equals
    NotEq,
    /// Less than
    Lt,
    /// Less than or equal
    Lte,
    /// Greater than
    Gt,
    /// Greater than or equal
    Gte,
    /// Value present
    Has,
    /// Value absent
    NotHas,
}

impl CompareOp {
    /// Operator with the opposite meaning, where one exists as an operator
    pub fn negated(self) -> Option<Self> {
        match self {
            CompareOp::Eq => Some(CompareOp::NotEq),
            CompareOp::NotEq => Some(CompareOp::Eq),
            CompareOp::Has => Some(CompareOp::NotHas),
            CompareOp::NotHas => Some(CompareOp::Has),
            _ => None,
        }
    }
}

/// A `*` pattern compiled for matching.
#[derive(Debug, Clone)]
pub struct WildcardPattern {
    pattern: String,
    regex: Regex,
}

impl WildcardPattern {
    /// Compiles a pattern where `*` matches any run of characters
    pub fn new(pattern: &str) -> Result<Self> {
        let body: Vec<String> = pattern.split('*').map(regex::escape).collect();
        let regex = Regex::new(&format!("^{}$", body.join(".*")))
            .map_err(|e| DiscoverError::invalid_search(format!("Invalid wildcard {pattern}: {e}")))?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    /// Pattern as written
    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    /// True if the whole text matches
    pub fn matches(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

impl PartialEq for WildcardPattern {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
    }
}

/// A search value coerced to its target type.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchValue {
    /// No value (`has:` searches)
    Null,
    /// Exact text
    String(String),
    /// Text pattern
    Wildcard(WildcardPattern),
    /// Numbers, durations in milliseconds, percentages as ratios
    Number(f64),
    /// Timestamp
    Date(DateTime<Utc>),
    /// Flag
    Boolean(bool),
}

/// What a comparison targets.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchKey {
    /// Plain field, filtered before aggregation
    Field(FieldSpec),
    /// Function result, filtered after aggregation
    Aggregate(AggregateExpr),
}

impl SearchKey {
    /// True for function results
    pub fn is_aggregate(&self) -> bool {
        matches!(self, SearchKey::Aggregate(_))
    }

    /// Field name or aggregate alias
    pub fn name(&self) -> &str {
        match self {
            SearchKey::Field(spec) => &spec.name,
            SearchKey::Aggregate(expr) => &expr.alias,
        }
    }
}

/// Parsed filter expression.
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionNode {
    /// key op value
    Comparison {
        key: SearchKey,
        op: CompareOp,
        value: SearchValue,
    },
    /// Both sides match
    And(Box<ConditionNode>, Box<ConditionNode>),
    /// Either side matches
    Or(Box<ConditionNode>, Box<ConditionNode>),
    /// Inner does not match
    Not(Box<ConditionNode>),
    /// Free-text search over the message
    Raw(String),
}

impl ConditionNode {
    /// Builds a comparison
    pub fn comparison(key: SearchKey, op: CompareOp, value: SearchValue) -> Self {
        ConditionNode::Comparison { key, op, value }
    }

    /// Builds a conjunction
    pub fn and(left: ConditionNode, right: ConditionNode) -> Self {
        ConditionNode::And(Box::new(left), Box::new(right))
    }

    /// Builds a disjunction
    pub fn or(left: ConditionNode, right: ConditionNode) -> Self {
        ConditionNode::Or(Box::new(left), Box::new(right))
    }

    /// Negates a node, flipping the operator where one exists
    pub fn negate(self) -> Self {
        match self {
            ConditionNode::Comparison { key, op, value } => match op.negated() {
                Some(op) => ConditionNode::Comparison { key, op, value },
                None => ConditionNode::Not(Box::new(ConditionNode::Comparison { key, op, value })),
            },
            ConditionNode::Not(inner) => *inner,
            other => ConditionNode::Not(Box::new(other)),
        }
    }

    /// True if any comparison targets a function result
    pub fn has_aggregate(&self) -> bool {
        match self {
            ConditionNode::Comparison { key, .. } => key.is_aggregate(),
            ConditionNode::And(l, r) | ConditionNode::Or(l, r) => l.has_aggregate() || r.has_aggregate(),
            ConditionNode::Not(inner) => inner.has_aggregate(),
            ConditionNode::Raw(_) => false,
        }
    }

    /// True if any comparison or free text applies before aggregation
    pub fn has_plain(&self) -> bool {
        match self {
            ConditionNode::Comparison { key, .. } => !key.is_aggregate(),
            ConditionNode::And(l, r) | ConditionNode::Or(l, r) => l.has_plain() || r.has_plain(),
            ConditionNode::Not(inner) => inner.has_plain(),
            ConditionNode::Raw(_) => true,
        }
    }

    /// Splits top-level conjunctions into their parts
    pub fn into_conjuncts(self) -> Vec<ConditionNode> {
        match self {
            ConditionNode::And(l, r) => {
                let mut parts = l.into_conjuncts();
                parts.extend(r.into_conjuncts());
                parts
            },
            other => vec![other],
        }
    }

    /// Rebuilds the tree, replacing every comparison through `f`
    pub fn try_map_comparisons<F>(self, f: &mut F) -> Result<ConditionNode>
    where
        F: FnMut(SearchKey, CompareOp, SearchValue) -> Result<ConditionNode>,
    {
        Ok(match self {
            ConditionNode::Comparison { key, op, value } => f(key, op, value)?,
            ConditionNode::And(l, r) => ConditionNode::and(l.try_map_comparisons(f)?, r.try_map_comparisons(f)?),
            ConditionNode::Or(l, r) => ConditionNode::or(l.try_map_comparisons(f)?, r.try_map_comparisons(f)?),
            ConditionNode::Not(inner) => ConditionNode::Not(Box::new(inner.try_map_comparisons(f)?)),
            raw @ ConditionNode::Raw(_) => raw,
        })
    }

    /// Calls `f` for every comparison in the tree
    pub fn for_each_comparison<'a, F>(&'a self, f: &mut F)
    where
        F: FnMut(&'a SearchKey, CompareOp, &'a SearchValue),
    {
        match self {
            ConditionNode::Comparison { key, op, value } => f(key, *op, value),
            ConditionNode::And(l, r) | ConditionNode::Or(l, r) => {
                l.for_each_comparison(f);
                r.for_each_comparison(f);
            },
            ConditionNode::Not(inner) => inner.for_each_comparison(f),
            ConditionNode::Raw(_) => {},
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompareOp::Eq => write!(f, "="),
            CompareOp::NotEq => write!(f, "!="),
            CompareOp::Lt => write!(f, "<"),
            CompareOp::Lte => write!(f, "<="),
            CompareOp::Gt => write!(f, ">"),
            CompareOp::Gte => write!(f, ">="),
            CompareOp::Has => write!(f, "has"),
            CompareOp::NotHas => write!(f, "!has"),
        }
    }
}

impl fmt::Display for SearchValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchValue::Null => write!(f, "null"),
            SearchValue::String(s) => write!(f, "\"{}\"", s),
            SearchValue::Wildcard(p) => write!(f, "\"{}\"", p.as_str()),
            SearchValue::Number(n) => write!(f, "{}", n),
            SearchValue::Date(d) => write!(f, "{}", d.to_rfc3339_opts(SecondsFormat::Secs, true)),
            SearchValue::Boolean(b) => write!(f, "{}", b),
        }
    }
}

impl fmt::Display for SearchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for ConditionNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConditionNode::Comparison { key, op, value } => match op {
                CompareOp::Has | CompareOp::NotHas => write!(f, "{} {}", op, key),
                _ => write!(f, "{} {} {}", key, op, value),
            },
            ConditionNode::And(l, r) => write!(f, "({} AND {})", l, r),
            ConditionNode::Or(l, r) => write!(f, "({} OR {})", l, r),
            ConditionNode::Not(inner) => write!(f, "!{}", inner),
            ConditionNode::Raw(text) => write!(f, "message contains \"{}\"", text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard_matching() {
        let pattern = WildcardPattern::new("*.example.com").unwrap();
        assert!(pattern.matches("api.example.com"));
        assert!(!pattern.matches("example.org"));

        let pattern = WildcardPattern::new("a+b*").unwrap();
        assert!(pattern.matches("a+bc"));
        assert!(!pattern.matches("aab"));
    }

    #[test]
    fn test_negate_flips_operators() {
        let node = ConditionNode::Raw("boom".to_string()).negate();
        assert!(matches!(node, ConditionNode::Not(_)));
        assert_eq!(node.negate(), ConditionNode::Raw("boom".to_string()));
    }

    #[test]
    fn test_conjuncts() {
        let node = ConditionNode::and(
            ConditionNode::and(ConditionNode::Raw("a".into()), ConditionNode::Raw("b".into())),
            ConditionNode::or(ConditionNode::Raw("c".into()), ConditionNode::Raw("d".into())),
        );
        let parts = node.into_conjuncts();
        assert_eq!(parts.len(), 3);
        assert!(matches!(parts[2], ConditionNode::Or(_, _)));
    }
}
