//! Aggregate function registry.
//!
//! Functions are parsed from `name(arg, ...)` tokens, validated against an
//! argument schema, and turned into [`AggregateExpr`] applications whose
//! output alias is derived only from the name and the arguments as written.

use super::fields::{FieldResolver, FieldSpec};
use crate::core::config::PerformanceConfig;
use crate::core::{DiscoverError, OutputType, Result};
use ahash::AHashMap;
use once_cell::sync::Lazy;
use std::fmt;

static GLOBAL: Lazy<FunctionRegistry> = Lazy::new(FunctionRegistry::new);

/// Function names accepted as spellings of another function.
const FUNCTION_ALIASES: &[(&str, &str)] = &[("tpm", "epm"), ("tps", "eps")];

/// Default column for percentile shorthands.
const DEFAULT_DURATION_COLUMN: &str = "transaction.duration";

/// Identifies a registered function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum FunctionKind {
    Count,
    CountUnique,
    FailureCount,
    Min,
    Max,
    Avg,
    Sum,
    Any,
    LastSeen,
    LatestEvent,
    Percentile,
    Stddev,
    Var,
    FailureRate,
    Apdex,
    UserMisery,
    CountMiserable,
    UserMiseryPrototype,
    Epm,
    Eps,
    CountAtLeast,
    CompareNumericAggregate,
}

/// Kind of value an argument accepts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ArgKind {
    /// Any resolvable field
    Column,
    /// Field with a numeric output type
    NumericColumn,
    /// Numeric or date field
    NumericOrDateColumn,
    /// Only the `user` field
    UserColumn,
    /// Number within optional bounds; `min` is exclusive
    Number { min: Option<f64>, max: Option<f64> },
    /// Positive duration threshold in milliseconds
    Threshold,
    /// Output alias of another selected aggregate
    Alias,
    /// Comparison operator name
    Comparison,
}

/// Default applied when an optional argument is omitted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ArgDefault {
    /// Named field
    Column(&'static str),
    /// Configured apdex threshold
    ApdexThreshold,
}

/// One argument in a function schema.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArgSpec {
    /// Name used in error messages
    pub name: &'static str,
    /// Accepted value kind
    pub kind: ArgKind,
    /// May be omitted
    pub optional: bool,
    /// Value used when omitted
    pub default: Option<ArgDefault>,
}

impl ArgSpec {
    const fn required(name: &'static str, kind: ArgKind) -> Self {
        Self {
            name,
            kind,
            optional: false,
            default: None,
        }
    }

    const fn optional(name: &'static str, kind: ArgKind, default: Option<ArgDefault>) -> Self {
        Self {
            name,
            kind,
            optional: true,
            default,
        }
    }
}

/// How a function's result type is determined.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResultType {
    /// Always the same type
    Fixed(OutputType),
    /// Same as the column argument at the index
    InheritColumn(usize),
    /// Duration if the column argument is a duration, else number
    DurationOrNumber(usize),
}

/// A registered function.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionSpec {
    /// Canonical name
    pub name: &'static str,
    /// Dispatch tag
    pub kind: FunctionKind,
    /// Argument schema
    pub args: Vec<ArgSpec>,
    /// Result type rule
    pub result: ResultType,
    /// May be used in aggregate filters
    pub supports_condition: bool,
    /// Only meaningful for transaction events
    pub transactions_only: bool,
    /// Quantile implied by shorthands such as `p95`
    pub fixed_quantile: Option<f64>,
}

impl FunctionSpec {
    fn new(name: &'static str, kind: FunctionKind, args: Vec<ArgSpec>, result: ResultType) -> Self {
        Self {
            name,
            kind,
            args,
            result,
            supports_condition: true,
            transactions_only: false,
            fixed_quantile: None,
        }
    }

    fn transactions_only(mut self) -> Self {
        self.transactions_only = true;
        self
    }

    fn no_conditions(mut self) -> Self {
        self.supports_condition = false;
        self
    }

    fn quantile(mut self, quantile: f64) -> Self {
        self.fixed_quantile = Some(quantile);
        self
    }

    fn required_args(&self) -> usize {
        self.args.iter().filter(|a| !a.optional).count()
    }
}

/// Operators accepted by `compare_numeric_aggregate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum NumericComparison {
    Greater,
    Less,
    Equals,
    NotEquals,
    GreaterOrEquals,
    LessOrEquals,
}

impl NumericComparison {
    /// Parses an operator name
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "greater" => Some(Self::Greater),
            "less" => Some(Self::Less),
            "equals" => Some(Self::Equals),
            "notEquals" => Some(Self::NotEquals),
            "greaterOrEquals" => Some(Self::GreaterOrEquals),
            "lessOrEquals" => Some(Self::LessOrEquals),
            _ => None,
        }
    }

    /// Operator name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Greater => "greater",
            Self::Less => "less",
            Self::Equals => "equals",
            Self::NotEquals => "notEquals",
            Self::GreaterOrEquals => "greaterOrEquals",
            Self::LessOrEquals => "lessOrEquals",
        }
    }

    /// Applies the comparison
    #[allow(clippy::float_cmp)]
    pub fn apply(&self, left: f64, right: f64) -> bool {
        match self {
            Self::Greater => left > right,
            Self::Less => left < right,
            Self::Equals => left == right,
            Self::NotEquals => left != right,
            Self::GreaterOrEquals => left >= right,
            Self::LessOrEquals => left <= right,
        }
    }
}

/// A validated function argument.
#[derive(Debug, Clone, PartialEq)]
pub enum FunctionArg {
    /// Resolved column
    Column(FieldSpec),
    /// Numeric literal
    Number(f64),
    /// Alias of another aggregate
    Alias(String),
    /// Comparison operator
    Comparison(NumericComparison),
}

/// A function applied to concrete arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateExpr {
    /// Output key, derived from name and arguments as written
    pub alias: String,
    /// Name as written, for example `tpm`
    pub name: String,
    /// Dispatch tag
    pub kind: FunctionKind,
    /// Arguments after defaults, in schema order
    pub args: Vec<FunctionArg>,
    /// Declared result type; `None` defers to the backend column type
    pub result_type: Option<OutputType>,
    /// May be used in aggregate filters
    pub supports_condition: bool,
    /// Requires transaction events
    pub transactions_only: bool,
    /// Computed only for filtering, not returned
    pub hidden: bool,
}

impl AggregateExpr {
    /// First column argument
    pub fn column(&self) -> Option<&FieldSpec> {
        self.args.iter().find_map(|arg| match arg {
            FunctionArg::Column(spec) => Some(spec),
            _ => None,
        })
    }

    /// Numeric argument at a schema position
    pub fn number(&self, index: usize) -> Option<f64> {
        match self.args.get(index) {
            Some(FunctionArg::Number(n)) => Some(*n),
            _ => None,
        }
    }

    /// Referenced alias for `compare_numeric_aggregate`
    pub fn referenced_alias(&self) -> Option<&str> {
        self.args.iter().find_map(|arg| match arg {
            FunctionArg::Alias(alias) => Some(alias.as_str()),
            _ => None,
        })
    }

    /// Renders the backend expression for plan descriptions.
    pub fn render(&self, perf: &PerformanceConfig) -> String {
        let column = self
            .column()
            .map(|spec| spec.raw_key())
            .unwrap_or_default();
        let number = |index: usize| self.number(index).map(format_number).unwrap_or_default();
        let frustrated = |index: usize| {
            self.number(index)
                .map(|t| format_number(t * perf.frustration_multiplier))
                .unwrap_or_default()
        };

        match self.kind {
            FunctionKind::Count if column.is_empty() => "count()".to_string(),
            FunctionKind::Count => format!("count({column})"),
            FunctionKind::CountUnique => format!("uniq({column})"),
            FunctionKind::FailureCount => format!(
                "countIf(notIn(transaction_status, [{}]))",
                perf.successful_statuses.join(", ")
            ),
            FunctionKind::Min => format!("min({column})"),
            FunctionKind::Max => format!("max({column})"),
            FunctionKind::Avg => format!("avg({column})"),
            FunctionKind::Sum => format!("sum({column})"),
            FunctionKind::Any => format!("any({column})"),
            FunctionKind::LastSeen => "max(timestamp)".to_string(),
            FunctionKind::LatestEvent => "argMax(event_id, timestamp)".to_string(),
            FunctionKind::Percentile => format!("quantile({})({column})", number(1)),
            FunctionKind::Stddev => format!("stddevSamp({column})"),
            FunctionKind::Var => format!("varSamp({column})"),
            FunctionKind::FailureRate => format!(
                "divide(countIf(notIn(transaction_status, [{}])), count())",
                perf.successful_statuses.join(", ")
            ),
            FunctionKind::Apdex => format!("apdex(duration, {})", number(0)),
            FunctionKind::UserMisery => {
                format!("uniqIf(user, greater(duration, {}))", frustrated(0))
            },
            FunctionKind::CountMiserable => {
                format!("uniqIf({column}, greater(duration, {}))", frustrated(1))
            },
            FunctionKind::UserMiseryPrototype => format!(
                "divide(plus(uniqIf(user, greater(duration, {})), {}), plus(uniq(user), {}))",
                frustrated(0),
                format_number(perf.misery_alpha),
                format_number(perf.misery_alpha + perf.misery_beta)
            ),
            FunctionKind::Epm => "divide(count(), divide(interval, 60))".to_string(),
            FunctionKind::Eps => "divide(count(), interval)".to_string(),
            FunctionKind::CountAtLeast => {
                format!("countIf(greaterOrEquals({column}, {}))", number(1))
            },
            FunctionKind::CompareNumericAggregate => {
                let op = self.args.iter().find_map(|arg| match arg {
                    FunctionArg::Comparison(op) => Some(op.as_str()),
                    _ => None,
                });
                format!(
                    "{}({}, {})",
                    op.unwrap_or("equals"),
                    self.referenced_alias().unwrap_or_default(),
                    number(2)
                )
            },
        }
    }
}

impl fmt::Display for AggregateExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.alias)
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{n:.0}")
    } else {
        n.to_string()
    }
}

/// Splits `name(args)` into the name and the raw argument text.
pub fn split_call(token: &str) -> Option<(&str, &str)> {
    let token = token.trim();
    let open = token.find('(')?;
    let name = &token[..open];
    let args = token[open + 1..].strip_suffix(')')?;
    let valid_name = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if !valid_name || args.contains('(') || args.contains(')') {
        return None;
    }
    Some((name, args))
}

/// True if the token has function-call shape.
pub fn is_function_call(token: &str) -> bool {
    split_call(token).is_some()
}

/// Derives the output alias of a function application.
///
/// Only written arguments take part, so `apdex()` keeps the key `apdex`
/// while `apdex(300)` becomes `apdex_300`. Any character other than ASCII
/// letters, digits and `_` becomes `_`, and trailing underscores are dropped.
pub fn derive_alias<S: AsRef<str>>(name: &str, args: &[S]) -> String {
    let mut raw = name.to_string();
    for arg in args {
        raw.push('_');
        raw.push_str(arg.as_ref());
    }
    let alias: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    alias.trim_end_matches('_').to_string()
}

/// Immutable table of functions, built once per process.
#[derive(Debug)]
pub struct FunctionRegistry {
    functions: AHashMap<&'static str, FunctionSpec>,
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FunctionRegistry {
    /// Builds the registry
    pub fn new() -> Self {
        use ArgKind::{Column, NumericColumn, NumericOrDateColumn, Threshold, UserColumn};
        use FunctionKind as K;
        use OutputType::{Date, Integer, Number, Percentage, String};

        let duration_column =
            ArgSpec::optional("column", NumericColumn, Some(ArgDefault::Column(DEFAULT_DURATION_COLUMN)));
        let threshold = ArgSpec::optional("threshold", Threshold, Some(ArgDefault::ApdexThreshold));
        let any_number = ArgKind::Number { min: None, max: None };

        let specs = vec![
            FunctionSpec::new("count", K::Count, vec![ArgSpec::optional("column", Column, None)], ResultType::Fixed(Integer)),
            FunctionSpec::new("count_unique", K::CountUnique, vec![ArgSpec::required("column", Column)], ResultType::Fixed(Integer)),
            FunctionSpec::new("failure_count", K::FailureCount, vec![], ResultType::Fixed(Integer)).transactions_only(),
            FunctionSpec::new("min", K::Min, vec![ArgSpec::required("column", NumericOrDateColumn)], ResultType::InheritColumn(0)),
            FunctionSpec::new("max", K::Max, vec![ArgSpec::required("column", NumericOrDateColumn)], ResultType::InheritColumn(0)),
            FunctionSpec::new("avg", K::Avg, vec![ArgSpec::required("column", NumericColumn)], ResultType::InheritColumn(0)),
            FunctionSpec::new("sum", K::Sum, vec![ArgSpec::required("column", NumericColumn)], ResultType::InheritColumn(0)),
            FunctionSpec::new("any", K::Any, vec![ArgSpec::required("column", Column)], ResultType::InheritColumn(0)).no_conditions(),
            FunctionSpec::new("last_seen", K::LastSeen, vec![], ResultType::Fixed(Date)),
            FunctionSpec::new("latest_event", K::LatestEvent, vec![], ResultType::Fixed(String)).no_conditions(),
            FunctionSpec::new("p50", K::Percentile, vec![duration_column], ResultType::DurationOrNumber(0)).quantile(0.5),
            FunctionSpec::new("p75", K::Percentile, vec![duration_column], ResultType::DurationOrNumber(0)).quantile(0.75),
            FunctionSpec::new("p95", K::Percentile, vec![duration_column], ResultType::DurationOrNumber(0)).quantile(0.95),
            FunctionSpec::new("p99", K::Percentile, vec![duration_column], ResultType::DurationOrNumber(0)).quantile(0.99),
            FunctionSpec::new("p100", K::Percentile, vec![duration_column], ResultType::DurationOrNumber(0)).quantile(1.0),
            FunctionSpec::new(
                "percentile",
                K::Percentile,
                vec![
                    ArgSpec::required("column", NumericColumn),
                    ArgSpec::required("percentile", ArgKind::Number { min: Some(0.0), max: Some(1.0) }),
                ],
                ResultType::DurationOrNumber(0),
            ),
            FunctionSpec::new("stddev", K::Stddev, vec![ArgSpec::required("column", NumericColumn)], ResultType::Fixed(Number)),
            FunctionSpec::new("var", K::Var, vec![ArgSpec::required("column", NumericColumn)], ResultType::Fixed(Number)),
            FunctionSpec::new("failure_rate", K::FailureRate, vec![], ResultType::Fixed(Percentage)).transactions_only(),
            FunctionSpec::new("apdex", K::Apdex, vec![threshold], ResultType::Fixed(Number)).transactions_only(),
            FunctionSpec::new("user_misery", K::UserMisery, vec![threshold], ResultType::Fixed(Number)).transactions_only(),
            FunctionSpec::new(
                "count_miserable",
                K::CountMiserable,
                vec![ArgSpec::optional("column", UserColumn, Some(ArgDefault::Column("user"))), threshold],
                ResultType::Fixed(Integer),
            )
            .transactions_only(),
            FunctionSpec::new("user_misery_prototype", K::UserMiseryPrototype, vec![threshold], ResultType::Fixed(Number))
                .transactions_only(),
            FunctionSpec::new("epm", K::Epm, vec![], ResultType::Fixed(Number)),
            FunctionSpec::new("eps", K::Eps, vec![], ResultType::Fixed(Number)),
            FunctionSpec::new(
                "count_at_least",
                K::CountAtLeast,
                vec![ArgSpec::required("column", NumericColumn), ArgSpec::required("threshold", any_number)],
                ResultType::Fixed(Integer),
            ),
            FunctionSpec::new(
                "compare_numeric_aggregate",
                K::CompareNumericAggregate,
                vec![
                    ArgSpec::required("aggregate_alias", ArgKind::Alias),
                    ArgSpec::required("operator", ArgKind::Comparison),
                    ArgSpec::required("value", any_number),
                ],
                ResultType::Fixed(Integer),
            ),
        ];

        Self {
            functions: specs.into_iter().map(|spec| (spec.name, spec)).collect(),
        }
    }

    /// Shared registry instance
    pub fn global() -> &'static FunctionRegistry {
        &GLOBAL
    }

    /// Looks up a function by name, accepting alternate spellings
    pub fn get(&self, name: &str) -> Option<&FunctionSpec> {
        let canonical = FUNCTION_ALIASES
            .iter()
            .find(|(alias, _)| *alias == name)
            .map_or(name, |(_, target)| *target);
        self.functions.get(canonical)
    }

    /// Parses and validates a `name(args)` token.
    pub fn parse_function(
        &self,
        token: &str,
        resolver: &FieldResolver,
        perf: &PerformanceConfig,
    ) -> Result<AggregateExpr> {
        let (name, raw_args) = split_call(token)
            .ok_or_else(|| DiscoverError::invalid_function(format!("{} is not a valid function", token.trim())))?;

        let spec = self
            .get(name)
            .ok_or_else(|| DiscoverError::invalid_function(format!("{name} is not a valid function")))?;

        let written: Vec<&str> = if raw_args.trim().is_empty() {
            Vec::new()
        } else {
            raw_args.split(',').map(str::trim).collect()
        };

        if written.len() < spec.required_args() || written.len() > spec.args.len() {
            let expected = if spec.required_args() == spec.args.len() {
                spec.args.len().to_string()
            } else {
                format!("{} to {}", spec.required_args(), spec.args.len())
            };
            return Err(DiscoverError::invalid_function(format!(
                "{name}: expected {expected} argument(s) but got {}",
                written.len()
            )));
        }

        let mut args = Vec::with_capacity(spec.args.len());
        for (index, arg_spec) in spec.args.iter().enumerate() {
            let arg = match written.get(index) {
                Some(text) => parse_argument(name, arg_spec, text, resolver)?,
                None => match arg_spec.default {
                    Some(ArgDefault::Column(column)) => FunctionArg::Column(resolver.resolve(column)?),
                    Some(ArgDefault::ApdexThreshold) => FunctionArg::Number(perf.apdex_threshold_ms),
                    None => continue,
                },
            };
            args.push(arg);
        }
        if let Some(quantile) = spec.fixed_quantile {
            args.push(FunctionArg::Number(quantile));
        }

        let column_at = |index: usize| match args.get(index) {
            Some(FunctionArg::Column(column)) => Some(column),
            _ => None,
        };
        let result_type = match spec.result {
            ResultType::Fixed(output) => Some(output),
            ResultType::InheritColumn(index) => column_at(index)
                .filter(|column| !column.is_tag())
                .map(|column| column.output_type),
            ResultType::DurationOrNumber(index) => Some(match column_at(index) {
                Some(column) if column.output_type == OutputType::Duration => OutputType::Duration,
                _ => OutputType::Number,
            }),
        };

        let transactions_only = spec.transactions_only
            || args
                .iter()
                .any(|arg| matches!(arg, FunctionArg::Column(column) if column.transactions_only));

        // Numeric literals are spelled canonically: `0.950` and `0.95` share a key.
        let normalized: Vec<String> = written
            .iter()
            .zip(&args)
            .map(|(text, arg)| match arg {
                FunctionArg::Number(value) => format_number(*value),
                _ => (*text).to_string(),
            })
            .collect();

        Ok(AggregateExpr {
            alias: derive_alias(name, &normalized),
            name: name.to_string(),
            kind: spec.kind,
            args,
            result_type,
            supports_condition: spec.supports_condition,
            transactions_only,
            hidden: false,
        })
    }
}

fn parse_argument(function: &str, spec: &ArgSpec, text: &str, resolver: &FieldResolver) -> Result<FunctionArg> {
    let invalid = |reason: String| {
        DiscoverError::invalid_function(format!("{function}: {} argument invalid: {reason}", spec.name))
    };

    match spec.kind {
        ArgKind::Column => Ok(FunctionArg::Column(resolver.resolve(text)?)),
        ArgKind::NumericColumn | ArgKind::NumericOrDateColumn => {
            let column = resolver.resolve(text)?;
            let accepted = column.output_type.is_numeric()
                || (spec.kind == ArgKind::NumericOrDateColumn && column.output_type == OutputType::Date);
            if accepted {
                Ok(FunctionArg::Column(column))
            } else {
                Err(invalid(format!("{text} is not a numeric column")))
            }
        },
        ArgKind::UserColumn => {
            if text == "user" {
                Ok(FunctionArg::Column(resolver.resolve(text)?))
            } else {
                Err(invalid(format!("{text} is not a valid column, only user is allowed")))
            }
        },
        ArgKind::Number { min, max } => {
            let value: f64 = text
                .parse()
                .map_err(|_| invalid(format!("{text} is not a number")))?;
            if !value.is_finite() {
                return Err(invalid(format!("{text} is not a finite number")));
            }
            if min.map_or(false, |min| value <= min) || max.map_or(false, |max| value > max) {
                return Err(invalid(format!(
                    "{text} must be in the range ({}, {}]",
                    min.map_or("-inf".to_string(), format_number),
                    max.map_or("inf".to_string(), format_number)
                )));
            }
            Ok(FunctionArg::Number(value))
        },
        ArgKind::Threshold => {
            let value: f64 = text
                .parse()
                .map_err(|_| invalid(format!("{text} is not a number")))?;
            if !value.is_finite() || value <= 0.0 {
                return Err(invalid(format!("{text} must be a positive number")));
            }
            Ok(FunctionArg::Number(value))
        },
        ArgKind::Alias => {
            let valid = !text.is_empty() && text.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
            if valid {
                Ok(FunctionArg::Alias(text.to_string()))
            } else {
                Err(invalid(format!("{text} is not a valid alias")))
            }
        },
        ArgKind::Comparison => NumericComparison::parse(text)
            .map(FunctionArg::Comparison)
            .ok_or_else(|| invalid(format!("{text} is not a valid comparison operator"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(token: &str) -> Result<AggregateExpr> {
        FunctionRegistry::global().parse_function(token, FieldResolver::global(), &PerformanceConfig::default())
    }

    #[test]
    fn test_alias_derivation() {
        assert_eq!(derive_alias("percentile", &["transaction.duration", "0.95"]), "percentile_transaction_duration_0_95");
        assert_eq!(derive_alias::<&str>("count", &[]), "count");
        assert_eq!(derive_alias("count", &["id"]), "count_id");
        assert_eq!(derive_alias("user_misery", &["300"]), "user_misery_300");
    }

    #[test]
    fn test_percentile_alias_and_type() {
        let expr = parse("percentile(transaction.duration, 0.95)").unwrap();
        assert_eq!(expr.alias, "percentile_transaction_duration_0_95");
        assert_eq!(expr.result_type, Some(OutputType::Duration));
        assert_eq!(expr.number(1), Some(0.95));

        let expr = parse("percentile(measurements.frames_total, 0.5)").unwrap();
        assert_eq!(expr.result_type, Some(OutputType::Number));
    }

    #[test]
    fn test_alias_is_stable() {
        for token in ["p95()", "apdex(300)", "count_unique(user)", "tpm()"] {
            assert_eq!(parse(token).unwrap().alias, parse(token).unwrap().alias);
        }
    }

    #[test]
    fn test_percentile_fraction_range() {
        assert!(matches!(parse("percentile(transaction.duration, 0)"), Err(DiscoverError::InvalidFunctionArguments(_))));
        assert!(matches!(parse("percentile(transaction.duration, 1.5)"), Err(DiscoverError::InvalidFunctionArguments(_))));
        assert!(parse("percentile(transaction.duration, 1)").is_ok());
    }

    #[test]
    fn test_non_finite_arguments_rejected() {
        for token in [
            "percentile(transaction.duration, nan)",
            "percentile(transaction.duration, NaN)",
            "percentile(transaction.duration, inf)",
            "apdex(NaN)",
            "apdex(inf)",
            "user_misery(-inf)",
            "count_at_least(transaction.duration, nan)",
            "compare_numeric_aggregate(p50, greater, inf)",
        ] {
            assert!(
                matches!(parse(token), Err(DiscoverError::InvalidFunctionArguments(_))),
                "{token} was accepted"
            );
        }
    }

    #[test]
    fn test_alias_uses_canonical_numbers() {
        assert_eq!(parse("percentile(transaction.duration,0.950)").unwrap().alias, "percentile_transaction_duration_0_95");
        assert_eq!(parse("percentile(transaction.duration, 0.95)").unwrap().alias, "percentile_transaction_duration_0_95");
        assert_eq!(parse("apdex(300.0)").unwrap().alias, "apdex_300");
        assert_eq!(parse("apdex(300)").unwrap().alias, "apdex_300");
        // Omitted defaults are not spelled out.
        assert_eq!(parse("apdex()").unwrap().alias, "apdex");
        assert_eq!(parse("p95()").unwrap().alias, "p95");
    }

    #[test]
    fn test_argument_count() {
        assert!(matches!(parse("count_unique()"), Err(DiscoverError::InvalidFunctionArguments(_))));
        assert!(matches!(parse("failure_rate(1)"), Err(DiscoverError::InvalidFunctionArguments(_))));
        assert!(parse("count()").is_ok());
        assert!(parse("count(id)").is_ok());
    }

    #[test]
    fn test_defaults_applied() {
        let expr = parse("apdex()").unwrap();
        assert_eq!(expr.alias, "apdex");
        assert_eq!(expr.number(0), Some(300.0));

        let expr = parse("p75()").unwrap();
        assert_eq!(expr.column().unwrap().name, "transaction.duration");
        assert_eq!(expr.result_type, Some(OutputType::Duration));
        assert!(expr.transactions_only);

        let expr = parse("count_miserable(user, 300)").unwrap();
        assert_eq!(expr.alias, "count_miserable_user_300");
        assert!(matches!(parse("count_miserable(email, 300)"), Err(DiscoverError::InvalidFunctionArguments(_))));
    }

    #[test]
    fn test_result_types() {
        assert_eq!(parse("failure_rate()").unwrap().result_type, Some(OutputType::Percentage));
        assert_eq!(parse("user_misery(300)").unwrap().result_type, Some(OutputType::Number));
        assert_eq!(parse("max(timestamp)").unwrap().result_type, Some(OutputType::Date));
        assert_eq!(parse("sum(transaction.duration)").unwrap().result_type, Some(OutputType::Duration));
        assert_eq!(parse("any(browser)").unwrap().result_type, None);
    }

    #[test]
    fn test_numeric_column_required() {
        match parse("avg(user.email)") {
            Err(DiscoverError::InvalidFunctionArguments(msg)) => assert!(msg.contains("not a numeric column")),
            other => panic!("Expected InvalidFunctionArguments, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_column_propagates() {
        assert!(matches!(parse("count_unique(bad field)"), Err(DiscoverError::UnknownField(_))));
    }

    #[test]
    fn test_rate_aliases() {
        let expr = parse("tpm()").unwrap();
        assert_eq!(expr.kind, FunctionKind::Epm);
        assert_eq!(expr.alias, "tpm");
    }

    #[test]
    fn test_compare_numeric_aggregate() {
        let expr = parse("compare_numeric_aggregate(p50, greater, 100)").unwrap();
        assert_eq!(expr.referenced_alias(), Some("p50"));
        assert_eq!(expr.number(2), Some(100.0));
        assert!(matches!(
            parse("compare_numeric_aggregate(p50, bigger, 100)"),
            Err(DiscoverError::InvalidFunctionArguments(_))
        ));
    }

    #[test]
    fn test_unknown_function() {
        match parse("frobnicate()") {
            Err(DiscoverError::InvalidFunctionArguments(msg)) => assert_eq!(msg, "frobnicate is not a valid function"),
            other => panic!("Expected InvalidFunctionArguments, got {:?}", other),
        }
    }

    #[test]
    fn test_render() {
        let perf = PerformanceConfig::default();
        assert_eq!(parse("p95()").unwrap().render(&perf), "quantile(0.95)(duration)");
        assert_eq!(parse("user_misery(300)").unwrap().render(&perf), "uniqIf(user, greater(duration, 1200))");
    }
}
