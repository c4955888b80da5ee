//! Search filter parser.
//!
//! Queries are tokenized with character positions, then parsed with two
//! precedence levels: `OR` binds loosest, explicit or implicit `AND` binds
//! tighter, and parentheses override both. Values are coerced to the target
//! field's type with nom.

use super::ast::{CompareOp, ConditionNode, SearchKey, SearchValue, WildcardPattern};
use super::fields::{FieldResolver, FieldSpec};
use super::functions::{is_function_call, FunctionRegistry};
use crate::core::config::PerformanceConfig;
use crate::core::{DiscoverError, OutputType, Result};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{char, digit1, one_of},
    combinator::{all_consuming, map, map_res, opt, value as nom_value},
    number::complete::double,
    sequence::{pair, tuple},
    IResult,
};

/// Shared, read-only inputs for parsing one query.
#[derive(Debug, Clone, Copy)]
pub struct ParseContext<'a> {
    /// Field table
    pub resolver: &'a FieldResolver,
    /// Function table
    pub registry: &'a FunctionRegistry,
    /// Defaults for function thresholds
    pub performance: &'a PerformanceConfig,
    /// Reference time for relative dates
    pub now: DateTime<Utc>,
}

/// Largest amount accepted in relative dates such as `-30d`.
const MAX_RELATIVE_AMOUNT: i64 = 100_000;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Open(usize),
    Close(usize),
    And(usize),
    Or(usize),
    Term { text: String, column: usize },
}

/// Parse a search query into a condition tree; empty queries yield `None`.
pub fn parse_search(query: &str, ctx: &ParseContext<'_>) -> Result<Option<ConditionNode>> {
    let tokens = tokenize(query)?;
    if tokens.is_empty() {
        return Ok(None);
    }

    let mut parser = Parser {
        tokens,
        pos: 0,
        query,
        ctx,
    };
    let node = parser.parse_or()?;

    match parser.peek() {
        None => Ok(Some(node)),
        Some(Token::Close(column)) => Err(DiscoverError::syntax(query, *column)),
        Some(_) => Err(DiscoverError::syntax(query, parser.column())),
    }
}

/// Split the query into terms, parentheses and boolean operators.
fn tokenize(query: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = query.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c == ' ' {
            i += 1;
            continue;
        }
        if c.is_whitespace() {
            return Err(DiscoverError::syntax(query, i + 1));
        }
        if c == '(' {
            tokens.push(Token::Open(i + 1));
            i += 1;
            continue;
        }
        if c == ')' {
            tokens.push(Token::Close(i + 1));
            i += 1;
            continue;
        }

        let start = i;
        let mut open_parens: Vec<usize> = Vec::new();
        let mut bracket_depth = 0usize;
        let mut quote_start: Option<usize> = None;

        while i < chars.len() {
            let c = chars[i];
            if quote_start.is_some() {
                if c == '\\' && i + 1 < chars.len() {
                    i += 2;
                    continue;
                }
                if c == '"' {
                    quote_start = None;
                }
                i += 1;
                continue;
            }
            match c {
                '"' => quote_start = Some(i),
                '(' => open_parens.push(i),
                ')' => {
                    if open_parens.pop().is_none() {
                        break;
                    }
                },
                '[' => bracket_depth += 1,
                ']' => bracket_depth = bracket_depth.saturating_sub(1),
                ' ' if open_parens.is_empty() && bracket_depth == 0 => break,
                c if c.is_whitespace() => return Err(DiscoverError::syntax(query, i + 1)),
                _ => {},
            }
            i += 1;
        }

        if let Some(quote) = quote_start {
            return Err(DiscoverError::syntax(query, quote + 1));
        }
        if let Some(open) = open_parens.first() {
            return Err(DiscoverError::syntax(query, open + 1));
        }

        let text: String = chars[start..i].iter().collect();
        let column = start + 1;
        tokens.push(if text.eq_ignore_ascii_case("AND") {
            Token::And(column)
        } else if text.eq_ignore_ascii_case("OR") {
            Token::Or(column)
        } else {
            Token::Term { text, column }
        });
    }

    Ok(tokens)
}

struct Parser<'q, 'c> {
    tokens: Vec<Token>,
    pos: usize,
    query: &'q str,
    ctx: &'c ParseContext<'c>,
}

impl<'q, 'c> Parser<'q, 'c> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn column(&self) -> usize {
        match self.peek() {
            Some(Token::Open(c) | Token::Close(c) | Token::And(c) | Token::Or(c)) => *c,
            Some(Token::Term { column, .. }) => *column,
            None => self.query.chars().count(),
        }
    }

    fn parse_or(&mut self) -> Result<ConditionNode> {
        let mut left = match self.parse_and()? {
            Some(node) => node,
            None => return Err(self.missing_operand()),
        };

        while let Some(Token::Or(_)) = self.peek() {
            self.pos += 1;
            let right = self.parse_and()?.ok_or_else(|| missing_side("right", "OR"))?;
            left = ConditionNode::or(left, right);
        }

        Ok(left)
    }

    /// Error for an expression with no term where one is required.
    fn missing_operand(&self) -> DiscoverError {
        match self.peek() {
            Some(Token::Or(_)) => missing_side("left", "OR"),
            Some(Token::And(_)) => missing_side("left", "AND"),
            _ => DiscoverError::syntax(self.query, self.column()),
        }
    }

    fn parse_and(&mut self) -> Result<Option<ConditionNode>> {
        let mut terms: Vec<ConditionNode> = Vec::new();
        // Adjacent free-text words join into one search
        let mut joinable = false;

        loop {
            match self.peek().cloned() {
                None | Some(Token::Or(_)) | Some(Token::Close(_)) => break,
                Some(Token::And(_)) => {
                    if terms.is_empty() {
                        return Err(missing_side("left", "AND"));
                    }
                    self.pos += 1;
                    if matches!(
                        self.peek(),
                        None | Some(Token::And(_)) | Some(Token::Or(_)) | Some(Token::Close(_))
                    ) {
                        return Err(missing_side("right", "AND"));
                    }
                    joinable = false;
                },
                Some(Token::Open(column)) => {
                    self.pos += 1;
                    if matches!(self.peek(), Some(Token::Close(_))) {
                        return Err(DiscoverError::syntax(self.query, column));
                    }
                    let inner = self.parse_or()?;
                    match self.peek() {
                        Some(Token::Close(_)) => self.pos += 1,
                        _ => return Err(DiscoverError::syntax(self.query, column)),
                    }
                    terms.push(inner);
                    joinable = false;
                },
                Some(Token::Term { text, .. }) => {
                    self.pos += 1;
                    let node = self.parse_term(&text)?;
                    if let (true, ConditionNode::Raw(next), Some(ConditionNode::Raw(previous))) =
                        (joinable, &node, terms.last_mut())
                    {
                        previous.push(' ');
                        previous.push_str(next);
                        continue;
                    }
                    joinable = matches!(node, ConditionNode::Raw(_));
                    terms.push(node);
                },
            }
        }

        Ok(terms.into_iter().reduce(ConditionNode::and))
    }

    fn parse_term(&self, text: &str) -> Result<ConditionNode> {
        let (negated, body) = match text.strip_prefix('!') {
            Some(rest) if !rest.is_empty() => (true, rest),
            _ => (false, text),
        };

        let node = match split_key_value(body) {
            Some(("has", field)) if !field.is_empty() => {
                let spec = self.ctx.resolver.resolve(field)?;
                ConditionNode::comparison(SearchKey::Field(spec), CompareOp::Has, SearchValue::Null)
            },
            Some((key, value)) if !value.is_empty() && is_function_call(key) => {
                self.aggregate_condition(key, value, body)?
            },
            Some((key, value)) if !value.is_empty() => match self.ctx.resolver.resolve(key) {
                Ok(spec) => field_condition(spec, value, self.ctx.now)?,
                Err(_) => ConditionNode::Raw(unquote(body)),
            },
            _ => ConditionNode::Raw(unquote(body)),
        };

        Ok(if negated { node.negate() } else { node })
    }

    /// Builds a post-aggregation filter.
    ///
    /// A value that does not fit the function's type turns the whole term
    /// into free text instead of failing, so `count():>5&&` searches text.
    fn aggregate_condition(&self, key: &str, value: &str, term: &str) -> Result<ConditionNode> {
        let expr = self
            .ctx
            .registry
            .parse_function(key, self.ctx.resolver, self.ctx.performance)?;
        if !expr.supports_condition {
            return Err(DiscoverError::invalid_search(format!(
                "{} cannot be used in a search condition",
                expr.alias
            )));
        }

        let output_type = expr.result_type.unwrap_or(OutputType::String);
        let parsed = if output_type.is_numeric() {
            numeric_condition(output_type, value).ok()
        } else if output_type == OutputType::Date {
            date_condition(value, self.ctx.now).ok().map(|(op, value, _)| (op, value))
        } else {
            Some((CompareOp::Eq, SearchValue::String(unquote(value))))
        };

        Ok(match parsed {
            Some((op, value)) => ConditionNode::comparison(SearchKey::Aggregate(expr), op, value),
            None => ConditionNode::Raw(term.to_string()),
        })
    }
}

fn missing_side(side: &str, operator: &str) -> DiscoverError {
    DiscoverError::invalid_search(format!(
        "Condition is missing on the {side} side of '{operator}' operator"
    ))
}

/// Split `key:value` at the first colon outside quotes, parens and brackets.
fn split_key_value(term: &str) -> Option<(&str, &str)> {
    let mut depth = 0i32;
    let mut in_quotes = false;
    for (index, c) in term.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            '(' | '[' if !in_quotes => depth += 1,
            ')' | ']' if !in_quotes => depth -= 1,
            ':' if !in_quotes && depth == 0 => {
                return Some((&term[..index], &term[index + 1..]));
            },
            _ => {},
        }
    }
    None
}

/// Strip surrounding quotes and unescape `\"`.
fn unquote(text: &str) -> String {
    match text.strip_prefix('"').and_then(|t| t.strip_suffix('"')) {
        Some(inner) => inner.replace("\\\"", "\""),
        None => text.to_string(),
    }
}

fn is_quoted(text: &str) -> bool {
    text.len() >= 2 && text.starts_with('"') && text.ends_with('"')
}

/// Build a where-condition for a field, coercing the value to its type.
fn field_condition(spec: FieldSpec, raw: &str, now: DateTime<Utc>) -> Result<ConditionNode> {
    let search_type = spec.search_type();
    let invalid = |kind: &str| {
        DiscoverError::invalid_search(format!("Invalid {kind} value for {}: {raw}", spec.name))
    };

    let (op, value) = match search_type {
        OutputType::String => {
            let text = unquote(raw);
            if text.contains('*') {
                (CompareOp::Eq, SearchValue::Wildcard(WildcardPattern::new(&text)?))
            } else {
                (CompareOp::Eq, SearchValue::String(text))
            }
        },
        OutputType::Boolean => match parse_boolean(&unquote(raw)) {
            Some(flag) => (CompareOp::Eq, SearchValue::Boolean(flag)),
            None => return Err(invalid("boolean")),
        },
        OutputType::Date => {
            let (op, value, whole_day) = date_condition(raw, now).map_err(|_| invalid("date"))?;
            if let (CompareOp::Eq, true, SearchValue::Date(day)) = (op, whole_day, &value) {
                let next = *day + Duration::days(1);
                let key = SearchKey::Field(spec.clone());
                return Ok(ConditionNode::and(
                    ConditionNode::comparison(key.clone(), CompareOp::Gte, value),
                    ConditionNode::comparison(key, CompareOp::Lt, SearchValue::Date(next)),
                ));
            }
            (op, value)
        },
        numeric => numeric_condition(numeric, raw).map_err(|_| {
            invalid(match numeric {
                OutputType::Duration => "duration",
                OutputType::Percentage => "percentage",
                _ => "numeric",
            })
        })?,
    };

    Ok(ConditionNode::comparison(SearchKey::Field(spec), op, value))
}

fn parse_boolean(text: &str) -> Option<bool> {
    match text.to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

/// Parse a comparison prefix
fn comparison_prefix(input: &str) -> IResult<&str, CompareOp> {
    alt((
        nom_value(CompareOp::Gte, tag(">=")),
        nom_value(CompareOp::Lte, tag("<=")),
        nom_value(CompareOp::NotEq, tag("!=")),
        nom_value(CompareOp::Gt, tag(">")),
        nom_value(CompareOp::Lt, tag("<")),
        nom_value(CompareOp::Eq, tag("=")),
    ))(input)
}

fn optional_prefix(input: &str) -> IResult<&str, Option<CompareOp>> {
    opt(comparison_prefix)(input)
}

/// Parse a duration unit into its millisecond multiplier
fn duration_unit(input: &str) -> IResult<&str, f64> {
    alt((
        nom_value(1.0, tag("ms")),
        nom_value(60_000.0, tag("min")),
        nom_value(60_000.0, tag("m")),
        nom_value(1_000.0, tag("s")),
        nom_value(3_600_000.0, tag("hr")),
        nom_value(3_600_000.0, tag("h")),
        nom_value(86_400_000.0, tag("d")),
        nom_value(604_800_000.0, tag("w")),
    ))(input)
}

/// Parse `[op]number[suffix]` for a numeric type, fully consuming the input
fn numeric_condition(output_type: OutputType, raw: &str) -> std::result::Result<(CompareOp, SearchValue), ()> {
    let prefix = optional_prefix;
    let parsed: IResult<&str, (Option<CompareOp>, f64)> = match output_type {
        OutputType::Duration => all_consuming(tuple((
            prefix,
            map(pair(double, opt(duration_unit)), |(n, unit)| n * unit.unwrap_or(1.0)),
        )))(raw),
        OutputType::Percentage => all_consuming(tuple((
            prefix,
            map(pair(double, opt(char('%'))), |(n, percent)| {
                if percent.is_some() {
                    n / 100.0
                } else {
                    n
                }
            }),
        )))(raw),
        _ => all_consuming(tuple((prefix, double)))(raw),
    };

    match parsed {
        Ok((_, (op, n))) if n.is_finite() => Ok((op.unwrap_or(CompareOp::Eq), SearchValue::Number(n))),
        _ => Err(()),
    }
}

/// Parse `-30d` / `+30d` into sign and offset
fn relative_offset(input: &str) -> IResult<&str, (char, Duration)> {
    all_consuming(map_res(
        tuple((one_of("+-"), digit1, one_of("smhdw"))),
        |(sign, amount, unit): (char, &str, char)| {
            let n: i64 = amount.parse().map_err(|_| "amount out of range")?;
            if n > MAX_RELATIVE_AMOUNT {
                return Err("amount out of range");
            }
            let offset = match unit {
                's' => Duration::seconds(n),
                'm' => Duration::minutes(n),
                'h' => Duration::hours(n),
                'd' => Duration::days(n),
                _ => Duration::weeks(n),
            };
            Ok((sign, offset))
        },
    ))(input)
}

/// Parse a date filter value.
///
/// Returns the operator, the timestamp, and whether the value named a whole
/// day rather than an instant.
fn date_condition(raw: &str, now: DateTime<Utc>) -> std::result::Result<(CompareOp, SearchValue, bool), ()> {
    let raw = unquote(raw);

    if let Ok((_, (sign, offset))) = relative_offset(&raw) {
        // -30d: within the last 30 days; +30d: older than 30 days
        let op = if sign == '-' { CompareOp::Gte } else { CompareOp::Lte };
        return Ok((op, SearchValue::Date(now - offset), false));
    }

    let (rest, op) = opt(comparison_prefix)(raw.as_str()).map_err(|_: nom::Err<nom::error::Error<&str>>| ())?;
    let op = op.unwrap_or(CompareOp::Eq);
    let (date, whole_day) = parse_timestamp(rest).ok_or(())?;
    Ok((op, SearchValue::Date(date), whole_day))
}

/// Parse an ISO timestamp, a bare date, or epoch seconds.
pub(crate) fn parse_timestamp(text: &str) -> Option<(DateTime<Utc>, bool)> {
    if let Ok(date) = DateTime::parse_from_rfc3339(text) {
        return Some((date.with_timezone(&Utc), false));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some((Utc.from_utc_datetime(&naive), false));
        }
    }
    if let Ok(day) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return day
            .and_hms_opt(0, 0, 0)
            .map(|midnight| (Utc.from_utc_datetime(&midnight), true));
    }
    text.parse::<i64>()
        .ok()
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        .map(|date| (date, false))
}
