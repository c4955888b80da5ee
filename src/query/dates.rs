//! Time range resolution: statsPeriod parsing, retention and quantization.

use super::parser::parse_timestamp;
use crate::core::config::Config;
use crate::core::{DiscoverError, Result};
use chrono::{DateTime, Duration, DurationRound, Utc};
use nom::{
    character::complete::{digit1, one_of},
    combinator::{all_consuming, map_res},
    sequence::pair,
    IResult,
};
use std::fmt;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    /// Inclusive start
    pub start: DateTime<Utc>,
    /// Exclusive end
    pub end: DateTime<Utc>,
}

impl TimeRange {
    /// Creates a range
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// True if the timestamp falls inside the range
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start <= ts && ts < self.end
    }

    /// Length of the range
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Length in seconds, at least one
    #[allow(clippy::cast_precision_loss)]
    pub fn seconds(&self) -> f64 {
        (self.duration().num_milliseconds() as f64 / 1000.0).max(1.0)
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

/// How the request described its time range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeKind {
    /// Explicit start/end
    Absolute,
    /// statsPeriod or the default period
    Relative,
}

/// Resolved range plus whether quantization changed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedRange {
    /// Range used for querying
    pub range: TimeRange,
    /// Absolute or relative
    pub kind: RangeKind,
    /// True if bounds were rounded
    pub quantized: bool,
}

fn period(input: &str) -> IResult<&str, Duration> {
    all_consuming(map_res(
        pair(digit1, one_of("smhdw")),
        |(amount, unit): (&str, char)| {
            let n: i64 = amount.parse().map_err(|_| "period out of range")?;
            if n > 1_000_000 {
                return Err("period out of range");
            }
            Ok(match unit {
                's' => Duration::seconds(n),
                'm' => Duration::minutes(n),
                'h' => Duration::hours(n),
                'd' => Duration::days(n),
                _ => Duration::weeks(n),
            })
        },
    ))(input)
}

/// Parse a statsPeriod such as `14d`, `24h`, `30m`, `45s` or `2w`.
pub fn parse_stats_period(text: &str) -> Result<Duration> {
    match period(text.trim()) {
        Ok((_, duration)) if duration > Duration::zero() => Ok(duration),
        _ => Err(DiscoverError::invalid_search(format!("Invalid statsPeriod: {text}"))),
    }
}

/// Resolve the request's range against `now`.
///
/// Absolute ranges pass through unchanged. Relative ranges longer than the
/// configured threshold have their start floored and end ceiled to the
/// quantization granularity. The retention check runs before rounding.
pub fn resolve_time_range(
    start: Option<&str>,
    end: Option<&str>,
    stats_period: Option<&str>,
    now: DateTime<Utc>,
    config: &Config,
) -> Result<ResolvedRange> {
    let retention_start = now - config.retention_window();

    if start.is_some() || end.is_some() {
        let end = match end {
            Some(text) => parse_bound(text)?,
            None => now,
        };
        let start = match start {
            Some(text) => parse_bound(text)?,
            None => end - default_period(config)?,
        };
        if end <= start {
            return Err(DiscoverError::invalid_search("start must be before end"));
        }
        if start < retention_start {
            return Err(DiscoverError::RetentionExceeded);
        }
        return Ok(ResolvedRange {
            range: TimeRange::new(start, end),
            kind: RangeKind::Absolute,
            quantized: false,
        });
    }

    let period = match stats_period {
        Some(text) => parse_stats_period(text)?,
        None => default_period(config)?,
    };
    let start = now - period;
    if start < retention_start {
        return Err(DiscoverError::RetentionExceeded);
    }

    let threshold = Duration::from_std(config.retention.quantize_threshold)
        .map_err(|e| DiscoverError::config(format!("quantize_threshold out of range: {e}")))?;
    if period <= threshold {
        return Ok(ResolvedRange {
            range: TimeRange::new(start, now),
            kind: RangeKind::Relative,
            quantized: false,
        });
    }

    let granularity = Duration::from_std(config.retention.quantize_granularity)
        .map_err(|e| DiscoverError::config(format!("quantize_granularity out of range: {e}")))?;
    Ok(ResolvedRange {
        range: quantize(TimeRange::new(start, now), granularity),
        kind: RangeKind::Relative,
        quantized: true,
    })
}

/// Floor the start and ceil the end to multiples of `granularity`.
pub fn quantize(range: TimeRange, granularity: Duration) -> TimeRange {
    let start = range.start.duration_trunc(granularity).unwrap_or(range.start);
    let floored_end = range.end.duration_trunc(granularity).unwrap_or(range.end);
    let end = if floored_end == range.end {
        range.end
    } else {
        floored_end + granularity
    };
    TimeRange::new(start, end)
}

fn default_period(config: &Config) -> Result<Duration> {
    Duration::from_std(config.query.default_stats_period)
        .map_err(|e| DiscoverError::config(format!("default_stats_period out of range: {e}")))
}

fn parse_bound(text: &str) -> Result<DateTime<Utc>> {
    parse_timestamp(text.trim())
        .map(|(ts, _)| ts)
        .ok_or_else(|| DiscoverError::invalid_search(format!("Invalid date: {text}")))
}
