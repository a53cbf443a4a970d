//! Sampling granularity and bucket aggregation.
//!
//! Granularities are written the way time-series APIs spell them: a positive
//! integer followed by a unit (`15s`, `30m`, `1h`, `1d`).

use super::point::SeriesPoint;
use chrono::{DateTime, Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum GranularityError {
    #[error("invalid granularity '{0}': expected <n><s|m|h|d>, e.g. 1h")]
    Invalid(String),

    #[error("granularity must be positive, got '{0}'")]
    NotPositive(String),

    #[error("granularity '{0}' is out of range")]
    OutOfRange(String),
}

/// Largest step that still fits a `chrono::Duration`.
const MAX_SECONDS: i64 = i64::MAX / 1_000;

/// A fixed sampling step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Granularity {
    seconds: i64,
}

impl Granularity {
    pub const HOURLY: Granularity = Granularity { seconds: 3600 };

    pub fn from_seconds(seconds: i64) -> Result<Self, GranularityError> {
        if seconds <= 0 {
            return Err(GranularityError::NotPositive(format!("{seconds}s")));
        }
        if seconds > MAX_SECONDS {
            return Err(GranularityError::OutOfRange(format!("{seconds}s")));
        }
        Ok(Self { seconds })
    }

    pub fn hours(n: i64) -> Result<Self, GranularityError> {
        let seconds = n
            .checked_mul(3600)
            .ok_or_else(|| GranularityError::OutOfRange(format!("{n}h")))?;
        Self::from_seconds(seconds)
    }

    pub fn seconds(&self) -> i64 {
        self.seconds
    }

    pub fn as_duration(&self) -> Duration {
        Duration::seconds(self.seconds)
    }

    /// Start of the epoch-aligned bucket containing `ts`.
    pub fn bucket_start(&self, ts: NaiveDateTime) -> NaiveDateTime {
        let secs = ts.and_utc().timestamp();
        let floored = secs.div_euclid(self.seconds) * self.seconds;
        DateTime::from_timestamp(floored, 0)
            .map(|dt| dt.naive_utc())
            .unwrap_or(ts)
    }
}

impl Default for Granularity {
    fn default() -> Self {
        Self::HOURLY
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.seconds;
        if s % 86_400 == 0 {
            write!(f, "{}d", s / 86_400)
        } else if s % 3600 == 0 {
            write!(f, "{}h", s / 3600)
        } else if s % 60 == 0 {
            write!(f, "{}m", s / 60)
        } else {
            write!(f, "{s}s")
        }
    }
}

impl FromStr for Granularity {
    type Err = GranularityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let split = trimmed
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| GranularityError::Invalid(s.to_string()))?;
        let (digits, unit) = trimmed.split_at(split);
        let n: i64 = digits
            .parse()
            .map_err(|_| GranularityError::Invalid(s.to_string()))?;
        let unit_secs = match unit {
            "s" => 1,
            "m" => 60,
            "h" => 3600,
            "d" => 86_400,
            _ => return Err(GranularityError::Invalid(s.to_string())),
        };
        if n == 0 {
            return Err(GranularityError::NotPositive(s.to_string()));
        }
        let seconds = n
            .checked_mul(unit_secs)
            .ok_or_else(|| GranularityError::OutOfRange(s.to_string()))?;
        Self::from_seconds(seconds)
    }
}

impl TryFrom<String> for Granularity {
    type Error = GranularityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Granularity> for String {
    fn from(g: Granularity) -> Self {
        g.to_string()
    }
}

/// How raw points inside one bucket collapse to a single value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    #[default]
    Average,
    Min,
    Max,
    Sum,
    Count,
}

impl Aggregation {
    /// Wire name used by time-series APIs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregation::Average => "average",
            Aggregation::Min => "min",
            Aggregation::Max => "max",
            Aggregation::Sum => "sum",
            Aggregation::Count => "count",
        }
    }

    fn apply(&self, values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        Some(match self {
            Aggregation::Average => values.iter().sum::<f64>() / values.len() as f64,
            Aggregation::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            Aggregation::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Aggregation::Sum => values.iter().sum(),
            Aggregation::Count => values.len() as f64,
        })
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate `(timestamp, value)` pairs into epoch-aligned buckets within `[start, end)`.
///
/// Buckets without any point are omitted, matching what aggregate endpoints
/// return for empty intervals.
pub fn aggregate_buckets(
    points: impl IntoIterator<Item = (NaiveDateTime, f64)>,
    start: NaiveDateTime,
    end: NaiveDateTime,
    aggregation: Aggregation,
    granularity: Granularity,
) -> Vec<SeriesPoint> {
    let mut buckets: BTreeMap<NaiveDateTime, Vec<f64>> = BTreeMap::new();
    for (ts, value) in points {
        if ts < start || ts >= end || !value.is_finite() {
            continue;
        }
        buckets
            .entry(granularity.bucket_start(ts))
            .or_default()
            .push(value);
    }

    buckets
        .into_iter()
        .filter_map(|(bucket, values)| {
            aggregation
                .apply(&values)
                .map(|v| SeriesPoint::observed(bucket, v))
        })
        .collect()
}
