//! Timestamped points and the raw/clean series built from them.
//!
//! Timestamps are naive UTC. A `RawSeries` is what a store hands back for one
//! identifier: strictly increasing timestamps, each with an optional value.
//! A `CleanSeries` has the same timestamp domain with every gap filled.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while constructing a series.
#[derive(Debug, Error, PartialEq)]
pub enum SeriesError {
    #[error("timestamps must be strictly increasing: {previous} is followed by {next}")]
    Unordered {
        previous: NaiveDateTime,
        next: NaiveDateTime,
    },
}

/// A single observation that may be missing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub timestamp: NaiveDateTime,
    pub value: Option<f64>,
}

impl SeriesPoint {
    pub fn new(timestamp: NaiveDateTime, value: Option<f64>) -> Self {
        Self { timestamp, value }
    }

    /// A point with a concrete value.
    pub fn observed(timestamp: NaiveDateTime, value: f64) -> Self {
        Self::new(timestamp, Some(value))
    }

    /// A point with no value.
    pub fn missing(timestamp: NaiveDateTime) -> Self {
        Self::new(timestamp, None)
    }
}

/// A point handed to a store for writing. Values are always concrete.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub timestamp: NaiveDateTime,
    pub value: f64,
}

impl DataPoint {
    pub fn new(timestamp: NaiveDateTime, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// A series as retrieved from a store, before any cleaning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSeries {
    identifier: String,
    points: Vec<SeriesPoint>,
}

impl RawSeries {
    /// Build a raw series, checking that timestamps strictly increase.
    ///
    /// Non-finite values (NaN, infinities) are stored as missing.
    pub fn new(identifier: impl Into<String>, points: Vec<SeriesPoint>) -> Result<Self, SeriesError> {
        check_strictly_increasing(&points)?;
        let points = points
            .into_iter()
            .map(|p| SeriesPoint {
                timestamp: p.timestamp,
                value: p.value.filter(|v| v.is_finite()),
            })
            .collect();
        Ok(Self {
            identifier: identifier.into(),
            points,
        })
    }

    /// Build a raw series from fully observed `(timestamp, value)` pairs.
    pub fn from_pairs(
        identifier: impl Into<String>,
        pairs: impl IntoIterator<Item = (NaiveDateTime, f64)>,
    ) -> Result<Self, SeriesError> {
        let points = pairs
            .into_iter()
            .map(|(ts, v)| SeriesPoint::observed(ts, v))
            .collect();
        Self::new(identifier, points)
    }

    /// An empty series for an identifier.
    pub fn empty(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            points: Vec::new(),
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn points(&self) -> &[SeriesPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Number of points carrying a value.
    pub fn observed_count(&self) -> usize {
        self.points.iter().filter(|p| p.value.is_some()).count()
    }

    pub fn first_timestamp(&self) -> Option<NaiveDateTime> {
        self.points.first().map(|p| p.timestamp)
    }

    pub fn last_timestamp(&self) -> Option<NaiveDateTime> {
        self.points.last().map(|p| p.timestamp)
    }
}

/// A gap-filled series: same timestamps as its raw source, no missing values.
///
/// The single exception is a degenerate series whose source had no valid value
/// at all; every value then stays missing and [`CleanSeries::is_degenerate`]
/// reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanSeries {
    identifier: String,
    points: Vec<SeriesPoint>,
}

impl CleanSeries {
    /// Only the cleaner builds clean series, so the fill invariant holds.
    pub(crate) fn from_filled(identifier: String, points: Vec<SeriesPoint>) -> Self {
        Self { identifier, points }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn points(&self) -> &[SeriesPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// True when the source held no valid value and nothing could be filled.
    pub fn is_degenerate(&self) -> bool {
        self.points.iter().all(|p| p.value.is_none())
    }

    /// Observed `(timestamp, value)` pairs, skipping any missing values.
    pub fn observed(&self) -> impl Iterator<Item = (NaiveDateTime, f64)> + '_ {
        self.points
            .iter()
            .filter_map(|p| p.value.map(|v| (p.timestamp, v)))
    }

    /// Values only, skipping missing ones.
    pub fn values(&self) -> Vec<f64> {
        self.points.iter().filter_map(|p| p.value).collect()
    }

    pub fn timestamps(&self) -> Vec<NaiveDateTime> {
        self.points.iter().map(|p| p.timestamp).collect()
    }

    pub fn last_timestamp(&self) -> Option<NaiveDateTime> {
        self.points.last().map(|p| p.timestamp)
    }

    /// Points ready for writing. Empty for a degenerate series.
    pub fn to_data_points(&self) -> Vec<DataPoint> {
        self.observed()
            .map(|(ts, v)| DataPoint::new(ts, v))
            .collect()
    }
}

fn check_strictly_increasing(points: &[SeriesPoint]) -> Result<(), SeriesError> {
    for pair in points.windows(2) {
        if pair[1].timestamp <= pair[0].timestamp {
            return Err(SeriesError::Unordered {
                previous: pair[0].timestamp,
                next: pair[1].timestamp,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2022, 6, 2)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    #[test]
    fn rejects_unordered_timestamps() {
        let result = RawSeries::new(
            "X",
            vec![SeriesPoint::observed(ts(2), 1.0), SeriesPoint::observed(ts(1), 2.0)],
        );
        assert!(matches!(result, Err(SeriesError::Unordered { .. })));
    }

    #[test]
    fn rejects_duplicate_timestamps() {
        let result = RawSeries::from_pairs("X", vec![(ts(1), 1.0), (ts(1), 2.0)]);
        assert!(result.is_err());
    }

    #[test]
    fn non_finite_values_become_missing() {
        let raw = RawSeries::new(
            "X",
            vec![
                SeriesPoint::observed(ts(0), f64::NAN),
                SeriesPoint::observed(ts(1), f64::INFINITY),
                SeriesPoint::observed(ts(2), 3.0),
            ],
        )
        .unwrap();
        assert_eq!(raw.observed_count(), 1);
        assert_eq!(raw.points()[0].value, None);
    }

    #[test]
    fn empty_series_has_no_bounds() {
        let raw = RawSeries::empty("X");
        assert!(raw.is_empty());
        assert_eq!(raw.first_timestamp(), None);
        assert_eq!(raw.last_timestamp(), None);
    }
}
