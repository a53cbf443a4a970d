//! Backtest evaluation: forecast horizon vs. ground truth observed later.
//!
//! The forecast horizon and ground truth are inner-joined on timestamp. Rows on
//! only one side are dropped (and counted). Ground-truth gaps inside the joined
//! rows are forward- then backward-filled before computing error, so metrics on
//! those rows compare against a carried value, not an observation; such rows
//! are flagged `gap_filled`. Both behaviors are configurable.

use crate::clean::{backward_fill, forward_fill};
use crate::forecast::ForecastRow;
use crate::series::{DataPoint, RawSeries};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Denominator used when ground truth is exactly zero.
pub const ZERO_TRUTH_EPSILON: f64 = 0.001;

/// Decimal places kept on the absolute error percentage.
pub const PERCENTAGE_DECIMALS: u32 = 2;

#[derive(Debug, Error, PartialEq)]
pub enum BacktestError {
    #[error("forecast ({forecast_points} rows) and ground truth ({truth_points} points) share no timestamps")]
    NoOverlap {
        forecast_points: usize,
        truth_points: usize,
    },

    #[error("ground truth has no observed value on any of {matched} matched timestamps")]
    NoObservedTruth { matched: usize },

    #[error("ground truth is missing {missing} of {expected} forecast timestamps")]
    IncompleteCoverage { missing: usize, expected: usize },
}

/// How to treat matched rows whose ground truth is missing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapFill {
    /// Fill forward, then backward, and flag the rows.
    #[default]
    ForwardBackward,
    /// Drop the rows.
    Drop,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BacktestOptions {
    pub gap_fill: GapFill,
    /// Fail if any forecast timestamp has no ground-truth row.
    pub require_full_coverage: bool,
    pub zero_epsilon: f64,
    pub decimals: u32,
}

impl Default for BacktestOptions {
    fn default() -> Self {
        Self {
            gap_fill: GapFill::ForwardBackward,
            require_full_coverage: false,
            zero_epsilon: ZERO_TRUTH_EPSILON,
            decimals: PERCENTAGE_DECIMALS,
        }
    }
}

/// Accuracy at one timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BacktestRecord {
    pub timestamp: NaiveDateTime,
    pub ground_truth: f64,
    pub forecast: f64,
    /// `forecast − ground_truth`
    pub signed_error: f64,
    pub absolute_error_percentage: f64,
    /// Ground truth here was carried from a neighbouring observation.
    pub gap_filled: bool,
}

impl BacktestRecord {
    /// Compute error terms for one comparison.
    pub fn compute(
        timestamp: NaiveDateTime,
        ground_truth: f64,
        forecast: f64,
        opts: &BacktestOptions,
    ) -> Self {
        let signed_error = forecast - ground_truth;
        let denominator = if ground_truth == 0.0 {
            opts.zero_epsilon
        } else {
            ground_truth
        };
        let absolute_error_percentage =
            round_to((signed_error / denominator).abs() * 100.0, opts.decimals);
        Self {
            timestamp,
            ground_truth,
            forecast,
            signed_error,
            absolute_error_percentage,
            gap_filled: false,
        }
    }
}

/// Column of a backtest record, for persistence and export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BacktestColumn {
    GroundTruth,
    Forecast,
    SignedError,
    AbsoluteErrorPercentage,
}

/// Records plus what the join dropped or filled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestOutcome {
    pub records: Vec<BacktestRecord>,
    /// Forecast timestamps with no ground-truth row.
    pub unmatched_forecast: usize,
    /// Ground-truth timestamps outside the forecast horizon.
    pub unmatched_truth: usize,
    /// Matched rows dropped by [`GapFill::Drop`].
    pub dropped_gaps: usize,
}

impl BacktestOutcome {
    pub fn column(&self, column: BacktestColumn) -> Vec<DataPoint> {
        self.records
            .iter()
            .map(|r| {
                let value = match column {
                    BacktestColumn::GroundTruth => r.ground_truth,
                    BacktestColumn::Forecast => r.forecast,
                    BacktestColumn::SignedError => r.signed_error,
                    BacktestColumn::AbsoluteErrorPercentage => r.absolute_error_percentage,
                };
                DataPoint::new(r.timestamp, value)
            })
            .collect()
    }

    pub fn summary(&self) -> BacktestSummary {
        BacktestSummary::from_records(&self.records)
    }
}

/// Aggregate accuracy over a backtest.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BacktestSummary {
    pub records: usize,
    pub gap_filled: usize,
    pub mean_absolute_error: f64,
    pub mean_absolute_percentage_error: f64,
}

impl BacktestSummary {
    pub fn from_records(records: &[BacktestRecord]) -> Self {
        let n = records.len();
        if n == 0 {
            return Self {
                records: 0,
                gap_filled: 0,
                mean_absolute_error: 0.0,
                mean_absolute_percentage_error: 0.0,
            };
        }
        let mae = records.iter().map(|r| r.signed_error.abs()).sum::<f64>() / n as f64;
        let mape = records
            .iter()
            .map(|r| r.absolute_error_percentage)
            .sum::<f64>()
            / n as f64;
        Self {
            records: n,
            gap_filled: records.iter().filter(|r| r.gap_filled).count(),
            mean_absolute_error: mae,
            mean_absolute_percentage_error: mape,
        }
    }
}

/// Compare the forecast horizon against ground truth.
pub fn evaluate(
    forecast_horizon: &[ForecastRow],
    ground_truth: &RawSeries,
    opts: &BacktestOptions,
) -> Result<BacktestOutcome, BacktestError> {
    let truth: HashMap<NaiveDateTime, Option<f64>> = ground_truth
        .points()
        .iter()
        .map(|p| (p.timestamp, p.value))
        .collect();

    let mut timestamps = Vec::new();
    let mut forecasts = Vec::new();
    let mut truths: Vec<Option<f64>> = Vec::new();
    for row in forecast_horizon {
        if let Some(value) = truth.get(&row.timestamp) {
            timestamps.push(row.timestamp);
            forecasts.push(row.yhat);
            truths.push(*value);
        }
    }

    let matched = timestamps.len();
    if matched == 0 {
        return Err(BacktestError::NoOverlap {
            forecast_points: forecast_horizon.len(),
            truth_points: ground_truth.len(),
        });
    }
    let unmatched_forecast = forecast_horizon.len() - matched;
    if opts.require_full_coverage && unmatched_forecast > 0 {
        return Err(BacktestError::IncompleteCoverage {
            missing: unmatched_forecast,
            expected: forecast_horizon.len(),
        });
    }

    let was_missing: Vec<bool> = truths.iter().map(Option::is_none).collect();
    let mut dropped_gaps = 0;
    if opts.gap_fill == GapFill::ForwardBackward {
        forward_fill(&mut truths);
        backward_fill(&mut truths);
    }

    let mut records = Vec::with_capacity(matched);
    for i in 0..matched {
        match truths[i] {
            Some(gt) => {
                let mut record = BacktestRecord::compute(timestamps[i], gt, forecasts[i], opts);
                record.gap_filled = was_missing[i];
                records.push(record);
            }
            None => dropped_gaps += 1,
        }
    }

    if records.is_empty() {
        return Err(BacktestError::NoObservedTruth { matched });
    }

    Ok(BacktestOutcome {
        records,
        unmatched_forecast,
        unmatched_truth: ground_truth.len() - matched,
        dropped_gaps,
    })
}

fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::SeriesPoint;
    use chrono::{Duration, NaiveDate};

    fn t(i: i64) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2022, 7, 17)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            + Duration::hours(i)
    }

    fn row(i: i64, yhat: f64) -> ForecastRow {
        ForecastRow {
            timestamp: t(i),
            yhat,
            yhat_lower: yhat - 1.0,
            yhat_upper: yhat + 1.0,
            trend: yhat,
            cap: 100.0,
        }
    }

    fn truth(points: Vec<(i64, Option<f64>)>) -> RawSeries {
        RawSeries::new(
            "PUMP",
            points
                .into_iter()
                .map(|(i, v)| SeriesPoint::new(t(i), v))
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn zero_ground_truth_uses_epsilon() {
        let record = BacktestRecord::compute(t(0), 0.0, 1.0, &BacktestOptions::default());
        assert_eq!(record.signed_error, 1.0);
        assert_eq!(record.absolute_error_percentage, 100000.0);
    }

    #[test]
    fn percentage_is_rounded_to_two_decimals() {
        let record = BacktestRecord::compute(t(0), 3.0, 4.0, &BacktestOptions::default());
        assert_eq!(record.absolute_error_percentage, 33.33);
        let under = BacktestRecord::compute(t(0), 3.0, 2.0, &BacktestOptions::default());
        assert_eq!(under.signed_error, -1.0);
        assert_eq!(under.absolute_error_percentage, 33.33);
    }

    #[test]
    fn inner_join_keeps_only_shared_timestamps() {
        let horizon: Vec<ForecastRow> = (1..=10).map(|i| row(i, 50.0)).collect();
        let gt = truth((1..=5).map(|i| (i, Some(40.0))).collect());

        let outcome = evaluate(&horizon, &gt, &BacktestOptions::default()).unwrap();
        assert_eq!(outcome.records.len(), 5);
        let stamps: Vec<NaiveDateTime> = outcome.records.iter().map(|r| r.timestamp).collect();
        assert_eq!(stamps, (1..=5).map(t).collect::<Vec<_>>());
        assert_eq!(outcome.unmatched_forecast, 5);
        assert_eq!(outcome.unmatched_truth, 0);
    }

    #[test]
    fn truth_outside_horizon_is_counted() {
        let horizon: Vec<ForecastRow> = (1..=3).map(|i| row(i, 10.0)).collect();
        let gt = truth((0..=4).map(|i| (i, Some(10.0))).collect());
        let outcome = evaluate(&horizon, &gt, &BacktestOptions::default()).unwrap();
        assert_eq!(outcome.records.len(), 3);
        assert_eq!(outcome.unmatched_truth, 2);
    }

    #[test]
    fn missing_truth_is_filled_and_flagged() {
        let horizon: Vec<ForecastRow> = (1..=4).map(|i| row(i, 10.0)).collect();
        let gt = truth(vec![(1, None), (2, Some(8.0)), (3, None), (4, Some(5.0))]);

        let outcome = evaluate(&horizon, &gt, &BacktestOptions::default()).unwrap();
        let values: Vec<f64> = outcome.records.iter().map(|r| r.ground_truth).collect();
        assert_eq!(values, vec![8.0, 8.0, 8.0, 5.0]);
        let flags: Vec<bool> = outcome.records.iter().map(|r| r.gap_filled).collect();
        assert_eq!(flags, vec![true, false, true, false]);
        assert_eq!(outcome.summary().gap_filled, 2);
    }

    #[test]
    fn drop_policy_skips_gaps() {
        let horizon: Vec<ForecastRow> = (1..=3).map(|i| row(i, 10.0)).collect();
        let gt = truth(vec![(1, Some(9.0)), (2, None), (3, Some(11.0))]);
        let opts = BacktestOptions {
            gap_fill: GapFill::Drop,
            ..BacktestOptions::default()
        };
        let outcome = evaluate(&horizon, &gt, &opts).unwrap();
        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.dropped_gaps, 1);
    }

    #[test]
    fn no_overlap_is_alignment_failure() {
        let horizon: Vec<ForecastRow> = (1..=3).map(|i| row(i, 10.0)).collect();
        let gt = truth(vec![(7, Some(1.0)), (8, Some(1.0))]);
        assert_eq!(
            evaluate(&horizon, &gt, &BacktestOptions::default()),
            Err(BacktestError::NoOverlap {
                forecast_points: 3,
                truth_points: 2
            })
        );
    }

    #[test]
    fn all_missing_truth_is_alignment_failure() {
        let horizon: Vec<ForecastRow> = (1..=2).map(|i| row(i, 10.0)).collect();
        let gt = truth(vec![(1, None), (2, None)]);
        assert_eq!(
            evaluate(&horizon, &gt, &BacktestOptions::default()),
            Err(BacktestError::NoObservedTruth { matched: 2 })
        );
    }

    #[test]
    fn full_coverage_can_be_required() {
        let horizon: Vec<ForecastRow> = (1..=4).map(|i| row(i, 10.0)).collect();
        let gt = truth(vec![(1, Some(10.0)), (2, Some(10.0))]);
        let opts = BacktestOptions {
            require_full_coverage: true,
            ..BacktestOptions::default()
        };
        assert_eq!(
            evaluate(&horizon, &gt, &opts),
            Err(BacktestError::IncompleteCoverage {
                missing: 2,
                expected: 4
            })
        );
    }

    #[test]
    fn summary_means() {
        let opts = BacktestOptions::default();
        let records = vec![
            BacktestRecord::compute(t(0), 10.0, 12.0, &opts),
            BacktestRecord::compute(t(1), 10.0, 6.0, &opts),
        ];
        let summary = BacktestSummary::from_records(&records);
        assert_eq!(summary.records, 2);
        assert!((summary.mean_absolute_error - 3.0).abs() < 1e-12);
        assert!((summary.mean_absolute_percentage_error - 30.0).abs() < 1e-12);
    }
}
