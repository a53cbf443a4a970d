//! Data cleaning: zero-sentinel removal and gap filling.
//!
//! Policy:
//! 1. Optionally treat exact zeros as missing (some signals use 0 as a
//!    missing-data sentinel, others report real zeros)
//! 2. Forward-fill every gap from the most recent valid value
//! 3. Backward-fill any leading gap from the first valid value
//!
//! The timestamp domain never changes. A series with no valid value at all
//! stays all-missing; that is not an error here, the forecast step rejects it.

use crate::series::{CleanSeries, RawSeries, SeriesPoint};
use serde::{Deserialize, Serialize};

/// What the cleaner changed, for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanReport {
    /// Points in the series.
    pub total: usize,
    /// Points already missing in the raw series.
    pub originally_missing: usize,
    /// Zeros converted to missing before filling.
    pub zero_sentinels: usize,
    /// Points filled from a preceding value.
    pub forward_filled: usize,
    /// Leading points filled from the first valid value.
    pub backward_filled: usize,
}

impl CleanReport {
    /// Total points whose value did not come from the source as-is.
    pub fn filled(&self) -> usize {
        self.forward_filled + self.backward_filled
    }
}

/// Clean a raw series. See the module docs for the policy.
pub fn clean(raw: &RawSeries, treat_zero_as_missing: bool) -> CleanSeries {
    clean_with_report(raw, treat_zero_as_missing).0
}

/// Clean a raw series and report what was changed.
pub fn clean_with_report(raw: &RawSeries, treat_zero_as_missing: bool) -> (CleanSeries, CleanReport) {
    let mut report = CleanReport {
        total: raw.len(),
        ..CleanReport::default()
    };

    let mut values: Vec<Option<f64>> = raw
        .points()
        .iter()
        .map(|p| match p.value {
            None => {
                report.originally_missing += 1;
                None
            }
            Some(v) if treat_zero_as_missing && v == 0.0 => {
                report.zero_sentinels += 1;
                None
            }
            Some(v) => Some(v),
        })
        .collect();

    report.forward_filled = forward_fill(&mut values);
    report.backward_filled = backward_fill(&mut values);

    let points = raw
        .points()
        .iter()
        .zip(values)
        .map(|(p, v)| SeriesPoint::new(p.timestamp, v))
        .collect();

    (CleanSeries::from_filled(raw.identifier().to_string(), points), report)
}

/// Replace each missing value with the last valid one before it.
///
/// Returns the number of values filled. Leading gaps are left alone.
pub fn forward_fill(values: &mut [Option<f64>]) -> usize {
    let mut last = None;
    let mut filled = 0;
    for v in values.iter_mut() {
        match v {
            Some(x) => last = Some(*x),
            None => {
                if let Some(prev) = last {
                    *v = Some(prev);
                    filled += 1;
                }
            }
        }
    }
    filled
}

/// Replace each missing value with the next valid one after it.
///
/// Returns the number of values filled. Trailing gaps are left alone.
pub fn backward_fill(values: &mut [Option<f64>]) -> usize {
    let mut next = None;
    let mut filled = 0;
    for v in values.iter_mut().rev() {
        match v {
            Some(x) => next = Some(*x),
            None => {
                if let Some(following) = next {
                    *v = Some(following);
                    filled += 1;
                }
            }
        }
    }
    filled
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime};

    fn t(i: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2022, 6, 2)
            .unwrap()
            .and_hms_opt(i, 0, 0)
            .unwrap()
    }

    fn raw(values: &[Option<f64>]) -> RawSeries {
        let points = values
            .iter()
            .enumerate()
            .map(|(i, v)| SeriesPoint::new(t(i as u32), *v))
            .collect();
        RawSeries::new("PUMP", points).unwrap()
    }

    fn values_of(clean: &CleanSeries) -> Vec<Option<f64>> {
        clean.points().iter().map(|p| p.value).collect()
    }

    #[test]
    fn zero_sentinel_is_forward_filled() {
        let clean = clean(&raw(&[Some(10.0), Some(0.0), Some(12.0)]), true);
        assert_eq!(values_of(&clean), vec![Some(10.0), Some(10.0), Some(12.0)]);
        assert_eq!(clean.timestamps(), vec![t(0), t(1), t(2)]);
    }

    #[test]
    fn zero_kept_when_not_a_sentinel() {
        let clean = clean(&raw(&[Some(10.0), Some(0.0), Some(12.0)]), false);
        assert_eq!(values_of(&clean), vec![Some(10.0), Some(0.0), Some(12.0)]);
    }

    #[test]
    fn leading_gap_is_backward_filled() {
        let (clean, report) =
            clean_with_report(&raw(&[None, Some(0.0), Some(5.0), None, Some(7.0)]), true);
        assert_eq!(
            values_of(&clean),
            vec![Some(5.0), Some(5.0), Some(5.0), Some(5.0), Some(7.0)]
        );
        assert_eq!(report.originally_missing, 2);
        assert_eq!(report.zero_sentinels, 1);
        assert_eq!(report.forward_filled, 1);
        assert_eq!(report.backward_filled, 2);
        assert_eq!(report.filled(), 3);
    }

    #[test]
    fn all_missing_is_degenerate_not_an_error() {
        let clean = clean(&raw(&[None, Some(0.0), None]), true);
        assert!(clean.is_degenerate());
        assert_eq!(clean.len(), 3);
        assert!(clean.to_data_points().is_empty());
    }

    #[test]
    fn empty_series_stays_empty() {
        let clean = clean(&RawSeries::empty("X"), true);
        assert!(clean.is_empty());
    }

    #[test]
    fn identifier_is_preserved() {
        let clean = clean(&raw(&[Some(1.0)]), false);
        assert_eq!(clean.identifier(), "PUMP");
    }
}
