//! Saturation capacity for logistic growth.
//!
//! The capacity is a single scalar computed from history before fitting and
//! passed into the fit as the ceiling of the logistic trend. Different signals
//! saturate differently, so the statistic and multiplier are caller policy.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Summary statistic the capacity is derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapStatistic {
    Mean,
    Median,
}

/// `capacity = multiplier × statistic(history)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CapRule {
    pub statistic: CapStatistic,
    pub multiplier: f64,
}

impl CapRule {
    pub fn new(statistic: CapStatistic, multiplier: f64) -> Self {
        Self {
            statistic,
            multiplier,
        }
    }

    /// `multiplier` × the mean.
    pub fn mean_times(multiplier: f64) -> Self {
        Self::new(CapStatistic::Mean, multiplier)
    }

    /// `multiplier` × the median.
    pub fn median_times(multiplier: f64) -> Self {
        Self::new(CapStatistic::Median, multiplier)
    }

    /// Compute the capacity. `None` when there are no finite values.
    pub fn compute(&self, values: &[f64]) -> Option<f64> {
        let stat = match self.statistic {
            CapStatistic::Mean => mean(values)?,
            CapStatistic::Median => median(values)?,
        };
        Some(self.multiplier * stat)
    }
}

impl Default for CapRule {
    fn default() -> Self {
        Self::mean_times(1.1)
    }
}

impl fmt::Display for CapRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stat = match self.statistic {
            CapStatistic::Mean => "mean",
            CapStatistic::Median => "median",
        };
        write!(f, "{} x {stat}", self.multiplier)
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return None;
    }
    Some(finite.iter().sum::<f64>() / finite.len() as f64)
}

fn median(values: &[f64]) -> Option<f64> {
    let mut finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return None;
    }
    finite.sort_by(|a, b| a.total_cmp(b));
    let mid = finite.len() / 2;
    if finite.len() % 2 == 0 {
        Some((finite[mid - 1] + finite[mid]) / 2.0)
    } else {
        Some(finite[mid])
    }
}
