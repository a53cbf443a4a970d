//! Fourier seasonality terms.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// One periodic component, modelled with `order` sine/cosine pairs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Seasonality {
    pub name: String,
    /// Period in days.
    pub period_days: f64,
    pub fourier_order: usize,
}

impl Seasonality {
    pub fn new(name: impl Into<String>, period_days: f64, fourier_order: usize) -> Self {
        Self {
            name: name.into(),
            period_days,
            fourier_order,
        }
    }

    pub fn daily() -> Self {
        Self::new("daily", 1.0, 4)
    }

    pub fn weekly() -> Self {
        Self::new("weekly", 7.0, 3)
    }

    pub fn yearly() -> Self {
        Self::new("yearly", 365.25, 10)
    }

    /// Number of design columns this component contributes.
    pub fn width(&self) -> usize {
        2 * self.fourier_order
    }
}

/// Which seasonal components to fit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeasonalityMode {
    /// Pick components from the history span and sampling interval.
    #[default]
    Auto,
    /// Trend only.
    None,
    /// Exactly these components.
    Custom { components: Vec<Seasonality> },
}

impl SeasonalityMode {
    /// Resolve to concrete components for a history.
    ///
    /// Auto rules: yearly needs two years of history, weekly two weeks of
    /// sub-weekly samples, daily two days of sub-daily samples.
    pub fn resolve(&self, timestamps: &[NaiveDateTime]) -> Vec<Seasonality> {
        match self {
            SeasonalityMode::None => Vec::new(),
            SeasonalityMode::Custom { components } => components
                .iter()
                .filter(|s| s.fourier_order > 0 && s.period_days > 0.0)
                .cloned()
                .collect(),
            SeasonalityMode::Auto => {
                let (Some(first), Some(last)) = (timestamps.first(), timestamps.last()) else {
                    return Vec::new();
                };
                let span_days = (*last - *first).num_seconds() as f64 / SECONDS_PER_DAY;
                let min_step_days = timestamps
                    .windows(2)
                    .map(|w| (w[1] - w[0]).num_seconds() as f64 / SECONDS_PER_DAY)
                    .fold(f64::INFINITY, f64::min);

                let mut out = Vec::new();
                if span_days >= 730.0 {
                    out.push(Seasonality::yearly());
                }
                if span_days >= 14.0 && min_step_days < 7.0 {
                    out.push(Seasonality::weekly());
                }
                if span_days >= 2.0 && min_step_days < 1.0 {
                    out.push(Seasonality::daily());
                }
                out
            }
        }
    }
}

/// Days since the Unix epoch, the time base for all Fourier terms.
pub(crate) fn epoch_days(ts: NaiveDateTime) -> f64 {
    ts.and_utc().timestamp() as f64 / SECONDS_PER_DAY
}

/// Fourier features for one row: `[sin(2πkt/P), cos(2πkt/P)]` for k = 1..=order.
pub(crate) fn fourier_row(t_days: f64, season: &Seasonality, out: &mut Vec<f64>) {
    for k in 1..=season.fourier_order {
        let angle = 2.0 * PI * k as f64 * t_days / season.period_days;
        out.push(angle.sin());
        out.push(angle.cos());
    }
}

/// Full seasonal design matrix, one row per timestamp.
pub(crate) fn seasonal_matrix(timestamps: &[NaiveDateTime], seasons: &[Seasonality]) -> Vec<Vec<f64>> {
    let width: usize = seasons.iter().map(Seasonality::width).sum();
    timestamps
        .iter()
        .map(|ts| {
            let t_days = epoch_days(*ts);
            let mut row = Vec::with_capacity(width);
            for season in seasons {
                fourier_row(t_days, season, &mut row);
            }
            row
        })
        .collect()
}
