//! Forecast engine: capacity-bounded logistic trend plus seasonality.
//!
//! `forecast()` is the one-call entry point used by the pipeline:
//! compute the capacity from the cleaned history, fit, then predict over the
//! history followed by `horizon_steps` future points at `granularity`.

pub mod cap;
mod linalg;
pub mod model;
pub mod seasonality;
mod trend;

pub use cap::{CapRule, CapStatistic};
pub use model::{FitSummary, FittedModel, LogisticModel};
pub use seasonality::{Seasonality, SeasonalityMode};

use crate::series::{CleanSeries, DataPoint, Granularity};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fewest valid points a trend can be fitted to.
pub const MIN_FIT_POINTS: usize = 2;

/// Errors from fitting or forecasting.
#[derive(Debug, Error, PartialEq)]
pub enum ForecastError {
    #[error("insufficient data: {found} valid point(s), need at least {required}")]
    InsufficientData { found: usize, required: usize },

    #[error("capacity must be positive and finite, got {cap}")]
    InvalidCapacity { cap: f64 },

    #[error("changepoint sensitivity must be positive, got {value}")]
    InvalidSensitivity { value: f64 },

    #[error("unsupported interval width {width} (use 0.5, 0.8, 0.9, 0.95 or 0.99)")]
    UnsupportedIntervalWidth { width: f64 },

    #[error("model system is singular")]
    Singular,

    #[error("horizon of {steps} step(s) is out of range")]
    HorizonOutOfRange { steps: usize },
}

/// Forecast parameters. Defaults: sensitivity 0.02, 168 hourly steps,
/// 80% interval, 25 changepoints over the first 80% of history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastParams {
    pub changepoint_sensitivity: f64,
    pub horizon_steps: usize,
    pub granularity: Granularity,
    pub cap_rule: CapRule,
    pub interval_width: f64,
    pub n_changepoints: usize,
    pub changepoint_range: f64,
    pub seasonality: SeasonalityMode,
}

impl Default for ForecastParams {
    fn default() -> Self {
        Self {
            changepoint_sensitivity: 0.02,
            horizon_steps: 168,
            granularity: Granularity::HOURLY,
            cap_rule: CapRule::default(),
            interval_width: 0.80,
            n_changepoints: 25,
            changepoint_range: 0.8,
            seasonality: SeasonalityMode::Auto,
        }
    }
}

impl ForecastParams {
    pub fn with_changepoint_sensitivity(mut self, sensitivity: f64) -> Self {
        self.changepoint_sensitivity = sensitivity;
        self
    }

    pub fn with_horizon(mut self, steps: usize, granularity: Granularity) -> Self {
        self.horizon_steps = steps;
        self.granularity = granularity;
        self
    }

    pub fn with_cap_rule(mut self, rule: CapRule) -> Self {
        self.cap_rule = rule;
        self
    }

    pub fn with_interval_width(mut self, width: f64) -> Self {
        self.interval_width = width;
        self
    }

    pub fn with_changepoints(mut self, n: usize, range: f64) -> Self {
        self.n_changepoints = n;
        self.changepoint_range = range;
        self
    }

    pub fn with_seasonality(mut self, mode: SeasonalityMode) -> Self {
        self.seasonality = mode;
        self
    }
}

/// z-score for a two-sided normal interval of the given width.
pub fn interval_z_score(width: f64) -> Option<f64> {
    let pct = width * 100.0;
    if (pct - pct.round()).abs() > 1e-9 {
        return None;
    }
    match pct.round() as i32 {
        50 => Some(0.6745),
        80 => Some(1.2816),
        90 => Some(1.6449),
        95 => Some(1.9600),
        99 => Some(2.5758),
        _ => None,
    }
}

/// One forecast row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastRow {
    pub timestamp: NaiveDateTime,
    pub yhat: f64,
    pub yhat_lower: f64,
    pub yhat_upper: f64,
    pub trend: f64,
    pub cap: f64,
}

/// Column of a forecast, for persistence and export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForecastColumn {
    Yhat,
    Lower,
    Upper,
    Trend,
    Cap,
}

impl ForecastRow {
    pub fn get(&self, column: ForecastColumn) -> f64 {
        match column {
            ForecastColumn::Yhat => self.yhat,
            ForecastColumn::Lower => self.yhat_lower,
            ForecastColumn::Upper => self.yhat_upper,
            ForecastColumn::Trend => self.trend,
            ForecastColumn::Cap => self.cap,
        }
    }
}

/// History rows followed by horizon rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastSeries {
    identifier: String,
    rows: Vec<ForecastRow>,
    history_len: usize,
    fit: FitSummary,
}

impl ForecastSeries {
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn rows(&self) -> &[ForecastRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn history_len(&self) -> usize {
        self.history_len
    }

    /// Back-cast rows over the historical timestamps.
    pub fn history(&self) -> &[ForecastRow] {
        &self.rows[..self.history_len]
    }

    /// True forecast rows past the last historical timestamp.
    pub fn horizon(&self) -> &[ForecastRow] {
        &self.rows[self.history_len..]
    }

    /// The single capacity scalar carried by every row.
    pub fn cap(&self) -> f64 {
        self.fit.cap
    }

    pub fn fit(&self) -> &FitSummary {
        &self.fit
    }

    /// One column as writable points, covering history and horizon.
    pub fn column(&self, column: ForecastColumn) -> Vec<DataPoint> {
        self.rows
            .iter()
            .map(|r| DataPoint::new(r.timestamp, r.get(column)))
            .collect()
    }
}

/// `steps` timestamps after `last`, spaced by `granularity`.
pub fn future_timestamps(
    last: NaiveDateTime,
    steps: usize,
    granularity: Granularity,
) -> Result<Vec<NaiveDateTime>, ForecastError> {
    let out_of_range = || ForecastError::HorizonOutOfRange { steps };
    i32::try_from(steps).map_err(|_| out_of_range())?;

    let step = granularity.as_duration();
    let mut out = Vec::new();
    let mut ts = last;
    for _ in 0..steps {
        ts = ts.checked_add_signed(step).ok_or_else(out_of_range)?;
        out.push(ts);
    }
    Ok(out)
}

/// Fit the cleaned history and forecast `horizon_steps` past its end.
///
/// The capacity is computed from the cleaned values by `cap_rule` and handed
/// to the fit as the logistic ceiling.
pub fn forecast(clean: &CleanSeries, params: &ForecastParams) -> Result<ForecastSeries, ForecastError> {
    let observations: Vec<(NaiveDateTime, f64)> = clean.observed().collect();
    if observations.len() < MIN_FIT_POINTS {
        return Err(ForecastError::InsufficientData {
            found: observations.len(),
            required: MIN_FIT_POINTS,
        });
    }

    let values: Vec<f64> = observations.iter().map(|(_, v)| *v).collect();
    let cap = params
        .cap_rule
        .compute(&values)
        .ok_or(ForecastError::InvalidCapacity { cap: f64::NAN })?;

    let model = LogisticModel::new(params).fit(&observations, cap)?;

    let mut timestamps = clean.timestamps();
    let history_len = timestamps.len();
    if let Some(last) = clean.last_timestamp() {
        timestamps.extend(future_timestamps(last, params.horizon_steps, params.granularity)?);
    }

    Ok(ForecastSeries {
        identifier: clean.identifier().to_string(),
        rows: model.predict(&timestamps),
        history_len,
        fit: model.summary().clone(),
    })
}
