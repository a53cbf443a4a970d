//! Model fitting and prediction.
//!
//! Fit proceeds in two stages:
//! 1. Piecewise logistic trend fitted in logit space against the capacity
//! 2. Fourier seasonality fitted on the trend residuals
//!
//! The residual RMS of the combined fit becomes the observation noise used
//! for the uncertainty interval.

use super::linalg::{dot, solve_penalized};
use super::seasonality::{seasonal_matrix, Seasonality};
use super::trend::{
    logit_ratio, select_changepoints, trend_row, LogisticTrend, TimeScale, BASE_PENALTY,
    CHANGEPOINT_PENALTY,
};
use super::{interval_z_score, ForecastError, ForecastParams, ForecastRow, MIN_FIT_POINTS};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Tiny ridge on seasonal coefficients.
const SEASONALITY_PENALTY: f64 = 1e-8;

/// Floor on residual noise so bounds never collapse to a line.
const MIN_SIGMA: f64 = 1e-6;

/// Fit entry point. Holds nothing but the parameters.
#[derive(Debug, Clone)]
pub struct LogisticModel<'a> {
    params: &'a ForecastParams,
}

/// A fitted model, ready to predict at arbitrary timestamps.
#[derive(Debug, Clone)]
pub struct FittedModel {
    scale: TimeScale,
    trend: LogisticTrend,
    seasons: Vec<Seasonality>,
    seasonal_beta: Vec<f64>,
    sigma: f64,
    z_score: f64,
    summary: FitSummary,
}

/// What the fit produced, for reports and logs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitSummary {
    pub observations: usize,
    pub cap: f64,
    pub changepoints: usize,
    pub seasonalities: Vec<String>,
    /// Residual RMS of the in-sample fit.
    pub sigma: f64,
    /// Largest absolute growth-rate adjustment at any changepoint.
    pub max_rate_change: f64,
}

impl<'a> LogisticModel<'a> {
    pub fn new(params: &'a ForecastParams) -> Self {
        Self { params }
    }

    /// Fit to observed `(timestamp, value)` pairs with the given capacity.
    ///
    /// The capacity is a model input, not a clip: it is the ceiling of the
    /// logistic curve the trend is fitted to.
    pub fn fit(&self, observations: &[(NaiveDateTime, f64)], cap: f64) -> Result<FittedModel, ForecastError> {
        let n = observations.len();
        if n < MIN_FIT_POINTS {
            return Err(ForecastError::InsufficientData {
                found: n,
                required: MIN_FIT_POINTS,
            });
        }
        if !cap.is_finite() || cap <= 0.0 {
            return Err(ForecastError::InvalidCapacity { cap });
        }
        let z_score = interval_z_score(self.params.interval_width).ok_or(
            ForecastError::UnsupportedIntervalWidth {
                width: self.params.interval_width,
            },
        )?;
        let sensitivity = self.params.changepoint_sensitivity;
        if !sensitivity.is_finite() || sensitivity <= 0.0 {
            return Err(ForecastError::InvalidSensitivity { value: sensitivity });
        }

        let timestamps: Vec<NaiveDateTime> = observations.iter().map(|(ts, _)| *ts).collect();
        let y: Vec<f64> = observations.iter().map(|(_, v)| *v).collect();

        // Stage 1: logistic trend
        let scale = TimeScale::from_history(timestamps[0], timestamps[n - 1]);
        let t_hist: Vec<f64> = timestamps.iter().map(|ts| scale.scale(*ts)).collect();
        let changepoints = select_changepoints(
            &t_hist,
            self.params.n_changepoints,
            self.params.changepoint_range,
        );

        let x_trend: Vec<Vec<f64>> = t_hist
            .iter()
            .map(|&t| {
                let mut row = Vec::with_capacity(2 + changepoints.len());
                trend_row(t, &changepoints, &mut row);
                row
            })
            .collect();
        let z: Vec<f64> = y.iter().map(|&v| logit_ratio(v, cap)).collect();

        let delta_penalty = CHANGEPOINT_PENALTY / (sensitivity * sensitivity);
        let mut penalties = vec![BASE_PENALTY, BASE_PENALTY];
        penalties.extend(std::iter::repeat(delta_penalty).take(changepoints.len()));

        let beta = solve_penalized(&x_trend, &z, &penalties).ok_or(ForecastError::Singular)?;
        let trend = LogisticTrend {
            cap,
            changepoints,
            beta,
        };
        let trend_hist: Vec<f64> = t_hist.iter().map(|&t| trend.value_at(t)).collect();

        // Stage 2: seasonality on trend residuals
        let seasons = self.params.seasonality.resolve(&timestamps);
        let residual: Vec<f64> = y.iter().zip(&trend_hist).map(|(v, g)| v - g).collect();
        let seasonal_beta = if seasons.is_empty() {
            Vec::new()
        } else {
            let x_season = seasonal_matrix(&timestamps, &seasons);
            let width = x_season[0].len();
            solve_penalized(&x_season, &residual, &vec![SEASONALITY_PENALTY; width])
                .ok_or(ForecastError::Singular)?
        };

        let sigma = if seasonal_beta.is_empty() {
            rms(&residual)
        } else {
            let x_season = seasonal_matrix(&timestamps, &seasons);
            let fitted: Vec<f64> = residual
                .iter()
                .zip(&x_season)
                .map(|(r, row)| r - dot(row, &seasonal_beta))
                .collect();
            rms(&fitted)
        }
        .max(MIN_SIGMA);

        let summary = FitSummary {
            observations: n,
            cap,
            changepoints: trend.changepoints.len(),
            seasonalities: seasons.iter().map(|s| s.name.clone()).collect(),
            sigma,
            max_rate_change: trend
                .deltas()
                .iter()
                .fold(0.0_f64, |acc, d| acc.max(d.abs())),
        };

        Ok(FittedModel {
            scale,
            trend,
            seasons,
            seasonal_beta,
            sigma,
            z_score,
            summary,
        })
    }
}

impl FittedModel {
    pub fn summary(&self) -> &FitSummary {
        &self.summary
    }

    pub fn cap(&self) -> f64 {
        self.trend.cap
    }

    /// Predict at the given timestamps. Every row carries the fitted capacity.
    pub fn predict(&self, timestamps: &[NaiveDateTime]) -> Vec<ForecastRow> {
        let seasonal: Vec<f64> = if self.seasonal_beta.is_empty() {
            vec![0.0; timestamps.len()]
        } else {
            seasonal_matrix(timestamps, &self.seasons)
                .iter()
                .map(|row| dot(row, &self.seasonal_beta))
                .collect()
        };
        let margin = self.z_score * self.sigma;

        timestamps
            .iter()
            .zip(seasonal)
            .map(|(ts, s)| {
                let trend = self.trend.value_at(self.scale.scale(*ts));
                let yhat = trend + s;
                ForecastRow {
                    timestamp: *ts,
                    yhat,
                    yhat_lower: yhat - margin,
                    yhat_upper: yhat + margin,
                    trend,
                    cap: self.trend.cap,
                }
            })
            .collect()
    }
}

fn rms(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    (values.iter().map(|v| v * v).sum::<f64>() / values.len() as f64).sqrt()
}
