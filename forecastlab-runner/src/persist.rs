//! Writing derived output series.
//!
//! Each role is written to `{identifier}{suffix}`: the series is created in
//! the run's data set if absent, then its points are upserted. Roles go out
//! in a fixed order and nothing is rolled back; the roles already written are
//! carried in the error so partial state is visible in the report.

use std::time::Instant;

use forecastlab_core::backtest::{BacktestColumn, BacktestOutcome};
use forecastlab_core::forecast::{ForecastColumn, ForecastSeries};
use forecastlab_core::series::{CleanSeries, DataPoint, OutputRole};
use forecastlab_core::store::{SeriesStatus, SeriesStore};
use tracing::{debug, info};

use crate::pipeline::{RunError, Stage};
use crate::retry::{RetryError, RetryPolicy};

/// Points for a forecast-stage role.
pub fn forecast_role_points(
    role: OutputRole,
    clean: &CleanSeries,
    forecast: &ForecastSeries,
) -> Vec<DataPoint> {
    match role {
        OutputRole::Actual => clean.to_data_points(),
        OutputRole::ForecastTrend => forecast.column(ForecastColumn::Yhat),
        OutputRole::ForecastLower => forecast.column(ForecastColumn::Lower),
        OutputRole::ForecastUpper => forecast.column(ForecastColumn::Upper),
        OutputRole::ForecastCap => forecast.column(ForecastColumn::Cap),
        _ => Vec::new(),
    }
}

/// Points for a backtest-stage role.
pub fn backtest_role_points(role: OutputRole, outcome: &BacktestOutcome) -> Vec<DataPoint> {
    let column = match role {
        OutputRole::ActualForTest => BacktestColumn::GroundTruth,
        OutputRole::ForecastTrendForTest => BacktestColumn::Forecast,
        OutputRole::ForecastErrorForTest => BacktestColumn::SignedError,
        OutputRole::AbsoluteErrorPercentageForTest => BacktestColumn::AbsoluteErrorPercentage,
        _ => return Vec::new(),
    };
    outcome.column(column)
}

pub(crate) struct OutputWriter<'a> {
    pub store: &'a dyn SeriesStore,
    pub retry: &'a RetryPolicy,
    pub deadline: Option<Instant>,
    pub identifier: &'a str,
    pub data_set_id: u64,
}

impl OutputWriter<'_> {
    /// Ensure and write one role, appending it to `written` on success.
    pub fn write(
        &self,
        stage: Stage,
        role: OutputRole,
        points: &[DataPoint],
        written: &mut Vec<OutputRole>,
    ) -> Result<(), RunError> {
        let output_id = role.output_identifier(self.identifier);

        let status = self
            .retry
            .run("ensure series", self.deadline, || {
                self.store.ensure_series_exists(&output_id, Some(self.data_set_id))
            })
            .map_err(|e| self.failure(stage, &output_id, written.as_slice(), e))?;
        match status {
            SeriesStatus::Created => info!(series = %output_id, data_set_id = self.data_set_id, "created series"),
            SeriesStatus::Existing => debug!(series = %output_id, "series exists"),
        }

        let count = self
            .retry
            .run("write points", self.deadline, || {
                self.store.write_points(&output_id, points)
            })
            .map_err(|e| self.failure(stage, &output_id, written.as_slice(), e))?;
        debug!(series = %output_id, points = count, "wrote points");

        written.push(role);
        Ok(())
    }

    fn failure(
        &self,
        stage: Stage,
        output_id: &str,
        written: &[OutputRole],
        err: RetryError,
    ) -> RunError {
        match err {
            RetryError::DeadlineExceeded { .. } => RunError::TimedOut { stage },
            RetryError::Exhausted { source, .. } => RunError::Persistence {
                identifier: output_id.to_string(),
                written: written.to_vec(),
                source,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};
    use forecastlab_core::clean::clean;
    use forecastlab_core::forecast::{forecast, ForecastParams, SeasonalityMode};
    use forecastlab_core::series::RawSeries;
    use forecastlab_core::store::InMemoryStore;

    fn sample() -> (CleanSeries, ForecastSeries) {
        let t0 = NaiveDate::from_ymd_opt(2023, 2, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let raw = RawSeries::from_pairs(
            "S",
            (0..48).map(|h| (t0 + Duration::hours(h), 50.0 + (h % 5) as f64)),
        )
        .unwrap();
        let cleaned = clean(&raw, false);
        let params = ForecastParams::default()
            .with_seasonality(SeasonalityMode::None)
            .with_horizon(6, forecastlab_core::series::Granularity::HOURLY);
        let fc = forecast(&cleaned, &params).unwrap();
        (cleaned, fc)
    }

    #[test]
    fn forecast_roles_map_to_columns() {
        let (cleaned, fc) = sample();
        assert_eq!(forecast_role_points(OutputRole::Actual, &cleaned, &fc).len(), 48);
        let trend = forecast_role_points(OutputRole::ForecastTrend, &cleaned, &fc);
        assert_eq!(trend.len(), 54);
        assert_eq!(trend[50].value, fc.rows()[50].yhat);
        let cap = forecast_role_points(OutputRole::ForecastCap, &cleaned, &fc);
        assert!(cap.iter().all(|p| p.value == fc.cap()));
    }

    #[test]
    fn writes_in_order_and_records_roles() {
        let (cleaned, fc) = sample();
        let store = InMemoryStore::new();
        let retry = RetryPolicy::none();
        let writer = OutputWriter {
            store: &store,
            retry: &retry,
            deadline: None,
            identifier: "S",
            data_set_id: 9,
        };
        let mut written = Vec::new();
        for role in OutputRole::FORECAST {
            let points = forecast_role_points(role, &cleaned, &fc);
            writer
                .write(Stage::PersistingForecast, role, &points, &mut written)
                .unwrap();
        }
        assert_eq!(written, OutputRole::FORECAST.to_vec());
        assert_eq!(store.points("S_Forecast_Trend").unwrap().len(), 54);
        assert_eq!(store.data_set_of("S_Actual"), Some(9));
    }
}
