//! Output series naming.
//!
//! Every derived series is named `{identifier}{suffix}`. Downstream dashboards
//! key on these exact suffixes, so they must never change.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Role of a derived output series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutputRole {
    Actual,
    ForecastTrend,
    ForecastLower,
    ForecastUpper,
    ForecastCap,
    ActualForTest,
    ForecastTrendForTest,
    ForecastErrorForTest,
    AbsoluteErrorPercentageForTest,
}

impl OutputRole {
    /// Roles written after a forecast, in write order.
    pub const FORECAST: [OutputRole; 5] = [
        OutputRole::Actual,
        OutputRole::ForecastTrend,
        OutputRole::ForecastLower,
        OutputRole::ForecastUpper,
        OutputRole::ForecastCap,
    ];

    /// Roles written after a backtest, in write order.
    pub const BACKTEST: [OutputRole; 4] = [
        OutputRole::ActualForTest,
        OutputRole::ForecastTrendForTest,
        OutputRole::ForecastErrorForTest,
        OutputRole::AbsoluteErrorPercentageForTest,
    ];

    pub fn suffix(&self) -> &'static str {
        match self {
            OutputRole::Actual => "_Actual",
            OutputRole::ForecastTrend => "_Forecast_Trend",
            OutputRole::ForecastLower => "_Forecast_Lower",
            OutputRole::ForecastUpper => "_Forecast_Upper",
            OutputRole::ForecastCap => "_Forecast_Cap",
            OutputRole::ActualForTest => "_Actual_for_Test",
            OutputRole::ForecastTrendForTest => "_Forecast_Trend_for_Test",
            OutputRole::ForecastErrorForTest => "_Forecast_Error_for_Test",
            // The double underscore is part of the published name.
            OutputRole::AbsoluteErrorPercentageForTest => {
                "_Forecast__Absolute_Error_Percentage_for_Test"
            }
        }
    }

    /// Identifier of the output series derived from `base`.
    pub fn output_identifier(&self, base: &str) -> String {
        format!("{base}{}", self.suffix())
    }
}

impl fmt::Display for OutputRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix().trim_start_matches('_'))
    }
}
