//! Named configurations for the two sensor families.
//!
//! - `compressor`: polytropic efficiency, 30 days, cap 1.1 × mean, no backtest.
//! - `pump`: actual head, 45 days, zeros are dropouts, cap 0.8 × median,
//!   one-week backtest.

use chrono::NaiveDate;
use forecastlab_core::forecast::CapRule;
use forecastlab_core::store::DataSetRef;

use crate::config::{BacktestSection, ConfigError, PipelineConfig};

pub const NAMES: &[&str] = &["compressor", "pump"];

pub fn compressor() -> PipelineConfig {
    PipelineConfig::builder("compressor")
        .identifier("USA.ST.KONG.VIRT.005-CAE-5040A_Monitor_ActualPolytropicEfficiency")
        .data_set(DataSetRef::ExternalId("cognite_replicator_test".into()))
        .window(date(2023, 2, 1), 30)
        .cap(CapRule::mean_times(1.1))
        .treat_zero_as_missing(false)
        .without_backtest()
        .build_unchecked()
}

pub fn pump() -> PipelineConfig {
    PipelineConfig::builder("pump")
        .identifiers([
            "USA.ST.KONG.VIRT.012-PBA-6270A_Monitor_ActualHead-Numerical",
            "USA.TB.KONG.VIRT.PBE-6420_Monitor_ActualHead",
        ])
        .data_set(DataSetRef::Id(6_870_218_523_598_358))
        .window(date(2022, 6, 2), 45)
        .cap(CapRule::median_times(0.8))
        .treat_zero_as_missing(true)
        .backtest(BacktestSection::default())
        .build_unchecked()
}

pub fn by_name(name: &str) -> Result<PipelineConfig, ConfigError> {
    match name.to_ascii_lowercase().as_str() {
        "compressor" => Ok(compressor()),
        "pump" => Ok(pump()),
        _ => Err(ConfigError::UnknownPreset(name.to_string())),
    }
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap_or_default()
}
