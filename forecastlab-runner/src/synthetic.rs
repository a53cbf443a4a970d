//! Deterministic synthetic sensor data.
//!
//! Used to seed a local store so pipelines can run without the upstream
//! service. Same identifier and window always give the same series.

use chrono::{NaiveDateTime, Timelike};
use forecastlab_core::series::Granularity;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Shape of a generated signal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorProfile {
    pub baseline: f64,
    /// Linear drift per day.
    pub drift_per_day: f64,
    /// Peak-to-mean amplitude of the daily cycle.
    pub daily_amplitude: f64,
    /// Half-width of the uniform noise.
    pub noise: f64,
    /// Probability that a sample reads exactly zero.
    pub dropout_rate: f64,
}

impl Default for SensorProfile {
    fn default() -> Self {
        Self {
            baseline: 100.0,
            drift_per_day: 0.05,
            daily_amplitude: 3.0,
            noise: 0.5,
            dropout_rate: 0.01,
        }
    }
}

impl SensorProfile {
    /// Compressor efficiency: high, flat, no dropouts.
    pub fn compressor() -> Self {
        Self {
            baseline: 78.0,
            drift_per_day: -0.02,
            daily_amplitude: 0.8,
            noise: 0.3,
            dropout_rate: 0.0,
        }
    }

    /// Pump head: daily swing with zero dropouts.
    pub fn pump() -> Self {
        Self {
            baseline: 120.0,
            drift_per_day: 0.1,
            daily_amplitude: 4.0,
            noise: 1.0,
            dropout_rate: 0.02,
        }
    }
}

/// Samples on `[start, end)` every `granularity`.
pub fn generate_sensor_series(
    identifier: &str,
    start: NaiveDateTime,
    end: NaiveDateTime,
    granularity: Granularity,
    profile: &SensorProfile,
) -> Vec<(NaiveDateTime, f64)> {
    // Deterministic seed from identifier
    let seed: [u8; 32] = *blake3::hash(identifier.as_bytes()).as_bytes();
    let mut rng = StdRng::from_seed(seed);

    let step = granularity.as_duration();
    let mut points = Vec::new();
    let mut current = start;

    while current < end {
        let days = (current - start).num_seconds() as f64 / 86_400.0;
        let hour = current.hour() as f64 + current.minute() as f64 / 60.0;
        let cycle = (2.0 * std::f64::consts::PI * hour / 24.0).sin();

        let noise = if profile.noise > 0.0 {
            rng.gen_range(-profile.noise..profile.noise)
        } else {
            0.0
        };
        let dropout = profile.dropout_rate > 0.0 && rng.gen_bool(profile.dropout_rate.min(1.0));

        let value = if dropout {
            0.0
        } else {
            profile.baseline + profile.drift_per_day * days + profile.daily_amplitude * cycle + noise
        };
        points.push((current, value));
        current += step;
    }

    points
}
