//! Piecewise logistic trend.
//!
//! The trend is `g(t) = cap / (1 + exp(-z(t)))` where `z` is continuous and
//! piecewise linear in scaled time:
//!
//! ```text
//! z(t) = m + k·t + Σ δ_j · max(0, t − s_j)
//! ```
//!
//! `s_j` are changepoints and `δ_j` the growth-rate adjustments at each. Fitting
//! happens in logit space, where the model is linear in `(m, k, δ)`; the δ terms
//! carry a ridge penalty inversely proportional to the squared changepoint
//! sensitivity, so low sensitivity keeps the trend smooth.

use chrono::NaiveDateTime;

/// Ratio bounds for the logit transform. Values at or beyond the cap saturate here.
pub(crate) const RATIO_FLOOR: f64 = 1e-3;
pub(crate) const RATIO_CEIL: f64 = 1.0 - RATIO_FLOOR;

/// Penalty on δ is `CHANGEPOINT_PENALTY / sensitivity²`.
pub(crate) const CHANGEPOINT_PENALTY: f64 = 1e-4;

/// Near-zero ridge on intercept and slope, only there to keep the system regular.
pub(crate) const BASE_PENALTY: f64 = 1e-10;

/// Maps timestamps to scaled time: 0 at the first history point, 1 at the last.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct TimeScale {
    pub t0: NaiveDateTime,
    pub span_secs: f64,
}

impl TimeScale {
    pub fn from_history(first: NaiveDateTime, last: NaiveDateTime) -> Self {
        let span = (last - first).num_seconds() as f64;
        Self {
            t0: first,
            span_secs: if span > 0.0 { span } else { 1.0 },
        }
    }

    pub fn scale(&self, ts: NaiveDateTime) -> f64 {
        (ts - self.t0).num_seconds() as f64 / self.span_secs
    }
}

/// Changepoints spread uniformly over the first `range` fraction of history.
///
/// With fewer points than requested changepoints, one changepoint per
/// available point is used instead.
pub(crate) fn select_changepoints(t_hist: &[f64], n_changepoints: usize, range: f64) -> Vec<f64> {
    let n = t_hist.len();
    let hist_size = ((n as f64) * range.clamp(0.0, 1.0)).floor() as usize;
    if hist_size < 2 || n_changepoints == 0 {
        return Vec::new();
    }
    let count = n_changepoints.min(hist_size - 1);
    let step = (hist_size - 1) as f64 / count as f64;
    (1..=count)
        .map(|i| {
            let idx = (i as f64 * step).round() as usize;
            t_hist[idx.min(n - 1)]
        })
        .collect()
}

/// Design row `[1, t, (t − s_1)+, …, (t − s_J)+]`.
pub(crate) fn trend_row(t: f64, changepoints: &[f64], out: &mut Vec<f64>) {
    out.push(1.0);
    out.push(t);
    for &s in changepoints {
        out.push((t - s).max(0.0));
    }
}

/// Logit of `y / cap`, clamped so saturated observations stay finite.
pub(crate) fn logit_ratio(y: f64, cap: f64) -> f64 {
    let p = (y / cap).clamp(RATIO_FLOOR, RATIO_CEIL);
    (p / (1.0 - p)).ln()
}

/// Numerically stable logistic function.
pub(crate) fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// Fitted trend parameters.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct LogisticTrend {
    pub cap: f64,
    pub changepoints: Vec<f64>,
    /// `[m, k, δ_1, …, δ_J]`
    pub beta: Vec<f64>,
}

impl LogisticTrend {
    /// Logit-space value at scaled time `t`.
    pub fn logit_at(&self, t: f64) -> f64 {
        let mut z = self.beta[0] + self.beta[1] * t;
        for (s, d) in self.changepoints.iter().zip(&self.beta[2..]) {
            z += d * (t - s).max(0.0);
        }
        z
    }

    pub fn value_at(&self, t: f64) -> f64 {
        self.cap * sigmoid(self.logit_at(t))
    }

    /// Growth-rate adjustments at each changepoint.
    pub fn deltas(&self) -> &[f64] {
        &self.beta[2..]
    }
}
