//! Least-squares trend estimation over evenly spaced samples.

use serde::{Deserialize, Serialize};

/// Default |slope| below which a series counts as flat.
pub const DEFAULT_SLOPE_THRESHOLD: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrendDirection {
    Up,
    Down,
    Stable,
}

/// Slope of the least-squares line through `(i, values[i])`.
///
/// Returns 0.0 for fewer than two samples or non-finite input.
pub fn least_squares_slope(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 || values.iter().any(|v| !v.is_finite()) {
        return 0.0;
    }
    let n_f = n as f64;
    let mean_x = (n_f - 1.0) / 2.0;
    let mean_y = values.iter().sum::<f64>() / n_f;
    let mut num = 0.0;
    let mut den = 0.0;
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - mean_x;
        num += dx * (y - mean_y);
        den += dx * dx;
    }
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}

/// Classify a slope against a symmetric threshold.
pub fn classify_slope(slope: f64, threshold: f64) -> TrendDirection {
    if slope.is_nan() || slope.abs() < threshold {
        TrendDirection::Stable
    } else if slope > 0.0 {
        TrendDirection::Up
    } else {
        TrendDirection::Down
    }
}

/// Trend of a series; empty and single-sample series are STABLE.
pub fn trend_direction(values: &[f64], threshold: f64) -> TrendDirection {
    classify_slope(least_squares_slope(values), threshold)
}
