//! Running statistics and z-score anomaly detection.

use serde::{Deserialize, Serialize};

/// Default number of standard deviations that counts as anomalous.
pub const DEFAULT_ANOMALY_SIGMA: f64 = 3.0;

/// Default minimum window before anomalies are reported.
pub const DEFAULT_ANOMALY_MIN_SAMPLES: usize = 10;

/// Welford accumulator for mean and variance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
}

impl RunningStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_slice(values: &[f64]) -> Self {
        let mut s = Self::new();
        for v in values {
            s.push(*v);
        }
        s
    }

    /// Add a sample; non-finite samples are ignored.
    pub fn push(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Population variance; 0.0 with fewer than two samples.
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / self.count as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Distance of `value` from the mean in standard deviations.
    ///
    /// Zero variance yields 0.0 for the mean itself and infinity otherwise.
    pub fn z_score(&self, value: f64) -> f64 {
        let sd = self.std_dev();
        let diff = value - self.mean;
        if sd == 0.0 {
            if diff == 0.0 {
                0.0
            } else {
                f64::INFINITY
            }
        } else {
            diff / sd
        }
    }
}

/// True when `value` lies more than `sigma` deviations from the window mean
/// and the window holds at least `min_samples` samples.
pub fn is_anomalous(window: &[f64], value: f64, sigma: f64, min_samples: usize) -> bool {
    if window.len() < min_samples || !value.is_finite() {
        return false;
    }
    let stats = RunningStats::from_slice(window);
    stats.z_score(value).abs() > sigma
}

/// Indices of samples in `values` that are anomalous against the whole window.
pub fn find_anomalies(values: &[f64], sigma: f64, min_samples: usize) -> Vec<usize> {
    if values.len() < min_samples {
        return Vec::new();
    }
    let stats = RunningStats::from_slice(values);
    values
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_finite() && stats.z_score(**v).abs() > sigma)
        .map(|(i, _)| i)
        .collect()
}
