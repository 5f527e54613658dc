//! Time-to-exhaustion predictions.

/// Seconds until `current` reaches `capacity` at `rate` units per second.
///
/// Infinite when the rate is zero, negative, or not finite; zero when already
/// at or past capacity.
pub fn time_to_exhaustion(capacity: f64, current: f64, rate: f64) -> f64 {
    if rate.is_nan() || rate <= 0.0 || rate.is_infinite() {
        return f64::INFINITY;
    }
    let remaining = capacity - current;
    if remaining <= 0.0 {
        return 0.0;
    }
    remaining / rate
}

/// Seconds until a queue of `capacity` entries overflows.
pub fn predict_overflow_seconds(capacity: usize, current: usize, fill_rate_per_sec: f64) -> f64 {
    time_to_exhaustion(capacity as f64, current as f64, fill_rate_per_sec)
}

/// Seconds until memory use (percent) reaches 100%.
pub fn predict_memory_exhaustion_seconds(mem_percent: f64, growth_percent_per_sec: f64) -> f64 {
    time_to_exhaustion(100.0, mem_percent, growth_percent_per_sec)
}
