//! Linear interpolation keyed on a 0-100 stress level.

/// Interpolate between `low` (at stress 0) and `high` (at stress 100).
pub fn lerp_by_stress(low: f64, high: f64, stress: f64) -> f64 {
    let t = if stress.is_nan() {
        0.0
    } else {
        stress.clamp(0.0, 100.0) / 100.0
    };
    low + (high - low) * t
}

/// Integer variant, rounded and never below 1.
pub fn interpolate_size(low_load_target: usize, high_load_target: usize, stress: f64) -> usize {
    let v = lerp_by_stress(low_load_target as f64, high_load_target as f64, stress);
    (v.round() as usize).max(1)
}
