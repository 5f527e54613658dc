//! Property-based tests for sieve-math.

use proptest::prelude::*;
use sieve_math::{
    classify_slope, interpolate_size, is_anomalous, least_squares_slope, time_to_exhaustion,
    RunningStats, TrendDirection,
};

const TOL: f64 = 1e-9;

fn approx_eq(a: f64, b: f64, tol: f64) -> bool {
    (a - b).abs() <= tol.max(tol * a.abs().max(b.abs()))
}

// ============================================================================
// trend properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// A perfect line recovers its slope.
    #[test]
    fn slope_recovers_line(a in -100.0..100.0f64, b in -10.0..10.0f64, n in 2usize..50) {
        let values: Vec<f64> = (0..n).map(|i| a + b * i as f64).collect();
        let s = least_squares_slope(&values);
        prop_assert!(approx_eq(s, b, 1e-6), "slope {} != {}", s, b);
    }

    /// Adding a constant offset does not change the slope.
    #[test]
    fn slope_shift_invariant(
        values in prop::collection::vec(-1e3..1e3f64, 2..40),
        c in -1e3..1e3f64,
    ) {
        let shifted: Vec<f64> = values.iter().map(|v| v + c).collect();
        prop_assert!(approx_eq(least_squares_slope(&values), least_squares_slope(&shifted), 1e-6));
    }

    /// Reversing the series negates the slope.
    #[test]
    fn slope_reversal_negates(values in prop::collection::vec(-1e3..1e3f64, 2..40)) {
        let mut rev = values.clone();
        rev.reverse();
        prop_assert!(approx_eq(least_squares_slope(&values), -least_squares_slope(&rev), 1e-6));
    }

    /// Slopes inside the threshold are always stable.
    #[test]
    fn small_slopes_are_stable(s in -0.0999..0.0999f64) {
        prop_assert_eq!(classify_slope(s, 0.1), TrendDirection::Stable);
    }
}

// ============================================================================
// statistics properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// Welford mean matches the naive mean.
    #[test]
    fn running_mean_matches_naive(values in prop::collection::vec(-1e6..1e6f64, 1..100)) {
        let stats = RunningStats::from_slice(&values);
        let naive = values.iter().sum::<f64>() / values.len() as f64;
        prop_assert!(approx_eq(stats.mean(), naive, TOL));
        prop_assert!(stats.variance() >= 0.0);
    }

    /// The mean of a window is never anomalous against that window.
    #[test]
    fn mean_is_not_anomalous(values in prop::collection::vec(0.0..100.0f64, 10..60)) {
        let mean = RunningStats::from_slice(&values).mean();
        prop_assert!(!is_anomalous(&values, mean, 3.0, 10));
    }
}

// ============================================================================
// sizing and prediction properties
// ============================================================================

proptest! {
    /// Interpolated sizes stay between the two targets.
    #[test]
    fn interpolation_bounded(
        lo in 1usize..10_000,
        hi in 1usize..10_000,
        stress in -50.0..150.0f64,
    ) {
        let v = interpolate_size(lo, hi, stress);
        prop_assert!(v >= lo.min(hi) && v <= lo.max(hi));
    }

    /// Predictions are non-negative.
    #[test]
    fn predictions_non_negative(cap in 0.0..1e6f64, cur in 0.0..1e6f64, rate in -10.0..10.0f64) {
        prop_assert!(time_to_exhaustion(cap, cur, rate) >= 0.0);
    }
}
