//! Property-based tests for the shared data model.

use proptest::prelude::*;
use sieve_common::{Importance, LogMessage, MessageType, Timestamp, TRUNCATION_MARKER};

fn importance() -> impl Strategy<Value = Importance> {
    prop::sample::select(Importance::ALL.to_vec())
}

// ============================================================================
// importance
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// Shifting clamps to the ends of the scale for any delta.
    #[test]
    fn shift_saturates(start in importance(), delta in any::<i32>()) {
        let shifted = start.shift(delta);
        let expected = (i64::from(start.as_u8()) + i64::from(delta)).clamp(0, 3);
        prop_assert_eq!(i64::from(shifted.as_u8()), expected);
    }

    /// Shifting never moves against the sign of the delta.
    #[test]
    fn shift_is_monotonic(start in importance(), delta in -10i32..10) {
        let shifted = start.shift(delta);
        if delta >= 0 {
            prop_assert!(shifted >= start);
        } else {
            prop_assert!(shifted <= start);
        }
    }
}

// ============================================================================
// timestamps
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// Elapsed time is zero going backwards and exact going forwards.
    #[test]
    fn millis_until_never_negative(a in any::<i64>(), b in any::<i64>()) {
        let (ta, tb) = (Timestamp::from_millis(a), Timestamp::from_millis(b));
        let elapsed = ta.millis_until(tb);
        if tb <= ta {
            prop_assert_eq!(elapsed, 0);
        }
    }

    #[test]
    fn millis_until_in_range_is_exact(
        a in -1_000_000_000_000i64..1_000_000_000_000,
        gap in 0i64..1_000_000_000,
    ) {
        let t = Timestamp::from_millis(a);
        prop_assert_eq!(t.millis_until(Timestamp::from_millis(a + gap)), gap as u64);
    }
}

// ============================================================================
// payload cap
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    /// The stored payload fits the cap and stays valid UTF-8.
    #[test]
    fn payload_respects_cap(payload in "\\PC{0,120}", max in 0usize..160) {
        let msg = LogMessage::builder(MessageType::Info, payload.clone())
            .max_payload_bytes(max)
            .build();
        prop_assert!(msg.payload().len() <= max);
        prop_assert_eq!(msg.is_truncated(), payload.len() > max);
        if !msg.is_truncated() {
            prop_assert_eq!(msg.payload(), payload.as_str());
        } else if max > TRUNCATION_MARKER.len() {
            let kept = msg.payload().strip_suffix(TRUNCATION_MARKER);
            prop_assert!(kept.is_some_and(|k| payload.starts_with(k)));
        }
    }
}
