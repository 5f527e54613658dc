//! Property-based tests for queue invariants.

use std::collections::HashSet;

use proptest::prelude::*;
use sieve_common::{
    Context, Importance, LogMessage, ManualClock, MessageType, PersistenceAction,
    PersistenceDecision, QueueKey, ReasonCode, Timestamp,
};
use sieve_config::settings::QueueSettings;
use sieve_core::queue::SmartQueue;

const T0: i64 = 1_700_000_000_000;

fn type_strategy() -> impl Strategy<Value = MessageType> {
    prop::sample::select(MessageType::ALL.to_vec())
}

fn importance_strategy() -> impl Strategy<Value = Importance> {
    prop::sample::select(Importance::ALL.to_vec())
}

fn action_strategy() -> impl Strategy<Value = PersistenceAction> {
    prop_oneof![
        6 => Just(PersistenceAction::Persist),
        2 => Just(PersistenceAction::QueueOnly),
        1 => Just(PersistenceAction::Drop),
        1 => Just(PersistenceAction::EmergencyPreserve),
    ]
}

type Step = (MessageType, Importance, PersistenceAction, i64);

fn step_strategy() -> impl Strategy<Value = Step> {
    (
        type_strategy(),
        importance_strategy(),
        action_strategy(),
        0i64..5_000,
    )
}

/// Feed `steps` into a fresh queue, advancing the clock between admissions.
/// Returns the queue, the number admitted and the ids evicted along the way.
fn replay(capacity: usize, window_ms: u64, steps: &[Step]) -> (SmartQueue, usize, Vec<u64>) {
    let clock = ManualClock::shared(T0);
    let q = SmartQueue::new(
        QueueKey::default_for("prop"),
        QueueSettings::plain(capacity, window_ms),
        clock.clone(),
    );
    let ctx = Context::new("prop");
    let mut admitted = 0;
    let mut evicted = Vec::new();

    for (i, (t, importance, action, gap)) in steps.iter().enumerate() {
        clock.advance_millis(*gap);
        let msg = LogMessage::builder(*t, format!("step {}", i))
            .id(i as u64 + 1)
            .timestamp(Timestamp::from_millis(T0))
            .application("prop")
            .build();
        let decision = PersistenceDecision::new(
            *action,
            ReasonCode::AboveThreshold,
            *importance,
            Importance::Medium,
        );
        if let Ok(admission) = q.enqueue(msg, decision, &ctx) {
            admitted += 1;
            evicted.extend(admission.evicted.iter().map(|id| id.0));
        }
        if i % 7 == 3 {
            q.preserve_top(1, window_ms);
        }
    }
    (q, admitted, evicted)
}

// ============================================================================
// capacity
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Size never exceeds the configured capacity.
    #[test]
    fn size_never_exceeds_capacity(
        capacity in 1usize..16,
        window in prop_oneof![Just(0u64), 1u64..20_000],
        steps in prop::collection::vec(step_strategy(), 0..80),
    ) {
        let (q, _, _) = replay(capacity, window, &steps);
        prop_assert!(q.size() <= capacity, "size {} > capacity {}", q.size(), capacity);
        prop_assert_eq!(q.stats().size, q.size());
    }

    /// Every admitted message is either still resident or was evicted once.
    #[test]
    fn admitted_entries_are_conserved(
        capacity in 1usize..16,
        steps in prop::collection::vec(step_strategy(), 0..80),
    ) {
        let (q, admitted, evicted) = replay(capacity, 30_000, &steps);
        let unique: HashSet<u64> = evicted.iter().copied().collect();
        prop_assert_eq!(unique.len(), evicted.len(), "an id was evicted twice");
        prop_assert_eq!(q.size() + evicted.len(), admitted);
        for id in &evicted {
            prop_assert!(!q.contains((*id).into()));
        }
    }
}

// ============================================================================
// ordering
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Draining yields non-increasing priority, oldest first among equals.
    #[test]
    fn drain_is_priority_ordered(
        steps in prop::collection::vec(step_strategy(), 1..60),
    ) {
        let (q, _, _) = replay(64, 0, &steps);
        let drained = q.drain_batch(64);
        for pair in drained.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            prop_assert!(a.priority >= b.priority, "{} before {}", a.priority, b.priority);
            if a.priority == b.priority {
                prop_assert!(a.seq < b.seq);
            }
        }
        prop_assert!(q.is_empty());
    }

    /// Peeking agrees with the head of a subsequent drain.
    #[test]
    fn peek_matches_drain(
        steps in prop::collection::vec(step_strategy(), 1..40),
        n in 1usize..10,
    ) {
        let (q, _, _) = replay(64, 0, &steps);
        let peeked: Vec<_> = q.peek_top(n).iter().map(|e| e.id()).collect();
        let drained: Vec<_> = q.drain_batch(n).iter().map(|e| e.id()).collect();
        prop_assert_eq!(peeked, drained);
    }
}
