//! Threaded tests for queue invariants.
//!
//! Producers, drainers and the rebalancer run against shared queues; the
//! checks are that capacity holds at every observation and that every
//! admitted message ends up drained or evicted exactly once.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use sieve_common::{
    Context, LogMessage, ManualClock, MessageType, PersistenceDecision, QueueKey, Timestamp,
};
use sieve_config::settings::QueueSettings;
use sieve_core::manager::QueueManager;
use sieve_core::queue::{QueueEntry, SmartQueue};

const T0: i64 = 1_700_000_000_000;
const PRODUCERS: u64 = 4;
const PER_PRODUCER: u64 = 300;

// ============================================================================
// Helpers
// ============================================================================

fn message(id: u64, app: &str) -> (LogMessage, PersistenceDecision) {
    let t = MessageType::ALL[(id % MessageType::ALL.len() as u64) as usize];
    let msg = LogMessage::builder(t, format!("message {}", id))
        .id(id)
        .timestamp(Timestamp::from_millis(T0))
        .application(app)
        .build();
    (msg, PersistenceDecision::persist(t.default_importance()))
}

/// Ids admitted, evicted and drained across all threads.
#[derive(Default)]
struct Ledger {
    admitted: Vec<u64>,
    evicted: Vec<u64>,
    drained: Vec<u64>,
}

impl Ledger {
    fn record_drain(&mut self, entries: &[QueueEntry]) {
        self.drained.extend(entries.iter().map(|e| e.id().0));
    }

    /// Every admitted id left exactly once, by drain or eviction.
    fn assert_conserved(&self) {
        let admitted: HashSet<u64> = self.admitted.iter().copied().collect();
        assert_eq!(admitted.len(), self.admitted.len(), "id admitted twice");

        let mut gone: Vec<u64> = self.evicted.clone();
        gone.extend(&self.drained);
        let gone_set: HashSet<u64> = gone.iter().copied().collect();
        assert_eq!(gone_set.len(), gone.len(), "id left a queue twice");
        assert_eq!(gone_set, admitted);
    }
}

fn produce(
    ledger: &Arc<Mutex<Ledger>>,
    id: u64,
    app: &str,
    queue: &SmartQueue,
    ctx: &Context,
) {
    let (msg, decision) = message(id, app);
    let result = queue.enqueue(msg, decision, ctx);
    assert!(
        queue.size() <= queue.capacity(),
        "size {} > capacity {}",
        queue.size(),
        queue.capacity()
    );
    if let Ok(admission) = result {
        let mut l = ledger.lock().unwrap();
        l.admitted.push(id);
        l.evicted.extend(admission.evicted.iter().map(|id| id.0));
    }
}

// ============================================================================
// Capacity under contention
// ============================================================================

#[test]
fn producers_and_drainer_respect_capacity() {
    let clock = ManualClock::shared(T0);
    let queue = Arc::new(SmartQueue::new(
        QueueKey::default_for("load"),
        QueueSettings::plain(16, 0),
        clock,
    ));
    let ledger = Arc::new(Mutex::new(Ledger::default()));
    let done = Arc::new(AtomicBool::new(false));

    let drainer = {
        let queue = Arc::clone(&queue);
        let ledger = Arc::clone(&ledger);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            while !done.load(Ordering::Acquire) {
                let batch = queue.drain_batch(3);
                assert!(queue.size() <= queue.capacity());
                ledger.lock().unwrap().record_drain(&batch);
                thread::yield_now();
            }
        })
    };

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let queue = Arc::clone(&queue);
            let ledger = Arc::clone(&ledger);
            thread::spawn(move || {
                let ctx = Context::new("load");
                for i in 0..PER_PRODUCER {
                    produce(&ledger, p * 10_000 + i + 1, "load", &queue, &ctx);
                }
            })
        })
        .collect();
    for p in producers {
        p.join().unwrap();
    }
    done.store(true, Ordering::Release);
    drainer.join().unwrap();

    let rest = queue.drain_batch(usize::MAX);
    let mut ledger = ledger.lock().unwrap();
    ledger.record_drain(&rest);
    assert!(queue.is_empty());
    assert!(!ledger.admitted.is_empty());
    ledger.assert_conserved();
    assert!(queue.stats().is_balanced());
}

// ============================================================================
// Rebalancing under contention
// ============================================================================

#[test]
fn rebalance_under_contention_never_loses_entries() {
    let clock = ManualClock::shared(T0);
    let manager = Arc::new(QueueManager::new(QueueSettings::plain(16, 0), clock));
    let hot = manager.get_or_create_for("app", "hot");
    let cold = manager.get_or_create_for("app", "cold");
    let ledger = Arc::new(Mutex::new(Ledger::default()));
    let done = Arc::new(AtomicBool::new(false));

    let rebalancer = {
        let manager = Arc::clone(&manager);
        let cold = Arc::clone(&cold);
        let ledger = Arc::clone(&ledger);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut moved = 0;
            while !done.load(Ordering::Acquire) {
                moved += manager.rebalance(50.0);
                let batch = cold.drain_batch(4);
                ledger.lock().unwrap().record_drain(&batch);
                thread::yield_now();
            }
            moved
        })
    };

    let producer = {
        let hot = Arc::clone(&hot);
        let ledger = Arc::clone(&ledger);
        thread::spawn(move || {
            let ctx = Context::new("app");
            for id in 1..=PRODUCERS * PER_PRODUCER {
                produce(&ledger, id, "app", &hot, &ctx);
            }
        })
    };
    producer.join().unwrap();
    done.store(true, Ordering::Release);
    let moved = rebalancer.join().unwrap();

    let mut ledger = ledger.lock().unwrap();
    for queue in [&hot, &cold] {
        let rest = queue.drain_batch(usize::MAX);
        ledger.record_drain(&rest);
        assert!(queue.stats().is_balanced());
    }
    ledger.assert_conserved();

    let (h, c) = (hot.stats(), cold.stats());
    assert_eq!(h.transferred_out + c.transferred_out, moved as u64);
    assert_eq!(h.transferred_in + c.transferred_in, moved as u64);
    assert_eq!(manager.stats().rebalanced_entries, moved as u64);
}
