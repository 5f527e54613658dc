//! Smart message queue.
//!
//! A bounded, priority-ordered buffer. Entries drain highest priority
//! first and FIFO within equal priority. Admission respects per-importance
//! reservations and an optional byte budget; when space runs out an
//! eviction walk (configurable step order) frees room, never touching an
//! entry inside its preservation window except under emergency.
//!
//! One mutex guards the entry containers, the preservation index, and the
//! statistics. `size()` and `bytes()` read atomics published at the end of
//! each locked operation, so observers see either the state before a batch
//! or the state after it.

mod entry;
mod stats;

pub use entry::{priority_score, EntrySummary, QueueEntry};
pub use stats::{EvictionCounts, EvictionReason, QueueStats};

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use sieve_common::{
    Context, Error, Importance, LogMessage, MessageId, PersistenceAction, PersistenceDecision,
    QueueKey, SharedClock, Timestamp,
};
use sieve_config::settings::{EvictionStep, QueueSettings};
use thiserror::Error as ThisError;
use tracing::{debug, warn};

use crate::logging::event_names;
use stats::Counters;

#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue {queue} is full (capacity {capacity})")]
    Full { queue: String, capacity: usize },

    #[error("message of {size} bytes exceeds the {max_bytes}-byte budget of queue {queue}")]
    TooLarge {
        queue: String,
        size: usize,
        max_bytes: usize,
    },

    #[error("message {id} is already queued in {queue}")]
    Duplicate { queue: String, id: MessageId },
}

impl From<QueueError> for Error {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Full { queue, capacity } => Error::QueueFull { queue, capacity },
            QueueError::TooLarge {
                queue, max_bytes, ..
            } => Error::QueueFull {
                queue,
                capacity: max_bytes,
            },
            QueueError::Duplicate { queue, id } => Error::InternalInvariant {
                context: format!("message {} admitted twice into {}", id, queue),
            },
        }
    }
}

/// Result of a successful enqueue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Admission {
    pub priority: u32,
    pub preserved: bool,
    /// Entries removed to make room.
    pub evicted: Vec<MessageId>,
}

/// Result of [`SmartQueue::drain_for_persistence`].
#[derive(Debug, Clone, Default)]
pub struct PersistenceDrain {
    /// PERSIST and EMERGENCY_PRESERVE entries, priority order.
    pub persisted: Vec<QueueEntry>,
    /// DROP entries removed without being returned.
    pub dropped: usize,
    /// QUEUE_ONLY entries walked past and left in place.
    pub retained: usize,
}

/// Second opinion on QUEUE_ONLY entries at drain time.
pub trait Reconsider {
    /// A fresh decision for a queued-only entry, or `None` to leave it.
    fn reconsider(&self, entry: &QueueEntry, ctx: &Context) -> Option<PersistenceDecision>;
}

/// Never promotes queued-only entries.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeepQueued;

impl Reconsider for KeepQueued {
    fn reconsider(&self, _entry: &QueueEntry, _ctx: &Context) -> Option<PersistenceDecision> {
        None
    }
}

/// Entries a persistence drain may look past `max` to skip QUEUE_ONLY and
/// DROP entries. Keeps the lock hold proportional to the batch.
const PERSISTENCE_SCAN_SLACK: usize = 64;

type OrderKey = (Reverse<u32>, u64);
type EvictKey = (u32, u64);

fn order_key(k: EvictKey) -> OrderKey {
    (Reverse(k.0), k.1)
}

/// `at + ms`, pinned to the far future instead of wrapping.
fn deadline_after(at: Timestamp, ms: u64) -> Timestamp {
    Timestamp::from_millis(
        at.as_millis()
            .saturating_add(i64::try_from(ms).unwrap_or(i64::MAX)),
    )
}

#[derive(Debug, Clone, Copy, Default)]
struct Tally {
    len: usize,
    bytes: usize,
    by_importance: [usize; 4],
}

impl Tally {
    fn add(&mut self, importance: Importance, size: usize) {
        self.len += 1;
        self.bytes += size;
        self.by_importance[importance.as_u8() as usize] += 1;
    }

    fn remove(&mut self, importance: Importance, size: usize) {
        self.len = self.len.saturating_sub(1);
        self.bytes = self.bytes.saturating_sub(size);
        let slot = &mut self.by_importance[importance.as_u8() as usize];
        *slot = slot.saturating_sub(1);
    }

    fn count(&self, importance: Importance) -> usize {
        self.by_importance[importance.as_u8() as usize]
    }
}

/// What an incoming entry needs from the eviction walk.
struct Need {
    importance: Importance,
    size: usize,
    allow_preserved: bool,
}

struct QueueState {
    settings: QueueSettings,
    order: BTreeMap<OrderKey, QueueEntry>,
    eviction: BTreeSet<EvictKey>,
    index: HashMap<MessageId, EvictKey>,
    tally: Tally,
    next_seq: u64,
    counters: Counters,
}

impl QueueState {
    fn reserved(&self, importance: Importance) -> usize {
        self.settings.reserved.get(&importance).copied().unwrap_or(0)
    }

    fn shared_used(&self, tally: &Tally) -> usize {
        Importance::ALL
            .iter()
            .map(|&i| tally.count(i).saturating_sub(self.reserved(i)))
            .sum()
    }

    fn shared_capacity(&self) -> usize {
        self.settings
            .max_entries
            .saturating_sub(self.settings.reserved_total())
    }

    fn in_shared_pool(&self, tally: &Tally, importance: Importance) -> bool {
        tally.count(importance) > self.reserved(importance)
    }

    fn count_fits(&self, tally: &Tally, importance: Importance) -> bool {
        if tally.len >= self.settings.max_entries {
            return false;
        }
        tally.count(importance) < self.reserved(importance)
            || self.shared_used(tally) < self.shared_capacity()
    }

    fn bytes_fit(&self, tally: &Tally, size: usize) -> bool {
        self.settings
            .max_bytes
            .map_or(true, |max| tally.bytes + size <= max)
    }

    fn fits(&self, tally: &Tally, importance: Importance, size: usize) -> bool {
        self.count_fits(tally, importance) && self.bytes_fit(tally, size)
    }

    fn candidates<'a>(
        &'a self,
        chosen: &'a HashSet<EvictKey>,
    ) -> impl Iterator<Item = (EvictKey, &'a QueueEntry)> + 'a {
        self.eviction
            .iter()
            .filter(move |k| !chosen.contains(k))
            .filter_map(move |&k| self.order.get(&order_key(k)).map(|e| (k, e)))
    }

    /// Next victim for one eviction step, or `None` if the step has nothing
    /// useful to offer.
    fn pick(
        &self,
        step: EvictionStep,
        now: Timestamp,
        need: &Need,
        tally: &Tally,
        chosen: &HashSet<EvictKey>,
    ) -> Option<EvictKey> {
        let count_short = !self.count_fits(tally, need.importance);
        // Freeing a slot only helps if it comes from the incoming entry's
        // own band or from the shared pool.
        let helps = |e: &QueueEntry| {
            !count_short
                || e.importance == need.importance
                || self.in_shared_pool(tally, e.importance)
        };
        let mut candidates = self.candidates(chosen);

        match step {
            EvictionStep::Expired => {
                let ttl_ms = self.settings.ttl_seconds?.saturating_mul(1_000);
                candidates
                    .filter(|(_, e)| {
                        !e.is_preserved_at(now) && e.age_ms(now) >= ttl_ms && helps(e)
                    })
                    .min_by_key(|(k, _)| k.1)
                    .map(|(k, _)| k)
            }
            EvictionStep::LowestPriority => candidates
                .find(|(_, e)| e.preserved_until.is_none() && helps(e))
                .map(|(k, _)| k),
            EvictionStep::LapsedPreservation => candidates
                .find(|(_, e)| e.preservation_lapsed_at(now) && helps(e))
                .map(|(k, _)| k),
            EvictionStep::PreservedUnderEmergency => {
                if !need.allow_preserved {
                    return None;
                }
                candidates
                    .find(|(_, e)| {
                        e.is_preserved_at(now)
                            && (e.importance != Importance::Critical
                                || need.importance == Importance::Critical)
                            && helps(e)
                    })
                    .map(|(k, _)| k)
            }
        }
    }

    /// Choose victims without touching the queue; `None` if no combination
    /// of allowed evictions makes room.
    fn plan_eviction(
        &self,
        need: &Need,
        now: Timestamp,
    ) -> Option<Vec<(EvictKey, EvictionReason)>> {
        let mut tally = self.tally;
        let mut chosen = HashSet::new();
        let mut plan = Vec::new();
        while !self.fits(&tally, need.importance, need.size) {
            let (key, reason) = self.settings.eviction_order.iter().find_map(|&step| {
                self.pick(step, now, need, &tally, &chosen)
                    .map(|k| (k, EvictionReason::from(step)))
            })?;
            let entry = self.order.get(&order_key(key))?;
            tally.remove(entry.importance, entry.size_bytes());
            chosen.insert(key);
            plan.push((key, reason));
        }
        Some(plan)
    }

    fn insert(&mut self, entry: QueueEntry) {
        let key = (entry.priority, entry.seq);
        self.tally.add(entry.importance, entry.size_bytes());
        self.index.insert(entry.id(), key);
        self.eviction.insert(key);
        self.order.insert(order_key(key), entry);
        self.counters.observe_peak(self.tally.len, self.tally.bytes);
    }

    fn remove(&mut self, key: EvictKey) -> Option<QueueEntry> {
        let entry = self.order.remove(&order_key(key))?;
        self.eviction.remove(&key);
        self.index.remove(&entry.id());
        self.tally.remove(entry.importance, entry.size_bytes());
        Some(entry)
    }

    fn pop_first(&mut self) -> Option<QueueEntry> {
        let (k, _) = self.order.first_key_value()?;
        let key = (k.0 .0, k.1);
        self.remove(key)
    }

    fn evict(
        &mut self,
        queue: &QueueKey,
        key: EvictKey,
        reason: EvictionReason,
    ) -> Option<MessageId> {
        let entry = self.remove(key)?;
        self.counters.evicted.record(reason, 1);
        debug!(
            target: event_names::QUEUE_EVICTED,
            queue = %queue,
            message_id = entry.id().0,
            importance = %entry.importance,
            priority = entry.priority,
            reason = reason.as_str(),
            "entry evicted"
        );
        Some(entry.id())
    }

    fn record_drained(&mut self, drained: &[QueueEntry], now: Timestamp) {
        self.counters.drained += drained.len() as u64;
        self.counters.latency_total_ms += drained.iter().map(|e| e.age_ms(now)).sum::<u64>();
    }
}

/// A bounded priority queue owned by the queue manager.
pub struct SmartQueue {
    key: QueueKey,
    clock: SharedClock,
    state: Mutex<QueueState>,
    ready: Condvar,
    len: AtomicUsize,
    bytes: AtomicUsize,
    capacity: AtomicUsize,
    emergency: AtomicBool,
}

impl std::fmt::Debug for SmartQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmartQueue")
            .field("key", &self.key)
            .field("size", &self.size())
            .field("capacity", &self.capacity())
            .finish()
    }
}

impl SmartQueue {
    pub fn new(key: QueueKey, settings: QueueSettings, clock: SharedClock) -> Self {
        let capacity = settings.max_entries;
        Self {
            key,
            clock,
            state: Mutex::new(QueueState {
                settings,
                order: BTreeMap::new(),
                eviction: BTreeSet::new(),
                index: HashMap::new(),
                tally: Tally::default(),
                next_seq: 0,
                counters: Counters::default(),
            }),
            ready: Condvar::new(),
            len: AtomicUsize::new(0),
            bytes: AtomicUsize::new(0),
            capacity: AtomicUsize::new(capacity),
            emergency: AtomicBool::new(false),
        }
    }

    pub fn key(&self) -> &QueueKey {
        &self.key
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, state: &QueueState) {
        self.len.store(state.tally.len, Ordering::Release);
        self.bytes.store(state.tally.bytes, Ordering::Release);
        self.capacity
            .store(state.settings.max_entries, Ordering::Release);
    }

    /// Admit a message.
    ///
    /// `EMERGENCY_PRESERVE` decisions, and every decision while the queue or
    /// the context is in emergency, may evict preserved entries.
    pub fn enqueue(
        &self,
        message: LogMessage,
        decision: PersistenceDecision,
        ctx: &Context,
    ) -> Result<Admission, QueueError> {
        let now = self.clock.now();
        let size = message.size_bytes();
        let importance = decision.importance;
        let emergency = ctx.emergency || self.is_emergency();

        let mut state = self.lock();
        if state.index.contains_key(&message.id()) {
            return Err(QueueError::Duplicate {
                queue: self.key.to_string(),
                id: message.id(),
            });
        }
        if let Some(max_bytes) = state.settings.max_bytes {
            if size > max_bytes {
                state.counters.rejected += 1;
                return Err(QueueError::TooLarge {
                    queue: self.key.to_string(),
                    size,
                    max_bytes,
                });
            }
        }

        let need = Need {
            importance,
            size,
            allow_preserved: emergency || decision.action == PersistenceAction::EmergencyPreserve,
        };
        let Some(plan) = state.plan_eviction(&need, now) else {
            state.counters.rejected += 1;
            let capacity = state.settings.max_entries;
            drop(state);
            warn!(
                target: event_names::QUEUE_FULL,
                queue = %self.key,
                capacity,
                importance = %importance,
                message_id = message.id().0,
                "queue full, message rejected"
            );
            return Err(QueueError::Full {
                queue: self.key.to_string(),
                capacity,
            });
        };

        let evicted: Vec<MessageId> = plan
            .into_iter()
            .filter_map(|(key, reason)| state.evict(&self.key, key, reason))
            .collect();

        let priority = priority_score(
            &state.settings.weights,
            message.message_type(),
            importance,
            ctx.system_load,
            emergency,
            message.timestamp().millis_until(now),
        );
        let window = state.settings.preservation_window_ms;
        let auto_preserve = window > 0
            && (importance == Importance::Critical
                || decision.action == PersistenceAction::EmergencyPreserve);
        let preserved_until = auto_preserve.then(|| deadline_after(now, window));

        let seq = state.next_seq;
        state.next_seq += 1;
        state.insert(QueueEntry {
            message,
            importance,
            decision,
            priority,
            seq,
            enqueued_at: now,
            preserved_until,
        });
        state.counters.enqueued += 1;
        self.publish(&state);
        drop(state);
        self.ready.notify_all();

        Ok(Admission {
            priority,
            preserved: preserved_until.is_some(),
            evicted,
        })
    }

    /// Remove up to `max` entries, highest priority first, FIFO within ties.
    pub fn drain_batch(&self, max: usize) -> Vec<QueueEntry> {
        let now = self.clock.now();
        let mut state = self.lock();
        let mut out = Vec::with_capacity(max.min(state.tally.len));
        while out.len() < max {
            match state.pop_first() {
                Some(entry) => out.push(entry),
                None => break,
            }
        }
        state.record_drained(&out, now);
        self.publish(&state);
        out
    }

    /// Remove entries whose priority lies in the top tenth of the current
    /// priority range, up to the batch target.
    pub fn drain_priority_batch(&self) -> Vec<QueueEntry> {
        let target = self.batch_target();
        self.drain_priority_upto(target)
    }

    /// Top-decile drain bounded by `limit` instead of the batch target.
    pub fn drain_priority_upto(&self, limit: usize) -> Vec<QueueEntry> {
        let now = self.clock.now();
        let mut state = self.lock();
        let (Some(max_p), Some(min_p)) = (
            state.order.keys().next().map(|k| k.0 .0),
            state.order.keys().next_back().map(|k| k.0 .0),
        ) else {
            return Vec::new();
        };
        let cutoff = max_p - (max_p - min_p) / 10;
        let mut out = Vec::new();
        while out.len() < limit {
            let next = state.order.keys().next().map(|k| k.0 .0);
            match next {
                Some(p) if p >= cutoff => {
                    if let Some(entry) = state.pop_first() {
                        out.push(entry);
                    }
                }
                _ => break,
            }
        }
        state.record_drained(&out, now);
        self.publish(&state);
        out
    }

    /// Drain for handoff to sinks, honouring each entry's decision.
    ///
    /// PERSIST and EMERGENCY_PRESERVE entries are returned; DROP entries are
    /// removed and counted; QUEUE_ONLY entries stay unless `policy`
    /// promotes them to a persistable decision. At most `max` plus a fixed
    /// slack of entries are examined per call.
    pub fn drain_for_persistence(
        &self,
        max: usize,
        ctx: &Context,
        policy: &dyn Reconsider,
    ) -> PersistenceDrain {
        let now = self.clock.now();
        let mut state = self.lock();

        let mut take: Vec<(EvictKey, Option<PersistenceDecision>)> = Vec::new();
        let mut drops: Vec<EvictKey> = Vec::new();
        let mut retained = 0;
        let budget = max.saturating_add(PERSISTENCE_SCAN_SLACK);
        for (k, entry) in state.order.iter().take(budget) {
            if take.len() >= max {
                break;
            }
            let key = (k.0 .0, k.1);
            match entry.decision.action {
                PersistenceAction::Persist | PersistenceAction::EmergencyPreserve => {
                    take.push((key, None));
                }
                PersistenceAction::Drop => drops.push(key),
                PersistenceAction::QueueOnly => match policy.reconsider(entry, ctx) {
                    Some(d) if d.action.is_persistable() => take.push((key, Some(d))),
                    _ => retained += 1,
                },
            }
        }

        let dropped = drops
            .into_iter()
            .filter(|&k| state.remove(k).is_some())
            .count();
        state.counters.dropped_by_policy += dropped as u64;

        let mut persisted = Vec::with_capacity(take.len());
        for (key, decision) in take {
            if let Some(mut entry) = state.remove(key) {
                if let Some(d) = decision {
                    entry.decision = d;
                }
                persisted.push(entry);
            }
        }
        state.record_drained(&persisted, now);
        self.publish(&state);

        PersistenceDrain {
            persisted,
            dropped,
            retained,
        }
    }

    /// Mark the top `n` entries preserved until now + `duration_ms`.
    /// Existing later deadlines are kept. Returns how many were marked.
    pub fn preserve_top(&self, n: usize, duration_ms: u64) -> usize {
        let now = self.clock.now();
        let deadline = deadline_after(now, duration_ms);
        let mut state = self.lock();
        let mut marked = 0;
        for entry in state.order.values_mut().take(n) {
            entry.preserved_until = Some(match entry.preserved_until {
                Some(d) if d > deadline => d,
                _ => deadline,
            });
            marked += 1;
        }
        marked
    }

    /// Push every active deadline out by `additional_ms`.
    pub fn extend_preservation(&self, additional_ms: u64) -> usize {
        let now = self.clock.now();
        let mut state = self.lock();
        let mut extended = 0;
        for entry in state.order.values_mut() {
            if let Some(d) = entry.preserved_until.filter(|d| *d > now) {
                entry.preserved_until = Some(deadline_after(d, additional_ms));
                extended += 1;
            }
        }
        extended
    }

    pub fn is_preserved(&self, id: MessageId) -> bool {
        let now = self.clock.now();
        let state = self.lock();
        state
            .index
            .get(&id)
            .and_then(|&k| state.order.get(&order_key(k)))
            .is_some_and(|e| e.is_preserved_at(now))
    }

    /// Free space unconditionally, lowest priority first, until at most half
    /// full. CRITICAL entries are kept. Returns the number removed, which is
    /// at least one whenever a non-CRITICAL entry exists.
    pub fn emergency_cleanup(&self) -> usize {
        let mut state = self.lock();
        let target = state.settings.max_entries / 2;
        let victims: Vec<EvictKey> = state
            .candidates(&HashSet::new())
            .filter(|(_, e)| e.importance != Importance::Critical)
            .map(|(k, _)| k)
            .collect();

        let mut removed = 0;
        for key in victims {
            if removed > 0 && state.tally.len <= target {
                break;
            }
            if state.evict(&self.key, key, EvictionReason::Emergency).is_some() {
                removed += 1;
            }
        }
        self.publish(&state);
        drop(state);
        if removed > 0 {
            warn!(
                target: event_names::QUEUE_CLEANUP,
                queue = %self.key,
                removed,
                "emergency cleanup"
            );
        }
        removed
    }

    /// Drop every entry past the TTL that is not inside a preservation window.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut state = self.lock();
        let Some(ttl) = state.settings.ttl_seconds else {
            return 0;
        };
        let ttl_ms = ttl.saturating_mul(1_000);
        let expired: Vec<EvictKey> = state
            .order
            .iter()
            .filter(|(_, e)| !e.is_preserved_at(now) && e.age_ms(now) >= ttl_ms)
            .map(|(k, _)| (k.0 .0, k.1))
            .collect();
        let mut removed = 0;
        for key in expired {
            if state.evict(&self.key, key, EvictionReason::Expired).is_some() {
                removed += 1;
            }
        }
        self.publish(&state);
        removed
    }

    /// Resize. Shrinking evicts unpreserved entries; if preserved entries
    /// alone exceed the new size, capacity settles at the current size.
    /// Returns the capacity now in force.
    pub fn set_capacity(&self, max_entries: usize) -> usize {
        let now = self.clock.now();
        let requested = max_entries.max(1);
        let mut state = self.lock();
        state.settings.max_entries = requested;
        let need = Need {
            importance: Importance::Low,
            size: 0,
            allow_preserved: false,
        };
        let steps = [EvictionStep::LowestPriority, EvictionStep::LapsedPreservation];
        let none = HashSet::new();
        while state.tally.len > requested {
            let tally = state.tally;
            // Count shortage does not apply here; any entry frees a slot.
            let victim = steps.iter().find_map(|&step| {
                let mut relaxed = tally;
                relaxed.len = 0;
                state
                    .pick(step, now, &need, &relaxed, &none)
                    .map(|k| (k, EvictionReason::from(step)))
            });
            match victim {
                Some((key, reason)) => {
                    state.evict(&self.key, key, reason);
                }
                None => break,
            }
        }
        if state.tally.len > requested {
            warn!(
                target: event_names::QUEUE_RESIZED,
                queue = %self.key,
                requested,
                effective = state.tally.len,
                "preserved entries block shrink"
            );
            state.settings.max_entries = state.tally.len;
        }
        let effective = state.settings.max_entries;
        self.publish(&state);
        debug!(
            target: event_names::QUEUE_RESIZED,
            queue = %self.key,
            capacity = effective,
            "queue resized"
        );
        effective
    }

    pub fn set_batch_target(&self, target: usize) {
        self.lock().settings.batch_target = target.max(1);
    }

    pub fn batch_target(&self) -> usize {
        self.lock().settings.batch_target
    }

    pub fn set_emergency(&self, on: bool) {
        self.emergency.store(on, Ordering::Release);
    }

    pub fn is_emergency(&self) -> bool {
        self.emergency.load(Ordering::Acquire)
    }

    /// Highest-priority entries without removing them.
    pub fn peek_top(&self, n: usize) -> Vec<QueueEntry> {
        self.lock().order.values().take(n).cloned().collect()
    }

    pub fn contains(&self, id: MessageId) -> bool {
        self.lock().index.contains_key(&id)
    }

    pub fn size(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn bytes(&self) -> usize {
        self.bytes.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Acquire)
    }

    /// Free entry slots.
    pub fn free_slots(&self) -> usize {
        self.capacity().saturating_sub(self.size())
    }

    pub fn fill_fraction(&self) -> f64 {
        let cap = self.capacity();
        if cap == 0 {
            1.0
        } else {
            self.size() as f64 / cap as f64
        }
    }

    /// Block until the queue is non-empty or `timeout` passes.
    pub fn wait_for_messages(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        while state.tally.len == 0 {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .ready
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            state = guard;
        }
        true
    }

    /// Move up to `n` of the lowest-priority unpreserved entries into
    /// `peer`. Both locks are held for the whole move, taken in address
    /// order, and only entries the peer admits without evicting leave this
    /// queue. Returns how many moved.
    pub fn transfer_to(&self, peer: &SmartQueue, n: usize) -> usize {
        if n == 0 || std::ptr::eq(self, peer) {
            return 0;
        }
        let now = self.clock.now();
        let (mut src, mut dst) = if (self as *const Self) < (peer as *const Self) {
            let src = self.lock();
            (src, peer.lock())
        } else {
            let dst = peer.lock();
            (self.lock(), dst)
        };

        let mut room = dst.tally;
        let keys: Vec<EvictKey> = src
            .candidates(&HashSet::new())
            .filter(|(_, e)| !e.is_preserved_at(now))
            .take(n)
            .filter(|(_, e)| {
                let fits = !dst.index.contains_key(&e.id())
                    && dst.fits(&room, e.importance, e.size_bytes());
                if fits {
                    room.add(e.importance, e.size_bytes());
                }
                fits
            })
            .map(|(k, _)| k)
            .collect();

        let mut moved = 0;
        for key in keys {
            if let Some(mut entry) = src.remove(key) {
                entry.seq = dst.next_seq;
                dst.next_seq += 1;
                dst.insert(entry);
                moved += 1;
            }
        }
        src.counters.transferred_out += moved;
        dst.counters.transferred_in += moved;
        self.publish(&src);
        peer.publish(&dst);
        drop(src);
        drop(dst);
        if moved > 0 {
            peer.ready.notify_all();
        }
        moved as usize
    }

    pub fn settings(&self) -> QueueSettings {
        self.lock().settings.clone()
    }

    pub fn stats(&self) -> QueueStats {
        let now = self.clock.now();
        let state = self.lock();
        let c = &state.counters;
        QueueStats {
            queue: self.key.to_string(),
            size: state.tally.len,
            bytes: state.tally.bytes,
            capacity: state.settings.max_entries,
            max_bytes: state.settings.max_bytes,
            batch_target: state.settings.batch_target,
            emergency: self.is_emergency(),
            preserved: state
                .order
                .values()
                .filter(|e| e.is_preserved_at(now))
                .count(),
            enqueued: c.enqueued,
            drained: c.drained,
            evicted: c.evicted,
            dropped_by_policy: c.dropped_by_policy,
            rejected: c.rejected,
            transferred_in: c.transferred_in,
            transferred_out: c.transferred_out,
            peak_size: c.peak_size,
            peak_bytes: c.peak_bytes,
            avg_latency_ms: c.avg_latency_ms(),
            by_importance: Importance::ALL
                .iter()
                .map(|&i| (i, state.tally.count(i)))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sieve_common::{ManualClock, MessageType, ReasonCode};
    use std::collections::BTreeMap;
    use std::sync::Arc;

    const T0: i64 = 1_700_000_000_000;

    fn clock() -> Arc<ManualClock> {
        ManualClock::shared(T0)
    }

    fn queue(settings: QueueSettings, clock: &Arc<ManualClock>) -> SmartQueue {
        SmartQueue::new(QueueKey::default_for("app"), settings, clock.clone())
    }

    fn msg(id: u64, t: MessageType) -> LogMessage {
        LogMessage::builder(t, format!("message {}", id))
            .id(id)
            .timestamp(Timestamp::from_millis(T0))
            .application("app")
            .component("Comp")
            .function("f")
            .build()
    }

    fn decision(t: MessageType, action: PersistenceAction) -> PersistenceDecision {
        let imp = t.default_importance();
        PersistenceDecision::new(action, ReasonCode::AboveThreshold, imp, Importance::Medium)
    }

    fn push(q: &SmartQueue, id: u64, t: MessageType) -> Result<Admission, QueueError> {
        q.enqueue(msg(id, t), decision(t, PersistenceAction::Persist), &Context::new("app"))
    }

    fn ids(entries: &[QueueEntry]) -> Vec<u64> {
        entries.iter().map(|e| e.id().0).collect()
    }

    #[test]
    fn drain_returns_priority_then_fifo() {
        let c = clock();
        let q = queue(QueueSettings::plain(4, 0), &c);
        push(&q, 1, MessageType::Info).unwrap();
        push(&q, 2, MessageType::Error).unwrap();
        push(&q, 3, MessageType::Debug).unwrap();
        push(&q, 4, MessageType::Critical).unwrap();
        assert_eq!(ids(&q.drain_batch(4)), vec![4, 2, 1, 3]);
        assert!(q.is_empty());
    }

    #[test]
    fn equal_priority_is_fifo() {
        let c = clock();
        let q = queue(QueueSettings::plain(10, 0), &c);
        for id in [5, 3, 9] {
            push(&q, id, MessageType::Info).unwrap();
        }
        assert_eq!(ids(&q.drain_batch(2)), vec![5, 3]);
        assert_eq!(ids(&q.drain_batch(10)), vec![9]);
    }

    #[test]
    fn preserved_entry_survives_eviction() {
        let c = clock();
        let q = queue(QueueSettings::plain(3, 60_000), &c);
        push(&q, 1, MessageType::Critical).unwrap();
        assert_eq!(q.preserve_top(1, 60_000), 1);
        push(&q, 2, MessageType::Info).unwrap();
        push(&q, 3, MessageType::Info).unwrap();
        let admission = push(&q, 4, MessageType::Info).unwrap();
        assert_eq!(admission.evicted, vec![MessageId(2)]);
        assert_eq!(q.size(), 3);
        assert!(q.contains(MessageId(1)));
        assert!(q.is_preserved(MessageId(1)));
    }

    #[test]
    fn capacity_minus_one_then_full() {
        let c = clock();
        let q = queue(QueueSettings::plain(2, 0), &c);
        assert!(push(&q, 1, MessageType::Info).unwrap().evicted.is_empty());
        assert!(push(&q, 2, MessageType::Info).unwrap().evicted.is_empty());
        let third = push(&q, 3, MessageType::Error).unwrap();
        assert_eq!(third.evicted, vec![MessageId(1)]);
        assert_eq!(q.size(), 2);
    }

    #[test]
    fn full_of_preserved_entries_rejects() {
        let c = clock();
        let q = queue(QueueSettings::plain(2, 10_000), &c);
        push(&q, 1, MessageType::Critical).unwrap();
        push(&q, 2, MessageType::Critical).unwrap();
        let err = push(&q, 3, MessageType::Info).unwrap_err();
        assert!(matches!(err, QueueError::Full { capacity: 2, .. }));
        assert_eq!(q.stats().rejected, 1);

        // once the window lapses, the oldest lapsed entry makes room
        c.advance_millis(10_000);
        let admission = push(&q, 3, MessageType::Info).unwrap();
        assert_eq!(admission.evicted, vec![MessageId(1)]);
    }

    #[test]
    fn emergency_preserve_may_take_preserved_non_critical() {
        let c = clock();
        let q = queue(QueueSettings::plain(1, 10_000), &c);
        push(&q, 1, MessageType::Warn).unwrap();
        q.preserve_top(1, 10_000);

        let plain = push(&q, 2, MessageType::Warn);
        assert!(plain.is_err());

        let t = MessageType::Warn;
        let forced = q
            .enqueue(
                msg(3, t),
                decision(t, PersistenceAction::EmergencyPreserve),
                &Context::new("app"),
            )
            .unwrap();
        assert_eq!(forced.evicted, vec![MessageId(1)]);
        assert!(forced.preserved);
        assert_eq!(q.stats().evicted.emergency, 1);
    }

    #[test]
    fn critical_in_window_yields_only_to_critical() {
        let c = clock();
        let q = queue(QueueSettings::plain(1, 10_000), &c);
        push(&q, 1, MessageType::Critical).unwrap();
        q.set_emergency(true);

        let high = MessageType::Warn;
        assert!(q
            .enqueue(
                msg(2, high),
                decision(high, PersistenceAction::EmergencyPreserve),
                &Context::new("app"),
            )
            .is_err());

        let crit = MessageType::Critical;
        let admission = q
            .enqueue(
                msg(3, crit),
                decision(crit, PersistenceAction::EmergencyPreserve),
                &Context::new("app"),
            )
            .unwrap();
        assert_eq!(admission.evicted, vec![MessageId(1)]);
    }

    #[test]
    fn reserved_band_admits_when_shared_pool_full() {
        let c = clock();
        let mut settings = QueueSettings::plain(3, 0);
        settings.reserved = BTreeMap::from([(Importance::Critical, 1)]);
        let q = queue(settings, &c);
        push(&q, 1, MessageType::Info).unwrap();
        push(&q, 2, MessageType::Info).unwrap();
        // shared pool (2) is full; the CRITICAL band is empty
        let admission = push(&q, 3, MessageType::Error).unwrap();
        assert!(admission.evicted.is_empty());

        // a second CRITICAL must come out of the shared pool
        let admission = push(&q, 4, MessageType::Error).unwrap();
        assert_eq!(admission.evicted, vec![MessageId(1)]);
        assert_eq!(q.size(), 3);
    }

    #[test]
    fn reserved_entries_are_not_useful_victims_for_other_bands() {
        let c = clock();
        let mut settings = QueueSettings::plain(2, 0);
        settings.reserved = BTreeMap::from([(Importance::Low, 1), (Importance::Critical, 1)]);
        let q = queue(settings, &c);
        push(&q, 1, MessageType::Debug).unwrap();
        push(&q, 2, MessageType::Error).unwrap();
        // no shared pool and no MEDIUM band: nothing can make room
        assert!(push(&q, 3, MessageType::Info).is_err());
        // a LOW message may replace the LOW one
        let admission = push(&q, 4, MessageType::Debug).unwrap();
        assert_eq!(admission.evicted, vec![MessageId(1)]);
    }

    #[test]
    fn byte_budget_drives_eviction() {
        let c = clock();
        let mut settings = QueueSettings::plain(100, 0);
        let one = msg(1, MessageType::Info).size_bytes();
        settings.max_bytes = Some(one * 2);
        let q = queue(settings, &c);
        push(&q, 1, MessageType::Info).unwrap();
        push(&q, 2, MessageType::Info).unwrap();
        let admission = push(&q, 3, MessageType::Warn).unwrap();
        assert_eq!(admission.evicted, vec![MessageId(1)]);
        assert!(q.bytes() <= one * 2);

        let huge = LogMessage::builder(MessageType::Info, "x".repeat(one * 3))
            .id(9u64)
            .build();
        let err = q
            .enqueue(
                huge,
                decision(MessageType::Info, PersistenceAction::Persist),
                &Context::new("app"),
            )
            .unwrap_err();
        assert!(matches!(err, QueueError::TooLarge { .. }));
    }

    #[test]
    fn ttl_expired_entries_go_first() {
        let c = clock();
        let mut settings = QueueSettings::plain(2, 0);
        settings.ttl_seconds = Some(5);
        let q = queue(settings, &c);
        push(&q, 1, MessageType::Error).unwrap();
        c.advance_millis(6_000);
        push(&q, 2, MessageType::Debug).unwrap();
        // the stale ERROR outranks the fresh DEBUG but has expired
        let admission = push(&q, 3, MessageType::Debug).unwrap();
        assert_eq!(admission.evicted, vec![MessageId(1)]);
        assert_eq!(q.stats().evicted.expired, 1);
    }

    #[test]
    fn purge_expired_spares_preserved() {
        let c = clock();
        let mut settings = QueueSettings::plain(10, 60_000);
        settings.ttl_seconds = Some(1);
        let q = queue(settings, &c);
        push(&q, 1, MessageType::Critical).unwrap();
        push(&q, 2, MessageType::Info).unwrap();
        c.advance_millis(2_000);
        assert_eq!(q.purge_expired(), 1);
        assert!(q.contains(MessageId(1)));
    }

    #[test]
    fn drain_for_persistence_honours_decisions() {
        let c = clock();
        let q = queue(QueueSettings::plain(10, 0), &c);
        let ctx = Context::new("app");
        let info = MessageType::Info;
        q.enqueue(msg(1, info), decision(info, PersistenceAction::QueueOnly), &ctx)
            .unwrap();
        q.enqueue(msg(2, info), decision(info, PersistenceAction::Drop), &ctx)
            .unwrap();
        q.enqueue(msg(3, info), decision(info, PersistenceAction::Persist), &ctx)
            .unwrap();

        let drained = q.drain_for_persistence(10, &ctx, &KeepQueued);
        assert_eq!(ids(&drained.persisted), vec![3]);
        assert_eq!(drained.dropped, 1);
        assert_eq!(drained.retained, 1);
        assert_eq!(q.size(), 1);
        assert!(q.contains(MessageId(1)));
        assert!(q.stats().is_balanced());
    }

    struct PromoteAll;

    impl Reconsider for PromoteAll {
        fn reconsider(&self, entry: &QueueEntry, _ctx: &Context) -> Option<PersistenceDecision> {
            Some(PersistenceDecision::new(
                PersistenceAction::Persist,
                ReasonCode::Reconsidered,
                entry.importance,
                entry.importance,
            ))
        }
    }

    #[test]
    fn reconsidered_entries_are_returned_with_new_decision() {
        let c = clock();
        let q = queue(QueueSettings::plain(10, 0), &c);
        let ctx = Context::new("app");
        let info = MessageType::Info;
        q.enqueue(msg(1, info), decision(info, PersistenceAction::QueueOnly), &ctx)
            .unwrap();
        let drained = q.drain_for_persistence(10, &ctx, &PromoteAll);
        assert_eq!(drained.persisted.len(), 1);
        assert_eq!(drained.persisted[0].decision.reason, ReasonCode::Reconsidered);
        assert!(q.is_empty());
    }

    #[test]
    fn priority_batch_takes_top_decile() {
        let c = clock();
        let mut settings = QueueSettings::plain(10, 0);
        settings.batch_target = 10;
        let q = queue(settings, &c);
        push(&q, 1, MessageType::Critical).unwrap();
        push(&q, 2, MessageType::Critical).unwrap();
        push(&q, 3, MessageType::Info).unwrap();
        push(&q, 4, MessageType::Trace).unwrap();
        assert_eq!(ids(&q.drain_priority_batch()), vec![1, 2]);
        assert_eq!(q.size(), 2);
    }

    #[test]
    fn priority_batch_respects_target() {
        let c = clock();
        let mut settings = QueueSettings::plain(10, 0);
        settings.batch_target = 2;
        let q = queue(settings, &c);
        for id in 1..=5 {
            push(&q, id, MessageType::Info).unwrap();
        }
        assert_eq!(ids(&q.drain_priority_batch()), vec![1, 2]);
        assert!(SmartQueue::new(QueueKey::default_for("x"), QueueSettings::plain(1, 0), c.clone())
            .drain_priority_batch()
            .is_empty());
    }

    #[test]
    fn emergency_cleanup_keeps_critical_and_frees_at_least_one() {
        let c = clock();
        let q = queue(QueueSettings::plain(4, 60_000), &c);
        push(&q, 1, MessageType::Critical).unwrap();
        push(&q, 2, MessageType::Info).unwrap();
        push(&q, 3, MessageType::Debug).unwrap();
        push(&q, 4, MessageType::Warn).unwrap();
        assert_eq!(q.emergency_cleanup(), 2);
        assert_eq!(q.size(), 2);
        assert!(q.contains(MessageId(1)));
        assert!(q.contains(MessageId(4)));

        // already at half: still releases one
        assert_eq!(q.emergency_cleanup(), 1);
        assert_eq!(q.emergency_cleanup(), 0);
    }

    #[test]
    fn extend_preservation_moves_active_deadlines_only() {
        let c = clock();
        let q = queue(QueueSettings::plain(4, 0), &c);
        push(&q, 1, MessageType::Info).unwrap();
        push(&q, 2, MessageType::Info).unwrap();
        q.preserve_top(1, 1_000);
        assert_eq!(q.extend_preservation(5_000), 1);
        c.advance_millis(3_000);
        assert!(q.is_preserved(MessageId(1)));
        assert!(!q.is_preserved(MessageId(2)));
    }

    #[test]
    fn preservation_deadlines_saturate() {
        let c = clock();
        let q = queue(QueueSettings::plain(4, 0), &c);
        push(&q, 1, MessageType::Info).unwrap();
        assert_eq!(q.preserve_top(1, u64::MAX), 1);
        c.advance_millis(1_000_000_000);
        assert!(q.is_preserved(MessageId(1)));

        let short = queue(QueueSettings::plain(4, 0), &c);
        push(&short, 3, MessageType::Info).unwrap();
        short.preserve_top(1, 1_000);
        assert_eq!(short.extend_preservation(i64::MAX as u64), 1);
        assert_eq!(short.extend_preservation(u64::MAX), 1);
        assert!(short.is_preserved(MessageId(3)));

        let auto = queue(QueueSettings::plain(4, u64::MAX), &c);
        push(&auto, 4, MessageType::Critical).unwrap();
        assert!(auto.is_preserved(MessageId(4)));
    }

    #[test]
    fn persistence_drain_scan_is_bounded() {
        let c = clock();
        let q = queue(QueueSettings::plain(500, 0), &c);
        let ctx = Context::new("app");
        for id in 1..=200 {
            let d = decision(MessageType::Info, PersistenceAction::QueueOnly);
            q.enqueue(msg(id, MessageType::Info), d, &ctx).unwrap();
        }
        push(&q, 1_000, MessageType::Debug).unwrap();

        let first = q.drain_for_persistence(1, &ctx, &KeepQueued);
        assert!(first.persisted.is_empty());
        assert_eq!(first.retained, 1 + PERSISTENCE_SCAN_SLACK);
        assert_eq!(q.size(), 201);

        let all = q.drain_for_persistence(500, &ctx, &KeepQueued);
        assert_eq!(ids(&all.persisted), vec![1_000]);
        assert_eq!(all.retained, 200);
    }

    #[test]
    fn shrink_capacity_evicts_and_stops_at_preserved() {
        let c = clock();
        let q = queue(QueueSettings::plain(4, 60_000), &c);
        push(&q, 1, MessageType::Critical).unwrap();
        push(&q, 2, MessageType::Critical).unwrap();
        push(&q, 3, MessageType::Info).unwrap();
        push(&q, 4, MessageType::Info).unwrap();
        assert_eq!(q.set_capacity(3), 3);
        assert_eq!(q.size(), 3);
        assert_eq!(q.set_capacity(1), 2);
        assert_eq!(q.capacity(), 2);
        assert!(q.size() <= q.capacity());
    }

    #[test]
    fn wait_for_messages_times_out_then_wakes() {
        let c = clock();
        let q = Arc::new(queue(QueueSettings::plain(4, 0), &c));
        assert!(!q.wait_for_messages(Duration::from_millis(20)));

        let producer = {
            let q = Arc::clone(&q);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                push(&q, 1, MessageType::Info).unwrap();
            })
        };
        assert!(q.wait_for_messages(Duration::from_secs(5)));
        producer.join().unwrap();
    }

    #[test]
    fn transfer_moves_only_what_the_peer_admits() {
        let c = clock();
        let a = queue(QueueSettings::plain(4, 60_000), &c);
        let b = SmartQueue::new(
            QueueKey::new("app", "spill"),
            QueueSettings::plain(1, 0),
            c.clone(),
        );
        push(&a, 1, MessageType::Critical).unwrap();
        push(&a, 2, MessageType::Info).unwrap();
        push(&a, 3, MessageType::Debug).unwrap();

        assert_eq!(a.transfer_to(&b, 5), 1);
        assert!(b.contains(MessageId(3)));
        assert!(a.contains(MessageId(2)), "entry the peer could not take stays put");
        assert!(a.contains(MessageId(1)));
        assert_eq!(a.size() + b.size(), 3);

        assert!(a.stats().is_balanced());
        assert!(b.stats().is_balanced());
        assert_eq!(a.stats().transferred_out, 1);
        assert_eq!(b.stats().transferred_in, 1);

        assert_eq!(b.transfer_to(&a, 0), 0);
        assert_eq!(a.transfer_to(&a, 5), 0);
    }

    #[test]
    fn duplicate_ids_are_refused() {
        let c = clock();
        let q = queue(QueueSettings::plain(4, 0), &c);
        push(&q, 1, MessageType::Info).unwrap();
        assert!(matches!(
            push(&q, 1, MessageType::Info),
            Err(QueueError::Duplicate { .. })
        ));
    }

    #[test]
    fn stats_track_latency_and_peaks() {
        let c = clock();
        let q = queue(QueueSettings::plain(4, 0), &c);
        push(&q, 1, MessageType::Info).unwrap();
        push(&q, 2, MessageType::Info).unwrap();
        c.advance_millis(40);
        q.drain_batch(2);
        let stats = q.stats();
        assert_eq!(stats.peak_size, 2);
        assert_eq!(stats.drained, 2);
        assert_eq!(stats.avg_latency_ms, 40.0);
        assert!(stats.is_balanced());
    }

    #[test]
    fn queue_error_maps_to_queue_full() {
        let err: Error = QueueError::Full {
            queue: "app/default".into(),
            capacity: 3,
        }
        .into();
        assert_eq!(err.code(), 20);
    }
}
