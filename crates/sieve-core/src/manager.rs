//! Queue manager: owns every smart queue and coordinates across them.
//!
//! Queues are keyed by `(application, name)` and created on first use.
//! Cross-queue operations (rebalancing, emergency mode, maintenance) only
//! ever hold one queue lock at a time; the registry lock is released before
//! any queue is touched.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sieve_common::{
    Context, Error, LogMessage, PersistenceDecision, QueueKey, Result, SharedClock, Timestamp,
};
use sieve_config::settings::QueueSettings;
use tracing::{debug, info, warn};

use crate::logging::event_names;
use crate::queue::{
    Admission, PersistenceDrain, QueueEntry, QueueError, QueueStats, Reconsider, SmartQueue,
};
use crate::signals::{AdaptationSignal, SignalKind, SignalSink, SignalTarget};

/// Fill fraction at which maintenance runs emergency cleanup on a queue
/// while the manager is in emergency mode.
const CLEANUP_FILL_FRACTION: f64 = 0.95;

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// One queue's share of a persistence drain.
#[derive(Debug, Clone)]
pub struct DrainedBatch {
    pub queue: QueueKey,
    pub drain: PersistenceDrain,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceReport {
    pub expired: usize,
    pub rebalanced: usize,
    pub cleaned: usize,
    pub emergency_exited: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerStats {
    pub queues: Vec<QueueStats>,
    pub total_size: usize,
    pub total_bytes: usize,
    pub total_capacity: usize,
    pub emergency: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emergency_until: Option<Timestamp>,
    pub queues_created: u64,
    pub queues_removed: u64,
    pub rebalanced_entries: u64,
}

impl ManagerStats {
    pub fn fill_percent(&self) -> f64 {
        if self.total_capacity == 0 {
            0.0
        } else {
            self.total_size as f64 * 100.0 / self.total_capacity as f64
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct EmergencyState {
    active: bool,
    until: Option<Timestamp>,
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

pub struct QueueManager {
    /// Settings for queues created from here on.
    template: RwLock<QueueSettings>,
    clock: SharedClock,
    queues: RwLock<HashMap<QueueKey, Arc<SmartQueue>>>,
    emergency: Mutex<EmergencyState>,
    created: AtomicU64,
    removed: AtomicU64,
    rebalanced: AtomicU64,
}

impl QueueManager {
    pub fn new(template: QueueSettings, clock: SharedClock) -> Self {
        Self {
            template: RwLock::new(template),
            clock,
            queues: RwLock::new(HashMap::new()),
            emergency: Mutex::new(EmergencyState::default()),
            created: AtomicU64::new(0),
            removed: AtomicU64::new(0),
            rebalanced: AtomicU64::new(0),
        }
    }

    pub fn template(&self) -> QueueSettings {
        self.template
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Replace the template and resize existing queues to match.
    pub fn apply_settings(&self, settings: QueueSettings) {
        let (capacity, batch) = (settings.max_entries, settings.batch_target);
        *self.template.write().unwrap_or_else(|e| e.into_inner()) = settings;
        for queue in self.all() {
            queue.set_capacity(capacity);
            queue.set_batch_target(batch);
        }
    }

    fn build(&self, key: QueueKey, settings: QueueSettings) -> Arc<SmartQueue> {
        let queue = Arc::new(SmartQueue::new(key, settings, Arc::clone(&self.clock)));
        queue.set_emergency(self.is_emergency());
        queue
    }

    /// Create a queue with explicit settings. Fails if the key is taken.
    pub fn create_queue(&self, key: QueueKey, settings: QueueSettings) -> Result<Arc<SmartQueue>> {
        let mut queues = self.queues.write().unwrap_or_else(|e| e.into_inner());
        if queues.contains_key(&key) {
            return Err(Error::Configuration(format!("queue {} already exists", key)));
        }
        let queue = self.build(key.clone(), settings);
        queues.insert(key.clone(), Arc::clone(&queue));
        drop(queues);
        self.created.fetch_add(1, Ordering::Relaxed);
        info!(target: event_names::QUEUE_CREATED, queue = %key, "queue created");
        Ok(queue)
    }

    /// The queue for `(application, name)`, created from the template on
    /// first use.
    pub fn get_or_create_for(&self, application: &str, name: &str) -> Arc<SmartQueue> {
        let key = QueueKey::new(application, name);
        if let Some(q) = self.get(&key) {
            return q;
        }
        let mut queues = self.queues.write().unwrap_or_else(|e| e.into_inner());
        if let Some(q) = queues.get(&key) {
            return Arc::clone(q);
        }
        let queue = self.build(key.clone(), self.template());
        queues.insert(key.clone(), Arc::clone(&queue));
        drop(queues);
        self.created.fetch_add(1, Ordering::Relaxed);
        info!(target: event_names::QUEUE_CREATED, queue = %key, "queue created");
        queue
    }

    pub fn get(&self, key: &QueueKey) -> Option<Arc<SmartQueue>> {
        self.queues
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    /// Every queue, in key order.
    pub fn all(&self) -> Vec<Arc<SmartQueue>> {
        let queues = self.queues.read().unwrap_or_else(|e| e.into_inner());
        let mut all: Vec<Arc<SmartQueue>> = queues.values().cloned().collect();
        all.sort_by(|a, b| a.key().to_string().cmp(&b.key().to_string()));
        all
    }

    pub fn keys(&self) -> Vec<QueueKey> {
        self.all().iter().map(|q| q.key().clone()).collect()
    }

    pub fn queues_for(&self, application: &str) -> Vec<Arc<SmartQueue>> {
        self.all()
            .into_iter()
            .filter(|q| q.key().application == application)
            .collect()
    }

    /// Remove a queue, handing back whatever it still held.
    pub fn remove_queue(&self, key: &QueueKey) -> Result<Vec<QueueEntry>> {
        let queue = self
            .queues
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key)
            .ok_or_else(|| Error::not_found("queue", key.to_string()))?;
        let remaining = queue.drain_batch(usize::MAX);
        self.removed.fetch_add(1, Ordering::Relaxed);
        info!(
            target: event_names::QUEUE_REMOVED,
            queue = %key,
            remaining = remaining.len(),
            "queue removed"
        );
        Ok(remaining)
    }

    pub fn remove_application_queues(&self, application: &str) -> Vec<QueueEntry> {
        self.queues_for(application)
            .iter()
            .filter_map(|q| self.remove_queue(q.key()).ok())
            .flatten()
            .collect()
    }

    /// The application's queue with the most free slots, or its default
    /// queue when it has none yet.
    pub fn best_queue_for(&self, application: &str) -> Arc<SmartQueue> {
        self.queues_for(application)
            .into_iter()
            .max_by_key(|q| q.free_slots())
            .unwrap_or_else(|| self.get_or_create_for(application, QueueKey::DEFAULT_NAME))
    }

    fn effective_context(&self, ctx: &Context, application: &str) -> Context {
        let mut ctx = ctx.for_application(application);
        ctx.emergency |= self.is_emergency();
        ctx
    }

    /// Route a message to its application's best queue and enqueue it.
    pub fn distribute(
        &self,
        message: LogMessage,
        decision: PersistenceDecision,
        ctx: &Context,
    ) -> std::result::Result<(QueueKey, Admission), QueueError> {
        let queue = self.best_queue_for(message.application());
        let ctx = self.effective_context(ctx, message.application());
        let admission = queue.enqueue(message, decision, &ctx)?;
        Ok((queue.key().clone(), admission))
    }

    /// Enqueue into a named queue of the message's application.
    pub fn distribute_to(
        &self,
        name: &str,
        message: LogMessage,
        decision: PersistenceDecision,
        ctx: &Context,
    ) -> std::result::Result<(QueueKey, Admission), QueueError> {
        let queue = self.get_or_create_for(message.application(), name);
        let ctx = self.effective_context(ctx, message.application());
        let admission = queue.enqueue(message, decision, &ctx)?;
        Ok((queue.key().clone(), admission))
    }

    /// Persistence drain of every queue, each with the context re-targeted
    /// at its application. Empty results are omitted.
    pub fn drain_all_for_persistence(
        &self,
        max_per_queue: usize,
        ctx: &Context,
        policy: &dyn Reconsider,
    ) -> Vec<DrainedBatch> {
        self.all()
            .into_iter()
            .filter(|q| !q.is_empty())
            .map(|q| {
                let ctx = self.effective_context(ctx, &q.key().application);
                DrainedBatch {
                    queue: q.key().clone(),
                    drain: q.drain_for_persistence(max_per_queue, &ctx, policy),
                }
            })
            .filter(|b| !b.drain.persisted.is_empty() || b.drain.dropped > 0)
            .collect()
    }

    /// Top-decile entries across all queues, at most `max` in total.
    /// Queues holding the highest head priority are visited first.
    pub fn drain_priority_messages(&self, max: usize) -> Vec<QueueEntry> {
        let mut queues: Vec<(u32, Arc<SmartQueue>)> = self
            .all()
            .into_iter()
            .filter_map(|q| q.peek_top(1).first().map(|e| e.priority).map(|p| (p, q)))
            .collect();
        queues.sort_by(|a, b| b.0.cmp(&a.0));

        let mut out = Vec::new();
        for (_, queue) in queues {
            let remaining = max.saturating_sub(out.len());
            if remaining == 0 {
                break;
            }
            out.extend(queue.drain_priority_upto(remaining.min(queue.batch_target())));
        }
        out
    }

    pub fn preserve_priority_messages(&self, n_per_queue: usize, duration_ms: u64) -> usize {
        self.all()
            .iter()
            .map(|q| q.preserve_top(n_per_queue, duration_ms))
            .sum()
    }

    // -----------------------------------------------------------------------
    // Emergency mode
    // -----------------------------------------------------------------------

    pub fn is_emergency(&self) -> bool {
        self.emergency
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .active
    }

    pub fn emergency_until(&self) -> Option<Timestamp> {
        self.emergency
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .until
    }

    /// Enter emergency for at least `duration`. Re-entering only ever
    /// extends the deadline. Returns true on the transition into emergency.
    pub fn enter_emergency(&self, duration: Duration) -> bool {
        let now = self.clock.now();
        let until = Timestamp::from_millis(
            now.as_millis()
                .saturating_add(i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)),
        );
        let entered = {
            let mut state = self.emergency.lock().unwrap_or_else(|e| e.into_inner());
            let entered = !state.active;
            state.active = true;
            state.until = Some(state.until.map_or(until, |u| u.max(until)));
            entered
        };
        for queue in self.all() {
            queue.set_emergency(true);
        }
        if entered {
            warn!(
                target: event_names::EMERGENCY_ENTERED,
                duration_secs = duration.as_secs(),
                "queues entering emergency mode"
            );
        }
        entered
    }

    pub fn exit_emergency(&self) -> bool {
        let exited = {
            let mut state = self.emergency.lock().unwrap_or_else(|e| e.into_inner());
            let was = state.active;
            *state = EmergencyState::default();
            was
        };
        for queue in self.all() {
            queue.set_emergency(false);
        }
        if exited {
            info!(target: event_names::EMERGENCY_EXITED, "queues leaving emergency mode");
        }
        exited
    }

    /// Leave emergency once its deadline has passed.
    pub fn tick(&self) -> bool {
        let now = self.clock.now();
        let due = {
            let state = self.emergency.lock().unwrap_or_else(|e| e.into_inner());
            state.active && state.until.is_some_and(|u| u <= now)
        };
        due && self.exit_emergency()
    }

    // -----------------------------------------------------------------------
    // Maintenance
    // -----------------------------------------------------------------------

    /// Move entries from queues filled above `threshold_percent` to peers of
    /// the same application below it. Preserved entries stay put.
    /// Returns the number of entries moved.
    pub fn rebalance(&self, threshold_percent: f64) -> usize {
        let threshold = threshold_percent.clamp(0.0, 100.0) / 100.0;
        let mut by_app: BTreeMap<String, Vec<Arc<SmartQueue>>> = BTreeMap::new();
        for queue in self.all() {
            by_app
                .entry(queue.key().application.clone())
                .or_default()
                .push(queue);
        }

        let limit = |q: &SmartQueue| (q.capacity() as f64 * threshold).floor() as usize;
        let mut moved_total = 0;
        for (application, queues) in by_app {
            if queues.len() < 2 {
                continue;
            }
            for source in queues.iter().filter(|q| q.fill_fraction() > threshold) {
                for peer in queues.iter().filter(|q| !Arc::ptr_eq(q, source)) {
                    let excess = source.size().saturating_sub(limit(source));
                    let room = limit(peer).saturating_sub(peer.size());
                    let n = excess.min(room);
                    if n == 0 {
                        continue;
                    }
                    let moved = source.transfer_to(peer, n);
                    moved_total += moved;
                    if moved > 0 {
                        debug!(
                            target: event_names::QUEUE_REBALANCED,
                            application = %application,
                            from = %source.key(),
                            to = %peer.key(),
                            moved,
                            "entries moved"
                        );
                    }
                }
            }
        }
        self.rebalanced
            .fetch_add(moved_total as u64, Ordering::Relaxed);
        moved_total
    }

    pub fn emergency_cleanup_all(&self) -> usize {
        self.all().iter().map(|q| q.emergency_cleanup()).sum()
    }

    pub fn purge_expired_all(&self) -> usize {
        self.all().iter().map(|q| q.purge_expired()).sum()
    }

    /// Periodic upkeep: emergency deadline, TTL sweep, rebalancing, and
    /// cleanup of nearly-full queues while in emergency.
    pub fn perform_maintenance(&self) -> MaintenanceReport {
        let emergency_exited = self.tick();
        let expired = self.purge_expired_all();
        let rebalanced = self.rebalance(self.template().rebalance_threshold_percent);
        let cleaned = if self.is_emergency() {
            self.all()
                .iter()
                .filter(|q| q.fill_fraction() >= CLEANUP_FILL_FRACTION)
                .map(|q| q.emergency_cleanup())
                .sum()
        } else {
            0
        };
        MaintenanceReport {
            expired,
            rebalanced,
            cleaned,
            emergency_exited,
        }
    }

    // -----------------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------------

    pub fn total_size(&self) -> usize {
        self.all().iter().map(|q| q.size()).sum()
    }

    /// Aggregate fill across all queues, 0-100.
    pub fn queue_fill_percent(&self) -> f64 {
        let queues = self.all();
        let capacity: usize = queues.iter().map(|q| q.capacity()).sum();
        if capacity == 0 {
            return 0.0;
        }
        queues.iter().map(|q| q.size()).sum::<usize>() as f64 * 100.0 / capacity as f64
    }

    /// Per-queue fill fractions keyed by queue.
    pub fn fill_fractions(&self) -> BTreeMap<String, f64> {
        self.all()
            .iter()
            .map(|q| (q.key().to_string(), q.fill_fraction()))
            .collect()
    }

    pub fn stats(&self) -> ManagerStats {
        let queues: Vec<QueueStats> = self.all().iter().map(|q| q.stats()).collect();
        let state = *self.emergency.lock().unwrap_or_else(|e| e.into_inner());
        ManagerStats {
            total_size: queues.iter().map(|s| s.size).sum(),
            total_bytes: queues.iter().map(|s| s.bytes).sum(),
            total_capacity: queues.iter().map(|s| s.capacity).sum(),
            queues,
            emergency: state.active,
            emergency_until: state.until,
            queues_created: self.created.load(Ordering::Relaxed),
            queues_removed: self.removed.load(Ordering::Relaxed),
            rebalanced_entries: self.rebalanced.load(Ordering::Relaxed),
        }
    }
}

impl SignalSink for QueueManager {
    fn name(&self) -> &'static str {
        "queues"
    }

    /// Queue and batch signals carry the new absolute size.
    fn apply_signal(&self, signal: &AdaptationSignal) -> bool {
        if !signal.is_for(SignalTarget::Queues) {
            return false;
        }
        let size = signal.magnitude.max(1.0).round() as usize;
        match signal.kind {
            SignalKind::ShrinkQueue | SignalKind::GrowQueue => {
                let mut changed = false;
                {
                    let mut template = self.template.write().unwrap_or_else(|e| e.into_inner());
                    if template.max_entries != size {
                        template.max_entries = size;
                        changed = true;
                    }
                }
                for queue in self.all() {
                    let before = queue.capacity();
                    if queue.set_capacity(size) != before {
                        changed = true;
                    }
                }
                changed
            }
            SignalKind::ShrinkBatch | SignalKind::GrowBatch => {
                let mut changed = false;
                {
                    let mut template = self.template.write().unwrap_or_else(|e| e.into_inner());
                    if template.batch_target != size {
                        template.batch_target = size;
                        changed = true;
                    }
                }
                for queue in self.all() {
                    if queue.batch_target() != size {
                        queue.set_batch_target(size);
                        changed = true;
                    }
                }
                changed
            }
            SignalKind::EnterEmergency => {
                let secs = signal.magnitude.max(0.0) as u64;
                self.enter_emergency(Duration::from_secs(secs))
            }
            SignalKind::ExitEmergency => self.exit_emergency(),
            SignalKind::RaiseThreshold | SignalKind::LowerThreshold => false,
        }
    }
}
