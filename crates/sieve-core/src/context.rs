//! Live classification context shared between the monitor and producers.
//!
//! The monitor writes the latest readings after each collection; producers
//! read a `Context` per message without taking a lock.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use sieve_common::Context;

use crate::monitor::SystemSnapshot;

#[derive(Debug)]
struct AtomicF64(AtomicU64);

impl AtomicF64 {
    fn new(v: f64) -> Self {
        Self(AtomicU64::new(v.to_bits()))
    }

    fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    fn store(&self, v: f64) {
        self.0.store(v.to_bits(), Ordering::Relaxed);
    }
}

#[derive(Debug)]
pub struct LiveContext {
    load: AtomicF64,
    error_rate: AtomicF64,
    message_rate: AtomicF64,
    emergency: AtomicBool,
}

impl Default for LiveContext {
    fn default() -> Self {
        Self {
            load: AtomicF64::new(0.0),
            error_rate: AtomicF64::new(0.0),
            message_rate: AtomicF64::new(0.0),
            emergency: AtomicBool::new(false),
        }
    }
}

impl LiveContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update_from(&self, snapshot: &SystemSnapshot) {
        self.load.store(snapshot.stress.clamp(0.0, 100.0));
        self.error_rate.store(snapshot.error_rate.max(0.0));
        self.message_rate.store(snapshot.message_rate.max(0.0));
    }

    pub fn set_load(&self, load: f64) {
        self.load.store(load.clamp(0.0, 100.0));
    }

    pub fn set_error_rate(&self, rate: f64) {
        self.error_rate.store(rate.max(0.0));
    }

    pub fn set_emergency(&self, on: bool) {
        self.emergency.store(on, Ordering::Relaxed);
    }

    pub fn load(&self) -> f64 {
        self.load.load()
    }

    pub fn is_emergency(&self) -> bool {
        self.emergency.load(Ordering::Relaxed)
    }

    /// Current readings for one application.
    pub fn context(&self, application: &str) -> Context {
        Context::new(application)
            .with_load(self.load.load())
            .with_error_rate(self.error_rate.load())
            .with_message_rate(self.message_rate.load())
            .with_emergency(self.is_emergency())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::history::tests::snapshot_at;

    #[test]
    fn snapshot_feeds_context() {
        let live = LiveContext::new();
        let mut snap = snapshot_at(1_000, 50.0);
        snap.stress = 120.0;
        snap.error_rate = 12.5;
        snap.message_rate = 40.0;
        live.update_from(&snap);
        live.set_emergency(true);

        let ctx = live.context("billing");
        assert_eq!(ctx.application, "billing");
        assert_eq!(ctx.system_load, 100.0);
        assert_eq!(ctx.error_rate, 12.5);
        assert_eq!(ctx.message_rate, 40.0);
        assert!(ctx.emergency);
    }

    #[test]
    fn starts_calm() {
        let ctx = LiveContext::new().context("a");
        assert_eq!(ctx, Context::new("a"));
    }
}
