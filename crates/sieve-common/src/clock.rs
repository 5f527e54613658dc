//! Time and process-identity sources.
//!
//! Every component that reads wall time takes a [`SharedClock`] so tests can
//! substitute a [`ManualClock`].

use crate::message::Timestamp;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> Timestamp;

    fn now_millis(&self) -> i64 {
        self.now().as_millis()
    }
}

pub type SharedClock = Arc<dyn Clock>;

/// Wall clock backed by `SystemTime`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl SystemClock {
    pub fn shared() -> SharedClock {
        Arc::new(SystemClock)
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as i64)
            .unwrap_or(0);
        Timestamp::from_micros(micros)
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    micros: AtomicI64,
}

impl ManualClock {
    pub fn new(start_millis: i64) -> Self {
        Self {
            micros: AtomicI64::new(start_millis.saturating_mul(1_000)),
        }
    }

    pub fn shared(start_millis: i64) -> Arc<Self> {
        Arc::new(Self::new(start_millis))
    }

    pub fn advance(&self, by: Duration) {
        self.micros
            .fetch_add(by.as_micros() as i64, Ordering::SeqCst);
    }

    pub fn advance_millis(&self, ms: i64) {
        self.micros.fetch_add(ms.saturating_mul(1_000), Ordering::SeqCst);
    }

    pub fn set_millis(&self, ms: i64) {
        self.micros.store(ms.saturating_mul(1_000), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_micros(self.micros.load(Ordering::SeqCst))
    }
}

/// Process and thread identity of the calling producer.
pub trait ProcessInfo: Send + Sync {
    fn process_id(&self) -> u32;
    fn thread_id(&self) -> u32;
}

/// Platform implementation.
///
/// Thread ids are small integers assigned on a thread's first call, stable
/// for the thread's lifetime.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsProcessInfo;

static NEXT_THREAD_ID: AtomicU32 = AtomicU32::new(1);

thread_local! {
    static THREAD_ID: u32 = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
}

impl ProcessInfo for OsProcessInfo {
    fn process_id(&self) -> u32 {
        std::process::id()
    }

    fn thread_id(&self) -> u32 {
        THREAD_ID.with(|id| *id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_moves_only_on_request() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.now_millis(), 1_000);
        clock.advance(Duration::from_millis(250));
        assert_eq!(clock.now_millis(), 1_250);
        clock.set_millis(10);
        assert_eq!(clock.now_millis(), 10);
    }

    #[test]
    fn system_clock_is_after_2020() {
        assert!(SystemClock.now().seconds > 1_577_836_800);
    }

    #[test]
    fn thread_ids_differ_between_threads() {
        let info = OsProcessInfo;
        let here = info.thread_id();
        assert_eq!(here, info.thread_id());
        let there = std::thread::spawn(move || OsProcessInfo.thread_id())
            .join()
            .unwrap();
        assert_ne!(here, there);
        assert_eq!(info.process_id(), std::process::id());
    }
}
