//! Interval timers for the monitor's periodic activities, with failure
//! backoff.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use sieve_common::Timestamp;
use sieve_config::settings::MonitorSettings;
use tracing::{info, warn};

use crate::logging::event_names;

/// Consecutive failures after which an activity backs off.
pub const BACKOFF_AFTER_FAILURES: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activity {
    Collection,
    Health,
    Adaptation,
}

impl Activity {
    pub const ALL: [Activity; 3] = [Activity::Collection, Activity::Health, Activity::Adaptation];

    pub fn as_str(self) -> &'static str {
        match self {
            Activity::Collection => "collection",
            Activity::Health => "health",
            Activity::Adaptation => "adaptation",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityTimer {
    pub activity: Activity,
    pub interval_ms: u64,
    pub backoff_multiplier: u32,
    /// `None` until the first run; the activity is due immediately.
    pub next_due: Option<Timestamp>,
    pub consecutive_failures: u32,
    pub total_failures: u64,
    pub runs: u64,
}

impl ActivityTimer {
    pub fn new(activity: Activity, interval_seconds: u64, backoff_multiplier: u32) -> Self {
        Self {
            activity,
            interval_ms: interval_seconds.max(1).saturating_mul(1_000),
            backoff_multiplier: backoff_multiplier.max(1),
            next_due: None,
            consecutive_failures: 0,
            total_failures: 0,
            runs: 0,
        }
    }

    pub fn is_backed_off(&self) -> bool {
        self.consecutive_failures >= BACKOFF_AFTER_FAILURES
    }

    pub fn current_interval_ms(&self) -> u64 {
        if self.is_backed_off() {
            self.interval_ms
                .saturating_mul(u64::from(self.backoff_multiplier))
        } else {
            self.interval_ms
        }
    }

    pub fn due(&self, now: Timestamp) -> bool {
        self.next_due.map_or(true, |at| now >= at)
    }

    fn reschedule(&mut self, now: Timestamp) {
        self.runs += 1;
        let next = now.as_millis().saturating_add(self.current_interval_ms() as i64);
        self.next_due = Some(Timestamp::from_millis(next));
    }

    /// Returns true if this success ended a failure streak.
    pub fn record_success(&mut self, now: Timestamp) -> bool {
        let recovered = self.consecutive_failures > 0;
        if recovered {
            info!(
                target: event_names::COLLECTION_RECOVERED,
                activity = self.activity.as_str(),
                failures = self.consecutive_failures,
                "monitor activity recovered"
            );
        }
        self.consecutive_failures = 0;
        self.reschedule(now);
        recovered
    }

    /// Logged only on the first failure of a streak.
    pub fn record_failure(&mut self, now: Timestamp, error: &str) {
        self.consecutive_failures += 1;
        self.total_failures += 1;
        if self.consecutive_failures == 1 {
            warn!(
                target: event_names::COLLECTION_FAILED,
                activity = self.activity.as_str(),
                error = error,
                "monitor activity failed"
            );
        }
        self.reschedule(now);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub collection: ActivityTimer,
    pub health: ActivityTimer,
    pub adaptation: ActivityTimer,
}

impl Schedule {
    pub fn from_settings(settings: &MonitorSettings) -> Self {
        let m = settings.backoff_multiplier;
        Self {
            collection: ActivityTimer::new(
                Activity::Collection,
                settings.collection_interval_seconds,
                m,
            ),
            health: ActivityTimer::new(Activity::Health, settings.health_interval_seconds, m),
            adaptation: ActivityTimer::new(
                Activity::Adaptation,
                settings.adaptation_interval_seconds,
                m,
            ),
        }
    }

    pub fn timer(&self, activity: Activity) -> &ActivityTimer {
        match activity {
            Activity::Collection => &self.collection,
            Activity::Health => &self.health,
            Activity::Adaptation => &self.adaptation,
        }
    }

    pub fn timer_mut(&mut self, activity: Activity) -> &mut ActivityTimer {
        match activity {
            Activity::Collection => &mut self.collection,
            Activity::Health => &mut self.health,
            Activity::Adaptation => &mut self.adaptation,
        }
    }

    pub fn due(&self, now: Timestamp) -> Vec<Activity> {
        Activity::ALL
            .into_iter()
            .filter(|a| self.timer(*a).due(now))
            .collect()
    }

    /// Time until the earliest activity is due.
    pub fn next_wakeup(&self, now: Timestamp) -> Duration {
        Activity::ALL
            .iter()
            .map(|a| match self.timer(*a).next_due {
                None => 0,
                Some(at) => now.millis_until(at),
            })
            .min()
            .map(Duration::from_millis)
            .unwrap_or_default()
    }
}
