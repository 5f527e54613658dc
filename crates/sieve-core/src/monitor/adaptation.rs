//! Turning snapshots into adaptation signals.
//!
//! Every decision here is edge-triggered: a signal is issued when a band or
//! target changes, never on every evaluation. Emergency uses separate entry
//! and exit thresholds plus a minimum dwell time so it cannot flap.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use sieve_common::Timestamp;
use sieve_config::settings::{Band, EmergencySettings, QueueSettings};
use sieve_math::interpolate_size;

use super::analysis::Predictions;
use super::collector::SystemSnapshot;
use crate::signals::{AdaptationSignal, SignalKind, SignalTarget};

/// Points a value must fall below a band edge before the level drops.
pub const BAND_HYSTERESIS: f64 = 5.0;

/// Relative change in a size target that is worth a signal.
pub const RESIZE_FRACTION: f64 = 0.10;

/// Band level with a downward margin: rising uses the plain edges, falling
/// needs the value to clear the edge by [`BAND_HYSTERESIS`].
pub fn level_with_hysteresis(band: &Band, value: f64, current: u8) -> u8 {
    let rising = band.level(value);
    if rising >= current {
        return rising;
    }
    band.level(value + BAND_HYSTERESIS).min(current)
}

fn differs_enough(from: usize, to: usize) -> bool {
    if from == 0 {
        return to != 0;
    }
    (to as f64 - from as f64).abs() / from as f64 >= RESIZE_FRACTION
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdaptationState {
    pub emergency: bool,
    pub emergency_since: Option<Timestamp>,
    pub error_level: u8,
    pub predicted_breach: bool,
    pub queue_target: Option<usize>,
    pub batch_target: Option<usize>,
}

#[derive(Debug)]
pub struct AdaptationEngine {
    emergency: EmergencySettings,
    error_band: Band,
    sizing: QueueSettings,
    horizon_seconds: f64,
    state: Mutex<AdaptationState>,
}

impl AdaptationEngine {
    pub fn new(
        emergency: EmergencySettings,
        error_band: Band,
        sizing: QueueSettings,
        horizon_seconds: u64,
    ) -> Self {
        Self {
            emergency,
            error_band,
            sizing,
            horizon_seconds: horizon_seconds as f64,
            state: Mutex::new(AdaptationState::default()),
        }
    }

    pub fn state(&self) -> AdaptationState {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Note an emergency entered or left outside this engine.
    pub fn sync_emergency(&self, active: bool, now: Timestamp) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.emergency != active {
            state.emergency = active;
            state.emergency_since = active.then_some(now);
        }
    }

    pub fn evaluate(
        &self,
        snapshot: &SystemSnapshot,
        predictions: &Predictions,
        now: Timestamp,
    ) -> Vec<AdaptationSignal> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let mut signals = Vec::new();
        let stress = snapshot.stress;

        // Emergency hysteresis.
        if !state.emergency && stress >= self.emergency.entry_threshold {
            state.emergency = true;
            state.emergency_since = Some(now);
            signals.push(AdaptationSignal::new(
                SignalKind::EnterEmergency,
                self.emergency.min_duration_seconds as f64,
                format!(
                    "stress {:.1} reached entry threshold {:.1}",
                    stress, self.emergency.entry_threshold
                ),
            ));
        } else if state.emergency && stress <= self.emergency.exit_threshold {
            let dwelt = state.emergency_since.map_or(true, |since| {
                since.millis_until(now)
                    >= self.emergency.min_duration_seconds.saturating_mul(1_000)
            });
            if dwelt {
                state.emergency = false;
                state.emergency_since = None;
                signals.push(AdaptationSignal::new(
                    SignalKind::ExitEmergency,
                    0.0,
                    format!(
                        "stress {:.1} at or below exit threshold {:.1}",
                        stress, self.emergency.exit_threshold
                    ),
                ));
            }
        }

        // Predicted breach: shed one level early, undo once it clears.
        let breach = predictions.within(self.horizon_seconds);
        if breach != state.predicted_breach {
            state.predicted_breach = breach;
            let (kind, why) = if breach {
                (
                    SignalKind::RaiseThreshold,
                    format!(
                        "resource exhaustion predicted within {}s",
                        self.horizon_seconds
                    ),
                )
            } else {
                (
                    SignalKind::LowerThreshold,
                    "predicted exhaustion cleared".to_string(),
                )
            };
            signals.push(AdaptationSignal::new(kind, 1.0, why).to(SignalTarget::Persistence));
        }

        // Error-rate bands tune the resolver: keep detail during incidents.
        let error_level =
            level_with_hysteresis(&self.error_band, snapshot.error_rate, state.error_level);
        if error_level != state.error_level {
            let delta = i32::from(error_level) - i32::from(state.error_level);
            let kind = if delta > 0 {
                SignalKind::LowerThreshold
            } else {
                SignalKind::RaiseThreshold
            };
            signals.push(
                AdaptationSignal::new(
                    kind,
                    f64::from(delta.unsigned_abs()),
                    format!(
                        "error rate {:.1}% moved to band level {}",
                        snapshot.error_rate, error_level
                    ),
                )
                .to(SignalTarget::Resolver),
            );
            state.error_level = error_level;
        }

        // Queue and batch sizing follow stress.
        let queue_target = interpolate_size(
            self.sizing.low_load_max_entries,
            self.sizing.high_load_max_entries,
            stress,
        );
        let current_queue = state.queue_target.unwrap_or(self.sizing.max_entries);
        if differs_enough(current_queue, queue_target) {
            let kind = if queue_target < current_queue {
                SignalKind::ShrinkQueue
            } else {
                SignalKind::GrowQueue
            };
            signals.push(
                AdaptationSignal::new(
                    kind,
                    queue_target as f64,
                    format!(
                        "stress {:.1}: queue capacity {} -> {}",
                        stress, current_queue, queue_target
                    ),
                )
                .to(SignalTarget::Queues),
            );
            state.queue_target = Some(queue_target);
        }

        let batch_target = interpolate_size(
            self.sizing.low_load_batch_target,
            self.sizing.high_load_batch_target,
            stress,
        );
        let current_batch = state.batch_target.unwrap_or(self.sizing.batch_target);
        if differs_enough(current_batch, batch_target) {
            let kind = if batch_target < current_batch {
                SignalKind::ShrinkBatch
            } else {
                SignalKind::GrowBatch
            };
            signals.push(
                AdaptationSignal::new(
                    kind,
                    batch_target as f64,
                    format!(
                        "stress {:.1}: batch target {} -> {}",
                        stress, current_batch, batch_target
                    ),
                )
                .to(SignalTarget::Queues),
            );
            state.batch_target = Some(batch_target);
        }

        signals.into_iter().map(|s| s.at(now)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::history::tests::snapshot_at;

    fn engine() -> AdaptationEngine {
        let mut sizing = QueueSettings::default();
        sizing.max_entries = 20_000;
        sizing.batch_target = 200;
        AdaptationEngine::new(EmergencySettings::default(), Band::new(5.0, 20.0), sizing, 300)
    }

    fn stressed(ms: i64, stress: f64) -> SystemSnapshot {
        let mut s = snapshot_at(ms, 0.0);
        s.stress = stress;
        s
    }

    fn kinds(signals: &[AdaptationSignal]) -> Vec<SignalKind> {
        signals.iter().map(|s| s.kind).collect()
    }

    #[test]
    fn hysteresis_band() {
        let band = Band::new(70.0, 90.0);
        assert_eq!(level_with_hysteresis(&band, 75.0, 0), 1);
        assert_eq!(level_with_hysteresis(&band, 68.0, 1), 1);
        assert_eq!(level_with_hysteresis(&band, 64.0, 1), 0);
        assert_eq!(level_with_hysteresis(&band, 91.0, 1), 2);
    }

    #[test]
    fn emergency_enters_and_dwells_before_exit() {
        let e = engine();
        let p = Predictions::default();
        let entered = e.evaluate(&stressed(0, 95.0), &p, Timestamp::from_millis(0));
        let enter = entered
            .iter()
            .find(|s| s.kind == SignalKind::EnterEmergency)
            .unwrap();
        assert_eq!(enter.magnitude, 60.0);

        // Calm but too soon.
        let early = e.evaluate(&stressed(30_000, 10.0), &p, Timestamp::from_millis(30_000));
        assert!(!kinds(&early).contains(&SignalKind::ExitEmergency));

        // Between exit and entry: stay.
        let mid = e.evaluate(&stressed(70_000, 80.0), &p, Timestamp::from_millis(70_000));
        assert!(!kinds(&mid).contains(&SignalKind::ExitEmergency));

        let late = e.evaluate(&stressed(90_000, 10.0), &p, Timestamp::from_millis(90_000));
        assert!(kinds(&late).contains(&SignalKind::ExitEmergency));
        assert!(!e.state().emergency);
    }

    #[test]
    fn prediction_raises_then_lowers_once() {
        let e = engine();
        let breach = Predictions {
            queue_overflow_seconds: Some(30.0),
            memory_exhaustion_seconds: None,
        };
        let first = e.evaluate(&stressed(0, 0.0), &breach, Timestamp::from_millis(0));
        let raise = first
            .iter()
            .find(|s| s.kind == SignalKind::RaiseThreshold)
            .unwrap();
        assert_eq!(raise.target, SignalTarget::Persistence);
        let again = e.evaluate(&stressed(1, 0.0), &breach, Timestamp::from_millis(1));
        assert!(!kinds(&again).contains(&SignalKind::RaiseThreshold));
        let quiet = Predictions::default();
        let cleared = e.evaluate(&stressed(2, 0.0), &quiet, Timestamp::from_millis(2));
        assert!(kinds(&cleared).contains(&SignalKind::LowerThreshold));
    }

    #[test]
    fn error_band_tunes_resolver() {
        let e = engine();
        let mut snap = stressed(0, 0.0);
        snap.error_rate = 25.0;
        let signals = e.evaluate(&snap, &Predictions::default(), Timestamp::from_millis(0));
        let lower = signals
            .iter()
            .find(|s| s.target == SignalTarget::Resolver)
            .unwrap();
        assert_eq!(lower.kind, SignalKind::LowerThreshold);
        assert_eq!(lower.levels(), 2);
    }

    #[test]
    fn sizing_follows_stress_in_steps() {
        let e = engine();
        let quiet = Predictions::default();
        let calm = e.evaluate(&stressed(0, 0.0), &quiet, Timestamp::from_millis(0));
        assert!(calm.is_empty());

        let hot = e.evaluate(&stressed(1, 100.0), &quiet, Timestamp::from_millis(1));
        let shrink = hot.iter().find(|s| s.kind == SignalKind::ShrinkQueue).unwrap();
        assert_eq!(shrink.magnitude, 5_000.0);
        let batch = hot.iter().find(|s| s.kind == SignalKind::ShrinkBatch).unwrap();
        assert_eq!(batch.magnitude, 50.0);

        let steady = e.evaluate(&stressed(2, 99.0), &quiet, Timestamp::from_millis(2));
        assert!(!kinds(&steady).contains(&SignalKind::ShrinkQueue));
    }
}
