//! Trigger state machine with time-to-trigger and hysteresis

use crate::measurement::params::EventType;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerState {
    #[default]
    Idle,
    Approaching,
    Triggered,
    Hysteresis,
}

impl TriggerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerState::Idle => "idle",
            TriggerState::Approaching => "approaching",
            TriggerState::Triggered => "triggered",
            TriggerState::Hysteresis => "hysteresis",
        }
    }
}

/// Pure transition function.
///
/// `dwell_ms` is how long the entering condition has held continuously.
pub fn next_state(
    state: TriggerState,
    entering: bool,
    leaving: bool,
    dwell_ms: i64,
    time_to_trigger_ms: u32,
) -> TriggerState {
    use TriggerState::*;
    match state {
        Idle if entering && time_to_trigger_ms == 0 => Triggered,
        Idle if entering => Approaching,
        Idle => Idle,
        Approaching if !entering => Idle,
        Approaching if dwell_ms >= i64::from(time_to_trigger_ms) => Triggered,
        Approaching => Approaching,
        Triggered if leaving => Idle,
        Triggered if !entering => Hysteresis,
        Triggered => Triggered,
        Hysteresis if leaving => Idle,
        Hysteresis if entering => Triggered,
        Hysteresis => Hysteresis,
    }
}

/// Per-UE trigger progress for one event type
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriggerTracker {
    pub state: TriggerState,
    /// When the entering condition started holding
    pub entering_since: Option<DateTime<Utc>>,
    pub last_step: Option<DateTime<Utc>>,
}

impl TriggerTracker {
    pub fn step(
        &mut self,
        at: DateTime<Utc>,
        entering: bool,
        leaving: bool,
        time_to_trigger_ms: u32,
    ) -> TriggerState {
        if entering {
            self.entering_since.get_or_insert(at);
        } else {
            self.entering_since = None;
        }
        self.last_step = Some(at);
        let dwell_ms = self
            .entering_since
            .map(|since| (at - since).num_milliseconds())
            .unwrap_or(0);
        self.state = next_state(self.state, entering, leaving, dwell_ms, time_to_trigger_ms);
        self.state
    }
}

/// Key of a UE for trigger bookkeeping, stable to about a centimetre
pub fn ue_key(latitude: f64, longitude: f64, altitude_km: f64) -> String {
    format!("{:.7}:{:.7}:{:.5}", latitude, longitude, altitude_km)
}

#[derive(Debug, Default)]
pub struct TriggerStateMap {
    trackers: HashMap<(EventType, String), TriggerTracker>,
}

impl TriggerStateMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(
        &mut self,
        event_type: EventType,
        ue_key: &str,
        at: DateTime<Utc>,
        entering: bool,
        leaving: bool,
        time_to_trigger_ms: u32,
    ) -> TriggerState {
        self.trackers
            .entry((event_type, ue_key.to_string()))
            .or_default()
            .step(at, entering, leaving, time_to_trigger_ms)
    }

    pub fn state(&self, event_type: EventType, ue_key: &str) -> TriggerState {
        self.trackers
            .get(&(event_type, ue_key.to_string()))
            .map(|t| t.state)
            .unwrap_or_default()
    }

    /// Drop trackers not stepped within `max_idle` of `now`
    pub fn prune(&mut self, now: DateTime<Utc>, max_idle: Duration) -> usize {
        let before = self.trackers.len();
        self.trackers.retain(|_, t| {
            t.last_step
                .is_some_and(|last| (now - last).abs() <= max_idle)
        });
        before - self.trackers.len()
    }

    pub fn len(&self) -> usize {
        self.trackers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty()
    }

    pub fn reset(&mut self) {
        self.trackers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::events::a4_absolute;
    use chrono::TimeZone;
    use TriggerState::*;

    #[test]
    fn test_transitions() {
        assert_eq!(next_state(Idle, true, false, 0, 0), Triggered);
        assert_eq!(next_state(Idle, true, false, 0, 160), Approaching);
        assert_eq!(next_state(Idle, false, true, 0, 160), Idle);
        assert_eq!(next_state(Approaching, true, false, 100, 160), Approaching);
        assert_eq!(next_state(Approaching, true, false, 160, 160), Triggered);
        assert_eq!(next_state(Approaching, false, false, 500, 160), Idle);
        assert_eq!(next_state(Triggered, true, false, 0, 160), Triggered);
        assert_eq!(next_state(Triggered, false, false, 0, 160), Hysteresis);
        assert_eq!(next_state(Triggered, false, true, 0, 160), Idle);
        assert_eq!(next_state(Hysteresis, true, false, 0, 160), Triggered);
        assert_eq!(next_state(Hysteresis, false, true, 0, 160), Idle);
        assert_eq!(next_state(Hysteresis, false, false, 0, 160), Hysteresis);
    }

    #[test]
    fn test_tracker_dwell() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut tracker = TriggerTracker::default();
        assert_eq!(tracker.step(t0, true, false, 160), Approaching);
        assert_eq!(
            tracker.step(t0 + Duration::milliseconds(100), true, false, 160),
            Approaching
        );
        assert_eq!(
            tracker.step(t0 + Duration::milliseconds(200), true, false, 160),
            Triggered
        );
        assert_eq!(
            tracker.step(t0 + Duration::milliseconds(300), false, false, 160),
            Hysteresis
        );
        assert_eq!(tracker.entering_since, None);
    }

    #[test]
    fn test_signal_inside_hysteresis_band_does_not_oscillate() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let (threshold, hys) = (-80.0, 3.0);
        let mut tracker = TriggerTracker::default();
        let (entering, leaving) = a4_absolute(-75.0, threshold, hys);
        assert_eq!(tracker.step(t0, entering, leaving, 0), Triggered);

        // RSRP wobbles around the threshold by less than the hysteresis
        let mut states = Vec::new();
        for (i, rsrp) in [-78.0, -82.0, -79.5, -82.9, -77.5, -80.0].iter().enumerate() {
            let at = t0 + Duration::seconds(i as i64 + 1);
            let (entering, leaving) = a4_absolute(*rsrp, threshold, hys);
            states.push(tracker.step(at, entering, leaving, 0));
        }
        assert!(states.iter().all(|s| *s == Hysteresis), "{:?}", states);

        let (entering, leaving) = a4_absolute(-84.0, threshold, hys);
        assert_eq!(
            tracker.step(t0 + Duration::seconds(10), entering, leaving, 0),
            Idle
        );
    }

    #[test]
    fn test_state_map_keys() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut map = TriggerStateMap::new();
        let ue = ue_key(24.9564, 121.3717, 0.1);
        map.step(EventType::A4, &ue, t0, true, false, 0);
        assert_eq!(map.state(EventType::A4, &ue), Triggered);
        assert_eq!(map.state(EventType::D2, &ue), Idle);
        map.reset();
        assert_eq!(map.state(EventType::A4, &ue), Idle);
    }

    #[test]
    fn test_prune_drops_stale_trackers() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut map = TriggerStateMap::new();
        let old = ue_key(24.9564, 121.3717, 0.1);
        let recent = ue_key(25.0478, 121.5319, 0.0);
        map.step(EventType::A4, &old, t0, true, false, 0);
        map.step(EventType::D2, &recent, t0 + Duration::minutes(9), false, false, 160);
        assert_eq!(map.len(), 2);

        assert_eq!(map.prune(t0 + Duration::minutes(12), Duration::minutes(10)), 1);
        assert_eq!(map.len(), 1);
        assert_eq!(map.state(EventType::A4, &old), Idle);
        assert_eq!(map.state(EventType::D2, &recent), Idle);

        assert_eq!(map.prune(t0 + Duration::minutes(30), Duration::minutes(10)), 1);
        assert!(map.is_empty());
    }
}
