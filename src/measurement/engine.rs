//! Measurement engine facade

use crate::config::{BroadcastConfig, CompensationConfig};
use crate::measurement::MeasurementError;
use crate::measurement::broadcast::{BroadcastContext, BroadcastManager};
use crate::measurement::compensation::CompensationCalculator;
use crate::measurement::events::{EventEvaluation, EventInputs};
use crate::measurement::params::{ConfigError, EventParameters, EventType};
use crate::measurement::trigger::{TriggerState, TriggerStateMap, ue_key};
use crate::orbital::{OrbitEngine, Position, RadioConfig};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Trigger state for a UE not evaluated within this window is forgotten
pub const TRIGGER_STATE_TTL_MINUTES: i64 = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementResult {
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub trigger_state: TriggerState,
    pub trigger_condition_met: bool,
    pub measurement_values: BTreeMap<String, f64>,
    pub trigger_details: serde_json::Value,
}

impl MeasurementResult {
    pub(crate) fn from_evaluation(
        event_type: EventType,
        timestamp: DateTime<Utc>,
        trigger_state: TriggerState,
        eval: EventEvaluation,
    ) -> Self {
        Self {
            event_type,
            timestamp,
            trigger_state,
            trigger_condition_met: eval.condition_met,
            measurement_values: eval.measurement_values,
            trigger_details: eval.details,
        }
    }
}

pub(crate) fn check_params(
    event_type: EventType,
    params: &EventParameters,
) -> Result<(), MeasurementError> {
    params.validate()?;
    if params.event_type() != event_type {
        return Err(ConfigError::EventMismatch {
            expected: event_type,
            actual: params.event_type(),
        }
        .into());
    }
    Ok(())
}

pub struct MeasurementEngine {
    engine: Arc<OrbitEngine>,
    broadcast: Arc<BroadcastManager>,
    radio: RadioConfig,
    compensation: CompensationCalculator,
    triggers: Mutex<TriggerStateMap>,
}

impl MeasurementEngine {
    pub fn new(
        engine: Arc<OrbitEngine>,
        radio: RadioConfig,
        compensation: CompensationConfig,
        broadcast: BroadcastConfig,
    ) -> Self {
        Self {
            broadcast: Arc::new(BroadcastManager::new(Arc::clone(&engine), broadcast)),
            engine,
            radio,
            compensation: CompensationCalculator::new(compensation),
            triggers: Mutex::new(TriggerStateMap::new()),
        }
    }

    pub fn orbit_engine(&self) -> &Arc<OrbitEngine> {
        &self.engine
    }

    pub fn broadcast(&self) -> &Arc<BroadcastManager> {
        &self.broadcast
    }

    pub(crate) fn inputs<'a>(&'a self, context: &'a BroadcastContext) -> EventInputs<'a> {
        EventInputs {
            engine: &self.engine,
            radio: &self.radio,
            compensation: &self.compensation,
            context,
        }
    }

    /// Drop compensation entries past their TTL relative to `at`
    pub(crate) fn purge_expired(&self, at: DateTime<Utc>) {
        self.compensation.purge(at);
    }

    pub fn cached_compensations(&self) -> usize {
        self.compensation.cached()
    }

    pub fn tracked_triggers(&self) -> usize {
        self.triggers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Evaluate one event for a UE at `at` against the current broadcast context.
    ///
    /// Trigger progress is kept per (event type, UE position) across calls.
    pub fn evaluate(
        &self,
        event_type: EventType,
        ue: &Position,
        params: &EventParameters,
        at: DateTime<Utc>,
    ) -> Result<MeasurementResult, MeasurementError> {
        check_params(event_type, params)?;
        let context = self
            .broadcast
            .current_valid(at)
            .ok_or(MeasurementError::NoContext)?;
        self.purge_expired(at);
        let eval = self.inputs(&context).evaluate(ue, params, at)?;

        let key = ue_key(ue.latitude, ue.longitude, ue.altitude_km);
        let state = {
            let mut triggers = self.triggers.lock().unwrap_or_else(PoisonError::into_inner);
            let state = triggers.step(
                event_type,
                &key,
                at,
                eval.entering,
                eval.leaving,
                params.time_to_trigger_ms(),
            );
            let dropped = triggers.prune(at, Duration::minutes(TRIGGER_STATE_TTL_MINUTES));
            if dropped > 0 {
                debug!("Dropped {} stale trigger trackers", dropped);
            }
            state
        };
        debug!(
            "{} for {} at {}: {} (condition {})",
            event_type,
            key,
            at,
            state.as_str(),
            eval.condition_met
        );
        Ok(MeasurementResult::from_evaluation(event_type, at, state, eval))
    }

    pub fn trigger_state(&self, event_type: EventType, ue: &Position) -> TriggerState {
        self.triggers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .state(event_type, &ue_key(ue.latitude, ue.longitude, ue.altitude_km))
    }

    pub fn reset_triggers(&self) {
        self.triggers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .reset();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::measurement::params::{A4Params, D2Params};
    use crate::tle::TleStore;
    use crate::tle::mock_data::{TAIPEI, TESTSAT_TLE_DATA};
    use chrono::TimeZone;

    pub(crate) fn measurement_engine() -> MeasurementEngine {
        let store = Arc::new(TleStore::new());
        store.add_many(TESTSAT_TLE_DATA, "testnet");
        MeasurementEngine::new(
            Arc::new(OrbitEngine::new(store)),
            RadioConfig::default(),
            CompensationConfig::default(),
            BroadcastConfig::default(),
        )
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn taipei() -> Position {
        Position::new(TAIPEI.0, TAIPEI.1, TAIPEI.2)
    }

    #[test]
    fn test_no_context() {
        let engine = measurement_engine();
        let err = engine
            .evaluate(
                EventType::A4,
                &taipei(),
                &EventParameters::defaults(EventType::A4),
                t0(),
            )
            .unwrap_err();
        assert!(matches!(err, MeasurementError::NoContext));

        engine.broadcast().generate(&taipei(), None, t0()).unwrap();
        let err = engine
            .evaluate(
                EventType::A4,
                &taipei(),
                &EventParameters::defaults(EventType::A4),
                t0() + Duration::hours(24),
            )
            .unwrap_err();
        assert!(matches!(err, MeasurementError::NoContext));
    }

    #[test]
    fn test_rejects_invalid_or_mismatched_params() {
        let engine = measurement_engine();
        engine.broadcast().generate(&taipei(), None, t0()).unwrap();

        let bad = EventParameters::A4(A4Params {
            hysteresis_db: 12.0,
            ..A4Params::default()
        });
        assert!(matches!(
            engine.evaluate(EventType::A4, &taipei(), &bad, t0()),
            Err(MeasurementError::Config(ConfigError::OutOfRange { .. }))
        ));
        assert!(matches!(
            engine.evaluate(
                EventType::A4,
                &taipei(),
                &EventParameters::D2(D2Params::default()),
                t0()
            ),
            Err(MeasurementError::Config(ConfigError::EventMismatch { .. }))
        ));
    }

    #[test]
    fn test_trigger_state_persists_across_calls() {
        let engine = measurement_engine();
        engine.broadcast().generate(&taipei(), None, t0()).unwrap();
        let params = EventParameters::defaults(EventType::D2);

        let mut states = Vec::new();
        for s in 0..5 {
            let r = engine
                .evaluate(EventType::D2, &taipei(), &params, t0() + Duration::seconds(s))
                .unwrap();
            assert_eq!(r.event_type, EventType::D2);
            assert_eq!(r.timestamp, t0() + Duration::seconds(s));
            states.push(r.trigger_state);
        }
        assert_eq!(engine.trigger_state(EventType::D2, &taipei()), states[4]);
        // TTT 160 ms is shorter than the 1 s tick, so a held condition triggers on the second sample
        if states[0] == TriggerState::Approaching && states[1..].iter().all(|s| *s != TriggerState::Idle) {
            assert_eq!(states[1], TriggerState::Triggered);
        }

        engine.reset_triggers();
        assert_eq!(engine.trigger_state(EventType::D2, &taipei()), TriggerState::Idle);
    }

    #[test]
    fn test_caches_stay_bounded_for_moving_ue() {
        let engine = measurement_engine();
        engine.broadcast().generate(&taipei(), None, t0()).unwrap();
        let params = EventParameters::defaults(EventType::A4);

        for i in 0..20 {
            let ue = Position::new(TAIPEI.0 + 0.01 * f64::from(i), TAIPEI.1, TAIPEI.2);
            engine
                .evaluate(EventType::A4, &ue, &params, t0() + Duration::minutes(2 * i64::from(i)))
                .unwrap();
            assert_eq!(engine.cached_compensations(), 1);
            // Only UEs seen in the last ten minutes keep a tracker
            assert!(engine.tracked_triggers() <= 6);
        }

        // A UE seen once is forgotten after the TTL
        let ue = taipei();
        engine.evaluate(EventType::A4, &ue, &params, t0() + Duration::hours(1)).unwrap();
        engine
            .evaluate(
                EventType::A4,
                &Position::new(TAIPEI.0 - 1.0, TAIPEI.1, TAIPEI.2),
                &params,
                t0() + Duration::hours(1) + Duration::minutes(15),
            )
            .unwrap();
        assert_eq!(engine.tracked_triggers(), 1);
        assert_eq!(engine.cached_compensations(), 1);
        assert_eq!(engine.trigger_state(EventType::A4, &ue), TriggerState::Idle);
    }
}
