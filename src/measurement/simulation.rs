//! Scenario replay on a virtual clock

use crate::measurement::MeasurementError;
use crate::measurement::broadcast::{BroadcastContext, generate_context};
use crate::measurement::engine::{MeasurementEngine, MeasurementResult, check_params};
use crate::measurement::params::EventParameters;
use crate::measurement::trigger::{TriggerState, TriggerStateMap, ue_key};
use crate::orbital::{Position, VirtualClock};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationScenario {
    pub scenario_name: String,
    pub ue_position: Position,
    pub event_parameters: EventParameters,
    pub start: DateTime<Utc>,
    pub duration_minutes: u32,
    pub sample_interval_seconds: u32,
    /// Broadcast center, the UE position when unset
    pub center: Option<Position>,
    /// Candidate satellites, every stored satellite when empty
    pub target_satellites: Vec<String>,
}

impl SimulationScenario {
    pub fn new(
        scenario_name: impl Into<String>,
        ue_position: Position,
        event_parameters: EventParameters,
        start: DateTime<Utc>,
    ) -> Self {
        Self {
            scenario_name: scenario_name.into(),
            ue_position,
            event_parameters,
            start,
            duration_minutes: 60,
            sample_interval_seconds: 5,
            center: None,
            target_satellites: Vec::new(),
        }
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.start + Duration::minutes(i64::from(self.duration_minutes))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementStats {
    pub mean: f64,
    /// Population standard deviation
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub count: usize,
}

impl MeasurementStats {
    fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        Some(Self {
            mean,
            std: variance.sqrt(),
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            count: values.len(),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationStatistics {
    pub total_samples: usize,
    pub triggered_samples: usize,
    pub trigger_rate: f64,
    /// Share of samples per trigger state
    pub state_distribution: BTreeMap<String, f64>,
    pub measurements: BTreeMap<String, MeasurementStats>,
}

impl SimulationStatistics {
    pub fn from_samples(samples: &[MeasurementResult]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let total = samples.len();
        let triggered = samples.iter().filter(|s| s.trigger_condition_met).count();

        let mut state_counts: BTreeMap<String, usize> = BTreeMap::new();
        let mut values: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for sample in samples {
            *state_counts
                .entry(sample.trigger_state.as_str().to_string())
                .or_default() += 1;
            for (name, value) in &sample.measurement_values {
                if value.is_finite() {
                    values.entry(name.clone()).or_default().push(*value);
                }
            }
        }

        Self {
            total_samples: total,
            triggered_samples: triggered,
            trigger_rate: triggered as f64 / total as f64,
            state_distribution: state_counts
                .into_iter()
                .map(|(state, count)| (state, count as f64 / total as f64))
                .collect(),
            measurements: values
                .into_iter()
                .filter_map(|(name, v)| MeasurementStats::from_values(&v).map(|s| (name, s)))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationReport {
    pub scenario_name: String,
    pub samples: Vec<MeasurementResult>,
    pub statistics: SimulationStatistics,
}

impl MeasurementEngine {
    /// Replay a scenario tick by tick.
    ///
    /// Contexts are generated privately at virtual time and never published to
    /// the live broadcast manager. Samples whose satellites cannot be
    /// propagated are skipped.
    pub fn simulate(
        &self,
        scenario: &SimulationScenario,
    ) -> Result<SimulationReport, MeasurementError> {
        let params = &scenario.event_parameters;
        let event_type = params.event_type();
        check_params(event_type, params)?;
        if scenario.sample_interval_seconds == 0 {
            return Err(MeasurementError::InvalidScenario(
                "sample_interval_seconds must be positive".into(),
            ));
        }

        let engine = self.orbit_engine();
        let config = self.broadcast().config();
        let center = scenario.center.unwrap_or(scenario.ue_position);
        let candidates = if scenario.target_satellites.is_empty() {
            engine.tle_store().satellite_ids()
        } else {
            scenario.target_satellites.clone()
        };
        let ue = &scenario.ue_position;
        let key = ue_key(ue.latitude, ue.longitude, ue.altitude_km);
        let step = Duration::seconds(i64::from(scenario.sample_interval_seconds));
        let end = scenario.end();

        info!(
            "Simulating {} ({}) from {} for {} min every {} s",
            scenario.scenario_name,
            event_type,
            scenario.start,
            scenario.duration_minutes,
            scenario.sample_interval_seconds
        );

        let mut clock = VirtualClock::new(scenario.start);
        let mut triggers = TriggerStateMap::new();
        let mut context: Option<BroadcastContext> = None;
        let mut samples = Vec::new();

        while clock.now() < end {
            let now = clock.now();
            if context.as_ref().is_none_or(|c| c.is_expired(now)) {
                context = Some(generate_context(engine, config, &center, &candidates, now)?);
            }
            let Some(ctx) = context.as_ref() else {
                return Err(MeasurementError::NoContext);
            };

            self.purge_expired(now);
            match self.inputs(ctx).evaluate(ue, params, now) {
                Ok(eval) => {
                    let state = triggers.step(
                        event_type,
                        &key,
                        now,
                        eval.entering,
                        eval.leaving,
                        params.time_to_trigger_ms(),
                    );
                    samples.push(MeasurementResult::from_evaluation(event_type, now, state, eval));
                }
                Err(MeasurementError::Propagation(e)) => {
                    debug!("Skipping sample at {}: {}", now, e);
                }
                Err(e) => return Err(e),
            }
            clock.advance(step);
        }

        let statistics = SimulationStatistics::from_samples(&samples);
        info!(
            "Simulation {} done: {} samples, trigger rate {:.3}, triggered state share {:.3}",
            scenario.scenario_name,
            statistics.total_samples,
            statistics.trigger_rate,
            statistics
                .state_distribution
                .get(TriggerState::Triggered.as_str())
                .copied()
                .unwrap_or(0.0)
        );
        Ok(SimulationReport {
            scenario_name: scenario.scenario_name.clone(),
            samples,
            statistics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::engine::tests::measurement_engine;
    use crate::measurement::params::{A4Params, EventType};
    use crate::tle::mock_data::TAIPEI;
    use chrono::TimeZone;
    use serde_json::json;

    fn scenario(params: EventParameters) -> SimulationScenario {
        let mut s = SimulationScenario::new(
            "taipei",
            Position::new(TAIPEI.0, TAIPEI.1, TAIPEI.2),
            params,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        );
        s.duration_minutes = 10;
        s.sample_interval_seconds = 10;
        s
    }

    fn sample(state: TriggerState, met: bool, value: f64) -> MeasurementResult {
        MeasurementResult {
            event_type: EventType::A4,
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            trigger_state: state,
            trigger_condition_met: met,
            measurement_values: BTreeMap::from([("rsrp".to_string(), value)]),
            trigger_details: json!({}),
        }
    }

    #[test]
    fn test_statistics() {
        let samples = vec![
            sample(TriggerState::Idle, false, 1.0),
            sample(TriggerState::Approaching, true, 2.0),
            sample(TriggerState::Triggered, true, 3.0),
            sample(TriggerState::Triggered, true, 6.0),
        ];
        let stats = SimulationStatistics::from_samples(&samples);
        assert_eq!(stats.total_samples, 4);
        assert_eq!(stats.triggered_samples, 3);
        assert_eq!(stats.trigger_rate, 0.75);
        assert_eq!(stats.state_distribution["triggered"], 0.5);
        assert_eq!(stats.state_distribution["idle"], 0.25);
        let rsrp = &stats.measurements["rsrp"];
        assert_eq!(rsrp.mean, 3.0);
        assert!((rsrp.std - 3.5f64.sqrt()).abs() < 1e-12);
        assert_eq!((rsrp.min, rsrp.max, rsrp.count), (1.0, 6.0, 4));

        assert_eq!(SimulationStatistics::from_samples(&[]), SimulationStatistics::default());
    }

    #[test]
    fn test_simulate_d2_is_deterministic() {
        let engine = measurement_engine();
        let s = scenario(EventParameters::defaults(EventType::D2));
        let a = engine.simulate(&s).unwrap();
        let b = engine.simulate(&s).unwrap();

        assert_eq!(a, b);
        assert_eq!(a.samples.len(), 60);
        assert_eq!(a.statistics.total_samples, 60);
        assert_eq!(a.samples[0].timestamp, s.start);
        assert_eq!(a.samples[59].timestamp, s.start + Duration::seconds(590));
        let shares: f64 = a.statistics.state_distribution.values().sum();
        assert!((shares - 1.0).abs() < 1e-9);
        assert!(a.statistics.measurements.contains_key("satellite_distance_m"));
        // The live manager is untouched
        assert!(engine.broadcast().current().is_none());
    }

    #[test]
    fn test_simulate_regenerates_expired_context() {
        let engine = measurement_engine();
        let mut s = scenario(EventParameters::defaults(EventType::A5));
        s.duration_minutes = 24 * 60 + 10;
        s.sample_interval_seconds = 600;
        let report = engine.simulate(&s).unwrap();
        assert_eq!(report.samples.len(), 145);
        assert!(report.samples.iter().all(|r| r.event_type == EventType::A5));
    }

    #[test]
    fn test_simulate_rejects_bad_scenario() {
        let engine = measurement_engine();
        let mut s = scenario(EventParameters::A4(A4Params {
            time_to_trigger_ms: 7,
            ..A4Params::default()
        }));
        assert!(matches!(engine.simulate(&s), Err(MeasurementError::Config(_))));

        s.event_parameters = EventParameters::defaults(EventType::A4);
        s.sample_interval_seconds = 0;
        assert!(matches!(
            engine.simulate(&s),
            Err(MeasurementError::InvalidScenario(_))
        ));
    }
}
