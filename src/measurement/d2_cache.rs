//! Precomputed D2 measurement series keyed by scenario hash
//!
//! A scenario pins one moving reference satellite for its whole duration and
//! measures the UE against a fixed ground reference. Series are stored under a
//! hash of the scenario configuration, so an identical configuration is served
//! from the store instead of being recomputed.

use crate::measurement::MeasurementError;
use crate::measurement::events::d2_conditions;
use crate::measurement::params::{D2Params, EventParameters};
use crate::measurement::scoring::select_reference;
use crate::orbital::{OrbitEngine, Position, SatellitePosition, distance, haversine_m};
use crate::storage::{D2MeasurementRecord, OrbitalStore};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct D2ScenarioConfig {
    pub scenario_name: String,
    pub ue_position: Position,
    pub fixed_ref_position: Position,
    /// Serving-to-reference distance threshold in m
    pub thresh1: f64,
    /// UE-to-fixed-reference distance threshold in m
    pub thresh2: f64,
    pub hysteresis: f64,
    pub constellation: String,
    pub duration_minutes: u32,
    pub sample_interval_seconds: u32,
}

impl D2ScenarioConfig {
    fn params(&self) -> D2Params {
        D2Params {
            thresh1_m: self.thresh1,
            thresh2_m: self.thresh2,
            hysteresis_m: self.hysteresis,
            time_to_trigger_ms: 0,
            serving_satellite: None,
        }
    }
}

/// SHA-256 hex digest of the configuration serialized as JSON with sorted keys
pub fn scenario_hash(config: &D2ScenarioConfig) -> String {
    // Value maps are ordered by key
    let canonical = serde_json::to_value(config)
        .map(|v| v.to_string())
        .unwrap_or_default();
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

pub struct D2Precomputer {
    engine: Arc<OrbitEngine>,
    store: Arc<dyn OrbitalStore>,
    optimal_distance_km: f64,
}

impl D2Precomputer {
    pub fn new(
        engine: Arc<OrbitEngine>,
        store: Arc<dyn OrbitalStore>,
        optimal_distance_km: f64,
    ) -> Self {
        Self {
            engine,
            store,
            optimal_distance_km,
        }
    }

    /// Return the stored series for `config`, computing and saving it on a miss
    pub async fn precompute(
        &self,
        config: &D2ScenarioConfig,
        start: DateTime<Utc>,
    ) -> Result<Vec<D2MeasurementRecord>, MeasurementError> {
        let params = config.params();
        EventParameters::D2(params.clone()).validate()?;
        if config.sample_interval_seconds == 0 {
            return Err(MeasurementError::InvalidScenario(
                "sample_interval_seconds must be positive".into(),
            ));
        }

        let hash = scenario_hash(config);
        let cached = self.store.d2_series(&hash).await?;
        if !cached.is_empty() {
            info!(
                "D2 scenario {} served from cache ({} samples, {})",
                config.scenario_name,
                cached.len(),
                hash
            );
            return Ok(cached);
        }

        let records = self.compute(config, &params, &hash, start)?;
        self.store.save_d2_series(&hash, &records).await?;
        info!(
            "D2 scenario {} precomputed: {} samples stored under {}",
            config.scenario_name,
            records.len(),
            hash
        );
        Ok(records)
    }

    fn nearest_serving(
        &self,
        ids: &[String],
        reference_id: &str,
        ue: &Position,
        at: DateTime<Utc>,
    ) -> Option<SatellitePosition> {
        ids.iter()
            .filter(|id| id.as_str() != reference_id)
            .filter_map(|id| self.engine.propagate(id, at).ok())
            .map(|pos| (distance(&pos, ue), pos))
            .min_by(|(da, a), (db, b)| {
                da.total_cmp(db)
                    .then_with(|| a.satellite_id.cmp(&b.satellite_id))
            })
            .map(|(_, pos)| pos)
    }

    fn compute(
        &self,
        config: &D2ScenarioConfig,
        params: &D2Params,
        hash: &str,
        start: DateTime<Utc>,
    ) -> Result<Vec<D2MeasurementRecord>, MeasurementError> {
        let ids: Vec<String> = self
            .engine
            .tle_store()
            .by_constellation(&config.constellation)
            .into_iter()
            .map(|r| r.satellite_id)
            .collect();
        let reference = select_reference(
            &self.engine,
            &ids,
            &config.fixed_ref_position,
            start,
            self.optimal_distance_km,
        )
        .ok_or(MeasurementError::NoCandidates)?;

        let ground_m = haversine_m(&config.ue_position, &config.fixed_ref_position);
        let step = Duration::seconds(i64::from(config.sample_interval_seconds));
        let steps = i64::from(config.duration_minutes) * 60 / step.num_seconds();

        let mut records = Vec::new();
        for k in 0..steps {
            let at = start + Duration::seconds(step.num_seconds() * k);
            let reference_pos = match self.engine.propagate(&reference.satellite_id, at) {
                Ok(p) => p,
                Err(e) => {
                    debug!("D2 sample at {} skipped: {}", at, e);
                    continue;
                }
            };
            let Some(serving) =
                self.nearest_serving(&ids, &reference.satellite_id, &config.ue_position, at)
            else {
                debug!("D2 sample at {} has no serving satellite", at);
                continue;
            };

            let satellite_m = distance(&serving, &reference_pos) * 1000.0;
            let (condition_met, entering, leaving) = d2_conditions(satellite_m, ground_m, params);
            records.push(D2MeasurementRecord {
                scenario_hash: hash.to_string(),
                scenario_name: config.scenario_name.clone(),
                timestamp: at,
                ue_position: config.ue_position,
                fixed_ref_position: config.fixed_ref_position,
                reference_satellite_id: reference.satellite_id.clone(),
                serving_satellite_id: serving.satellite_id,
                reference_position: reference_pos.ground_projection(),
                satellite_distance_m: satellite_m,
                ground_distance_m: ground_m,
                thresh1_m: config.thresh1,
                thresh2_m: config.thresh2,
                hysteresis_m: config.hysteresis,
                trigger_condition_met: condition_met,
                entering,
                leaving,
            });
        }
        Ok(records)
    }
}
