//! Position and time compensation for A4 evaluation

use crate::config::CompensationConfig;
use crate::orbital::signal::SPEED_OF_LIGHT_M_S;
use crate::orbital::{OrbitEngine, Position, PropagationError};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionCompensation {
    pub serving_satellite: String,
    pub target_satellite: String,
    pub ue_position: Position,
    /// Equivalent path difference in m, positive when the target sits higher
    pub delta_s_m: f64,
    pub delta_t_ms: f64,
    pub doppler_correction_hz: f64,
    pub signal_compensation_db: f64,
    pub computed_at: DateTime<Utc>,
}

type CacheKey = (String, String, [u64; 3]);

fn cache_key(serving: &str, target: &str, ue: &Position) -> CacheKey {
    (
        serving.to_string(),
        target.to_string(),
        [
            ue.latitude.to_bits(),
            ue.longitude.to_bits(),
            ue.altitude_km.to_bits(),
        ],
    )
}

pub struct CompensationCalculator {
    config: CompensationConfig,
    cache: Mutex<HashMap<CacheKey, PositionCompensation>>,
}

impl CompensationCalculator {
    pub fn new(config: CompensationConfig) -> Self {
        Self {
            config,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &CompensationConfig {
        &self.config
    }

    /// Compensation for a serving/target pair, reused while younger than the cache TTL
    pub fn compensation(
        &self,
        engine: &OrbitEngine,
        serving: &str,
        target: &str,
        ue: &Position,
        carrier_mhz: f64,
        at: DateTime<Utc>,
    ) -> Result<PositionCompensation, PropagationError> {
        let key = cache_key(serving, target, ue);
        let ttl = Duration::seconds(self.config.cache_ttl_s);
        if let Some(hit) = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .filter(|c| (at - c.computed_at).abs() <= ttl)
            .cloned()
        {
            return Ok(hit);
        }

        let fresh = self.compute(engine, serving, target, ue, carrier_mhz, at)?;
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, fresh.clone());
        Ok(fresh)
    }

    fn compute(
        &self,
        engine: &OrbitEngine,
        serving: &str,
        target: &str,
        ue: &Position,
        carrier_mhz: f64,
        at: DateTime<Utc>,
    ) -> Result<PositionCompensation, PropagationError> {
        let serving_pos = engine.propagate(serving, at)?;
        let target_pos = engine.propagate(target, at)?;
        let serving_el = engine.look_angles(&serving_pos, ue).elevation_deg;
        let target_el = engine.look_angles(&target_pos, ue).elevation_deg;

        let c = &self.config;
        let elevation_diff = (target_el - serving_el)
            .clamp(-c.max_elevation_diff_deg, c.max_elevation_diff_deg);
        let delta_s_km =
            (elevation_diff * c.km_per_degree).clamp(-c.max_delta_s_km, c.max_delta_s_km);
        let delta_s_m = delta_s_km * 1000.0;
        let relative_speed_km_s = (target_pos.velocity_km_s - serving_pos.velocity_km_s).length();

        Ok(PositionCompensation {
            serving_satellite: serving.to_string(),
            target_satellite: target.to_string(),
            ue_position: *ue,
            delta_s_m,
            delta_t_ms: delta_s_m / SPEED_OF_LIGHT_M_S * 1000.0,
            doppler_correction_hz: relative_speed_km_s * 1000.0 / SPEED_OF_LIGHT_M_S
                * carrier_mhz
                * 1e6,
            signal_compensation_db: delta_s_km * c.signal_db_per_km,
            computed_at: at,
        })
    }

    /// Drop entries older than the TTL relative to `now`
    pub fn purge(&self, now: DateTime<Utc>) {
        let ttl = Duration::seconds(self.config.cache_ttl_s);
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, c| (now - c.computed_at).abs() <= ttl);
    }

    pub fn cached(&self) -> usize {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
