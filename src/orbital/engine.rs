//! Orbit calculation engine
//!
//! Resolves satellites through the TLE store, keeps one SGP4 model per
//! satellite and turns TEME states into geodetic/ECEF positions.

use crate::orbital::coordinates::{
    LookAngles, Position, Vec3, ecef_to_geodetic, eci_to_ecef_km, geodetic_to_ecef_km, gmst_rad,
    look_angles,
};
use crate::orbital::propagation::{PropagationError, Propagator, orbital_period};
use crate::tle::{TleStore, TleUpdateListener};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

/// Satellite state at one instant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SatellitePosition {
    pub satellite_id: String,
    pub timestamp: DateTime<Utc>,
    /// TEME position in km
    pub eci_km: Vec3,
    pub ecef_km: Vec3,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude_km: f64,
    /// TEME velocity in km/s
    pub velocity_km_s: Vec3,
    pub orbital_period_min: f64,
}

impl SatellitePosition {
    pub fn geodetic(&self) -> Position {
        Position::new(self.latitude, self.longitude, self.altitude_km)
    }

    /// Sub-satellite point on the ground
    pub fn ground_projection(&self) -> Position {
        Position::new(self.latitude, self.longitude, 0.0)
    }
}

/// Anything with an Earth-fixed Cartesian location
pub trait Cartesian {
    fn ecef_km(&self) -> Vec3;
}

impl Cartesian for SatellitePosition {
    fn ecef_km(&self) -> Vec3 {
        self.ecef_km
    }
}

impl Cartesian for Position {
    fn ecef_km(&self) -> Vec3 {
        geodetic_to_ecef_km(self)
    }
}

/// Straight-line distance in km, measured in ECEF
pub fn distance<A: Cartesian + ?Sized, B: Cartesian + ?Sized>(a: &A, b: &B) -> f64 {
    a.ecef_km().distance(b.ecef_km())
}

/// Contiguous interval with the satellite above a minimum elevation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisibilityWindow {
    pub satellite_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub max_elevation_deg: f64,
}

/// SGP4 models keyed by satellite id, tagged with the epoch they were built from
#[derive(Default)]
pub struct PropagatorCache {
    entries: Mutex<HashMap<String, Arc<Propagator>>>,
}

impl PropagatorCache {
    pub fn get(&self, satellite_id: &str, epoch: DateTime<Utc>) -> Option<Arc<Propagator>> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(satellite_id)
            .filter(|p| p.epoch() == epoch)
            .cloned()
    }

    pub fn insert(&self, satellite_id: &str, propagator: Arc<Propagator>) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(satellite_id.to_string(), propagator);
    }

    pub fn invalidate(&self, satellite_id: &str) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(satellite_id)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TleUpdateListener for PropagatorCache {
    fn on_tle_update(&self, satellite_id: &str) {
        if self.invalidate(satellite_id) {
            debug!(satellite_id, "Propagator invalidated after TLE update");
        }
    }
}

pub struct OrbitEngine {
    tle_store: Arc<TleStore>,
    cache: Arc<PropagatorCache>,
}

impl OrbitEngine {
    /// Create an engine whose cache follows updates in `tle_store`
    pub fn new(tle_store: Arc<TleStore>) -> Self {
        let cache = Arc::new(PropagatorCache::default());
        tle_store.subscribe(cache.clone());
        Self { tle_store, cache }
    }

    pub fn tle_store(&self) -> &Arc<TleStore> {
        &self.tle_store
    }

    /// Drop the cached model for a satellite
    pub fn on_tle_update(&self, satellite_id: &str) {
        self.cache.invalidate(satellite_id);
    }

    pub fn cached_propagators(&self) -> usize {
        self.cache.len()
    }

    /// Lazily build (or reuse) the SGP4 model for a satellite
    pub fn propagator(&self, satellite_id: &str) -> Result<Arc<Propagator>, PropagationError> {
        let record = self
            .tle_store
            .get(satellite_id)
            .ok_or_else(|| PropagationError::NotFound(satellite_id.to_string()))?;
        if let Some(p) = self.cache.get(satellite_id, record.epoch) {
            return Ok(p);
        }
        let propagator = Arc::new(Propagator::from_tle(&record)?);
        self.cache.insert(satellite_id, propagator.clone());
        Ok(propagator)
    }

    /// Satellite position at `at`
    ///
    /// SGP4 failures are returned to the caller, which is expected to skip the sample.
    pub fn propagate(
        &self,
        satellite_id: &str,
        at: DateTime<Utc>,
    ) -> Result<SatellitePosition, PropagationError> {
        let propagator = self.propagator(satellite_id)?;
        let state = propagator.propagate(at)?;
        let ecef_km = eci_to_ecef_km(state.position_km, gmst_rad(at));
        let geo = ecef_to_geodetic(ecef_km);

        Ok(SatellitePosition {
            satellite_id: satellite_id.to_string(),
            timestamp: at,
            eci_km: state.position_km,
            ecef_km,
            latitude: geo.latitude,
            longitude: geo.longitude,
            altitude_km: geo.altitude_km,
            velocity_km_s: state.velocity_km_s,
            orbital_period_min: orbital_period(&propagator),
        })
    }

    /// Position query for external consumers; `None` when unknown or not propagatable
    pub fn get_position(&self, satellite_id: &str, at: DateTime<Utc>) -> Option<SatellitePosition> {
        match self.propagate(satellite_id, at) {
            Ok(p) => Some(p),
            Err(e) => {
                warn!(satellite_id, error = %e, "Position query failed");
                None
            }
        }
    }

    pub fn look_angles(&self, satellite: &SatellitePosition, observer: &Position) -> LookAngles {
        look_angles(satellite.ecef_km, observer)
    }

    /// Orbital period in minutes for a stored satellite
    pub fn orbital_period(&self, satellite_id: &str) -> Result<f64, PropagationError> {
        Ok(orbital_period(&self.propagator(satellite_id)?))
    }

    /// Scan `[from, from + horizon)` for passes above `min_elevation_deg`
    pub fn visibility_windows(
        &self,
        satellite_id: &str,
        observer: &Position,
        from: DateTime<Utc>,
        horizon: Duration,
        step: Duration,
        min_elevation_deg: f64,
    ) -> Result<Vec<VisibilityWindow>, PropagationError> {
        let mut windows = Vec::new();
        let mut open: Option<VisibilityWindow> = None;
        let end = from + horizon;
        let step = step.max(Duration::seconds(1));
        let mut t = from;

        while t < end {
            let elevation = match self.propagate(satellite_id, t) {
                Ok(pos) => Some(self.look_angles(&pos, observer).elevation_deg),
                Err(e @ PropagationError::Sgp4 { .. }) => {
                    debug!(satellite_id, error = %e, "Skipping sample in visibility scan");
                    None
                }
                Err(e) => return Err(e),
            };

            match (elevation, open.as_mut()) {
                (Some(el), Some(w)) if el >= min_elevation_deg => {
                    w.end = t;
                    w.max_elevation_deg = w.max_elevation_deg.max(el);
                }
                (Some(el), None) if el >= min_elevation_deg => {
                    open = Some(VisibilityWindow {
                        satellite_id: satellite_id.to_string(),
                        start: t,
                        end: t,
                        max_elevation_deg: el,
                    });
                }
                _ => {
                    if let Some(w) = open.take() {
                        windows.push(w);
                    }
                }
            }
            t += step;
        }
        if let Some(w) = open.take() {
            windows.push(w);
        }
        Ok(windows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tle::mock_data::{TAIPEI, TESTSAT_1_NEWER, TESTSAT_TLE_DATA};
    use chrono::TimeZone;

    fn engine() -> OrbitEngine {
        let store = Arc::new(TleStore::new());
        store.add_many(TESTSAT_TLE_DATA, "testnet");
        OrbitEngine::new(store)
    }

    fn epoch() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn taipei() -> Position {
        Position::new(TAIPEI.0, TAIPEI.1, TAIPEI.2)
    }

    #[test]
    fn test_propagate_unknown_satellite() {
        let engine = engine();
        assert_eq!(
            engine.propagate("12345", epoch()),
            Err(PropagationError::NotFound("12345".into()))
        );
        assert!(engine.get_position("12345", epoch()).is_none());
    }

    #[test]
    fn test_propagate_is_deterministic() {
        let engine = engine();
        let t = epoch() + Duration::minutes(17);
        let a = engine.propagate("90002", t).unwrap();
        engine.on_tle_update("90002");
        let b = engine.propagate("90002", t).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_geodetic_fields_consistent_with_ecef() {
        let engine = engine();
        let pos = engine.propagate("90001", epoch()).unwrap();
        assert!((540.0..580.0).contains(&pos.altitude_km), "alt {}", pos.altitude_km);
        assert!((-90.0..=90.0).contains(&pos.latitude));
        assert!((-180.0..=180.0).contains(&pos.longitude));
        let back = geodetic_to_ecef_km(&pos.geodetic());
        assert!(back.distance(pos.ecef_km) < 1e-3);
        // ECI and ECEF differ only by a rotation about Z
        assert!((pos.eci_km.length() - pos.ecef_km.length()).abs() < 1e-9);
        assert!((pos.eci_km.z - pos.ecef_km.z).abs() < 1e-12);
    }

    #[test]
    fn test_overhead_pass_over_taipei_at_epoch() {
        let engine = engine();
        let pos = engine.propagate("90001", epoch()).unwrap();
        let angles = engine.look_angles(&pos, &taipei());
        assert!(angles.elevation_deg > 60.0, "elevation {}", angles.elevation_deg);
        assert!(angles.range_km < 700.0, "range {}", angles.range_km);

        let far = engine.propagate("90008", epoch()).unwrap();
        let far_angles = engine.look_angles(&far, &taipei());
        assert!(far_angles.elevation_deg < 0.0);
    }

    #[test]
    fn test_distance_symmetry() {
        let engine = engine();
        let a = engine.propagate("90001", epoch()).unwrap();
        let b = engine.propagate("90005", epoch()).unwrap();
        let ue = taipei();
        assert_eq!(distance(&a, &ue), distance(&ue, &a));
        assert_eq!(distance(&a, &b), distance(&b, &a));
        assert_eq!(distance(&a, &a), 0.0);
    }

    #[test]
    fn test_cache_invalidated_on_tle_update() {
        let engine = engine();
        let before = engine.propagate("90001", epoch()).unwrap();
        assert_eq!(engine.cached_propagators(), 1);

        let (l1, l2) = TESTSAT_1_NEWER;
        engine
            .tle_store()
            .add(Some("TESTSAT-1"), l1, l2, "testnet")
            .unwrap();
        assert_eq!(engine.cached_propagators(), 0);

        // Same elements, epoch one day later: the satellite is elsewhere at the old epoch
        let after = engine.propagate("90001", epoch()).unwrap();
        assert!(before.eci_km.distance(after.eci_km) > 1.0);
    }

    #[test]
    fn test_orbital_period_lookup() {
        let engine = engine();
        let period = engine.orbital_period("90003").unwrap();
        assert!((period - 95.6175).abs() < 1e-3);
        let pos = engine.propagate("90003", epoch()).unwrap();
        assert_eq!(pos.orbital_period_min, period);
    }

    #[test]
    fn test_visibility_windows() {
        let engine = engine();
        let windows = engine
            .visibility_windows(
                "90001",
                &taipei(),
                epoch() - Duration::minutes(10),
                Duration::minutes(20),
                Duration::seconds(30),
                10.0,
            )
            .unwrap();
        assert_eq!(windows.len(), 1);
        let w = &windows[0];
        assert!(w.start < epoch() && w.end > epoch());
        assert!(w.max_elevation_deg > 60.0);
    }
}
