//! SIB19-style broadcast context
//!
//! A context bundles everything a UE needs to evaluate NTN measurement events:
//! neighbor cells with their satellites, ephemeris, a static and a dynamic
//! reference location, a time correction and the SMTC configuration. The
//! manager keeps the current context behind an `Arc` that is swapped whole,
//! so readers never see a half-built context.

use crate::config::BroadcastConfig;
use crate::measurement::MeasurementError;
use crate::measurement::scoring::{CandidateScore, rank, score_candidate};
use crate::orbital::signal::SPEED_OF_LIGHT_M_S;
use crate::orbital::{OrbitEngine, Position, SatellitePosition, VisibilityWindow, distance};
use crate::tle::{OrbitalElements, parse_orbital_elements};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

pub const BASE_CARRIER_MHZ: f64 = 12_000.0;
pub const CARRIER_SPACING_MHZ: f64 = 100.0;
pub const SERVICE_DURATION_S: f64 = 3600.0;
pub const SYNC_ACCURACY_MS: f64 = 50.0;
pub const SMTC_PERIODICITY_MS: u32 = 20;
pub const MAX_SMTC_SLOTS: usize = 4;
/// Minimum elevation for SMTC measurement windows
pub const SMTC_MIN_ELEVATION_DEG: f64 = 10.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeighborCell {
    pub pci: u16,
    pub carrier_frequency_mhz: f64,
    pub satellite_id: String,
    pub measurement_priority: u8,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EphemerisSummary {
    pub satellite_id: String,
    pub epoch: DateTime<Utc>,
    pub elements: OrbitalElements,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReferenceLocation {
    Static {
        position: Position,
    },
    Dynamic {
        satellite_id: String,
        position: SatellitePosition,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeCorrection {
    pub gnss_time_offset_ms: f64,
    pub epoch_time: DateTime<Utc>,
    pub service_duration_s: f64,
    pub doppler_shift_hz: f64,
    pub carrier_frequency_hz: f64,
    pub sync_accuracy_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmtcConfig {
    pub measurement_slots: Vec<u8>,
    pub periodicity_ms: u32,
    pub offset_ms: u32,
}

impl SmtcConfig {
    pub fn for_satellites(count: usize) -> Self {
        Self {
            measurement_slots: (0..count.min(MAX_SMTC_SLOTS) as u8).collect(),
            periodicity_ms: SMTC_PERIODICITY_MS,
            offset_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BroadcastState {
    Valid,
    Expiring,
    Expired,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastContext {
    pub broadcast_id: String,
    pub broadcast_time: DateTime<Utc>,
    pub expiry_time: DateTime<Utc>,
    pub center: Position,
    /// Candidate set requested by the caller, `None` for the whole TLE store
    #[serde(default)]
    pub targets: Option<Vec<String>>,
    /// Candidates in rank order, best first
    pub ranked: Vec<CandidateScore>,
    pub neighbor_cells: Vec<NeighborCell>,
    pub ephemeris: Vec<EphemerisSummary>,
    pub static_reference: ReferenceLocation,
    pub dynamic_reference: Option<ReferenceLocation>,
    pub time_correction: TimeCorrection,
    pub smtc: SmtcConfig,
}

impl BroadcastContext {
    pub fn state(&self, at: DateTime<Utc>, expiring_threshold: Duration) -> BroadcastState {
        let remaining = self.expiry_time - at;
        if remaining <= Duration::zero() {
            BroadcastState::Expired
        } else if remaining <= expiring_threshold {
            BroadcastState::Expiring
        } else {
            BroadcastState::Valid
        }
    }

    pub fn is_expired(&self, at: DateTime<Utc>) -> bool {
        at >= self.expiry_time
    }

    pub fn dynamic_reference_satellite(&self) -> Option<&str> {
        match &self.dynamic_reference {
            Some(ReferenceLocation::Dynamic { satellite_id, .. }) => Some(satellite_id),
            _ => None,
        }
    }

    pub fn cell_for(&self, satellite_id: &str) -> Option<&NeighborCell> {
        self.neighbor_cells
            .iter()
            .find(|c| c.satellite_id == satellite_id)
    }
}

/// Compact view of the current context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastStatus {
    pub state: BroadcastState,
    pub broadcast_id: String,
    pub broadcast_time: DateTime<Utc>,
    pub time_to_expiry_hours: f64,
    pub satellites_count: usize,
    pub neighbor_cells_count: usize,
    pub dynamic_reference: Option<String>,
    pub center: Position,
}

/// Doppler shift seen at `center` from a satellite's range rate
fn doppler_shift_hz(
    engine: &OrbitEngine,
    satellite: &SatellitePosition,
    center: &Position,
    carrier_hz: f64,
) -> f64 {
    let Ok(later) = engine.propagate(&satellite.satellite_id, satellite.timestamp + Duration::seconds(1))
    else {
        return 0.0;
    };
    let range_rate_m_s = (distance(&later, center) - distance(satellite, center)) * 1000.0;
    -range_rate_m_s / SPEED_OF_LIGHT_M_S * carrier_hz
}

fn time_correction(
    engine: &OrbitEngine,
    config: &BroadcastConfig,
    dynamic: Option<&SatellitePosition>,
    center: &Position,
    at: DateTime<Utc>,
) -> TimeCorrection {
    let carrier_frequency_hz = BASE_CARRIER_MHZ * 1e6;
    TimeCorrection {
        gnss_time_offset_ms: config.gnss_time_offset_ms,
        epoch_time: at,
        service_duration_s: SERVICE_DURATION_S,
        doppler_shift_hz: dynamic
            .map(|sat| doppler_shift_hz(engine, sat, center, carrier_frequency_hz))
            .unwrap_or(0.0),
        carrier_frequency_hz,
        sync_accuracy_ms: SYNC_ACCURACY_MS,
    }
}

/// Cell for the candidate at rank `index`; PCI and priority saturate
fn neighbor_cell(index: usize, satellite_id: &str) -> NeighborCell {
    NeighborCell {
        pci: u16::try_from(index + 1).unwrap_or(u16::MAX),
        carrier_frequency_mhz: BASE_CARRIER_MHZ + CARRIER_SPACING_MHZ * index as f64,
        satellite_id: satellite_id.to_string(),
        measurement_priority: u8::try_from(index + 1).unwrap_or(u8::MAX),
        is_active: true,
    }
}

/// Build a context for `center` at `at` from `candidates`
pub fn generate_context(
    engine: &OrbitEngine,
    config: &BroadcastConfig,
    center: &Position,
    candidates: &[String],
    at: DateTime<Utc>,
) -> Result<BroadcastContext, MeasurementError> {
    let mut ranked: Vec<CandidateScore> = candidates
        .iter()
        .filter_map(|id| score_candidate(engine, id, center, at, config.optimal_distance_km))
        .collect();
    if ranked.is_empty() {
        return Err(MeasurementError::NoCandidates);
    }
    rank(&mut ranked);
    ranked.truncate(config.max_neighbors.max(1));

    let neighbor_cells: Vec<NeighborCell> = ranked
        .iter()
        .enumerate()
        .map(|(i, c)| neighbor_cell(i, &c.satellite_id))
        .collect();

    let store = engine.tle_store();
    let ephemeris: Vec<EphemerisSummary> = ranked
        .iter()
        .filter_map(|c| {
            let record = store.get(&c.satellite_id)?;
            let elements = parse_orbital_elements(&record.line2)?;
            Some(EphemerisSummary {
                satellite_id: c.satellite_id.clone(),
                epoch: record.epoch,
                elements,
            })
        })
        .collect();

    let best = &ranked[0];
    let dynamic_position = engine.propagate(&best.satellite_id, at).ok();
    let dynamic_reference = dynamic_position
        .clone()
        .map(|position| ReferenceLocation::Dynamic {
            satellite_id: best.satellite_id.clone(),
            position,
        });

    Ok(BroadcastContext {
        broadcast_id: format!("sib19_{}", at.format("%Y%m%d_%H%M%S")),
        broadcast_time: at,
        expiry_time: at + Duration::hours(config.validity_hours),
        center: *center,
        targets: None,
        time_correction: time_correction(engine, config, dynamic_position.as_ref(), center, at),
        smtc: SmtcConfig::for_satellites(ranked.len()),
        static_reference: ReferenceLocation::Static { position: *center },
        dynamic_reference,
        neighbor_cells,
        ephemeris,
        ranked,
    })
}

pub struct BroadcastManager {
    engine: Arc<OrbitEngine>,
    config: BroadcastConfig,
    current: RwLock<Option<Arc<BroadcastContext>>>,
    history: Mutex<VecDeque<Arc<BroadcastContext>>>,
}

impl BroadcastManager {
    pub fn new(engine: Arc<OrbitEngine>, config: BroadcastConfig) -> Self {
        Self {
            engine,
            config,
            current: RwLock::new(None),
            history: Mutex::new(VecDeque::new()),
        }
    }

    pub fn config(&self) -> &BroadcastConfig {
        &self.config
    }

    fn expiring_threshold(&self) -> Duration {
        Duration::hours(self.config.expiring_threshold_hours)
    }

    /// Generate and publish a new context.
    ///
    /// With no explicit targets every satellite in the TLE store is a candidate.
    pub fn generate(
        &self,
        center: &Position,
        targets: Option<&[String]>,
        at: DateTime<Utc>,
    ) -> Result<Arc<BroadcastContext>, MeasurementError> {
        let targets = targets.filter(|t| !t.is_empty());
        let all;
        let candidates = match targets {
            Some(t) => t,
            None => {
                all = self.engine.tle_store().satellite_ids();
                &all[..]
            }
        };
        let mut context = generate_context(&self.engine, &self.config, center, candidates, at)?;
        context.targets = targets.map(<[String]>::to_vec);
        let context = Arc::new(context);
        info!(
            "Broadcast {} generated: {} neighbor cells, reference {:?}",
            context.broadcast_id,
            context.neighbor_cells.len(),
            context.dynamic_reference_satellite()
        );
        self.publish(Arc::clone(&context));
        Ok(context)
    }

    fn publish(&self, context: Arc<BroadcastContext>) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&context));
        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        history.push_back(context);
        while history.len() > self.config.history_len.max(1) {
            history.pop_front();
        }
    }

    pub fn current(&self) -> Option<Arc<BroadcastContext>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Current context unless it has expired at `at`
    pub fn current_valid(&self, at: DateTime<Utc>) -> Option<Arc<BroadcastContext>> {
        self.current().filter(|c| !c.is_expired(at))
    }

    pub fn history(&self) -> Vec<Arc<BroadcastContext>> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn status(&self, at: DateTime<Utc>) -> Option<BroadcastStatus> {
        let context = self.current()?;
        Some(BroadcastStatus {
            state: context.state(at, self.expiring_threshold()),
            broadcast_id: context.broadcast_id.clone(),
            broadcast_time: context.broadcast_time,
            time_to_expiry_hours: ((context.expiry_time - at).num_seconds() as f64 / 3600.0)
                .max(0.0),
            satellites_count: context.ephemeris.len(),
            neighbor_cells_count: context.neighbor_cells.len(),
            dynamic_reference: context.dynamic_reference_satellite().map(str::to_string),
            center: context.center,
        })
    }

    /// Recompute only the time correction of the current context
    pub fn refresh_time_correction(
        &self,
        at: DateTime<Utc>,
    ) -> Result<Arc<BroadcastContext>, MeasurementError> {
        let current = self.current().ok_or(MeasurementError::NoContext)?;
        let dynamic = current
            .dynamic_reference_satellite()
            .and_then(|id| self.engine.propagate(id, at).ok());
        let mut updated = (*current).clone();
        updated.time_correction =
            time_correction(&self.engine, &self.config, dynamic.as_ref(), &current.center, at);
        let updated = Arc::new(updated);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&updated));
        Ok(updated)
    }

    /// Regenerate around the same center and candidate set when the context is
    /// expiring or expired
    pub fn maintain(&self, at: DateTime<Utc>) -> Result<bool, MeasurementError> {
        let Some(current) = self.current() else {
            return Ok(false);
        };
        if current.state(at, self.expiring_threshold()) == BroadcastState::Valid {
            return Ok(false);
        }
        info!(
            "Broadcast {} expiring, regenerating",
            current.broadcast_id
        );
        self.generate(&current.center, current.targets.as_deref(), at)?;
        Ok(true)
    }

    /// One lifecycle step: regenerate when due, otherwise refresh the time correction
    fn tick(&self, at: DateTime<Utc>) -> Result<bool, MeasurementError> {
        if self.maintain(at)? {
            return Ok(true);
        }
        if let Err(e) = self.refresh_time_correction(at) {
            warn!("Time correction refresh skipped: {}", e);
        }
        Ok(false)
    }

    /// Run a lifecycle step on the blocking pool.
    ///
    /// Regeneration propagates every candidate, which is too much work for a
    /// runtime worker.
    pub async fn tick_blocking(
        self: &Arc<Self>,
        at: DateTime<Utc>,
    ) -> Result<bool, MeasurementError> {
        let manager = Arc::clone(self);
        tokio::task::spawn_blocking(move || manager.tick(at))
            .await
            .map_err(|e| MeasurementError::Task(e.to_string()))?
    }

    /// Periodically regenerate the context against the wall clock
    pub fn spawn_lifecycle(self: Arc<Self>) -> JoinHandle<()> {
        let period = std::time::Duration::from_secs(self.config.regeneration_interval_minutes.max(1) * 60);
        tokio::spawn(async move {
            info!("Broadcast lifecycle task started (every {:?})", period);
            loop {
                tokio::time::sleep(period).await;
                if let Err(e) = self.tick_blocking(Utc::now()).await {
                    error!("Broadcast regeneration failed: {}", e);
                }
            }
        })
    }

    /// Visibility windows over the context center for SMTC planning, ordered by start
    pub fn smtc_measurement_windows(
        &self,
        satellite_ids: &[String],
        from: DateTime<Utc>,
        horizon: Duration,
    ) -> Result<Vec<VisibilityWindow>, MeasurementError> {
        let center = self.current().ok_or(MeasurementError::NoContext)?.center;
        let mut windows = Vec::new();
        for id in satellite_ids {
            windows.extend(self.engine.visibility_windows(
                id,
                &center,
                from,
                horizon,
                Duration::seconds(30),
                SMTC_MIN_ELEVATION_DEG,
            )?);
        }
        windows.sort_by(|a, b| a.start.cmp(&b.start).then(a.satellite_id.cmp(&b.satellite_id)));
        Ok(windows)
    }
}
