//! Persisted row types

use crate::orbital::{Position, Vec3};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One precomputed satellite sample relative to a fixed observer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrbitalCacheRecord {
    pub satellite_id: String,
    pub norad_id: u32,
    pub constellation: String,
    pub timestamp: DateTime<Utc>,
    pub observer: Position,
    /// TEME position in km
    pub eci_km: Vec3,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude_km: f64,
    pub velocity_km_s: Vec3,
    pub elevation_deg: f64,
    pub azimuth_deg: f64,
    pub range_km: f64,
    pub signal_strength_dbm: f64,
    pub path_loss_db: f64,
    pub sinr_db: f64,
    pub link_margin_db: f64,
    pub calculation_method: String,
    pub data_quality: f64,
}

/// Results flowing from the job executor into the batch processor
pub type PrecomputeResult = OrbitalCacheRecord;

impl OrbitalCacheRecord {
    /// Apply the fields an upsert may overwrite
    pub fn merge_from(&mut self, newer: &OrbitalCacheRecord) {
        self.observer = newer.observer;
        self.eci_km = newer.eci_km;
        self.latitude = newer.latitude;
        self.longitude = newer.longitude;
        self.altitude_km = newer.altitude_km;
        self.velocity_km_s = newer.velocity_km_s;
        self.elevation_deg = newer.elevation_deg;
        self.azimuth_deg = newer.azimuth_deg;
        self.range_km = newer.range_km;
        self.signal_strength_dbm = newer.signal_strength_dbm;
        self.path_loss_db = newer.path_loss_db;
        self.sinr_db = newer.sinr_db;
        self.link_margin_db = newer.link_margin_db;
        self.calculation_method = newer.calculation_method.clone();
        self.data_quality = newer.data_quality;
    }
}

/// One sample of a precomputed D2 scenario
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct D2MeasurementRecord {
    pub scenario_hash: String,
    pub scenario_name: String,
    pub timestamp: DateTime<Utc>,
    pub ue_position: Position,
    pub fixed_ref_position: Position,
    pub reference_satellite_id: String,
    pub serving_satellite_id: String,
    /// Sub-satellite point of the reference satellite
    pub reference_position: Position,
    pub satellite_distance_m: f64,
    pub ground_distance_m: f64,
    pub thresh1_m: f64,
    pub thresh2_m: f64,
    pub hysteresis_m: f64,
    pub trigger_condition_met: bool,
    pub entering: bool,
    pub leaving: bool,
}

/// Row mirrored into `satellite_data_preload_jobs`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreloadJobRow {
    pub job_id: Uuid,
    pub job_name: String,
    pub constellation: String,
    pub status: String,
    pub progress: f64,
    pub total_calculations: u64,
    pub processed_records: u64,
    pub failed_records: u64,
    pub retry_count: u32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalQualitySummary {
    pub avg_signal_dbm: Option<f64>,
    pub min_signal_dbm: Option<f64>,
    pub max_signal_dbm: Option<f64>,
    pub avg_elevation_deg: Option<f64>,
}

/// Aggregate view of the orbital cache for one observer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStatistics {
    pub total_records: u64,
    pub unique_satellites: u64,
    pub constellations: Vec<String>,
    pub time_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    pub signal_quality: SignalQualitySummary,
}

/// Observers match when their coordinates agree to about a decimetre
pub fn same_observer(a: &Position, b: &Position) -> bool {
    (a.latitude - b.latitude).abs() < 1e-6
        && (a.longitude - b.longitude).abs() < 1e-6
        && (a.altitude_km - b.altitude_km).abs() < 1e-4
}
