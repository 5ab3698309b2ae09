//! TLE record types and ingestion errors

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Fixed width of both TLE lines
pub const TLE_LINE_LEN: usize = 69;

/// Errors raised while ingesting TLE text
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TleError {
    #[error("invalid TLE format: {0}")]
    InvalidFormat(String),
    #[error("invalid TLE epoch: {0}")]
    EpochParseError(String),
}

/// A validated two-line element set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TleRecord {
    pub satellite_id: String,
    pub norad_id: u32,
    pub name: String,
    pub constellation: String,
    pub line1: String,
    pub line2: String,
    pub epoch: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl TleRecord {
    /// True if `self` carries a strictly newer epoch than `other`
    pub fn is_newer_than(&self, other: &TleRecord) -> bool {
        self.epoch > other.epoch
    }

    /// Age of the element set at `now`, in hours
    pub fn age_hours(&self, now: DateTime<Utc>) -> f64 {
        (now - self.epoch).num_seconds() as f64 / 3600.0
    }
}

/// Result of adding a record to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Inserted,
    /// Replaced an older epoch for the same NORAD id
    Updated,
    /// Existing record was the same age or newer
    Unchanged,
}

/// Mean Keplerian elements read from line 2
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrbitalElements {
    pub inclination_deg: f64,
    pub raan_deg: f64,
    pub eccentricity: f64,
    pub arg_perigee_deg: f64,
    pub mean_anomaly_deg: f64,
    pub mean_motion_rev_per_day: f64,
    pub semi_major_axis_km: f64,
}

/// Per-constellation summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstellationInfo {
    pub constellation: String,
    pub satellite_count: usize,
    pub newest_epoch: Option<DateTime<Utc>>,
    pub oldest_epoch: Option<DateTime<Utc>>,
}
