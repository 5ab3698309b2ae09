//! Orbital propagation utilities

use crate::orbital::coordinates::Vec3;
use crate::tle::TleRecord;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Fallback orbital period when the mean motion is unusable
pub const DEFAULT_ORBITAL_PERIOD_MIN: f64 = 90.0;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PropagationError {
    #[error("satellite {0} not found")]
    NotFound(String),
    #[error("invalid elements for satellite {satellite_id}: {message}")]
    Elements {
        satellite_id: String,
        message: String,
    },
    /// SGP4 reported a non-zero error code; the sample must be skipped
    #[error("SGP4 error code {code} for satellite {satellite_id}: {message}")]
    Sgp4 {
        satellite_id: String,
        code: u8,
        message: String,
    },
}

/// Calculate minutes since epoch for SGP4 propagation
pub fn minutes_since_epoch(sim_utc: DateTime<Utc>, epoch: DateTime<Utc>) -> f64 {
    let delta = sim_utc - epoch;
    delta.num_seconds() as f64 / 60.0 + (delta.subsec_nanos() as f64) / 60.0 / 1.0e9
}

/// Vallado error code for an SGP4 failure
fn sgp4_error_code(error: &sgp4::Error) -> u8 {
    #[allow(unreachable_patterns)]
    match error {
        sgp4::Error::OutOfRangeEccentricity { .. } => 1,
        sgp4::Error::OutOfRangePerturbedEccentricity { .. } => 3,
        sgp4::Error::NegativeSemiLatusRectum { .. } => 4,
        _ => 6,
    }
}

/// SGP4 model for one satellite, built from its TLE
pub struct Propagator {
    satellite_id: String,
    constants: sgp4::Constants,
    epoch: DateTime<Utc>,
    mean_motion_rev_per_day: f64,
}

/// Raw TEME state
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemeState {
    pub position_km: Vec3,
    pub velocity_km_s: Vec3,
}

impl Propagator {
    /// Build SGP4 model: parse TLE -> Elements -> Constants
    pub fn from_tle(record: &TleRecord) -> Result<Self, PropagationError> {
        let elements_err = |message: String| PropagationError::Elements {
            satellite_id: record.satellite_id.clone(),
            message,
        };
        let elements = sgp4::Elements::from_tle(
            Some(record.name.clone()),
            record.line1.as_bytes(),
            record.line2.as_bytes(),
        )
        .map_err(|e| elements_err(format!("{:?}", e)))?;
        let constants =
            sgp4::Constants::from_elements(&elements).map_err(|e| elements_err(format!("{:?}", e)))?;

        Ok(Self {
            satellite_id: record.satellite_id.clone(),
            constants,
            epoch: record.epoch,
            mean_motion_rev_per_day: elements.mean_motion,
        })
    }

    pub fn epoch(&self) -> DateTime<Utc> {
        self.epoch
    }

    pub fn mean_motion_rev_per_day(&self) -> f64 {
        self.mean_motion_rev_per_day
    }

    /// Propagate to `at`, returning TEME position (km) and velocity (km/s)
    pub fn propagate(&self, at: DateTime<Utc>) -> Result<TemeState, PropagationError> {
        let minutes = minutes_since_epoch(at, self.epoch);
        let prediction = self
            .constants
            .propagate(sgp4::MinutesSinceEpoch(minutes))
            .map_err(|e| PropagationError::Sgp4 {
                satellite_id: self.satellite_id.clone(),
                code: sgp4_error_code(&e),
                message: format!("{:?}", e),
            })?;

        let state = TemeState {
            position_km: Vec3::from_array(prediction.position),
            velocity_km_s: Vec3::from_array(prediction.velocity),
        };
        if !state.position_km.is_finite() || !state.velocity_km_s.is_finite() {
            return Err(PropagationError::Sgp4 {
                satellite_id: self.satellite_id.clone(),
                code: 6,
                message: "non-finite state vector".into(),
            });
        }
        Ok(state)
    }
}

/// Orbital period in minutes: 2π / mean motion (rad/min)
pub fn orbital_period(propagator: &Propagator) -> f64 {
    orbital_period_from_mean_motion(propagator.mean_motion_rev_per_day())
}

pub fn orbital_period_from_mean_motion(mean_motion_rev_per_day: f64) -> f64 {
    let rad_per_min = mean_motion_rev_per_day * std::f64::consts::TAU / 1440.0;
    if rad_per_min > 0.0 && rad_per_min.is_finite() {
        std::f64::consts::TAU / rad_per_min
    } else {
        DEFAULT_ORBITAL_PERIOD_MIN
    }
}
