//! Event parameters and their validation

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Time-to-trigger values accepted by the RRC measurement configuration
pub const VALID_TTT_MS: [u32; 12] = [0, 40, 64, 80, 100, 128, 160, 256, 320, 480, 512, 640];

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{field} = {value} outside [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("time_to_trigger {0} ms is not a standard value")]
    InvalidTimeToTrigger(u32),
    #[error("parameters for {actual} cannot drive a {expected} evaluation")]
    EventMismatch {
        expected: EventType,
        actual: EventType,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventType {
    A4,
    A5,
    D2,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventType::A4 => "A4",
            EventType::A5 => "A5",
            EventType::D2 => "D2",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct A4Params {
    pub threshold_dbm: f64,
    pub hysteresis_db: f64,
    pub time_to_trigger_ms: u32,
}

impl Default for A4Params {
    fn default() -> Self {
        Self {
            threshold_dbm: -80.0,
            hysteresis_db: 3.0,
            time_to_trigger_ms: 160,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct A5Params {
    /// PSCell must rise above this
    pub threshold1_dbm: f64,
    /// PCell must fall below this
    pub threshold2_dbm: f64,
    pub hysteresis_db: f64,
    pub time_to_trigger_ms: u32,
}

impl Default for A5Params {
    fn default() -> Self {
        Self {
            threshold1_dbm: -70.0,
            threshold2_dbm: -72.0,
            hysteresis_db: 3.0,
            time_to_trigger_ms: 160,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct D2Params {
    /// Serving-to-reference satellite distance threshold in m
    pub thresh1_m: f64,
    /// UE-to-reference ground distance threshold in m
    pub thresh2_m: f64,
    pub hysteresis_m: f64,
    pub time_to_trigger_ms: u32,
    pub serving_satellite: Option<String>,
}

impl Default for D2Params {
    fn default() -> Self {
        Self {
            thresh1_m: 800_000.0,
            thresh2_m: 30_000.0,
            hysteresis_m: 500.0,
            time_to_trigger_ms: 160,
            serving_satellite: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum EventParameters {
    A4(A4Params),
    A5(A5Params),
    D2(D2Params),
}

impl EventParameters {
    pub fn event_type(&self) -> EventType {
        match self {
            EventParameters::A4(_) => EventType::A4,
            EventParameters::A5(_) => EventType::A5,
            EventParameters::D2(_) => EventType::D2,
        }
    }

    pub fn time_to_trigger_ms(&self) -> u32 {
        match self {
            EventParameters::A4(p) => p.time_to_trigger_ms,
            EventParameters::A5(p) => p.time_to_trigger_ms,
            EventParameters::D2(p) => p.time_to_trigger_ms,
        }
    }

    /// Default parameters for an event type
    pub fn defaults(event_type: EventType) -> Self {
        match event_type {
            EventType::A4 => EventParameters::A4(A4Params::default()),
            EventType::A5 => EventParameters::A5(A5Params::default()),
            EventType::D2 => EventParameters::D2(D2Params::default()),
        }
    }

    /// Range-check every field; values are never clamped
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            EventParameters::A4(p) => {
                in_range("threshold_dbm", p.threshold_dbm, -100.0, -40.0)?;
                in_range("hysteresis_db", p.hysteresis_db, 0.0, 10.0)?;
                valid_ttt(p.time_to_trigger_ms)
            }
            EventParameters::A5(p) => {
                in_range("threshold1_dbm", p.threshold1_dbm, -100.0, -40.0)?;
                in_range("threshold2_dbm", p.threshold2_dbm, -100.0, -40.0)?;
                in_range("hysteresis_db", p.hysteresis_db, 0.0, 10.0)?;
                valid_ttt(p.time_to_trigger_ms)
            }
            EventParameters::D2(p) => {
                in_range("thresh1_m", p.thresh1_m, 400_000.0, 2_000_000.0)?;
                in_range("thresh2_m", p.thresh2_m, 100.0, 50_000.0)?;
                in_range("hysteresis_m", p.hysteresis_m, 100.0, 5000.0)?;
                valid_ttt(p.time_to_trigger_ms)
            }
        }
    }
}

fn in_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), ConfigError> {
    if value.is_finite() && (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value,
            min,
            max,
        })
    }
}

fn valid_ttt(ms: u32) -> Result<(), ConfigError> {
    if VALID_TTT_MS.contains(&ms) {
        Ok(())
    } else {
        Err(ConfigError::InvalidTimeToTrigger(ms))
    }
}
