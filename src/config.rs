//! Simulator configuration loaded from TOML

use crate::orbital::RadioConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "SIMSAT_CONFIG";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub jobs: JobsConfig,
    pub batch: BatchConfig,
    pub radio: RadioConfig,
    pub compensation: CompensationConfig,
    pub broadcast: BroadcastConfig,
    pub tle: TleConfig,
    pub logging: LoggingConfig,
    /// Postgres URL; the in-memory store is used when absent
    pub database_url: Option<String>,
}

impl SimulatorConfig {
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Load from `SIMSAT_CONFIG` if set, defaults otherwise
    pub fn from_env() -> anyhow::Result<Self> {
        match std::env::var(CONFIG_ENV) {
            Ok(path) => Self::load(path),
            Err(_) => Ok(Self::default()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    pub max_concurrent_jobs: usize,
    pub default_max_retries: u32,
    /// Scheduler tick and paused-job poll interval
    pub poll_interval_ms: u64,
    /// Width of one execution window
    pub window_minutes: i64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            default_max_retries: 3,
            poll_interval_ms: 200,
            window_minutes: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub batch_size: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: crate::storage::batch::DEFAULT_BATCH_SIZE,
        }
    }
}

/// Constants of the A4 position/time compensation model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompensationConfig {
    pub max_elevation_diff_deg: f64,
    pub km_per_degree: f64,
    pub max_delta_s_km: f64,
    pub signal_db_per_km: f64,
    pub cache_ttl_s: i64,
}

impl Default for CompensationConfig {
    fn default() -> Self {
        Self {
            max_elevation_diff_deg: 10.0,
            km_per_degree: 1.0,
            max_delta_s_km: 10.0,
            signal_db_per_km: 1.5,
            cache_ttl_s: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    pub validity_hours: i64,
    pub expiring_threshold_hours: i64,
    pub max_neighbors: usize,
    pub optimal_distance_km: f64,
    pub regeneration_interval_minutes: u64,
    pub gnss_time_offset_ms: f64,
    pub history_len: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            validity_hours: 24,
            expiring_threshold_hours: 2,
            max_neighbors: 8,
            optimal_distance_km: 600.0,
            regeneration_interval_minutes: 30,
            gnss_time_offset_ms: 0.0,
            history_len: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TleConfig {
    pub celestrak_base_url: String,
    pub cache_expiration_days: i64,
    pub max_age_hours: f64,
    /// Optional local TLE file ingested at startup
    pub tle_file: Option<String>,
}

impl Default for TleConfig {
    fn default() -> Self {
        Self {
            celestrak_base_url: "https://celestrak.org/NORAD/elements/gp.php".to_string(),
            cache_expiration_days: 7,
            max_age_hours: 48.0,
            tle_file: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
