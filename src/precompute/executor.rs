//! Runs one precompute job window by window

use crate::orbital::{OrbitEngine, Position, PropagationError, RadioConfig, SignalModel};
use crate::precompute::job::{JobError, JobStatus};
use crate::precompute::manager::JobTable;
use crate::storage::{BatchProcessor, OrbitalCacheRecord};
use crate::tle::{TleRecord, TleSource, refresh_constellation};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Element sets older than this are considered worthless
const TLE_USEFUL_DAYS: f64 = 14.0;

pub const CALCULATION_METHOD: &str = "sgp4";

/// Quality of a sample given the age of the element set it came from
pub fn data_quality(tle_age_days: f64) -> f64 {
    (1.0 - tle_age_days.abs() / TLE_USEFUL_DAYS).clamp(0.0, 1.0)
}

enum Checkpoint {
    Proceed,
    Stop,
}

pub struct JobExecutor {
    engine: Arc<OrbitEngine>,
    processor: Arc<BatchProcessor>,
    source: Option<Arc<dyn TleSource>>,
    radio: RadioConfig,
    window: Duration,
    poll: std::time::Duration,
}

impl JobExecutor {
    pub fn new(engine: Arc<OrbitEngine>, processor: Arc<BatchProcessor>, radio: RadioConfig) -> Self {
        Self {
            engine,
            processor,
            source: None,
            radio,
            window: Duration::hours(1),
            poll: std::time::Duration::from_millis(200),
        }
    }

    /// Source used when a job's constellation is not in the TLE store
    pub fn with_tle_source(mut self, source: Arc<dyn TleSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window.max(Duration::minutes(1));
        self
    }

    pub fn with_poll_interval(mut self, poll: std::time::Duration) -> Self {
        self.poll = poll;
        self
    }

    pub fn engine(&self) -> &Arc<OrbitEngine> {
        &self.engine
    }

    pub fn processor(&self) -> &Arc<BatchProcessor> {
        &self.processor
    }

    async fn load_constellation(&self, constellation: &str) -> Result<Vec<TleRecord>, JobError> {
        let store = self.engine.tle_store();
        let records = store.by_constellation(constellation);
        if !records.is_empty() {
            return Ok(records);
        }
        if let Some(source) = &self.source {
            info!("Constellation {} not loaded, refreshing from TLE source", constellation);
            refresh_constellation(store, source.as_ref(), constellation)
                .await
                .map_err(|e| JobError::Execution(format!("TLE refresh failed: {:#}", e)))?;
        }
        let records = store.by_constellation(constellation);
        if records.is_empty() {
            return Err(JobError::Execution(format!(
                "no TLE data for constellation {}",
                constellation
            )));
        }
        Ok(records)
    }

    /// Block while paused; stop when the job left the running state
    async fn checkpoint(&self, job_id: Uuid, table: &JobTable) -> Checkpoint {
        loop {
            match table.status(job_id) {
                Some(JobStatus::Running) => return Checkpoint::Proceed,
                Some(JobStatus::Paused) => tokio::time::sleep(self.poll).await,
                _ => return Checkpoint::Stop,
            }
        }
    }

    /// Execute a job already marked Running.
    ///
    /// Returns `Ok` when the job completed or was cancelled, `Err` for job-level failures.
    pub(crate) async fn execute(&self, job_id: Uuid, table: &JobTable) -> Result<(), JobError> {
        let job = table.get(job_id).ok_or(JobError::NotFound(job_id))?;
        let tles = Arc::new(self.load_constellation(&job.constellation).await?);

        let steps = job.sample_times().count() as u64;
        table.update(job_id, |j| {
            j.total_calculations = steps * tles.len() as u64;
            j.processed_records = 0;
            j.failed_records = 0;
            j.error_message = None;
            j.update_progress();
        });
        info!(
            "Job {} running: {} satellites x {} steps from {} to {}",
            job.job_name,
            tles.len(),
            steps,
            job.start_time,
            job.end_time
        );

        let mut times = job.sample_times().peekable();
        while let Some(&window_start) = times.peek() {
            if let Checkpoint::Stop = self.checkpoint(job_id, table).await {
                info!("Job {} stopped between windows", job.job_name);
                return Ok(());
            }

            let window_end = window_start + self.window;
            let mut window_times = Vec::new();
            while let Some(t) = times.next_if(|t| *t < window_end) {
                window_times.push(t);
            }

            let engine = Arc::clone(&self.engine);
            let tles = Arc::clone(&tles);
            let radio = self.radio.clone();
            let observer = job.observer;
            let (records, propagation_failures) = tokio::task::spawn_blocking(move || {
                compute_window(&engine, &tles, &observer, &radio, &window_times)
            })
            .await
            .map_err(|e| JobError::Execution(format!("window task failed: {}", e)))?;

            let stats = self.processor.store(records).await;
            let snapshot = table.update(job_id, |j| {
                j.processed_records += stats.processed;
                j.failed_records += propagation_failures + stats.failed + stats.skipped;
                j.update_progress();
                j.to_row()
            });
            if let Some(row) = snapshot {
                debug!("Job {} at {:.1}%", job.job_name, row.progress);
                if let Err(e) = self.processor.store_handle().record_job(&row).await {
                    warn!("Could not mirror job {}: {}", job_id, e);
                }
            }
        }

        if let Checkpoint::Stop = self.checkpoint(job_id, table).await {
            return Ok(());
        }
        table.update(job_id, |j| {
            if j.status == JobStatus::Running {
                j.status = JobStatus::Completed;
                j.progress = 100.0;
                j.completed_at = Some(Utc::now());
                info!(
                    "Job {} completed: {} stored, {} failed",
                    j.job_name, j.processed_records, j.failed_records
                );
            }
        });
        Ok(())
    }
}

/// Propagate every satellite at every instant, time-major
fn compute_window(
    engine: &OrbitEngine,
    tles: &[TleRecord],
    observer: &Position,
    radio: &RadioConfig,
    times: &[DateTime<Utc>],
) -> (Vec<OrbitalCacheRecord>, u64) {
    let mut records = Vec::with_capacity(times.len() * tles.len());
    let mut failures = 0u64;
    for &at in times {
        for tle in tles {
            match sample(engine, tle, observer, radio, at) {
                Ok(record) => records.push(record),
                Err(e) => {
                    debug!("Skipping sample {} at {}: {}", tle.satellite_id, at, e);
                    failures += 1;
                }
            }
        }
    }
    (records, failures)
}

fn sample(
    engine: &OrbitEngine,
    tle: &TleRecord,
    observer: &Position,
    radio: &RadioConfig,
    at: DateTime<Utc>,
) -> Result<OrbitalCacheRecord, PropagationError> {
    let position = engine.propagate(&tle.satellite_id, at)?;
    let look = engine.look_angles(&position, observer);
    let budget = radio.link_budget(look.range_km, SignalModel::FreeSpace);
    let age_days = (at - tle.epoch).num_seconds() as f64 / 86_400.0;

    Ok(OrbitalCacheRecord {
        satellite_id: tle.satellite_id.clone(),
        norad_id: tle.norad_id,
        constellation: tle.constellation.clone(),
        timestamp: at,
        observer: *observer,
        eci_km: position.eci_km,
        latitude: position.latitude,
        longitude: position.longitude,
        altitude_km: position.altitude_km,
        velocity_km_s: position.velocity_km_s,
        elevation_deg: look.elevation_deg,
        azimuth_deg: look.azimuth_deg,
        range_km: look.range_km,
        signal_strength_dbm: budget.signal_strength_dbm,
        path_loss_db: budget.path_loss_db,
        sinr_db: budget.sinr_db,
        link_margin_db: budget.link_margin_db,
        calculation_method: CALCULATION_METHOD.to_string(),
        data_quality: data_quality(age_days),
    })
}
