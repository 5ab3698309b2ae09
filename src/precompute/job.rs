//! Precompute job model

use crate::orbital::Position;
use crate::storage::{PreloadJobRow, StoreError};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const MAX_JOB_RANGE_DAYS: i64 = 30;
pub const MIN_TIME_STEP_S: u32 = 1;
pub const MAX_TIME_STEP_S: u32 = 300;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("invalid job request: {0}")]
    Validation(String),
    #[error("job {0} not found")]
    NotFound(Uuid),
    #[error("job execution failed: {0}")]
    Execution(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Paused,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Paused => "paused",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a caller asks to have precomputed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    pub job_name: Option<String>,
    pub constellation: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub observer: Position,
    pub time_step_seconds: u32,
    /// 1 is the highest priority, 3 the lowest
    pub priority: u8,
    pub max_retries: Option<u32>,
}

impl JobRequest {
    pub fn validate(&self) -> Result<(), JobError> {
        if self.end_time <= self.start_time {
            return Err(JobError::Validation(
                "end_time must be after start_time".into(),
            ));
        }
        if self.end_time - self.start_time > Duration::days(MAX_JOB_RANGE_DAYS) {
            return Err(JobError::Validation(format!(
                "time range exceeds {} days",
                MAX_JOB_RANGE_DAYS
            )));
        }
        if !(MIN_TIME_STEP_S..=MAX_TIME_STEP_S).contains(&self.time_step_seconds) {
            return Err(JobError::Validation(format!(
                "time_step_seconds {} outside [{}, {}]",
                self.time_step_seconds, MIN_TIME_STEP_S, MAX_TIME_STEP_S
            )));
        }
        if !(1..=3).contains(&self.priority) {
            return Err(JobError::Validation(format!(
                "priority {} outside [1, 3]",
                self.priority
            )));
        }
        if self.constellation.trim().is_empty() {
            return Err(JobError::Validation("constellation is empty".into()));
        }
        if !self.observer.is_valid() {
            return Err(JobError::Validation("observer position is invalid".into()));
        }
        Ok(())
    }

    /// Number of sample instants in `[start_time, end_time)`
    pub fn step_count(&self) -> u64 {
        let seconds = (self.end_time - self.start_time).num_seconds().max(0) as u64;
        seconds / u64::from(self.time_step_seconds.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrecomputeJob {
    pub job_id: Uuid,
    pub job_name: String,
    pub constellation: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub observer: Position,
    pub time_step_seconds: u32,
    pub priority: u8,
    pub status: JobStatus,
    /// Percent complete, 0 to 100
    pub progress: f64,
    pub total_calculations: u64,
    pub processed_records: u64,
    pub failed_records: u64,
    pub retry_count: u32,
    pub max_retries: u32,
    pub error_message: Option<String>,
    pub estimated_duration_minutes: f64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
}

/// Rough sample throughput used for the advisory duration estimate
const ESTIMATED_SAMPLES_PER_MINUTE: f64 = 60_000.0;

impl PrecomputeJob {
    pub fn from_request(request: JobRequest, default_max_retries: u32, now: DateTime<Utc>) -> Self {
        let total_calculations = request.step_count();
        let job_name = request.job_name.clone().unwrap_or_else(|| {
            format!(
                "{}-{}",
                request.constellation,
                request.start_time.format("%Y%m%dT%H%M")
            )
        });
        Self {
            job_id: Uuid::new_v4(),
            job_name,
            constellation: request.constellation.to_lowercase(),
            start_time: request.start_time,
            end_time: request.end_time,
            observer: request.observer,
            time_step_seconds: request.time_step_seconds,
            priority: request.priority,
            status: JobStatus::Pending,
            progress: 0.0,
            total_calculations,
            processed_records: 0,
            failed_records: 0,
            retry_count: 0,
            max_retries: request.max_retries.unwrap_or(default_max_retries),
            error_message: None,
            estimated_duration_minutes: total_calculations as f64 / ESTIMATED_SAMPLES_PER_MINUTE,
            created_at: now,
            started_at: None,
            completed_at: None,
            failed_at: None,
        }
    }

    /// Sample instants, oldest first
    pub fn sample_times(&self) -> impl Iterator<Item = DateTime<Utc>> + '_ {
        let step_s = i64::from(self.time_step_seconds.max(1));
        let steps = (self.end_time - self.start_time).num_seconds().max(0) / step_s;
        (0..steps).map(move |k| self.start_time + Duration::seconds(step_s * k))
    }

    pub fn update_progress(&mut self) {
        if self.total_calculations == 0 {
            self.progress = 100.0;
            return;
        }
        let done = self.processed_records + self.failed_records;
        self.progress = (done as f64 / self.total_calculations as f64 * 100.0).min(100.0);
    }

    pub fn to_row(&self) -> PreloadJobRow {
        PreloadJobRow {
            job_id: self.job_id,
            job_name: self.job_name.clone(),
            constellation: self.constellation.clone(),
            status: self.status.as_str().to_string(),
            progress: self.progress,
            total_calculations: self.total_calculations,
            processed_records: self.processed_records,
            failed_records: self.failed_records,
            retry_count: self.retry_count,
            error_message: self.error_message.clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;

    pub(crate) fn taipei_request(minutes: i64, step: u32) -> JobRequest {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        JobRequest {
            job_name: None,
            constellation: "testnet".into(),
            start_time: start,
            end_time: start + Duration::minutes(minutes),
            observer: Position::new(24.9564, 121.3717, 0.1),
            time_step_seconds: step,
            priority: 2,
            max_retries: None,
        }
    }

    #[test]
    fn test_request_validation() {
        assert!(taipei_request(60, 30).validate().is_ok());

        let mut r = taipei_request(60, 30);
        r.end_time = r.start_time;
        assert!(matches!(r.validate(), Err(JobError::Validation(_))));

        assert!(taipei_request(60 * 24 * 31, 30).validate().is_err());
        assert!(taipei_request(60, 0).validate().is_err());
        assert!(taipei_request(60, 301).validate().is_err());

        let mut r = taipei_request(60, 30);
        r.priority = 4;
        assert!(r.validate().is_err());
    }

    #[test]
    fn test_total_calculations_at_creation() {
        let job = PrecomputeJob::from_request(taipei_request(60, 30), 3, Utc::now());
        assert_eq!(job.total_calculations, 120);
        assert_eq!(job.sample_times().count(), 120);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.max_retries, 3);
        assert_eq!(job.job_name, "testnet-20240101T0000");
    }

    #[test]
    fn test_sample_times_are_ordered() {
        let job = PrecomputeJob::from_request(taipei_request(5, 60), 3, Utc::now());
        let times: Vec<_> = job.sample_times().collect();
        assert_eq!(times.len(), 5);
        assert_eq!(times[0], job.start_time);
        assert_eq!(times[4], job.start_time + Duration::minutes(4));
    }

    #[test]
    fn test_progress() {
        let mut job = PrecomputeJob::from_request(taipei_request(60, 30), 3, Utc::now());
        job.processed_records = 50;
        job.failed_records = 10;
        job.update_progress();
        assert_eq!(job.progress, 50.0);
        assert_eq!(job.to_row().status, "pending");
    }
}
