//! Persistence for precomputed results
//!
//! `OrbitalStore` is the seam between the pipeline and a database. Every
//! `upsert_orbital_batch` call is one transaction: it either lands completely
//! or leaves the store untouched.

use crate::orbital::Position;
use crate::tle::TleRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub mod batch;
pub mod memory;
pub mod postgres;
pub mod records;

pub use batch::{BatchProcessor, BatchStats, ProgressTracker, ValidationError, validate_record};
pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use records::{
    CacheStatistics, D2MeasurementRecord, OrbitalCacheRecord, PrecomputeResult, PreloadJobRow,
    SignalQualitySummary,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("constraint violated: {0}")]
    Constraint(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait OrbitalStore: Send + Sync {
    /// Upsert a batch keyed by (satellite_id, timestamp) inside one transaction
    async fn upsert_orbital_batch(&self, records: &[OrbitalCacheRecord]) -> StoreResult<u64>;

    async fn orbital_record(
        &self,
        satellite_id: &str,
        timestamp: DateTime<Utc>,
    ) -> StoreResult<Option<OrbitalCacheRecord>>;

    /// Samples of one satellite in `[from, to]`, oldest first
    async fn orbital_series(
        &self,
        satellite_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<OrbitalCacheRecord>>;

    async fn delete_orbital_before(
        &self,
        cutoff: DateTime<Utc>,
        observer: &Position,
    ) -> StoreResult<u64>;

    async fn orbital_statistics(&self, observer: &Position) -> StoreResult<CacheStatistics>;

    async fn upsert_tle(&self, record: &TleRecord, is_active: bool) -> StoreResult<()>;

    /// Replace the stored series for a scenario hash
    async fn save_d2_series(
        &self,
        scenario_hash: &str,
        records: &[D2MeasurementRecord],
    ) -> StoreResult<u64>;

    async fn d2_series(&self, scenario_hash: &str) -> StoreResult<Vec<D2MeasurementRecord>>;

    async fn record_job(&self, job: &PreloadJobRow) -> StoreResult<()>;
}
