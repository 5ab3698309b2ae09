//! Bulk writer for precomputed orbital samples

use crate::orbital::Position;
use crate::storage::records::{CacheStatistics, OrbitalCacheRecord};
use crate::storage::{OrbitalStore, StoreResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Maximum slant range accepted for a stored sample
pub const MAX_RANGE_KM: f64 = 3000.0;
/// Maximum satellite altitude accepted for a stored sample
pub const MAX_ALTITUDE_M: f64 = 2_000_000.0;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{field} is not finite")]
    NotFinite { field: &'static str },
    #[error("{field} = {value} outside [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
}

fn check(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::NotFinite { field });
    }
    if value < min || value > max {
        return Err(ValidationError::OutOfRange {
            field,
            value,
            min,
            max,
        });
    }
    Ok(())
}

/// Reject samples the orbital cache must never hold
pub fn validate_record(record: &OrbitalCacheRecord) -> Result<(), ValidationError> {
    check("latitude", record.latitude, -90.0, 90.0)?;
    check("longitude", record.longitude, -180.0, 180.0)?;
    check("altitude_m", record.altitude_km * 1000.0, 0.0, MAX_ALTITUDE_M)?;
    check("elevation_deg", record.elevation_deg, -90.0, 90.0)?;
    check("azimuth_deg", record.azimuth_deg, 0.0, 360.0)?;
    // Azimuth is half-open
    if record.azimuth_deg >= 360.0 {
        return Err(ValidationError::OutOfRange {
            field: "azimuth_deg",
            value: record.azimuth_deg,
            min: 0.0,
            max: 360.0,
        });
    }
    check("range_km", record.range_km, 0.0, MAX_RANGE_KM)?;
    for (field, finite) in [
        ("eci_km", record.eci_km.is_finite()),
        ("velocity_km_s", record.velocity_km_s.is_finite()),
        ("signal_strength_dbm", record.signal_strength_dbm.is_finite()),
    ] {
        if !finite {
            return Err(ValidationError::NotFinite { field });
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchStats {
    pub processed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub batches: u64,
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

impl BatchStats {
    pub fn success_rate(&self) -> f64 {
        let total = self.processed + self.failed + self.skipped;
        if total == 0 {
            return 0.0;
        }
        self.processed as f64 / total as f64
    }

    /// Fold another run into this one
    pub fn absorb(&mut self, other: BatchStats) {
        self.processed += other.processed;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.batches += other.batches;
        self.errors.extend(other.errors);
        self.duration_ms += other.duration_ms;
    }
}

/// Progress and ETA over a known amount of work
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    total: u64,
    completed: u64,
    started: Instant,
}

impl ProgressTracker {
    pub fn new(total: u64) -> Self {
        Self {
            total,
            completed: 0,
            started: Instant::now(),
        }
    }

    pub fn advance(&mut self, n: u64) {
        self.completed = (self.completed + n).min(self.total);
    }

    pub fn completed(&self) -> u64 {
        self.completed
    }

    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.completed as f64 / self.total as f64 * 100.0
    }

    /// Remaining time extrapolated from the rate so far
    pub fn eta(&self) -> Option<Duration> {
        if self.completed == 0 {
            return None;
        }
        let elapsed = self.started.elapsed().as_secs_f64();
        let remaining = (self.total - self.completed) as f64;
        Some(Duration::from_secs_f64(
            elapsed / self.completed as f64 * remaining,
        ))
    }
}

pub struct BatchProcessor {
    store: Arc<dyn OrbitalStore>,
    batch_size: usize,
}

impl BatchProcessor {
    pub fn new(store: Arc<dyn OrbitalStore>, batch_size: usize) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn store_handle(&self) -> Arc<dyn OrbitalStore> {
        Arc::clone(&self.store)
    }

    /// Validate and write records in batches, one transaction each.
    ///
    /// A failed batch is counted as failed and the remaining batches still run.
    pub async fn store(&self, records: Vec<OrbitalCacheRecord>) -> BatchStats {
        let started = Instant::now();
        let mut stats = BatchStats::default();

        let mut valid = Vec::with_capacity(records.len());
        for record in records {
            match validate_record(&record) {
                Ok(()) => valid.push(record),
                Err(e) => {
                    debug!(
                        "Skipping {} at {}: {}",
                        record.satellite_id, record.timestamp, e
                    );
                    stats.skipped += 1;
                }
            }
        }

        let mut progress = ProgressTracker::new(valid.len() as u64);
        for chunk in valid.chunks(self.batch_size) {
            stats.batches += 1;
            match self.store.upsert_orbital_batch(chunk).await {
                Ok(_) => stats.processed += chunk.len() as u64,
                Err(e) => {
                    warn!("Batch {} of {} records failed: {}", stats.batches, chunk.len(), e);
                    stats.failed += chunk.len() as u64;
                    stats.errors.push(format!("batch {}: {}", stats.batches, e));
                }
            }
            progress.advance(chunk.len() as u64);
            debug!("Batch progress {:.1}%", progress.percent());
        }

        stats.duration_ms = started.elapsed().as_millis() as u64;
        if stats.processed + stats.failed + stats.skipped > 0 {
            info!(
                "Stored {} records in {} batches ({} failed, {} skipped, {:.1}% success)",
                stats.processed,
                stats.batches,
                stats.failed,
                stats.skipped,
                stats.success_rate() * 100.0
            );
        }
        stats
    }

    pub async fn cleanup_old_data(
        &self,
        cutoff: DateTime<Utc>,
        observer: &Position,
    ) -> StoreResult<u64> {
        let deleted = self.store.delete_orbital_before(cutoff, observer).await?;
        info!("Removed {} cached samples older than {}", deleted, cutoff);
        Ok(deleted)
    }

    pub async fn get_statistics(&self, observer: &Position) -> StoreResult<CacheStatistics> {
        self.store.orbital_statistics(observer).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::tests::sample_record;
    use crate::storage::records::{D2MeasurementRecord, PreloadJobRow};
    use crate::storage::{MemoryStore, StoreError};
    use crate::tle::TleRecord;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn series(n: i64) -> Vec<OrbitalCacheRecord> {
        (0..n)
            .map(|i| sample_record("90001", t0() + ChronoDuration::seconds(30 * i)))
            .collect()
    }

    /// Wraps a MemoryStore and fails the second upsert call
    struct FlakyStore {
        inner: MemoryStore,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl OrbitalStore for FlakyStore {
        async fn upsert_orbital_batch(&self, records: &[OrbitalCacheRecord]) -> StoreResult<u64> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 1 {
                return Err(StoreError::Unavailable("connection reset".into()));
            }
            self.inner.upsert_orbital_batch(records).await
        }
        async fn orbital_record(
            &self,
            satellite_id: &str,
            timestamp: DateTime<Utc>,
        ) -> StoreResult<Option<OrbitalCacheRecord>> {
            self.inner.orbital_record(satellite_id, timestamp).await
        }
        async fn orbital_series(
            &self,
            satellite_id: &str,
            from: DateTime<Utc>,
            to: DateTime<Utc>,
        ) -> StoreResult<Vec<OrbitalCacheRecord>> {
            self.inner.orbital_series(satellite_id, from, to).await
        }
        async fn delete_orbital_before(
            &self,
            cutoff: DateTime<Utc>,
            observer: &Position,
        ) -> StoreResult<u64> {
            self.inner.delete_orbital_before(cutoff, observer).await
        }
        async fn orbital_statistics(&self, observer: &Position) -> StoreResult<CacheStatistics> {
            self.inner.orbital_statistics(observer).await
        }
        async fn upsert_tle(&self, record: &TleRecord, is_active: bool) -> StoreResult<()> {
            self.inner.upsert_tle(record, is_active).await
        }
        async fn save_d2_series(
            &self,
            scenario_hash: &str,
            records: &[D2MeasurementRecord],
        ) -> StoreResult<u64> {
            self.inner.save_d2_series(scenario_hash, records).await
        }
        async fn d2_series(&self, scenario_hash: &str) -> StoreResult<Vec<D2MeasurementRecord>> {
            self.inner.d2_series(scenario_hash).await
        }
        async fn record_job(&self, job: &PreloadJobRow) -> StoreResult<()> {
            self.inner.record_job(job).await
        }
    }

    #[test]
    fn test_validation_ranges() {
        let ok = sample_record("90001", t0());
        assert!(validate_record(&ok).is_ok());

        let mut r = ok.clone();
        r.latitude = 91.0;
        assert!(matches!(
            validate_record(&r),
            Err(ValidationError::OutOfRange { field: "latitude", .. })
        ));

        let mut r = ok.clone();
        r.azimuth_deg = 360.0;
        assert!(validate_record(&r).is_err());

        let mut r = ok.clone();
        r.altitude_km = 2500.0;
        assert!(validate_record(&r).is_err());

        let mut r = ok.clone();
        r.range_km = 3000.5;
        assert!(validate_record(&r).is_err());

        let mut r = ok.clone();
        r.elevation_deg = f64::NAN;
        assert_eq!(
            validate_record(&r),
            Err(ValidationError::NotFinite {
                field: "elevation_deg"
            })
        );
    }

    #[tokio::test]
    async fn test_store_in_batches() {
        let store = Arc::new(MemoryStore::new());
        let processor = BatchProcessor::new(store.clone(), 4);
        let stats = processor.store(series(10)).await;
        assert_eq!(stats.processed, 10);
        assert_eq!(stats.batches, 3);
        assert_eq!(stats.failed, 0);
        assert_eq!(store.orbital_len(), 10);
        assert_eq!(stats.success_rate(), 1.0);
    }

    #[tokio::test]
    async fn test_invalid_records_are_skipped() {
        let store = Arc::new(MemoryStore::new());
        let processor = BatchProcessor::new(store.clone(), DEFAULT_BATCH_SIZE);
        let mut records = series(5);
        records[2].latitude = 120.0;
        let stats = processor.store(records).await;
        assert_eq!(stats.processed, 4);
        assert_eq!(stats.skipped, 1);
        assert_eq!(store.orbital_len(), 4);
        assert!((stats.success_rate() - 0.8).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_failed_batch_does_not_stop_later_batches() {
        let flaky = Arc::new(FlakyStore {
            inner: MemoryStore::new(),
            calls: AtomicUsize::new(0),
        });
        let processor = BatchProcessor::new(flaky.clone(), 3);
        let stats = processor.store(series(9)).await;
        assert_eq!(stats.batches, 3);
        assert_eq!(stats.processed, 6);
        assert_eq!(stats.failed, 3);
        assert_eq!(stats.errors.len(), 1);
        assert_eq!(flaky.inner.orbital_len(), 6);
    }

    #[tokio::test]
    async fn test_cleanup_and_statistics() {
        let store = Arc::new(MemoryStore::new());
        let processor = BatchProcessor::new(store.clone(), DEFAULT_BATCH_SIZE);
        processor.store(series(4)).await;
        let observer = Position::new(24.9564, 121.3717, 0.1);

        let deleted = processor
            .cleanup_old_data(t0() + ChronoDuration::seconds(60), &observer)
            .await
            .unwrap();
        assert_eq!(deleted, 2);

        let stats = processor.get_statistics(&observer).await.unwrap();
        assert_eq!(stats.total_records, 2);
        assert_eq!(stats.unique_satellites, 1);
    }

    #[test]
    fn test_progress_tracker() {
        let mut tracker = ProgressTracker::new(200);
        assert_eq!(tracker.eta(), None);
        tracker.advance(50);
        assert_eq!(tracker.percent(), 25.0);
        assert!(tracker.eta().is_some());
        tracker.advance(500);
        assert_eq!(tracker.completed(), 200);
        assert_eq!(ProgressTracker::new(0).percent(), 100.0);
    }

    #[test]
    fn test_success_rate_empty() {
        assert_eq!(BatchStats::default().success_rate(), 0.0);
    }
}
