//! In-process store with the same transactional contract as Postgres

use crate::orbital::Position;
use crate::storage::records::{
    CacheStatistics, D2MeasurementRecord, OrbitalCacheRecord, PreloadJobRow, SignalQualitySummary,
    same_observer,
};
use crate::storage::{OrbitalStore, StoreError, StoreResult};
use crate::tle::TleRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{PoisonError, RwLock};
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    orbital: BTreeMap<(String, DateTime<Utc>), OrbitalCacheRecord>,
    tle: HashMap<u32, (TleRecord, bool)>,
    d2: HashMap<String, Vec<D2MeasurementRecord>>,
    jobs: HashMap<Uuid, PreloadJobRow>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn orbital_len(&self) -> usize {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .orbital
            .len()
    }

    pub fn tle_row(&self, norad_id: u32) -> Option<(TleRecord, bool)> {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .tle
            .get(&norad_id)
            .cloned()
    }

    pub fn job_row(&self, job_id: Uuid) -> Option<PreloadJobRow> {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .jobs
            .get(&job_id)
            .cloned()
    }
}

fn check_constraints(record: &OrbitalCacheRecord) -> StoreResult<()> {
    if record.satellite_id.trim().is_empty() {
        return Err(StoreError::Constraint(
            "satellite_id must not be empty".into(),
        ));
    }
    if record.constellation.trim().is_empty() {
        return Err(StoreError::Constraint(format!(
            "constellation must not be empty for {}",
            record.satellite_id
        )));
    }
    Ok(())
}

#[async_trait]
impl OrbitalStore for MemoryStore {
    async fn upsert_orbital_batch(&self, records: &[OrbitalCacheRecord]) -> StoreResult<u64> {
        // Check the whole batch first so a violation leaves nothing behind
        records.iter().try_for_each(check_constraints)?;

        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        for record in records {
            tables
                .orbital
                .entry((record.satellite_id.clone(), record.timestamp))
                .and_modify(|existing| existing.merge_from(record))
                .or_insert_with(|| record.clone());
        }
        Ok(records.len() as u64)
    }

    async fn orbital_record(
        &self,
        satellite_id: &str,
        timestamp: DateTime<Utc>,
    ) -> StoreResult<Option<OrbitalCacheRecord>> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        Ok(tables
            .orbital
            .get(&(satellite_id.to_string(), timestamp))
            .cloned())
    }

    async fn orbital_series(
        &self,
        satellite_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<OrbitalCacheRecord>> {
        if to < from {
            return Ok(Vec::new());
        }
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        let lo = (satellite_id.to_string(), from);
        let hi = (satellite_id.to_string(), to);
        Ok(tables
            .orbital
            .range(lo..=hi)
            .map(|(_, r)| r.clone())
            .collect())
    }

    async fn delete_orbital_before(
        &self,
        cutoff: DateTime<Utc>,
        observer: &Position,
    ) -> StoreResult<u64> {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        let before = tables.orbital.len();
        tables
            .orbital
            .retain(|_, r| !(r.timestamp < cutoff && same_observer(&r.observer, observer)));
        Ok((before - tables.orbital.len()) as u64)
    }

    async fn orbital_statistics(&self, observer: &Position) -> StoreResult<CacheStatistics> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        let rows: Vec<&OrbitalCacheRecord> = tables
            .orbital
            .values()
            .filter(|r| same_observer(&r.observer, observer))
            .collect();
        if rows.is_empty() {
            return Ok(CacheStatistics::default());
        }

        let satellites: BTreeSet<&str> = rows.iter().map(|r| r.satellite_id.as_str()).collect();
        let constellations: BTreeSet<String> =
            rows.iter().map(|r| r.constellation.clone()).collect();
        let first = rows.iter().map(|r| r.timestamp).min();
        let last = rows.iter().map(|r| r.timestamp).max();
        let n = rows.len() as f64;

        Ok(CacheStatistics {
            total_records: rows.len() as u64,
            unique_satellites: satellites.len() as u64,
            constellations: constellations.into_iter().collect(),
            time_range: first.zip(last),
            signal_quality: SignalQualitySummary {
                avg_signal_dbm: Some(rows.iter().map(|r| r.signal_strength_dbm).sum::<f64>() / n),
                min_signal_dbm: rows.iter().map(|r| r.signal_strength_dbm).reduce(f64::min),
                max_signal_dbm: rows.iter().map(|r| r.signal_strength_dbm).reduce(f64::max),
                avg_elevation_deg: Some(rows.iter().map(|r| r.elevation_deg).sum::<f64>() / n),
            },
        })
    }

    async fn upsert_tle(&self, record: &TleRecord, is_active: bool) -> StoreResult<()> {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        tables
            .tle
            .insert(record.norad_id, (record.clone(), is_active));
        Ok(())
    }

    async fn save_d2_series(
        &self,
        scenario_hash: &str,
        records: &[D2MeasurementRecord],
    ) -> StoreResult<u64> {
        if records.iter().any(|r| r.scenario_hash != scenario_hash) {
            return Err(StoreError::Constraint(format!(
                "series contains rows for a scenario other than {}",
                scenario_hash
            )));
        }
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        tables
            .d2
            .insert(scenario_hash.to_string(), records.to_vec());
        Ok(records.len() as u64)
    }

    async fn d2_series(&self, scenario_hash: &str) -> StoreResult<Vec<D2MeasurementRecord>> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        Ok(tables.d2.get(scenario_hash).cloned().unwrap_or_default())
    }

    async fn record_job(&self, job: &PreloadJobRow) -> StoreResult<()> {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        tables.jobs.insert(job.job_id, job.clone());
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::orbital::Vec3;
    use chrono::{Duration, TimeZone};

    pub(crate) fn sample_record(satellite_id: &str, timestamp: DateTime<Utc>) -> OrbitalCacheRecord {
        OrbitalCacheRecord {
            satellite_id: satellite_id.to_string(),
            norad_id: satellite_id.parse().unwrap_or(0),
            constellation: "testnet".into(),
            timestamp,
            observer: Position::new(24.9564, 121.3717, 0.1),
            eci_km: Vec3::new(-4000.0, 3000.0, 4500.0),
            latitude: 25.0,
            longitude: 121.0,
            altitude_km: 550.0,
            velocity_km_s: Vec3::new(1.0, -6.0, 4.0),
            elevation_deg: 45.0,
            azimuth_deg: 120.0,
            range_km: 750.0,
            signal_strength_dbm: -126.0,
            path_loss_db: 156.0,
            sinr_db: -6.0,
            link_margin_db: -16.0,
            calculation_method: "sgp4".into(),
            data_quality: 1.0,
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let store = MemoryStore::new();
        let record = sample_record("90001", t0());
        store.upsert_orbital_batch(&[record.clone()]).await.unwrap();
        store.upsert_orbital_batch(&[record.clone()]).await.unwrap();
        assert_eq!(store.orbital_len(), 1);
        assert_eq!(
            store.orbital_record("90001", t0()).await.unwrap(),
            Some(record)
        );
    }

    #[tokio::test]
    async fn test_upsert_overwrites_derived_fields_only() {
        let store = MemoryStore::new();
        store
            .upsert_orbital_batch(&[sample_record("90001", t0())])
            .await
            .unwrap();

        let mut newer = sample_record("90001", t0());
        newer.elevation_deg = 50.0;
        newer.signal_strength_dbm = -120.0;
        newer.constellation = "renamed".into();
        newer.norad_id = 1;
        store.upsert_orbital_batch(&[newer]).await.unwrap();

        let stored = store.orbital_record("90001", t0()).await.unwrap().unwrap();
        assert_eq!(stored.elevation_deg, 50.0);
        assert_eq!(stored.signal_strength_dbm, -120.0);
        assert_eq!(stored.constellation, "testnet");
        assert_eq!(stored.norad_id, 90001);
    }

    #[tokio::test]
    async fn test_constraint_violation_rolls_back_whole_batch() {
        let store = MemoryStore::new();
        let good = sample_record("90001", t0());
        let bad = sample_record("", t0() + Duration::seconds(30));
        let err = store.upsert_orbital_batch(&[good, bad]).await.unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)));
        assert_eq!(store.orbital_len(), 0);
    }

    #[tokio::test]
    async fn test_series_range_and_order() {
        let store = MemoryStore::new();
        let batch: Vec<_> = (0..10)
            .rev()
            .map(|i| sample_record("90001", t0() + Duration::seconds(30 * i)))
            .chain([sample_record("90002", t0())])
            .collect();
        store.upsert_orbital_batch(&batch).await.unwrap();

        let series = store
            .orbital_series("90001", t0() + Duration::seconds(60), t0() + Duration::seconds(150))
            .await
            .unwrap();
        assert_eq!(series.len(), 4);
        assert!(series.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[tokio::test]
    async fn test_delete_before_respects_observer() {
        let store = MemoryStore::new();
        let mut other = sample_record("90002", t0());
        other.observer = Position::new(0.0, 0.0, 0.0);
        store
            .upsert_orbital_batch(&[
                sample_record("90001", t0()),
                sample_record("90001", t0() + Duration::hours(2)),
                other,
            ])
            .await
            .unwrap();

        let observer = Position::new(24.9564, 121.3717, 0.1);
        let deleted = store
            .delete_orbital_before(t0() + Duration::hours(1), &observer)
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.orbital_len(), 2);
    }

    #[tokio::test]
    async fn test_statistics() {
        let store = MemoryStore::new();
        let mut second = sample_record("90002", t0() + Duration::minutes(5));
        second.signal_strength_dbm = -130.0;
        second.elevation_deg = 15.0;
        store
            .upsert_orbital_batch(&[sample_record("90001", t0()), second])
            .await
            .unwrap();

        let stats = store
            .orbital_statistics(&Position::new(24.9564, 121.3717, 0.1))
            .await
            .unwrap();
        assert_eq!(stats.total_records, 2);
        assert_eq!(stats.unique_satellites, 2);
        assert_eq!(stats.constellations, vec!["testnet".to_string()]);
        assert_eq!(stats.time_range, Some((t0(), t0() + Duration::minutes(5))));
        assert_eq!(stats.signal_quality.min_signal_dbm, Some(-130.0));
        assert_eq!(stats.signal_quality.max_signal_dbm, Some(-126.0));
        assert_eq!(stats.signal_quality.avg_elevation_deg, Some(30.0));

        let empty = store
            .orbital_statistics(&Position::new(0.0, 0.0, 0.0))
            .await
            .unwrap();
        assert_eq!(empty.total_records, 0);
    }
}
