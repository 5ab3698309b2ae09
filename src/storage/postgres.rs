//! Postgres-backed store

use crate::orbital::{Position, Vec3};
use crate::storage::records::{
    CacheStatistics, D2MeasurementRecord, OrbitalCacheRecord, PreloadJobRow, SignalQualitySummary,
};
use crate::storage::{OrbitalStore, StoreResult};
use crate::tle::TleRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

/// Observer match tolerance shared by cleanup and statistics queries
const OBSERVER_FILTER: &str = "abs(observer_latitude - $1) < 1e-6
     AND abs(observer_longitude - $2) < 1e-6
     AND abs(observer_altitude_km - $3) < 1e-4";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Create tables and indexes if they do not exist
    pub async fn init_schema(&self) -> StoreResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS satellite_tle_data(
                id BIGSERIAL PRIMARY KEY,
                satellite_id TEXT NOT NULL,
                norad_id BIGINT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                constellation TEXT NOT NULL,
                line1 TEXT NOT NULL,
                line2 TEXT NOT NULL,
                epoch TIMESTAMPTZ NOT NULL,
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS satellite_orbital_cache(
                id BIGSERIAL PRIMARY KEY,
                satellite_id TEXT NOT NULL CHECK (satellite_id <> ''),
                norad_id BIGINT NOT NULL,
                constellation TEXT NOT NULL CHECK (constellation <> ''),
                timestamp TIMESTAMPTZ NOT NULL,
                observer_latitude DOUBLE PRECISION NOT NULL,
                observer_longitude DOUBLE PRECISION NOT NULL,
                observer_altitude_km DOUBLE PRECISION NOT NULL,
                position_x DOUBLE PRECISION NOT NULL,
                position_y DOUBLE PRECISION NOT NULL,
                position_z DOUBLE PRECISION NOT NULL,
                latitude DOUBLE PRECISION NOT NULL,
                longitude DOUBLE PRECISION NOT NULL,
                altitude_km DOUBLE PRECISION NOT NULL,
                velocity_x DOUBLE PRECISION NOT NULL,
                velocity_y DOUBLE PRECISION NOT NULL,
                velocity_z DOUBLE PRECISION NOT NULL,
                elevation_deg DOUBLE PRECISION NOT NULL,
                azimuth_deg DOUBLE PRECISION NOT NULL,
                range_km DOUBLE PRECISION NOT NULL,
                signal_strength_dbm DOUBLE PRECISION NOT NULL,
                path_loss_db DOUBLE PRECISION NOT NULL,
                sinr_db DOUBLE PRECISION NOT NULL,
                link_margin_db DOUBLE PRECISION NOT NULL,
                calculation_method TEXT NOT NULL,
                data_quality DOUBLE PRECISION NOT NULL,
                UNIQUE (satellite_id, timestamp)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS ix_orbital_cache_observer_time
             ON satellite_orbital_cache(observer_latitude, observer_longitude, timestamp)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS d2_measurement_cache(
                id BIGSERIAL PRIMARY KEY,
                scenario_hash TEXT NOT NULL,
                scenario_name TEXT NOT NULL,
                timestamp TIMESTAMPTZ NOT NULL,
                ue_latitude DOUBLE PRECISION NOT NULL,
                ue_longitude DOUBLE PRECISION NOT NULL,
                ue_altitude_km DOUBLE PRECISION NOT NULL,
                fixed_ref_latitude DOUBLE PRECISION NOT NULL,
                fixed_ref_longitude DOUBLE PRECISION NOT NULL,
                fixed_ref_altitude_km DOUBLE PRECISION NOT NULL,
                reference_satellite_id TEXT NOT NULL,
                serving_satellite_id TEXT NOT NULL,
                ref_latitude DOUBLE PRECISION NOT NULL,
                ref_longitude DOUBLE PRECISION NOT NULL,
                ref_altitude_km DOUBLE PRECISION NOT NULL,
                satellite_distance_m DOUBLE PRECISION NOT NULL,
                ground_distance_m DOUBLE PRECISION NOT NULL,
                thresh1_m DOUBLE PRECISION NOT NULL,
                thresh2_m DOUBLE PRECISION NOT NULL,
                hysteresis_m DOUBLE PRECISION NOT NULL,
                trigger_condition_met BOOLEAN NOT NULL,
                entering BOOLEAN NOT NULL,
                leaving BOOLEAN NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS ix_d2_cache_hash
             ON d2_measurement_cache(scenario_hash, timestamp)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS satellite_data_preload_jobs(
                job_id UUID PRIMARY KEY,
                job_name TEXT NOT NULL,
                constellation TEXT NOT NULL,
                status TEXT NOT NULL,
                progress DOUBLE PRECISION NOT NULL,
                total_calculations BIGINT NOT NULL,
                processed_records BIGINT NOT NULL,
                failed_records BIGINT NOT NULL,
                retry_count INTEGER NOT NULL,
                error_message TEXT,
                created_at TIMESTAMPTZ NOT NULL,
                started_at TIMESTAMPTZ,
                completed_at TIMESTAMPTZ
            )",
        )
        .execute(&self.pool)
        .await?;

        info!("Database schema ready");
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct OrbitalRow {
    satellite_id: String,
    norad_id: i64,
    constellation: String,
    timestamp: DateTime<Utc>,
    observer_latitude: f64,
    observer_longitude: f64,
    observer_altitude_km: f64,
    position_x: f64,
    position_y: f64,
    position_z: f64,
    latitude: f64,
    longitude: f64,
    altitude_km: f64,
    velocity_x: f64,
    velocity_y: f64,
    velocity_z: f64,
    elevation_deg: f64,
    azimuth_deg: f64,
    range_km: f64,
    signal_strength_dbm: f64,
    path_loss_db: f64,
    sinr_db: f64,
    link_margin_db: f64,
    calculation_method: String,
    data_quality: f64,
}

impl From<OrbitalRow> for OrbitalCacheRecord {
    fn from(r: OrbitalRow) -> Self {
        OrbitalCacheRecord {
            satellite_id: r.satellite_id,
            norad_id: u32::try_from(r.norad_id).unwrap_or_default(),
            constellation: r.constellation,
            timestamp: r.timestamp,
            observer: Position::new(
                r.observer_latitude,
                r.observer_longitude,
                r.observer_altitude_km,
            ),
            eci_km: Vec3::new(r.position_x, r.position_y, r.position_z),
            latitude: r.latitude,
            longitude: r.longitude,
            altitude_km: r.altitude_km,
            velocity_km_s: Vec3::new(r.velocity_x, r.velocity_y, r.velocity_z),
            elevation_deg: r.elevation_deg,
            azimuth_deg: r.azimuth_deg,
            range_km: r.range_km,
            signal_strength_dbm: r.signal_strength_dbm,
            path_loss_db: r.path_loss_db,
            sinr_db: r.sinr_db,
            link_margin_db: r.link_margin_db,
            calculation_method: r.calculation_method,
            data_quality: r.data_quality,
        }
    }
}

const ORBITAL_COLUMNS: &str = "satellite_id, norad_id, constellation, timestamp,
    observer_latitude, observer_longitude, observer_altitude_km,
    position_x, position_y, position_z, latitude, longitude, altitude_km,
    velocity_x, velocity_y, velocity_z, elevation_deg, azimuth_deg, range_km,
    signal_strength_dbm, path_loss_db, sinr_db, link_margin_db, calculation_method, data_quality";

#[derive(sqlx::FromRow)]
struct D2Row {
    scenario_hash: String,
    scenario_name: String,
    timestamp: DateTime<Utc>,
    ue_latitude: f64,
    ue_longitude: f64,
    ue_altitude_km: f64,
    fixed_ref_latitude: f64,
    fixed_ref_longitude: f64,
    fixed_ref_altitude_km: f64,
    reference_satellite_id: String,
    serving_satellite_id: String,
    ref_latitude: f64,
    ref_longitude: f64,
    ref_altitude_km: f64,
    satellite_distance_m: f64,
    ground_distance_m: f64,
    thresh1_m: f64,
    thresh2_m: f64,
    hysteresis_m: f64,
    trigger_condition_met: bool,
    entering: bool,
    leaving: bool,
}

impl From<D2Row> for D2MeasurementRecord {
    fn from(r: D2Row) -> Self {
        D2MeasurementRecord {
            scenario_hash: r.scenario_hash,
            scenario_name: r.scenario_name,
            timestamp: r.timestamp,
            ue_position: Position::new(r.ue_latitude, r.ue_longitude, r.ue_altitude_km),
            fixed_ref_position: Position::new(
                r.fixed_ref_latitude,
                r.fixed_ref_longitude,
                r.fixed_ref_altitude_km,
            ),
            reference_satellite_id: r.reference_satellite_id,
            serving_satellite_id: r.serving_satellite_id,
            reference_position: Position::new(r.ref_latitude, r.ref_longitude, r.ref_altitude_km),
            satellite_distance_m: r.satellite_distance_m,
            ground_distance_m: r.ground_distance_m,
            thresh1_m: r.thresh1_m,
            thresh2_m: r.thresh2_m,
            hysteresis_m: r.hysteresis_m,
            trigger_condition_met: r.trigger_condition_met,
            entering: r.entering,
            leaving: r.leaving,
        }
    }
}

#[async_trait]
impl OrbitalStore for PgStore {
    async fn upsert_orbital_batch(&self, records: &[OrbitalCacheRecord]) -> StoreResult<u64> {
        let mut tx = self.pool.begin().await?;
        let mut written = 0u64;
        for r in records {
            // Identity columns (norad_id, constellation) keep their first value
            let result = sqlx::query(
                "INSERT INTO satellite_orbital_cache(
                    satellite_id, norad_id, constellation, timestamp,
                    observer_latitude, observer_longitude, observer_altitude_km,
                    position_x, position_y, position_z, latitude, longitude, altitude_km,
                    velocity_x, velocity_y, velocity_z, elevation_deg, azimuth_deg, range_km,
                    signal_strength_dbm, path_loss_db, sinr_db, link_margin_db,
                    calculation_method, data_quality)
                 VALUES($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19,$20,$21,$22,$23,$24,$25)
                 ON CONFLICT (satellite_id, timestamp) DO UPDATE
                 SET observer_latitude=EXCLUDED.observer_latitude,
                     observer_longitude=EXCLUDED.observer_longitude,
                     observer_altitude_km=EXCLUDED.observer_altitude_km,
                     position_x=EXCLUDED.position_x, position_y=EXCLUDED.position_y,
                     position_z=EXCLUDED.position_z, latitude=EXCLUDED.latitude,
                     longitude=EXCLUDED.longitude, altitude_km=EXCLUDED.altitude_km,
                     velocity_x=EXCLUDED.velocity_x, velocity_y=EXCLUDED.velocity_y,
                     velocity_z=EXCLUDED.velocity_z, elevation_deg=EXCLUDED.elevation_deg,
                     azimuth_deg=EXCLUDED.azimuth_deg, range_km=EXCLUDED.range_km,
                     signal_strength_dbm=EXCLUDED.signal_strength_dbm,
                     path_loss_db=EXCLUDED.path_loss_db, sinr_db=EXCLUDED.sinr_db,
                     link_margin_db=EXCLUDED.link_margin_db,
                     calculation_method=EXCLUDED.calculation_method,
                     data_quality=EXCLUDED.data_quality",
            )
            .bind(&r.satellite_id)
            .bind(i64::from(r.norad_id))
            .bind(&r.constellation)
            .bind(r.timestamp)
            .bind(r.observer.latitude)
            .bind(r.observer.longitude)
            .bind(r.observer.altitude_km)
            .bind(r.eci_km.x)
            .bind(r.eci_km.y)
            .bind(r.eci_km.z)
            .bind(r.latitude)
            .bind(r.longitude)
            .bind(r.altitude_km)
            .bind(r.velocity_km_s.x)
            .bind(r.velocity_km_s.y)
            .bind(r.velocity_km_s.z)
            .bind(r.elevation_deg)
            .bind(r.azimuth_deg)
            .bind(r.range_km)
            .bind(r.signal_strength_dbm)
            .bind(r.path_loss_db)
            .bind(r.sinr_db)
            .bind(r.link_margin_db)
            .bind(&r.calculation_method)
            .bind(r.data_quality)
            .execute(&mut *tx)
            .await?;
            written += result.rows_affected();
        }
        tx.commit().await?;
        Ok(written)
    }

    async fn orbital_record(
        &self,
        satellite_id: &str,
        timestamp: DateTime<Utc>,
    ) -> StoreResult<Option<OrbitalCacheRecord>> {
        let sql = format!(
            "SELECT {} FROM satellite_orbital_cache WHERE satellite_id = $1 AND timestamp = $2",
            ORBITAL_COLUMNS
        );
        let row = sqlx::query_as::<_, OrbitalRow>(&sql)
            .bind(satellite_id)
            .bind(timestamp)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Into::into))
    }

    async fn orbital_series(
        &self,
        satellite_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<OrbitalCacheRecord>> {
        let sql = format!(
            "SELECT {} FROM satellite_orbital_cache
             WHERE satellite_id = $1 AND timestamp BETWEEN $2 AND $3
             ORDER BY timestamp",
            ORBITAL_COLUMNS
        );
        let rows = sqlx::query_as::<_, OrbitalRow>(&sql)
            .bind(satellite_id)
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn delete_orbital_before(
        &self,
        cutoff: DateTime<Utc>,
        observer: &Position,
    ) -> StoreResult<u64> {
        let sql = format!(
            "DELETE FROM satellite_orbital_cache WHERE {} AND timestamp < $4",
            OBSERVER_FILTER
        );
        let result = sqlx::query(&sql)
            .bind(observer.latitude)
            .bind(observer.longitude)
            .bind(observer.altitude_km)
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn orbital_statistics(&self, observer: &Position) -> StoreResult<CacheStatistics> {
        let sql = format!(
            "SELECT count(*), count(DISTINCT satellite_id), min(timestamp), max(timestamp),
                    avg(signal_strength_dbm), min(signal_strength_dbm),
                    max(signal_strength_dbm), avg(elevation_deg)
             FROM satellite_orbital_cache WHERE {}",
            OBSERVER_FILTER
        );
        let (total, unique, first, last, avg_sig, min_sig, max_sig, avg_el) =
            sqlx::query_as::<
                _,
                (
                    i64,
                    i64,
                    Option<DateTime<Utc>>,
                    Option<DateTime<Utc>>,
                    Option<f64>,
                    Option<f64>,
                    Option<f64>,
                    Option<f64>,
                ),
            >(&sql)
            .bind(observer.latitude)
            .bind(observer.longitude)
            .bind(observer.altitude_km)
            .fetch_one(&self.pool)
            .await?;

        let constellations_sql = format!(
            "SELECT DISTINCT constellation FROM satellite_orbital_cache WHERE {} ORDER BY constellation",
            OBSERVER_FILTER
        );
        let constellations = sqlx::query_as::<_, (String,)>(&constellations_sql)
            .bind(observer.latitude)
            .bind(observer.longitude)
            .bind(observer.altitude_km)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(|(c,)| c)
            .collect();

        Ok(CacheStatistics {
            total_records: total.max(0) as u64,
            unique_satellites: unique.max(0) as u64,
            constellations,
            time_range: first.zip(last),
            signal_quality: SignalQualitySummary {
                avg_signal_dbm: avg_sig,
                min_signal_dbm: min_sig,
                max_signal_dbm: max_sig,
                avg_elevation_deg: avg_el,
            },
        })
    }

    async fn upsert_tle(&self, record: &TleRecord, is_active: bool) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO satellite_tle_data(
                satellite_id, norad_id, name, constellation, line1, line2, epoch, is_active)
             VALUES($1,$2,$3,$4,$5,$6,$7,$8)
             ON CONFLICT (norad_id) DO UPDATE
             SET name=EXCLUDED.name, constellation=EXCLUDED.constellation,
                 line1=EXCLUDED.line1, line2=EXCLUDED.line2, epoch=EXCLUDED.epoch,
                 is_active=EXCLUDED.is_active, updated_at=now()
             WHERE satellite_tle_data.epoch < EXCLUDED.epoch
                OR satellite_tle_data.is_active <> EXCLUDED.is_active",
        )
        .bind(&record.satellite_id)
        .bind(i64::from(record.norad_id))
        .bind(&record.name)
        .bind(&record.constellation)
        .bind(&record.line1)
        .bind(&record.line2)
        .bind(record.epoch)
        .bind(is_active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save_d2_series(
        &self,
        scenario_hash: &str,
        records: &[D2MeasurementRecord],
    ) -> StoreResult<u64> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM d2_measurement_cache WHERE scenario_hash = $1")
            .bind(scenario_hash)
            .execute(&mut *tx)
            .await?;

        for r in records {
            sqlx::query(
                "INSERT INTO d2_measurement_cache(
                    scenario_hash, scenario_name, timestamp,
                    ue_latitude, ue_longitude, ue_altitude_km,
                    fixed_ref_latitude, fixed_ref_longitude, fixed_ref_altitude_km,
                    reference_satellite_id, serving_satellite_id,
                    ref_latitude, ref_longitude, ref_altitude_km,
                    satellite_distance_m, ground_distance_m, thresh1_m, thresh2_m, hysteresis_m,
                    trigger_condition_met, entering, leaving)
                 VALUES($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19,$20,$21,$22)",
            )
            .bind(scenario_hash)
            .bind(&r.scenario_name)
            .bind(r.timestamp)
            .bind(r.ue_position.latitude)
            .bind(r.ue_position.longitude)
            .bind(r.ue_position.altitude_km)
            .bind(r.fixed_ref_position.latitude)
            .bind(r.fixed_ref_position.longitude)
            .bind(r.fixed_ref_position.altitude_km)
            .bind(&r.reference_satellite_id)
            .bind(&r.serving_satellite_id)
            .bind(r.reference_position.latitude)
            .bind(r.reference_position.longitude)
            .bind(r.reference_position.altitude_km)
            .bind(r.satellite_distance_m)
            .bind(r.ground_distance_m)
            .bind(r.thresh1_m)
            .bind(r.thresh2_m)
            .bind(r.hysteresis_m)
            .bind(r.trigger_condition_met)
            .bind(r.entering)
            .bind(r.leaving)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(records.len() as u64)
    }

    async fn d2_series(&self, scenario_hash: &str) -> StoreResult<Vec<D2MeasurementRecord>> {
        let rows = sqlx::query_as::<_, D2Row>(
            "SELECT scenario_hash, scenario_name, timestamp,
                    ue_latitude, ue_longitude, ue_altitude_km,
                    fixed_ref_latitude, fixed_ref_longitude, fixed_ref_altitude_km,
                    reference_satellite_id, serving_satellite_id,
                    ref_latitude, ref_longitude, ref_altitude_km,
                    satellite_distance_m, ground_distance_m, thresh1_m, thresh2_m, hysteresis_m,
                    trigger_condition_met, entering, leaving
             FROM d2_measurement_cache WHERE scenario_hash = $1 ORDER BY timestamp",
        )
        .bind(scenario_hash)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn record_job(&self, job: &PreloadJobRow) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO satellite_data_preload_jobs(
                job_id, job_name, constellation, status, progress, total_calculations,
                processed_records, failed_records, retry_count, error_message,
                created_at, started_at, completed_at)
             VALUES($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13)
             ON CONFLICT (job_id) DO UPDATE
             SET status=EXCLUDED.status, progress=EXCLUDED.progress,
                 total_calculations=EXCLUDED.total_calculations,
                 processed_records=EXCLUDED.processed_records,
                 failed_records=EXCLUDED.failed_records, retry_count=EXCLUDED.retry_count,
                 error_message=EXCLUDED.error_message, started_at=EXCLUDED.started_at,
                 completed_at=EXCLUDED.completed_at",
        )
        .bind(job.job_id)
        .bind(&job.job_name)
        .bind(&job.constellation)
        .bind(&job.status)
        .bind(job.progress)
        .bind(i64::try_from(job.total_calculations).unwrap_or(i64::MAX))
        .bind(i64::try_from(job.processed_records).unwrap_or(i64::MAX))
        .bind(i64::try_from(job.failed_records).unwrap_or(i64::MAX))
        .bind(i32::try_from(job.retry_count).unwrap_or(i32::MAX))
        .bind(&job.error_message)
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
