use anyhow::Context;
use chrono::{Duration, Utc};
use ntn_orbit_sim::config::SimulatorConfig;
use ntn_orbit_sim::logging;
use ntn_orbit_sim::measurement::{EventParameters, EventType, MeasurementEngine};
use ntn_orbit_sim::orbital::{OrbitEngine, Position};
use ntn_orbit_sim::precompute::{JobExecutor, JobManager, JobRequest};
use ntn_orbit_sim::storage::{BatchProcessor, MemoryStore, OrbitalStore, PgStore};
use ntn_orbit_sim::tle::{CelestrakSource, TleDiskCache, TleSource, TleStore, refresh_constellation};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

const DEFAULT_CONSTELLATION: &str = "starlink";
/// Taipei
const DEFAULT_OBSERVER: Position = Position::new(24.9564, 121.3717, 0.1);

fn observer_from_args(args: &[String]) -> anyhow::Result<Position> {
    match (args.get(2), args.get(3)) {
        (Some(lat), Some(lon)) => {
            let observer = Position::new(
                lat.parse().context("latitude must be a number")?,
                lon.parse().context("longitude must be a number")?,
                0.0,
            );
            anyhow::ensure!(observer.is_valid(), "observer out of range: {:?}", observer);
            Ok(observer)
        }
        _ => Ok(DEFAULT_OBSERVER),
    }
}

async fn open_store(config: &SimulatorConfig) -> anyhow::Result<Arc<dyn OrbitalStore>> {
    match &config.database_url {
        Some(url) => {
            let store = PgStore::connect(url, 5)
                .await
                .context("connecting to Postgres")?;
            store.init_schema().await.context("initializing schema")?;
            info!("Database schema initialized");
            Ok(Arc::new(store))
        }
        None => {
            info!("No database_url configured, using the in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = SimulatorConfig::from_env()?;
    logging::init(&config.logging.level);
    info!("Configuration loaded");

    let args: Vec<String> = std::env::args().collect();
    let constellation = args
        .get(1)
        .cloned()
        .unwrap_or_else(|| DEFAULT_CONSTELLATION.to_string());
    let observer = observer_from_args(&args)?;

    let tle_store = Arc::new(TleStore::new());
    let engine = Arc::new(OrbitEngine::new(tle_store.clone()));
    let store = open_store(&config).await?;

    let source: Option<Arc<dyn TleSource>> = match &config.tle.tle_file {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading TLE file {}", path))?;
            let report = tle_store.add_many(&text, &constellation);
            info!("Loaded {} element sets from {}", report.accepted(), path);
            None
        }
        None => {
            let cache = match TleDiskCache::new(config.tle.cache_expiration_days) {
                Ok(c) => Some(c),
                Err(e) => {
                    warn!("TLE disk cache unavailable: {}", e);
                    None
                }
            };
            let source: Arc<dyn TleSource> =
                Arc::new(CelestrakSource::new(config.tle.celestrak_base_url.clone(), cache));
            refresh_constellation(&tle_store, source.as_ref(), &constellation)
                .await
                .with_context(|| format!("fetching TLE group {}", constellation))?;
            Some(source)
        }
    };

    let now = Utc::now();
    let records = tle_store.by_constellation(&constellation);
    for record in &records {
        let active = record.age_hours(now).abs() <= config.tle.max_age_hours;
        if let Err(e) = store.upsert_tle(record, active).await {
            warn!("Could not persist TLE {}: {}", record.satellite_id, e);
        }
    }
    info!("{} satellites available for {}", records.len(), constellation);

    let processor = Arc::new(BatchProcessor::new(store.clone(), config.batch.batch_size));
    let mut executor = JobExecutor::new(engine.clone(), processor.clone(), config.radio.clone());
    if let Some(source) = source {
        executor = executor.with_tle_source(source);
    }
    let manager = JobManager::new(executor, config.jobs.clone());
    let scheduler = manager.start();

    let job_id = manager
        .create_job(JobRequest {
            job_name: None,
            constellation: constellation.clone(),
            start_time: now,
            end_time: now + Duration::hours(1),
            observer,
            time_step_seconds: 30,
            priority: 1,
            max_retries: None,
        })
        .await?;

    let job = loop {
        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        match manager.get_job_status(job_id) {
            Some(job) if job.status.is_terminal() => break job,
            Some(job) => info!(
                "Job {} {}: {:.1}%",
                job_id,
                job.status,
                job.progress
            ),
            None => anyhow::bail!("job {} disappeared", job_id),
        }
    };

    let measurement = MeasurementEngine::new(
        engine.clone(),
        config.radio.clone(),
        config.compensation.clone(),
        config.broadcast.clone(),
    );
    let candidates: Vec<String> = records.iter().map(|r| r.satellite_id.clone()).collect();
    measurement
        .broadcast()
        .generate(&observer, Some(&candidates), now)?;
    let lifecycle = Arc::clone(measurement.broadcast()).spawn_lifecycle();
    let d2 = measurement.evaluate(
        EventType::D2,
        &observer,
        &EventParameters::defaults(EventType::D2),
        now,
    )?;

    let summary = json!({
        "job": job,
        "system": manager.system_status(),
        "cache": processor.get_statistics(&observer).await?,
        "broadcast": measurement.broadcast().status(now),
        "d2": d2,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    lifecycle.abort();
    manager.shutdown();
    scheduler.await?;
    Ok(())
}
