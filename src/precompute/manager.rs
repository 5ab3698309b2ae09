//! Precompute job manager and scheduler
//!
//! Jobs live in an in-process table keyed by UUID and are handed to a single
//! scheduler task, which runs at most `max_concurrent_jobs` of them at once in
//! a `JoinSet`. Pause and cancel are cooperative: the executor checks the job
//! status between one-hour windows.

use crate::config::JobsConfig;
use crate::precompute::executor::JobExecutor;
use crate::precompute::job::{JobError, JobRequest, JobStatus, PrecomputeJob};
use crate::precompute::queue::JobQueue;
use crate::storage::OrbitalStore;
use chrono::{Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Job records shared between the manager API and running executors
#[derive(Default)]
pub struct JobTable {
    jobs: Mutex<HashMap<Uuid, PrecomputeJob>>,
}

impl JobTable {
    fn insert(&self, job: PrecomputeJob) {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job.job_id, job);
    }

    pub fn get(&self, job_id: Uuid) -> Option<PrecomputeJob> {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&job_id)
            .cloned()
    }

    pub fn status(&self, job_id: Uuid) -> Option<JobStatus> {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&job_id)
            .map(|j| j.status)
    }

    /// Mutate one job under the lock
    pub fn update<R>(&self, job_id: Uuid, f: impl FnOnce(&mut PrecomputeJob) -> R) -> Option<R> {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&job_id)
            .map(f)
    }

    fn all(&self) -> Vec<PrecomputeJob> {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SystemStatus {
    pub total_jobs: usize,
    pub active_jobs: usize,
    pub pending_jobs: usize,
    pub completed_jobs: usize,
    pub failed_jobs: usize,
    pub cancelled_jobs: usize,
    pub paused_jobs: usize,
    pub queue_depth: usize,
    pub running_tasks: usize,
    pub max_concurrent_jobs: usize,
    pub cached_satellites: usize,
}

struct Shared {
    table: JobTable,
    queue: Mutex<JobQueue>,
    executor: JobExecutor,
    config: JobsConfig,
    running_tasks: AtomicUsize,
}

impl Shared {
    fn store(&self) -> Arc<dyn OrbitalStore> {
        self.executor.processor().store_handle()
    }

    async fn mirror(&self, job_id: Uuid) {
        let Some(row) = self.table.get(job_id).map(|j| j.to_row()) else {
            return;
        };
        if let Err(e) = self.store().record_job(&row).await {
            warn!("Could not mirror job {}: {}", job_id, e);
        }
    }

    fn enqueue(&self, job_id: Uuid, priority: u8) {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(job_id, priority);
    }

    fn next_queued(&self) -> Option<Uuid> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner).pop()
    }

    /// Pending -> Running; false if the job changed state while queued
    fn mark_running(&self, job_id: Uuid) -> bool {
        self.table
            .update(job_id, |j| {
                if j.status != JobStatus::Pending {
                    return false;
                }
                j.status = JobStatus::Running;
                j.started_at.get_or_insert_with(Utc::now);
                true
            })
            .unwrap_or(false)
    }

    async fn run_job(self: Arc<Self>, job_id: Uuid) {
        if let Err(e) = self.executor.execute(job_id, &self.table).await {
            self.handle_failure(job_id, e);
        }
        self.mirror(job_id).await;
    }

    fn handle_failure(&self, job_id: Uuid, err: JobError) {
        let requeue = self.table.update(job_id, |j| {
            if j.status.is_terminal() {
                return None;
            }
            j.error_message = Some(err.to_string());
            if j.retry_count < j.max_retries {
                j.retry_count += 1;
                j.status = JobStatus::Pending;
                warn!(
                    "Job {} failed ({}), retry {}/{}",
                    j.job_name, err, j.retry_count, j.max_retries
                );
                Some(j.priority)
            } else {
                j.status = JobStatus::Failed;
                j.failed_at = Some(Utc::now());
                error!(
                    "Job {} failed after {} retries: {}",
                    j.job_name, j.retry_count, err
                );
                None
            }
        });
        if let Some(Some(priority)) = requeue {
            self.enqueue(job_id, priority);
        }
    }
}

pub struct JobManager {
    shared: Arc<Shared>,
    shutdown: watch::Sender<bool>,
}

impl JobManager {
    pub fn new(executor: JobExecutor, config: JobsConfig) -> Self {
        let executor = executor
            .with_window(Duration::minutes(config.window_minutes))
            .with_poll_interval(std::time::Duration::from_millis(config.poll_interval_ms));
        let (shutdown, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                table: JobTable::default(),
                queue: Mutex::new(JobQueue::new()),
                executor,
                config,
                running_tasks: AtomicUsize::new(0),
            }),
            shutdown,
        }
    }

    /// Validate, register and queue a job
    pub async fn create_job(&self, request: JobRequest) -> Result<Uuid, JobError> {
        request.validate()?;
        let job = PrecomputeJob::from_request(request, self.shared.config.default_max_retries, Utc::now());
        let (job_id, priority) = (job.job_id, job.priority);
        info!(
            "Created job {} ({}) for {}, {} steps, priority {}",
            job.job_name, job_id, job.constellation, job.total_calculations, priority
        );
        self.shared.table.insert(job);
        self.shared.enqueue(job_id, priority);
        self.shared.mirror(job_id).await;
        Ok(job_id)
    }

    pub fn get_job_status(&self, job_id: Uuid) -> Option<PrecomputeJob> {
        self.shared.table.get(job_id)
    }

    /// Jobs ordered by creation time, optionally filtered by status
    pub fn list_jobs(&self, status: Option<JobStatus>) -> Vec<PrecomputeJob> {
        let mut jobs: Vec<PrecomputeJob> = self
            .shared
            .table
            .all()
            .into_iter()
            .filter(|j| status.is_none_or(|s| j.status == s))
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.job_id.cmp(&b.job_id)));
        jobs
    }

    pub async fn cancel_job(&self, job_id: Uuid) -> bool {
        let cancelled = self
            .shared
            .table
            .update(job_id, |j| {
                if !matches!(
                    j.status,
                    JobStatus::Pending | JobStatus::Running | JobStatus::Paused
                ) {
                    return false;
                }
                j.status = JobStatus::Cancelled;
                true
            })
            .unwrap_or(false);
        if cancelled {
            self.shared
                .queue
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(job_id);
            info!("Cancelled job {}", job_id);
            self.shared.mirror(job_id).await;
        }
        cancelled
    }

    pub async fn pause_job(&self, job_id: Uuid) -> bool {
        self.transition(job_id, JobStatus::Running, JobStatus::Paused)
            .await
    }

    pub async fn resume_job(&self, job_id: Uuid) -> bool {
        self.transition(job_id, JobStatus::Paused, JobStatus::Running)
            .await
    }

    async fn transition(&self, job_id: Uuid, from: JobStatus, to: JobStatus) -> bool {
        let changed = self
            .shared
            .table
            .update(job_id, |j| {
                if j.status != from {
                    return false;
                }
                j.status = to;
                true
            })
            .unwrap_or(false);
        if changed {
            info!("Job {} {} -> {}", job_id, from, to);
            self.shared.mirror(job_id).await;
        }
        changed
    }

    pub fn system_status(&self) -> SystemStatus {
        let jobs = self.shared.table.all();
        let count = |s: JobStatus| jobs.iter().filter(|j| j.status == s).count();
        SystemStatus {
            total_jobs: jobs.len(),
            active_jobs: count(JobStatus::Running),
            pending_jobs: count(JobStatus::Pending),
            completed_jobs: count(JobStatus::Completed),
            failed_jobs: count(JobStatus::Failed),
            cancelled_jobs: count(JobStatus::Cancelled),
            paused_jobs: count(JobStatus::Paused),
            queue_depth: self
                .shared
                .queue
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .len(),
            running_tasks: self.shared.running_tasks.load(Ordering::SeqCst),
            max_concurrent_jobs: self.shared.config.max_concurrent_jobs,
            cached_satellites: self.shared.executor.engine().cached_propagators(),
        }
    }

    /// Spawn the scheduler task. Must be called from within a tokio runtime.
    pub fn start(&self) -> JoinHandle<()> {
        let shared = Arc::clone(&self.shared);
        let shutdown = self.shutdown.subscribe();
        tokio::spawn(scheduler_loop(shared, shutdown))
    }

    /// Ask the scheduler to stop; running jobs are aborted
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

async fn scheduler_loop(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    let max_concurrent = shared.config.max_concurrent_jobs.max(1);
    let mut tick =
        tokio::time::interval(std::time::Duration::from_millis(shared.config.poll_interval_ms.max(1)));
    let mut tasks: JoinSet<()> = JoinSet::new();
    info!("Job scheduler started (max {} concurrent jobs)", max_concurrent);

    loop {
        tokio::select! {
            _ = tick.tick() => {}
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                if let Err(e) = joined {
                    error!("Job task panicked: {}", e);
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }

        while tasks.len() < max_concurrent {
            let Some(job_id) = shared.next_queued() else {
                break;
            };
            if !shared.mark_running(job_id) {
                continue;
            }
            shared.mirror(job_id).await;
            tasks.spawn(Arc::clone(&shared).run_job(job_id));
        }
        shared.running_tasks.store(tasks.len(), Ordering::SeqCst);
    }

    tasks.shutdown().await;
    shared.running_tasks.store(0, Ordering::SeqCst);
    info!("Job scheduler stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orbital::{OrbitEngine, RadioConfig};
    use crate::precompute::job::tests::taipei_request;
    use crate::storage::{BatchProcessor, MemoryStore};
    use crate::tle::mock_data::TESTSAT_TLE_DATA;
    use crate::tle::{StaticTleSource, TleStore};

    struct Fixture {
        manager: JobManager,
        store: Arc<MemoryStore>,
        tles: Arc<TleStore>,
    }

    fn fixture(preload: bool, source: Option<StaticTleSource>) -> Fixture {
        let tles = Arc::new(TleStore::new());
        if preload {
            tles.add_many(TESTSAT_TLE_DATA, "testnet");
        }
        let engine = Arc::new(OrbitEngine::new(tles.clone()));
        let store = Arc::new(MemoryStore::new());
        let processor = Arc::new(BatchProcessor::new(store.clone(), 100));
        let mut executor = JobExecutor::new(engine, processor, RadioConfig::default());
        if let Some(source) = source {
            executor = executor.with_tle_source(Arc::new(source));
        }
        let config = JobsConfig {
            poll_interval_ms: 5,
            ..JobsConfig::default()
        };
        Fixture {
            manager: JobManager::new(executor, config),
            store,
            tles,
        }
    }

    async fn wait_for(manager: &JobManager, job_id: Uuid, done: impl Fn(&PrecomputeJob) -> bool) -> PrecomputeJob {
        tokio::time::timeout(std::time::Duration::from_secs(60), async {
            loop {
                let job = manager.get_job_status(job_id).unwrap();
                if done(&job) {
                    return job;
                }
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("job did not reach the expected state in time")
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_taipei_job_end_to_end() {
        let f = fixture(true, None);
        let scheduler = f.manager.start();
        let job_id = f.manager.create_job(taipei_request(60, 30)).await.unwrap();

        let job = wait_for(&f.manager, job_id, |j| j.status.is_terminal()).await;
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.total_calculations, 120 * 8);
        assert_eq!(job.processed_records, job.total_calculations - job.failed_records);
        assert!(job.processed_records > 0);
        assert_eq!(job.progress, 100.0);
        assert_eq!(f.store.orbital_len() as u64, job.processed_records);

        let stored = f
            .store
            .orbital_series("90001", job.start_time, job.end_time)
            .await
            .unwrap();
        assert!(!stored.is_empty() && stored.len() <= 120);
        assert_eq!(stored[0].timestamp, job.start_time);
        assert!(stored[0].elevation_deg > 60.0);
        let all = f
            .store
            .orbital_statistics(&job.observer)
            .await
            .unwrap();
        assert_eq!(all.total_records, job.processed_records);
        for id in f.tles.satellite_ids() {
            let series = f
                .store
                .orbital_series(&id, job.start_time, job.end_time)
                .await
                .unwrap();
            assert!(series.iter().all(|r| (-90.0..=90.0).contains(&r.elevation_deg)));
            assert!(series.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        }

        let row = f.store.job_row(job_id).unwrap();
        assert_eq!(row.status, "completed");
        assert_eq!(row.processed_records, job.processed_records);

        f.manager.shutdown();
        scheduler.await.unwrap();
    }

    #[tokio::test]
    async fn test_create_job_rejects_invalid_request() {
        let f = fixture(true, None);
        let mut request = taipei_request(60, 30);
        request.priority = 0;
        assert!(matches!(
            f.manager.create_job(request).await,
            Err(JobError::Validation(_))
        ));
        assert_eq!(f.manager.system_status().total_jobs, 0);
    }

    #[tokio::test]
    async fn test_cancel_pending_job() {
        let f = fixture(true, None);
        let job_id = f.manager.create_job(taipei_request(60, 30)).await.unwrap();
        assert_eq!(f.manager.system_status().queue_depth, 1);

        assert!(!f.manager.pause_job(job_id).await);
        assert!(f.manager.cancel_job(job_id).await);
        assert!(!f.manager.cancel_job(job_id).await);
        assert!(!f.manager.cancel_job(Uuid::new_v4()).await);

        let status = f.manager.system_status();
        assert_eq!(status.queue_depth, 0);
        assert_eq!(status.cancelled_jobs, 1);
        assert_eq!(f.store.job_row(job_id).unwrap().status, "cancelled");
    }

    #[tokio::test]
    async fn test_pause_resume_guards() {
        let f = fixture(true, None);
        let job_id = f.manager.create_job(taipei_request(60, 30)).await.unwrap();
        assert!(f.manager.shared.mark_running(job_id));

        assert!(f.manager.pause_job(job_id).await);
        assert!(!f.manager.pause_job(job_id).await);
        assert_eq!(f.manager.system_status().paused_jobs, 1);
        assert!(f.manager.resume_job(job_id).await);
        assert!(!f.manager.resume_job(job_id).await);
        assert_eq!(
            f.manager.get_job_status(job_id).unwrap().status,
            JobStatus::Running
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_paused_job_waits_until_resumed() {
        let f = fixture(true, None);
        let job_id = f.manager.create_job(taipei_request(30, 60)).await.unwrap();
        f.manager.shared.next_queued();
        assert!(f.manager.shared.mark_running(job_id));
        assert!(f.manager.pause_job(job_id).await);

        let run = tokio::spawn(Arc::clone(&f.manager.shared).run_job(job_id));
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        let job = f.manager.get_job_status(job_id).unwrap();
        assert_eq!(job.status, JobStatus::Paused);
        assert_eq!(job.processed_records + job.failed_records, 0);

        assert!(f.manager.resume_job(job_id).await);
        run.await.unwrap();
        let job = f.manager.get_job_status(job_id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.total_calculations, 30 * 8);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failed_job_is_retried_then_failed() {
        let f = fixture(false, None);
        let scheduler = f.manager.start();
        let mut request = taipei_request(10, 30);
        request.max_retries = Some(1);
        let job_id = f.manager.create_job(request).await.unwrap();

        let job = wait_for(&f.manager, job_id, |j| j.status.is_terminal()).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.retry_count, 1);
        assert!(job.failed_at.is_some());
        assert!(job.error_message.unwrap().contains("no TLE data"));
        assert_eq!(f.manager.system_status().failed_jobs, 1);

        f.manager.shutdown();
        scheduler.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_missing_constellation_is_fetched_from_source() {
        let source = StaticTleSource::new().with_group("testnet", TESTSAT_TLE_DATA);
        let f = fixture(false, Some(source));
        let scheduler = f.manager.start();
        let job_id = f.manager.create_job(taipei_request(10, 60)).await.unwrap();

        let job = wait_for(&f.manager, job_id, |j| j.status.is_terminal()).await;
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(f.tles.by_constellation("testnet").len(), 8);
        assert!(f.manager.system_status().cached_satellites > 0);

        f.manager.shutdown();
        scheduler.await.unwrap();
    }

    #[tokio::test]
    async fn test_list_jobs_filter() {
        let f = fixture(true, None);
        let a = f.manager.create_job(taipei_request(60, 30)).await.unwrap();
        let b = f.manager.create_job(taipei_request(60, 60)).await.unwrap();
        f.manager.cancel_job(b).await;

        assert_eq!(f.manager.list_jobs(None).len(), 2);
        let pending = f.manager.list_jobs(Some(JobStatus::Pending));
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].job_id, a);
    }
}
