//! Worker pool: reserve, dispatch, commit.
//!
//! Each worker is a tokio task that loops over [`JobQueue::reserve_wait`].
//! Processors run on the blocking pool under a per-job timeout; a timed-out
//! blocking task is abandoned, not killed, and the job is failed as transient.
//!
//! Shutdown: [`WorkerPool::shutdown`] cancels the pool token, lets in-flight
//! jobs finish, runs a last maintenance pass and waits until every outcome has
//! been delivered to the sink.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use attache_core::models::{DerivedResult, Job, JobResult};
use attache_core::{Config, ProcessingError};
use attache_processing::{ProcessorOutput, ProcessorRegistry, SourceMetadata};
use attache_storage::StorageAdapter;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::queue::{Disposition, JobQueue, Lease, Reservation};
use crate::sink::{JobOutcome, OutcomeSender, ResultPublisher, ResultSink};

const OUTCOME_CHANNEL_CAPACITY: usize = 256;
const MIN_HEARTBEAT: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub worker_count: usize,
    pub job_timeout: Duration,
    pub maintenance_interval: Duration,
    pub snapshot_path: Option<PathBuf>,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for WorkerPoolConfig {
    fn from(config: &Config) -> Self {
        Self {
            worker_count: config.worker_count,
            job_timeout: config.job_timeout(),
            maintenance_interval: config.maintenance_interval(),
            snapshot_path: config.queue_snapshot_path.clone(),
        }
    }
}

/// Shared by all workers.
struct WorkerContext {
    queue: Arc<JobQueue>,
    registry: Arc<ProcessorRegistry>,
    storage: Arc<dyn StorageAdapter>,
    outcomes: OutcomeSender,
    job_timeout: Duration,
}

pub struct WorkerPool {
    queue: Arc<JobQueue>,
    cancel: CancellationToken,
    workers: Vec<JoinHandle<()>>,
    maintenance: JoinHandle<()>,
    publisher: JoinHandle<()>,
}

impl WorkerPool {
    /// Spawn the workers, the maintenance loop and the result publisher.
    pub fn start(
        queue: Arc<JobQueue>,
        registry: Arc<ProcessorRegistry>,
        storage: Arc<dyn StorageAdapter>,
        sink: Arc<dyn ResultSink>,
        config: WorkerPoolConfig,
    ) -> Self {
        let cancel = CancellationToken::new();
        let (outcome_tx, outcome_rx) = mpsc::channel(OUTCOME_CHANNEL_CAPACITY);

        tracing::info!(
            workers = config.worker_count,
            job_timeout_secs = config.job_timeout.as_secs(),
            maintenance_interval_secs = config.maintenance_interval.as_secs(),
            snapshot = config.snapshot_path.is_some(),
            categories = ?registry.categories(),
            "Worker pool started"
        );

        let publisher = tokio::spawn(ResultPublisher::new(sink).run(outcome_rx));

        let context = Arc::new(WorkerContext {
            queue: queue.clone(),
            registry,
            storage,
            outcomes: outcome_tx.clone(),
            job_timeout: config.job_timeout,
        });

        let workers = (0..config.worker_count.max(1))
            .map(|worker_id| {
                let context = context.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move { context.run(worker_id, cancel).await })
            })
            .collect();

        let maintenance = tokio::spawn(run_maintenance(
            queue.clone(),
            outcome_tx,
            config.maintenance_interval,
            config.snapshot_path,
            cancel.clone(),
        ));

        Self {
            queue,
            cancel,
            workers,
            maintenance,
            publisher,
        }
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    /// Resolve once the queue has nothing Waiting, Active or Delayed.
    /// Outcomes may still be on their way to the sink until [`Self::shutdown`].
    pub async fn wait_idle(&self) {
        self.queue.wait_idle().await;
    }

    pub async fn shutdown(self) {
        tracing::info!("Initiating worker pool shutdown");
        self.cancel.cancel();

        for handle in self.workers {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Worker task ended abnormally");
            }
        }
        if let Err(e) = self.maintenance.await {
            tracing::error!(error = %e, "Maintenance task ended abnormally");
        }
        // All senders are gone now; the publisher drains what is left and exits.
        if let Err(e) = self.publisher.await {
            tracing::error!(error = %e, "Result publisher ended abnormally");
        }
        tracing::info!(stats = ?self.queue.stats(), "Worker pool stopped");
    }
}

impl WorkerContext {
    async fn run(&self, worker_id: usize, cancel: CancellationToken) {
        tracing::debug!(worker_id, "Worker started");
        while let Some(reservation) = self.queue.reserve_wait(&cancel).await {
            self.execute(worker_id, reservation).await;
        }
        tracing::debug!(worker_id, "Worker stopped");
    }

    #[tracing::instrument(
        skip(self, reservation),
        fields(job.id = %reservation.job.id, job.category = %reservation.job.category)
    )]
    async fn execute(&self, worker_id: usize, reservation: Reservation) {
        let Reservation { job, lease } = reservation;
        let start = Instant::now();

        tracing::info!(
            attempt = job.attempts,
            max_attempts = job.max_attempts,
            filename = %job.payload.original_filename,
            "Job started"
        );
        if job.attempts == 1 {
            deliver(&self.outcomes, JobOutcome::started(&job)).await;
        }

        let heartbeat_stop = CancellationToken::new();
        let heartbeat = spawn_heartbeat(
            self.queue.clone(),
            lease,
            (self.queue.config().lease_duration / 3).max(MIN_HEARTBEAT),
            heartbeat_stop.clone(),
        );

        let result = tokio::time::timeout(self.job_timeout, self.run_job(&job)).await;
        heartbeat_stop.cancel();
        let _ = heartbeat.await;

        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
        match result {
            Ok(Ok(result)) => match self.queue.complete(&lease, result) {
                Ok(finished) => {
                    tracing::info!(duration_ms, "Job completed");
                    self.send_outcome(&finished).await;
                }
                Err(e) => tracing::warn!(error = %e, "Discarding result of reclaimed job"),
            },
            Ok(Err(err)) => {
                tracing::warn!(
                    duration_ms,
                    class = %err.class(),
                    error = %err,
                    "Job execution failed"
                );
                self.fail(&lease, &err).await;
            }
            Err(_) => {
                tracing::error!(
                    timeout_secs = self.job_timeout.as_secs_f64(),
                    "Job execution timed out"
                );
                let err = ProcessingError::transient(anyhow!(
                    "Job execution timed out after {:?}",
                    self.job_timeout
                ));
                self.fail(&lease, &err).await;
            }
        }
    }

    async fn fail(&self, lease: &Lease, err: &ProcessingError) {
        match self.queue.fail(lease, err) {
            Ok(Disposition::Failed(job)) => self.send_outcome(&job).await,
            Ok(Disposition::Retry { .. }) => {}
            Err(e) => tracing::warn!(error = %e, "Could not record job failure"),
        }
    }

    /// Gate, load, convert on the blocking pool, persist.
    async fn run_job(&self, job: &Job) -> Result<JobResult, ProcessingError> {
        let processor = self.registry.get(job.category).ok_or_else(|| {
            ProcessingError::permanent(anyhow!("No processor registered for {}", job.category))
        })?;
        let metadata = SourceMetadata::from_payload(job.id, job.category, &job.payload);

        if let Some(reason) = processor.skip_reason(&metadata) {
            tracing::info!(reason = %reason, "Nothing to derive");
            return Ok(JobResult::NoOp { reason });
        }

        let source = self.storage.load_bytes(&job.payload.source_locator).await?;
        tracing::debug!(source_bytes = source.len(), "Loaded source");

        let output = tokio::task::spawn_blocking(move || processor.process(&source, &metadata))
            .await
            .map_err(classify_join_error)??;

        match output {
            ProcessorOutput::NoOp { reason } => Ok(JobResult::NoOp { reason }),
            ProcessorOutput::Derived(asset) => {
                let stored = self
                    .storage
                    .save_derived(asset.data.to_vec(), &asset.suggested_name, asset.kind)
                    .await?;
                Ok(JobResult::Derived(DerivedResult {
                    kind: asset.kind,
                    locator: stored.locator,
                    url: stored.url,
                    content_type: asset.content_type,
                    compressed: asset.compressed,
                    warnings: asset.warnings,
                }))
            }
        }
    }

    async fn send_outcome(&self, job: &Job) {
        send_outcome(&self.outcomes, job).await;
    }
}

async fn send_outcome(outcomes: &OutcomeSender, job: &Job) {
    if let Some(outcome) = JobOutcome::finished(job) {
        deliver(outcomes, outcome).await;
    }
}

async fn deliver(outcomes: &OutcomeSender, outcome: JobOutcome) {
    let job_id = outcome.job_id;
    if outcomes.send(outcome).await.is_err() {
        tracing::error!(job_id = %job_id, "Result publisher is gone, outcome dropped");
    }
}

/// A panicking processor would panic again on the same bytes.
fn classify_join_error(err: JoinError) -> ProcessingError {
    if err.is_panic() {
        let payload = err.into_panic();
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string());
        ProcessingError::permanent(anyhow!("Processor panicked: {}", message))
    } else {
        ProcessingError::transient(anyhow!("Processor task was cancelled"))
    }
}

fn spawn_heartbeat(
    queue: Arc<JobQueue>,
    lease: Lease,
    every: Duration,
    stop: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        interval.tick().await;
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = queue.renew(&lease) {
                        tracing::warn!(job_id = %lease.job_id, error = %e, "Lease renewal failed");
                        break;
                    }
                }
            }
        }
    })
}

async fn run_maintenance(
    queue: Arc<JobQueue>,
    outcomes: OutcomeSender,
    every: Duration,
    snapshot_path: Option<PathBuf>,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(every.max(MIN_HEARTBEAT));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                maintenance_pass(&queue, &outcomes, snapshot_path.as_deref()).await;
            }
        }
    }

    if let Some(path) = snapshot_path.as_deref() {
        if let Err(e) = queue.save_snapshot(path).await {
            tracing::error!(error = %e, "Final queue snapshot failed");
        }
    }
}

async fn maintenance_pass(
    queue: &JobQueue,
    outcomes: &OutcomeSender,
    snapshot_path: Option<&std::path::Path>,
) {
    let report = queue.reclaim_expired_leases();
    for job in &report.failed {
        send_outcome(outcomes, job).await;
    }
    let purged = queue.purge_finished();

    if !report.requeued.is_empty() || !report.failed.is_empty() || purged > 0 {
        tracing::info!(
            requeued = report.requeued.len(),
            failed = report.failed.len(),
            purged,
            "Queue maintenance"
        );
    }

    if let Some(path) = snapshot_path {
        if let Err(e) = queue.save_snapshot(path).await {
            tracing::error!(error = %e, "Queue snapshot failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn panic_is_classified_permanent() {
        let handle = tokio::task::spawn_blocking(|| {
            if true {
                panic!("mesh exploded");
            }
        });
        let err = handle.await.unwrap_err();
        let classified = classify_join_error(err);
        assert!(!classified.is_retryable());
        assert!(classified.to_string().contains("mesh exploded"));
    }

    #[test]
    fn pool_config_defaults() {
        let config = WorkerPoolConfig::default();
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.job_timeout, Duration::from_secs(120));
        assert!(config.snapshot_path.is_none());
    }
}
