//! In-process job queue: priority ordering, leases and retry scheduling.
//!
//! All job records live behind one mutex and every state change goes through a
//! queue operation. A reserved job carries a [`Lease`]; only the current lease
//! holder can commit it, and an expired lease is reclaimed by
//! [`JobQueue::reclaim_expired_leases`] as a transient failure.
//!
//! Durability is a JSON snapshot written by the maintenance loop and loaded at
//! startup. Jobs that were Active when the snapshot was taken are settled as a
//! transient failure of the attempt they were on.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::pin::pin;
use std::time::Duration;

use attache_core::models::{
    Job, JobCategory, JobFailure, JobPayload, JobResult, JobState, JobStats, JobStatus,
};
use attache_core::{Config, ErrorClass, ProcessingError};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Longest an idle worker sleeps before re-checking the delayed set.
const IDLE_RECHECK: Duration = Duration::from_millis(500);

/// Backoff before the next execution after `attempt` executions failed:
/// `base * 2^(attempt - 1)`, capped at `max`.
pub fn compute_retry_backoff(base: Duration, max: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    base.saturating_mul(1u32 << exponent).min(max)
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(365))
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Job {0} not found")]
    NotFound(Uuid),

    #[error("Lease on job {0} is no longer held")]
    LeaseLost(Uuid),

    #[error("Snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot format error: {0}")]
    Snapshot(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Retries allowed after the first execution.
    pub max_attempts: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    pub lease_duration: Duration,
    pub completed_retention: Duration,
    pub failed_retention: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for QueueConfig {
    fn from(config: &Config) -> Self {
        Self {
            max_attempts: config.max_attempts,
            retry_base_delay: config.retry_base_delay(),
            retry_max_delay: config.retry_max_delay(),
            lease_duration: config.lease_duration(),
            completed_retention: config.completed_retention(),
            failed_retention: config.failed_retention(),
        }
    }
}

/// Exclusive claim on an Active job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lease {
    pub job_id: Uuid,
    token: u64,
    pub expires_at: DateTime<Utc>,
}

/// A job handed to a worker together with its lease.
#[derive(Debug, Clone)]
pub struct Reservation {
    pub job: Job,
    pub lease: Lease,
}

/// What `fail` decided for the job.
#[derive(Debug, Clone)]
pub enum Disposition {
    /// Delayed until `retry_at`.
    Retry {
        delay: Duration,
        retry_at: DateTime<Utc>,
    },
    /// Terminal. Carries the failed job.
    Failed(Job),
}

/// Result of one reclamation sweep.
#[derive(Debug, Clone, Default)]
pub struct ReclaimReport {
    pub requeued: Vec<Uuid>,
    /// Jobs whose expired lease used up their last retry, including jobs
    /// that were running when the restored snapshot was taken.
    pub failed: Vec<Job>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
    job: Job,
    /// Enqueue order, the FIFO tie-breaker within a priority.
    seq: u64,
    #[serde(skip)]
    lease: Option<Lease>,
}

/// Serialized queue contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub taken_at: DateTime<Utc>,
    next_seq: u64,
    entries: Vec<Entry>,
}

impl QueueSnapshot {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Default)]
struct QueueState {
    jobs: HashMap<Uuid, Entry>,
    /// Waiting jobs ordered by (priority, seq).
    ready: BTreeSet<(i32, u64, Uuid)>,
    /// Delayed jobs ordered by the time they become eligible.
    delayed: BTreeSet<(DateTime<Utc>, Uuid)>,
    next_seq: u64,
    next_token: u64,
    /// Jobs failed during restore, reported by the next reclamation sweep.
    restart_failures: Vec<Job>,
}

impl QueueState {
    fn make_ready(&mut self, id: Uuid) {
        if let Some(entry) = self.jobs.get_mut(&id) {
            entry.job.state = JobState::Waiting;
            entry.job.available_at = None;
            self.ready.insert((entry.job.priority, entry.seq, id));
        }
    }

    /// Move every Delayed job whose time has come into the ready set.
    /// Returns how many were promoted.
    fn promote_due(&mut self, now: DateTime<Utc>) -> usize {
        let mut promoted = 0;
        while let Some(&(at, id)) = self.delayed.first() {
            if at > now {
                break;
            }
            self.delayed.remove(&(at, id));
            self.make_ready(id);
            promoted += 1;
        }
        promoted
    }

    fn next_due(&self) -> Option<DateTime<Utc>> {
        self.delayed.first().map(|(at, _)| *at)
    }

    /// The Active entry held by `lease`, or `LeaseLost`.
    fn leased_entry(&mut self, lease: &Lease) -> Result<&mut Entry, QueueError> {
        let entry = self
            .jobs
            .get_mut(&lease.job_id)
            .ok_or(QueueError::NotFound(lease.job_id))?;
        match entry.lease {
            Some(held) if held.token == lease.token && entry.job.state == JobState::Active => {
                Ok(entry)
            }
            _ => Err(QueueError::LeaseLost(lease.job_id)),
        }
    }
}

pub struct JobQueue {
    config: QueueConfig,
    state: Mutex<QueueState>,
    /// Signalled when a job becomes reservable.
    available: Notify,
    /// Signalled when a job reaches a terminal state.
    settled: Notify,
}

impl JobQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            state: Mutex::new(QueueState::default()),
            available: Notify::new(),
            settled: Notify::new(),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Add a job in the Waiting state with the category's priority.
    pub fn enqueue(&self, category: JobCategory, payload: JobPayload) -> Uuid {
        let job = Job::new(category, payload, self.config.max_attempts);
        let id = job.id;
        let priority = job.priority;

        {
            let mut state = self.state.lock();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.ready.insert((priority, seq, id));
            state.jobs.insert(
                id,
                Entry {
                    job,
                    seq,
                    lease: None,
                },
            );
        }
        self.available.notify_one();

        tracing::info!(
            job_id = %id,
            category = %category,
            priority,
            "Job enqueued"
        );
        id
    }

    pub fn reserve(&self) -> Option<Reservation> {
        self.reserve_at(Utc::now())
    }

    /// Claim the highest-priority, oldest eligible job, counting one attempt.
    pub fn reserve_at(&self, now: DateTime<Utc>) -> Option<Reservation> {
        let mut state = self.state.lock();
        state.promote_due(now);

        let key = state.ready.pop_first()?;
        let token = state.next_token;
        state.next_token += 1;

        let entry = state.jobs.get_mut(&key.2)?;
        let lease = Lease {
            job_id: entry.job.id,
            token,
            expires_at: now + to_chrono(self.config.lease_duration),
        };
        entry.job.state = JobState::Active;
        entry.job.attempts += 1;
        entry.job.last_attempt_at = Some(now);
        entry.lease = Some(lease);

        Some(Reservation {
            job: entry.job.clone(),
            lease,
        })
    }

    /// Wait until a job can be reserved. Returns `None` once `cancel` fires.
    pub async fn reserve_wait(&self, cancel: &CancellationToken) -> Option<Reservation> {
        loop {
            if cancel.is_cancelled() {
                return None;
            }
            let mut notified = pin!(self.available.notified());
            notified.as_mut().enable();

            if let Some(reservation) = self.reserve() {
                return Some(reservation);
            }

            let wait = self
                .state
                .lock()
                .next_due()
                .map(|at| (at - Utc::now()).to_std().unwrap_or(Duration::ZERO))
                .unwrap_or(IDLE_RECHECK)
                .min(IDLE_RECHECK);

            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = notified => {}
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Extend a lease. Fails with `LeaseLost` if it was reclaimed meanwhile.
    pub fn renew(&self, lease: &Lease) -> Result<Lease, QueueError> {
        let mut state = self.state.lock();
        let entry = state.leased_entry(lease)?;
        let renewed = Lease {
            expires_at: Utc::now() + to_chrono(self.config.lease_duration),
            ..*lease
        };
        entry.lease = Some(renewed);
        Ok(renewed)
    }

    /// Record a terminal success (derived asset or no-op).
    pub fn complete(&self, lease: &Lease, result: JobResult) -> Result<Job, QueueError> {
        let job = {
            let mut state = self.state.lock();
            let entry = state.leased_entry(lease)?;
            entry.job.state = JobState::Completed;
            entry.job.result = Some(result);
            entry.job.finished_at = Some(Utc::now());
            entry.lease = None;
            entry.job.clone()
        };
        self.settled.notify_waiters();
        Ok(job)
    }

    pub fn fail(&self, lease: &Lease, error: &ProcessingError) -> Result<Disposition, QueueError> {
        self.fail_at(lease, error.class(), &error.to_string(), Utc::now())
    }

    /// Schedule a retry for retryable failures with budget left, otherwise
    /// record a terminal failure.
    pub fn fail_at(
        &self,
        lease: &Lease,
        class: ErrorClass,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<Disposition, QueueError> {
        let disposition = {
            let mut state = self.state.lock();
            state.leased_entry(lease)?;
            self.settle_failure(&mut state, lease.job_id, class, message, now)
                .ok_or(QueueError::NotFound(lease.job_id))?
        };
        self.after_failure(&disposition);
        Ok(disposition)
    }

    fn settle_failure(
        &self,
        state: &mut QueueState,
        id: Uuid,
        class: ErrorClass,
        message: &str,
        now: DateTime<Utc>,
    ) -> Option<Disposition> {
        let entry = state.jobs.get_mut(&id)?;
        entry.lease = None;

        if class.is_retryable() && entry.job.can_retry() {
            let delay = compute_retry_backoff(
                self.config.retry_base_delay,
                self.config.retry_max_delay,
                entry.job.attempts,
            );
            let retry_at = now + to_chrono(delay);
            entry.job.state = JobState::Delayed;
            entry.job.available_at = Some(retry_at);
            state.delayed.insert((retry_at, id));

            tracing::info!(
                job_id = %id,
                attempts = entry.job.attempts,
                max_attempts = entry.job.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %message,
                "Scheduling job retry"
            );
            return Some(Disposition::Retry { delay, retry_at });
        }

        entry.job.state = JobState::Failed;
        entry.job.finished_at = Some(now);
        entry.job.result = Some(JobResult::Error(JobFailure {
            class,
            message: message.to_string(),
            attempts: entry.job.attempts,
        }));

        tracing::error!(
            job_id = %id,
            class = %class,
            attempts = entry.job.attempts,
            error = %message,
            "Job failed"
        );
        Some(Disposition::Failed(entry.job.clone()))
    }

    fn after_failure(&self, disposition: &Disposition) {
        match disposition {
            // Idle workers recompute how long to sleep.
            Disposition::Retry { .. } => self.available.notify_waiters(),
            Disposition::Failed(_) => self.settled.notify_waiters(),
        }
    }

    pub fn reclaim_expired_leases(&self) -> ReclaimReport {
        self.reclaim_expired_leases_at(Utc::now())
    }

    /// Treat every Active job whose lease expired before `now` as a transient
    /// failure. The previous holder's commit will be rejected.
    pub fn reclaim_expired_leases_at(&self, now: DateTime<Utc>) -> ReclaimReport {
        let mut report = ReclaimReport::default();
        let mut dispositions = Vec::new();
        {
            let mut state = self.state.lock();
            report.failed.append(&mut state.restart_failures);
            let expired: Vec<Uuid> = state
                .jobs
                .values()
                .filter(|e| e.job.state == JobState::Active)
                .filter(|e| e.lease.map_or(true, |l| l.expires_at < now))
                .map(|e| e.job.id)
                .collect();

            for id in expired {
                tracing::warn!(job_id = %id, "Lease expired, reclaiming job");
                let Some(disposition) = self.settle_failure(
                    &mut state,
                    id,
                    ErrorClass::Transient,
                    "Worker lease expired",
                    now,
                ) else {
                    continue;
                };
                match &disposition {
                    Disposition::Retry { .. } => report.requeued.push(id),
                    Disposition::Failed(job) => report.failed.push(job.clone()),
                }
                dispositions.push(disposition);
            }
        }
        for disposition in &dispositions {
            self.after_failure(disposition);
        }
        report
    }

    pub fn purge_finished(&self) -> usize {
        self.purge_finished_at(Utc::now())
    }

    /// Drop terminal jobs older than their retention window.
    pub fn purge_finished_at(&self, now: DateTime<Utc>) -> usize {
        let completed_cutoff = now - to_chrono(self.config.completed_retention);
        let failed_cutoff = now - to_chrono(self.config.failed_retention);

        let mut state = self.state.lock();
        let before = state.jobs.len();
        state.jobs.retain(|_, entry| {
            let Some(finished) = entry.job.finished_at else {
                return true;
            };
            match entry.job.state {
                JobState::Completed => finished > completed_cutoff,
                JobState::Failed => finished > failed_cutoff,
                _ => true,
            }
        });
        let purged = before - state.jobs.len();
        if purged > 0 {
            tracing::debug!(purged, "Purged finished jobs");
        }
        purged
    }

    /// Counts by state. Delayed jobs that are already due count as waiting.
    pub fn stats(&self) -> JobStats {
        let mut state = self.state.lock();
        if state.promote_due(Utc::now()) > 0 {
            self.available.notify_waiters();
        }
        let mut stats = JobStats::default();
        for entry in state.jobs.values() {
            stats.record(entry.job.state);
        }
        stats
    }

    pub fn job_status(&self, id: Uuid) -> Option<JobStatus> {
        self.state.lock().jobs.get(&id).map(|e| e.job.status())
    }

    pub fn get(&self, id: Uuid) -> Option<Job> {
        self.state.lock().jobs.get(&id).map(|e| e.job.clone())
    }

    /// Resolve once nothing is Waiting, Active or Delayed.
    pub async fn wait_idle(&self) {
        loop {
            let mut settled = pin!(self.settled.notified());
            settled.as_mut().enable();
            if self.stats().pending() == 0 {
                return;
            }
            // Reclamation settles jobs without a worker, so re-check periodically too.
            tokio::select! {
                _ = settled => {}
                _ = tokio::time::sleep(IDLE_RECHECK) => {}
            }
        }
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        let state = self.state.lock();
        let mut entries: Vec<Entry> = state.jobs.values().cloned().collect();
        entries.sort_by_key(|e| e.seq);
        QueueSnapshot {
            taken_at: Utc::now(),
            next_seq: state.next_seq,
            entries,
        }
    }

    /// Rebuild a queue from a snapshot. Active jobs lost their worker with the
    /// process and count as a transient failure at `taken_at`: retried if they
    /// have budget left, otherwise Failed.
    pub fn restore(config: QueueConfig, snapshot: QueueSnapshot) -> Self {
        let queue = Self::new(config);
        let snapshot_was_empty = snapshot.is_empty();
        {
            let mut state = queue.state.lock();
            state.next_seq = snapshot.next_seq;
            for mut entry in snapshot.entries {
                let id = entry.job.id;
                state.next_seq = state.next_seq.max(entry.seq + 1);
                entry.lease = None;
                let job_state = entry.job.state;
                let available_at = entry.job.available_at;
                state.jobs.insert(id, entry);
                match job_state {
                    JobState::Waiting => state.make_ready(id),
                    JobState::Active => {
                        let disposition = queue.settle_failure(
                            &mut state,
                            id,
                            ErrorClass::Transient,
                            "Worker lost at restart",
                            snapshot.taken_at,
                        );
                        if let Some(Disposition::Failed(job)) = disposition {
                            state.restart_failures.push(job);
                        }
                    }
                    JobState::Delayed => {
                        let at = available_at.unwrap_or(snapshot.taken_at);
                        state.delayed.insert((at, id));
                    }
                    JobState::Completed | JobState::Failed => {}
                }
            }
            if snapshot_was_empty {
                tracing::debug!("Snapshot holds no jobs");
            }
            tracing::info!(
                jobs = state.jobs.len(),
                ready = state.ready.len(),
                delayed = state.delayed.len(),
                failed_at_restart = state.restart_failures.len(),
                "Restored job queue from snapshot"
            );
        }
        queue
    }

    /// Write the snapshot as JSON, replacing `path` atomically.
    pub async fn save_snapshot(&self, path: &Path) -> Result<(), QueueError> {
        let snapshot = self.snapshot();
        let data = serde_json::to_vec(&snapshot)?;
        let tmp = path.with_extension("tmp");
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&tmp, &data).await?;
        tokio::fs::rename(&tmp, path).await?;
        tracing::debug!(
            path = %path.display(),
            jobs = snapshot.len(),
            bytes = data.len(),
            "Wrote queue snapshot"
        );
        Ok(())
    }

    /// Restore from `path`, or start empty when no snapshot exists yet.
    pub async fn load_or_new(config: QueueConfig, path: &Path) -> Result<Self, QueueError> {
        match tokio::fs::read(path).await {
            Ok(data) => Ok(Self::restore(config, serde_json::from_slice(&data)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::new(config)),
            Err(e) => Err(e.into()),
        }
    }
}
