//! Durable job queue with delayed delivery and a dead-letter queue
//!
//! FIFO-with-delay semantics over scrape jobs. Reserved jobs that are not
//! acknowledged within their visibility timeout become visible again, so a
//! crashed worker cannot strand work. Terminal jobs leave the queue: `ack`
//! deletes, `move_to_dlq` records the failure classification in the DLQ.
//!
//! Job state machine: `READY → RESERVED → (ACKED | REQUEUED(delayed) | DLQ)`.
//!
//! Two implementations: [`sqlite::SqliteJobQueue`] for durable deployments
//! and [`MemoryJobQueue`] for tests and embedded use.

pub mod sqlite;

pub use sqlite::SqliteJobQueue;

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{DlqEntry, FailureKind, JobOrigin, ScrapeJob};
use crate::utils::error::QueueError;

/// Visibility state of a queued job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Ready,
    Reserved,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Reserved => "reserved",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ready" => Some(Self::Ready),
            "reserved" => Some(Self::Reserved),
            _ => None,
        }
    }
}

/// Work queue contract shared by the scheduler, worker pool, and service
pub trait JobQueue: Send + Sync {
    /// Add a job; it becomes visible at `job.not_before` (or immediately)
    fn enqueue(&self, job: &ScrapeJob) -> Result<(), QueueError>;

    /// Reserve the oldest visible job for `worker_id`.
    ///
    /// The job stays invisible until `visibility_timeout` elapses; if no
    /// `ack`/`nack` arrives by then it becomes visible again.
    fn reserve(
        &self,
        worker_id: &str,
        visibility_timeout: Duration,
    ) -> Result<Option<ScrapeJob>, QueueError>;

    /// Complete a reserved job and remove it from the queue
    fn ack(&self, job_id: Uuid) -> Result<(), QueueError>;

    /// Return a reserved job to the queue with `next_delay`, bumping its
    /// attempt counter and marking its origin as a retry
    fn nack(&self, job_id: Uuid, next_delay: Duration) -> Result<(), QueueError>;

    /// Terminal failure: record the classification in the DLQ and remove
    /// the job
    fn move_to_dlq(&self, job_id: Uuid, kind: FailureKind, detail: &str)
        -> Result<(), QueueError>;

    /// Jobs currently queued or reserved
    fn depth(&self) -> Result<u64, QueueError>;

    fn dlq_depth(&self) -> Result<u64, QueueError>;

    /// Most recent DLQ entries, newest first
    fn dlq_entries(&self, limit: usize) -> Result<Vec<DlqEntry>, QueueError>;
}

// ============================================================================
// In-memory implementation
// ============================================================================

#[derive(Debug, Clone)]
struct StoredJob {
    job: ScrapeJob,
    state: JobState,
    reserved_until: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct MemoryInner {
    jobs: HashMap<Uuid, StoredJob>,
    dlq: Vec<DlqEntry>,
}

/// Non-durable queue used by tests and single-process deployments
#[derive(Default)]
pub struct MemoryJobQueue {
    inner: RwLock<MemoryInner>,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn visible(stored: &StoredJob, now: DateTime<Utc>) -> bool {
        match stored.state {
            JobState::Ready => stored.job.not_before.map_or(true, |nb| nb <= now),
            JobState::Reserved => stored.reserved_until.map_or(false, |ru| ru <= now),
        }
    }
}

impl JobQueue for MemoryJobQueue {
    fn enqueue(&self, job: &ScrapeJob) -> Result<(), QueueError> {
        let mut inner = self.inner.write().unwrap();
        inner.jobs.insert(
            job.id,
            StoredJob {
                job: job.clone(),
                state: JobState::Ready,
                reserved_until: None,
            },
        );
        Ok(())
    }

    fn reserve(
        &self,
        _worker_id: &str,
        visibility_timeout: Duration,
    ) -> Result<Option<ScrapeJob>, QueueError> {
        let now = Utc::now();
        let mut inner = self.inner.write().unwrap();

        let candidate = inner
            .jobs
            .values()
            .filter(|s| Self::visible(s, now))
            .min_by_key(|s| (s.job.enqueued_at, s.job.id))
            .map(|s| s.job.id);

        let Some(id) = candidate else {
            return Ok(None);
        };

        let stored = inner.jobs.get_mut(&id).expect("candidate exists");
        stored.state = JobState::Reserved;
        stored.reserved_until =
            Some(now + chrono::Duration::from_std(visibility_timeout).unwrap_or_default());
        Ok(Some(stored.job.clone()))
    }

    fn ack(&self, job_id: Uuid) -> Result<(), QueueError> {
        let mut inner = self.inner.write().unwrap();
        inner
            .jobs
            .remove(&job_id)
            .map(|_| ())
            .ok_or(QueueError::JobNotFound(job_id))
    }

    fn nack(&self, job_id: Uuid, next_delay: Duration) -> Result<(), QueueError> {
        let mut inner = self.inner.write().unwrap();
        let stored = inner
            .jobs
            .get_mut(&job_id)
            .ok_or(QueueError::JobNotFound(job_id))?;

        stored.state = JobState::Ready;
        stored.reserved_until = None;
        stored.job.attempt += 1;
        stored.job.origin = JobOrigin::Retry;
        stored.job.not_before =
            Some(Utc::now() + chrono::Duration::from_std(next_delay).unwrap_or_default());
        Ok(())
    }

    fn move_to_dlq(
        &self,
        job_id: Uuid,
        kind: FailureKind,
        detail: &str,
    ) -> Result<(), QueueError> {
        let mut inner = self.inner.write().unwrap();
        let stored = inner
            .jobs
            .remove(&job_id)
            .ok_or(QueueError::JobNotFound(job_id))?;

        inner.dlq.push(DlqEntry {
            job_id,
            tracker_id: stored.job.tracker_id,
            product_id: stored.job.product_id,
            url: stored.job.url,
            kind,
            detail: detail.to_string(),
            attempts: stored.job.attempt,
            failed_at: Utc::now(),
        });
        Ok(())
    }

    fn depth(&self) -> Result<u64, QueueError> {
        Ok(self.inner.read().unwrap().jobs.len() as u64)
    }

    fn dlq_depth(&self) -> Result<u64, QueueError> {
        Ok(self.inner.read().unwrap().dlq.len() as u64)
    }

    fn dlq_entries(&self, limit: usize) -> Result<Vec<DlqEntry>, QueueError> {
        let inner = self.inner.read().unwrap();
        Ok(inner.dlq.iter().rev().take(limit).cloned().collect())
    }
}
