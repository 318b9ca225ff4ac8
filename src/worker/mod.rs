//! Concurrent scrape workers
//!
//! A fixed pool of N tokio tasks drives the pipeline: reserve a job,
//! acquire rate admission, run the scrape executor, persist the result,
//! and hand failures to the retry policy. Rate tokens and the global slot
//! are released on every exit path (the permit is a guard). A shutdown
//! signal lets each worker finish its current job and exit before the next
//! reservation.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::models::{
    AuditRecord, AuditStatus, FailureKind, PricePoint, ScrapeJob, ScrapeOutcome, ScrapeSummary,
};
use crate::queue::JobQueue;
use crate::rate::RateGovernor;
use crate::scraper::url::extract_host;
use crate::scraper::ScrapeExecutor;
use crate::storage::{AuditLog, PriceHistoryStore, TrackerStore};
use crate::utils::backoff::{RetryDecision, RetryPolicy};
use crate::utils::truncate_text;

/// Cap on failure detail stored per audit row
const AUDIT_DETAIL_MAX: usize = 500;

/// Worker pool sizing and cadence
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of concurrent worker tasks
    pub count: usize,

    /// How long a reserved job stays invisible before crash recovery
    pub visibility_timeout: Duration,

    /// Idle sleep between reservation attempts when the queue is empty
    pub poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: 4,
            visibility_timeout: Duration::from_secs(120),
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// Drives scrape jobs from the queue through the executor into the stores
pub struct WorkerPool {
    queue: Arc<dyn JobQueue>,
    trackers: Arc<dyn TrackerStore>,
    history: Arc<dyn PriceHistoryStore>,
    audit: Arc<dyn AuditLog>,
    governor: Arc<RateGovernor>,
    executor: Arc<ScrapeExecutor>,
    retry: RetryPolicy,
    config: WorkerConfig,
}

impl WorkerPool {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Arc<dyn JobQueue>,
        trackers: Arc<dyn TrackerStore>,
        history: Arc<dyn PriceHistoryStore>,
        audit: Arc<dyn AuditLog>,
        governor: Arc<RateGovernor>,
        executor: Arc<ScrapeExecutor>,
        retry: RetryPolicy,
        config: WorkerConfig,
    ) -> Self {
        Self {
            queue,
            trackers,
            history,
            audit,
            governor,
            executor,
            retry,
            config,
        }
    }

    /// Spawn the configured number of worker tasks
    pub fn spawn(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        (0..self.config.count)
            .map(|i| {
                let pool = Arc::clone(self);
                let shutdown = shutdown.clone();
                let worker_id = format!("worker-{i}");
                tokio::spawn(async move { pool.worker_loop(worker_id, shutdown).await })
            })
            .collect()
    }

    async fn worker_loop(&self, worker_id: String, mut shutdown: watch::Receiver<bool>) {
        info!(worker = %worker_id, "Worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }

            let job = match self.queue.reserve(&worker_id, self.config.visibility_timeout) {
                Ok(Some(job)) => job,
                Ok(None) => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                        _ = shutdown.changed() => {}
                    }
                    continue;
                }
                Err(e) => {
                    warn!(worker = %worker_id, error = %e, "Reserve failed");
                    tokio::time::sleep(self.config.poll_interval).await;
                    continue;
                }
            };

            let job_id = job.id;
            if let Err(e) = self.process(job).await {
                error!(worker = %worker_id, job_id = %job_id, error = %e, "Job processing failed");
                if let Err(dlq_err) =
                    self.queue
                        .move_to_dlq(job_id, FailureKind::Internal, &e.to_string())
                {
                    error!(job_id = %job_id, error = %dlq_err, "Failed to dead-letter job");
                }
            }
        }
        info!(worker = %worker_id, "Worker stopped");
    }

    /// Process one reserved job to a terminal queue transition
    pub async fn process(&self, job: ScrapeJob) -> anyhow::Result<()> {
        let started = Instant::now();
        let host = extract_host(&job.url).unwrap_or_else(|_| "unknown".to_string());

        // Rate admission; denial is a synthetic RATE_LIMITED soft failure.
        // The tracker is not touched: congestion says nothing about the site.
        let permit = match self.governor.admit(&host).await {
            Ok(permit) => permit,
            Err(denied) => {
                debug!(job_id = %job.id, host = %host, reason = %denied, "Rate admission denied");
                return self.handle_failure(
                    &job,
                    FailureKind::RateLimited,
                    &denied.to_string(),
                    false,
                    started,
                    &host,
                );
            }
        };

        let outcome = self
            .executor
            .execute(&job.url, job.allow_browser_fallback)
            .await;
        drop(permit);

        match outcome {
            ScrapeOutcome::Success(signal) => {
                let captured_at = Utc::now();
                let Some(tracker) = self.trackers.get(job.tracker_id)? else {
                    // Tracker deleted while the job was in flight
                    warn!(job_id = %job.id, tracker_id = %job.tracker_id, "Tracker gone; dropping result");
                    self.queue.ack(job.id)?;
                    return Ok(());
                };

                let point = PricePoint::from_signal(&signal, &tracker, captured_at);
                self.history.append(&point)?;
                self.trackers.update_after_scrape(
                    job.tracker_id,
                    &ScrapeSummary::success(&signal, captured_at),
                )?;
                self.queue.ack(job.id)?;

                info!(
                    job_id = %job.id,
                    tracker_id = %job.tracker_id,
                    price = %signal.price,
                    currency = %signal.currency,
                    source = signal.extracted_from.as_str(),
                    adapter = %signal.adapter_id,
                    "Price captured"
                );
                self.record_audit(&job, AuditStatus::Success, None, None, started, &host);
                Ok(())
            }
            ScrapeOutcome::SoftFail { kind, detail } | ScrapeOutcome::HardFail { kind, detail } => {
                self.handle_failure(&job, kind, &detail, true, started, &host)
            }
        }
    }

    /// Update the tracker (when warranted) and apply the retry policy
    fn handle_failure(
        &self,
        job: &ScrapeJob,
        kind: FailureKind,
        detail: &str,
        update_tracker: bool,
        started: Instant,
        host: &str,
    ) -> anyhow::Result<()> {
        if update_tracker {
            match self
                .trackers
                .update_after_scrape(job.tracker_id, &ScrapeSummary::failure(kind, Utc::now()))
            {
                Ok(tracker) => debug!(
                    tracker_id = %job.tracker_id,
                    streak = tracker.failure_streak,
                    "Tracker updated after failure"
                ),
                Err(e) => warn!(tracker_id = %job.tracker_id, error = %e, "Tracker update failed"),
            }
        }

        match self.retry.decide(kind, job.attempt, job.max_attempts) {
            RetryDecision::Requeue(delay) => {
                warn!(
                    job_id = %job.id,
                    kind = %kind,
                    attempt = job.attempt,
                    max_attempts = job.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Scrape failed; retry scheduled"
                );
                self.queue.nack(job.id, delay)?;
                self.record_audit(
                    job,
                    AuditStatus::RetryScheduled,
                    Some(kind),
                    Some(detail),
                    started,
                    host,
                );
            }
            RetryDecision::DeadLetter => {
                warn!(
                    job_id = %job.id,
                    kind = %kind,
                    attempt = job.attempt,
                    detail,
                    "Scrape failed terminally; dead-lettering"
                );
                self.queue.move_to_dlq(job.id, kind, detail)?;
                self.record_audit(
                    job,
                    AuditStatus::DeadLettered,
                    Some(kind),
                    Some(detail),
                    started,
                    host,
                );
            }
        }
        Ok(())
    }

    fn record_audit(
        &self,
        job: &ScrapeJob,
        status: AuditStatus,
        kind: Option<FailureKind>,
        detail: Option<&str>,
        started: Instant,
        host: &str,
    ) {
        let record = AuditRecord {
            id: Uuid::new_v4(),
            url: job.url.clone(),
            host: host.to_string(),
            tracker_id: Some(job.tracker_id),
            product_id: Some(job.product_id),
            status,
            kind,
            detail: detail.map(|d| truncate_text(d, AUDIT_DETAIL_MAX)),
            attempt: job.attempt,
            elapsed_ms: started.elapsed().as_millis() as u64,
            recorded_at: Utc::now(),
        };
        if let Err(e) = self.audit.record(&record) {
            warn!(error = %e, "Audit record write failed");
        }
    }
}
