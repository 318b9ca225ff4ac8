//! Periodic job scheduling for tracked competitor URLs
//!
//! Each tick selects active trackers whose effective interval has elapsed
//! (per-tracker override, else the global default), stamps a short-TTL
//! in-flight marker so the same tracker never has two outstanding jobs,
//! and enqueues one SCHEDULED job each. Trackers that have crossed the
//! failure-streak limit transition to DEAD and stop being scheduled until
//! revived.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::models::{JobOrigin, ScrapeJob};
use crate::queue::JobQueue;
use crate::storage::TrackerStore;

/// Scheduler policy knobs
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Default interval between checks when a tracker has no override
    pub default_interval: Duration,

    /// How often the scheduler wakes up
    pub tick_interval: Duration,

    /// Consecutive failures before a tracker is marked DEAD
    pub failure_streak_limit: u32,

    /// Maximum trackers enqueued per tick
    pub batch_limit: usize,

    /// Attempt budget stamped onto scheduled jobs
    pub max_attempts: u32,

    /// Whether scheduled jobs may escalate to the browser tier
    pub allow_browser_fallback: bool,

    /// TTL of the in-flight marker stamped at enqueue time
    pub in_flight_ttl: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_interval: Duration::from_secs(6 * 3600),
            tick_interval: Duration::from_secs(60),
            failure_streak_limit: 5,
            batch_limit: 100,
            max_attempts: 3,
            allow_browser_fallback: true,
            in_flight_ttl: Duration::from_secs(15 * 60),
        }
    }
}

/// Turns due trackers into queued scrape jobs
pub struct Scheduler {
    trackers: Arc<dyn TrackerStore>,
    queue: Arc<dyn JobQueue>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        trackers: Arc<dyn TrackerStore>,
        queue: Arc<dyn JobQueue>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            trackers,
            queue,
            config,
        }
    }

    /// Run ticks until the shutdown signal flips
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(
            tick_secs = self.config.tick_interval.as_secs(),
            "Scheduler started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.tick() {
                        Ok(enqueued) if enqueued > 0 => {
                            debug!(enqueued, "Scheduler tick complete");
                        }
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "Scheduler tick failed"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Scheduler stopping");
                        return;
                    }
                }
            }
        }
    }

    /// One scheduling pass; returns the number of jobs enqueued.
    ///
    /// Trackers past the failure-streak limit are marked DEAD instead of
    /// being enqueued.
    pub fn tick(&self) -> anyhow::Result<usize> {
        let now = Utc::now();
        let due = self
            .trackers
            .list_due(now, self.config.default_interval, self.config.batch_limit)?;

        let mut enqueued = 0;
        for tracker in due {
            if tracker.failure_streak >= self.config.failure_streak_limit {
                warn!(
                    tracker_id = %tracker.id,
                    streak = tracker.failure_streak,
                    url = %tracker.canonical_url,
                    "Failure streak limit reached; marking tracker dead"
                );
                self.trackers.mark_dead(tracker.id)?;
                continue;
            }

            // The marker makes enqueueing race-free against concurrent
            // ticks and manual jobs
            let until = now
                + chrono::Duration::from_std(self.config.in_flight_ttl)
                    .unwrap_or_else(|_| chrono::Duration::minutes(15));
            if !self.trackers.mark_in_flight(tracker.id, until)? {
                continue;
            }

            let job = ScrapeJob::new(
                tracker.id,
                tracker.product_id,
                tracker.canonical_url.clone(),
                self.config.allow_browser_fallback,
                self.config.max_attempts,
                JobOrigin::Scheduled,
            );
            self.queue.enqueue(&job)?;
            enqueued += 1;
        }

        Ok(enqueued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FailureKind, NewTracker, ScrapeSummary, TrackerStatus};
    use crate::queue::MemoryJobQueue;
    use crate::storage::{MemoryTrackerStore, TrackerStore};
    use uuid::Uuid;

    fn setup(config: SchedulerConfig) -> (Arc<MemoryTrackerStore>, Arc<MemoryJobQueue>, Scheduler) {
        let trackers = Arc::new(MemoryTrackerStore::new());
        let queue = Arc::new(MemoryJobQueue::new());
        let scheduler = Scheduler::new(trackers.clone(), queue.clone(), config);
        (trackers, queue, scheduler)
    }

    fn add_tracker(store: &MemoryTrackerStore, url: &str) -> Uuid {
        store
            .create_or_get(NewTracker {
                product_id: Uuid::new_v4(),
                competitor_name: "Shopmart".to_string(),
                raw_url: url.to_string(),
                canonical_url: url.to_string(),
                active: true,
                check_interval_secs: None,
            })
            .unwrap()
            .0
            .id
    }

    #[test]
    fn test_tick_enqueues_due_trackers() {
        let (trackers, queue, scheduler) = setup(SchedulerConfig::default());
        add_tracker(&trackers, "https://shop.example.com/p/1");
        add_tracker(&trackers, "https://shop.example.com/p/2");

        let enqueued = scheduler.tick().unwrap();
        assert_eq!(enqueued, 2);
        assert_eq!(queue.depth().unwrap(), 2);
    }

    #[test]
    fn test_tick_never_double_enqueues() {
        let (trackers, queue, scheduler) = setup(SchedulerConfig::default());
        add_tracker(&trackers, "https://shop.example.com/p/1");

        assert_eq!(scheduler.tick().unwrap(), 1);
        // Second tick: in-flight marker still live, nothing new
        assert_eq!(scheduler.tick().unwrap(), 0);
        assert_eq!(queue.depth().unwrap(), 1);
    }

    #[test]
    fn test_streak_limit_marks_dead() {
        let config = SchedulerConfig {
            failure_streak_limit: 2,
            ..SchedulerConfig::default()
        };
        let (trackers, queue, scheduler) = setup(config);
        let id = add_tracker(&trackers, "https://shop.example.com/p/1");

        for _ in 0..2 {
            trackers
                .update_after_scrape(
                    id,
                    &ScrapeSummary::failure(
                        FailureKind::Timeout,
                        Utc::now() - chrono::Duration::days(1),
                    ),
                )
                .unwrap();
        }

        let enqueued = scheduler.tick().unwrap();
        assert_eq!(enqueued, 0);
        assert_eq!(queue.depth().unwrap(), 0);
        assert_eq!(
            trackers.get(id).unwrap().unwrap().last_status,
            TrackerStatus::Dead
        );

        // Dead trackers stay unscheduled
        assert_eq!(scheduler.tick().unwrap(), 0);
    }

    #[test]
    fn test_recently_checked_not_enqueued() {
        let (trackers, queue, scheduler) = setup(SchedulerConfig::default());
        let id = add_tracker(&trackers, "https://shop.example.com/p/1");

        trackers
            .update_after_scrape(
                id,
                &ScrapeSummary {
                    status: TrackerStatus::Ok,
                    price: None,
                    currency: None,
                    checked_at: Utc::now(),
                },
            )
            .unwrap();

        assert_eq!(scheduler.tick().unwrap(), 0);
        assert_eq!(queue.depth().unwrap(), 0);
    }

    #[test]
    fn test_scheduled_job_shape() {
        let config = SchedulerConfig {
            max_attempts: 5,
            allow_browser_fallback: false,
            ..SchedulerConfig::default()
        };
        let (trackers, queue, scheduler) = setup(config);
        let id = add_tracker(&trackers, "https://shop.example.com/p/1");

        scheduler.tick().unwrap();
        let job = queue
            .reserve("w", Duration::from_secs(30))
            .unwrap()
            .unwrap();
        assert_eq!(job.tracker_id, id);
        assert_eq!(job.origin, JobOrigin::Scheduled);
        assert_eq!(job.attempt, 1);
        assert_eq!(job.max_attempts, 5);
        assert!(!job.allow_browser_fallback);
    }
}
