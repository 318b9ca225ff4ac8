//! Ingress operations and the composition root
//!
//! [`PriceTracker`] owns one handle to every store, the queue, the rate
//! governor, and the scrape executor, and exposes the operations the
//! external REST surface consumes: track a competitor URL, fetch now,
//! enqueue a scrape, read history, and get a recommendation. Construction
//! happens once at startup; consumers receive cloned `Arc` handles.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::info;
use uuid::Uuid;

use crate::models::{
    CompetitorTracker, DlqEntry, JobOrigin, PricePoint, PricingRule, Recommendation, ScrapeJob,
    ScrapeOutcome, ScrapeSummary,
};
use crate::pricing::RuleEngine;
use crate::queue::JobQueue;
use crate::scraper::url::{canonicalize_with, UrlPolicy, DEFAULT_TRACKING_PARAMS};
use crate::scraper::ScrapeExecutor;
use crate::storage::{
    AuditLog, PriceHistoryStore, ProductRepository, RuleRepository, TrackerStore,
};
use crate::utils::error::ServiceError;

/// Request to track a competitor URL for a product
#[derive(Debug, Clone)]
pub struct TrackRequest {
    pub product_id: Uuid,
    pub competitor_name: String,
    pub raw_url: String,
    pub active: bool,
    /// Enqueue an immediate manual scrape after creation
    pub enqueue_scrape: bool,
    pub check_interval_secs: Option<u64>,
}

/// Result of a track request
#[derive(Debug, Clone)]
pub struct TrackResponse {
    pub tracker: CompetitorTracker,
    pub created: bool,
    pub job_id: Option<Uuid>,
}

/// Successful synchronous scrape
#[derive(Debug, Clone)]
pub struct FetchNowResponse {
    pub price: Decimal,
    pub currency: String,
    pub source: crate::models::FetchSource,
    pub adapter_id: String,
    pub confidence: f64,
    pub point_id: Option<Uuid>,
}

/// Service-level knobs
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub max_attempts: u32,
    pub allow_browser_fallback: bool,
    pub in_flight_ttl: std::time::Duration,
    /// Default days for history reads
    pub history_days: u32,
    /// Query parameters stripped during canonicalization
    pub tracking_params: Vec<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            allow_browser_fallback: true,
            in_flight_ttl: std::time::Duration::from_secs(15 * 60),
            history_days: 30,
            tracking_params: DEFAULT_TRACKING_PARAMS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Composition root for the price-ingestion core
pub struct PriceTracker {
    pub trackers: Arc<dyn TrackerStore>,
    pub history: Arc<dyn PriceHistoryStore>,
    pub products: Arc<dyn ProductRepository>,
    pub rules: Arc<dyn RuleRepository>,
    pub audit: Arc<dyn AuditLog>,
    pub queue: Arc<dyn JobQueue>,
    executor: Arc<ScrapeExecutor>,
    engine: RuleEngine,
    policy: UrlPolicy,
    config: ServiceConfig,
}

impl PriceTracker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        trackers: Arc<dyn TrackerStore>,
        history: Arc<dyn PriceHistoryStore>,
        products: Arc<dyn ProductRepository>,
        rules: Arc<dyn RuleRepository>,
        audit: Arc<dyn AuditLog>,
        queue: Arc<dyn JobQueue>,
        executor: Arc<ScrapeExecutor>,
        engine: RuleEngine,
        policy: UrlPolicy,
        config: ServiceConfig,
    ) -> Self {
        Self {
            trackers,
            history,
            products,
            rules,
            audit,
            queue,
            executor,
            engine,
            policy,
            config,
        }
    }

    /// Track a competitor URL: canonicalize, deduplicate, create or return
    /// the existing tracker, optionally enqueue an immediate manual job.
    pub fn track_competitor(&self, request: TrackRequest) -> Result<TrackResponse, ServiceError> {
        if request.competitor_name.trim().is_empty() {
            return Err(ServiceError::InvalidInput(
                "competitor_name must not be empty".to_string(),
            ));
        }

        let canonical_url = canonicalize_with(&request.raw_url, &self.config.tracking_params)?;
        if !self.policy.allows(&canonical_url) {
            return Err(ServiceError::DomainBlocked(canonical_url));
        }

        let (tracker, created) = self.trackers.create_or_get(crate::models::NewTracker {
            product_id: request.product_id,
            competitor_name: request.competitor_name,
            raw_url: request.raw_url,
            canonical_url,
            active: request.active,
            check_interval_secs: request.check_interval_secs,
        })?;

        if created {
            info!(
                tracker_id = %tracker.id,
                product_id = %tracker.product_id,
                url = %tracker.canonical_url,
                "Tracker created"
            );
        }

        let job_id = if request.enqueue_scrape {
            self.enqueue_manual(&tracker).ok()
        } else {
            None
        };

        Ok(TrackResponse {
            tracker,
            created,
            job_id,
        })
    }

    /// Run the scrape executor synchronously. On success, append a price
    /// point and update the tracker. A failure returns the classification
    /// and mutates nothing.
    pub async fn fetch_now(
        &self,
        url: &str,
        tracker_id: Option<Uuid>,
        allow_browser_fallback: Option<bool>,
    ) -> Result<FetchNowResponse, ServiceError> {
        let allow_browser =
            allow_browser_fallback.unwrap_or(self.config.allow_browser_fallback);

        let outcome = self.executor.execute(url, allow_browser).await;
        let signal = match outcome {
            ScrapeOutcome::Success(signal) => signal,
            ScrapeOutcome::SoftFail { kind, detail } | ScrapeOutcome::HardFail { kind, detail } => {
                return Err(ServiceError::ScrapeFailed { kind, detail });
            }
        };

        let mut point_id = None;
        if let Some(tracker_id) = tracker_id {
            let tracker = self
                .trackers
                .get(tracker_id)?
                .ok_or_else(|| ServiceError::NotFound(format!("tracker {tracker_id}")))?;

            let captured_at = Utc::now();
            let point = PricePoint::from_signal(&signal, &tracker, captured_at);
            self.history.append(&point)?;
            self.trackers
                .update_after_scrape(tracker_id, &ScrapeSummary::success(&signal, captured_at))?;
            point_id = Some(point.id);
        }

        Ok(FetchNowResponse {
            price: signal.price,
            currency: signal.currency,
            source: signal.extracted_from,
            adapter_id: signal.adapter_id,
            confidence: signal.confidence,
            point_id,
        })
    }

    /// Enqueue a manual scrape job for an existing tracker
    pub fn enqueue_scrape(&self, tracker_id: Uuid) -> Result<Uuid, ServiceError> {
        let tracker = self
            .trackers
            .get(tracker_id)?
            .ok_or_else(|| ServiceError::NotFound(format!("tracker {tracker_id}")))?;
        self.enqueue_manual(&tracker)
    }

    fn enqueue_manual(&self, tracker: &CompetitorTracker) -> Result<Uuid, ServiceError> {
        // Manual jobs bypass the interval check but respect the in-flight
        // marker
        let until = Utc::now()
            + chrono::Duration::from_std(self.config.in_flight_ttl)
                .unwrap_or_else(|_| chrono::Duration::minutes(15));
        if !self.trackers.mark_in_flight(tracker.id, until)? {
            return Err(ServiceError::InvalidInput(format!(
                "tracker {} already has an outstanding job",
                tracker.id
            )));
        }

        let job = ScrapeJob::new(
            tracker.id,
            tracker.product_id,
            tracker.canonical_url.clone(),
            self.config.allow_browser_fallback,
            self.config.max_attempts,
            JobOrigin::Manual,
        );
        self.queue.enqueue(&job)?;
        info!(job_id = %job.id, tracker_id = %tracker.id, "Manual scrape enqueued");
        Ok(job.id)
    }

    /// Deterministic recommendation for a product
    pub fn recommend(&self, product_id: Uuid) -> Result<Recommendation, ServiceError> {
        let product = self
            .products
            .get(product_id)?
            .ok_or_else(|| ServiceError::NotFound(format!("product {product_id}")))?;

        let rules = self.rules.list()?;
        let history = self
            .history
            .history_for_product(product_id, self.engine.config().history_window_days)?;

        Ok(self.engine.recommend(&product, &rules, &history))
    }

    /// Price history by product
    pub fn history_for_product(
        &self,
        product_id: Uuid,
        days: Option<u32>,
    ) -> Result<Vec<PricePoint>, ServiceError> {
        Ok(self
            .history
            .history_for_product(product_id, days.unwrap_or(self.config.history_days))?)
    }

    /// Price history by tracker
    pub fn history_for_tracker(
        &self,
        tracker_id: Uuid,
        days: Option<u32>,
    ) -> Result<Vec<PricePoint>, ServiceError> {
        let days = days.unwrap_or(self.config.history_days);
        let to = Utc::now();
        let from = to - chrono::Duration::days(i64::from(days));
        Ok(self.history.range(tracker_id, from, to)?)
    }

    // ------------------------------------------------------------------
    // Tracker administration
    // ------------------------------------------------------------------

    /// Re-point a tracker at a new URL; uniqueness is re-checked
    pub fn update_tracker_url(
        &self,
        tracker_id: Uuid,
        raw_url: &str,
    ) -> Result<CompetitorTracker, ServiceError> {
        let canonical_url = canonicalize_with(raw_url, &self.config.tracking_params)?;
        if !self.policy.allows(&canonical_url) {
            return Err(ServiceError::DomainBlocked(canonical_url));
        }
        Ok(self
            .trackers
            .update_url(tracker_id, raw_url, &canonical_url)?)
    }

    /// Clear a DEAD tracker and reset its failure streak
    pub fn revive_tracker(&self, tracker_id: Uuid) -> Result<(), ServiceError> {
        self.trackers.revive(tracker_id)?;
        info!(tracker_id = %tracker_id, "Tracker revived");
        Ok(())
    }

    pub fn delete_tracker(&self, tracker_id: Uuid) -> Result<bool, ServiceError> {
        Ok(self.trackers.delete(tracker_id)?)
    }

    // ------------------------------------------------------------------
    // Rules
    // ------------------------------------------------------------------

    pub fn create_rule(&self, rule: &PricingRule) -> Result<(), ServiceError> {
        if rule.product_id.is_some() && rule.category.is_some() {
            return Err(ServiceError::InvalidInput(
                "rule scope is either a product or a category, not both".to_string(),
            ));
        }
        Ok(self.rules.create(rule)?)
    }

    pub fn list_rules(&self) -> Result<Vec<PricingRule>, ServiceError> {
        Ok(self.rules.list()?)
    }

    pub fn delete_rule(&self, rule_id: Uuid) -> Result<bool, ServiceError> {
        Ok(self.rules.delete(rule_id)?)
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    pub fn dlq_entries(&self, limit: usize) -> Result<Vec<DlqEntry>, ServiceError> {
        Ok(self.queue.dlq_entries(limit)?)
    }

    /// Most recent scrape audit records, newest first
    pub fn recent_scrapes(
        &self,
        limit: usize,
    ) -> Result<Vec<crate::models::AuditRecord>, ServiceError> {
        Ok(self.audit.recent(limit)?)
    }

    /// Retention hook; drops history before the cutoff
    pub fn compact_history(
        &self,
        before: chrono::DateTime<Utc>,
    ) -> Result<u64, ServiceError> {
        let dropped = self.history.compact(before)?;
        info!(dropped, "History compaction complete");
        Ok(dropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::AdapterRegistry;
    use crate::pricing::EngineConfig;
    use crate::queue::MemoryJobQueue;
    use crate::scraper::HttpFetcher;
    use crate::storage::{
        MemoryAuditLog, MemoryPriceHistoryStore, MemoryProductRepository, MemoryRuleRepository,
        MemoryTrackerStore,
    };
    use std::time::Duration;

    fn service() -> PriceTracker {
        let executor = ScrapeExecutor::new(
            HttpFetcher::new(Duration::from_secs(2), 3).unwrap(),
            None,
            Arc::new(AdapterRegistry::new("USD")),
            UrlPolicy::permissive(),
            None,
            Duration::from_secs(5),
        );
        PriceTracker::new(
            Arc::new(MemoryTrackerStore::new()),
            Arc::new(MemoryPriceHistoryStore::new()),
            Arc::new(MemoryProductRepository::new()),
            Arc::new(MemoryRuleRepository::new()),
            Arc::new(MemoryAuditLog::new()),
            Arc::new(MemoryJobQueue::new()),
            Arc::new(executor),
            RuleEngine::new(EngineConfig::default()),
            UrlPolicy::permissive(),
            ServiceConfig::default(),
        )
    }

    fn track_request(product_id: Uuid, url: &str) -> TrackRequest {
        TrackRequest {
            product_id,
            competitor_name: "Shopmart".to_string(),
            raw_url: url.to_string(),
            active: true,
            enqueue_scrape: false,
            check_interval_secs: None,
        }
    }

    #[test]
    fn test_track_canonicalizes_and_dedupes() {
        let svc = service();
        let product_id = Uuid::new_v4();

        let first = svc
            .track_competitor(track_request(
                product_id,
                "https://Shop.example.com/p/42?utm_source=x&ref=a",
            ))
            .unwrap();
        assert!(first.created);
        assert_eq!(
            first.tracker.canonical_url,
            "https://shop.example.com/p/42"
        );

        let second = svc
            .track_competitor(track_request(
                product_id,
                "https://shop.example.com/p/42/?ref=b",
            ))
            .unwrap();
        assert!(!second.created);
        assert_eq!(first.tracker.id, second.tracker.id);
    }

    #[test]
    fn test_track_rejects_invalid_url() {
        let svc = service();
        let err = svc
            .track_competitor(track_request(Uuid::new_v4(), "ftp://x.example.com/p"))
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
    }

    #[test]
    fn test_track_with_enqueue_creates_job() {
        let svc = service();
        let response = svc
            .track_competitor(TrackRequest {
                enqueue_scrape: true,
                ..track_request(Uuid::new_v4(), "https://shop.example.com/p/1")
            })
            .unwrap();

        assert!(response.job_id.is_some());
        assert_eq!(svc.queue.depth().unwrap(), 1);
    }

    #[test]
    fn test_enqueue_respects_in_flight_marker() {
        let svc = service();
        let response = svc
            .track_competitor(track_request(Uuid::new_v4(), "https://shop.example.com/p/1"))
            .unwrap();
        let tracker_id = response.tracker.id;

        assert!(svc.enqueue_scrape(tracker_id).is_ok());
        // Second manual enqueue is refused while the first is outstanding
        let err = svc.enqueue_scrape(tracker_id).unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
        assert_eq!(svc.queue.depth().unwrap(), 1);
    }

    #[test]
    fn test_enqueue_unknown_tracker() {
        let svc = service();
        assert!(matches!(
            svc.enqueue_scrape(Uuid::new_v4()),
            Err(ServiceError::NotFound(_))
        ));
    }

    #[test]
    fn test_recommend_requires_product() {
        let svc = service();
        assert!(matches!(
            svc.recommend(Uuid::new_v4()),
            Err(ServiceError::NotFound(_))
        ));
    }

    #[test]
    fn test_rule_scope_validation() {
        let svc = service();
        let rule = PricingRule {
            id: Uuid::new_v4(),
            name: "bad scope".to_string(),
            rule_type: crate::models::RuleType::Fixed,
            product_id: Some(Uuid::new_v4()),
            category: Some("grocery".to_string()),
            adjustment_pct: Decimal::ZERO,
            status: crate::models::RuleStatus::Active,
            priority: 0,
        };
        assert!(matches!(
            svc.create_rule(&rule),
            Err(ServiceError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_domain_blocked_at_tracker_creation() {
        let executor = ScrapeExecutor::new(
            HttpFetcher::new(Duration::from_secs(2), 3).unwrap(),
            None,
            Arc::new(AdapterRegistry::new("USD")),
            UrlPolicy::new(true, vec!["allowed.example.com".to_string()]),
            None,
            Duration::from_secs(5),
        );
        let svc = PriceTracker::new(
            Arc::new(MemoryTrackerStore::new()),
            Arc::new(MemoryPriceHistoryStore::new()),
            Arc::new(MemoryProductRepository::new()),
            Arc::new(MemoryRuleRepository::new()),
            Arc::new(MemoryAuditLog::new()),
            Arc::new(MemoryJobQueue::new()),
            Arc::new(executor),
            RuleEngine::new(EngineConfig::default()),
            UrlPolicy::new(true, vec!["allowed.example.com".to_string()]),
            ServiceConfig::default(),
        );

        let err = svc
            .track_competitor(track_request(
                Uuid::new_v4(),
                "https://forbidden.example.com/p/1",
            ))
            .unwrap_err();
        assert!(matches!(err, ServiceError::DomainBlocked(_)));
    }
}
