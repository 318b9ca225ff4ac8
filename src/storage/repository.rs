//! Repository trait abstractions for the pipeline's stores
//!
//! Trait-based data access keeps business logic decoupled from SQLite and
//! makes the worker pool, scheduler, and rule engine testable against
//! in-memory implementations.
//!
//! # Traits
//!
//! - [`TrackerStore`] - mutable per-tracker state with CAS semantics
//! - [`PriceHistoryStore`] - append-only price observations
//! - [`ProductRepository`] - read access to the external catalog's products
//! - [`RuleRepository`] - pricing rule CRUD
//! - [`AuditLog`] - append-only scrape execution trail

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    AuditRecord, CompetitorTracker, NewTracker, PricePoint, PricingRule, Product, ScrapeSummary,
    TrackerStatus,
};
use crate::utils::error::StoreError;

// ============================================================================
// Traits
// ============================================================================

/// Mutable per-tracker state
///
/// Updates are serialized per tracker via an optimistic version field; the
/// uniqueness invariant on `(product_id, canonical_url)` is enforced by
/// `create_or_get`.
pub trait TrackerStore: Send + Sync {
    /// Create a tracker, or return the existing one for the same
    /// `(product_id, canonical_url)`. The boolean is `true` when created.
    fn create_or_get(&self, new: NewTracker) -> Result<(CompetitorTracker, bool), StoreError>;

    fn get(&self, id: Uuid) -> Result<Option<CompetitorTracker>, StoreError>;

    fn list(&self, limit: usize, offset: usize) -> Result<Vec<CompetitorTracker>, StoreError>;

    /// Active trackers for one product
    fn for_product(&self, product_id: Uuid) -> Result<Vec<CompetitorTracker>, StoreError>;

    /// Active, non-dead trackers due for a check at `now`, with no live
    /// in-flight marker. Per-tracker interval overrides the default.
    fn list_due(
        &self,
        now: DateTime<Utc>,
        default_interval: Duration,
        limit: usize,
    ) -> Result<Vec<CompetitorTracker>, StoreError>;

    /// Stamp the short-TTL in-flight marker. Returns `false` when another
    /// live marker exists (a job for this tracker is already outstanding).
    fn mark_in_flight(&self, id: Uuid, until: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Apply a scrape result: success resets the failure streak and records
    /// the price snapshot; failure increments the streak. Clears the
    /// in-flight marker either way.
    fn update_after_scrape(
        &self,
        id: Uuid,
        summary: &ScrapeSummary,
    ) -> Result<CompetitorTracker, StoreError>;

    /// Transition to DEAD after the failure-streak threshold
    fn mark_dead(&self, id: Uuid) -> Result<(), StoreError>;

    /// Clear DEAD status and reset the streak (admin action)
    fn revive(&self, id: Uuid) -> Result<(), StoreError>;

    /// Re-point a tracker at a new URL (uniqueness is re-checked)
    fn update_url(
        &self,
        id: Uuid,
        raw_url: &str,
        canonical_url: &str,
    ) -> Result<CompetitorTracker, StoreError>;

    fn delete(&self, id: Uuid) -> Result<bool, StoreError>;

    fn count_by_status(&self, status: TrackerStatus) -> Result<u64, StoreError>;
}

/// Append-only log of price observations
///
/// No update or delete exists on this contract; retention happens only
/// through the explicit `compact` hook, outside the write path.
pub trait PriceHistoryStore: Send + Sync {
    fn append(&self, point: &PricePoint) -> Result<(), StoreError>;

    /// Points for a tracker in `[from, to]`, ascending `captured_at`
    fn range(
        &self,
        tracker_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PricePoint>, StoreError>;

    fn latest(&self, tracker_id: Uuid) -> Result<Option<PricePoint>, StoreError>;

    /// All points for a product in the last `days`, ascending `captured_at`
    fn history_for_product(&self, product_id: Uuid, days: u32)
        -> Result<Vec<PricePoint>, StoreError>;

    /// Retention hook: drop points older than `before`, returning the count
    fn compact(&self, before: DateTime<Utc>) -> Result<u64, StoreError>;
}

/// Read access to catalog products (the catalog itself is external)
pub trait ProductRepository: Send + Sync {
    fn get(&self, id: Uuid) -> Result<Option<Product>, StoreError>;
    fn upsert(&self, product: &Product) -> Result<(), StoreError>;
    fn list(&self, limit: usize, offset: usize) -> Result<Vec<Product>, StoreError>;
}

/// Pricing rule storage
pub trait RuleRepository: Send + Sync {
    fn create(&self, rule: &PricingRule) -> Result<(), StoreError>;
    fn get(&self, id: Uuid) -> Result<Option<PricingRule>, StoreError>;
    fn list(&self) -> Result<Vec<PricingRule>, StoreError>;
    fn update(&self, rule: &PricingRule) -> Result<(), StoreError>;
    fn delete(&self, id: Uuid) -> Result<bool, StoreError>;
}

/// Append-only scrape execution trail
pub trait AuditLog: Send + Sync {
    fn record(&self, record: &AuditRecord) -> Result<(), StoreError>;

    /// Most recent records, newest first
    fn recent(&self, limit: usize) -> Result<Vec<AuditRecord>, StoreError>;
}

/// Effective check interval for a tracker
pub(crate) fn effective_interval(
    tracker: &CompetitorTracker,
    default_interval: Duration,
) -> Duration {
    tracker
        .check_interval_secs
        .map(Duration::from_secs)
        .unwrap_or(default_interval)
}

/// Whether a tracker is due for a scheduled check at `now`
pub(crate) fn is_due(
    tracker: &CompetitorTracker,
    now: DateTime<Utc>,
    default_interval: Duration,
) -> bool {
    if !tracker.active || tracker.last_status == TrackerStatus::Dead {
        return false;
    }
    if let Some(until) = tracker.in_flight_until {
        if until > now {
            return false;
        }
    }
    match tracker.last_checked_at {
        None => true,
        Some(checked) => {
            // Intervals beyond chrono's range are treated as "never again"
            let interval = chrono::Duration::from_std(effective_interval(
                tracker,
                default_interval,
            ))
            .unwrap_or_else(|_| chrono::Duration::days(365 * 100));
            checked + interval <= now
        }
    }
}

// ============================================================================
// In-memory implementations
// ============================================================================

/// In-memory tracker store for tests and embedded runs
#[derive(Default)]
pub struct MemoryTrackerStore {
    trackers: RwLock<HashMap<Uuid, CompetitorTracker>>,
}

impl MemoryTrackerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TrackerStore for MemoryTrackerStore {
    fn create_or_get(&self, new: NewTracker) -> Result<(CompetitorTracker, bool), StoreError> {
        let mut trackers = self.trackers.write().unwrap();

        if let Some(existing) = trackers
            .values()
            .find(|t| t.product_id == new.product_id && t.canonical_url == new.canonical_url)
        {
            return Ok((existing.clone(), false));
        }

        let tracker = CompetitorTracker {
            id: Uuid::new_v4(),
            product_id: new.product_id,
            competitor_name: new.competitor_name,
            raw_url: new.raw_url,
            canonical_url: new.canonical_url,
            active: new.active,
            last_price: None,
            last_currency: None,
            last_checked_at: None,
            last_status: TrackerStatus::New,
            failure_streak: 0,
            check_interval_secs: new.check_interval_secs,
            in_flight_until: None,
            version: 0,
            created_at: Utc::now(),
        };
        trackers.insert(tracker.id, tracker.clone());
        Ok((tracker, true))
    }

    fn get(&self, id: Uuid) -> Result<Option<CompetitorTracker>, StoreError> {
        Ok(self.trackers.read().unwrap().get(&id).cloned())
    }

    fn list(&self, limit: usize, offset: usize) -> Result<Vec<CompetitorTracker>, StoreError> {
        let trackers = self.trackers.read().unwrap();
        let mut all: Vec<_> = trackers.values().cloned().collect();
        all.sort_by_key(|t| (t.created_at, t.id));
        Ok(all.into_iter().skip(offset).take(limit).collect())
    }

    fn for_product(&self, product_id: Uuid) -> Result<Vec<CompetitorTracker>, StoreError> {
        let trackers = self.trackers.read().unwrap();
        let mut found: Vec<_> = trackers
            .values()
            .filter(|t| t.product_id == product_id && t.active)
            .cloned()
            .collect();
        found.sort_by_key(|t| (t.created_at, t.id));
        Ok(found)
    }

    fn list_due(
        &self,
        now: DateTime<Utc>,
        default_interval: Duration,
        limit: usize,
    ) -> Result<Vec<CompetitorTracker>, StoreError> {
        let trackers = self.trackers.read().unwrap();
        let mut due: Vec<_> = trackers
            .values()
            .filter(|t| is_due(t, now, default_interval))
            .cloned()
            .collect();
        due.sort_by_key(|t| (t.last_checked_at, t.id));
        Ok(due.into_iter().take(limit).collect())
    }

    fn mark_in_flight(&self, id: Uuid, until: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut trackers = self.trackers.write().unwrap();
        let tracker = trackers
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("tracker {id}")))?;

        if let Some(existing) = tracker.in_flight_until {
            if existing > Utc::now() {
                return Ok(false);
            }
        }
        tracker.in_flight_until = Some(until);
        tracker.version += 1;
        Ok(true)
    }

    fn update_after_scrape(
        &self,
        id: Uuid,
        summary: &ScrapeSummary,
    ) -> Result<CompetitorTracker, StoreError> {
        let mut trackers = self.trackers.write().unwrap();
        let tracker = trackers
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("tracker {id}")))?;

        tracker.last_checked_at = Some(summary.checked_at);
        tracker.last_status = summary.status;
        tracker.in_flight_until = None;
        if summary.status == TrackerStatus::Ok {
            tracker.last_price = summary.price;
            tracker.last_currency = summary.currency.clone();
            tracker.failure_streak = 0;
        } else {
            tracker.failure_streak += 1;
        }
        tracker.version += 1;
        Ok(tracker.clone())
    }

    fn mark_dead(&self, id: Uuid) -> Result<(), StoreError> {
        let mut trackers = self.trackers.write().unwrap();
        let tracker = trackers
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("tracker {id}")))?;
        tracker.last_status = TrackerStatus::Dead;
        tracker.version += 1;
        Ok(())
    }

    fn revive(&self, id: Uuid) -> Result<(), StoreError> {
        let mut trackers = self.trackers.write().unwrap();
        let tracker = trackers
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("tracker {id}")))?;
        tracker.last_status = TrackerStatus::New;
        tracker.failure_streak = 0;
        tracker.version += 1;
        Ok(())
    }

    fn update_url(
        &self,
        id: Uuid,
        raw_url: &str,
        canonical_url: &str,
    ) -> Result<CompetitorTracker, StoreError> {
        let mut trackers = self.trackers.write().unwrap();

        let product_id = trackers
            .get(&id)
            .map(|t| t.product_id)
            .ok_or_else(|| StoreError::NotFound(format!("tracker {id}")))?;

        if trackers
            .values()
            .any(|t| t.id != id && t.product_id == product_id && t.canonical_url == canonical_url)
        {
            return Err(StoreError::Corrupt {
                table: "trackers",
                detail: format!("duplicate canonical URL {canonical_url} for product"),
            });
        }

        let tracker = trackers.get_mut(&id).expect("checked above");
        tracker.raw_url = raw_url.to_string();
        tracker.canonical_url = canonical_url.to_string();
        tracker.version += 1;
        Ok(tracker.clone())
    }

    fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.trackers.write().unwrap().remove(&id).is_some())
    }

    fn count_by_status(&self, status: TrackerStatus) -> Result<u64, StoreError> {
        Ok(self
            .trackers
            .read()
            .unwrap()
            .values()
            .filter(|t| t.last_status == status)
            .count() as u64)
    }
}

/// In-memory price history for tests and embedded runs
#[derive(Default)]
pub struct MemoryPriceHistoryStore {
    points: RwLock<Vec<PricePoint>>,
}

impl MemoryPriceHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PriceHistoryStore for MemoryPriceHistoryStore {
    fn append(&self, point: &PricePoint) -> Result<(), StoreError> {
        self.points.write().unwrap().push(point.clone());
        Ok(())
    }

    fn range(
        &self,
        tracker_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PricePoint>, StoreError> {
        let points = self.points.read().unwrap();
        let mut found: Vec<_> = points
            .iter()
            .filter(|p| p.tracker_id == tracker_id && p.captured_at >= from && p.captured_at <= to)
            .cloned()
            .collect();
        found.sort_by_key(|p| p.captured_at);
        Ok(found)
    }

    fn latest(&self, tracker_id: Uuid) -> Result<Option<PricePoint>, StoreError> {
        let points = self.points.read().unwrap();
        Ok(points
            .iter()
            .filter(|p| p.tracker_id == tracker_id)
            .max_by_key(|p| p.captured_at)
            .cloned())
    }

    fn history_for_product(
        &self,
        product_id: Uuid,
        days: u32,
    ) -> Result<Vec<PricePoint>, StoreError> {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(days));
        let points = self.points.read().unwrap();
        let mut found: Vec<_> = points
            .iter()
            .filter(|p| p.product_id == product_id && p.captured_at >= cutoff)
            .cloned()
            .collect();
        found.sort_by_key(|p| p.captured_at);
        Ok(found)
    }

    fn compact(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut points = self.points.write().unwrap();
        let initial = points.len();
        points.retain(|p| p.captured_at >= before);
        Ok((initial - points.len()) as u64)
    }
}

/// In-memory product catalog stand-in
#[derive(Default)]
pub struct MemoryProductRepository {
    products: RwLock<HashMap<Uuid, Product>>,
}

impl MemoryProductRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProductRepository for MemoryProductRepository {
    fn get(&self, id: Uuid) -> Result<Option<Product>, StoreError> {
        Ok(self.products.read().unwrap().get(&id).cloned())
    }

    fn upsert(&self, product: &Product) -> Result<(), StoreError> {
        self.products
            .write()
            .unwrap()
            .insert(product.id, product.clone());
        Ok(())
    }

    fn list(&self, limit: usize, offset: usize) -> Result<Vec<Product>, StoreError> {
        let products = self.products.read().unwrap();
        let mut all: Vec<_> = products.values().cloned().collect();
        all.sort_by_key(|p| p.id);
        Ok(all.into_iter().skip(offset).take(limit).collect())
    }
}

/// In-memory rule store
#[derive(Default)]
pub struct MemoryRuleRepository {
    rules: RwLock<HashMap<Uuid, PricingRule>>,
}

impl MemoryRuleRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RuleRepository for MemoryRuleRepository {
    fn create(&self, rule: &PricingRule) -> Result<(), StoreError> {
        self.rules.write().unwrap().insert(rule.id, rule.clone());
        Ok(())
    }

    fn get(&self, id: Uuid) -> Result<Option<PricingRule>, StoreError> {
        Ok(self.rules.read().unwrap().get(&id).cloned())
    }

    fn list(&self) -> Result<Vec<PricingRule>, StoreError> {
        let rules = self.rules.read().unwrap();
        let mut all: Vec<_> = rules.values().cloned().collect();
        all.sort_by_key(|r| r.id);
        Ok(all)
    }

    fn update(&self, rule: &PricingRule) -> Result<(), StoreError> {
        let mut rules = self.rules.write().unwrap();
        if !rules.contains_key(&rule.id) {
            return Err(StoreError::NotFound(format!("rule {}", rule.id)));
        }
        rules.insert(rule.id, rule.clone());
        Ok(())
    }

    fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.rules.write().unwrap().remove(&id).is_some())
    }
}

/// In-memory audit trail
#[derive(Default)]
pub struct MemoryAuditLog {
    records: RwLock<Vec<AuditRecord>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AuditLog for MemoryAuditLog {
    fn record(&self, record: &AuditRecord) -> Result<(), StoreError> {
        self.records.write().unwrap().push(record.clone());
        Ok(())
    }

    fn recent(&self, limit: usize) -> Result<Vec<AuditRecord>, StoreError> {
        let records = self.records.read().unwrap();
        Ok(records.iter().rev().take(limit).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FetchSource, PriceSignal};
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn new_tracker(product_id: Uuid, url: &str) -> NewTracker {
        NewTracker {
            product_id,
            competitor_name: "Shopmart".to_string(),
            raw_url: url.to_string(),
            canonical_url: url.to_string(),
            active: true,
            check_interval_secs: None,
        }
    }

    fn signal(price: &str) -> PriceSignal {
        PriceSignal {
            price: Decimal::from_str(price).unwrap(),
            currency: "EUR".to_string(),
            title: None,
            in_stock: None,
            extracted_from: FetchSource::Http,
            adapter_id: "generic".to_string(),
            confidence: 1.0,
        }
    }

    fn point(tracker: &CompetitorTracker, price: &str, at: DateTime<Utc>) -> PricePoint {
        PricePoint {
            id: Uuid::new_v4(),
            product_id: tracker.product_id,
            tracker_id: tracker.id,
            competitor_name: tracker.competitor_name.clone(),
            price: Decimal::from_str(price).unwrap(),
            currency: "EUR".to_string(),
            captured_at: at,
            source: FetchSource::Http,
            adapter_id: "generic".to_string(),
        }
    }

    #[test]
    fn test_create_or_get_is_idempotent() {
        let store = MemoryTrackerStore::new();
        let product_id = Uuid::new_v4();

        let (first, created) = store
            .create_or_get(new_tracker(product_id, "https://shop.example.com/p/42"))
            .unwrap();
        assert!(created);

        let (second, created) = store
            .create_or_get(new_tracker(product_id, "https://shop.example.com/p/42"))
            .unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);
    }

    #[test]
    fn test_same_url_different_product_is_distinct() {
        let store = MemoryTrackerStore::new();
        let (a, _) = store
            .create_or_get(new_tracker(Uuid::new_v4(), "https://shop.example.com/p/42"))
            .unwrap();
        let (b, created) = store
            .create_or_get(new_tracker(Uuid::new_v4(), "https://shop.example.com/p/42"))
            .unwrap();
        assert!(created);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_update_after_scrape_success_resets_streak() {
        let store = MemoryTrackerStore::new();
        let (tracker, _) = store
            .create_or_get(new_tracker(Uuid::new_v4(), "https://shop.example.com/p/1"))
            .unwrap();

        store
            .update_after_scrape(
                tracker.id,
                &ScrapeSummary::failure(crate::models::FailureKind::Timeout, Utc::now()),
            )
            .unwrap();
        let after_failure = store.get(tracker.id).unwrap().unwrap();
        assert_eq!(after_failure.failure_streak, 1);
        assert_eq!(after_failure.last_status, TrackerStatus::NetworkError);

        let updated = store
            .update_after_scrape(tracker.id, &ScrapeSummary::success(&signal("19.90"), Utc::now()))
            .unwrap();
        assert_eq!(updated.failure_streak, 0);
        assert_eq!(updated.last_status, TrackerStatus::Ok);
        assert_eq!(updated.last_price, Some(Decimal::from_str("19.90").unwrap()));
        assert!(updated.version > after_failure.version);
    }

    #[test]
    fn test_in_flight_marker_is_exclusive() {
        let store = MemoryTrackerStore::new();
        let (tracker, _) = store
            .create_or_get(new_tracker(Uuid::new_v4(), "https://shop.example.com/p/1"))
            .unwrap();

        let until = Utc::now() + chrono::Duration::seconds(60);
        assert!(store.mark_in_flight(tracker.id, until).unwrap());
        assert!(!store.mark_in_flight(tracker.id, until).unwrap());

        // Marker clears after a scrape lands
        store
            .update_after_scrape(tracker.id, &ScrapeSummary::success(&signal("5.00"), Utc::now()))
            .unwrap();
        assert!(store.mark_in_flight(tracker.id, until).unwrap());
    }

    #[test]
    fn test_list_due_never_checked_is_due() {
        let store = MemoryTrackerStore::new();
        let (tracker, _) = store
            .create_or_get(new_tracker(Uuid::new_v4(), "https://shop.example.com/p/1"))
            .unwrap();

        let due = store
            .list_due(Utc::now(), Duration::from_secs(3600), 10)
            .unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, tracker.id);
    }

    #[test]
    fn test_list_due_respects_interval_and_override() {
        let store = MemoryTrackerStore::new();
        let (tracker, _) = store
            .create_or_get(new_tracker(Uuid::new_v4(), "https://shop.example.com/p/1"))
            .unwrap();

        // Recently checked: not due under a 1h default
        store
            .update_after_scrape(tracker.id, &ScrapeSummary::success(&signal("5.00"), Utc::now()))
            .unwrap();
        assert!(store
            .list_due(Utc::now(), Duration::from_secs(3600), 10)
            .unwrap()
            .is_empty());

        // With a 0-second per-tracker override it is due immediately
        {
            let mut trackers = store.trackers.write().unwrap();
            trackers.get_mut(&tracker.id).unwrap().check_interval_secs = Some(0);
        }
        assert_eq!(
            store
                .list_due(Utc::now(), Duration::from_secs(3600), 10)
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_list_due_skips_dead_and_in_flight() {
        let store = MemoryTrackerStore::new();
        let (dead, _) = store
            .create_or_get(new_tracker(Uuid::new_v4(), "https://shop.example.com/p/1"))
            .unwrap();
        let (flying, _) = store
            .create_or_get(new_tracker(Uuid::new_v4(), "https://shop.example.com/p/2"))
            .unwrap();

        store.mark_dead(dead.id).unwrap();
        store
            .mark_in_flight(flying.id, Utc::now() + chrono::Duration::seconds(60))
            .unwrap();

        assert!(store
            .list_due(Utc::now(), Duration::from_secs(3600), 10)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_revive_clears_dead() {
        let store = MemoryTrackerStore::new();
        let (tracker, _) = store
            .create_or_get(new_tracker(Uuid::new_v4(), "https://shop.example.com/p/1"))
            .unwrap();
        store.mark_dead(tracker.id).unwrap();
        assert_eq!(store.count_by_status(TrackerStatus::Dead).unwrap(), 1);

        store.revive(tracker.id).unwrap();
        let revived = store.get(tracker.id).unwrap().unwrap();
        assert_eq!(revived.last_status, TrackerStatus::New);
        assert_eq!(revived.failure_streak, 0);
    }

    #[test]
    fn test_history_range_is_ascending() {
        let store = MemoryPriceHistoryStore::new();
        let tracker_store = MemoryTrackerStore::new();
        let (tracker, _) = tracker_store
            .create_or_get(new_tracker(Uuid::new_v4(), "https://shop.example.com/p/1"))
            .unwrap();

        let base = Utc::now();
        // Insert out of order
        store.append(&point(&tracker, "12.00", base)).unwrap();
        store
            .append(&point(&tracker, "10.00", base - chrono::Duration::hours(2)))
            .unwrap();
        store
            .append(&point(&tracker, "11.00", base - chrono::Duration::hours(1)))
            .unwrap();

        let points = store
            .range(tracker.id, base - chrono::Duration::days(1), base)
            .unwrap();
        assert_eq!(points.len(), 3);
        assert!(points.windows(2).all(|w| w[0].captured_at <= w[1].captured_at));

        let latest = store.latest(tracker.id).unwrap().unwrap();
        assert_eq!(latest.price, Decimal::from_str("12.00").unwrap());
    }

    #[test]
    fn test_compact_drops_only_old_points() {
        let store = MemoryPriceHistoryStore::new();
        let tracker_store = MemoryTrackerStore::new();
        let (tracker, _) = tracker_store
            .create_or_get(new_tracker(Uuid::new_v4(), "https://shop.example.com/p/1"))
            .unwrap();

        let now = Utc::now();
        store
            .append(&point(&tracker, "10.00", now - chrono::Duration::days(30)))
            .unwrap();
        store.append(&point(&tracker, "11.00", now)).unwrap();

        let dropped = store.compact(now - chrono::Duration::days(7)).unwrap();
        assert_eq!(dropped, 1);
        assert_eq!(store.latest(tracker.id).unwrap().unwrap().price, Decimal::from_str("11.00").unwrap());
    }

    #[test]
    fn test_rule_repository_crud() {
        let repo = MemoryRuleRepository::new();
        let rule = PricingRule {
            id: Uuid::new_v4(),
            name: "match competitors".to_string(),
            rule_type: crate::models::RuleType::Competitive,
            product_id: None,
            category: None,
            adjustment_pct: Decimal::from_str("-5").unwrap(),
            status: crate::models::RuleStatus::Active,
            priority: 10,
        };

        repo.create(&rule).unwrap();
        assert_eq!(repo.list().unwrap().len(), 1);
        assert!(repo.get(rule.id).unwrap().is_some());

        let mut updated = rule.clone();
        updated.priority = 20;
        repo.update(&updated).unwrap();
        assert_eq!(repo.get(rule.id).unwrap().unwrap().priority, 20);

        assert!(repo.delete(rule.id).unwrap());
        assert!(!repo.delete(rule.id).unwrap());
    }
}
