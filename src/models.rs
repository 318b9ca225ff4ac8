// Core data structures for the price tracking pipeline

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Products (owned by the external catalog; the core only reads them)
// ============================================================================

/// Catalog product as seen by the pricing core
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub sku: Option<String>,
    pub category: Option<String>,
    /// Unit cost, when the catalog knows it
    pub cost: Option<Decimal>,
    pub current_price: Decimal,
    pub stock: Option<i64>,
    pub active: bool,
}

// ============================================================================
// Trackers
// ============================================================================

/// Last observed state of a tracked competitor URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerStatus {
    New,
    Ok,
    ExtractionFailed,
    NetworkError,
    Blocked,
    Dead,
}

impl TrackerStatus {
    /// Stable string form used for persistence
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Ok => "ok",
            Self::ExtractionFailed => "extraction_failed",
            Self::NetworkError => "network_error",
            Self::Blocked => "blocked",
            Self::Dead => "dead",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "new" => Some(Self::New),
            "ok" => Some(Self::Ok),
            "extraction_failed" => Some(Self::ExtractionFailed),
            "network_error" => Some(Self::NetworkError),
            "blocked" => Some(Self::Blocked),
            "dead" => Some(Self::Dead),
            _ => None,
        }
    }
}

impl std::fmt::Display for TrackerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Persistent link between a product and one canonical competitor URL
///
/// Uniqueness invariant: at most one active tracker per
/// `(product_id, canonical_url)` pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompetitorTracker {
    pub id: Uuid,
    pub product_id: Uuid,
    pub competitor_name: String,
    /// URL exactly as the caller supplied it
    pub raw_url: String,
    /// Normalized dedupe key, see [`crate::scraper::url::canonicalize`]
    pub canonical_url: String,
    pub active: bool,
    pub last_price: Option<Decimal>,
    pub last_currency: Option<String>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_status: TrackerStatus,
    /// Consecutive failed scrapes; reset to 0 on success
    pub failure_streak: u32,
    /// Per-tracker interval override in seconds; `None` uses the global default
    pub check_interval_secs: Option<u64>,
    /// Short-TTL marker preventing concurrent jobs for the same tracker
    pub in_flight_until: Option<DateTime<Utc>>,
    /// Optimistic-concurrency version, bumped on every write
    pub version: i64,
    pub created_at: DateTime<Utc>,
}

/// Fields for creating a tracker (the store assigns id/version/timestamps)
#[derive(Debug, Clone)]
pub struct NewTracker {
    pub product_id: Uuid,
    pub competitor_name: String,
    pub raw_url: String,
    pub canonical_url: String,
    pub active: bool,
    pub check_interval_secs: Option<u64>,
}

/// Per-scrape tracker state transition applied by the worker pool
#[derive(Debug, Clone)]
pub struct ScrapeSummary {
    pub status: TrackerStatus,
    pub price: Option<Decimal>,
    pub currency: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl ScrapeSummary {
    /// Summary for a successful scrape: resets the failure streak
    pub fn success(signal: &PriceSignal, checked_at: DateTime<Utc>) -> Self {
        Self {
            status: TrackerStatus::Ok,
            price: Some(signal.price),
            currency: Some(signal.currency.clone()),
            checked_at,
        }
    }

    /// Summary for a failed scrape: increments the failure streak
    pub fn failure(kind: FailureKind, checked_at: DateTime<Utc>) -> Self {
        Self {
            status: kind.tracker_status(),
            price: None,
            currency: None,
            checked_at,
        }
    }
}

// ============================================================================
// Jobs
// ============================================================================

/// How a scrape job entered the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOrigin {
    Scheduled,
    Manual,
    Retry,
}

impl JobOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Manual => "manual",
            Self::Retry => "retry",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(Self::Scheduled),
            "manual" => Some(Self::Manual),
            "retry" => Some(Self::Retry),
            _ => None,
        }
    }
}

/// One unit of scrape work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeJob {
    pub id: Uuid,
    pub tracker_id: Uuid,
    pub product_id: Uuid,
    pub url: String,
    pub allow_browser_fallback: bool,
    /// Current attempt, 1-based; never exceeds `max_attempts`
    pub attempt: u32,
    pub max_attempts: u32,
    pub origin: JobOrigin,
    pub enqueued_at: DateTime<Utc>,
    /// Delayed-delivery gate; the job is invisible until this instant
    pub not_before: Option<DateTime<Utc>>,
}

impl ScrapeJob {
    /// Create a fresh first-attempt job
    pub fn new(
        tracker_id: Uuid,
        product_id: Uuid,
        url: String,
        allow_browser_fallback: bool,
        max_attempts: u32,
        origin: JobOrigin,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tracker_id,
            product_id,
            url,
            allow_browser_fallback,
            attempt: 1,
            max_attempts,
            origin,
            enqueued_at: Utc::now(),
            not_before: None,
        }
    }
}

/// Terminal record for a job that exhausted retries or hit a
/// non-retryable failure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqEntry {
    pub job_id: Uuid,
    pub tracker_id: Uuid,
    pub product_id: Uuid,
    pub url: String,
    pub kind: FailureKind,
    pub detail: String,
    pub attempts: u32,
    pub failed_at: DateTime<Utc>,
}

// ============================================================================
// Scrape outcomes
// ============================================================================

/// Which fetch tier produced the page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchSource {
    Http,
    Browser,
}

impl FetchSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Browser => "browser",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "http" => Some(Self::Http),
            "browser" => Some(Self::Browser),
            _ => None,
        }
    }
}

/// Failure classification shared by the fetchers, executor, queue, and DLQ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    HttpStatus,
    ParseMiss,
    RobotsDeny,
    RateLimited,
    BrowserError,
    DomainBlocked,
    InvalidUrl,
    NetworkError,
    Blocked,
    Internal,
}

/// How the retry policy treats a failure kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Transient; retried with full exponential backoff up to `max_attempts`
    Soft,
    /// Likely permanent; retried at most once with a capped backoff
    HardRetryable,
    /// Never retried; straight to the DLQ
    Terminal,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::HttpStatus => "http_status",
            Self::ParseMiss => "parse_miss",
            Self::RobotsDeny => "robots_deny",
            Self::RateLimited => "rate_limited",
            Self::BrowserError => "browser_error",
            Self::DomainBlocked => "domain_blocked",
            Self::InvalidUrl => "invalid_url",
            Self::NetworkError => "network_error",
            Self::Blocked => "blocked",
            Self::Internal => "internal",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "timeout" => Some(Self::Timeout),
            "http_status" => Some(Self::HttpStatus),
            "parse_miss" => Some(Self::ParseMiss),
            "robots_deny" => Some(Self::RobotsDeny),
            "rate_limited" => Some(Self::RateLimited),
            "browser_error" => Some(Self::BrowserError),
            "domain_blocked" => Some(Self::DomainBlocked),
            "invalid_url" => Some(Self::InvalidUrl),
            "network_error" => Some(Self::NetworkError),
            "blocked" => Some(Self::Blocked),
            "internal" => Some(Self::Internal),
            _ => None,
        }
    }

    /// Retry classification applied by the queue's retry policy
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::Timeout | Self::NetworkError | Self::RateLimited | Self::BrowserError => {
                RetryClass::Soft
            }
            Self::HttpStatus | Self::ParseMiss | Self::Blocked => RetryClass::HardRetryable,
            Self::DomainBlocked | Self::RobotsDeny | Self::InvalidUrl | Self::Internal => {
                RetryClass::Terminal
            }
        }
    }

    /// Tracker status recorded after a scrape fails with this kind
    pub fn tracker_status(&self) -> TrackerStatus {
        match self {
            Self::ParseMiss => TrackerStatus::ExtractionFailed,
            Self::Blocked | Self::DomainBlocked | Self::RobotsDeny => TrackerStatus::Blocked,
            _ => TrackerStatus::NetworkError,
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Normalized price signal produced by an extractor
///
/// Lives only for the duration of one scrape; persisted as a [`PricePoint`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceSignal {
    /// Price scaled to two fractional digits
    pub price: Decimal,
    /// ISO-4217 code, or the adapter's configured default
    pub currency: String,
    pub title: Option<String>,
    pub in_stock: Option<bool>,
    pub extracted_from: FetchSource,
    pub adapter_id: String,
    /// 1.0 structured data, 0.7 meta/microdata, 0.4 heuristic
    pub confidence: f64,
}

/// Result of one scrape execution
#[derive(Debug, Clone)]
pub enum ScrapeOutcome {
    Success(PriceSignal),
    /// Transient failure; eligible for backoff and retry
    SoftFail { kind: FailureKind, detail: String },
    /// Permanent or policy failure; retried at most once, if at all
    HardFail { kind: FailureKind, detail: String },
}

impl ScrapeOutcome {
    pub fn soft(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self::SoftFail {
            kind,
            detail: detail.into(),
        }
    }

    pub fn hard(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self::HardFail {
            kind,
            detail: detail.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Failure kind, if this outcome is a failure
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Success(_) => None,
            Self::SoftFail { kind, .. } | Self::HardFail { kind, .. } => Some(*kind),
        }
    }
}

// ============================================================================
// Price history
// ============================================================================

/// One immutable observation of a competitor price
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricePoint {
    pub id: Uuid,
    pub product_id: Uuid,
    pub tracker_id: Uuid,
    pub competitor_name: String,
    pub price: Decimal,
    pub currency: String,
    pub captured_at: DateTime<Utc>,
    pub source: FetchSource,
    pub adapter_id: String,
}

impl PricePoint {
    /// Build a point from a signal observed for a tracker
    pub fn from_signal(
        signal: &PriceSignal,
        tracker: &CompetitorTracker,
        captured_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            product_id: tracker.product_id,
            tracker_id: tracker.id,
            competitor_name: tracker.competitor_name.clone(),
            price: signal.price,
            currency: signal.currency.clone(),
            captured_at,
            source: signal.extracted_from,
            adapter_id: signal.adapter_id.clone(),
        }
    }
}

// ============================================================================
// Pricing rules and recommendations
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    Fixed,
    Competitive,
    Dynamic,
    Clearance,
}

impl RuleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fixed => "fixed",
            Self::Competitive => "competitive",
            Self::Dynamic => "dynamic",
            Self::Clearance => "clearance",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "fixed" => Some(Self::Fixed),
            "competitive" => Some(Self::Competitive),
            "dynamic" => Some(Self::Dynamic),
            "clearance" => Some(Self::Clearance),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleStatus {
    Active,
    Inactive,
}

impl RuleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "inactive" => Some(Self::Inactive),
            _ => None,
        }
    }
}

/// Declarative pricing rule evaluated by the rule engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingRule {
    pub id: Uuid,
    pub name: String,
    pub rule_type: RuleType,
    /// Scope: a specific product wins over a category, which wins over all
    pub product_id: Option<Uuid>,
    pub category: Option<String>,
    /// Signed percentage applied by the rule formula
    pub adjustment_pct: Decimal,
    pub status: RuleStatus,
    /// Rules are applied in descending priority, ties broken by id ascending
    pub priority: i32,
}

impl PricingRule {
    /// Whether this rule's scope covers the given product
    pub fn matches(&self, product: &Product) -> bool {
        if let Some(pid) = self.product_id {
            return pid == product.id;
        }
        if let Some(cat) = &self.category {
            return product.category.as_deref() == Some(cat.as_str());
        }
        true
    }
}

/// Deterministic, auditable pricing suggestion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub product_id: Uuid,
    pub current_price: Decimal,
    pub suggested_price: Decimal,
    /// Human-readable audit trail: inputs, averages, clamps applied
    pub reason: String,
    pub rule_id: Option<Uuid>,
    pub computed_at: DateTime<Utc>,
}

// ============================================================================
// Scrape audit log
// ============================================================================

/// Terminal state of one processed queue message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Success,
    RetryScheduled,
    DeadLettered,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::RetryScheduled => "retry_scheduled",
            Self::DeadLettered => "dead_lettered",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Self::Success),
            "retry_scheduled" => Some(Self::RetryScheduled),
            "dead_lettered" => Some(Self::DeadLettered),
            _ => None,
        }
    }
}

/// One row of the scrape audit trail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub url: String,
    pub host: String,
    pub tracker_id: Option<Uuid>,
    pub product_id: Option<Uuid>,
    pub status: AuditStatus,
    pub kind: Option<FailureKind>,
    pub detail: Option<String>,
    pub attempt: u32,
    pub elapsed_ms: u64,
    pub recorded_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn product(category: Option<&str>) -> Product {
        Product {
            id: Uuid::new_v4(),
            name: "Widget".to_string(),
            sku: None,
            category: category.map(String::from),
            cost: None,
            current_price: Decimal::from_str("10.00").unwrap(),
            stock: None,
            active: true,
        }
    }

    #[test]
    fn test_status_roundtrip() {
        for status in [
            TrackerStatus::New,
            TrackerStatus::Ok,
            TrackerStatus::ExtractionFailed,
            TrackerStatus::NetworkError,
            TrackerStatus::Blocked,
            TrackerStatus::Dead,
        ] {
            assert_eq!(TrackerStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TrackerStatus::parse("bogus"), None);
    }

    #[test]
    fn test_retry_classification() {
        assert_eq!(FailureKind::Timeout.retry_class(), RetryClass::Soft);
        assert_eq!(FailureKind::NetworkError.retry_class(), RetryClass::Soft);
        assert_eq!(FailureKind::RateLimited.retry_class(), RetryClass::Soft);
        assert_eq!(FailureKind::BrowserError.retry_class(), RetryClass::Soft);

        assert_eq!(
            FailureKind::ParseMiss.retry_class(),
            RetryClass::HardRetryable
        );
        assert_eq!(
            FailureKind::HttpStatus.retry_class(),
            RetryClass::HardRetryable
        );
        assert_eq!(FailureKind::Blocked.retry_class(), RetryClass::HardRetryable);

        assert_eq!(
            FailureKind::DomainBlocked.retry_class(),
            RetryClass::Terminal
        );
        assert_eq!(FailureKind::InvalidUrl.retry_class(), RetryClass::Terminal);
        assert_eq!(FailureKind::RobotsDeny.retry_class(), RetryClass::Terminal);
    }

    #[test]
    fn test_rule_scope_product_wins() {
        let p = product(Some("grocery"));
        let mut rule = PricingRule {
            id: Uuid::new_v4(),
            name: "scoped".to_string(),
            rule_type: RuleType::Fixed,
            product_id: Some(p.id),
            category: Some("other".to_string()),
            adjustment_pct: Decimal::ZERO,
            status: RuleStatus::Active,
            priority: 0,
        };
        // product_id takes precedence over a non-matching category
        assert!(rule.matches(&p));

        rule.product_id = Some(Uuid::new_v4());
        assert!(!rule.matches(&p));
    }

    #[test]
    fn test_rule_scope_category_and_catchall() {
        let p = product(Some("grocery"));
        let rule = PricingRule {
            id: Uuid::new_v4(),
            name: "category".to_string(),
            rule_type: RuleType::Competitive,
            product_id: None,
            category: Some("grocery".to_string()),
            adjustment_pct: Decimal::ZERO,
            status: RuleStatus::Active,
            priority: 0,
        };
        assert!(rule.matches(&p));
        assert!(!rule.matches(&product(Some("electronics"))));

        let catchall = PricingRule {
            category: None,
            ..rule
        };
        assert!(catchall.matches(&product(None)));
    }

    #[test]
    fn test_job_starts_at_attempt_one() {
        let job = ScrapeJob::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "https://shop.example.com/p/1".to_string(),
            true,
            3,
            JobOrigin::Manual,
        );
        assert_eq!(job.attempt, 1);
        assert!(job.not_before.is_none());
    }
}
