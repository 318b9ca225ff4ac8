//! End-to-end scrape execution
//!
//! Composes the URL policy, robots gate, HTTP fetcher, extractors, and the
//! browser fallback for one job, under one end-to-end deadline. Every exit
//! path produces a classified [`ScrapeOutcome`]; nothing here raises errors
//! across the component boundary.

use std::sync::Arc;
use std::time::Duration;

use crate::extract::{AdapterRegistry, Extraction, Page};
use crate::models::{FailureKind, FetchSource, RetryClass, ScrapeOutcome};
use crate::scraper::browser::PageRenderer;
use crate::scraper::fetcher::{FetchedPage, HttpFetcher};
use crate::scraper::robots::RobotsGate;
use crate::scraper::url::{canonicalize, UrlPolicy};
use crate::utils::error::FetchError;

/// Minimum extractor confidence accepted without escalation
const MIN_CONFIDENCE: f64 = 0.4;

/// Runs one scrape job end to end
pub struct ScrapeExecutor {
    http: HttpFetcher,
    renderer: Option<Arc<dyn PageRenderer>>,
    registry: Arc<AdapterRegistry>,
    policy: UrlPolicy,
    robots: Option<Arc<RobotsGate>>,
    deadline: Duration,
}

impl ScrapeExecutor {
    pub fn new(
        http: HttpFetcher,
        renderer: Option<Arc<dyn PageRenderer>>,
        registry: Arc<AdapterRegistry>,
        policy: UrlPolicy,
        robots: Option<Arc<RobotsGate>>,
        deadline: Duration,
    ) -> Self {
        Self {
            http,
            renderer,
            registry,
            policy,
            robots,
            deadline,
        }
    }

    /// Execute a scrape for `raw_url`.
    ///
    /// Policy rejections (`INVALID_URL`, `DOMAIN_BLOCKED`, `ROBOTS_DENY`)
    /// are hard failures. The rest of the run is bounded by the configured
    /// deadline; exceeding it yields a soft `TIMEOUT`.
    pub async fn execute(&self, raw_url: &str, allow_browser_fallback: bool) -> ScrapeOutcome {
        let url = match canonicalize(raw_url) {
            Ok(u) => u,
            Err(e) => {
                return ScrapeOutcome::hard(FailureKind::InvalidUrl, e.to_string());
            }
        };

        if !self.policy.allows(&url) {
            return ScrapeOutcome::hard(
                FailureKind::DomainBlocked,
                format!("host not in allowlist: {url}"),
            );
        }

        match tokio::time::timeout(self.deadline, self.run(&url, allow_browser_fallback)).await {
            Ok(outcome) => outcome,
            Err(_) => ScrapeOutcome::soft(FailureKind::Timeout, "scrape deadline exceeded"),
        }
    }

    async fn run(&self, url: &str, allow_browser_fallback: bool) -> ScrapeOutcome {
        if let Some(robots) = &self.robots {
            if !robots.allows(url).await {
                return ScrapeOutcome::hard(FailureKind::RobotsDeny, "denied by robots.txt");
            }
        }

        let fetched = match self.http.fetch(url).await {
            Ok(page) => page,
            Err(e) => return outcome_from_fetch(e),
        };
        tracing::debug!(
            url,
            status = fetched.status,
            elapsed_ms = fetched.elapsed.as_millis() as u64,
            "HTTP fetch complete"
        );

        let page = to_page(url, fetched, FetchSource::Http);
        let miss_detail = match self.registry.extract(&page) {
            Extraction::Found(signal) if signal.confidence >= MIN_CONFIDENCE => {
                return ScrapeOutcome::Success(signal);
            }
            Extraction::Found(signal) => {
                format!("signal confidence {} below threshold", signal.confidence)
            }
            Extraction::Miss(detail) => detail,
        };

        let Some(renderer) = self
            .renderer
            .as_ref()
            .filter(|_| allow_browser_fallback)
        else {
            return ScrapeOutcome::hard(FailureKind::ParseMiss, miss_detail);
        };

        tracing::debug!(url, "Escalating to browser rendering");
        let rendered = match renderer.render(url).await {
            Ok(page) => page,
            Err(e) => return outcome_from_fetch(e),
        };

        let page = to_page(url, rendered, FetchSource::Browser);
        match self.registry.extract(&page) {
            Extraction::Found(signal) if signal.confidence >= MIN_CONFIDENCE => {
                ScrapeOutcome::Success(signal)
            }
            Extraction::Found(signal) => ScrapeOutcome::hard(
                FailureKind::ParseMiss,
                format!(
                    "rendered signal confidence {} below threshold",
                    signal.confidence
                ),
            ),
            Extraction::Miss(detail) => ScrapeOutcome::hard(FailureKind::ParseMiss, detail),
        }
    }
}

fn to_page(url: &str, fetched: FetchedPage, via: FetchSource) -> Page {
    Page {
        url: url.to_string(),
        final_url: fetched.final_url,
        content_type: fetched.content_type,
        body: fetched.body,
        fetched_via: via,
    }
}

/// Map a fetch failure to a soft or hard outcome via the retry taxonomy
fn outcome_from_fetch(e: FetchError) -> ScrapeOutcome {
    let kind = e.kind();
    let detail = e.to_string();
    match kind.retry_class() {
        RetryClass::Soft => ScrapeOutcome::soft(kind, detail),
        _ => ScrapeOutcome::hard(kind, detail),
    }
}
