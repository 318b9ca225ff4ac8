//! Shared fixtures for integration tests
#![allow(dead_code)]

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

use pricewatch::extract::AdapterRegistry;
use pricewatch::models::Product;
use pricewatch::pricing::{EngineConfig, RuleEngine};
use pricewatch::queue::MemoryJobQueue;
use pricewatch::scraper::browser::PageRenderer;
use pricewatch::scraper::fetcher::FetchedPage;
use pricewatch::scraper::{HttpFetcher, ScrapeExecutor, UrlPolicy};
use pricewatch::service::{PriceTracker, ServiceConfig};
use pricewatch::storage::{
    MemoryAuditLog, MemoryPriceHistoryStore, MemoryProductRepository, MemoryRuleRepository,
    MemoryTrackerStore, ProductRepository,
};
use pricewatch::utils::error::FetchError;

/// Product page body with a structured JSON-LD price block
pub fn json_ld_page(title: &str, price: &str, currency: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
  <title>{title}</title>
  <script type="application/ld+json">
  {{"@type":"Product","name":"{title}",
    "offers":{{"price":"{price}","priceCurrency":"{currency}",
               "availability":"https://schema.org/InStock"}}}}
  </script>
</head>
<body><h1>{title}</h1></body>
</html>"#
    )
}

/// Page with no extractable price anywhere
pub fn empty_page() -> String {
    "<!DOCTYPE html><html><head><title>Loading…</title></head>\
     <body><div id=\"app\"></div></body></html>"
        .to_string()
}

/// Test renderer standing in for the headless browser tier
pub struct StubRenderer {
    body: String,
}

impl StubRenderer {
    pub fn new(body: impl Into<String>) -> Self {
        Self { body: body.into() }
    }
}

#[async_trait]
impl PageRenderer for StubRenderer {
    async fn render(&self, url: &str) -> Result<FetchedPage, FetchError> {
        Ok(FetchedPage {
            status: 200,
            content_type: "text/html".to_string(),
            body: self.body.clone(),
            final_url: url.to_string(),
            elapsed: Duration::from_millis(5),
        })
    }
}

/// Executor wired for tests: short timeouts, permissive policy, no robots
pub fn test_executor(renderer: Option<Arc<dyn PageRenderer>>) -> ScrapeExecutor {
    ScrapeExecutor::new(
        HttpFetcher::new(Duration::from_secs(3), 3).unwrap(),
        renderer,
        Arc::new(AdapterRegistry::new("USD")),
        UrlPolicy::permissive(),
        None,
        Duration::from_secs(10),
    )
}

/// In-memory service wired around the given executor
pub struct TestHarness {
    pub service: PriceTracker,
    pub trackers: Arc<MemoryTrackerStore>,
    pub history: Arc<MemoryPriceHistoryStore>,
    pub products: Arc<MemoryProductRepository>,
    pub rules: Arc<MemoryRuleRepository>,
    pub audit: Arc<MemoryAuditLog>,
    pub queue: Arc<MemoryJobQueue>,
}

pub fn harness(executor: ScrapeExecutor) -> TestHarness {
    let trackers = Arc::new(MemoryTrackerStore::new());
    let history = Arc::new(MemoryPriceHistoryStore::new());
    let products = Arc::new(MemoryProductRepository::new());
    let rules = Arc::new(MemoryRuleRepository::new());
    let audit = Arc::new(MemoryAuditLog::new());
    let queue = Arc::new(MemoryJobQueue::new());

    let service = PriceTracker::new(
        trackers.clone(),
        history.clone(),
        products.clone(),
        rules.clone(),
        audit.clone(),
        queue.clone(),
        Arc::new(executor),
        RuleEngine::new(EngineConfig::default()),
        UrlPolicy::permissive(),
        ServiceConfig::default(),
    );

    TestHarness {
        service,
        trackers,
        history,
        products,
        rules,
        audit,
        queue,
    }
}

/// Seed a catalog product and return it
pub fn seed_product(products: &dyn ProductRepository, price: &str) -> Product {
    let product = Product {
        id: Uuid::new_v4(),
        name: "Test Widget".to_string(),
        sku: Some("TW-1".to_string()),
        category: Some("widgets".to_string()),
        cost: None,
        current_price: Decimal::from_str(price).unwrap(),
        stock: Some(10),
        active: true,
    };
    products.upsert(&product).unwrap();
    product
}
