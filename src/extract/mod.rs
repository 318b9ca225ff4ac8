//! Price extraction from fetched pages
//!
//! A dispatcher holds per-domain adapters plus a generic fallback. Each
//! adapter declares the hostnames it claims; dispatch picks the first
//! claiming adapter, otherwise the generic one. Adapters never perform I/O.

pub mod generic;
pub mod money;
pub mod sites;

pub use generic::GenericAdapter;
pub use sites::SelectorAdapter;

use std::sync::Arc;

use crate::models::{FetchSource, PriceSignal};
use crate::scraper::url::extract_host;

/// A fetched page handed to extractors
#[derive(Debug, Clone)]
pub struct Page {
    /// URL the scrape was issued for (canonical form)
    pub url: String,
    /// URL after redirects
    pub final_url: String,
    pub content_type: String,
    pub body: String,
    /// Which fetch tier produced the body
    pub fetched_via: FetchSource,
}

/// Extraction result: a normalized signal or a miss with a short detail
#[derive(Debug, Clone)]
pub enum Extraction {
    Found(PriceSignal),
    Miss(String),
}

impl Extraction {
    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }
}

/// Capability set every price adapter implements
///
/// Adapters are pure: same page in, same extraction out, no I/O.
pub trait PriceAdapter: Send + Sync {
    /// Identifier recorded on every signal this adapter produces
    fn id(&self) -> &str;

    /// Whether this adapter handles pages from the given host
    fn claims(&self, host: &str) -> bool;

    fn extract(&self, page: &Page) -> Extraction;
}

/// Registry of per-domain adapters with a generic fallback
pub struct AdapterRegistry {
    adapters: Vec<Arc<dyn PriceAdapter>>,
    generic: Arc<GenericAdapter>,
}

impl AdapterRegistry {
    pub fn new(default_currency: &str) -> Self {
        Self {
            adapters: Vec::new(),
            generic: Arc::new(GenericAdapter::new(default_currency)),
        }
    }

    /// Register a per-domain adapter; earlier registrations win ties
    pub fn register(&mut self, adapter: Arc<dyn PriceAdapter>) {
        self.adapters.push(adapter);
    }

    pub fn adapter_count(&self) -> usize {
        self.adapters.len()
    }

    /// Select the adapter for a host: first claiming per-domain adapter,
    /// else the generic fallback
    pub fn select(&self, host: &str) -> Arc<dyn PriceAdapter> {
        if let Some(adapter) = self.adapters.iter().find(|a| a.claims(host)) {
            return Arc::clone(adapter);
        }
        self.generic.clone()
    }

    /// Dispatch extraction for a page
    pub fn extract(&self, page: &Page) -> Extraction {
        let host = match extract_host(&page.url) {
            Ok(h) => h,
            Err(_) => return Extraction::Miss("page URL has no host".to_string()),
        };
        self.select(&host).extract(page)
    }
}
