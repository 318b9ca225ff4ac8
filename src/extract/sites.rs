//! Per-domain price adapters
//!
//! Site adapters are selector-driven: a host set, a CSS selector for the
//! site's price container, and a default currency. They are registered from
//! configuration at startup. When the site selector misses, the adapter
//! falls back to the generic extraction ladder.

use scraper::{Html, Selector};

use super::money::parse_money;
use super::{Extraction, GenericAdapter, Page, PriceAdapter};
use crate::models::PriceSignal;
use crate::utils::normalize_whitespace;

/// Confidence for a site-specific labeled price container
const CONFIDENCE_SITE_SELECTOR: f64 = 0.7;

/// Configurable per-domain adapter
pub struct SelectorAdapter {
    id: String,
    hosts: Vec<String>,
    selector: Option<Selector>,
    default_currency: String,
    fallback: GenericAdapter,
}

impl SelectorAdapter {
    /// Build an adapter for the given hosts.
    ///
    /// An unparseable selector disables the site-specific strategy (the
    /// generic fallback still runs) rather than failing startup.
    pub fn new(id: &str, hosts: Vec<String>, price_selector: &str, default_currency: &str) -> Self {
        let selector = Selector::parse(price_selector).ok();
        if selector.is_none() {
            tracing::warn!(
                adapter = id,
                selector = price_selector,
                "Invalid price selector; adapter will use generic extraction only"
            );
        }
        Self {
            id: id.to_string(),
            hosts: hosts.into_iter().map(|h| h.to_ascii_lowercase()).collect(),
            selector,
            default_currency: default_currency.to_string(),
            fallback: GenericAdapter::new(default_currency),
        }
    }

    fn extract_with_selector(&self, page: &Page, doc: &Html) -> Option<PriceSignal> {
        let selector = self.selector.as_ref()?;
        for element in doc.select(selector) {
            let text = normalize_whitespace(&element.text().collect::<String>());
            if text.is_empty() {
                continue;
            }
            if let Some((price, currency)) = parse_money(&text) {
                return Some(PriceSignal {
                    price,
                    currency: currency.unwrap_or_else(|| self.default_currency.clone()),
                    title: None,
                    in_stock: None,
                    extracted_from: page.fetched_via,
                    adapter_id: self.id.clone(),
                    confidence: CONFIDENCE_SITE_SELECTOR,
                });
            }
        }
        None
    }
}

impl PriceAdapter for SelectorAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    fn claims(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        self.hosts
            .iter()
            .any(|h| host == *h || host.ends_with(&format!(".{h}")))
    }

    fn extract(&self, page: &Page) -> Extraction {
        let doc = Html::parse_document(&page.body);

        if let Some(mut signal) = self.extract_with_selector(page, &doc) {
            // Title still comes from the page head when available
            if let Extraction::Found(generic) = self.fallback.extract(page) {
                signal.title = generic.title;
            }
            return Extraction::Found(signal);
        }

        match self.fallback.extract(page) {
            Extraction::Found(mut signal) => {
                signal.adapter_id = self.id.clone();
                Extraction::Found(signal)
            }
            Extraction::Miss(detail) => Extraction::Miss(detail),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FetchSource;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn adapter() -> SelectorAdapter {
        SelectorAdapter::new(
            "shopmart",
            vec!["shopmart.example.com".to_string()],
            "span.pdp-price",
            "TRY",
        )
    }

    fn page(body: &str) -> Page {
        Page {
            url: "https://shopmart.example.com/p/42".to_string(),
            final_url: "https://shopmart.example.com/p/42".to_string(),
            content_type: "text/html".to_string(),
            body: body.to_string(),
            fetched_via: FetchSource::Http,
        }
    }

    #[test]
    fn test_claims_host_and_subdomains() {
        let a = adapter();
        assert!(a.claims("shopmart.example.com"));
        assert!(a.claims("www.shopmart.example.com"));
        assert!(a.claims("SHOPMART.EXAMPLE.COM"));
        assert!(!a.claims("other.example.com"));
    }

    #[test]
    fn test_selector_extraction() {
        let body = r#"<div><span class="pdp-price">1.299,90 TL</span></div>"#;
        match adapter().extract(&page(body)) {
            Extraction::Found(s) => {
                assert_eq!(s.price, Decimal::from_str("1299.90").unwrap());
                assert_eq!(s.currency, "TRY");
                assert_eq!(s.adapter_id, "shopmart");
                assert_eq!(s.confidence, 0.7);
            }
            Extraction::Miss(d) => panic!("miss: {d}"),
        }
    }

    #[test]
    fn test_default_currency_when_text_has_none() {
        let body = r#"<span class="pdp-price">129,90</span>"#;
        match adapter().extract(&page(body)) {
            Extraction::Found(s) => assert_eq!(s.currency, "TRY"),
            Extraction::Miss(d) => panic!("miss: {d}"),
        }
    }

    #[test]
    fn test_falls_back_to_generic_on_selector_miss() {
        let body = r#"<meta property="product:price:amount" content="55.50"/>
                      <meta property="product:price:currency" content="EUR"/>"#;
        match adapter().extract(&page(body)) {
            Extraction::Found(s) => {
                assert_eq!(s.price, Decimal::from_str("55.50").unwrap());
                assert_eq!(s.currency, "EUR");
                // The site adapter still signs the signal
                assert_eq!(s.adapter_id, "shopmart");
            }
            Extraction::Miss(d) => panic!("miss: {d}"),
        }
    }

    #[test]
    fn test_miss_when_nothing_matches() {
        let body = "<html><body>sold out page</body></html>";
        assert!(!adapter().extract(&page(body)).is_found());
    }

    #[test]
    fn test_invalid_selector_degrades_to_generic() {
        let a = SelectorAdapter::new(
            "broken",
            vec!["x.example.com".to_string()],
            ":::not-a-selector",
            "USD",
        );
        let body = r#"<meta itemprop="price" content="10.00"/>"#;
        match a.extract(&page(body)) {
            Extraction::Found(s) => assert_eq!(s.price, Decimal::from_str("10.00").unwrap()),
            Extraction::Miss(d) => panic!("miss: {d}"),
        }
    }
}
