//! Extraction ladder tests over realistic page bodies

use std::sync::Arc;

use pricewatch::extract::{AdapterRegistry, Extraction, Page, SelectorAdapter};
use pricewatch::models::FetchSource;
use rust_decimal::Decimal;
use std::str::FromStr;

mod common;

fn page(url: &str, body: &str) -> Page {
    Page {
        url: url.to_string(),
        final_url: url.to_string(),
        content_type: "text/html".to_string(),
        body: body.to_string(),
        fetched_via: FetchSource::Http,
    }
}

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

#[test]
fn test_structured_data_price_with_decimal_comma_locale() {
    // A European shop rendering "19,90" in the visible page but structured
    // data carrying the machine price
    let body = r#"<!DOCTYPE html>
<html>
<head>
  <title>Kaffeemaschine</title>
  <script type="application/ld+json">
  {"@context":"https://schema.org","@type":"Product","name":"Kaffeemaschine",
   "offers":{"@type":"Offer","price":"19.90","priceCurrency":"EUR",
             "availability":"https://schema.org/InStock"}}
  </script>
</head>
<body><span class="price">€ 19,90</span></body>
</html>"#;

    let registry = AdapterRegistry::new("USD");
    match registry.extract(&page("https://shop.example.de/p/7", body)) {
        Extraction::Found(signal) => {
            assert_eq!(signal.price, dec("19.90"));
            assert_eq!(signal.currency, "EUR");
            assert_eq!(signal.confidence, 1.0);
            assert_eq!(signal.in_stock, Some(true));
            assert_eq!(signal.extracted_from, FetchSource::Http);
        }
        Extraction::Miss(detail) => panic!("expected signal, got miss: {detail}"),
    }
}

#[test]
fn test_meta_tag_fallback_when_no_json_ld() {
    let body = r#"<html><head>
        <meta property="og:title" content="Garden Hose 25m"/>
        <meta property="og:price:amount" content="34.95"/>
        <meta property="og:price:currency" content="GBP"/>
        </head><body></body></html>"#;

    let registry = AdapterRegistry::new("USD");
    match registry.extract(&page("https://shop.example.co.uk/p/hose", body)) {
        Extraction::Found(signal) => {
            assert_eq!(signal.price, dec("34.95"));
            assert_eq!(signal.currency, "GBP");
            assert_eq!(signal.confidence, 0.7);
            assert_eq!(signal.title.as_deref(), Some("Garden Hose 25m"));
        }
        Extraction::Miss(detail) => panic!("miss: {detail}"),
    }
}

#[test]
fn test_heuristic_price_container_with_currency_symbol() {
    let body = r#"<html><body>
        <div class="productPrice"><span>$1,299.00</span></div>
        </body></html>"#;

    let registry = AdapterRegistry::new("EUR");
    match registry.extract(&page("https://shop.example.com/p/tv", body)) {
        Extraction::Found(signal) => {
            assert_eq!(signal.price, dec("1299.00"));
            assert_eq!(signal.currency, "USD");
            assert_eq!(signal.confidence, 0.4);
        }
        Extraction::Miss(detail) => panic!("miss: {detail}"),
    }
}

#[test]
fn test_miss_on_client_rendered_shell() {
    let registry = AdapterRegistry::new("USD");
    let result = registry.extract(&page(
        "https://spa.example.com/p/1",
        &common::empty_page(),
    ));
    assert!(matches!(result, Extraction::Miss(_)));
}

#[test]
fn test_site_adapter_takes_precedence_on_claimed_host() {
    let mut registry = AdapterRegistry::new("USD");
    registry.register(Arc::new(SelectorAdapter::new(
        "shopmart",
        vec!["shopmart.example.com".to_string()],
        "span.pdp-price__amount",
        "TRY",
    )));

    let body = r#"<html><body>
        <span class="pdp-price__amount">2.499,50 TL</span>
        </body></html>"#;

    match registry.extract(&page("https://www.shopmart.example.com/p/55", body)) {
        Extraction::Found(signal) => {
            assert_eq!(signal.adapter_id, "shopmart");
            assert_eq!(signal.price, dec("2499.50"));
            assert_eq!(signal.currency, "TRY");
        }
        Extraction::Miss(detail) => panic!("miss: {detail}"),
    }
}

#[test]
fn test_out_of_bounds_prices_are_misses() {
    let registry = AdapterRegistry::new("USD");

    let zero = r#"<meta itemprop="price" content="0.00"/>"#;
    assert!(matches!(
        registry.extract(&page("https://shop.example.com/p/1", zero)),
        Extraction::Miss(_)
    ));

    let huge = r#"<meta itemprop="price" content="99999999"/>"#;
    assert!(matches!(
        registry.extract(&page("https://shop.example.com/p/2", huge)),
        Extraction::Miss(_)
    ));
}

#[test]
fn test_browser_rendered_page_reports_browser_source() {
    let registry = AdapterRegistry::new("USD");
    let mut p = page(
        "https://shop.example.com/p/1",
        &common::json_ld_page("Widget", "25.00", "USD"),
    );
    p.fetched_via = FetchSource::Browser;

    match registry.extract(&p) {
        Extraction::Found(signal) => {
            assert_eq!(signal.extracted_from, FetchSource::Browser);
        }
        Extraction::Miss(detail) => panic!("miss: {detail}"),
    }
}
