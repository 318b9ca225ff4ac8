//! Generic price extraction fallback
//!
//! Three strategies in descending confidence:
//!
//! 1. JSON-LD product offers (`application/ld+json`), confidence 1.0
//! 2. Microdata / OpenGraph meta tags, confidence 0.7
//! 3. Regex over price-like containers, confidence 0.4

use scraper::{ElementRef, Html, Selector};
use serde_json::Value;

use super::money::{detect_currency, parse_money, sanitize_price};
use super::{Extraction, Page, PriceAdapter};
use crate::models::PriceSignal;
use crate::utils::normalize_whitespace;

/// Confidence assigned per extraction strategy
const CONFIDENCE_STRUCTURED: f64 = 1.0;
const CONFIDENCE_META: f64 = 0.7;
const CONFIDENCE_HEURISTIC: f64 = 0.4;

/// Fallback adapter claiming every host
pub struct GenericAdapter {
    default_currency: String,
    json_ld: Selector,
    meta_price: Vec<Selector>,
    meta_currency: Vec<Selector>,
    price_container: Selector,
    title: Selector,
    og_title: Selector,
}

impl GenericAdapter {
    pub fn new(default_currency: &str) -> Self {
        // Static selectors; parse cannot fail
        Self {
            default_currency: default_currency.to_string(),
            json_ld: Selector::parse(r#"script[type="application/ld+json"]"#).unwrap(),
            meta_price: vec![
                Selector::parse(r#"meta[property="product:price:amount"]"#).unwrap(),
                Selector::parse(r#"meta[property="og:price:amount"]"#).unwrap(),
                Selector::parse(r#"meta[itemprop="price"]"#).unwrap(),
                Selector::parse(r#"meta[name="price"]"#).unwrap(),
                Selector::parse(r#"[itemprop="price"]"#).unwrap(),
            ],
            meta_currency: vec![
                Selector::parse(r#"meta[property="product:price:currency"]"#).unwrap(),
                Selector::parse(r#"meta[property="og:price:currency"]"#).unwrap(),
                Selector::parse(r#"meta[itemprop="priceCurrency"]"#).unwrap(),
                Selector::parse(r#"[itemprop="priceCurrency"]"#).unwrap(),
            ],
            price_container: Selector::parse(
                r#"[class*="price"], [id*="price"], [class*="Price"]"#,
            )
            .unwrap(),
            title: Selector::parse("title").unwrap(),
            og_title: Selector::parse(r#"meta[property="og:title"]"#).unwrap(),
        }
    }

    fn signal(
        &self,
        page: &Page,
        price: rust_decimal::Decimal,
        currency: Option<String>,
        title: Option<String>,
        in_stock: Option<bool>,
        confidence: f64,
    ) -> PriceSignal {
        PriceSignal {
            price,
            currency: currency.unwrap_or_else(|| self.default_currency.clone()),
            title,
            in_stock,
            extracted_from: page.fetched_via,
            adapter_id: self.id().to_string(),
            confidence,
        }
    }

    /// Strategy 1: JSON-LD `offers.price`
    fn extract_json_ld(&self, page: &Page, doc: &Html) -> Option<PriceSignal> {
        for script in doc.select(&self.json_ld) {
            let raw = script.text().collect::<String>();
            let Ok(data) = serde_json::from_str::<Value>(raw.trim()) else {
                continue;
            };

            for item in flatten_ld_nodes(&data) {
                if let Some((price, currency, in_stock)) = offer_price(item) {
                    let title = item
                        .get("name")
                        .and_then(Value::as_str)
                        .map(|s| s.to_string())
                        .or_else(|| self.page_title(doc));
                    return Some(self.signal(
                        page,
                        price,
                        currency,
                        title,
                        in_stock,
                        CONFIDENCE_STRUCTURED,
                    ));
                }
            }
        }
        None
    }

    /// Strategy 2: meta/microdata price tags
    fn extract_meta(&self, page: &Page, doc: &Html) -> Option<PriceSignal> {
        for selector in &self.meta_price {
            for element in doc.select(selector) {
                let Some(text) = element_value(&element) else {
                    continue;
                };
                let Some((price, inline_currency)) = parse_money(&text) else {
                    continue;
                };
                let currency = inline_currency.or_else(|| self.currency_from_meta(doc));
                return Some(self.signal(
                    page,
                    price,
                    currency,
                    self.page_title(doc),
                    None,
                    CONFIDENCE_META,
                ));
            }
        }
        None
    }

    /// Strategy 3: currency-bearing number inside a price-like container
    fn extract_heuristic(&self, page: &Page, doc: &Html) -> Option<PriceSignal> {
        for element in doc.select(&self.price_container) {
            let text = normalize_whitespace(&element.text().collect::<String>());
            if text.is_empty() {
                continue;
            }
            // A bare number is not enough; the heuristic needs a currency marker
            if detect_currency(&text).is_none() {
                continue;
            }
            if let Some((price, currency)) = parse_money(&text) {
                return Some(self.signal(
                    page,
                    price,
                    currency,
                    self.page_title(doc),
                    None,
                    CONFIDENCE_HEURISTIC,
                ));
            }
        }
        None
    }

    fn currency_from_meta(&self, doc: &Html) -> Option<String> {
        for selector in &self.meta_currency {
            if let Some(element) = doc.select(selector).next() {
                if let Some(value) = element_value(&element) {
                    let code = value.trim().to_ascii_uppercase();
                    if code.len() == 3 {
                        return Some(code);
                    }
                }
            }
        }
        None
    }

    fn page_title(&self, doc: &Html) -> Option<String> {
        if let Some(meta) = doc.select(&self.og_title).next() {
            if let Some(content) = meta.value().attr("content") {
                let t = normalize_whitespace(content);
                if !t.is_empty() {
                    return Some(t);
                }
            }
        }
        doc.select(&self.title)
            .next()
            .map(|el| normalize_whitespace(&el.text().collect::<String>()))
            .filter(|t| !t.is_empty())
    }
}

impl PriceAdapter for GenericAdapter {
    fn id(&self) -> &str {
        "generic"
    }

    fn claims(&self, _host: &str) -> bool {
        true
    }

    fn extract(&self, page: &Page) -> Extraction {
        let doc = Html::parse_document(&page.body);

        if let Some(signal) = self.extract_json_ld(page, &doc) {
            return Extraction::Found(signal);
        }
        if let Some(signal) = self.extract_meta(page, &doc) {
            return Extraction::Found(signal);
        }
        if let Some(signal) = self.extract_heuristic(page, &doc) {
            return Extraction::Found(signal);
        }

        Extraction::Miss("no structured data, meta tags, or price container".to_string())
    }
}

/// Meta tags carry the value in `content`; other elements in their text
fn element_value(element: &ElementRef) -> Option<String> {
    if let Some(content) = element.value().attr("content") {
        let v = normalize_whitespace(content);
        if !v.is_empty() {
            return Some(v);
        }
    }
    let text = normalize_whitespace(&element.text().collect::<String>());
    (!text.is_empty()).then_some(text)
}

/// Walk a JSON-LD document into candidate product nodes, following
/// top-level arrays and `@graph` containers one level deep.
fn flatten_ld_nodes(data: &Value) -> Vec<&Value> {
    let mut nodes = Vec::new();
    match data {
        Value::Array(items) => {
            for item in items {
                nodes.extend(flatten_ld_nodes(item));
            }
        }
        Value::Object(map) => {
            nodes.push(data);
            if let Some(graph) = map.get("@graph").and_then(Value::as_array) {
                for item in graph {
                    nodes.push(item);
                }
            }
        }
        _ => {}
    }
    nodes
}

/// Pull `(price, currency, in_stock)` out of a node's `offers`
fn offer_price(node: &Value) -> Option<(rust_decimal::Decimal, Option<String>, Option<bool>)> {
    let offers = node.get("offers")?;
    let offer_list: Vec<&Value> = match offers {
        Value::Array(items) => items.iter().collect(),
        Value::Object(_) => vec![offers],
        _ => return None,
    };

    for offer in offer_list {
        let Some(raw_price) = offer.get("price") else {
            continue;
        };
        let price = match raw_price {
            Value::String(s) => super::money::normalize_amount(s),
            Value::Number(n) => n
                .as_f64()
                .and_then(rust_decimal::Decimal::from_f64_retain),
            _ => None,
        };
        let Some(price) = price.and_then(sanitize_price) else {
            continue;
        };

        let currency = offer
            .get("priceCurrency")
            .and_then(Value::as_str)
            .map(|c| c.trim().to_ascii_uppercase())
            .filter(|c| c.len() == 3);

        let in_stock = offer
            .get("availability")
            .and_then(Value::as_str)
            .map(|a| a.contains("InStock"));

        return Some((price, currency, in_stock));
    }
    None
}
