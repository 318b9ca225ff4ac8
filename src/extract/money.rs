//! Price text normalization
//!
//! Competitor sites render prices in a zoo of locale formats: thousand
//! separators, decimal commas, currency symbols on either side, stray
//! whitespace. This module turns such text into a `Decimal` scaled to two
//! fractional digits, plus an optional ISO-4217 currency code.

use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use rust_decimal::{Decimal, RoundingStrategy};

/// Upper bound for a plausible price; anything outside `(0, 10_000_000]`
/// is treated as an extraction miss.
const MAX_PRICE: i64 = 10_000_000;

/// Currency symbols mapped to ISO-4217 codes
const CURRENCY_SYMBOLS: &[(char, &str)] = &[
    ('€', "EUR"),
    ('$', "USD"),
    ('£', "GBP"),
    ('₺', "TRY"),
    ('¥', "JPY"),
    ('₩', "KRW"),
];

fn money_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // Amount with optional grouped thousands and an optional 1-2 digit
        // decimal part in either locale convention
        Regex::new(r"(\d{1,3}(?:[.,\u{a0} ]\d{3})+(?:[.,]\d{1,2})?|\d+(?:[.,]\d{1,2})?)")
            .expect("Invalid money regex")
    })
}

fn currency_code_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(EUR|USD|GBP|TRY|JPY|KRW|CHF|PLN|SEK|NOK|DKK|CZK)\b")
            .expect("Invalid currency regex")
    })
}

/// Parse a price out of visible text, e.g. `"€ 1.299,90"` or `"19.90 USD"`.
///
/// Returns the normalized amount and the detected currency, if any.
pub fn parse_money(text: &str) -> Option<(Decimal, Option<String>)> {
    let compact = text.trim();
    if compact.is_empty() {
        return None;
    }

    let m = money_re().find(compact)?;
    let amount = normalize_amount(m.as_str())?;
    let price = sanitize_price(amount)?;
    Some((price, detect_currency(compact)))
}

/// Normalize a raw numeric string with locale-ambiguous separators.
///
/// When both `.` and `,` appear, the right-most one is the decimal
/// separator. A lone separator followed by exactly three digits is read as
/// a thousands group ("1.299" = 1299), otherwise as a decimal point.
pub fn normalize_amount(raw: &str) -> Option<Decimal> {
    let s: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\u{a0}')
        .collect();
    if s.is_empty() {
        return None;
    }

    let last_dot = s.rfind('.');
    let last_comma = s.rfind(',');

    let normalized = match (last_dot, last_comma) {
        (Some(d), Some(c)) => {
            if c > d {
                // 1.299,90 -> comma is decimal
                s.replace('.', "").replacen(',', ".", usize::MAX)
            } else {
                // 1,299.90 -> dot is decimal
                s.replace(',', "")
            }
        }
        (None, Some(c)) => {
            let frac_len = s.len() - c - 1;
            if frac_len == 3 {
                // 1,299 or 1,234,567 -> thousands groups
                s.replace(',', "")
            } else {
                let (int_part, frac) = s.split_at(c);
                format!("{}.{}", int_part.replace(',', ""), &frac[1..])
            }
        }
        (Some(d), None) => {
            let frac_len = s.len() - d - 1;
            if frac_len == 3 {
                // 1.299 or 1.234.567 -> thousands groups
                s.replace('.', "")
            } else {
                let (int_part, frac) = s.split_at(d);
                format!("{}.{}", int_part.replace('.', ""), &frac[1..])
            }
        }
        (None, None) => s,
    };

    Decimal::from_str(&normalized).ok()
}

/// Detect a currency from symbols or ISO codes anywhere in the text
pub fn detect_currency(text: &str) -> Option<String> {
    for (symbol, code) in CURRENCY_SYMBOLS {
        if text.contains(*symbol) {
            return Some((*code).to_string());
        }
    }
    // "TL" is a common rendering of the lira code
    if text.contains("TL") {
        return Some("TRY".to_string());
    }
    currency_code_re()
        .find(text)
        .map(|m| m.as_str().to_string())
}

/// Rescale to two fractional digits (banker's rounding) and enforce the
/// plausibility bounds `(0, 10_000_000]`.
pub fn sanitize_price(amount: Decimal) -> Option<Decimal> {
    if amount <= Decimal::ZERO || amount > Decimal::from(MAX_PRICE) {
        return None;
    }
    Some(amount.round_dp_with_strategy(2, RoundingStrategy::MidpointNearestEven))
}
