//! Rule-based pricing recommendations
//!
//! The engine is deterministic: for a fixed `(product, rules, history)`
//! snapshot it always produces the same suggestion and fired rule. Rules
//! are evaluated in descending priority (ties by id ascending); the first
//! matching ACTIVE rule fires. Suggestions are clamped to a maximum change
//! percentage and a cost floor, then rounded to two decimals with banker's
//! rounding.

use std::collections::HashMap;

use chrono::Utc;
use rust_decimal::{Decimal, RoundingStrategy};
use uuid::Uuid;

use crate::models::{PricePoint, PricingRule, Product, Recommendation, RuleStatus, RuleType};

/// Engine tuning; defaults follow the deployment configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Days of history considered for competitor averages
    pub history_window_days: u32,

    /// Maximum percentage the suggestion may move from the current price
    pub max_change_pct: Decimal,

    /// Margin over cost enforced when the product cost is known
    pub min_margin_pct: Decimal,

    /// Competitor weight in the DYNAMIC blend
    pub dynamic_competitor_weight: Decimal,

    /// Own-price weight in the DYNAMIC blend
    pub dynamic_current_weight: Decimal,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            history_window_days: 14,
            max_change_pct: Decimal::from(20),
            min_margin_pct: Decimal::from(5),
            dynamic_competitor_weight: Decimal::new(6, 1), // 0.6
            dynamic_current_weight: Decimal::new(4, 1),    // 0.4
        }
    }
}

/// Deterministic rule evaluator
pub struct RuleEngine {
    config: EngineConfig,
}

impl RuleEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Produce a recommendation for `product` from the rule set and the
    /// recent history window (points for all of the product's trackers).
    pub fn recommend(
        &self,
        product: &Product,
        rules: &[PricingRule],
        recent_history: &[PricePoint],
    ) -> Recommendation {
        let current = product.current_price;
        let competitor_stats = competitor_average(recent_history);

        let mut ordered: Vec<&PricingRule> = rules.iter().collect();
        ordered.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));

        let fired = ordered
            .into_iter()
            .find(|r| r.status == RuleStatus::Active && r.matches(product));

        let Some(rule) = fired else {
            return self.finish(product, None, current, "no active rule matched".to_string());
        };

        let pct_factor = Decimal::ONE + rule.adjustment_pct / Decimal::from(100);

        let (raw, mut reason) = match rule.rule_type {
            RuleType::Fixed => (
                current * pct_factor,
                format!(
                    "rule '{}' (fixed): current {current} adjusted by {}%",
                    rule.name, rule.adjustment_pct
                ),
            ),
            RuleType::Clearance => (
                current * pct_factor,
                format!(
                    "rule '{}' (clearance): current {current} adjusted by {}%",
                    rule.name, rule.adjustment_pct
                ),
            ),
            RuleType::Competitive => match competitor_stats {
                Some((avg, count)) => (
                    avg * pct_factor,
                    format!(
                        "rule '{}' (competitive): {count} competitors, avg={avg:.2}, adjusted by {}%",
                        rule.name, rule.adjustment_pct
                    ),
                ),
                None => {
                    return self.finish(
                        product,
                        None,
                        current,
                        "no competitor data".to_string(),
                    );
                }
            },
            RuleType::Dynamic => match competitor_stats {
                Some((avg, count)) => {
                    let blended = self.config.dynamic_competitor_weight * avg
                        + self.config.dynamic_current_weight * current;
                    (
                        blended,
                        format!(
                            "rule '{}' (dynamic): {count} competitors, avg={avg:.2}, \
                             blend {}*avg + {}*current",
                            rule.name,
                            self.config.dynamic_competitor_weight,
                            self.config.dynamic_current_weight
                        ),
                    )
                }
                None => {
                    return self.finish(
                        product,
                        None,
                        current,
                        "no competitor data".to_string(),
                    );
                }
            },
        };

        let (clamped, clamp_note) = self.clamp(product, raw);
        if let Some(note) = clamp_note {
            reason.push_str("; ");
            reason.push_str(&note);
        }

        self.finish(product, Some(rule.id), clamped, reason)
    }

    /// Clamp to the allowed band around the current price and the cost
    /// floor. Returns the clamped value and a note when clamping applied.
    fn clamp(&self, product: &Product, raw: Decimal) -> (Decimal, Option<String>) {
        let current = product.current_price;
        let band = self.config.max_change_pct / Decimal::from(100);
        let upper = current * (Decimal::ONE + band);
        let mut lower = current * (Decimal::ONE - band);

        // Cost floor: never suggest below cost plus margin (and never below
        // one cent)
        let mut floor = Decimal::new(1, 2);
        if let Some(cost) = product.cost {
            let margin_floor =
                cost * (Decimal::ONE + self.config.min_margin_pct / Decimal::from(100));
            if margin_floor > floor {
                floor = margin_floor;
            }
        }
        if floor > lower {
            lower = floor;
        }

        if raw > upper {
            (upper, Some(format!("clamped to +{}% cap", self.config.max_change_pct)))
        } else if raw < lower {
            (lower, Some("clamped to lower bound".to_string()))
        } else {
            (raw, None)
        }
    }

    fn finish(
        &self,
        product: &Product,
        rule_id: Option<Uuid>,
        suggested: Decimal,
        reason: String,
    ) -> Recommendation {
        Recommendation {
            product_id: product.id,
            current_price: product
                .current_price
                .round_dp_with_strategy(2, RoundingStrategy::MidpointNearestEven),
            suggested_price: suggested
                .round_dp_with_strategy(2, RoundingStrategy::MidpointNearestEven),
            reason,
            rule_id,
            computed_at: Utc::now(),
        }
    }
}

/// Arithmetic mean of the most recent price per tracker within the window.
///
/// Returns `(average, competitor_count)`, or `None` when the window holds
/// no points.
fn competitor_average(history: &[PricePoint]) -> Option<(Decimal, usize)> {
    let mut latest_per_tracker: HashMap<Uuid, &PricePoint> = HashMap::new();
    for point in history {
        latest_per_tracker
            .entry(point.tracker_id)
            .and_modify(|existing| {
                if point.captured_at > existing.captured_at {
                    *existing = point;
                }
            })
            .or_insert(point);
    }

    if latest_per_tracker.is_empty() {
        return None;
    }

    let count = latest_per_tracker.len();
    let sum: Decimal = latest_per_tracker.values().map(|p| p.price).sum();
    Some((sum / Decimal::from(count as u64), count))
}
