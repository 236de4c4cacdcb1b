use super::domain::{EligibilityResult, Order, Returnability};
use super::rules::{RuleContext, RuleSet};
use chrono::{NaiveDateTime, Utc};
use tracing::debug;

/// Evaluates every line item of `order` against `rules`.
///
/// Results are positional (`result[i]` describes `order.items[i]`). For each
/// item the first rule in priority order whose predicate holds decides the
/// verdict; an item no rule matches gets an explicit unknown verdict.
pub fn evaluate(order: &Order, rules: &RuleSet, now: NaiveDateTime) -> Vec<EligibilityResult> {
    order
        .items
        .iter()
        .map(|item| {
            let ctx = RuleContext { item, order, now };
            match rules.first_match(&ctx) {
                Some(rule) => EligibilityResult {
                    sku: item.sku.clone(),
                    returnable: Returnability::from_flag(rule.result.returnable),
                    flag: rule.result.flag.clone(),
                    reason: rule.result.reason.clone(),
                    matched_rule_id: Some(rule.id.clone()),
                },
                None => EligibilityResult::unmatched(item),
            }
        })
        .collect()
}

/// Owns a rule set and evaluates orders against it.
#[derive(Debug, Clone, Default)]
pub struct EligibilityEngine {
    rules: RuleSet,
}

impl EligibilityEngine {
    pub fn new(rules: RuleSet) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn evaluate_at(&self, order: &Order, now: NaiveDateTime) -> Vec<EligibilityResult> {
        let results = evaluate(order, &self.rules, now);
        debug!(
            order_number = %order.order_number,
            items = results.len(),
            returnable = results
                .iter()
                .filter(|result| result.returnable.is_returnable())
                .count(),
            "evaluated return eligibility"
        );
        results
    }

    pub fn evaluate(&self, order: &Order) -> Vec<EligibilityResult> {
        self.evaluate_at(order, Utc::now().naive_utc())
    }
}
