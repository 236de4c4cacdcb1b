use super::domain::{EligibilityResult, LineItem, Order};
use serde::Serialize;

/// Per-item view data. Built fresh for every request from the order and its
/// eligibility results; never stored on the order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EligibilityRow {
    pub item: LineItem,
    pub result: EligibilityResult,
    pub remaining_qty: u32,
    pub quantity_options: Vec<u32>,
    pub selectable: bool,
}

pub fn derive_row(item: &LineItem, result: EligibilityResult) -> EligibilityRow {
    let remaining_qty = item.remaining_quantity();
    EligibilityRow {
        item: item.clone(),
        selectable: result.returnable.is_returnable() && remaining_qty > 0,
        result,
        remaining_qty,
        quantity_options: (1..=remaining_qty).collect(),
    }
}

/// Pairs items with their results positionally.
pub fn derive_rows(order: &Order, results: Vec<EligibilityResult>) -> Vec<EligibilityRow> {
    debug_assert_eq!(order.items.len(), results.len());
    order
        .items
        .iter()
        .zip(results)
        .map(|(item, result)| derive_row(item, result))
        .collect()
}
