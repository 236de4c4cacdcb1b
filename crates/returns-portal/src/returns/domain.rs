use chrono::NaiveDateTime;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A single purchased line of an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub sku: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub quantity: u32,
    pub quantity_returned: u32,
    pub price: f64,
    pub is_digital: bool,
    pub is_final_sale: bool,
}

impl LineItem {
    /// Units still held by the customer.
    pub fn remaining_quantity(&self) -> u32 {
        self.quantity.saturating_sub(self.quantity_returned)
    }

    pub fn is_fully_returned(&self) -> bool {
        self.quantity_returned >= self.quantity
    }
}

/// A customer order after normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_number: String,
    pub email: String,
    pub recipient: String,
    pub zip: String,
    pub street: String,
    pub city: String,
    pub purchased_at: NaiveDateTime,
    pub delivered_at: NaiveDateTime,
    pub return_window_days: u32,
    pub items: Vec<LineItem>,
}

impl Order {
    /// Whether `identifier` matches the email or zip the order was placed with.
    /// An empty identifier never matches, even when the order lacks both.
    pub fn matches_identifier(&self, identifier: &str) -> bool {
        !identifier.is_empty() && (self.email == identifier || self.zip == identifier)
    }
}

/// Tri-state verdict. `Unknown` means no rule produced a decision and must
/// never be read as "not returnable".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Returnability {
    Returnable,
    NotReturnable,
    #[default]
    Unknown,
}

impl Returnability {
    pub fn from_flag(returnable: bool) -> Self {
        if returnable {
            Self::Returnable
        } else {
            Self::NotReturnable
        }
    }

    pub fn as_option(self) -> Option<bool> {
        match self {
            Self::Returnable => Some(true),
            Self::NotReturnable => Some(false),
            Self::Unknown => None,
        }
    }

    pub fn is_returnable(self) -> bool {
        self == Self::Returnable
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Returnable => "returnable",
            Self::NotReturnable => "not returnable",
            Self::Unknown => "unknown",
        }
    }
}

// Wire form is `true` / `false` / `null`.
impl Serialize for Returnability {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.as_option().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Returnability {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match Option::<bool>::deserialize(deserializer)? {
            Some(flag) => Self::from_flag(flag),
            None => Self::Unknown,
        })
    }
}

/// Verdict for one line item, positionally aligned with `Order::items`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EligibilityResult {
    pub sku: String,
    pub returnable: Returnability,
    pub flag: String,
    pub reason: String,
    pub matched_rule_id: Option<String>,
}

impl EligibilityResult {
    pub const UNKNOWN_FLAG: &'static str = "unknown";

    /// Result for an item no rule matched.
    pub fn unmatched(item: &LineItem) -> Self {
        Self {
            sku: item.sku.clone(),
            returnable: Returnability::Unknown,
            flag: Self::UNKNOWN_FLAG.to_string(),
            reason: "No eligibility rule applies to this item.".to_string(),
            matched_rule_id: None,
        }
    }
}
