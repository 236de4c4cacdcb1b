//! Eligibility rules expressed as data: a predicate (`when`) plus the verdict
//! to emit when it holds (`result`).

use super::domain::{LineItem, Order};
use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::io::Read;
use std::path::Path;

/// Flag codes emitted by the reference rule set.
pub mod flag {
    pub const DIGITAL_GOODS: &str = "digital_goods";
    pub const FINAL_SALE: &str = "final_sale";
    pub const FULLY_RETURNED: &str = "fully_returned";
    pub const WINDOW_EXPIRED: &str = "window_expired";
    pub const OK: &str = "ok";
}

/// Everything a predicate may inspect.
#[derive(Debug, Clone, Copy)]
pub struct RuleContext<'a> {
    pub item: &'a LineItem,
    pub order: &'a Order,
    pub now: NaiveDateTime,
}

impl RuleContext<'_> {
    pub fn window_expired(&self) -> bool {
        let window = Duration::days(i64::from(self.order.return_window_days));
        self.now - self.order.delivered_at > window
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    Always,
    Digital,
    FinalSale,
    FullyReturned,
    WindowExpired,
    Category { equals: String },
    PriceAbove { amount: f64 },
    All { conditions: Vec<Condition> },
    Any { conditions: Vec<Condition> },
    Not { condition: Box<Condition> },
}

impl Condition {
    pub fn matches(&self, ctx: &RuleContext<'_>) -> bool {
        match self {
            Condition::Always => true,
            Condition::Digital => ctx.item.is_digital,
            Condition::FinalSale => ctx.item.is_final_sale,
            Condition::FullyReturned => ctx.item.is_fully_returned(),
            Condition::WindowExpired => ctx.window_expired(),
            Condition::Category { equals } => ctx
                .item
                .category
                .as_deref()
                .is_some_and(|category| category.eq_ignore_ascii_case(equals)),
            Condition::PriceAbove { amount } => ctx.item.price > *amount,
            Condition::All { conditions } => conditions.iter().all(|c| c.matches(ctx)),
            Condition::Any { conditions } => conditions.iter().any(|c| c.matches(ctx)),
            Condition::Not { condition } => !condition.matches(ctx),
        }
    }
}

/// Verdict template copied into the result when a rule matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleOutcome {
    pub returnable: bool,
    pub flag: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub priority: i32,
    pub when: Condition,
    pub result: RuleOutcome,
}

impl Rule {
    pub fn new(
        id: impl Into<String>,
        priority: i32,
        when: Condition,
        returnable: bool,
        flag: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            priority,
            when,
            result: RuleOutcome {
                returnable,
                flag: flag.into(),
                reason: reason.into(),
            },
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RuleSetError {
    #[error("failed to read rule file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid rule file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("duplicate rule id `{0}`")]
    DuplicateId(String),
    #[error("rules `{first}` and `{second}` share priority {priority}")]
    DuplicatePriority {
        priority: i32,
        first: String,
        second: String,
    },
}

#[derive(Debug, Deserialize)]
struct RuleFile {
    rules: Vec<Rule>,
}

/// Rules sorted by ascending priority. Ids and priorities are unique, so
/// evaluation order is total.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new(mut rules: Vec<Rule>) -> Result<Self, RuleSetError> {
        let mut ids = HashSet::with_capacity(rules.len());
        let mut priorities: BTreeMap<i32, &str> = BTreeMap::new();
        for rule in &rules {
            if !ids.insert(rule.id.as_str()) {
                return Err(RuleSetError::DuplicateId(rule.id.clone()));
            }
            if let Some(first) = priorities.insert(rule.priority, rule.id.as_str()) {
                return Err(RuleSetError::DuplicatePriority {
                    priority: rule.priority,
                    first: first.to_string(),
                    second: rule.id.clone(),
                });
            }
        }

        rules.sort_by_key(|rule| rule.priority);
        Ok(Self { rules })
    }

    /// A set with no rules; every item evaluates to unknown.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Digital, final-sale, fully-returned and expired-window items are
    /// refused; everything else is returnable.
    pub fn reference() -> Self {
        let rules = vec![
            Rule::new(
                flag::DIGITAL_GOODS,
                10,
                Condition::Digital,
                false,
                flag::DIGITAL_GOODS,
                "Digital goods cannot be returned.",
            ),
            Rule::new(
                flag::FINAL_SALE,
                20,
                Condition::FinalSale,
                false,
                flag::FINAL_SALE,
                "Final-sale items cannot be returned.",
            ),
            Rule::new(
                flag::FULLY_RETURNED,
                30,
                Condition::FullyReturned,
                false,
                flag::FULLY_RETURNED,
                "All units of this item have already been returned.",
            ),
            Rule::new(
                flag::WINDOW_EXPIRED,
                40,
                Condition::WindowExpired,
                false,
                flag::WINDOW_EXPIRED,
                "The return window for this order has expired.",
            ),
            Rule::new(
                flag::OK,
                1000,
                Condition::Always,
                true,
                flag::OK,
                "Eligible for return.",
            ),
        ];

        Self { rules }
    }

    /// Reads `{"rules": [...]}`.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, RuleSetError> {
        let file: RuleFile = serde_json::from_reader(reader)?;
        Self::new(file.rules)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, RuleSetError> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(std::io::BufReader::new(file))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// First rule, in priority order, whose predicate holds.
    pub fn first_match(&self, ctx: &RuleContext<'_>) -> Option<&Rule> {
        self.rules.iter().find(|rule| rule.when.matches(ctx))
    }
}

/// Loads the configured rule file, or the reference rules when none is set.
pub fn load_rules(path: Option<&Path>) -> Result<RuleSet, RuleSetError> {
    match path {
        Some(path) => RuleSet::from_path(path),
        None => Ok(RuleSet::reference()),
    }
}
