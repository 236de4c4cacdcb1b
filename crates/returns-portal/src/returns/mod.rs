//! Order normalization, eligibility rules and lookup for the returns flow.

pub mod domain;
pub mod eligibility;
pub mod normalizer;
pub mod presentation;
pub mod rules;
pub mod store;

pub use domain::{EligibilityResult, LineItem, Order, Returnability};
pub use eligibility::{evaluate, EligibilityEngine};
pub use normalizer::{NormalizeError, OrderNormalizer, DEFAULT_RETURN_WINDOW_DAYS};
pub use presentation::{derive_row, derive_rows, EligibilityRow};
pub use rules::{load_rules, Condition, Rule, RuleContext, RuleOutcome, RuleSet, RuleSetError};
pub use store::{
    DateFreshener, InMemorySource, JsonFileSource, OrderSource, OrderStore, StoreError,
};
