//! Read-only order lookup over an injected record source.

use super::domain::Order;
use super::normalizer::{NormalizeError, OrderNormalizer};
use chrono::{Duration, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to read order fixture {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("order fixture is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("order fixture has an unexpected shape: {0}")]
    Fixture(&'static str),
    #[error(transparent)]
    Normalize(#[from] NormalizeError),
}

/// Supplies raw upstream order records.
pub trait OrderSource: Send + Sync {
    fn records(&self) -> Result<Vec<Value>, StoreError>;
}

/// Fixture file re-read on every call, so edits show up without a restart.
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl OrderSource for JsonFileSource {
    fn records(&self) -> Result<Vec<Value>, StoreError> {
        let contents = std::fs::read_to_string(&self.path).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })?;
        let root: Value = serde_json::from_str(&contents)?;
        fixture_records(root)
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    records: Vec<Value>,
}

impl InMemorySource {
    pub fn new(records: Vec<Value>) -> Self {
        Self { records }
    }

    /// Accepts the same `{"orders": [...]}` document as the fixture file.
    pub fn from_fixture(root: Value) -> Result<Self, StoreError> {
        fixture_records(root).map(Self::new)
    }
}

impl OrderSource for InMemorySource {
    fn records(&self) -> Result<Vec<Value>, StoreError> {
        Ok(self.records.clone())
    }
}

fn fixture_records(root: Value) -> Result<Vec<Value>, StoreError> {
    let Value::Object(mut root) = root else {
        return Err(StoreError::Fixture("root must be an object"));
    };
    let Some(Value::Array(orders)) = root.remove("orders") else {
        return Err(StoreError::Fixture("root must include an `orders` list"));
    };
    if !orders.iter().all(Value::is_object) {
        return Err(StoreError::Fixture("each order entry must be an object"));
    }
    Ok(orders)
}

/// Re-anchors demo orders relative to today so return windows stay
/// meaningful no matter when the demo runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateFreshener {
    delivery_age_days: BTreeMap<String, i64>,
    delivery_hour: u32,
}

impl DateFreshener {
    pub fn new(delivery_age_days: BTreeMap<String, i64>) -> Self {
        Self {
            delivery_age_days,
            delivery_hour: 14,
        }
    }

    /// Ages for the bundled fixture orders.
    pub fn demo() -> Self {
        Self::new(BTreeMap::from([
            ("RMA-1001".to_string(), 5),
            ("RMA-1002".to_string(), 60),
            ("RMA-1003".to_string(), 3),
        ]))
    }

    /// Returns a new order whose delivery lands the configured number of days before `today`,
    /// keeping the purchase-to-delivery gap. Orders without an age pass
    /// through unchanged.
    pub fn freshen(&self, order: Order, today: NaiveDate) -> Order {
        let Some(days_ago) = self.delivery_age_days.get(&order.order_number) else {
            return order;
        };
        let Some(anchor) = today.and_hms_opt(self.delivery_hour, 0, 0) else {
            return order;
        };

        let gap = order.delivered_at - order.purchased_at;
        let delivered_at: NaiveDateTime = anchor - Duration::days(*days_ago);
        Order {
            purchased_at: delivered_at - gap,
            delivered_at,
            ..order
        }
    }
}

/// Answers lookups by normalizing matching records from the source.
pub struct OrderStore<S> {
    source: S,
    normalizer: OrderNormalizer,
    freshener: Option<DateFreshener>,
}

impl<S: OrderSource> OrderStore<S> {
    pub fn new(source: S, normalizer: OrderNormalizer) -> Self {
        Self {
            source,
            normalizer,
            freshener: None,
        }
    }

    pub fn with_freshener(mut self, freshener: DateFreshener) -> Self {
        self.freshener = Some(freshener);
        self
    }

    /// Order whose number matches and whose email or zip equals
    /// `identifier`. A mismatch is `Ok(None)`, not an error.
    pub fn find(
        &self,
        order_number: &str,
        identifier: &str,
    ) -> Result<Option<Order>, StoreError> {
        for order in self.matching(order_number)? {
            if order.matches_identifier(identifier) {
                info!(%order_number, "order lookup matched");
                return Ok(Some(order));
            }
        }

        info!(%order_number, "order lookup did not match");
        Ok(None)
    }

    /// Order by number alone, for callers that already verified the customer.
    pub fn get(&self, order_number: &str) -> Result<Option<Order>, StoreError> {
        let order = self.matching(order_number)?.into_iter().next();
        debug!(%order_number, found = order.is_some(), "order fetched");
        Ok(order)
    }

    // Only records carrying the requested number are normalized, so one bad
    // record cannot break lookups of the others.
    fn matching(&self, order_number: &str) -> Result<Vec<Order>, StoreError> {
        let today = Utc::now().date_naive();
        self.source
            .records()?
            .iter()
            .filter(|raw| OrderNormalizer::order_number(raw) == order_number)
            .map(|raw| -> Result<Order, StoreError> {
                let order = self.normalizer.normalize(raw)?;
                Ok(match &self.freshener {
                    Some(freshener) => freshener.freshen(order, today),
                    None => order,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fixture() -> Value {
        json!({
            "orders": [
                {
                    "order_number": "RMA-1001",
                    "email": "alex@example.com",
                    "zip": "10115",
                    "order_date": "2025-12-01T10:00:00Z",
                    "fulfillments": [{"delivered_at": "2025-12-05T14:00:00Z"}],
                    "articles": [{"sku": "TSHIRT-BLK-M", "quantity": 2}]
                },
                {
                    "order_number": "RMA-BROKEN",
                    "order_date": "whenever"
                },
                {
                    "order_number": "RMA-2000",
                    "email": "kim@example.com",
                    "order_date": "2025-12-01T10:00:00Z",
                    "customer": {"postal_code": "20144"},
                    "articles": []
                }
            ]
        })
    }

    fn store() -> OrderStore<InMemorySource> {
        let source = InMemorySource::from_fixture(fixture()).expect("valid fixture");
        OrderStore::new(source, OrderNormalizer::default())
    }

    #[test]
    fn find_matches_email_or_zip() {
        let store = store();
        let by_email = store.find("RMA-1001", "alex@example.com").expect("lookup");
        assert_eq!(by_email.map(|o| o.order_number), Some("RMA-1001".to_string()));

        let by_zip = store.find("RMA-1001", "10115").expect("lookup");
        assert!(by_zip.is_some());

        let by_customer_zip = store.find("RMA-2000", "20144").expect("lookup");
        assert!(by_customer_zip.is_some());
    }

    #[test]
    fn find_mismatch_is_none() {
        let store = store();
        assert!(store
            .find("RMA-1001", "wrong@example.com")
            .expect("lookup")
            .is_none());
        assert!(store
            .find("RMA-1001", "ALEX@example.com")
            .expect("lookup")
            .is_none());
        assert!(store
            .find("RMA-9999", "alex@example.com")
            .expect("lookup")
            .is_none());
    }

    #[test]
    fn empty_identifier_finds_nothing() {
        let source = InMemorySource::new(vec![json!({
            "order_number": "RMA-ANON",
            "order_date": "2025-12-01T10:00:00Z",
            "articles": []
        })]);
        let store = OrderStore::new(source, OrderNormalizer::default());
        assert!(store.find("RMA-ANON", "").expect("lookup").is_none());
        assert!(store.get("RMA-ANON").expect("lookup").is_some());
    }

    #[test]
    fn get_ignores_credentials_and_skips_unrelated_bad_records() {
        let store = store();
        let order = store.get("RMA-1001").expect("lookup").expect("found");
        assert_eq!(order.items.len(), 1);
        assert!(store.get("RMA-404").expect("lookup").is_none());
    }

    #[test]
    fn malformed_matching_record_propagates() {
        let store = store();
        match store.get("RMA-BROKEN") {
            Err(StoreError::Normalize(NormalizeError::MalformedInput { field, .. })) => {
                assert_eq!(field, "order_date");
            }
            other => panic!("expected malformed input, got {other:?}"),
        }
    }

    #[test]
    fn fixture_shape_is_validated() {
        assert!(matches!(
            InMemorySource::from_fixture(json!([])),
            Err(StoreError::Fixture(_))
        ));
        assert!(matches!(
            InMemorySource::from_fixture(json!({"orders": {}})),
            Err(StoreError::Fixture(_))
        ));
        assert!(matches!(
            InMemorySource::from_fixture(json!({"orders": [1]})),
            Err(StoreError::Fixture(_))
        ));
    }

    #[test]
    fn freshener_reanchors_known_orders() {
        let today = NaiveDate::from_ymd_opt(2026, 3, 10).unwrap();
        let store = store().with_freshener(DateFreshener::demo());
        let order = store.get("RMA-1001").expect("lookup").expect("found");
        // the store anchors to the real clock; re-freshen against a fixed day
        let order = DateFreshener::demo().freshen(order, today);

        let expected = NaiveDate::from_ymd_opt(2026, 3, 5)
            .unwrap()
            .and_hms_opt(14, 0, 0)
            .unwrap();
        assert_eq!(order.delivered_at, expected);
        assert_eq!(order.delivered_at - order.purchased_at, Duration::hours(100));

        let untouched = store.get("RMA-2000").expect("lookup").expect("found");
        assert_eq!(
            untouched.purchased_at,
            NaiveDate::from_ymd_opt(2025, 12, 1)
                .unwrap()
                .and_hms_opt(10, 0, 0)
                .unwrap()
        );
    }
}
