//! Maps loosely-typed upstream order records onto [`Order`].
//!
//! Upstream payloads arrive in two shapes (an `articles`/`order_date` export
//! and an `items`/`purchased_at` export) with inconsistent typing. The
//! normalizer coerces rather than rejects wherever a sane default exists and
//! only fails on missing identifiers and unparseable timestamps.

mod coerce;
mod timestamp;

use super::domain::{LineItem, Order};
use chrono::NaiveDateTime;
use coerce::Record;
use serde_json::Value;
use tracing::{debug, warn};

pub use timestamp::parse_timestamp;

pub const DEFAULT_RETURN_WINDOW_DAYS: u32 = 30;

/// Raised when a record cannot be turned into an [`Order`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormalizeError {
    #[error("malformed order record: `{field}` {detail}")]
    MalformedInput { field: String, detail: String },
}

impl NormalizeError {
    fn malformed(field: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::MalformedInput {
            field: field.into(),
            detail: detail.into(),
        }
    }
}

/// Stateless mapper from upstream records to the domain model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderNormalizer {
    default_window_days: u32,
}

impl Default for OrderNormalizer {
    fn default() -> Self {
        Self::new(DEFAULT_RETURN_WINDOW_DAYS)
    }
}

impl OrderNormalizer {
    pub fn new(default_window_days: u32) -> Self {
        Self {
            default_window_days,
        }
    }

    pub fn default_window_days(&self) -> u32 {
        self.default_window_days
    }

    /// The trimmed `order_number` of a raw record, coerced like any other
    /// string field.
    pub fn order_number(raw: &Value) -> String {
        coerce::text(raw.get("order_number")).trim().to_string()
    }

    pub fn normalize(&self, raw: &Value) -> Result<Order, NormalizeError> {
        let record = raw
            .as_object()
            .ok_or_else(|| NormalizeError::malformed("order", "must be a JSON object"))?;

        let order_number = Self::order_number(raw);
        if order_number.is_empty() {
            return Err(NormalizeError::malformed("order_number", "is required"));
        }

        let customer = coerce::object(record.get("customer"));
        let customer_text = |key: &str| coerce::text(customer.and_then(|c| c.get(key)));

        let recipient = non_empty_or(coerce::text(record.get("recipient")), || {
            coerce::join_non_empty(
                &[customer_text("first_name"), customer_text("last_name")],
                " ",
            )
        });
        let street = non_empty_or(coerce::text(record.get("street")), || {
            coerce::join_non_empty(
                &[
                    customer_text("address_line"),
                    customer_text("address_line_extra"),
                ],
                ", ",
            )
        });
        let zip = non_empty_or(coerce::text(record.get("zip")), || {
            customer_text("postal_code")
        });
        let city = non_empty_or(coerce::text(record.get("city")), || customer_text("city"));

        let purchased_at = purchase_timestamp(record)?;
        let delivered_at = delivery_timestamp(record)?.unwrap_or(purchased_at);
        if delivered_at < purchased_at {
            return Err(NormalizeError::malformed(
                "delivered_at",
                format!("{delivered_at} precedes purchase time {purchased_at}"),
            ));
        }

        let return_window_days = match record.get("return_window_days") {
            None | Some(Value::Null) => self.default_window_days,
            Some(value) => clamp_u32(coerce::integer(
                Some(value),
                i64::from(self.default_window_days),
            )),
        };

        let items = line_item_records(record)
            .into_iter()
            .enumerate()
            .map(|(index, item)| normalize_item(index, item))
            .collect::<Result<Vec<_>, _>>()?;

        debug!(
            %order_number,
            items = items.len(),
            %delivered_at,
            return_window_days,
            "normalized order record"
        );

        Ok(Order {
            order_number,
            email: coerce::text(record.get("email")),
            recipient,
            zip,
            street,
            city,
            purchased_at,
            delivered_at,
            return_window_days,
            items,
        })
    }
}

fn non_empty_or(value: String, fallback: impl FnOnce() -> String) -> String {
    if value.is_empty() {
        fallback()
    } else {
        value
    }
}

fn clamp_u32(value: i64) -> u32 {
    u32::try_from(value.max(0)).unwrap_or(u32::MAX)
}

fn timestamp_field(
    record: &Record,
    key: &str,
    field: &str,
) -> Result<Option<NaiveDateTime>, NormalizeError> {
    let raw = coerce::text(record.get(key));
    if raw.trim().is_empty() {
        return Ok(None);
    }

    parse_timestamp(&raw).map(Some).ok_or_else(|| {
        NormalizeError::malformed(field, format!("is not an ISO-8601 timestamp: '{raw}'"))
    })
}

fn purchase_timestamp(record: &Record) -> Result<NaiveDateTime, NormalizeError> {
    if let Some(purchased_at) = timestamp_field(record, "purchased_at", "purchased_at")? {
        return Ok(purchased_at);
    }

    timestamp_field(record, "order_date", "order_date")?
        .ok_or_else(|| NormalizeError::malformed("purchased_at", "is required"))
}

/// Latest fulfillment delivery, then the top-level `delivered_at`.
fn delivery_timestamp(record: &Record) -> Result<Option<NaiveDateTime>, NormalizeError> {
    let mut latest: Option<NaiveDateTime> = None;
    for (index, fulfillment) in coerce::objects(record.get("fulfillments"))
        .into_iter()
        .enumerate()
    {
        let field = format!("fulfillments[{index}].delivered_at");
        if let Some(delivered_at) = timestamp_field(fulfillment, "delivered_at", &field)? {
            latest = Some(latest.map_or(delivered_at, |current| current.max(delivered_at)));
        }
    }

    match latest {
        Some(delivered_at) => Ok(Some(delivered_at)),
        None => timestamp_field(record, "delivered_at", "delivered_at"),
    }
}

fn line_item_records(record: &Record) -> Vec<&Record> {
    match record.get("items") {
        Some(items @ Value::Array(_)) => coerce::objects(Some(items)),
        _ => coerce::objects(record.get("articles")),
    }
}

fn normalize_item(index: usize, item: &Record) -> Result<LineItem, NormalizeError> {
    let sku = coerce::text(item.get("sku")).trim().to_string();
    if sku.is_empty() {
        return Err(NormalizeError::malformed(
            format!("items[{index}].sku"),
            "is required",
        ));
    }

    let raw_quantity = coerce::integer(item.get("quantity"), 1);
    let quantity = clamp_u32(raw_quantity).max(1);
    if i64::from(quantity) != raw_quantity {
        warn!(%sku, raw_quantity, repaired = quantity, "quantity out of range; clamped");
    }

    let raw_returned = coerce::integer(item.get("quantity_returned"), 0);
    let quantity_returned = clamp_u32(raw_returned).min(quantity);
    if i64::from(quantity_returned) != raw_returned {
        warn!(
            %sku,
            raw_returned,
            quantity,
            repaired = quantity_returned,
            "quantity_returned out of range; clamped"
        );
    }

    let mut price = coerce::decimal(item.get("price"), 0.0);
    if price < 0.0 {
        warn!(%sku, price, "negative price; clamped to zero");
        price = 0.0;
    }

    let tags = coerce::strings(item.get("tags"));
    let has_tag = |wanted: &str| tags.iter().any(|tag| tag.eq_ignore_ascii_case(wanted));

    let product_type = coerce::text(item.get("product_type"));
    let top_segment = product_type
        .split('>')
        .next()
        .map(str::trim)
        .filter(|segment| !segment.is_empty());

    let is_digital = coerce::boolean(item.get("is_digital"))
        .or_else(|| coerce::boolean(item.get("digital")))
        .unwrap_or_else(|| {
            coerce::boolean(item.get("requires_shipping")) == Some(false)
                || has_tag("digital-delivery")
                || top_segment.is_some_and(|segment| segment.eq_ignore_ascii_case("digital"))
        });

    let is_final_sale = coerce::boolean(item.get("is_final_sale"))
        .or_else(|| coerce::boolean(item.get("final_sale")))
        .unwrap_or_else(|| has_tag("final-sale"));

    let explicit_category = coerce::text(item.get("category")).trim().to_string();
    let category = if explicit_category.is_empty() {
        top_segment.map(str::to_lowercase)
    } else {
        Some(explicit_category)
    };

    Ok(LineItem {
        sku,
        name: coerce::text(item.get("name")),
        category,
        quantity,
        quantity_returned,
        price,
        is_digital,
        is_final_sale,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn at(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn raw_article(sku: &str, overrides: Value) -> Value {
        let mut base = json!({
            "sku": sku,
            "name": "Test Article",
            "product_type": "General",
            "quantity": 1,
            "quantity_returned": 0,
            "price": 19.99,
            "requires_shipping": true,
            "tags": [],
        });
        merge(&mut base, overrides);
        base
    }

    fn raw_order(overrides: Value) -> Value {
        let mut base = json!({
            "order_number": "TEST-001",
            "email": "test@example.com",
            "recipient": "Test User",
            "zip": "12345",
            "street": "Test Street 1",
            "city": "Testville",
            "order_date": "2025-12-01T10:00:00Z",
            "fulfillments": [
                {"tracking_number": "TEST-TRACK-001", "carrier": "DHL", "delivered_at": "2025-12-05T14:00:00Z"}
            ],
            "articles": [],
        });
        merge(&mut base, overrides);
        base
    }

    fn merge(base: &mut Value, overrides: Value) {
        if let (Some(target), Value::Object(source)) = (base.as_object_mut(), overrides) {
            for (key, value) in source {
                target.insert(key, value);
            }
        }
    }

    fn raw_order_1001() -> Value {
        raw_order(json!({
            "order_number": "RMA-1001",
            "email": "alex@example.com",
            "zip": "10115",
            "recipient": "Jane Doe",
            "street": "Luisenstrasse 12",
            "city": "Berlin",
            "articles": [
                raw_article("TSHIRT-BLK-M", json!({
                    "name": "T-Shirt Black M",
                    "product_type": "Apparel > T-Shirts",
                    "quantity": 2,
                    "price": 29.99,
                    "tags": ["summer-collection"],
                })),
                raw_article("EBOOK-RETURNS", json!({
                    "name": "Returns Best-Practices E-Book",
                    "product_type": "Digital > Books",
                    "price": 9.99,
                    "requires_shipping": false,
                    "tags": ["digital-delivery"],
                })),
                raw_article("HOODIE-NAV-L", json!({
                    "name": "Navy Hoodie L",
                    "product_type": "Apparel > Hoodies",
                    "price": 59.99,
                })),
            ],
        }))
    }

    fn normalize(raw: &Value) -> Order {
        OrderNormalizer::default()
            .normalize(raw)
            .expect("record normalizes")
    }

    fn malformed_field(result: Result<Order, NormalizeError>) -> String {
        match result.expect_err("normalization fails") {
            NormalizeError::MalformedInput { field, .. } => field,
        }
    }

    #[test]
    fn maps_basic_order_fields() {
        let order = normalize(&raw_order_1001());
        assert_eq!(order.order_number, "RMA-1001");
        assert_eq!(order.email, "alex@example.com");
        assert_eq!(order.recipient, "Jane Doe");
        assert_eq!(order.zip, "10115");
        assert_eq!(order.street, "Luisenstrasse 12");
        assert_eq!(order.city, "Berlin");
        assert_eq!(order.purchased_at, at(2025, 12, 1, 10));
        assert_eq!(order.delivered_at, at(2025, 12, 5, 14));
        assert_eq!(order.return_window_days, DEFAULT_RETURN_WINDOW_DAYS);
        assert_eq!(order.items.len(), 3);
    }

    #[test]
    fn maps_article_fields() {
        let order = normalize(&raw_order_1001());
        let tshirt = &order.items[0];
        assert_eq!(tshirt.sku, "TSHIRT-BLK-M");
        assert_eq!(tshirt.name, "T-Shirt Black M");
        assert_eq!(tshirt.price, 29.99);
        assert_eq!(tshirt.quantity, 2);
        assert_eq!(tshirt.quantity_returned, 0);
        assert_eq!(tshirt.category.as_deref(), Some("apparel"));
        assert!(!tshirt.is_digital);
        assert!(!tshirt.is_final_sale);
    }

    #[test]
    fn derives_digital_and_final_sale_from_upstream_hints() {
        let order = normalize(&raw_order_1001());
        let ebook = &order.items[1];
        assert!(ebook.is_digital);
        assert_eq!(ebook.category.as_deref(), Some("digital"));

        let clearance = normalize(&raw_order(json!({
            "articles": [raw_article("SHOES-CLR-42", json!({
                "product_type": "Footwear > Sneakers",
                "tags": ["clearance", "final-sale"],
            }))],
        })));
        assert!(clearance.items[0].is_final_sale);
        assert!(!clearance.items[0].is_digital);
    }

    #[test]
    fn maps_items_variant_with_explicit_flags() {
        let raw = json!({
            "order_number": "RMA-X",
            "email": "a@b.com",
            "zip": "12345",
            "purchased_at": "2025-12-01T10:00:00Z",
            "delivered_at": "2025-12-02T10:00:00Z",
            "return_window_days": 14,
            "items": [{
                "sku": "DIGI-1",
                "name": "Digital",
                "category": "digital",
                "quantity": 1,
                "quantity_returned": 0,
                "price": 10.0,
                "digital": true,
                "final_sale": false,
            }],
        });

        let order = normalize(&raw);
        let item = &order.items[0];
        assert!(item.is_digital);
        assert!(!item.is_final_sale);
        assert_eq!(item.category.as_deref(), Some("digital"));
        assert_eq!(order.delivered_at, at(2025, 12, 2, 10));
        assert_eq!(order.return_window_days, 14);
    }

    #[test]
    fn explicit_flags_override_hints() {
        let order = normalize(&raw_order(json!({
            "articles": [raw_article("GIFT", json!({
                "requires_shipping": false,
                "tags": ["final-sale"],
                "is_digital": false,
                "is_final_sale": false,
            }))],
        })));
        assert!(!order.items[0].is_digital);
        assert!(!order.items[0].is_final_sale);
    }

    #[test]
    fn synthesizes_recipient_and_street_from_customer() {
        let mut raw = raw_order(json!({
            "zip": "",
            "city": "",
            "customer": {
                "first_name": "Jane",
                "last_name": "Doe",
                "address_line": "Hauptstrasse 5",
                "address_line_extra": "Hinterhaus",
                "postal_code": "10115",
                "city": "Berlin",
            },
        }));
        if let Some(record) = raw.as_object_mut() {
            record.remove("recipient");
            record.remove("street");
        }

        let order = normalize(&raw);
        assert_eq!(order.recipient, "Jane Doe");
        assert_eq!(order.street, "Hauptstrasse 5, Hinterhaus");
        assert_eq!(order.zip, "10115");
        assert_eq!(order.city, "Berlin");
    }

    #[test]
    fn synthesized_parts_skip_empty_values() {
        let raw = raw_order(json!({
            "recipient": "",
            "street": null,
            "customer": {"first_name": "", "last_name": "Doe", "address_line": "Main 1"},
        }));
        let order = normalize(&raw);
        assert_eq!(order.recipient, "Doe");
        assert_eq!(order.street, "Main 1");
    }

    #[test]
    fn delivery_date_uses_latest_fulfillment() {
        let order = normalize(&raw_order(json!({
            "delivered_at": "2025-12-20T09:00:00Z",
            "fulfillments": [
                {"delivered_at": "2025-12-03T08:00:00Z"},
                {"delivered_at": "2025-12-07T16:00:00Z"},
                {"delivered_at": ""},
                {"carrier": "UPS"},
            ],
        })));
        assert_eq!(order.delivered_at, at(2025, 12, 7, 16));
    }

    #[test]
    fn delivery_date_falls_back_to_top_level_then_purchase() {
        let order = normalize(&raw_order(json!({
            "fulfillments": [],
            "delivered_at": "2025-12-09T11:00:00Z",
        })));
        assert_eq!(order.delivered_at, at(2025, 12, 9, 11));

        let order = normalize(&raw_order(json!({
            "order_date": "2026-02-08T09:00:00Z",
            "fulfillments": [],
        })));
        assert_eq!(order.delivered_at, order.purchased_at);
        assert_eq!(order.delivered_at, at(2026, 2, 8, 9));
    }

    #[test]
    fn malformed_timestamps_fail() {
        let field = malformed_field(
            OrderNormalizer::default().normalize(&raw_order(json!({"order_date": "not-a-date"}))),
        );
        assert_eq!(field, "order_date");

        let field = malformed_field(OrderNormalizer::default().normalize(&raw_order(json!({
            "fulfillments": [{"delivered_at": "2025-12-05T14:00:00Z"}, {"delivered_at": "soon"}],
        }))));
        assert_eq!(field, "fulfillments[1].delivered_at");
    }

    #[test]
    fn missing_required_fields_fail() {
        let mut raw = raw_order(json!({}));
        if let Some(record) = raw.as_object_mut() {
            record.remove("order_date");
        }
        assert_eq!(
            malformed_field(OrderNormalizer::default().normalize(&raw)),
            "purchased_at"
        );

        assert_eq!(
            malformed_field(
                OrderNormalizer::default().normalize(&raw_order(json!({"order_number": "  "})))
            ),
            "order_number"
        );

        let raw = raw_order(json!({"articles": [raw_article("", json!({}))]}));
        assert_eq!(
            malformed_field(OrderNormalizer::default().normalize(&raw)),
            "items[0].sku"
        );

        assert_eq!(
            malformed_field(OrderNormalizer::default().normalize(&json!(["not", "an", "order"]))),
            "order"
        );
    }

    #[test]
    fn delivery_before_purchase_fails() {
        let raw = raw_order(json!({
            "fulfillments": [{"delivered_at": "2025-11-01T10:00:00Z"}],
        }));
        assert_eq!(
            malformed_field(OrderNormalizer::default().normalize(&raw)),
            "delivered_at"
        );
    }

    #[test]
    fn coerces_quantities() {
        let order = normalize(&raw_order(json!({
            "articles": [
                raw_article("FLOAT", json!({"quantity": 3.9, "quantity_returned": 1.2})),
                raw_article("BOOL", json!({"quantity": true, "quantity_returned": false})),
                raw_article("STRING", json!({"quantity": "two", "quantity_returned": "one"})),
                raw_article("MISSING", json!({"quantity": null, "quantity_returned": null})),
            ],
        })));
        let quantities: Vec<(u32, u32)> = order
            .items
            .iter()
            .map(|item| (item.quantity, item.quantity_returned))
            .collect();
        assert_eq!(quantities, vec![(3, 1), (1, 0), (1, 0), (1, 0)]);
    }

    #[test]
    fn repairs_out_of_range_quantities() {
        let order = normalize(&raw_order(json!({
            "articles": [
                raw_article("OVER", json!({"quantity": 2, "quantity_returned": 5})),
                raw_article("NEG", json!({"quantity": 2, "quantity_returned": -1, "price": -4.0})),
            ],
        })));
        assert_eq!(order.items[0].quantity_returned, 2);
        assert_eq!(order.items[1].quantity_returned, 0);
        assert_eq!(order.items[1].price, 0.0);

        let order = normalize(&raw_order(json!({
            "articles": [
                raw_article("ZERO", json!({"quantity": 0, "quantity_returned": 3})),
                raw_article("NEGATIVE", json!({"quantity": -2})),
            ],
        })));
        let quantities: Vec<(u32, u32)> = order
            .items
            .iter()
            .map(|item| (item.quantity, item.quantity_returned))
            .collect();
        assert_eq!(quantities, vec![(1, 1), (1, 0)]);
    }

    #[test]
    fn ignores_unknown_fields_and_defaults_optional_ones() {
        let raw = json!({
            "order_number": 4711,
            "order_date": "2025-12-01",
            "loyalty_tier": "gold",
            "articles": [{"sku": "MIN", "gift_wrap": true}, "garbage"],
        });

        let order = OrderNormalizer::new(21).normalize(&raw).expect("normalizes");
        assert_eq!(order.order_number, "4711");
        assert_eq!(order.email, "");
        assert_eq!(order.recipient, "");
        assert_eq!(order.return_window_days, 21);
        assert_eq!(order.items.len(), 1);
        let item = &order.items[0];
        assert_eq!(item.name, "");
        assert_eq!(item.quantity, 1);
        assert_eq!(item.price, 0.0);
        assert_eq!(item.category, None);
    }

    #[test]
    fn negative_window_clamps_to_zero() {
        let order = normalize(&raw_order(json!({"return_window_days": -5})));
        assert_eq!(order.return_window_days, 0);
    }
}
