//! Context Records - the per-label data envelope
//!
//! One context is built for every compiled label and never changes while
//! that label compiles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::path;
use crate::records::{LineItem, SourceRecord, VendorProfile};

/// Environment/time/batch metadata shared by every label in a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemInfo {
    pub current_date: String,
    pub current_time: String,
    pub print_date: String,
    pub print_time: String,
    pub timezone: String,
    #[serde(default)]
    pub batch_number: Option<String>,
    #[serde(default)]
    pub operator_name: Option<String>,
}

impl SystemInfo {
    pub fn at(
        now: DateTime<Utc>,
        batch_number: Option<String>,
        operator_name: Option<String>,
    ) -> Self {
        let date = now.format("%Y-%m-%d").to_string();
        let time = now.format("%H:%M:%S").to_string();
        Self {
            current_date: date.clone(),
            current_time: time.clone(),
            print_date: date,
            print_time: time,
            timezone: "UTC".to_string(),
            batch_number,
            operator_name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextRecord(Value);

impl ContextRecord {
    pub fn new(
        order: Value,
        product: Value,
        vendor: Value,
        system: Value,
        custom_fields: Map<String, Value>,
    ) -> Self {
        Self(json!({
            "order": order,
            "product": product,
            "vendor": vendor,
            "system": system,
            "customFields": Value::Object(custom_fields),
        }))
    }

    /// Wrap an already-assembled envelope
    pub fn from_value(value: Value) -> Self {
        Self(value)
    }

    /// Context for one label: the order, optionally one of its line items
    pub fn for_item(
        record: &SourceRecord,
        item: Option<&LineItem>,
        vendor: &VendorProfile,
        system: &SystemInfo,
    ) -> Self {
        Self::new(
            order_group(record),
            item.map_or_else(|| json!({}), product_group),
            serde_json::to_value(vendor).unwrap_or_else(|_| json!({})),
            serde_json::to_value(system).unwrap_or_else(|_| json!({})),
            record.custom_fields.clone(),
        )
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn resolve(&self, path: &str) -> Option<&Value> {
        path::resolve(path, &self.0)
    }
}

fn order_group(record: &SourceRecord) -> Value {
    let mut order = match serde_json::to_value(record) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    };
    order.remove("customFields");
    if let Some(date) = &record.expected_delivery_date {
        order.insert("deliveryDate".into(), Value::String(date.clone()));
    }
    if let Some(city) = record.shipping_address.as_ref().and_then(|a| a.city.clone()) {
        order.insert("city".into(), Value::String(city));
    }
    order.insert("itemCount".into(), json!(record.items.len()));
    Value::Object(order)
}

fn product_group(item: &LineItem) -> Value {
    let mut product = match serde_json::to_value(item) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    };
    product.insert("id".into(), Value::String(item.product_id.clone()));
    product.insert("name".into(), Value::String(item.product_name.clone()));
    product.insert("title".into(), Value::String(item.product_name.clone()));
    if let Some(price) = item.unit_price {
        product.insert("price".into(), json!(price));
    }
    Value::Object(product)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::Address;
    use chrono::TimeZone;

    #[test]
    fn test_for_item_groups() {
        let record = SourceRecord {
            id: "o-1".into(),
            customer_name: Some("Ada".into()),
            expected_delivery_date: Some("2026-10-17".into()),
            shipping_address: Some(Address { city: Some("Portland".into()), ..Default::default() }),
            items: vec![LineItem {
                product_id: "p-1".into(),
                product_name: "Sourdough Loaf".into(),
                quantity: 2,
                unit_price: Some(8.5),
                sku: Some("SD-1".into()),
                category: Some("Breads".into()),
                description: None,
                allergens: None,
                ingredients: None,
                image_url: None,
                labels_per_item: None,
            }],
            ..Default::default()
        };
        let now = Utc.with_ymd_and_hms(2026, 10, 16, 9, 30, 0).unwrap();
        let system = SystemInfo::at(now, None, None);
        let vendor = VendorProfile::default();
        let ctx = ContextRecord::for_item(&record, record.items.first(), &vendor, &system);

        assert_eq!(ctx.resolve("order.customerName"), Some(&json!("Ada")));
        assert_eq!(ctx.resolve("order.deliveryDate"), Some(&json!("2026-10-17")));
        assert_eq!(ctx.resolve("order.city"), Some(&json!("Portland")));
        assert_eq!(ctx.resolve("product.title"), Some(&json!("Sourdough Loaf")));
        assert_eq!(ctx.resolve("product.price"), Some(&json!(8.5)));
        assert_eq!(ctx.resolve("system.printDate"), Some(&json!("2026-10-16")));
        assert_eq!(ctx.resolve("order.notes"), None);
    }

    #[test]
    fn test_order_level_context_has_empty_product() {
        let record = SourceRecord { id: "o-2".into(), ..Default::default() };
        let system = SystemInfo::at(Utc::now(), Some("B-1".into()), None);
        let ctx = ContextRecord::for_item(&record, None, &VendorProfile::default(), &system);
        assert_eq!(ctx.resolve("product.name"), None);
        assert_eq!(ctx.resolve("system.batchNumber"), Some(&json!("B-1")));
    }
}
