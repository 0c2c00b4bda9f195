//! Source Records - Orders, Line Items, Vendors
//!
//! Read-only shapes fetched from the record source, plus label counting.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

pub type RecordId = String;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRecord {
    pub id: RecordId,
    #[serde(default)]
    pub order_number: Option<String>,
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub total: Option<f64>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub sales_window_id: Option<String>,
    #[serde(default)]
    pub expected_delivery_date: Option<String>,
    #[serde(default)]
    pub shipping_address: Option<Address>,
    #[serde(default)]
    pub printer_id: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub custom_fields: Map<String, Value>,
    #[serde(default)]
    pub items: Vec<LineItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    #[serde(default)]
    pub street: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub product_id: String,
    pub product_name: String,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    #[serde(default)]
    pub unit_price: Option<f64>,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub allergens: Option<String>,
    #[serde(default)]
    pub ingredients: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    /// Per-product override of labels printed per unit
    #[serde(default)]
    pub labels_per_item: Option<u32>,
}

fn default_quantity() -> u32 { 1 }

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorProfile {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub business_name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub logo: Option<String>,
}

/// Caller overrides for label counting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelCountOverrides {
    #[serde(default)]
    pub include_shipping_label: bool,
    #[serde(default = "default_labels_per_product")]
    pub labels_per_product: u32,
    /// product id -> exact label count, replacing the computed count
    #[serde(default)]
    pub custom_label_counts: HashMap<String, u32>,
}

fn default_labels_per_product() -> u32 { 1 }

impl Default for LabelCountOverrides {
    fn default() -> Self {
        Self {
            include_shipping_label: false,
            labels_per_product: default_labels_per_product(),
            custom_label_counts: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelBreakdown {
    pub product_id: String,
    pub product_name: String,
    pub label_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelCount {
    pub product_labels: u32,
    pub shipping_labels: u32,
    pub total_labels: u32,
    pub breakdown: Vec<LabelBreakdown>,
}

/// Labels for a single line item under `overrides`
pub fn item_label_count(item: &LineItem, overrides: &LabelCountOverrides) -> u32 {
    if let Some(&custom) = overrides
        .custom_label_counts
        .get(&item.product_id)
        .filter(|&&c| c > 0)
    {
        return custom;
    }
    let per_unit = item.labels_per_item.unwrap_or(overrides.labels_per_product);
    item.quantity.saturating_mul(per_unit)
}

/// Estimate how many labels a record produces
pub fn estimate_label_count(record: &SourceRecord, overrides: &LabelCountOverrides) -> LabelCount {
    let breakdown: Vec<LabelBreakdown> = record
        .items
        .iter()
        .map(|item| LabelBreakdown {
            product_id: item.product_id.clone(),
            product_name: item.product_name.clone(),
            label_count: item_label_count(item, overrides),
        })
        .collect();

    let product_labels = breakdown.iter().fold(0u32, |acc, b| acc.saturating_add(b.label_count));
    let shipping_labels = u32::from(overrides.include_shipping_label);

    LabelCount {
        product_labels,
        shipping_labels,
        total_labels: product_labels.saturating_add(shipping_labels),
        breakdown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, qty: u32) -> LineItem {
        LineItem {
            product_id: id.to_string(),
            product_name: format!("Product {}", id),
            quantity: qty,
            unit_price: None,
            sku: None,
            category: None,
            description: None,
            allergens: None,
            ingredients: None,
            image_url: None,
            labels_per_item: None,
        }
    }

    #[test]
    fn test_default_one_label_per_unit() {
        let record = SourceRecord {
            id: "o-1".into(),
            items: vec![item("a", 2), item("b", 1)],
            ..Default::default()
        };
        let count = estimate_label_count(&record, &LabelCountOverrides::default());
        assert_eq!(count.product_labels, 3);
        assert_eq!(count.shipping_labels, 0);
        assert_eq!(count.total_labels, 3);
        assert_eq!(count.breakdown.len(), 2);
        assert_eq!(count.breakdown[0].label_count, 2);
    }

    #[test]
    fn test_overrides() {
        let mut special = item("b", 3);
        special.labels_per_item = Some(2);
        let record = SourceRecord {
            id: "o-1".into(),
            items: vec![item("a", 2), special, item("c", 5)],
            ..Default::default()
        };
        let mut overrides = LabelCountOverrides {
            include_shipping_label: true,
            labels_per_product: 1,
            ..Default::default()
        };
        overrides.custom_label_counts.insert("c".into(), 1);

        let count = estimate_label_count(&record, &overrides);
        assert_eq!(count.product_labels, 2 + 6 + 1);
        assert_eq!(count.shipping_labels, 1);
        assert_eq!(count.total_labels, 10);
    }

    #[test]
    fn test_counts_saturate_instead_of_overflowing() {
        let record = SourceRecord {
            id: "o-1".into(),
            items: vec![item("a", u32::MAX), item("b", 7)],
            ..Default::default()
        };
        let overrides = LabelCountOverrides {
            include_shipping_label: true,
            labels_per_product: 2,
            ..Default::default()
        };
        let count = estimate_label_count(&record, &overrides);
        assert_eq!(count.product_labels, u32::MAX);
        assert_eq!(count.shipping_labels, 1);
        assert_eq!(count.total_labels, u32::MAX);
    }

    #[test]
    fn test_record_deserializes_with_defaults() {
        let record: SourceRecord = serde_json::from_str(
            r#"{ "id": "o-9", "expectedDeliveryDate": "2026-10-17",
                 "items": [ { "productId": "p1", "productName": "Rye" } ] }"#,
        )
        .unwrap();
        assert_eq!(record.items[0].quantity, 1);
        assert!(record.shipping_address.is_none());
        assert_eq!(record.expected_delivery_date.as_deref(), Some("2026-10-17"));
    }
}
