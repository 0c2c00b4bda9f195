//! Dot-path lookups into context records
//!
//! Missing data is normal for labels, so every lookup is soft: a path that
//! runs off the record yields `None`.

use serde_json::Value;

/// Resolve `path` (e.g. `order.customerName`, `order.items.0.sku`) against
/// `root`. Null leaves count as missing.
pub fn resolve<'a>(path: &str, root: &'a Value) -> Option<&'a Value> {
    let path = path.trim();
    if path.is_empty() {
        return None;
    }
    let mut current = root;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    if current.is_null() {
        None
    } else {
        Some(current)
    }
}

/// String form used when a value is substituted into label text
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Lenient numeric coercion: numbers as-is, numeric strings parsed
pub fn as_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if n.is_nan() {
        None
    } else {
        Some(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> Value {
        json!({
            "order": {
                "customerName": "Ada",
                "total": 42.5,
                "notes": null,
                "items": [ { "sku": "LOAF-1" } ]
            },
            "product": "flat"
        })
    }

    #[test]
    fn test_resolves_nested() {
        let c = ctx();
        assert_eq!(resolve("order.customerName", &c), Some(&json!("Ada")));
        assert_eq!(resolve(" order.total ", &c), Some(&json!(42.5)));
        assert_eq!(resolve("order.items.0.sku", &c), Some(&json!("LOAF-1")));
    }

    #[test]
    fn test_soft_fails() {
        let c = ctx();
        assert_eq!(resolve("order.missing", &c), None);
        assert_eq!(resolve("order.notes", &c), None);
        assert_eq!(resolve("order.notes.inner", &c), None);
        assert_eq!(resolve("product.title", &c), None);
        assert_eq!(resolve("order.customerName.first", &c), None);
        assert_eq!(resolve("order.items.7.sku", &c), None);
        assert_eq!(resolve("order.items.x", &c), None);
        assert_eq!(resolve("", &c), None);
        assert_eq!(resolve("vendor", &Value::Null), None);
    }

    #[test]
    fn test_display_value() {
        assert_eq!(display_value(&json!("Loaf")), "Loaf");
        assert_eq!(display_value(&json!(3)), "3");
        assert_eq!(display_value(&json!(2.5)), "2.5");
        assert_eq!(display_value(&json!(true)), "true");
        assert_eq!(display_value(&json!(["a", 1])), r#"["a",1]"#);
    }

    #[test]
    fn test_as_number() {
        assert_eq!(as_number(&json!("12.5")), Some(12.5));
        assert_eq!(as_number(&json!(7)), Some(7.0));
        assert_eq!(as_number(&json!("abc")), None);
        assert_eq!(as_number(&json!("NaN")), None);
        assert_eq!(as_number(&json!(null)), None);
    }
}
