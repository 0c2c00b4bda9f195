//! Fingerprints - SHA-256 over canonical JSON
//!
//! Compiling the same template against the same context must give the same
//! fingerprint on every run and every machine.

use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

pub fn sha256_hex(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Canonical JSON: object keys sorted at every depth, no whitespace
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let v = serde_json::to_value(value)?;
    serde_json::to_string(&sorted(v))
}

fn sorted(v: Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(entries.into_iter().map(|(k, v)| (k, sorted(v))).collect::<Map<_, _>>())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sorted).collect()),
        other => other,
    }
}

/// Fingerprint of a compiled label's template
pub fn label_fingerprint<T: Serialize>(compiled: &T) -> Result<String, serde_json::Error> {
    Ok(sha256_hex(canonical_json(compiled)?.as_bytes()))
}

/// Identity of a batch for audit logs:
/// sha256(template_id : template_version : sorted record ids : engine_version)
pub fn batch_hash(
    template_id: &str,
    template_version: &str,
    record_ids: &[String],
    engine_version: &str,
) -> String {
    let mut ids: Vec<&str> = record_ids.iter().map(String::as_str).collect();
    ids.sort_unstable();
    let combined = format!(
        "{}:{}:{}:{}",
        template_id,
        template_version,
        ids.join(","),
        engine_version
    );
    sha256_hex(combined.as_bytes())
}
