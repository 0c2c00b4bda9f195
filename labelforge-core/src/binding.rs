//! Data Binding - `{{path}}` placeholder substitution
//!
//! Unresolved placeholders are left in place.

use serde_json::Value;

use crate::context::ContextRecord;
use crate::path::display_value;
use crate::templates::TemplateVariant;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// Substitute every placeholder in `text` against `ctx`
pub fn interpolate(text: &str, ctx: &ContextRecord) -> String {
    if !text.contains(OPEN) {
        return text.to_string();
    }
    replace_placeholders(text, |expr| evaluate(expr, ctx))
}

/// Bind a template to a context: placeholders in every string field, then
/// `bindingKey` feeds. The input is untouched.
pub fn bind(template: &TemplateVariant, ctx: &ContextRecord) -> TemplateVariant {
    let mut bound = match serde_json::to_value(template) {
        Ok(mut tree) => {
            substitute_tree(&mut tree, ctx);
            match serde_json::from_value::<TemplateVariant>(tree) {
                Ok(t) => t,
                Err(e) => {
                    tracing::warn!(
                        template = %template.id,
                        error = %e,
                        "bound template no longer parses, binding skipped"
                    );
                    template.clone()
                }
            }
        }
        Err(e) => {
            tracing::warn!(
                template = %template.id,
                error = %e,
                "template serialization failed, binding skipped"
            );
            template.clone()
        }
    };

    for element in &mut bound.elements {
        let Some(key) = element.binding_key.as_deref() else {
            continue;
        };
        match ctx.resolve(key) {
            Some(value) => {
                let value = display_value(value);
                element.set_content(value);
            }
            None => tracing::debug!(element = %element.id, key, "binding key unresolved"),
        }
    }

    bound
}

fn substitute_tree(value: &mut Value, ctx: &ContextRecord) {
    match value {
        Value::String(s) if s.contains(OPEN) => {
            *s = interpolate(s, ctx);
        }
        Value::Array(items) => items.iter_mut().for_each(|v| substitute_tree(v, ctx)),
        Value::Object(map) => map.values_mut().for_each(|v| substitute_tree(v, ctx)),
        _ => {}
    }
}

/// `path | filter | filter`
fn evaluate(expr: &str, ctx: &ContextRecord) -> Option<String> {
    let mut parts = expr.split('|');
    let path = parts.next()?.trim();
    let value = ctx.resolve(path)?;
    let mut text = display_value(value);
    for filter in parts {
        text = apply_filter(filter.trim(), text);
    }
    Some(text)
}

fn apply_filter(filter: &str, text: String) -> String {
    match filter {
        "uppercase" => text.to_uppercase(),
        "lowercase" => text.to_lowercase(),
        "trim" => text.trim().to_string(),
        "capitalize" => {
            let mut chars = text.chars();
            match chars.next() {
                Some(first) => {
                    let tail = chars.as_str().to_lowercase();
                    first.to_uppercase().chain(tail.chars()).collect()
                }
                None => text,
            }
        }
        _ => text,
    }
}

/// Replace `{{expr}}` tokens (expr non-empty, no `}`) using `f`; tokens for
/// which `f` returns `None` are copied through verbatim.
fn replace_placeholders(text: &str, mut f: impl FnMut(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find(OPEN) {
        out.push_str(&rest[..start]);
        let after = &rest[start + OPEN.len()..];
        let inner_len = after.find('}').unwrap_or(after.len());
        let closes = inner_len > 0 && after[inner_len..].starts_with(CLOSE);
        if closes {
            let expr = &after[..inner_len];
            match f(expr) {
                Some(value) => out.push_str(&value),
                None => {
                    out.push_str(OPEN);
                    out.push_str(expr);
                    out.push_str(CLOSE);
                }
            }
            rest = &after[inner_len + CLOSE.len()..];
        } else {
            // Not a token here; emit one brace and rescan from the next char
            out.push('{');
            rest = &rest[start + 1..];
        }
    }
    out.push_str(rest);
    out
}
