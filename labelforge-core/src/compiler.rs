//! Template Compiler - bind, then apply rules
//!
//! Compilation is a pure function of (template, context, rules). It cannot
//! fail: anything that does not resolve is left as authored.

use serde::{Deserialize, Serialize};

use crate::binding::bind;
use crate::context::ContextRecord;
use crate::hashing::label_fingerprint;
use crate::rules::{applicable_rules, apply_rules, Rule, RuleOutcome};
use crate::templates::TemplateVariant;

/// One compiled label instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompiledLabel {
    pub template: TemplateVariant,
    pub applied_rules: Vec<String>,
    /// SHA-256 of the compiled template's canonical JSON
    pub fingerprint: String,
}

/// A compiled label, the group it prints in, and how many copies print
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelInstance {
    pub record_id: String,
    /// `None` for the order-level shipping label
    pub product_id: Option<String>,
    pub group_key: String,
    pub copies: u32,
    pub label: CompiledLabel,
}

pub fn compile(template: &TemplateVariant, ctx: &ContextRecord, rules: &[Rule]) -> CompiledLabel {
    let (label, _) = compile_with_outcomes(template, ctx, rules);
    label
}

/// Like [`compile`], also returning what each applied rule did
pub fn compile_with_outcomes(
    template: &TemplateVariant,
    ctx: &ContextRecord,
    rules: &[Rule],
) -> (CompiledLabel, Vec<RuleOutcome>) {
    let mut compiled = bind(template, ctx);
    let ordered = applicable_rules(rules, ctx);
    let outcomes = apply_rules(&mut compiled, &ordered, ctx);

    let fingerprint = label_fingerprint(&compiled).unwrap_or_else(|e| {
        tracing::warn!(template = %template.id, error = %e, "fingerprint unavailable");
        String::new()
    });

    let label = CompiledLabel {
        template: compiled,
        applied_rules: outcomes.iter().map(|o| o.rule_id.clone()).collect(),
        fingerprint,
    };
    (label, outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{Action, Condition, Combinator, Operator};
    use serde_json::json;

    fn template() -> TemplateVariant {
        serde_json::from_value(json!({
            "id": "bread",
            "name": "Bread",
            "units": { "widthIn": 2.0, "heightIn": 1.0, "dpi": 203 },
            "elements": [
                { "id": "title", "type": "text", "x": 0, "y": 0, "width": 100, "height": 30,
                  "content": "{{product.title}}" },
                { "id": "priority-badge", "type": "text", "x": 70, "y": 0, "width": 30,
                  "height": 20, "content": "", "visible": false }
            ]
        }))
        .unwrap()
    }

    fn urgent_rule() -> Rule {
        Rule {
            id: "high-priority-indicator".into(),
            name: "High Priority Orders".into(),
            description: None,
            category: None,
            conditions: vec![Condition {
                field: "order.priority".into(),
                operator: Operator::Equals,
                value: json!("URGENT"),
                negate: false,
            }],
            operator: Combinator::And,
            actions: vec![Action::ShowElement {
                target: "priority-badge".into(),
                value: Some(json!("URGENT")),
            }],
            enabled: true,
            priority: 10,
        }
    }

    fn ctx(priority: &str) -> ContextRecord {
        ContextRecord::from_value(json!({
            "order": { "priority": priority },
            "product": { "title": "Sourdough Loaf" }
        }))
    }

    #[test]
    fn test_binds_then_applies_rules() {
        let compiled = compile(&template(), &ctx("URGENT"), &[urgent_rule()]);
        let badge = compiled.template.element("priority-badge").unwrap();
        assert!(badge.visible);
        assert_eq!(badge.content(), Some("URGENT"));
        assert_eq!(compiled.template.element("title").unwrap().content(), Some("Sourdough Loaf"));
        assert_eq!(compiled.applied_rules, vec!["high-priority-indicator".to_string()]);
        assert_eq!(compiled.fingerprint.len(), 64);
    }

    #[test]
    fn test_no_matching_rule_equals_binding() {
        let t = template();
        let c = ctx("LOW");
        let compiled = compile(&t, &c, &[urgent_rule()]);
        assert_eq!(compiled.template, bind(&t, &c));
        assert!(compiled.applied_rules.is_empty());
        assert!(!compiled.template.element("priority-badge").unwrap().visible);
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let a = compile(&template(), &ctx("URGENT"), &[urgent_rule()]);
        let b = compile(&template(), &ctx("URGENT"), &[urgent_rule()]);
        let c = compile(&template(), &ctx("LOW"), &[urgent_rule()]);
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_ne!(a.fingerprint, c.fingerprint);
    }
}
