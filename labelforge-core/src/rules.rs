//! Rule Engine - Conditional Template Mutations
//!
//! Rules never touch source data. They read the context and rewrite the
//! in-memory copy of a template. When two rules touch the same element the
//! one applied last wins, so priority order is the only conflict policy.

use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use thiserror::Error;

use crate::binding::interpolate;
use crate::context::ContextRecord;
use crate::path::{as_number, display_value};
use crate::templates::{Element, ElementStyle, TemplateVariant};

#[derive(Debug, Error, PartialEq)]
pub enum RuleError {
    #[error("Rule id is required")]
    MissingId,

    #[error("Rule {0} has no name")]
    MissingName(String),

    #[error("Rule {0}: {1}")]
    InvalidCondition(String, String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<RuleCategory>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub operator: Combinator,
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub priority: i32,
}

fn default_true() -> bool { true }

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleCategory {
    Priority,
    Shipping,
    Product,
    Customer,
    Business,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Combinator {
    #[default]
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub field: String,
    pub operator: Operator,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub negate: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    Contains,
    InArray,
    NotContains,
    StartsWith,
    EndsWith,
    GreaterThanOrEqual,
    LessThanOrEqual,
    NotInArray,
    IsEmpty,
    IsNotEmpty,
    Exists,
    NotExists,
    MatchesRegex,
    IsBetween,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    ShowElement {
        target: String,
        #[serde(default)]
        value: Option<Value>,
    },
    HideElement {
        target: String,
    },
    SetText {
        target: String,
        #[serde(default)]
        value: Value,
    },
    SetStyle {
        target: String,
        style: ElementStyle,
    },
    AddElement {
        element: Element,
    },
    SetValue {
        target: String,
        #[serde(default)]
        value: Value,
    },
    RemoveElement {
        target: String,
    },
}

/// What a single action did to the template
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionEffect {
    Applied,
    /// Target id not present; nothing changed
    Missed,
}

/// Per-rule application report, used for logging and previews
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleOutcome {
    pub rule_id: String,
    pub applied: usize,
    pub missed_targets: Vec<String>,
}

impl Rule {
    /// Structural checks done when rules are loaded
    pub fn check(&self) -> Result<(), RuleError> {
        if self.id.trim().is_empty() {
            return Err(RuleError::MissingId);
        }
        if self.name.trim().is_empty() {
            return Err(RuleError::MissingName(self.id.clone()));
        }
        for condition in &self.conditions {
            if condition.field.trim().is_empty() {
                return Err(RuleError::InvalidCondition(self.id.clone(), "empty field path".into()));
            }
            if condition.operator == Operator::IsBetween
                && !matches!(&condition.value, Value::Array(v) if v.len() == 2)
            {
                return Err(RuleError::InvalidCondition(
                    self.id.clone(),
                    "is_between expects a two-element array".into(),
                ));
            }
        }
        Ok(())
    }

    pub fn matches(&self, ctx: &ContextRecord) -> bool {
        if self.conditions.is_empty() {
            return true;
        }
        match self.operator {
            Combinator::And => self.conditions.iter().all(|c| c.matches(ctx)),
            Combinator::Or => self.conditions.iter().any(|c| c.matches(ctx)),
        }
    }
}

impl Condition {
    pub fn matches(&self, ctx: &ContextRecord) -> bool {
        let actual = ctx.resolve(&self.field);
        let expected = match &self.value {
            Value::String(s) if s.contains("{{") => Value::String(interpolate(s, ctx)),
            other => other.clone(),
        };
        let result = compare(actual, &expected, self.operator);
        result != self.negate
    }
}

/// Evaluate one operator. Never panics; anything that cannot be compared
/// is simply `false`.
pub fn compare(actual: Option<&Value>, expected: &Value, op: Operator) -> bool {
    match op {
        Operator::Equals => values_equal(actual, expected),
        Operator::NotEquals => !values_equal(actual, expected),
        Operator::GreaterThan => numeric(actual, expected) == Some(Ordering::Greater),
        Operator::LessThan => numeric(actual, expected) == Some(Ordering::Less),
        Operator::GreaterThanOrEqual => {
            matches!(numeric(actual, expected), Some(Ordering::Greater | Ordering::Equal))
        }
        Operator::LessThanOrEqual => {
            matches!(numeric(actual, expected), Some(Ordering::Less | Ordering::Equal))
        }
        Operator::Contains => text_test(actual, expected, |a, e| a.contains(e)),
        Operator::NotContains => !text_test(actual, expected, |a, e| a.contains(e)),
        Operator::StartsWith => text_test(actual, expected, |a, e| a.starts_with(e)),
        Operator::EndsWith => text_test(actual, expected, |a, e| a.ends_with(e)),
        // Membership of the actual value in the rule's array, not the reverse
        Operator::InArray => in_array(actual, expected),
        Operator::NotInArray => !in_array(actual, expected),
        Operator::IsEmpty => is_empty(actual),
        Operator::IsNotEmpty => !is_empty(actual),
        Operator::Exists => actual.is_some(),
        Operator::NotExists => actual.is_none(),
        Operator::MatchesRegex => matches_regex(actual, expected),
        Operator::IsBetween => is_between(actual, expected),
    }
}

fn values_equal(actual: Option<&Value>, expected: &Value) -> bool {
    match actual {
        None => expected.is_null(),
        Some(a) => json_equal(a, expected),
    }
}

fn json_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn numeric(actual: Option<&Value>, expected: &Value) -> Option<Ordering> {
    let a = as_number(actual?)?;
    let e = as_number(expected)?;
    a.partial_cmp(&e)
}

fn text_test(actual: Option<&Value>, expected: &Value, test: impl Fn(&str, &str) -> bool) -> bool {
    match actual {
        Some(a) => test(
            &display_value(a).to_lowercase(),
            &display_value(expected).to_lowercase(),
        ),
        None => false,
    }
}

fn in_array(actual: Option<&Value>, expected: &Value) -> bool {
    match (actual, expected) {
        (Some(a), Value::Array(options)) => options.iter().any(|o| json_equal(a, o)),
        _ => false,
    }
}

fn is_empty(actual: Option<&Value>) -> bool {
    match actual {
        None => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Array(a)) => a.is_empty(),
        Some(_) => false,
    }
}

fn matches_regex(actual: Option<&Value>, expected: &Value) -> bool {
    let Some(actual) = actual else {
        return false;
    };
    match RegexBuilder::new(&display_value(expected)).case_insensitive(true).build() {
        Ok(re) => re.is_match(&display_value(actual)),
        Err(e) => {
            tracing::debug!(pattern = %expected, error = %e, "invalid rule regex");
            false
        }
    }
}

fn is_between(actual: Option<&Value>, expected: &Value) -> bool {
    let Value::Array(bounds) = expected else {
        return false;
    };
    let (Some(lo), Some(hi)) = (bounds.first(), bounds.get(1)) else {
        return false;
    };
    match (actual.and_then(as_number), as_number(lo), as_number(hi)) {
        (Some(v), Some(lo), Some(hi)) => v >= lo && v <= hi,
        _ => false,
    }
}

/// Enabled rules whose conditions match, highest priority first. Equal
/// priorities keep their authoring order.
pub fn applicable_rules<'a>(rules: &'a [Rule], ctx: &ContextRecord) -> Vec<&'a Rule> {
    let mut matched: Vec<&Rule> = rules
        .iter()
        .filter(|r| r.enabled)
        .filter(|r| r.matches(ctx))
        .collect();
    matched.sort_by(|a, b| b.priority.cmp(&a.priority));
    matched
}

impl Action {
    pub fn apply(&self, template: &mut TemplateVariant, ctx: &ContextRecord) -> ActionEffect {
        match self {
            Action::ShowElement { target, value } => {
                with_target(template, target, |el| {
                    el.visible = true;
                    if let Some(value) = value.as_ref().filter(|v| truthy(v)) {
                        el.set_content(resolve_value(value, ctx));
                    }
                })
            }
            Action::HideElement { target } => {
                with_target(template, target, |el| el.visible = false)
            }
            Action::SetText { target, value } | Action::SetValue { target, value } => {
                let text = resolve_value(value, ctx);
                with_target(template, target, |el| el.set_content(text))
            }
            Action::SetStyle { target, style } => {
                with_target(template, target, |el| el.style.merge(style))
            }
            Action::AddElement { element } => {
                if template.element(&element.id).is_some() {
                    return ActionEffect::Missed;
                }
                if let Err(e) = element.check_geometry() {
                    tracing::debug!(error = %e, "add_element skipped");
                    return ActionEffect::Missed;
                }
                template.elements.push(element.clone());
                ActionEffect::Applied
            }
            Action::RemoveElement { target } => {
                let before = template.elements.len();
                template.elements.retain(|e| &e.id != target);
                if template.elements.len() < before {
                    ActionEffect::Applied
                } else {
                    ActionEffect::Missed
                }
            }
        }
    }

    pub fn target(&self) -> &str {
        match self {
            Action::ShowElement { target, .. }
            | Action::HideElement { target }
            | Action::SetText { target, .. }
            | Action::SetStyle { target, .. }
            | Action::SetValue { target, .. }
            | Action::RemoveElement { target } => target,
            Action::AddElement { element } => &element.id,
        }
    }
}

fn with_target(
    template: &mut TemplateVariant,
    target: &str,
    f: impl FnOnce(&mut Element),
) -> ActionEffect {
    match template.element_mut(target) {
        Some(el) => {
            f(el);
            ActionEffect::Applied
        }
        None => ActionEffect::Missed,
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0),
        _ => true,
    }
}

fn resolve_value(value: &Value, ctx: &ContextRecord) -> String {
    match value {
        Value::String(s) => interpolate(s, ctx),
        other => display_value(other),
    }
}

/// Apply `rules` (already ordered) to `template`, in order
pub fn apply_rules(
    template: &mut TemplateVariant,
    rules: &[&Rule],
    ctx: &ContextRecord,
) -> Vec<RuleOutcome> {
    rules
        .iter()
        .map(|rule| {
            let mut outcome = RuleOutcome {
                rule_id: rule.id.clone(),
                applied: 0,
                missed_targets: vec![],
            };
            for action in &rule.actions {
                match action.apply(template, ctx) {
                    ActionEffect::Applied => outcome.applied += 1,
                    ActionEffect::Missed => {
                        outcome.missed_targets.push(action.target().to_string())
                    }
                }
            }
            tracing::debug!(
                rule = %rule.id,
                priority = rule.priority,
                applied = outcome.applied,
                missed = outcome.missed_targets.len(),
                "rule applied"
            );
            outcome
        })
        .collect()
}
