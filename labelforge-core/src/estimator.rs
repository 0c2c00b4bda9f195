//! Job estimation - time, cost, complexity

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::config::EngineConfig;
use crate::grouping::PrintJob;
use crate::templates::{ElementType, TemplateVariant};

pub const LARGE_BATCH_WARNING: &str = "Large batch - consider splitting for better performance";
pub const COMPLEX_TEMPLATE_WARNING: &str = "Complex template may increase processing time";
pub const SINGLE_PRINTER_WARNING: &str =
    "All print jobs are assigned to a single printer - consider load balancing";

/// Jobs below this many labels are flagged as inefficient
pub const SMALL_JOB_LABELS: u32 = 5;
/// More jobs than this on one printer suggests spreading the load
pub const SINGLE_PRINTER_MAX_JOBS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Medium,
    Complex,
}

impl Complexity {
    pub fn for_element_count(n: usize) -> Self {
        match n {
            n if n > 10 => Complexity::Complex,
            n if n > 5 => Complexity::Medium,
            _ => Complexity::Simple,
        }
    }

    pub fn multiplier(self) -> f64 {
        match self {
            Complexity::Simple => 1.0,
            Complexity::Medium => 1.5,
            Complexity::Complex => 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Estimate {
    /// Whole seconds, rounded up
    pub time_seconds: u64,
    pub cost: f64,
    pub complexity: Complexity,
    pub multiplier: f64,
    pub warnings: Vec<String>,
}

/// Per-label multiplier for `template`: complexity, then symbols, then images
pub fn template_multiplier(template: &TemplateVariant) -> (Complexity, f64) {
    let complexity = Complexity::for_element_count(template.elements.len());
    let mut m = complexity.multiplier();
    if template.has_kind(ElementType::Barcode) || template.has_kind(ElementType::Qr) {
        m *= 1.2;
    }
    if template.has_kind(ElementType::Image) {
        m *= 1.5;
    }
    (complexity, m)
}

pub fn estimate(label_count: u32, template: &TemplateVariant, config: &EngineConfig) -> Estimate {
    let (complexity, multiplier) = template_multiplier(template);
    let n = label_count as f64;

    let time_seconds = (n * config.base_time_per_label * multiplier).ceil().max(0.0) as u64;
    let cost = round2(n * config.base_cost_per_label * multiplier);

    let mut warnings = vec![];
    if label_count > config.large_batch_threshold {
        warnings.push(LARGE_BATCH_WARNING.to_string());
    }
    if complexity == Complexity::Complex {
        warnings.push(COMPLEX_TEMPLATE_WARNING.to_string());
    }

    Estimate {
        time_seconds,
        cost,
        complexity,
        multiplier,
        warnings,
    }
}

/// Advisories about how a batch's jobs are spread across printers
pub fn job_advisories(jobs: &[PrintJob]) -> Vec<String> {
    let mut warnings = vec![];
    let small = jobs.iter().filter(|j| j.label_count < SMALL_JOB_LABELS).count();
    if small > 0 {
        warnings.push(format!(
            "{} print jobs have fewer than {} labels (may be inefficient)",
            small, SMALL_JOB_LABELS
        ));
    }
    let printers: HashSet<&str> = jobs.iter().map(|j| j.printer_id.as_str()).collect();
    if printers.len() == 1 && jobs.len() > SINGLE_PRINTER_MAX_JOBS {
        warnings.push(SINGLE_PRINTER_WARNING.to_string());
    }
    warnings
}

pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn template_with(elements: Vec<Value>) -> TemplateVariant {
        serde_json::from_value(json!({
            "id": "t",
            "name": "T",
            "units": { "widthIn": 4.0, "heightIn": 6.0, "dpi": 203 },
            "elements": elements
        }))
        .unwrap()
    }

    fn text(i: usize) -> Value {
        json!({
            "id": format!("text-{}", i), "type": "text", "x": 0, "y": 0, "width": 10, "height": 5
        })
    }

    #[test]
    fn test_simple_template() {
        let t = template_with((0..3).map(text).collect());
        let e = estimate(10, &t, &EngineConfig::default());
        assert_eq!(e.complexity, Complexity::Simple);
        assert_eq!(e.time_seconds, 20);
        assert_eq!(e.cost, 0.5);
        assert!(e.warnings.is_empty());
    }

    #[test]
    fn test_complex_with_barcode_large_batch() {
        let mut elements: Vec<Value> = (0..11).map(text).collect();
        elements.push(json!({
            "id": "code", "type": "barcode", "x": 0, "y": 0, "width": 10, "height": 5
        }));
        let t = template_with(elements);

        let e = estimate(150, &t, &EngineConfig::default());
        assert_eq!(e.complexity, Complexity::Complex);
        assert!((e.multiplier - 2.4).abs() < 1e-9);
        assert_eq!(e.time_seconds, 720);
        assert_eq!(e.cost, 18.0);
        assert_eq!(
            e.warnings,
            vec![LARGE_BATCH_WARNING.to_string(), COMPLEX_TEMPLATE_WARNING.to_string()]
        );
    }

    #[test]
    fn test_medium_with_image_rounds_up() {
        let mut elements: Vec<Value> = (0..5).map(text).collect();
        elements.push(json!({
            "id": "logo", "type": "image", "x": 0, "y": 0, "width": 10, "height": 5
        }));
        let t = template_with(elements);

        let e = estimate(1, &t, &EngineConfig::default());
        assert_eq!(e.complexity, Complexity::Medium);
        // 2 * 1.5 * 1.5 = 4.5
        assert_eq!(e.time_seconds, 5);
        assert_eq!(e.cost, 0.11);
    }

    fn job(printer: &str, labels: u32) -> PrintJob {
        PrintJob {
            group_key: "g".into(),
            printer_id: printer.into(),
            authority: crate::print::PrintAuthority::System,
            label_count: labels,
            estimated_seconds: 0,
        }
    }

    #[test]
    fn test_job_advisories() {
        assert!(job_advisories(&[job("p1", 20), job("p1", 5)]).is_empty());

        let warnings = job_advisories(&[job("p1", 20), job("p1", 4), job("p2", 1)]);
        assert_eq!(
            warnings,
            vec!["2 print jobs have fewer than 5 labels (may be inefficient)".to_string()]
        );

        let crowded: Vec<PrintJob> = (0..6).map(|_| job("p1", 100)).collect();
        assert_eq!(job_advisories(&crowded), vec![SINGLE_PRINTER_WARNING.to_string()]);
        assert!(job_advisories(&crowded[..5]).is_empty());
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let t = template_with(vec![text(0)]);
        assert!(estimate(100, &t, &EngineConfig::default()).warnings.is_empty());
        assert_eq!(estimate(101, &t, &EngineConfig::default()).warnings.len(), 1);
    }
}
