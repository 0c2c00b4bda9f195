//! Validation System - Advisory Preflight
//!
//! Rules produce structured violations. Nothing here blocks a batch: the
//! pipeline turns violations into warnings on the result.

use serde::{Deserialize, Serialize};

use crate::print::PrinterProfile;
use crate::render::symbology::{self, SymbologyError};
use crate::render::text::{measure, visible_line_count, wrap};
use crate::templates::{Element, ElementKind, TemplateVariant};
use crate::units::{canvas_size, format_dimensions, points_to_dots, PixelRect};

/// Smallest font size considered readable on thermal labels
pub const MIN_READABLE_PT: f64 = 8.0;
/// Narrowest printable barcode module
pub const MIN_MODULE_DOTS: f64 = 1.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ViolationSeverity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationViolation {
    pub rule: String,
    pub severity: ViolationSeverity,
    #[serde(default)]
    pub element: Option<String>,
    pub message: String,
    pub expected: Option<String>,
    pub actual: Option<String>,
    pub remediation: Vec<String>,
}

impl ValidationViolation {
    /// One-line form used in batch warnings
    pub fn to_warning(&self) -> String {
        match &self.element {
            Some(el) => format!("[{}] {}: {}", self.rule, el, self.message),
            None => format!("[{}] {}", self.rule, self.message),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub template_id: String,
    pub template_version: String,
    pub violations: Vec<ValidationViolation>,
}

impl ValidationReport {
    pub fn has_errors(&self) -> bool {
        self.violations.iter().any(|v| v.severity == ViolationSeverity::Error)
    }

    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Which preflight passes a batch asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ValidationOptions {
    pub include_warnings: bool,
    pub validate_media: bool,
    pub check_text_fit: bool,
    pub validate_barcodes: bool,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            include_warnings: true,
            validate_media: true,
            check_text_fit: true,
            validate_barcodes: true,
        }
    }
}

/// What a rule sees: a compiled label and, when known, the target printer
pub struct Preflight<'a> {
    pub label: &'a TemplateVariant,
    pub printer: Option<&'a PrinterProfile>,
}

impl Preflight<'_> {
    fn rect_px(&self, element: &Element) -> PixelRect {
        PixelRect::from_percent(element.rect(), canvas_size(&self.label.units))
    }

    fn dpi(&self) -> u32 {
        self.label.units.dpi
    }
}

/// Validation rule trait - produces violations
pub trait ValidationRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn validate(&self, input: &Preflight<'_>) -> Vec<ValidationViolation>;
}

fn violation(
    rule: &dyn ValidationRule,
    severity: ViolationSeverity,
    element: Option<&str>,
    message: impl Into<String>,
) -> ValidationViolation {
    ValidationViolation {
        rule: rule.name().to_string(),
        severity,
        element: element.map(str::to_string),
        message: message.into(),
        expected: None,
        actual: None,
        remediation: vec![],
    }
}

// --- Concrete Rules ---

/// Label fits the printer's media; elements stay on the label; images have a source
pub struct MediaRule;

impl ValidationRule for MediaRule {
    fn name(&self) -> &'static str { "media" }

    fn validate(&self, input: &Preflight<'_>) -> Vec<ValidationViolation> {
        let mut out = vec![];
        let units = &input.label.units;

        if let Some(printer) = input.printer {
            if !printer.fits(units) {
                let mut v = violation(self, ViolationSeverity::Error, None, format!(
                    "Label does not fit media loaded in {}", printer.name
                ));
                v.expected = Some(format!(
                    "{} x {}",
                    format_dimensions(printer.media_width_in, printer.dpi),
                    format_dimensions(printer.media_height_in, printer.dpi)
                ));
                v.actual = Some(format!(
                    "{} x {}",
                    format_dimensions(units.width_in, units.dpi),
                    format_dimensions(units.height_in, units.dpi)
                ));
                v.remediation.push("Choose a template sized for this printer's media".into());
                out.push(v);
            }
            if printer.dpi != units.dpi {
                let mut v = violation(
                    self,
                    ViolationSeverity::Info,
                    None,
                    "Template DPI differs from printer DPI",
                );
                v.expected = Some(format!("{} dpi", printer.dpi));
                v.actual = Some(format!("{} dpi", units.dpi));
                out.push(v);
            }
        }

        for el in input.label.elements.iter().filter(|e| e.visible) {
            let outside =
                el.x < 0.0 || el.y < 0.0 || el.x + el.width > 100.0 || el.y + el.height > 100.0;
            if outside {
                let mut v = violation(
                    self,
                    ViolationSeverity::Warning,
                    Some(&el.id),
                    "Element extends outside the label",
                );
                v.remediation.push("Move or shrink the element".into());
                out.push(v);
            }
            if let ElementKind::Image(img) = &el.kind {
                let missing = img
                    .src
                    .as_deref()
                    .map_or(true, |s| s.trim().is_empty() || s.contains("{{"));
                if missing {
                    out.push(violation(
                        self,
                        ViolationSeverity::Warning,
                        Some(&el.id),
                        "Image has no resolvable source",
                    ));
                }
            }
        }
        out
    }
}

/// Text is large enough to read and fits its box
pub struct TextFitRule;

impl ValidationRule for TextFitRule {
    fn name(&self) -> &'static str { "text_fit" }

    fn validate(&self, input: &Preflight<'_>) -> Vec<ValidationViolation> {
        let mut out = vec![];
        for el in input.label.elements.iter().filter(|e| e.visible) {
            let ElementKind::Text(text) = &el.kind else {
                continue;
            };
            let size_pt = el.style.font_size.unwrap_or(text.font_size);
            if size_pt < MIN_READABLE_PT {
                let mut v = violation(
                    self,
                    ViolationSeverity::Warning,
                    Some(&el.id),
                    "Text may be too small to read",
                );
                v.expected = Some(format!(">= {} pt", MIN_READABLE_PT));
                v.actual = Some(format!("{} pt", size_pt));
                out.push(v);
            }

            let rect = input.rect_px(el);
            let px = points_to_dots(size_pt, input.dpi()) as f32;
            let lines = wrap(&text.content, rect.width as f32, |s| measure(None, px, s)).len();
            let fits = visible_line_count(rect.height, px);
            if lines > fits {
                let mut v = violation(
                    self,
                    ViolationSeverity::Warning,
                    Some(&el.id),
                    "Text may not fit its box",
                );
                v.expected = Some(format!("{} line(s)", fits));
                v.actual = Some(format!("{} line(s)", lines));
                v.remediation
                    .push("Shorten the text, reduce the font size or enlarge the box".into());
                out.push(v);
            }
        }
        out
    }
}

/// Symbol payloads are encodable and printable at the label's DPI
pub struct BarcodeRule;

impl ValidationRule for BarcodeRule {
    fn name(&self) -> &'static str { "barcode" }

    fn validate(&self, input: &Preflight<'_>) -> Vec<ValidationViolation> {
        let mut out = vec![];
        for el in input.label.elements.iter().filter(|e| e.visible) {
            let rect = input.rect_px(el);
            match &el.kind {
                ElementKind::Barcode(bc) => {
                    if bc.value.contains("{{") {
                        out.push(violation(
                            self,
                            ViolationSeverity::Error,
                            Some(&el.id),
                            "Barcode value has unresolved data",
                        ));
                        continue;
                    }
                    match symbology::encode_barcode(bc.format, &bc.value) {
                        Ok(modules) => {
                            let module_px = rect.width as f64 / modules.len() as f64;
                            if module_px < MIN_MODULE_DOTS {
                                let mut v = violation(
                                    self,
                                    ViolationSeverity::Warning,
                                    Some(&el.id),
                                    "Barcode too dense to scan reliably",
                                );
                                v.expected =
                                    Some(format!(">= {} dot(s) per module", MIN_MODULE_DOTS));
                                v.actual = Some(format!("{:.2}", module_px));
                                v.remediation.push("Widen the barcode or shorten the value".into());
                                out.push(v);
                            }
                        }
                        Err(e) => out.push(symbol_error(self, &el.id, e)),
                    }
                }
                ElementKind::Qr(qr) => {
                    if qr.value.contains("{{") {
                        out.push(violation(
                            self,
                            ViolationSeverity::Error,
                            Some(&el.id),
                            "QR value has unresolved data",
                        ));
                        continue;
                    }
                    match symbology::qr_matrix(&qr.value, qr.ecc) {
                        Ok(matrix) => {
                            let side = rect.width.min(rect.height) as f64;
                            let module_px = side / matrix.width as f64;
                            if module_px < MIN_MODULE_DOTS {
                                out.push(violation(
                                    self,
                                    ViolationSeverity::Warning,
                                    Some(&el.id),
                                    "QR code too dense to scan reliably",
                                ));
                            }
                        }
                        Err(e) => out.push(symbol_error(self, &el.id, e)),
                    }
                }
                _ => {}
            }
        }
        out
    }
}

fn symbol_error(
    rule: &dyn ValidationRule,
    element: &str,
    e: SymbologyError,
) -> ValidationViolation {
    let message = match e {
        SymbologyError::Empty => "Symbol value is empty".to_string(),
        other => format!("Invalid symbol value: {}", other),
    };
    violation(rule, ViolationSeverity::Error, Some(element), message)
}

/// Validator runs the enabled rules over a compiled label
pub struct Validator {
    rules: Vec<Box<dyn ValidationRule>>,
}

impl Validator {
    pub fn new() -> Self {
        Self::for_options(&ValidationOptions::default())
    }

    pub fn for_options(options: &ValidationOptions) -> Self {
        let mut rules: Vec<Box<dyn ValidationRule>> = vec![];
        if options.validate_media {
            rules.push(Box::new(MediaRule));
        }
        if options.check_text_fit {
            rules.push(Box::new(TextFitRule));
        }
        if options.validate_barcodes {
            rules.push(Box::new(BarcodeRule));
        }
        Self { rules }
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    pub fn validate(
        &self,
        label: &TemplateVariant,
        printer: Option<&PrinterProfile>,
    ) -> ValidationReport {
        let input = Preflight { label, printer };
        let violations = self.rules.iter().flat_map(|rule| rule.validate(&input)).collect();
        ValidationReport {
            template_id: label.id.clone(),
            template_version: label.template_version.clone(),
            violations,
        }
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn label(elements: Vec<Value>) -> TemplateVariant {
        serde_json::from_value(json!({
            "id": "t",
            "name": "T",
            "units": { "widthIn": 2.0, "heightIn": 1.0, "dpi": 203 },
            "elements": elements
        }))
        .unwrap()
    }

    fn rules_hit(report: &ValidationReport) -> Vec<(&str, Option<&str>)> {
        report
            .violations
            .iter()
            .map(|v| (v.rule.as_str(), v.element.as_deref()))
            .collect()
    }

    #[test]
    fn test_clean_label() {
        let l = label(vec![
            json!({ "id": "title", "type": "text", "x": 5, "y": 5, "width": 90, "height": 40,
                    "content": "Sourdough", "fontSize": 12 }),
            json!({ "id": "sku", "type": "barcode", "x": 5, "y": 50, "width": 90, "height": 45,
                    "value": "SD-1" }),
        ]);
        let report = Validator::new().validate(&l, Some(&PrinterProfile::placeholder("p")));
        assert!(report.is_clean(), "{:?}", report.violations);
    }

    #[test]
    fn test_media_mismatch() {
        let mut l = label(vec![json!({
            "id": "logo", "type": "image", "x": 90, "y": 0, "width": 20, "height": 20
        })]);
        l.units.width_in = 5.0;
        let report = Validator::new().validate(&l, Some(&PrinterProfile::placeholder("p")));
        let hits = rules_hit(&report);
        assert!(hits.contains(&("media", None)));
        assert_eq!(hits.iter().filter(|h| h.1 == Some("logo")).count(), 2);
        assert!(report.has_errors());
    }

    #[test]
    fn test_text_fit_and_small_font() {
        let l = label(vec![json!({
            "id": "notes", "type": "text", "x": 0, "y": 0, "width": 20, "height": 10,
            "content": "Contains wheat, milk and sesame. Keep refrigerated.", "fontSize": 6
        })]);
        let report = Validator::new().validate(&l, None);
        let messages: Vec<_> = report.violations.iter().map(|v| v.message.as_str()).collect();
        assert!(messages.contains(&"Text may be too small to read"));
        assert!(messages.contains(&"Text may not fit its box"));
        assert!(!report.has_errors());
    }

    #[test]
    fn test_barcode_checks() {
        let l = label(vec![
            json!({ "id": "upc", "type": "barcode", "format": "UPC_A", "x": 0, "y": 0,
                    "width": 50, "height": 30, "value": "12345" }),
            json!({ "id": "empty", "type": "qr", "x": 0, "y": 40, "width": 30, "height": 30,
                    "value": "" }),
            json!({ "id": "unbound", "type": "barcode", "x": 50, "y": 40, "width": 50, "height": 30,
                    "value": "{{product.sku}}" }),
            json!({ "id": "dense", "type": "barcode", "x": 50, "y": 0, "width": 5, "height": 30,
                    "value": "ABCDEFGHIJKLMNOP" }),
        ]);
        let report = Validator::new().validate(&l, None);
        let hits = rules_hit(&report);
        assert_eq!(
            hits,
            vec![
                ("barcode", Some("upc")),
                ("barcode", Some("empty")),
                ("barcode", Some("unbound")),
                ("barcode", Some("dense")),
            ]
        );
        assert_eq!(report.violations[1].message, "Symbol value is empty");
        assert_eq!(report.violations[3].severity, ViolationSeverity::Warning);
    }

    #[test]
    fn test_options_select_rules() {
        let options = ValidationOptions {
            check_text_fit: false,
            validate_media: false,
            ..Default::default()
        };
        assert_eq!(Validator::for_options(&options).rule_names(), vec!["barcode"]);
    }

    #[test]
    fn test_hidden_elements_ignored() {
        let l = label(vec![json!({
            "id": "ghost", "type": "qr", "x": 0, "y": 0, "width": 10, "height": 10,
            "value": "", "visible": false
        })]);
        assert!(Validator::new().validate(&l, None).is_clean());
    }
}
