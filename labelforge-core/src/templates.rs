//! Template System - Resolution-Independent Label Layouts

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::print::PrinterProfile;
use crate::rules::Rule;
use crate::units::{PercentRect, UnitSpec};

pub type TemplateId = String;
pub type ElementId = String;

pub const MIN_DPI: u32 = 72;
pub const MAX_DPI: u32 = 1200;

#[derive(Debug, Error, PartialEq)]
pub enum TemplateError {
    #[error("Invalid unit spec: {0}")]
    InvalidUnits(String),

    #[error("Duplicate element id: {0}")]
    DuplicateElement(String),

    #[error("Invalid version '{0}'")]
    InvalidVersion(String),

    #[error("Invalid geometry for element {0}: {1}")]
    InvalidGeometry(ElementId, String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateVariant {
    pub id: TemplateId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default = "default_version")]
    pub template_version: String,
    #[serde(default = "default_version")]
    pub engine_min_version: String,
    pub units: UnitSpec,
    #[serde(default)]
    pub default_printer: Option<String>,
    #[serde(default)]
    pub elements: Vec<Element>,
}

fn default_version() -> String { "1.0.0".to_string() }

fn default_true() -> bool { true }

impl TemplateVariant {
    pub fn element(&self, id: &str) -> Option<&Element> {
        self.elements.iter().find(|e| e.id == id)
    }

    pub fn element_mut(&mut self, id: &str) -> Option<&mut Element> {
        self.elements.iter_mut().find(|e| e.id == id)
    }

    pub fn has_kind(&self, kind: ElementType) -> bool {
        self.elements.iter().any(|e| e.kind.element_type() == kind)
    }

    /// Structural checks that make a template unusable for any record
    pub fn check_structure(&self) -> Result<(), TemplateError> {
        let u = &self.units;
        if !(u.width_in.is_finite() && u.width_in > 0.0) {
            return Err(TemplateError::InvalidUnits(format!("width {}", u.width_in)));
        }
        if !(u.height_in.is_finite() && u.height_in > 0.0) {
            return Err(TemplateError::InvalidUnits(format!("height {}", u.height_in)));
        }
        if u.dpi < MIN_DPI || u.dpi > MAX_DPI {
            return Err(TemplateError::InvalidUnits(format!(
                "dpi {} outside {}..={}",
                u.dpi, MIN_DPI, MAX_DPI
            )));
        }
        for inset in [u.bleed_in, u.safe_in].into_iter().flatten() {
            if !(inset.is_finite() && inset >= 0.0) {
                return Err(TemplateError::InvalidUnits(format!("inset {}", inset)));
            }
        }

        let mut seen = HashSet::new();
        for element in &self.elements {
            if !seen.insert(element.id.as_str()) {
                return Err(TemplateError::DuplicateElement(element.id.clone()));
            }
            element.check_geometry()?;
        }

        semver::Version::parse(&self.engine_min_version)
            .map_err(|_| TemplateError::InvalidVersion(self.engine_min_version.clone()))?;

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Element {
    pub id: ElementId,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    #[serde(default)]
    pub rotation: Option<f64>,
    #[serde(default = "default_true")]
    pub visible: bool,
    #[serde(default)]
    pub binding_key: Option<String>,
    #[serde(default)]
    pub style: ElementStyle,
    #[serde(flatten)]
    pub kind: ElementKind,
}

impl Element {
    pub fn rect(&self) -> PercentRect {
        PercentRect {
            x: self.x,
            y: self.y,
            width: self.width,
            height: self.height,
        }
    }

    /// Position and size must be finite percentages in 0..=100
    pub fn check_geometry(&self) -> Result<(), TemplateError> {
        let fields = [
            ("x", self.x),
            ("y", self.y),
            ("width", self.width),
            ("height", self.height),
        ];
        for (field, value) in fields {
            if !(value.is_finite() && (0.0..=100.0).contains(&value)) {
                return Err(TemplateError::InvalidGeometry(
                    self.id.clone(),
                    format!("{} {} outside 0..=100", field, value),
                ));
            }
        }
        Ok(())
    }

    /// The textual payload of the element, if its kind has one
    pub fn content(&self) -> Option<&str> {
        match &self.kind {
            ElementKind::Text(t) => Some(&t.content),
            ElementKind::Qr(q) => Some(&q.value),
            ElementKind::Barcode(b) => Some(&b.value),
            ElementKind::Image(i) => i.src.as_deref(),
            ElementKind::Shape(_) => None,
        }
    }

    /// Overwrite the payload: text content, symbol value or image source.
    /// Shapes carry no payload and are left alone.
    pub fn set_content(&mut self, value: String) {
        match &mut self.kind {
            ElementKind::Text(t) => t.content = value,
            ElementKind::Qr(q) => q.value = value,
            ElementKind::Barcode(b) => b.value = value,
            ElementKind::Image(i) => i.src = Some(value),
            ElementKind::Shape(_) => {}
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    Text,
    Image,
    Shape,
    Qr,
    Barcode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ElementKind {
    Text(TextElement),
    Image(ImageElement),
    Shape(ShapeElement),
    Qr(QrElement),
    Barcode(BarcodeElement),
}

impl ElementKind {
    pub fn element_type(&self) -> ElementType {
        match self {
            ElementKind::Text(_) => ElementType::Text,
            ElementKind::Image(_) => ElementType::Image,
            ElementKind::Shape(_) => ElementType::Shape,
            ElementKind::Qr(_) => ElementType::Qr,
            ElementKind::Barcode(_) => ElementType::Barcode,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextElement {
    #[serde(default)]
    pub content: String,
    #[serde(default = "default_font_family")]
    pub font_family: String,
    #[serde(default = "default_font_size")]
    pub font_size: f64,
    #[serde(default)]
    pub font_weight: FontWeight,
    #[serde(default = "default_color")]
    pub color: String,
    #[serde(default)]
    pub align: TextAlign,
}

fn default_font_family() -> String { "sans-serif".to_string() }
fn default_font_size() -> f64 { 10.0 }
fn default_color() -> String { "#000000".to_string() }

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FontWeight {
    #[default]
    Normal,
    Bold,
    Light,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextAlign {
    #[default]
    Left,
    Center,
    Right,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageElement {
    #[serde(default)]
    pub src: Option<String>,
    #[serde(default)]
    pub fit: ImageFit,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFit {
    #[default]
    Contain,
    Cover,
    Stretch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShapeElement {
    #[serde(default)]
    pub shape: ShapeKind,
    #[serde(default)]
    pub fill: Option<String>,
    #[serde(default)]
    pub stroke: Option<String>,
    #[serde(default = "default_stroke_width")]
    pub stroke_width: f64,
    #[serde(default)]
    pub radius: Option<f64>,
}

fn default_stroke_width() -> f64 { 1.0 }

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ShapeKind {
    #[default]
    Rect,
    RoundRect,
    Ellipse,
    Line,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QrElement {
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub ecc: ErrorCorrection,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCorrection {
    L,
    #[default]
    M,
    Q,
    H,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BarcodeElement {
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub format: BarcodeFormat,
    #[serde(default = "default_true")]
    pub show_text: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BarcodeFormat {
    #[default]
    #[serde(rename = "CODE128")]
    Code128,
    #[serde(rename = "CODE39")]
    Code39,
    #[serde(rename = "EAN13")]
    Ean13,
    UpcA,
}

/// Per-element style. Well-known keys are typed; anything else a rule sets
/// is carried along in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementStyle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub border_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub border_width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_weight: Option<FontWeight>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_size: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opacity: Option<f64>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ElementStyle {
    /// Shallow merge: keys present in `patch` win, everything else is kept
    pub fn merge(&mut self, patch: &ElementStyle) {
        macro_rules! take {
            ($($field:ident),*) => {
                $(if patch.$field.is_some() { self.$field = patch.$field.clone(); })*
            };
        }
        take!(color, background_color, border_color, border_width, font_weight, font_size, opacity);
        for (k, v) in &patch.extra {
            self.extra.insert(k.clone(), v.clone());
        }
    }
}

/// Template registry - in-memory catalogue of templates, printer profiles
/// and the label rule set
pub struct TemplateRegistry {
    templates: HashMap<TemplateId, TemplateVariant>,
    printers: HashMap<String, PrinterProfile>,
    rules: Vec<Rule>,
}

pub const RULES_FILE: &str = "rules.json";

impl TemplateRegistry {
    pub fn new() -> Self {
        Self {
            templates: HashMap::new(),
            printers: HashMap::new(),
            rules: vec![],
        }
    }

    /// Load every `*.json` template in `dir`, `printers/*.json` profiles and
    /// the optional `rules.json` rule list. Files that fail to parse are
    /// skipped with a warning.
    pub fn load_from_dir(dir: &Path) -> Result<Self, std::io::Error> {
        let mut registry = Self::new();
        for path in json_files(dir)? {
            if path.file_name().map_or(false, |n| n == RULES_FILE) {
                continue;
            }
            let content = fs::read_to_string(&path)?;
            match serde_json::from_str::<TemplateVariant>(&content) {
                Ok(template) => registry.register(template),
                Err(e) => tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "skipping unreadable template"
                ),
            }
        }
        let printers_dir = dir.join("printers");
        if printers_dir.is_dir() {
            for path in json_files(&printers_dir)? {
                let content = fs::read_to_string(&path)?;
                match serde_json::from_str::<PrinterProfile>(&content) {
                    Ok(profile) => registry.register_printer(profile),
                    Err(e) => tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "skipping unreadable printer profile"
                    ),
                }
            }
        }
        let rules_path = dir.join(RULES_FILE);
        if rules_path.is_file() {
            let content = fs::read_to_string(&rules_path)?;
            match serde_json::from_str::<Vec<Rule>>(&content) {
                Ok(rules) => rules.into_iter().for_each(|r| registry.register_rule(r)),
                Err(e) => tracing::warn!(
                    path = %rules_path.display(),
                    error = %e,
                    "skipping unreadable rule file"
                ),
            }
        }
        tracing::debug!(
            templates = registry.templates.len(),
            printers = registry.printers.len(),
            rules = registry.rules.len(),
            "template registry loaded"
        );
        Ok(registry)
    }

    pub fn get(&self, id: &str) -> Option<&TemplateVariant> {
        self.templates.get(id)
    }

    pub fn list(&self) -> Vec<&TemplateVariant> {
        let mut all: Vec<_> = self.templates.values().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    pub fn register(&mut self, template: TemplateVariant) {
        self.templates.insert(template.id.clone(), template);
    }

    pub fn printer(&self, id: &str) -> Option<&PrinterProfile> {
        self.printers.get(id)
    }

    pub fn register_printer(&mut self, profile: PrinterProfile) {
        self.printers.insert(profile.id.clone(), profile);
    }

    pub fn printers(&self) -> Vec<&PrinterProfile> {
        let mut all: Vec<_> = self.printers.values().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Add a rule, replacing one with the same id in place. Rules that fail
    /// their structural check are dropped with a warning.
    pub fn register_rule(&mut self, rule: Rule) {
        if let Err(e) = rule.check() {
            tracing::warn!(rule = %rule.id, error = %e, "rejecting rule");
            return;
        }
        match self.rules.iter_mut().find(|r| r.id == rule.id) {
            Some(existing) => *existing = rule,
            None => self.rules.push(rule),
        }
    }

    pub fn remove_rule(&mut self, id: &str) -> bool {
        let before = self.rules.len();
        self.rules.retain(|r| r.id != id);
        self.rules.len() < before
    }

    /// Rules in authoring order
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn json_files(dir: &Path) -> Result<Vec<std::path::PathBuf>, std::io::Error> {
    let mut files = vec![];
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().map_or(false, |e| e == "json") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
