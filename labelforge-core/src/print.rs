//! Print Authority System
//!
//! Decides which printer a record's labels go to, in one place.

use serde::{Deserialize, Serialize};

use crate::units::UnitSpec;

/// Where a printer assignment came from. Later variants win.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrintAuthority {
    /// Engine configuration default (fallback)
    System,
    /// Template's default printer
    Template,
    /// Printer chosen on the record itself
    Record,
}

impl Default for PrintAuthority {
    fn default() -> Self {
        Self::System
    }
}

/// Artifact format a printer consumes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Raster image, one file per printed label
    #[default]
    Png,
    /// Zebra Programming Language, one label program per compiled label
    Zpl,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Zpl => "zpl",
        }
    }
}

/// Printer/profile metadata read from the profile store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrinterProfile {
    pub id: String,
    pub name: String,
    pub dpi: u32,
    pub media_width_in: f64,
    pub media_height_in: f64,
    #[serde(default)]
    pub supports_color: bool,
    /// Sustained throughput, labels per minute
    #[serde(default)]
    pub labels_per_minute: Option<f64>,
    /// Explicit artifact format; detected from the name when unset
    #[serde(default)]
    pub output_format: Option<OutputFormat>,
}

impl PrinterProfile {
    pub fn placeholder(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            dpi: 203,
            media_width_in: 4.0,
            media_height_in: 6.0,
            supports_color: false,
            labels_per_minute: None,
            output_format: None,
        }
    }

    /// Thermal printers named like Zebra/ZPL devices take ZPL, everything
    /// else gets PNG
    pub fn output(&self) -> OutputFormat {
        if let Some(format) = self.output_format {
            return format;
        }
        let name = self.name.to_ascii_lowercase();
        if name.contains("zebra") || name.contains("zpl") {
            OutputFormat::Zpl
        } else {
            OutputFormat::Png
        }
    }

    /// Seconds to print one label, when the profile states a throughput
    pub fn seconds_per_label(&self) -> Option<f64> {
        self.labels_per_minute
            .filter(|lpm| lpm.is_finite() && *lpm > 0.0)
            .map(|lpm| 60.0 / lpm)
    }

    /// Whether a label of `units` fits on this printer's media
    pub fn fits(&self, units: &UnitSpec) -> bool {
        const TOLERANCE_IN: f64 = 0.01;
        units.width_in <= self.media_width_in + TOLERANCE_IN
            && units.height_in <= self.media_height_in + TOLERANCE_IN
    }
}

/// A resolved printer id and the authority that chose it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrinterAssignment {
    pub printer_id: String,
    pub authority: PrintAuthority,
}

impl PrinterAssignment {
    /// Record beats template beats system default
    pub fn resolve(record: Option<&str>, template: Option<&str>, system_default: &str) -> Self {
        if let Some(id) = record.filter(|s| !s.is_empty()) {
            return Self { printer_id: id.to_string(), authority: PrintAuthority::Record };
        }
        if let Some(id) = template.filter(|s| !s.is_empty()) {
            return Self { printer_id: id.to_string(), authority: PrintAuthority::Template };
        }
        Self {
            printer_id: system_default.to_string(),
            authority: PrintAuthority::System,
        }
    }
}
