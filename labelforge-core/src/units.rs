//! Unit System - Inches, Dots, Percentages
//!
//! Templates are authored in inches and percentages. Dots only exist once a
//! DPI is fixed, which happens at render time.

use serde::{Deserialize, Serialize};

pub const MM_PER_INCH: f64 = 25.4;

/// Physical size and resolution of a label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitSpec {
    pub width_in: f64,
    pub height_in: f64,
    pub dpi: u32,
    #[serde(default)]
    pub bleed_in: Option<f64>,
    #[serde(default)]
    pub safe_in: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasSize {
    pub width_px: u32,
    pub height_px: u32,
}

/// Element geometry in percent of the canvas (0-100)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PercentRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Device-space rectangle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub fn from_percent(rect: PercentRect, canvas: CanvasSize) -> Self {
        let cw = canvas.width_px as f64;
        let ch = canvas.height_px as f64;
        Self {
            x: (rect.x / 100.0 * cw).round() as i32,
            y: (rect.y / 100.0 * ch).round() as i32,
            width: (rect.width / 100.0 * cw).round().max(0.0) as u32,
            height: (rect.height / 100.0 * ch).round().max(0.0) as u32,
        }
    }

    pub fn right(&self) -> i32 {
        self.x + self.width as i32
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height as i32
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Overlap with `other`; empty (zero size) when they do not meet
    pub fn intersect(&self, other: PixelRect) -> PixelRect {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        PixelRect {
            x,
            y,
            width: (right - x).max(0) as u32,
            height: (bottom - y).max(0) as u32,
        }
    }

    /// Part of this rect that lies on a `width` x `height` surface
    pub fn clip_to(&self, width: u32, height: u32) -> PixelRect {
        self.intersect(PixelRect { x: 0, y: 0, width, height })
    }

    /// Shrink by `inset` pixels on every side
    pub fn inset(&self, inset: u32) -> Self {
        let w = self.width.saturating_sub(inset * 2);
        let h = self.height.saturating_sub(inset * 2);
        Self {
            x: self.x + inset as i32,
            y: self.y + inset as i32,
            width: w,
            height: h,
        }
    }
}

pub fn inches_to_dots(inches: f64, dpi: u32) -> u32 {
    (inches * dpi as f64).round().max(0.0) as u32
}

pub fn dots_to_inches(dots: u32, dpi: u32) -> f64 {
    if dpi == 0 {
        return 0.0;
    }
    dots as f64 / dpi as f64
}

pub fn mm_to_inches(mm: f64) -> f64 {
    mm / MM_PER_INCH
}

/// Points (1/72 in) to dots
pub fn points_to_dots(pt: f64, dpi: u32) -> f64 {
    pt * dpi as f64 / 72.0
}

pub fn canvas_size(spec: &UnitSpec) -> CanvasSize {
    CanvasSize {
        width_px: (spec.width_in * spec.dpi as f64).round() as u32,
        height_px: (spec.height_in * spec.dpi as f64).round() as u32,
    }
}

pub fn bleed_px(spec: &UnitSpec) -> u32 {
    spec.bleed_in.map_or(0, |b| inches_to_dots(b, spec.dpi))
}

pub fn safe_px(spec: &UnitSpec) -> u32 {
    spec.safe_in.map_or(0, |s| inches_to_dots(s, spec.dpi))
}

/// Canvas rect without safe-area margins, in device pixels
pub fn safe_area(spec: &UnitSpec) -> PixelRect {
    let canvas = canvas_size(spec);
    PixelRect {
        x: 0,
        y: 0,
        width: canvas.width_px,
        height: canvas.height_px,
    }
    .inset(safe_px(spec))
}

/// Human-readable inch value with its dot equivalent
pub fn format_dimensions(value_in: f64, dpi: u32) -> String {
    format!(
        "{:.2}\" ({} dots @ {} dpi)",
        value_in,
        inches_to_dots(value_in, dpi),
        dpi
    )
}
