//! Renderer - compiled template to pixels
//!
//! Rendering degrades instead of failing: an element that cannot be drawn
//! (missing image, payload the symbology rejects) becomes a placeholder
//! frame and is listed in the report. Thermal printers get ZPL from
//! [`zpl`] instead of pixels.

pub mod surface;
pub mod symbology;
pub mod text;
pub mod zpl;

use base64::Engine as _;
use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use rusttype::Font;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::templates::{
    BarcodeElement, Element, ElementKind, ImageElement, ImageFit, QrElement, ShapeElement,
    ShapeKind, TemplateVariant, TextAlign, TextElement,
};
use crate::units::{canvas_size, points_to_dots, CanvasSize, PixelRect};
use surface::{parse_color, RasterSurface, Surface, BLACK, PLACEHOLDER_GRAY, WHITE};
use text::{draw_text_block, TextStyle};

/// Largest canvas edge the raster renderer accepts, in pixels
pub const MAX_CANVAS_PX: u32 = 20_000;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Canvas {0}x{1} is not renderable")]
    Canvas(u32, u32),

    #[error("Font error: {0}")]
    Font(String),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// What the renderer did with each element
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderReport {
    pub drawn: Vec<String>,
    pub placeholders: Vec<String>,
    pub skipped_hidden: usize,
    pub clipped_lines: usize,
}

#[derive(Clone, Default)]
pub struct Renderer {
    font: Option<Arc<Font<'static>>>,
    asset_root: Option<PathBuf>,
}

impl Renderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a TrueType/OpenType font for text instead of block glyphs
    pub fn with_font_bytes(mut self, bytes: Vec<u8>) -> Result<Self, RenderError> {
        let font = Font::try_from_vec(bytes)
            .ok_or_else(|| RenderError::Font("unparseable font data".into()))?;
        self.font = Some(Arc::new(font));
        Ok(self)
    }

    pub fn with_font_file(self, path: &Path) -> Result<Self, RenderError> {
        let bytes = std::fs::read(path)?;
        self.with_font_bytes(bytes)
    }

    /// Directory relative image paths are resolved against
    pub fn with_asset_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.asset_root = Some(root.into());
        self
    }

    pub fn canvas_for(label: &TemplateVariant) -> Result<CanvasSize, RenderError> {
        let canvas = canvas_size(&label.units);
        let ok = |v: u32| v > 0 && v <= MAX_CANVAS_PX;
        if ok(canvas.width_px) && ok(canvas.height_px) {
            Ok(canvas)
        } else {
            Err(RenderError::Canvas(canvas.width_px, canvas.height_px))
        }
    }

    /// Render onto a fresh raster sized from the label's unit spec
    pub fn render_raster(
        &self,
        label: &TemplateVariant,
    ) -> Result<(RasterSurface, RenderReport), RenderError> {
        let canvas = Self::canvas_for(label)?;
        let mut surface = RasterSurface::new(canvas);
        let report = self.render(label, &mut surface);
        Ok((surface, report))
    }

    pub fn render_png(&self, label: &TemplateVariant) -> Result<Vec<u8>, RenderError> {
        let (surface, _) = self.render_raster(label)?;
        surface.encode_png()
    }

    /// Draw `label` onto `surface`: white background, then visible elements
    /// in list order
    pub fn render(&self, label: &TemplateVariant, surface: &mut dyn Surface) -> RenderReport {
        let (w, h) = surface.size();
        let canvas = CanvasSize { width_px: w, height_px: h };
        let dpi = label.units.dpi;
        surface.clear(WHITE);

        let mut report = RenderReport::default();
        for element in &label.elements {
            if !element.visible {
                report.skipped_hidden += 1;
                continue;
            }
            let rect = PixelRect::from_percent(element.rect(), canvas);
            if rect.is_empty() {
                tracing::debug!(element = %element.id, "zero-size element skipped");
                continue;
            }
            if element.rotation.map_or(false, |r| r % 360.0 != 0.0) {
                tracing::debug!(
                    element = %element.id,
                    "rotation is not applied by the raster renderer"
                );
            }

            let opacity = element.style.opacity.unwrap_or(1.0).clamp(0.0, 1.0) as f32;
            if let Some(bg) = element.style.background_color.as_deref().and_then(parse_color) {
                surface.fill_rect(rect, bg, opacity);
            }

            let drawn = match &element.kind {
                ElementKind::Text(t) => {
                    report.clipped_lines += self.draw_text(surface, element, t, rect, dpi, opacity);
                    true
                }
                ElementKind::Image(img) => self.draw_image(surface, img, rect, opacity),
                ElementKind::Shape(shape) => {
                    draw_shape(surface, shape, rect, dpi, opacity);
                    true
                }
                ElementKind::Qr(qr) => draw_qr(surface, qr, rect, opacity),
                ElementKind::Barcode(bc) => self.draw_barcode(surface, bc, rect, dpi, opacity),
            };

            if drawn {
                report.drawn.push(element.id.clone());
            } else {
                draw_placeholder(surface, rect);
                report.placeholders.push(element.id.clone());
            }

            if let (Some(color), Some(width)) = (
                element.style.border_color.as_deref().and_then(parse_color),
                element.style.border_width,
            ) {
                let px = points_to_dots(width, dpi).round().max(1.0) as u32;
                surface.stroke_rect(rect, color, px, opacity);
            }
        }
        report
    }

    fn draw_text(
        &self,
        surface: &mut dyn Surface,
        element: &Element,
        t: &TextElement,
        rect: PixelRect,
        dpi: u32,
        opacity: f32,
    ) -> usize {
        let size_pt = element.style.font_size.unwrap_or(t.font_size);
        let color = element
            .style
            .color
            .as_deref()
            .and_then(parse_color)
            .or_else(|| parse_color(&t.color))
            .unwrap_or(BLACK);
        let style = TextStyle {
            px: points_to_dots(size_pt, dpi) as f32,
            color,
            weight: element.style.font_weight.unwrap_or(t.font_weight),
            align: t.align,
            opacity,
        };
        let clipped = draw_text_block(surface, self.font.as_deref(), rect, &t.content, &style);
        if clipped > 0 {
            tracing::debug!(element = %element.id, clipped, "text overflows its box");
        }
        clipped
    }

    fn load_image(&self, src: &str) -> Option<RgbaImage> {
        let src = src.trim();
        if src.is_empty() || src.contains("{{") {
            return None;
        }
        let decoded = if let Some(rest) = src.strip_prefix("data:") {
            let (_, payload) = rest.split_once(";base64,")?;
            let bytes = base64::engine::general_purpose::STANDARD.decode(payload.trim()).ok()?;
            image::load_from_memory(&bytes)
        } else if src.starts_with("http://") || src.starts_with("https://") {
            tracing::debug!(src, "remote images are not fetched");
            return None;
        } else {
            let path = match &self.asset_root {
                Some(root) => root.join(src),
                None => PathBuf::from(src),
            };
            image::open(path)
        };
        match decoded {
            Ok(img) => Some(img.to_rgba8()),
            Err(e) => {
                tracing::debug!(error = %e, "image could not be decoded");
                None
            }
        }
    }

    fn draw_image(
        &self,
        surface: &mut dyn Surface,
        img: &ImageElement,
        rect: PixelRect,
        opacity: f32,
    ) -> bool {
        let Some(source) = img.src.as_deref().and_then(|s| self.load_image(s)) else {
            return false;
        };
        let (iw, ih) = source.dimensions();
        if iw == 0 || ih == 0 || rect.is_empty() {
            return false;
        }
        let sx = rect.width as f64 / iw as f64;
        let sy = rect.height as f64 / ih as f64;
        let scaled = match img.fit {
            ImageFit::Stretch => {
                imageops::resize(&source, rect.width, rect.height, FilterType::Triangle)
            }
            ImageFit::Contain => {
                let s = sx.min(sy);
                let w = (iw as f64 * s).round().max(1.0) as u32;
                let h = (ih as f64 * s).round().max(1.0) as u32;
                imageops::resize(&source, w, h, FilterType::Triangle)
            }
            ImageFit::Cover => {
                // Crop the source to the box aspect first so the resize never
                // exceeds the box
                let s = sx.max(sy);
                let cw = ((rect.width as f64 / s).round() as u32).clamp(1, iw);
                let ch = ((rect.height as f64 / s).round() as u32).clamp(1, ih);
                let cropped =
                    imageops::crop_imm(&source, (iw - cw) / 2, (ih - ch) / 2, cw, ch).to_image();
                imageops::resize(&cropped, rect.width, rect.height, FilterType::Triangle)
            }
        };
        let (w, h) = scaled.dimensions();
        // Centered in the box
        let x = rect.x + (rect.width as i32 - w as i32) / 2;
        let y = rect.y + (rect.height as i32 - h as i32) / 2;
        surface.draw_image(x, y, &scaled, rect, opacity);
        true
    }

    fn draw_barcode(
        &self,
        surface: &mut dyn Surface,
        bc: &BarcodeElement,
        rect: PixelRect,
        dpi: u32,
        opacity: f32,
    ) -> bool {
        let modules = match symbology::encode_barcode(bc.format, &bc.value) {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!(value = %bc.value, error = %e, "barcode payload rejected");
                return false;
            }
        };

        let text_h = if bc.show_text { (rect.height as f32 * 0.2).round() as u32 } else { 0 };
        let bar_h = rect.height.saturating_sub(text_h);
        let module_w = rect.width as f64 / modules.len() as f64;

        let mut i = 0;
        while i < modules.len() {
            if !modules[i] {
                i += 1;
                continue;
            }
            let start = i;
            while i < modules.len() && modules[i] {
                i += 1;
            }
            let x0 = rect.x + (start as f64 * module_w).round() as i32;
            let x1 = rect.x + (i as f64 * module_w).round() as i32;
            let bar = PixelRect { x: x0, y: rect.y, width: (x1 - x0).max(1) as u32, height: bar_h };
            surface.fill_rect(bar, BLACK, opacity);
        }

        if text_h > 0 {
            let px = (text_h as f32 * 0.8).min(points_to_dots(10.0, dpi) as f32).max(1.0);
            let caption = PixelRect {
                x: rect.x,
                y: rect.y + bar_h as i32,
                width: rect.width,
                height: text_h,
            };
            let style = TextStyle {
                px,
                color: BLACK,
                weight: Default::default(),
                align: TextAlign::Center,
                opacity,
            };
            let readable = symbology::human_readable(bc.format, &bc.value);
            draw_text_block(surface, self.font.as_deref(), caption, &readable, &style);
        }
        true
    }
}

fn draw_qr(surface: &mut dyn Surface, qr: &QrElement, rect: PixelRect, opacity: f32) -> bool {
    let matrix = match symbology::qr_matrix(&qr.value, qr.ecc) {
        Ok(m) => m,
        Err(e) => {
            tracing::debug!(error = %e, "qr payload rejected");
            return false;
        }
    };
    let side = rect.width.min(rect.height) as f64;
    let module = side / matrix.width as f64;
    let ox = rect.x as f64 + (rect.width as f64 - side) / 2.0;
    let oy = rect.y as f64 + (rect.height as f64 - side) / 2.0;
    for my in 0..matrix.width {
        for mx in 0..matrix.width {
            if !matrix.is_dark(mx, my) {
                continue;
            }
            let x0 = (ox + mx as f64 * module).round() as i32;
            let y0 = (oy + my as f64 * module).round() as i32;
            let x1 = (ox + (mx + 1) as f64 * module).round() as i32;
            let y1 = (oy + (my + 1) as f64 * module).round() as i32;
            let cell = PixelRect {
                x: x0,
                y: y0,
                width: (x1 - x0).max(1) as u32,
                height: (y1 - y0).max(1) as u32,
            };
            surface.fill_rect(cell, BLACK, opacity);
        }
    }
    true
}

fn draw_shape(
    surface: &mut dyn Surface,
    shape: &ShapeElement,
    rect: PixelRect,
    dpi: u32,
    opacity: f32,
) {
    let fill = shape.fill.as_deref().and_then(parse_color);
    let stroke = shape.stroke.as_deref().and_then(parse_color);
    let stroke_px = points_to_dots(shape.stroke_width, dpi).round().max(1.0) as u32;

    match shape.shape {
        ShapeKind::Rect => {
            if let Some(fill) = fill {
                surface.fill_rect(rect, fill, opacity);
            }
            if let Some(stroke) = stroke {
                surface.stroke_rect(rect, stroke, stroke_px, opacity);
            }
        }
        ShapeKind::RoundRect => {
            let radius = points_to_dots(shape.radius.unwrap_or(4.0), dpi);
            let r = radius.min(rect.width as f64 / 2.0).min(rect.height as f64 / 2.0);
            fill_by(surface, rect, opacity, fill, stroke, stroke_px, |px, py| {
                round_rect_distance(rect, r, px, py)
            });
        }
        ShapeKind::Ellipse => {
            fill_by(surface, rect, opacity, fill, stroke, stroke_px, |px, py| {
                ellipse_distance(rect, px, py)
            });
        }
        ShapeKind::Line => {
            let color = stroke.or(fill).unwrap_or(BLACK);
            let (from, to) = if rect.width >= rect.height {
                let y = rect.y + rect.height as i32 / 2;
                ((rect.x, y), (rect.right() - 1, y))
            } else {
                let x = rect.x + rect.width as i32 / 2;
                ((x, rect.y), (x, rect.bottom() - 1))
            };
            surface.line(from, to, color, stroke_px, opacity);
        }
    }
}

/// Shade pixels by an inside-distance function: `d` is how far (in pixels)
/// the pixel center lies inside the shape, negative outside
fn fill_by(
    surface: &mut dyn Surface,
    rect: PixelRect,
    opacity: f32,
    fill: Option<Rgba<u8>>,
    stroke: Option<Rgba<u8>>,
    stroke_px: u32,
    inside: impl Fn(f64, f64) -> f64,
) {
    let area = surface.visible(rect);
    for y in area.y..area.bottom() {
        for x in area.x..area.right() {
            let d = inside(x as f64 + 0.5, y as f64 + 0.5);
            if d < 0.0 {
                continue;
            }
            match (stroke, fill) {
                (Some(s), _) if d < stroke_px as f64 => surface.blend(x, y, s, opacity),
                (_, Some(f)) => surface.blend(x, y, f, opacity),
                _ => {}
            }
        }
    }
}

fn ellipse_distance(rect: PixelRect, px: f64, py: f64) -> f64 {
    let rx = rect.width as f64 / 2.0;
    let ry = rect.height as f64 / 2.0;
    let nx = (px - (rect.x as f64 + rx)) / rx;
    let ny = (py - (rect.y as f64 + ry)) / ry;
    (1.0 - (nx * nx + ny * ny).sqrt()) * rx.min(ry)
}

fn round_rect_distance(rect: PixelRect, r: f64, px: f64, py: f64) -> f64 {
    let left = rect.x as f64;
    let top = rect.y as f64;
    let right = rect.right() as f64;
    let bottom = rect.bottom() as f64;
    let edge = (px - left).min(right - px).min(py - top).min(bottom - py);
    let cx = px.clamp(left + r, right - r);
    let cy = py.clamp(top + r, bottom - r);
    let (dx, dy) = (px - cx, py - cy);
    if dx != 0.0 && dy != 0.0 {
        r - (dx * dx + dy * dy).sqrt()
    } else {
        edge
    }
}

/// Gray frame with a diagonal cross
fn draw_placeholder(surface: &mut dyn Surface, rect: PixelRect) {
    surface.stroke_rect(rect, PLACEHOLDER_GRAY, 1, 1.0);
    let (l, t, r, b) = (rect.x, rect.y, rect.right() - 1, rect.bottom() - 1);
    surface.line((l, t), (r, b), PLACEHOLDER_GRAY, 1, 1.0);
    surface.line((l, b), (r, t), PLACEHOLDER_GRAY, 1, 1.0);
}
