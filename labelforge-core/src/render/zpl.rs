//! ZPL output for thermal printers
//!
//! One compiled label becomes one `^XA` .. `^XZ` program laid out in printer
//! dots. All field data is sent under `^FH` with `_XX` hex escapes, so
//! carets, tildes and control characters in record data cannot break out of
//! a field.

use std::fmt::Write as _;

use super::surface::{parse_color, BLACK};
use super::symbology::{encode_barcode, qr_matrix, validate_payload};
use crate::templates::{
    BarcodeElement, BarcodeFormat, Element, ElementKind, ErrorCorrection, QrElement, ShapeElement,
    ShapeKind, TemplateVariant, TextAlign, TextElement,
};
use crate::units::{canvas_size, points_to_dots, PixelRect, UnitSpec};

/// Largest `^BQ` magnification a printer accepts
const QR_MAX_MAGNIFICATION: u32 = 10;

/// ZPL program for `label` at `dpi`, printed `copies` times via `^PQ`
pub fn label_zpl(label: &TemplateVariant, dpi: u32, copies: u32) -> String {
    let canvas = canvas_size(&UnitSpec { dpi, ..label.units.clone() });
    let mut out = String::new();
    out.push_str("^XA\n^CI28\n");
    let _ = writeln!(out, "^PW{}", canvas.width_px);
    let _ = writeln!(out, "^LL{}", canvas.height_px);

    for element in label.elements.iter().filter(|e| e.visible) {
        let rect = PixelRect::from_percent(element.rect(), canvas)
            .clip_to(canvas.width_px, canvas.height_px);
        if rect.is_empty() {
            continue;
        }
        emit_element(&mut out, element, rect, dpi);
    }

    let _ = writeln!(out, "^PQ{}", copies.max(1));
    out.push_str("^XZ\n");
    out
}

fn emit_element(out: &mut String, element: &Element, rect: PixelRect, dpi: u32) {
    match &element.kind {
        ElementKind::Text(text) => emit_text(out, text, element.rotation, rect, dpi),
        ElementKind::Barcode(bc) => emit_barcode(out, &element.id, bc, rect),
        ElementKind::Qr(qr) => emit_qr(out, &element.id, qr, rect),
        ElementKind::Shape(shape) => emit_shape(out, shape, rect, dpi),
        ElementKind::Image(_) => {
            tracing::debug!(element = %element.id, "images are not sent to ZPL printers");
        }
    }
}

fn emit_text(
    out: &mut String,
    text: &TextElement,
    rotation: Option<f64>,
    rect: PixelRect,
    dpi: u32,
) {
    if text.content.trim().is_empty() {
        return;
    }
    let height = points_to_dots(text.font_size, dpi).round().max(1.0) as u32;
    let lines = (rect.height / height).max(1);
    let justify = match text.align {
        TextAlign::Left => 'L',
        TextAlign::Center => 'C',
        TextAlign::Right => 'R',
    };
    let _ = writeln!(
        out,
        "^FO{},{}^A0{},{},{}^FB{},{},0,{},0^FH^FD{}^FS",
        rect.x,
        rect.y,
        orientation(rotation),
        height,
        height,
        rect.width,
        lines,
        justify,
        escape_field(&text.content)
    );
}

fn emit_barcode(out: &mut String, id: &str, bc: &BarcodeElement, rect: PixelRect) {
    if let Err(e) = validate_payload(bc.format, &bc.value) {
        tracing::debug!(element = %id, error = %e, "barcode payload rejected");
        return;
    }
    let modules = match encode_barcode(bc.format, &bc.value) {
        Ok(m) => m.len().max(1) as u32,
        Err(_) => return,
    };
    let module = (rect.width / modules).clamp(1, 10);
    let (command, data) = match bc.format {
        BarcodeFormat::Code128 => ("BC", bc.value.as_str()),
        BarcodeFormat::Code39 => ("B3", bc.value.as_str()),
        // The printer appends the check digit itself
        BarcodeFormat::Ean13 => ("BE", bc.value.get(..12).unwrap_or(&bc.value)),
        BarcodeFormat::UpcA => ("BU", bc.value.get(..11).unwrap_or(&bc.value)),
    };
    let interpretation = if bc.show_text { 'Y' } else { 'N' };
    let _ = writeln!(
        out,
        "^FO{},{}^BY{},2,{}^{}N,,{},N^FH^FD{}^FS",
        rect.x,
        rect.y,
        module,
        rect.height,
        command,
        interpretation,
        escape_field(data)
    );
}

fn emit_qr(out: &mut String, id: &str, qr: &QrElement, rect: PixelRect) {
    let matrix = match qr_matrix(&qr.value, qr.ecc) {
        Ok(m) => m,
        Err(e) => {
            tracing::debug!(element = %id, error = %e, "QR payload rejected");
            return;
        }
    };
    let side = rect.width.min(rect.height);
    let magnification = (side / matrix.width.max(1) as u32).clamp(1, QR_MAX_MAGNIFICATION);
    let ecc = match qr.ecc {
        ErrorCorrection::L => 'L',
        ErrorCorrection::M => 'M',
        ErrorCorrection::Q => 'Q',
        ErrorCorrection::H => 'H',
    };
    let _ = writeln!(
        out,
        "^FO{},{}^BQN,2,{},{},7^FH^FD{}A,{}^FS",
        rect.x,
        rect.y,
        magnification,
        ecc,
        ecc,
        escape_field(&qr.value)
    );
}

fn emit_shape(out: &mut String, shape: &ShapeElement, rect: PixelRect, dpi: u32) {
    let stroke_px = points_to_dots(shape.stroke_width, dpi).round().max(1.0) as u32;
    let filled = shape.fill.as_deref().and_then(parse_color).filter(|c| c.0[3] > 0);
    let stroked = shape.stroke.as_deref().and_then(parse_color).filter(|c| c.0[3] > 0);
    let (color, thickness) = match (filled, stroked) {
        (Some(fill), _) => (fill, rect.width.min(rect.height)),
        (None, Some(stroke)) => (stroke, stroke_px),
        (None, None) if shape.shape == ShapeKind::Line => (BLACK, stroke_px),
        (None, None) => return,
    };
    // Monochrome media: light colours print as white
    let luma = (color.0[0] as u32 * 299 + color.0[1] as u32 * 587 + color.0[2] as u32 * 114) / 1000;
    let ink = if luma > 160 { 'W' } else { 'B' };
    let t = thickness.max(1);
    let (x, y, w, h) = (rect.x, rect.y, rect.width, rect.height);

    match shape.shape {
        ShapeKind::Rect => {
            let _ = writeln!(out, "^FO{},{}^GB{},{},{},{}^FS", x, y, w, h, t, ink);
        }
        ShapeKind::RoundRect => {
            let radius = points_to_dots(shape.radius.unwrap_or(4.0), dpi);
            let shorter = w.min(h).max(1) as f64;
            // ^GB rounding runs 0-8, as a share of the shorter side
            let rounding = (radius / (shorter / 2.0) * 8.0).round().clamp(0.0, 8.0) as u32;
            let _ = writeln!(out, "^FO{},{}^GB{},{},{},{},{}^FS", x, y, w, h, t, ink, rounding);
        }
        ShapeKind::Ellipse => {
            let _ = writeln!(out, "^FO{},{}^GE{},{},{},{}^FS", x, y, w, h, t, ink);
        }
        ShapeKind::Line if w >= h => {
            let _ = writeln!(out, "^FO{},{}^GB{},{},{},{}^FS", x, y + h as i32 / 2, w, t, t, ink);
        }
        ShapeKind::Line => {
            let _ = writeln!(out, "^FO{},{}^GB{},{},{},{}^FS", x + w as i32 / 2, y, t, h, t, ink);
        }
    }
}

/// Field orientation code for `^A`: rotation snapped to quarter turns
fn orientation(rotation: Option<f64>) -> char {
    let degrees = rotation.unwrap_or(0.0);
    if !degrees.is_finite() {
        return 'N';
    }
    let quarter = ((degrees.rem_euclid(360.0) / 90.0).round() as i64) % 4;
    match quarter {
        1 => 'R',
        2 => 'I',
        3 => 'B',
        _ => 'N',
    }
}

/// Hex-escape the `^FH` indicator, command prefixes and control bytes
pub fn escape_field(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '_' | '^' | '~' => {
                let _ = write!(out, "_{:02X}", ch as u32);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7F => {
                let _ = write!(out, "_{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}
