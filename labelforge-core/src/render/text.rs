//! Text layout: measuring, word wrap, glyph drawing

use image::Rgba;
use rusttype::{point, Font, Scale};

use super::surface::Surface;
use crate::templates::{FontWeight, TextAlign};
use crate::units::PixelRect;

pub const LINE_HEIGHT: f32 = 1.2;
/// Block glyph metrics, as fractions of the font pixel size
const BLOCK_ADVANCE: f32 = 0.6;
const BLOCK_WIDTH: f32 = 0.5;
const BLOCK_HEIGHT: f32 = 0.7;

#[derive(Debug, Clone, Copy)]
pub struct TextStyle {
    pub px: f32,
    pub color: Rgba<u8>,
    pub weight: FontWeight,
    pub align: TextAlign,
    pub opacity: f32,
}

/// Advance width of `text` at `px`
pub fn measure(font: Option<&Font<'static>>, px: f32, text: &str) -> f32 {
    match font {
        Some(font) => {
            let scale = Scale::uniform(px);
            let glyphs: Vec<_> = font.layout(text, scale, point(0.0, 0.0)).collect();
            glyphs
                .last()
                .map(|g| g.position().x + g.unpositioned().h_metrics().advance_width)
                .unwrap_or(0.0)
        }
        None => text.chars().count() as f32 * px * BLOCK_ADVANCE,
    }
}

/// Greedy word wrap. Explicit newlines start a new line; a single word wider
/// than `max_width` is broken between characters.
pub fn wrap(text: &str, max_width: f32, measure: impl Fn(&str) -> f32) -> Vec<String> {
    let mut lines = vec![];
    if text.is_empty() {
        return lines;
    }
    for paragraph in text.split('\n') {
        let mut current = String::new();
        for word in paragraph.split_whitespace() {
            let candidate = if current.is_empty() {
                word.to_string()
            } else {
                format!("{} {}", current, word)
            };
            if measure(&candidate) <= max_width {
                current = candidate;
                continue;
            }
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            if measure(word) <= max_width {
                current = word.to_string();
                continue;
            }
            for ch in word.chars() {
                let mut next = current.clone();
                next.push(ch);
                if !current.is_empty() && measure(&next) > max_width {
                    lines.push(std::mem::take(&mut current));
                    current.push(ch);
                } else {
                    current = next;
                }
            }
        }
        lines.push(current);
    }
    lines
}

/// Lines that fit vertically in `height` pixels at `px`
pub fn visible_line_count(height: u32, px: f32) -> usize {
    if px <= 0.0 {
        return 0;
    }
    (height as f32 / (px * LINE_HEIGHT)).floor() as usize
}

/// Wrap and draw `text` inside `rect`; overflowing lines are dropped.
/// Returns how many lines were clipped.
pub fn draw_text_block(
    surface: &mut dyn Surface,
    font: Option<&Font<'static>>,
    rect: PixelRect,
    text: &str,
    style: &TextStyle,
) -> usize {
    let lines = wrap(text, rect.width as f32, |s| measure(font, style.px, s));
    let fits = visible_line_count(rect.height, style.px);
    let line_h = style.px * LINE_HEIGHT;

    for (i, line) in lines.iter().take(fits).enumerate() {
        let width = measure(font, style.px, line);
        let x = match style.align {
            TextAlign::Left => rect.x as f32,
            TextAlign::Center => rect.x as f32 + (rect.width as f32 - width) / 2.0,
            TextAlign::Right => rect.x as f32 + rect.width as f32 - width,
        };
        let top = rect.y as f32 + i as f32 * line_h;
        draw_line(surface, font, x, top, line, style, rect);
        if style.weight == FontWeight::Bold {
            draw_line(surface, font, x + 1.0, top, line, style, rect);
        }
    }
    lines.len().saturating_sub(fits)
}

fn draw_line(
    surface: &mut dyn Surface,
    font: Option<&Font<'static>>,
    x: f32,
    top: f32,
    line: &str,
    style: &TextStyle,
    clip: PixelRect,
) {
    let inside =
        |px: i32, py: i32| px >= clip.x && py >= clip.y && px < clip.right() && py < clip.bottom();
    match font {
        Some(font) => {
            let scale = Scale::uniform(style.px);
            let ascent = font.v_metrics(scale).ascent;
            for glyph in font.layout(line, scale, point(x, top + ascent)) {
                let Some(bb) = glyph.pixel_bounding_box() else {
                    continue;
                };
                glyph.draw(|gx, gy, v| {
                    let px = gx as i32 + bb.min.x;
                    let py = gy as i32 + bb.min.y;
                    if inside(px, py) {
                        surface.blend(px, py, style.color, v * style.opacity);
                    }
                });
            }
        }
        None => {
            let advance = style.px * BLOCK_ADVANCE;
            let w = (style.px * BLOCK_WIDTH).max(1.0) as i32;
            let h = (style.px * BLOCK_HEIGHT).max(1.0) as i32;
            let baseline = (top + style.px) as i32;
            for (i, ch) in line.chars().enumerate() {
                if ch.is_whitespace() {
                    continue;
                }
                let left = (x + i as f32 * advance) as i32;
                for py in baseline - h..baseline {
                    for px in left..left + w {
                        if inside(px, py) {
                            surface.blend(px, py, style.color, style.opacity);
                        }
                    }
                }
            }
        }
    }
}
