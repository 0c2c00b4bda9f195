//! Drawing surfaces

use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use std::io::Cursor;
use std::path::Path;

use super::RenderError;
use crate::units::{CanvasSize, PixelRect};

pub const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
pub const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);
pub const PLACEHOLDER_GRAY: Rgba<u8> = Rgba([160, 160, 160, 255]);

/// Pixel sink the renderer draws into. Only `size`, `clear` and `blend`
/// are required; everything else is built on them.
pub trait Surface {
    fn size(&self) -> (u32, u32);

    fn clear(&mut self, color: Rgba<u8>);

    /// Blend `color` over one pixel with `coverage` in 0..=1. Out-of-bounds
    /// pixels are ignored.
    fn blend(&mut self, x: i32, y: i32, color: Rgba<u8>, coverage: f32);

    /// Pixels of `rect` that exist on this surface
    fn visible(&self, rect: PixelRect) -> PixelRect {
        let (w, h) = self.size();
        rect.clip_to(w, h)
    }

    fn fill_rect(&mut self, rect: PixelRect, color: Rgba<u8>, opacity: f32) {
        let area = self.visible(rect);
        for y in area.y..area.bottom() {
            for x in area.x..area.right() {
                self.blend(x, y, color, opacity);
            }
        }
    }

    fn stroke_rect(&mut self, rect: PixelRect, color: Rgba<u8>, width: u32, opacity: f32) {
        if rect.is_empty() || width == 0 {
            return;
        }
        let w = width.min(rect.width).min(rect.height) as i32;
        let area = self.visible(rect);
        for y in area.y..area.bottom() {
            for x in area.x..area.right() {
                let edge = x < rect.x + w
                    || x >= rect.right() - w
                    || y < rect.y + w
                    || y >= rect.bottom() - w;
                if edge {
                    self.blend(x, y, color, opacity);
                }
            }
        }
    }

    /// Straight line with a square pen of `width` pixels
    fn line(
        &mut self,
        from: (i32, i32),
        to: (i32, i32),
        color: Rgba<u8>,
        width: u32,
        opacity: f32,
    ) {
        let (mut x, mut y) = from;
        let dx = (to.0 - x).abs();
        let dy = -(to.1 - y).abs();
        let sx = if x < to.0 { 1 } else { -1 };
        let sy = if y < to.1 { 1 } else { -1 };
        let mut err = dx + dy;
        let half = (width.max(1) as i32 - 1) / 2;
        let pen = width.max(1) as i32;
        loop {
            for py in 0..pen {
                for px in 0..pen {
                    self.blend(x - half + px, y - half + py, color, opacity);
                }
            }
            if x == to.0 && y == to.1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x += sx;
            }
            if e2 <= dx {
                err += dx;
                y += sy;
            }
        }
    }

    /// Draw `image` with its top-left at (x, y), clipped to `clip`
    fn draw_image(&mut self, x: i32, y: i32, image: &RgbaImage, clip: PixelRect, opacity: f32) {
        let placed = PixelRect { x, y, width: image.width(), height: image.height() };
        let area = self.visible(placed.intersect(clip));
        for ty in area.y..area.bottom() {
            for tx in area.x..area.right() {
                let px = image.get_pixel((tx - x) as u32, (ty - y) as u32);
                let alpha = px.0[3] as f32 / 255.0;
                if alpha > 0.0 {
                    self.blend(tx, ty, Rgba([px.0[0], px.0[1], px.0[2], 255]), alpha * opacity);
                }
            }
        }
    }
}

/// In-memory RGBA raster
pub struct RasterSurface {
    image: RgbaImage,
}

impl RasterSurface {
    pub fn new(canvas: CanvasSize) -> Self {
        Self {
            image: RgbaImage::from_pixel(canvas.width_px, canvas.height_px, WHITE),
        }
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }

    pub fn encode_png(&self) -> Result<Vec<u8>, RenderError> {
        let mut bytes = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(self.image.clone()).write_to(&mut bytes, ImageFormat::Png)?;
        Ok(bytes.into_inner())
    }

    pub fn save_png(&self, path: &Path) -> Result<(), RenderError> {
        std::fs::write(path, self.encode_png()?)?;
        Ok(())
    }
}

impl Surface for RasterSurface {
    fn size(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    fn clear(&mut self, color: Rgba<u8>) {
        for px in self.image.pixels_mut() {
            *px = color;
        }
    }

    fn blend(&mut self, x: i32, y: i32, color: Rgba<u8>, coverage: f32) {
        if x < 0 || y < 0 || x as u32 >= self.image.width() || y as u32 >= self.image.height() {
            return;
        }
        let a = coverage.clamp(0.0, 1.0) * color.0[3] as f32 / 255.0;
        if a <= 0.0 {
            return;
        }
        let dst = self.image.get_pixel_mut(x as u32, y as u32);
        let inv = 1.0 - a;
        for c in 0..3 {
            dst.0[c] = (color.0[c] as f32 * a + dst.0[c] as f32 * inv).round() as u8;
        }
        dst.0[3] = 255;
    }
}

/// `#rgb`, `#rrggbb`, `#rrggbbaa` or a few CSS names
pub fn parse_color(value: &str) -> Option<Rgba<u8>> {
    let v = value.trim();
    if let Some(hex) = v.strip_prefix('#') {
        let channel = |s: &str| u8::from_str_radix(s, 16).ok();
        return match hex.len() {
            3 => {
                let mut out = [0u8; 4];
                for (i, c) in hex.chars().enumerate() {
                    let n = c.to_digit(16)? as u8;
                    out[i] = n * 17;
                }
                out[3] = 255;
                Some(Rgba(out))
            }
            6 | 8 => {
                let r = channel(hex.get(0..2)?)?;
                let g = channel(hex.get(2..4)?)?;
                let b = channel(hex.get(4..6)?)?;
                let a = match hex.get(6..8) {
                    Some(a) => channel(a)?,
                    None => 255,
                };
                Some(Rgba([r, g, b, a]))
            }
            _ => None,
        };
    }
    let named = match v.to_ascii_lowercase().as_str() {
        "black" => [0, 0, 0],
        "white" => [255, 255, 255],
        "red" => [255, 0, 0],
        "green" => [0, 128, 0],
        "blue" => [0, 0, 255],
        "gray" | "grey" => [128, 128, 128],
        "orange" => [255, 165, 0],
        "yellow" => [255, 255, 0],
        "transparent" => return Some(Rgba([0, 0, 0, 0])),
        _ => return None,
    };
    Some(Rgba([named[0], named[1], named[2], 255]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_color() {
        assert_eq!(parse_color("#dc2626"), Some(Rgba([0xdc, 0x26, 0x26, 255])));
        assert_eq!(parse_color("#fff"), Some(WHITE));
        assert_eq!(parse_color("Black"), Some(BLACK));
        assert_eq!(parse_color("#12345"), None);
        assert_eq!(parse_color("#zzzzzz"), None);
        assert_eq!(parse_color("chartreuse"), None);
    }

    #[test]
    fn test_fill_and_clip() {
        let mut s = RasterSurface::new(CanvasSize { width_px: 10, height_px: 10 });
        s.fill_rect(PixelRect { x: 8, y: 8, width: 5, height: 5 }, BLACK, 1.0);
        assert_eq!(*s.image().get_pixel(9, 9), BLACK);
        assert_eq!(*s.image().get_pixel(7, 7), WHITE);
    }

    /// Counts blend calls instead of drawing
    struct Tally {
        blends: usize,
    }

    impl Surface for Tally {
        fn size(&self) -> (u32, u32) {
            (10, 10)
        }

        fn clear(&mut self, _color: Rgba<u8>) {}

        fn blend(&mut self, _x: i32, _y: i32, _color: Rgba<u8>, _coverage: f32) {
            self.blends += 1;
        }
    }

    #[test]
    fn test_offscreen_pixels_are_not_visited() {
        let huge = PixelRect { x: -5000, y: -5000, width: 20_000, height: 20_000 };
        let mut t = Tally { blends: 0 };
        t.fill_rect(huge, BLACK, 1.0);
        assert_eq!(t.blends, 100);

        let mut t = Tally { blends: 0 };
        t.stroke_rect(huge, BLACK, 2, 1.0);
        assert_eq!(t.blends, 0);

        let mut t = Tally { blends: 0 };
        let img = RgbaImage::from_pixel(50, 50, BLACK);
        t.draw_image(-20, -20, &img, huge, 1.0);
        assert_eq!(t.blends, 100);
    }

    #[test]
    fn test_blend_half() {
        let mut s = RasterSurface::new(CanvasSize { width_px: 1, height_px: 1 });
        s.blend(0, 0, BLACK, 0.5);
        let px = s.image().get_pixel(0, 0);
        assert!((126..=128).contains(&px.0[0]));
    }

    #[test]
    fn test_line_and_stroke() {
        let mut s = RasterSurface::new(CanvasSize { width_px: 10, height_px: 10 });
        s.line((0, 0), (9, 9), BLACK, 1, 1.0);
        assert_eq!(*s.image().get_pixel(5, 5), BLACK);
        assert_eq!(*s.image().get_pixel(5, 4), WHITE);

        let mut s = RasterSurface::new(CanvasSize { width_px: 10, height_px: 10 });
        s.stroke_rect(PixelRect { x: 0, y: 0, width: 10, height: 10 }, BLACK, 1, 1.0);
        assert_eq!(*s.image().get_pixel(0, 5), BLACK);
        assert_eq!(*s.image().get_pixel(5, 5), WHITE);
    }

    #[test]
    fn test_png_roundtrip_dimensions() {
        let s = RasterSurface::new(CanvasSize { width_px: 12, height_px: 7 });
        let png = s.encode_png().unwrap();
        let decoded = image::load_from_memory(&png).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (12, 7));
    }
}
