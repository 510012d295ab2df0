//! Screenshot post-processing: decoding, box overlays and rescaling.

use std::io::Cursor;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{imageops::FilterType, DynamicImage, ImageFormat, ImageReader, Rgba, RgbaImage};

use crate::{
    error::Result,
    models::{Rect, Scale, ScreenSize},
};

/// How to post-process a captured screenshot.
#[derive(Debug, Clone, PartialEq)]
pub struct ScreenshotOptions {
    /// Rectangles in screen space to outline.
    pub boxes: Vec<Rect>,
    pub box_color: Rgba<u8>,
    pub thickness: u32,
    /// Final resize factor; 1.0 keeps the captured size.
    pub scale_factor: f64,
}

impl Default for ScreenshotOptions {
    fn default() -> Self {
        Self {
            boxes: Vec::new(),
            box_color: Rgba([255, 0, 0, 255]),
            thickness: 2,
            scale_factor: 1.0,
        }
    }
}

impl ScreenshotOptions {
    pub fn with_boxes(mut self, boxes: Vec<Rect>) -> Self {
        self.boxes = boxes;
        self
    }

    pub fn with_color(mut self, color: Rgba<u8>) -> Self {
        self.box_color = color;
        self
    }

    pub fn with_thickness(mut self, thickness: u32) -> Self {
        self.thickness = thickness;
        self
    }

    pub fn with_scale_factor(mut self, scale_factor: f64) -> Self {
        self.scale_factor = scale_factor;
        self
    }

    pub fn needs_processing(&self) -> bool {
        !self.boxes.is_empty() || (self.scale_factor - 1.0).abs() > f64::EPSILON
    }
}

/// Named colors plus `#rrggbb`.
pub fn parse_color(spec: &str) -> Option<Rgba<u8>> {
    let spec = spec.trim().to_ascii_lowercase();
    let rgb = match spec.as_str() {
        "red" => [255, 0, 0],
        "green" => [0, 255, 0],
        "blue" => [0, 0, 255],
        "yellow" => [255, 255, 0],
        "cyan" => [0, 255, 255],
        "magenta" => [255, 0, 255],
        "white" => [255, 255, 255],
        "black" => [0, 0, 0],
        hex => {
            let hex = hex.strip_prefix('#')?;
            if hex.len() != 6 {
                return None;
            }
            let channel = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();
            [channel(0)?, channel(2)?, channel(4)?]
        }
    };
    Some(Rgba([rgb[0], rgb[1], rgb[2], 255]))
}

pub fn decode_base64(data: &str) -> Result<Vec<u8>> {
    Ok(STANDARD.decode(data.trim())?)
}

/// Pixel dimensions of an encoded image, read from its header.
pub fn image_size(bytes: &[u8]) -> Result<ScreenSize> {
    let (width, height) = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .into_dimensions()?;
    Ok(ScreenSize::new(width, height))
}

/// Outlines `boxes` (screen space) after converting them with `scale`, then
/// resizes by `options.scale_factor`. Returns PNG bytes.
pub fn process(bytes: &[u8], options: &ScreenshotOptions, scale: Scale) -> Result<Vec<u8>> {
    let mut canvas = image::load_from_memory(bytes)?.to_rgba8();

    for rect in &options.boxes {
        draw_outline(&mut canvas, rect.scaled(scale), options.box_color, options.thickness);
    }

    let image = resize(DynamicImage::ImageRgba8(canvas), options.scale_factor);
    encode_png(&image)
}

/// Draws the outline of `rect`, growing inwards by `thickness` pixels and
/// clipped to the canvas.
pub fn draw_outline(canvas: &mut RgbaImage, rect: Rect, color: Rgba<u8>, thickness: u32) {
    let (width, height) = (i64::from(canvas.width()), i64::from(canvas.height()));
    if width == 0 || height == 0 {
        return;
    }
    let left = rect.x.round() as i64;
    let top = rect.y.round() as i64;
    let right = ((rect.x + rect.width).round() as i64).saturating_sub(1);
    let bottom = ((rect.y + rect.height).round() as i64).saturating_sub(1);

    // rings past the canvas size cannot land on it
    let rings = i64::from(thickness.max(1)).min(width.max(height));
    for inset in 0..rings {
        let (l, t) = (left.saturating_add(inset), top.saturating_add(inset));
        let (r, b) = (right.saturating_sub(inset), bottom.saturating_sub(inset));
        if l > r || t > b {
            break;
        }
        // only the visible part of each edge is walked
        let (x0, x1) = (l.max(0), r.min(width - 1));
        let (y0, y1) = (t.max(0), b.min(height - 1));
        for x in x0..=x1 {
            for y in [t, b] {
                if (0..height).contains(&y) {
                    canvas.put_pixel(x as u32, y as u32, color);
                }
            }
        }
        for y in y0..=y1 {
            for x in [l, r] {
                if (0..width).contains(&x) {
                    canvas.put_pixel(x as u32, y as u32, color);
                }
            }
        }
    }
}

pub fn resize(image: DynamicImage, factor: f64) -> DynamicImage {
    if factor.is_nan() || factor <= 0.0 || (factor - 1.0).abs() <= f64::EPSILON {
        return image;
    }
    let width = ((f64::from(image.width()) * factor).round() as u32).max(1);
    let height = ((f64::from(image.height()) * factor).round() as u32).max(1);
    image.resize_exact(width, height, FilterType::Lanczos3)
}

pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>> {
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, ImageFormat::Png)?;
    Ok(out.into_inner())
}
