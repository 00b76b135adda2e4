//! Composite rendering: translucent mask overlays plus prompt markers.

use crate::error::{LocatorError, Result};
use crate::segmentation::{Mask, PointLabel, PointPrompt};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;

/// How masks and markers are drawn
#[derive(Debug, Clone)]
pub struct OverlayStyle {
    /// Blend factor of the mask color, identical for every mask
    pub alpha: f32,
    pub mask_color: Rgb<u8>,
    pub foreground_marker: Rgb<u8>,
    pub background_marker: Rgb<u8>,
    /// Half-length of a marker arm in pixels
    pub marker_size: u32,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            alpha: 0.5,
            mask_color: Rgb([255, 0, 0]),
            foreground_marker: Rgb([0, 255, 0]),
            background_marker: Rgb([255, 0, 0]),
            marker_size: 5,
        }
    }
}

/// Blend `color` into every masked pixel of `image`
///
/// Unmasked pixels are left untouched, so repeated overlays compound only
/// where masks overlap.
pub fn overlay_mask(image: &mut RgbImage, mask: &Mask, color: Rgb<u8>, alpha: f32) {
    let (mw, mh) = mask.dimensions();
    let (width, height) = image.dimensions();

    for y in 0..height.min(mh) {
        for x in 0..width.min(mw) {
            if !mask.get(x, y) {
                continue;
            }
            let pixel = image.get_pixel_mut(x, y);
            for c in 0..3 {
                let blended = alpha * color[c] as f32 + (1.0 - alpha) * pixel[c] as f32;
                pixel[c] = blended.round().clamp(0.0, 255.0) as u8;
            }
        }
    }
}

/// Draw a 2px marker: an upright cross for foreground, a tilted one for background
pub fn draw_marker(image: &mut RgbImage, prompt: &PointPrompt, style: &OverlayStyle) {
    let (width, height) = image.dimensions();
    let (cx, cy) = (prompt.x as i64, prompt.y as i64);
    let arm = style.marker_size as i64;

    let (color, tilted) = match prompt.label {
        PointLabel::Foreground => (style.foreground_marker, false),
        PointLabel::Background => (style.background_marker, true),
    };

    let mut plot = |x: i64, y: i64| {
        if x >= 0 && y >= 0 && (x as u32) < width && (y as u32) < height {
            image.put_pixel(x as u32, y as u32, color);
        }
    };

    for t in -arm..=arm {
        for w in 0..2 {
            if tilted {
                plot(cx + t + w, cy + t);
                plot(cx + t + w, cy - t);
            } else {
                plot(cx + t, cy + w);
                plot(cx + w, cy + t);
            }
        }
    }
}

/// Full composite: base image, every mask in order, then every marker
///
/// Always rebuilt from scratch so the result is a pure function of its inputs.
pub fn compose(
    base: &RgbImage,
    masks: &[Mask],
    prompts: &[PointPrompt],
    style: &OverlayStyle,
) -> RgbImage {
    let _span = tracing::debug_span!("compose", masks = masks.len()).entered();

    let mut image = base.clone();
    for mask in masks {
        overlay_mask(&mut image, mask, style.mask_color, style.alpha);
    }
    for prompt in prompts {
        draw_marker(&mut image, prompt, style);
    }
    image
}

/// Decode an uploaded byte stream (any format `image` understands) to RGB
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage> {
    let image = image::load_from_memory(bytes).map_err(|e| LocatorError::Decode(e.to_string()))?;
    Ok(image.to_rgb8())
}

pub fn encode_png(image: DynamicImage) -> anyhow::Result<Vec<u8>> {
    let mut buf = Vec::new();
    image.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
    Ok(buf)
}

/// PNG bytes, base64-encoded for JSON responses
pub fn png_base64(image: &RgbImage) -> anyhow::Result<String> {
    let png = encode_png(DynamicImage::ImageRgb8(image.clone()))?;
    Ok(STANDARD.encode(png))
}

/// 0/255 grayscale PNG of a mask, base64-encoded
pub fn mask_png_base64(mask: &Mask) -> anyhow::Result<String> {
    let png = encode_png(DynamicImage::ImageLuma8(mask.to_luma()))?;
    Ok(STANDARD.encode(png))
}
