use anyhow::{ensure, Result};
use image::{imageops, RgbImage};
use ndarray::{Array4, ArrayView2};

use super::types::Mask;

/// ImageNet channel statistics used by both SAM2 and the ResNet classifiers
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeMode {
    /// Stretch to exactly (width, height)
    Exact(u32, u32),
    /// Scale so the shorter side equals the value, keeping aspect ratio
    ShorterSide(u32),
}

/// Preprocessor for converting RGB images to model input tensors
pub struct Preprocessor {
    resize: ResizeMode,
    mean: [f32; 3],
    std: [f32; 3],
}

impl Preprocessor {
    pub fn new(resize: ResizeMode) -> Self {
        Self {
            resize,
            mean: IMAGENET_MEAN,
            std: IMAGENET_STD,
        }
    }

    /// Size the image will have after resizing
    pub fn target_size(&self, width: u32, height: u32) -> (u32, u32) {
        match self.resize {
            ResizeMode::Exact(w, h) => (w, h),
            ResizeMode::ShorterSide(side) => {
                if width <= height {
                    let h = (height as f64 * side as f64 / width.max(1) as f64).round() as u32;
                    (side, h.max(1))
                } else {
                    let w = (width as f64 * side as f64 / height.max(1) as f64).round() as u32;
                    (w.max(1), side)
                }
            }
        }
    }

    /// Preprocess an RGB image into a normalized NCHW tensor
    ///
    /// Steps:
    /// 1. Resize according to the resize mode
    /// 2. Scale to [0, 1] and normalize with per-channel mean/std
    /// 3. Transpose from HWC to NCHW format
    ///
    /// Returns: Array4<f32> with shape [1, 3, height, width]
    pub fn preprocess(&self, image: &RgbImage) -> Result<Array4<f32>> {
        let _span = tracing::debug_span!("preprocess").entered();

        let (src_w, src_h) = image.dimensions();
        ensure!(src_w > 0 && src_h > 0, "cannot preprocess an empty image");

        let (target_w, target_h) = self.target_size(src_w, src_h);
        let resized = if (src_w, src_h) != (target_w, target_h) {
            imageops::resize(image, target_w, target_h, imageops::FilterType::Triangle)
        } else {
            image.clone()
        };

        let (width, height) = resized.dimensions();
        let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));

        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                let value = pixel[c] as f32 / 255.0;
                tensor[[0, c, y as usize, x as usize]] = (value - self.mean[c]) / self.std[c];
            }
        }

        Ok(tensor)
    }

    /// Map a pixel coordinate of the original image onto the resized grid
    pub fn scale_point(&self, point: (u32, u32), original: (u32, u32)) -> (f32, f32) {
        let (target_w, target_h) = self.target_size(original.0, original.1);
        let sx = target_w as f32 / original.0.max(1) as f32;
        let sy = target_h as f32 / original.1.max(1) as f32;
        (point.0 as f32 * sx, point.1 as f32 * sy)
    }

    /// Postprocess decoder logits back to a mask at original image size
    ///
    /// Logits are squashed through a sigmoid, resized as an 8-bit probability
    /// map and thresholded at 0.5 (logit 0).
    pub fn postprocess_logits(
        logits: ArrayView2<f32>,
        target_width: u32,
        target_height: u32,
    ) -> Mask {
        let _span = tracing::debug_span!("postprocess").entered();

        let (logit_h, logit_w) = logits.dim();

        // Convert to grayscale probabilities for resizing
        let gray_image = image::GrayImage::from_fn(logit_w as u32, logit_h as u32, |x, y| {
            let logit = logits[[y as usize, x as usize]];
            let prob = 1.0 / (1.0 + (-logit).exp());
            image::Luma([(prob * 255.0).round().clamp(0.0, 255.0) as u8])
        });

        let resized = if (logit_w as u32, logit_h as u32) == (target_width, target_height) {
            gray_image
        } else {
            imageops::resize(
                &gray_image,
                target_width,
                target_height,
                imageops::FilterType::Triangle,
            )
        };

        Mask::from_fn(target_width, target_height, |x, y| {
            resized.get_pixel(x, y)[0] > 127
        })
    }
}
