use anyhow::Result;
use image::{GrayImage, Luma, RgbImage};
use ndarray::{Array2, ArrayD, Zip};

/// Binary mask: `true` = segmented region
/// Shape is (height, width) and matches the image it was predicted for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    grid: Array2<bool>,
}

impl Mask {
    /// All-background mask of the given size
    pub fn empty(width: u32, height: u32) -> Self {
        Self {
            grid: Array2::from_elem((height as usize, width as usize), false),
        }
    }

    pub fn from_fn(width: u32, height: u32, f: impl Fn(u32, u32) -> bool) -> Self {
        Self {
            grid: Array2::from_shape_fn((height as usize, width as usize), |(y, x)| {
                f(x as u32, y as u32)
            }),
        }
    }

    /// Read a 0/255 grayscale image back into a mask (any non-zero value is set)
    #[cfg(test)]
    pub fn from_luma(image: &GrayImage) -> Self {
        let (width, height) = image.dimensions();
        Self::from_fn(width, height, |x, y| image.get_pixel(x, y)[0] > 0)
    }

    /// Returns (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        let (h, w) = self.grid.dim();
        (w as u32, h as u32)
    }

    pub fn get(&self, x: u32, y: u32) -> bool {
        self.grid[[y as usize, x as usize]]
    }

    pub fn count(&self) -> usize {
        self.grid.iter().filter(|&&v| v).count()
    }

    pub fn is_empty(&self) -> bool {
        !self.grid.iter().any(|&v| v)
    }

    /// Fraction of pixels set, in [0, 1]
    pub fn foreground_fraction(&self) -> f64 {
        let total = self.grid.len();
        if total == 0 {
            return 0.0;
        }
        self.count() as f64 / total as f64
    }

    /// Pixel-wise OR
    pub fn union(&self, other: &Mask) -> Mask {
        let mut grid = self.grid.clone();
        Zip::from(&mut grid)
            .and(&other.grid)
            .for_each(|a, &b| *a = *a || b);
        Mask { grid }
    }

    /// Pixel-wise `clip(self - other, 0, 1)`
    pub fn subtract(&self, other: &Mask) -> Mask {
        let mut grid = self.grid.clone();
        Zip::from(&mut grid)
            .and(&other.grid)
            .for_each(|a, &b| *a = *a && !b);
        Mask { grid }
    }

    /// Encode as a 0/255 grayscale image for export
    pub fn to_luma(&self) -> GrayImage {
        let (width, height) = self.dimensions();
        GrayImage::from_fn(width, height, |x, y| {
            Luma([if self.get(x, y) { 255 } else { 0 }])
        })
    }
}

/// A candidate mask with the model's confidence (predicted IoU)
#[derive(Debug, Clone)]
pub struct ScoredMask {
    pub mask: Mask,
    pub score: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointLabel {
    Foreground,
    Background,
}

impl PointLabel {
    /// Label value the decoder expects (1 = foreground, 0 = background)
    pub fn as_model_value(self) -> f32 {
        match self {
            PointLabel::Foreground => 1.0,
            PointLabel::Background => 0.0,
        }
    }
}

/// One user click. Never mutated after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointPrompt {
    pub x: u32,
    pub y: u32,
    pub label: PointLabel,
    pub object_id: Option<u32>,
}

impl PointPrompt {
    pub fn new(x: u32, y: u32, label: PointLabel) -> Self {
        Self {
            x,
            y,
            label,
            object_id: None,
        }
    }

    pub fn with_object(mut self, object_id: u32) -> Self {
        self.object_id = Some(object_id);
        self
    }
}

/// Image features computed once per uploaded image
///
/// `features` holds the named tensors produced by the encoder; stub
/// segmenters may leave it empty.
#[derive(Debug, Clone)]
pub struct ImageEmbedding {
    pub image_size: (u32, u32),
    pub features: Vec<(String, ArrayD<f32>)>,
}

impl ImageEmbedding {
    pub fn feature(&self, name: &str) -> Option<&ArrayD<f32>> {
        self.features
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, tensor)| tensor)
    }
}

/// Trait for promptable segmentation models
/// Allows swapping the SAM2 ONNX backend for a deterministic stub in tests
pub trait PromptSegmenter: Send + Sync {
    /// Compute the image embedding
    ///
    /// This is the expensive step; call it once per uploaded image and reuse
    /// the result for every prompt on that image.
    fn prime(&self, image: &RgbImage) -> Result<ImageEmbedding>;

    /// Decode candidate masks for a batch of points
    ///
    /// Each point is decoded independently. Returns one candidate list per
    /// point, in input order. With `multimask_output` the model proposes
    /// several candidates per point, otherwise exactly one.
    fn predict(
        &self,
        embedding: &ImageEmbedding,
        points: &[(u32, u32)],
        labels: &[PointLabel],
        multimask_output: bool,
    ) -> Result<Vec<Vec<ScoredMask>>>;

    /// Human-readable backend name for logs
    fn name(&self) -> &str {
        "segmenter"
    }
}
