mod resnet;

pub use resnet::ResNetClassifier;

use anyhow::Result;
use image::RgbImage;
use std::path::Path;
use std::sync::Arc;

/// Shorter-side input size of the avalanche pre-filter
const SPAM_INPUT_SIDE: u32 = 224;

/// Shorter-side input size of the avalanche-type model
const TYPE_INPUT_SIDE: u32 = 704;

/// Trait for whole-image classifiers
pub trait ImageClassifier: Send + Sync {
    /// Predict the class index of an image
    fn predict_class(&self, image: &RgbImage) -> Result<usize>;

    fn name(&self) -> &str {
        "classifier"
    }
}

/// Class 0 of the pre-filter means "not an avalanche photo"
pub fn is_spam(class: usize) -> bool {
    class == 0
}

/// Classes of the avalanche-type model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvalancheKind {
    None,
    Slab,
    Loose,
    Glide,
}

impl AvalancheKind {
    pub const ALL: [AvalancheKind; 4] = [
        AvalancheKind::None,
        AvalancheKind::Slab,
        AvalancheKind::Loose,
        AvalancheKind::Glide,
    ];

    pub fn from_class(class: usize) -> Option<Self> {
        Self::ALL.get(class).copied()
    }

    pub fn label(self) -> &'static str {
        match self {
            AvalancheKind::None => "none",
            AvalancheKind::Slab => "slab",
            AvalancheKind::Loose => "loose",
            AvalancheKind::Glide => "glide",
        }
    }
}

/// Binary avalanche / not-avalanche pre-filter
pub fn create_spam_filter(model_path: &Path, intra_threads: usize) -> Result<Arc<dyn ImageClassifier>> {
    let model = ResNetClassifier::new(model_path, "spam", SPAM_INPUT_SIDE, 2, intra_threads)?;
    Ok(Arc::new(model))
}

/// Four-class avalanche-type classifier
pub fn create_type_classifier(model_path: &Path, intra_threads: usize) -> Result<Arc<dyn ImageClassifier>> {
    let model = ResNetClassifier::new(
        model_path,
        "avalanche type",
        TYPE_INPUT_SIDE,
        AvalancheKind::ALL.len(),
        intra_threads,
    )?;
    Ok(Arc::new(model))
}
