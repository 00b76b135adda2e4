mod preprocess;
mod sam2;
pub mod selection;
pub mod types;

pub use preprocess::{Preprocessor, ResizeMode};
pub use sam2::Sam2Predictor;
pub use types::{ImageEmbedding, Mask, PointLabel, PointPrompt, PromptSegmenter, ScoredMask};

use anyhow::{Context, Result};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use std::path::Path;
use std::sync::Arc;

/// Create the default promptable segmenter (SAM2 encoder/decoder pair)
pub fn create_default_model(
    encoder_path: &Path,
    decoder_path: &Path,
    intra_threads: usize,
) -> Result<Arc<dyn PromptSegmenter>> {
    let model = Sam2Predictor::new(encoder_path, decoder_path, intra_threads)?;
    Ok(Arc::new(model))
}

/// Open an ONNX Runtime session with the settings shared by every model
pub(crate) fn build_session(path: &Path, intra_threads: usize) -> Result<Session> {
    let builder = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(intra_threads)?;

    #[cfg(feature = "cuda")]
    let builder = builder.with_execution_providers([
        ort::execution_providers::CUDAExecutionProvider::default().build(),
    ])?;

    builder
        .commit_from_file(path)
        .with_context(|| format!("Failed to load model from {}", path.display()))
}
