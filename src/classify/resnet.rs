use super::ImageClassifier;
use crate::segmentation::{Preprocessor, ResizeMode};
use anyhow::{anyhow, ensure, Context, Result};
use image::RgbImage;
use ndarray::ArrayViewD;
use ort::session::Session;
use ort::value::Tensor;
use std::path::Path;
use std::sync::Mutex;

/// ResNet image classifier exported to ONNX
///
/// Takes a [1, 3, H, W] ImageNet-normalised tensor and returns one logit per
/// class. Tensor names are read from the model, so any single-input export
/// works.
pub struct ResNetClassifier {
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
    num_classes: usize,
    preprocessor: Preprocessor,
    label: &'static str,
}

impl ResNetClassifier {
    /// Load a classifier whose input is resized so the shorter side is `input_side`
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        label: &'static str,
        input_side: u32,
        num_classes: usize,
        intra_threads: usize,
    ) -> Result<Self> {
        let model_path = model_path.as_ref();
        tracing::info!("Loading {} classifier from {}", label, model_path.display());

        let session = crate::segmentation::build_session(model_path, intra_threads)?;
        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .ok_or_else(|| anyhow!("{} model has no inputs", label))?;
        let output_name = session
            .outputs
            .first()
            .map(|output| output.name.clone())
            .ok_or_else(|| anyhow!("{} model has no outputs", label))?;

        tracing::debug!("{} classifier: {} -> {}", label, input_name, output_name);

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            output_name,
            num_classes,
            preprocessor: Preprocessor::new(ResizeMode::ShorterSide(input_side)),
            label,
        })
    }
}

/// Index of the largest logit; ties resolve to the lowest index
pub fn argmax(logits: ArrayViewD<f32>) -> Option<usize> {
    logits
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f32)>, (i, &v)| match best {
            Some((_, top)) if top >= v => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}

impl ImageClassifier for ResNetClassifier {
    fn predict_class(&self, image: &RgbImage) -> Result<usize> {
        let _span = tracing::debug_span!("classify", model = self.label).entered();

        let input_tensor = self.preprocessor.preprocess(image)?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| anyhow!("ONNX session lock poisoned"))?;
        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => Tensor::from_array(input_tensor)?])
            .with_context(|| format!("Failed to run {} classifier", self.label))?;

        let logits = outputs[self.output_name.as_str()].try_extract_array::<f32>()?;
        ensure!(
            logits.len() == self.num_classes,
            "{} classifier returned {} logits, expected {}",
            self.label,
            logits.len(),
            self.num_classes
        );

        let class = argmax(logits.view()).ok_or_else(|| anyhow!("empty logits"))?;
        tracing::debug!("{} classifier logits {:?} -> {}", self.label, logits.as_slice(), class);
        Ok(class)
    }

    fn name(&self) -> &str {
        self.label
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2};

    #[test]
    fn argmax_picks_largest_logit() {
        assert_eq!(argmax(arr2(&[[0.1, 2.5, -1.0, 0.3]]).into_dyn().view()), Some(1));
        assert_eq!(argmax(arr1(&[-3.0, -2.0]).into_dyn().view()), Some(1));
    }

    #[test]
    fn argmax_ties_go_to_first() {
        assert_eq!(argmax(arr1(&[1.0, 1.0, 0.5]).into_dyn().view()), Some(0));
        assert_eq!(argmax(arr1::<f32>(&[]).into_dyn().view()), None);
    }
}
