use super::preprocess::{Preprocessor, ResizeMode};
use super::types::{ImageEmbedding, PointLabel, PromptSegmenter, ScoredMask};
use anyhow::{anyhow, ensure, Context, Result};
use image::RgbImage;
use ndarray::{Array1, Array2, Array3, Array4, ArrayD, Axis, Ix4};
use ort::session::Session;
use ort::value::Tensor;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Side length of the square grid the SAM2 encoder works on
const MODEL_SIDE: u32 = 1024;

/// Side length of the decoder's low-resolution mask input
const LOW_RES_SIDE: usize = 256;

/// Encoder outputs handed to the decoder, by tensor name
const EMBEDDING_OUTPUTS: [&str; 3] = ["image_embed", "high_res_feats_0", "high_res_feats_1"];

/// SAM2 promptable segmentation via an exported encoder/decoder ONNX pair
///
/// The encoder runs once per image (`prime`); the decoder runs per prompt
/// batch against the cached embedding. Each point is decoded as its own batch
/// entry, so the result for one point never depends on the others.
pub struct Sam2Predictor {
    encoder: Mutex<Session>,
    decoder: Mutex<Session>,
    preprocessor: Preprocessor,
}

impl Sam2Predictor {
    /// Load the encoder and decoder ONNX files
    ///
    /// # Default Configuration
    /// - Input size: 1024x1024, stretched (SAM2 image predictor convention)
    /// - Normalization: ImageNet mean/std
    pub fn new<P: AsRef<Path>>(encoder_path: P, decoder_path: P, intra_threads: usize) -> Result<Self> {
        let encoder_path = encoder_path.as_ref();
        let decoder_path = decoder_path.as_ref();

        tracing::info!("Loading SAM2 encoder from {}", encoder_path.display());
        let encoder = super::build_session(encoder_path, intra_threads)?;

        tracing::info!("Loading SAM2 decoder from {}", decoder_path.display());
        let decoder = super::build_session(decoder_path, intra_threads)?;

        tracing::info!("SAM2 model loaded successfully");

        Ok(Self {
            encoder: Mutex::new(encoder),
            decoder: Mutex::new(decoder),
            preprocessor: Preprocessor::new(ResizeMode::Exact(MODEL_SIDE, MODEL_SIDE)),
        })
    }

    fn lock(session: &Mutex<Session>) -> Result<MutexGuard<'_, Session>> {
        session
            .lock()
            .map_err(|_| anyhow!("ONNX session lock poisoned"))
    }

    /// Build the per-point decoder inputs: coords [N, 1, 2] and labels [N, 1]
    fn prompt_tensors(
        &self,
        points: &[(u32, u32)],
        labels: &[PointLabel],
        image_size: (u32, u32),
    ) -> Result<(Array3<f32>, Array2<f32>)> {
        let n = points.len();

        let mut coords = Vec::with_capacity(n * 2);
        for &point in points {
            let (x, y) = self.preprocessor.scale_point(point, image_size);
            coords.push(x);
            coords.push(y);
        }
        let coords = Array3::from_shape_vec((n, 1, 2), coords)
            .context("Failed to shape point coordinates")?;

        let labels = Array2::from_shape_vec(
            (n, 1),
            labels.iter().map(|l| l.as_model_value()).collect(),
        )
        .context("Failed to shape point labels")?;

        Ok((coords, labels))
    }

    /// Repeat a [1, C, H, W] feature map along the batch axis
    fn batched(feature: &ArrayD<f32>, n: usize) -> Result<Array4<f32>> {
        let feature = feature
            .view()
            .into_dimensionality::<Ix4>()
            .context("Embedding tensor is not 4-dimensional")?;
        let views = vec![feature; n];
        Ok(ndarray::concatenate(Axis(0), &views)?)
    }
}

impl PromptSegmenter for Sam2Predictor {
    fn prime(&self, image: &RgbImage) -> Result<ImageEmbedding> {
        let _span = tracing::debug_span!("sam2_encode").entered();

        let input_tensor = self.preprocessor.preprocess(image)?;

        let mut encoder = Self::lock(&self.encoder)?;
        let outputs = encoder
            .run(ort::inputs!["image" => Tensor::from_array(input_tensor)?])
            .context("Failed to run SAM2 encoder")?;

        let mut features = Vec::with_capacity(EMBEDDING_OUTPUTS.len());
        for name in EMBEDDING_OUTPUTS {
            let tensor = outputs[name]
                .try_extract_array::<f32>()
                .with_context(|| format!("Missing encoder output {name}"))?
                .to_owned();
            tracing::debug!("Encoder output {}: {:?}", name, tensor.shape());
            features.push((name.to_string(), tensor));
        }

        Ok(ImageEmbedding {
            image_size: image.dimensions(),
            features,
        })
    }

    fn predict(
        &self,
        embedding: &ImageEmbedding,
        points: &[(u32, u32)],
        labels: &[PointLabel],
        multimask_output: bool,
    ) -> Result<Vec<Vec<ScoredMask>>> {
        let _span = tracing::debug_span!("sam2_decode", points = points.len()).entered();

        ensure!(
            points.len() == labels.len(),
            "{} points but {} labels",
            points.len(),
            labels.len()
        );
        if points.is_empty() {
            return Ok(Vec::new());
        }

        let n = points.len();
        let (width, height) = embedding.image_size;
        let (coords, point_labels) = self.prompt_tensors(points, labels, embedding.image_size)?;

        let feature = |name: &str| {
            embedding
                .feature(name)
                .ok_or_else(|| anyhow!("Embedding has no {name} tensor"))
        };
        let image_embed = Self::batched(feature("image_embed")?, n)?;
        let high_res_0 = Self::batched(feature("high_res_feats_0")?, n)?;
        let high_res_1 = Self::batched(feature("high_res_feats_1")?, n)?;

        // No previous low-res mask is fed back in
        let mask_input = Array4::<f32>::zeros((n, 1, LOW_RES_SIDE, LOW_RES_SIDE));
        let has_mask_input = Array1::<f32>::zeros(n);

        let mut decoder = Self::lock(&self.decoder)?;
        let outputs = decoder
            .run(ort::inputs![
                "image_embed" => Tensor::from_array(image_embed)?,
                "high_res_feats_0" => Tensor::from_array(high_res_0)?,
                "high_res_feats_1" => Tensor::from_array(high_res_1)?,
                "point_coords" => Tensor::from_array(coords)?,
                "point_labels" => Tensor::from_array(point_labels)?,
                "mask_input" => Tensor::from_array(mask_input)?,
                "has_mask_input" => Tensor::from_array(has_mask_input)?,
            ])
            .context("Failed to run SAM2 decoder")?;

        // masks: [N, K, h, w] logits, iou_predictions: [N, K]
        let masks = outputs["masks"]
            .try_extract_array::<f32>()?
            .into_dimensionality::<Ix4>()
            .context("Decoder masks are not 4-dimensional")?;
        let scores = outputs["iou_predictions"]
            .try_extract_array::<f32>()?
            .into_dimensionality::<ndarray::Ix2>()
            .context("Decoder scores are not 2-dimensional")?;

        ensure!(
            masks.shape()[0] == n && scores.shape()[0] == n,
            "Decoder returned {} masks for {} points",
            masks.shape()[0],
            n
        );

        // Single-mask output is the first candidate by SAM convention
        let per_point = if multimask_output { masks.shape()[1] } else { 1 };

        let mut results = Vec::with_capacity(n);
        for i in 0..n {
            let mut candidates = Vec::with_capacity(per_point);
            for k in 0..per_point {
                let logits = masks.index_axis(Axis(0), i);
                let logits = logits.index_axis(Axis(0), k);
                candidates.push(ScoredMask {
                    mask: Preprocessor::postprocess_logits(logits, width, height),
                    score: scores[[i, k]],
                });
            }
            results.push(candidates);
        }

        Ok(results)
    }

    fn name(&self) -> &str {
        "sam2"
    }
}
