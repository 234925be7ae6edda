#![cfg(feature = "backend-tract")]

use std::collections::HashMap;
use std::path::Path;

use tract_onnx::prelude::*;

use crate::detect::backend::InferenceBackend;
use crate::detect::preprocess::fit_and_resize;
use crate::detect::result::{DetectionResult, ModelInfo, ModelKind};
use crate::error::{InferenceError, ModelLoadError};
use crate::frame::Frame;

/// Tract-based backend for ONNX image classifiers.
///
/// The model must take a `1x3xHxW` f32 input in `0..1` and produce one score
/// per label. Labels come from configuration since ONNX files carry none.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>,
    info: ModelInfo,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        width: u32,
        height: u32,
        labels: Vec<String>,
    ) -> Result<Self, ModelLoadError> {
        let model_path = model_path.as_ref();
        if !model_path.is_file() {
            return Err(ModelLoadError::NotFound(model_path.to_path_buf()));
        }
        if labels.is_empty() {
            return Err(ModelLoadError::Handshake(
                "ONNX models need model.labels in the configuration".into(),
            ));
        }
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .and_then(|model| {
                model.with_input_fact(
                    0,
                    InferenceFact::dt_shape(
                        f32::datum_type(),
                        tvec!(1, 3, height as usize, width as usize),
                    ),
                )
            })
            .and_then(|model| model.into_optimized())
            .and_then(|model| model.into_runnable())
            .map_err(|e| {
                ModelLoadError::Handshake(format!(
                    "failed to prepare ONNX model {}: {}",
                    model_path.display(),
                    e
                ))
            })?;

        let project = model_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self {
            model,
            info: ModelInfo {
                owner: "onnx".to_string(),
                project,
                labels,
                input_width: width,
                input_height: height,
                channels: 3,
                kind: ModelKind::Classification,
            },
        })
    }

    fn build_input(&self, rgb: &[u8]) -> Tensor {
        let width = self.info.input_width as usize;
        let height = self.info.input_height as usize;
        tract_ndarray::Array4::from_shape_fn((1, 3, height, width), |(_, channel, y, x)| {
            rgb[(y * width + x) * 3 + channel] as f32 / 255.0
        })
        .into_tensor()
    }
}

impl InferenceBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn model_info(&self) -> &ModelInfo {
        &self.info
    }

    fn infer(&mut self, frame: &Frame) -> Result<DetectionResult, InferenceError> {
        let (rgb, _window) = fit_and_resize(frame, self.info.input_width, self.info.input_height)?;
        let input = self.build_input(&rgb);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .map_err(|e| InferenceError::Engine(format!("ONNX inference failed: {}", e)))?;
        let output = outputs
            .first()
            .ok_or_else(|| InferenceError::MalformedResult("model produced no outputs".into()))?;
        let scores = output
            .to_array_view::<f32>()
            .map_err(|_| InferenceError::MalformedResult("model output tensor was not f32".into()))?;

        let raw: HashMap<String, f32> = self
            .info
            .labels
            .iter()
            .zip(scores.iter())
            .map(|(label, score)| (label.clone(), if score.is_finite() { *score } else { 0.0 }))
            .collect();
        Ok(DetectionResult::classification_over(&self.info.labels, &raw))
    }
}
