use std::collections::HashMap;

use sha2::{Digest, Sha256};

use crate::detect::backend::InferenceBackend;
use crate::detect::result::{BoundingBox, DetectionResult, ModelInfo, ModelKind};
use crate::error::{InferenceError, ModelLoadError};
use crate::frame::Frame;

pub const STUB_SCHEME: &str = "stub://";
const DEFAULT_LABELS: &[&str] = &["Aphid", "Beetle", "Grasshopper"];

/// Stub backend for dry runs. Derives deterministic results from a hash of
/// the frame pixels, so identical frames always produce identical results.
///
/// Model references look like `stub://detection` or
/// `stub://classification?labels=a,b,c`.
pub struct StubBackend {
    info: ModelInfo,
}

impl StubBackend {
    /// An empty label set falls back to the built-in pest labels.
    pub fn new(kind: ModelKind, labels: Vec<String>) -> Self {
        let labels = if labels.is_empty() {
            default_labels()
        } else {
            labels
        };
        Self {
            info: ModelInfo {
                owner: "stub".to_string(),
                project: match kind {
                    ModelKind::Classification => "classification".to_string(),
                    ModelKind::ObjectDetection => "detection".to_string(),
                },
                labels,
                input_width: 96,
                input_height: 96,
                channels: 3,
                kind,
            },
        }
    }

    pub fn from_reference(reference: &str) -> Result<Self, ModelLoadError> {
        let rest = reference
            .strip_prefix(STUB_SCHEME)
            .ok_or_else(|| ModelLoadError::Unsupported(reference.to_string()))?;
        let (kind, query) = rest.split_once('?').unwrap_or((rest, ""));
        let kind = match kind {
            "classification" => ModelKind::Classification,
            "detection" | "" => ModelKind::ObjectDetection,
            _ => return Err(ModelLoadError::Unsupported(reference.to_string())),
        };
        let labels = query
            .split('&')
            .find_map(|pair| pair.strip_prefix("labels="))
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        Ok(Self::new(kind, labels))
    }
}

fn default_labels() -> Vec<String> {
    DEFAULT_LABELS.iter().map(|l| l.to_string()).collect()
}

impl InferenceBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn model_info(&self) -> &ModelInfo {
        &self.info
    }

    fn infer(&mut self, frame: &Frame) -> Result<DetectionResult, InferenceError> {
        frame.validate_rgb()?;
        let digest: [u8; 32] = Sha256::digest(frame.pixels()).into();
        let labels = &self.info.labels;

        match self.info.kind {
            ModelKind::Classification => {
                let raw: HashMap<String, f32> = labels
                    .iter()
                    .enumerate()
                    .map(|(i, label)| (label.clone(), digest[i % 32] as f32 / 255.0))
                    .collect();
                Ok(DetectionResult::classification_over(labels, &raw))
            }
            ModelKind::ObjectDetection => {
                let count = (digest[0] % 3) as usize;
                let boxes = (0..count)
                    .map(|i| {
                        let base = 1 + i * 6;
                        let width = (frame.width / 8).max(1);
                        let height = (frame.height / 8).max(1);
                        BoundingBox {
                            label: labels[digest[base] as usize % labels.len()].clone(),
                            confidence: digest[base + 1] as f32 / 255.0,
                            x: digest[base + 2] as u32 * (frame.width - width) / 255,
                            y: digest[base + 3] as u32 * (frame.height - height) / 255,
                            width,
                            height,
                        }
                    })
                    .collect();
                Ok(DetectionResult::Detections(boxes))
            }
        }
    }
}
