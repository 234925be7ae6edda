//! Inference adapters.
//!
//! Every backend turns a `Frame` into a `DetectionResult` whose shape
//! (classification or boxes) is fixed here, at the adapter boundary. Nothing
//! downstream inspects raw engine output.

mod backend;
pub mod backends;
pub mod preprocess;
mod result;

pub use backend::InferenceBackend;
pub use backends::StubBackend;
pub use result::{BoundingBox, DetectionResult, LabelScore, ModelInfo, ModelKind};

use crate::error::ModelLoadError;

/// Turns a model reference into a running backend.
pub trait ModelLoader {
    fn load(&self, reference: &str) -> Result<Box<dyn InferenceBackend>, ModelLoadError>;
}

/// Chooses a backend from the shape of the model reference:
/// `stub://...` for the stub backend, `*.onnx` for tract (feature
/// `backend-tract`), anything else is treated as an Edge Impulse `.eim`
/// runner.
#[derive(Clone, Debug, Default)]
pub struct DefaultModelLoader {
    /// Label set for backends whose artifacts do not carry one (ONNX).
    pub labels: Vec<String>,
    /// Input size for ONNX models.
    pub onnx_input: (u32, u32),
}

impl ModelLoader for DefaultModelLoader {
    fn load(&self, reference: &str) -> Result<Box<dyn InferenceBackend>, ModelLoadError> {
        if reference.starts_with(backends::stub::STUB_SCHEME) {
            return Ok(Box::new(StubBackend::from_reference(reference)?));
        }
        if reference.contains("://") {
            return Err(ModelLoadError::Unsupported(reference.to_string()));
        }
        if reference.ends_with(".onnx") {
            #[cfg(feature = "backend-tract")]
            {
                let (width, height) = self.onnx_input;
                return Ok(Box::new(backends::TractBackend::new(
                    reference,
                    width,
                    height,
                    self.labels.clone(),
                )?));
            }
            #[cfg(not(feature = "backend-tract"))]
            {
                return Err(ModelLoadError::Unsupported(format!(
                    "{} (ONNX models require the backend-tract feature)",
                    reference
                )));
            }
        }
        #[cfg(unix)]
        {
            Ok(Box::new(backends::EimBackend::load(reference)?))
        }
        #[cfg(not(unix))]
        {
            Err(ModelLoadError::Unsupported(format!(
                "{} (eim runners need Unix sockets)",
                reference
            )))
        }
    }
}
