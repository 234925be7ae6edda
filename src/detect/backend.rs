use crate::detect::result::{DetectionResult, ModelInfo};
use crate::error::InferenceError;
use crate::frame::Frame;

/// Inference backend trait.
///
/// A backend wraps one loaded model. The loop calls `infer` once per paced
/// tick with a borrowed frame; failures are per-frame and never retried.
pub trait InferenceBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Metadata of the loaded model, including its fixed label set.
    fn model_info(&self) -> &ModelInfo;

    /// Run inference on one frame.
    ///
    /// Implementations must treat the frame as read-only and must not keep
    /// the pixel slice beyond the call.
    fn infer(&mut self, frame: &Frame) -> Result<DetectionResult, InferenceError>;

    /// Release engine resources. Called once during shutdown.
    fn stop(&mut self) {}
}
