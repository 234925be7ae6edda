//! Frame ingestion sources.
//!
//! This module provides the capture side of the loop:
//! - `FrameSource`: an open capture device yielding frames until end of stream
//! - `CameraProvider`: discovery and opening of capture devices
//! - USB/V4L2 devices (feature: ingest-v4l2)
//! - Synthetic `stub://` devices (testing and dry runs)
//!
//! Exactly one device is open per process. When no device id is given the
//! provider's candidates are probed and anything other than exactly one
//! working device is an error.

#[cfg(feature = "ingest-v4l2")]
mod normalize;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

pub use synthetic::{SyntheticConfig, SyntheticProvider, SyntheticSource};
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::{V4l2Config, V4l2Provider, V4l2Source};

use crate::error::DeviceError;
use crate::frame::Frame;

/// An open capture device.
pub trait FrameSource {
    /// Device identifier this source was opened with.
    fn device(&self) -> &str;

    /// Pull the next frame. `Ok(None)` signals end of stream.
    fn next_frame(&mut self) -> Result<Option<Frame>, DeviceError>;

    /// Release the device handle. Further reads return end of stream.
    fn close(&mut self);
}

/// A capture device that opened and delivered a frame during probing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CameraInfo {
    pub id: String,
    pub driver: String,
    pub width: u32,
    pub height: u32,
}

/// Discovers and opens capture devices.
pub trait CameraProvider {
    /// Devices that are present and deliver frames.
    fn candidates(&self) -> Result<Vec<CameraInfo>, DeviceError>;

    /// Open a device by identifier.
    fn open(&self, device: &str) -> Result<Box<dyn FrameSource>, DeviceError>;
}

/// Resolve which device to open.
///
/// An explicit id is used as given. Without one, exactly one candidate must
/// exist; zero is `NotFound` and more than one is `Ambiguous`.
pub fn select_device(
    provider: &dyn CameraProvider,
    requested: Option<&str>,
) -> Result<String, DeviceError> {
    if let Some(device) = requested {
        return Ok(device.to_string());
    }
    let candidates = provider.candidates()?;
    for camera in &candidates {
        log::info!(
            "camera {} ({} x {}) found at {}",
            camera.driver,
            camera.width,
            camera.height,
            camera.id
        );
    }
    match candidates.len() {
        0 => Err(DeviceError::NotFound),
        1 => Ok(candidates[0].id.clone()),
        _ => Err(DeviceError::Ambiguous(
            candidates.into_iter().map(|c| c.id).collect(),
        )),
    }
}
