//! Synthetic frame source.
//!
//! `stub://` devices generate patterned RGB frames in memory. They are used
//! for dry runs without a camera and by the test suite. A frame limit turns
//! the source into a finite stream that ends with end-of-stream.

use std::sync::Arc;

use crate::clock::Clock;
use crate::error::DeviceError;
use crate::frame::Frame;
use crate::ingest::{CameraInfo, CameraProvider, FrameSource};

pub const SYNTHETIC_SCHEME: &str = "stub://";

#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    pub width: u32,
    pub height: u32,
    /// Frames to produce before end of stream. 0 means unbounded.
    pub frame_limit: u64,
    /// Number of devices reported by discovery.
    pub devices: usize,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            frame_limit: 0,
            devices: 1,
        }
    }
}

pub struct SyntheticProvider {
    config: SyntheticConfig,
    clock: Arc<dyn Clock>,
}

impl SyntheticProvider {
    pub fn new(config: SyntheticConfig, clock: Arc<dyn Clock>) -> Self {
        Self { config, clock }
    }
}

impl CameraProvider for SyntheticProvider {
    fn candidates(&self) -> Result<Vec<CameraInfo>, DeviceError> {
        Ok((0..self.config.devices)
            .map(|i| CameraInfo {
                id: format!("{}camera{}", SYNTHETIC_SCHEME, i),
                driver: "synthetic".to_string(),
                width: self.config.width,
                height: self.config.height,
            })
            .collect())
    }

    fn open(&self, device: &str) -> Result<Box<dyn FrameSource>, DeviceError> {
        let device = if device.starts_with(SYNTHETIC_SCHEME) {
            device.to_string()
        } else {
            format!("{}camera{}", SYNTHETIC_SCHEME, device)
        };
        let mut source = SyntheticSource::new(device, self.config.clone(), self.clock.clone());
        source.connect();
        Ok(Box::new(source))
    }
}

pub struct SyntheticSource {
    device: String,
    config: SyntheticConfig,
    clock: Arc<dyn Clock>,
    frame_count: u64,
    /// Simulated "scene" state, changes every 50 frames.
    scene_state: u8,
    open: bool,
}

impl SyntheticSource {
    pub fn new(device: String, config: SyntheticConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            device,
            config,
            clock,
            frame_count: 0,
            scene_state: 0,
            open: false,
        }
    }

    /// Synthetic sources are always available.
    pub fn connect(&mut self) {
        log::info!("SyntheticSource: connected to {}", self.device);
        self.open = true;
    }

    fn generate_pixels(&mut self) -> Vec<u8> {
        let pixel_count = (self.config.width * self.config.height * 3) as usize;
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count + self.scene_state as u64) % 256) as u8;
        }
        pixels
    }
}

impl FrameSource for SyntheticSource {
    fn device(&self) -> &str {
        &self.device
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, DeviceError> {
        if !self.open {
            return Ok(None);
        }
        if self.config.frame_limit > 0 && self.frame_count >= self.config.frame_limit {
            return Ok(None);
        }
        self.frame_count += 1;
        let pixels = self.generate_pixels();
        Ok(Some(Frame::new(
            pixels,
            self.config.width,
            self.config.height,
            self.clock.now_ms(),
        )))
    }

    fn close(&mut self) {
        if self.open {
            log::info!(
                "SyntheticSource: closed {} after {} frames",
                self.device,
                self.frame_count
            );
        }
        self.open = false;
    }
}
