//! V4L2 frame source.
//!
//! This module provides `V4l2Source` for capturing frames from local V4L2
//! devices and `V4l2Provider` for discovering them.
//!
//! The V4L2 source is responsible for:
//! - Opening a local device node (e.g., /dev/video0)
//! - Negotiating RGB24 or YUYV capture at the configured size
//! - Normalizing captured buffers to RGB24 `Frame`s
//! - Releasing the device on `close`

use std::sync::Arc;

use ouroboros::self_referencing;

use super::normalize::{normalize_to_rgb, PixelFormat};
use crate::clock::Clock;
use crate::error::DeviceError;
use crate::frame::Frame;
use crate::ingest::{CameraInfo, CameraProvider, FrameSource};

/// Configuration for a V4L2 source.
#[derive(Clone, Debug)]
pub struct V4l2Config {
    /// Device path (e.g., "/dev/video0")
    pub device: String,
    /// Requested frame rate. 0 leaves the driver default.
    pub target_fps: u32,
    /// Preferred frame width.
    pub width: u32,
    /// Preferred frame height.
    pub height: u32,
}

impl Default for V4l2Config {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            target_fps: 10,
            width: 640,
            height: 480,
        }
    }
}

/// Maps a bare index ("0") to its device node ("/dev/video0").
pub fn device_path(id: &str) -> String {
    if id.chars().all(|c| c.is_ascii_digit()) && !id.is_empty() {
        format!("/dev/video{}", id)
    } else {
        id.to_string()
    }
}

pub struct V4l2Provider {
    template: V4l2Config,
    max_probe: u32,
    clock: Arc<dyn Clock>,
}

impl V4l2Provider {
    pub fn new(template: V4l2Config, max_probe: u32, clock: Arc<dyn Clock>) -> Self {
        Self {
            template,
            max_probe,
            clock,
        }
    }

    fn source_for(&self, device: &str) -> V4l2Source {
        V4l2Source::new(
            V4l2Config {
                device: device_path(device),
                ..self.template.clone()
            },
            self.clock.clone(),
        )
    }
}

impl CameraProvider for V4l2Provider {
    /// Probes `/dev/video0..max_probe`; a device counts only if it opens
    /// and delivers one frame.
    fn candidates(&self) -> Result<Vec<CameraInfo>, DeviceError> {
        let mut found = Vec::new();
        for index in 0..self.max_probe {
            let path = format!("/dev/video{}", index);
            if !std::path::Path::new(&path).exists() {
                continue;
            }
            let mut source = self.source_for(&path);
            let probe = source
                .connect()
                .and_then(|_| source.next_frame())
                .map(|frame| frame.is_some());
            match probe {
                Ok(true) => found.push(CameraInfo {
                    id: path.clone(),
                    driver: source.driver.clone(),
                    width: source.active_width,
                    height: source.active_height,
                }),
                Ok(false) => log::debug!("V4l2Provider: {} produced no frame", path),
                Err(err) => log::debug!("V4l2Provider: skipping {}: {}", path, err),
            }
            source.close();
        }
        Ok(found)
    }

    fn open(&self, device: &str) -> Result<Box<dyn FrameSource>, DeviceError> {
        let mut source = self.source_for(device);
        source.connect()?;
        Ok(Box::new(source))
    }
}

/// V4L2 frame source using mmap streaming.
pub struct V4l2Source {
    config: V4l2Config,
    clock: Arc<dyn Clock>,
    state: Option<DeviceV4l2State>,
    format: PixelFormat,
    frame_count: u64,
    driver: String,
    active_width: u32,
    active_height: u32,
}

#[self_referencing]
struct DeviceV4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Source {
    pub fn new(config: V4l2Config, clock: Arc<dyn Clock>) -> Self {
        Self {
            active_width: config.width,
            active_height: config.height,
            config,
            clock,
            state: None,
            format: PixelFormat::Rgb24,
            frame_count: 0,
            driver: String::new(),
        }
    }

    fn init_failed(&self, reason: impl std::fmt::Display) -> DeviceError {
        DeviceError::InitFailed {
            device: self.config.device.clone(),
            reason: reason.to_string(),
        }
    }

    /// Open the device and start streaming.
    pub fn connect(&mut self) -> Result<(), DeviceError> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.config.device)
            .map_err(|e| self.init_failed(format!("open: {}", e)))?;
        self.driver = device
            .query_caps()
            .map(|caps| caps.card)
            .unwrap_or_else(|_| "v4l2".to_string());

        let mut format = device
            .format()
            .map_err(|e| self.init_failed(format!("read format: {}", e)))?;
        format.width = self.config.width;
        format.height = self.config.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Source: failed to set format on {}: {}",
                    self.config.device,
                    err
                );
                device
                    .format()
                    .map_err(|e| self.init_failed(format!("read format after set failure: {}", e)))?
            }
        };
        self.format = if format.fourcc == v4l::FourCC::new(b"RGB3") {
            PixelFormat::Rgb24
        } else if format.fourcc == v4l::FourCC::new(b"YUYV") {
            PixelFormat::Yuyv
        } else {
            return Err(self.init_failed(format!("unsupported pixel format {}", format.fourcc)));
        };

        if self.config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "V4l2Source: failed to set fps on {}: {}",
                    self.config.device,
                    err
                );
            }
        }

        self.active_width = format.width;
        self.active_height = format.height;

        let state = DeviceV4l2StateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
            },
        }
        .try_build()
        .map_err(|e| self.init_failed(format!("create buffer stream: {}", e)))?;
        self.state = Some(state);

        log::info!(
            "V4l2Source: connected to {} ({}x{} {:?})",
            self.config.device,
            self.active_width,
            self.active_height,
            self.format
        );
        Ok(())
    }
}

impl FrameSource for V4l2Source {
    fn device(&self) -> &str {
        &self.config.device
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, DeviceError> {
        use v4l::io::traits::CaptureStream;

        let Some(state) = self.state.as_mut() else {
            return Ok(None);
        };
        let (width, height, format) = (self.active_width, self.active_height, self.format);
        let pixels = state
            .with_mut(|fields| {
                fields.stream.next().map(|(buf, meta)| {
                    let used = meta.bytesused as usize;
                    let payload = if used > 0 && used <= buf.len() {
                        &buf[..used]
                    } else {
                        buf
                    };
                    normalize_to_rgb(payload, width, height, format)
                })
            })
            .map_err(|err| DeviceError::Capture {
                device: self.config.device.clone(),
                reason: err.to_string(),
            })?
            .map_err(|err| DeviceError::Capture {
                device: self.config.device.clone(),
                reason: err.to_string(),
            })?;

        self.frame_count += 1;
        Ok(Some(Frame::new(pixels, width, height, self.clock.now_ms())))
    }

    fn close(&mut self) {
        if self.state.take().is_some() {
            log::info!(
                "V4l2Source: released {} after {} frames",
                self.config.device,
                self.frame_count
            );
        }
    }
}
