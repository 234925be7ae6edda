//! Frame preprocessing shared by the model backends.
//!
//! Frames are center-cropped to the model's aspect ratio (fit shortest side)
//! and resized with nearest-neighbour sampling. The crop window is kept so
//! boxes reported in model-input space can be mapped back to frame pixels.

use crate::detect::result::BoundingBox;
use crate::error::InferenceError;
use crate::frame::Frame;

/// Region of the source frame that was scaled into the model input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CropWindow {
    pub x0: u32,
    pub y0: u32,
    pub width: u32,
    pub height: u32,
    pub out_width: u32,
    pub out_height: u32,
    frame_width: u32,
    frame_height: u32,
}

impl CropWindow {
    pub fn fit_shortest(frame_width: u32, frame_height: u32, out_width: u32, out_height: u32) -> Self {
        let fw = frame_width as u64;
        let fh = frame_height as u64;
        let ow = out_width.max(1) as u64;
        let oh = out_height.max(1) as u64;

        // Compare aspect ratios without floats: fw/fh vs ow/oh.
        let (width, height) = if fw * oh > ow * fh {
            ((fh * ow / oh).max(1), fh)
        } else {
            (fw, (fw * oh / ow).max(1))
        };
        Self {
            x0: ((fw - width) / 2) as u32,
            y0: ((fh - height) / 2) as u32,
            width: width as u32,
            height: height as u32,
            out_width,
            out_height,
            frame_width,
            frame_height,
        }
    }

    /// Map a box from model-input coordinates back into frame pixels.
    pub fn to_frame(&self, bbox: BoundingBox) -> BoundingBox {
        let sx = self.width as f64 / self.out_width.max(1) as f64;
        let sy = self.height as f64 / self.out_height.max(1) as f64;
        let x = (self.x0 as f64 + bbox.x as f64 * sx).round() as u32;
        let y = (self.y0 as f64 + bbox.y as f64 * sy).round() as u32;
        let x = x.min(self.frame_width);
        let y = y.min(self.frame_height);
        let width = ((bbox.width as f64 * sx).round() as u32).min(self.frame_width - x);
        let height = ((bbox.height as f64 * sy).round() as u32).min(self.frame_height - y);
        BoundingBox {
            x,
            y,
            width,
            height,
            ..bbox
        }
    }
}

/// Crop and resize `frame` to `out_width` x `out_height` RGB24.
pub fn fit_and_resize(
    frame: &Frame,
    out_width: u32,
    out_height: u32,
) -> Result<(Vec<u8>, CropWindow), InferenceError> {
    frame.validate_rgb()?;
    let window = CropWindow::fit_shortest(frame.width, frame.height, out_width, out_height);
    let src = frame.pixels();
    let src_stride = frame.width as usize * 3;

    let mut out = Vec::with_capacity(out_width as usize * out_height as usize * 3);
    for oy in 0..out_height as u64 {
        let sy = window.y0 as u64 + oy * window.height as u64 / out_height as u64;
        let row = sy as usize * src_stride;
        for ox in 0..out_width as u64 {
            let sx = window.x0 as u64 + ox * window.width as u64 / out_width as u64;
            let idx = row + sx as usize * 3;
            out.extend_from_slice(&src[idx..idx + 3]);
        }
    }
    Ok((out, window))
}

/// Pack RGB24 pixels into one feature per pixel as `0xRRGGBB`.
///
/// With `channels == 1` each pixel is reduced to its luma and replicated into
/// all three bytes.
pub fn pack_features(rgb: &[u8], channels: u32) -> Vec<f32> {
    rgb.chunks_exact(3)
        .map(|px| {
            let (r, g, b) = (px[0] as u32, px[1] as u32, px[2] as u32);
            let packed = if channels == 1 {
                let luma = (299 * r + 587 * g + 114 * b + 500) / 1000;
                (luma << 16) | (luma << 8) | luma
            } else {
                (r << 16) | (g << 8) | b
            };
            packed as f32
        })
        .collect()
}
