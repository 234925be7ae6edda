use crate::error::DeviceError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PixelFormat {
    Rgb24,
    /// Packed 4:2:2, two pixels per `Y0 U Y1 V` quad. The usual UVC webcam format.
    Yuyv,
}

pub(crate) fn normalize_to_rgb(
    pixels: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Result<Vec<u8>, DeviceError> {
    let pixel_count = (width as usize)
        .checked_mul(height as usize)
        .ok_or_else(|| mismatch("frame dimensions overflow".to_string()))?;
    match format {
        PixelFormat::Rgb24 => {
            let expected = pixel_count * 3;
            if pixels.len() < expected {
                return Err(mismatch(format!(
                    "RGB frame length mismatch: expected {}, got {}",
                    expected,
                    pixels.len()
                )));
            }
            Ok(pixels[..expected].to_vec())
        }
        PixelFormat::Yuyv => yuyv_to_rgb(pixels, pixel_count),
    }
}

fn mismatch(reason: String) -> DeviceError {
    DeviceError::Capture {
        device: "v4l2".to_string(),
        reason,
    }
}

fn yuyv_to_rgb(pixels: &[u8], pixel_count: usize) -> Result<Vec<u8>, DeviceError> {
    let expected = pixel_count * 2;
    if pixels.len() < expected || pixel_count % 2 != 0 {
        return Err(mismatch(format!(
            "YUYV frame length mismatch: expected {}, got {}",
            expected,
            pixels.len()
        )));
    }

    let mut rgb = Vec::with_capacity(pixel_count * 3);
    for quad in pixels[..expected].chunks_exact(4) {
        let u = quad[1] as f32 - 128.0;
        let v = quad[3] as f32 - 128.0;
        for y in [quad[0] as f32, quad[2] as f32] {
            let r = y + 1.402_f32 * v;
            let g = y - 0.344_136_f32 * u - 0.714_136_f32 * v;
            let b = y + 1.772_f32 * u;
            rgb.push(r.clamp(0.0, 255.0) as u8);
            rgb.push(g.clamp(0.0, 255.0) as u8);
            rgb.push(b.clamp(0.0, 255.0) as u8);
        }
    }
    Ok(rgb)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgb_passthrough_trims_padding() {
        let out = normalize_to_rgb(&[1, 2, 3, 4, 5, 6, 0, 0], 2, 1, PixelFormat::Rgb24).unwrap();
        assert_eq!(out, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn yuyv_gray_maps_to_gray() {
        let out = normalize_to_rgb(&[100, 128, 200, 128], 2, 1, PixelFormat::Yuyv).unwrap();
        assert_eq!(out, vec![100, 100, 100, 200, 200, 200]);
    }

    #[test]
    fn short_yuyv_frame_is_rejected() {
        assert!(normalize_to_rgb(&[0; 6], 2, 2, PixelFormat::Yuyv).is_err());
    }
}
