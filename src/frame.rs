//! Captured frames.
//!
//! `Frame` is an opaque RGB24 buffer with its capture time on the shared
//! monotonic clock. Frames are produced by a `FrameSource`, lent to the
//! inference backend, and dropped at the end of the loop iteration. There is
//! no `Clone`; nothing in the pipeline retains a frame past its iteration.

use crate::error::InferenceError;

pub struct Frame {
    /// Packed RGB24 pixel data, row-major.
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Capture time in milliseconds on the source's clock.
    pub captured_at_ms: u64,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, captured_at_ms: u64) -> Self {
        Self {
            data,
            width,
            height,
            captured_at_ms,
        }
    }

    /// Read-only pixel access for inference backends.
    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    /// Checks that the buffer holds exactly `width * height * 3` bytes.
    pub fn validate_rgb(&self) -> Result<(), InferenceError> {
        let expected = (self.width as usize)
            .checked_mul(self.height as usize)
            .and_then(|v| v.checked_mul(3))
            .unwrap_or(usize::MAX);
        if self.data.len() != expected || expected == 0 {
            return Err(InferenceError::InputMismatch {
                width: self.width,
                height: self.height,
                expected,
                actual: self.data.len(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Pixel contents stay out of debug output.
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .field("captured_at_ms", &self.captured_at_ms)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rgb_accepts_exact_length() {
        let frame = Frame::new(vec![0u8; 4 * 2 * 3], 4, 2, 0);
        assert!(frame.validate_rgb().is_ok());
    }

    #[test]
    fn validate_rgb_rejects_short_buffer() {
        let frame = Frame::new(vec![0u8; 10], 4, 2, 0);
        match frame.validate_rgb() {
            Err(InferenceError::InputMismatch {
                expected, actual, ..
            }) => {
                assert_eq!(expected, 24);
                assert_eq!(actual, 10);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn debug_output_omits_pixels() {
        let frame = Frame::new(vec![7u8; 12], 2, 2, 5);
        let text = format!("{frame:?}");
        assert!(text.contains("bytes: 12"));
        assert!(!text.contains("[7"));
    }
}
