use anyhow::anyhow;
use image::RgbImage;
use thiserror::Error;

/// A single video frame as handed over by the transport.
///
/// `pts` is the presentation timestamp assigned by the source. Two frames with
/// the same `pts` are the same picture; the stream health monitor relies on this
/// to tell a stalled source from a live one.
#[derive(Clone, Debug)]
pub struct Frame {
    pub pts: i64,
    pub width: u32,
    pub height: u32,
    pub format: FrameFormat,
    pub data: Vec<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameFormat {
    /// Packed 8-bit BGR, row major.
    Bgr8,
    /// Packed 8-bit RGB, row major.
    Rgb8,
    /// A complete JPEG bitstream; `width`/`height` are informational.
    Jpeg,
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to open video source {uri:?}")]
    Open { uri: String },
    #[error("frame buffer holds {got} bytes, expected {expected} for {width}x{height}")]
    BufferSize {
        width: u32,
        height: u32,
        expected: usize,
        got: usize,
    },
    #[error("failed to decode frame: {0}")]
    Decode(#[from] image::ImageError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Frame {
    pub fn bgr8(pts: i64, width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            pts,
            width,
            height,
            format: FrameFormat::Bgr8,
            data,
        }
    }

    pub fn jpeg(pts: i64, data: Vec<u8>) -> Self {
        Self {
            pts,
            width: 0,
            height: 0,
            format: FrameFormat::Jpeg,
            data,
        }
    }

    /// Decode the frame into an owned RGB image.
    pub fn decode(&self) -> Result<RgbImage, CaptureError> {
        match self.format {
            FrameFormat::Jpeg => Ok(image::load_from_memory(&self.data)?.to_rgb8()),
            FrameFormat::Rgb8 => {
                self.check_packed_len()?;
                RgbImage::from_raw(self.width, self.height, self.data.clone())
                    .ok_or_else(|| CaptureError::Other(anyhow!("invalid RGB frame geometry")))
            }
            FrameFormat::Bgr8 => {
                self.check_packed_len()?;
                let mut rgb = Vec::with_capacity(self.data.len());
                for chunk in self.data.chunks_exact(3) {
                    rgb.extend_from_slice(&[chunk[2], chunk[1], chunk[0]]);
                }
                RgbImage::from_raw(self.width, self.height, rgb)
                    .ok_or_else(|| CaptureError::Other(anyhow!("invalid BGR frame geometry")))
            }
        }
    }

    fn check_packed_len(&self) -> Result<(), CaptureError> {
        let expected = (self.width as usize) * (self.height as usize) * 3;
        if self.data.len() != expected {
            return Err(CaptureError::BufferSize {
                width: self.width,
                height: self.height,
                expected,
                got: self.data.len(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bgr_frames_decode_with_swapped_channels() {
        let frame = Frame::bgr8(1, 2, 1, vec![10, 20, 30, 40, 50, 60]);
        let image = frame.decode().unwrap();
        assert_eq!(image.get_pixel(0, 0).0, [30, 20, 10]);
        assert_eq!(image.get_pixel(1, 0).0, [60, 50, 40]);
    }

    #[test]
    fn short_buffers_are_rejected() {
        let frame = Frame::bgr8(1, 4, 4, vec![0; 10]);
        assert!(matches!(
            frame.decode(),
            Err(CaptureError::BufferSize { expected: 48, got: 10, .. })
        ));
    }

    #[test]
    fn garbage_jpeg_is_a_decode_error() {
        let frame = Frame::jpeg(7, vec![0xde, 0xad, 0xbe, 0xef]);
        assert!(matches!(frame.decode(), Err(CaptureError::Decode(_))));
    }
}
