//! Frame type and image processing: YUYV to RGB, dark detection, PNG stills.

use base64::Engine;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder};
use std::borrow::Cow;

/// Memory layout of [`Frame::data`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelLayout {
    /// Packed 8-bit RGB, 3 bytes/pixel.
    Rgb8,
    /// 8-bit grayscale, 1 byte/pixel.
    Luma8,
}

impl PixelLayout {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelLayout::Rgb8 => 3,
            PixelLayout::Luma8 => 1,
        }
    }
}

/// A captured camera frame.
#[derive(Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub layout: PixelLayout,
    pub sequence: u32,
    pub is_dark: bool,
}

impl Frame {
    /// Build a frame, computing the dark flag from its luma plane.
    pub fn new(data: Vec<u8>, width: u32, height: u32, layout: PixelLayout, sequence: u32) -> Self {
        let mut frame = Self {
            data,
            width,
            height,
            layout,
            sequence,
            is_dark: false,
        };
        frame.is_dark = is_dark_frame(&frame.luma(), 0.95);
        frame
    }

    /// Grayscale view of the frame (borrowed when already grayscale).
    pub fn luma(&self) -> Cow<'_, [u8]> {
        match self.layout {
            PixelLayout::Luma8 => Cow::Borrowed(&self.data),
            PixelLayout::Rgb8 => Cow::Owned(
                self.data
                    .chunks_exact(3)
                    .map(|px| {
                        let y = 0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32;
                        y.round().clamp(0.0, 255.0) as u8
                    })
                    .collect(),
            ),
        }
    }

    /// Rasterize this frame to a PNG still.
    pub fn encode_png(&self) -> Result<StillImage, FrameError> {
        let expected = self.width as usize * self.height as usize * self.layout.bytes_per_pixel();
        if self.data.len() != expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: self.data.len(),
            });
        }

        let color = match self.layout {
            PixelLayout::Rgb8 => ExtendedColorType::Rgb8,
            PixelLayout::Luma8 => ExtendedColorType::L8,
        };

        let mut png = Vec::new();
        PngEncoder::new(&mut png).write_image(&self.data, self.width, self.height, color)?;

        Ok(StillImage {
            png,
            width: self.width,
            height: self.height,
            sequence: self.sequence,
        })
    }
}

/// An encoded still, ready to travel as a base64 data URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StillImage {
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Sequence number of the frame this still was rasterized from.
    pub sequence: u32,
}

impl StillImage {
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.png)
    }

    /// `data:image/png;base64,...`, the form the backend accepts.
    pub fn to_data_url(&self) -> String {
        format!("data:image/png;base64,{}", self.to_base64())
    }
}

/// Convert packed YUYV (4:2:2) to packed RGB8 using BT.601 coefficients.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for quad in yuyv[..expected].chunks_exact(4) {
        let u = quad[1] as f32 - 128.0;
        let v = quad[3] as f32 - 128.0;
        for y in [quad[0] as f32, quad[2] as f32] {
            let r = y + 1.402 * v;
            let g = y - 0.344_136 * u - 0.714_136 * v;
            let b = y + 1.772 * u;
            rgb.extend([r, g, b].map(|c| c.round().clamp(0.0, 255.0) as u8));
        }
    }
    Ok(rgb)
}

/// Check if a frame is dark using an 8-bucket histogram.
///
/// Returns true if more than `threshold_pct` of pixels fall in the darkest bucket (0–31).
pub fn is_dark_frame(gray: &[u8], threshold_pct: f32) -> bool {
    if gray.is_empty() {
        return true;
    }
    let dark_count = gray.iter().filter(|&&p| p < 32).count();
    (dark_count as f32 / gray.len() as f32) > threshold_pct
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid frame length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("PNG encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_invalid_length() {
        let yuyv = vec![100, 128]; // too short for 2x1
        assert!(yuyv_to_rgb(&yuyv, 2, 1).is_err());
    }

    #[test]
    fn test_yuyv_to_rgb_neutral_chroma_is_gray() {
        // U = V = 128 carries no color: R = G = B = Y
        let yuyv = vec![100, 128, 200, 128];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        assert_eq!(rgb, vec![100, 100, 100, 200, 200, 200]);
    }

    #[test]
    fn test_yuyv_to_rgb_red_shift() {
        // High V pushes red up and green down
        let yuyv = vec![128, 128, 128, 200];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        assert!(rgb[0] > 200);
        assert!(rgb[1] < 128);
        assert_eq!(rgb[2], 128);
    }

    #[test]
    fn test_dark_frame_thresholds() {
        assert!(is_dark_frame(&vec![0u8; 1000], 0.95));
        assert!(!is_dark_frame(&vec![128u8; 1000], 0.95));
        assert!(is_dark_frame(&[], 0.95));

        // 96% dark, 4% bright → dark
        let mut gray = vec![10u8; 960];
        gray.extend(vec![128u8; 40]);
        assert!(is_dark_frame(&gray, 0.95));

        // 94% dark, 6% bright → not dark
        let mut gray = vec![10u8; 940];
        gray.extend(vec![128u8; 60]);
        assert!(!is_dark_frame(&gray, 0.95));
    }

    #[test]
    fn test_rgb_frame_dark_flag_uses_luma() {
        let bright = Frame::new(vec![200u8; 4 * 4 * 3], 4, 4, PixelLayout::Rgb8, 1);
        assert!(!bright.is_dark);
        let dark = Frame::new(vec![5u8; 4 * 4 * 3], 4, 4, PixelLayout::Rgb8, 2);
        assert!(dark.is_dark);
        assert_eq!(&*bright.luma(), &[200u8; 16][..]);
    }

    #[test]
    fn test_encode_png_produces_data_url() {
        let frame = Frame::new(vec![90u8; 8 * 6 * 3], 8, 6, PixelLayout::Rgb8, 42);
        let still = frame.encode_png().unwrap();
        assert_eq!(still.sequence, 42);
        assert_eq!(&still.png[..8], b"\x89PNG\r\n\x1a\n");

        let url = still.to_data_url();
        assert!(url.starts_with("data:image/png;base64,iVBORw0KGgo"));

        let decoded = image::load_from_memory(&still.png).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (8, 6));
    }

    #[test]
    fn test_encode_png_rejects_short_buffer() {
        let frame = Frame::new(vec![90u8; 10], 8, 6, PixelLayout::Luma8, 1);
        assert!(matches!(
            frame.encode_png(),
            Err(FrameError::InvalidLength { expected: 48, actual: 10 })
        ));
    }
}
