//! Frame type and pixel helpers: YUYV conversion, dark detection, region crops.

use std::time::Instant;

/// Fraction of near-black pixels above which a frame is treated as dark.
pub const DARK_FRAME_RATIO: f32 = 0.95;

/// A grayscale camera frame. Lives for one orchestrator iteration.
#[derive(Clone)]
pub struct Frame {
    /// Grayscale pixel data (width * height bytes, row-major).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: Instant,
    pub sequence: u32,
    pub is_dark: bool,
}

impl Frame {
    /// Build a frame from raw grayscale bytes, flagging it dark if needed.
    pub fn from_gray(data: Vec<u8>, width: u32, height: u32, sequence: u32) -> Result<Self, FrameError> {
        let expected = width as usize * height as usize;
        if data.len() != expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: data.len(),
            });
        }
        let is_dark = is_dark_frame(&data, DARK_FRAME_RATIO);
        Ok(Self {
            data,
            width,
            height,
            timestamp: Instant::now(),
            sequence,
            is_dark,
        })
    }

    /// Convert a decoded image (any colour type) into a grayscale frame.
    pub fn from_image(img: &image::DynamicImage, sequence: u32) -> Self {
        let gray = img.to_luma8();
        let (width, height) = gray.dimensions();
        let data = gray.into_raw();
        let is_dark = is_dark_frame(&data, DARK_FRAME_RATIO);
        Self {
            data,
            width,
            height,
            timestamp: Instant::now(),
            sequence,
            is_dark,
        }
    }

    /// Average pixel brightness (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().map(|&b| b as f32).sum::<f32>() / self.data.len() as f32
    }

    /// Pixel at (x, y), or 0 outside the frame.
    pub fn pixel(&self, x: i64, y: i64) -> u8 {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return 0;
        }
        self.data[y as usize * self.width as usize + x as usize]
    }

    /// Sample a rectangular region and resize it to `out_w` x `out_h` with
    /// bilinear interpolation. Samples outside the frame repeat the edge.
    pub fn resample_region(&self, x: f32, y: f32, w: f32, h: f32, out_w: usize, out_h: usize) -> Vec<u8> {
        let mut out = vec![0u8; out_w * out_h];
        if out_w == 0 || out_h == 0 || w <= 0.0 || h <= 0.0 || self.data.is_empty() {
            return out;
        }
        let sx = w / out_w as f32;
        let sy = h / out_h as f32;

        for oy in 0..out_h {
            let src_y = y + (oy as f32 + 0.5) * sy - 0.5;
            let y0 = src_y.floor();
            let fy = src_y - y0;
            for ox in 0..out_w {
                let src_x = x + (ox as f32 + 0.5) * sx - 0.5;
                let x0 = src_x.floor();
                let fx = src_x - x0;
                let (xi, yi) = (x0 as i64, y0 as i64);
                let at = |x: i64, y: i64| {
                    let cx = x.clamp(0, self.width as i64 - 1);
                    let cy = y.clamp(0, self.height as i64 - 1);
                    self.pixel(cx, cy) as f32
                };

                let val = at(xi, yi) * (1.0 - fx) * (1.0 - fy)
                    + at(xi + 1, yi) * fx * (1.0 - fy)
                    + at(xi, yi + 1) * (1.0 - fx) * fy
                    + at(xi + 1, yi + 1) * fx * fy;
                out[oy * out_w + ox] = val.round().clamp(0.0, 255.0) as u8;
            }
        }
        out
    }
}

/// Convert packed YUYV (4:2:2) to grayscale by keeping the Y samples.
pub fn yuyv_to_grayscale(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }
    Ok(yuyv[..expected].iter().step_by(2).copied().collect())
}

/// True if more than `threshold_pct` of the pixels are below 32.
pub fn is_dark_frame(gray: &[u8], threshold_pct: f32) -> bool {
    if gray.is_empty() {
        return true;
    }
    let dark_count = gray.iter().filter(|&&p| p < 32).count();
    (dark_count as f32 / gray.len() as f32) > threshold_pct
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid frame buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_to_grayscale() {
        let yuyv = vec![100, 128, 200, 128];
        let gray = yuyv_to_grayscale(&yuyv, 2, 1).unwrap();
        assert_eq!(gray, vec![100, 200]);
    }

    #[test]
    fn test_yuyv_invalid_length() {
        assert!(yuyv_to_grayscale(&[100, 128], 2, 1).is_err());
    }

    #[test]
    fn test_dark_frame_detection() {
        assert!(is_dark_frame(&[0u8; 1000], DARK_FRAME_RATIO));
        assert!(!is_dark_frame(&[128u8; 1000], DARK_FRAME_RATIO));
        assert!(is_dark_frame(&[], DARK_FRAME_RATIO));
    }

    #[test]
    fn test_from_gray_rejects_wrong_length() {
        let err = Frame::from_gray(vec![0u8; 10], 4, 4, 0).err().unwrap();
        assert!(matches!(err, FrameError::InvalidLength { expected: 16, actual: 10 }));
    }

    #[test]
    fn test_from_gray_flags_dark() {
        let frame = Frame::from_gray(vec![5u8; 16], 4, 4, 7).unwrap();
        assert!(frame.is_dark);
        assert_eq!(frame.sequence, 7);
    }

    #[test]
    fn test_from_image_converts_to_gray() {
        let img = image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(3, 2, image::Rgb([200, 200, 200])));
        let frame = Frame::from_image(&img, 0);
        assert_eq!((frame.width, frame.height), (3, 2));
        assert_eq!(frame.data.len(), 6);
        assert!(frame.data.iter().all(|&p| (199..=201).contains(&p)));
        assert!(!frame.is_dark);
    }

    #[test]
    fn test_resample_uniform_region_stays_uniform() {
        let frame = Frame::from_gray(vec![90u8; 40 * 30], 40, 30, 0).unwrap();
        let out = frame.resample_region(5.0, 5.0, 20.0, 20.0, 8, 8);
        assert_eq!(out.len(), 64);
        assert!(out.iter().all(|&p| p == 90));
    }

    #[test]
    fn test_resample_outside_frame_repeats_edge() {
        let frame = Frame::from_gray(vec![255u8; 10 * 10], 10, 10, 0).unwrap();
        let out = frame.resample_region(100.0, 100.0, 10.0, 10.0, 4, 4);
        assert!(out.iter().all(|&p| p == 255));
        assert_eq!(frame.pixel(-1, 3), 0);
    }
}
