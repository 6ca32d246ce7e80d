//! Decoded input frames and assumed camera intrinsics

use crate::error::ReconError;
use image::RgbImage;
use nalgebra::Point2;
use photocloud_data::ImageInput;
use tracing::debug;

/// A decoded input image together with its position in the request.
#[derive(Debug, Clone)]
pub struct Frame {
    /// RGB image data
    pub image: RgbImage,
    /// Index of the image in the caller's input order
    pub index: usize,
    pub filename: String,
}

impl Frame {
    pub fn new(image: RgbImage, index: usize, filename: impl Into<String>) -> Self {
        Self {
            image,
            index,
            filename: filename.into(),
        }
    }

    /// Decode an accepted input image.
    pub fn decode(input: &ImageInput, index: usize) -> Result<Self, ReconError> {
        let image = input.decode().map_err(|source| ReconError::ImageDecode {
            filename: input.filename().to_string(),
            source,
        })?;
        debug!(
            "Decoded '{}' ({}x{})",
            input.filename(),
            image.width(),
            image.height()
        );
        Ok(Self::new(image, index, input.filename()))
    }

    /// Decode every input, preserving order. The first failure aborts.
    pub fn decode_all(inputs: &[ImageInput]) -> Result<Vec<Self>, ReconError> {
        inputs
            .iter()
            .enumerate()
            .map(|(i, input)| Self::decode(input, i))
            .collect()
    }

    /// Get image dimensions (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

/// Pinhole intrinsics assumed for uncalibrated photographs.
///
/// The focal length comes from an assumed horizontal field of view,
/// `fx = fy = width / (2 tan(fov / 2))`, with the principal point at the
/// image center.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Intrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl Intrinsics {
    pub fn from_image_size(width: u32, height: u32, field_of_view_deg: f64) -> Self {
        let fx = f64::from(width) / (2.0 * (field_of_view_deg.to_radians() / 2.0).tan());
        Self {
            fx,
            fy: fx,
            cx: f64::from(width) / 2.0,
            cy: f64::from(height) / 2.0,
        }
    }

    /// Pixel coordinates to normalized image coordinates.
    pub fn normalize(&self, x: f64, y: f64) -> Point2<f64> {
        Point2::new((x - self.cx) / self.fx, (y - self.cy) / self.fy)
    }

    /// Normalized image coordinates back to pixels.
    pub fn denormalize(&self, p: &Point2<f64>) -> (f64, f64) {
        (p.x * self.fx + self.cx, p.y * self.fy + self.cy)
    }

    /// Mean focal length, used to convert pixel thresholds to normalized units.
    pub fn mean_focal(&self) -> f64 {
        0.5 * (self.fx + self.fy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use photocloud_data::ImageFormat;

    #[test]
    fn test_intrinsics_sixty_degrees() {
        let k = Intrinsics::from_image_size(640, 480, 60.0);
        let expected = 640.0 / (2.0 * (30.0f64).to_radians().tan());
        assert!((k.fx - expected).abs() < 1e-9);
        assert_eq!(k.cx, 320.0);
        assert_eq!(k.cy, 240.0);
    }

    #[test]
    fn test_normalize_roundtrip() {
        let k = Intrinsics::from_image_size(800, 600, 55.0);
        let n = k.normalize(123.0, 456.0);
        let (x, y) = k.denormalize(&n);
        assert!((x - 123.0).abs() < 1e-9);
        assert!((y - 456.0).abs() < 1e-9);
        let center = k.normalize(400.0, 300.0);
        assert!(center.x.abs() < 1e-12 && center.y.abs() < 1e-12);
    }

    #[test]
    fn test_decode_all_reports_corrupt_file() {
        let inputs = vec![ImageInput::new(vec![0u8; 16], ImageFormat::Png, "broken.png")];
        match Frame::decode_all(&inputs) {
            Err(ReconError::ImageDecode { filename, .. }) => assert_eq!(filename, "broken.png"),
            other => panic!("expected decode error, got {other:?}"),
        }
    }
}
