//! Core data types for images, depth maps, camera poses and point clouds.
//!
//! These are CPU-side representations used throughout the photocloud
//! workspace. Positions are relative-scale only: nothing here carries metric
//! units.

use glam::{Mat3, Vec3};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Color written for uncolored points when a cloud mixes colored and
/// uncolored points (PLY color properties are per element, not per vertex).
pub const DEFAULT_POINT_COLOR: [u8; 3] = [204, 204, 204];

/// Declared container format of an uploaded image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Jpeg,
    Png,
}

impl ImageFormat {
    /// Infer the format from a file extension (`.jpg`, `.jpeg`, `.png`).
    pub fn from_filename(name: &str) -> Option<Self> {
        let ext = Path::new(name).extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            _ => None,
        }
    }

    fn as_image_format(self) -> image::ImageFormat {
        match self {
            Self::Jpeg => image::ImageFormat::Jpeg,
            Self::Png => image::ImageFormat::Png,
        }
    }
}

/// An accepted input image. Immutable once constructed; cloning shares the bytes.
#[derive(Debug, Clone)]
pub struct ImageInput {
    bytes: Arc<[u8]>,
    format: ImageFormat,
    filename: String,
}

impl ImageInput {
    pub fn new(bytes: impl Into<Arc<[u8]>>, format: ImageFormat, filename: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            format,
            filename: filename.into(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Decode the image to 8-bit RGB using its declared format.
    pub fn decode(&self) -> Result<RgbImage, image::ImageError> {
        let decoded = image::load_from_memory_with_format(&self.bytes, self.format.as_image_format())?;
        Ok(decoded.to_rgb8())
    }
}

/// Per-pixel relative distance map, row-major.
///
/// Convention used across the workspace: values are relative distances from
/// the camera, lower = nearer. Values carry no physical unit. Non-positive or
/// non-finite values mark pixels without a usable estimate.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthMap {
    width: u32,
    height: u32,
    values: Vec<f32>,
}

impl DepthMap {
    /// Create a depth map; returns `None` if `values` does not hold exactly
    /// `width * height` entries.
    pub fn new(width: u32, height: u32, values: Vec<f32>) -> Option<Self> {
        if values.len() != width as usize * height as usize {
            return None;
        }
        Some(Self {
            width,
            height,
            values,
        })
    }

    /// Build a depth map by evaluating `f(x, y)` for every pixel.
    pub fn from_fn(width: u32, height: u32, mut f: impl FnMut(u32, u32) -> f32) -> Self {
        let mut values = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                values.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            values,
        }
    }

    /// Convert a normalized inverse-depth (disparity-like) map into relative
    /// distances: `1 / (d + 1e-6)`. Larger disparity means nearer.
    pub fn from_inverse_depth(width: u32, height: u32, inverse: &[f32]) -> Option<Self> {
        let values = inverse.iter().map(|d| 1.0 / (d + 1e-6)).collect();
        Self::new(width, height, values)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn get(&self, x: u32, y: u32) -> Option<f32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.values.get(y as usize * self.width as usize + x as usize).copied()
    }

    /// Number of pixels whose depth lies in `(0, max_depth]`.
    pub fn count_in_range(&self, max_depth: f32) -> usize {
        self.values
            .iter()
            .filter(|d| d.is_finite() && **d > 0.0 && **d <= max_depth)
            .count()
    }
}

/// Camera pose in world-to-camera form: `x_cam = rotation * x_world + translation`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraPose {
    pub rotation: Mat3,
    pub translation: Vec3,
}

impl CameraPose {
    pub fn new(rotation: Mat3, translation: Vec3) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    pub fn identity() -> Self {
        Self {
            rotation: Mat3::IDENTITY,
            translation: Vec3::ZERO,
        }
    }

    /// Pose of a second camera given this camera's pose and the relative
    /// motion `relative` from this camera to the second one.
    pub fn compose(&self, relative: &CameraPose) -> CameraPose {
        CameraPose {
            rotation: relative.rotation * self.rotation,
            translation: relative.rotation * self.translation + relative.translation,
        }
    }

    /// The inverse transform, camera to world.
    pub fn inverse(&self) -> CameraPose {
        let rotation = self.rotation.transpose();
        CameraPose {
            rotation,
            translation: -(rotation * self.translation),
        }
    }

    /// Camera center in world coordinates.
    pub fn camera_center(&self) -> Vec3 {
        -(self.rotation.transpose() * self.translation)
    }

    /// Map a point from this camera's frame into world coordinates.
    pub fn camera_to_world(&self, p: Vec3) -> Vec3 {
        self.rotation.transpose() * (p - self.translation)
    }
}

impl Default for CameraPose {
    fn default() -> Self {
        Self::identity()
    }
}

/// A point in 3D space with an optional 8-bit RGB color.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point3D {
    pub position: Vec3,
    pub color: Option<[u8; 3]>,
}

impl Point3D {
    pub fn new(position: Vec3, color: [u8; 3]) -> Self {
        Self {
            position,
            color: Some(color),
        }
    }

    pub fn uncolored(position: Vec3) -> Self {
        Self {
            position,
            color: None,
        }
    }
}

/// Ordered point sequence with optional triangle connectivity.
///
/// Faces are only present for clouds decoded from uploaded PLY meshes;
/// generated clouds never carry faces.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointCloud {
    pub points: Vec<Point3D>,
    pub faces: Vec<[u32; 3]>,
}

impl PointCloud {
    pub fn new(points: Vec<Point3D>) -> Self {
        Self {
            points,
            faces: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// True if at least one point carries a color.
    pub fn has_colors(&self) -> bool {
        self.points.iter().any(|p| p.color.is_some())
    }

    /// Index of the first face referencing a point that does not exist.
    pub fn first_invalid_face(&self) -> Option<usize> {
        let count = self.points.len();
        self.faces
            .iter()
            .position(|face| face.iter().any(|&i| i as usize >= count))
    }

    /// Axis-aligned bounds `(min, max)`, or `None` for an empty cloud.
    pub fn bounds(&self) -> Option<(Vec3, Vec3)> {
        let first = self.points.first()?.position;
        Some(self.points.iter().fold((first, first), |(lo, hi), p| {
            (lo.min(p.position), hi.max(p.position))
        }))
    }
}

/// Appends points; faces are left untouched.
impl Extend<Point3D> for PointCloud {
    fn extend<I: IntoIterator<Item = Point3D>>(&mut self, iter: I) {
        self.points.extend(iter);
    }
}

/// Which path produced an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconstructionMethod {
    /// Multi-view structure from motion.
    Sfm,
    /// Single-image depth estimation.
    Monocular,
    /// A PLY file supplied by the caller and stored as-is.
    Upload,
}

impl fmt::Display for ReconstructionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Sfm => "sfm",
            Self::Monocular => "monocular",
            Self::Upload => "upload",
        };
        f.write_str(name)
    }
}
