//! Depth map unprojection into colored point clouds

use crate::config::UnprojectionConfig;
use crate::error::ReconError;
use crate::ingest::Intrinsics;
use glam::Vec3;
use image::RgbImage;
use photocloud_data::{DepthMap, Point3D, PointCloud};
use rayon::prelude::*;
use tracing::debug;

/// Unproject every valid pixel of `depth` through assumed pinhole intrinsics
/// and color it from `image`.
///
/// `X = (u - cx) * z / fx`, `Y = (v - cy) * z / fy`, `Z = z`. Pixels whose
/// depth is non-finite, non-positive, or above `max_depth` are skipped.
/// Output order is row-major and deterministic.
#[tracing::instrument(skip_all, fields(width = depth.width(), height = depth.height()))]
pub fn depth_to_pointcloud(
    depth: &DepthMap,
    image: &RgbImage,
    config: &UnprojectionConfig,
) -> Result<PointCloud, ReconError> {
    if depth.dimensions() != image.dimensions() {
        return Err(ReconError::InvalidInput(format!(
            "depth map is {:?} but source image is {:?}",
            depth.dimensions(),
            image.dimensions()
        )));
    }

    let (width, height) = depth.dimensions();
    let k = Intrinsics::from_image_size(width, height, f64::from(config.field_of_view_deg));
    let (fx, fy, cx, cy) = (k.fx as f32, k.fy as f32, k.cx as f32, k.cy as f32);
    let stride = config.stride.max(1) as usize;
    let max_depth = config.max_depth;

    let points: Vec<Point3D> = (0..height as usize)
        .into_par_iter()
        .step_by(stride)
        .flat_map_iter(|v| {
            (0..width as usize).step_by(stride).filter_map(move |u| {
                let z = depth.values()[v * width as usize + u];
                if !z.is_finite() || z <= 0.0 || z > max_depth {
                    return None;
                }
                let position = Vec3::new((u as f32 - cx) * z / fx, (v as f32 - cy) * z / fy, z);
                let color = image.get_pixel(u as u32, v as u32).0;
                Some(Point3D::new(position, color))
            })
        })
        .collect();

    debug!(
        "Unprojected {} of {} pixels (stride {})",
        points.len(),
        width as usize * height as usize,
        stride
    );
    Ok(PointCloud::new(points))
}
