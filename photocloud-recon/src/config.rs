//! Pipeline configuration.
//!
//! All thresholds are tunable starting points rather than fixed policy; the
//! defaults follow the values the service has shipped with.

use crate::depth::DepthModel;
use crate::error::ReconError;
use crate::features::FeatureKind;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Structure-from-motion parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SfmConfig {
    pub feature_kind: FeatureKind,
    /// Keypoints kept per image after non-maximum suppression.
    pub max_keypoints: usize,
    /// Lowe ratio test threshold for descriptor matching.
    pub ratio_test: f32,
    /// Minimum geometrically consistent matches for a pair to enter the pose graph.
    pub min_pair_matches: usize,
    /// Minimum triangulated points for the reconstruction to count as a success.
    pub min_points: usize,
    /// Sampson distance threshold in pixels for RANSAC inliers.
    pub ransac_threshold_px: f64,
    pub ransac_iterations: usize,
    /// Image sets up to this size are matched all-pairs, larger ones consecutively.
    pub all_pairs_limit: usize,
    /// Triangulated points farther than this from the reference camera are dropped.
    pub max_point_distance: f32,
    pub field_of_view_deg: f64,
}

impl Default for SfmConfig {
    fn default() -> Self {
        Self {
            feature_kind: FeatureKind::Fast,
            max_keypoints: 2000,
            ratio_test: 0.8,
            min_pair_matches: 50,
            min_points: 100,
            ransac_threshold_px: 1.0,
            ransac_iterations: 500,
            all_pairs_limit: 4,
            max_point_distance: 100.0,
            field_of_view_deg: 60.0,
        }
    }
}

/// Depth-map unprojection parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnprojectionConfig {
    /// Assumed horizontal field of view used to derive the focal length.
    pub field_of_view_deg: f32,
    /// Depth values above this are skipped.
    pub max_depth: f32,
    /// Sample every `stride`-th pixel in each direction.
    pub stride: u32,
}

impl Default for UnprojectionConfig {
    fn default() -> Self {
        Self {
            field_of_view_deg: 60.0,
            max_depth: 100.0,
            stride: 1,
        }
    }
}

/// ONNX model files per depth variant.
///
/// A variant without a file runs the built-in cue estimator instead.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelPaths {
    pub small: Option<PathBuf>,
    pub hybrid: Option<PathBuf>,
    pub large: Option<PathBuf>,
}

impl ModelPaths {
    pub fn get(&self, model: DepthModel) -> Option<&Path> {
        match model {
            DepthModel::Small => self.small.as_deref(),
            DepthModel::Hybrid => self.hybrid.as_deref(),
            DepthModel::Large => self.large.as_deref(),
        }
    }
}

/// Configuration of a full pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// When false, multi-image requests go straight to monocular depth.
    pub enable_sfm: bool,
    pub depth_model: DepthModel,
    pub model_paths: ModelPaths,
    pub sfm: SfmConfig,
    pub unprojection: UnprojectionConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            enable_sfm: true,
            depth_model: DepthModel::Small,
            model_paths: ModelPaths::default(),
            sfm: SfmConfig::default(),
            unprojection: UnprojectionConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ReconError> {
        let sfm = &self.sfm;
        let fov_ok = |fov: f64| fov > 1.0 && fov < 179.0;

        if !fov_ok(sfm.field_of_view_deg) || !fov_ok(f64::from(self.unprojection.field_of_view_deg)) {
            return Err(ReconError::InvalidConfig(
                "field_of_view_deg must be within (1, 179)".to_string(),
            ));
        }
        if !(sfm.ratio_test > 0.0 && sfm.ratio_test <= 1.0) {
            return Err(ReconError::InvalidConfig(format!(
                "ratio_test must be within (0, 1], got {}",
                sfm.ratio_test
            )));
        }
        if sfm.min_pair_matches < 8 {
            return Err(ReconError::InvalidConfig(
                "min_pair_matches must be at least 8 for the eight-point solver".to_string(),
            ));
        }
        if sfm.max_keypoints == 0 || sfm.ransac_iterations == 0 {
            return Err(ReconError::InvalidConfig(
                "max_keypoints and ransac_iterations must be positive".to_string(),
            ));
        }
        if sfm.ransac_threshold_px <= 0.0 || sfm.max_point_distance <= 0.0 {
            return Err(ReconError::InvalidConfig(
                "ransac_threshold_px and max_point_distance must be positive".to_string(),
            ));
        }
        if sfm.all_pairs_limit < 2 {
            return Err(ReconError::InvalidConfig(
                "all_pairs_limit must be at least 2".to_string(),
            ));
        }
        if self.unprojection.max_depth <= 0.0 || self.unprojection.stride == 0 {
            return Err(ReconError::InvalidConfig(
                "max_depth and stride must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
