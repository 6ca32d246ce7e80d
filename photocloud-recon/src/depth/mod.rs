//! Monocular depth estimation
//!
//! A depth model maps one RGB image to a [`DepthMap`] of the same size.
//! Values follow the workspace convention: relative distance, lower = nearer.
//! Three fixed model variants trade cost for detail; the output contract is
//! the same for all of them. A variant with a configured ONNX file runs
//! through ONNX Runtime; without one it runs the built-in cue estimator.

mod cues;
mod onnx;

pub use cues::CueDepthEstimator;
pub use onnx::OnnxDepthEstimator;

use crate::config::PipelineConfig;
use crate::error::ReconError;
use image::RgbImage;
use image::imageops::FilterType;
use photocloud_data::DepthMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Selectable depth model quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DepthModel {
    /// Fast, low working resolution.
    #[default]
    #[serde(alias = "midas_small")]
    Small,
    /// Balanced cost and detail.
    #[serde(alias = "dpt_hybrid")]
    Hybrid,
    /// Highest detail, highest cost.
    #[serde(alias = "dpt_large")]
    Large,
}

/// Per-variant inference parameters.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ModelParams {
    /// Long side of the working resolution in pixels.
    pub working_size: u32,
    pub filter: FilterType,
    /// Weight of the texture cue against the ground-plane prior.
    pub texture_weight: f32,
    pub texture_radius: usize,
    pub smoothing_radius: usize,
}

impl DepthModel {
    pub const ALL: [DepthModel; 3] = [DepthModel::Small, DepthModel::Hybrid, DepthModel::Large];

    pub(crate) fn params(self) -> ModelParams {
        match self {
            DepthModel::Small => ModelParams {
                working_size: 256,
                filter: FilterType::Triangle,
                texture_weight: 0.3,
                texture_radius: 2,
                smoothing_radius: 2,
            },
            DepthModel::Hybrid => ModelParams {
                working_size: 384,
                filter: FilterType::CatmullRom,
                texture_weight: 0.4,
                texture_radius: 3,
                smoothing_radius: 2,
            },
            DepthModel::Large => ModelParams {
                working_size: 512,
                filter: FilterType::Lanczos3,
                texture_weight: 0.5,
                texture_radius: 4,
                smoothing_radius: 1,
            },
        }
    }
}

impl fmt::Display for DepthModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DepthModel::Small => "small",
            DepthModel::Hybrid => "hybrid",
            DepthModel::Large => "large",
        };
        f.write_str(name)
    }
}

impl FromStr for DepthModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "small" | "midas_small" => Ok(DepthModel::Small),
            "hybrid" | "dpt_hybrid" => Ok(DepthModel::Hybrid),
            "large" | "dpt_large" => Ok(DepthModel::Large),
            other => Err(format!(
                "unknown depth model '{other}' (expected small, hybrid or large)"
            )),
        }
    }
}

/// Capability set of a monocular depth model.
pub trait DepthEstimator: Send + Sync {
    fn model(&self) -> DepthModel;

    /// Estimate a depth map with the same dimensions as `image`.
    ///
    /// Fails with [`ReconError::ModelInference`] when the model cannot
    /// process the input.
    fn estimate_depth(&self, image: &RgbImage) -> Result<DepthMap, ReconError>;
}

/// Estimator for the configured model variant.
///
/// Uses the variant's ONNX file when one is configured, the cue estimator
/// otherwise.
pub fn estimator_for(config: &PipelineConfig) -> Box<dyn DepthEstimator> {
    let model = config.depth_model;
    match config.model_paths.get(model) {
        Some(path) => Box::new(OnnxDepthEstimator::new(model, path)),
        None => {
            debug!("No model file for {}, using cue depth estimator", model);
            Box::new(CueDepthEstimator::new(model))
        }
    }
}
