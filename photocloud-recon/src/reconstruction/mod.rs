//! Reconstruction results, fallback policy and the pipeline controller
//!
//! A pipeline run produces exactly one [`ReconstructionResult`], tagged with
//! the method that actually produced its cloud. SfM output that fails the
//! quality gate is discarded by the [`FallbackPolicy`], never merged with
//! monocular output.

pub mod fallback;
pub mod pipeline;

pub use fallback::{FallbackDecision, FallbackPolicy, FallbackReason, SfmAttempt};
pub use pipeline::PipelineController;

use photocloud_data::{CameraPose, PointCloud, ReconstructionMethod};
use serde::Serialize;

/// Camera pose of one input image registered by SfM.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegisteredPose {
    /// Index of the image in the caller's input order
    pub image_index: usize,
    pub pose: CameraPose,
}

/// Diagnostic counters of one SfM run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SfmStats {
    /// Images that produced at least one keypoint
    pub images_used: usize,
    pub pairs_attempted: usize,
    /// Pairs that passed the match threshold and pose estimation
    pub pairs_accepted: usize,
}

/// Outcome of one reconstruction run.
#[derive(Debug, Clone)]
pub struct ReconstructionResult {
    pub method: ReconstructionMethod,
    pub cloud: PointCloud,
    /// Whether the result passed its quality gate
    pub success: bool,
    /// Registered cameras; empty for monocular results
    pub poses: Vec<RegisteredPose>,
    /// Input index of the image a monocular cloud was built from
    pub representative_image: Option<usize>,
    pub stats: Option<SfmStats>,
    /// Non-fatal issues encountered during the run
    pub warnings: Vec<String>,
}

impl ReconstructionResult {
    pub fn monocular(cloud: PointCloud, representative_image: usize) -> Self {
        let success = !cloud.is_empty();
        Self {
            method: ReconstructionMethod::Monocular,
            cloud,
            success,
            poses: Vec::new(),
            representative_image: Some(representative_image),
            stats: None,
            warnings: Vec::new(),
        }
    }

    pub fn point_count(&self) -> usize {
        self.cloud.len()
    }
}
