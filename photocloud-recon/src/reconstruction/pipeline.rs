//! Pipeline controller

use crate::config::PipelineConfig;
use crate::depth::{self, DepthEstimator};
use crate::error::ReconError;
use crate::ingest::{Frame, depth_to_pointcloud};
use crate::reconstruction::{FallbackDecision, FallbackPolicy, ReconstructionResult, SfmAttempt};
use crate::sfm::SfmReconstructor;
use photocloud_data::ImageInput;
use tracing::{info, warn};

/// Runs one reconstruction: SfM when possible, monocular depth otherwise.
pub struct PipelineController {
    config: PipelineConfig,
    depth: Box<dyn DepthEstimator>,
    sfm: SfmReconstructor,
}

impl PipelineController {
    pub fn new(config: PipelineConfig) -> Self {
        let depth = depth::estimator_for(&config);
        let sfm = SfmReconstructor::new(config.sfm.clone());
        Self { config, depth, sfm }
    }

    /// Controller with caller-provided components.
    pub fn with_components(
        config: PipelineConfig,
        depth: Box<dyn DepthEstimator>,
        sfm: SfmReconstructor,
    ) -> Self {
        Self { config, depth, sfm }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn policy(&self) -> FallbackPolicy {
        FallbackPolicy {
            min_points: self.sfm.config().min_points,
            sfm_enabled: self.config.enable_sfm,
        }
    }

    /// Reconstruct `images` into one tagged result.
    ///
    /// Undecodable images and depth model failures are errors. SfM quality
    /// failures and SfM errors are absorbed by the fallback policy.
    #[tracing::instrument(skip_all, fields(images = images.len()))]
    pub fn run(&self, images: &[ImageInput]) -> Result<ReconstructionResult, ReconError> {
        if images.is_empty() {
            return Err(ReconError::InvalidInput(
                "at least one image is required".to_string(),
            ));
        }
        let frames = Frame::decode_all(images)?;
        self.run_frames(&frames)
    }

    pub fn run_frames(&self, frames: &[Frame]) -> Result<ReconstructionResult, ReconError> {
        let policy = self.policy();
        let attempt_sfm = frames.len() >= 2 && self.config.enable_sfm;

        let sfm_outcome = attempt_sfm.then(|| self.sfm.reconstruct_frames(frames));
        let attempt = match &sfm_outcome {
            None => SfmAttempt::NotAttempted,
            Some(Ok(result)) => SfmAttempt::Completed(result),
            Some(Err(err)) => SfmAttempt::Failed(err),
        };

        let (representative, reason) = match policy.decide(frames.len(), attempt) {
            FallbackDecision::AcceptSfm => {
                if let Some(Ok(result)) = sfm_outcome {
                    info!("Accepted SfM reconstruction with {} points", result.point_count());
                    return Ok(result);
                }
                return Err(ReconError::InvalidInput(
                    "SfM accepted without a result".to_string(),
                ));
            }
            FallbackDecision::Monocular {
                representative,
                reason,
            } => (representative, reason),
        };

        if let Some(Err(err)) = &sfm_outcome {
            warn!("SfM failed, falling back to monocular depth: {}", err);
        } else {
            info!("Using monocular depth on image {}: {}", representative, reason);
        }

        let mut warnings = match sfm_outcome {
            Some(Ok(result)) => result.warnings,
            _ => Vec::new(),
        };
        if attempt_sfm {
            warnings.push(format!("fell back to monocular depth: {reason}"));
        }

        let frame = frames.get(representative).ok_or_else(|| {
            ReconError::InvalidInput(format!("no image at index {representative}"))
        })?;
        let depth = self.depth.estimate_depth(&frame.image)?;
        let cloud = depth_to_pointcloud(&depth, &frame.image, &self.config.unprojection)?;
        if cloud.is_empty() {
            return Err(ReconError::InsufficientFeatures(format!(
                "no depth values of '{}' fall within the valid range",
                frame.filename
            )));
        }

        let mut result = ReconstructionResult::monocular(cloud, frame.index);
        result.warnings = warnings;
        info!(
            "Monocular reconstruction of '{}' produced {} points",
            frame.filename,
            result.point_count()
        );
        Ok(result)
    }
}
