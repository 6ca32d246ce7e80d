//! Choice between the SfM result and monocular depth

use crate::error::ReconError;
use crate::reconstruction::ReconstructionResult;
use std::fmt;

/// What happened when SfM was (or was not) tried.
#[derive(Debug, Clone, Copy)]
pub enum SfmAttempt<'a> {
    NotAttempted,
    Failed(&'a ReconError),
    Completed(&'a ReconstructionResult),
}

/// Why the monocular path was chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackReason {
    SingleImage,
    SfmDisabled,
    BelowThreshold { points: usize, required: usize },
    SfmFailed(String),
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackReason::SingleImage => write!(f, "only one image supplied"),
            FallbackReason::SfmDisabled => write!(f, "structure from motion disabled"),
            FallbackReason::BelowThreshold { points, required } => {
                write!(f, "SfM produced {points} points, {required} required")
            }
            FallbackReason::SfmFailed(detail) => write!(f, "SfM failed: {detail}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackDecision {
    AcceptSfm,
    Monocular {
        /// Input index of the image to estimate depth on
        representative: usize,
        reason: FallbackReason,
    },
}

/// Quality gate on SfM output.
///
/// Monocular fallback always uses the first image in input order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FallbackPolicy {
    pub min_points: usize,
    pub sfm_enabled: bool,
}

impl FallbackPolicy {
    pub fn new(min_points: usize) -> Self {
        Self {
            min_points,
            sfm_enabled: true,
        }
    }

    pub fn decide(&self, image_count: usize, attempt: SfmAttempt<'_>) -> FallbackDecision {
        let monocular = |reason| FallbackDecision::Monocular {
            representative: 0,
            reason,
        };

        if image_count < 2 {
            return monocular(FallbackReason::SingleImage);
        }
        if !self.sfm_enabled {
            return monocular(FallbackReason::SfmDisabled);
        }
        match attempt {
            SfmAttempt::NotAttempted => monocular(FallbackReason::SfmDisabled),
            SfmAttempt::Failed(err) => monocular(FallbackReason::SfmFailed(err.to_string())),
            SfmAttempt::Completed(result) => {
                let points = result.point_count();
                if result.success && points >= self.min_points {
                    FallbackDecision::AcceptSfm
                } else {
                    monocular(FallbackReason::BelowThreshold {
                        points,
                        required: self.min_points,
                    })
                }
            }
        }
    }
}
