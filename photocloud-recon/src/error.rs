//! Error types for the reconstruction pipeline.

use photocloud_data::PlyError;
use thiserror::Error;

/// Hard failures of the reconstruction pipeline.
///
/// Quality failures (too few matches or points) are not errors; they are
/// reported through [`crate::ReconstructionResult::success`] and resolved by
/// the fallback policy.
#[derive(Debug, Error)]
pub enum ReconError {
    #[error("Failed to decode image '{filename}': {source}")]
    ImageDecode {
        filename: String,
        #[source]
        source: image::ImageError,
    },

    #[error("Depth model inference failed: {0}")]
    ModelInference(String),

    #[error("Insufficient features: {0}")]
    InsufficientFeatures(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("PLY error: {0}")]
    Ply(#[from] PlyError),
}
