//! Photocloud Reconstruction Crate
//!
//! Turns one or more photographs into a colored point cloud. The
//! [`PipelineController`] attempts multi-view structure from motion when
//! several images are supplied and falls back to single-image depth
//! estimation when SfM is unavailable or its output fails the quality gate.
//!
//! ## Modules
//!
//! - [`ingest`]: image decoding, pinhole intrinsics, depth unprojection
//! - [`depth`]: monocular depth estimation models
//! - [`features`]: keypoint detection, descriptors and matching
//! - [`sfm`]: two-view geometry and multi-view aggregation
//! - [`reconstruction`]: fallback policy and the pipeline controller

pub mod config;
pub mod depth;
pub mod error;
pub mod features;
pub mod ingest;
pub mod reconstruction;
pub mod sfm;

pub use config::{ModelPaths, PipelineConfig, SfmConfig, UnprojectionConfig};
pub use depth::{DepthEstimator, DepthModel};
pub use error::ReconError;
pub use features::{FeatureBackend, FeatureKind};
pub use ingest::{Frame, Intrinsics, depth_to_pointcloud};
pub use reconstruction::{
    FallbackDecision, FallbackPolicy, FallbackReason, PipelineController, ReconstructionResult,
    RegisteredPose, SfmAttempt, SfmStats,
};
pub use sfm::SfmReconstructor;
