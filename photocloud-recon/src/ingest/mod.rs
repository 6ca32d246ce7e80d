//! Data ingestion module
//!
//! Turns accepted inputs into pipeline-ready data:
//! - Decoded frames (RGB) in caller order
//! - Assumed pinhole intrinsics for uncalibrated cameras
//! - Depth map unprojection into colored point clouds

pub mod camera;
pub mod point_cloud;

pub use camera::{Frame, Intrinsics};
pub use point_cloud::depth_to_pointcloud;
