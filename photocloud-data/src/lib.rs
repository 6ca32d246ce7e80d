//! Photocloud Data Crate
//!
//! CPU-side data model shared by the reconstruction pipeline and the task
//! layer: input images, depth maps, camera poses, colored point clouds, and
//! the PLY codec used for every artifact the service writes or accepts.

pub mod ply;
pub mod types;

pub use ply::{PlyEncoding, PlyError, PlyHeader, decode_ply, encode_ply, read_ply_file, write_ply};
pub use types::{
    CameraPose, DepthMap, ImageFormat, ImageInput, Point3D, PointCloud, ReconstructionMethod,
};
