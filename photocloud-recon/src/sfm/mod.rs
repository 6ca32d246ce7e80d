//! Structure from motion
//!
//! Sparse multi-view reconstruction from uncalibrated photographs:
//! 1. Extract features per image; images without keypoints are dropped
//! 2. Match image pairs (all pairs for small sets, consecutive otherwise)
//! 3. Estimate relative pose per pair from the essential matrix
//! 4. Triangulate inlier correspondences and color them from the first image
//! 5. Chain pair poses and merge all points into one cloud
//!
//! Too few points is a quality outcome (`success == false`), not an error.

pub mod geometry;

use crate::config::SfmConfig;
use crate::error::ReconError;
use crate::features::{self, FeatureBackend, Features};
use crate::ingest::{Frame, Intrinsics};
use crate::reconstruction::{ReconstructionResult, RegisteredPose, SfmStats};
use geometry::RelativePose;
use glam::{Mat3, Vec3};
use nalgebra::{Matrix3, Point2, Vector3};
use photocloud_data::{CameraPose, ImageInput, Point3D, PointCloud, ReconstructionMethod};
use rayon::prelude::*;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Triangulated output of one accepted image pair.
struct PairReconstruction {
    /// Positions into the list of images that produced features
    a: usize,
    b: usize,
    relative: CameraPose,
    /// Points in the frame of camera `a`
    points: Vec<Point3D>,
}

/// Multi-view reconstructor over a pluggable feature backend.
pub struct SfmReconstructor {
    config: SfmConfig,
    backend: Box<dyn FeatureBackend>,
}

impl SfmReconstructor {
    pub fn new(config: SfmConfig) -> Self {
        let backend = features::backend_for(config.feature_kind);
        Self { config, backend }
    }

    pub fn with_backend(config: SfmConfig, backend: Box<dyn FeatureBackend>) -> Self {
        Self { config, backend }
    }

    pub fn config(&self) -> &SfmConfig {
        &self.config
    }

    /// Decode `images` and reconstruct them.
    pub fn reconstruct(&self, images: &[ImageInput]) -> Result<ReconstructionResult, ReconError> {
        let frames = Frame::decode_all(images)?;
        self.reconstruct_frames(&frames)
    }

    #[tracing::instrument(skip_all, fields(images = frames.len()))]
    pub fn reconstruct_frames(&self, frames: &[Frame]) -> Result<ReconstructionResult, ReconError> {
        if frames.len() < 2 {
            return Err(ReconError::InsufficientFeatures(format!(
                "structure from motion needs at least 2 images, got {}",
                frames.len()
            )));
        }

        let extracted: Vec<Features> = frames
            .par_iter()
            .map(|frame| self.backend.extract(&frame.image, self.config.max_keypoints))
            .collect();

        let mut warnings = Vec::new();
        let mut views: Vec<(&Frame, Features)> = Vec::with_capacity(frames.len());
        for (frame, feats) in frames.iter().zip(extracted) {
            if feats.is_empty() {
                warn!("No keypoints in '{}', dropping it from SfM", frame.filename);
                warnings.push(format!("no keypoints detected in '{}'", frame.filename));
            } else {
                debug!("'{}': {} keypoints", frame.filename, feats.len());
                views.push((frame, feats));
            }
        }
        if views.len() < 2 {
            return Err(ReconError::InsufficientFeatures(format!(
                "only {} of {} images produced keypoints",
                views.len(),
                frames.len()
            )));
        }

        let pairs = self.pairs(views.len());
        let reconstructed: Vec<PairReconstruction> = pairs
            .par_iter()
            .filter_map(|&(a, b)| self.reconstruct_pair(&views, a, b))
            .collect();

        let stats = SfmStats {
            images_used: views.len(),
            pairs_attempted: pairs.len(),
            pairs_accepted: reconstructed.len(),
        };

        let poses = chain_poses(&reconstructed);
        let mut cloud = PointCloud::default();
        for pair in &reconstructed {
            let Some(pose) = poses.get(&pair.a) else {
                continue;
            };
            cloud.extend(pair.points.iter().map(|p| Point3D {
                position: pose.camera_to_world(p.position),
                color: p.color,
            }));
        }

        let mut registered: Vec<RegisteredPose> = poses
            .into_iter()
            .map(|(view, pose)| RegisteredPose {
                image_index: views[view].0.index,
                pose,
            })
            .collect();
        registered.sort_by_key(|r| r.image_index);

        let success = cloud.len() >= self.config.min_points;
        info!(
            "SfM: {}/{} pairs accepted, {} points (minimum {})",
            stats.pairs_accepted,
            stats.pairs_attempted,
            cloud.len(),
            self.config.min_points
        );

        Ok(ReconstructionResult {
            method: ReconstructionMethod::Sfm,
            cloud,
            success,
            poses: registered,
            representative_image: None,
            stats: Some(stats),
            warnings,
        })
    }

    /// Image pairs to match, as positions into the view list.
    fn pairs(&self, n: usize) -> Vec<(usize, usize)> {
        if n <= self.config.all_pairs_limit {
            (0..n)
                .flat_map(|a| (a + 1..n).map(move |b| (a, b)))
                .collect()
        } else {
            (0..n - 1).map(|a| (a, a + 1)).collect()
        }
    }

    fn reconstruct_pair(
        &self,
        views: &[(&Frame, Features)],
        a: usize,
        b: usize,
    ) -> Option<PairReconstruction> {
        let (frame_a, feats_a) = (views[a].0, &views[a].1);
        let (frame_b, feats_b) = (views[b].0, &views[b].1);
        let label = format!("'{}' <-> '{}'", frame_a.filename, frame_b.filename);

        let matches = self
            .backend
            .match_features(feats_a, feats_b, self.config.ratio_test);
        if matches.len() < self.config.min_pair_matches {
            debug!(
                "Pair {}: {} matches, below {}",
                label,
                matches.len(),
                self.config.min_pair_matches
            );
            return None;
        }

        let intrinsics = |frame: &Frame| {
            let (w, h) = frame.dimensions();
            Intrinsics::from_image_size(w, h, self.config.field_of_view_deg)
        };
        let (k_a, k_b) = (intrinsics(frame_a), intrinsics(frame_b));

        let (pts_a, pts_b): (Vec<Point2<f64>>, Vec<Point2<f64>>) = matches
            .iter()
            .map(|m| {
                let ka = feats_a.keypoints[m.query];
                let kb = feats_b.keypoints[m.train];
                (
                    k_a.normalize(f64::from(ka.x), f64::from(ka.y)),
                    k_b.normalize(f64::from(kb.x), f64::from(kb.y)),
                )
            })
            .unzip();

        let threshold = self.config.ransac_threshold_px / (0.5 * (k_a.mean_focal() + k_b.mean_focal()));
        let seed = ((a as u64) << 32) | b as u64;
        let estimate = geometry::estimate_essential_ransac(
            &pts_a,
            &pts_b,
            threshold,
            self.config.ransac_iterations,
            seed,
        )?;
        if estimate.inliers.len() < self.config.min_pair_matches {
            debug!(
                "Pair {}: {} geometric inliers of {} matches, below {}",
                label,
                estimate.inliers.len(),
                matches.len(),
                self.config.min_pair_matches
            );
            return None;
        }

        let Some(relative) = geometry::recover_pose(&estimate.essential, &pts_a, &pts_b, &estimate.inliers)
        else {
            debug!("Pair {}: pose recovery failed", label);
            return None;
        };

        let proj_a = geometry::projection(&Matrix3::identity(), &Vector3::zeros());
        let proj_b = geometry::projection(&relative.rotation, &relative.translation);
        let max_distance = f64::from(self.config.max_point_distance);

        let points: Vec<Point3D> = estimate
            .inliers
            .iter()
            .filter_map(|&i| {
                let x = geometry::triangulate_dlt(&pts_a[i], &pts_b[i], &proj_a, &proj_b)?;
                let depth_b = (relative.rotation * x.coords + relative.translation).z;
                let usable = x.coords.iter().all(|c| c.is_finite())
                    && x.z > 0.0
                    && depth_b > 0.0
                    && x.coords.norm() <= max_distance;
                usable.then(|| {
                    let kp = feats_a.keypoints[matches[i].query];
                    let position = Vec3::new(x.x as f32, x.y as f32, x.z as f32);
                    Point3D::new(position, sample_color(frame_a, kp.x, kp.y))
                })
            })
            .collect();

        debug!(
            "Pair {}: {} matches, {} inliers, {} points",
            label,
            matches.len(),
            estimate.inliers.len(),
            points.len()
        );

        Some(PairReconstruction {
            a,
            b,
            relative: to_camera_pose(&relative),
            points,
        })
    }
}

fn sample_color(frame: &Frame, x: f32, y: f32) -> [u8; 3] {
    let (w, h) = frame.dimensions();
    let px = (x.round().max(0.0) as u32).min(w.saturating_sub(1));
    let py = (y.round().max(0.0) as u32).min(h.saturating_sub(1));
    frame.image.get_pixel(px, py).0
}

fn to_camera_pose(relative: &RelativePose) -> CameraPose {
    let r = &relative.rotation;
    let column = |c: usize| Vec3::new(r[(0, c)] as f32, r[(1, c)] as f32, r[(2, c)] as f32);
    let t = &relative.translation;
    CameraPose::new(
        Mat3::from_cols(column(0), column(1), column(2)),
        Vec3::new(t.x as f32, t.y as f32, t.z as f32),
    )
}

/// Register views by chaining pair poses.
///
/// Each connected component of the pair graph is anchored at its first
/// view, which receives the identity pose.
fn chain_poses(pairs: &[PairReconstruction]) -> HashMap<usize, CameraPose> {
    let mut poses: HashMap<usize, CameraPose> = HashMap::new();
    let mut pending: Vec<&PairReconstruction> = pairs.iter().collect();

    while !pending.is_empty() {
        let before = pending.len();
        pending.retain(|pair| {
            match (poses.get(&pair.a).copied(), poses.get(&pair.b).copied()) {
                (Some(_), Some(_)) => false,
                (Some(pose_a), None) => {
                    poses.insert(pair.b, pose_a.compose(&pair.relative));
                    false
                }
                (None, Some(pose_b)) => {
                    poses.insert(pair.a, pose_b.compose(&pair.relative.inverse()));
                    false
                }
                (None, None) => true,
            }
        });

        if pending.len() == before {
            // Nothing connects to the registered views: start a new component.
            poses.insert(pending[0].a, CameraPose::identity());
        }
    }
    poses
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{Descriptor, Keypoint};
    use image::RgbImage;
    use nalgebra::Rotation3;

    /// Backend that "detects" the exact projections of a known scene.
    ///
    /// The view index is encoded in the red channel of pixel (0, 0); each
    /// scene point carries a unique descriptor so only true correspondences
    /// match.
    struct ProjectedScene {
        points: Vec<Vector3<f64>>,
        cameras: Vec<(Matrix3<f64>, Vector3<f64>)>,
        fov: f64,
    }

    fn descriptor_for(id: usize) -> Descriptor {
        let mut state = (id as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15);
        let mut d = [0u8; 32];
        for chunk in d.chunks_mut(8) {
            state ^= state >> 31;
            state = state.wrapping_mul(0xBF58_476D_1CE4_E5B9);
            state ^= state >> 29;
            chunk.copy_from_slice(&state.to_le_bytes());
        }
        d
    }

    impl FeatureBackend for ProjectedScene {
        fn extract(&self, image: &RgbImage, max_keypoints: usize) -> Features {
            let view = image.get_pixel(0, 0)[0] as usize;
            let Some((r, t)) = self.cameras.get(view) else {
                return Features::default();
            };
            let (w, h) = image.dimensions();
            let k = Intrinsics::from_image_size(w, h, self.fov);

            let mut feats = Features::default();
            for (id, p) in self.points.iter().enumerate() {
                let c = r * p + t;
                if c.z <= 0.0 {
                    continue;
                }
                let (u, v) = k.denormalize(&Point2::new(c.x / c.z, c.y / c.z));
                if u < 0.0 || v < 0.0 || u >= f64::from(w) || v >= f64::from(h) {
                    continue;
                }
                feats.keypoints.push(Keypoint::new(u as f32, v as f32, 1.0));
                feats.descriptors.push(descriptor_for(id));
                if feats.len() == max_keypoints {
                    break;
                }
            }
            feats
        }
    }

    fn scene(cameras: Vec<(Matrix3<f64>, Vector3<f64>)>) -> ProjectedScene {
        ProjectedScene {
            points: geometry::tests::scene_points(300),
            cameras,
            fov: 60.0,
        }
    }

    fn three_cameras() -> Vec<(Matrix3<f64>, Vector3<f64>)> {
        vec![
            (Matrix3::identity(), Vector3::zeros()),
            (
                Rotation3::from_euler_angles(0.0, -0.08, 0.0).into_inner(),
                Vector3::new(-0.8, 0.05, 0.0),
            ),
            (
                Rotation3::from_euler_angles(0.02, -0.15, 0.01).into_inner(),
                Vector3::new(-1.6, 0.0, 0.1),
            ),
        ]
    }

    fn frame(view: u8, index: usize) -> Frame {
        let mut image = RgbImage::from_pixel(640, 480, image::Rgb([90, 120, 150]));
        image.put_pixel(0, 0, image::Rgb([view, 0, 0]));
        Frame::new(image, index, format!("view{view}.png"))
    }

    #[test]
    fn test_three_overlapping_views_succeed() {
        let recon =
            SfmReconstructor::with_backend(SfmConfig::default(), Box::new(scene(three_cameras())));
        let frames: Vec<Frame> = (0..3).map(|i| frame(i as u8, i)).collect();
        let result = recon.reconstruct_frames(&frames).unwrap();

        assert!(result.success);
        assert_eq!(result.method, ReconstructionMethod::Sfm);
        assert!(result.cloud.len() >= 100);
        assert!(result.cloud.has_colors());
        assert_eq!(result.poses.len(), 3);
        assert_eq!(result.poses[0].pose, CameraPose::identity());
        let stats = result.stats.unwrap();
        assert_eq!((stats.pairs_attempted, stats.pairs_accepted), (3, 3));
        // The reference camera looks down +Z.
        assert!(result.cloud.points.iter().all(|p| p.position.z > 0.0));
    }

    #[test]
    fn test_second_camera_center_direction() {
        let recon =
            SfmReconstructor::with_backend(SfmConfig::default(), Box::new(scene(three_cameras())));
        let frames = vec![frame(0, 0), frame(1, 1)];
        let result = recon.reconstruct_frames(&frames).unwrap();

        // Camera 1 sits at +X of camera 0; scale is unit baseline.
        let center = result.poses[1].pose.camera_center();
        assert!(center.x > 0.9 && center.x < 1.1, "center {center:?}");
    }

    /// View 0 sees the scene; every other view sees unrelated points.
    struct DisjointViews {
        scene: ProjectedScene,
        unrelated: usize,
    }

    impl FeatureBackend for DisjointViews {
        fn extract(&self, image: &RgbImage, max_keypoints: usize) -> Features {
            if image.get_pixel(0, 0)[0] == 0 {
                return self.scene.extract(image, max_keypoints);
            }
            let mut feats = Features::default();
            for i in 0..self.unrelated {
                feats
                    .keypoints
                    .push(Keypoint::new(100.0 + i as f32, 100.0, 1.0));
                feats.descriptors.push(descriptor_for(10_000 + i));
            }
            feats
        }
    }

    #[test]
    fn test_disjoint_views_fail_quality_gate() {
        let recon = SfmReconstructor::with_backend(
            SfmConfig::default(),
            Box::new(DisjointViews {
                scene: scene(three_cameras()),
                unrelated: 150,
            }),
        );
        let result = recon
            .reconstruct_frames(&[frame(0, 0), frame(1, 1)])
            .unwrap();
        assert!(!result.success);
        assert!(result.cloud.is_empty());
        assert_eq!(result.stats.unwrap().pairs_accepted, 0);
    }

    #[test]
    fn test_featureless_view_is_dropped() {
        let recon =
            SfmReconstructor::with_backend(SfmConfig::default(), Box::new(scene(three_cameras())));
        // View 7 has no camera, so it yields no keypoints.
        let frames = vec![frame(0, 0), frame(7, 1), frame(1, 2)];
        let result = recon.reconstruct_frames(&frames).unwrap();

        assert!(result.success);
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.stats.unwrap().images_used, 2);
        let indices: Vec<usize> = result.poses.iter().map(|p| p.image_index).collect();
        assert_eq!(indices, vec![0, 2]);
    }

    #[test]
    fn test_too_few_feature_images_is_error() {
        let recon =
            SfmReconstructor::with_backend(SfmConfig::default(), Box::new(scene(three_cameras())));
        let frames = vec![frame(0, 0), frame(9, 1)];
        assert!(matches!(
            recon.reconstruct_frames(&frames),
            Err(ReconError::InsufficientFeatures(_))
        ));
        assert!(matches!(
            recon.reconstruct_frames(&frames[..1]),
            Err(ReconError::InsufficientFeatures(_))
        ));
    }

    #[test]
    fn test_pair_selection() {
        let recon = SfmReconstructor::new(SfmConfig::default());
        assert_eq!(recon.pairs(3), vec![(0, 1), (0, 2), (1, 2)]);
        assert_eq!(recon.pairs(6), vec![(0, 1), (1, 2), (2, 3), (3, 4), (4, 5)]);
    }

    #[test]
    fn test_chain_poses_inverse_link() {
        let relative = CameraPose::new(Mat3::IDENTITY, Vec3::new(-1.0, 0.0, 0.0));
        let pairs = vec![
            PairReconstruction {
                a: 1,
                b: 2,
                relative,
                points: Vec::new(),
            },
            PairReconstruction {
                a: 0,
                b: 1,
                relative,
                points: Vec::new(),
            },
        ];
        let poses = chain_poses(&pairs);
        assert_eq!(poses.len(), 3);
        assert_eq!(poses[&1], CameraPose::identity());
        assert!((poses[&0].camera_center() - Vec3::new(-1.0, 0.0, 0.0)).length() < 1e-6);
        assert!((poses[&2].camera_center() - Vec3::new(1.0, 0.0, 0.0)).length() < 1e-6);
    }
}
