//! Keypoint detection, binary descriptors and descriptor matching
//!
//! Structure from motion only depends on the [`FeatureBackend`] trait, so the
//! detector and descriptor can be swapped without touching the geometry code.
//! The built-in backend pairs a corner detector ([`FeatureKind`]) with
//! 256-bit BRIEF descriptors matched by Hamming distance.

mod brief;
mod detect;

pub use brief::{BriefBackend, describe};
pub use detect::{detect_fast, detect_harris};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use image::RgbImage;

/// Descriptor matches farther apart than this many bits are never accepted.
pub const MAX_MATCH_DISTANCE: u32 = 80;

/// Keypoints closer than this to the border are discarded so that every
/// descriptor sample lies inside the image.
pub const BORDER_MARGIN: u32 = 16;

/// A detected image location with its detector response.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
    pub score: f32,
}

impl Keypoint {
    pub fn new(x: f32, y: f32, score: f32) -> Self {
        Self { x, y, score }
    }
}

/// 256-bit binary descriptor.
pub type Descriptor = [u8; 32];

pub fn hamming_distance(a: &Descriptor, b: &Descriptor) -> u32 {
    a.iter().zip(b).map(|(x, y)| (x ^ y).count_ones()).sum()
}

/// Keypoints of one image with one descriptor per keypoint.
#[derive(Debug, Clone, Default)]
pub struct Features {
    pub keypoints: Vec<Keypoint>,
    pub descriptors: Vec<Descriptor>,
}

impl Features {
    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }
}

/// Correspondence between keypoint `query` of one image and `train` of another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureMatch {
    pub query: usize,
    pub train: usize,
    pub distance: u32,
}

/// Corner detector used by the built-in backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureKind {
    /// FAST-9 segment test.
    #[default]
    Fast,
    /// Harris corner response.
    Harris,
}

impl fmt::Display for FeatureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureKind::Fast => f.write_str("fast"),
            FeatureKind::Harris => f.write_str("harris"),
        }
    }
}

impl FromStr for FeatureKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fast" => Ok(FeatureKind::Fast),
            "harris" => Ok(FeatureKind::Harris),
            other => Err(format!("unknown feature kind '{other}'")),
        }
    }
}

/// Detection, description and matching of local features.
pub trait FeatureBackend: Send + Sync {
    /// Extract at most `max_keypoints` keypoints with descriptors.
    fn extract(&self, image: &RgbImage, max_keypoints: usize) -> Features;

    /// Match `query` against `train`, keeping matches that pass the ratio
    /// test and are mutual nearest neighbours.
    fn match_features(&self, query: &Features, train: &Features, ratio: f32) -> Vec<FeatureMatch> {
        hamming_match(&query.descriptors, &train.descriptors, ratio)
    }
}

/// Built-in backend for a detector kind.
pub fn backend_for(kind: FeatureKind) -> Box<dyn FeatureBackend> {
    Box::new(BriefBackend::new(kind))
}

/// Brute-force Hamming matching with Lowe's ratio test and cross-check.
///
/// A query keeps its nearest train descriptor when the best distance is
/// below `ratio` times the second best, is at most [`MAX_MATCH_DISTANCE`],
/// and the train descriptor's own nearest query is the same keypoint.
/// Output is ordered by query index.
pub fn hamming_match(query: &[Descriptor], train: &[Descriptor], ratio: f32) -> Vec<FeatureMatch> {
    if query.is_empty() || train.is_empty() {
        return Vec::new();
    }

    let reverse: Vec<usize> = train
        .par_iter()
        .map(|t| nearest(t, query).0)
        .collect();

    query
        .par_iter()
        .enumerate()
        .filter_map(|(qi, q)| {
            let (ti, best, second) = nearest(q, train);
            if best > MAX_MATCH_DISTANCE {
                return None;
            }
            if let Some(second) = second {
                if best as f32 >= ratio * second as f32 {
                    return None;
                }
            }
            (reverse[ti] == qi).then_some(FeatureMatch {
                query: qi,
                train: ti,
                distance: best,
            })
        })
        .collect()
}

/// Index and distance of the nearest candidate, plus the second-best distance.
fn nearest(d: &Descriptor, candidates: &[Descriptor]) -> (usize, u32, Option<u32>) {
    let mut best = (0usize, u32::MAX);
    let mut second: Option<u32> = None;
    for (i, c) in candidates.iter().enumerate() {
        let dist = hamming_distance(d, c);
        if dist < best.1 {
            if best.1 != u32::MAX {
                second = Some(best.1);
            }
            best = (i, dist);
        } else if second.is_none_or(|s| dist < s) {
            second = Some(dist);
        }
    }
    (best.0, best.1, second)
}
