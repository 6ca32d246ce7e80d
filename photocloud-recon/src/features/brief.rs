//! BRIEF binary descriptors

use super::{Descriptor, FeatureBackend, FeatureKind, Features, Keypoint, detect};
use image::{GrayImage, RgbImage, imageops};
use std::sync::OnceLock;
use tracing::debug;

const PATCH_RADIUS: i32 = 15;
const SMOOTHING_SIGMA: f32 = 2.0;

type SamplePair = [(i32, i32); 2];

/// Fixed sampling pattern, identical for every image and every run.
fn pattern() -> &'static [SamplePair; 256] {
    static PATTERN: OnceLock<[SamplePair; 256]> = OnceLock::new();
    PATTERN.get_or_init(|| {
        let mut state: u64 = 0x9E37_79B9_7F4A_7C15;
        let mut next = || {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            ((state >> 33) % (2 * PATCH_RADIUS as u64 + 1)) as i32 - PATCH_RADIUS
        };
        let mut pairs = [[(0, 0); 2]; 256];
        for pair in pairs.iter_mut() {
            *pair = [(next(), next()), (next(), next())];
        }
        pairs
    })
}

/// Compute one descriptor per keypoint on a pre-smoothed grayscale image.
///
/// Samples outside the image are clamped to the border.
pub fn describe(smoothed: &GrayImage, keypoints: &[Keypoint]) -> Vec<Descriptor> {
    let (w, h) = (smoothed.width() as i32, smoothed.height() as i32);
    let sample = |x: i32, y: i32| {
        smoothed.get_pixel(x.clamp(0, w - 1) as u32, y.clamp(0, h - 1) as u32)[0]
    };

    keypoints
        .iter()
        .map(|kp| {
            let (cx, cy) = (kp.x.round() as i32, kp.y.round() as i32);
            let mut descriptor = [0u8; 32];
            for (bit, [(ax, ay), (bx, by)]) in pattern().iter().enumerate() {
                if sample(cx + ax, cy + ay) < sample(cx + bx, cy + by) {
                    descriptor[bit / 8] |= 1 << (bit % 8);
                }
            }
            descriptor
        })
        .collect()
}

/// Corner detector plus BRIEF descriptors.
#[derive(Debug, Clone, Copy)]
pub struct BriefBackend {
    kind: FeatureKind,
}

impl BriefBackend {
    pub fn new(kind: FeatureKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> FeatureKind {
        self.kind
    }
}

impl FeatureBackend for BriefBackend {
    fn extract(&self, image: &RgbImage, max_keypoints: usize) -> Features {
        if image.width() == 0 || image.height() == 0 {
            return Features::default();
        }
        let gray = imageops::grayscale(image);
        let keypoints = match self.kind {
            FeatureKind::Fast => detect::detect_fast(&gray, max_keypoints),
            FeatureKind::Harris => detect::detect_harris(&gray, max_keypoints),
        };
        let smoothed = imageops::blur(&gray, SMOOTHING_SIGMA);
        let descriptors = describe(&smoothed, &keypoints);

        debug!(
            "Extracted {} {} keypoints from {}x{} image",
            keypoints.len(),
            self.kind,
            image.width(),
            image.height()
        );
        Features {
            keypoints,
            descriptors,
        }
    }
}
