//! Cue-based monocular depth model

use crate::depth::{DepthEstimator, DepthModel};
use crate::error::ReconError;
use image::{ImageBuffer, Luma, RgbImage, imageops};
use photocloud_data::DepthMap;
use tracing::debug;

pub(super) type FloatImage = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Depth from single-image cues, evaluated on the CPU.
///
/// Predicts a normalized inverse depth (disparity) from a ground-plane prior
/// (lower rows are nearer) blended with local texture energy (detailed
/// regions are nearer), smooths it, then converts to relative distance with
/// [`DepthMap::from_inverse_depth`]. Deterministic for a given input.
#[derive(Debug, Clone)]
pub struct CueDepthEstimator {
    model: DepthModel,
}

impl CueDepthEstimator {
    pub fn new(model: DepthModel) -> Self {
        Self { model }
    }
}

impl DepthEstimator for CueDepthEstimator {
    fn model(&self) -> DepthModel {
        self.model
    }

    #[tracing::instrument(skip_all, fields(model = %self.model))]
    fn estimate_depth(&self, image: &RgbImage) -> Result<DepthMap, ReconError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(ReconError::ModelInference(format!(
                "cannot run depth model on an empty {width}x{height} image"
            )));
        }

        let params = self.model.params();
        let scale = (params.working_size as f32 / width.max(height) as f32).min(1.0);
        let work_w = ((width as f32 * scale).round() as u32).max(1);
        let work_h = ((height as f32 * scale).round() as u32).max(1);

        let working = if (work_w, work_h) == (width, height) {
            image.clone()
        } else {
            imageops::resize(image, work_w, work_h, params.filter)
        };

        let luma: Vec<f32> = working
            .pixels()
            .map(|p| {
                let [r, g, b] = p.0;
                (0.299 * f32::from(r) + 0.587 * f32::from(g) + 0.114 * f32::from(b)) / 255.0
            })
            .collect();

        let (w, h) = (work_w as usize, work_h as usize);
        let texture = texture_energy(&luma, w, h, params.texture_radius);

        let mut disparity: Vec<f32> = (0..h)
            .flat_map(|y| {
                let prior = 0.15 + 0.85 * (y as f32 / (h.max(2) - 1) as f32);
                let texture = &texture;
                (0..w).map(move |x| {
                    (1.0 - params.texture_weight) * prior + params.texture_weight * texture[y * w + x]
                })
            })
            .collect();
        box_blur(&mut disparity, w, h, params.smoothing_radius);
        normalize_unit(&mut disparity);

        let disparity = if (work_w, work_h) == (width, height) {
            disparity
        } else {
            let small = FloatImage::from_raw(work_w, work_h, disparity).ok_or_else(|| {
                ReconError::ModelInference("working buffer has the wrong size".to_string())
            })?;
            imageops::resize(&small, width, height, imageops::FilterType::Triangle).into_raw()
        };

        if disparity.iter().any(|d| !d.is_finite()) {
            return Err(ReconError::ModelInference(
                "model produced non-finite depth values".to_string(),
            ));
        }

        debug!(
            "Estimated depth at {}x{} (working {}x{})",
            width, height, work_w, work_h
        );

        DepthMap::from_inverse_depth(width, height, &disparity).ok_or_else(|| {
            ReconError::ModelInference("depth map does not match the input size".to_string())
        })
    }
}

/// Gradient magnitude averaged over a `(2r+1)^2` window, scaled to [0, 1].
fn texture_energy(luma: &[f32], w: usize, h: usize, radius: usize) -> Vec<f32> {
    let at = |x: usize, y: usize| luma[y * w + x];
    let mut energy = vec![0.0f32; w * h];
    for y in 0..h {
        for x in 0..w {
            let dx = at((x + 1).min(w - 1), y) - at(x.saturating_sub(1), y);
            let dy = at(x, (y + 1).min(h - 1)) - at(x, y.saturating_sub(1));
            energy[y * w + x] = dx.abs() + dy.abs();
        }
    }
    box_blur(&mut energy, w, h, radius);

    let max = energy.iter().copied().fold(0.0f32, f32::max);
    if max > 0.0 {
        energy.iter_mut().for_each(|e| *e /= max);
    }
    energy
}

/// Separable box filter with clamped borders, in place.
fn box_blur(values: &mut [f32], w: usize, h: usize, radius: usize) {
    if radius == 0 {
        return;
    }
    let mut scratch = vec![0.0f32; values.len()];

    for y in 0..h {
        for x in 0..w {
            let lo = x.saturating_sub(radius);
            let hi = (x + radius).min(w - 1);
            let sum: f32 = values[y * w + lo..=y * w + hi].iter().sum();
            scratch[y * w + x] = sum / (hi - lo + 1) as f32;
        }
    }
    for y in 0..h {
        let lo = y.saturating_sub(radius);
        let hi = (y + radius).min(h - 1);
        for x in 0..w {
            let sum: f32 = (lo..=hi).map(|yy| scratch[yy * w + x]).sum();
            values[y * w + x] = sum / (hi - lo + 1) as f32;
        }
    }
}

/// Min-max normalize to [0, 1]; a flat field becomes all ones.
pub(super) fn normalize_unit(values: &mut [f32]) {
    let (min, max) = values
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let range = max - min;
    if !range.is_finite() || range < 1e-6 {
        values.iter_mut().for_each(|v| *v = 1.0);
        return;
    }
    values.iter_mut().for_each(|v| *v = (*v - min) / range);
}
