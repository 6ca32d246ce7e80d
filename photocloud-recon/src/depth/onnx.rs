//! ONNX Runtime depth model

use crate::depth::cues::{FloatImage, normalize_unit};
use crate::depth::{DepthEstimator, DepthModel};
use crate::error::ReconError;
use image::RgbImage;
use image::imageops::{self, FilterType};
use ort::session::Session;
use ort::value::Tensor;
use photocloud_data::DepthMap;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info};

/// Input side length and per-channel mean/std of each exported variant.
fn input_layout(model: DepthModel) -> (u32, [f32; 3], [f32; 3]) {
    match model {
        DepthModel::Small => (256, [0.485, 0.456, 0.406], [0.229, 0.224, 0.225]),
        DepthModel::Hybrid | DepthModel::Large => (384, [0.5; 3], [0.5; 3]),
    }
}

/// Depth from an exported MiDaS/DPT network.
///
/// The network takes a `1x3xSxS` normalized RGB tensor and returns relative
/// inverse depth; the output is min-max normalized, resampled to the input
/// size and converted with [`DepthMap::from_inverse_depth`]. The session is
/// created on first use so a missing or broken file surfaces as
/// [`ReconError::ModelInference`] on the task that needs it.
pub struct OnnxDepthEstimator {
    model: DepthModel,
    path: PathBuf,
    session: Mutex<Option<Session>>,
}

impl OnnxDepthEstimator {
    pub fn new(model: DepthModel, path: impl Into<PathBuf>) -> Self {
        Self {
            model,
            path: path.into(),
            session: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn inference_error(&self, e: impl Display) -> ReconError {
        ReconError::ModelInference(format!("{} ({}): {}", self.model, self.path.display(), e))
    }

    fn load(&self) -> Result<Session, ReconError> {
        if !self.path.is_file() {
            return Err(self.inference_error("model file not found"));
        }
        info!("Loading {} depth model from {}", self.model, self.path.display());
        Session::builder()
            .and_then(|builder| builder.commit_from_file(&self.path))
            .map_err(|e| self.inference_error(e))
    }

    /// Resize to the network input and lay out as normalized planar RGB.
    fn input_tensor(&self, image: &RgbImage) -> Vec<f32> {
        let (side, mean, std) = input_layout(self.model);
        let resized = imageops::resize(image, side, side, FilterType::CatmullRom);
        let plane = (side * side) as usize;
        let mut tensor = vec![0.0f32; 3 * plane];
        for (i, pixel) in resized.pixels().enumerate() {
            for c in 0..3 {
                tensor[c * plane + i] = (f32::from(pixel.0[c]) / 255.0 - mean[c]) / std[c];
            }
        }
        tensor
    }

    fn run(&self, input: Vec<f32>) -> Result<(u32, u32, Vec<f32>), ReconError> {
        let mut guard = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.is_none() {
            *guard = Some(self.load()?);
        }
        let session = guard
            .as_mut()
            .ok_or_else(|| self.inference_error("session unavailable"))?;

        let side = input_layout(self.model).0 as usize;
        let tensor = Tensor::from_array(([1usize, 3, side, side], input))
            .map_err(|e| self.inference_error(e))?;
        let outputs = session
            .run(ort::inputs![tensor])
            .map_err(|e| self.inference_error(e))?;
        let (shape, values) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| self.inference_error(e))?;

        let dims = shape.len();
        if dims < 2 {
            return Err(self.inference_error(format!("unexpected output rank {dims}")));
        }
        let out_h = u32::try_from(shape[dims - 2]).map_err(|e| self.inference_error(e))?;
        let out_w = u32::try_from(shape[dims - 1]).map_err(|e| self.inference_error(e))?;
        if out_h == 0 || out_w == 0 || values.len() != out_h as usize * out_w as usize {
            return Err(self.inference_error(format!(
                "output of {} values does not form a {}x{} map",
                values.len(),
                out_w,
                out_h
            )));
        }
        Ok((out_w, out_h, values.to_vec()))
    }
}

impl DepthEstimator for OnnxDepthEstimator {
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

        let (out_w, out_h, mut disparity) = self.run(self.input_tensor(image))?;
        if disparity.iter().any(|d| !d.is_finite()) {
            return Err(self.inference_error("model produced non-finite depth values"));
        }
        normalize_unit(&mut disparity);

        let small = FloatImage::from_raw(out_w, out_h, disparity)
            .ok_or_else(|| self.inference_error("output buffer has the wrong size"))?;
        let disparity = imageops::resize(&small, width, height, FilterType::CatmullRom).into_raw();

        debug!("Estimated depth at {}x{} from {}x{} output", width, height, out_w, out_h);

        DepthMap::from_inverse_depth(width, height, &disparity)
            .ok_or_else(|| self.inference_error("depth map does not match the input size"))
    }
}
