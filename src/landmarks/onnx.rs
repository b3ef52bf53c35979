//! ONNX Runtime backed hand landmark detector.
//!
//! Loads a single-hand landmark model once per process from a configured
//! asset path. The model takes a 224x224 RGB image and returns 21 keypoints
//! in input-pixel coordinates plus a hand presence score.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use image::RgbImage;
use ndarray::Array4;
use ort::{
    inputs,
    session::{Session, builder::GraphOptimizationLevel},
    value::Tensor,
};
use thiserror::Error;

use super::{COORDS_PER_KEYPOINT, Hand, HandPoseDetector, KEYPOINTS_PER_HAND, Landmark};

/// Model input edge length in pixels.
const INPUT_SIZE: u32 = 224;
/// Minimum presence score for a detection to count as a hand.
const DEFAULT_PRESENCE_THRESHOLD: f32 = 0.5;

/// Errors raised while loading the detector model asset.
#[derive(Debug, Error)]
pub enum DetectorError {
    /// The model asset path does not exist. Fatal at startup.
    #[error("Hand landmark model not found: {path}")]
    NotFound { path: PathBuf },
    /// ONNX Runtime failed to build the session.
    #[error("Failed to load hand landmark model: {0}")]
    Session(#[from] ort::Error),
    /// The model has an unexpected input/output signature.
    #[error("Unsupported hand landmark model: {0}")]
    BadSignature(String),
}

/// Hand landmark detector over a single-hand ONNX model.
///
/// Reports zero or one hand per frame; multi-hand clips still work because
/// the sequence padding masks the missing second hand's feature positions.
#[derive(Debug)]
pub struct OnnxHandLandmarker {
    session: Mutex<Session>,
    input_name: String,
    landmark_output: String,
    presence_output: Option<String>,
    presence_threshold: f32,
}

impl OnnxHandLandmarker {
    /// Load the detector from a model asset path.
    pub fn new(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::NotFound {
                path: model_path.to_path_buf(),
            });
        }

        tracing::info!("Loading hand landmark model from {}", model_path.display());
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .commit_from_file(model_path)?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .ok_or_else(|| DetectorError::BadSignature("model has no inputs".to_string()))?;
        let landmark_output = session
            .outputs
            .first()
            .map(|output| output.name.clone())
            .ok_or_else(|| DetectorError::BadSignature("model has no outputs".to_string()))?;
        let presence_output = session.outputs.get(1).map(|output| output.name.clone());
        for (i, output) in session.outputs.iter().enumerate() {
            tracing::debug!("Detector output[{i}]: '{}'", output.name);
        }

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            landmark_output,
            presence_output,
            presence_threshold: DEFAULT_PRESENCE_THRESHOLD,
        })
    }

    /// Override the presence threshold (defaults to 0.5).
    pub fn with_presence_threshold(mut self, threshold: f32) -> Self {
        self.presence_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    fn preprocess(&self, image: &RgbImage) -> Array4<f32> {
        let resized = image::imageops::resize(
            image,
            INPUT_SIZE,
            INPUT_SIZE,
            image::imageops::FilterType::Triangle,
        );
        let mut input = Array4::<f32>::zeros((1, INPUT_SIZE as usize, INPUT_SIZE as usize, 3));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for channel in 0..3 {
                input[[0, y as usize, x as usize, channel]] = pixel[channel] as f32 / 255.0;
            }
        }
        input
    }

    fn run(&self, image: &RgbImage) -> Result<Vec<Hand>, ort::Error> {
        let input = self.preprocess(image);
        let input_tensor = Tensor::from_array(input)?;

        let (landmarks, presence) = {
            let mut session = match self.session.lock() {
                Ok(session) => session,
                Err(poisoned) => poisoned.into_inner(),
            };
            let outputs = session.run(inputs![self.input_name.as_str() => input_tensor])?;
            let landmarks = match outputs.get(self.landmark_output.as_str()) {
                Some(value) => value.try_extract_array::<f32>()?.into_owned(),
                None => return Ok(Vec::new()),
            };
            let presence = match &self.presence_output {
                Some(name) => outputs
                    .get(name.as_str())
                    .and_then(|value| value.try_extract_array::<f32>().ok())
                    .and_then(|scores| scores.iter().next().copied())
                    .unwrap_or(1.0),
                None => 1.0,
            };
            (landmarks, presence)
        };

        if presence < self.presence_threshold {
            return Ok(Vec::new());
        }

        let values: Vec<f32> = landmarks.iter().copied().collect();
        if values.len() < KEYPOINTS_PER_HAND * COORDS_PER_KEYPOINT {
            tracing::warn!(
                "Detector returned {} values, expected at least {}",
                values.len(),
                KEYPOINTS_PER_HAND * COORDS_PER_KEYPOINT
            );
            return Ok(Vec::new());
        }

        // Model coordinates are in input-pixel space; normalize to [0, 1].
        let scale = INPUT_SIZE as f32;
        let landmarks = values
            .chunks_exact(COORDS_PER_KEYPOINT)
            .take(KEYPOINTS_PER_HAND)
            .map(|coords| Landmark {
                x: coords[0] / scale,
                y: coords[1] / scale,
                z: coords[2] / scale,
            })
            .collect();
        Ok(vec![Hand { landmarks }])
    }
}

impl HandPoseDetector for OnnxHandLandmarker {
    fn detect(&self, image: &RgbImage) -> Vec<Hand> {
        // Detection failures degrade to "no hands" so a single bad frame
        // never aborts a whole dataset build.
        match self.run(image) {
            Ok(hands) => hands,
            Err(err) => {
                tracing::warn!("Hand detection failed: {err}");
                Vec::new()
            }
        }
    }
}
