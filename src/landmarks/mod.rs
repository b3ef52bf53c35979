//! Hand landmark types and the detector capability boundary.

use image::RgbImage;

/// Per-frame video extraction built on a [`HandPoseDetector`].
pub mod extractor;
/// ONNX Runtime backed hand landmark detector.
pub mod onnx;

pub use extractor::{ExtractError, extract};
pub use onnx::OnnxHandLandmarker;

/// Number of keypoints the detector reports per hand.
pub const KEYPOINTS_PER_HAND: usize = 21;
/// Maximum number of hands considered per frame.
pub const MAX_HANDS: usize = 2;
/// Coordinates per keypoint (x, y, z).
pub const COORDS_PER_KEYPOINT: usize = 3;

/// A single detected keypoint in normalized image coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// One detected hand: an ordered sequence of 21 keypoints.
#[derive(Debug, Clone, PartialEq)]
pub struct Hand {
    /// Keypoints in detector order, length [`KEYPOINTS_PER_HAND`].
    pub landmarks: Vec<Landmark>,
}

/// All hands detected in one decoded frame. Never empty when emitted; frames
/// without any detection are dropped by the extractor instead.
#[derive(Debug, Clone, PartialEq)]
pub struct LandmarkFrame {
    /// Between 1 and [`MAX_HANDS`] hands, in detector order.
    pub hands: Vec<Hand>,
}

impl LandmarkFrame {
    /// Flatten to a single feature vector: hand, then keypoint, then x/y/z.
    pub fn flatten(&self) -> Vec<f32> {
        let mut features =
            Vec::with_capacity(self.hands.len() * KEYPOINTS_PER_HAND * COORDS_PER_KEYPOINT);
        for hand in &self.hands {
            for landmark in &hand.landmarks {
                features.push(landmark.x);
                features.push(landmark.y);
                features.push(landmark.z);
            }
        }
        features
    }
}

/// External hand-pose detection capability.
///
/// Implementations return zero to [`MAX_HANDS`] hands per image, each with
/// exactly [`KEYPOINTS_PER_HAND`] normalized 3-D keypoints.
pub trait HandPoseDetector: Send + Sync {
    /// Detect hands in one decoded frame.
    fn detect(&self, image: &RgbImage) -> Vec<Hand>;
}
