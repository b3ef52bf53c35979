//! Sequence classifier over padded landmark tensors.
//!
//! The classifier pools each masked frame sequence into a fixed vector
//! (per-feature masked mean plus masked mean of frame-to-frame deltas), then
//! applies a single hidden ReLU layer and a softmax head. Pooling carries no
//! learnable state, so weights transfer across retraining runs even when the
//! padded frame count changes.

use ndarray::ArrayView2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Per-word and overall accuracy on a test partition.
pub mod accuracy;
/// Artifact persistence: weights JSON plus key/value metadata sidecar.
pub mod artifact;
/// Mini-batch SGD training with early stopping.
pub mod train;

pub use artifact::{ArtifactError, ModelArtifact, ModelMetadata};
pub use train::{FitOptions, TrainError, fit};

/// Pooled input width for a given per-frame feature width.
pub fn pooled_len(num_features: usize) -> usize {
    2 * num_features
}

/// Trained ASL word classifier with everything needed to run inference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignClassifier {
    pub model_version: i64,
    /// Closed, ordered word vocabulary; label = index into this list.
    pub vocabulary: Vec<String>,
    /// Padded frame count the producing training run used.
    pub max_frames: usize,
    /// Per-frame feature width (hands x keypoints x coords).
    pub num_features: usize,
    pub hidden_size: usize,
    /// Row-major `hidden_size x pooled_len` first-layer weights.
    pub weights1: Vec<f32>,
    pub bias1: Vec<f32>,
    /// Row-major `vocabulary_len x hidden_size` output weights.
    pub weights2: Vec<f32>,
    pub bias2: Vec<f32>,
    /// Pooled-feature normalization, frozen at first training.
    pub feature_mean: Vec<f32>,
    pub feature_std: Vec<f32>,
}

impl SignClassifier {
    /// Randomly initialized, untrained classifier for bootstrapping a first
    /// base model. Normalization starts as identity.
    pub fn untrained(
        vocabulary: Vec<String>,
        max_frames: usize,
        num_features: usize,
        hidden_size: usize,
        seed: u64,
    ) -> Self {
        let pooled = pooled_len(num_features);
        let classes = vocabulary.len();
        let mut rng = StdRng::seed_from_u64(seed);
        let mut weights1 = vec![0.0f32; hidden_size * pooled];
        let mut weights2 = vec![0.0f32; classes * hidden_size];
        for w in &mut weights1 {
            *w = (rng.random::<f32>() - 0.5) * 0.1;
        }
        for w in &mut weights2 {
            *w = (rng.random::<f32>() - 0.5) * 0.1;
        }
        Self {
            model_version: 1,
            vocabulary,
            max_frames,
            num_features,
            hidden_size,
            weights1,
            bias1: vec![0.0; hidden_size],
            weights2,
            bias2: vec![0.0; classes],
            feature_mean: vec![0.0; pooled],
            feature_std: vec![1.0; pooled],
        }
    }

    /// Check all weight/metadata length invariants.
    pub fn validate(&self) -> Result<(), String> {
        let input = pooled_len(self.num_features);
        let hidden = self.hidden_size;
        let classes = self.vocabulary.len();
        if classes == 0 {
            return Err("empty vocabulary".to_string());
        }
        if self.weights1.len() != hidden * input {
            return Err("weights1 length mismatch".to_string());
        }
        if self.bias1.len() != hidden {
            return Err("bias1 length mismatch".to_string());
        }
        if self.weights2.len() != classes * hidden {
            return Err("weights2 length mismatch".to_string());
        }
        if self.bias2.len() != classes {
            return Err("bias2 length mismatch".to_string());
        }
        if self.feature_mean.len() != input {
            return Err("feature_mean length mismatch".to_string());
        }
        if self.feature_std.len() != input {
            return Err("feature_std length mismatch".to_string());
        }
        Ok(())
    }

    /// Probability distribution over the vocabulary for one padded video.
    pub fn predict_proba(&self, data: ArrayView2<'_, f32>, mask: ArrayView2<'_, f32>) -> Vec<f32> {
        let pooled = pool_sequence(data, mask);
        self.predict_pooled(&pooled)
    }

    /// Forward pass over an already-pooled feature vector.
    pub fn predict_pooled(&self, pooled: &[f32]) -> Vec<f32> {
        let input = pooled_len(self.num_features);
        let hidden = self.hidden_size;
        let classes = self.vocabulary.len();
        if pooled.len() != input || classes == 0 || hidden == 0 {
            return Vec::new();
        }

        let mut normalized = vec![0.0f32; input];
        for i in 0..input {
            let std = self.feature_std[i].max(1e-6);
            normalized[i] = (pooled[i] - self.feature_mean[i]) / std;
        }

        let mut hidden_act = vec![0.0f32; hidden];
        for h in 0..hidden {
            let mut sum = self.bias1[h];
            let base = h * input;
            for i in 0..input {
                sum += self.weights1[base + i] * normalized[i];
            }
            hidden_act[h] = sum.max(0.0);
        }

        let mut logits = vec![0.0f32; classes];
        for c in 0..classes {
            let mut sum = self.bias2[c];
            let base = c * hidden;
            for h in 0..hidden {
                sum += self.weights2[base + h] * hidden_act[h];
            }
            logits[c] = sum;
        }

        softmax(&logits)
    }

    /// Arg-max class index for one padded video.
    pub fn predict_class_index(
        &self,
        data: ArrayView2<'_, f32>,
        mask: ArrayView2<'_, f32>,
    ) -> usize {
        argmax(&self.predict_proba(data, mask))
    }
}

/// Index of the largest probability (0 for an empty distribution).
pub fn argmax(proba: &[f32]) -> usize {
    let mut best = 0usize;
    let mut best_val = f32::NEG_INFINITY;
    for (idx, &p) in proba.iter().enumerate() {
        if p > best_val {
            best_val = p;
            best = idx;
        }
    }
    best
}

/// Numerically stable softmax; uniform output when all logits underflow.
pub fn softmax(raw: &[f32]) -> Vec<f32> {
    if raw.is_empty() {
        return Vec::new();
    }
    let max = raw.iter().copied().fold(f32::NEG_INFINITY, |a, b| a.max(b));
    let mut out = vec![0.0f32; raw.len()];
    let mut sum = 0.0f32;
    for (i, &v) in raw.iter().enumerate() {
        let e = (v - max).exp();
        out[i] = e;
        sum += e;
    }
    if sum == 0.0 {
        let uniform = 1.0 / (raw.len() as f32);
        out.fill(uniform);
        return out;
    }
    for v in &mut out {
        *v /= sum;
    }
    out
}

/// Pool a masked `(frames, features)` sequence into a fixed vector.
///
/// First half: per-feature mean over mask-valid positions. Second half:
/// per-feature mean of deltas between consecutive frames where both
/// positions are valid. Padded positions never contribute.
pub fn pool_sequence(data: ArrayView2<'_, f32>, mask: ArrayView2<'_, f32>) -> Vec<f32> {
    let frames = data.shape()[0];
    let features = data.shape()[1];
    let mut pooled = vec![0.0f32; 2 * features];

    for f in 0..features {
        let mut sum = 0.0f32;
        let mut count = 0.0f32;
        for t in 0..frames {
            if mask[[t, f]] > 0.0 {
                sum += data[[t, f]];
                count += 1.0;
            }
        }
        if count > 0.0 {
            pooled[f] = sum / count;
        }

        let mut delta_sum = 0.0f32;
        let mut delta_count = 0.0f32;
        for t in 1..frames {
            if mask[[t, f]] > 0.0 && mask[[t - 1, f]] > 0.0 {
                delta_sum += data[[t, f]] - data[[t - 1, f]];
                delta_count += 1.0;
            }
        }
        if delta_count > 0.0 {
            pooled[features + f] = delta_sum / delta_count;
        }
    }
    pooled
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    #[test]
    fn softmax_output_sums_to_one() {
        let model = SignClassifier::untrained(
            vec!["no".to_string(), "eat".to_string()],
            4,
            3,
            8,
            42,
        );
        model.validate().unwrap();
        let data = arr2(&[[0.1, 0.2, 0.3], [0.2, 0.3, 0.4]]);
        let mask = arr2(&[[1.0, 1.0, 1.0], [1.0, 1.0, 1.0]]);
        let proba = model.predict_proba(data.view(), mask.view());
        let sum: f32 = proba.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
    }

    #[test]
    fn pooling_ignores_masked_positions() {
        let data = arr2(&[[2.0, 9.0], [4.0, 0.0]]);
        let mask = arr2(&[[1.0, 1.0], [1.0, 0.0]]);
        let pooled = pool_sequence(data.view(), mask.view());
        // Feature 0 averages both frames; feature 1 only the first.
        assert_eq!(pooled[0], 3.0);
        assert_eq!(pooled[1], 9.0);
        // Delta for feature 0 exists, feature 1 has no valid pair.
        assert_eq!(pooled[2], 2.0);
        assert_eq!(pooled[3], 0.0);
    }

    #[test]
    fn fully_masked_sequence_pools_to_zero() {
        let data = arr2(&[[5.0], [7.0]]);
        let mask = arr2(&[[0.0], [0.0]]);
        let pooled = pool_sequence(data.view(), mask.view());
        assert_eq!(pooled, vec![0.0, 0.0]);
    }

    #[test]
    fn validate_rejects_mismatched_weights() {
        let mut model = SignClassifier::untrained(vec!["no".to_string()], 4, 3, 8, 1);
        model.weights1.pop();
        assert!(model.validate().is_err());
    }
}
