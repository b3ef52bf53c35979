//! Mini-batch SGD fitting with early stopping on training loss.

use rand::rngs::StdRng;
use rand::{SeedableRng, seq::SliceRandom};
use thiserror::Error;

use crate::jobs::CancelToken;
use crate::sequence::PaddedTensor;

use super::{SignClassifier, pool_sequence, pooled_len, softmax};

/// Errors raised during fitting.
#[derive(Debug, Error)]
pub enum TrainError {
    /// No samples to train on.
    #[error("Empty training dataset")]
    EmptyDataset,
    /// Tensor shape disagrees with the base model or the label list.
    #[error("Training input shape mismatch: {0}")]
    ShapeMismatch(String),
    /// A label index falls outside the vocabulary.
    #[error("Label {label} outside vocabulary of {classes} words")]
    LabelOutOfRange { label: usize, classes: usize },
    /// The base model's weights are inconsistent.
    #[error("Base model failed validation: {0}")]
    InvalidBaseModel(String),
    /// The cancellation signal was observed between epochs.
    #[error("Training was cancelled")]
    Cancelled,
}

/// Hyperparameters for one fitting run.
#[derive(Debug, Clone)]
pub struct FitOptions {
    /// Hard epoch cap.
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f32,
    pub l2_penalty: f32,
    /// Epochs without training-loss improvement before stopping.
    pub patience: usize,
    /// Minimum loss decrease that counts as improvement.
    pub min_delta: f32,
    pub seed: u64,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            epochs: 100,
            batch_size: 16,
            learning_rate: 0.01,
            l2_penalty: 1e-4,
            patience: 3,
            min_delta: 1e-5,
            seed: 42,
        }
    }
}

struct Weights {
    weights1: Vec<f32>,
    bias1: Vec<f32>,
    weights2: Vec<f32>,
    bias2: Vec<f32>,
}

impl Weights {
    fn snapshot(model: &SignClassifier) -> Self {
        Self {
            weights1: model.weights1.clone(),
            bias1: model.bias1.clone(),
            weights2: model.weights2.clone(),
            bias2: model.bias2.clone(),
        }
    }

    fn restore(self, model: &mut SignClassifier) {
        model.weights1 = self.weights1;
        model.bias1 = self.bias1;
        model.weights2 = self.weights2;
        model.bias2 = self.bias2;
    }
}

/// Continue training the base classifier on a padded tensor.
///
/// Early stopping monitors the epoch-average training loss with the given
/// patience and restores the best weights seen. The cancellation token is
/// polled at the start of every epoch, which bounds stop latency to roughly
/// one epoch of work.
pub fn fit(
    base: &SignClassifier,
    tensor: &PaddedTensor,
    labels: &[usize],
    options: &FitOptions,
    cancel: &CancelToken,
) -> Result<SignClassifier, TrainError> {
    base.validate().map_err(TrainError::InvalidBaseModel)?;

    let n = tensor.num_videos();
    if n == 0 {
        return Err(TrainError::EmptyDataset);
    }
    if labels.len() != n {
        return Err(TrainError::ShapeMismatch(format!(
            "{n} videos but {} labels",
            labels.len()
        )));
    }
    if tensor.data.shape()[2] != base.num_features {
        return Err(TrainError::ShapeMismatch(format!(
            "tensor feature width {} differs from model width {}",
            tensor.data.shape()[2],
            base.num_features
        )));
    }
    let classes = base.vocabulary.len();
    for &label in labels {
        if label >= classes {
            return Err(TrainError::LabelOutOfRange { label, classes });
        }
    }

    let input = pooled_len(base.num_features);
    let hidden = base.hidden_size;
    let batch_size = options.batch_size.max(1);

    // Pooling has no learnable state; precompute it once per run.
    let pooled: Vec<Vec<f32>> = (0..n)
        .map(|i| {
            let (data, mask) = tensor.video(i);
            pool_sequence(data, mask)
        })
        .collect();

    let mut model = base.clone();
    model.max_frames = tensor.data.shape()[1];

    let mut rng = StdRng::seed_from_u64(options.seed);
    let mut indices: Vec<usize> = (0..n).collect();
    let mut hidden_pre = vec![0.0f32; hidden];
    let mut hidden_act = vec![0.0f32; hidden];
    let mut logits = vec![0.0f32; classes];

    let mut best_loss = f32::INFINITY;
    let mut best_weights = Weights::snapshot(&model);
    let mut stale_epochs = 0usize;

    for epoch in 0..options.epochs {
        if cancel.is_cancelled() {
            return Err(TrainError::Cancelled);
        }

        indices.shuffle(&mut rng);
        let mut epoch_loss = 0.0f32;

        for batch in indices.chunks(batch_size) {
            let mut d_w1 = vec![0.0f32; model.weights1.len()];
            let mut d_b1 = vec![0.0f32; model.bias1.len()];
            let mut d_w2 = vec![0.0f32; model.weights2.len()];
            let mut d_b2 = vec![0.0f32; model.bias2.len()];

            for &idx in batch {
                let x = &pooled[idx];
                let mut x_norm = vec![0.0f32; input];
                for i in 0..input {
                    let denom = model.feature_std[i].max(1e-6);
                    x_norm[i] = (x[i] - model.feature_mean[i]) / denom;
                }

                for h in 0..hidden {
                    let mut sum = model.bias1[h];
                    let base_idx = h * input;
                    for i in 0..input {
                        sum += model.weights1[base_idx + i] * x_norm[i];
                    }
                    hidden_pre[h] = sum;
                    hidden_act[h] = sum.max(0.0);
                }

                for c in 0..classes {
                    let mut sum = model.bias2[c];
                    let base_idx = c * hidden;
                    for h in 0..hidden {
                        sum += model.weights2[base_idx + h] * hidden_act[h];
                    }
                    logits[c] = sum;
                }
                let probs = softmax(&logits);

                let y = labels[idx];
                epoch_loss += -(probs[y].max(1e-9)).ln();

                let mut d_hidden = vec![0.0f32; hidden];
                for c in 0..classes {
                    let target = if c == y { 1.0 } else { 0.0 };
                    let dz2 = probs[c] - target;
                    d_b2[c] += dz2;
                    let base_idx = c * hidden;
                    for h in 0..hidden {
                        d_w2[base_idx + h] += dz2 * hidden_act[h];
                        d_hidden[h] += dz2 * model.weights2[base_idx + h];
                    }
                }
                for h in 0..hidden {
                    if hidden_pre[h] <= 0.0 {
                        d_hidden[h] = 0.0;
                    }
                    d_b1[h] += d_hidden[h];
                    let base_idx = h * input;
                    for i in 0..input {
                        d_w1[base_idx + i] += d_hidden[h] * x_norm[i];
                    }
                }
            }

            let scale = options.learning_rate / batch.len() as f32;
            let l2 = options.l2_penalty;
            for i in 0..model.weights1.len() {
                model.weights1[i] -= scale * (d_w1[i] + l2 * model.weights1[i]);
            }
            for i in 0..model.bias1.len() {
                model.bias1[i] -= scale * d_b1[i];
            }
            for i in 0..model.weights2.len() {
                model.weights2[i] -= scale * (d_w2[i] + l2 * model.weights2[i]);
            }
            for i in 0..model.bias2.len() {
                model.bias2[i] -= scale * d_b2[i];
            }
        }

        let mean_loss = epoch_loss / n as f32;
        tracing::debug!("Epoch {epoch}: training loss {mean_loss:.6}");

        if best_loss - mean_loss > options.min_delta {
            best_loss = mean_loss;
            best_weights = Weights::snapshot(&model);
            stale_epochs = 0;
        } else {
            stale_epochs += 1;
            if stale_epochs >= options.patience {
                tracing::info!(
                    "Early stopping after epoch {epoch} (best training loss {best_loss:.6})"
                );
                break;
            }
        }
    }

    best_weights.restore(&mut model);
    Ok(model)
}
