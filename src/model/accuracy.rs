//! Evaluation on a held-out test partition.

use std::collections::BTreeMap;

use crate::sequence::PaddedTensor;

use super::{SignClassifier, argmax};

/// Mean cross-entropy loss and overall accuracy on a test partition.
///
/// An empty partition reports `(0.0, 0.0)`; there is nothing to evaluate on.
pub fn evaluate(model: &SignClassifier, tensor: &PaddedTensor, labels: &[usize]) -> (f32, f32) {
    let n = tensor.num_videos().min(labels.len());
    if n == 0 {
        return (0.0, 0.0);
    }
    let mut loss = 0.0f32;
    let mut correct = 0usize;
    for i in 0..n {
        let (data, mask) = tensor.video(i);
        let proba = model.predict_proba(data, mask);
        if proba.is_empty() {
            continue;
        }
        let target = labels[i];
        loss += -(proba.get(target).copied().unwrap_or(0.0).max(1e-9)).ln();
        if argmax(&proba) == target {
            correct += 1;
        }
    }
    (loss / n as f32, correct as f32 / n as f32)
}

/// Per-word `[correct, total]` counts on a test partition.
///
/// Every vocabulary word appears in the result; words absent from the test
/// partition report `[0, 0]`. Only test videos count toward denominators —
/// videos the dataset builder skipped never reach evaluation.
pub fn word_accuracy(
    words: &[String],
    model: &SignClassifier,
    tensor: &PaddedTensor,
    labels: &[usize],
) -> BTreeMap<String, [u32; 2]> {
    let mut counts: BTreeMap<String, [u32; 2]> =
        words.iter().map(|word| (word.clone(), [0, 0])).collect();

    let n = tensor.num_videos().min(labels.len());
    for i in 0..n {
        let Some(truth) = words.get(labels[i]) else {
            continue;
        };
        let (data, mask) = tensor.video(i);
        let predicted = model.predict_class_index(data, mask);
        if let Some(entry) = counts.get_mut(truth) {
            if words.get(predicted) == Some(truth) {
                entry[0] += 1;
            }
            entry[1] += 1;
        }
    }
    counts
}
