//! Holds the active model and answers inference requests against it.
//!
//! Activation builds the full in-memory model before swapping it in, so a
//! failed load never leaves the runtime half-switched. Inference re-encodes
//! the clip to the model's frame rate, extracts landmarks, and runs the
//! classifier over the padded sequence.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use rand::Rng;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::landmarks::{ExtractError, HandPoseDetector, extract};
use crate::model::{ArtifactError, ModelArtifact, SignClassifier, argmax};
use crate::sequence::{PaddingError, pad_single};
use crate::store::ModelRecord;
use crate::video::{VideoDecoder, VideoError};

/// Errors raised by activation or inference.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// No model has been activated yet.
    #[error("No active model")]
    NoActiveModel,
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    #[error(transparent)]
    Video(#[from] VideoError),
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error(transparent)]
    Pad(#[from] PaddingError),
}

/// Recognition result for one clip.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub word: String,
    pub probability: f32,
}

/// Where (and whether) to keep copies of inferred clips.
#[derive(Debug, Clone)]
pub struct RecordingOptions {
    pub directory: PathBuf,
}

struct ActiveModel {
    name: String,
    classifier: SignClassifier,
    fps: f32,
}

/// Shared inference state: the active model plus the video collaborators.
pub struct ModelRuntime {
    active: RwLock<Option<Arc<ActiveModel>>>,
    decoder: Arc<dyn VideoDecoder>,
    detector: Arc<dyn HandPoseDetector>,
    recordings: Option<RecordingOptions>,
}

impl ModelRuntime {
    pub fn new(
        decoder: Arc<dyn VideoDecoder>,
        detector: Arc<dyn HandPoseDetector>,
        recordings: Option<RecordingOptions>,
    ) -> Self {
        Self {
            active: RwLock::new(None),
            decoder,
            detector,
            recordings,
        }
    }

    /// Load a model record's artifact and make it the active model.
    pub fn activate(&self, record: &ModelRecord) -> Result<(), RuntimeError> {
        let artifact = ModelArtifact::load(&record.file_path)?;
        let loaded = Arc::new(ActiveModel {
            name: record.name.clone(),
            classifier: artifact.classifier,
            fps: artifact.metadata.fps,
        });
        *write_lock(&self.active) = Some(loaded);
        tracing::info!("Activated model '{}'", record.name);
        Ok(())
    }

    /// Name of the active model, if any.
    pub fn active_model_name(&self) -> Option<String> {
        read_lock(&self.active)
            .as_ref()
            .map(|model| model.name.clone())
    }

    /// Recognize the word signed in one video clip.
    ///
    /// Returns `Ok(None)` when no hands were detected in any frame; the model
    /// is never consulted in that case. An `expected` word only affects the
    /// logged comparison line, never the result.
    pub fn infer(
        &self,
        video: &Path,
        expected: Option<&str>,
    ) -> Result<Option<Prediction>, RuntimeError> {
        let Some(model) = read_lock(&self.active).clone() else {
            return Err(RuntimeError::NoActiveModel);
        };

        let reencoded = self.decoder.transcode(video, model.fps)?;
        let extract_started = Instant::now();
        let (frames, frame_count) =
            extract(&reencoded, self.decoder.as_ref(), self.detector.as_ref())?;
        tracing::info!(
            "Extracted landmarks from {} of {frame_count} frames in {} ms",
            frames.len(),
            extract_started.elapsed().as_millis()
        );
        if reencoded != video {
            if let Err(err) = std::fs::remove_file(&reencoded) {
                tracing::warn!("Leaving re-encoded clip {}: {err}", reencoded.display());
            }
        }

        if frames.is_empty() {
            tracing::info!("No hands detected in {}", video.display());
            return Ok(None);
        }

        let flat: Vec<Vec<f32>> = frames.iter().map(|frame| frame.flatten()).collect();
        let classifier = &model.classifier;
        let tensor = pad_single(&flat, classifier.max_frames, classifier.num_features)?;
        let (data, mask) = tensor.video(0);
        let proba = classifier.predict_proba(data, mask);

        for (word, p) in classifier.vocabulary.iter().zip(&proba) {
            tracing::info!("  {word}: {p:.4}");
        }
        let best = argmax(&proba);
        let prediction = Prediction {
            word: classifier.vocabulary[best].clone(),
            probability: proba.get(best).copied().unwrap_or(0.0),
        };
        match expected {
            Some(expected) => tracing::info!(
                "Expected '{expected}', recognized '{}' ({:.4})",
                prediction.word,
                prediction.probability
            ),
            None => tracing::info!(
                "Recognized '{}' ({:.4})",
                prediction.word,
                prediction.probability
            ),
        }

        if let Some(options) = &self.recordings {
            save_recording(&options.directory, video, expected.unwrap_or(&prediction.word));
        }
        Ok(Some(prediction))
    }
}

fn read_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Keep a copy of an inferred clip under its word's directory, named by a
/// short random hash. Failures are logged, never surfaced; recording is a
/// convenience on top of inference.
fn save_recording(directory: &Path, video: &Path, word: &str) {
    let word_dir = directory.join(word);
    if let Err(err) = std::fs::create_dir_all(&word_dir) {
        tracing::warn!("Not recording {}: {err}", video.display());
        return;
    }
    let nonce: [u8; 16] = rand::rng().random();
    let digest = Sha256::digest(nonce);
    let mut name = String::with_capacity(10);
    for byte in digest.iter().take(5) {
        name.push_str(&format!("{byte:02x}"));
    }
    let extension = video
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("mp4");
    let target = word_dir.join(format!("{name}.{extension}"));
    match std::fs::copy(video, &target) {
        Ok(_) => tracing::info!("Recorded {} as {}", video.display(), target.display()),
        Err(err) => tracing::warn!("Not recording {}: {err}", video.display()),
    }
}
