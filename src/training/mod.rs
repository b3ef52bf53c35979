//! One full retraining run: dataset build, split, fit, evaluate, persist.
//!
//! A run always continues from a base model; its vocabulary, feature width,
//! and normalization carry over while the padded frame count follows the new
//! dataset. The produced model is recorded but never auto-activated.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{SeedableRng, seq::SliceRandom};
use thiserror::Error;

use crate::jobs::{CancelToken, TrainingRunner};
use crate::landmarks::HandPoseDetector;
use crate::model::accuracy::{evaluate, word_accuracy};
use crate::model::{ArtifactError, FitOptions, ModelArtifact, ModelMetadata, TrainError, fit};
use crate::sequence::{BuildError, PaddingError, build_dataset, pad};
use crate::store::{JobId, ModelId, ModelRecord, NewModel, Store, StoreError};
use crate::video::VideoDecoder;

/// Fraction of videos held out for evaluation, rounded up.
const TEST_FRACTION: f32 = 0.2;
/// Split shuffling seed, fixed so reruns partition identically.
const SPLIT_SEED: u64 = 42;

/// Errors raised by a retraining run.
#[derive(Debug, Error)]
pub enum TrainingError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    /// The job has no base model to continue from.
    #[error("Training job {job} has no base model")]
    MissingBaseModel { job: JobId },
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    Pad(#[from] PaddingError),
    #[error(transparent)]
    Train(#[from] TrainError),
    /// The cancellation signal was observed between pipeline stages.
    #[error("Training run was cancelled")]
    Cancelled,
}

impl TrainingError {
    /// Whether this failure is a cooperative cancellation rather than an
    /// error; cancelled runs keep their job status untouched.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::Cancelled | Self::Build(BuildError::Cancelled) | Self::Train(TrainError::Cancelled)
        )
    }
}

/// Execute the retraining job `job_id` end to end.
///
/// With fewer than two usable videos there is nothing to hold out, so the
/// run trains on everything and records accuracy 0.0 with an empty per-word
/// map. Otherwise 20 percent of videos (rounded up) are held out under a
/// fixed shuffle seed.
pub fn retrain(
    store: &Store,
    models_dir: &Path,
    decoder: &dyn VideoDecoder,
    detector: &dyn HandPoseDetector,
    options: &FitOptions,
    job_id: JobId,
    cancel: &CancelToken,
) -> Result<ModelRecord, TrainingError> {
    let job = store.job(job_id)?;
    let base_model_id = job
        .base_model_id
        .ok_or(TrainingError::MissingBaseModel { job: job_id })?;
    let base_record = store.model(base_model_id)?;
    let base = ModelArtifact::load(&base_record.file_path)?;
    let dataset = store.dataset(job.dataset_id)?;
    let words = base.classifier.vocabulary.clone();

    tracing::info!(
        "Training job {job_id} ('{}'): building dataset from {}",
        job.name,
        dataset.root_directory.display()
    );
    let build_started = Instant::now();
    let built = build_dataset(&words, &dataset.root_directory, decoder, detector, cancel)?;
    let n = built.num_videos();
    tracing::info!(
        "Dataset built in {} ms: {n} videos kept, {} skipped, {} frames at most",
        build_started.elapsed().as_millis(),
        built.skipped,
        built.max_frames
    );

    let num_features = base.classifier.num_features;
    let max_frames = built.max_frames.max(1);
    let tensor = pad(&built.samples, n, max_frames, num_features)?;

    if cancel.is_cancelled() {
        return Err(TrainingError::Cancelled);
    }

    let fit_started = Instant::now();
    let (model, test_accuracy, per_word) = if n < 2 {
        tracing::warn!("Only {n} usable videos; training without a held-out partition");
        let model = fit(&base.classifier, &tensor, &built.labels, options, cancel)?;
        (model, 0.0, Default::default())
    } else {
        let test_count = ((n as f32) * TEST_FRACTION).ceil() as usize;
        let mut indices: Vec<usize> = (0..n).collect();
        indices.shuffle(&mut StdRng::seed_from_u64(SPLIT_SEED));
        let (test_idx, train_idx) = indices.split_at(test_count);

        let train_tensor = tensor.select(train_idx);
        let train_labels: Vec<usize> = train_idx.iter().map(|&i| built.labels[i]).collect();
        let test_tensor = tensor.select(test_idx);
        let test_labels: Vec<usize> = test_idx.iter().map(|&i| built.labels[i]).collect();

        let model = fit(&base.classifier, &train_tensor, &train_labels, options, cancel)?;
        let (test_loss, test_accuracy) = evaluate(&model, &test_tensor, &test_labels);
        tracing::info!(
            "Evaluation on {test_count} held-out videos: loss {test_loss:.4}, accuracy {test_accuracy:.4}"
        );
        let per_word = word_accuracy(&words, &model, &test_tensor, &test_labels);
        (model, test_accuracy, per_word)
    };
    tracing::info!(
        "Training for job {job_id} finished in {} ms",
        fit_started.elapsed().as_millis()
    );

    let artifact = ModelArtifact {
        metadata: ModelMetadata {
            max_frames: model.max_frames,
            num_features,
            words: words.clone(),
            fps: base.metadata.fps,
            test_accuracy,
            word_accuracy: per_word.clone(),
        },
        classifier: model,
    };
    let file_path = artifact.save(models_dir, &job.name)?;

    let record = store.insert_model(&NewModel {
        name: job.name.clone(),
        file_path,
        max_frames: artifact.metadata.max_frames as i64,
        num_features: num_features as i64,
        words: words.join(","),
        fps: base.metadata.fps as f64,
        accuracy: test_accuracy as f64,
        word_accuracy: per_word,
        is_active: false,
    })?;
    tracing::info!(
        "Training job {job_id} produced model {} ('{}') with accuracy {test_accuracy:.4}",
        record.id,
        record.name
    );
    Ok(record)
}

/// Production [`TrainingRunner`]: opens its own store connection per run and
/// drives [`retrain`] with the configured collaborators.
pub struct Orchestrator {
    db_path: std::path::PathBuf,
    models_dir: std::path::PathBuf,
    decoder: Arc<dyn VideoDecoder>,
    detector: Arc<dyn HandPoseDetector>,
    options: FitOptions,
}

impl Orchestrator {
    pub fn new(
        db_path: &Path,
        models_dir: &Path,
        decoder: Arc<dyn VideoDecoder>,
        detector: Arc<dyn HandPoseDetector>,
    ) -> Self {
        Self {
            db_path: db_path.to_path_buf(),
            models_dir: models_dir.to_path_buf(),
            decoder,
            detector,
            options: FitOptions::default(),
        }
    }
}

impl TrainingRunner for Orchestrator {
    fn run(&self, job_id: JobId, cancel: CancelToken) -> Result<ModelId, TrainingError> {
        let store = Store::open(&self.db_path)?;
        let record = retrain(
            &store,
            &self.models_dir,
            self.decoder.as_ref(),
            self.detector.as_ref(),
            &self.options,
            job_id,
            &cancel,
        )?;
        Ok(record.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landmarks::{Hand, KEYPOINTS_PER_HAND, Landmark};
    use crate::model::SignClassifier;
    use crate::store::JobStatus;
    use crate::video::{DecodedVideo, VideoError};
    use image::RgbImage;
    use std::path::PathBuf;
    use tempfile::tempdir;

    /// Decoder whose frame count and pixel intensity come from the file's
    /// byte length, so clips of different words look different.
    struct SizeDecoder;

    impl VideoDecoder for SizeDecoder {
        fn open(&self, path: &Path) -> Result<DecodedVideo, VideoError> {
            let len = std::fs::metadata(path)
                .map_err(|source| VideoError::Io {
                    path: path.to_path_buf(),
                    source,
                })?
                .len();
            let frames: Vec<Result<RgbImage, VideoError>> = (0..len.max(1))
                .map(|_| {
                    let mut img = RgbImage::new(2, 2);
                    img.put_pixel(0, 0, image::Rgb([(len * 20).min(255) as u8, 0, 0]));
                    Ok(img)
                })
                .collect();
            Ok(DecodedVideo::new(len, frames.into_iter()))
        }

        fn transcode(&self, path: &Path, _target_fps: f32) -> Result<PathBuf, VideoError> {
            Ok(path.to_path_buf())
        }
    }

    /// Detector mapping pixel intensity to landmark coordinates.
    struct IntensityDetector;

    impl HandPoseDetector for IntensityDetector {
        fn detect(&self, image: &RgbImage) -> Vec<Hand> {
            let red = image.get_pixel(0, 0)[0];
            if red == 0 {
                return Vec::new();
            }
            let value = red as f32 / 255.0;
            vec![Hand {
                landmarks: vec![
                    Landmark {
                        x: value,
                        y: value,
                        z: 0.0
                    };
                    KEYPOINTS_PER_HAND
                ],
            }]
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Store,
        models_dir: PathBuf,
        job_id: JobId,
    }

    /// Seed a base model artifact, a dataset tree, and a pending job.
    fn fixture(clips_per_word: usize) -> Fixture {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("app.db");
        let models_dir = dir.path().join("models");
        let data_root = dir.path().join("data");
        let words = vec!["no".to_string(), "eat".to_string()];

        for (w, word) in words.iter().enumerate() {
            let word_dir = data_root.join(word);
            std::fs::create_dir_all(&word_dir).unwrap();
            for c in 0..clips_per_word {
                // Byte length separates the words' landmark values.
                let len = 2 + w * 6 + c;
                std::fs::write(word_dir.join(format!("clip{c}.mp4")), vec![1u8; len]).unwrap();
            }
        }

        let base = ModelArtifact {
            classifier: SignClassifier::untrained(words.clone(), 4, 63, 8, 7),
            metadata: ModelMetadata {
                max_frames: 4,
                num_features: 63,
                words: words.clone(),
                fps: 20.0,
                test_accuracy: 0.0,
                word_accuracy: Default::default(),
            },
        };
        let base_path = base.save(&models_dir, "base").unwrap();

        let store = Store::open(&db_path).unwrap();
        let base_record = store
            .insert_model(&NewModel {
                name: "base".to_string(),
                file_path: base_path,
                max_frames: 4,
                num_features: 63,
                words: words.join(","),
                fps: 20.0,
                accuracy: 0.0,
                word_accuracy: Default::default(),
                is_active: true,
            })
            .unwrap();
        let dataset = store.insert_dataset("signs", &data_root).unwrap();
        let job_id = store
            .insert_job("run-1", dataset.id, Some(base_record.id))
            .unwrap()
            .id;

        Fixture {
            _dir: dir,
            store,
            models_dir,
            job_id,
        }
    }

    #[test]
    fn retrain_with_enough_videos_records_accuracy_per_word() {
        let fx = fixture(4);
        let record = retrain(
            &fx.store,
            &fx.models_dir,
            &SizeDecoder,
            &IntensityDetector,
            &FitOptions::default(),
            fx.job_id,
            &CancelToken::new(),
        )
        .unwrap();

        assert_eq!(record.name, "run-1");
        assert!(!record.is_active);
        assert!(record.file_path.exists());
        // Both vocabulary words appear even if absent from the test split.
        assert_eq!(record.word_accuracy.len(), 2);
        let total: u32 = record.word_accuracy.values().map(|c| c[1]).sum();
        // ceil(8 * 0.2) = 2 held-out videos.
        assert_eq!(total, 2);

        let loaded = ModelArtifact::load(&record.file_path).unwrap();
        assert_eq!(loaded.metadata.words, vec!["no", "eat"]);
        assert_eq!(loaded.metadata.fps, 20.0);
        assert_eq!(loaded.classifier.max_frames as i64, record.max_frames);
    }

    #[test]
    fn single_video_skips_the_split_and_reports_zero_accuracy() {
        let fx = fixture(1);
        // Remove one word's clip so only one usable video remains.
        let store = &fx.store;
        let dataset = store.dataset_by_name("signs").unwrap().unwrap();
        std::fs::remove_file(dataset.root_directory.join("eat/clip0.mp4")).unwrap();
        std::fs::write(dataset.root_directory.join("eat/.keep"), b"").unwrap();

        let record = retrain(
            store,
            &fx.models_dir,
            &SizeDecoder,
            &IntensityDetector,
            &FitOptions::default(),
            fx.job_id,
            &CancelToken::new(),
        )
        .unwrap();

        assert_eq!(record.accuracy, 0.0);
        assert!(record.word_accuracy.is_empty());
        assert!(record.file_path.exists());
    }

    #[test]
    fn job_without_base_model_is_rejected() {
        let fx = fixture(1);
        let dataset = fx.store.dataset_by_name("signs").unwrap().unwrap();
        let orphan = fx.store.insert_job("orphan", dataset.id, None).unwrap();

        let err = retrain(
            &fx.store,
            &fx.models_dir,
            &SizeDecoder,
            &IntensityDetector,
            &FitOptions::default(),
            orphan.id,
            &CancelToken::new(),
        )
        .unwrap_err();
        assert!(matches!(err, TrainingError::MissingBaseModel { .. }));
    }

    #[test]
    fn pre_cancelled_run_reports_cancellation() {
        let fx = fixture(2);
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = retrain(
            &fx.store,
            &fx.models_dir,
            &SizeDecoder,
            &IntensityDetector,
            &FitOptions::default(),
            fx.job_id,
            &cancel,
        )
        .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn orchestrator_completes_a_job_through_the_coordinator() {
        let fx = fixture(3);
        let db_path = fx._dir.path().join("app.db");
        let orchestrator = Orchestrator::new(
            &db_path,
            &fx.models_dir,
            Arc::new(SizeDecoder),
            Arc::new(IntensityDetector),
        );
        let coordinator =
            crate::jobs::JobCoordinator::new(&db_path, Arc::new(orchestrator));
        coordinator.start(fx.job_id).unwrap();
        coordinator.wait(fx.job_id);

        let job = fx.store.job(fx.job_id).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        let model = fx.store.model(job.output_model_id.unwrap()).unwrap();
        assert_eq!(model.name, "run-1");
    }
}
