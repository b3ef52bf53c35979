//! End-to-end pipeline: seed a base model, retrain through the coordinator,
//! activate the produced model, and run inference with it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::RgbImage;
use tempfile::tempdir;

use signsense::jobs::{JobCoordinator, StartOutcome};
use signsense::landmarks::{Hand, HandPoseDetector, KEYPOINTS_PER_HAND, Landmark};
use signsense::model::{ModelArtifact, ModelMetadata, SignClassifier};
use signsense::runtime::ModelRuntime;
use signsense::store::{JobStatus, NewModel, Store};
use signsense::training::Orchestrator;
use signsense::video::{DecodedVideo, VideoDecoder, VideoError};

/// Decoder whose frame count and intensity derive from the clip's byte size,
/// so clips of different words produce different landmark sequences.
struct SizeDecoder;

impl VideoDecoder for SizeDecoder {
    fn open(&self, path: &Path) -> Result<DecodedVideo, VideoError> {
        let len = std::fs::metadata(path)
            .map_err(|source| VideoError::Io {
                path: path.to_path_buf(),
                source,
            })?
            .len();
        let frames: Vec<Result<RgbImage, VideoError>> = (0..len)
            .map(|_| {
                let mut img = RgbImage::new(2, 2);
                img.put_pixel(0, 0, image::Rgb([(len * 18).min(255) as u8, 0, 0]));
                Ok(img)
            })
            .collect();
        Ok(DecodedVideo::new(len, frames.into_iter()))
    }

    fn transcode(&self, path: &Path, _target_fps: f32) -> Result<PathBuf, VideoError> {
        Ok(path.to_path_buf())
    }
}

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
                    y: 1.0 - value,
                    z: 0.0
                };
                KEYPOINTS_PER_HAND
            ],
        }]
    }
}

#[test]
fn retrain_activate_and_infer() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("app.db");
    let models_dir = dir.path().join("models");
    let data_root = dir.path().join("data");
    let words = vec!["no".to_string(), "eat".to_string()];

    // Dataset tree: clips of different sizes per word.
    for (w, word) in words.iter().enumerate() {
        let word_dir = data_root.join(word);
        std::fs::create_dir_all(&word_dir).unwrap();
        for c in 0..4usize {
            let len = 3 + w * 7 + c;
            std::fs::write(word_dir.join(format!("clip{c}.mp4")), vec![1u8; len]).unwrap();
        }
    }

    // Base model artifact plus its record.
    let base = ModelArtifact {
        classifier: SignClassifier::untrained(words.clone(), 4, 63, 16, 5),
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
    let job = store
        .insert_job("nightly", dataset.id, Some(base_record.id))
        .unwrap();

    // Retrain through the coordinator.
    let orchestrator = Orchestrator::new(
        &db_path,
        &models_dir,
        Arc::new(SizeDecoder),
        Arc::new(IntensityDetector),
    );
    let coordinator = JobCoordinator::new(&db_path, Arc::new(orchestrator));
    assert_eq!(coordinator.start(job.id).unwrap(), StartOutcome::Started);
    coordinator.wait(job.id);

    let finished = store.job(job.id).unwrap();
    assert_eq!(finished.status, JobStatus::Completed);
    let produced = store.model(finished.output_model_id.unwrap()).unwrap();
    assert_eq!(produced.name, "nightly");
    assert!(!produced.is_active);
    assert_eq!(produced.word_accuracy.len(), 2);

    // Activation flips the flag exclusively.
    store.activate_model(produced.id).unwrap();
    assert!(!store.model(base_record.id).unwrap().is_active);
    let active = store.active_model().unwrap().unwrap();
    assert_eq!(active.id, produced.id);

    // The produced model answers inference requests.
    let runtime = ModelRuntime::new(Arc::new(SizeDecoder), Arc::new(IntensityDetector), None);
    runtime.activate(&active).unwrap();
    let clip = dir.path().join("query.mp4");
    std::fs::write(&clip, vec![1u8; 4]).unwrap();
    let prediction = runtime.infer(&clip, None).unwrap().unwrap();
    assert!(words.contains(&prediction.word));
    assert!(prediction.probability > 0.0);

    // A clip with no detectable hands recognizes nothing.
    let blank = dir.path().join("blank.mp4");
    std::fs::write(&blank, b"").unwrap();
    assert!(runtime.infer(&blank, None).unwrap().is_none());
}
