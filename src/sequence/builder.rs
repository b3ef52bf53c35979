//! Walks a per-word video directory tree into a labelled ragged dataset.
//!
//! The dataset root holds one subdirectory per vocabulary word, each
//! containing that word's `.mp4` clips. Label indices follow the vocabulary
//! order handed in, and videos within a word are visited in sorted filename
//! order so repeated runs build identical datasets.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::jobs::CancelToken;
use crate::landmarks::{HandPoseDetector, extract};
use crate::video::VideoDecoder;

/// Errors raised while building a dataset.
#[derive(Debug, Error)]
pub enum BuildError {
    /// A vocabulary word has no directory under the dataset root.
    #[error("No dataset directory for word '{word}': {path}")]
    WordDirMissing { word: String, path: PathBuf },
    /// Filesystem error while listing a word directory.
    #[error("Failed to list {path}: {source}")]
    ListDir {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The cancellation signal was observed between videos.
    #[error("Dataset build was cancelled")]
    Cancelled,
}

/// Ragged landmark sequences with labels, ready for padding.
#[derive(Debug, Clone)]
pub struct BuiltDataset {
    /// One entry per kept video: frames of flattened landmark features.
    pub samples: Vec<Vec<Vec<f32>>>,
    /// Vocabulary index per kept video, parallel to `samples`.
    pub labels: Vec<usize>,
    /// Largest native container frame count over kept videos.
    pub max_frames: usize,
    /// Videos dropped for having no detected landmarks or failing to open.
    pub skipped: usize,
}

impl BuiltDataset {
    pub fn num_videos(&self) -> usize {
        self.samples.len()
    }
}

/// Build a labelled dataset from `root`, one subdirectory per word.
///
/// Videos that fail to open or yield zero landmark frames are skipped and
/// counted, never failing the whole build. The cancellation token is polled
/// before each video, which bounds stop latency to one video's extraction.
pub fn build_dataset(
    words: &[String],
    root: &Path,
    decoder: &dyn VideoDecoder,
    detector: &dyn HandPoseDetector,
    cancel: &CancelToken,
) -> Result<BuiltDataset, BuildError> {
    let mut samples = Vec::new();
    let mut labels = Vec::new();
    let mut max_frames = 0usize;
    let mut skipped = 0usize;

    for (label, word) in words.iter().enumerate() {
        let word_dir = root.join(word);
        if !word_dir.is_dir() {
            return Err(BuildError::WordDirMissing {
                word: word.clone(),
                path: word_dir,
            });
        }
        let mut videos: Vec<PathBuf> = std::fs::read_dir(&word_dir)
            .map_err(|source| BuildError::ListDir {
                path: word_dir.clone(),
                source,
            })?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("mp4"))
            })
            .collect();
        videos.sort();

        for video in videos {
            if cancel.is_cancelled() {
                return Err(BuildError::Cancelled);
            }
            let (frames, frame_count) = match extract(&video, decoder, detector) {
                Ok(result) => result,
                Err(err) => {
                    tracing::warn!("Skipping unreadable video {}: {err}", video.display());
                    skipped += 1;
                    continue;
                }
            };
            if frames.is_empty() {
                tracing::info!("Skipping {} (no hands detected)", video.display());
                skipped += 1;
                continue;
            }
            max_frames = max_frames.max(frame_count as usize);
            samples.push(frames.iter().map(|frame| frame.flatten()).collect());
            labels.push(label);
        }
        tracing::debug!("Collected videos for '{word}' ({} kept so far)", samples.len());
    }

    Ok(BuiltDataset {
        samples,
        labels,
        max_frames,
        skipped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landmarks::{Hand, KEYPOINTS_PER_HAND, Landmark};
    use crate::video::{DecodedVideo, VideoError};
    use image::RgbImage;
    use tempfile::tempdir;

    /// Decoder whose frame count equals the video file's byte length.
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
                    img.put_pixel(0, 0, image::Rgb([255, 0, 0]));
                    Ok(img)
                })
                .collect();
            Ok(DecodedVideo::new(len, frames.into_iter()))
        }

        fn transcode(&self, path: &Path, _target_fps: f32) -> Result<PathBuf, VideoError> {
            Ok(path.to_path_buf())
        }
    }

    struct RedDetector;

    impl HandPoseDetector for RedDetector {
        fn detect(&self, image: &RgbImage) -> Vec<Hand> {
            if image.get_pixel(0, 0)[0] > 0 {
                vec![Hand {
                    landmarks: vec![
                        Landmark {
                            x: 0.1,
                            y: 0.2,
                            z: 0.3
                        };
                        KEYPOINTS_PER_HAND
                    ],
                }]
            } else {
                Vec::new()
            }
        }
    }

    fn write_clip(dir: &Path, name: &str, frame_count: usize) {
        std::fs::write(dir.join(name), vec![0u8; frame_count]).unwrap();
    }

    fn words(list: &[&str]) -> Vec<String> {
        list.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn builds_labels_in_vocabulary_and_filename_order() {
        let root = tempdir().unwrap();
        let no = root.path().join("no");
        let eat = root.path().join("eat");
        std::fs::create_dir_all(&no).unwrap();
        std::fs::create_dir_all(&eat).unwrap();
        write_clip(&no, "b.mp4", 3);
        write_clip(&no, "a.mp4", 5);
        write_clip(&eat, "clip.mp4", 4);
        write_clip(&eat, "notes.txt", 9);

        let dataset = build_dataset(
            &words(&["no", "eat"]),
            root.path(),
            &SizeDecoder,
            &RedDetector,
            &CancelToken::new(),
        )
        .unwrap();

        assert_eq!(dataset.num_videos(), 3);
        assert_eq!(dataset.labels, vec![0, 0, 1]);
        assert_eq!(dataset.max_frames, 5);
        assert_eq!(dataset.skipped, 0);
        // a.mp4 sorts before b.mp4, so the 5-frame clip comes first.
        assert_eq!(dataset.samples[0].len(), 5);
        assert_eq!(dataset.samples[0][0].len(), 63);
    }

    #[test]
    fn videos_without_landmarks_are_skipped_and_counted() {
        let root = tempdir().unwrap();
        let no = root.path().join("no");
        std::fs::create_dir_all(&no).unwrap();
        write_clip(&no, "good.mp4", 2);
        write_clip(&no, "empty.mp4", 0);

        let dataset = build_dataset(
            &words(&["no"]),
            root.path(),
            &SizeDecoder,
            &RedDetector,
            &CancelToken::new(),
        )
        .unwrap();

        assert_eq!(dataset.num_videos(), 1);
        assert_eq!(dataset.skipped, 1);
        assert_eq!(dataset.max_frames, 2);
    }

    #[test]
    fn missing_word_directory_is_an_error() {
        let root = tempdir().unwrap();
        let err = build_dataset(
            &words(&["no"]),
            root.path(),
            &SizeDecoder,
            &RedDetector,
            &CancelToken::new(),
        )
        .unwrap_err();
        assert!(matches!(err, BuildError::WordDirMissing { .. }));
    }

    #[test]
    fn pre_cancelled_token_stops_before_the_first_video() {
        let root = tempdir().unwrap();
        let no = root.path().join("no");
        std::fs::create_dir_all(&no).unwrap();
        write_clip(&no, "clip.mp4", 2);

        let cancel = CancelToken::new();
        cancel.cancel();
        let err = build_dataset(
            &words(&["no"]),
            root.path(),
            &SizeDecoder,
            &RedDetector,
            &cancel,
        )
        .unwrap_err();
        assert!(matches!(err, BuildError::Cancelled));
    }
}
