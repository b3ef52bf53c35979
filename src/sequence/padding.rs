//! Pads ragged per-video feature sequences into a dense tensor plus mask.
//!
//! Shapes are `(videos, max_frames, num_features)`. Mask value 1 marks real
//! data, 0 marks positions created purely by padding: either the zero-filled
//! tail of a short frame vector or entire trailing frames a video never had.

use ndarray::{Array3, ArrayView2, Axis, s};
use thiserror::Error;

/// Errors raised while padding sequences.
#[derive(Debug, Error)]
pub enum PaddingError {
    /// A frame carries more features than the configured width.
    ///
    /// This is an input-contract violation (for example a detector configured
    /// for more hands than the model was trained with); it fails hard instead
    /// of silently truncating.
    #[error(
        "Frame {frame} of video {video} has {actual} features, more than the configured {expected}"
    )]
    FeatureOverflow {
        video: usize,
        frame: usize,
        actual: usize,
        expected: usize,
    },
    /// A video has more frames than `max_frames`.
    #[error("Video {video} has {actual} frames, more than the configured {expected}")]
    TooManyFrames {
        video: usize,
        actual: usize,
        expected: usize,
    },
    /// The declared video count does not match the sample list.
    #[error("Expected {expected} videos, got {actual}")]
    CountMismatch { expected: usize, actual: usize },
}

/// Dense padded data plus a parallel validity mask of the same shape.
#[derive(Debug, Clone, PartialEq)]
pub struct PaddedTensor {
    /// Feature values, zero at padded positions.
    pub data: Array3<f32>,
    /// 1.0 at real positions, 0.0 at padded positions.
    pub mask: Array3<f32>,
}

impl PaddedTensor {
    /// Number of videos along the first axis.
    pub fn num_videos(&self) -> usize {
        self.data.shape()[0]
    }

    /// View one video's `(max_frames, num_features)` data and mask.
    pub fn video(&self, index: usize) -> (ArrayView2<'_, f32>, ArrayView2<'_, f32>) {
        (
            self.data.slice(s![index, .., ..]),
            self.mask.slice(s![index, .., ..]),
        )
    }

    /// Select a subset of videos by index, preserving order.
    pub fn select(&self, indices: &[usize]) -> Self {
        Self {
            data: self.data.select(Axis(0), indices),
            mask: self.mask.select(Axis(0), indices),
        }
    }
}

/// Pad ragged sequences to `(num_videos, max_frames, num_features)`.
///
/// Purely positional and bit-reproducible: identical inputs always produce
/// identical tensors. Frames shorter than `num_features` are right-padded
/// with zeros (mask 0 on the tail); videos shorter than `max_frames` get
/// fully masked trailing frames.
pub fn pad(
    samples: &[Vec<Vec<f32>>],
    num_videos: usize,
    max_frames: usize,
    num_features: usize,
) -> Result<PaddedTensor, PaddingError> {
    if samples.len() != num_videos {
        return Err(PaddingError::CountMismatch {
            expected: num_videos,
            actual: samples.len(),
        });
    }

    let mut data = Array3::<f32>::zeros((num_videos, max_frames, num_features));
    let mut mask = Array3::<f32>::ones((num_videos, max_frames, num_features));

    for (i, video) in samples.iter().enumerate() {
        if video.len() > max_frames {
            return Err(PaddingError::TooManyFrames {
                video: i,
                actual: video.len(),
                expected: max_frames,
            });
        }
        for (j, frame) in video.iter().enumerate() {
            if frame.len() > num_features {
                return Err(PaddingError::FeatureOverflow {
                    video: i,
                    frame: j,
                    actual: frame.len(),
                    expected: num_features,
                });
            }
            for (k, &value) in frame.iter().enumerate() {
                data[[i, j, k]] = value;
            }
            if frame.len() < num_features {
                mask.slice_mut(s![i, j, frame.len()..]).fill(0.0);
            }
        }
        if video.len() < max_frames {
            mask.slice_mut(s![i, video.len().., ..]).fill(0.0);
        }
    }

    Ok(PaddedTensor { data, mask })
}

/// Pad one video for inference, reusing the training padding rule.
///
/// Sequences longer than `max_frames` keep their first `max_frames` frames;
/// a live clip can outlast anything seen in training and still must fit the
/// model's fixed input shape.
pub fn pad_single(
    frames: &[Vec<f32>],
    max_frames: usize,
    num_features: usize,
) -> Result<PaddedTensor, PaddingError> {
    let clipped: Vec<Vec<f32>> = frames.iter().take(max_frames).cloned().collect();
    pad(&[clipped], 1, max_frames, num_features)
}
