//! Turns one video file into a per-frame landmark sequence.

use std::path::Path;

use thiserror::Error;

use crate::video::{VideoDecoder, VideoError};

use super::{HandPoseDetector, LandmarkFrame};

/// Errors raised while opening a video for extraction.
///
/// Frame-level decode failures are not surfaced here; the extractor stops at
/// the first bad frame and returns the partial sequence.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The video could not be opened or probed.
    #[error(transparent)]
    Video(#[from] VideoError),
}

/// Extract per-frame hand landmarks from a video.
///
/// Returns the sequence of frames where at least one hand was detected plus
/// the container's native frame count. Frames with zero hands are skipped,
/// so the sequence can be shorter than the frame count — or empty, which
/// callers treat as "no gesture detected".
pub fn extract(
    path: &Path,
    decoder: &dyn VideoDecoder,
    detector: &dyn HandPoseDetector,
) -> Result<(Vec<LandmarkFrame>, u64), ExtractError> {
    let video = decoder.open(path)?;
    let frame_count = video.frame_count;
    let mut sequence = Vec::new();

    for frame in video {
        let image = match frame {
            Ok(image) => image,
            Err(err) => {
                // A corrupt frame ends the stream; keep what we have.
                tracing::warn!("Stopping frame decode early for {}: {err}", path.display());
                break;
            }
        };
        let hands = detector.detect(&image);
        if !hands.is_empty() {
            sequence.push(LandmarkFrame { hands });
        }
    }

    Ok((sequence, frame_count))
}
