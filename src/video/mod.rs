//! Video decoding and transcoding collaborators.
//!
//! Frame decoding and re-encoding run through external ffmpeg/ffprobe
//! processes; everything downstream only sees `RgbImage` frames through the
//! [`VideoDecoder`] trait so tests can substitute synthetic footage.

use std::path::{Path, PathBuf};
use std::process::Command;

use image::RgbImage;
use tempfile::TempDir;
use thiserror::Error;

/// Errors raised while decoding or re-encoding a video file.
#[derive(Debug, Error)]
pub enum VideoError {
    /// The video file does not exist or cannot be opened.
    #[error("Video file not found: {path}")]
    NotFound { path: PathBuf },
    /// Spawning or running an external tool failed.
    #[error("Failed to run {tool}: {source}")]
    Spawn {
        tool: String,
        source: std::io::Error,
    },
    /// An external tool exited unsuccessfully.
    #[error("{tool} failed for {path}: {stderr}")]
    ToolFailed {
        tool: String,
        path: PathBuf,
        stderr: String,
    },
    /// Container metadata could not be parsed.
    #[error("Unreadable frame count for {path}: {detail}")]
    BadMetadata { path: PathBuf, detail: String },
    /// A dumped frame image could not be decoded.
    #[error("Failed to decode frame {path}: {source}")]
    FrameDecode {
        path: PathBuf,
        source: image::ImageError,
    },
    /// Filesystem error while preparing the frame dump.
    #[error("io error for {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// A decoded video: native container frame count plus in-order frames.
///
/// The iterator yields frames until the stream ends or a frame fails to
/// decode; callers that want partial results simply stop on the first error.
pub struct DecodedVideo {
    /// Native frame count from container metadata, independent of decoding.
    pub frame_count: u64,
    frames: Box<dyn Iterator<Item = Result<RgbImage, VideoError>> + Send>,
}

impl DecodedVideo {
    /// Wrap a frame iterator with its container frame count.
    pub fn new(
        frame_count: u64,
        frames: impl Iterator<Item = Result<RgbImage, VideoError>> + Send + 'static,
    ) -> Self {
        Self {
            frame_count,
            frames: Box::new(frames),
        }
    }
}

impl Iterator for DecodedVideo {
    type Item = Result<RgbImage, VideoError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.frames.next()
    }
}

/// External video capability: open for frame reads, re-encode to a frame rate.
pub trait VideoDecoder: Send + Sync {
    /// Open a video file for in-order frame decoding.
    fn open(&self, path: &Path) -> Result<DecodedVideo, VideoError>;

    /// Re-encode a video to the target frame rate, returning the new path.
    fn transcode(&self, path: &Path, target_fps: f32) -> Result<PathBuf, VideoError>;
}

/// Production decoder shelling out to ffmpeg and ffprobe.
pub struct FfmpegDecoder {
    ffmpeg: String,
    ffprobe: String,
}

impl FfmpegDecoder {
    /// Create a decoder using the given binary names or paths.
    pub fn new(ffmpeg: impl Into<String>, ffprobe: impl Into<String>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    fn probe_frame_count(&self, path: &Path) -> Result<u64, VideoError> {
        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-count_packets",
                "-show_entries",
                "stream=nb_read_packets",
                "-of",
                "csv=p=0",
            ])
            .arg(path)
            .output()
            .map_err(|source| VideoError::Spawn {
                tool: self.ffprobe.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(VideoError::ToolFailed {
                tool: self.ffprobe.clone(),
                path: path.to_path_buf(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        let raw = String::from_utf8_lossy(&output.stdout);
        raw.trim()
            .parse::<u64>()
            .map_err(|err| VideoError::BadMetadata {
                path: path.to_path_buf(),
                detail: err.to_string(),
            })
    }

    fn dump_frames(&self, path: &Path) -> Result<(TempDir, Vec<PathBuf>), VideoError> {
        let dir = TempDir::new().map_err(|source| VideoError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let pattern = dir.path().join("frame_%06d.jpg");
        let output = Command::new(&self.ffmpeg)
            .arg("-i")
            .arg(path)
            .args(["-vsync", "0", "-q:v", "2"])
            .arg(&pattern)
            .output()
            .map_err(|source| VideoError::Spawn {
                tool: self.ffmpeg.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(VideoError::ToolFailed {
                tool: self.ffmpeg.clone(),
                path: path.to_path_buf(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        let mut frames = std::fs::read_dir(dir.path())
            .map_err(|source| VideoError::Io {
                path: dir.path().to_path_buf(),
                source,
            })?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|p| p.extension().and_then(|ext| ext.to_str()) == Some("jpg"))
            .collect::<Vec<_>>();
        frames.sort();
        Ok((dir, frames))
    }
}

/// Iterator over dumped frame files; owns the tempdir so frames stay readable.
struct FrameFiles {
    _dir: TempDir,
    paths: std::vec::IntoIter<PathBuf>,
}

impl Iterator for FrameFiles {
    type Item = Result<RgbImage, VideoError>;

    fn next(&mut self) -> Option<Self::Item> {
        let path = self.paths.next()?;
        Some(
            image::open(&path)
                .map(|img| img.to_rgb8())
                .map_err(|source| VideoError::FrameDecode { path, source }),
        )
    }
}

impl VideoDecoder for FfmpegDecoder {
    fn open(&self, path: &Path) -> Result<DecodedVideo, VideoError> {
        if !path.exists() {
            return Err(VideoError::NotFound {
                path: path.to_path_buf(),
            });
        }
        let frame_count = self.probe_frame_count(path)?;
        let (dir, paths) = self.dump_frames(path)?;
        Ok(DecodedVideo::new(
            frame_count,
            FrameFiles {
                _dir: dir,
                paths: paths.into_iter(),
            },
        ))
    }

    fn transcode(&self, path: &Path, target_fps: f32) -> Result<PathBuf, VideoError> {
        if !path.exists() {
            return Err(VideoError::NotFound {
                path: path.to_path_buf(),
            });
        }
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("video");
        let output_path = path.with_file_name(format!("{stem}_reencoded.mp4"));
        let started = std::time::Instant::now();
        let output = Command::new(&self.ffmpeg)
            .arg("-y")
            .arg("-i")
            .arg(path)
            .args(["-c:v", "mjpeg", "-q:v", "5", "-r"])
            .arg(target_fps.to_string())
            .arg(&output_path)
            .output()
            .map_err(|source| VideoError::Spawn {
                tool: self.ffmpeg.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(VideoError::ToolFailed {
                tool: self.ffmpeg.clone(),
                path: path.to_path_buf(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        tracing::info!(
            "Re-encoding to {target_fps} fps completed in {} ms",
            started.elapsed().as_millis()
        );
        Ok(output_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_missing_file_is_not_found() {
        let decoder = FfmpegDecoder::new("ffmpeg", "ffprobe");
        let result = decoder.open(Path::new("/nonexistent/clip.mp4"));
        assert!(matches!(result, Err(VideoError::NotFound { .. })));
    }

    #[test]
    fn transcode_missing_file_is_not_found() {
        let decoder = FfmpegDecoder::new("ffmpeg", "ffprobe");
        let err = decoder
            .transcode(Path::new("/nonexistent/clip.mp4"), 5.0)
            .unwrap_err();
        assert!(matches!(err, VideoError::NotFound { .. }));
    }

    #[test]
    fn decoded_video_yields_frames_in_order() {
        let frames = (0..3).map(|i| {
            let mut img = RgbImage::new(2, 2);
            img.put_pixel(0, 0, image::Rgb([i as u8, 0, 0]));
            Ok(img)
        });
        let video = DecodedVideo::new(3, frames.collect::<Vec<_>>().into_iter());
        let reds: Vec<u8> = video
            .map(|frame| frame.unwrap().get_pixel(0, 0)[0])
            .collect();
        assert_eq!(reds, vec![0, 1, 2]);
    }
}
