//! Artifact persistence: classifier weights plus a key/value metadata sidecar.
//!
//! The weights serialize to JSON next to a `.env`-style sidecar holding the
//! metadata needed to interpret the model (padded frame count, feature width,
//! comma-joined vocabulary, target fps, and the producing run's accuracy).

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::SignClassifier;

/// Sidecar file extension, sitting beside the weights file.
pub const SIDECAR_EXTENSION: &str = "env";

/// Errors raised while saving or loading artifacts.
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// The weights or sidecar file does not exist.
    #[error("Model artifact not found: {path}")]
    NotFound { path: PathBuf },
    /// Filesystem error.
    #[error("io error for {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The weights file is not valid JSON.
    #[error("Failed to parse model weights {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    /// A required metadata key is missing from the sidecar.
    #[error("Model settings {path} is missing required key {key}")]
    MissingKey { path: PathBuf, key: &'static str },
    /// A metadata value could not be parsed.
    #[error("Model settings {path} has an unreadable {key}: {detail}")]
    BadValue {
        path: PathBuf,
        key: &'static str,
        detail: String,
    },
    /// The loaded weights fail internal consistency checks.
    #[error("Model artifact {path} is inconsistent: {detail}")]
    InvalidModel { path: PathBuf, detail: String },
}

/// Interpretation metadata stored in the sidecar.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelMetadata {
    pub max_frames: usize,
    pub num_features: usize,
    /// Ordered vocabulary; label = index.
    pub words: Vec<String>,
    /// Frame rate inference inputs are re-encoded to.
    pub fps: f32,
    /// Overall test accuracy of the producing run (0.0 for a fresh model).
    pub test_accuracy: f32,
    /// Word to `[correct, total]` counts from the producing run.
    pub word_accuracy: BTreeMap<String, [u32; 2]>,
}

/// A classifier plus its sidecar metadata, as stored on disk.
#[derive(Debug, Clone)]
pub struct ModelArtifact {
    pub classifier: SignClassifier,
    pub metadata: ModelMetadata,
}

impl ModelArtifact {
    /// Write `{name}.json` weights and `{name}.env` sidecar under `dir`.
    ///
    /// Returns the weights path. Writes the weights first so a crash between
    /// the two files never leaves a sidecar pointing at nothing.
    pub fn save(&self, dir: &Path, name: &str) -> Result<PathBuf, ArtifactError> {
        std::fs::create_dir_all(dir).map_err(|source| ArtifactError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let weights_path = dir.join(format!("{name}.json"));
        let raw = serde_json::to_string(&self.classifier).map_err(|source| ArtifactError::Json {
            path: weights_path.clone(),
            source,
        })?;
        std::fs::write(&weights_path, raw).map_err(|source| ArtifactError::Io {
            path: weights_path.clone(),
            source,
        })?;

        let sidecar_path = weights_path.with_extension(SIDECAR_EXTENSION);
        std::fs::write(&sidecar_path, self.metadata.to_sidecar()).map_err(|source| {
            ArtifactError::Io {
                path: sidecar_path,
                source,
            }
        })?;
        Ok(weights_path)
    }

    /// Load weights and sidecar given the weights path.
    pub fn load(weights_path: &Path) -> Result<Self, ArtifactError> {
        if !weights_path.exists() {
            return Err(ArtifactError::NotFound {
                path: weights_path.to_path_buf(),
            });
        }
        let raw = std::fs::read_to_string(weights_path).map_err(|source| ArtifactError::Io {
            path: weights_path.to_path_buf(),
            source,
        })?;
        let classifier: SignClassifier =
            serde_json::from_str(&raw).map_err(|source| ArtifactError::Json {
                path: weights_path.to_path_buf(),
                source,
            })?;
        classifier
            .validate()
            .map_err(|detail| ArtifactError::InvalidModel {
                path: weights_path.to_path_buf(),
                detail,
            })?;

        let sidecar_path = weights_path.with_extension(SIDECAR_EXTENSION);
        let metadata = ModelMetadata::load(&sidecar_path)?;
        Ok(Self {
            classifier,
            metadata,
        })
    }
}

impl ModelMetadata {
    /// Render the sidecar key/value text.
    pub fn to_sidecar(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "MAX_FRAMES={}", self.max_frames);
        let _ = writeln!(out, "NUM_FEATURES={}", self.num_features);
        let _ = writeln!(out, "WORDS={}", self.words.join(","));
        let _ = writeln!(out, "FPS={}", self.fps);
        let _ = writeln!(out, "TEST_ACC={}", self.test_accuracy);
        let word_acc = serde_json::to_string(&self.word_accuracy).unwrap_or_else(|_| "{}".into());
        let _ = writeln!(out, "WORD_ACC=\"{word_acc}\"");
        out
    }

    /// Parse a sidecar file.
    pub fn load(path: &Path) -> Result<Self, ArtifactError> {
        if !path.exists() {
            return Err(ArtifactError::NotFound {
                path: path.to_path_buf(),
            });
        }
        let raw = std::fs::read_to_string(path).map_err(|source| ArtifactError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&raw, path)
    }

    fn parse(raw: &str, path: &Path) -> Result<Self, ArtifactError> {
        let mut values: BTreeMap<&str, &str> = BTreeMap::new();
        for line in raw.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                values.insert(key.trim(), value.trim());
            }
        }

        let require = |key: &'static str| -> Result<&str, ArtifactError> {
            values.get(key).copied().ok_or(ArtifactError::MissingKey {
                path: path.to_path_buf(),
                key,
            })
        };
        let max_frames = parse_value::<usize>(require("MAX_FRAMES")?, "MAX_FRAMES", path)?;
        let num_features = parse_value::<usize>(require("NUM_FEATURES")?, "NUM_FEATURES", path)?;
        let words: Vec<String> = require("WORDS")?
            .split(',')
            .filter(|word| !word.is_empty())
            .map(|word| word.trim().to_string())
            .collect();
        let fps = parse_value::<f32>(require("FPS")?, "FPS", path)?;
        let test_accuracy = match values.get("TEST_ACC") {
            Some(value) => parse_value::<f32>(value, "TEST_ACC", path)?,
            None => 0.0,
        };
        let word_accuracy = match values.get("WORD_ACC") {
            Some(value) => {
                let unquoted = value.trim_matches('"');
                serde_json::from_str(unquoted).map_err(|err| ArtifactError::BadValue {
                    path: path.to_path_buf(),
                    key: "WORD_ACC",
                    detail: err.to_string(),
                })?
            }
            None => BTreeMap::new(),
        };

        Ok(Self {
            max_frames,
            num_features,
            words,
            fps,
            test_accuracy,
            word_accuracy,
        })
    }
}

fn parse_value<T: std::str::FromStr>(
    raw: &str,
    key: &'static str,
    path: &Path,
) -> Result<T, ArtifactError>
where
    T::Err: std::fmt::Display,
{
    raw.parse::<T>().map_err(|err| ArtifactError::BadValue {
        path: path.to_path_buf(),
        key,
        detail: err.to_string(),
    })
}
