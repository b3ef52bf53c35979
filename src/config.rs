//! Runtime configuration loaded from a TOML file under the app directory.
//!
//! Everything has a sensible default anchored to the `.signsense` root so a
//! fresh install can run `init-model` and `predict` without writing a config
//! file first.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::app_dirs;

/// Default filename used to store the app configuration.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Default frame rate videos are re-encoded to before inference.
pub const DEFAULT_TARGET_FPS: f32 = 5.0;

/// Errors raised while loading or saving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Application directory could not be resolved or created.
    #[error(transparent)]
    AppDir(#[from] app_dirs::AppDirError),
    /// Reading or writing the config file failed.
    #[error("Failed to access config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The config file exists but is not valid TOML.
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Application configuration shared by the CLI, runtime, and orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the SQLite database holding dataset/model/job records.
    pub database_path: PathBuf,
    /// Directory where trained model artifacts and sidecars are written.
    pub models_dir: PathBuf,
    /// Path to the hand landmark ONNX model asset.
    pub detector_model: PathBuf,
    /// ffmpeg binary used for frame dumps and re-encoding.
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg_bin: String,
    /// ffprobe binary used for container metadata.
    #[serde(default = "default_ffprobe")]
    pub ffprobe_bin: String,
    /// Whether inference inputs are copied into the recordings directory.
    #[serde(default)]
    pub save_recordings: bool,
    /// Directory labeled recordings are copied into.
    pub recordings_dir: PathBuf,
}

fn default_ffmpeg() -> String {
    "ffmpeg".to_string()
}

fn default_ffprobe() -> String {
    "ffprobe".to_string()
}

impl AppConfig {
    /// Build the default configuration anchored under the app root.
    pub fn default_under_app_dirs() -> Result<Self, ConfigError> {
        let root = app_dirs::app_root_dir()?;
        Ok(Self {
            database_path: root.join("signsense.db"),
            models_dir: app_dirs::models_dir()?,
            detector_model: app_dirs::models_dir()?.join("hand_landmarker.onnx"),
            ffmpeg_bin: default_ffmpeg(),
            ffprobe_bin: default_ffprobe(),
            save_recordings: false,
            recordings_dir: app_dirs::recordings_dir()?,
        })
    }
}

/// Resolve the configuration file path inside the app root.
pub fn config_path() -> Result<PathBuf, ConfigError> {
    Ok(app_dirs::app_root_dir()?.join(CONFIG_FILE_NAME))
}

/// Load configuration from disk, returning defaults if the file is missing.
pub fn load_or_default() -> Result<AppConfig, ConfigError> {
    let path = config_path()?;
    if path.exists() {
        load_from_path(&path)
    } else {
        AppConfig::default_under_app_dirs()
    }
}

/// Load configuration from a specific TOML file.
pub fn load_from_path(path: &Path) -> Result<AppConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Persist configuration to its default location, creating parent directories.
pub fn save(config: &AppConfig) -> Result<(), ConfigError> {
    let path = config_path()?;
    let raw = toml::to_string_pretty(config).unwrap_or_default();
    std::fs::write(&path, raw).map_err(|source| ConfigError::Io { path, source })
}
