//! Library exports for the signsense recognition and retraining pipeline.

/// Application directory helpers.
pub mod app_dirs;
/// Runtime configuration loading.
pub mod config;
/// Job coordination and cooperative cancellation.
pub mod jobs;
/// Hand landmark types, detector trait, and video extraction.
pub mod landmarks;
/// Logging setup.
pub mod logging;
/// Classifier model, training loop, metrics, and artifact persistence.
pub mod model;
/// Active-model runtime and single-video inference.
pub mod runtime;
/// Dataset building and sequence padding.
pub mod sequence;
/// SQLite-backed records for datasets, models, and jobs.
pub mod store;
/// End-to-end retraining orchestration.
pub mod training;
/// Video decoding and transcoding collaborators.
pub mod video;
