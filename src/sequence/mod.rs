//! Sequence building and padding for variable-length landmark videos.

/// Per-word dataset building from a directory of videos.
pub mod builder;
/// Fixed-shape padding with a parallel validity mask.
pub mod padding;

pub use builder::{BuildError, BuiltDataset, build_dataset};
pub use padding::{PaddedTensor, PaddingError, pad, pad_single};
