use std::path::PathBuf;

use thiserror::Error;

use crate::data::models::Partition;

/// Result type alias for data-pipeline operations
pub type Result<T> = std::result::Result<T, EncodingError>;

/// Failures while loading stimuli, responses, or assembling datasets.
///
/// All of them are fatal for a load: nothing is retried and no partial
/// dataset is returned.
#[derive(Error, Debug)]
pub enum EncodingError {
    #[error("failed to read image {}: {source}", path.display())]
    UnreadableImage {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("stimulus directory not found: {}", .0.display())]
    MissingDirectory(PathBuf),

    #[error("corrupt response archive {}: {reason}", path.display())]
    CorruptArchive { path: PathBuf, reason: String },

    #[error("{partition} partition has {images} images but {responses} responses")]
    ShapeMismatch {
        partition: Partition,
        images: usize,
        responses: usize,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),
}

impl EncodingError {
    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        EncodingError::CorruptArchive {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
