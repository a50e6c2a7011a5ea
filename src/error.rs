use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::enums::Stage;

/// Errors surfaced by every stage of the segmentation engine.
#[derive(Debug, Clone, Error)]
pub enum SegmentError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Format error: {0}")]
    Format(String),

    #[error("IO error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: Arc<std::io::Error>,
    },

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Run cancelled before the {0} stage")]
    Cancelled(Stage),
}

pub type Result<T> = std::result::Result<T, SegmentError>;

impl SegmentError {
    pub(crate) fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source: Arc::new(source),
        }
    }

    /// Map an image codec error, keeping the underlying I/O failure when there is one.
    pub(crate) fn image(path: impl AsRef<Path>, err: image::ImageError) -> Self {
        match err {
            image::ImageError::IoError(source) => Self::io(path, source),
            other => Self::Format(format!("{}: {other}", path.as_ref().display())),
        }
    }

    /// Kind of the underlying I/O failure, if this is an I/O error.
    pub fn io_kind(&self) -> Option<std::io::ErrorKind> {
        match self {
            Self::Io { source, .. } => Some(source.kind()),
            _ => None,
        }
    }
}
