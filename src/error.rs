//! Error type shared by every stage of the pipeline.

use std::path::{Path, PathBuf};

pub type Result<T> = std::result::Result<T, WakeLightError>;

#[derive(thiserror::Error, Debug)]
pub enum WakeLightError {
    /// The coordinate file is missing or malformed. Fatal at startup.
    #[error("layout error: {0}")]
    Layout(String),

    /// The source image could not be opened or decoded.
    #[error("image unavailable: {}: {reason}", .path.display())]
    ImageUnavailable { path: PathBuf, reason: String },

    /// The output sink refused or failed to display a frame.
    #[error("sink error: {0}")]
    Sink(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl WakeLightError {
    pub fn layout(msg: impl Into<String>) -> Self {
        Self::Layout(msg.into())
    }

    pub fn image_unavailable(path: &Path, reason: impl ToString) -> Self {
        Self::ImageUnavailable {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }

    pub fn sink(msg: impl Into<String>) -> Self {
        Self::Sink(msg.into())
    }

    pub fn cache(msg: impl Into<String>) -> Self {
        Self::Cache(msg.into())
    }
}
