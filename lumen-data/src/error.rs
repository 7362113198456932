//! Error types for scene loading and dataset construction.

use thiserror::Error;

/// Errors that can occur while loading scenes or building datasets.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Data integrity error: {0}")]
    DataIntegrity(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Metadata parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image decoding error: {0}")]
    Image(#[from] image::ImageError),
}
