//! Error types for training, rendering, and evaluation.

use lumen_data::DataError;
use thiserror::Error;

/// Errors raised by a renderer implementation.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Ray buffers disagree: {origins} origins, {directions} directions")]
    MismatchedRays { origins: usize, directions: usize },

    #[error("Backward pass requested without a training-mode forward pass")]
    MissingForward,

    #[error("Gradient buffers do not match the last forward pass: {0}")]
    GradientShape(String),

    #[error("Render failed: {0}")]
    Failed(String),
}

/// Errors raised by a perceptual-metric implementation.
#[derive(Debug, Error)]
pub enum MetricError {
    #[error("Image sets differ in size: {rendered} rendered, {reference} reference")]
    CountMismatch { rendered: usize, reference: usize },

    #[error("Image dimensions differ: {0:?} vs {1:?}")]
    DimensionMismatch((u32, u32), (u32, u32)),

    #[error("Resources exhausted while evaluating a chunk of {0} images")]
    ResourceExhausted(usize),

    #[error("Metric evaluation failed: {0}")]
    Failed(String),
}

/// Errors raised by a metric sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image encoding error: {0}")]
    Image(#[from] image::ImageError),
}

/// Errors raised while saving or restoring parameters.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Manifest error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Checkpoint does not match the model: {0}")]
    Mismatch(String),
}

/// Errors that end a training run.
#[derive(Debug, Error)]
pub enum TrainError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Data error: {0}")]
    Data(#[from] DataError),

    #[error("Loss diverged at iteration {iteration}: {loss}")]
    NumericalDivergence { iteration: usize, loss: f32 },

    #[error("Resource exhaustion: {0} (raise perceptual_chunks to bound memory)")]
    ResourceExhaustion(String),

    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    #[error("Metric error: {0}")]
    Metric(MetricError),

    #[error("Metric sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

// Resource exhaustion is surfaced as its own fatal variant, never retried.
impl From<MetricError> for TrainError {
    fn from(err: MetricError) -> Self {
        match err {
            MetricError::ResourceExhausted(_) => TrainError::ResourceExhaustion(err.to_string()),
            other => TrainError::Metric(other),
        }
    }
}
