//! Lumen Training Crate
//!
//! This crate trains a radiance field from the ray datasets built by
//! `lumen-data`. It owns the training loop and everything the loop drives
//! each iteration, plus held-out evaluation.
//!
//! ## Modules
//!
//! - [`model`]: contracts for the representation and the renderer
//! - [`occupancy`]: occupancy grid for empty-space skipping
//! - [`regularizer`]: occlusion and frequency penalties
//! - [`schedule`] / [`optim`]: learning-rate schedules and Adam
//! - [`render`]: CPU reference ray marcher, frame rendering, camera paths
//! - [`field`]: dense voxel reference representation
//! - [`trainer`]: the training state machine
//! - [`validator`] / [`metrics`]: PSNR, SSIM, and chunked perceptual scoring
//! - [`sink`] / [`checkpoint`]: metric logging and parameter persistence

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod field;
pub mod metrics;
pub mod model;
pub mod occupancy;
pub mod optim;
pub mod regularizer;
pub mod render;
pub mod schedule;
pub mod sink;
pub mod trainer;
pub mod validator;

pub use config::{FrequencyConfig, OcclusionConfig, TrainConfig};
pub use error::{CheckpointError, MetricError, RenderError, SinkError, TrainError};
pub use field::VoxelField;
pub use metrics::{PerceptualMetric, StructuralDissimilarity};
pub use model::{Mode, Parameter, RenderGradients, RenderOptions, RenderOutput, Renderer, Representation};
pub use occupancy::{OccupancyConfig, OccupancyGrid};
pub use regularizer::{FrequencyRegularizer, Norm, OcclusionRegularizer, Regularizers};
pub use render::{Frame, MarchingRenderer, render_frame, render_path, spherical_path};
pub use schedule::{LearningRateSchedule, ScheduleKind, Scheduler};
pub use sink::{FanoutSink, FileSink, MemorySink, MetricsSink, Record, TracingSink};
pub use trainer::{Phase, StepReport, StopHandle, TrainSummary, Trainer, TrainingState};
pub use validator::{ChunkPolicy, ValidationMetrics, Validator};
