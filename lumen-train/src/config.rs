//! Training configuration

use crate::error::TrainError;
use crate::occupancy::OccupancyConfig;
use crate::regularizer::{FrequencyRegularizer, Norm, OcclusionRegularizer, Regularizers};
use crate::schedule::{LearningRateSchedule, ScheduleKind};
use crate::validator::ChunkPolicy;
use lumen_data::{Background, SampleMode};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Occlusion regularizer settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OcclusionConfig {
    pub beta: f32,
    /// Samples per ray that are penalized.
    pub range: usize,
}

/// Frequency regularizer settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrequencyConfig {
    /// Coefficient floor `a0` in `[0, 1)`.
    pub a0: f32,
    /// Active window as a fraction of the iteration count.
    pub activation_ratio: f32,
    #[serde(default)]
    pub norm: Norm,
}

/// Every knob of a training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    /// Training views kept by the view selector.
    pub n_imgs: usize,
    pub iterations: usize,
    /// Rays per batch, or views per batch in image mode.
    pub batch_size: usize,
    pub sample_mode: SampleMode,
    pub background: Background,
    /// Blur sigma applied to training images before building rays.
    pub blur_sigma: u32,

    pub learning_rate: f32,
    pub schedule: ScheduleKind,
    pub decay_rate: f32,
    pub decay_steps: usize,

    pub occlusion: Option<OcclusionConfig>,
    pub frequency: Option<FrequencyConfig>,

    pub step_size: f32,
    pub occupancy: OccupancyConfig,
    /// Vertices per axis of the voxel field.
    pub field_resolution: usize,

    /// Validate every `validation_period` iterations.
    pub validation_period: usize,
    pub no_validation: bool,
    /// Fraction of 25 held-out views used for periodic validation.
    pub validation_ratio: f32,
    /// Held-out views used for the final validation.
    pub final_validation_views: usize,
    /// Rays per renderer call for full frames; defaults to `4 * batch_size`.
    pub render_chunk: Option<usize>,
    /// Held-out sets smaller than this are scored perceptually in one pass.
    pub perceptual_single_pass_limit: usize,
    /// Chunks the perceptual pass is split into for larger sets.
    pub perceptual_chunks: usize,

    /// Frames of the orbit rendered after training; 0 disables it.
    pub path_frames: usize,
    pub path_elevation: f32,
    pub path_radius: f32,

    pub seed: u64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            n_imgs: 100,
            iterations: 10_000,
            batch_size: 1024,
            sample_mode: SampleMode::Rays,
            background: Background::White,
            blur_sigma: 0,
            learning_rate: 5e-3,
            schedule: ScheduleKind::Constant,
            decay_rate: 0.1,
            decay_steps: 10_000,
            occlusion: None,
            frequency: None,
            step_size: 5e-3,
            occupancy: OccupancyConfig::default(),
            field_resolution: 128,
            validation_period: 500,
            no_validation: false,
            validation_ratio: 0.2,
            final_validation_views: 25,
            render_chunk: None,
            perceptual_single_pass_limit: 25,
            perceptual_chunks: 5,
            path_frames: 90,
            path_elevation: 50.0,
            path_radius: 4.0,
            seed: 42,
        }
    }
}

impl TrainConfig {
    pub fn from_json_file(path: &Path) -> Result<Self, TrainError> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        Ok(config)
    }

    pub fn render_chunk(&self) -> usize {
        self.render_chunk.unwrap_or(4 * self.batch_size)
    }

    /// Memory bounds handed to the validator.
    pub fn chunk_policy(&self) -> ChunkPolicy {
        ChunkPolicy {
            ray_chunk: self.render_chunk(),
            single_pass_limit: self.perceptual_single_pass_limit,
            chunks: self.perceptual_chunks,
        }
    }

    pub fn learning_rate_schedule(&self) -> LearningRateSchedule {
        LearningRateSchedule::new(self.schedule, self.learning_rate, self.decay_rate, self.decay_steps)
    }

    pub fn regularizers(&self) -> Result<Regularizers, TrainError> {
        let frequency = match self.frequency {
            Some(f) => Some(FrequencyRegularizer::new(f.a0, f.activation_ratio, f.norm, self.iterations)?),
            None => None,
        };
        Ok(Regularizers {
            occlusion: self.occlusion.map(|o| OcclusionRegularizer::new(o.beta, o.range)),
            frequency,
        })
    }

    /// Held-out views used by periodic validation: `int(ratio * 25)`.
    pub fn validation_views(&self) -> usize {
        (self.validation_ratio * 25.0) as usize
    }

    pub fn validation_enabled(&self) -> bool {
        !self.no_validation && self.validation_views() > 0
    }

    /// Reject settings that cannot produce a run.
    pub fn validate(&self) -> Result<(), TrainError> {
        let fail = |msg: String| -> Result<(), TrainError> { Err(TrainError::InvalidArgument(msg)) };
        if self.n_imgs == 0 {
            return fail("n_imgs must be positive".into());
        }
        if self.iterations == 0 {
            return fail("iterations must be positive".into());
        }
        if self.batch_size == 0 {
            return fail("batch_size must be positive".into());
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return fail(format!("learning rate must be positive, got {}", self.learning_rate));
        }
        if self.schedule == ScheduleKind::ExponentialDecay
            && (self.decay_steps == 0 || !(self.decay_rate > 0.0))
        {
            return fail("exponential decay needs positive decay_rate and decay_steps".into());
        }
        if !(self.step_size > 0.0 && self.step_size.is_finite()) {
            return fail(format!("step_size must be positive, got {}", self.step_size));
        }
        if let Some(freq) = &self.frequency {
            if !(0.0..1.0).contains(&freq.a0) {
                return fail(format!("frequency a0 must lie in [0, 1), got {}", freq.a0));
            }
            if !(freq.activation_ratio >= 0.0) {
                return fail(format!(
                    "frequency activation ratio must be non-negative, got {}",
                    freq.activation_ratio
                ));
            }
        }
        if let Some(occ) = &self.occlusion {
            if !(occ.beta >= 0.0) {
                return fail(format!("occlusion beta must be non-negative, got {}", occ.beta));
            }
        }
        if !self.no_validation && self.validation_period == 0 {
            return fail("validation_period must be positive".into());
        }
        if !(0.0..=1.0).contains(&self.validation_ratio) {
            return fail(format!("validation_ratio must lie in [0, 1], got {}", self.validation_ratio));
        }
        if self.field_resolution < 2 {
            return fail("field_resolution must be at least 2".into());
        }
        if self.occupancy.resolution == 0 {
            return fail("occupancy resolution must be positive".into());
        }
        if self.render_chunk == Some(0) {
            return fail("render_chunk must be positive".into());
        }
        if self.perceptual_chunks == 0 {
            return fail("perceptual_chunks must be at least 1".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(TrainConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{ "iterations": 50, "background": "transparent",
                        "frequency": { "a0": 0.1, "activation_ratio": 0.5, "norm": "l2" } }"#;
        let config: TrainConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.iterations, 50);
        assert_eq!(config.background, Background::Transparent);
        assert_eq!(config.frequency.map(|f| f.norm), Some(Norm::L2));
        assert_eq!(config.batch_size, TrainConfig::default().batch_size);
        assert_eq!(config.render_chunk(), 4 * config.batch_size);
    }

    #[test]
    fn test_rejects_bad_floor() {
        let config = TrainConfig {
            frequency: Some(FrequencyConfig {
                a0: 1.0,
                activation_ratio: 0.5,
                norm: Norm::L1,
            }),
            ..TrainConfig::default()
        };
        assert!(matches!(config.validate(), Err(TrainError::InvalidArgument(_))));
    }

    #[test]
    fn test_rejects_zero_iterations() {
        let config = TrainConfig {
            iterations: 0,
            ..TrainConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_perceptual_chunking_follows_config() {
        let config: TrainConfig =
            serde_json::from_str(r#"{ "perceptual_chunks": 3, "perceptual_single_pass_limit": 10 }"#).unwrap();
        assert!(config.validate().is_ok());
        let policy = config.chunk_policy();
        assert_eq!(policy.ray_chunk, config.render_chunk());
        assert_eq!(policy.perceptual_chunks(9), vec![0..9]);
        assert_eq!(policy.perceptual_chunks(30), vec![0..10, 10..20, 20..30]);
    }

    #[test]
    fn test_rejects_zero_perceptual_chunks() {
        let config = TrainConfig {
            perceptual_chunks: 0,
            ..TrainConfig::default()
        };
        assert!(matches!(config.validate(), Err(TrainError::InvalidArgument(_))));
    }

    #[test]
    fn test_validation_views() {
        let config = TrainConfig {
            validation_ratio: 0.2,
            ..TrainConfig::default()
        };
        assert_eq!(config.validation_views(), 5);
    }
}
