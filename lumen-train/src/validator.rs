//! Held-out evaluation: full-frame renders scored by fidelity, structural
//! similarity, and perceptual distance.

use crate::error::TrainError;
use crate::metrics::{self, PerceptualMetric};
use crate::model::{RenderOptions, Renderer, Representation};
use crate::occupancy::OccupancyGrid;
use crate::render::render_frame;
use image::Rgb32FImage;
use lumen_data::{Intrinsics, View};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use tracing::{debug, info};

/// Memory bounds for one validation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkPolicy {
    /// Rays per renderer call when rendering a frame.
    pub ray_chunk: usize,
    /// Sets smaller than this are scored perceptually in one pass.
    pub single_pass_limit: usize,
    /// Number of perceptual chunks for larger sets.
    pub chunks: usize,
}

impl Default for ChunkPolicy {
    fn default() -> Self {
        Self {
            ray_chunk: 4096,
            single_pass_limit: 25,
            chunks: 5,
        }
    }
}

impl ChunkPolicy {
    /// Contiguous near-equal partitions of `0..n` for perceptual scoring.
    pub fn perceptual_chunks(&self, n: usize) -> Vec<Range<usize>> {
        if n < self.single_pass_limit || self.chunks <= 1 {
            return vec![0..n];
        }
        let chunks = self.chunks.min(n);
        let base = n / chunks;
        let extra = n % chunks;
        let mut start = 0;
        (0..chunks)
            .map(|i| {
                let len = base + usize::from(i < extra);
                let range = start..start + len;
                start += len;
                range
            })
            .collect()
    }
}

/// Scores of one validation pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidationMetrics {
    pub psnr: f32,
    pub ssim: f32,
    pub perceptual: f32,
}

pub struct Validator {
    policy: ChunkPolicy,
    perceptual: Box<dyn PerceptualMetric>,
}

impl Validator {
    pub fn new(policy: ChunkPolicy, perceptual: Box<dyn PerceptualMetric>) -> Self {
        Self { policy, perceptual }
    }

    pub fn policy(&self) -> &ChunkPolicy {
        &self.policy
    }

    /// Log key of the perceptual metric in use.
    pub fn perceptual_name(&self) -> &str {
        self.perceptual.name()
    }

    /// Render every held-out view in evaluation mode and score the set.
    #[tracing::instrument(skip_all, fields(views = views.len()))]
    pub fn validate<R, E>(
        &self,
        views: &[View],
        intrinsics: &Intrinsics,
        renderer: &mut E,
        model: &R,
        grid: &OccupancyGrid,
        options: &RenderOptions,
    ) -> Result<ValidationMetrics, TrainError>
    where
        R: Representation,
        E: Renderer<R>,
    {
        if views.is_empty() {
            return Err(TrainError::InvalidArgument("validation set is empty".into()));
        }

        let mut rendered = Vec::with_capacity(views.len());
        for view in views {
            let frame = render_frame(
                renderer,
                model,
                grid,
                intrinsics,
                &view.pose,
                self.policy.ray_chunk,
                options,
            )?;
            rendered.push(frame.rgb);
        }
        let reference: Vec<Rgb32FImage> = views.iter().map(|v| v.image.clone()).collect();

        let scores = self.score(&rendered, &reference)?;
        info!(
            "Validation on {} views: PSNR {:.2}, SSIM {:.4}, perceptual {:.4}",
            views.len(),
            scores.psnr,
            scores.ssim,
            scores.perceptual
        );
        Ok(scores)
    }

    /// Score already-rendered frames against their references.
    pub fn score(&self, rendered: &[Rgb32FImage], reference: &[Rgb32FImage]) -> Result<ValidationMetrics, TrainError> {
        let psnr = metrics::psnr(rendered, reference)?;

        let mut ssim_sum = 0.0;
        for (a, b) in rendered.iter().zip(reference) {
            ssim_sum += metrics::ssim(a, b)?;
        }
        let ssim = ssim_sum / rendered.len() as f32;

        let perceptual = self.perceptual_distance(rendered, reference)?;
        Ok(ValidationMetrics { psnr, ssim, perceptual })
    }

    /// Mean perceptual distance, evaluated chunk by chunk.
    ///
    /// Chunk means are combined weighted by chunk size, so the result equals
    /// the unchunked mean up to rounding.
    pub fn perceptual_distance(&self, rendered: &[Rgb32FImage], reference: &[Rgb32FImage]) -> Result<f32, TrainError> {
        let n = rendered.len();
        let mut total = 0.0f64;
        for range in self.policy.perceptual_chunks(n) {
            let distances = self
                .perceptual
                .distances(&rendered[range.clone()], &reference[range.clone()])?;
            let mean = distances.iter().map(|&d| d as f64).sum::<f64>() / distances.len().max(1) as f64;
            debug!("Perceptual chunk {:?}: mean {:.4}", range, mean);
            total += mean * range.len() as f64;
        }
        Ok((total / n.max(1) as f64) as f32)
    }
}
