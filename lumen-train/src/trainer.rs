//! Training loop
//!
//! [`Trainer`] owns the representation, renderer, occupancy grid, and
//! optimizer state of one run and moves through
//! `Idle -> Running <-> Validating -> Done`. Iterations are strictly
//! sequential; validation switches the model and the grid to evaluation
//! mode and never overlaps a weight update.

use crate::checkpoint;
use crate::config::TrainConfig;
use crate::error::{RenderError, TrainError};
use crate::metrics::{PerceptualMetric, StructuralDissimilarity, psnr_from_mse};
use crate::model::{Mode, RenderGradients, RenderOptions, Renderer, Representation};
use crate::occupancy::OccupancyGrid;
use crate::optim::{Adam, AdamConfig};
use crate::regularizer::Regularizers;
use crate::render::{Frame, render_frame};
use crate::schedule::Scheduler;
use crate::sink::{MetricsSink, Record};
use crate::validator::{ValidationMetrics, Validator};
use glam::{Mat4, Vec3};
use image::DynamicImage;
use lumen_data::{BatchSampler, Intrinsics, RayDataset, View};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Lifecycle of a training run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Running,
    Validating,
    Done,
}

/// Cooperative stop request, honored after the current iteration.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Mutable per-run state: iteration counter, optimizer and schedule.
#[derive(Debug, Clone)]
pub struct TrainingState {
    /// Next iteration to run; the only clock scheduling decisions read.
    pub iteration: usize,
    optimizer: Adam,
    scheduler: Scheduler,
}

impl TrainingState {
    pub fn learning_rate(&self) -> f32 {
        self.scheduler.lr()
    }

    pub fn optimizer(&self) -> &Adam {
        &self.optimizer
    }
}

/// Outcome of one training iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepReport {
    pub iteration: usize,
    /// Photometric plus regularizer terms.
    pub loss: f32,
    /// Mean squared color error alone.
    pub photometric: f32,
    pub psnr: f32,
    /// Learning rate used by this step.
    pub lr: f32,
    /// Frequency regularizer coefficient of this step.
    pub alpha: f32,
    pub samples: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainSummary {
    pub iterations: usize,
    pub final_loss: Option<f32>,
    pub last_validation: Option<ValidationMetrics>,
    pub stopped: bool,
}

struct HeldOut {
    views: Vec<View>,
    intrinsics: Intrinsics,
}

pub struct Trainer<R, E> {
    model: R,
    renderer: E,
    grid: OccupancyGrid,
    regularizers: Regularizers,
    dataset: RayDataset,
    sampler: BatchSampler,
    validator: Validator,
    held_out: Option<HeldOut>,
    preview: Option<(View, Intrinsics)>,
    sink: Box<dyn MetricsSink>,
    options: RenderOptions,
    max_iters: usize,
    validation_period: usize,
    validation_enabled: bool,
    render_chunk: usize,
    phase: Phase,
    state: TrainingState,
    stop: StopHandle,
}

impl<R, E> Trainer<R, E>
where
    R: Representation,
    E: Renderer<R>,
{
    /// Build every piece of run state; fails before anything is trained.
    pub fn new(
        config: &TrainConfig,
        model: R,
        renderer: E,
        dataset: RayDataset,
        sink: Box<dyn MetricsSink>,
    ) -> Result<Self, TrainError> {
        config.validate()?;
        let grid = OccupancyGrid::new(config.occupancy, config.seed)?;
        let sampler = BatchSampler::new(dataset.len(), config.batch_size, config.seed)?;
        let state = TrainingState {
            iteration: 0,
            optimizer: Adam::new(model.parameters(), AdamConfig::default()),
            scheduler: Scheduler::new(config.learning_rate_schedule()),
        };
        let policy = config.chunk_policy();

        Ok(Self {
            model,
            renderer,
            grid,
            regularizers: config.regularizers()?,
            dataset,
            sampler,
            validator: Validator::new(policy, Box::new(StructuralDissimilarity)),
            held_out: None,
            preview: None,
            sink,
            options: RenderOptions::new(Mode::Train, config.background, config.step_size),
            max_iters: config.iterations,
            validation_period: config.validation_period,
            validation_enabled: !config.no_validation,
            render_chunk: config.render_chunk(),
            phase: Phase::Idle,
            state,
            stop: StopHandle::new(),
        })
    }

    /// Held-out views scored at every validation iteration.
    pub fn with_validation_views(mut self, views: Vec<View>, intrinsics: Intrinsics) -> Self {
        self.held_out = Some(HeldOut { views, intrinsics });
        self
    }

    /// View rendered and logged at every validation iteration.
    pub fn with_preview(mut self, view: View, intrinsics: Intrinsics) -> Self {
        self.preview = Some((view, intrinsics));
        self
    }

    pub fn with_perceptual_metric(mut self, metric: Box<dyn PerceptualMetric>) -> Self {
        self.validator = Validator::new(*self.validator.policy(), metric);
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn state(&self) -> &TrainingState {
        &self.state
    }

    pub fn model(&self) -> &R {
        &self.model
    }

    pub fn grid(&self) -> &OccupancyGrid {
        &self.grid
    }

    pub fn dataset(&self) -> &RayDataset {
        &self.dataset
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn into_model(self) -> R {
        self.model
    }

    /// Run until the iteration limit or a stop request.
    #[tracing::instrument(skip_all, fields(iterations = self.max_iters))]
    pub fn run(&mut self) -> Result<TrainSummary, TrainError> {
        if self.phase != Phase::Idle {
            return Err(TrainError::InvalidArgument(format!(
                "cannot start a run in phase {:?}",
                self.phase
            )));
        }
        self.phase = Phase::Running;
        info!(
            "Training for {} iterations on {} items",
            self.max_iters,
            self.dataset.len()
        );

        let mut summary = TrainSummary {
            iterations: 0,
            final_loss: None,
            last_validation: None,
            stopped: false,
        };
        let result = self.run_iterations(&mut summary);
        self.phase = Phase::Done;
        result?;
        self.sink.flush()?;

        summary.iterations = self.state.iteration;
        info!(
            "Training finished after {} iterations (epoch {})",
            self.state.iteration,
            self.sampler.epoch()
        );
        Ok(summary)
    }

    fn run_iterations(&mut self, summary: &mut TrainSummary) -> Result<(), TrainError> {
        while self.state.iteration < self.max_iters {
            let report = self.train_step()?;
            let k = report.iteration;
            let mut record = Record::new(k)
                .scalar("train_psnr", report.psnr)
                .scalar("loss", report.loss)
                .scalar("lr", report.lr)
                .scalar("alpha", report.alpha);

            if self.validation_due(k) {
                self.phase = Phase::Validating;
                let pass = self.validation_pass();
                self.phase = Phase::Running;
                let (metrics, preview) = pass?;

                record = record
                    .scalar("val_psnr", metrics.psnr)
                    .scalar("val_ssim", metrics.ssim)
                    .scalar(format!("val_{}", self.validator.perceptual_name()), metrics.perceptual);
                if let Some(frame) = preview {
                    if let Some(depth) = frame.depth_image() {
                        record = record.image("depth", depth);
                    }
                    record = record.image("rgb", DynamicImage::ImageRgb32F(frame.rgb));
                }
                summary.last_validation = Some(metrics);
            }

            self.sink.log(&record)?;
            summary.final_loss = Some(report.loss);

            if self.stop.is_stopped() {
                info!("Stop requested after iteration {}", k);
                summary.stopped = true;
                break;
            }
        }
        Ok(())
    }

    fn validation_due(&self, k: usize) -> bool {
        self.validation_enabled
            && self.held_out.is_some()
            && k > 0
            && self.validation_period > 0
            && k % self.validation_period == 0
    }

    /// One iteration: batch, render, loss, backward, optimizer, grid refresh.
    pub fn train_step(&mut self) -> Result<StepReport, TrainError> {
        let k = self.state.iteration;
        self.set_mode(Mode::Train);

        let batch = self.sampler.next_batch(&self.dataset)?;
        let options = self.options.with_mode(Mode::Train);
        let output = self
            .renderer
            .render(&batch.origins, &batch.directions, &self.grid, &self.model, &options)?;
        if output.colors.len() != batch.len() {
            return Err(RenderError::Failed(format!(
                "{} colors for a batch of {} rays",
                output.colors.len(),
                batch.len()
            ))
            .into());
        }

        // mean over rays and channels
        let norm = 3.0 * batch.len() as f32;
        let mut squared = 0.0f32;
        let mut grad_colors: Vec<Vec3> = Vec::with_capacity(batch.len());
        for (predicted, target) in output.colors.iter().zip(&batch.colors) {
            let diff = *predicted - *target;
            squared += diff.length_squared();
            grad_colors.push(diff * (2.0 / norm));
        }
        let photometric = squared / norm;
        let mut loss = photometric;

        let mut grad_densities = Vec::new();
        if let Some(occlusion) = &self.regularizers.occlusion {
            if !output.densities.is_empty() {
                let (penalty, grads) = occlusion.evaluate(&output.densities, &output.ray_indices)?;
                loss += penalty;
                grad_densities = grads;
            }
        }

        let mut alpha = 0.0;
        if let Some(frequency) = &self.regularizers.frequency {
            if frequency.is_active(k) {
                alpha = frequency.alpha(k);
                loss += alpha * frequency.penalty(self.model.parameters());
            }
        }

        if !loss.is_finite() {
            warn!("Non-finite loss at iteration {}", k);
            return Err(TrainError::NumericalDivergence { iteration: k, loss });
        }

        let gradients = RenderGradients {
            colors: grad_colors,
            densities: grad_densities,
        };
        self.renderer.backward(&mut self.model, &gradients)?;
        if let Some(frequency) = &self.regularizers.frequency {
            frequency.accumulate_gradients(self.model.parameters_mut(), alpha);
        }

        let lr = self.state.scheduler.lr();
        self.state.optimizer.step(self.model.parameters_mut(), lr)?;
        self.state.scheduler.step();
        self.model.zero_grad();

        let step_size = self.options.step_size;
        let model = &self.model;
        self.grid
            .update_every_n_steps(k, |x| model.density(x) * step_size);

        self.state.iteration += 1;
        let report = StepReport {
            iteration: k,
            loss,
            photometric,
            psnr: psnr_from_mse(photometric),
            lr,
            alpha,
            samples: output.densities.len(),
        };
        debug!(
            "Iteration {}: loss {:.6}, PSNR {:.2}, lr {:.2e}, {} samples",
            k, report.loss, report.psnr, lr, report.samples
        );
        Ok(report)
    }

    fn set_mode(&mut self, mode: Mode) {
        self.model.set_mode(mode);
        self.grid.set_mode(mode);
    }

    /// Score the held-out views and render the preview, in evaluation mode.
    fn validation_pass(&mut self) -> Result<(ValidationMetrics, Option<Frame>), TrainError> {
        self.set_mode(Mode::Eval);
        let result = self.evaluate_held_out();
        self.set_mode(Mode::Train);
        result
    }

    fn evaluate_held_out(&mut self) -> Result<(ValidationMetrics, Option<Frame>), TrainError> {
        let Some(held_out) = &self.held_out else {
            return Err(TrainError::InvalidArgument("no validation views configured".into()));
        };
        let metrics = self.validator.validate(
            &held_out.views,
            &held_out.intrinsics,
            &mut self.renderer,
            &self.model,
            &self.grid,
            &self.options,
        )?;

        let preview = match &self.preview {
            Some((view, intrinsics)) => Some(render_frame(
                &mut self.renderer,
                &self.model,
                &self.grid,
                intrinsics,
                &view.pose,
                self.render_chunk,
                &self.options,
            )?),
            None => None,
        };
        Ok((metrics, preview))
    }

    /// Score an arbitrary held-out set and log it under `final_*` keys.
    pub fn evaluate_final(&mut self, views: &[View], intrinsics: &Intrinsics) -> Result<ValidationMetrics, TrainError> {
        self.set_mode(Mode::Eval);
        let result = self.validator.validate(
            views,
            intrinsics,
            &mut self.renderer,
            &self.model,
            &self.grid,
            &self.options,
        );
        self.set_mode(Mode::Train);
        let metrics = result?;

        let record = Record::new(self.state.iteration)
            .scalar("final_psnr", metrics.psnr)
            .scalar("final_ssim", metrics.ssim)
            .scalar(format!("final_{}", self.validator.perceptual_name()), metrics.perceptual);
        self.sink.log(&record)?;
        self.sink.flush()?;
        Ok(metrics)
    }

    /// Render novel views along `poses`.
    pub fn render_path(&mut self, poses: &[Mat4], intrinsics: &Intrinsics) -> Result<Vec<Frame>, TrainError> {
        let result = crate::render::render_path(
            &mut self.renderer,
            &mut self.model,
            &mut self.grid,
            poses,
            intrinsics,
            self.render_chunk,
            &self.options,
        );
        self.set_mode(Mode::Train);
        result
    }

    pub fn save_checkpoint(&self, dir: &Path) -> Result<(), TrainError> {
        checkpoint::save_parameters(dir, self.model.parameters())?;
        Ok(())
    }

    pub fn load_checkpoint(&mut self, dir: &Path) -> Result<(), TrainError> {
        checkpoint::load_parameters(dir, self.model.parameters_mut())?;
        Ok(())
    }
}
