//! Contracts for the trainable scene representation and the volumetric renderer.
//!
//! The training core never looks inside either collaborator: a
//! [`Representation`] maps a point and view direction to density and color
//! and owns its named parameters; a [`Renderer`] turns ray batches into
//! composited colors and pushes color/density gradients back into the
//! representation.

use crate::error::RenderError;
use crate::occupancy::OccupancyGrid;
use glam::Vec3;
use lumen_data::Background;

/// Training or evaluation behaviour of a collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Train,
    Eval,
}

/// A named, flat parameter tensor with its accumulated gradient.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    name: String,
    shape: Vec<usize>,
    value: Vec<f32>,
    grad: Vec<f32>,
}

impl Parameter {
    pub fn new(name: impl Into<String>, shape: Vec<usize>, value: Vec<f32>) -> Self {
        debug_assert_eq!(shape.iter().product::<usize>(), value.len());
        let grad = vec![0.0; value.len()];
        Self {
            name: name.into(),
            shape,
            value,
            grad,
        }
    }

    pub fn zeros(name: impl Into<String>, shape: Vec<usize>) -> Self {
        let len = shape.iter().product();
        Self::new(name, shape, vec![0.0; len])
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    pub fn value(&self) -> &[f32] {
        &self.value
    }

    pub fn value_mut(&mut self) -> &mut [f32] {
        &mut self.value
    }

    pub fn grad(&self) -> &[f32] {
        &self.grad
    }

    pub fn grad_mut(&mut self) -> &mut [f32] {
        &mut self.grad
    }

    /// Split borrow used by optimizers.
    pub fn value_and_grad_mut(&mut self) -> (&mut [f32], &[f32]) {
        (&mut self.value, &self.grad)
    }

    pub fn zero_grad(&mut self) {
        self.grad.fill(0.0);
    }

    /// Weight tensors whose leading dimension exceeds 3; bias-like terms
    /// and per-channel vectors are excluded.
    pub fn is_regularized_weight(&self) -> bool {
        self.name.contains("weight") && self.shape.first().is_some_and(|&d| d > 3)
    }
}

/// Trainable mapping from (point, direction) to (density, color).
pub trait Representation {
    /// Density and RGB color at `point` seen along `direction`.
    fn density_and_color(&self, point: Vec3, direction: Vec3) -> (f32, Vec3);

    /// Density alone, used for occupancy refreshes.
    fn density(&self, point: Vec3) -> f32 {
        self.density_and_color(point, Vec3::NEG_Z).0
    }

    /// Accumulate parameter gradients for one evaluated sample.
    fn backward(&mut self, point: Vec3, direction: Vec3, grad_density: f32, grad_color: Vec3);

    fn parameters(&self) -> &[Parameter];

    fn parameters_mut(&mut self) -> &mut [Parameter];

    fn set_mode(&mut self, _mode: Mode) {}

    fn zero_grad(&mut self) {
        for p in self.parameters_mut() {
            p.zero_grad();
        }
    }
}

/// Per-call renderer settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderOptions {
    pub mode: Mode,
    pub background: Background,
    /// Marching step along the normalized ray direction.
    pub step_size: f32,
}

impl RenderOptions {
    pub fn new(mode: Mode, background: Background, step_size: f32) -> Self {
        Self {
            mode,
            background,
            step_size,
        }
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }
}

/// Composited colors plus the per-sample auxiliaries used by regularizers.
#[derive(Debug, Clone, Default)]
pub struct RenderOutput {
    /// One predicted color per ray.
    pub colors: Vec<Vec3>,
    /// Density of every marched sample.
    pub densities: Vec<f32>,
    /// Ray each sample belongs to, parallel to `densities`.
    pub ray_indices: Vec<usize>,
    /// Expected termination depth per ray, when the renderer tracks it.
    pub depths: Option<Vec<f32>>,
}

/// Loss gradients with respect to a [`RenderOutput`].
#[derive(Debug, Clone, Default)]
pub struct RenderGradients {
    /// dL/d(color), one per ray.
    pub colors: Vec<Vec3>,
    /// dL/d(density), one per sample. Empty means zero.
    pub densities: Vec<f32>,
}

/// Differentiable volumetric renderer.
pub trait Renderer<R: Representation> {
    /// Render a batch of rays. In [`Mode::Train`] the renderer keeps whatever
    /// it needs for the next [`Renderer::backward`] call.
    fn render(
        &mut self,
        origins: &[Vec3],
        directions: &[Vec3],
        grid: &OccupancyGrid,
        model: &R,
        options: &RenderOptions,
    ) -> Result<RenderOutput, RenderError>;

    /// Propagate output gradients of the last training-mode render into
    /// the representation's parameter gradients.
    fn backward(&mut self, model: &mut R, grads: &RenderGradients) -> Result<(), RenderError>;
}
