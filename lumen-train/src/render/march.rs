//! CPU ray marcher with an analytic backward pass

use crate::error::RenderError;
use crate::model::{Mode, RenderGradients, RenderOptions, RenderOutput, Renderer, Representation};
use crate::occupancy::OccupancyGrid;
use glam::Vec3;
use tracing::trace;

/// Marching stops once transmittance drops below this.
pub const EARLY_STOP_TRANSMITTANCE: f32 = 1e-4;

/// One marched sample kept for the backward pass.
#[derive(Debug, Clone, Copy)]
struct Sample {
    point: Vec3,
    direction: Vec3,
    color: Vec3,
    weight: f32,
    /// Transmittance after this sample.
    transmittance: f32,
}

#[derive(Debug, Clone)]
struct RayRecord {
    samples: std::ops::Range<usize>,
    /// `T_final * background`
    residual: Vec3,
}

#[derive(Debug, Clone, Default)]
struct ForwardCache {
    samples: Vec<Sample>,
    rays: Vec<RayRecord>,
    step_size: f32,
}

/// Uniform-step volumetric renderer that skips unoccupied cells.
///
/// Samples sit at the midpoints of `step_size` intervals along the
/// normalized ray inside the grid's bounding box. Each contributes
/// `T_i * (1 - exp(-sigma_i * step_size))` of its color; the remaining
/// transmittance is filled with the background color.
#[derive(Debug, Default)]
pub struct MarchingRenderer {
    cache: Option<ForwardCache>,
}

impl MarchingRenderer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<R: Representation> Renderer<R> for MarchingRenderer {
    fn render(
        &mut self,
        origins: &[Vec3],
        directions: &[Vec3],
        grid: &OccupancyGrid,
        model: &R,
        options: &RenderOptions,
    ) -> Result<RenderOutput, RenderError> {
        if origins.len() != directions.len() {
            return Err(RenderError::MismatchedRays {
                origins: origins.len(),
                directions: directions.len(),
            });
        }
        if !(options.step_size > 0.0 && options.step_size.is_finite()) {
            return Err(RenderError::Failed(format!(
                "step size must be positive, got {}",
                options.step_size
            )));
        }

        let step = options.step_size;
        let background = options.background.color();
        let mut output = RenderOutput {
            colors: Vec::with_capacity(origins.len()),
            depths: Some(Vec::with_capacity(origins.len())),
            ..RenderOutput::default()
        };
        let mut cache = ForwardCache {
            step_size: step,
            ..ForwardCache::default()
        };

        for (ray, (&origin, &raw_direction)) in origins.iter().zip(directions).enumerate() {
            let direction = raw_direction.normalize_or_zero();
            let first = cache.samples.len();
            let mut color = Vec3::ZERO;
            let mut depth = 0.0;
            let mut transmittance = 1.0f32;

            if let Some((near, far)) = (direction != Vec3::ZERO)
                .then(|| grid.ray_intersection(origin, direction))
                .flatten()
            {
                let mut t = near + 0.5 * step;
                while t < far {
                    let point = origin + direction * t;
                    if grid.is_occupied(point) {
                        let (density, sample_color) = model.density_and_color(point, direction);
                        let alpha = 1.0 - (-density * step).exp();
                        let weight = transmittance * alpha;
                        color += weight * sample_color;
                        depth += weight * t;
                        transmittance *= 1.0 - alpha;

                        output.densities.push(density);
                        output.ray_indices.push(ray);
                        cache.samples.push(Sample {
                            point,
                            direction,
                            color: sample_color,
                            weight,
                            transmittance,
                        });
                        if transmittance < EARLY_STOP_TRANSMITTANCE {
                            break;
                        }
                    }
                    t += step;
                }
            }

            let residual = transmittance * background;
            output.colors.push(color + residual);
            if let Some(depths) = output.depths.as_mut() {
                depths.push(depth);
            }
            cache.rays.push(RayRecord {
                samples: first..cache.samples.len(),
                residual,
            });
        }

        trace!(
            "Marched {} rays, {} samples",
            origins.len(),
            output.densities.len()
        );
        self.cache = (options.mode == Mode::Train).then_some(cache);
        Ok(output)
    }

    fn backward(&mut self, model: &mut R, grads: &RenderGradients) -> Result<(), RenderError> {
        let cache = self.cache.take().ok_or(RenderError::MissingForward)?;
        if grads.colors.len() != cache.rays.len() {
            return Err(RenderError::GradientShape(format!(
                "{} color gradients for {} rays",
                grads.colors.len(),
                cache.rays.len()
            )));
        }
        if !grads.densities.is_empty() && grads.densities.len() != cache.samples.len() {
            return Err(RenderError::GradientShape(format!(
                "{} density gradients for {} samples",
                grads.densities.len(),
                cache.samples.len()
            )));
        }

        let step = cache.step_size;
        for (ray, &grad_color) in cache.rays.iter().zip(&grads.colors) {
            // radiance accumulated behind the current sample
            let mut behind = ray.residual;
            for i in ray.samples.clone().rev() {
                let s = cache.samples[i];
                let mut grad_density =
                    step * grad_color.dot(s.transmittance * s.color - behind);
                if let Some(&extra) = grads.densities.get(i) {
                    grad_density += extra;
                }
                model.backward(s.point, s.direction, grad_density, s.weight * grad_color);
                behind += s.weight * s.color;
            }
        }
        Ok(())
    }
}
