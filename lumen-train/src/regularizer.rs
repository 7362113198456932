//! Auxiliary loss terms applied on top of the photometric loss

use crate::error::TrainError;
use crate::model::Parameter;
use serde::{Deserialize, Serialize};

/// Norm used by the frequency regularizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Norm {
    #[default]
    L1,
    L2,
}

/// Penalizes density close to the camera.
///
/// Only the first `range` samples of every ray contribute; the penalty is
/// `beta` times their mean density.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OcclusionRegularizer {
    beta: f32,
    range: usize,
}

impl OcclusionRegularizer {
    pub fn new(beta: f32, range: usize) -> Self {
        Self { beta, range }
    }

    pub fn beta(&self) -> f32 {
        self.beta
    }

    pub fn range(&self) -> usize {
        self.range
    }

    /// Penalty and its gradient with respect to every sample density.
    ///
    /// Samples of one ray are expected in marching order; rays may be
    /// interleaved. Returns `(0, zeros)` when nothing is selected.
    pub fn evaluate(&self, densities: &[f32], ray_indices: &[usize]) -> Result<(f32, Vec<f32>), TrainError> {
        if densities.len() != ray_indices.len() {
            return Err(TrainError::InvalidArgument(format!(
                "{} densities but {} ray indices",
                densities.len(),
                ray_indices.len()
            )));
        }
        let mut grads = vec![0.0; densities.len()];
        let rays = ray_indices.iter().max().map_or(0, |&m| m + 1);
        let mut seen = vec![0usize; rays];

        let mut selected = Vec::new();
        for (i, &ray) in ray_indices.iter().enumerate() {
            if seen[ray] < self.range {
                selected.push(i);
            }
            seen[ray] += 1;
        }
        if selected.is_empty() {
            return Ok((0.0, grads));
        }

        let n = selected.len() as f32;
        let sum: f32 = selected.iter().map(|&i| densities[i]).sum();
        for &i in &selected {
            grads[i] = self.beta / n;
        }
        Ok((self.beta * sum / n, grads))
    }
}

/// Weight-magnitude penalty with a linearly decaying coefficient.
///
/// Active for `k < window_length`, where the window is a fraction of the
/// total iteration count. The coefficient starts at `a0` and reaches zero
/// at the window boundary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrequencyRegularizer {
    a0: f32,
    norm: Norm,
    window_length: usize,
}

impl FrequencyRegularizer {
    pub fn new(a0: f32, activation_ratio: f32, norm: Norm, max_iters: usize) -> Result<Self, TrainError> {
        if !(0.0..1.0).contains(&a0) {
            return Err(TrainError::InvalidArgument(format!(
                "frequency regularizer floor must lie in [0, 1), got {a0}"
            )));
        }
        if !(activation_ratio >= 0.0) {
            return Err(TrainError::InvalidArgument(format!(
                "activation ratio must be non-negative, got {activation_ratio}"
            )));
        }
        Ok(Self {
            a0,
            norm,
            window_length: (activation_ratio * max_iters as f32) as usize,
        })
    }

    pub fn norm(&self) -> Norm {
        self.norm
    }

    pub fn window_length(&self) -> usize {
        self.window_length
    }

    pub fn is_active(&self, k: usize) -> bool {
        k < self.window_length
    }

    /// Coefficient at iteration `k`; zero outside the window.
    pub fn alpha(&self, k: usize) -> f32 {
        if !self.is_active(k) {
            return 0.0;
        }
        let a = self.a0 + (1.0 - self.a0) * (k as f32 / self.window_length as f32);
        (self.a0 / (1.0 - self.a0)) * (1.0 - a.min(1.0))
    }

    /// Unscaled penalty over the regularized weight tensors.
    pub fn penalty(&self, params: &[Parameter]) -> f32 {
        params
            .iter()
            .filter(|p| p.is_regularized_weight())
            .map(|p| match self.norm {
                Norm::L1 => p.value().iter().map(|w| w.abs()).sum::<f32>(),
                Norm::L2 => p.value().iter().map(|w| w * w).sum::<f32>().sqrt(),
            })
            .sum()
    }

    /// Add `alpha * d(penalty)/d(w)` to the weight gradients.
    pub fn accumulate_gradients(&self, params: &mut [Parameter], alpha: f32) {
        if alpha == 0.0 {
            return;
        }
        for p in params.iter_mut().filter(|p| p.is_regularized_weight()) {
            let scale = match self.norm {
                Norm::L1 => alpha,
                Norm::L2 => {
                    let norm = p.value().iter().map(|w| w * w).sum::<f32>().sqrt();
                    // subgradient zero at the origin
                    if norm == 0.0 {
                        continue;
                    }
                    alpha / norm
                }
            };
            let updates: Vec<f32> = p
                .value()
                .iter()
                .map(|&w| match self.norm {
                    Norm::L1 if w == 0.0 => 0.0,
                    Norm::L1 => scale * w.signum(),
                    Norm::L2 => scale * w,
                })
                .collect();
            for (g, u) in p.grad_mut().iter_mut().zip(updates) {
                *g += u;
            }
        }
    }
}

/// Regularizers chosen once at construction.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Regularizers {
    pub occlusion: Option<OcclusionRegularizer>,
    pub frequency: Option<FrequencyRegularizer>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alpha_boundaries() {
        let reg = FrequencyRegularizer::new(0.1, 0.5, Norm::L1, 200).unwrap();
        assert_eq!(reg.window_length(), 100);
        assert!((reg.alpha(0) - 0.1).abs() < 1e-6);
        assert_eq!(reg.alpha(100), 0.0);
        assert_eq!(reg.alpha(150), 0.0);
    }

    #[test]
    fn test_alpha_monotonic() {
        let reg = FrequencyRegularizer::new(0.3, 1.0, Norm::L2, 50).unwrap();
        let mut prev = reg.alpha(0);
        for k in 1..=50 {
            let a = reg.alpha(k);
            assert!(a <= prev, "alpha increased at {}", k);
            prev = a;
        }
    }

    #[test]
    fn test_invalid_floor_rejected() {
        assert!(FrequencyRegularizer::new(1.0, 0.5, Norm::L1, 10).is_err());
        assert!(FrequencyRegularizer::new(-0.1, 0.5, Norm::L1, 10).is_err());
    }

    #[test]
    fn test_penalty_selects_weights() {
        let params = vec![
            Parameter::new("a.weight", vec![4], vec![1.0, -2.0, 0.0, 2.0]),
            Parameter::new("a.bias", vec![4], vec![10.0, 10.0, 10.0, 10.0]),
        ];
        let l1 = FrequencyRegularizer::new(0.1, 1.0, Norm::L1, 10).unwrap();
        let l2 = FrequencyRegularizer::new(0.1, 1.0, Norm::L2, 10).unwrap();
        assert!((l1.penalty(&params) - 5.0).abs() < 1e-6);
        assert!((l2.penalty(&params) - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_l2_gradient() {
        let mut params = vec![Parameter::new("w.weight", vec![4], vec![3.0, 0.0, 0.0, 4.0])];
        let reg = FrequencyRegularizer::new(0.1, 1.0, Norm::L2, 10).unwrap();
        reg.accumulate_gradients(&mut params, 0.5);
        let g = params[0].grad();
        assert!((g[0] - 0.3).abs() < 1e-6);
        assert!((g[3] - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_occlusion_first_samples_only() {
        let reg = OcclusionRegularizer::new(2.0, 2);
        // ray 0 has three samples, ray 1 has one
        let densities = [1.0, 3.0, 100.0, 2.0];
        let rays = [0, 0, 0, 1];
        let (penalty, grads) = reg.evaluate(&densities, &rays).unwrap();
        assert!((penalty - 2.0 * 2.0).abs() < 1e-6);
        assert_eq!(grads[2], 0.0);
        assert!((grads[0] - 2.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_occlusion_empty() {
        let reg = OcclusionRegularizer::new(1.0, 10);
        let (penalty, grads) = reg.evaluate(&[], &[]).unwrap();
        assert_eq!(penalty, 0.0);
        assert!(grads.is_empty());
    }

    #[test]
    fn test_occlusion_length_mismatch() {
        let reg = OcclusionRegularizer::new(1.0, 10);
        let result = reg.evaluate(&[1.0, 2.0], &[0, 0, 1]);
        assert!(matches!(result, Err(TrainError::InvalidArgument(_))));
    }
}
