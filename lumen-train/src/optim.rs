//! Adam optimizer over named parameters

use crate::error::TrainError;
use crate::model::Parameter;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdamConfig {
    pub beta1: f32,
    pub beta2: f32,
    pub eps: f32,
}

impl Default for AdamConfig {
    fn default() -> Self {
        Self {
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
        }
    }
}

/// Adam with bias-corrected first and second moments.
#[derive(Debug, Clone)]
pub struct Adam {
    config: AdamConfig,
    steps: i32,
    first: Vec<Vec<f32>>,
    second: Vec<Vec<f32>>,
}

impl Adam {
    pub fn new(params: &[Parameter], config: AdamConfig) -> Self {
        Self {
            config,
            steps: 0,
            first: params.iter().map(|p| vec![0.0; p.len()]).collect(),
            second: params.iter().map(|p| vec![0.0; p.len()]).collect(),
        }
    }

    pub fn steps(&self) -> i32 {
        self.steps
    }

    /// Apply one update using the accumulated gradients.
    pub fn step(&mut self, params: &mut [Parameter], lr: f32) -> Result<(), TrainError> {
        if params.len() != self.first.len()
            || params.iter().zip(&self.first).any(|(p, m)| p.len() != m.len())
        {
            return Err(TrainError::InvalidArgument(
                "parameter layout changed since the optimizer was created".into(),
            ));
        }

        self.steps += 1;
        let AdamConfig { beta1, beta2, eps } = self.config;
        let correction1 = 1.0 - beta1.powi(self.steps);
        let correction2 = 1.0 - beta2.powi(self.steps);

        for ((param, m), v) in params.iter_mut().zip(&mut self.first).zip(&mut self.second) {
            let (value, grad) = param.value_and_grad_mut();
            for i in 0..value.len() {
                let g = grad[i];
                m[i] = beta1 * m[i] + (1.0 - beta1) * g;
                v[i] = beta2 * v[i] + (1.0 - beta2) * g * g;
                let m_hat = m[i] / correction1;
                let v_hat = v[i] / correction2;
                value[i] -= lr * m_hat / (v_hat.sqrt() + eps);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_step_moves_by_lr() {
        let mut params = vec![Parameter::new("w", vec![2], vec![1.0, -1.0])];
        params[0].grad_mut().copy_from_slice(&[0.5, -2.0]);
        let mut adam = Adam::new(&params, AdamConfig::default());
        adam.step(&mut params, 0.1).unwrap();
        // bias-corrected first step is lr * sign(g)
        assert!((params[0].value()[0] - 0.9).abs() < 1e-4);
        assert!((params[0].value()[1] + 0.9).abs() < 1e-4);
    }

    #[test]
    fn test_minimizes_quadratic() {
        let mut params = vec![Parameter::new("w", vec![1], vec![3.0])];
        let mut adam = Adam::new(&params, AdamConfig::default());
        for _ in 0..500 {
            let w = params[0].value()[0];
            params[0].grad_mut()[0] = 2.0 * w;
            adam.step(&mut params, 0.05).unwrap();
            params[0].zero_grad();
        }
        assert!(params[0].value()[0].abs() < 0.1);
    }

    #[test]
    fn test_layout_change_rejected() {
        let params = vec![Parameter::zeros("w", vec![2])];
        let mut adam = Adam::new(&params, AdamConfig::default());
        let mut other = vec![Parameter::zeros("w", vec![3])];
        assert!(adam.step(&mut other, 0.1).is_err());
    }
}
