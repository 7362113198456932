//! Dense voxel radiance field
//!
//! Raw density and color values live on the vertices of a regular lattice
//! over `[-half_extent, half_extent]^3` and are trilinearly interpolated.
//! Density goes through softplus, color through a sigmoid. Colors are view
//! independent.

use crate::error::TrainError;
use crate::model::{Parameter, Representation};
use glam::Vec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const DENSITY: usize = 0;
const COLOR: usize = 1;
const COLOR_BIAS: usize = 2;

/// Initial raw density; softplus(-2) keeps the field nearly transparent.
const INITIAL_RAW_DENSITY: f32 = -2.0;

pub struct VoxelField {
    resolution: usize,
    min: Vec3,
    max: Vec3,
    params: Vec<Parameter>,
}

impl VoxelField {
    pub fn new(resolution: usize, half_extent: f32, seed: u64) -> Result<Self, TrainError> {
        if resolution < 2 {
            return Err(TrainError::InvalidArgument(format!(
                "voxel field needs at least 2 vertices per axis, got {resolution}"
            )));
        }
        if !(half_extent > 0.0) {
            return Err(TrainError::InvalidArgument(format!(
                "voxel field extent must be positive, got {half_extent}"
            )));
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let r = resolution;
        let density = (0..r * r * r)
            .map(|_| INITIAL_RAW_DENSITY + rng.gen_range(-0.1..0.1))
            .collect();
        let color = (0..r * r * r * 3).map(|_| rng.gen_range(-0.1..0.1)).collect();

        Ok(Self {
            resolution,
            min: Vec3::splat(-half_extent),
            max: Vec3::splat(half_extent),
            params: vec![
                Parameter::new("density.weight", vec![r, r, r], density),
                Parameter::new("color.weight", vec![r, r, r, 3], color),
                Parameter::zeros("color.bias", vec![3]),
            ],
        })
    }

    pub fn resolution(&self) -> usize {
        self.resolution
    }

    /// Lattice vertices surrounding `p` and their trilinear weights.
    fn corners(&self, p: Vec3) -> Option<[(usize, f32); 8]> {
        if !(p.cmpge(self.min).all() && p.cmple(self.max).all()) {
            return None;
        }
        let r = self.resolution;
        let rel = (p - self.min) / (self.max - self.min) * (r - 1) as f32;
        let base = rel.floor().min(Vec3::splat((r - 2) as f32));
        let frac = rel - base;
        let (bx, by, bz) = (base.x as usize, base.y as usize, base.z as usize);

        let mut out = [(0usize, 0.0f32); 8];
        for (n, slot) in out.iter_mut().enumerate() {
            let (dx, dy, dz) = (n & 1, (n >> 1) & 1, (n >> 2) & 1);
            let wx = if dx == 1 { frac.x } else { 1.0 - frac.x };
            let wy = if dy == 1 { frac.y } else { 1.0 - frac.y };
            let wz = if dz == 1 { frac.z } else { 1.0 - frac.z };
            let index = ((bx + dx) * r + (by + dy)) * r + (bz + dz);
            *slot = (index, wx * wy * wz);
        }
        Some(out)
    }

    fn raw(&self, corners: &[(usize, f32); 8]) -> (f32, Vec3) {
        let density = self.params[DENSITY].value();
        let color = self.params[COLOR].value();
        let bias = self.params[COLOR_BIAS].value();
        let mut raw_density = 0.0;
        let mut raw_color = Vec3::new(bias[0], bias[1], bias[2]);
        for &(i, w) in corners {
            raw_density += w * density[i];
            raw_color += w * Vec3::new(color[3 * i], color[3 * i + 1], color[3 * i + 2]);
        }
        (raw_density, raw_color)
    }
}

impl Representation for VoxelField {
    fn density_and_color(&self, point: Vec3, _direction: Vec3) -> (f32, Vec3) {
        match self.corners(point) {
            Some(corners) => {
                let (raw_density, raw_color) = self.raw(&corners);
                (softplus(raw_density), sigmoid3(raw_color))
            }
            None => (0.0, Vec3::ZERO),
        }
    }

    fn backward(&mut self, point: Vec3, _direction: Vec3, grad_density: f32, grad_color: Vec3) {
        let Some(corners) = self.corners(point) else {
            return;
        };
        let (raw_density, raw_color) = self.raw(&corners);

        // softplus' = sigmoid, sigmoid' = s(1 - s)
        let grad_raw_density = grad_density * sigmoid(raw_density);
        let c = sigmoid3(raw_color);
        let grad_raw_color = grad_color * c * (Vec3::ONE - c);

        let density_grad = self.params[DENSITY].grad_mut();
        for &(i, w) in &corners {
            density_grad[i] += w * grad_raw_density;
        }
        let color_grad = self.params[COLOR].grad_mut();
        for &(i, w) in &corners {
            color_grad[3 * i] += w * grad_raw_color.x;
            color_grad[3 * i + 1] += w * grad_raw_color.y;
            color_grad[3 * i + 2] += w * grad_raw_color.z;
        }
        let bias_grad = self.params[COLOR_BIAS].grad_mut();
        bias_grad[0] += grad_raw_color.x;
        bias_grad[1] += grad_raw_color.y;
        bias_grad[2] += grad_raw_color.z;
    }

    fn parameters(&self) -> &[Parameter] {
        &self.params
    }

    fn parameters_mut(&mut self) -> &mut [Parameter] {
        &mut self.params
    }
}

fn softplus(x: f32) -> f32 {
    if x > 20.0 { x } else { x.exp().ln_1p() }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

fn sigmoid3(v: Vec3) -> Vec3 {
    Vec3::new(sigmoid(v.x), sigmoid(v.y), sigmoid(v.z))
}
