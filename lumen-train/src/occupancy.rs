//! Occupancy grid for empty-space skipping
//!
//! A fixed voxel lattice over an axis-aligned box. Each cell keeps an
//! exponentially decayed occupancy estimate refreshed from the
//! representation's densities; cells above a threshold are marked occupied
//! and only those are marched by the renderer.

use crate::error::TrainError;
use crate::model::Mode;
use glam::Vec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Occupancy grid settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OccupancyConfig {
    /// The grid spans `[-half_extent, half_extent]^3`.
    pub half_extent: f32,
    /// Cells per axis.
    pub resolution: usize,
    /// Refresh every `update_interval` iterations.
    pub update_interval: usize,
    /// Refresh every cell while `step < warmup_steps`.
    pub warmup_steps: usize,
    pub ema_decay: f32,
    /// Occupancy above `min(threshold, mean)` marks a cell occupied.
    pub threshold: f32,
}

impl Default for OccupancyConfig {
    fn default() -> Self {
        Self {
            half_extent: 1.5,
            resolution: 128,
            update_interval: 16,
            warmup_steps: 256,
            ema_decay: 0.95,
            threshold: 1e-2,
        }
    }
}

/// Process-wide occupancy state of one training run.
#[derive(Debug, Clone)]
pub struct OccupancyGrid {
    config: OccupancyConfig,
    min: Vec3,
    max: Vec3,
    occupancy: Vec<f32>,
    binary: Vec<bool>,
    mode: Mode,
    rng: StdRng,
}

impl OccupancyGrid {
    /// Every cell starts occupied, so nothing is skipped before the first refresh.
    pub fn new(config: OccupancyConfig, seed: u64) -> Result<Self, TrainError> {
        if config.resolution == 0 {
            return Err(TrainError::InvalidArgument(
                "occupancy grid resolution must be positive".into(),
            ));
        }
        if !(config.half_extent > 0.0) {
            return Err(TrainError::InvalidArgument(format!(
                "occupancy grid extent must be positive, got {}",
                config.half_extent
            )));
        }
        let cells = config.resolution.pow(3);
        Ok(Self {
            min: Vec3::splat(-config.half_extent),
            max: Vec3::splat(config.half_extent),
            occupancy: vec![0.0; cells],
            binary: vec![true; cells],
            mode: Mode::Train,
            rng: StdRng::seed_from_u64(seed),
            config,
        })
    }

    pub fn config(&self) -> &OccupancyConfig {
        &self.config
    }

    pub fn resolution(&self) -> usize {
        self.config.resolution
    }

    pub fn aabb(&self) -> (Vec3, Vec3) {
        (self.min, self.max)
    }

    pub fn cell_size(&self) -> Vec3 {
        (self.max - self.min) / self.config.resolution as f32
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    pub fn contains(&self, p: Vec3) -> bool {
        p.cmpge(self.min).all() && p.cmple(self.max).all()
    }

    /// Whether `p` lies in an occupied cell. Points outside the box are empty.
    pub fn is_occupied(&self, p: Vec3) -> bool {
        self.cell_index(p).is_some_and(|i| self.binary[i])
    }

    /// Fraction of cells currently marked occupied.
    pub fn occupied_fraction(&self) -> f32 {
        self.binary.iter().filter(|&&b| b).count() as f32 / self.binary.len() as f32
    }

    /// Entry and exit distances of a ray through the grid box.
    pub fn ray_intersection(&self, origin: Vec3, direction: Vec3) -> Option<(f32, f32)> {
        let inv = direction.recip();
        let t0 = (self.min - origin) * inv;
        let t1 = (self.max - origin) * inv;
        let near = t0.min(t1).max_element().max(0.0);
        let far = t0.max(t1).min_element();
        (near < far).then_some((near, far))
    }

    /// Refresh the grid when `step` falls on the update cadence.
    ///
    /// `occupancy_fn` maps a world-space point to an occupancy value
    /// (density times step size). Returns whether a refresh happened.
    pub fn update_every_n_steps<F>(&mut self, step: usize, occupancy_fn: F) -> bool
    where
        F: FnMut(Vec3) -> f32,
    {
        if self.mode != Mode::Train {
            warn!("Occupancy refresh skipped: grid is in evaluation mode");
            return false;
        }
        if self.config.update_interval == 0 || step % self.config.update_interval != 0 {
            return false;
        }
        self.update(step, occupancy_fn);
        true
    }

    fn update<F>(&mut self, step: usize, mut occupancy_fn: F)
    where
        F: FnMut(Vec3) -> f32,
    {
        let cells = self.occupancy.len();
        let indices: Vec<usize> = if step < self.config.warmup_steps {
            (0..cells).collect()
        } else {
            // a quarter uniformly, a quarter from currently occupied cells
            let quarter = (cells / 4).max(1);
            let mut indices: Vec<usize> = (0..quarter).map(|_| self.rng.gen_range(0..cells)).collect();
            let occupied: Vec<usize> = self
                .binary
                .iter()
                .enumerate()
                .filter_map(|(i, &b)| b.then_some(i))
                .collect();
            if !occupied.is_empty() {
                indices.extend((0..quarter).map(|_| occupied[self.rng.gen_range(0..occupied.len())]));
            }
            indices
        };

        let cell = self.cell_size();
        for &i in &indices {
            let jitter = Vec3::new(self.rng.r#gen(), self.rng.r#gen(), self.rng.r#gen());
            let x = self.min + (self.cell_coords(i) + jitter) * cell;
            let occ = occupancy_fn(x);
            self.occupancy[i] = (self.occupancy[i] * self.config.ema_decay).max(occ);
        }

        let mean = self.occupancy.iter().sum::<f32>() / cells as f32;
        let threshold = mean.min(self.config.threshold);
        for (b, &occ) in self.binary.iter_mut().zip(&self.occupancy) {
            *b = occ > threshold;
        }

        debug!(
            "Occupancy refresh at step {}: {} cells evaluated, {:.2}% occupied",
            step,
            indices.len(),
            100.0 * self.occupied_fraction()
        );
    }

    fn cell_coords(&self, index: usize) -> Vec3 {
        let r = self.config.resolution;
        let z = index % r;
        let y = (index / r) % r;
        let x = index / (r * r);
        Vec3::new(x as f32, y as f32, z as f32)
    }

    fn cell_index(&self, p: Vec3) -> Option<usize> {
        if !self.contains(p) {
            return None;
        }
        let r = self.config.resolution;
        let rel = (p - self.min) / (self.max - self.min) * r as f32;
        let clamp = |v: f32| (v as usize).min(r - 1);
        Some((clamp(rel.x) * r + clamp(rel.y)) * r + clamp(rel.z))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_grid() -> OccupancyGrid {
        let config = OccupancyConfig {
            resolution: 8,
            warmup_steps: 4,
            update_interval: 2,
            ..OccupancyConfig::default()
        };
        OccupancyGrid::new(config, 0).unwrap()
    }

    #[test]
    fn test_initially_fully_occupied() {
        let grid = small_grid();
        assert_eq!(grid.occupied_fraction(), 1.0);
        assert!(grid.is_occupied(Vec3::ZERO));
        assert!(!grid.is_occupied(Vec3::splat(2.0)));
    }

    #[test]
    fn test_refresh_marks_sphere_occupied() {
        let mut grid = small_grid();
        // dense inside a sphere of radius 0.8
        let refreshed = grid.update_every_n_steps(0, |p| if p.length() < 0.8 { 1.0 } else { 0.0 });
        assert!(refreshed);
        assert!(grid.is_occupied(Vec3::ZERO));
        assert!(!grid.is_occupied(Vec3::splat(1.3)));
        assert!(grid.occupied_fraction() < 0.5);
    }

    #[test]
    fn test_refresh_cadence() {
        let mut grid = small_grid();
        assert!(!grid.update_every_n_steps(1, |_| 1.0));
        assert!(grid.update_every_n_steps(2, |_| 1.0));
        assert!(grid.update_every_n_steps(6, |_| 1.0));
    }

    #[test]
    fn test_no_refresh_in_eval_mode() {
        let mut grid = small_grid();
        grid.set_mode(Mode::Eval);
        assert!(!grid.update_every_n_steps(0, |_| 0.0));
        assert_eq!(grid.occupied_fraction(), 1.0);
    }

    #[test]
    fn test_ray_intersection() {
        let grid = small_grid();
        let (near, far) = grid.ray_intersection(Vec3::new(0.0, 0.0, 4.0), Vec3::NEG_Z).unwrap();
        assert!((near - 2.5).abs() < 1e-5);
        assert!((far - 5.5).abs() < 1e-5);
        assert!(grid.ray_intersection(Vec3::new(0.0, 0.0, 4.0), Vec3::Z).is_none());
    }

    #[test]
    fn test_zero_resolution_rejected() {
        let config = OccupancyConfig {
            resolution: 0,
            ..OccupancyConfig::default()
        };
        assert!(OccupancyGrid::new(config, 0).is_err());
    }
}
