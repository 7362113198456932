//! Pinhole ray generation and image resampling.
//!
//! Pixel `(x, y)` maps to the camera-space direction
//! `((x - W/2) / f, -(y - H/2) / f, -1)`, rotated into world space by the
//! view's pose. Every pixel of a view shares the pose's translation as origin.

use crate::error::DataError;
use crate::types::{Intrinsics, View};
use glam::{Mat3, Mat4, Vec3};
use image::imageops::{self, FilterType};
use tracing::debug;

/// A single ray paired with the ground-truth color of its pixel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RaySample {
    /// Ray origin in world space.
    pub origin: Vec3,
    /// Unnormalized ray direction in world space.
    pub direction: Vec3,
    /// Target RGB color in `[0, 1]`.
    pub color: Vec3,
}

/// Camera-space direction through pixel `(x, y)`.
pub fn camera_direction(intrinsics: &Intrinsics, x: u32, y: u32) -> Vec3 {
    let half_w = 0.5 * intrinsics.width as f32;
    let half_h = 0.5 * intrinsics.height as f32;
    Vec3::new(
        (x as f32 - half_w) / intrinsics.focal,
        -(y as f32 - half_h) / intrinsics.focal,
        -1.0,
    )
}

/// Origin and row-major per-pixel directions of one view.
pub fn view_rays(intrinsics: &Intrinsics, pose: &Mat4) -> (Vec3, Vec<Vec3>) {
    let rotation = Mat3::from_mat4(*pose);
    let origin = pose.w_axis.truncate();
    let mut directions = Vec::with_capacity(intrinsics.pixel_count());
    for y in 0..intrinsics.height {
        for x in 0..intrinsics.width {
            directions.push(rotation * camera_direction(intrinsics, x, y));
        }
    }
    (origin, directions)
}

/// Flat table of rays: row `r` of every column describes the same pixel.
#[derive(Debug, Clone, Default)]
pub struct RayTable {
    origins: Vec<Vec3>,
    directions: Vec<Vec3>,
    colors: Vec<Vec3>,
}

impl RayTable {
    /// Expand every pixel of every view into a ray.
    ///
    /// This is a pure function of its inputs; callers rebuild rather than
    /// patch the table when the images change.
    pub fn build(views: &[View], intrinsics: &Intrinsics) -> Result<Self, DataError> {
        intrinsics.validate()?;
        let total = views.len() * intrinsics.pixel_count();
        let mut table = Self {
            origins: Vec::with_capacity(total),
            directions: Vec::with_capacity(total),
            colors: Vec::with_capacity(total),
        };

        for (i, view) in views.iter().enumerate() {
            if view.dimensions() != (intrinsics.width, intrinsics.height) {
                return Err(DataError::DataIntegrity(format!(
                    "view {} is {:?}, intrinsics expect {}x{}",
                    i,
                    view.dimensions(),
                    intrinsics.width,
                    intrinsics.height
                )));
            }
            let (origin, directions) = view_rays(intrinsics, &view.pose);
            table
                .origins
                .extend(std::iter::repeat_n(origin, directions.len()));
            table.directions.extend(directions);
            table.colors.extend(view.colors());
        }

        debug!("Built ray table: {} rays from {} views", total, views.len());
        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<RaySample> {
        Some(RaySample {
            origin: *self.origins.get(index)?,
            direction: *self.directions.get(index)?,
            color: *self.colors.get(index)?,
        })
    }

    pub fn origins(&self) -> &[Vec3] {
        &self.origins
    }

    pub fn directions(&self) -> &[Vec3] {
        &self.directions
    }

    pub fn colors(&self) -> &[Vec3] {
        &self.colors
    }
}

/// Isotropic Gaussian blur with standard deviation `sigma` pixels.
pub fn gaussian_blur(views: &[View], sigma: f32) -> Vec<View> {
    views
        .iter()
        .map(|v| View::new(imageops::blur(&v.image, sigma), v.pose))
        .collect()
}

/// Downsample views by an integer factor, keeping intrinsics consistent.
pub fn resize_views(views: &[View], intrinsics: &Intrinsics, factor: u32) -> (Vec<View>, Intrinsics) {
    let resized = intrinsics.downsampled(factor);
    if resized == *intrinsics {
        return (views.to_vec(), resized);
    }
    let views = views
        .iter()
        .map(|v| {
            View::new(
                imageops::resize(&v.image, resized.width, resized.height, FilterType::Triangle),
                v.pose,
            )
        })
        .collect();
    (views, resized)
}
