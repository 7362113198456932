//! Core data types for posed views and pinhole intrinsics.
//!
//! Images are stored as linear `Rgb32FImage` buffers in the `[0, 1]` range,
//! already composited against the scene's background policy.

use crate::error::DataError;
use glam::{Mat4, Vec3};
use image::{Rgb, Rgb32FImage};
use serde::{Deserialize, Serialize};

/// Pinhole camera intrinsics shared by every view of a scene.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    /// Image height in pixels.
    pub height: u32,
    /// Image width in pixels.
    pub width: u32,
    /// Focal length in pixels. The principal point is the image center.
    pub focal: f32,
}

impl Intrinsics {
    /// Create intrinsics from an explicit focal length.
    pub fn new(height: u32, width: u32, focal: f32) -> Self {
        Self {
            height,
            width,
            focal,
        }
    }

    /// Create intrinsics from a horizontal field of view (radians).
    pub fn from_fov(height: u32, width: u32, fov_x: f32) -> Result<Self, DataError> {
        if !fov_x.is_finite() || fov_x <= 0.0 || fov_x >= std::f32::consts::PI {
            return Err(DataError::InvalidArgument(format!(
                "horizontal field of view must lie in (0, pi), got {fov_x}"
            )));
        }
        let focal = 0.5 * width as f32 / (0.5 * fov_x).tan();
        let intrinsics = Self::new(height, width, focal);
        intrinsics.validate()?;
        Ok(intrinsics)
    }

    /// Check that the intrinsics describe a non-degenerate camera.
    pub fn validate(&self) -> Result<(), DataError> {
        if self.height == 0 || self.width == 0 {
            return Err(DataError::InvalidArgument(format!(
                "image size must be non-zero, got {}x{}",
                self.width, self.height
            )));
        }
        if !self.focal.is_finite() || self.focal <= 0.0 {
            return Err(DataError::InvalidArgument(format!(
                "focal length must be positive, got {}",
                self.focal
            )));
        }
        Ok(())
    }

    /// Number of pixels (and therefore rays) per view.
    pub fn pixel_count(&self) -> usize {
        self.height as usize * self.width as usize
    }

    /// Intrinsics after an integer downsample of the image grid.
    pub fn downsampled(&self, factor: u32) -> Self {
        let factor = factor.max(1);
        Self {
            height: (self.height / factor).max(1),
            width: (self.width / factor).max(1),
            focal: self.focal / factor as f32,
        }
    }
}

/// How transparent pixels are resolved when images are loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Background {
    /// Composite RGBA against white: `rgb * a + (1 - a)`.
    #[default]
    White,
    /// Drop the alpha channel; the renderer composes against black.
    Transparent,
}

impl Background {
    /// Color the renderer composites behind the accumulated radiance.
    pub fn color(&self) -> Vec3 {
        match self {
            Background::White => Vec3::ONE,
            Background::Transparent => Vec3::ZERO,
        }
    }

    /// Resolve one RGBA pixel to RGB.
    pub fn composite(&self, rgba: [f32; 4]) -> [f32; 3] {
        let [r, g, b, a] = rgba;
        match self {
            Background::White => [r * a + (1.0 - a), g * a + (1.0 - a), b * a + (1.0 - a)],
            Background::Transparent => [r, g, b],
        }
    }
}

/// A posed RGB view: one image and its camera-to-world transform.
#[derive(Debug, Clone)]
pub struct View {
    /// RGB image data in `[0, 1]`.
    pub image: Rgb32FImage,
    /// Rigid camera-to-world transform.
    pub pose: Mat4,
}

impl View {
    pub fn new(image: Rgb32FImage, pose: Mat4) -> Self {
        Self { image, pose }
    }

    /// Camera center in world space (translation column of the pose).
    pub fn position(&self) -> Vec3 {
        self.pose.w_axis.truncate()
    }

    /// Get image dimensions (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// Pixel color at column `x`, row `y`.
    pub fn pixel(&self, x: u32, y: u32) -> Vec3 {
        let Rgb([r, g, b]) = *self.image.get_pixel(x, y);
        Vec3::new(r, g, b)
    }

    /// Flattened row-major pixel colors.
    pub fn colors(&self) -> Vec<Vec3> {
        self.image
            .pixels()
            .map(|Rgb([r, g, b])| Vec3::new(*r, *g, *b))
            .collect()
    }
}
