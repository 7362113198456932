//! Posed-image scenes
//!
//! A [`Scene`] is the immutable in-memory record produced by the loader:
//! composited images, one camera-to-world pose per image, and shared
//! pinhole intrinsics.

mod loader;

pub use loader::{Split, load_intrinsics, load_scene};

use crate::error::DataError;
use crate::types::{Intrinsics, View};
use glam::{Mat4, Vec3};
use image::Rgb32FImage;

/// Near plane of the synthetic scenes.
pub const SYNTHETIC_NEAR: f32 = 2.0;
/// Far plane of the synthetic scenes.
pub const SYNTHETIC_FAR: f32 = 8.0;

/// Images, poses, and intrinsics of one capture.
#[derive(Debug, Clone)]
pub struct Scene {
    images: Vec<Rgb32FImage>,
    poses: Vec<Mat4>,
    intrinsics: Intrinsics,
    near: f32,
    far: f32,
}

impl Scene {
    /// Build a scene, checking that images and poses line up.
    pub fn new(
        images: Vec<Rgb32FImage>,
        poses: Vec<Mat4>,
        intrinsics: Intrinsics,
    ) -> Result<Self, DataError> {
        intrinsics.validate()?;
        if images.len() != poses.len() {
            return Err(DataError::DataIntegrity(format!(
                "{} images but {} poses",
                images.len(),
                poses.len()
            )));
        }
        for (i, image) in images.iter().enumerate() {
            if image.dimensions() != (intrinsics.width, intrinsics.height) {
                return Err(DataError::DataIntegrity(format!(
                    "image {} is {:?}, expected {}x{}",
                    i,
                    image.dimensions(),
                    intrinsics.width,
                    intrinsics.height
                )));
            }
        }

        Ok(Self {
            images,
            poses,
            intrinsics,
            near: SYNTHETIC_NEAR,
            far: SYNTHETIC_FAR,
        })
    }

    /// Override the near/far bounds of the scene.
    pub fn with_bounds(mut self, near: f32, far: f32) -> Self {
        self.near = near;
        self.far = far;
        self
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn images(&self) -> &[Rgb32FImage] {
        &self.images
    }

    pub fn poses(&self) -> &[Mat4] {
        &self.poses
    }

    pub fn intrinsics(&self) -> Intrinsics {
        self.intrinsics
    }

    pub fn bounds(&self) -> (f32, f32) {
        (self.near, self.far)
    }

    /// Owned copy of view `index`.
    pub fn view(&self, index: usize) -> Option<View> {
        Some(View::new(
            self.images.get(index)?.clone(),
            *self.poses.get(index)?,
        ))
    }

    /// Camera centers, one per view, in scene order.
    pub fn camera_positions(&self) -> Vec<Vec3> {
        self.poses.iter().map(|p| p.w_axis.truncate()).collect()
    }
}
