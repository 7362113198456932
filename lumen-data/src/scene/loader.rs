//! Synthetic-scene loading functions
//!
//! Reads the `transforms_{split}.json` layout: a horizontal field of view
//! plus, per frame, an image path and a row-major camera-to-world matrix.

use crate::error::DataError;
use crate::scene::Scene;
use crate::types::{Background, Intrinsics};
use glam::Mat4;
use image::{ImageBuffer, Rgb};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Dataset split of a synthetic scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Train,
    Val,
    Test,
}

impl Split {
    pub fn name(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Val => "val",
            Split::Test => "test",
        }
    }

    /// Metadata file for this split inside a scene directory.
    pub fn metadata_path(&self, root: &Path) -> PathBuf {
        root.join(format!("transforms_{}.json", self.name()))
    }
}

// transforms_*.json structure
#[derive(Deserialize, Debug)]
struct TransformsFile {
    camera_angle_x: f32,
    frames: Vec<FrameRecord>,
}

#[derive(Deserialize, Debug)]
struct FrameRecord {
    file_path: String,
    transform_matrix: [[f32; 4]; 4],
}

/// Load every frame of one split, compositing alpha against `background`.
///
/// Fails without returning a partial scene if any frame is unreadable or
/// has a different size than the first one.
#[tracing::instrument(skip_all, fields(root = %root.display(), split = split.name()))]
pub fn load_scene(root: &Path, split: Split, background: Background) -> Result<Scene, DataError> {
    let meta = read_metadata(root, split)?;

    let mut images = Vec::with_capacity(meta.frames.len());
    let mut poses = Vec::with_capacity(meta.frames.len());
    for frame in &meta.frames {
        // matrices are stored row-major
        poses.push(Mat4::from_cols_array_2d(&frame.transform_matrix).transpose());

        let path = frame_image_path(root, &frame.file_path);
        let rgba = image::open(&path)?.to_rgba32f();
        let rgb = ImageBuffer::from_fn(rgba.width(), rgba.height(), |x, y| {
            Rgb(background.composite(rgba.get_pixel(x, y).0))
        });
        images.push(rgb);
    }

    let (width, height) = images[0].dimensions();
    let intrinsics = Intrinsics::from_fov(height, width, meta.camera_angle_x)?;

    info!(
        "Scene loaded: {} frames, {}x{}, focal {:.2}",
        images.len(),
        width,
        height,
        intrinsics.focal
    );

    Scene::new(images, poses, intrinsics)
}

/// Camera intrinsics of a split, read from its metadata and the header of
/// its first image; no pixel data is decoded.
pub fn load_intrinsics(root: &Path, split: Split) -> Result<Intrinsics, DataError> {
    let meta = read_metadata(root, split)?;
    let first = &meta.frames[0];
    let (width, height) = image::image_dimensions(frame_image_path(root, &first.file_path))?;
    Intrinsics::from_fov(height, width, meta.camera_angle_x)
}

fn read_metadata(root: &Path, split: Split) -> Result<TransformsFile, DataError> {
    let metadata_path = split.metadata_path(root);
    debug!("Loading scene metadata from: {}", metadata_path.display());
    let reader = BufReader::new(File::open(&metadata_path)?);
    let meta: TransformsFile = serde_json::from_reader(reader)?;

    if meta.frames.is_empty() {
        return Err(DataError::DataIntegrity(format!(
            "{} lists no frames",
            metadata_path.display()
        )));
    }
    Ok(meta)
}

/// Frame paths omit the `.png` extension in the synthetic layout.
fn frame_image_path(root: &Path, file_path: &str) -> PathBuf {
    let path = root.join(file_path);
    if path.extension().is_some() {
        path
    } else {
        path.with_extension("png")
    }
}
