//! Full-frame rendering and novel-view camera paths

use crate::error::{RenderError, TrainError};
use crate::model::{Mode, RenderOptions, Renderer, Representation};
use crate::occupancy::OccupancyGrid;
use glam::{Mat4, Vec3};
use image::{DynamicImage, GrayImage, Luma, Rgb, Rgb32FImage};
use lumen_data::Intrinsics;
use lumen_data::rays::view_rays;
use std::path::Path;
use tracing::info;

/// A rendered view: color plus expected termination depth.
#[derive(Debug, Clone)]
pub struct Frame {
    pub rgb: Rgb32FImage,
    /// Row-major depth per pixel, when the renderer reports it.
    pub depth: Option<Vec<f32>>,
}

impl Frame {
    /// Depth normalized to its maximum as an 8-bit grayscale image.
    pub fn depth_image(&self) -> Option<GrayImage> {
        let depth = self.depth.as_ref()?;
        let (width, height) = self.rgb.dimensions();
        let max = depth.iter().copied().fold(0.0f32, f32::max);
        let scale = if max > 0.0 { 255.0 / max } else { 0.0 };
        Some(GrayImage::from_fn(width, height, |x, y| {
            let d = depth[(y * width + x) as usize];
            Luma([(d * scale).clamp(0.0, 255.0) as u8])
        }))
    }

    pub fn save_png(&self, path: &Path) -> Result<(), TrainError> {
        DynamicImage::ImageRgb32F(self.rgb.clone()).to_rgb8().save(path)?;
        Ok(())
    }
}

/// Render one camera in chunks of `chunk` rays, in evaluation mode.
pub fn render_frame<R, E>(
    renderer: &mut E,
    model: &R,
    grid: &OccupancyGrid,
    intrinsics: &Intrinsics,
    pose: &Mat4,
    chunk: usize,
    options: &RenderOptions,
) -> Result<Frame, TrainError>
where
    R: Representation,
    E: Renderer<R>,
{
    if chunk == 0 {
        return Err(TrainError::InvalidArgument("render chunk must be positive".into()));
    }
    intrinsics.validate()?;

    let options = options.with_mode(Mode::Eval);
    let (origin, directions) = view_rays(intrinsics, pose);
    let mut colors = Vec::with_capacity(directions.len());
    let mut depth = Some(Vec::with_capacity(directions.len()));

    for batch in directions.chunks(chunk) {
        let origins = vec![origin; batch.len()];
        let output = renderer.render(&origins, batch, grid, model, &options)?;
        if output.colors.len() != batch.len() {
            return Err(RenderError::Failed(format!(
                "{} colors for {} rays",
                output.colors.len(),
                batch.len()
            ))
            .into());
        }
        if let Some(d) = &output.depths {
            if d.len() != batch.len() {
                return Err(RenderError::Failed(format!("{} depths for {} rays", d.len(), batch.len())).into());
            }
        }
        colors.extend(output.colors);
        depth = match (depth, output.depths) {
            (Some(mut acc), Some(d)) => {
                acc.extend(d);
                Some(acc)
            }
            _ => None,
        };
    }

    let width = intrinsics.width;
    let rgb = Rgb32FImage::from_fn(width, intrinsics.height, |x, y| {
        let c = colors[(y * width + x) as usize];
        Rgb([c.x, c.y, c.z])
    });
    Ok(Frame { rgb, depth })
}

/// Render every pose in `poses`, leaving the model and grid in evaluation mode.
///
/// Needs no training data; used for render-only runs from saved parameters.
pub fn render_path<R, E>(
    renderer: &mut E,
    model: &mut R,
    grid: &mut OccupancyGrid,
    poses: &[Mat4],
    intrinsics: &Intrinsics,
    chunk: usize,
    options: &RenderOptions,
) -> Result<Vec<Frame>, TrainError>
where
    R: Representation,
    E: Renderer<R>,
{
    model.set_mode(Mode::Eval);
    grid.set_mode(Mode::Eval);
    let frames = poses
        .iter()
        .map(|pose| render_frame(renderer, model, grid, intrinsics, pose, chunk, options))
        .collect::<Result<Vec<_>, _>>()?;
    info!("Rendered {} path frames", frames.len());
    Ok(frames)
}

/// Camera-to-world poses orbiting the origin at a fixed elevation.
///
/// Azimuth sweeps `[-180, 180)` degrees in `frames` steps; every camera sits
/// at distance `radius` and looks at the origin with `+z` up.
pub fn spherical_path(elevation_deg: f32, frames: usize, radius: f32) -> Vec<Mat4> {
    // swaps y/z and mirrors x so the orbit is z-up
    let axes = Mat4::from_cols_array_2d(&[
        [-1.0, 0.0, 0.0, 0.0],
        [0.0, 0.0, 1.0, 0.0],
        [0.0, 1.0, 0.0, 0.0],
        [0.0, 0.0, 0.0, 1.0],
    ]);
    let phi = (-elevation_deg).to_radians();
    (0..frames)
        .map(|i| {
            let theta = (-180.0 + 360.0 * i as f32 / frames as f32).to_radians();
            axes * Mat4::from_rotation_y(-theta)
                * Mat4::from_rotation_x(phi)
                * Mat4::from_translation(Vec3::new(0.0, 0.0, radius))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Parameter, RenderGradients, RenderOutput};
    use lumen_data::Background;

    /// Colors each ray by the x component of its direction.
    struct DirectionShader;

    struct Nothing;

    impl Representation for Nothing {
        fn density_and_color(&self, _: Vec3, _: Vec3) -> (f32, Vec3) {
            (0.0, Vec3::ZERO)
        }
        fn backward(&mut self, _: Vec3, _: Vec3, _: f32, _: Vec3) {}
        fn parameters(&self) -> &[Parameter] {
            &[]
        }
        fn parameters_mut(&mut self) -> &mut [Parameter] {
            &mut []
        }
    }

    impl Renderer<Nothing> for DirectionShader {
        fn render(
            &mut self,
            _origins: &[Vec3],
            directions: &[Vec3],
            _grid: &OccupancyGrid,
            _model: &Nothing,
            options: &RenderOptions,
        ) -> Result<RenderOutput, RenderError> {
            assert_eq!(options.mode, Mode::Eval);
            Ok(RenderOutput {
                colors: directions.iter().map(|d| Vec3::splat(d.x)).collect(),
                depths: Some(vec![1.0; directions.len()]),
                ..RenderOutput::default()
            })
        }

        fn backward(&mut self, _: &mut Nothing, _: &RenderGradients) -> Result<(), RenderError> {
            Ok(())
        }
    }

    #[test]
    fn test_chunking_preserves_pixel_order() {
        let grid = OccupancyGrid::new(Default::default(), 0).unwrap();
        let intrinsics = Intrinsics::new(3, 5, 2.0);
        let options = RenderOptions::new(Mode::Train, Background::White, 0.01);
        let whole = render_frame(&mut DirectionShader, &Nothing, &grid, &intrinsics, &Mat4::IDENTITY, 1024, &options).unwrap();
        let chunked = render_frame(&mut DirectionShader, &Nothing, &grid, &intrinsics, &Mat4::IDENTITY, 4, &options).unwrap();
        assert_eq!(whole.rgb, chunked.rgb);
        // pixel x = 4 is right of center
        assert!(whole.rgb.get_pixel(4, 0).0[0] > 0.0);
        assert!(whole.rgb.get_pixel(0, 0).0[0] < 0.0);
        assert_eq!(chunked.depth.map(|d| d.len()), Some(15));
    }

    /// Reports one depth fewer than it has rays.
    struct ShortDepth;

    impl Renderer<Nothing> for ShortDepth {
        fn render(
            &mut self,
            _origins: &[Vec3],
            directions: &[Vec3],
            _grid: &OccupancyGrid,
            _model: &Nothing,
            _options: &RenderOptions,
        ) -> Result<RenderOutput, RenderError> {
            Ok(RenderOutput {
                colors: vec![Vec3::ONE; directions.len()],
                depths: Some(vec![1.0; directions.len().saturating_sub(1)]),
                ..RenderOutput::default()
            })
        }

        fn backward(&mut self, _: &mut Nothing, _: &RenderGradients) -> Result<(), RenderError> {
            Ok(())
        }
    }

    #[test]
    fn test_short_depth_is_render_error() {
        let grid = OccupancyGrid::new(Default::default(), 0).unwrap();
        let options = RenderOptions::new(Mode::Eval, Background::White, 0.01);
        let result = render_frame(&mut ShortDepth, &Nothing, &grid, &Intrinsics::new(3, 3, 1.0), &Mat4::IDENTITY, 4, &options);
        assert!(matches!(result, Err(TrainError::Render(RenderError::Failed(_)))));
    }

    #[test]
    fn test_zero_chunk_rejected() {
        let grid = OccupancyGrid::new(Default::default(), 0).unwrap();
        let options = RenderOptions::new(Mode::Eval, Background::White, 0.01);
        let result = render_frame(&mut DirectionShader, &Nothing, &grid, &Intrinsics::new(2, 2, 1.0), &Mat4::IDENTITY, 0, &options);
        assert!(result.is_err());
    }

    #[test]
    fn test_render_path_without_dataset() {
        let mut grid = OccupancyGrid::new(Default::default(), 0).unwrap();
        let options = RenderOptions::new(Mode::Train, Background::White, 0.01);
        let poses = spherical_path(30.0, 3, 4.0);
        let frames = render_path(
            &mut DirectionShader,
            &mut Nothing,
            &mut grid,
            &poses,
            &Intrinsics::new(2, 3, 1.0),
            4,
            &options,
        )
        .unwrap();
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|f| f.rgb.dimensions() == (3, 2)));
        assert_eq!(grid.mode(), Mode::Eval);
    }

    #[test]
    fn test_spherical_path_looks_at_origin() {
        let poses = spherical_path(30.0, 8, 4.0);
        assert_eq!(poses.len(), 8);
        for pose in &poses {
            let position = pose.w_axis.truncate();
            assert!((position.length() - 4.0).abs() < 1e-4);
            let forward = pose.transform_vector3(Vec3::NEG_Z);
            assert!(forward.normalize().dot(-position.normalize()) > 0.999);
            // 30 degrees above the xy-plane
            assert!((position.z - 2.0).abs() < 1e-3);
        }
    }
}
