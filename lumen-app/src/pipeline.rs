//! End-to-end training and rendering runs

use image::DynamicImage;
use lumen_data::{RayDataset, Scene, SelectedViews, Split, View, load_intrinsics, load_scene};
use lumen_train::{
    FanoutSink, FileSink, Frame, MarchingRenderer, MetricsSink, Mode, OccupancyGrid, Record,
    RenderOptions, Representation, TrainConfig, Trainer, TracingSink, VoxelField, checkpoint,
    render_path, spherical_path,
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

type AppResult<T> = Result<T, Box<dyn std::error::Error>>;

const CONFIG_FILE: &str = "config.json";
const MODEL_DIR: &str = "model";
const VIDEO_DIR: &str = "video";

/// Train on `scene_dir` and write everything under a fresh run directory.
pub fn train(scene_dir: &Path, out_dir: &Path, config: &TrainConfig) -> AppResult<()> {
    let mut rng = StdRng::seed_from_u64(config.seed);

    let scene = load_scene(scene_dir, Split::Train, config.background)?;
    let selected = SelectedViews::select(&scene, config.n_imgs, &mut rng)?;
    info!("Selected training views: {:?}", selected.indices());

    let mut dataset = RayDataset::from_selection(&selected, config.sample_mode)?;
    dataset.gaussian_downsample(config.blur_sigma)?;

    let val_scene = match load_scene(scene_dir, Split::Val, config.background) {
        Ok(scene) => Some(scene),
        Err(e) => {
            warn!("No validation split: {}", e);
            None
        }
    };

    let run_dir = create_run_directory(&runs_root(out_dir, scene_dir, config.n_imgs), &run_id())?;
    fs::write(run_dir.join(CONFIG_FILE), serde_json::to_string_pretty(config)?)?;
    info!("Run directory: {}", run_dir.display());

    let mut sink = FanoutSink::new().with(TracingSink).with(FileSink::create(&run_dir)?);
    sink.log(
        &Record::new(0)
            .image("rgb_gt", DynamicImage::ImageRgb32F(selected.preview().image.clone())),
    )?;

    let field = VoxelField::new(config.field_resolution, config.occupancy.half_extent, config.seed)?;
    let mut trainer = Trainer::new(config, field, MarchingRenderer::new(), dataset, Box::new(sink))?
        .with_preview(selected.preview().clone(), selected.intrinsics());

    if config.validation_enabled() {
        if let Some(val) = &val_scene {
            let views = held_out_views(val, config.validation_views(), &mut rng)?;
            trainer = trainer.with_validation_views(views, val.intrinsics());
        }
    }

    let summary = trainer.run()?;
    info!(
        "Trained {} iterations, final loss {:?}",
        summary.iterations, summary.final_loss
    );

    if let Some(val) = &val_scene {
        let views = held_out_views(val, config.final_validation_views, &mut rng)?;
        let metrics = trainer.evaluate_final(&views, &val.intrinsics())?;
        info!(
            "Final validation: PSNR {:.2}, SSIM {:.4}, perceptual {:.4}",
            metrics.psnr, metrics.ssim, metrics.perceptual
        );
    }

    trainer.save_checkpoint(&run_dir.join(MODEL_DIR))?;

    if config.path_frames > 0 {
        let poses = spherical_path(config.path_elevation, config.path_frames, config.path_radius);
        let frames = trainer.render_path(&poses, &scene.intrinsics())?;
        write_frames(&run_dir.join(VIDEO_DIR), &frames)?;
    }
    Ok(())
}

/// Render an orbit from the parameters saved in `run_dir`.
///
/// Only the scene metadata is read; no training images or rays are loaded.
pub fn render(scene_dir: &Path, run_dir: &Path, frames: Option<usize>) -> AppResult<()> {
    let config = TrainConfig::from_json_file(&run_dir.join(CONFIG_FILE))?;
    let intrinsics = load_intrinsics(scene_dir, Split::Train)?;

    let mut field = VoxelField::new(config.field_resolution, config.occupancy.half_extent, config.seed)?;
    checkpoint::load_parameters(&run_dir.join(MODEL_DIR), field.parameters_mut())?;
    let mut grid = OccupancyGrid::new(config.occupancy, config.seed)?;
    let options = RenderOptions::new(Mode::Eval, config.background, config.step_size);

    let count = frames.unwrap_or(config.path_frames);
    let poses = spherical_path(config.path_elevation, count, config.path_radius);
    let frames = render_path(
        &mut MarchingRenderer::new(),
        &mut field,
        &mut grid,
        &poses,
        &intrinsics,
        config.render_chunk(),
        &options,
    )?;
    write_frames(&run_dir.join(VIDEO_DIR), &frames)?;
    Ok(())
}

/// Up to `count` coverage-maximizing views of a held-out split.
fn held_out_views(scene: &Scene, count: usize, rng: &mut StdRng) -> AppResult<Vec<View>> {
    let count = count.min(scene.len());
    if count == 0 {
        return Ok(Vec::new());
    }
    let selected = SelectedViews::select(scene, count, rng)?;
    Ok(selected.views().to_vec())
}

/// `<out>/<scene>/n_imgs_<n>`
fn runs_root(out_dir: &Path, scene_dir: &Path, n_imgs: usize) -> PathBuf {
    let scene_name = scene_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "scene".to_string());
    out_dir.join(scene_name).join(format!("n_imgs_{}", n_imgs))
}

/// Unix seconds at run start.
fn run_id() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
        .to_string()
}

/// Create `<root>/<id>`, or `<root>/<id>_<n>` if a run with that id exists.
fn create_run_directory(root: &Path, id: &str) -> io::Result<PathBuf> {
    fs::create_dir_all(root)?;
    let mut attempt = 0usize;
    loop {
        let name = if attempt == 0 {
            id.to_string()
        } else {
            format!("{}_{}", id, attempt)
        };
        let candidate = root.join(name);
        match fs::create_dir(&candidate) {
            Ok(()) => return Ok(candidate),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
            Err(e) => return Err(e),
        }
    }
}

fn write_frames(dir: &Path, frames: &[Frame]) -> AppResult<()> {
    fs::create_dir_all(dir)?;
    for (i, frame) in frames.iter().enumerate() {
        frame.save_png(&dir.join(format!("rgb_{:03}.png", i)))?;
        if let Some(depth) = frame.depth_image() {
            depth.save(dir.join(format!("depth_{:03}.png", i)))?;
        }
    }
    info!("Wrote {} frames to {}", frames.len(), dir.display());
    Ok(())
}
