//! Scene on disk -> view selection -> rays -> training -> validation

use glam::Vec3;
use image::{Rgba, RgbaImage};
use lumen_data::{Background, RayDataset, SampleMode, SelectedViews, Split, load_scene};
use lumen_train::{
    MemorySink, OccupancyConfig, OccupancyGrid, Parameter, RenderError, RenderGradients,
    RenderOptions, RenderOutput, Renderer, Representation, TrainConfig, Trainer,
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde_json::json;
use std::collections::HashSet;
use std::path::Path;

const SIZE: u32 = 12;

/// Two parameters: color = w * dir.z + b, view independent otherwise.
struct Linear {
    params: Vec<Parameter>,
}

impl Linear {
    fn new(w: f32, b: f32) -> Self {
        Self {
            params: vec![
                Parameter::new("w", vec![1], vec![w]),
                Parameter::new("b", vec![1], vec![b]),
            ],
        }
    }
}

impl Representation for Linear {
    fn density_and_color(&self, _point: Vec3, direction: Vec3) -> (f32, Vec3) {
        let w = self.params[0].value()[0];
        let b = self.params[1].value()[0];
        (0.0, Vec3::splat(w * direction.z + b))
    }

    fn backward(&mut self, _point: Vec3, direction: Vec3, _grad_density: f32, grad_color: Vec3) {
        let g = grad_color.element_sum();
        self.params[0].grad_mut()[0] += g * direction.z;
        self.params[1].grad_mut()[0] += g;
    }

    fn parameters(&self) -> &[Parameter] {
        &self.params
    }

    fn parameters_mut(&mut self) -> &mut [Parameter] {
        &mut self.params
    }
}

/// Reads one color per ray straight from the model.
#[derive(Default)]
struct Direct {
    directions: Vec<Vec3>,
}

impl Renderer<Linear> for Direct {
    fn render(
        &mut self,
        origins: &[Vec3],
        directions: &[Vec3],
        _grid: &OccupancyGrid,
        model: &Linear,
        _options: &RenderOptions,
    ) -> Result<RenderOutput, RenderError> {
        let normalized: Vec<Vec3> = directions.iter().map(|d| d.normalize()).collect();
        let colors = origins
            .iter()
            .zip(&normalized)
            .map(|(o, d)| model.density_and_color(*o, *d).1)
            .collect();
        self.directions = normalized;
        Ok(RenderOutput {
            colors,
            ..RenderOutput::default()
        })
    }

    fn backward(&mut self, model: &mut Linear, grads: &RenderGradients) -> Result<(), RenderError> {
        for (d, g) in self.directions.iter().zip(&grads.colors) {
            model.backward(Vec3::ZERO, *d, 0.0, *g);
        }
        Ok(())
    }
}

fn write_split(root: &Path, split: &str, positions: &[Vec3]) {
    std::fs::create_dir_all(root.join(split)).unwrap();
    let frames: Vec<_> = positions
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let image = RgbaImage::from_pixel(SIZE, SIZE, Rgba([128, 128, 128, 255]));
            image.save(root.join(format!("{split}/r_{i}.png"))).unwrap();
            json!({
                "file_path": format!("./{split}/r_{i}"),
                "transform_matrix": [
                    [1.0, 0.0, 0.0, p.x],
                    [0.0, 1.0, 0.0, p.y],
                    [0.0, 0.0, 1.0, p.z],
                    [0.0, 0.0, 0.0, 1.0]
                ]
            })
        })
        .collect();
    let meta = json!({ "camera_angle_x": 0.69, "frames": frames });
    std::fs::write(
        root.join(format!("transforms_{split}.json")),
        serde_json::to_string(&meta).unwrap(),
    )
    .unwrap();
}

fn write_scene(root: &Path) {
    // two rings of four cameras
    let train: Vec<Vec3> = (0..8)
        .map(|i| {
            let angle = i as f32 * std::f32::consts::FRAC_PI_2;
            let height = if i < 4 { 1.0 } else { 3.0 };
            Vec3::new(4.0 * angle.cos(), 4.0 * angle.sin(), height)
        })
        .collect();
    write_split(root, "train", &train);
    write_split(root, "val", &[Vec3::new(0.0, -4.0, 2.0), Vec3::new(4.0, 0.0, 2.0)]);
}

fn config() -> TrainConfig {
    TrainConfig {
        n_imgs: 4,
        iterations: 10,
        batch_size: 64,
        learning_rate: 0.01,
        no_validation: true,
        occupancy: OccupancyConfig {
            resolution: 8,
            ..OccupancyConfig::default()
        },
        ..TrainConfig::default()
    }
}

#[test]
fn test_end_to_end_training_and_validation() {
    let dir = tempfile::tempdir().unwrap();
    write_scene(dir.path());
    let config = config();

    let scene = load_scene(dir.path(), Split::Train, Background::White).unwrap();
    assert_eq!(scene.len(), 8);

    let mut rng = StdRng::seed_from_u64(config.seed);
    let selected = SelectedViews::select(&scene, config.n_imgs, &mut rng).unwrap();
    let unique: HashSet<usize> = selected.indices().iter().copied().collect();
    assert_eq!(unique.len(), 4);

    let dataset = RayDataset::from_selection(&selected, SampleMode::Rays).unwrap();
    assert_eq!(dataset.len(), 4 * (SIZE * SIZE) as usize);

    let mut trainer = Trainer::new(
        &config,
        Linear::new(0.3, 0.1),
        Direct::default(),
        dataset,
        Box::new(MemorySink::default()),
    )
    .unwrap();

    let losses: Vec<f32> = (0..10).map(|_| trainer.train_step().unwrap().photometric).collect();
    let decreasing = losses.windows(2).filter(|w| w[1] < w[0]).count();
    assert!(decreasing >= 7, "losses: {:?}", losses);

    let val = load_scene(dir.path(), Split::Val, Background::White).unwrap();
    let held_out = SelectedViews::all(&val).unwrap();
    assert_eq!(held_out.len(), 2);
    let metrics = trainer
        .evaluate_final(held_out.views(), &held_out.intrinsics())
        .unwrap();
    assert!(metrics.psnr.is_finite());
    assert!(metrics.psnr >= 0.0);
    assert!(metrics.ssim.is_finite());
}

#[test]
fn test_epoch_wraparound_visits_every_ray() {
    let dir = tempfile::tempdir().unwrap();
    write_scene(dir.path());
    let scene = load_scene(dir.path(), Split::Train, Background::White).unwrap();
    let selected = SelectedViews::all(&scene).unwrap();
    let dataset = RayDataset::from_selection(&selected, SampleMode::Rays).unwrap();

    let mut sampler = lumen_data::BatchSampler::new(dataset.len(), 1, 7).unwrap();
    let mut visits = vec![0usize; dataset.len()];
    for _ in 0..2 * dataset.len() {
        for i in sampler.next_indices() {
            visits[i] += 1;
        }
    }
    assert!(visits.iter().all(|&v| v == 2));
    assert_eq!(sampler.epoch(), 1);
}
