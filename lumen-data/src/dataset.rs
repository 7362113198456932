//! Ray datasets and batch sampling
//!
//! - [`SelectedViews`]: the curated training views plus a preview view
//! - [`RayDataset`]: random-access rays (ray mode) or whole views (image mode)
//! - [`BatchSampler`]: shuffled batch order with transparent epoch wraparound

use crate::error::DataError;
use crate::rays::{self, RaySample, RayTable};
use crate::scene::Scene;
use crate::selection::select_views;
use crate::types::{Intrinsics, View};
use glam::Vec3;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Whether a dataset is indexed per ray or per view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleMode {
    #[default]
    Rays,
    Images,
}

/// A bounded, spatially diverse subset of a scene's views.
#[derive(Debug, Clone)]
pub struct SelectedViews {
    views: Vec<View>,
    indices: Vec<usize>,
    preview: View,
    intrinsics: Intrinsics,
}

impl SelectedViews {
    /// Draw the preview view uniformly from the whole scene, then pick
    /// `n_imgs` coverage-maximizing views.
    pub fn select<R: Rng + ?Sized>(
        scene: &Scene,
        n_imgs: usize,
        rng: &mut R,
    ) -> Result<Self, DataError> {
        if n_imgs == 0 || n_imgs > scene.len() {
            return Err(DataError::InvalidArgument(format!(
                "cannot select {} of {} views",
                n_imgs,
                scene.len()
            )));
        }

        let preview_index = rng.gen_range(0..scene.len());
        let preview = scene
            .view(preview_index)
            .ok_or_else(|| DataError::DataIntegrity("preview view out of range".into()))?;

        let indices = select_views(&scene.camera_positions(), n_imgs, rng)?;
        let views = indices
            .iter()
            .map(|&i| {
                scene
                    .view(i)
                    .ok_or_else(|| DataError::DataIntegrity(format!("view {i} out of range")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        info!(
            "Selected {} of {} views (preview: view {})",
            views.len(),
            scene.len(),
            preview_index
        );

        Ok(Self {
            views,
            indices,
            preview,
            intrinsics: scene.intrinsics(),
        })
    }

    /// Every view of the scene, in order, with the first as preview.
    pub fn all(scene: &Scene) -> Result<Self, DataError> {
        let views: Vec<View> = (0..scene.len()).filter_map(|i| scene.view(i)).collect();
        let preview = views
            .first()
            .cloned()
            .ok_or_else(|| DataError::InvalidArgument("scene has no views".into()))?;
        Ok(Self {
            indices: (0..views.len()).collect(),
            views,
            preview,
            intrinsics: scene.intrinsics(),
        })
    }

    pub fn views(&self) -> &[View] {
        &self.views
    }

    /// Scene indices of the selected views.
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn preview(&self) -> &View {
        &self.preview
    }

    pub fn intrinsics(&self) -> Intrinsics {
        self.intrinsics
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }
}

/// One dataset entry.
#[derive(Debug, Clone, Copy)]
pub enum DatasetItem<'a> {
    Ray(RaySample),
    View(&'a View),
}

/// Indexable container over training rays or whole views.
#[derive(Debug, Clone)]
pub struct RayDataset {
    source: Vec<View>,
    source_intrinsics: Intrinsics,
    views: Vec<View>,
    intrinsics: Intrinsics,
    mode: SampleMode,
    table: RayTable,
}

impl RayDataset {
    pub fn new(views: Vec<View>, intrinsics: Intrinsics, mode: SampleMode) -> Result<Self, DataError> {
        let table = match mode {
            SampleMode::Rays => RayTable::build(&views, &intrinsics)?,
            SampleMode::Images => RayTable::default(),
        };
        Ok(Self {
            source: views.clone(),
            source_intrinsics: intrinsics,
            views,
            intrinsics,
            mode,
            table,
        })
    }

    pub fn from_selection(selection: &SelectedViews, mode: SampleMode) -> Result<Self, DataError> {
        Self::new(selection.views().to_vec(), selection.intrinsics(), mode)
    }

    /// `n_views * H * W` in ray mode, `n_views` in image mode.
    pub fn len(&self) -> usize {
        match self.mode {
            SampleMode::Rays => self.table.len(),
            SampleMode::Images => self.views.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<DatasetItem<'_>> {
        match self.mode {
            SampleMode::Rays => self.table.get(index).map(DatasetItem::Ray),
            SampleMode::Images => self.views.get(index).map(DatasetItem::View),
        }
    }

    pub fn mode(&self) -> SampleMode {
        self.mode
    }

    pub fn views(&self) -> &[View] {
        &self.views
    }

    /// Intrinsics of the current (possibly resampled) images.
    pub fn intrinsics(&self) -> Intrinsics {
        self.intrinsics
    }

    pub fn table(&self) -> &RayTable {
        &self.table
    }

    /// Blur the source images with standard deviation `t` and rebuild the rays.
    ///
    /// Always starts from the full-resolution source views, so a
    /// coarse-to-fine curriculum can call this with decreasing `t`.
    /// `t == 0` leaves the dataset untouched.
    pub fn gaussian_downsample(&mut self, t: u32) -> Result<(), DataError> {
        if t == 0 {
            return Ok(());
        }
        let blurred = rays::gaussian_blur(&self.source, t as f32);
        let (views, intrinsics) = rays::resize_views(&blurred, &self.source_intrinsics, 1);
        self.rebuild(views, intrinsics)?;
        debug!("Gaussian downsample: sigma {}", t);
        Ok(())
    }

    /// Resize the source images by an integer factor and rebuild the rays.
    pub fn downsample(&mut self, factor: u32) -> Result<(), DataError> {
        if factor == 0 {
            return Err(DataError::InvalidArgument("downsample factor must be positive".into()));
        }
        let (views, intrinsics) = rays::resize_views(&self.source, &self.source_intrinsics, factor);
        self.rebuild(views, intrinsics)
    }

    fn rebuild(&mut self, views: Vec<View>, intrinsics: Intrinsics) -> Result<(), DataError> {
        self.table = match self.mode {
            SampleMode::Rays => RayTable::build(&views, &intrinsics)?,
            SampleMode::Images => RayTable::default(),
        };
        self.views = views;
        self.intrinsics = intrinsics;
        Ok(())
    }

    /// Gather a batch; image-mode views expand into all of their rays.
    pub fn batch(&self, indices: &[usize]) -> Result<RayBatch, DataError> {
        let mut batch = RayBatch::default();
        for &index in indices {
            match self.get(index) {
                Some(DatasetItem::Ray(sample)) => batch.push(sample),
                Some(DatasetItem::View(view)) => batch.push_view(view, &self.intrinsics),
                None => {
                    return Err(DataError::InvalidArgument(format!(
                        "index {} out of range for dataset of {}",
                        index,
                        self.len()
                    )));
                }
            }
        }
        Ok(batch)
    }
}

/// Structure-of-arrays batch of rays with target colors.
#[derive(Debug, Clone, Default)]
pub struct RayBatch {
    pub origins: Vec<Vec3>,
    pub directions: Vec<Vec3>,
    pub colors: Vec<Vec3>,
}

impl RayBatch {
    pub fn push(&mut self, sample: RaySample) {
        self.origins.push(sample.origin);
        self.directions.push(sample.direction);
        self.colors.push(sample.color);
    }

    pub fn push_view(&mut self, view: &View, intrinsics: &Intrinsics) {
        let (origin, directions) = rays::view_rays(intrinsics, &view.pose);
        self.origins
            .extend(std::iter::repeat_n(origin, directions.len()));
        self.directions.extend(directions);
        self.colors.extend(view.colors());
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }
}

/// Shuffled, epoch-wrapping index source.
///
/// A batch never spans two shuffles: the last batch of an epoch may be
/// short, and the next call reshuffles and starts over.
#[derive(Debug, Clone)]
pub struct BatchSampler {
    order: Vec<usize>,
    cursor: usize,
    batch_size: usize,
    epoch: usize,
    rng: StdRng,
}

impl BatchSampler {
    pub fn new(len: usize, batch_size: usize, seed: u64) -> Result<Self, DataError> {
        if len == 0 {
            return Err(DataError::InvalidArgument("cannot sample from an empty dataset".into()));
        }
        if batch_size == 0 {
            return Err(DataError::InvalidArgument("batch size must be positive".into()));
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let mut order: Vec<usize> = (0..len).collect();
        order.shuffle(&mut rng);
        Ok(Self {
            order,
            cursor: 0,
            batch_size,
            epoch: 0,
            rng,
        })
    }

    /// Indices of the next batch.
    pub fn next_indices(&mut self) -> Vec<usize> {
        if self.cursor >= self.order.len() {
            self.order.shuffle(&mut self.rng);
            self.cursor = 0;
            self.epoch += 1;
            debug!("Dataset reshuffled (epoch {})", self.epoch);
        }
        let end = (self.cursor + self.batch_size).min(self.order.len());
        let indices = self.order[self.cursor..end].to_vec();
        self.cursor = end;
        indices
    }

    /// Next batch of rays drawn from `dataset`.
    pub fn next_batch(&mut self, dataset: &RayDataset) -> Result<RayBatch, DataError> {
        if dataset.len() != self.order.len() {
            return Err(DataError::DataIntegrity(format!(
                "sampler covers {} items but dataset has {}",
                self.order.len(),
                dataset.len()
            )));
        }
        let indices = self.next_indices();
        dataset.batch(&indices)
    }

    /// Completed reshuffles so far.
    pub fn epoch(&self) -> usize {
        self.epoch
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Mat4;
    use image::{Rgb, Rgb32FImage};

    fn views(n: usize, width: u32, height: u32) -> Vec<View> {
        (0..n)
            .map(|i| {
                View::new(
                    Rgb32FImage::from_pixel(width, height, Rgb([i as f32 / n as f32, 0.5, 0.5])),
                    Mat4::from_translation(Vec3::new(i as f32, 0.0, 4.0)),
                )
            })
            .collect()
    }

    fn scene(n: usize) -> Scene {
        let vs = views(n, 4, 3);
        Scene::new(
            vs.iter().map(|v| v.image.clone()).collect(),
            vs.iter().map(|v| v.pose).collect(),
            Intrinsics::new(3, 4, 2.0),
        )
        .unwrap()
    }

    #[test]
    fn test_dataset_length_by_mode() {
        let intrinsics = Intrinsics::new(3, 4, 2.0);
        let rays = RayDataset::new(views(5, 4, 3), intrinsics, SampleMode::Rays).unwrap();
        assert_eq!(rays.len(), 5 * 3 * 4);
        let images = RayDataset::new(views(5, 4, 3), intrinsics, SampleMode::Images).unwrap();
        assert_eq!(images.len(), 5);
        assert!(matches!(images.get(4), Some(DatasetItem::View(_))));
        assert!(images.get(5).is_none());
    }

    #[test]
    fn test_selection_from_scene() {
        let scene = scene(8);
        let mut rng = StdRng::seed_from_u64(42);
        let selection = SelectedViews::select(&scene, 4, &mut rng).unwrap();
        assert_eq!(selection.len(), 4);
        let mut idxs = selection.indices().to_vec();
        idxs.sort_unstable();
        idxs.dedup();
        assert_eq!(idxs.len(), 4);

        let err = SelectedViews::select(&scene, 9, &mut rng).unwrap_err();
        assert!(matches!(err, DataError::InvalidArgument(_)));
    }

    #[test]
    fn test_epoch_wraparound_visits_every_sample_twice() {
        let intrinsics = Intrinsics::new(3, 4, 2.0);
        let dataset = RayDataset::new(views(2, 4, 3), intrinsics, SampleMode::Rays).unwrap();
        let mut sampler = BatchSampler::new(dataset.len(), 1, 3).unwrap();

        let mut visits = vec![0usize; dataset.len()];
        for _ in 0..2 * dataset.len() {
            let indices = sampler.next_indices();
            assert_eq!(indices.len(), 1);
            visits[indices[0]] += 1;
        }
        assert!(visits.iter().all(|&v| v >= 2));
        assert_eq!(sampler.epoch(), 1);
    }

    #[test]
    fn test_short_batch_at_epoch_end() {
        let mut sampler = BatchSampler::new(5, 2, 0).unwrap();
        assert_eq!(sampler.next_indices().len(), 2);
        assert_eq!(sampler.next_indices().len(), 2);
        assert_eq!(sampler.next_indices().len(), 1);
        assert_eq!(sampler.next_indices().len(), 2);
        assert_eq!(sampler.epoch(), 1);
    }

    #[test]
    fn test_image_mode_batch_expands_views() {
        let intrinsics = Intrinsics::new(3, 4, 2.0);
        let dataset = RayDataset::new(views(3, 4, 3), intrinsics, SampleMode::Images).unwrap();
        let batch = dataset.batch(&[0, 2]).unwrap();
        assert_eq!(batch.len(), 2 * 12);
        assert_eq!(batch.origins[12], Vec3::new(2.0, 0.0, 4.0));
        assert!(dataset.batch(&[3]).is_err());
    }

    #[test]
    fn test_gaussian_downsample_rebuilds_table() {
        let intrinsics = Intrinsics::new(3, 4, 2.0);
        let mut dataset = RayDataset::new(views(2, 4, 3), intrinsics, SampleMode::Rays).unwrap();
        let before = dataset.table().colors().to_vec();

        dataset.gaussian_downsample(0).unwrap();
        assert_eq!(dataset.table().colors(), before.as_slice());

        dataset.gaussian_downsample(1).unwrap();
        assert_eq!(dataset.len(), 2 * 12);
        assert_eq!(dataset.intrinsics(), intrinsics);

        dataset.downsample(2).unwrap();
        assert_eq!(dataset.len(), 2 * 2);
        assert_eq!(dataset.intrinsics(), Intrinsics::new(1, 2, 1.0));
    }

    #[test]
    fn test_sampler_rejects_empty() {
        assert!(BatchSampler::new(0, 4, 0).is_err());
        assert!(BatchSampler::new(4, 0, 0).is_err());
    }
}
