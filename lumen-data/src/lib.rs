//! Lumen Data Crate
//!
//! Scene loading and ray-dataset construction for radiance-field training.
//! This crate is renderer-agnostic and focuses on turning a pool of posed
//! photographs into a bounded, spatially diverse set of training rays.
//!
//! ## Modules
//!
//! - [`scene`]: posed-image scenes and the on-disk synthetic loader
//! - [`selection`]: coverage-maximizing view selection (k-means over camera positions)
//! - [`rays`]: pinhole ray generation and image resampling
//! - [`dataset`]: indexable ray/image datasets and epoch-wrapping batch sampling

pub mod dataset;
pub mod error;
pub mod rays;
pub mod scene;
pub mod selection;
pub mod types;

pub use dataset::{BatchSampler, DatasetItem, RayBatch, RayDataset, SampleMode, SelectedViews};
pub use error::DataError;
pub use rays::{RaySample, RayTable};
pub use scene::{Scene, Split, load_intrinsics, load_scene};
pub use selection::{Clustering, KMeans, select_views};
pub use types::{Background, Intrinsics, View};
