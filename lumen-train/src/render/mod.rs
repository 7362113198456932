//! Reference renderer and frame-level helpers
//!
//! - [`MarchingRenderer`]: CPU ray marcher implementing [`crate::model::Renderer`]
//! - [`render_frame`]: chunked full-frame rendering
//! - [`render_path`]: a sequence of frames from parameters alone
//! - [`spherical_path`]: orbiting camera poses for novel-view renders

pub mod frame;
pub mod march;

pub use frame::{Frame, render_frame, render_path, spherical_path};
pub use march::MarchingRenderer;
