//! Image access and comparison.
//!
//! Decoding and resizing are delegated to the `image` crate; this module only
//! owns the error taxonomy and the similarity math.

pub mod loader;
pub mod ssim;

pub use loader::{load_image, load_image_blocking, ImageLoadError};
pub use ssim::{PreparedImage, SimilarityScorer, Ssim};
