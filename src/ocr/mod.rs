//! OCR boundary.
//!
//! The engine is an opaque, per-call stateless service that turns an image
//! path into free text. Field selection lives in [`extract`].
//!
//! Dropping a `recognize` future must stop the work it started; the per-file
//! timeout relies on that to release the concurrency slot.

pub mod extract;
pub mod tesseract;

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

pub use extract::{select_code, TextExtractor};
pub use tesseract::TesseractEngine;

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("OCR engine unavailable: {0}")]
    Unavailable(String),

    #[error("OCR failed: {0}")]
    Failed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Raw recognizer output.
#[derive(Debug, Clone)]
pub struct OcrOutput {
    pub text: String,
    pub latency_ms: u64,
}

#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Short engine name for logs.
    fn name(&self) -> &'static str;

    /// Whether the engine can run at all on this machine.
    fn is_available(&self) -> bool;

    async fn recognize(&self, image_path: &Path) -> Result<OcrOutput, OcrError>;
}
