//! Directory watcher: scan loop, claim tracking and per-file tasks.

pub mod claims;
pub mod controller;
pub mod loop_worker;
pub mod task;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::imaging::{ImageLoadError, SimilarityScorer, Ssim};
use crate::metrics::PipelineStats;
use crate::models::ExtractedCode;
use crate::ocr::{OcrEngine, OcrError, TextExtractor};
use crate::settings::WatchSettings;

pub use claims::ClaimTracker;
pub use controller::WatcherController;
pub use loop_worker::list_candidates;

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("reference image unavailable: {0}")]
    ReferenceImageUnavailable(#[source] ImageLoadError),

    #[error("failed to list {}: {source}", dir.display())]
    DirectoryList {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Why a single file's pipeline was abandoned.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Image(#[from] ImageLoadError),

    #[error(transparent)]
    Ocr(#[from] OcrError),

    #[error("scoring worker failed: {0}")]
    Scoring(String),

    #[error("file task exceeded {0:?}")]
    TimedOut(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherPhase {
    Initializing,
    Scanning,
}

/// Everything a scan loop needs, wired together.
pub struct Watcher {
    pub(crate) settings: WatchSettings,
    pub(crate) scorer: Arc<dyn SimilarityScorer>,
    pub(crate) extractor: TextExtractor,
    pub(crate) claims: ClaimTracker,
    pub(crate) stats: PipelineStats,
    pub(crate) results: mpsc::UnboundedSender<ExtractedCode>,
}

impl Watcher {
    pub fn new(
        settings: WatchSettings,
        engine: Arc<dyn OcrEngine>,
        results: mpsc::UnboundedSender<ExtractedCode>,
    ) -> Self {
        let scorer = Arc::new(Ssim::from_settings(&settings));
        let extractor = TextExtractor::new(engine, settings.code_length);
        Self {
            settings,
            scorer,
            extractor,
            claims: ClaimTracker::new(),
            stats: PipelineStats::new(),
            results,
        }
    }

    /// Replace the SSIM scorer, e.g. with a fixed-score stub.
    pub fn with_scorer(mut self, scorer: Arc<dyn SimilarityScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    /// Handle to the claim set; clones share state with the running loop.
    pub fn claims(&self) -> ClaimTracker {
        self.claims.clone()
    }

    /// Handle to the counters; clones share state with the running loop.
    pub fn stats(&self) -> PipelineStats {
        self.stats.clone()
    }
}
