use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use crate::settings::{normalize_extension, SimilarityMode, WatchSettings};

/// Watch a directory for images matching a reference and print the code found
/// on the second OCR line of each match.
#[derive(Debug, Parser)]
#[command(name = "scanwatch", version, about)]
pub struct Cli {
    /// JSON settings file; flags below override its values
    #[arg(long, env = "SCANWATCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory to poll for new images
    #[arg(long, env = "SCANWATCH_WATCH_DIR")]
    pub watch_dir: Option<PathBuf>,

    /// Reference image every candidate is compared against
    #[arg(long, env = "SCANWATCH_REFERENCE")]
    pub reference: Option<PathBuf>,

    /// Poll interval in milliseconds
    #[arg(long, env = "SCANWATCH_INTERVAL_MS")]
    pub interval_ms: Option<u64>,

    /// Similarity a candidate must exceed before OCR runs
    #[arg(long, env = "SCANWATCH_THRESHOLD")]
    pub threshold: Option<f64>,

    /// `windowed` or `global`
    #[arg(long, env = "SCANWATCH_SIMILARITY_MODE")]
    pub similarity_mode: Option<SimilarityMode>,

    /// Exact length of the code line
    #[arg(long, env = "SCANWATCH_CODE_LENGTH")]
    pub code_length: Option<usize>,

    /// Candidate file suffix; repeat for several
    #[arg(long = "extension", env = "SCANWATCH_EXTENSIONS", value_delimiter = ',')]
    pub extensions: Vec<String>,

    /// Maximum number of files processed at once
    #[arg(long, env = "SCANWATCH_MAX_TASKS")]
    pub max_tasks: Option<usize>,

    /// Per-file processing limit in seconds
    #[arg(long, env = "SCANWATCH_TASK_TIMEOUT_SECS")]
    pub task_timeout_secs: Option<u64>,

    /// Tesseract language, e.g. `eng`
    #[arg(long, env = "SCANWATCH_OCR_LANG")]
    pub ocr_lang: Option<String>,

    /// Path or name of the tesseract binary
    #[arg(long, env = "SCANWATCH_TESSERACT")]
    pub tesseract: Option<PathBuf>,

    /// Print the effective settings as JSON and exit
    #[arg(long)]
    pub print_config: bool,
}

impl Cli {
    /// Defaults, then the settings file, then flags and environment.
    pub fn resolve(&self) -> Result<WatchSettings> {
        let mut settings = match &self.config {
            Some(path) => WatchSettings::from_file(path)?,
            None => WatchSettings::default(),
        };

        if let Some(dir) = &self.watch_dir {
            settings.watch_dir = dir.clone();
        }
        if let Some(reference) = &self.reference {
            settings.reference_image = reference.clone();
        }
        if let Some(ms) = self.interval_ms {
            settings.poll_interval_ms = ms;
        }
        if let Some(threshold) = self.threshold {
            settings.similarity_threshold = threshold;
        }
        if let Some(mode) = self.similarity_mode {
            settings.similarity_mode = mode;
        }
        if let Some(len) = self.code_length {
            settings.code_length = len;
        }
        if !self.extensions.is_empty() {
            settings.extensions = self
                .extensions
                .iter()
                .map(|ext| normalize_extension(ext))
                .collect();
        }
        if let Some(max) = self.max_tasks {
            settings.max_concurrent_tasks = max;
        }
        if let Some(secs) = self.task_timeout_secs {
            settings.task_timeout_secs = secs;
        }
        if let Some(lang) = &self.ocr_lang {
            settings.ocr_language = lang.clone();
        }
        if let Some(tesseract) = &self.tesseract {
            settings.tesseract_path = tesseract.clone();
        }

        settings.validate()?;
        Ok(settings)
    }
}
