use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, path::PathBuf, time::Duration};

/// How the structural similarity terms are aggregated over the canvas.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum SimilarityMode {
    /// Mean of per-window scores over a sliding square window.
    #[default]
    Windowed,
    /// One score computed over the whole canvas.
    Global,
}

impl std::str::FromStr for SimilarityMode {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "windowed" => Ok(SimilarityMode::Windowed),
            "global" => Ok(SimilarityMode::Global),
            other => Err(format!("unknown similarity mode '{other}'")),
        }
    }
}

/// Everything the watcher needs to know, with the reference behaviour as defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct WatchSettings {
    pub watch_dir: PathBuf,
    pub reference_image: PathBuf,
    pub poll_interval_ms: u64,
    /// A candidate matches when its score is strictly greater than this.
    pub similarity_threshold: f64,
    /// Lowercase suffixes, dot included.
    pub extensions: Vec<String>,
    pub code_length: usize,
    pub canvas_width: u32,
    pub canvas_height: u32,
    pub similarity_mode: SimilarityMode,
    pub window_size: u32,
    pub max_concurrent_tasks: usize,
    pub task_timeout_secs: u64,
    pub ocr_language: String,
    pub tesseract_path: PathBuf,
    /// Emit a stats summary every N scans; 0 disables it.
    pub stats_log_every_scans: u64,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            watch_dir: PathBuf::from("./img"),
            reference_image: PathBuf::from("img.jpg"),
            poll_interval_ms: 1000,
            similarity_threshold: 0.8,
            extensions: vec![".jpg".into()],
            code_length: 12,
            canvas_width: 300,
            canvas_height: 300,
            similarity_mode: SimilarityMode::Windowed,
            window_size: 7,
            max_concurrent_tasks: 4,
            task_timeout_secs: 30,
            ocr_language: "eng".into(),
            tesseract_path: PathBuf::from("tesseract"),
            stats_log_every_scans: 60,
        }
    }
}

impl WatchSettings {
    /// Read settings from a JSON file. Missing keys fall back to defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        let mut settings: Self = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse settings in {}", path.display()))?;
        settings.extensions = settings
            .extensions
            .iter()
            .map(|ext| normalize_extension(ext))
            .collect();
        Ok(settings)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            bail!(
                "similarity threshold must be within [0, 1], got {}",
                self.similarity_threshold
            );
        }
        if self.poll_interval_ms == 0 {
            bail!("poll interval must be greater than zero");
        }
        if self.canvas_width == 0 || self.canvas_height == 0 {
            bail!("canvas dimensions must be greater than zero");
        }
        if self.window_size == 0 {
            bail!("window size must be greater than zero");
        }
        if self.similarity_mode == SimilarityMode::Windowed
            && (self.window_size > self.canvas_width || self.window_size > self.canvas_height)
        {
            bail!(
                "window size {} does not fit a {}x{} canvas",
                self.window_size,
                self.canvas_width,
                self.canvas_height
            );
        }
        if self.max_concurrent_tasks == 0 {
            bail!("max concurrent tasks must be greater than zero");
        }
        if self.task_timeout_secs == 0 {
            bail!("task timeout must be greater than zero");
        }
        if self.code_length == 0 {
            bail!("code length must be greater than zero");
        }
        if self.extensions.is_empty() {
            bail!("at least one candidate file extension is required");
        }
        if let Some(ext) = self
            .extensions
            .iter()
            .find(|ext| !ext.starts_with('.') || ext.len() < 2)
        {
            bail!("candidate extension '{ext}' must be a dot followed by a suffix, e.g. .jpg");
        }
        Ok(())
    }
}

/// `JPG` and `.jpg` both mean `.jpg`.
pub fn normalize_extension(ext: &str) -> String {
    let ext = ext.trim().to_lowercase();
    if ext.starts_with('.') {
        ext
    } else {
        format!(".{ext}")
    }
}
