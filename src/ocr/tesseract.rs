//! Tesseract via its command-line front end.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use tokio::process::Command;

use super::{OcrEngine, OcrError, OcrOutput};

pub struct TesseractEngine {
    binary: PathBuf,
    language: String,
}

impl Default for TesseractEngine {
    fn default() -> Self {
        Self::new("tesseract", "eng")
    }
}

impl TesseractEngine {
    pub fn new(binary: impl Into<PathBuf>, language: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            language: language.into(),
        }
    }

    /// Resolved location of the binary, if it can be found.
    pub fn locate(&self) -> Option<PathBuf> {
        which::which(&self.binary).ok()
    }
}

#[async_trait]
impl OcrEngine for TesseractEngine {
    fn name(&self) -> &'static str {
        "tesseract"
    }

    fn is_available(&self) -> bool {
        self.locate().is_some()
    }

    async fn recognize(&self, image_path: &Path) -> Result<OcrOutput, OcrError> {
        let start = Instant::now();
        // The child dies with the future, so an abandoned call leaves nothing running.
        let output = Command::new(&self.binary)
            .arg(image_path)
            .arg("stdout")
            .args(["-l", &self.language])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await;

        let output = match output {
            Ok(output) => output,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(OcrError::Unavailable(format!(
                    "{} not found (install tesseract-ocr)",
                    self.binary.display()
                )));
            }
            Err(err) => return Err(OcrError::Io(err)),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrError::Failed(format!(
                "tesseract exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let text = String::from_utf8(output.stdout)
            .map_err(|err| OcrError::Failed(format!("tesseract produced non-UTF-8 output: {err}")))?;

        Ok(OcrOutput {
            text,
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }
}
