use std::path::Path;
use std::sync::Arc;

use super::{OcrEngine, OcrError};

/// Pick the code out of recognized text.
///
/// The code is the second line, and only if it is exactly `code_length`
/// characters long. Anything else means "no code" rather than an error.
pub fn select_code(text: &str, code_length: usize) -> Option<String> {
    let second = text.split('\n').nth(1)?;
    let second = second.strip_suffix('\r').unwrap_or(second);
    (second.chars().count() == code_length).then(|| second.to_string())
}

/// OCR engine plus the field-selection rule.
#[derive(Clone)]
pub struct TextExtractor {
    engine: Arc<dyn OcrEngine>,
    code_length: usize,
}

impl TextExtractor {
    pub fn new(engine: Arc<dyn OcrEngine>, code_length: usize) -> Self {
        Self {
            engine,
            code_length,
        }
    }

    pub fn engine_name(&self) -> &'static str {
        self.engine.name()
    }

    /// Recognize `image_path` and apply [`select_code`] to the text.
    ///
    /// Dropping the returned future cancels the engine call.
    pub async fn extract(&self, image_path: &Path) -> Result<Option<String>, OcrError> {
        let output = self.engine.recognize(image_path).await?;
        log::debug!(
            "{} recognized {} chars from {} in {}ms",
            self.engine.name(),
            output.text.len(),
            image_path.display(),
            output.latency_ms
        );
        Ok(select_code(&output.text, self.code_length))
    }
}
