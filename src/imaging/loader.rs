use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageReader};
use thiserror::Error;

/// Why an image could not be turned into pixels.
#[derive(Debug, Error)]
pub enum ImageLoadError {
    #[error("image not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("unable to decode image {}: {reason}", path.display())]
    DecodeFailed { path: PathBuf, reason: String },
}

impl ImageLoadError {
    fn decode(path: &Path, reason: impl ToString) -> Self {
        ImageLoadError::DecodeFailed {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }
}

/// Decode `path` synchronously.
///
/// The format is sniffed from the file contents so a PNG saved as `.jpg`
/// still decodes. Empty files are reported as decode failures.
pub fn load_image_blocking(path: &Path) -> Result<DynamicImage, ImageLoadError> {
    let metadata = match std::fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(ImageLoadError::NotFound(path.to_path_buf()));
        }
        Err(err) => return Err(ImageLoadError::decode(path, err)),
    };

    if !metadata.is_file() {
        return Err(ImageLoadError::decode(path, "not a regular file"));
    }
    if metadata.len() == 0 {
        return Err(ImageLoadError::decode(path, "file is empty"));
    }

    let reader = ImageReader::open(path)
        .map_err(|err| ImageLoadError::decode(path, err))?
        .with_guessed_format()
        .map_err(|err| ImageLoadError::decode(path, err))?;

    if reader.format().is_none() {
        return Err(ImageLoadError::decode(path, "unrecognized image format"));
    }

    reader.decode().map_err(|err| ImageLoadError::decode(path, err))
}

/// Decode `path` on the blocking pool.
pub async fn load_image(path: PathBuf) -> Result<DynamicImage, ImageLoadError> {
    let display_path = path.clone();
    tokio::task::spawn_blocking(move || load_image_blocking(&path))
        .await
        .unwrap_or_else(|join_err| Err(ImageLoadError::decode(&display_path, join_err)))
}
