pub mod logging;

/// Lowercased extension filter match, e.g. `b.JPG` against `.jpg`.
pub fn has_extension(filename: &str, extensions: &[String]) -> bool {
    let lower = filename.to_lowercase();
    extensions
        .iter()
        .any(|ext| lower.ends_with(&ext.to_lowercase()))
}
