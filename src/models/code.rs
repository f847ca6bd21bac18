use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A code pulled from an image that passed the similarity gate.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedCode {
    pub code: String,
    pub filename: String,
    pub similarity: f64,
    pub job_id: Uuid,
    pub extracted_at: DateTime<Utc>,
}
