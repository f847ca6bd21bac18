use chrono::{DateTime, Utc};

/// Terminal state of one file's pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    Emitted,
    NoCode,
    BelowThreshold,
    DecodeFailed,
    OcrFailed,
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct FileMetrics {
    pub timestamp: DateTime<Utc>,
    pub filename: String,
    pub similarity: Option<f64>,
    pub decode_ms: Option<u64>,
    pub score_ms: Option<u64>,
    pub ocr_ms: Option<u64>,
    pub total_ms: u64,
    pub outcome: FileOutcome,
}

#[derive(Debug, Clone, Default)]
pub struct StatsSnapshot {
    pub scan_count: u64,
    pub scan_error_count: u64,
    pub dispatched_count: u64,
    pub decode_failure_count: u64,
    pub match_count: u64,
    pub ocr_count: u64,
    pub ocr_failure_count: u64,
    pub timeout_count: u64,
    pub emitted_count: u64,
    pub recent_files: Vec<FileMetrics>,
}
