mod types;

pub use types::{FileMetrics, FileOutcome, StatsSnapshot};

use std::sync::{Arc, Mutex, MutexGuard};

const MAX_RECENT_FILES: usize = 20;

/// Shared counters for the scan loop and its file tasks.
#[derive(Clone, Default)]
pub struct PipelineStats {
    inner: Arc<Mutex<StatsSnapshot>>,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, StatsSnapshot> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Returns the scan number just completed.
    pub fn record_scan(&self) -> u64 {
        let mut state = self.state();
        state.scan_count += 1;
        state.scan_count
    }

    pub fn record_scan_error(&self) {
        self.state().scan_error_count += 1;
    }

    pub fn record_dispatch(&self) {
        self.state().dispatched_count += 1;
    }

    pub fn record_ocr_started(&self) {
        self.state().ocr_count += 1;
    }

    pub fn record_file(&self, metrics: FileMetrics) {
        let mut state = self.state();

        match metrics.outcome {
            FileOutcome::Emitted => {
                state.match_count += 1;
                state.emitted_count += 1;
            }
            FileOutcome::NoCode => state.match_count += 1,
            FileOutcome::OcrFailed => {
                state.match_count += 1;
                state.ocr_failure_count += 1;
            }
            FileOutcome::DecodeFailed => state.decode_failure_count += 1,
            FileOutcome::TimedOut => state.timeout_count += 1,
            FileOutcome::BelowThreshold => {}
        }

        state.recent_files.push(metrics);
        if state.recent_files.len() > MAX_RECENT_FILES {
            state.recent_files.remove(0);
        }
    }

    pub fn scan_count(&self) -> u64 {
        self.state().scan_count
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.state().clone()
    }

    pub fn summary(&self) -> String {
        let state = self.state();
        format!(
            "scans={} scan_errors={} dispatched={} decode_failures={} matches={} ocr_runs={} ocr_failures={} timeouts={} emitted={}",
            state.scan_count,
            state.scan_error_count,
            state.dispatched_count,
            state.decode_failure_count,
            state.match_count,
            state.ocr_count,
            state.ocr_failure_count,
            state.timeout_count,
            state.emitted_count
        )
    }
}
