use std::path::Path;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use crate::imaging::{load_image, PreparedImage};
use crate::models::CandidateFile;
use crate::utils::has_extension;

use super::task::{process_file, JobContext};
use super::{WatchError, Watcher, WatcherPhase};

// Set to false to silence per-scan logging from this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

/// List regular files in `dir` whose name ends in one of `extensions`
/// (case-insensitive), sorted by name.
pub async fn list_candidates(dir: &Path, extensions: &[String]) -> std::io::Result<Vec<CandidateFile>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut candidates = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let file_type = match entry.file_type().await {
            Ok(file_type) => file_type,
            Err(err) => {
                log_debug!("skipping {}: {err}", entry.path().display());
                continue;
            }
        };
        if file_type.is_dir() {
            continue;
        }

        let Ok(filename) = entry.file_name().into_string() else {
            log_debug!("skipping non UTF-8 name {}", entry.path().display());
            continue;
        };
        if !has_extension(&filename, extensions) {
            continue;
        }

        candidates.push(CandidateFile::new(filename, entry.path()));
    }

    candidates.sort_by(|a, b| a.filename.cmp(&b.filename));
    Ok(candidates)
}

impl Watcher {
    /// Load the reference image, then scan until `cancel` fires.
    ///
    /// File tasks are spawned on `tasks` so the caller can wait for them to
    /// drain after the loop returns. If the reference cannot be loaded no scan
    /// is ever performed.
    pub async fn run(self, cancel: CancellationToken, tasks: TaskTracker) -> Result<(), WatchError> {
        let mut phase = WatcherPhase::Initializing;
        log_debug!("watcher phase {:?}", phase);

        let reference = match self.prepare_reference().await {
            Ok(reference) => reference,
            Err(err) => {
                log::error!("{err}; not starting directory scan");
                return Err(err);
            }
        };

        let ctx = Arc::new(JobContext {
            reference,
            scorer: Arc::clone(&self.scorer),
            extractor: self.extractor.clone(),
            threshold: self.settings.similarity_threshold,
            task_timeout: self.settings.task_timeout(),
            permits: Arc::new(Semaphore::new(self.settings.max_concurrent_tasks)),
            stats: self.stats.clone(),
            results: self.results.clone(),
            cancel: cancel.clone(),
        });

        phase = WatcherPhase::Scanning;
        log_info!(
            "watcher {:?} {} every {}ms (threshold {:.2}, ocr engine {})",
            phase,
            self.settings.watch_dir.display(),
            self.settings.poll_interval_ms,
            self.settings.similarity_threshold,
            self.extractor.engine_name()
        );

        let mut ticker = tokio::time::interval(self.settings.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    log_info!("watcher shutting down ({})", self.stats.summary());
                    break;
                }
                _ = ticker.tick() => {
                    self.scan_once(&ctx, &tasks).await;
                }
            }
        }

        Ok(())
    }

    async fn prepare_reference(&self) -> Result<Arc<PreparedImage>, WatchError> {
        let start = Instant::now();
        let image = load_image(self.settings.reference_image.clone())
            .await
            .map_err(WatchError::ReferenceImageUnavailable)?;

        let scorer = Arc::clone(&self.scorer);
        let prepared = tokio::task::spawn_blocking(move || scorer.prepare(&image))
            .await
            .map_err(|err| {
                WatchError::ReferenceImageUnavailable(crate::imaging::ImageLoadError::DecodeFailed {
                    path: self.settings.reference_image.clone(),
                    reason: err.to_string(),
                })
            })?;

        log_info!(
            "reference image {} prepared in {}ms",
            self.settings.reference_image.display(),
            start.elapsed().as_millis()
        );
        Ok(Arc::new(prepared))
    }

    /// One pass over the directory. Returns how many files were dispatched.
    async fn scan_once(&self, ctx: &Arc<JobContext>, tasks: &TaskTracker) -> usize {
        let scan_no = self.stats.record_scan();
        let dir = &self.settings.watch_dir;

        let candidates = match list_candidates(dir, &self.settings.extensions).await {
            Ok(candidates) => candidates,
            Err(source) => {
                self.stats.record_scan_error();
                let err = WatchError::DirectoryList {
                    dir: dir.clone(),
                    source,
                };
                log_error!("scan #{scan_no}: {err}");
                return 0;
            }
        };

        let mut dispatched = 0;
        for candidate in candidates {
            // Claim and spawn happen back to back on this single loop, so a
            // name can never be handed to two tasks.
            if !self.claims.try_claim(&candidate.filename).await {
                continue;
            }

            let job_id = Uuid::new_v4();
            log_info!("[{job_id}] dispatching {}", candidate.filename);
            self.stats.record_dispatch();
            tasks.spawn(process_file(Arc::clone(ctx), candidate, job_id));
            dispatched += 1;
        }

        if dispatched > 0 {
            log_debug!("scan #{scan_no}: dispatched {dispatched} new file(s)");
        }

        let every = self.settings.stats_log_every_scans;
        if every > 0 && scan_no % every == 0 {
            log_info!("stats after scan #{scan_no}: {}", self.stats.summary());
        }
        if tasks.len() > self.settings.max_concurrent_tasks * 8 {
            log_warn!(
                "{} file tasks outstanding; processing is falling behind arrivals",
                tasks.len()
            );
        }

        dispatched
    }
}
