use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::imaging::{load_image_blocking, PreparedImage, SimilarityScorer};
use crate::metrics::{FileMetrics, FileOutcome, PipelineStats};
use crate::models::{CandidateFile, ExtractedCode};
use crate::ocr::TextExtractor;

use super::TaskError;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// State shared by every file task of one scan loop.
pub(crate) struct JobContext {
    pub reference: Arc<PreparedImage>,
    pub scorer: Arc<dyn SimilarityScorer>,
    pub extractor: TextExtractor,
    pub threshold: f64,
    pub task_timeout: Duration,
    pub permits: Arc<Semaphore>,
    pub stats: PipelineStats,
    pub results: mpsc::UnboundedSender<ExtractedCode>,
    pub cancel: CancellationToken,
}

#[derive(Default)]
struct StageTimings {
    similarity: Option<f64>,
    decode_ms: Option<u64>,
    score_ms: Option<u64>,
    ocr_ms: Option<u64>,
}

/// Decode, score, maybe extract, maybe emit. Errors stay inside the task.
///
/// The concurrency slot is held until every piece of work started for the
/// file has ended, including blocking work that outlives a timeout.
pub(crate) async fn process_file(ctx: Arc<JobContext>, candidate: CandidateFile, job_id: Uuid) {
    let permit = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => {
            log_debug!("[{job_id}] shutdown before {} started", candidate.filename);
            return;
        }
        permit = Arc::clone(&ctx.permits).acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return,
        },
    };
    let permit = Arc::new(permit);

    let start = Instant::now();
    let mut timings = StageTimings::default();

    let result = match tokio::time::timeout(
        ctx.task_timeout,
        run_pipeline(&ctx, &candidate, job_id, &permit, &mut timings),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(TaskError::TimedOut(ctx.task_timeout)),
    };

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(TaskError::Image(err)) => {
            log_warn!("[{job_id}] skipping {}: {err}", candidate.filename);
            FileOutcome::DecodeFailed
        }
        Err(TaskError::Scoring(err)) => {
            log_warn!("[{job_id}] scoring {} failed: {err}", candidate.filename);
            FileOutcome::DecodeFailed
        }
        Err(TaskError::Ocr(err)) => {
            log_warn!("[{job_id}] text extraction for {} failed: {err}", candidate.filename);
            FileOutcome::OcrFailed
        }
        Err(TaskError::TimedOut(limit)) => {
            log_warn!("[{job_id}] {} abandoned after {:?}", candidate.filename, limit);
            FileOutcome::TimedOut
        }
    };

    let total_ms = start.elapsed().as_millis() as u64;
    log_debug!(
        "[{job_id}] {} finished as {:?} in {}ms",
        candidate.filename,
        outcome,
        total_ms
    );

    ctx.stats.record_file(FileMetrics {
        timestamp: Utc::now(),
        filename: candidate.filename,
        similarity: timings.similarity,
        decode_ms: timings.decode_ms,
        score_ms: timings.score_ms,
        ocr_ms: timings.ocr_ms,
        total_ms,
        outcome,
    });
}

async fn run_pipeline(
    ctx: &JobContext,
    candidate: &CandidateFile,
    job_id: Uuid,
    permit: &Arc<OwnedSemaphorePermit>,
    timings: &mut StageTimings,
) -> Result<FileOutcome, TaskError> {
    let scored = tokio::task::spawn_blocking({
        let path = candidate.path.clone();
        let scorer = Arc::clone(&ctx.scorer);
        let reference = Arc::clone(&ctx.reference);
        let slot = Arc::clone(permit);
        move || {
            let _slot = slot;
            let decode_start = std::time::Instant::now();
            let image = load_image_blocking(&path)?;
            let decode_ms = decode_start.elapsed().as_millis() as u64;

            let score_start = std::time::Instant::now();
            let prepared = scorer.prepare(&image);
            let similarity = scorer.compare(&reference, &prepared);
            Ok::<_, TaskError>((decode_ms, score_start.elapsed().as_millis() as u64, similarity))
        }
    })
    .await
    .map_err(|err| TaskError::Scoring(err.to_string()))?;

    let (decode_ms, score_ms, similarity) = scored?;
    timings.decode_ms = Some(decode_ms);
    timings.score_ms = Some(score_ms);
    timings.similarity = Some(similarity);

    log_debug!(
        "[{job_id}] {} similarity={:.4} (threshold {:.2})",
        candidate.filename,
        similarity,
        ctx.threshold
    );

    if similarity <= ctx.threshold {
        return Ok(FileOutcome::BelowThreshold);
    }

    ctx.stats.record_ocr_started();
    let ocr_start = Instant::now();
    let code = ctx.extractor.extract(&candidate.path).await?;
    timings.ocr_ms = Some(ocr_start.elapsed().as_millis() as u64);

    let Some(code) = code else {
        log_debug!("[{job_id}] no code found in {}", candidate.filename);
        return Ok(FileOutcome::NoCode);
    };

    log_info!(
        "[{job_id}] extracted code from {} (similarity {:.3})",
        candidate.filename,
        similarity
    );

    let record = ExtractedCode {
        code,
        filename: candidate.filename.clone(),
        similarity,
        job_id,
        extracted_at: Utc::now(),
    };
    if ctx.results.send(record).is_err() {
        log_warn!("[{job_id}] result receiver closed; code for {} dropped", candidate.filename);
    }

    Ok(FileOutcome::Emitted)
}
