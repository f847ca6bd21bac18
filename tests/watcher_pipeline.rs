//! End-to-end tests for the scan loop.
//!
//! Each test builds a scratch directory with generated images, runs the
//! watcher with a fake OCR engine (and sometimes a fixed-score scorer), and
//! inspects the emitted codes and the pipeline counters.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use image::{DynamicImage, GrayImage, Luma};
use scanwatch_lib::imaging::{PreparedImage, SimilarityScorer};
use scanwatch_lib::metrics::{FileOutcome, PipelineStats};
use scanwatch_lib::models::ExtractedCode;
use scanwatch_lib::ocr::{OcrEngine, OcrError, OcrOutput};
use scanwatch_lib::settings::WatchSettings;
use scanwatch_lib::watcher::{Watcher, WatcherController};
use tokio::sync::mpsc;

struct FakeEngine {
    text: String,
    delay: Option<Duration>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl FakeEngine {
    fn new(text: &str) -> Arc<Self> {
        Self::build(text, None)
    }

    fn slow(text: &str, delay: Duration) -> Arc<Self> {
        Self::build(text, Some(delay))
    }

    fn build(text: &str, delay: Option<Duration>) -> Arc<Self> {
        Arc::new(Self {
            text: text.to_string(),
            delay,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Counts a recognize call as running until it returns or is dropped.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(engine: &'a FakeEngine) -> Self {
        let now = engine.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        engine.peak.fetch_max(now, Ordering::SeqCst);
        Self(&engine.in_flight)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl OcrEngine for FakeEngine {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn recognize(&self, _image_path: &Path) -> Result<OcrOutput, OcrError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _running = InFlight::enter(self);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(OcrOutput {
            text: self.text.clone(),
            latency_ms: 0,
        })
    }
}

/// Always reports the same score.
struct FixedScorer(f64);

impl SimilarityScorer for FixedScorer {
    fn prepare(&self, _image: &DynamicImage) -> PreparedImage {
        PreparedImage::from_luma(&GrayImage::new(1, 1))
    }

    fn compare(&self, _reference: &PreparedImage, _candidate: &PreparedImage) -> f64 {
        self.0
    }
}

struct Fixture {
    _root: tempfile::TempDir,
    watch_dir: PathBuf,
    reference: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let watch_dir = root.path().join("incoming");
        std::fs::create_dir(&watch_dir).unwrap();
        let reference = root.path().join("reference.png");
        card().save(&reference).unwrap();
        Self {
            _root: root,
            watch_dir,
            reference,
        }
    }

    fn settings(&self) -> WatchSettings {
        WatchSettings {
            watch_dir: self.watch_dir.clone(),
            reference_image: self.reference.clone(),
            poll_interval_ms: 20,
            canvas_width: 64,
            canvas_height: 64,
            task_timeout_secs: 10,
            ..WatchSettings::default()
        }
    }

    fn drop_image(&self, name: &str, image: &GrayImage) {
        image.save(self.watch_dir.join(name)).unwrap();
    }

    fn drop_bytes(&self, name: &str, bytes: &[u8]) {
        std::fs::write(self.watch_dir.join(name), bytes).unwrap();
    }
}

/// Stand-in for a captured document: a framed block pattern.
fn card() -> GrayImage {
    GrayImage::from_fn(160, 100, |x, y| {
        let border = x < 8 || y < 8 || x >= 152 || y >= 92;
        let stripe = (y / 12) % 2 == 0 && x > 20 && x < 140;
        Luma([if border {
            30
        } else if stripe {
            220
        } else {
            140
        }])
    })
}

/// High-contrast checkerboard with no flat areas at canvas scale.
fn unrelated() -> GrayImage {
    GrayImage::from_fn(160, 100, |x, y| {
        Luma([if (x / 16 + y / 16) % 2 == 0 { 0 } else { 255 }])
    })
}

async fn wait_until(stats: &PipelineStats, what: &str, done: impl Fn(&PipelineStats) -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(15);
    while !done(stats) {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}: {}", stats.summary());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn start(watcher: Watcher) -> (WatcherController, PipelineStats) {
    let stats = watcher.stats();
    let mut controller = WatcherController::new();
    controller.start(watcher).unwrap();
    (controller, stats)
}

fn drain(rx: &mut mpsc::UnboundedReceiver<ExtractedCode>) -> Vec<ExtractedCode> {
    let mut codes = Vec::new();
    while let Ok(code) = rx.try_recv() {
        codes.push(code);
    }
    codes
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn matching_image_emits_second_line_code() {
    let fixture = Fixture::new();
    fixture.drop_image("scan_001.jpg", &card());

    let engine = FakeEngine::new("HEADER\nABCDEFG12345\nFOOTER");
    let (tx, mut rx) = mpsc::unbounded_channel();
    let watcher = Watcher::new(fixture.settings(), engine.clone(), tx);
    let (mut controller, _stats) = start(watcher);

    let record = tokio::time::timeout(Duration::from_secs(15), rx.recv())
        .await
        .expect("no code emitted")
        .expect("channel closed");

    assert_eq!(record.code, "ABCDEFG12345");
    assert_eq!(record.filename, "scan_001.jpg");
    assert!(record.similarity > 0.8, "similarity {}", record.similarity);
    assert_eq!(engine.calls(), 1);

    controller.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unrelated_image_is_gated_out() {
    let fixture = Fixture::new();
    fixture.drop_image("other.jpg", &unrelated());

    let engine = FakeEngine::new("HEADER\nABCDEFG12345\n");
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (mut controller, stats) = start(Watcher::new(fixture.settings(), engine.clone(), tx));

    wait_until(&stats, "file outcome", |s| !s.snapshot().recent_files.is_empty()).await;
    controller.stop().await.unwrap();

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.recent_files[0].outcome, FileOutcome::BelowThreshold);
    assert_eq!(engine.calls(), 0);
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn score_below_threshold_never_runs_ocr() {
    let fixture = Fixture::new();
    fixture.drop_image("near_miss.jpg", &card());

    let engine = FakeEngine::new("HEADER\nABCDEFG12345\n");
    let (tx, mut rx) = mpsc::unbounded_channel();
    let watcher = Watcher::new(fixture.settings(), engine.clone(), tx)
        .with_scorer(Arc::new(FixedScorer(0.75)));
    let (mut controller, stats) = start(watcher);

    wait_until(&stats, "file outcome", |s| !s.snapshot().recent_files.is_empty()).await;
    controller.stop().await.unwrap();

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.recent_files[0].similarity, Some(0.75));
    assert_eq!(snapshot.recent_files[0].outcome, FileOutcome::BelowThreshold);
    assert_eq!(snapshot.ocr_count, 0);
    assert_eq!(engine.calls(), 0);
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn score_equal_to_threshold_is_not_a_match() {
    let fixture = Fixture::new();
    fixture.drop_image("edge.jpg", &card());

    let engine = FakeEngine::new("HEADER\nABCDEFG12345\n");
    let (tx, _rx) = mpsc::unbounded_channel();
    let watcher = Watcher::new(fixture.settings(), engine.clone(), tx)
        .with_scorer(Arc::new(FixedScorer(0.8)));
    let (mut controller, stats) = start(watcher);

    wait_until(&stats, "file outcome", |s| !s.snapshot().recent_files.is_empty()).await;
    controller.stop().await.unwrap();

    assert_eq!(engine.calls(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn wrong_length_second_line_emits_nothing() {
    for text in ["HEADER\nABCDEFG1234\nFOOTER", "HEADER\nABCDEFG123456\nFOOTER"] {
        let fixture = Fixture::new();
        fixture.drop_image("card.jpg", &card());

        let engine = FakeEngine::new(text);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let watcher = Watcher::new(fixture.settings(), engine.clone(), tx)
            .with_scorer(Arc::new(FixedScorer(0.95)));
        let (mut controller, stats) = start(watcher);

        wait_until(&stats, "file outcome", |s| !s.snapshot().recent_files.is_empty()).await;
        controller.stop().await.unwrap();

        assert_eq!(engine.calls(), 1);
        assert_eq!(stats.snapshot().recent_files[0].outcome, FileOutcome::NoCode);
        assert!(drain(&mut rx).is_empty(), "unexpected code for {text:?}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn files_are_dispatched_once_across_scans() {
    let fixture = Fixture::new();
    for name in ["a.jpg", "b.jpg", "c.jpg"] {
        fixture.drop_image(name, &card());
    }

    let engine = FakeEngine::new("HEADER\nABCDEFG12345\n");
    let (tx, mut rx) = mpsc::unbounded_channel();
    let watcher = Watcher::new(fixture.settings(), engine.clone(), tx)
        .with_scorer(Arc::new(FixedScorer(0.95)));
    let claims = watcher.claims();
    let (mut controller, stats) = start(watcher);

    wait_until(&stats, "three files", |s| s.snapshot().recent_files.len() == 3).await;
    let scans_before = stats.scan_count();
    wait_until(&stats, "more scans", |s| s.scan_count() >= scans_before + 5).await;

    // A file arriving later is still picked up exactly once.
    fixture.drop_image("d.jpg", &card());
    wait_until(&stats, "late file", |s| s.snapshot().recent_files.len() == 4).await;
    let scans_after = stats.scan_count();
    wait_until(&stats, "more scans", |s| s.scan_count() >= scans_after + 5).await;
    controller.stop().await.unwrap();

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.dispatched_count, 4);
    assert_eq!(engine.calls(), 4);
    assert_eq!(claims.len().await, 4);
    assert_eq!(drain(&mut rx).len(), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn only_jpg_files_are_candidates() {
    let fixture = Fixture::new();
    fixture.drop_image("a.jpg", &card());
    fixture.drop_image("b.JPG", &card());
    fixture.drop_image("c.png", &card());

    let engine = FakeEngine::new("HEADER\nABCDEFG12345\n");
    let (tx, _rx) = mpsc::unbounded_channel();
    let watcher = Watcher::new(fixture.settings(), engine.clone(), tx)
        .with_scorer(Arc::new(FixedScorer(0.95)));
    let claims = watcher.claims();
    let (mut controller, stats) = start(watcher);

    wait_until(&stats, "two files", |s| s.snapshot().recent_files.len() == 2).await;
    let scans = stats.scan_count();
    wait_until(&stats, "more scans", |s| s.scan_count() >= scans + 3).await;
    controller.stop().await.unwrap();

    assert!(claims.contains("a.jpg").await);
    assert!(claims.contains("b.JPG").await);
    assert!(!claims.contains("c.png").await);
    assert_eq!(stats.snapshot().dispatched_count, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_reference_performs_no_scans() {
    let fixture = Fixture::new();
    fixture.drop_image("a.jpg", &card());

    let settings = WatchSettings {
        reference_image: fixture.watch_dir.join("does_not_exist.jpg"),
        ..fixture.settings()
    };
    let engine = FakeEngine::new("");
    let (tx, _rx) = mpsc::unbounded_channel();
    let (mut controller, stats) = start(Watcher::new(settings, engine.clone(), tx));

    let result = tokio::time::timeout(Duration::from_secs(5), controller.wait())
        .await
        .expect("watcher should exit on its own");
    assert!(result.is_err());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(stats.scan_count(), 0);
    assert_eq!(stats.snapshot().dispatched_count, 0);
    assert_eq!(engine.calls(), 0);
    controller.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn corrupt_file_fails_once_and_is_not_retried() {
    let fixture = Fixture::new();
    fixture.drop_bytes("broken.jpg", b"\xff\xd8 truncated");
    fixture.drop_bytes("empty.jpg", b"");

    let engine = FakeEngine::new("HEADER\nABCDEFG12345\n");
    let (tx, _rx) = mpsc::unbounded_channel();
    let (mut controller, stats) = start(Watcher::new(fixture.settings(), engine.clone(), tx));

    wait_until(&stats, "two failures", |s| s.snapshot().decode_failure_count == 2).await;
    let scans = stats.scan_count();
    wait_until(&stats, "more scans", |s| s.scan_count() >= scans + 5).await;
    controller.stop().await.unwrap();

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.dispatched_count, 2);
    assert_eq!(snapshot.decode_failure_count, 2);
    assert_eq!(engine.calls(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_watch_directory_keeps_looping() {
    let fixture = Fixture::new();
    let settings = WatchSettings {
        watch_dir: fixture.watch_dir.join("not_yet"),
        ..fixture.settings()
    };

    let engine = FakeEngine::new("HEADER\nABCDEFG12345\n");
    let (tx, mut rx) = mpsc::unbounded_channel();
    let watcher = Watcher::new(settings.clone(), engine.clone(), tx)
        .with_scorer(Arc::new(FixedScorer(0.95)));
    let (mut controller, stats) = start(watcher);

    wait_until(&stats, "scan errors", |s| s.snapshot().scan_error_count >= 3).await;

    std::fs::create_dir(&settings.watch_dir).unwrap();
    card().save(settings.watch_dir.join("late.jpg")).unwrap();

    let record = tokio::time::timeout(Duration::from_secs(15), rx.recv())
        .await
        .expect("no code emitted")
        .expect("channel closed");
    assert_eq!(record.filename, "late.jpg");

    controller.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stalled_ocr_is_abandoned_after_timeout() {
    let fixture = Fixture::new();
    fixture.drop_image("slow.jpg", &card());

    let settings = WatchSettings {
        task_timeout_secs: 1,
        ..fixture.settings()
    };
    let engine = FakeEngine::slow("HEADER\nABCDEFG12345\n", Duration::from_secs(3));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let watcher = Watcher::new(settings, engine.clone(), tx)
        .with_scorer(Arc::new(FixedScorer(0.95)));
    let (mut controller, stats) = start(watcher);

    wait_until(&stats, "timeout", |s| s.snapshot().timeout_count == 1).await;
    let scans = stats.scan_count();
    wait_until(&stats, "more scans", |s| s.scan_count() >= scans + 3).await;
    controller.stop().await.unwrap();

    assert_eq!(engine.calls(), 1);
    assert_eq!(engine.in_flight(), 0, "timed-out OCR call is still running");
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn timed_out_ocr_does_not_free_extra_slots() {
    let fixture = Fixture::new();
    for name in ["a.jpg", "b.jpg", "c.jpg", "d.jpg"] {
        fixture.drop_image(name, &card());
    }

    let settings = WatchSettings {
        max_concurrent_tasks: 1,
        task_timeout_secs: 1,
        ..fixture.settings()
    };
    let engine = FakeEngine::slow("HEADER\nABCDEFG12345\n", Duration::from_secs(6));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let watcher = Watcher::new(settings, engine.clone(), tx)
        .with_scorer(Arc::new(FixedScorer(0.95)));
    let (mut controller, stats) = start(watcher);

    wait_until(&stats, "four timeouts", |s| s.snapshot().timeout_count == 4).await;
    controller.stop().await.unwrap();

    assert_eq!(engine.calls(), 4);
    assert_eq!(engine.peak(), 1, "more OCR calls ran at once than allowed");
    assert_eq!(engine.in_flight(), 0);
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn starting_twice_is_rejected() {
    let fixture = Fixture::new();
    let engine = FakeEngine::new("");
    let (tx, _rx) = mpsc::unbounded_channel();

    let mut controller = WatcherController::new();
    controller
        .start(Watcher::new(fixture.settings(), engine.clone(), tx.clone()))
        .unwrap();
    assert!(controller
        .start(Watcher::new(fixture.settings(), engine, tx))
        .is_err());
    controller.stop().await.unwrap();
}
