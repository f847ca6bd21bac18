//! scanwatch: poll a directory for images, gate them on structural
//! similarity to a reference image, and OCR a code out of the ones that match.

pub mod cli;
pub mod imaging;
pub mod metrics;
pub mod models;
pub mod ocr;
pub mod settings;
pub mod utils;
pub mod watcher;

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use tokio::sync::mpsc;

use cli::Cli;
use models::ExtractedCode;
use ocr::{OcrEngine, TesseractEngine};
use settings::WatchSettings;
use watcher::{Watcher, WatcherController};

/// Binary entry point.
pub fn run() -> Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    let settings = cli.resolve()?;

    if cli.print_config {
        println!("{}", serde_json::to_string_pretty(&settings)?);
        return Ok(());
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    runtime.block_on(watch(settings))
}

/// Run the watcher until Ctrl-C, printing each code to stdout.
pub async fn watch(settings: WatchSettings) -> Result<()> {
    info!("scanwatch starting up...");

    let engine = TesseractEngine::new(&settings.tesseract_path, settings.ocr_language.clone());
    if !engine.is_available() {
        warn!(
            "{} not found on PATH; matching images will fail text extraction",
            settings.tesseract_path.display()
        );
    }

    let (results_tx, results_rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(print_codes(results_rx));

    let engine: Arc<dyn OcrEngine> = Arc::new(engine);
    let watcher = Watcher::new(settings, engine, results_tx);
    let stats = watcher.stats();

    let mut controller = WatcherController::new();
    controller.start(watcher)?;

    let outcome = tokio::select! {
        result = controller.wait() => result,
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for Ctrl-C")?;
            info!("interrupt received, stopping");
            Ok(())
        }
    };

    controller.stop().await?;
    // Dropping the last sender (held by the watcher) ends the printer.
    printer.await.context("result printer failed to join")?;

    info!("final stats: {}", stats.summary());
    outcome
}

async fn print_codes(mut results: mpsc::UnboundedReceiver<ExtractedCode>) {
    while let Some(record) = results.recv().await {
        let mut stdout = std::io::stdout().lock();
        if let Err(err) = writeln!(stdout, "{}", record.code).and_then(|_| stdout.flush()) {
            warn!("failed to write code for {}: {err}", record.filename);
        }
    }
}
