use anyhow::{bail, Context, Result};
use log::info;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::{WatchError, Watcher};

/// Owns a running scan loop and the file tasks it spawned.
pub struct WatcherController {
    handle: Option<JoinHandle<Result<(), WatchError>>>,
    cancel_token: Option<CancellationToken>,
    tasks: TaskTracker,
}

impl Default for WatcherController {
    fn default() -> Self {
        Self::new()
    }
}

impl WatcherController {
    pub fn new() -> Self {
        Self {
            handle: None,
            cancel_token: None,
            tasks: TaskTracker::new(),
        }
    }

    pub fn start(&mut self, watcher: Watcher) -> Result<()> {
        if self.handle.is_some() {
            bail!("watcher already active");
        }

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(watcher.run(cancel_token.clone(), self.tasks.clone()));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        Ok(())
    }

    /// Resolve when the scan loop exits on its own, which only happens when
    /// the reference image could not be loaded.
    ///
    /// Cancel-safe: dropping the future leaves the loop running.
    pub async fn wait(&mut self) -> Result<()> {
        let Some(handle) = self.handle.as_mut() else {
            return Ok(());
        };
        let joined = handle.await;
        self.handle = None;
        joined.context("watcher loop task failed to join")??;
        Ok(())
    }

    /// Stop scanning, then wait for in-flight file tasks to finish.
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        let loop_result = match self.handle.take() {
            Some(handle) => handle.await.context("watcher loop task failed to join")?,
            None => Ok(()),
        };

        self.tasks.close();
        if !self.tasks.is_empty() {
            info!("waiting for {} file task(s) to finish", self.tasks.len());
        }
        self.tasks.wait().await;

        loop_result.map_err(Into::into)
    }
}
