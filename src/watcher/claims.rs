use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Filenames already handed to a file task.
///
/// Entries are never evicted, so a name is dispatched at most once for the
/// life of the process even if the file is deleted and recreated.
#[derive(Clone, Default)]
pub struct ClaimTracker {
    claimed: Arc<Mutex<HashSet<String>>>,
}

impl ClaimTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `filename` for processing.
    /// Returns true only for the first caller; check and insert happen under
    /// one lock acquisition.
    pub async fn try_claim(&self, filename: &str) -> bool {
        let mut claimed = self.claimed.lock().await;

        if claimed.contains(filename) {
            return false;
        }

        claimed.insert(filename.to_string());
        true
    }

    pub async fn contains(&self, filename: &str) -> bool {
        self.claimed.lock().await.contains(filename)
    }

    pub async fn len(&self) -> usize {
        self.claimed.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.claimed.lock().await.is_empty()
    }
}
