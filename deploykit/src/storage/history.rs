//! Bounded log of finished attempts under `attempts/`

use tracing::{debug, warn};

use crate::errors::DeployError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::models::deployment::DeploymentAttempt;

/// Default number of attempt records kept
pub const DEFAULT_ATTEMPT_HISTORY: usize = 50;

/// Attempt records, one `<id>.json` per attempt
pub struct AttemptHistory {
    dir: Dir,
    keep: usize,
}

impl AttemptHistory {
    /// Keep the newest `keep` records (at least one)
    pub fn new(dir: Dir, keep: usize) -> Self {
        Self {
            dir,
            keep: keep.max(1),
        }
    }

    /// Persist `attempt`, then evict the oldest records beyond the limit
    pub async fn record(&self, attempt: &DeploymentAttempt) -> Result<(), DeployError> {
        self.dir
            .file(&format!("{}.json", attempt.id))
            .write_json(attempt)
            .await?;
        self.prune().await
    }

    /// Stored attempts, oldest first
    pub async fn list(&self) -> Result<Vec<DeploymentAttempt>, DeployError> {
        Ok(self.entries().await?.into_iter().map(|(attempt, _)| attempt).collect())
    }

    async fn prune(&self) -> Result<(), DeployError> {
        let entries = self.entries().await?;
        if entries.len() <= self.keep {
            return Ok(());
        }

        let excess = entries.len() - self.keep;
        for (attempt, file) in entries.into_iter().take(excess) {
            debug!("Evicting attempt record {}", attempt.id);
            file.delete().await?;
        }
        Ok(())
    }

    async fn entries(&self) -> Result<Vec<(DeploymentAttempt, File)>, DeployError> {
        let mut entries = Vec::new();
        for path in self.dir.list_files().await? {
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let file = File::new(&path);
            match file.read_json::<DeploymentAttempt>().await {
                Ok(attempt) => entries.push((attempt, file)),
                Err(e) => warn!("Skipping unreadable attempt record {:?}: {}", path, e),
            }
        }

        entries.sort_by(|(a, _), (b, _)| {
            a.started_at
                .cmp(&b.started_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(entries)
    }
}
