//! Bounded, ordered store of live-deployment snapshots

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::errors::DeployError;
use crate::filesys::dir::Dir;
use crate::models::backup::Backup;
use crate::storage::tree::{DeployTree, TreeGuard};
use crate::utils::generate_uuid;

const MANIFEST_FILE: &str = "backup.json";
const CONTENT_DIR: &str = "content";

/// Default number of retained backups
pub const DEFAULT_RETENTION: usize = 5;

/// A backup found in the store
#[derive(Debug, Clone)]
struct StoredBackup {
    backup: Backup,
    dir: Dir,
}

/// Backup manager
pub struct BackupManager {
    tree: Arc<DeployTree>,
    retention: usize,
}

impl BackupManager {
    /// Create a manager keeping at most `retention` backups (at least one)
    pub fn new(tree: Arc<DeployTree>, retention: usize) -> Self {
        Self {
            tree,
            retention: retention.max(1),
        }
    }

    pub fn retention(&self) -> usize {
        self.retention
    }

    /// Snapshot the live deployment, assign the next sequence number, then prune
    ///
    /// The snapshot is fsynced and renamed into place before this returns, so
    /// it is durable before any caller overwrites `live/`.
    pub async fn create(&self) -> Result<Backup, DeployError> {
        let guard = self.tree.lock().await;
        let layout = self.tree.layout();
        let store = layout.backups_dir();
        store.create().await?;

        let tmp = store.subdir(&format!(".tmp-{}", generate_uuid()));
        let backup = match self.write_snapshot(&guard, &tmp).await {
            Ok(backup) => backup,
            Err(e) => {
                if let Err(cleanup) = tmp.delete().await {
                    warn!("Failed to clean up partial backup {:?}: {}", tmp.path(), cleanup);
                }
                return Err(e);
            }
        };

        info!(
            "Created backup {} ({})",
            backup.seq,
            backup
                .release
                .as_ref()
                .map(|r| r.version.as_str())
                .unwrap_or("no release")
        );

        self.prune(&guard).await?;
        Ok(backup)
    }

    async fn write_snapshot(&self, _guard: &TreeGuard<'_>, tmp: &Dir) -> Result<Backup, DeployError> {
        let layout = self.tree.layout();
        let store = layout.backups_dir();
        let seq = self.next_seq().await?;

        // An empty or missing live dir is still snapshotted, as an empty backup
        let content = tmp.subdir(CONTENT_DIR);
        let live = layout.live_dir();
        if live.exists().await {
            live.copy_to(&content).await?;
        } else {
            content.create().await?;
        }

        let backup = Backup {
            seq,
            created_at: Utc::now(),
            release: self.tree.current_release().await?,
            digest: content.digest().await?,
        };
        tmp.file(MANIFEST_FILE).write_json(&backup).await?;
        tmp.sync().await?;

        tmp.rename_to(&store.subdir(&backup.dir_name())).await?;
        store.sync().await?;
        layout
            .sequence_file()
            .write_atomic(seq.to_string().as_bytes())
            .await?;

        Ok(backup)
    }

    // Sequence numbers are never reused: take the larger of the persisted
    // counter and the highest stored entry.
    async fn next_seq(&self) -> Result<u64, DeployError> {
        let sequence_file = self.tree.layout().sequence_file();
        let recorded = if sequence_file.exists().await {
            sequence_file
                .read_string()
                .await?
                .trim()
                .parse::<u64>()
                .unwrap_or(0)
        } else {
            0
        };
        let stored = self
            .entries()
            .await?
            .last()
            .map(|e| e.backup.seq)
            .unwrap_or(0);
        Ok(recorded.max(stored) + 1)
    }

    async fn prune(&self, _guard: &TreeGuard<'_>) -> Result<(), DeployError> {
        let entries = self.entries().await?;
        if entries.len() <= self.retention {
            return Ok(());
        }

        let excess = entries.len() - self.retention;
        for entry in entries.into_iter().take(excess) {
            debug!("Evicting backup {}", entry.backup.seq);
            entry.dir.delete().await?;
        }
        Ok(())
    }

    /// Replace the live deployment with backup `seq`
    ///
    /// Fails with `DeployError::Restore` when the backup is missing or its
    /// content no longer matches the digest recorded at creation.
    pub async fn restore(&self, seq: u64) -> Result<Backup, DeployError> {
        let guard = self.tree.lock().await;

        let entry = self
            .entries()
            .await
            .map_err(|e| DeployError::Restore(format!("Cannot read backup store: {}", e)))?
            .into_iter()
            .find(|e| e.backup.seq == seq)
            .ok_or_else(|| DeployError::Restore(format!("Backup {} does not exist", seq)))?;

        let content = entry.dir.subdir(CONTENT_DIR);
        let actual = content
            .digest()
            .await
            .map_err(|e| DeployError::Restore(format!("Cannot read backup {}: {}", seq, e)))?;
        if actual != entry.backup.digest {
            return Err(DeployError::Restore(format!(
                "Backup {} is corrupt: expected {}, found {}",
                seq, entry.backup.digest, actual
            )));
        }

        self.tree
            .replace_live(&guard, &content, entry.backup.release.as_ref())
            .await
            .map_err(|e| DeployError::Restore(format!("Failed to restore backup {}: {}", seq, e)))?;

        info!("Restored backup {}", seq);
        Ok(entry.backup)
    }

    /// Highest stored sequence number
    pub async fn latest_seq(&self) -> Result<Option<u64>, DeployError> {
        Ok(self.entries().await?.last().map(|e| e.backup.seq))
    }

    /// Stored backups, ordered by sequence number
    pub async fn list(&self) -> Result<Vec<Backup>, DeployError> {
        Ok(self.entries().await?.into_iter().map(|e| e.backup).collect())
    }

    async fn entries(&self) -> Result<Vec<StoredBackup>, DeployError> {
        let store = self.tree.layout().backups_dir();
        let mut entries = Vec::new();

        for path in store.list_dirs().await? {
            let name = match path.file_name() {
                Some(name) => name.to_string_lossy().into_owned(),
                None => continue,
            };
            if name.starts_with('.') || Backup::parse_seq(&name).is_none() {
                continue;
            }

            let dir = Dir::new(&path);
            match dir.file(MANIFEST_FILE).read_json::<Backup>().await {
                Ok(backup) => entries.push(StoredBackup { backup, dir }),
                Err(e) => warn!("Skipping unreadable backup {:?}: {}", path, e),
            }
        }

        entries.sort_by_key(|e| e.backup.seq);
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::layout::DeployLayout;

    async fn setup(retention: usize) -> (tempfile::TempDir, Arc<DeployTree>, BackupManager) {
        let tmp = tempfile::tempdir().unwrap();
        let tree = Arc::new(DeployTree::new(DeployLayout::new(tmp.path())));
        tree.prepare().await.unwrap();
        let manager = BackupManager::new(tree.clone(), retention);
        (tmp, tree, manager)
    }

    #[tokio::test]
    async fn test_empty_store_has_no_latest() {
        let (_tmp, _tree, manager) = setup(DEFAULT_RETENTION).await;
        assert_eq!(manager.latest_seq().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_sequence_survives_eviction() {
        let (_tmp, _tree, manager) = setup(1).await;
        manager.create().await.unwrap();
        manager.create().await.unwrap();
        let third = manager.create().await.unwrap();

        assert_eq!(third.seq, 3);
        let seqs: Vec<u64> = manager.list().await.unwrap().iter().map(|b| b.seq).collect();
        assert_eq!(seqs, vec![3]);
    }

    #[tokio::test]
    async fn test_snapshot_of_missing_live_is_empty() {
        let (_tmp, tree, manager) = setup(DEFAULT_RETENTION).await;
        tree.layout().live_dir().delete().await.unwrap();

        let backup = manager.create().await.unwrap();
        assert_eq!(backup.digest, Dir::new("/nonexistent").digest().await.unwrap());
        assert!(backup.release.is_none());
    }

    #[tokio::test]
    async fn test_restore_missing_seq_is_restore_error() {
        let (_tmp, _tree, manager) = setup(DEFAULT_RETENTION).await;
        manager.create().await.unwrap();
        assert!(matches!(manager.restore(9).await, Err(DeployError::Restore(_))));
    }

    #[tokio::test]
    async fn test_restore_swaps_through_live_next() {
        let (_tmp, tree, manager) = setup(DEFAULT_RETENTION).await;
        let live = tree.layout().live_dir();
        live.file("app.js").write_string("v1").await.unwrap();
        let backup = manager.create().await.unwrap();
        live.file("app.js").write_string("v2").await.unwrap();

        manager.restore(backup.seq).await.unwrap();

        assert_eq!(tree.live_digest().await.unwrap(), backup.digest);
        assert!(!tree.layout().live_next_dir().exists().await);
        assert!(!tree.layout().live_prev_dir().exists().await);
        assert!(!tree.layout().base_dir.join("live.restore-tmp").exists());
    }

    #[tokio::test]
    async fn test_restore_rejects_corrupt_backup() {
        let (_tmp, tree, manager) = setup(DEFAULT_RETENTION).await;
        let live = tree.layout().live_dir();
        live.file("app.js").write_string("v1").await.unwrap();
        let backup = manager.create().await.unwrap();

        let content = tree
            .layout()
            .backups_dir()
            .subdir(&backup.dir_name())
            .subdir(CONTENT_DIR);
        content.file("app.js").write_string("bitrot").await.unwrap();
        live.file("app.js").write_string("v2").await.unwrap();

        assert!(matches!(
            manager.restore(backup.seq).await,
            Err(DeployError::Restore(_))
        ));
        // Live content untouched by the refused restore
        assert_eq!(live.file("app.js").read_string().await.unwrap(), "v2");
    }
}
