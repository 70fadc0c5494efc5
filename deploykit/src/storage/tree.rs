//! Live deployment directory and its exclusive-access lock

use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::errors::DeployError;
use crate::filesys::dir::Dir;
use crate::models::artifact::Release;
use crate::storage::layout::DeployLayout;

/// The deployment tree of one host
///
/// Every operation that writes `live/` or the backup store holds the tree
/// lock, so backup creation, pruning, restore and installation never
/// interleave.
#[derive(Debug)]
pub struct DeployTree {
    layout: DeployLayout,
    lock: Mutex<()>,
}

/// Proof that the caller holds the tree lock
pub struct TreeGuard<'a> {
    _guard: MutexGuard<'a, ()>,
}

impl DeployTree {
    pub fn new(layout: DeployLayout) -> Self {
        Self {
            layout,
            lock: Mutex::new(()),
        }
    }

    pub fn layout(&self) -> &DeployLayout {
        &self.layout
    }

    /// Acquire exclusive access to the tree
    pub async fn lock(&self) -> TreeGuard<'_> {
        TreeGuard {
            _guard: self.lock.lock().await,
        }
    }

    /// Create the layout and finish a swap interrupted by a crash
    pub async fn prepare(&self) -> Result<(), DeployError> {
        let _guard = self.lock().await;
        let live = self.layout.live_dir();
        let prev = self.layout.live_prev_dir();

        if !live.exists().await && prev.exists().await {
            warn!("Found interrupted swap, restoring {:?}", prev.path());
            prev.rename_to(&live).await?;
        }
        self.layout.live_next_dir().delete().await?;
        self.layout.setup().await
    }

    /// Content digest of `live/`
    pub async fn live_digest(&self) -> Result<String, DeployError> {
        self.layout.live_dir().digest().await
    }

    /// Release currently in `live/`, if recorded
    pub async fn current_release(&self) -> Result<Option<Release>, DeployError> {
        let file = self.layout.current_file();
        if !file.exists().await {
            return Ok(None);
        }
        Ok(Some(file.read_json().await?))
    }

    /// Replace `live/` with a staged artifact
    ///
    /// The staged content must hash to `release.digest`; a missing or
    /// mismatched staging dir is refused before `live.next` is written.
    pub async fn install(&self, staged: &Dir, release: &Release) -> Result<(), DeployError> {
        let guard = self.lock().await;
        if !staged.exists().await {
            return Err(DeployError::Transport(format!(
                "Staged content for {} not found at {:?}",
                release.version,
                staged.path()
            )));
        }
        let actual = staged.digest().await?;
        if actual != release.digest {
            return Err(DeployError::Transport(format!(
                "Staged content for {} does not match: expected {}, found {}",
                release.version, release.digest, actual
            )));
        }

        info!("Installing {} into {:?}", release.version, self.layout.live_dir().path());
        self.replace_live(&guard, staged, Some(release)).await
    }

    /// Swap `source` into `live/` and record `release` as current
    ///
    /// `source` is copied to `live.next`, then `live` -> `live.prev`,
    /// `live.next` -> `live`, and `live.prev` is removed. The caller must hold
    /// the tree lock.
    pub(crate) async fn replace_live(
        &self,
        _guard: &TreeGuard<'_>,
        source: &Dir,
        release: Option<&Release>,
    ) -> Result<(), DeployError> {
        let live = self.layout.live_dir();
        let next = self.layout.live_next_dir();
        let prev = self.layout.live_prev_dir();

        next.delete().await?;
        source.copy_to(&next).await?;

        prev.delete().await?;
        if live.exists().await {
            live.rename_to(&prev).await?;
        }
        next.rename_to(&live).await?;
        Dir::new(&self.layout.base_dir).sync().await?;
        prev.delete().await?;

        match release {
            Some(release) => self.layout.current_file().write_json(release).await?,
            None => self.layout.current_file().delete().await?,
        }

        debug!("Live directory replaced from {:?}", source.path());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_install_replaces_live_and_records_release() {
        let tmp = tempfile::tempdir().unwrap();
        let tree = DeployTree::new(DeployLayout::new(tmp.path().join("root")));
        tree.prepare().await.unwrap();

        let live = tree.layout().live_dir();
        live.file("stale.txt").write_string("old").await.unwrap();

        let staged = Dir::new(tmp.path().join("staged"));
        staged.file("app.js").write_string("new").await.unwrap();
        let release = Release {
            version: "v2".to_string(),
            digest: staged.digest().await.unwrap(),
        };

        tree.install(&staged, &release).await.unwrap();

        assert_eq!(tree.live_digest().await.unwrap(), release.digest);
        assert!(!live.file("stale.txt").exists().await);
        assert_eq!(tree.current_release().await.unwrap(), Some(release));
        assert!(!tree.layout().live_prev_dir().exists().await);
    }

    #[tokio::test]
    async fn test_install_refuses_missing_or_mismatched_staging() {
        let tmp = tempfile::tempdir().unwrap();
        let tree = DeployTree::new(DeployLayout::new(tmp.path().join("root")));
        tree.prepare().await.unwrap();
        let live = tree.layout().live_dir();
        live.file("app.js").write_string("v1").await.unwrap();
        let before = tree.live_digest().await.unwrap();

        let staged = Dir::new(tmp.path().join("staged"));
        staged.file("app.js").write_string("v2").await.unwrap();
        let release = Release {
            version: "v2".to_string(),
            digest: staged.digest().await.unwrap(),
        };

        let missing = tree.install(&Dir::new(tmp.path().join("gone")), &release).await;
        assert!(matches!(missing, Err(DeployError::Transport(_))));

        staged.file("app.js").write_string("tampered").await.unwrap();
        let mismatched = tree.install(&staged, &release).await;
        assert!(matches!(mismatched, Err(DeployError::Transport(_))));

        assert_eq!(tree.live_digest().await.unwrap(), before);
        assert!(!tree.layout().live_next_dir().exists().await);
        assert_eq!(tree.current_release().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_prepare_recovers_interrupted_swap() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = DeployLayout::new(tmp.path());
        layout
            .live_prev_dir()
            .file("app.js")
            .write_string("v1")
            .await
            .unwrap();

        let tree = DeployTree::new(layout.clone());
        tree.prepare().await.unwrap();

        assert!(layout.live_dir().file("app.js").exists().await);
        assert!(!layout.live_prev_dir().exists().await);
    }
}
