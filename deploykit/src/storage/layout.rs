//! Deployment tree layout

use std::path::PathBuf;

use crate::errors::DeployError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// On-disk layout of the deployment tree for one host
#[derive(Debug, Clone)]
pub struct DeployLayout {
    /// Base directory for all storage
    pub base_dir: PathBuf,
}

impl DeployLayout {
    /// Create a new layout rooted at `base_dir`
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// The live deployment served by the runtime
    pub fn live_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("live"))
    }

    /// Scratch copy assembled before it replaces `live`
    pub fn live_next_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("live.next"))
    }

    /// Previous `live`, kept only for the duration of a swap
    pub fn live_prev_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("live.prev"))
    }

    /// Backup store
    pub fn backups_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("backups"))
    }

    /// Last issued backup sequence number
    pub fn sequence_file(&self) -> File {
        File::new(self.base_dir.join("backups").join(".sequence"))
    }

    /// Artifacts delivered by the transport
    pub fn staging_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("staging"))
    }

    /// Staging directory for one artifact version
    pub fn staged_artifact_dir(&self, version: &str) -> Dir {
        self.staging_dir().subdir(version)
    }

    /// Finished deployment attempt records
    pub fn attempts_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("attempts"))
    }

    /// Rolling log files
    pub fn logs_dir(&self) -> Dir {
        Dir::new(self.base_dir.join("logs"))
    }

    /// Release manifest of whatever is in `live`
    pub fn current_file(&self) -> File {
        File::new(self.base_dir.join("current.json"))
    }

    /// Cross-process deploy lock
    pub fn lock_file(&self) -> File {
        File::new(self.base_dir.join("deploy.lock"))
    }

    /// Default settings file location
    pub fn settings_file(&self) -> File {
        File::new(self.base_dir.join("settings.json"))
    }

    /// Create every directory of the layout
    pub async fn setup(&self) -> Result<(), DeployError> {
        self.live_dir().create().await?;
        self.backups_dir().create().await?;
        self.staging_dir().create().await?;
        self.attempts_dir().create().await?;
        self.logs_dir().create().await?;
        Ok(())
    }
}
