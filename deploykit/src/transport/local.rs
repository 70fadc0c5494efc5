//! Local transport: the deployment tree is on this machine

use async_trait::async_trait;
use tracing::{debug, info};

use crate::errors::DeployError;
use crate::filesys::dir::Dir;
use crate::models::artifact::Artifact;
use crate::storage::layout::DeployLayout;
use crate::storage::settings::HostSettings;
use crate::transport::Transport;

/// Copies the artifact into `staging/<version>` on the local filesystem
pub struct LocalTransport {
    layout: DeployLayout,
}

impl LocalTransport {
    pub fn new(layout: DeployLayout) -> Self {
        Self { layout }
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn send(&self, artifact: &Artifact, _host: &HostSettings) -> Result<Dir, DeployError> {
        let target = self.layout.staged_artifact_dir(artifact.version());

        if target.exists().await && target.digest().await? == artifact.digest() {
            debug!("Artifact {} already staged", artifact.version());
            return Ok(target);
        }

        info!("Staging artifact {} into {:?}", artifact.version(), target.path());
        target
            .delete()
            .await
            .map_err(|e| DeployError::Transport(e.to_string()))?;
        artifact
            .content()
            .copy_to(&target)
            .await
            .map_err(|e| DeployError::Transport(format!("Copy failed: {}", e)))?;

        let delivered = target.digest().await?;
        if delivered != artifact.digest() {
            target.delete().await?;
            return Err(DeployError::Transport(format!(
                "Digest mismatch for {}: declared {}, delivered {}",
                artifact.version(),
                artifact.digest(),
                delivered
            )));
        }

        Ok(target)
    }

    fn name(&self) -> &str {
        "local"
    }
}
