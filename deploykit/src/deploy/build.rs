//! Artifact producers
//!
//! The build toolchain itself is external: deploykit only runs its command
//! and packages what it leaves behind.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::errors::DeployError;
use crate::models::artifact::Artifact;
use crate::storage::settings::BuildSettings;

/// Builder trait
#[async_trait]
pub trait Builder: Send + Sync {
    /// Version the builder will produce
    fn version(&self) -> &str;

    /// Produce the artifact
    async fn build(&self) -> Result<Artifact, DeployError>;
}

/// An artifact that was built elsewhere
pub struct PrebuiltBuilder {
    artifact: Artifact,
}

impl PrebuiltBuilder {
    pub fn new(artifact: Artifact) -> Self {
        Self { artifact }
    }
}

#[async_trait]
impl Builder for PrebuiltBuilder {
    fn version(&self) -> &str {
        self.artifact.version()
    }

    async fn build(&self) -> Result<Artifact, DeployError> {
        Ok(self.artifact.clone())
    }
}

/// Runs the configured build command, then packages the output directory
pub struct CommandBuilder {
    version: String,
    settings: BuildSettings,
}

impl CommandBuilder {
    pub fn new(version: impl Into<String>, settings: BuildSettings) -> Self {
        Self {
            version: version.into(),
            settings,
        }
    }
}

#[async_trait]
impl Builder for CommandBuilder {
    fn version(&self) -> &str {
        &self.version
    }

    async fn build(&self) -> Result<Artifact, DeployError> {
        if let Some(command) = &self.settings.command {
            info!("Building {}: {}", self.version, command);
            let output = Command::new("sh")
                .arg("-c")
                .arg(command)
                .current_dir(&self.settings.source_dir)
                .env("DEPLOY_VERSION", &self.version)
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output();

            let output = tokio::time::timeout(self.settings.timeout(), output)
                .await
                .map_err(|_| {
                    DeployError::Build(format!(
                        "Build timed out after {:?}",
                        self.settings.timeout()
                    ))
                })?
                .map_err(|e| DeployError::Build(format!("Failed to run build command: {}", e)))?;

            if !output.status.success() {
                return Err(DeployError::Build(format!(
                    "Build command exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                )));
            }
            debug!("Build output: {}", String::from_utf8_lossy(&output.stdout).trim());
        }

        Artifact::from_dir(self.version.clone(), self.settings.output_path()).await
    }
}
