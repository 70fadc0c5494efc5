//! Artifact models

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::DeployError;
use crate::filesys::dir::Dir;

/// An immutable, versioned, content-addressed build output
///
/// The content is the directory tree at `path`. There are no setters: a new
/// deploy always uses a new `Artifact`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    version: String,
    digest: String,
    created_at: DateTime<Utc>,
    path: PathBuf,
}

impl Artifact {
    /// Wrap a build output whose digest was declared by the build toolchain
    pub fn new(
        version: impl Into<String>,
        digest: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> Result<Self, DeployError> {
        let version = version.into();
        validate_version(&version)?;
        Ok(Self {
            version,
            digest: digest.into(),
            created_at: Utc::now(),
            path: path.into(),
        })
    }

    /// Package a build output directory, computing its digest
    pub async fn from_dir(
        version: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> Result<Self, DeployError> {
        let path = path.into();
        let content = Dir::new(&path);
        if !content.exists().await {
            return Err(DeployError::Build(format!(
                "Build output not found: {}",
                path.display()
            )));
        }
        let digest = content.digest().await?;
        Self::new(version, digest, path)
    }

    /// Version identifier
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Declared content digest (`sha256:<hex>`)
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Creation timestamp
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Location of the content tree
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Content tree
    pub fn content(&self) -> Dir {
        Dir::new(&self.path)
    }

    /// Reference recorded in manifests and backups
    pub fn release(&self) -> Release {
        Release {
            version: self.version.clone(),
            digest: self.digest.clone(),
        }
    }

    /// Recompute the content digest and compare it with the declared one
    pub async fn verify(&self) -> Result<(), DeployError> {
        let content = self.content();
        if !content.exists().await {
            return Err(DeployError::Build(format!(
                "Artifact {} content missing at {}",
                self.version,
                self.path.display()
            )));
        }
        let actual = content.digest().await?;
        if actual != self.digest {
            return Err(DeployError::Build(format!(
                "Artifact {} digest mismatch: declared {}, actual {}",
                self.version, self.digest, actual
            )));
        }
        Ok(())
    }
}

/// Version and digest of an artifact, without its content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    pub version: String,
    pub digest: String,
}

// Versions name staging directories, so they must be a single safe path component.
fn validate_version(version: &str) -> Result<(), DeployError> {
    let valid = !version.is_empty()
        && version != "."
        && version != ".."
        && version
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '+'));
    if valid {
        Ok(())
    } else {
        Err(DeployError::Build(format!("Invalid artifact version: '{}'", version)))
    }
}
