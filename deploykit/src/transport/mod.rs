//! Artifact transport
//!
//! Moves an artifact's bytes into the staging area of the target host and
//! checks the delivered content against the artifact's declared digest.
//! Transports never retry on their own; the orchestrator bounds each call
//! with the caller-supplied timeout.

pub mod local;
pub mod ssh;

use async_trait::async_trait;

use crate::errors::DeployError;
use crate::filesys::dir::Dir;
use crate::models::artifact::Artifact;
use crate::storage::settings::HostSettings;

pub use local::LocalTransport;
pub use ssh::SshTransport;

/// Transport trait
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver `artifact` to `host` and verify its digest
    ///
    /// Idempotent: sending the same artifact twice leaves one verified copy.
    /// Returns the staging directory holding the delivered content.
    async fn send(&self, artifact: &Artifact, host: &HostSettings) -> Result<Dir, DeployError>;

    /// Transport name, for logging
    fn name(&self) -> &str;
}
