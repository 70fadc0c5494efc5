//! Application state management

use std::sync::Arc;

use tracing::info;

use crate::app::options::AppOptions;
use crate::backup::BackupManager;
use crate::deploy::orchestrator::Orchestrator;
use crate::deploy::remote::{RemoteDeployer, SshAgent};
use crate::errors::DeployError;
use crate::health::HttpHealthVerifier;
use crate::storage::settings::BuildSettings;
use crate::storage::tree::DeployTree;
use crate::supervisor::Pm2Supervisor;
use crate::transport::{LocalTransport, SshTransport};

/// Where commands are carried out
pub enum Target {
    /// This machine owns the deploy tree
    Local(Orchestrator),

    /// deploykit on the host owns it; this side builds and ships
    Remote(RemoteDeployer),
}

/// Main application state
pub struct AppState {
    pub target: Target,

    /// Build stage configuration
    pub build: BuildSettings,
}

impl AppState {
    /// Initialize application state
    pub async fn init(options: &AppOptions) -> Result<Self, DeployError> {
        if !options.host.is_local() {
            info!(
                "Target {} via ssh, running '{}' on the host",
                options.host.destination(),
                options.host.remote_program
            );
            let transport = Arc::new(SshTransport::new(options.layout.clone()));
            let agent = Arc::new(SshAgent::new(
                options.host.remote_program.clone(),
                options.host.remote_config.clone(),
            ));
            let remote = RemoteDeployer::new(
                options.host.clone(),
                transport,
                agent,
                options.orchestrator.transport_timeout,
            );
            return Ok(Self {
                target: Target::Remote(remote),
                build: options.build.clone(),
            });
        }

        info!("Initializing deployment tree at {:?}", options.layout.base_dir);

        let tree = Arc::new(DeployTree::new(options.layout.clone()));
        tree.prepare().await?;

        let backups = Arc::new(BackupManager::new(tree.clone(), options.retention));
        let transport = Arc::new(LocalTransport::new(options.layout.clone()));
        let supervisor = Arc::new(Pm2Supervisor::new(options.supervisor.clone()));
        let health = Arc::new(HttpHealthVerifier::new(options.health_backoff)?);

        info!(
            "Target {} (local), app '{}'",
            options.host.destination(),
            options.supervisor.app_name
        );

        let orchestrator = Orchestrator::new(
            options.host.clone(),
            options.orchestrator.clone(),
            tree,
            backups,
            transport,
            supervisor,
            health,
        );

        Ok(Self {
            target: Target::Local(orchestrator),
            build: options.build.clone(),
        })
    }
}
