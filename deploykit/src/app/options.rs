//! Application configuration options

use std::path::PathBuf;
use std::time::Duration;

use crate::deploy::orchestrator::OrchestratorOptions;
use crate::storage::layout::DeployLayout;
use crate::storage::settings::{BuildSettings, HostSettings, Settings, SupervisorSettings};

/// What the CLI was asked to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Build (or take a prebuilt directory) and deploy `version`
    Deploy {
        version: String,
        artifact: Option<PathBuf>,
    },

    /// Print the live release, workers and newest backup
    Status,

    /// List stored backups
    Backups,

    /// Restore a backup by sequence number
    Restore { seq: u64 },

    /// Stop then start the supervised workers
    Restart,
}

impl Command {
    /// The command line that selects this command
    pub fn to_args(&self) -> Vec<String> {
        match self {
            Command::Deploy { version, artifact } => {
                let mut args = vec!["--deploy".to_string(), format!("--version-id={}", version)];
                if let Some(path) = artifact {
                    args.push(format!("--artifact={}", path.display()));
                }
                args
            }
            Command::Status => vec!["--status".to_string()],
            Command::Backups => vec!["--backups".to_string()],
            Command::Restore { seq } => vec![format!("--restore={}", seq)],
            Command::Restart => vec!["--restart".to_string()],
        }
    }
}

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Target host
    pub host: HostSettings,

    /// Deployment tree paths
    pub layout: DeployLayout,

    /// Build stage
    pub build: BuildSettings,

    /// Process supervisor
    pub supervisor: SupervisorSettings,

    /// Pipeline timeouts and health probing
    pub orchestrator: OrchestratorOptions,

    /// Delay between health probe attempts
    pub health_backoff: Duration,

    /// Backups kept
    pub retention: usize,
}

impl AppOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            host: settings.host.clone(),
            layout: DeployLayout::new(settings.deploy_root.clone()),
            build: settings.build.clone(),
            supervisor: settings.supervisor.clone(),
            orchestrator: OrchestratorOptions::from_settings(settings),
            health_backoff: settings.health.backoff(),
            retention: settings.backups.retention,
        }
    }
}

impl Default for AppOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_follow_settings() {
        let mut settings = Settings::default();
        settings.deploy_root = PathBuf::from("/srv/shop");
        settings.health.attempts = 7;
        settings.backups.retention = 2;

        let options = AppOptions::from_settings(&settings);
        assert_eq!(options.layout.base_dir, PathBuf::from("/srv/shop"));
        assert_eq!(options.orchestrator.health_attempts, 7);
        assert_eq!(options.retention, 2);
    }

    #[test]
    fn test_command_args() {
        assert_eq!(Command::Restore { seq: 12 }.to_args(), vec!["--restore=12"]);
        let deploy = Command::Deploy {
            version: "v3".to_string(),
            artifact: Some(PathBuf::from("/tmp/dist")),
        };
        assert_eq!(
            deploy.to_args(),
            vec!["--deploy", "--version-id=v3", "--artifact=/tmp/dist"]
        );
    }
}
