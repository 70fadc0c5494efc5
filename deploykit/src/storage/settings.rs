//! Settings file management

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Deserializer, Serialize};

use crate::errors::DeployError;
use crate::logs::LogLevel;
use crate::storage::history::DEFAULT_ATTEMPT_HISTORY;

/// Deploykit settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Write JSON logs to stdout
    #[serde(default)]
    pub json_logs: bool,

    /// Root of the deployment tree on this host
    #[serde(default = "default_deploy_root")]
    pub deploy_root: PathBuf,

    /// Target host connection parameters
    #[serde(default)]
    pub host: HostSettings,

    /// Build toolchain invocation
    #[serde(default)]
    pub build: BuildSettings,

    /// Artifact transport
    #[serde(default)]
    pub transport: TransportSettings,

    /// Process supervisor
    #[serde(default)]
    pub supervisor: SupervisorSettings,

    /// Post-deploy health checks
    #[serde(default)]
    pub health: HealthSettings,

    /// Backup retention
    #[serde(default)]
    pub backups: BackupSettings,
}

fn default_deploy_root() -> PathBuf {
    PathBuf::from("/var/lib/deploykit")
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            json_logs: false,
            deploy_root: default_deploy_root(),
            host: HostSettings::default(),
            build: BuildSettings::default(),
            transport: TransportSettings::default(),
            supervisor: SupervisorSettings::default(),
            health: HealthSettings::default(),
            backups: BackupSettings::default(),
        }
    }
}

impl Settings {
    /// Reject settings that would make the pipeline unusable
    pub fn validate(&self) -> Result<(), DeployError> {
        url::Url::parse(&self.health.endpoint).map_err(|e| {
            DeployError::Config(format!(
                "Invalid health endpoint '{}': {}",
                self.health.endpoint, e
            ))
        })?;

        if self.backups.retention == 0 {
            return Err(DeployError::Config(
                "Backup retention must keep at least one backup".to_string(),
            ));
        }

        if self.supervisor.app_name.trim().is_empty() {
            return Err(DeployError::Config(
                "Supervisor app_name must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

/// Target host settings
///
/// Connection parameters. A non-local host is deployed by shipping the
/// artifact over SSH and running `remote_program` there.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostSettings {
    /// Host address. `localhost` or `local` means this machine owns the deploy tree
    #[serde(default = "default_host_address")]
    pub address: String,

    /// SSH port
    #[serde(default = "default_ssh_port")]
    pub port: u16,

    /// SSH user
    #[serde(default)]
    pub user: Option<String>,

    /// SSH private key
    #[serde(default)]
    pub identity_file: Option<PathBuf>,

    /// SSH password, handed to `sshpass` through the environment
    #[serde(default, deserialize_with = "deserialize_secret", skip_serializing)]
    pub password: Option<SecretString>,

    /// deploykit executable on a remote host
    #[serde(default = "default_remote_program")]
    pub remote_program: String,

    /// Settings file passed to deploykit on a remote host
    #[serde(default)]
    pub remote_config: Option<PathBuf>,
}

fn default_host_address() -> String {
    "localhost".to_string()
}

fn default_remote_program() -> String {
    "deploykit".to_string()
}

fn default_ssh_port() -> u16 {
    22
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.map(SecretString::from))
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            address: default_host_address(),
            port: default_ssh_port(),
            user: None,
            identity_file: None,
            password: None,
            remote_program: default_remote_program(),
            remote_config: None,
        }
    }
}

impl HostSettings {
    /// Whether the host is this machine
    pub fn is_local(&self) -> bool {
        matches!(self.address.as_str(), "localhost" | "local" | "127.0.0.1" | "::1")
    }

    /// `user@address` or `address`
    pub fn destination(&self) -> String {
        match &self.user {
            Some(user) => format!("{}@{}", user, self.address),
            None => self.address.clone(),
        }
    }
}

/// Build settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildSettings {
    /// Shell command producing the build output, e.g. `npm ci && npm run build`
    #[serde(default)]
    pub command: Option<String>,

    /// Working directory of the build command
    #[serde(default = "default_source_dir")]
    pub source_dir: PathBuf,

    /// Build output directory, relative to `source_dir` unless absolute
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Build timeout in seconds
    #[serde(default = "default_build_timeout")]
    pub timeout_secs: u64,
}

fn default_source_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("dist")
}

fn default_build_timeout() -> u64 {
    600
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            command: None,
            source_dir: default_source_dir(),
            output_dir: default_output_dir(),
            timeout_secs: default_build_timeout(),
        }
    }
}

impl BuildSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Resolved build output directory
    pub fn output_path(&self) -> PathBuf {
        if self.output_dir.is_absolute() {
            self.output_dir.clone()
        } else {
            self.source_dir.join(&self.output_dir)
        }
    }
}

/// Transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportSettings {
    /// Upper bound for a single transfer, digest check included
    #[serde(default = "default_transport_timeout")]
    pub timeout_secs: u64,
}

fn default_transport_timeout() -> u64 {
    300
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_transport_timeout(),
        }
    }
}

impl TransportSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Process supervisor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorSettings {
    /// Process definition name registered with pm2
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// pm2 executable
    #[serde(default = "default_pm2_bin")]
    pub pm2_bin: String,

    /// Timeout for a single pm2 command
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    /// Time allowed for every worker to report online after a reload
    #[serde(default = "default_ready_timeout")]
    pub ready_timeout_secs: u64,

    /// Status polling interval while waiting for workers
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

fn default_app_name() -> String {
    "app".to_string()
}

fn default_pm2_bin() -> String {
    "pm2".to_string()
}

fn default_command_timeout() -> u64 {
    60
}

fn default_ready_timeout() -> u64 {
    60
}

fn default_poll_interval() -> u64 {
    500
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            pm2_bin: default_pm2_bin(),
            command_timeout_secs: default_command_timeout(),
            ready_timeout_secs: default_ready_timeout(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

impl SupervisorSettings {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Health check settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSettings {
    /// URL probed after every reload
    #[serde(default = "default_health_endpoint")]
    pub endpoint: String,

    /// Per-request timeout in milliseconds
    #[serde(default = "default_health_timeout")]
    pub timeout_ms: u64,

    /// Attempts before declaring the service unhealthy
    #[serde(default = "default_health_attempts")]
    pub attempts: u32,

    /// Fixed delay between attempts in milliseconds
    #[serde(default = "default_health_backoff")]
    pub backoff_ms: u64,
}

fn default_health_endpoint() -> String {
    "http://127.0.0.1:3000/health".to_string()
}

fn default_health_timeout() -> u64 {
    5_000
}

fn default_health_attempts() -> u32 {
    3
}

fn default_health_backoff() -> u64 {
    2_000
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            endpoint: default_health_endpoint(),
            timeout_ms: default_health_timeout(),
            attempts: default_health_attempts(),
            backoff_ms: default_health_backoff(),
        }
    }
}

impl HealthSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

/// Backup settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupSettings {
    /// Number of most recent backups kept
    #[serde(default = "default_retention")]
    pub retention: usize,

    /// Number of finished attempt records kept under `attempts/`
    #[serde(default = "default_attempt_history")]
    pub attempt_history: usize,
}

fn default_retention() -> usize {
    5
}

fn default_attempt_history() -> usize {
    DEFAULT_ATTEMPT_HISTORY
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            retention: default_retention(),
            attempt_history: default_attempt_history(),
        }
    }
}
