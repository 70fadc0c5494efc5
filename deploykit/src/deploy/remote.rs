//! Deploying to a host other than this one
//!
//! Backups, installation and pm2 always run on the host that owns the deploy
//! tree. For a remote host this side builds the artifact and ships it over
//! SSH, then runs deploykit on the host against the staged copy and reads the
//! outcome back from its exit code.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::deploy::build::Builder;
use crate::errors::DeployError;
use crate::filesys::dir::Dir;
use crate::models::artifact::Release;
use crate::models::deployment::{Outcome, EXIT_REFUSED};
use crate::storage::settings::HostSettings;
use crate::transport::ssh::{self, shell_quote, SSH_CONNECTION_FAILURE};
use crate::transport::Transport;

/// Exit status and output of a deploykit command run on the host
#[derive(Debug, Clone, Default)]
pub struct AgentOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl AgentOutput {
    fn mentions(&self, needle: &str) -> bool {
        self.stdout.contains(needle) || self.stderr.contains(needle)
    }

    /// Last non-empty line of output, for error messages
    fn last_line(&self) -> &str {
        last_non_empty(&self.stderr)
            .or_else(|| last_non_empty(&self.stdout))
            .unwrap_or("")
    }
}

fn last_non_empty(text: &str) -> Option<&str> {
    text.lines().map(str::trim).filter(|line| !line.is_empty()).last()
}

/// Runs deploykit commands on the target host
#[async_trait]
pub trait RemoteAgent: Send + Sync {
    /// Run deploykit with `args` on `host`
    async fn invoke(&self, host: &HostSettings, args: &[String])
        -> Result<AgentOutput, DeployError>;
}

/// deploykit on the host, reached with `ssh`
pub struct SshAgent {
    program: String,
    config: Option<PathBuf>,
}

impl SshAgent {
    pub fn new(program: impl Into<String>, config: Option<PathBuf>) -> Self {
        Self {
            program: program.into(),
            config,
        }
    }

    fn script(&self, args: &[String]) -> String {
        let mut words = vec![shell_quote(&self.program)];
        if let Some(config) = &self.config {
            words.push(shell_quote(&format!("--config={}", config.display())));
        }
        words.extend(args.iter().map(|arg| shell_quote(arg)));
        words.join(" ")
    }
}

#[async_trait]
impl RemoteAgent for SshAgent {
    async fn invoke(
        &self,
        host: &HostSettings,
        args: &[String],
    ) -> Result<AgentOutput, DeployError> {
        let output = ssh::exec(host, &self.script(args)).await?;
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if output.status.code() == Some(SSH_CONNECTION_FAILURE) {
            return Err(DeployError::Transport(format!(
                "ssh could not reach {}: {}",
                host.destination(),
                stderr.trim()
            )));
        }
        Ok(AgentOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr,
        })
    }
}

/// Result of a deployment run on a remote host
#[derive(Debug, Clone)]
pub struct RemoteDeployment {
    pub version: String,

    /// Artifact shipped to the host, once built
    pub release: Option<Release>,

    pub outcome: Outcome,

    /// Why the deployment did not commit, when known on this side
    pub error: Option<String>,

    /// Report printed by deploykit on the host
    pub output: String,
}

/// Builds and ships here, deploys on the host
pub struct RemoteDeployer {
    host: HostSettings,
    transport: Arc<dyn Transport>,
    agent: Arc<dyn RemoteAgent>,
    transport_timeout: Duration,
}

impl RemoteDeployer {
    pub fn new(
        host: HostSettings,
        transport: Arc<dyn Transport>,
        agent: Arc<dyn RemoteAgent>,
        transport_timeout: Duration,
    ) -> Self {
        Self {
            host,
            transport,
            agent,
            transport_timeout,
        }
    }

    pub fn host(&self) -> &HostSettings {
        &self.host
    }

    /// Build, ship, then run the deployment on the host
    ///
    /// `cancel` is honoured until the host takes over; from then on the host
    /// drives the attempt to a terminal state on its own. Returns `Err` when
    /// the host refused to start (another attempt holds it, or its settings
    /// are unusable).
    pub async fn deploy_with_cancel<C>(
        &self,
        builder: &dyn Builder,
        cancel: C,
    ) -> Result<RemoteDeployment, DeployError>
    where
        C: Future<Output = ()> + Send,
    {
        let version = builder.version().to_string();
        info!("Remote deployment of {} to {}", version, self.host.destination());

        let shipped = tokio::select! {
            biased;
            _ = cancel => Err(DeployError::Cancelled("build or transfer".to_string())),
            result = self.ship(builder) => result,
        };
        let (release, staged) = match shipped {
            Ok(shipped) => shipped,
            Err(e) => {
                warn!("Remote deployment of {} aborted: {}", version, e);
                return Ok(RemoteDeployment {
                    version,
                    release: None,
                    outcome: Outcome::Aborted,
                    error: Some(e.to_string()),
                    output: String::new(),
                });
            }
        };

        let args = vec![
            "--deploy".to_string(),
            format!("--version-id={}", version),
            format!("--artifact={}", staged.path().display()),
        ];
        let output = match self.agent.invoke(&self.host, &args).await {
            Ok(output) => output,
            Err(e) => {
                error!(
                    "Lost contact with {} while deploying {}, check it with --status: {}",
                    self.host.destination(),
                    version,
                    e
                );
                return Ok(RemoteDeployment {
                    version,
                    release: Some(release),
                    outcome: Outcome::ManualInterventionRequired,
                    error: Some(e.to_string()),
                    output: String::new(),
                });
            }
        };

        let outcome = self.outcome(&output)?;
        let error = match outcome {
            Outcome::Committed => None,
            _ => Some(output.last_line().to_string()),
        };
        info!("{} on {}: {}", version, self.host.destination(), outcome);
        Ok(RemoteDeployment {
            version,
            release: Some(release),
            outcome,
            error,
            output: output.stdout,
        })
    }

    /// Run any other deploykit command on the host
    pub async fn forward(&self, args: &[String]) -> Result<AgentOutput, DeployError> {
        self.agent.invoke(&self.host, args).await
    }

    /// Building, Packaged and Transferring, on this side
    async fn ship(&self, builder: &dyn Builder) -> Result<(Release, Dir), DeployError> {
        let artifact = builder.build().await?;
        artifact.verify().await?;

        let timeout = self.transport_timeout;
        let staged = tokio::time::timeout(timeout, self.transport.send(&artifact, &self.host))
            .await
            .map_err(|_| {
                DeployError::Transport(format!(
                    "{} transfer timed out after {:?}",
                    self.transport.name(),
                    timeout
                ))
            })??;
        Ok((artifact.release(), staged))
    }

    fn outcome(&self, output: &AgentOutput) -> Result<Outcome, DeployError> {
        match output.code {
            Some(code) => {
                if let Some(outcome) = Outcome::from_exit_code(code) {
                    return Ok(outcome);
                }
                if code == EXIT_REFUSED {
                    if output.mentions("already in progress") {
                        return Err(DeployError::ConcurrentDeployment(self.host.destination()));
                    }
                    return Err(DeployError::Config(format!(
                        "{} refused the deployment: {}",
                        self.host.destination(),
                        output.last_line()
                    )));
                }
                error!("deploykit on {} exited with {}", self.host.destination(), code);
                Ok(Outcome::ManualInterventionRequired)
            }
            None => {
                error!("deploykit on {} was killed by a signal", self.host.destination());
                Ok(Outcome::ManualInterventionRequired)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_quotes_every_word() {
        let agent = SshAgent::new(
            "/opt/deploykit/bin/deploykit",
            Some(PathBuf::from("/etc/deploykit.json")),
        );
        let script = agent.script(&["--deploy".to_string(), "--artifact=/srv/it's".to_string()]);
        assert_eq!(
            script,
            "'/opt/deploykit/bin/deploykit' '--config=/etc/deploykit.json' '--deploy' '--artifact=/srv/it'\\''s'"
        );
    }

    #[test]
    fn test_last_line_prefers_stderr() {
        let output = AgentOutput {
            code: Some(4),
            stdout: "starting\n".to_string(),
            stderr: "Unable to load settings\n\n".to_string(),
        };
        assert_eq!(output.last_line(), "Unable to load settings");

        let quiet = AgentOutput {
            code: Some(1),
            stdout: "v2 on web-1: aborted\n".to_string(),
            stderr: String::new(),
        };
        assert_eq!(quiet.last_line(), "v2 on web-1: aborted");
    }
}
