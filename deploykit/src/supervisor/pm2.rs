//! pm2 cluster-mode supervisor

use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info};

use crate::errors::DeployError;
use crate::storage::settings::SupervisorSettings;
use crate::supervisor::{wait_until_online, Supervisor, WorkerState, WorkerStatus};

/// Wraps the `pm2` CLI for one registered application
pub struct Pm2Supervisor {
    settings: SupervisorSettings,
}

#[derive(Debug, Deserialize)]
struct Pm2Process {
    name: String,
    pm_id: u32,
    #[serde(default)]
    pid: Option<u32>,
    pm2_env: Pm2Env,
}

#[derive(Debug, Deserialize)]
struct Pm2Env {
    status: String,
}

impl Pm2Supervisor {
    pub fn new(settings: SupervisorSettings) -> Self {
        Self { settings }
    }

    async fn pm2(&self, args: &[&str]) -> Result<String, DeployError> {
        debug!("Running {} {}", self.settings.pm2_bin, args.join(" "));
        let output = Command::new(&self.settings.pm2_bin)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.settings.command_timeout(), output)
            .await
            .map_err(|_| {
                DeployError::Supervisor(format!(
                    "pm2 {} timed out after {:?}",
                    args.join(" "),
                    self.settings.command_timeout()
                ))
            })?
            .map_err(|e| DeployError::Supervisor(format!("Failed to run pm2: {}", e)))?;

        if !output.status.success() {
            return Err(DeployError::Supervisor(format!(
                "pm2 {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Current workers; fails when the application is not registered
    async fn registered_workers(&self) -> Result<Vec<WorkerStatus>, DeployError> {
        let workers = self.status().await?;
        if workers.is_empty() {
            return Err(DeployError::Supervisor(format!(
                "No process definition registered for '{}'",
                self.settings.app_name
            )));
        }
        Ok(workers)
    }

    async fn await_workers(&self, expected: usize) -> Result<(), DeployError> {
        let workers = wait_until_online(
            self,
            expected,
            self.settings.ready_timeout(),
            self.settings.poll_interval(),
        )
        .await?;
        info!("{} workers of '{}' online", workers.len(), self.settings.app_name);
        Ok(())
    }
}

#[async_trait]
impl Supervisor for Pm2Supervisor {
    async fn reload(&self) -> Result<(), DeployError> {
        let expected = self.registered_workers().await?.len();
        info!("Reloading '{}' ({} workers)", self.settings.app_name, expected);
        self.pm2(&["reload", &self.settings.app_name, "--update-env"])
            .await?;
        self.await_workers(expected).await
    }

    async fn restart(&self) -> Result<(), DeployError> {
        let expected = self.registered_workers().await?.len();
        info!("Restarting '{}'", self.settings.app_name);
        self.pm2(&["restart", &self.settings.app_name, "--update-env"])
            .await?;
        self.await_workers(expected).await
    }

    async fn stop(&self) -> Result<(), DeployError> {
        self.registered_workers().await?;
        info!("Stopping '{}'", self.settings.app_name);
        self.pm2(&["stop", &self.settings.app_name]).await?;
        Ok(())
    }

    async fn status(&self) -> Result<Vec<WorkerStatus>, DeployError> {
        let output = self.pm2(&["jlist"]).await?;
        parse_jlist(&output, &self.settings.app_name)
    }
}

/// Parse `pm2 jlist` output, keeping the workers of `app_name`
///
/// pm2 may print banner lines around the JSON array, some of them starting
/// with `[PM2]`, so every line opening with `[` is tried in turn.
fn parse_jlist(output: &str, app_name: &str) -> Result<Vec<WorkerStatus>, DeployError> {
    let mut last_error = None;
    for start in array_candidates(output) {
        let mut stream =
            serde_json::Deserializer::from_str(&output[start..]).into_iter::<Vec<Pm2Process>>();
        match stream.next() {
            Some(Ok(processes)) => {
                return Ok(processes
                    .into_iter()
                    .filter(|p| p.name == app_name)
                    .map(|p| WorkerStatus {
                        id: p.pm_id,
                        name: p.name,
                        pid: p.pid.filter(|pid| *pid != 0),
                        state: map_status(&p.pm2_env.status),
                    })
                    .collect());
            }
            Some(Err(e)) => last_error = Some(e),
            None => {}
        }
    }

    Err(DeployError::Supervisor(match last_error {
        Some(e) => format!("Invalid pm2 jlist output: {}", e),
        None => format!("Unexpected pm2 jlist output: '{}'", output.trim()),
    }))
}

/// Byte offsets of lines whose first non-blank character is `[`
fn array_candidates(output: &str) -> Vec<usize> {
    let mut starts = Vec::new();
    let mut offset = 0;
    for line in output.split_inclusive('\n') {
        let trimmed = line.trim_start();
        if trimmed.starts_with('[') {
            starts.push(offset + line.len() - trimmed.len());
        }
        offset += line.len();
    }
    starts
}

fn map_status(status: &str) -> WorkerState {
    match status {
        "online" => WorkerState::Online,
        "launching" | "waiting restart" | "one-launch-status" => WorkerState::Starting,
        "errored" => WorkerState::Errored,
        _ => WorkerState::Stopped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const JLIST: &str = r#"[
        {"name": "api", "pm_id": 0, "pid": 4100, "pm2_env": {"status": "online", "exec_mode": "cluster_mode"}},
        {"name": "api", "pm_id": 1, "pid": 0, "pm2_env": {"status": "launching"}},
        {"name": "api", "pm_id": 2, "pm2_env": {"status": "errored"}},
        {"name": "worker", "pm_id": 3, "pid": 4200, "pm2_env": {"status": "stopped"}}
    ]"#;

    #[test]
    fn test_parse_jlist_filters_by_app() {
        let workers = parse_jlist(JLIST, "api").unwrap();
        assert_eq!(workers.len(), 3);
        assert_eq!(workers[0].state, WorkerState::Online);
        assert_eq!(workers[0].pid, Some(4100));
        assert_eq!(workers[1].state, WorkerState::Starting);
        assert_eq!(workers[1].pid, None);
        assert_eq!(workers[2].state, WorkerState::Errored);
    }

    #[test]
    fn test_parse_jlist_skips_banner() {
        let output = format!(">>>> In-memory PM2 is out-of-date\n{}", JLIST);
        let workers = parse_jlist(&output, "worker").unwrap();
        assert_eq!(workers.len(), 1);
        assert_eq!(workers[0].state, WorkerState::Stopped);
    }

    #[test]
    fn test_parse_jlist_skips_bracketed_daemon_banner() {
        let output = format!(
            "[PM2] Spawning PM2 daemon with pm2_home=/home/app/.pm2\n[PM2] PM2 Successfully daemonized\n{}\n",
            JLIST
        );
        let workers = parse_jlist(&output, "api").unwrap();
        assert_eq!(workers.len(), 3);
        assert_eq!(workers[0].pid, Some(4100));

        let empty = parse_jlist("[PM2] Spawning PM2 daemon\n[]\n", "api").unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_parse_jlist_unknown_app_is_empty() {
        assert!(parse_jlist(JLIST, "missing").unwrap().is_empty());
        assert!(parse_jlist("garbage", "api").is_err());
    }
}
