//! SSH transport: `scp -r` push plus a remote `sha256sum` digest check

use std::process::{Output, Stdio};

use async_trait::async_trait;
use secrecy::ExposeSecret;
use tokio::process::Command;
use tracing::{debug, info};

use crate::errors::DeployError;
use crate::filesys::dir::Dir;
use crate::models::artifact::Artifact;
use crate::storage::layout::DeployLayout;
use crate::storage::settings::HostSettings;
use crate::transport::Transport;

/// ssh exits with 255 when it could not connect or authenticate
pub(crate) const SSH_CONNECTION_FAILURE: i32 = 255;

/// Pushes the artifact over SSH into `staging/<version>` on the host
///
/// `layout` is the deploy root on the host. The returned `Dir` names the
/// staging path there, so only deploykit running on the host can install it.
pub struct SshTransport {
    layout: DeployLayout,
}

impl SshTransport {
    pub fn new(layout: DeployLayout) -> Self {
        Self { layout }
    }

    /// Run a shell command on the host and capture stdout
    async fn remote(host: &HostSettings, script: &str) -> Result<String, DeployError> {
        let output = exec(host, script).await?;
        check_status("ssh", output.status.code(), &output.stderr)?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn upload(host: &HostSettings, source: &Dir, remote_path: &str) -> Result<(), DeployError> {
        let mut cmd = command(host, "scp");
        common_options(&mut cmd, host);
        cmd.arg("-r")
            .arg("-p")
            .arg("-P")
            .arg(host.port.to_string())
            .arg(source.path())
            .arg(format!("{}:{}", host.destination(), remote_path))
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = cmd
            .output()
            .await
            .map_err(|e| DeployError::Transport(format!("Failed to run scp: {}", e)))?;
        check_status("scp", output.status.code(), &output.stderr)
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn send(&self, artifact: &Artifact, host: &HostSettings) -> Result<Dir, DeployError> {
        let target = self.layout.staged_artifact_dir(artifact.version());
        let final_path = target.path().display().to_string();
        let partial_path = format!("{}.partial", final_path);
        let staging_path = self.layout.staging_dir().path().display().to_string();

        info!(
            "Uploading artifact {} to {}:{}",
            artifact.version(),
            host.destination(),
            final_path
        );

        Self::remote(
            host,
            &format!(
                "mkdir -p {} && rm -rf {}",
                shell_quote(&staging_path),
                shell_quote(&partial_path)
            ),
        )
        .await?;
        Self::upload(host, &artifact.content(), &partial_path).await?;

        let delivered = parse_remote_digest(&Self::remote(host, &digest_script(&partial_path)).await?)?;
        debug!("Remote digest of {}: {}", artifact.version(), delivered);

        if delivered != artifact.digest() {
            Self::remote(host, &format!("rm -rf {}", shell_quote(&partial_path))).await?;
            return Err(DeployError::Transport(format!(
                "Digest mismatch for {}: declared {}, delivered {}",
                artifact.version(),
                artifact.digest(),
                delivered
            )));
        }

        Self::remote(
            host,
            &format!(
                "rm -rf {final} && mv {partial} {final}",
                final = shell_quote(&final_path),
                partial = shell_quote(&partial_path)
            ),
        )
        .await?;

        Ok(target)
    }

    fn name(&self) -> &str {
        "ssh"
    }
}

/// Base command, wrapped in `sshpass -e` when a password is configured
fn command(host: &HostSettings, program: &str) -> Command {
    match &host.password {
        Some(password) => {
            let mut cmd = Command::new("sshpass");
            cmd.arg("-e")
                .arg(program)
                .env("SSHPASS", password.expose_secret());
            cmd
        }
        None => {
            let mut cmd = Command::new(program);
            cmd.args(["-o", "BatchMode=yes"]);
            cmd
        }
    }
}

fn common_options(cmd: &mut Command, host: &HostSettings) {
    cmd.args(["-o", "ConnectTimeout=15"]);
    if let Some(identity) = &host.identity_file {
        cmd.arg("-i").arg(identity);
    }
}

/// Run `script` on the host through ssh and return the raw output
///
/// Only a failure to spawn ssh is an error here; the exit status is left to
/// the caller.
pub(crate) async fn exec(host: &HostSettings, script: &str) -> Result<Output, DeployError> {
    let mut cmd = command(host, "ssh");
    common_options(&mut cmd, host);
    cmd.arg("-p")
        .arg(host.port.to_string())
        .arg(host.destination())
        .arg(script)
        .stdin(Stdio::null())
        .kill_on_drop(true);

    cmd.output()
        .await
        .map_err(|e| DeployError::Transport(format!("Failed to run ssh: {}", e)))
}

fn check_status(program: &str, code: Option<i32>, stderr: &[u8]) -> Result<(), DeployError> {
    let stderr = String::from_utf8_lossy(stderr).trim().to_string();
    match code {
        Some(0) => Ok(()),
        Some(SSH_CONNECTION_FAILURE) => Err(DeployError::Transport(format!(
            "{} could not connect or authenticate: {}",
            program, stderr
        ))),
        Some(code) => Err(DeployError::Transport(format!(
            "{} exited with {}: {}",
            program, code, stderr
        ))),
        None => Err(DeployError::Transport(format!("{} was terminated by a signal", program))),
    }
}

/// Remote equivalent of `Dir::digest`
fn digest_script(path: &str) -> String {
    format!(
        "cd {} && find . -type f -print0 | LC_ALL=C sort -z | xargs -0 -r sha256sum | sha256sum",
        shell_quote(path)
    )
}

fn parse_remote_digest(output: &str) -> Result<String, DeployError> {
    output
        .split_whitespace()
        .next()
        .filter(|hash| hash.len() == 64 && hash.chars().all(|c| c.is_ascii_hexdigit()))
        .map(|hash| format!("sha256:{}", hash.to_lowercase()))
        .ok_or_else(|| {
            DeployError::Transport(format!("Unexpected sha256sum output: '{}'", output.trim()))
        })
}

pub(crate) fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_remote_digest() {
        let out = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855  -\n";
        assert_eq!(
            parse_remote_digest(out).unwrap(),
            "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert!(parse_remote_digest("sha256sum: command not found").is_err());
    }

    #[test]
    fn test_connection_failure_is_reported_as_auth_or_connect() {
        let err = check_status("ssh", Some(255), b"Permission denied (publickey).").unwrap_err();
        assert!(err.to_string().contains("could not connect or authenticate"));
        assert!(check_status("scp", Some(0), b"").is_ok());
    }

    #[test]
    fn test_shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("/srv/it's"), "'/srv/it'\\''s'");
    }
}
