//! CLI command dispatch

use std::future::Future;
use std::path::PathBuf;

use colored::{ColoredString, Colorize};
use tracing::{error, info};

use crate::app::options::{AppOptions, Command};
use crate::app::state::{AppState, Target};
use crate::deploy::build::CommandBuilder;
use crate::deploy::orchestrator::Orchestrator;
use crate::deploy::remote::{RemoteDeployer, RemoteDeployment};
use crate::errors::DeployError;
use crate::models::deployment::{DeploymentAttempt, Outcome};
use crate::storage::settings::BuildSettings;

pub use crate::models::deployment::EXIT_REFUSED;

/// Run one CLI command and return the process exit code
///
/// `shutdown_signal` cancels a deploy while it is still before the backup
/// stage; after that the attempt always runs to completion.
pub async fn run(
    options: AppOptions,
    command: Command,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<i32, DeployError> {
    let state = AppState::init(&options).await?;

    match &state.target {
        Target::Local(orchestrator) => {
            run_local(orchestrator, &options, &state.build, command, shutdown_signal).await
        }
        Target::Remote(remote) => run_remote(remote, &state.build, command, shutdown_signal).await,
    }
}

async fn run_local(
    orchestrator: &Orchestrator,
    options: &AppOptions,
    build: &BuildSettings,
    command: Command,
    shutdown_signal: impl Future<Output = ()> + Send,
) -> Result<i32, DeployError> {
    match command {
        Command::Deploy { version, artifact } => {
            let builder = CommandBuilder::new(version, build_settings(build, artifact)?);
            let attempt = orchestrator
                .deploy_with_cancel(&builder, shutdown_signal)
                .await?;
            Ok(report(&attempt))
        }
        Command::Restore { seq } => {
            let attempt = orchestrator.manual_restore(seq).await?;
            Ok(report(&attempt))
        }
        Command::Status => {
            print_status(orchestrator).await?;
            Ok(0)
        }
        Command::Backups => {
            print_backups(orchestrator).await?;
            Ok(0)
        }
        Command::Restart => {
            info!("Restarting {}", options.supervisor.app_name);
            orchestrator.supervisor().restart().await?;
            println!("{} {}", "restarted".green(), options.supervisor.app_name);
            Ok(0)
        }
    }
}

/// Deploys are built and shipped here; everything else runs on the host as-is
async fn run_remote(
    remote: &RemoteDeployer,
    build: &BuildSettings,
    command: Command,
    shutdown_signal: impl Future<Output = ()> + Send,
) -> Result<i32, DeployError> {
    match command {
        Command::Deploy { version, artifact } => {
            let builder = CommandBuilder::new(version, build_settings(build, artifact)?);
            let deployment = remote.deploy_with_cancel(&builder, shutdown_signal).await?;
            Ok(report_remote(remote, &deployment))
        }
        command => {
            let output = remote.forward(&command.to_args()).await?;
            print!("{}", output.stdout);
            eprint!("{}", output.stderr);
            Ok(output.code.unwrap_or(EXIT_REFUSED))
        }
    }
}

/// `--artifact` replaces the build command with a prebuilt directory
fn build_settings(
    build: &BuildSettings,
    artifact: Option<PathBuf>,
) -> Result<BuildSettings, DeployError> {
    Ok(match artifact {
        Some(path) => BuildSettings {
            command: None,
            output_dir: std::path::absolute(&path)?,
            ..build.clone()
        },
        None => build.clone(),
    })
}

fn outcome_label(outcome: Outcome) -> ColoredString {
    match outcome {
        Outcome::Committed => outcome.to_string().green().bold(),
        Outcome::Aborted => outcome.to_string().yellow().bold(),
        Outcome::RolledBack => outcome.to_string().yellow().bold(),
        Outcome::ManualInterventionRequired => outcome.to_string().red().bold(),
    }
}

fn report(attempt: &DeploymentAttempt) -> i32 {
    let outcome = attempt.final_outcome();
    println!(
        "{} {} on {}: {}",
        attempt.id.dimmed(),
        attempt.version,
        attempt.host,
        outcome_label(outcome)
    );
    for stage in &attempt.stages {
        let status = match &stage.error {
            None => "ok".green(),
            Some(e) => e.as_str().red(),
        };
        println!("  {:<12} {:>8}ms  {}", stage.stage.to_string(), stage.duration_ms, status);
    }
    if let Some(seq) = attempt.backup_seq {
        println!("  backup       {}", seq);
    }
    if outcome == Outcome::ManualInterventionRequired {
        error!("Attempt {} needs manual intervention", attempt.id);
    }
    outcome.exit_code()
}

fn report_remote(remote: &RemoteDeployer, deployment: &RemoteDeployment) -> i32 {
    print!("{}", deployment.output);
    println!(
        "{} on {}: {}",
        deployment.version,
        remote.host().destination(),
        outcome_label(deployment.outcome)
    );
    if let Some(e) = &deployment.error {
        println!("  {}", e.red());
    }
    if deployment.outcome == Outcome::ManualInterventionRequired {
        error!("{} needs manual intervention", remote.host().destination());
    }
    deployment.outcome.exit_code()
}

async fn print_status(orchestrator: &Orchestrator) -> Result<(), DeployError> {
    let tree = orchestrator.tree();

    match tree.current_release().await? {
        Some(release) => println!("{} {} ({})", "live".bold(), release.version, release.digest),
        None => println!("{} {}", "live".bold(), "no release recorded".dimmed()),
    }
    match tree.live_digest().await {
        Ok(digest) => println!("  digest     {}", digest),
        Err(e) => println!("  digest     {}", e.to_string().red()),
    }

    match orchestrator.supervisor().status().await {
        Ok(workers) => {
            for worker in workers {
                println!(
                    "  worker {:<3} {:<10} pid={}",
                    worker.id,
                    format!("{:?}", worker.state).to_lowercase(),
                    worker.pid.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string())
                );
            }
        }
        Err(e) => println!("  workers    {}", e.to_string().red()),
    }

    match orchestrator.backups().latest_seq().await? {
        Some(seq) => println!("  backup     {}", seq),
        None => println!("  backup     {}", "none".dimmed()),
    }
    Ok(())
}

async fn print_backups(orchestrator: &Orchestrator) -> Result<(), DeployError> {
    let backups = orchestrator.backups().list().await?;
    if backups.is_empty() {
        println!("{}", "no backups".dimmed());
    }
    for backup in backups {
        let version = backup
            .release
            .as_ref()
            .map(|r| r.version.as_str())
            .unwrap_or("-");
        println!(
            "{:>6}  {}  {:<16} {}",
            backup.seq,
            backup.created_at.format("%Y-%m-%d %H:%M:%S"),
            version,
            backup.digest.dimmed()
        );
    }
    Ok(())
}
