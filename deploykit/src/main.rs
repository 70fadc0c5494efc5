//! deploykit - Entry Point
//!
//! Deploys a versioned artifact to a pm2-supervised service and rolls back
//! automatically when the new release fails its health check.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context};
use deploykit::app::options::{AppOptions, Command};
use deploykit::app::run::{run, EXIT_REFUSED};
use deploykit::filesys::file::File;
use deploykit::logs::{init_logging, LogOptions};
use deploykit::storage::layout::DeployLayout;
use deploykit::storage::settings::Settings;
use deploykit::utils::version_info;
use tracing::{error, info};

const USAGE: &str = "usage: deploykit [--config=<path>] \
    (--deploy --version-id=<v> [--artifact=<dir>] | --status | --backups | --restore=<seq> | --restart | --version)";

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version_info()) {
            Ok(version) => println!("{}", version),
            Err(e) => eprintln!("{}", e),
        }
        return;
    }

    let command = match parse_command(&cli_args) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("{:#}\n{}", e, USAGE);
            std::process::exit(EXIT_REFUSED);
        }
    };

    let settings = match load_settings(cli_args.get("config").map(PathBuf::from)).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Unable to load settings: {:#}", e);
            std::process::exit(EXIT_REFUSED);
        }
    };

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        json_format: settings.json_logs,
        log_dir: Some(DeployLayout::new(settings.deploy_root.clone()).logs_dir().path().to_path_buf()),
        ..Default::default()
    };
    let log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };

    let options = AppOptions::from_settings(&settings);
    info!("Running {:?} against {}", command, options.host.destination());

    let code = match run(options, command, await_shutdown_signal()).await {
        Ok(code) => code,
        Err(e) => {
            error!("Command failed: {}", e);
            EXIT_REFUSED
        }
    };

    drop(log_guard);
    std::process::exit(code);
}

fn parse_command(cli_args: &HashMap<String, String>) -> anyhow::Result<Command> {
    if cli_args.contains_key("deploy") {
        let version = cli_args
            .get("version-id")
            .ok_or_else(|| anyhow!("--deploy requires --version-id=<v>"))?;
        return Ok(Command::Deploy {
            version: version.clone(),
            artifact: cli_args.get("artifact").map(PathBuf::from),
        });
    }
    if let Some(seq) = cli_args.get("restore") {
        let seq = seq
            .parse::<u64>()
            .with_context(|| format!("Invalid backup sequence: {}", seq))?;
        return Ok(Command::Restore { seq });
    }
    if cli_args.contains_key("status") {
        return Ok(Command::Status);
    }
    if cli_args.contains_key("backups") {
        return Ok(Command::Backups);
    }
    if cli_args.contains_key("restart") {
        return Ok(Command::Restart);
    }
    bail!("No command given")
}

/// `--config`, else the settings file in the default deploy root, else defaults
async fn load_settings(path: Option<PathBuf>) -> anyhow::Result<Settings> {
    let settings = match path {
        Some(path) => File::new(&path)
            .read_json::<Settings>()
            .await
            .with_context(|| format!("reading {}", path.display()))?,
        None => {
            let file = DeployLayout::new(Settings::default().deploy_root).settings_file();
            if file.exists().await {
                file.read_json::<Settings>()
                    .await
                    .with_context(|| format!("reading {}", file.path().display()))?
            } else {
                Settings::default()
            }
        }
    };
    settings.validate()?;
    Ok(settings)
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(term), Ok(int)) => (term, int),
                _ => {
                    let _ = tokio::signal::ctrl_c().await;
                    info!("Ctrl+C received, cancelling...");
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, cancelling...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, cancelling...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Ctrl+C received, cancelling...");
    }
}
