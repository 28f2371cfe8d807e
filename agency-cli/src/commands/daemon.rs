//! `agency daemon` — coordinator lifecycle.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use agency_daemon::paths::socket_path;
use agency_daemon::{request_status, request_stop, start_blocking, DaemonError, DaemonOptions};

use super::{home_dir, load_agency, print_json};

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Run the coordinator in the foreground (scheduler + socket + workers).
    Start(StartArgs),
    /// Request graceful shutdown over the Unix socket.
    Stop,
    /// Query the running coordinator.
    Status,
}

#[derive(Args, Debug)]
pub struct StartArgs {
    /// Directory workers run in. Defaults to the configuration's directory.
    #[arg(long)]
    pub workdir: Option<PathBuf>,

    /// Directory of `.tera` overrides for rendered briefs.
    #[arg(long)]
    pub templates: Option<PathBuf>,
}

pub fn run(config: &Path, command: DaemonCommand) -> Result<()> {
    let home = home_dir()?;
    let agency = load_agency(config)?;
    let socket = socket_path(&home, &agency.name);

    match command {
        DaemonCommand::Start(args) => {
            let config_path = config
                .canonicalize()
                .with_context(|| format!("cannot resolve '{}'", config.display()))?;
            let workdir = match args.workdir {
                Some(dir) => dir,
                None => config_path
                    .parent()
                    .map(Path::to_path_buf)
                    .context("configuration has no parent directory")?,
            };
            start_blocking(DaemonOptions {
                home,
                config_path,
                workdir,
                templates: args.templates,
            })
            .context("daemon exited with error")?;
        }
        DaemonCommand::Stop => match request_stop(&socket) {
            Ok(()) => println!("daemon stop requested"),
            Err(DaemonError::DaemonNotRunning { .. }) => {
                println!("daemon is not running");
            }
            Err(err) => return Err(err).context("failed to stop daemon"),
        },
        DaemonCommand::Status => match request_status(&socket) {
            Ok(status) => print_json(&status)?,
            Err(DaemonError::DaemonNotRunning { .. }) => {
                print_json(&serde_json::json!({
                    "running": false,
                    "agency": agency.name,
                    "socket": socket.display().to_string(),
                }))?;
            }
            Err(err) => return Err(err).context("failed to query daemon status"),
        },
    }

    Ok(())
}
