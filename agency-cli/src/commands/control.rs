//! Run control: `tick`, `complete`, `fail`, `retry`, `cancel`.
//!
//! Requests go to the running daemon when there is one. Without a daemon the
//! command is applied directly to the run's journal; roles with a worker
//! command are then dispatched but not started.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde_json::Value;

use agency_daemon::paths::socket_path;
use agency_daemon::{command_from_request, request, Coordinator, DaemonError, DaemonRequest};

use super::{home_dir, load_agency, paint_status, print_json};

/// Send `req` to the daemon, or handle it in-process when none is running.
pub fn execute(config: &Path, req: DaemonRequest) -> Result<Value> {
    let home = home_dir()?;
    let agency = load_agency(config)?;
    let socket = socket_path(&home, &agency.name);

    match request(&socket, &req) {
        Ok(data) => Ok(data),
        Err(DaemonError::DaemonNotRunning { .. }) => execute_offline(&home, config, &req),
        Err(err) => Err(err).with_context(|| format!("'{}' failed", req.cmd)),
    }
}

fn execute_offline(home: &Path, config: &Path, req: &DaemonRequest) -> Result<Value> {
    let command = command_from_request(req)?;
    let mut coordinator =
        Coordinator::open(home, config, None).context("failed to open the run journal")?;
    let reply = coordinator
        .handle(command)
        .with_context(|| format!("'{}' failed", req.cmd))?;
    for launch in &reply.launches {
        eprintln!(
            "{} '{}' has a worker command; start `agency daemon` to run it",
            "note:".yellow(),
            launch.role
        );
    }
    Ok(reply.data)
}

// ---------------------------------------------------------------------------
// tick
// ---------------------------------------------------------------------------

#[derive(Args, Debug)]
pub struct TickArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl TickArgs {
    pub fn run(self, config: &Path) -> Result<()> {
        let data = execute(config, DaemonRequest::new("tick"))?;
        if self.json {
            return print_json(&data);
        }

        let dispatched = data["dispatched"].as_array().cloned().unwrap_or_default();
        let briefs = data["briefs"].as_array().cloned().unwrap_or_default();
        if dispatched.is_empty() {
            println!("nothing ready to dispatch");
        }
        for delegation in &dispatched {
            let role = delegation["role"].as_str().unwrap_or("?");
            println!(
                "{} {} (attempt {})",
                "→".cyan(),
                role.bold(),
                delegation["attempt"]
            );
            let brief = briefs
                .iter()
                .filter_map(Value::as_str)
                .find(|b| Path::new(b).file_stem().and_then(|s| s.to_str()) == Some(role));
            if let Some(brief) = brief {
                println!("    brief: {brief}");
            }
        }
        print_held(&data);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// complete / fail / retry / cancel
// ---------------------------------------------------------------------------

#[derive(Args, Debug)]
pub struct CompleteArgs {
    pub role: String,

    /// Artifact written by the role (repeatable).
    #[arg(long = "artifact", short = 'a', value_name = "PATH")]
    pub artifacts: Vec<PathBuf>,

    #[arg(long, short = 's')]
    pub summary: Option<String>,
}

impl CompleteArgs {
    pub fn run(self, config: &Path) -> Result<()> {
        let mut req = DaemonRequest::for_role("complete", self.role);
        req.artifacts = self.artifacts;
        req.summary = self.summary;
        print_transition(&execute(config, req)?);
        Ok(())
    }
}

#[derive(Args, Debug)]
pub struct FailArgs {
    pub role: String,

    #[arg(long, short = 'r')]
    pub reason: String,
}

impl FailArgs {
    pub fn run(self, config: &Path) -> Result<()> {
        let mut req = DaemonRequest::for_role("fail", self.role);
        req.reason = Some(self.reason);
        print_transition(&execute(config, req)?);
        Ok(())
    }
}

#[derive(Args, Debug)]
pub struct RoleArgs {
    pub role: String,
}

impl RoleArgs {
    pub fn run(self, config: &Path) -> Result<()> {
        let data = execute(config, DaemonRequest::for_role("retry", self.role))?;
        print_transition(&data);
        Ok(())
    }
}

#[derive(Args, Debug)]
pub struct CancelArgs {
    pub role: String,

    /// Note recorded with the cancellation.
    #[arg(long, short = 'r')]
    pub reason: Option<String>,
}

impl CancelArgs {
    pub fn run(self, config: &Path) -> Result<()> {
        let mut req = DaemonRequest::for_role("cancel", self.role);
        req.reason = self.reason;
        print_transition(&execute(config, req)?);
        Ok(())
    }
}

fn print_transition(data: &Value) {
    let role = data["role"].as_str().unwrap_or("?");
    let status = data["status"].as_str().unwrap_or("?");
    println!("✓ {} → {}", role.bold(), paint_status(status));

    let dispatched: Vec<&str> = data["dispatched"]
        .as_array()
        .map(|roles| roles.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    if !dispatched.is_empty() {
        println!("  dispatched: {}", dispatched.join(", "));
    }
    print_held(data);
}

fn print_held(data: &Value) {
    if let Some(reason) = data["interrupted"].as_str() {
        eprintln!("{} tick stopped early: {reason}", "warning:".yellow());
    }
    for held in data["held"].as_array().into_iter().flatten() {
        let missing: Vec<&str> = held["missing"]
            .as_array()
            .map(|m| m.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        println!(
            "  {} {} is waiting for inputs nobody produced: {}",
            "held:".yellow(),
            held["role"].as_str().unwrap_or("?"),
            missing.join(", ")
        );
    }
}
