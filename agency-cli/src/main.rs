//! Agency — coordinate role-scoped workers over a dependency graph.
//!
//! # Usage
//!
//! ```text
//! agency init [--name <agency>] [--force]
//! agency validate
//! agency plan [--json]
//! agency owner <path>
//! agency check <role> <path>
//! agency brief <role> [--templates DIR]
//! agency daemon start|stop|status
//! agency tick [--json]
//! agency complete <role> --artifact <path>... [--summary S]
//! agency fail <role> --reason R
//! agency retry <role>
//! agency cancel <role> [--reason R]
//! agency status [--json]
//! agency history [role] [--json]
//! ```
//!
//! Every command reads `agency.yaml` from the current directory unless
//! `--config` says otherwise.

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use agency_core::config::DEFAULT_CONFIG_FILE;
use commands::{
    brief::BriefArgs,
    control::{CancelArgs, CompleteArgs, FailArgs, RoleArgs, TickArgs},
    daemon::DaemonCommand,
    init::InitArgs,
    inspect::{CheckArgs, OwnerArgs, PlanArgs},
    status::{HistoryArgs, StatusArgs},
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "agency",
    version,
    about = "Dispatch role-scoped work over a dependency graph with ownership boundaries",
    long_about = None,
)]
struct Cli {
    /// Agency configuration file.
    #[arg(long, short = 'c', global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a starter agency configuration.
    Init(InitArgs),

    /// Load and validate the configuration.
    Validate,

    /// Show dispatch waves and parallel groups.
    Plan(PlanArgs),

    /// Show which role owns a path.
    Owner(OwnerArgs),

    /// Check whether a role may write a path.
    Check(CheckArgs),

    /// Render the delegation brief for a role.
    Brief(BriefArgs),

    /// Run or query the coordinator daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },

    /// Dispatch every ready role.
    Tick(TickArgs),

    /// Report a dispatched role as completed.
    Complete(CompleteArgs),

    /// Report a dispatched role as failed.
    Fail(FailArgs),

    /// Re-queue a failed role.
    Retry(RoleArgs),

    /// Cancel a pending or dispatched role.
    Cancel(CancelArgs),

    /// Show the state of every role.
    Status(StatusArgs),

    /// Show the audit trail, optionally for one role.
    History(HistoryArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.config;
    match cli.command {
        Commands::Init(args) => args.run(&config),
        Commands::Validate => commands::inspect::validate(&config),
        Commands::Plan(args) => args.run(&config),
        Commands::Owner(args) => args.run(&config),
        Commands::Check(args) => args.run(&config),
        Commands::Brief(args) => args.run(&config),
        Commands::Daemon { command } => commands::daemon::run(&config, command),
        Commands::Tick(args) => args.run(&config),
        Commands::Complete(args) => args.run(&config),
        Commands::Fail(args) => args.run(&config),
        Commands::Retry(args) => args.run(&config),
        Commands::Cancel(args) => args.run(&config),
        Commands::Status(args) => args.run(&config),
        Commands::History(args) => args.run(&config),
    }
}
