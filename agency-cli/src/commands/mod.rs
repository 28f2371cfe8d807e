pub mod brief;
pub mod control;
pub mod daemon;
pub mod init;
pub mod inspect;
pub mod status;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use colored::{ColoredString, Colorize};

use agency_core::Agency;

pub fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}

pub fn load_agency(config: &Path) -> Result<Agency> {
    Agency::load(config).with_context(|| {
        format!(
            "failed to load agency from '{}' — run `agency init` first",
            config.display()
        )
    })
}

/// Status word colored the same way everywhere.
pub fn paint_status(status: &str) -> ColoredString {
    match status {
        "completed" => status.green(),
        "dispatched" => status.cyan(),
        "failed" => status.red(),
        _ => status.normal(),
    }
}

pub fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to serialize JSON output")?
    );
    Ok(())
}
