//! `agency init [--name <agency>] [--force]`

use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::Args;

use agency_core::config::{sample_config, save_at};
use agency_core::Agency;

/// Write a starter agency configuration.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Agency name. Defaults to the current directory's name.
    #[arg(long, short = 'n')]
    pub name: Option<String>,

    /// Overwrite an existing configuration.
    #[arg(long)]
    pub force: bool,
}

impl InitArgs {
    pub fn run(self, config: &Path) -> Result<()> {
        if config.exists() && !self.force {
            bail!(
                "'{}' already exists; pass --force to overwrite it",
                config.display()
            );
        }

        let name = match self.name {
            Some(name) => name,
            None => default_name()?,
        };
        let cfg = sample_config(&name);
        // Refuse to write something `validate` would reject.
        Agency::build(cfg.clone()).with_context(|| format!("invalid agency name '{name}'"))?;
        save_at(config, &cfg).with_context(|| format!("failed to write '{}'", config.display()))?;

        println!("✓ Wrote agency '{}' to {}", name, config.display());
        println!("  {} roles, {} edges", cfg.roles.len(), cfg.edges.len());
        println!("  Next: agency plan   ·   agency daemon start");
        Ok(())
    }
}

fn default_name() -> Result<String> {
    let cwd = std::env::current_dir().context("could not determine current directory")?;
    let raw = cwd
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(sanitize_name(&raw))
}

/// Map a directory name onto the characters an agency name allows.
fn sanitize_name(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        "agency".to_string()
    } else {
        cleaned
    }
}
