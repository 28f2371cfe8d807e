//! Static inspection of the configuration: `validate`, `plan`, `owner`,
//! `check`. None of these touch run state.

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use agency_core::types::RoleName;
use agency_core::Agency;

use super::{load_agency, print_json};

pub fn validate(config: &Path) -> Result<()> {
    let agency = load_agency(config)?;
    let edges: usize = agency
        .roles()
        .filter_map(|r| agency.graph.dependencies_of(r.name.as_str()).ok())
        .map(|deps| deps.len())
        .sum();
    println!(
        "{} agency '{}' is valid: {} roles, {} edges, {} parallel group(s)",
        "✓".green(),
        agency.name,
        agency.registry.len(),
        edges,
        agency.parallel_groups().len()
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// plan
// ---------------------------------------------------------------------------

#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Serialize)]
struct PlanJson {
    agency: String,
    waves: Vec<Vec<RoleName>>,
    parallel_groups: Vec<Vec<RoleName>>,
}

#[derive(Tabled)]
struct PlanRow {
    #[tabled(rename = "wave")]
    wave: usize,
    #[tabled(rename = "role")]
    role: String,
    #[tabled(rename = "depends on")]
    depends_on: String,
    #[tabled(rename = "owns")]
    owns: String,
    #[tabled(rename = "group")]
    group: String,
}

impl PlanArgs {
    pub fn run(self, config: &Path) -> Result<()> {
        let agency = load_agency(config)?;
        let waves = agency.graph.waves();

        if self.json {
            return print_json(&PlanJson {
                agency: agency.name.clone(),
                waves,
                parallel_groups: agency.parallel_groups().to_vec(),
            });
        }

        println!("Agency: {}", agency.name.bold());
        let table = Table::new(plan_rows(&agency, &waves))
            .with(Style::rounded())
            .to_string();
        println!("{table}");
        Ok(())
    }
}

fn plan_rows(agency: &Agency, waves: &[Vec<RoleName>]) -> Vec<PlanRow> {
    let mut rows = Vec::new();
    for (index, wave) in waves.iter().enumerate() {
        for role in wave {
            let depends_on = agency
                .graph
                .dependencies_of(role.as_str())
                .map(|deps| join(deps.iter()))
                .unwrap_or_default();
            let owns = agency
                .role(role.as_str())
                .map(|spec| spec.owned_paths.join(", "))
                .unwrap_or_default();
            let group = agency
                .parallel_group_of(role.as_str())
                .map(|g| format!("#{}", g + 1))
                .unwrap_or_default();
            rows.push(PlanRow {
                wave: index + 1,
                role: role.to_string(),
                depends_on: if depends_on.is_empty() { "-".into() } else { depends_on },
                owns,
                group,
            });
        }
    }
    rows
}

fn join<'a>(roles: impl Iterator<Item = &'a RoleName>) -> String {
    roles.map(RoleName::as_str).collect::<Vec<_>>().join(", ")
}

// ---------------------------------------------------------------------------
// owner / check
// ---------------------------------------------------------------------------

#[derive(Args, Debug)]
pub struct OwnerArgs {
    /// Workspace-relative path.
    pub path: PathBuf,
}

impl OwnerArgs {
    pub fn run(self, config: &Path) -> Result<()> {
        let agency = load_agency(config)?;
        match agency.registry.claim_of(&self.path) {
            Some((role, pattern)) => {
                println!("{} is owned by '{}' ({})", self.path.display(), role, pattern)
            }
            None => println!("{} is unowned; any role may write it", self.path.display()),
        }
        Ok(())
    }
}

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Role proposing the write.
    pub role: String,
    /// Workspace-relative path.
    pub path: PathBuf,
}

impl CheckArgs {
    pub fn run(self, config: &Path) -> Result<()> {
        let agency = load_agency(config)?;
        if !agency.registry.contains(&self.role) {
            bail!("unknown role '{}'", self.role);
        }
        match agency.registry.validate_write(&self.role, &self.path) {
            Ok(()) => {
                println!(
                    "{} '{}' may write {}",
                    "✓".green(),
                    self.role,
                    self.path.display()
                );
                Ok(())
            }
            Err(rejection) => bail!("'{}' may not write: {rejection}", self.role),
        }
    }
}
