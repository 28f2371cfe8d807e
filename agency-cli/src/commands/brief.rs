//! `agency brief <role> [--templates DIR]`
//!
//! Prints the brief of the role's current dispatch. A role that was never
//! dispatched gets a preview built from the run's state; the journal is only
//! read, never written.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Args;

use agency_core::types::{RoleName, TaskStatus};
use agency_daemon::paths::journal_path;
use agency_renderer::BriefRenderer;
use agency_sched::audit::load_journal;
use agency_sched::dispatch::build_delegation;
use agency_sched::{AuditLog, Scheduler};

use super::{home_dir, load_agency};

#[derive(Args, Debug)]
pub struct BriefArgs {
    pub role: String,

    /// Directory of `.tera` overrides.
    #[arg(long)]
    pub templates: Option<PathBuf>,
}

impl BriefArgs {
    pub fn run(self, config: &Path) -> Result<()> {
        let agency = load_agency(config)?;
        let Some(spec) = agency.role(&self.role).cloned() else {
            bail!("unknown role '{}'", self.role);
        };

        let journal = journal_path(&home_dir()?, &agency.name);
        let records = load_journal(&journal)
            .with_context(|| format!("failed to read journal '{}'", journal.display()))?;
        let scheduler = Scheduler::resume(agency, AuditLog::from_records(records)?)?;

        let delegation = match scheduler.delegation_of(&self.role)? {
            Some(delegation) if scheduler.status_of(&self.role)? != TaskStatus::Pending => {
                delegation.clone()
            }
            _ => {
                let views = scheduler.snapshot();
                let agency = scheduler.agency();
                let upstream: BTreeMap<RoleName, Vec<PathBuf>> = agency
                    .graph
                    .dependencies_of(&self.role)?
                    .iter()
                    .map(|dep| {
                        let artifacts = views
                            .iter()
                            .find(|v| &v.role == dep)
                            .map(|v| v.artifacts.clone())
                            .unwrap_or_default();
                        (dep.clone(), artifacts)
                    })
                    .collect();
                let attempt = views
                    .iter()
                    .find(|v| v.role.as_str() == self.role)
                    .map_or(0, |v| v.attempt)
                    + 1;
                build_delegation(agency, &spec, &upstream, attempt, Utc::now())
            }
        };

        let renderer = BriefRenderer::with_overrides(self.templates.as_deref())
            .context("failed to load brief templates")?;
        print!("{}", renderer.render(&delegation, Some(&spec))?);
        Ok(())
    }
}
