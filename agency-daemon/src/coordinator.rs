//! The single writer of an agency run.
//!
//! A [`Coordinator`] owns the [`Scheduler`] (and through it the journal), the
//! brief renderer and the run directory. The daemon keeps one inside its
//! coordinator task; the CLI opens one directly when no daemon is running.
//! Either way every state change goes through [`Coordinator::handle`].
//!
//! Opening a coordinator takes the run's exclusive lock (`run.lock`), so a
//! second writer fails with [`DaemonError::RunLocked`] instead of forking the
//! journal's digest chain.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{json, Value};

use agency_core::types::{CompletionReport, RoleName, TaskDelegation, TaskStatus};
use agency_core::Agency;
use agency_renderer::{brief_file_name, BriefRenderer};
use agency_sched::{AuditLog, Scheduler, TickOutcome};

use crate::error::{io_err, DaemonError};
use crate::lock::RunLock;
use crate::paths::{briefs_dir, journal_path, lock_path, run_dir};
use crate::protocol::DaemonRequest;
use crate::worker::WorkerLaunch;

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// A state-changing or read-only operation on the run.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Status,
    Tick,
    Complete(CompletionReport),
    Retry(String),
    Cancel { role: String, note: Option<String> },
    History { role: Option<String> },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Status => "status",
            Command::Tick => "tick",
            Command::Complete(_) => "complete",
            Command::Retry(_) => "retry",
            Command::Cancel { .. } => "cancel",
            Command::History { .. } => "history",
        }
    }
}

/// Translate a socket request into a [`Command`].
///
/// `stop` is handled by the socket server itself and is not a command.
pub fn command_from_request(request: &DaemonRequest) -> Result<Command, DaemonError> {
    let role = || {
        request
            .role
            .clone()
            .ok_or_else(|| DaemonError::BadRequest(format!("'{}' requires a role", request.cmd)))
    };
    let command = match request.cmd.as_str() {
        "status" => Command::Status,
        "tick" => Command::Tick,
        "complete" => Command::Complete(CompletionReport::completed(
            role()?,
            request.artifacts.clone(),
            request.summary.clone().unwrap_or_default(),
        )),
        "fail" => Command::Complete(CompletionReport::failed(
            role()?,
            request
                .reason
                .clone()
                .unwrap_or_else(|| "no reason given".to_string()),
        )),
        "retry" => Command::Retry(role()?),
        "cancel" => Command::Cancel {
            role: role()?,
            note: request.reason.clone(),
        },
        "history" => Command::History {
            role: request.role.clone(),
        },
        other => return Err(DaemonError::BadRequest(format!("unknown command '{other}'"))),
    };
    Ok(command)
}

/// What [`Coordinator::handle`] produced: the response payload plus any
/// workers the caller should start.
#[derive(Debug, Default)]
pub struct Reply {
    pub data: Value,
    pub launches: Vec<WorkerLaunch>,
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

pub struct Coordinator {
    scheduler: Scheduler,
    renderer: BriefRenderer,
    run_dir: PathBuf,
    briefs_dir: PathBuf,
    lock: RunLock,
}

impl Coordinator {
    /// Load the agency at `config_path` and resume its run from the journal
    /// under `home`. Fails with [`DaemonError::RunLocked`] while another
    /// coordinator has the run open; the lock is released on drop.
    pub fn open(
        home: &Path,
        config_path: &Path,
        templates: Option<&Path>,
    ) -> Result<Self, DaemonError> {
        let agency = Agency::load(config_path)?;
        let run = run_dir(home, &agency.name);
        fs::create_dir_all(&run).map_err(|e| io_err(&run, e))?;
        let lock = RunLock::acquire(&lock_path(home, &agency.name), &agency.name)?;

        let log = AuditLog::open(&journal_path(home, &agency.name))?;
        let briefs = briefs_dir(home, &agency.name);
        let scheduler = Scheduler::resume(agency, log)?;
        Ok(Self {
            scheduler,
            renderer: BriefRenderer::with_overrides(templates)?,
            run_dir: run,
            briefs_dir: briefs,
            lock,
        })
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn agency(&self) -> &Agency {
        self.scheduler.agency()
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn lock_path(&self) -> &Path {
        self.lock.path()
    }

    pub fn brief_path(&self, role: &RoleName) -> PathBuf {
        self.briefs_dir.join(brief_file_name(role))
    }

    /// Work owed after a restart: workers for roles the journal shows as
    /// dispatched, plus an automatic tick when enabled.
    pub fn startup(&mut self) -> Result<Reply, DaemonError> {
        let mut launches = Vec::new();
        let running: Vec<RoleName> = self
            .scheduler
            .snapshot()
            .into_iter()
            .filter(|view| view.status == TaskStatus::Dispatched)
            .map(|view| view.role)
            .collect();
        for role in running {
            let Some(delegation) = self.scheduler.delegation_of(role.as_str())?.cloned() else {
                continue;
            };
            let brief = self.try_write_brief(&delegation);
            if let Some(launch) = self.launch_for(&delegation, brief) {
                tracing::info!(role = %role, "relaunching worker for dispatched role");
                launches.push(launch);
            }
        }

        let mut data = json!({ "relaunched": launches.iter().map(|l| l.role.clone()).collect::<Vec<_>>() });
        if self.agency().runtime.auto_tick {
            let (outcome, briefs, more) = self.tick()?;
            launches.extend(more);
            data["tick"] = tick_payload(&outcome, &briefs);
        }
        Ok(Reply { data, launches })
    }

    /// Execute one command.
    pub fn handle(&mut self, command: Command) -> Result<Reply, DaemonError> {
        tracing::debug!(cmd = command.name(), "handling command");
        match command {
            Command::Status => Ok(Reply {
                data: self.status_payload(),
                launches: vec![],
            }),
            Command::Tick => {
                let (outcome, briefs, launches) = self.tick()?;
                Ok(Reply {
                    data: tick_payload(&outcome, &briefs),
                    launches,
                })
            }
            Command::Complete(report) => {
                let role = report.role.clone();
                let status = self.scheduler.signal_completion(report)?;
                self.after_transition(role, status)
            }
            Command::Retry(role) => {
                self.scheduler.retry(&role)?;
                let status = self.scheduler.status_of(&role)?;
                self.after_transition(role.into(), status)
            }
            Command::Cancel { role, note } => {
                self.scheduler.cancel(&role, note)?;
                let status = self.scheduler.status_of(&role)?;
                self.after_transition(role.into(), status)
            }
            Command::History { role } => {
                let records: Vec<Value> = match &role {
                    Some(role) => {
                        // Reject unknown roles rather than returning an empty history.
                        self.scheduler.status_of(role)?;
                        self.scheduler
                            .history_for(role)
                            .map(serde_json::to_value)
                            .collect::<Result<_, _>>()?
                    }
                    None => self
                        .scheduler
                        .log()
                        .records()
                        .iter()
                        .map(serde_json::to_value)
                        .collect::<Result<_, _>>()?,
                };
                Ok(Reply {
                    data: json!({ "role": role, "records": records }),
                    launches: vec![],
                })
            }
        }
    }

    /// Payload of the `status` command.
    pub fn status_payload(&self) -> Value {
        let log = self.scheduler.log();
        json!({
            "agency": self.agency().name,
            "journal": log.journal_path().map(|p| p.display().to_string()),
            "records": log.len(),
            "complete": self.scheduler.is_complete(),
            "finished": self.scheduler.is_finished(),
            "roles": self.scheduler.snapshot(),
            "blocked": self.scheduler.blocked(),
        })
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn after_transition(&mut self, role: RoleName, status: TaskStatus) -> Result<Reply, DaemonError> {
        let mut data = json!({ "role": role, "status": status, "dispatched": [] });
        let mut launches = Vec::new();
        if self.agency().runtime.auto_tick {
            let (outcome, _, more) = self.tick()?;
            data["dispatched"] = json!(outcome.dispatched_roles());
            data["held"] = json!(outcome.held);
            if let Some(reason) = &outcome.interrupted {
                data["interrupted"] = json!(reason);
            }
            launches = more;
        }
        Ok(Reply { data, launches })
    }

    /// Tick the scheduler and prepare briefs and workers for what it
    /// dispatched. Once a role is journaled as dispatched it always gets its
    /// launch; a brief that cannot be written only costs the worker its
    /// `AGENCY_BRIEF`.
    fn tick(&mut self) -> Result<(TickOutcome, Vec<PathBuf>, Vec<WorkerLaunch>), DaemonError> {
        let outcome = self.scheduler.tick()?;
        let mut briefs = Vec::with_capacity(outcome.dispatched.len());
        let mut launches = Vec::new();
        for delegation in &outcome.dispatched {
            let brief = self.try_write_brief(delegation);
            if let Some(launch) = self.launch_for(delegation, brief.clone()) {
                launches.push(launch);
            }
            briefs.extend(brief);
        }
        Ok((outcome, briefs, launches))
    }

    fn try_write_brief(&self, delegation: &TaskDelegation) -> Option<PathBuf> {
        match self.write_brief(delegation) {
            Ok(path) => Some(path),
            Err(err) => {
                tracing::warn!(role = %delegation.role, error = %err, "failed to write brief");
                None
            }
        }
    }

    /// Render the brief for `delegation` and write it atomically.
    fn write_brief(&self, delegation: &TaskDelegation) -> Result<PathBuf, DaemonError> {
        let spec = self.agency().role(delegation.role.as_str());
        let brief = self.renderer.render(delegation, spec)?;

        fs::create_dir_all(&self.briefs_dir).map_err(|e| io_err(&self.briefs_dir, e))?;
        let path = self.brief_path(&delegation.role);
        let tmp = path.with_extension("md.tmp");
        fs::write(&tmp, brief).map_err(|e| io_err(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
        tracing::debug!(role = %delegation.role, path = %path.display(), "wrote brief");
        Ok(path)
    }

    fn launch_for(&self, delegation: &TaskDelegation, brief: Option<PathBuf>) -> Option<WorkerLaunch> {
        let argv = self
            .agency()
            .role(delegation.role.as_str())?
            .command
            .clone()?;
        Some(WorkerLaunch {
            role: delegation.role.clone(),
            argv,
            delegation: delegation.clone(),
            brief_path: brief,
        })
    }
}

fn tick_payload(outcome: &TickOutcome, briefs: &[PathBuf]) -> Value {
    let mut payload = json!({
        "dispatched": outcome.dispatched,
        "held": outcome.held,
        "briefs": briefs.iter().map(|p| p.display().to_string()).collect::<Vec<_>>(),
    });
    if let Some(reason) = &outcome.interrupted {
        payload["interrupted"] = json!(reason);
    }
    payload
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
